//! End-to-end rewriting tests.
//!
//! Expected SQL is normalized through the parser so the assertions do not
//! depend on whitespace or keyword casing.
//!
//! Run with: cargo test --package tenantry-rls --test rewrite_tests

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tenantry_core::{SqlDialect, TenancyConfig};
use tenantry_rls::{
    FixedTenant, PlaceholderTenant, RlsError, SkipReason, SqlAnalyzer, TenantPolicy,
    TenantRewriter,
};

fn policy() -> TenantPolicy {
    TenantPolicy::builder()
        .ignore_table("sys_dict")
        .exempt_statement("app.OrderMapper.purgeAll")
        .exempt_group("app.ReportMapper")
        .build(Arc::new(FixedTenant::number(42)))
}

fn rewrite(sql: &str) -> String {
    TenantRewriter::new(policy())
        .rewrite_sql(sql, None)
        .unwrap()
        .rewritten_sql
}

fn rewrite_postgres(sql: &str) -> String {
    let policy = TenantPolicy::builder()
        .dialect(SqlDialect::Postgres)
        .build(Arc::new(FixedTenant::number(42)));
    TenantRewriter::new(policy)
        .rewrite_sql(sql, None)
        .unwrap()
        .rewritten_sql
}

fn normalized(sql: &str) -> String {
    normalized_in(SqlDialect::MySql, sql)
}

fn normalized_in(dialect: SqlDialect, sql: &str) -> String {
    SqlAnalyzer::new(dialect)
        .parse(sql)
        .unwrap()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(";")
}

// SELECT

#[test]
fn test_single_table_where() {
    assert_eq!(
        rewrite("SELECT id FROM orders WHERE status = 'open'"),
        normalized("SELECT id FROM orders WHERE status = 'open' AND orders.tenant_id = 42")
    );
}

#[test]
fn test_or_where_is_parenthesized() {
    assert_eq!(
        rewrite("SELECT id FROM orders o WHERE o.a = 1 OR o.b = 2"),
        normalized("SELECT id FROM orders o WHERE (o.a = 1 OR o.b = 2) AND o.tenant_id = 42")
    );
}

#[test]
fn test_rewriting_twice_duplicates_predicate() {
    let rewriter = TenantRewriter::new(policy());
    let once = rewriter
        .rewrite_sql("SELECT * FROM orders", None)
        .unwrap()
        .rewritten_sql;
    let twice = rewriter.rewrite_sql(&once, None).unwrap().rewritten_sql;
    assert_eq!(twice.matches("orders.tenant_id = 42").count(), 2);
}

#[test]
fn test_schema_qualified_table() {
    assert_eq!(
        rewrite("SELECT * FROM sales.orders"),
        normalized("SELECT * FROM sales.orders WHERE sales.orders.tenant_id = 42")
    );
    assert_eq!(
        rewrite("SELECT * FROM public.sys_dict"),
        normalized("SELECT * FROM public.sys_dict")
    );
}

#[test]
fn test_implicit_join_scopes_every_table_in_where() {
    assert_eq!(
        rewrite("SELECT * FROM orders o, customers c WHERE o.customer_id = c.id"),
        normalized(
            "SELECT * FROM orders o, customers c \
             WHERE o.customer_id = c.id AND o.tenant_id = 42 AND c.tenant_id = 42"
        )
    );
}

#[test]
fn test_left_join_scopes_right_table_in_on() {
    assert_eq!(
        rewrite("SELECT * FROM orders o LEFT JOIN items i ON i.order_id = o.id"),
        normalized(
            "SELECT * FROM orders o LEFT JOIN items i ON i.order_id = o.id AND i.tenant_id = 42 \
             WHERE o.tenant_id = 42"
        )
    );
}

#[test]
fn test_right_join_scopes_left_table_in_on() {
    assert_eq!(
        rewrite("SELECT * FROM orders o RIGHT JOIN items i ON i.order_id = o.id"),
        normalized(
            "SELECT * FROM orders o RIGHT JOIN items i ON i.order_id = o.id AND o.tenant_id = 42 \
             WHERE i.tenant_id = 42"
        )
    );
}

#[test]
fn test_inner_join_scopes_both_tables_in_on() {
    assert_eq!(
        rewrite("SELECT * FROM orders o JOIN items i ON i.order_id = o.id"),
        normalized(
            "SELECT * FROM orders o JOIN items i \
             ON i.order_id = o.id AND o.tenant_id = 42 AND i.tenant_id = 42"
        )
    );
}

#[test]
fn test_join_without_on_is_scoped_in_where() {
    assert_eq!(
        rewrite("SELECT * FROM orders o JOIN items i"),
        normalized("SELECT * FROM orders o JOIN items i WHERE o.tenant_id = 42 AND i.tenant_id = 42")
    );
}

#[test]
fn test_full_join_scopes_both_tables_in_where() {
    assert_eq!(
        rewrite("SELECT * FROM orders o FULL OUTER JOIN items i ON i.order_id = o.id"),
        normalized(
            "SELECT * FROM orders o FULL OUTER JOIN items i ON i.order_id = o.id \
             WHERE o.tenant_id = 42 AND i.tenant_id = 42"
        )
    );
}

#[test]
fn test_nested_join() {
    assert_eq!(
        rewrite("SELECT * FROM a LEFT JOIN (b JOIN c ON b.id = c.bid) ON a.id = b.aid"),
        normalized(
            "SELECT * FROM a LEFT JOIN (b JOIN c ON b.id = c.bid AND b.tenant_id = 42 AND c.tenant_id = 42) \
             ON a.id = b.aid WHERE a.tenant_id = 42"
        )
    );
}

#[test]
fn test_exempt_table_in_join_gets_no_predicate() {
    assert_eq!(
        rewrite("SELECT * FROM orders o LEFT JOIN sys_dict d ON d.code = o.status"),
        normalized(
            "SELECT * FROM orders o LEFT JOIN sys_dict d ON d.code = o.status WHERE o.tenant_id = 42"
        )
    );
}

#[test]
fn test_right_join_against_exempt_table() {
    assert_eq!(
        rewrite("SELECT * FROM orders o RIGHT JOIN sys_dict d ON d.code = o.status"),
        normalized(
            "SELECT * FROM orders o RIGHT JOIN sys_dict d ON d.code = o.status AND o.tenant_id = 42"
        )
    );
}

#[test]
fn test_inner_join_from_exempt_table() {
    assert_eq!(
        rewrite("SELECT * FROM sys_dict d JOIN orders o ON o.status = d.code"),
        normalized("SELECT * FROM sys_dict d JOIN orders o ON o.status = d.code AND o.tenant_id = 42")
    );
}

#[test]
fn test_join_on_subquery() {
    assert_eq!(
        rewrite(
            "SELECT * FROM orders o JOIN items i \
             ON i.order_id = o.id AND i.sku IN (SELECT sku FROM skus)"
        ),
        normalized(
            "SELECT * FROM orders o JOIN items i \
             ON i.order_id = o.id AND i.sku IN (SELECT sku FROM skus WHERE skus.tenant_id = 42) \
             AND o.tenant_id = 42 AND i.tenant_id = 42"
        )
    );
}

#[test]
fn test_where_subqueries() {
    assert_eq!(
        rewrite(
            "SELECT * FROM orders o WHERE o.customer_id IN (SELECT id FROM customers WHERE vip = 1) \
             AND NOT EXISTS (SELECT 1 FROM refunds r WHERE r.order_id = o.id)"
        ),
        normalized(
            "SELECT * FROM orders o \
             WHERE o.customer_id IN (SELECT id FROM customers WHERE vip = 1 AND customers.tenant_id = 42) \
             AND NOT EXISTS (SELECT 1 FROM refunds r WHERE r.order_id = o.id AND r.tenant_id = 42) \
             AND o.tenant_id = 42"
        )
    );
}

#[test]
fn test_derived_table() {
    assert_eq!(
        rewrite("SELECT t.id FROM (SELECT id FROM orders) AS t"),
        normalized("SELECT t.id FROM (SELECT id FROM orders WHERE orders.tenant_id = 42) AS t")
    );
}

#[test]
fn test_cte_and_union() {
    assert_eq!(
        rewrite(
            "WITH recent AS (SELECT id FROM orders WHERE created > 5) \
             SELECT id FROM recent UNION SELECT id FROM archived_orders"
        ),
        normalized(
            "WITH recent AS (SELECT id FROM orders WHERE created > 5 AND orders.tenant_id = 42) \
             SELECT id FROM recent \
             UNION SELECT id FROM archived_orders WHERE archived_orders.tenant_id = 42"
        )
    );
}

#[test]
fn test_cte_shadowing_its_own_table_is_scoped() {
    assert_eq!(
        rewrite("WITH orders AS (SELECT * FROM orders WHERE status = 'x') SELECT * FROM orders"),
        normalized(
            "WITH orders AS (SELECT * FROM orders WHERE status = 'x' AND orders.tenant_id = 42) \
             SELECT * FROM orders"
        )
    );
}

#[test]
fn test_cte_body_does_not_see_later_siblings() {
    assert_eq!(
        rewrite("WITH a AS (SELECT * FROM b), b AS (SELECT 1 AS x) SELECT * FROM a"),
        normalized(
            "WITH a AS (SELECT * FROM b WHERE b.tenant_id = 42), b AS (SELECT 1 AS x) \
             SELECT * FROM a"
        )
    );
}

#[test]
fn test_recursive_cte_sees_itself() {
    assert_eq!(
        rewrite(
            "WITH RECURSIVE tree AS (\
             SELECT id, parent_id FROM nodes WHERE parent_id IS NULL \
             UNION ALL SELECT n.id, n.parent_id FROM nodes n JOIN tree t ON n.parent_id = t.id) \
             SELECT * FROM tree"
        ),
        normalized(
            "WITH RECURSIVE tree AS (\
             SELECT id, parent_id FROM nodes WHERE parent_id IS NULL AND nodes.tenant_id = 42 \
             UNION ALL SELECT n.id, n.parent_id FROM nodes n JOIN tree t \
             ON n.parent_id = t.id AND n.tenant_id = 42) \
             SELECT * FROM tree"
        )
    );
}

#[test]
fn test_unsupported_construct_is_reported() {
    let outcome = TenantRewriter::new(policy())
        .rewrite_sql(
            "SELECT CASE WHEN EXISTS (SELECT 1 FROM refunds) THEN 1 ELSE 0 END FROM orders",
            None,
        )
        .unwrap();
    assert_eq!(outcome.report.unsupported.len(), 1);
    assert_eq!(
        outcome.rewritten_sql,
        normalized(
            "SELECT CASE WHEN EXISTS (SELECT 1 FROM refunds WHERE refunds.tenant_id = 42) \
             THEN 1 ELSE 0 END FROM orders WHERE orders.tenant_id = 42"
        )
    );
}

#[test]
fn test_subqueries_under_unsupported_expressions_are_scoped() {
    assert_eq!(
        rewrite("SELECT * FROM t WHERE (SELECT COUNT(*) FROM u) IS NOT NULL"),
        normalized(
            "SELECT * FROM t WHERE (SELECT COUNT(*) FROM u WHERE u.tenant_id = 42) IS NOT NULL \
             AND t.tenant_id = 42"
        )
    );
    assert_eq!(
        rewrite("SELECT CAST((SELECT MAX(v) FROM u) AS CHAR) FROM t"),
        normalized(
            "SELECT CAST((SELECT MAX(v) FROM u WHERE u.tenant_id = 42) AS CHAR) \
             FROM t WHERE t.tenant_id = 42"
        )
    );
    assert_eq!(
        rewrite("SELECT * FROM t WHERE name LIKE (SELECT p FROM u)"),
        normalized(
            "SELECT * FROM t WHERE name LIKE (SELECT p FROM u WHERE u.tenant_id = 42) \
             AND t.tenant_id = 42"
        )
    );
}

#[test]
fn test_order_by_subquery_is_scoped() {
    assert_eq!(
        rewrite("SELECT * FROM t ORDER BY (SELECT MAX(x) FROM u)"),
        normalized(
            "SELECT * FROM t WHERE t.tenant_id = 42 \
             ORDER BY (SELECT MAX(x) FROM u WHERE u.tenant_id = 42)"
        )
    );
}

#[test]
fn test_group_by_subquery_is_scoped() {
    assert_eq!(
        rewrite("SELECT g FROM t GROUP BY g, (SELECT MAX(x) FROM u)"),
        normalized(
            "SELECT g FROM t WHERE t.tenant_id = 42 \
             GROUP BY g, (SELECT MAX(x) FROM u WHERE u.tenant_id = 42)"
        )
    );
}

#[test]
fn test_table_function_argument_subquery_is_scoped() {
    let policy = TenantPolicy::builder()
        .dialect(SqlDialect::Postgres)
        .build(Arc::new(FixedTenant::number(42)));
    let outcome = TenantRewriter::new(policy)
        .rewrite_sql(
            "SELECT * FROM generate_series((SELECT max(id) FROM u), 10) AS g",
            None,
        )
        .unwrap();
    assert_eq!(
        outcome.rewritten_sql,
        normalized_in(
            SqlDialect::Postgres,
            "SELECT * FROM generate_series((SELECT max(id) FROM u WHERE u.tenant_id = 42), 10) AS g"
        )
    );
    assert_eq!(outcome.report.unsupported.len(), 1);
    assert!(outcome.report.unsupported[0].starts_with("FROM item"));
}

// INSERT

#[test]
fn test_insert_values_gains_one_column_and_value() {
    let rewritten = rewrite("INSERT INTO orders (id, amount) VALUES (1, 10), (2, 20)");
    assert_eq!(
        rewritten,
        normalized("INSERT INTO orders (id, amount, tenant_id) VALUES (1, 10, 42), (2, 20, 42)")
    );
}

#[test]
fn test_insert_with_tenant_column_unchanged() {
    let sql = "INSERT INTO orders (id, TENANT_ID) VALUES (1, 7)";
    assert_eq!(rewrite(sql), normalized(sql));
}

#[test]
fn test_insert_without_columns_unchanged() {
    let sql = "INSERT INTO orders VALUES (1, 7)";
    assert_eq!(rewrite(sql), normalized(sql));
}

#[test]
fn test_insert_into_exempt_table_unchanged() {
    let sql = "INSERT INTO sys_dict (code) VALUES ('x')";
    assert_eq!(rewrite(sql), normalized(sql));
}

#[test]
fn test_insert_on_duplicate_key_update() {
    assert_eq!(
        rewrite("INSERT INTO orders (id, amount) VALUES (1, 2) ON DUPLICATE KEY UPDATE amount = 3"),
        normalized(
            "INSERT INTO orders (id, amount, tenant_id) VALUES (1, 2, 42) \
             ON DUPLICATE KEY UPDATE amount = 3, tenant_id = 42"
        )
    );
}

#[test]
fn test_insert_select_from_table() {
    assert_eq!(
        rewrite("INSERT INTO archive (id, amount) SELECT id, amount FROM orders WHERE amount > 10"),
        normalized(
            "INSERT INTO archive (id, amount, tenant_id) \
             SELECT id, amount, orders.tenant_id FROM orders \
             WHERE amount > 10 AND orders.tenant_id = 42"
        )
    );
}

#[test]
fn test_insert_select_through_derived_table() {
    assert_eq!(
        rewrite("INSERT INTO archive (id) SELECT x.id FROM (SELECT id FROM orders) AS x"),
        normalized(
            "INSERT INTO archive (id, tenant_id) SELECT x.id, x.tenant_id \
             FROM (SELECT id, orders.tenant_id FROM orders WHERE orders.tenant_id = 42) AS x"
        )
    );
}

#[test]
fn test_insert_select_union_scopes_every_branch() {
    assert_eq!(
        rewrite("INSERT INTO archive (id) SELECT id FROM orders UNION ALL SELECT id FROM returns"),
        normalized(
            "INSERT INTO archive (id, tenant_id) \
             SELECT id, orders.tenant_id FROM orders WHERE orders.tenant_id = 42 \
             UNION ALL SELECT id, returns.tenant_id FROM returns WHERE returns.tenant_id = 42"
        )
    );
}

#[test]
fn test_insert_select_from_exempt_table_appends_value() {
    assert_eq!(
        rewrite("INSERT INTO orders (status) SELECT code FROM sys_dict"),
        normalized("INSERT INTO orders (status, tenant_id) SELECT code, 42 AS tenant_id FROM sys_dict")
    );
}

#[test]
fn test_insert_select_from_values_list_extends_alias() {
    assert_eq!(
        rewrite_postgres("INSERT INTO orders (a) SELECT v.a FROM (VALUES (1), (2)) v (a)"),
        normalized_in(
            SqlDialect::Postgres,
            "INSERT INTO orders (a, tenant_id) SELECT v.a, v.tenant_id \
             FROM (VALUES (1, 42), (2, 42)) v (a, tenant_id)"
        )
    );
}

#[test]
fn test_insert_select_from_unnamed_values_list_appends_value() {
    assert_eq!(
        rewrite_postgres("INSERT INTO orders (a) SELECT column1 FROM (VALUES (1), (2)) v"),
        normalized_in(
            SqlDialect::Postgres,
            "INSERT INTO orders (a, tenant_id) SELECT column1, 42 AS tenant_id \
             FROM (VALUES (1, 42), (2, 42)) v"
        )
    );
}

#[test]
fn test_insert_select_wildcard_is_warned() {
    let outcome = TenantRewriter::new(policy())
        .rewrite_sql("INSERT INTO archive (id) SELECT * FROM orders", None)
        .unwrap();
    assert_eq!(
        outcome.rewritten_sql,
        normalized(
            "INSERT INTO archive (id, tenant_id) SELECT * FROM orders WHERE orders.tenant_id = 42"
        )
    );
    assert_eq!(outcome.report.warnings.len(), 1);
}

// UPDATE / DELETE

#[test]
fn test_delete_tenant_predicate_comes_first() {
    assert_eq!(
        rewrite("DELETE FROM orders WHERE id = 5"),
        normalized("DELETE FROM orders WHERE orders.tenant_id = 42 AND id = 5")
    );
}

#[test]
fn test_delete_xor_condition_is_parenthesized() {
    assert_eq!(
        rewrite("DELETE FROM t WHERE a = 1 XOR b = 2"),
        normalized("DELETE FROM t WHERE t.tenant_id = 42 AND (a = 1 XOR b = 2)")
    );
}

#[test]
fn test_delete_returning_subquery_is_scoped() {
    assert_eq!(
        rewrite_postgres("DELETE FROM orders WHERE id = 1 RETURNING (SELECT name FROM shops)"),
        normalized_in(
            SqlDialect::Postgres,
            "DELETE FROM orders WHERE orders.tenant_id = 42 AND id = 1 \
             RETURNING (SELECT name FROM shops WHERE shops.tenant_id = 42)"
        )
    );
}

#[test]
fn test_delete_without_where() {
    assert_eq!(
        rewrite("DELETE FROM orders"),
        normalized("DELETE FROM orders WHERE orders.tenant_id = 42")
    );
}

#[test]
fn test_delete_from_exempt_table_unchanged() {
    let sql = "DELETE FROM sys_dict WHERE code = 'x'";
    assert_eq!(rewrite(sql), normalized(sql));
}

#[test]
fn test_update_with_subquery_in_set() {
    assert_eq!(
        rewrite("UPDATE orders o SET amount = (SELECT MAX(p.v) FROM prices p) WHERE o.id = 1"),
        normalized(
            "UPDATE orders o SET amount = (SELECT MAX(p.v) FROM prices p WHERE p.tenant_id = 42) \
             WHERE o.tenant_id = 42 AND o.id = 1"
        )
    );
}

// Batches, exemptions, failures

#[test]
fn test_batch_is_rejoined_in_order() {
    assert_eq!(
        rewrite("UPDATE orders SET a = 1 WHERE id = 1; DELETE FROM items WHERE id = 2"),
        normalized(
            "UPDATE orders SET a = 1 WHERE orders.tenant_id = 42 AND id = 1;\
             DELETE FROM items WHERE items.tenant_id = 42 AND id = 2"
        )
    );
}

#[test]
fn test_exempt_statement_and_group_return_input() {
    let rewriter = TenantRewriter::new(policy());
    let sql = "delete   from orders";
    for id in ["app.OrderMapper.purgeAll", "app.ReportMapper.anything"] {
        let outcome = rewriter.rewrite_sql(sql, Some(id)).unwrap();
        assert_eq!(outcome.rewritten_sql, sql);
        assert_eq!(outcome.skipped, Some(SkipReason::ExemptStatement));
    }
    let outcome = rewriter
        .rewrite_sql(sql, Some("app.OrderMapper.list"))
        .unwrap();
    assert_eq!(outcome.skipped, None);
    assert!(outcome.rewritten_sql.contains("orders.tenant_id = 42"));
}

#[test]
fn test_parse_failure() {
    let err = TenantRewriter::new(policy())
        .rewrite_sql("SELEC * FORM orders", None)
        .unwrap_err();
    assert!(matches!(err, RlsError::ParseError { .. }));
}

#[test]
fn test_postgres_numbered_placeholder() {
    let policy = TenantPolicy::builder()
        .dialect(SqlDialect::Postgres)
        .build(Arc::new(PlaceholderTenant::named("$1")));
    let outcome = TenantRewriter::new(policy)
        .rewrite_sql("SELECT * FROM orders WHERE id = $2", None)
        .unwrap();
    assert_eq!(
        outcome.rewritten_sql,
        "SELECT * FROM orders WHERE id = $2 AND orders.tenant_id = $1"
    );
}

#[test]
fn test_policy_from_yaml_config() {
    let config = TenancyConfig::from_yaml(
        r#"
enabled: true
column: org_id
ignore_tables: "sys_dict, currencies"
"#,
    )
    .unwrap();
    let policy = TenantPolicy::from_config(&config, Arc::new(FixedTenant::string("acme"))).unwrap();
    let outcome = TenantRewriter::new(policy)
        .rewrite_sql(
            "SELECT * FROM orders o JOIN currencies c ON c.code = o.currency",
            None,
        )
        .unwrap();
    assert_eq!(
        outcome.rewritten_sql,
        normalized(
            "SELECT * FROM orders o JOIN currencies c ON c.code = o.currency AND o.org_id = 'acme'"
        )
    );
    assert_eq!(outcome.report.tables_scoped, vec!["orders".to_string()]);
}

#[test]
fn test_report_serializes_to_json() {
    let outcome = TenantRewriter::new(policy())
        .rewrite_sql("SELECT * FROM orders", None)
        .unwrap();
    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["report"]["operations"][0], "select");
    assert_eq!(json["report"]["tables_scoped"][0], "orders");
}
