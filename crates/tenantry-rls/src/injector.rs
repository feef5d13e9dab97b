//! Tenant predicate injection.

use std::sync::Arc;

use serde::Serialize;
use sqlparser::ast::{
    Assignment, AssignmentTarget, Delete, Expr, FromTable, Insert, ObjectName, ObjectNamePart,
    OnInsert, Query, Select, SelectItem, SetExpr, Statement, TableAliasColumnDef, TableFactor,
    TableObject, Update, UpdateTableFromKind,
};

use crate::error::RlsError;
use crate::join::SelectRole;
use crate::parser::{SqlAnalyzer, SqlOperation};
use crate::policy::TenantPolicy;
use crate::predicate::{Placement, TableRef, object_name_text};

/// Rewrites SQL so every statement only sees the current tenant's rows.
#[derive(Debug, Clone)]
pub struct TenantRewriter {
    analyzer: SqlAnalyzer,
    policy: Arc<TenantPolicy>,
}

impl TenantRewriter {
    /// Create a rewriter for the given policy. The policy's dialect is used
    /// for parsing.
    pub fn new(policy: impl Into<Arc<TenantPolicy>>) -> Self {
        let policy = policy.into();
        Self {
            analyzer: SqlAnalyzer::new(policy.dialect()),
            policy,
        }
    }

    pub fn policy(&self) -> &TenantPolicy {
        &self.policy
    }

    /// Rewrite SQL text holding one statement or a `;`-separated batch.
    ///
    /// The input is returned byte-for-byte when the policy is disabled, the
    /// statement id is exempt, or there is nothing to rewrite. Otherwise the
    /// rewritten statements are re-serialized and joined with `;`.
    pub fn rewrite_sql(
        &self,
        sql: &str,
        statement_id: Option<&str>,
    ) -> Result<RewriteOutcome, RlsError> {
        if !self.policy.enabled() {
            return Ok(RewriteOutcome::skipped(sql, statement_id, SkipReason::Disabled));
        }
        if let Some(id) = statement_id
            && self.policy.is_statement_exempt(id)
        {
            tracing::debug!(statement_id = id, "Statement exempt from tenant scoping");
            return Ok(RewriteOutcome::skipped(sql, statement_id, SkipReason::ExemptStatement));
        }
        if sql.trim().is_empty() {
            return Ok(RewriteOutcome::skipped(sql, statement_id, SkipReason::Empty));
        }

        let statements = self.analyzer.parse(sql)?;
        if statements.is_empty() {
            return Ok(RewriteOutcome::skipped(sql, statement_id, SkipReason::Empty));
        }

        let (statements, report) = if statements.len() == 1 {
            let mut statements = statements;
            let mut statement = statements.remove(0);
            let report = self.rewrite_in_place(&mut statement)?;
            (vec![statement], report)
        } else {
            self.rewrite_batch(statements)?
        };

        let rewritten_sql = statements
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(";");

        tracing::debug!(
            statement_id = statement_id.unwrap_or_default(),
            tables = ?report.tables_scoped,
            predicates = report.predicates_added.len(),
            "Rewrote SQL for tenant"
        );

        Ok(RewriteOutcome {
            original_sql: sql.to_string(),
            rewritten_sql,
            statement_id: statement_id.map(str::to_string),
            skipped: None,
            report,
        })
    }

    /// Rewrite one parsed statement.
    pub fn rewrite(&self, mut statement: Statement) -> Result<(Statement, RewriteReport), RlsError> {
        let report = self.rewrite_in_place(&mut statement)?;
        Ok((statement, report))
    }

    /// Rewrite statements in order. The first failure aborts the batch and
    /// none of the statements are returned.
    pub fn rewrite_batch(
        &self,
        statements: Vec<Statement>,
    ) -> Result<(Vec<Statement>, RewriteReport), RlsError> {
        let mut report = RewriteReport::default();
        let mut rewritten = Vec::with_capacity(statements.len());
        for (index, mut statement) in statements.into_iter().enumerate() {
            let statement_report =
                self.rewrite_in_place(&mut statement)
                    .map_err(|source| RlsError::Statement {
                        index,
                        source: Box::new(source),
                    })?;
            report.merge(statement_report);
            rewritten.push(statement);
        }
        Ok((rewritten, report))
    }

    /// Rewrite and describe what was injected, including the tenant value.
    pub fn explain(
        &self,
        sql: &str,
        statement_id: Option<&str>,
    ) -> Result<InjectionExplanation, RlsError> {
        let outcome = self.rewrite_sql(sql, statement_id)?;
        let tenant = self
            .policy
            .current_tenant_expression()
            .ok()
            .map(|expr| expr.to_string());
        Ok(InjectionExplanation {
            tenant_column: self.policy.tenant_column().to_string(),
            tenant,
            outcome,
        })
    }

    fn rewrite_in_place(&self, statement: &mut Statement) -> Result<RewriteReport, RlsError> {
        let mut pass = RewritePass::new(&self.policy);
        pass.report.operations.push(self.analyzer.get_operation(statement));
        if self.policy.enabled() {
            pass.rewrite_statement(statement)?;
        }
        Ok(pass.report)
    }
}

/// State of one rewrite of one statement tree.
pub(crate) struct RewritePass<'p> {
    pub(crate) policy: &'p TenantPolicy,
    pub(crate) report: RewriteReport,
    /// Names of the CTEs visible at the current point, innermost last.
    pub(crate) cte_scopes: Vec<Vec<String>>,
    insert_target: Option<String>,
}

impl<'p> RewritePass<'p> {
    pub(crate) fn new(policy: &'p TenantPolicy) -> Self {
        Self {
            policy,
            report: RewriteReport::default(),
            cte_scopes: Vec::new(),
            insert_target: None,
        }
    }

    pub(crate) fn rewrite_statement(&mut self, statement: &mut Statement) -> Result<(), RlsError> {
        match statement {
            Statement::Query(query) => self.rewrite_query(query),
            Statement::Insert(insert) => self.rewrite_insert(insert),
            Statement::Update(update) => self.rewrite_update(update),
            Statement::Delete(delete) => self.rewrite_delete(delete),
            _ => {
                tracing::debug!("Statement kind passes through unchanged");
                Ok(())
            }
        }
    }

    pub(crate) fn report_unsupported(&mut self, construct: &str, sql: &str) {
        tracing::warn!(
            construct,
            sql,
            "Unsupported construct; only the queries nested in it are tenant-scoped"
        );
        self.report.unsupported.push(format!("{construct}: {sql}"));
    }

    fn rewrite_insert(&mut self, insert: &mut Insert) -> Result<(), RlsError> {
        let TableObject::TableName(name) = &insert.table else {
            return Err(RlsError::malformed_insert(
                insert.table.to_string(),
                "the target is not a table",
            ));
        };
        let table = object_name_text(name);
        if self.policy.is_table_exempt(&table) {
            tracing::debug!(table = %table, "Skipping exempt INSERT target");
            return Ok(());
        }
        if insert.columns.is_empty() {
            tracing::debug!(table = %table, "INSERT without column list left unchanged");
            return Ok(());
        }
        let column = self.policy.tenant_column_ident().clone();
        if insert
            .columns
            .iter()
            .any(|c| c.value.eq_ignore_ascii_case(&column.value))
        {
            tracing::debug!(table = %table, "INSERT already sets the tenant column");
            return Ok(());
        }
        let Some(source) = insert.source.as_mut() else {
            return Err(RlsError::malformed_insert(
                table,
                "it has neither a VALUES list nor a SELECT",
            ));
        };

        let previous = self.insert_target.replace(table.clone());
        self.rewrite_insert_source(source)?;
        self.insert_target = previous;

        if let Some(OnInsert::DuplicateKeyUpdate(assignments)) = insert.on.as_mut()
            && !assignments.is_empty()
        {
            assignments.push(Assignment {
                target: AssignmentTarget::ColumnName(ObjectName(vec![
                    ObjectNamePart::Identifier(column.clone()),
                ])),
                value: self.policy.current_tenant_expression()?,
            });
        }
        self.rewrite_nested_queries(&mut insert.returning)?;
        insert.columns.push(column.clone());
        self.report.record_column(&table, &column.value);
        Ok(())
    }

    /// Rewrite the source of an INSERT so it yields one extra value per
    /// row: the tenant.
    pub(crate) fn rewrite_insert_source(&mut self, query: &mut Query) -> Result<(), RlsError> {
        let entered = self.enter_ctes(query)?;
        self.rewrite_insert_body(&mut query.body)?;
        self.rewrite_query_tail(query)?;
        self.leave_ctes(entered);
        Ok(())
    }

    fn rewrite_insert_body(&mut self, body: &mut SetExpr) -> Result<(), RlsError> {
        match body {
            SetExpr::Select(select) => self.rewrite_insert_select(select),
            SetExpr::Query(query) => self.rewrite_insert_source(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.rewrite_insert_body(left)?;
                self.rewrite_insert_body(right)
            }
            SetExpr::Values(values) => {
                for row in &mut values.rows {
                    for value in row.iter_mut() {
                        self.rewrite_expr_subqueries(value)?;
                    }
                    row.push(self.policy.current_tenant_expression()?);
                }
                Ok(())
            }
            other => Err(RlsError::malformed_insert(
                self.insert_target.clone().unwrap_or_default(),
                format!("its source `{other}` is neither VALUES nor SELECT"),
            )),
        }
    }

    fn rewrite_insert_select(&mut self, select: &mut Select) -> Result<(), RlsError> {
        self.rewrite_select(select, SelectRole::InsertSource)?;

        if let [SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..)] =
            select.projection.as_slice()
        {
            let target = self.insert_target.clone().unwrap_or_default();
            tracing::warn!(
                table = %target,
                "INSERT source selects a wildcard; tenant column not appended"
            );
            self.report.warnings.push(format!(
                "INSERT into {target}: wildcard projection `{}` left without a tenant column",
                select.projection[0]
            ));
            return Ok(());
        }

        let item = self.tenant_output(select)?;
        select.projection.push(item);
        Ok(())
    }

    /// The tenant column as the source SELECT exposes it. Falls back to the
    /// tenant value when the first FROM item holds no tenant column.
    fn tenant_output(&self, select: &mut Select) -> Result<SelectItem, RlsError> {
        let column = self.policy.tenant_column_ident();
        match select.from.first_mut().map(|entry| &mut entry.relation) {
            Some(TableFactor::Table {
                name,
                alias,
                args: None,
                ..
            }) => {
                let table = TableRef::new(name, alias.as_ref());
                if !self.is_cte(name) && !self.policy.is_table_exempt(&table.name()) {
                    return Ok(SelectItem::UnnamedExpr(table.column(column)));
                }
            }
            // A VALUES list only has the column names its alias gives it.
            Some(TableFactor::Derived {
                subquery,
                alias: Some(alias),
                ..
            }) if matches!(subquery.body.as_ref(), SetExpr::Values(_)) => {
                if !alias.columns.is_empty() {
                    alias.columns.push(TableAliasColumnDef {
                        name: column.clone(),
                        data_type: None,
                    });
                    return Ok(SelectItem::UnnamedExpr(Expr::CompoundIdentifier(vec![
                        alias.name.clone(),
                        column.clone(),
                    ])));
                }
            }
            Some(TableFactor::Derived { subquery, alias, .. })
                if !matches!(subquery.body.as_ref(), SetExpr::Values(_)) =>
            {
                let expr = match alias {
                    Some(alias) => Expr::CompoundIdentifier(vec![alias.name.clone(), column.clone()]),
                    None => Expr::Identifier(column.clone()),
                };
                return Ok(SelectItem::UnnamedExpr(expr));
            }
            _ => {}
        }
        Ok(SelectItem::ExprWithAlias {
            expr: self.policy.current_tenant_expression()?,
            alias: column.clone(),
        })
    }

    fn rewrite_update(&mut self, update: &mut Update) -> Result<(), RlsError> {
        if self.is_target_exempt(&update.table.relation) {
            return Ok(());
        }
        for assignment in &mut update.assignments {
            self.rewrite_expr_subqueries(&mut assignment.value)?;
        }
        if let Some(selection) = update.selection.as_mut() {
            self.rewrite_expr_subqueries(selection)?;
        }
        self.rewrite_nested_queries(&mut update.returning)?;
        self.rewrite_nested_queries(&mut update.limit)?;

        let mut tables = self.resolve_table_with_joins(&mut update.table, SelectRole::Query)?;
        if let Some(UpdateTableFromKind::BeforeSet(from) | UpdateTableFromKind::AfterSet(from)) =
            update.from.as_mut()
        {
            tables.extend(self.resolve_from(from, SelectRole::Query)?);
        }
        update.selection = self.inject(update.selection.take(), &tables, Placement::Leading)?;
        Ok(())
    }

    fn rewrite_delete(&mut self, delete: &mut Delete) -> Result<(), RlsError> {
        let (FromTable::WithFromKeyword(from) | FromTable::WithoutKeyword(from)) = &mut delete.from;
        if from
            .first()
            .is_some_and(|entry| self.is_target_exempt(&entry.relation))
        {
            return Ok(());
        }
        if let Some(selection) = delete.selection.as_mut() {
            self.rewrite_expr_subqueries(selection)?;
        }
        self.rewrite_nested_queries(&mut delete.returning)?;
        self.rewrite_nested_queries(&mut delete.order_by)?;
        self.rewrite_nested_queries(&mut delete.limit)?;

        let mut tables = self.resolve_from(from, SelectRole::Query)?;
        if let Some(using) = delete.using.as_mut() {
            tables.extend(self.resolve_from(using, SelectRole::Query)?);
        }
        delete.selection = self.inject(delete.selection.take(), &tables, Placement::Leading)?;
        Ok(())
    }

    fn is_target_exempt(&self, target: &TableFactor) -> bool {
        match target {
            TableFactor::Table { name, .. } => {
                let table = object_name_text(name);
                let exempt = self.policy.is_table_exempt(&table);
                if exempt {
                    tracing::debug!(table = %table, "Skipping exempt DML target");
                }
                exempt
            }
            _ => false,
        }
    }
}

/// What a rewrite did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RewriteReport {
    /// Kind of each top-level statement, in order.
    pub operations: Vec<SqlOperation>,
    /// Tables that received a tenant predicate or column.
    pub tables_scoped: Vec<String>,
    /// Every injected equality, rendered.
    pub predicates_added: Vec<String>,
    /// INSERT targets that received the tenant column, as `table.column`.
    pub columns_added: Vec<String>,
    pub warnings: Vec<String>,
    /// Constructs the rewriter does not model. Queries nested in them are
    /// still scoped; tables they reach some other way are not.
    pub unsupported: Vec<String>,
}

impl RewriteReport {
    pub(crate) fn record_predicate(&mut self, table: &str, predicate: &Expr) {
        self.record_table(table);
        self.predicates_added.push(predicate.to_string());
    }

    pub(crate) fn record_column(&mut self, table: &str, column: &str) {
        self.record_table(table);
        self.columns_added.push(format!("{table}.{column}"));
    }

    fn record_table(&mut self, table: &str) {
        if !self.tables_scoped.iter().any(|t| t == table) {
            self.tables_scoped.push(table.to_string());
        }
    }

    pub fn merge(&mut self, other: RewriteReport) {
        self.operations.extend(other.operations);
        for table in other.tables_scoped {
            self.record_table(&table);
        }
        self.predicates_added.extend(other.predicates_added);
        self.columns_added.extend(other.columns_added);
        self.warnings.extend(other.warnings);
        self.unsupported.extend(other.unsupported);
    }

    /// True if nothing was injected.
    pub fn is_empty(&self) -> bool {
        self.predicates_added.is_empty() && self.columns_added.is_empty()
    }
}

/// Why a rewrite returned its input untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    ExemptStatement,
    Empty,
}

/// Result of [`TenantRewriter::rewrite_sql`].
#[derive(Debug, Clone, Serialize)]
pub struct RewriteOutcome {
    /// The SQL as received.
    pub original_sql: String,
    /// The SQL to execute.
    pub rewritten_sql: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    pub report: RewriteReport,
}

impl RewriteOutcome {
    fn skipped(sql: &str, statement_id: Option<&str>, reason: SkipReason) -> Self {
        Self {
            original_sql: sql.to_string(),
            rewritten_sql: sql.to_string(),
            statement_id: statement_id.map(str::to_string),
            skipped: Some(reason),
            report: RewriteReport::default(),
        }
    }
}

/// Explanation of a rewrite (for `tenantry explain`).
#[derive(Debug, Clone, Serialize)]
pub struct InjectionExplanation {
    pub tenant_column: String,
    /// The tenant value, if the provider had one.
    pub tenant: Option<String>,
    #[serde(flatten)]
    pub outcome: RewriteOutcome,
}
