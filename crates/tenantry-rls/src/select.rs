//! Recursive rewriting of queries and the subqueries inside expressions.

use std::ops::ControlFlow;

use sqlparser::ast::{
    Expr, Function, FunctionArg, FunctionArgExpr, FunctionArguments, ObjectName, ObjectNamePart,
    Query, Select, SelectItem, SetExpr, VisitMut, VisitorMut,
};

use crate::error::RlsError;
use crate::injector::RewritePass;
use crate::join::SelectRole;
use crate::predicate::Placement;

impl RewritePass<'_> {
    /// Rewrite a query body and every CTE attached to it.
    pub(crate) fn rewrite_query(&mut self, query: &mut Query) -> Result<(), RlsError> {
        let entered = self.enter_ctes(query)?;
        self.rewrite_set_expr(&mut query.body)?;
        self.rewrite_query_tail(query)?;
        self.leave_ctes(entered);
        Ok(())
    }

    /// Rewrite the CTE bodies of `query` and bring their names into scope.
    /// References to an in-scope CTE name are not tables and get no predicate.
    ///
    /// A CTE body sees the CTEs declared before it. Under `WITH RECURSIVE`
    /// every name is visible to every body.
    pub(crate) fn enter_ctes(&mut self, query: &mut Query) -> Result<bool, RlsError> {
        let Some(with) = query.with.as_mut() else {
            return Ok(false);
        };
        let recursive = with.recursive;
        let names: Vec<String> = with
            .cte_tables
            .iter()
            .map(|cte| cte.alias.name.value.to_lowercase())
            .collect();

        self.cte_scopes
            .push(if recursive { names.clone() } else { Vec::new() });
        let scope = self.cte_scopes.len() - 1;
        for (cte, name) in with.cte_tables.iter_mut().zip(names) {
            self.rewrite_query(&mut cte.query)?;
            if !recursive {
                self.cte_scopes[scope].push(name);
            }
        }
        Ok(true)
    }

    /// ORDER BY, LIMIT and FETCH of a query may hold subqueries too.
    pub(crate) fn rewrite_query_tail(&mut self, query: &mut Query) -> Result<(), RlsError> {
        self.rewrite_nested_queries(&mut query.order_by)?;
        self.rewrite_nested_queries(&mut query.limit_clause)?;
        self.rewrite_nested_queries(&mut query.fetch)?;
        Ok(())
    }

    pub(crate) fn leave_ctes(&mut self, entered: bool) {
        if entered {
            self.cte_scopes.pop();
        }
    }

    pub(crate) fn is_cte(&self, name: &ObjectName) -> bool {
        let [ObjectNamePart::Identifier(ident)] = name.0.as_slice() else {
            return false;
        };
        let name = ident.value.to_lowercase();
        self.cte_scopes.iter().any(|scope| scope.contains(&name))
    }

    fn rewrite_set_expr(&mut self, body: &mut SetExpr) -> Result<(), RlsError> {
        match body {
            SetExpr::Select(select) => self.rewrite_select(select, SelectRole::Query),
            SetExpr::Query(query) => self.rewrite_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.rewrite_set_expr(left)?;
                self.rewrite_set_expr(right)
            }
            SetExpr::Values(values) => {
                for row in &mut values.rows {
                    for value in row {
                        self.rewrite_expr_subqueries(value)?;
                    }
                }
                Ok(())
            }
            // Data-modifying CTEs, e.g. `WITH d AS (DELETE ... RETURNING *)`.
            SetExpr::Insert(statement)
            | SetExpr::Update(statement)
            | SetExpr::Delete(statement)
            | SetExpr::Merge(statement) => self.rewrite_statement(statement),
            SetExpr::Table(table) => {
                self.report_unsupported("TABLE", &table.to_string());
                Ok(())
            }
        }
    }

    /// Rewrite one SELECT: nested subqueries first, then FROM/JOIN
    /// resolution, then the residual tables are conjoined onto WHERE.
    pub(crate) fn rewrite_select(
        &mut self,
        select: &mut Select,
        role: SelectRole,
    ) -> Result<(), RlsError> {
        for item in &mut select.projection {
            if let SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } = item {
                self.rewrite_expr_subqueries(expr)?;
            }
        }
        if let Some(selection) = select.selection.as_mut() {
            self.rewrite_expr_subqueries(selection)?;
        }
        if let Some(having) = select.having.as_mut() {
            self.rewrite_expr_subqueries(having)?;
        }
        self.rewrite_other_clauses(select)?;

        let residual = self.resolve_from(&mut select.from, role)?;
        if !residual.is_empty() {
            select.selection = self.inject(select.selection.take(), &residual, Placement::Trailing)?;
        }
        Ok(())
    }

    /// GROUP BY, QUALIFY, window definitions and the rest of a SELECT are
    /// walked generically; the clauses handled above are set aside meanwhile.
    fn rewrite_other_clauses(&mut self, select: &mut Select) -> Result<(), RlsError> {
        let projection = std::mem::take(&mut select.projection);
        let from = std::mem::take(&mut select.from);
        let selection = select.selection.take();
        let having = select.having.take();

        let walked = self.rewrite_nested_queries(&mut *select);

        select.projection = projection;
        select.from = from;
        select.selection = selection;
        select.having = having;
        walked.map(|_| ())
    }

    /// Rewrite every subquery reachable through the expression shapes the
    /// engine understands. Queries nested in any other shape are rewritten
    /// as a whole and the shape is reported as unsupported.
    pub(crate) fn rewrite_expr_subqueries(&mut self, expr: &mut Expr) -> Result<(), RlsError> {
        match expr {
            Expr::BinaryOp { left, right, .. }
            | Expr::AnyOp { left, right, .. }
            | Expr::AllOp { left, right, .. } => {
                self.rewrite_expr_subqueries(left)?;
                self.rewrite_expr_subqueries(right)
            }
            Expr::UnaryOp { expr, .. } | Expr::Nested(expr) => self.rewrite_expr_subqueries(expr),
            Expr::InSubquery { expr, subquery, .. } => {
                self.rewrite_expr_subqueries(expr)?;
                self.rewrite_query(subquery)
            }
            Expr::Exists { subquery, .. } | Expr::Subquery(subquery) => {
                self.rewrite_query(subquery)
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                self.rewrite_expr_subqueries(expr)?;
                self.rewrite_expr_subqueries(low)?;
                self.rewrite_expr_subqueries(high)
            }
            Expr::InList { expr, list, .. } => {
                self.rewrite_expr_subqueries(expr)?;
                for item in list {
                    self.rewrite_expr_subqueries(item)?;
                }
                Ok(())
            }
            Expr::Function(function) => self.rewrite_function_args(function),
            other => {
                if self.rewrite_nested_queries(other)? > 0 {
                    self.report_unsupported("expression", &other.to_string());
                }
                Ok(())
            }
        }
    }

    fn rewrite_function_args(&mut self, function: &mut Function) -> Result<(), RlsError> {
        match &mut function.args {
            FunctionArguments::None => Ok(()),
            FunctionArguments::Subquery(query) => self.rewrite_query(query),
            FunctionArguments::List(list) => {
                for arg in &mut list.args {
                    match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(expr))
                        | FunctionArg::Named {
                            arg: FunctionArgExpr::Expr(expr),
                            ..
                        }
                        | FunctionArg::ExprNamed {
                            arg: FunctionArgExpr::Expr(expr),
                            ..
                        } => self.rewrite_expr_subqueries(expr)?,
                        _ => {}
                    }
                }
                Ok(())
            }
        }
    }
}

impl RewritePass<'_> {
    /// Rewrite the outermost queries found anywhere under `node`. Returns how
    /// many there were.
    pub(crate) fn rewrite_nested_queries<N: VisitMut>(
        &mut self,
        node: &mut N,
    ) -> Result<usize, RlsError> {
        let mut visitor = NestedQueries {
            pass: self,
            depth: 0,
            rewritten: 0,
        };
        if let ControlFlow::Break(error) = VisitMut::visit(node, &mut visitor) {
            return Err(error);
        }
        Ok(visitor.rewritten)
    }
}

/// Hands each outermost query to the pass. Inner queries are reached by
/// `rewrite_query` itself, so the visitor only acts once the depth is back
/// at zero.
struct NestedQueries<'a, 'p> {
    pass: &'a mut RewritePass<'p>,
    depth: usize,
    rewritten: usize,
}

impl VisitorMut for NestedQueries<'_, '_> {
    type Break = RlsError;

    fn pre_visit_query(&mut self, _query: &mut Query) -> ControlFlow<Self::Break> {
        self.depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, query: &mut Query) -> ControlFlow<Self::Break> {
        self.depth -= 1;
        if self.depth > 0 {
            return ControlFlow::Continue(());
        }
        self.rewritten += 1;
        match self.pass.rewrite_query(query) {
            Ok(()) => ControlFlow::Continue(()),
            Err(error) => ControlFlow::Break(error),
        }
    }
}
