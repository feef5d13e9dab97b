//! FROM and JOIN resolution.
//!
//! Resolution walks a FROM entry left to right and decides, for every
//! tenant-scoped table it meets, whether its predicate belongs in the ON
//! clause of a join or in the WHERE clause of the enclosing SELECT. The
//! tables returned to the caller are the residual set for WHERE.
//!
//! | Join kind | ON receives | Pending main set afterwards |
//! |-----------|-------------|-----------------------------|
//! | implicit (comma, `CROSS`) | nothing | main + right |
//! | `INNER` | main + right | empty |
//! | `LEFT` | right | unchanged |
//! | `RIGHT` | previous right + main | right |
//! | `FULL` | nothing | main + right |
//!
//! A join without an ON clause defers its ON-tables on a stack; a later join
//! carrying several ON clauses pops one entry per clause, most recent first.
//! Whatever is still on the stack at the end joins the WHERE set.
//!
//! sqlparser attaches at most one ON clause to a `Join`; chained
//! `a JOIN b JOIN c ON .. ON ..` arrives as a `NestedJoin`. The multi-clause
//! branch of `apply_join` is therefore only reached through
//! `JoinStep`s built by hand, while the deferred stack still collects every
//! join without ON and hands it to WHERE.

use sqlparser::ast::{
    Expr, Join, JoinConstraint, JoinOperator, TableFactor, TableWithJoins,
};

use crate::error::RlsError;
use crate::injector::RewritePass;
use crate::predicate::{Placement, TableRef};

/// How a join treats the tables on its right-hand side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JoinKind {
    Implicit,
    Inner,
    Left,
    Right,
    Full,
}

impl JoinKind {
    pub(crate) fn of(operator: &JoinOperator) -> Self {
        match operator {
            JoinOperator::Join(_)
            | JoinOperator::Inner(_)
            | JoinOperator::StraightJoin(_)
            | JoinOperator::AsOf { .. }
            | JoinOperator::CrossApply => JoinKind::Inner,
            JoinOperator::Left(_)
            | JoinOperator::LeftOuter(_)
            | JoinOperator::Semi(_)
            | JoinOperator::LeftSemi(_)
            | JoinOperator::Anti(_)
            | JoinOperator::LeftAnti(_)
            | JoinOperator::OuterApply => JoinKind::Left,
            JoinOperator::Right(_)
            | JoinOperator::RightOuter(_)
            | JoinOperator::RightSemi(_)
            | JoinOperator::RightAnti(_) => JoinKind::Right,
            JoinOperator::FullOuter(_) => JoinKind::Full,
            JoinOperator::CrossJoin(_) => JoinKind::Implicit,
        }
    }
}

/// The ON expressions of a join, in source order.
fn on_slots(operator: &mut JoinOperator) -> Vec<&mut Expr> {
    let constraint = match operator {
        JoinOperator::Join(c)
        | JoinOperator::Inner(c)
        | JoinOperator::Left(c)
        | JoinOperator::LeftOuter(c)
        | JoinOperator::Right(c)
        | JoinOperator::RightOuter(c)
        | JoinOperator::FullOuter(c)
        | JoinOperator::CrossJoin(c)
        | JoinOperator::Semi(c)
        | JoinOperator::LeftSemi(c)
        | JoinOperator::RightSemi(c)
        | JoinOperator::Anti(c)
        | JoinOperator::LeftAnti(c)
        | JoinOperator::RightAnti(c)
        | JoinOperator::StraightJoin(c)
        | JoinOperator::AsOf { constraint: c, .. } => c,
        JoinOperator::CrossApply | JoinOperator::OuterApply => return Vec::new(),
    };
    match constraint {
        JoinConstraint::On(expr) => vec![expr],
        _ => Vec::new(),
    }
}

/// One join as seen by the resolver.
pub(crate) struct JoinStep<'a> {
    pub(crate) kind: JoinKind,
    /// Tenant-scoped tables on the right-hand side, exempt tables removed.
    pub(crate) tables: Vec<TableRef>,
    pub(crate) on: Vec<&'a mut Expr>,
}

/// State carried across the joins of one FROM entry.
#[derive(Debug, Default)]
pub(crate) struct JoinResolution {
    pending: Vec<TableRef>,
    previous: Vec<TableRef>,
    deferred: Vec<Vec<TableRef>>,
}

impl JoinResolution {
    pub(crate) fn new(main: Vec<TableRef>) -> Self {
        Self {
            pending: main,
            previous: Vec::new(),
            deferred: Vec::new(),
        }
    }

    /// Residual tables for the WHERE clause.
    pub(crate) fn finish(self) -> Vec<TableRef> {
        let mut residual = self.pending;
        for tables in self.deferred {
            extend_unique(&mut residual, tables);
        }
        residual
    }
}

fn extend_unique(target: &mut Vec<TableRef>, tables: Vec<TableRef>) {
    for table in tables {
        if !target.iter().any(|t| t.key() == table.key()) {
            target.push(table);
        }
    }
}

impl RewritePass<'_> {
    /// Resolve the tables of every FROM entry. Entries after the first are
    /// implicit joins; their residual tables join the WHERE set too.
    pub(crate) fn resolve_from(
        &mut self,
        from: &mut [TableWithJoins],
        role: SelectRole,
    ) -> Result<Vec<TableRef>, RlsError> {
        let mut residual = Vec::new();
        for (index, entry) in from.iter_mut().enumerate() {
            let role = if index == 0 { role } else { SelectRole::Query };
            let tables = self.resolve_table_with_joins(entry, role)?;
            extend_unique(&mut residual, tables);
        }
        Ok(residual)
    }

    pub(crate) fn resolve_table_with_joins(
        &mut self,
        entry: &mut TableWithJoins,
        role: SelectRole,
    ) -> Result<Vec<TableRef>, RlsError> {
        let main = self.resolve_table_factor(&mut entry.relation, role)?;
        if entry.joins.is_empty() {
            return Ok(main);
        }
        self.resolve_joins(main, &mut entry.joins)
    }

    pub(crate) fn resolve_joins(
        &mut self,
        main: Vec<TableRef>,
        joins: &mut [Join],
    ) -> Result<Vec<TableRef>, RlsError> {
        let mut state = JoinResolution::new(main);
        for join in joins {
            let Join {
                relation,
                join_operator,
                ..
            } = join;
            let tables = self.resolve_table_factor(relation, SelectRole::Query)?;
            for slot in on_slots(join_operator) {
                self.rewrite_expr_subqueries(slot)?;
            }
            let step = JoinStep {
                kind: JoinKind::of(join_operator),
                tables,
                on: on_slots(join_operator),
            };
            self.apply_join(&mut state, step)?;
        }
        Ok(state.finish())
    }

    /// Apply one join step, injecting into its ON clauses where they decide.
    pub(crate) fn apply_join(
        &mut self,
        state: &mut JoinResolution,
        step: JoinStep<'_>,
    ) -> Result<(), RlsError> {
        let JoinStep { kind, tables, on } = step;

        let on_tables = match kind {
            JoinKind::Implicit | JoinKind::Full => {
                extend_unique(&mut state.pending, tables.clone());
                state.previous = tables;
                return Ok(());
            }
            JoinKind::Inner => {
                let mut on_tables = std::mem::take(&mut state.pending);
                extend_unique(&mut on_tables, tables.clone());
                on_tables
            }
            JoinKind::Left => tables.clone(),
            JoinKind::Right => {
                let mut on_tables = std::mem::take(&mut state.previous);
                extend_unique(&mut on_tables, std::mem::take(&mut state.pending));
                state.pending = tables.clone();
                on_tables
            }
        };
        state.previous = tables;

        match on.len() {
            0 => state.deferred.push(on_tables),
            1 => {
                for slot in on {
                    self.inject_into(slot, &on_tables, Placement::Trailing)?;
                }
            }
            _ => {
                state.deferred.push(on_tables);
                for slot in on {
                    if let Some(tables) = state.deferred.pop() {
                        self.inject_into(slot, &tables, Placement::Trailing)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Tables a FROM item contributes. Subqueries inside it are rewritten.
    pub(crate) fn resolve_table_factor(
        &mut self,
        factor: &mut TableFactor,
        role: SelectRole,
    ) -> Result<Vec<TableRef>, RlsError> {
        match factor {
            TableFactor::Table {
                name,
                alias,
                args: None,
                ..
            } => {
                if self.is_cte(name) {
                    return Ok(Vec::new());
                }
                let table = TableRef::new(name, alias.as_ref());
                if self.policy.is_table_exempt(&table.name()) {
                    tracing::debug!(table = %table.name(), "Skipping exempt table");
                    return Ok(Vec::new());
                }
                Ok(vec![table])
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.resolve_table_with_joins(table_with_joins, role),
            TableFactor::Derived { subquery, .. } => {
                match role {
                    SelectRole::InsertSource => self.rewrite_insert_source(subquery)?,
                    SelectRole::Query => self.rewrite_query(subquery)?,
                }
                Ok(Vec::new())
            }
            // Table functions, UNNEST, PIVOT and the like: only the queries
            // nested in them are scoped.
            other => {
                self.rewrite_nested_queries(other)?;
                self.report_unsupported("FROM item", &other.to_string());
                Ok(Vec::new())
            }
        }
    }
}

/// Whether a SELECT feeds an INSERT (and must expose the tenant column).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SelectRole {
    Query,
    InsertSource,
}
