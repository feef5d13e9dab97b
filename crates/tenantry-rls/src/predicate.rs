//! Tenant predicate construction and composition.

use sqlparser::ast::{BinaryOperator, Expr, Ident, ObjectName, ObjectNamePart, TableAlias, Value};

use crate::error::RlsError;
use crate::injector::RewritePass;

/// A table reference found in a FROM clause or DML target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TableRef {
    name: ObjectName,
    alias: Option<Ident>,
}

impl TableRef {
    pub(crate) fn new(name: &ObjectName, alias: Option<&TableAlias>) -> Self {
        Self {
            name: name.clone(),
            alias: alias.map(|a| a.name.clone()),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_alias(name: &ObjectName, alias: Option<&Ident>) -> Self {
        Self {
            name: name.clone(),
            alias: alias.cloned(),
        }
    }

    /// Unquoted, dot-joined table name used for exemption lookups and reports.
    pub(crate) fn name(&self) -> String {
        object_name_text(&self.name)
    }

    /// Identifier parts the tenant column is qualified with.
    fn qualifier(&self) -> Vec<Ident> {
        match &self.alias {
            Some(alias) => vec![alias.clone()],
            None => self
                .name
                .0
                .iter()
                .map(|part| match part.as_ident() {
                    Some(ident) => ident.clone(),
                    None => Ident::new(part.to_string()),
                })
                .collect(),
        }
    }

    /// Case-insensitive identity of the reference within one scope.
    pub(crate) fn key(&self) -> String {
        self.qualifier()
            .iter()
            .map(|ident| ident.value.to_lowercase())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// `qualifier.column`
    pub(crate) fn column(&self, column: &Ident) -> Expr {
        let mut parts = self.qualifier();
        parts.push(column.clone());
        Expr::CompoundIdentifier(parts)
    }
}

pub(crate) fn object_name_text(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|part| match part {
            ObjectNamePart::Identifier(ident) => ident.value.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Where the tenant predicate goes relative to an existing condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// `existing AND tenant`
    Trailing,
    /// `tenant AND existing`
    Leading,
}

pub(crate) fn and(left: Expr, right: Expr) -> Expr {
    Expr::BinaryOp {
        left: Box::new(left),
        op: BinaryOperator::And,
        right: Box::new(right),
    }
}

/// Conjoin `injected` with an optional existing condition. `existing` is
/// parenthesized unless it can sit next to AND as is.
pub(crate) fn conjoin(existing: Option<Expr>, injected: Expr, placement: Placement) -> Expr {
    let Some(existing) = existing else {
        return injected;
    };
    let existing = if conjoins_flat(&existing) {
        existing
    } else {
        Expr::Nested(Box::new(existing))
    };
    match placement {
        Placement::Trailing => and(existing, injected),
        Placement::Leading => and(injected, existing),
    }
}

/// An AND chain qualifies when none of its operands renders an OR or XOR
/// outside parentheses. The parsed tree is not trusted for this: XOR binds
/// tighter than `=` in the parser but looser than AND in MySQL.
fn conjoins_flat(expr: &Expr) -> bool {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => conjoins_flat(left) && conjoins_flat(right),
        other => !has_loose_operator(other),
    }
}

fn has_loose_operator(expr: &Expr) -> bool {
    match expr {
        Expr::BinaryOp {
            op: BinaryOperator::Or | BinaryOperator::Xor,
            ..
        } => true,
        Expr::BinaryOp { left, right, .. } => has_loose_operator(left) || has_loose_operator(right),
        Expr::UnaryOp { expr, .. }
        | Expr::IsNull(expr)
        | Expr::IsNotNull(expr)
        | Expr::IsTrue(expr)
        | Expr::IsNotTrue(expr)
        | Expr::IsFalse(expr)
        | Expr::IsNotFalse(expr) => has_loose_operator(expr),
        Expr::Between {
            expr, low, high, ..
        } => has_loose_operator(expr) || has_loose_operator(low) || has_loose_operator(high),
        _ => false,
    }
}

impl RewritePass<'_> {
    /// One `qualifier.column = tenant` equality per distinct table, AND-chained.
    pub(crate) fn tenant_predicate(&mut self, tables: &[TableRef]) -> Result<Option<Expr>, RlsError> {
        let mut predicate: Option<Expr> = None;
        let mut seen: Vec<String> = Vec::with_capacity(tables.len());
        for table in tables {
            let key = table.key();
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);

            let equality = Expr::BinaryOp {
                left: Box::new(table.column(self.policy.tenant_column_ident())),
                op: BinaryOperator::Eq,
                right: Box::new(self.policy.current_tenant_expression()?),
            };
            tracing::trace!(table = %table.name(), predicate = %equality, "Tenant predicate");
            self.report.record_predicate(&table.name(), &equality);
            predicate = Some(match predicate {
                None => equality,
                Some(chain) => and(chain, equality),
            });
        }
        Ok(predicate)
    }

    /// Conjoin the tenant predicate for `tables` onto an optional condition.
    pub(crate) fn inject(
        &mut self,
        existing: Option<Expr>,
        tables: &[TableRef],
        placement: Placement,
    ) -> Result<Option<Expr>, RlsError> {
        Ok(match self.tenant_predicate(tables)? {
            Some(predicate) => Some(conjoin(existing, predicate, placement)),
            None => existing,
        })
    }

    /// Conjoin the tenant predicate for `tables` onto a condition in place.
    pub(crate) fn inject_into(
        &mut self,
        slot: &mut Expr,
        tables: &[TableRef],
        placement: Placement,
    ) -> Result<(), RlsError> {
        if let Some(predicate) = self.tenant_predicate(tables)? {
            let existing = std::mem::replace(slot, Expr::Value(Value::Null.into()));
            *slot = conjoin(Some(existing), predicate, placement);
        }
        Ok(())
    }
}
