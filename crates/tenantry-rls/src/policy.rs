//! Tenant policy store.
//!
//! [`TenantPolicy`] holds everything the rewriter needs to know about tenancy:
//! the tenant column, the tables shared by all tenants, the exempt statements
//! and the provider of the current tenant value. It is immutable once built
//! and cheap to share behind an `Arc` across threads.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use sqlparser::ast::{Expr, Ident, Value};
use tenantry_core::{Exemptions, SqlDialect, TenancyConfig};

use crate::error::RlsError;

/// Supplies the tenant value injected into rewritten statements.
///
/// Called once per injected predicate or value; every call made during one
/// rewrite must refer to the same tenant. Returning `None` means no tenant is
/// in scope and fails the rewrite with [`RlsError::MissingTenantValue`].
pub trait TenantValueProvider: Send + Sync {
    fn tenant_expression(&self) -> Option<Expr>;
}

impl<F> TenantValueProvider for F
where
    F: Fn() -> Option<Expr> + Send + Sync,
{
    fn tenant_expression(&self) -> Option<Expr> {
        self()
    }
}

/// A tenant value fixed at construction.
#[derive(Debug, Clone)]
pub struct FixedTenant(Expr);

impl FixedTenant {
    /// A single-quoted string literal, e.g. `'acme'`.
    pub fn string(value: impl Into<String>) -> Self {
        Self(Expr::Value(Value::SingleQuotedString(value.into()).into()))
    }

    /// A numeric literal, e.g. `42`.
    pub fn number(value: i64) -> Self {
        Self(Expr::Value(Value::Number(value.to_string(), false).into()))
    }

    pub fn expr(expr: Expr) -> Self {
        Self(expr)
    }
}

impl TenantValueProvider for FixedTenant {
    fn tenant_expression(&self) -> Option<Expr> {
        Some(self.0.clone())
    }
}

/// A bind placeholder, bound to the tenant at execution time.
#[derive(Debug, Clone)]
pub struct PlaceholderTenant(String);

impl PlaceholderTenant {
    /// The anonymous `?` placeholder.
    pub fn anonymous() -> Self {
        Self("?".to_string())
    }

    /// A named (`:tenant`) or numbered (`$1`) placeholder, used verbatim.
    pub fn named(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TenantValueProvider for PlaceholderTenant {
    fn tenant_expression(&self) -> Option<Expr> {
        Some(Expr::Value(Value::Placeholder(self.0.clone()).into()))
    }
}

/// Immutable tenancy policy consulted by the rewriter.
#[derive(Clone)]
pub struct TenantPolicy {
    enabled: bool,
    column: Ident,
    dialect: SqlDialect,
    ignored_tables: HashSet<String>,
    exempt_statements: HashSet<String>,
    exempt_groups: HashSet<String>,
    provider: Arc<dyn TenantValueProvider>,
}

impl fmt::Debug for TenantPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantPolicy")
            .field("enabled", &self.enabled)
            .field("column", &self.column.value)
            .field("dialect", &self.dialect)
            .field("ignored_tables", &self.ignored_tables)
            .field("exempt_statements", &self.exempt_statements)
            .field("exempt_groups", &self.exempt_groups)
            .finish_non_exhaustive()
    }
}

impl TenantPolicy {
    pub fn builder() -> TenantPolicyBuilder {
        TenantPolicyBuilder::default()
    }

    /// Build a policy from configuration, including the exemptions it lists
    /// directly. Manifest exemptions are added with [`TenantPolicy::with_exemptions`].
    pub fn from_config(
        config: &TenancyConfig,
        provider: Arc<dyn TenantValueProvider>,
    ) -> Result<Self, RlsError> {
        config.validate()?;
        let mut builder = TenantPolicy::builder()
            .enabled(config.enabled)
            .column(config.column.trim())
            .dialect(config.dialect)
            .exemptions(&Exemptions::from_config(config));
        for table in &config.ignore_tables {
            builder = builder.ignore_table(table);
        }
        Ok(builder.build(provider))
    }

    /// Merge discovered exemptions into a copy of this policy.
    pub fn with_exemptions(mut self, exemptions: &Exemptions) -> Self {
        self.exempt_groups
            .extend(exemptions.groups.iter().map(|g| g.to_lowercase()));
        self.exempt_statements
            .extend(exemptions.statements.iter().map(|s| s.to_lowercase()));
        self
    }

    /// Global switch; a disabled policy makes the rewriter a pass-through.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn tenant_column(&self) -> &str {
        &self.column.value
    }

    pub(crate) fn tenant_column_ident(&self) -> &Ident {
        &self.column
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// True if the statement id, or the group owning it, is exempt.
    pub fn is_statement_exempt(&self, statement_id: &str) -> bool {
        let id = statement_id.to_lowercase();
        if self.exempt_statements.contains(&id) {
            return true;
        }
        match id.rsplit_once('.') {
            Some((group, _)) => self.exempt_groups.contains(group),
            None => false,
        }
    }

    /// True if the table is shared by all tenants. Case-insensitive; a
    /// qualified name matches on the full name or its last segment.
    pub fn is_table_exempt(&self, table_name: &str) -> bool {
        let name = table_name.to_lowercase();
        if self.ignored_tables.contains(&name) {
            return true;
        }
        match name.rsplit_once('.') {
            Some((_, last)) => self.ignored_tables.contains(last),
            None => false,
        }
    }

    /// The current tenant value as an expression.
    pub fn current_tenant_expression(&self) -> Result<Expr, RlsError> {
        self.provider
            .tenant_expression()
            .ok_or(RlsError::MissingTenantValue)
    }
}

/// Builder for [`TenantPolicy`].
#[derive(Debug, Clone)]
pub struct TenantPolicyBuilder {
    enabled: bool,
    column: String,
    dialect: SqlDialect,
    ignored_tables: HashSet<String>,
    exempt_statements: HashSet<String>,
    exempt_groups: HashSet<String>,
}

impl Default for TenantPolicyBuilder {
    fn default() -> Self {
        let config = TenancyConfig::default();
        Self {
            enabled: true,
            column: config.column,
            dialect: config.dialect,
            ignored_tables: HashSet::new(),
            exempt_statements: HashSet::new(),
            exempt_groups: HashSet::new(),
        }
    }
}

impl TenantPolicyBuilder {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn ignore_table(mut self, table: impl AsRef<str>) -> Self {
        self.ignored_tables.insert(table.as_ref().trim().to_lowercase());
        self
    }

    pub fn exempt_statement(mut self, statement_id: impl AsRef<str>) -> Self {
        self.exempt_statements
            .insert(statement_id.as_ref().to_lowercase());
        self
    }

    pub fn exempt_group(mut self, group: impl AsRef<str>) -> Self {
        self.exempt_groups.insert(group.as_ref().to_lowercase());
        self
    }

    pub fn exemptions(mut self, exemptions: &Exemptions) -> Self {
        for group in &exemptions.groups {
            self = self.exempt_group(group);
        }
        for statement in &exemptions.statements {
            self = self.exempt_statement(statement);
        }
        self
    }

    pub fn build(self, provider: Arc<dyn TenantValueProvider>) -> TenantPolicy {
        TenantPolicy {
            enabled: self.enabled,
            column: Ident::new(self.column),
            dialect: self.dialect,
            ignored_tables: self.ignored_tables,
            exempt_statements: self.exempt_statements,
            exempt_groups: self.exempt_groups,
            provider,
        }
    }
}
