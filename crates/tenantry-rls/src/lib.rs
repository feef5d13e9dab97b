//! # tenantry-rls
//!
//! Tenant isolation by SQL rewriting.
//!
//! This crate provides functionality to:
//! - Parse SQL statements using `sqlparser`
//! - Hold the tenancy policy (tenant column, shared tables, exempt statements)
//! - Inject tenant predicates into every WHERE and ON clause that needs one
//! - Inject the tenant column and value into INSERT statements
//!
//! ## How It Works
//!
//! **Before (from the application):**
//! ```sql
//! SELECT * FROM orders o LEFT JOIN items i ON i.order_id = o.id WHERE o.status = 'open'
//! ```
//!
//! **After (to the database):**
//! ```sql
//! SELECT * FROM orders o LEFT JOIN items i ON i.order_id = o.id AND i.tenant_id = 42
//! WHERE o.status = 'open' AND o.tenant_id = 42
//! ```
//!
//! ## Supported Operations
//!
//! | Operation | Behavior |
//! |-----------|----------|
//! | `SELECT`  | Add `alias.tenant_column = ?` to WHERE, or to ON for outer joins |
//! | `INSERT`  | Append the tenant column and value (VALUES rows, SELECT output) |
//! | `UPDATE`  | Prepend `alias.tenant_column = ?` to WHERE |
//! | `DELETE`  | Prepend `alias.tenant_column = ?` to WHERE |
//!
//! Subqueries, CTEs and set operations are rewritten recursively.
//!
//! ```
//! use std::sync::Arc;
//! use tenantry_rls::{FixedTenant, TenantPolicy, TenantRewriter};
//!
//! let policy = TenantPolicy::builder().build(Arc::new(FixedTenant::number(42)));
//! let rewriter = TenantRewriter::new(policy);
//! let outcome = rewriter.rewrite_sql("SELECT * FROM orders", None).unwrap();
//! assert_eq!(outcome.rewritten_sql, "SELECT * FROM orders WHERE orders.tenant_id = 42");
//! ```

pub mod error;
pub mod injector;
mod join;
pub mod parser;
pub mod policy;
mod predicate;
mod select;

pub use error::RlsError;
pub use injector::{
    InjectionExplanation, RewriteOutcome, RewriteReport, SkipReason, TenantRewriter,
};
pub use parser::{SqlAnalyzer, SqlOperation};
pub use policy::{FixedTenant, PlaceholderTenant, TenantPolicy, TenantPolicyBuilder, TenantValueProvider};
