//! Error types for the RLS crate.

use tenantry_core::ConfigError;
use thiserror::Error;

/// Errors that can occur while rewriting SQL.
#[derive(Debug, Error)]
pub enum RlsError {
    /// SQL parsing failed.
    #[error("failed to parse SQL: {message} (sql: {sql})")]
    ParseError { sql: String, message: String },

    /// INSERT statement cannot be tenant-scoped automatically.
    #[error(
        "cannot rewrite INSERT into {table}: {reason}; exempt the table or the statement id instead"
    )]
    MalformedInsert { table: String, reason: String },

    /// Tenant value required but not provided.
    #[error("tenant value required but not provided")]
    MissingTenantValue,

    /// One statement of a batch failed; nothing of the batch is applied.
    #[error("statement {index} of batch could not be rewritten: {source}")]
    Statement {
        index: usize,
        #[source]
        source: Box<RlsError>,
    },

    /// Invalid policy configuration.
    #[error("invalid tenancy configuration: {0}")]
    Config(#[from] ConfigError),
}

impl RlsError {
    pub(crate) fn malformed_insert(table: impl Into<String>, reason: impl Into<String>) -> Self {
        RlsError::MalformedInsert {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// The error behind any batch wrapping.
    pub fn root_cause(&self) -> &RlsError {
        match self {
            RlsError::Statement { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
