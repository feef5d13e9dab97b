//! SQL parsing and statement classification.

use crate::error::RlsError;
use serde::Serialize;
use sqlparser::ast::{Expr, Statement};
use sqlparser::dialect::{
    AnsiDialect, BigQueryDialect, ClickHouseDialect, Dialect, DuckDbDialect, GenericDialect,
    HiveDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect, RedshiftSqlDialect,
    SQLiteDialect, SnowflakeDialect,
};
use sqlparser::parser::Parser;
use tenantry_core::SqlDialect;

/// Parses SQL text into statements using the configured dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlAnalyzer {
    dialect: SqlDialect,
}

impl SqlAnalyzer {
    /// Create a new SQL analyzer for the given dialect.
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    /// Parse a SQL string into statements.
    pub fn parse(&self, sql: &str) -> Result<Vec<Statement>, RlsError> {
        let dialect = parser_dialect(self.dialect);
        Parser::parse_sql(dialect.as_ref(), sql).map_err(|e| RlsError::ParseError {
            sql: sql.to_string(),
            message: e.to_string(),
        })
    }

    /// Parse a standalone SQL expression, e.g. a tenant literal.
    pub fn parse_expr(&self, sql: &str) -> Result<Expr, RlsError> {
        let dialect = parser_dialect(self.dialect);
        Parser::new(dialect.as_ref())
            .try_with_sql(sql)
            .and_then(|mut parser| parser.parse_expr())
            .map_err(|e| RlsError::ParseError {
                sql: sql.to_string(),
                message: e.to_string(),
            })
    }

    /// Get the type of SQL operation.
    pub fn get_operation(&self, stmt: &Statement) -> SqlOperation {
        match stmt {
            Statement::Query(_) => SqlOperation::Select,
            Statement::Insert(_) => SqlOperation::Insert,
            Statement::Update(_) => SqlOperation::Update,
            Statement::Delete(_) => SqlOperation::Delete,
            _ => SqlOperation::Other,
        }
    }
}

fn parser_dialect(dialect: SqlDialect) -> Box<dyn Dialect> {
    match dialect {
        SqlDialect::Generic => Box::new(GenericDialect {}),
        SqlDialect::Ansi => Box::new(AnsiDialect {}),
        SqlDialect::MySql => Box::new(MySqlDialect {}),
        SqlDialect::Postgres => Box::new(PostgreSqlDialect {}),
        SqlDialect::Sqlite => Box::new(SQLiteDialect {}),
        SqlDialect::MsSql => Box::new(MsSqlDialect {}),
        SqlDialect::Snowflake => Box::new(SnowflakeDialect {}),
        SqlDialect::BigQuery => Box::new(BigQueryDialect {}),
        SqlDialect::ClickHouse => Box::new(ClickHouseDialect {}),
        SqlDialect::DuckDb => Box::new(DuckDbDialect {}),
        SqlDialect::Hive => Box::new(HiveDialect {}),
        SqlDialect::Redshift => Box::new(RedshiftSqlDialect {}),
    }
}

/// Kinds of statements the rewriter distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlOperation {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}
