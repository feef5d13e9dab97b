//! SQL dialect selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ConfigError;

/// SQL dialect used to parse and print statements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    Generic,
    Ansi,
    #[default]
    MySql,
    #[serde(alias = "postgresql")]
    Postgres,
    Sqlite,
    MsSql,
    Snowflake,
    BigQuery,
    ClickHouse,
    DuckDb,
    Hive,
    Redshift,
}

impl SqlDialect {
    /// The configuration name of this dialect.
    pub fn name(self) -> &'static str {
        match self {
            SqlDialect::Generic => "generic",
            SqlDialect::Ansi => "ansi",
            SqlDialect::MySql => "mysql",
            SqlDialect::Postgres => "postgres",
            SqlDialect::Sqlite => "sqlite",
            SqlDialect::MsSql => "mssql",
            SqlDialect::Snowflake => "snowflake",
            SqlDialect::BigQuery => "bigquery",
            SqlDialect::ClickHouse => "clickhouse",
            SqlDialect::DuckDb => "duckdb",
            SqlDialect::Hive => "hive",
            SqlDialect::Redshift => "redshift",
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SqlDialect {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dialect = match s.trim().to_ascii_lowercase().as_str() {
            "generic" => SqlDialect::Generic,
            "ansi" => SqlDialect::Ansi,
            "mysql" => SqlDialect::MySql,
            "postgres" | "postgresql" => SqlDialect::Postgres,
            "sqlite" => SqlDialect::Sqlite,
            "mssql" => SqlDialect::MsSql,
            "snowflake" => SqlDialect::Snowflake,
            "bigquery" => SqlDialect::BigQuery,
            "clickhouse" => SqlDialect::ClickHouse,
            "duckdb" => SqlDialect::DuckDb,
            "hive" => SqlDialect::Hive,
            "redshift" => SqlDialect::Redshift,
            other => return Err(ConfigError::UnknownDialect(other.to_string())),
        };
        Ok(dialect)
    }
}
