//! Configuration types for Tenantry.
//!
//! Configuration is loaded from a single YAML file (`tenancy.yaml` by
//! convention). Name lists such as `ignore_tables` accept either a YAML list
//! or a comma-separated string, so settings carried over from property files
//! keep working:
//!
//! ```yaml
//! enabled: true
//! column: tenant_id
//! ignore_tables: "sys_dict, sys_log"
//! ```

pub mod dialect;
pub mod tenancy;

use serde::{Deserialize, Deserializer};

pub use dialect::SqlDialect;
pub use tenancy::TenancyConfig;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unknown SQL dialect: {0}")]
    UnknownDialect(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Split a comma-separated list, trimming whitespace and dropping empty entries.
pub fn split_names(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NameList {
    Text(String),
    List(Vec<String>),
}

/// Deserialize a list of names from either a comma-separated string or a sequence.
pub(crate) fn name_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let names = match Option::<NameList>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(NameList::Text(text)) => split_names(&text),
        Some(NameList::List(items)) => items
            .iter()
            .flat_map(|item| split_names(item))
            .collect(),
    };
    Ok(names)
}
