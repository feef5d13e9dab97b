//! Tenancy configuration for multi-tenant databases.
//!
//! This module defines which column identifies the tenant, which tables are
//! shared between tenants, and which statements are exempt from rewriting.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::{ConfigError, SqlDialect, name_list};

/// Configuration for tenant isolation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenancyConfig {
    /// Global switch. When disabled every statement passes through untouched.
    #[serde(default)]
    pub enabled: bool,

    /// Column name used for tenant isolation.
    #[serde(default = "default_tenant_column")]
    pub column: String,

    /// Dialect used to parse and print SQL.
    #[serde(default)]
    pub dialect: SqlDialect,

    /// Tables shared by all tenants (no tenant scoping applied).
    #[serde(default, deserialize_with = "name_list")]
    pub ignore_tables: Vec<String>,

    /// Files or directories holding exemption manifests.
    #[serde(default, deserialize_with = "name_list")]
    pub scan_locations: Vec<String>,

    /// Statement names exempted in every scanned group.
    #[serde(
        default = "default_implicit_exempt_methods",
        deserialize_with = "name_list"
    )]
    pub implicit_exempt_methods: Vec<String>,

    /// Fully qualified statement ids exempt from rewriting.
    #[serde(default, deserialize_with = "name_list")]
    pub exempt_statements: Vec<String>,

    /// Statement groups whose every statement is exempt from rewriting.
    #[serde(default, deserialize_with = "name_list")]
    pub exempt_groups: Vec<String>,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            column: default_tenant_column(),
            dialect: SqlDialect::default(),
            ignore_tables: Vec::new(),
            scan_locations: Vec::new(),
            implicit_exempt_methods: default_implicit_exempt_methods(),
            exempt_statements: Vec::new(),
            exempt_groups: Vec::new(),
        }
    }
}

impl TenancyConfig {
    /// Load tenancy configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse tenancy configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let column = self.column.trim();
        if column.is_empty() {
            return Err(ConfigError::Config(
                "tenant column must not be empty".to_string(),
            ));
        }
        if column.chars().any(char::is_whitespace) {
            return Err(ConfigError::Config(format!(
                "tenant column must be a single identifier, got {:?}",
                self.column
            )));
        }
        Ok(())
    }

    /// Resolve the scan locations against the directory holding the config file.
    pub fn resolved_scan_locations(&self, base_dir: impl AsRef<Path>) -> Vec<PathBuf> {
        self.scan_locations
            .iter()
            .map(|location| resolve_path(Path::new(location), base_dir.as_ref()))
            .collect()
    }
}

fn resolve_path(path: &Path, base_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

// Default value functions
fn default_tenant_column() -> String {
    "tenant_id".to_string()
}

fn default_implicit_exempt_methods() -> Vec<String> {
    vec![
        "selectByPrimaryKey".to_string(),
        "deleteByPrimaryKey".to_string(),
        "updateByPrimaryKeySelective".to_string(),
    ]
}
