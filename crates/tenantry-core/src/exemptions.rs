//! Exempt statement discovery.
//!
//! Statements are identified by a dotted id such as `app.OrderMapper.findAll`,
//! where everything before the last `.` names the statement group. A statement
//! is exempt from tenant rewriting when its id, or its whole group, is listed.
//!
//! Exemptions come from two places: the `exempt_statements` / `exempt_groups`
//! configuration keys, and manifests found at the configured scan locations.
//! A manifest is a YAML file listing statement groups:
//!
//! ```yaml
//! groups:
//!   - name: app.ReportMapper
//!     exempt: true
//!   - name: app.OrderMapper
//!     exempt_statements: [purgeAll]
//! ```
//!
//! Every group named in a manifest is a *scanned* group; the configured
//! `implicit_exempt_methods` are exempted in each of them.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{ConfigError, TenancyConfig};

/// Resolved exemption sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exemptions {
    /// Statement groups exempt as a whole.
    pub groups: BTreeSet<String>,
    /// Individual statement ids.
    pub statements: BTreeSet<String>,
}

impl Exemptions {
    /// Exemptions listed directly in the configuration.
    pub fn from_config(config: &TenancyConfig) -> Self {
        Self {
            groups: config.exempt_groups.iter().cloned().collect(),
            statements: config.exempt_statements.iter().cloned().collect(),
        }
    }

    pub fn exempt_group(&mut self, group: impl Into<String>) -> &mut Self {
        self.groups.insert(group.into());
        self
    }

    pub fn exempt_statement(&mut self, statement_id: impl Into<String>) -> &mut Self {
        self.statements.insert(statement_id.into());
        self
    }

    /// Record a scanned group, exempting the implicit statements in it.
    pub fn add_scanned_group(&mut self, group: &str, implicit_methods: &[String]) {
        for method in implicit_methods {
            self.statements.insert(format!("{group}.{method}"));
        }
    }

    pub fn merge(&mut self, other: Exemptions) {
        self.groups.extend(other.groups);
        self.statements.extend(other.statements);
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.statements.is_empty()
    }
}

/// A mechanism that discovers exemptions at scan locations.
pub trait ExemptionSource {
    /// Discover exemptions at the given locations.
    fn discover(&self, locations: &[PathBuf]) -> Result<Exemptions, ConfigError>;
}

/// One exemption manifest file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExemptionManifest {
    #[serde(default)]
    pub groups: Vec<GroupManifest>,
}

/// A statement group entry in a manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupManifest {
    /// Group name, e.g. `app.OrderMapper`.
    pub name: String,

    /// Exempt every statement of the group.
    #[serde(default)]
    pub exempt: bool,

    /// Statement names (without the group prefix) exempt in this group.
    #[serde(default)]
    pub exempt_statements: Vec<String>,
}

/// Reads exemption manifests from YAML files or directories of YAML files.
#[derive(Debug, Clone, Default)]
pub struct ManifestExemptionSource {
    implicit_methods: Vec<String>,
}

impl ManifestExemptionSource {
    pub fn new(implicit_methods: Vec<String>) -> Self {
        Self { implicit_methods }
    }

    fn read_location(&self, location: &Path, exemptions: &mut Exemptions) -> Result<(), ConfigError> {
        if location.is_dir() {
            let mut files = Vec::new();
            for entry in fs::read_dir(location)? {
                let path = entry?.path();
                if path
                    .extension()
                    .map(|e| e == "yaml" || e == "yml")
                    .unwrap_or(false)
                {
                    files.push(path);
                }
            }
            files.sort();
            for file in files {
                self.read_manifest(&file, exemptions)?;
            }
            Ok(())
        } else if location.is_file() {
            self.read_manifest(location, exemptions)
        } else {
            Err(ConfigError::Config(format!(
                "Scan location not found: {}",
                location.display()
            )))
        }
    }

    fn read_manifest(&self, path: &Path, exemptions: &mut Exemptions) -> Result<(), ConfigError> {
        let content = fs::read_to_string(path)?;
        let manifest: ExemptionManifest = serde_yaml::from_str(&content)?;
        tracing::debug!(
            manifest = %path.display(),
            groups = manifest.groups.len(),
            "Loaded exemption manifest"
        );

        for group in manifest.groups {
            if group.exempt {
                exemptions.groups.insert(group.name.clone());
            }
            for statement in &group.exempt_statements {
                exemptions
                    .statements
                    .insert(format!("{}.{}", group.name, statement));
            }
            exemptions.add_scanned_group(&group.name, &self.implicit_methods);
        }
        Ok(())
    }
}

impl ExemptionSource for ManifestExemptionSource {
    fn discover(&self, locations: &[PathBuf]) -> Result<Exemptions, ConfigError> {
        let mut exemptions = Exemptions::default();
        for location in locations {
            self.read_location(location, &mut exemptions)?;
        }
        Ok(exemptions)
    }
}

impl TenancyConfig {
    /// Collect configured exemptions plus those found at the scan locations.
    ///
    /// Relative scan locations are resolved against `base_dir`.
    pub fn discover_exemptions(&self, base_dir: impl AsRef<Path>) -> Result<Exemptions, ConfigError> {
        self.discover_exemptions_with(
            &ManifestExemptionSource::new(self.implicit_exempt_methods.clone()),
            base_dir,
        )
    }

    /// Like [`TenancyConfig::discover_exemptions`], with a custom discovery mechanism.
    pub fn discover_exemptions_with(
        &self,
        source: &dyn ExemptionSource,
        base_dir: impl AsRef<Path>,
    ) -> Result<Exemptions, ConfigError> {
        let mut exemptions = Exemptions::from_config(self);
        if !self.scan_locations.is_empty() {
            let locations = self.resolved_scan_locations(base_dir);
            exemptions.merge(source.discover(&locations)?);
        }
        Ok(exemptions)
    }
}
