//! `tenantry check` command implementation.
//!
//! Validates a tenancy configuration:
//! - JSON Schema validation against the embedded `TenancyConfig` schema
//! - Loading the configuration and discovering exemption manifests
//! - Warnings for settings that make rewriting a no-op

use anyhow::{Context, Result};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::Path;

use tenantry_core::{Exemptions, TenancyConfig};

use super::config_dir;

/// Embedded so validation works without the repository checked out.
const TENANCY_CONFIG_SCHEMA: &str = include_str!("../../../../schemas/TenancyConfig.schema.json");

/// Severity level for check results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// A single check finding.
#[derive(Debug, Clone)]
pub struct CheckFinding {
    pub severity: Severity,
    /// Category of the check that produced this finding.
    pub category: String,
    pub message: String,
    /// Location within the file, e.g. `/ignore_tables`.
    pub location: Option<String>,
}

impl CheckFinding {
    fn new(severity: Severity, category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            category: category.into(),
            message: message.into(),
            location: None,
        }
    }

    fn error(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, category, message)
    }

    fn warning(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, category, message)
    }

    fn info(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, category, message)
    }

    fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Results from running all checks.
#[derive(Debug, Default)]
pub struct CheckResults {
    pub findings: Vec<CheckFinding>,
}

impl CheckResults {
    fn push(&mut self, finding: CheckFinding) {
        self.findings.push(finding);
    }

    fn extend(&mut self, findings: impl IntoIterator<Item = CheckFinding>) {
        self.findings.extend(findings);
    }

    pub fn has_errors(&self) -> bool {
        self.count(Severity::Error) > 0
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }

    /// Print human-readable summary.
    pub fn print_summary(&self, config_path: &Path) {
        let mut findings: Vec<_> = self.findings.iter().collect();
        findings.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.category.cmp(&b.category)));

        println!();
        for finding in findings {
            let location = finding
                .location
                .as_deref()
                .map(|l| format!(" [{}:{}]", config_path.display(), l))
                .unwrap_or_default();
            println!(
                "  {:<5} [{}]{}: {}",
                finding.severity, finding.category, location, finding.message
            );
        }

        println!();
        println!("{}", "=".repeat(60));
        let errors = self.count(Severity::Error);
        let warnings = self.count(Severity::Warning);
        if errors == 0 && warnings == 0 {
            println!("All checks passed.");
        } else {
            println!("Summary: {} error(s), {} warning(s)", errors, warnings);
        }
    }
}

/// Run all checks without printing.
pub fn run_quiet(config_path: &Path) -> Result<CheckResults> {
    let mut results = CheckResults::default();

    results.extend(validate_schema(config_path)?);
    if results.has_errors() {
        return Ok(results);
    }

    let config = match TenancyConfig::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            results.push(CheckFinding::error("config", e.to_string()));
            return Ok(results);
        }
    };
    results.extend(check_settings(&config));

    match config.discover_exemptions(config_dir(config_path)) {
        Ok(exemptions) => results.extend(summarize_exemptions(&config, &exemptions)),
        Err(e) => results.push(CheckFinding::error("exemptions", e.to_string())),
    }

    Ok(results)
}

/// Run all checks and print the findings.
pub fn run(config_path: &Path) -> Result<()> {
    println!("Checking {}...", config_path.display());

    let results = run_quiet(config_path)?;
    results.print_summary(config_path);

    if results.has_errors() {
        anyhow::bail!(
            "Configuration check failed with {} error(s)",
            results.count(Severity::Error)
        );
    }
    Ok(())
}

fn validate_schema(config_path: &Path) -> Result<Vec<CheckFinding>> {
    let schema: JsonValue = serde_json::from_str(TENANCY_CONFIG_SCHEMA)
        .context("Failed to parse embedded TenancyConfig schema")?;

    let content = match fs::read_to_string(config_path) {
        Ok(c) => c,
        Err(e) => {
            return Ok(vec![CheckFinding::error(
                "json-schema",
                format!("Failed to read {}: {}", config_path.display(), e),
            )]);
        }
    };
    let value: JsonValue = match serde_yaml::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            return Ok(vec![CheckFinding::error(
                "json-schema",
                format!("Failed to parse YAML: {}", e),
            )]);
        }
    };

    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| anyhow::anyhow!("Failed to compile TenancyConfig schema: {}", e))?;

    Ok(validator
        .iter_errors(&value)
        .map(|error| {
            let path = error.instance_path().to_string();
            let location = if path.is_empty() {
                "(root)".to_string()
            } else {
                path
            };
            CheckFinding::error("json-schema", error.to_string()).with_location(location)
        })
        .collect())
}

fn check_settings(config: &TenancyConfig) -> Vec<CheckFinding> {
    let mut findings = Vec::new();

    if !config.enabled {
        findings.push(
            CheckFinding::warning(
                "settings",
                "rewriting is disabled; every statement passes through unchanged",
            )
            .with_location("/enabled"),
        );
    }

    let mut seen: Vec<String> = Vec::new();
    for table in &config.ignore_tables {
        let key = table.to_lowercase();
        if seen.contains(&key) {
            findings.push(
                CheckFinding::warning("settings", format!("table '{}' is ignored twice", table))
                    .with_location("/ignore_tables"),
            );
        }
        seen.push(key);
    }

    findings.push(CheckFinding::info(
        "settings",
        format!(
            "tenant column '{}', dialect {}, {} ignored table(s)",
            config.column.trim(),
            config.dialect,
            config.ignore_tables.len()
        ),
    ));
    findings
}

fn summarize_exemptions(config: &TenancyConfig, exemptions: &Exemptions) -> Vec<CheckFinding> {
    let mut findings = Vec::new();
    if !config.scan_locations.is_empty() && exemptions.is_empty() {
        findings.push(
            CheckFinding::warning("exemptions", "scan locations contain no statement groups")
                .with_location("/scan_locations"),
        );
    }
    findings.push(CheckFinding::info(
        "exemptions",
        format!(
            "{} exempt group(s), {} exempt statement(s)",
            exemptions.groups.len(),
            exemptions.statements.len()
        ),
    ));
    findings
}
