//! # tenantry-core
//!
//! Configuration types shared by the Tenantry crates.
//!
//! - [`TenancyConfig`]: tenant column, ignored tables, dialect and the
//!   exemption settings, loaded from `tenancy.yaml`.
//! - [`Exemptions`]: the resolved sets of exempt statement ids and statement
//!   groups, built from configuration and from exemption manifests found at
//!   the configured scan locations.

// Configuration types shared across all Tenantry crates
pub mod config;

// Exempt statement discovery
pub mod exemptions;

pub use config::{ConfigError, SqlDialect, TenancyConfig};
pub use exemptions::{ExemptionSource, Exemptions, ManifestExemptionSource};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates_against_schema() {
        let config = TenancyConfig::default();
        let instance = serde_json::to_value(&config).expect("config must serialize");
        let schema: serde_json::Value =
            serde_json::from_str(include_str!("../../../schemas/TenancyConfig.schema.json"))
                .expect("schema must parse");

        let validator = jsonschema::draft202012::options()
            .build(&schema)
            .expect("schema must compile");

        if !validator.is_valid(&instance) {
            let mut msgs = Vec::new();
            for (idx, err) in validator.iter_errors(&instance).take(20).enumerate() {
                msgs.push(format!("{}: {}", idx + 1, err));
            }
            panic!("tenancy config did not validate: {}", msgs.join("; "));
        }
    }

    #[test]
    fn comma_separated_config_validates_against_schema() {
        let yaml = r#"
enabled: true
column: org_id
dialect: postgres
ignore_tables: "sys_dict, sys_log"
scan_locations: "mappers"
"#;
        let instance: serde_json::Value = serde_yaml::from_str(yaml).expect("yaml must parse");
        let schema: serde_json::Value =
            serde_json::from_str(include_str!("../../../schemas/TenancyConfig.schema.json"))
                .expect("schema must parse");

        let validator = jsonschema::draft202012::options()
            .build(&schema)
            .expect("schema must compile");
        assert!(validator.is_valid(&instance));
    }
}
