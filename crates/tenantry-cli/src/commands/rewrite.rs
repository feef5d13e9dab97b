//! `tenantry rewrite` and `tenantry explain`.

use anyhow::{Context, Result};
use clap::Args;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use tenantry_core::{SqlDialect, TenancyConfig};
use tenantry_rls::{
    FixedTenant, PlaceholderTenant, TenantPolicy, TenantRewriter, TenantValueProvider,
};

use super::config_dir;

#[derive(Args, Debug)]
pub struct RewriteArgs {
    /// Path to the tenancy configuration file.
    #[arg(long, short, env = "TENANTRY_CONFIG", default_value = "tenancy.yaml")]
    pub config: PathBuf,

    /// Tenant value. Integers are injected as numbers, anything else as a string literal.
    #[arg(long, env = "TENANTRY_TENANT", required_unless_present = "placeholder")]
    pub tenant: Option<String>,

    /// Inject a bind placeholder such as `?`, `$1` or `:tenant` instead of a literal.
    #[arg(long)]
    pub placeholder: Option<String>,

    /// Parse and print with this dialect instead of the configured one.
    #[arg(long, env = "TENANTRY_DIALECT")]
    pub dialect: Option<SqlDialect>,

    /// Statement id checked against the configured exemptions.
    #[arg(long)]
    pub statement_id: Option<String>,

    /// SQL to rewrite. Read from stdin when omitted.
    pub sql: Option<String>,
}

/// Print the rewritten SQL.
pub fn rewrite(args: &RewriteArgs) -> Result<()> {
    let rewriter = build_rewriter(args)?;
    let sql = read_sql(args.sql.as_deref())?;
    let outcome = rewriter
        .rewrite_sql(&sql, args.statement_id.as_deref())
        .context("Failed to rewrite SQL")?;

    for warning in &outcome.report.warnings {
        tracing::warn!("{warning}");
    }
    for construct in &outcome.report.unsupported {
        tracing::warn!(construct = %construct, "Not tenant-scoped");
    }

    println!("{}", outcome.rewritten_sql);
    Ok(())
}

/// Print a JSON explanation of the rewrite.
pub fn explain(args: &RewriteArgs) -> Result<()> {
    let rewriter = build_rewriter(args)?;
    let sql = read_sql(args.sql.as_deref())?;
    let explanation = rewriter
        .explain(&sql, args.statement_id.as_deref())
        .context("Failed to rewrite SQL")?;

    println!("{}", serde_json::to_string_pretty(&explanation)?);
    Ok(())
}

/// Load the configuration and its manifests into a rewriter.
pub fn build_rewriter(args: &RewriteArgs) -> Result<TenantRewriter> {
    let mut config = TenancyConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if let Some(dialect) = args.dialect {
        config.dialect = dialect;
    }
    let exemptions = config
        .discover_exemptions(config_dir(&args.config))
        .context("Failed to discover exemptions")?;

    if !config.enabled {
        tracing::info!(
            config = %args.config.display(),
            "Tenant rewriting is disabled; SQL passes through unchanged"
        );
    }

    let policy = TenantPolicy::from_config(&config, tenant_provider(args)?)?
        .with_exemptions(&exemptions);
    Ok(TenantRewriter::new(policy))
}

fn tenant_provider(args: &RewriteArgs) -> Result<Arc<dyn TenantValueProvider>> {
    match (&args.placeholder, &args.tenant) {
        (Some(token), _) => Ok(Arc::new(PlaceholderTenant::named(token.clone()))),
        (None, Some(tenant)) => Ok(Arc::new(tenant_literal(tenant))),
        (None, None) => anyhow::bail!("either --tenant or --placeholder is required"),
    }
}

fn tenant_literal(value: &str) -> FixedTenant {
    match value.parse::<i64>() {
        Ok(number) => FixedTenant::number(number),
        Err(_) => FixedTenant::string(value),
    }
}

fn read_sql(sql: Option<&str>) -> Result<String> {
    match sql {
        Some(sql) => Ok(sql.to_string()),
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read SQL from stdin")?;
            Ok(buffer)
        }
    }
}
