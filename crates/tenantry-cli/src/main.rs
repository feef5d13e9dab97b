use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::rewrite::RewriteArgs;

#[derive(Parser, Debug)]
#[command(name = "tenantry", version, about = "Tenant isolation by SQL rewriting")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rewrite SQL for one tenant and print the result.
    Rewrite(RewriteArgs),

    /// Rewrite SQL and print a JSON report of what was injected.
    Explain(RewriteArgs),

    /// Validate a tenancy configuration and its exemption manifests.
    Check {
        /// Path to the tenancy configuration file.
        #[arg(long, short, env = "TENANTRY_CONFIG", default_value = "tenancy.yaml")]
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Rewrite(args) => commands::rewrite::rewrite(&args)?,
        Command::Explain(args) => commands::rewrite::explain(&args)?,
        Command::Check { config } => commands::check::run(&config)?,
    }

    Ok(())
}
