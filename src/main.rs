use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serial_smoke::{
    Manifest, RunContext, StrategyKind,
    config::{self, DEFAULT_TIMEOUT_MS},
    report,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let root = match &cli.root {
        Some(root) => root.clone(),
        None => config::root_from_env()?,
    };
    let root = fs::canonicalize(&root)
        .with_context(|| format!("failed to resolve root {}", root.display()))?;
    let workspace = fs::canonicalize(&cli.workspace)
        .with_context(|| format!("failed to resolve workspace {}", cli.workspace.display()))?;

    let manifest = match &cli.manifest {
        Some(path) => Manifest::load(path)?,
        None => Manifest::builtin(cli.strategy, cli.timeout_ms),
    };

    report::run_suite_checked(&manifest, RunContext::new(root), &workspace).await?;
    Ok(())
}

#[derive(Parser, Debug)]
#[command(
    name = "serial-smoke",
    version,
    about = "Boot a target and check that it switches to the serial console"
)]
struct Cli {
    /// Built tree containing bin/run.
    #[arg(long, env = "ROOT")]
    root: Option<PathBuf>,
    /// Suite manifest; runs the startup banner check alone when omitted.
    #[arg(long)]
    manifest: Option<PathBuf>,
    /// Directory that receives logs/.
    #[arg(long, default_value = ".")]
    workspace: PathBuf,
    /// Capture strategy of the builtin check; manifests set their own.
    #[arg(long, value_enum, default_value_t = StrategyKind::Streaming, conflicts_with = "manifest")]
    strategy: StrategyKind,
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS, conflicts_with = "manifest")]
    timeout_ms: u64,
}
