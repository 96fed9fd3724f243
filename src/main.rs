use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use picture_book::config::LoggingConfig;
use picture_book::daemon::{LoadOutcome, LoadTarget};
use picture_book::{Config, Daemon};

#[derive(Parser)]
#[command(name = "picture-book")]
#[command(about = "Keeps container registries in sync with the images they should hold")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to ./config.yaml, then the XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule every configured registry and serve the control plane
    Sync,

    /// Sync registries once, right now, without scheduling
    Load {
        /// Hostname of the registry to load
        #[arg(long, conflicts_with = "all")]
        registry: Option<String>,

        /// Load every configured registry
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = Config::locate(cli.config.as_deref())?;
    let config = Config::load(&config_path)?;

    init_logging(&config.logging, cli.verbose)?;
    info!("Starting picture-book v{}", env!("CARGO_PKG_VERSION"));
    info!("Using configuration {}", config_path.display());

    match cli.command {
        Commands::Sync => cmd_sync(config).await,
        Commands::Load { registry, all } => cmd_load(config, registry, all).await,
    }
}

/// Initialize logging from configuration, `--verbose` and `RUST_LOG` take precedence
fn init_logging(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let registry = tracing_subscriber::registry().with(filter);
    match logging.format.as_str() {
        "json" => registry.with(fmt::layer().json()).init(),
        "pretty" => registry
            .with(fmt::layer().pretty().with_ansi(logging.color))
            .init(),
        "compact" => registry
            .with(fmt::layer().compact().with_ansi(logging.color))
            .init(),
        other => bail!("Unknown log format '{other}', expected compact, pretty or json"),
    }

    Ok(())
}

async fn cmd_sync(config: Config) -> Result<()> {
    let daemon = Daemon::new(config)?;
    daemon.run().await
}

async fn cmd_load(config: Config, registry: Option<String>, all: bool) -> Result<()> {
    let target = match (registry, all) {
        (Some(hostname), _) => LoadTarget::Registry(hostname),
        (None, true) => LoadTarget::All,
        (None, false) => bail!("Specify a registry with --registry <hostname>, or --all"),
    };

    let daemon = Daemon::new(config)?;
    let outcomes = daemon.load(target).await?;
    print_load_summary(&outcomes);

    if outcomes.iter().any(|outcome| outcome.result.is_err()) {
        bail!("One or more registries failed to load");
    }
    Ok(())
}

fn print_load_summary(outcomes: &[LoadOutcome]) {
    println!();
    println!("📦 Load Summary");
    println!("===============");
    for outcome in outcomes {
        match &outcome.result {
            Ok(report) => {
                let status = if report.cancelled { "⏸️ " } else { "✅" };
                println!(
                    "{} {}: {} discovered, {} pushed, {} already present, {} failed ({:.1}s)",
                    status,
                    outcome.hostname,
                    report.discovered,
                    report.pushed,
                    report.already_present,
                    report.failed,
                    report.duration.as_secs_f64()
                );
                if report.removed > 0 {
                    println!("   🧹 removed {} local images", report.removed);
                }
            }
            Err(e) => {
                error!("Loading {} failed: {}", outcome.hostname, e);
                println!("❌ {}: {}", outcome.hostname, e);
            }
        }
    }
}
