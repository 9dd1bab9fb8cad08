//! Advmux simulator entry point

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use advmux_sim::{
    app::{run_simulation, RunOptions},
    cli::{Cli, Commands},
    config::SimConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = SimConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Run {
            duration,
            preset,
            terminate,
            layouts,
        } => {
            let options = RunOptions {
                duration: Duration::from_secs(duration),
                preset,
                terminate,
                layouts,
            };
            info!(items = config.items.len(), ?options, "Starting simulation");
            let report = run_simulation(&config, &options)
                .await
                .context("simulation failed")?;
            println!("{}", report.to_json()?);
        }
    }
    Ok(())
}

/// `RUST_LOG` wins; otherwise info, or debug with `--verbose`
fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
