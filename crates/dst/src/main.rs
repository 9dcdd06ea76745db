//! dst
//!
//! Entry point for the download stress tester. `dst tester` emulates
//! playback sessions against a media URL; `dst server` serves synthetic
//! byte streams for it to download.

mod cli;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Command};
use common::observability::{init_tracing, LogConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::process::ExitCode;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let log_config = LogConfig::from_env()?;
    init_tracing(&log_config)?;

    if let Some(addr) = cli.metrics_address {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(%addr, "Serving metrics");
    }

    match cli.command {
        Command::Tester(args) => {
            let config = args.into_config()?;
            let cancel = CancellationToken::new();

            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    info!("Received SIGINT, stopping sessions");
                    on_interrupt.cancel();
                }
            });

            dst_tester::run_sessions(&config, &cancel).await?;
            info!("All sessions finished");
        }
        Command::Server(args) => {
            let config = args.into_config()?;
            dst_server::server::run(&config, dst_server::server::shutdown_signal()).await?;
        }
    }

    Ok(())
}
