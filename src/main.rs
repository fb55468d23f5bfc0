use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tokenator::cli::{Cli, LogFormat};
use tokenator::config::{Config, Credentials};
use tokenator::manager::Manager;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();
    init_tracing(&args);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(args: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.default_log_filter()));

    let registry = tracing_subscriber::registry().with(filter);
    match args.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn run(args: Cli) -> anyhow::Result<()> {
    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    let credentials = Credentials::from_env().context("failed to read credentials")?;

    let manager = Manager::new(config, credentials);
    tracing::info!(run_id = %manager.run_id(), "starting tokenator run");

    manager.process(&args.repos).await
}
