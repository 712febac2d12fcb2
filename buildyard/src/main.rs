use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use buildyard::cli::Cli;
use buildyard::commands;
use buildyard::process::DetachedWorkers;

/// Env var overriding the log filter
const LOG_ENV: &str = "BUILDYARD_LOG";

#[tokio::main]
async fn main() {
    // A missing .env is fine
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(cli.default_log_filter()));
    // Logs go to stderr so a worker's lines reach the master through its pipe
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .init();

    let detached = Arc::new(DetachedWorkers::default());
    let result = commands::execute(cli, detached.clone()).await;
    if let Err(e) = &result {
        eprintln!("{:#}", e);
        tracing::debug!("{:?}", e);
    }

    // Workers left running still write to our end of their stderr pipe
    detached.drain().await;

    if result.is_err() {
        std::process::exit(1);
    }
}
