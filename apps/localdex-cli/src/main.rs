//! localdex - local search over a project's code and docs.

mod cli;
mod commands;

use std::process::ExitCode;

use clap::Parser;
use cli::Cli;
use localdex_core::error::Error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.execute().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn report(err: &anyhow::Error) {
    match err.downcast_ref::<Error>() {
        Some(e) => {
            eprintln!("error: {}", e.user_message());
            if let Some(action) = e.recommended_action() {
                eprintln!("  {action}");
            }
            tracing::debug!(detail = %e, "operation failed");
        }
        None => eprintln!("error: {err:#}"),
    }
}
