//! Command-line latency probe.
//!
//! Run with: cargo run -p latensee-cli -- --url redis://localhost:6379/0
//!
//! Prints the latency of every execution until Ctrl-C; exits with an error
//! on the first failed command.

use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::Parser;
use futures::StreamExt;
use latensee_core::{CommandLine, ProbeResult, StoreConnector};
use latensee_session::CommandProbe;
use latensee_store::DefaultConnector;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(version, about = "Time a store command repeatedly")]
struct Args {
    /// Store address.
    #[arg(long, default_value = "redis://localhost:6379/0")]
    url: String,

    /// Milliseconds between executions.
    #[arg(long, default_value_t = 500)]
    interval: u64,

    /// Command line to execute.
    #[arg(long, default_value = "set test 1")]
    command: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let command = CommandLine::parse(&args.command).context("Invalid command")?;

    let store = DefaultConnector::new()
        .connect(&args.url)
        .await
        .with_context(|| format!("Could not connect to {}", args.url))?;

    let cancel = CancellationToken::new();
    let mut results =
        CommandProbe::new(store.clone(), command, Duration::from_millis(args.interval))
            .spawn(cancel.clone());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        let next = tokio::select! {
            _ = &mut ctrl_c => break Ok(()),
            next = results.next() => next,
        };

        match next {
            Some(ProbeResult::Sample { latency, .. }) => println!("{latency:?}"),
            Some(ProbeResult::Failure { command, message }) => {
                break Err(anyhow!("{command}: {message}"));
            }
            None => break Err(anyhow!("Probe ended unexpectedly")),
        }
    };

    cancel.cancel();
    store.close().await;
    outcome
}
