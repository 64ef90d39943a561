//! hitline: timed multi-target training sessions.
//!
//! Runs the session engine in-process against a simulated fleet; summaries
//! are printed as JSON and appended to a JSON-lines file.

use clap::Parser;

mod cli;
mod cmd_roster;
mod cmd_simulate;
mod persistence;
mod sim;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Logs go to stderr so stdout stays machine-readable.
    let filter = std::env::var("HITLINE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        cli::Command::Simulate(opts) => cmd_simulate::cmd_simulate(opts).await?,
        cli::Command::Roster(opts) => cmd_roster::cmd_roster(opts).await?,
    }

    Ok(())
}
