//! sshpilot CLI
//!
//! Loads a resilience configuration (or the built-in SSH service catalog),
//! builds the circuit manager from it and reports circuit health, effective
//! per-service settings and the dependency graph.
//!
//! ```bash
//! sshpilot status
//! sshpilot --config resilience.toml deps ssh-command
//! sshpilot drill ssh-command -n 1 --open ssh-connection
//! ```

mod args;
mod commands;
mod console;

use clap::Parser;

use crate::args::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Set RUST_LOG=debug for verbose logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::route(cli).await
}
