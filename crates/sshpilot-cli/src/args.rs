//! CLI argument definitions using clap
//!
//! - sshpilot status                 # Health of every circuit
//! - sshpilot config                 # Effective per-service configuration
//! - sshpilot deps [service]         # Dependency graph
//! - sshpilot drill <service> -n 3   # Feed failures and show the fallout

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sshpilot")]
#[command(about = "Inspect the sshpilot resilience layer configuration")]
#[command(version)]
pub struct Cli {
    /// TOML resilience config; the built-in SSH catalog when omitted
    #[arg(long, short, env = "SSHPILOT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show the health of every circuit
    Status,

    /// Show the effective configuration of every service
    Config {
        /// Only this service
        service: Option<String>,
    },

    /// Show declared dependencies
    Deps {
        /// Only dependencies of, and dependents on, this service
        service: Option<String>,
    },

    /// Feed failing calls to a service and report the resulting health
    Drill {
        service: String,

        /// Number of failing calls
        #[arg(short = 'n', long, default_value_t = 1)]
        failures: u32,

        /// Manually open these services first
        #[arg(long = "open", value_name = "SERVICE")]
        open: Vec<String>,
    },
}
