//! sshpilot
//!
//! Circuit breakers and dependency-aware failure handling for the sshpilot
//! SSH automation server. Everything lives in [`sshpilot_core`]; this crate
//! re-exports it under one name.
//!
//! ```no_run
//! use sshpilot::{Operation, ResilienceConfig, ResilienceManager};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let manager = ResilienceManager::new(ResilienceConfig::ssh_defaults())?;
//! let uptime = manager
//!     .execute_with_circuit_breaker(
//!         "ssh-command",
//!         Operation::new(|| async { Ok::<_, anyhow::Error>("up 3 days".to_string()) }),
//!     )
//!     .await?;
//! # let _ = uptime;
//! # Ok(())
//! # }
//! ```

pub use sshpilot_core::*;
