//! Subcommand handlers

use anyhow::{Context, Result, bail};
use serde_json::json;
use std::path::Path;

use crate::args::{Cli, Commands};
use crate::console::CliConsole;
use sshpilot_core::{Operation, ResilienceConfig, ResilienceManager};

/// Route a parsed command line to its handler
pub async fn route(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let console = CliConsole;

    match cli.command {
        Commands::Status => status(config, cli.json, &console).await,
        Commands::Config { service } => show_config(&config, service.as_deref(), cli.json, &console),
        Commands::Deps { service } => show_deps(config, service.as_deref(), cli.json, &console).await,
        Commands::Drill {
            service,
            failures,
            open,
        } => drill(config, &service, failures, &open, cli.json, &console).await,
    }
}

pub fn load_config(path: Option<&Path>) -> Result<ResilienceConfig> {
    match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "Loading resilience config");
            ResilienceConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))
        }
        None => Ok(ResilienceConfig::ssh_defaults()),
    }
}

async fn status(config: ResilienceConfig, json: bool, console: &CliConsole) -> Result<()> {
    let manager = ResilienceManager::new(config)?;
    let health = manager.global_health_status();

    if json {
        println!("{}", serde_json::to_string_pretty(&health)?);
    } else {
        console.print_health(&health);
    }
    manager.shutdown().await;
    Ok(())
}

fn show_config(
    config: &ResilienceConfig,
    only: Option<&str>,
    json: bool,
    console: &CliConsole,
) -> Result<()> {
    let services: Vec<&String> = match only {
        Some(name) => match config.services.get_key_value(name) {
            Some((name, _)) => vec![name],
            None => bail!("unknown service '{}'", name),
        },
        None => config.services.keys().collect(),
    };

    if json {
        let merged: serde_json::Map<String, serde_json::Value> = services
            .iter()
            .filter_map(|name| {
                let effective = config.circuit_config(name)?;
                Some(serde_json::to_value(effective).map(|value| ((*name).clone(), value)))
            })
            .collect::<Result<_, _>>()?;
        let document = json!({
            "services": merged,
            "enable_cascading_failure": config.enable_cascading_failure,
            "enable_auto_recovery": config.enable_auto_recovery,
        });
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    console.print_header("Effective configuration");
    for name in services {
        if let Some(effective) = config.circuit_config(name) {
            console.print_config(name, &effective);
        }
    }
    println!();
    println!(
        "cascading failure {}, auto-recovery {}",
        on_off(config.enable_cascading_failure),
        on_off(config.enable_auto_recovery)
    );
    Ok(())
}

async fn show_deps(
    config: ResilienceConfig,
    only: Option<&str>,
    json: bool,
    console: &CliConsole,
) -> Result<()> {
    let manager = ResilienceManager::new(config)?;
    let services = match only {
        Some(name) if manager.circuit(name).is_none() => bail!("unknown service '{}'", name),
        Some(name) => vec![name.to_string()],
        None => manager.service_names(),
    };

    if json {
        let entries: Vec<_> = services
            .iter()
            .map(|name| {
                json!({
                    "service": name,
                    "dependencies": manager.service_dependencies(name),
                    "dependents": manager.dependents_of(name),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        console.print_header("Dependencies");
        for name in &services {
            console.print_dependencies(name, manager.service_dependencies(name));
            if only.is_some() {
                let dependents = manager.dependents_of(name);
                if !dependents.is_empty() {
                    println!("  {} is used by {}", name, dependents.join(", "));
                }
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

async fn drill(
    config: ResilienceConfig,
    service: &str,
    failures: u32,
    open: &[String],
    json: bool,
    console: &CliConsole,
) -> Result<()> {
    let manager = ResilienceManager::new(config)?;

    for name in open {
        match manager.circuit(name) {
            Some(circuit) => circuit.open(),
            None => bail!("unknown service '{}'", name),
        }
    }

    for attempt in 1..=failures {
        let operation = Operation::new(move || async move {
            Err::<(), _>(anyhow::anyhow!("simulated failure {}", attempt))
        });
        match manager.execute_with_circuit_breaker(service, operation).await {
            Err(e) if e.is_configuration_error() => return Err(e.into()),
            Err(e) => tracing::debug!(attempt, error = %e, "Drill call failed"),
            Ok(()) => {}
        }
    }

    let health = manager.global_health_status();
    if json {
        println!("{}", serde_json::to_string_pretty(&health)?);
    } else {
        console.print_health(&health);
        if health.is_fully_healthy() {
            console.success("All circuits healthy");
        } else {
            console.warn(&format!("Failed: {}", health.failed_services().join(", ")));
        }
    }

    let report = manager.shutdown().await;
    for (name, error) in &report.failures {
        console.error(&format!("{}: {}", name, error));
    }
    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_defaults_without_path() {
        let config = load_config(None).unwrap();
        assert!(config.services.contains_key("ssh-connection"));
    }

    #[test]
    fn test_load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
enable_cascading_failure = false

[services.ssh-connection]
failure_threshold = 2
"#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert!(!config.enable_cascading_failure);
        assert_eq!(
            config.circuit_config("ssh-connection").unwrap().failure_threshold,
            2
        );
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_config(Some(Path::new("/nonexistent/resilience.toml"))).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/resilience.toml"));
    }
}
