//! Text rendering for CLI output

use colored::*;
use sshpilot_core::{CircuitConfig, CircuitState, DependencySpec, GlobalHealthStatus, HealthStatus};

/// CLI console for formatted output
pub struct CliConsole;

impl CliConsole {
    pub fn success(&self, message: &str) {
        println!("{} {}", "✓".green().bold(), message.green());
    }

    pub fn warn(&self, message: &str) {
        println!("{} {}", "⚠".yellow().bold(), message.yellow());
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", "✗".red().bold(), message.red());
    }

    pub fn print_header(&self, title: &str) {
        println!();
        println!("{}", title.bold().underline());
        println!("{}", "=".repeat(title.len()).dimmed());
    }

    pub fn print_health(&self, health: &GlobalHealthStatus) {
        self.print_header("Circuit health");
        for status in health.services.values() {
            self.print_service(status);
        }
        println!();
        println!(
            "{} circuits: {} healthy, {} degraded, {} failed; availability {:.1}%",
            health.total_circuits,
            health.healthy_circuits.to_string().green(),
            health.degraded_circuits.to_string().yellow(),
            health.failed_circuits.to_string().red(),
            health.overall_availability
        );
    }

    pub fn print_service(&self, status: &HealthStatus) {
        println!(
            "  {:<20} {:<10} {}",
            status.service,
            state_label(status.state, status.healthy),
            status.message.dimmed()
        );
    }

    pub fn print_config(&self, service: &str, config: &CircuitConfig) {
        println!("  {}", service.bold());
        println!(
            "    failures {}  successes {}  retry {:?} (max {:?}, exponential {})",
            config.failure_threshold,
            config.success_threshold,
            config.timeout,
            config.max_backoff_time,
            config.exponential_backoff
        );
        println!(
            "    error rate {:.0}% over {} calls  call timeout {:?}",
            config.error_threshold_percentage * 100.0,
            config.volume_threshold,
            config.effective_call_timeout()
        );
        if config.enable_health_checks {
            println!("    health checks every {:?}", config.health_check_interval);
        } else {
            println!("    health checks {}", "off".dimmed());
        }
    }

    pub fn print_dependencies(&self, service: &str, deps: &[DependencySpec]) {
        for dep in deps {
            let kind = if dep.required {
                "requires".red()
            } else {
                "uses".normal()
            };
            match &dep.fallback {
                Some(fallback) => println!(
                    "  {} {} {} (fallback {})",
                    service, kind, dep.service, fallback
                ),
                None => println!("  {} {} {}", service, kind, dep.service),
            }
        }
    }
}

fn state_label(state: CircuitState, healthy: bool) -> ColoredString {
    match state {
        CircuitState::Closed if healthy => state.as_str().green(),
        CircuitState::Closed => state.as_str().yellow(),
        CircuitState::HalfOpen => state.as_str().yellow(),
        CircuitState::Open => state.as_str().red().bold(),
    }
}
