//! Resilience manager: one circuit per service plus cascade handling

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::dependency::DependencyGraph;
use super::health::{GlobalHealthStatus, ShutdownReport};
use super::recovery::{self, RecoverySweep, Registry};
use super::watcher::CascadeWatcher;
use crate::config::{CircuitConfig, DependencySpec, ResilienceConfig, ServiceOverrides};
use crate::error::{ResilienceError, ResilienceResult};
use crate::events::{CircuitEvent, EventKind, SharedObserver, TracingObserver};
use crate::resilience::{Circuit, CircuitState, HealthStatus, MetricsSnapshot, Operation};

/// Owns the circuits of every configured service
///
/// Construct inside a Tokio runtime to get circuit timers and the
/// auto-recovery sweep; outside one, circuits still work but nothing runs in
/// the background.
pub struct ResilienceManager {
    circuits: Registry,
    graph: Arc<DependencyGraph>,
    defaults: CircuitConfig,
    /// Receives circuit events and manager-level events
    sink: SharedObserver,
    cascade_enabled: bool,
    recovery_interval: Duration,
    stuck_timeout: Duration,
    recovery: Mutex<Option<RecoverySweep>>,
}

impl ResilienceManager {
    /// Build a manager that reports events to `tracing`
    pub fn new(config: ResilienceConfig) -> ResilienceResult<Self> {
        Self::with_observer(config, Arc::new(TracingObserver))
    }

    /// Build a manager that reports events to `sink`
    pub fn with_observer(config: ResilienceConfig, sink: SharedObserver) -> ResilienceResult<Self> {
        config.validate()?;

        let ResilienceConfig {
            defaults,
            services,
            dependencies,
            enable_cascading_failure,
            enable_auto_recovery,
            auto_recovery_interval,
            stuck_half_open_timeout,
        } = config;

        let manager = Self {
            circuits: Arc::new(DashMap::new()),
            graph: Arc::new(DependencyGraph::new(dependencies)),
            defaults,
            sink,
            cascade_enabled: enable_cascading_failure,
            recovery_interval: auto_recovery_interval,
            stuck_timeout: stuck_half_open_timeout,
            recovery: Mutex::new(None),
        };

        for (name, overrides) in &services {
            let circuit = manager.build_circuit(name, overrides)?;
            manager.circuits.insert(name.clone(), circuit);
        }

        tracing::info!(
            services = manager.circuits.len(),
            dependencies = manager.graph.len(),
            cascade = manager.cascade_enabled,
            "Resilience manager initialized"
        );

        if enable_auto_recovery {
            manager.enable_auto_recovery();
        }
        Ok(manager)
    }

    /// Add a circuit for a service not declared at construction
    pub fn register_service(
        &self,
        name: impl Into<String>,
        overrides: ServiceOverrides,
    ) -> ResilienceResult<Arc<Circuit>> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ResilienceError::invalid_config(
                "service name must not be empty",
            ));
        }

        match self.circuits.entry(name.clone()) {
            Entry::Occupied(_) => Err(ResilienceError::invalid_config(format!(
                "service '{}' is already registered",
                name
            ))),
            Entry::Vacant(slot) => {
                let circuit = self.build_circuit(&name, &overrides).map_err(|e| match e {
                    ResilienceError::InvalidConfig(msg) => {
                        ResilienceError::invalid_config(format!("service '{}': {}", name, msg))
                    }
                    other => other,
                })?;
                slot.insert(Arc::clone(&circuit));
                tracing::info!(service = %name, "Service registered");
                Ok(circuit)
            }
        }
    }

    /// Circuit of `service`, if registered
    pub fn circuit(&self, service: &str) -> Option<Arc<Circuit>> {
        self.circuits
            .get(service)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Registered service names, sorted
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.circuits.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn is_cascade_enabled(&self) -> bool {
        self.cascade_enabled
    }

    /// Run `operation` through the circuit of `service`
    ///
    /// On failure with cascading enabled, the circuit is forced open when any
    /// of its required dependencies is unhealthy. The original error is
    /// returned either way.
    pub async fn execute_with_circuit_breaker<T>(
        &self,
        service: &str,
        operation: Operation<'_, T>,
    ) -> ResilienceResult<T> {
        let circuit = self.require(service)?;
        let result = circuit.execute(operation).await;

        if let Err(error) = &result {
            if self.cascade_enabled && !matches!(error, ResilienceError::ShutDown { .. }) {
                self.apply_cascade(&circuit);
            }
        }
        result
    }

    /// Aggregated health of every circuit
    pub fn global_health_status(&self) -> GlobalHealthStatus {
        let services: BTreeMap<String, HealthStatus> = self
            .circuits
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().health_status()))
            .collect();
        GlobalHealthStatus::from_services(services)
    }

    /// Whether `service` is closed and below its error-rate threshold
    ///
    /// Unknown services are never healthy.
    pub fn is_service_healthy(&self, service: &str) -> bool {
        self.circuit(service).is_some_and(|circuit| circuit.is_healthy())
    }

    /// Health snapshot of one service
    pub fn service_health(&self, service: &str) -> ResilienceResult<HealthStatus> {
        Ok(self.require(service)?.health_status())
    }

    pub fn service_metrics(&self, service: &str) -> ResilienceResult<MetricsSnapshot> {
        Ok(self.require(service)?.metrics())
    }

    /// Declared dependencies of `service`; empty when none are declared
    pub fn service_dependencies(&self, service: &str) -> &[DependencySpec] {
        self.graph.dependencies_of(service)
    }

    /// Services declaring any dependency on `service`
    pub fn dependents_of(&self, service: &str) -> Vec<String> {
        self.graph.dependents_of(service)
    }

    pub fn dependency_graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Service to call for `dependency` on behalf of `service`
    ///
    /// The dependency itself when healthy, else its declared fallback when
    /// that one is healthy, else `None`.
    pub fn resolve_dependency(&self, service: &str, dependency: &str) -> Option<String> {
        let edge = self.graph.edge(service, dependency)?;
        if self.is_service_healthy(&edge.service) {
            return Some(edge.service.clone());
        }

        let fallback = edge.fallback.as_ref()?;
        if self.is_service_healthy(fallback) {
            tracing::debug!(
                service,
                dependency,
                fallback = %fallback,
                "Dependency unhealthy, using fallback"
            );
            return Some(fallback.clone());
        }
        None
    }

    pub fn reset_circuit(&self, service: &str) -> ResilienceResult<()> {
        self.require(service)?.reset();
        Ok(())
    }

    /// Reset every circuit; returns how many were reset
    pub fn reset_all_circuits(&self) -> usize {
        let circuits = self.snapshot();
        for circuit in &circuits {
            circuit.reset();
        }
        tracing::info!(circuits = circuits.len(), "All circuits reset");
        circuits.len()
    }

    /// Start the stuck half-open sweep; no-op if already running
    ///
    /// Returns whether a sweep is running afterwards, which is false outside
    /// a Tokio runtime.
    pub fn enable_auto_recovery(&self) -> bool {
        let mut recovery = self.recovery.lock();
        if recovery.is_some() {
            return true;
        }

        match RecoverySweep::spawn(
            Arc::clone(&self.circuits),
            Arc::clone(&self.sink),
            self.recovery_interval,
            self.stuck_timeout,
        ) {
            Some(sweep) => {
                tracing::info!(
                    interval = ?self.recovery_interval,
                    stuck_timeout = ?self.stuck_timeout,
                    "Auto-recovery enabled"
                );
                *recovery = Some(sweep);
                true
            }
            None => {
                tracing::warn!("No Tokio runtime, auto-recovery not started");
                false
            }
        }
    }

    pub fn disable_auto_recovery(&self) {
        if let Some(sweep) = self.recovery.lock().take() {
            sweep.cancel();
            tracing::info!("Auto-recovery disabled");
        }
    }

    pub fn is_auto_recovery_enabled(&self) -> bool {
        self.recovery.lock().is_some()
    }

    /// Run one auto-recovery sweep now; returns the services that were reset
    pub fn sweep_stuck_circuits(&self) -> Vec<String> {
        recovery::sweep_once(&self.circuits, self.sink.as_ref(), self.stuck_timeout)
    }

    /// Stop the sweep and every circuit, continuing past individual failures
    pub async fn shutdown(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        let sweep = self.recovery.lock().take();
        if let Some(sweep) = sweep {
            if let Err(message) = sweep.stop().await {
                tracing::warn!(error = %message, "Auto-recovery sweep ended abnormally");
                report
                    .failures
                    .push(("auto-recovery".to_string(), message));
            }
        }

        for circuit in self.snapshot() {
            match circuit.shutdown().await {
                Ok(()) => report.circuits_stopped += 1,
                Err(e) => {
                    tracing::warn!(service = %circuit.name(), error = %e, "Circuit shutdown failed");
                    report.failures.push((circuit.name().to_string(), e.to_string()));
                }
            }
        }

        tracing::info!(
            stopped = report.circuits_stopped,
            failures = report.failures.len(),
            "Resilience manager shut down"
        );
        report
    }

    fn require(&self, service: &str) -> ResilienceResult<Arc<Circuit>> {
        self.circuit(service)
            .ok_or_else(|| ResilienceError::unknown_service(service))
    }

    /// All circuits, without holding any registry lock afterwards
    fn snapshot(&self) -> Vec<Arc<Circuit>> {
        self.circuits
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn circuit_observer(&self) -> SharedObserver {
        Arc::new(CascadeWatcher::new(
            Arc::clone(&self.graph),
            Arc::clone(&self.sink),
        ))
    }

    fn build_circuit(
        &self,
        name: &str,
        overrides: &ServiceOverrides,
    ) -> ResilienceResult<Arc<Circuit>> {
        Circuit::with_observer(
            name,
            self.defaults.merged(overrides),
            self.circuit_observer(),
        )
    }

    /// Force `circuit` open if one of its required dependencies is unhealthy
    ///
    /// Dependency health is read as a snapshot; no two circuit locks are held
    /// at once.
    fn apply_cascade(&self, circuit: &Circuit) {
        let from = circuit.state();
        if from == CircuitState::Open {
            return;
        }

        let unhealthy: Vec<&str> = self
            .graph
            .required_dependencies_of(circuit.name())
            .filter(|dep| !self.is_service_healthy(&dep.service))
            .map(|dep| dep.service.as_str())
            .collect();
        if unhealthy.is_empty() {
            return;
        }

        let reason = format!("required dependency {} unhealthy", unhealthy.join(", "));
        tracing::warn!(
            service = %circuit.name(),
            dependencies = ?unhealthy,
            "Cascading failure, forcing circuit open"
        );
        circuit.force_open(reason.clone());

        let warning = CircuitEvent::new(
            EventKind::CascadeWarning,
            circuit.name(),
            from,
            circuit.state(),
            circuit.metrics(),
        )
        .with_detail(reason);
        self.sink.on_event(&warning);
    }
}

impl Drop for ResilienceManager {
    fn drop(&mut self) {
        if let Some(sweep) = self.recovery.get_mut().take() {
            sweep.cancel();
        }
    }
}

impl std::fmt::Debug for ResilienceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceManager")
            .field("services", &self.service_names())
            .field("dependencies", &self.graph.len())
            .field("cascade_enabled", &self.cascade_enabled)
            .field("auto_recovery", &self.is_auto_recovery_enabled())
            .finish()
    }
}
