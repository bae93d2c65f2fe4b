//! Failover Manager - facade that owns the registry, the event bus and the
//! health task

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::registry::{ProviderRegistry, RegisteredProvider};
use crate::circuit_breaker::{CircuitBreaker, ProviderHealthReport};
use crate::config::FailoverConfig;
use crate::cost_calculator::{Cost, CostCalculator};
use crate::errors::{ConfigError, FailoverError, FailoverResult};
use crate::events::{FailoverEvent, FailoverEventBus};
use crate::orchestration::{
    ExecutionResult, FailoverOrchestrator, HealthCheckOutcome, HealthMonitor, HealthMonitorHandle,
    ProviderSelector,
};
use crate::providers::{BackendAdapter, LlmRequest, TaskType};
use common::{EventEnvelope, OperationTimer, Topic};

/// Point-in-time view of every provider.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub providers: BTreeMap<String, ProviderHealthReport>,
    pub shutting_down: bool,
}

impl SystemHealth {
    pub fn total_cost(&self) -> Cost {
        self.providers.values().map(|p| p.total_cost).sum()
    }
}

pub struct FailoverManagerBuilder {
    config: FailoverConfig,
    adapters: Vec<Arc<dyn BackendAdapter>>,
}

impl FailoverManagerBuilder {
    /// Providers are tried in registration order when nothing else decides.
    pub fn provider(mut self, adapter: Arc<dyn BackendAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn providers<I>(mut self, adapters: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn BackendAdapter>>,
    {
        self.adapters.extend(adapters);
        self
    }

    /// Validate the configuration, register providers and start the health
    /// task. Health checks need a running Tokio runtime.
    pub fn build(self) -> FailoverResult<FailoverManager> {
        let config = self.config;
        config.validate()?;
        if self.adapters.is_empty() {
            return Err(ConfigError::NoProviders.into());
        }

        let events = FailoverEventBus::new(config.event_buffer);
        let mut registry = ProviderRegistry::new();
        for adapter in self.adapters {
            let name = adapter.name().to_string();
            registry.register(RegisteredProvider {
                breaker: CircuitBreaker::new(&name, config.circuit_breaker_config(), events.clone()),
                request_timeout: config.request_timeout_for(&name),
                name,
                adapter,
            })?;
        }
        config.validate_providers(&registry.names())?;
        for name in config.provider_timeouts_ms.keys() {
            if !registry.contains(name) {
                warn!(provider = %name, "timeout configured for unregistered provider");
            }
        }

        let registry = Arc::new(registry);
        let shutdown = CancellationToken::new();
        let orchestrator = FailoverOrchestrator::new(
            registry.clone(),
            ProviderSelector::new(config.selection.clone()),
            CostCalculator::new(config.rates.clone()),
            config.retry_config(),
            events.clone(),
            shutdown.clone(),
        );
        let health_monitor = HealthMonitor::new(
            registry.clone(),
            config.health_check_interval(),
            config.health_check_timeout(),
        );

        let monitor_handle = if config.health_check_enabled {
            tokio::runtime::Handle::try_current().map_err(|_| {
                ConfigError::invalid(
                    "health_check_enabled",
                    "background health checks need a running Tokio runtime",
                )
            })?;
            Some(health_monitor.clone().spawn(shutdown.child_token()))
        } else {
            None
        };

        info!(
            providers = ?registry.names(),
            failover_threshold = config.failover_threshold,
            health_checks = config.health_check_enabled,
            "🚀 failover manager ready"
        );

        Ok(FailoverManager {
            config,
            registry,
            orchestrator,
            health_monitor,
            monitor_handle,
            events,
            shutdown,
        })
    }
}

/// Entry point for callers: routes requests with failover, reports health,
/// and owns the lifecycle of everything it built.
pub struct FailoverManager {
    config: FailoverConfig,
    registry: Arc<ProviderRegistry>,
    orchestrator: FailoverOrchestrator,
    health_monitor: HealthMonitor,
    monitor_handle: Option<HealthMonitorHandle>,
    events: FailoverEventBus,
    shutdown: CancellationToken,
}

impl fmt::Debug for FailoverManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailoverManager")
            .field("registry", &self.registry)
            .field("health_monitor", &self.monitor_handle.is_some())
            .field("shutting_down", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl FailoverManager {
    pub fn builder(config: FailoverConfig) -> FailoverManagerBuilder {
        FailoverManagerBuilder {
            config,
            adapters: Vec::new(),
        }
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Route one request, failing over across providers as needed.
    #[instrument(skip_all)]
    pub async fn execute(&self, request: &LlmRequest) -> FailoverResult<ExecutionResult> {
        if self.shutdown.is_cancelled() {
            return Err(FailoverError::ShuttingDown);
        }
        let mut timer = OperationTimer::new("failover_execute");
        let result = self.orchestrator.execute(request).await;
        if let Ok(done) = &result {
            timer.add_field("provider", &done.provider);
            timer.add_field("providers_tried", done.attempts.len());
        }
        timer.finish_with_result(&result);
        result
    }

    pub async fn execute_with_task(
        &self,
        request: LlmRequest,
        task_type: TaskType,
    ) -> FailoverResult<ExecutionResult> {
        self.execute(&request.with_task_type(task_type)).await
    }

    pub fn system_health(&self) -> SystemHealth {
        SystemHealth {
            providers: self
                .registry
                .iter()
                .map(|p| (p.name.clone(), p.breaker.snapshot()))
                .collect(),
            shutting_down: self.shutdown.is_cancelled(),
        }
    }

    pub fn status_report(&self) -> String {
        let health = self.system_health();
        let mut report = String::new();

        report.push_str("🚀 LLM Failover Status\n");
        report.push_str("======================\n\n");
        if health.shutting_down {
            report.push_str("⚠️ shutting down\n\n");
        }

        let requests: u64 = health.providers.values().map(|p| p.total_requests).sum();
        let failures: u64 = health.providers.values().map(|p| p.total_failures).sum();
        let success_rate = if requests > 0 {
            (requests - failures) as f64 / requests as f64 * 100.0
        } else {
            0.0
        };
        report.push_str("📊 Overall:\n");
        report.push_str(&format!("  • Adapter calls: {}\n", requests));
        report.push_str(&format!("  • Success rate: {:.2}%\n", success_rate));
        report.push_str(&format!("  • Total cost: ${}\n\n", health.total_cost()));

        report.push_str("🔌 Providers:\n");
        for provider in self.registry.iter() {
            let Some(stats) = health.providers.get(&provider.name) else {
                continue;
            };
            report.push_str(&format!(
                "  • {} [{}] {}: {} calls, {} failed, avg {:.0}ms, ${}\n",
                provider.name,
                stats.status,
                provider.breaker.state_info(),
                stats.total_requests,
                stats.total_failures,
                stats.average_response_time_ms,
                stats.total_cost,
            ));
        }
        report
    }

    /// Receive events published on `topic` from now on.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<EventEnvelope<FailoverEvent>> {
        self.events.subscribe(topic)
    }

    /// Run one health sweep now, independent of the background schedule.
    pub async fn check_health_now(&self) -> FailoverResult<Vec<HealthCheckOutcome>> {
        if self.shutdown.is_cancelled() {
            return Err(FailoverError::ShuttingDown);
        }
        Ok(self.health_monitor.check_now().await)
    }

    /// Force a provider's circuit back to CLOSED.
    pub fn reset_provider(&self, name: &str) -> FailoverResult<()> {
        let provider = self
            .registry
            .get(name)
            .ok_or_else(|| FailoverError::UnknownProvider(name.to_string()))?;
        provider.breaker.reset();
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop the health task; every later `execute` fails with
    /// `ShuttingDown`. Idempotent.
    pub async fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("🛑 failover manager shutting down");
        }
        self.shutdown.cancel();
        if let Some(handle) = &self.monitor_handle {
            handle.stop().await;
        }
    }
}

impl Drop for FailoverManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
