use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::provider_management::registry::{ProviderRegistry, RegisteredProvider};

/// Result of a single health check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheckOutcome {
    pub provider: String,
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

/// Periodically probes every provider and feeds the result into its breaker.
///
/// Probe failures only ever adjust breaker state; nothing is surfaced to
/// callers of `execute`.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    registry: Arc<ProviderRegistry>,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(registry: Arc<ProviderRegistry>, interval: Duration, probe_timeout: Duration) -> Self {
        Self {
            registry,
            interval,
            probe_timeout,
        }
    }

    /// Probe all providers concurrently, once.
    pub async fn check_now(&self) -> Vec<HealthCheckOutcome> {
        let started = Instant::now();
        debug!(providers = self.registry.len(), "🏥 starting health sweep");

        let outcomes = join_all(self.registry.iter().map(|p| self.check_one(p))).await;

        let healthy = outcomes.iter().filter(|o| o.healthy).count();
        info!(
            healthy,
            total = outcomes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "🏥 health sweep finished"
        );
        outcomes
    }

    async fn check_one(&self, provider: &RegisteredProvider) -> HealthCheckOutcome {
        let started = Instant::now();
        let (healthy, error) =
            match tokio::time::timeout(self.probe_timeout, provider.adapter.health_check()).await {
                Ok(Ok(true)) => (true, None),
                Ok(Ok(false)) => (false, Some("backend reported unhealthy".to_string())),
                Ok(Err(e)) => (false, Some(e.to_string())),
                Err(_) => (
                    false,
                    Some(format!("health check timed out after {:?}", self.probe_timeout)),
                ),
            };
        let response_time_ms = started.elapsed().as_millis() as u64;

        provider.breaker.record_health_check(healthy);
        match &error {
            None => debug!(provider = %provider.name, response_time_ms, "✅ health check passed"),
            Some(reason) => warn!(provider = %provider.name, reason = %reason, "❌ health check failed"),
        }

        HealthCheckOutcome {
            provider: provider.name.clone(),
            healthy,
            response_time_ms,
            error,
        }
    }

    /// Start the periodic sweep on the current Tokio runtime.
    ///
    /// The first sweep runs one full interval after start. Cancelling `token`
    /// stops the loop, including a sweep in progress.
    pub fn spawn(self, token: CancellationToken) -> HealthMonitorHandle {
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.interval;
            let mut ticker = tokio::time::interval_at(start, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = self.interval.as_millis() as u64, "health monitor started");

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = cancelled.cancelled() => break,
                            _ = self.check_now() => {}
                        }
                    }
                }
            }
            info!("health monitor stopped");
        });

        HealthMonitorHandle {
            token,
            handle: Mutex::new(Some(handle)),
        }
    }
}

/// Owns the background sweep task.
#[derive(Debug)]
pub struct HealthMonitorHandle {
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitorHandle {
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Cancel and wait for the task. Safe to call more than once.
    pub async fn stop(&self) {
        self.token.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "health monitor task ended abnormally");
                }
            }
        }
    }
}

impl Drop for HealthMonitorHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
