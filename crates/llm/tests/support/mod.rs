//! Scripted backend adapters shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use llm_failover::{
    BackendAdapter, FailoverConfig, FailoverManager, LlmRequest, LlmResponse, ProviderError,
    TokenUsage,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the adapter does on one `complete` call.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail(ProviderError),
    /// Never resolves; relies on the request timeout
    Hang,
    /// Succeed after a delay
    Slow(Duration),
}

pub struct ScriptedAdapter {
    name: String,
    model: String,
    usage: TokenUsage,
    script: Mutex<VecDeque<Behavior>>,
    default: Mutex<Behavior>,
    calls: AtomicU32,
    healthy: AtomicBool,
    health_checks: AtomicU32,
}

impl ScriptedAdapter {
    pub fn new(name: &str) -> Arc<Self> {
        Self::with_model(name, "model-1", TokenUsage::new(100, 50))
    }

    pub fn with_model(name: &str, model: &str, usage: TokenUsage) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            model: model.to_string(),
            usage,
            script: Mutex::new(VecDeque::new()),
            default: Mutex::new(Behavior::Succeed),
            calls: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
            health_checks: AtomicU32::new(0),
        })
    }

    pub fn failing(name: &str, error: ProviderError) -> Arc<Self> {
        let adapter = Self::new(name);
        adapter.set_behavior(Behavior::Fail(error));
        adapter
    }

    /// Behaviour for every call not covered by the queued script.
    pub fn set_behavior(&self, behavior: Behavior) {
        *self.default.lock().expect("behavior lock") = behavior;
    }

    pub fn push_script(&self, steps: impl IntoIterator<Item = Behavior>) {
        self.script.lock().expect("script lock").extend(steps);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn health_checks(&self) -> u32 {
        self.health_checks.load(Ordering::SeqCst)
    }

    fn next_behavior(&self) -> Behavior {
        let scripted = self.script.lock().expect("script lock").pop_front();
        scripted.unwrap_or_else(|| self.default.lock().expect("behavior lock").clone())
    }

    fn response(&self, request: &LlmRequest) -> LlmResponse {
        LlmResponse::new(
            format!("{}: {}", self.name, request.prompt),
            self.model.clone(),
            self.usage,
        )
    }
}

#[async_trait]
impl BackendAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_behavior() {
            Behavior::Succeed => Ok(self.response(request)),
            Behavior::Fail(error) => Err(error),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                Err(ProviderError::Network("unreachable".into()))
            }
            Behavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.response(request))
            }
        }
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.healthy.load(Ordering::SeqCst))
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Threshold 3, 300ms breaker timeout, no retries, no background health
/// checks, 500ms request timeout.
pub fn test_config() -> FailoverConfig {
    FailoverConfig::default()
        .without_health_checks()
        .with_failover_threshold(3)
        .with_circuit_breaker_timeout(Duration::from_millis(300))
        .with_retries(0, Duration::from_millis(5))
        .with_request_timeout(Duration::from_millis(500))
}

pub fn build_manager(config: FailoverConfig, adapters: &[Arc<ScriptedAdapter>]) -> FailoverManager {
    init_tracing();
    adapters
        .iter()
        .fold(FailoverManager::builder(config), |builder, adapter| {
            builder.provider(adapter.clone())
        })
        .build()
        .expect("valid manager")
}

pub fn network_error() -> ProviderError {
    ProviderError::Network("connection reset".into())
}
