//! Resilient routing of completion requests across interchangeable LLM
//! backends.
//!
//! A [`FailoverManager`] owns one [`CircuitBreaker`] per registered
//! [`BackendAdapter`]. Each request is routed by the [`ProviderSelector`],
//! retried in place for transient errors, failed over to the next provider
//! otherwise, and priced by the [`CostCalculator`] on success. Outcomes are
//! published on a topic-based event bus for external ledgers.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use llm_failover::{BackendAdapter, FailoverConfig, FailoverManager, LlmRequest};
//! # async fn run(primary: Arc<dyn BackendAdapter>, backup: Arc<dyn BackendAdapter>) -> Result<(), llm_failover::FailoverError> {
//! let manager = FailoverManager::builder(FailoverConfig::from_env()?)
//!     .provider(primary)
//!     .provider(backup)
//!     .build()?;
//!
//! let result = manager.execute(&LlmRequest::new("Summarise this contract")).await?;
//! println!("{} answered for ${}", result.provider, result.cost.total_cost);
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod cost_calculator;
pub mod errors;
pub mod events;
pub mod orchestration;
pub mod provider_management;
pub mod providers;
pub mod retry;

pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState, ProbeTicket,
    ProviderHealthReport, ProviderState, ProviderStatus,
};
pub use config::FailoverConfig;
pub use cost_calculator::{Cost, CostBreakdown, CostCalculator, ModelRate, RateTable};
pub use errors::{ConfigError, FailoverError, FailoverResult, ProviderError};
pub use events::{topics, FailoverEvent, FailoverEventBus};
pub use orchestration::{
    AttemptOutcome, AttemptRecord, ExecutionResult, FailoverOrchestrator, HealthCheckOutcome,
    HealthMonitor, HealthMonitorHandle, ProviderSelector, SelectionPolicy, SelectionReason,
};
pub use provider_management::{
    FailoverManager, FailoverManagerBuilder, ProviderRegistry, RegisteredProvider, SystemHealth,
};
pub use providers::{BackendAdapter, LlmRequest, LlmResponse, TaskType, TokenUsage};
pub use retry::{RetryConfig, RetryableError};
