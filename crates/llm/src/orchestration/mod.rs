//! Request orchestration: select, dispatch, classify, retry or fail over.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::circuit_breaker::{Admission, CircuitBreaker, ProbeTicket};
use crate::cost_calculator::{CostBreakdown, CostCalculator};
use crate::errors::{FailoverError, FailoverResult, ProviderError};
use crate::events::{emit, FailoverEvent, FailoverEventBus};
use crate::provider_management::registry::{ProviderRegistry, RegisteredProvider};
use crate::providers::{LlmRequest, LlmResponse, TokenUsage};
use crate::retry::{execute_with_retry, RetryConfig, RetryFailure};

pub mod health_monitor;
pub mod selector;

pub use health_monitor::{HealthCheckOutcome, HealthMonitor, HealthMonitorHandle};
pub use selector::{Candidate, ProviderSelector, Selection, SelectionPolicy, SelectionReason};

/// What happened to one provider during a logical request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded { attempts: u32 },
    Failed { attempts: u32, error: ProviderError },
    /// Skipped without a call: circuit open or probe already in flight
    CircuitOpen,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub provider: String,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub content: String,
    pub provider: String,
    pub model: String,
    pub usage: TokenUsage,
    pub cost: CostBreakdown,
    /// Wall clock from entry to success, including failed providers
    pub duration: Duration,
    pub selection_reason: SelectionReason,
    /// Every provider touched, in order
    pub attempts: Vec<AttemptRecord>,
}

/// Routes the call's outcome to the breaker: through the ticket when this
/// call holds the HALF_OPEN probe, as a plain outcome otherwise. An unused
/// claim is handed back on drop (e.g. the caller dropped the future).
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    ticket: Option<ProbeTicket>,
}

impl<'a> ProbeGuard<'a> {
    fn new(breaker: &'a CircuitBreaker, admission: Admission) -> Self {
        let ticket = match admission {
            Admission::Probe(ticket) => Some(ticket),
            Admission::Closed | Admission::Rejected => None,
        };
        Self { breaker, ticket }
    }

    fn record(&mut self, succeeded: bool) {
        match self.ticket.take() {
            Some(ticket) => self.breaker.record_probe_result(ticket, succeeded),
            None if succeeded => self.breaker.record_success(),
            None => self.breaker.record_failure(),
        }
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.breaker.release_probe(ticket);
        }
    }
}

/// Drives one logical request across the registered providers.
///
/// Failover is strictly sequential; providers are never raced.
#[derive(Debug, Clone)]
pub struct FailoverOrchestrator {
    registry: Arc<ProviderRegistry>,
    selector: ProviderSelector,
    costs: CostCalculator,
    retry: RetryConfig,
    events: FailoverEventBus,
    shutdown: CancellationToken,
}

impl FailoverOrchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        selector: ProviderSelector,
        costs: CostCalculator,
        retry: RetryConfig,
        events: FailoverEventBus,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            selector,
            costs,
            retry,
            events,
            shutdown,
        }
    }

    #[instrument(skip_all, fields(routing_size = request.routing_size(), task_type = ?request.task_type))]
    pub async fn execute(&self, request: &LlmRequest) -> FailoverResult<ExecutionResult> {
        if self.shutdown.is_cancelled() {
            return Err(FailoverError::ShuttingDown);
        }

        let started = Instant::now();
        let mut excluded = vec![false; self.registry.len()];
        let mut skipped = vec![false; self.registry.len()];
        let mut trail: Vec<AttemptRecord> = Vec::new();
        let mut last_error: Option<ProviderError> = None;

        while excluded.contains(&false) {
            if self.shutdown.is_cancelled() {
                return Err(FailoverError::ShuttingDown);
            }

            let mut candidates: Vec<Candidate<'_>> = Vec::new();
            for (index, provider) in self.registry.iter().enumerate() {
                if excluded[index] {
                    continue;
                }
                if provider.breaker.would_admit() {
                    candidates.push(Candidate {
                        name: provider.name.as_str(),
                        index,
                        consecutive_failures: provider.breaker.consecutive_failures(),
                    });
                } else {
                    note_skipped(&mut trail, &mut skipped, index, provider);
                }
            }

            let selection = match self.selector.select(request, &candidates) {
                Ok(selection) => selection,
                Err(FailoverError::NoAvailableProviders) => break,
                Err(other) => return Err(other),
            };
            let Some(provider) = self.registry.get_by_index(selection.index) else {
                break;
            };

            let admission = provider.breaker.try_acquire();
            if admission == Admission::Rejected {
                // another request claimed the probe between the check and here
                debug!(provider = %provider.name, "lost probe race, reselecting");
                note_skipped(&mut trail, &mut skipped, selection.index, provider);
                continue;
            }
            let mut probe = ProbeGuard::new(&provider.breaker, admission);

            debug!(
                provider = %provider.name,
                reason = %selection.reason,
                probe = probe.ticket.is_some(),
                "dispatching request"
            );

            match self.dispatch(provider, request).await {
                Ok((response, attempts)) => {
                    probe.record(true);
                    trail.push(AttemptRecord {
                        provider: provider.name.clone(),
                        outcome: AttemptOutcome::Succeeded { attempts },
                    });
                    return Ok(self.complete(provider, response, selection.reason, started, trail));
                }
                Err(RetryFailure { error, attempts }) => {
                    probe.record(false);
                    warn!(
                        provider = %provider.name,
                        error = %error,
                        error_type = error.error_type(),
                        attempts,
                        "provider failed, failing over"
                    );
                    emit(
                        &self.events,
                        FailoverEvent::ProviderFailure {
                            provider: provider.name.clone(),
                            error: error.clone(),
                            attempts,
                        },
                    );
                    trail.push(AttemptRecord {
                        provider: provider.name.clone(),
                        outcome: AttemptOutcome::Failed { attempts, error: error.clone() },
                    });
                    excluded[selection.index] = true;
                    last_error = Some(error);
                }
            }
        }

        match last_error {
            None => {
                warn!("no provider available, nothing dispatched");
                Err(FailoverError::NoAvailableProviders)
            }
            Some(last_error) => {
                warn!(
                    providers = trail.len(),
                    last_error = %last_error,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "💥 all providers failed"
                );
                Err(FailoverError::AllProvidersFailed {
                    attempts: trail,
                    last_error,
                })
            }
        }
    }

    /// One provider, with in-place retries. Every call is bounded by the
    /// provider's request timeout and counted on its breaker.
    async fn dispatch(
        &self,
        provider: &RegisteredProvider,
        request: &LlmRequest,
    ) -> Result<(LlmResponse, u32), RetryFailure<ProviderError>> {
        execute_with_retry(&self.retry, |attempt| async move {
            let call_started = Instant::now();
            let result =
                match tokio::time::timeout(provider.request_timeout, provider.adapter.complete(request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout(provider.request_timeout)),
                };
            let elapsed = call_started.elapsed();
            provider.breaker.record_attempt(elapsed, result.is_ok());
            debug!(
                provider = %provider.name,
                attempt = attempt + 1,
                elapsed_ms = elapsed.as_millis() as u64,
                ok = result.is_ok(),
                "adapter call finished"
            );
            result
        })
        .await
    }

    fn complete(
        &self,
        provider: &RegisteredProvider,
        response: LlmResponse,
        selection_reason: SelectionReason,
        started: Instant,
        attempts: Vec<AttemptRecord>,
    ) -> ExecutionResult {
        let cost = self.costs.calculate(
            &provider.name,
            &response.model,
            response.usage.input_tokens,
            response.usage.output_tokens,
        );
        provider.breaker.add_cost(cost.total_cost);
        let duration = started.elapsed();

        info!(
            provider = %provider.name,
            model = %response.model,
            reason = %selection_reason,
            providers_tried = attempts.len(),
            duration_ms = duration.as_millis() as u64,
            cost = %cost.total_cost,
            "✅ request completed"
        );
        emit(
            &self.events,
            FailoverEvent::CostTracked {
                provider: provider.name.clone(),
                model: response.model.clone(),
                usage: response.usage,
                cost,
                duration_ms: duration.as_millis() as u64,
            },
        );

        ExecutionResult {
            content: response.content,
            provider: provider.name.clone(),
            model: response.model,
            usage: response.usage,
            cost,
            duration,
            selection_reason,
            attempts,
        }
    }
}

/// Records a provider passed over because its circuit would not admit the
/// call. Each provider appears at most once per request.
fn note_skipped(
    trail: &mut Vec<AttemptRecord>,
    skipped: &mut [bool],
    index: usize,
    provider: &RegisteredProvider,
) {
    if skipped[index] {
        return;
    }
    skipped[index] = true;
    debug!(provider = %provider.name, "skipping provider, circuit not admitting");
    trail.push(AttemptRecord {
        provider: provider.name.clone(),
        outcome: AttemptOutcome::CircuitOpen,
    });
}
