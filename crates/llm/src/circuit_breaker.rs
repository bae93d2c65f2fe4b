use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cost_calculator::Cost;
use crate::events::{emit, FailoverEvent, FailoverEventBus};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,   // Normal operation
    Open,     // Failing, rejecting requests
    HalfOpen, // One probe in flight
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        })
    }
}

/// Informational provider status; routing only looks at [`CircuitState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        })
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time an open circuit waits before admitting a probe
    pub recovery_timeout: Duration,
    /// Number of response-time samples kept for averaging
    pub response_time_window: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            response_time_window: 100,
        }
    }
}

/// Mutable per-provider state. Only reachable through its [`CircuitBreaker`].
#[derive(Debug, Clone)]
pub struct ProviderState {
    pub status: ProviderStatus,
    pub consecutive_failures: u32,
    pub circuit_state: CircuitState,
    /// Set while OPEN or HALF_OPEN
    pub circuit_opened_at: Option<Instant>,
    pub last_health_check_at: Option<Instant>,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_cost: Cost,
    pub response_times: VecDeque<Duration>,
    probe_epoch: u64,
    /// Probe claimed through `is_available`, which hands out no ticket
    anonymous_probe: bool,
}

impl ProviderState {
    fn new(window: usize) -> Self {
        Self {
            status: ProviderStatus::Healthy,
            consecutive_failures: 0,
            circuit_state: CircuitState::Closed,
            circuit_opened_at: None,
            last_health_check_at: None,
            total_requests: 0,
            total_failures: 0,
            total_cost: Cost::ZERO,
            response_times: VecDeque::with_capacity(window),
            probe_epoch: 0,
            anonymous_probe: false,
        }
    }

    pub fn average_response_time(&self) -> Option<Duration> {
        if self.response_times.is_empty() {
            return None;
        }
        let total: Duration = self.response_times.iter().sum();
        Some(total / self.response_times.len() as u32)
    }

    fn refresh_status(&mut self) {
        self.status = match self.circuit_state {
            CircuitState::Open => ProviderStatus::Unhealthy,
            CircuitState::HalfOpen => ProviderStatus::Degraded,
            CircuitState::Closed if self.consecutive_failures > 0 => ProviderStatus::Degraded,
            CircuitState::Closed => ProviderStatus::Healthy,
        };
    }

    fn close(&mut self) {
        self.circuit_state = CircuitState::Closed;
        self.circuit_opened_at = None;
        self.consecutive_failures = 0;
        // invalidates any outstanding probe ticket
        self.probe_epoch += 1;
        self.anonymous_probe = false;
    }
}

/// Proof that the caller holds the single HALF_OPEN probe slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTicket {
    epoch: u64,
}

/// Outcome of [`CircuitBreaker::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Closed,
    Probe(ProbeTicket),
    Rejected,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// Serializable view of one provider for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealthReport {
    pub status: ProviderStatus,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    /// Mean over the sliding response-time window, 0 when no samples
    pub average_response_time_ms: f64,
    pub total_cost: Cost,
    pub ms_since_health_check: Option<u64>,
    pub ms_since_circuit_opened: Option<u64>,
}

/// Per-provider circuit breaker.
///
/// Every transition happens under one `parking_lot::Mutex`, so the HALF_OPEN
/// probe slot can be claimed by exactly one caller and failure counts are
/// never lost. Events are published after the lock is released.
pub struct CircuitBreaker {
    provider: String,
    config: CircuitBreakerConfig,
    state: Mutex<ProviderState>,
    events: FailoverEventBus,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CircuitBreaker")
            .field("provider", &self.provider)
            .field("circuit_state", &state.circuit_state)
            .field("consecutive_failures", &state.consecutive_failures)
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(provider: &str, config: CircuitBreakerConfig, events: FailoverEventBus) -> Self {
        let window = config.response_time_window.max(1);
        Self {
            provider: provider.to_string(),
            config,
            state: Mutex::new(ProviderState::new(window)),
            events,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Decide whether a call may go to this provider right now.
    ///
    /// An OPEN circuit past its recovery timeout moves to HALF_OPEN and hands
    /// the probe slot to this caller only; everyone else is rejected until the
    /// probe resolves.
    pub fn try_acquire(&self) -> Admission {
        self.claim(false)
    }

    fn claim(&self, anonymous: bool) -> Admission {
        let mut state = self.state.lock();
        match state.circuit_state {
            CircuitState::Closed => Admission::Closed,
            CircuitState::Open => {
                let expired = state
                    .circuit_opened_at
                    .map(|opened| opened.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);
                if !expired {
                    debug!(provider = %self.provider, "⭕ circuit OPEN, rejecting");
                    return Admission::Rejected;
                }
                state.circuit_state = CircuitState::HalfOpen;
                state.probe_epoch += 1;
                state.anonymous_probe = anonymous;
                state.refresh_status();
                info!(provider = %self.provider, "🔄 circuit HALF_OPEN, admitting probe");
                Admission::Probe(ProbeTicket {
                    epoch: state.probe_epoch,
                })
            }
            CircuitState::HalfOpen => {
                debug!(provider = %self.provider, "probe outstanding, rejecting");
                Admission::Rejected
            }
        }
    }

    /// Whether [`try_acquire`](Self::try_acquire) would admit a caller now.
    /// Claims nothing.
    pub fn would_admit(&self) -> bool {
        let state = self.state.lock();
        match state.circuit_state {
            CircuitState::Closed => true,
            CircuitState::Open => state
                .circuit_opened_at
                .map(|opened| opened.elapsed() >= self.config.recovery_timeout)
                .unwrap_or(true),
            CircuitState::HalfOpen => false,
        }
    }

    /// `true` for CLOSED, and for the single caller that claims the probe.
    ///
    /// A probe claimed here has no ticket; the next `record_success` or
    /// `record_failure` resolves it.
    pub fn is_available(&self) -> bool {
        self.claim(true).is_admitted()
    }

    /// Return an unused probe claim. The circuit goes back to OPEN with its
    /// original timestamp, so the next caller can claim it immediately.
    pub fn release_probe(&self, ticket: ProbeTicket) {
        let mut state = self.state.lock();
        if state.circuit_state == CircuitState::HalfOpen && state.probe_epoch == ticket.epoch {
            state.circuit_state = CircuitState::Open;
            state.anonymous_probe = false;
            state.refresh_status();
            debug!(provider = %self.provider, "probe released unused");
        }
    }

    /// Outcome of a call admitted while CLOSED, or of an `is_available`
    /// probe. While a ticketed probe is pending it only updates counters.
    pub fn record_success(&self) {
        self.record_outcome(None, true);
    }

    pub fn record_failure(&self) {
        self.record_outcome(None, false);
    }

    /// Outcome of the call admitted with `ticket`. Only the current ticket
    /// moves HALF_OPEN; a stale one counts like any other call.
    pub fn record_probe_result(&self, ticket: ProbeTicket, succeeded: bool) {
        self.record_outcome(Some(ticket), succeeded);
    }

    fn record_outcome(&self, ticket: Option<ProbeTicket>, succeeded: bool) {
        let event = {
            let mut state = self.state.lock();
            let resolves_probe = state.circuit_state == CircuitState::HalfOpen
                && match ticket {
                    Some(ticket) => ticket.epoch == state.probe_epoch,
                    None => state.anonymous_probe,
                };
            if succeeded {
                self.apply_success(&mut state, resolves_probe)
            } else {
                self.apply_failure(&mut state, resolves_probe)
            }
        };
        if let Some(event) = event {
            emit(&self.events, event);
        }
    }

    fn apply_success(&self, state: &mut ProviderState, resolves_probe: bool) -> Option<FailoverEvent> {
        match state.circuit_state {
            CircuitState::Closed => {
                if state.consecutive_failures > 0 {
                    debug!(
                        provider = %self.provider,
                        previous = state.consecutive_failures,
                        "✅ resetting failure count"
                    );
                }
                state.consecutive_failures = 0;
                state.refresh_status();
                None
            }
            CircuitState::HalfOpen if resolves_probe => {
                state.close();
                state.refresh_status();
                info!(provider = %self.provider, "✅ probe succeeded, circuit CLOSED");
                Some(FailoverEvent::CircuitClosed {
                    provider: self.provider.clone(),
                })
            }
            CircuitState::HalfOpen => {
                debug!(provider = %self.provider, "late success while probe pending, state unchanged");
                None
            }
            CircuitState::Open => {
                // a call admitted before the circuit opened finished late
                warn!(provider = %self.provider, "success recorded while OPEN, ignoring");
                None
            }
        }
    }

    fn apply_failure(&self, state: &mut ProviderState, resolves_probe: bool) -> Option<FailoverEvent> {
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let failures = state.consecutive_failures;

        let opened = match state.circuit_state {
            CircuitState::Closed if failures >= self.config.failure_threshold => {
                warn!(
                    provider = %self.provider,
                    consecutive_failures = failures,
                    "🚨 circuit OPEN"
                );
                true
            }
            CircuitState::Closed => {
                debug!(
                    provider = %self.provider,
                    consecutive_failures = failures,
                    threshold = self.config.failure_threshold,
                    "❌ failure recorded"
                );
                false
            }
            CircuitState::HalfOpen if resolves_probe => {
                warn!(provider = %self.provider, "🚨 probe failed, circuit back to OPEN");
                true
            }
            CircuitState::HalfOpen => {
                debug!(provider = %self.provider, "late failure while probe pending, state unchanged");
                false
            }
            CircuitState::Open => {
                debug!(provider = %self.provider, "additional failure while OPEN");
                false
            }
        };

        if opened {
            state.circuit_state = CircuitState::Open;
            state.circuit_opened_at = Some(Instant::now());
            state.anonymous_probe = false;
            // keeps OPEN => failures >= threshold when a probe fails after a health reset
            state.consecutive_failures = failures.max(self.config.failure_threshold);
        }
        state.refresh_status();

        opened.then(|| FailoverEvent::CircuitOpened {
            provider: self.provider.clone(),
            consecutive_failures: state.consecutive_failures,
        })
    }

    /// Account one adapter call: request counters and the latency window.
    pub fn record_attempt(&self, elapsed: Duration, succeeded: bool) {
        let mut state = self.state.lock();
        state.total_requests += 1;
        if !succeeded {
            state.total_failures += 1;
        }
        if state.response_times.len() >= self.config.response_time_window.max(1) {
            state.response_times.pop_front();
        }
        state.response_times.push_back(elapsed);
    }

    pub fn add_cost(&self, cost: Cost) {
        self.state.lock().total_cost += cost;
    }

    /// Feed a health probe result.
    ///
    /// Success closes an OPEN or HALF_OPEN circuit. Failure only marks the
    /// provider unhealthy; opening stays with the live failure count.
    pub fn record_health_check(&self, healthy: bool) {
        let event = {
            let mut state = self.state.lock();
            state.last_health_check_at = Some(Instant::now());
            if healthy {
                let was_open = state.circuit_state != CircuitState::Closed;
                state.consecutive_failures = 0;
                if was_open {
                    state.close();
                    info!(provider = %self.provider, "🩺 health check passed, circuit CLOSED");
                }
                state.status = ProviderStatus::Healthy;
                was_open.then(|| FailoverEvent::CircuitClosed {
                    provider: self.provider.clone(),
                })
            } else {
                state.status = ProviderStatus::Unhealthy;
                debug!(provider = %self.provider, "health check failed");
                None
            }
        };
        if let Some(event) = event {
            emit(&self.events, event);
        }
    }

    /// Operator reset to CLOSED; totals are kept.
    pub fn reset(&self) {
        let event = {
            let mut state = self.state.lock();
            let was_open = state.circuit_state != CircuitState::Closed;
            state.close();
            state.status = ProviderStatus::Healthy;
            info!(provider = %self.provider, "circuit manually reset");
            was_open.then(|| FailoverEvent::CircuitClosed {
                provider: self.provider.clone(),
            })
        };
        if let Some(event) = event {
            emit(&self.events, event);
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().circuit_state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    /// Copy of the full state.
    pub fn provider_state(&self) -> ProviderState {
        self.state.lock().clone()
    }

    pub fn snapshot(&self) -> ProviderHealthReport {
        let state = self.state.lock();
        ProviderHealthReport {
            status: state.status,
            circuit_state: state.circuit_state,
            consecutive_failures: state.consecutive_failures,
            total_requests: state.total_requests,
            total_failures: state.total_failures,
            average_response_time_ms: state
                .average_response_time()
                .map(|d| d.as_secs_f64() * 1000.0)
                .unwrap_or(0.0),
            total_cost: state.total_cost,
            ms_since_health_check: state
                .last_health_check_at
                .map(|at| at.elapsed().as_millis() as u64),
            ms_since_circuit_opened: state
                .circuit_opened_at
                .map(|at| at.elapsed().as_millis() as u64),
        }
    }

    /// Human-readable one-liner used by status reports
    pub fn state_info(&self) -> String {
        let state = self.state.lock();
        match state.circuit_state {
            CircuitState::Closed => format!("CLOSED (failures: {})", state.consecutive_failures),
            CircuitState::Open => match state.circuit_opened_at {
                Some(opened) => {
                    let remaining = self.config.recovery_timeout.saturating_sub(opened.elapsed());
                    format!("OPEN (probe in: {:?})", remaining)
                }
                None => "OPEN".to_string(),
            },
            CircuitState::HalfOpen => "HALF_OPEN (probe in flight)".to_string(),
        }
    }
}
