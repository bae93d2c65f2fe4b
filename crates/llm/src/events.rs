//! Outbound events for metrics and cost-ledger consumers.

use serde::Serialize;

use crate::cost_calculator::CostBreakdown;
use crate::errors::ProviderError;
use crate::providers::TokenUsage;
use common::Topic;

pub mod topics {
    use common::Topic;

    pub const COST_TRACKED: Topic = Topic("cost_tracked");
    pub const PROVIDER_FAILURE: Topic = Topic("provider_failure");
    pub const CIRCUIT_OPENED: Topic = Topic("circuit_opened");
    pub const CIRCUIT_CLOSED: Topic = Topic("circuit_closed");
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FailoverEvent {
    /// A request completed and was priced
    CostTracked {
        provider: String,
        model: String,
        usage: TokenUsage,
        cost: CostBreakdown,
        duration_ms: u64,
    },
    /// A provider exhausted its attempts for one request
    ProviderFailure {
        provider: String,
        error: ProviderError,
        attempts: u32,
    },
    CircuitOpened {
        provider: String,
        consecutive_failures: u32,
    },
    CircuitClosed {
        provider: String,
    },
}

impl FailoverEvent {
    pub fn topic(&self) -> Topic {
        match self {
            Self::CostTracked { .. } => topics::COST_TRACKED,
            Self::ProviderFailure { .. } => topics::PROVIDER_FAILURE,
            Self::CircuitOpened { .. } => topics::CIRCUIT_OPENED,
            Self::CircuitClosed { .. } => topics::CIRCUIT_CLOSED,
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            Self::CostTracked { provider, .. }
            | Self::ProviderFailure { provider, .. }
            | Self::CircuitOpened { provider, .. }
            | Self::CircuitClosed { provider } => provider,
        }
    }
}

pub type FailoverEventBus = common::EventBus<FailoverEvent>;

/// Publish on the event's own topic.
pub(crate) fn emit(bus: &FailoverEventBus, event: FailoverEvent) {
    let topic = event.topic();
    bus.publish(topic, event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_route_to_their_topic() {
        let bus = FailoverEventBus::new(4);
        let mut opened = bus.subscribe(topics::CIRCUIT_OPENED);
        let mut closed = bus.subscribe(topics::CIRCUIT_CLOSED);

        emit(
            &bus,
            FailoverEvent::CircuitOpened {
                provider: "primary".into(),
                consecutive_failures: 3,
            },
        );

        let envelope = opened.try_recv().expect("opened event");
        assert_eq!(envelope.payload.provider(), "primary");
        assert!(closed.try_recv().is_err());
    }

    #[test]
    fn serializes_with_event_tag() {
        let json = serde_json::to_value(FailoverEvent::CircuitClosed {
            provider: "backup".into(),
        })
        .expect("serializable");
        assert_eq!(json["event"], "circuit_closed");
        assert_eq!(json["provider"], "backup");
    }
}
