//! Shared plumbing for the workspace: logging bootstrap and the event bus.

pub mod event_bus;
pub mod structured_logging;

pub use event_bus::{EventBus, EventEnvelope, Topic};
pub use structured_logging::{
    init_structured_logging, ExecutionContext, LogFormat, LoggingConfig, OperationTimer,
    StructuredLogEntry,
};
