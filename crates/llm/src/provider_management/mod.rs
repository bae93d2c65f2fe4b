//! Provider management: the fixed provider registry and the manager facade
//! callers talk to.

pub mod manager;
pub mod registry;

pub use manager::{FailoverManager, FailoverManagerBuilder, SystemHealth};
pub use registry::{ProviderRegistry, RegisteredProvider};
