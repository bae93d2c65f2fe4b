//! Provider Registry - fixed set of providers built once at startup

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::circuit_breaker::CircuitBreaker;
use crate::errors::ConfigError;
use crate::providers::BackendAdapter;

/// One provider: its adapter plus the breaker that owns its mutable state.
pub struct RegisteredProvider {
    pub name: String,
    pub adapter: Arc<dyn BackendAdapter>,
    pub breaker: CircuitBreaker,
    /// Bound on every `complete` call
    pub request_timeout: Duration,
}

impl fmt::Debug for RegisteredProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredProvider")
            .field("name", &self.name)
            .field("breaker", &self.breaker)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Providers in registration order. Immutable once shared.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<RegisteredProvider>>,
    index: HashMap<String, usize>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the registration index.
    pub fn register(&mut self, provider: RegisteredProvider) -> Result<usize, ConfigError> {
        if self.index.contains_key(&provider.name) {
            return Err(ConfigError::DuplicateProvider(provider.name));
        }
        let position = self.providers.len();
        debug!(
            provider = %provider.name,
            position,
            timeout_ms = provider.request_timeout.as_millis() as u64,
            "registered provider"
        );
        self.index.insert(provider.name.clone(), position);
        self.providers.push(Arc::new(provider));
        Ok(position)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<RegisteredProvider>> {
        self.index.get(name).and_then(|&i| self.providers.get(i))
    }

    pub fn get_by_index(&self, index: usize) -> Option<&Arc<RegisteredProvider>> {
        self.providers.get(index)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<RegisteredProvider>> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name.as_str()).collect()
    }
}
