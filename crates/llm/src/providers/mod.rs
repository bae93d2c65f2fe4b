use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;

/// Routing hint describing what the caller optimises for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    General,
    /// Cost-sensitive batch work
    BulkProcessing,
    /// Quality-sensitive work
    CriticalAnalysis,
}

impl TaskType {
    /// Parse a free-form hint; unrecognised hints route as `General`.
    pub fn from_hint(hint: &str) -> Self {
        match hint.trim().to_ascii_lowercase().as_str() {
            "bulk_processing" | "bulk" => Self::BulkProcessing,
            "critical_analysis" | "critical" => Self::CriticalAnalysis,
            _ => Self::General,
        }
    }
}

/// Request object handed to backend adapters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// Explicit model; adapters fall back to their own default when absent
    pub model: Option<String>,
    pub task_type: Option<TaskType>,
    /// Size of the attached document in characters, when the prompt
    /// only references it
    pub document_size: Option<usize>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl LlmRequest {
    pub fn new(prompt: &str) -> Self {
        Self {
            prompt: prompt.to_string(),
            ..Self::default()
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: &str) -> Self {
        self.system_prompt = Some(system_prompt.to_string());
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    pub fn with_document_size(mut self, chars: usize) -> Self {
        self.document_size = Some(chars);
        self
    }

    pub fn with_parameters(mut self, max_tokens: Option<u32>, temperature: Option<f32>) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    /// Payload size in characters used by routing rules.
    pub fn routing_size(&self) -> usize {
        self.document_size.unwrap_or_else(|| {
            self.prompt.chars().count()
                + self
                    .system_prompt
                    .as_deref()
                    .map(|s| s.chars().count())
                    .unwrap_or(0)
        })
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        u64::from(self.input_tokens) + u64::from(self.output_tokens)
    }
}

/// Response object from backend adapters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub usage: TokenUsage,
    /// Model that actually served the request
    pub model: String,
}

impl LlmResponse {
    pub fn new(content: impl Into<String>, model: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            content: content.into(),
            usage,
            model: model.into(),
        }
    }
}

/// Capability set the routing core needs from a provider.
///
/// Implementations own their transport (HTTP client, credentials, wire
/// format) and report failures through the [`ProviderError`] taxonomy so the
/// core can tell transient failures from permanent ones.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Stable provider name used for routing, pricing and reporting.
    fn name(&self) -> &str;

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError>;

    /// `Ok(true)` when the backend is ready to serve traffic.
    async fn health_check(&self) -> Result<bool, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_size_prefers_explicit_document_size() {
        let request = LlmRequest::new("summarise the attachment").with_document_size(80_000);
        assert_eq!(request.routing_size(), 80_000);
    }

    #[test]
    fn routing_size_counts_prompt_and_system_characters() {
        let request = LlmRequest::new("héllo").with_system_prompt("be brief");
        assert_eq!(request.routing_size(), 5 + 8);
    }

    #[test]
    fn generation_parameters_are_optional() {
        let request = LlmRequest::new("q").with_parameters(Some(256), Some(0.2));
        assert_eq!(request.max_tokens, Some(256));
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(LlmRequest::new("q").max_tokens, None);
    }

    #[test]
    fn task_hints() {
        assert_eq!(TaskType::from_hint("bulk_processing"), TaskType::BulkProcessing);
        assert_eq!(TaskType::from_hint(" Critical_Analysis "), TaskType::CriticalAnalysis);
        assert_eq!(TaskType::from_hint("chat"), TaskType::General);
    }

    #[test]
    fn task_type_serde_uses_snake_case() {
        let json = serde_json::to_string(&TaskType::BulkProcessing).expect("serializable");
        assert_eq!(json, "\"bulk_processing\"");
    }
}
