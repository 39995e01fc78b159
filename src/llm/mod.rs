//! Generative model client
//!
//! The pipelines call a narrow `LlmClient` trait: system prompt, message
//! list, model tier, text out. Two implementations:
//! - `SubprocessLlm`: spawns a model-orchestrator MCP server over stdio
//!   (production)
//! - `MockLlm`: preconfigured responses per tier (testing)

pub mod extract;
pub mod subprocess;

pub use extract::{EntityExtractor, ExtractedEntity};
pub use subprocess::SubprocessLlm;

use crate::cancel::CancellationToken;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Model tier for generation. Extraction runs on the small tier, answer
/// synthesis on the mid tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Small,
    Mid,
    Large,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Small => "small",
            ModelTier::Mid => "mid",
            ModelTier::Large => "large",
        }
    }
}

/// One message in a generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Errors from generative model calls.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model service unavailable: {0}")]
    Unavailable(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("operation cancelled")]
    Cancelled,
}

pub type LlmResult<T> = Result<T, LlmError>;

/// Client trait for text generation.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tier: ModelTier,
        cancel: &CancellationToken,
    ) -> LlmResult<String>;
}

/// Mock client for testing — returns preconfigured responses keyed by tier.
pub struct MockLlm {
    responses: HashMap<ModelTier, String>,
    default: Option<String>,
    unavailable: bool,
}

impl MockLlm {
    /// A client answering every request with the same text.
    pub fn with_default(response: impl Into<String>) -> Self {
        Self {
            responses: HashMap::new(),
            default: Some(response.into()),
            unavailable: false,
        }
    }

    /// A client that reports the model service as unreachable.
    pub fn unavailable() -> Self {
        Self {
            responses: HashMap::new(),
            default: None,
            unavailable: true,
        }
    }

    /// Register a response for a specific tier.
    pub fn with_tier_response(mut self, tier: ModelTier, response: impl Into<String>) -> Self {
        self.responses.insert(tier, response.into());
        self
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn generate(
        &self,
        _system: &str,
        _messages: &[ChatMessage],
        tier: ModelTier,
        cancel: &CancellationToken,
    ) -> LlmResult<String> {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        if self.unavailable {
            return Err(LlmError::Unavailable(
                "mock client configured as unavailable".to_string(),
            ));
        }
        self.responses
            .get(&tier)
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| {
                LlmError::Generation(format!("no mock response for tier '{}'", tier.as_str()))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_routes_by_tier() {
        let llm = MockLlm::with_default("fallback")
            .with_tier_response(ModelTier::Small, "[]")
            .with_tier_response(ModelTier::Mid, "an answer");
        let cancel = CancellationToken::new();

        let small = llm
            .generate("s", &[], ModelTier::Small, &cancel)
            .await
            .unwrap();
        let mid = llm.generate("s", &[], ModelTier::Mid, &cancel).await.unwrap();
        let large = llm
            .generate("s", &[], ModelTier::Large, &cancel)
            .await
            .unwrap();
        assert_eq!(small, "[]");
        assert_eq!(mid, "an answer");
        assert_eq!(large, "fallback");
    }

    #[tokio::test]
    async fn mock_unavailable_errors() {
        let llm = MockLlm::unavailable();
        let cancel = CancellationToken::new();
        let err = llm
            .generate("s", &[], ModelTier::Mid, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Unavailable(_)));
    }
}
