use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ModelResult;

/// Capability set the decision engine needs from any language model.
///
/// Implementations exist for Gemini and a configurable mock; the engine is
/// polymorphic over this trait so providers can be swapped at runtime.
#[async_trait]
pub trait LanguageModel: Send + Sync + std::fmt::Debug {
    /// Generate a completion for the given system and user prompts.
    async fn call(&self, system_prompt: &str, user_prompt: &str) -> ModelResult<String>;

    /// Metadata about the model, for logs, monitoring and fallback choice.
    fn info(&self) -> ModelInfo;

    /// Liveness check against the provider.
    async fn health(&self) -> ModelResult<()>;
}

/// Model metadata
#[derive(Debug, Clone)]
pub struct ModelInfo {
    /// Model name, e.g. `gemini-2.5-flash`
    pub name: String,
    /// Provider name, e.g. `Google Gemini`
    pub provider: String,
    /// API version, e.g. `v1beta`
    pub version: String,
    /// Maximum output tokens per call
    pub max_tokens: u32,
    /// Context window (input + output)
    pub context_window: u32,
    /// Cost in USD per million tokens
    pub cost_per_m_tok: f64,
    /// When the client was constructed
    pub loaded_at: DateTime<Utc>,
}

impl ModelInfo {
    /// Construct metadata stamped with the current time.
    pub fn new(
        name: impl Into<String>,
        provider: impl Into<String>,
        version: impl Into<String>,
        max_tokens: u32,
        context_window: u32,
        cost_per_m_tok: f64,
    ) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            version: version.into(),
            max_tokens,
            context_window,
            cost_per_m_tok,
            loaded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_info_new() {
        let info = ModelInfo::new("gemini-2.5-flash", "Google Gemini", "v1beta", 8192, 1_000_000, 0.3);
        assert_eq!(info.name, "gemini-2.5-flash");
        assert_eq!(info.context_window, 1_000_000);
        assert!(info.loaded_at <= Utc::now());
    }
}
