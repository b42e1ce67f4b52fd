use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::config::GeminiConfig;
use crate::error::{ModelError, ModelResult};

use super::gemini::GeminiModel;
use super::mock::MockModel;
use super::types::{LanguageModel, ModelInfo};

/// Creates and caches language-model clients by name.
///
/// `create` returns the cached instance when one exists; otherwise it
/// constructs, caches and returns a new client. A fallback name can be
/// supplied for the case where the primary fails to construct.
pub struct ModelFactory {
    gemini_config: GeminiConfig,
    cache: RwLock<HashMap<String, Arc<dyn LanguageModel>>>,
}

impl ModelFactory {
    /// Create a factory carrying the provider configuration.
    pub fn new(gemini_config: GeminiConfig) -> Self {
        Self {
            gemini_config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached client for `name` or construct one.
    pub fn create(&self, name: &str) -> ModelResult<Arc<dyn LanguageModel>> {
        if let Some(cached) = self.cache.read().unwrap().get(name) {
            return Ok(Arc::clone(cached));
        }

        let model = self.construct(name)?;
        self.cache
            .write()
            .unwrap()
            .insert(name.to_string(), Arc::clone(&model));
        info!(model = name, "language model constructed");
        Ok(model)
    }

    /// Return the primary model, or the fallback when the primary fails to
    /// construct and the fallback is distinct and non-empty. When both
    /// fail, the error reports both names.
    pub fn create_with_fallback(
        &self,
        primary: &str,
        fallback: &str,
    ) -> ModelResult<Arc<dyn LanguageModel>> {
        let primary_err = match self.create(primary) {
            Ok(model) => return Ok(model),
            Err(e) => e,
        };

        if !fallback.is_empty() && fallback != primary {
            warn!(
                primary,
                fallback,
                error = %primary_err,
                "primary model failed, trying fallback"
            );
            if let Ok(model) = self.create(fallback) {
                return Ok(model);
            }
        }

        Err(ModelError::config(format!(
            "failed to create model: primary={} ({}), fallback={}",
            primary, primary_err, fallback
        )))
    }

    /// Model metadata without duplicate construction: served from the
    /// cache when present, otherwise the model is instantiated and cached.
    pub fn get_info(&self, name: &str) -> ModelResult<ModelInfo> {
        if let Some(cached) = self.cache.read().unwrap().get(name) {
            return Ok(cached.info());
        }
        Ok(self.create(name)?.info())
    }

    /// Evict every cached client.
    pub fn clear_cache(&self) {
        self.cache.write().unwrap().clear();
    }

    /// Evict one cached client.
    pub fn clear_cache_entry(&self, name: &str) {
        self.cache.write().unwrap().remove(name);
    }

    /// Names `create` accepts.
    pub fn supported_models() -> &'static [&'static str] {
        &["gemini", "gpt-4", "gpt4", "deepseek", "mock"]
    }

    /// Whether `create` accepts the given name.
    pub fn is_supported(name: &str) -> bool {
        Self::supported_models().contains(&name)
    }

    fn construct(&self, name: &str) -> ModelResult<Arc<dyn LanguageModel>> {
        match name {
            "gemini" => Ok(Arc::new(GeminiModel::new(self.gemini_config.clone())?)),
            // GPT-4 and DeepSeek clients are not wired up yet; a canned
            // mock keeps the fallback path exercisable.
            "gpt-4" | "gpt4" => {
                let mock = MockModel::new();
                mock.set_response(r#"{"model": "gpt-4", "status": "mock"}"#);
                Ok(Arc::new(mock))
            }
            "deepseek" => {
                let mock = MockModel::new();
                mock.set_response(r#"{"model": "deepseek", "status": "mock"}"#);
                Ok(Arc::new(mock))
            }
            "mock" => Ok(Arc::new(MockModel::new())),
            other => Err(ModelError::config(format!("unsupported model: {}", other))),
        }
    }
}
