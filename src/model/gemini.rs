use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::GeminiConfig;
use crate::error::{ModelError, ModelResult};

use super::types::{LanguageModel, ModelInfo};

const RESPONSE_CACHE_CAPACITY: usize = 100;

/// Google Gemini client.
///
/// Speaks JSON to the generateContent endpoint. Identical prompt pairs are
/// served from a small bounded response cache so a retried cycle does not
/// pay for the same completion twice.
#[derive(Debug)]
pub struct GeminiModel {
    config: GeminiConfig,
    client: Client,
    cache: Mutex<HashMap<u64, String>>,
    call_count: Mutex<u64>,
    error_count: Mutex<u64>,
    cache_hits: Mutex<u64>,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(rename = "topP")]
    top_p: f64,
    #[serde(rename = "topK")]
    top_k: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    error: Option<GeminiApiError>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
    #[serde(rename = "finishReason")]
    #[serde(default)]
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiApiError {
    code: u16,
    message: String,
}

impl GeminiModel {
    /// Construct a client from validated configuration.
    pub fn new(config: GeminiConfig) -> ModelResult<Self> {
        if !config.enabled {
            return Err(ModelError::config("Gemini is not enabled"));
        }
        if config.api_key.is_empty() {
            return Err(ModelError::config("Gemini API key is empty"));
        }
        if config.api_url.is_empty() {
            return Err(ModelError::config("Gemini API URL is empty"));
        }
        if config.model.is_empty() {
            return Err(ModelError::config("Gemini model name is empty"));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ModelError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            cache: Mutex::new(HashMap::new()),
            call_count: Mutex::new(0),
            error_count: Mutex::new(0),
            cache_hits: Mutex::new(0),
        })
    }

    fn api_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_url.trim_end_matches('/'),
            self.config.model
        )
    }

    fn build_request(&self, system_prompt: &str, user_prompt: &str) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: user_prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
                top_p: self.config.top_p,
                top_k: self.config.top_k,
            },
            system_instruction: if system_prompt.is_empty() {
                None
            } else {
                Some(GeminiContent {
                    role: None,
                    parts: vec![GeminiPart {
                        text: system_prompt.to_string(),
                    }],
                })
            },
        }
    }

    fn cache_key(system_prompt: &str, user_prompt: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        system_prompt.hash(&mut hasher);
        user_prompt.hash(&mut hasher);
        hasher.finish()
    }

    /// Call/error/cache counters, for monitoring.
    pub fn call_metrics(&self) -> (u64, u64, u64) {
        (
            *self.call_count.lock().unwrap(),
            *self.error_count.lock().unwrap(),
            *self.cache_hits.lock().unwrap(),
        )
    }

    /// Drop all cached responses.
    pub fn clear_cache(&self) {
        self.cache.lock().unwrap().clear();
    }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    async fn call(&self, system_prompt: &str, user_prompt: &str) -> ModelResult<String> {
        let key = Self::cache_key(system_prompt, user_prompt);
        if let Some(cached) = self.cache.lock().unwrap().get(&key) {
            *self.cache_hits.lock().unwrap() += 1;
            debug!("gemini response served from cache");
            return Ok(cached.clone());
        }

        *self.call_count.lock().unwrap() += 1;
        let started = Instant::now();

        let request = self.build_request(system_prompt, user_prompt);
        let response = self
            .client
            .post(self.api_url())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                *self.error_count.lock().unwrap() += 1;
                if e.is_timeout() {
                    ModelError::timeout(format!(
                        "gemini call exceeded {}s",
                        self.config.timeout_secs
                    ))
                } else {
                    ModelError::unknown(format!("gemini request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            *self.error_count.lock().unwrap() += 1;
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "gemini API error");
            if status.as_u16() == 429 {
                return Err(ModelError::rate_limit(body));
            }
            return Err(ModelError::api(status.as_u16(), body));
        }

        let parsed: GeminiResponse = response.json().await.map_err(|e| {
            *self.error_count.lock().unwrap() += 1;
            ModelError::unknown(format!("failed to parse gemini response: {}", e))
        })?;

        if let Some(api_error) = parsed.error {
            *self.error_count.lock().unwrap() += 1;
            return Err(ModelError::api(api_error.code, api_error.message));
        }

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| {
                *self.error_count.lock().unwrap() += 1;
                ModelError::unknown("gemini response contained no candidates")
            })?;

        info!(
            model = %self.config.model,
            latency_ms = started.elapsed().as_millis() as u64,
            "gemini call succeeded"
        );

        let mut cache = self.cache.lock().unwrap();
        if cache.len() >= RESPONSE_CACHE_CAPACITY {
            cache.clear();
        }
        cache.insert(key, text.clone());

        Ok(text)
    }

    fn info(&self) -> ModelInfo {
        ModelInfo::new(
            self.config.model.clone(),
            "Google Gemini",
            "v1beta",
            self.config.max_output_tokens,
            1_048_576,
            0.30,
        )
    }

    async fn health(&self) -> ModelResult<()> {
        // A minimal generation doubles as the liveness probe.
        self.call("", "ping").await.map(|_| ())
    }
}
