use std::env;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{ConfigError, ConfigResult};

/// Flat key/value configuration backend.
///
/// Keys are namespaced strings (`mem0_*`, `gemini_*`, ...); values are
/// strings parsed by the typed loaders. Environment variables override the
/// store for secrets.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read a value, `None` when the key is absent.
    async fn get(&self, key: &str) -> ConfigResult<Option<String>>;

    /// Write a value.
    async fn set(&self, key: &str, value: &str) -> ConfigResult<()>;
}

/// In-process [`ConfigStore`] for tests and local runs.
#[derive(Default)]
pub struct InMemoryConfigStore {
    values: std::sync::RwLock<std::collections::HashMap<String, String>>,
}

impl InMemoryConfigStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated from key/value pairs.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let store = Self::new();
        {
            let mut values = store.values.write().unwrap();
            for (key, value) in pairs {
                values.insert((*key).to_string(), (*value).to_string());
            }
        }
        store
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn get(&self, key: &str) -> ConfigResult<Option<String>> {
        Ok(self.values.read().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> ConfigResult<()> {
        self.values
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Memory-subsystem configuration (`mem0_*` keys)
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Master switch; when false no other key is required
    pub enabled: bool,
    /// Memory API bearer token
    pub api_key: String,
    /// Memory API base URL
    pub api_url: String,
    /// Tenancy: user id
    pub user_id: String,
    /// Tenancy: organization id
    pub org_id: String,
    /// Primary model name for understanding calls
    pub understanding_model: String,
    /// Fallback model name when the primary fails to construct
    pub fallback_model: String,
    /// Model name used for memory summarization
    pub model: String,
    /// Sampling temperature in [0,1]
    pub temperature: f64,
    /// Per-call output token cap
    pub max_tokens: u32,
    /// Retained-memory token budget
    pub memory_limit: u32,
    /// Embedding dimension
    pub vector_dim: u32,
    /// Retrieval similarity floor in [0,1]
    pub similarity_threshold: f64,
    /// Warm-cache TTL in minutes
    pub cache_ttl_minutes: u32,
    /// Warm-up cadence in minutes
    pub warmup_interval_minutes: u32,
    /// Whether the cache warmer runs
    pub warmup_enabled: bool,
    /// Whether the circuit breaker wraps store calls
    pub circuit_breaker_enabled: bool,
    /// Consecutive failures before the breaker opens
    pub circuit_breaker_threshold: u32,
    /// Seconds the breaker stays open before probing
    pub circuit_breaker_timeout_secs: u64,
    /// Whether retrieval results are compressed
    pub context_compression_enabled: bool,
    /// Token budget for compressed retrieval context
    pub max_prompt_tokens: u32,
    /// Whether low-quality memories are filtered at retrieval
    pub quality_filter_enabled: bool,
    /// Quality floor for the retrieval filter
    pub quality_score_threshold: f64,
    /// Whether reflection memories are generated
    pub reflection_enabled: bool,
    /// Whether reflection status transitions are tracked
    pub reflection_status_tracking: bool,
    /// Days to wait before scoring an outcome
    pub evaluation_delay_days: u32,
    /// Whether the metrics collector runs
    pub metrics_enabled: bool,
    /// Metrics aggregation cadence in minutes
    pub metrics_interval_minutes: u32,
    /// Verbose per-memory logging
    pub verbose_logging: bool,
    /// Share of traffic routed to the memory-augmented path, 0-100
    pub rollout_percentage: u8,
    /// Whether elevated error rates roll the rollout back automatically
    pub auto_rollback_enabled: bool,
    /// Error-rate threshold (percent) for auto rollback
    pub error_rate_threshold: f64,
    /// Latency threshold (ms) for auto rollback
    pub latency_threshold_ms: u64,
    /// Whether the A/B framework is active
    pub ab_test_enabled: bool,
    /// Share of traffic held as control, 0-100
    pub ab_test_control_percentage: u8,
    /// A/B test duration in days
    pub ab_test_duration_days: u32,
}

impl MemoryConfig {
    /// Load from the config store, applying documented defaults and the
    /// `MEM0_API_KEY` environment override.
    ///
    /// When `mem0_enabled` is false the remaining keys are not required and
    /// the defaults are returned. When enabled, missing credentials fail
    /// with the full list of absent keys.
    pub async fn load(store: &dyn ConfigStore) -> ConfigResult<Self> {
        let _ = dotenvy::dotenv();

        let enabled = parse_bool(store.get("mem0_enabled").await?, false);
        let mut config = Self::defaults(enabled);

        if !enabled {
            info!("memory integration disabled (mem0_enabled=false)");
            return Ok(config);
        }

        let mut missing = Vec::new();

        config.api_key = env::var("MEM0_API_KEY")
            .ok()
            .or(store.get("mem0_api_key").await?)
            .unwrap_or_default();
        if config.api_key.is_empty() {
            missing.push("mem0_api_key".to_string());
        }

        config.user_id = store.get("mem0_user_id").await?.unwrap_or_default();
        if config.user_id.is_empty() {
            missing.push("mem0_user_id".to_string());
        }

        config.org_id = store
            .get("mem0_organization_id")
            .await?
            .unwrap_or_default();
        if config.org_id.is_empty() {
            missing.push("mem0_organization_id".to_string());
        }

        if !missing.is_empty() {
            return Err(ConfigError::MissingKeys { keys: missing });
        }

        if let Some(url) = store.get("mem0_api_url").await? {
            if !url.is_empty() {
                config.api_url = url;
            }
        }

        if let Some(model) = store.get("mem0_understanding_model").await? {
            if !model.is_empty() {
                config.understanding_model = model;
            }
        }
        if let Some(model) = store.get("mem0_fallback_model").await? {
            if !model.is_empty() {
                config.fallback_model = model;
            }
        }
        if let Some(model) = store.get("mem0_model").await? {
            if !model.is_empty() {
                config.model = model;
            }
        }

        config.temperature = parse_f64_in_range(
            store.get("mem0_temperature").await?,
            config.temperature,
            0.0,
            1.0,
        );
        config.max_tokens =
            parse_u32_positive(store.get("mem0_max_tokens").await?, config.max_tokens);
        config.memory_limit =
            parse_u32_positive(store.get("mem0_memory_limit").await?, config.memory_limit);
        config.vector_dim =
            parse_u32_positive(store.get("mem0_vector_dim").await?, config.vector_dim);
        config.similarity_threshold = parse_f64_in_range(
            store.get("mem0_similarity_threshold").await?,
            config.similarity_threshold,
            0.0,
            1.0,
        );

        config.cache_ttl_minutes = parse_u32_positive(
            store.get("mem0_cache_ttl_minutes").await?,
            config.cache_ttl_minutes,
        );
        config.warmup_interval_minutes = parse_u32_positive(
            store.get("mem0_warmup_interval_minutes").await?,
            config.warmup_interval_minutes,
        );
        config.warmup_enabled = parse_bool(store.get("mem0_warmup_enabled").await?, false);

        config.circuit_breaker_enabled =
            parse_bool(store.get("mem0_circuit_breaker_enabled").await?, true);
        config.circuit_breaker_threshold = parse_u32_positive(
            store.get("mem0_circuit_breaker_threshold").await?,
            config.circuit_breaker_threshold,
        );
        config.circuit_breaker_timeout_secs = parse_u64_positive(
            store.get("mem0_circuit_breaker_timeout_seconds").await?,
            config.circuit_breaker_timeout_secs,
        );

        config.context_compression_enabled =
            parse_bool(store.get("mem0_context_compression_enabled").await?, true);
        config.max_prompt_tokens = parse_u32_positive(
            store.get("mem0_max_prompt_tokens").await?,
            config.max_prompt_tokens,
        );
        config.quality_filter_enabled =
            parse_bool(store.get("mem0_quality_filter_enabled").await?, true);
        config.quality_score_threshold = parse_f64_in_range(
            store.get("mem0_quality_score_threshold").await?,
            config.quality_score_threshold,
            0.0,
            1.0,
        );

        config.reflection_enabled = parse_bool(store.get("mem0_reflection_enabled").await?, true);
        config.reflection_status_tracking =
            parse_bool(store.get("mem0_reflection_status_tracking").await?, true);
        config.evaluation_delay_days = parse_u32_positive(
            store.get("mem0_evaluation_delay_days").await?,
            config.evaluation_delay_days,
        );

        config.metrics_enabled = parse_bool(store.get("mem0_metrics_enabled").await?, true);
        config.metrics_interval_minutes = parse_u32_positive(
            store.get("mem0_metrics_interval_minutes").await?,
            config.metrics_interval_minutes,
        );
        config.verbose_logging = parse_bool(store.get("mem0_verbose_logging").await?, false);

        config.rollout_percentage = parse_f64_in_range(
            store.get("mem0_rollout_percentage").await?,
            config.rollout_percentage as f64,
            0.0,
            100.0,
        ) as u8;
        config.auto_rollback_enabled =
            parse_bool(store.get("mem0_auto_rollback_enabled").await?, true);
        config.error_rate_threshold = parse_f64_positive(
            store.get("mem0_error_rate_threshold").await?,
            config.error_rate_threshold,
        );
        config.latency_threshold_ms = parse_u64_positive(
            store.get("mem0_latency_threshold_ms").await?,
            config.latency_threshold_ms,
        );

        config.ab_test_enabled = parse_bool(store.get("mem0_ab_test_enabled").await?, false);
        config.ab_test_control_percentage = parse_f64_in_range(
            store.get("mem0_ab_test_control_percentage").await?,
            config.ab_test_control_percentage as f64,
            0.0,
            100.0,
        ) as u8;
        config.ab_test_duration_days = parse_u32_positive(
            store.get("mem0_ab_test_duration_days").await?,
            config.ab_test_duration_days,
        );

        info!(
            api_url = %config.api_url,
            user_id = %mask_secret(&config.user_id),
            model = %config.understanding_model,
            fallback = %config.fallback_model,
            cache_ttl_minutes = config.cache_ttl_minutes,
            rollout = config.rollout_percentage,
            "memory configuration loaded"
        );

        Ok(config)
    }

    fn defaults(enabled: bool) -> Self {
        Self {
            enabled,
            api_key: String::new(),
            api_url: "https://api.mem0.ai/v1".to_string(),
            user_id: String::new(),
            org_id: String::new(),
            understanding_model: "gemini".to_string(),
            fallback_model: "gpt-4".to_string(),
            model: "gpt-4".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            memory_limit: 8000,
            vector_dim: 1536,
            similarity_threshold: 0.6,
            cache_ttl_minutes: 30,
            warmup_interval_minutes: 5,
            warmup_enabled: false,
            circuit_breaker_enabled: true,
            circuit_breaker_threshold: 3,
            circuit_breaker_timeout_secs: 300,
            context_compression_enabled: true,
            max_prompt_tokens: 2500,
            quality_filter_enabled: true,
            quality_score_threshold: 0.3,
            reflection_enabled: true,
            reflection_status_tracking: true,
            evaluation_delay_days: 3,
            metrics_enabled: true,
            metrics_interval_minutes: 1,
            verbose_logging: false,
            rollout_percentage: 0,
            auto_rollback_enabled: true,
            error_rate_threshold: 5.0,
            latency_threshold_ms: 2000,
            ab_test_enabled: false,
            ab_test_control_percentage: 50,
            ab_test_duration_days: 7,
        }
    }

    /// Range and consistency checks beyond per-key parsing.
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidValue {
                key: "mem0_temperature".to_string(),
                message: format!("{} outside [0,1]", self.temperature),
            });
        }
        if self.rollout_percentage > 100 {
            return Err(ConfigError::InvalidValue {
                key: "mem0_rollout_percentage".to_string(),
                message: format!("{} outside [0,100]", self.rollout_percentage),
            });
        }
        if self.circuit_breaker_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "mem0_circuit_breaker_timeout_seconds".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Gemini model configuration (`gemini_*` keys)
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// Whether the Gemini client may be constructed
    pub enabled: bool,
    /// API key; the `GEMINI_API_KEY` environment variable wins over the store
    pub api_key: String,
    /// Endpoint base URL
    pub api_url: String,
    /// Model name, e.g. `gemini-2.5-flash`
    pub model: String,
    /// Sampling temperature in [0,1]
    pub temperature: f64,
    /// Output token cap
    pub max_output_tokens: u32,
    /// Nucleus sampling parameter in [0,1]
    pub top_p: f64,
    /// Top-k sampling parameter
    pub top_k: u32,
    /// Per-call timeout in seconds
    pub timeout_secs: u64,
}

impl GeminiConfig {
    /// Load from the config store with the `GEMINI_API_KEY` env override.
    pub async fn load(store: &dyn ConfigStore) -> ConfigResult<Self> {
        let _ = dotenvy::dotenv();

        let enabled = parse_bool(store.get("gemini_enabled").await?, false);

        let api_key = env::var("GEMINI_API_KEY")
            .ok()
            .or(store.get("gemini_api_key").await?)
            .unwrap_or_default();

        let config = Self {
            enabled,
            api_key,
            api_url: store
                .get("gemini_api_url")
                .await?
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| {
                    "https://generativelanguage.googleapis.com/v1beta".to_string()
                }),
            model: store
                .get("gemini_model")
                .await?
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "gemini-2.5-flash".to_string()),
            temperature: parse_f64_in_range(store.get("gemini_temperature").await?, 0.7, 0.0, 1.0),
            max_output_tokens: parse_u32_positive(
                store.get("gemini_max_output_tokens").await?,
                8192,
            ),
            top_p: parse_f64_in_range(store.get("gemini_top_p").await?, 0.95, 0.0, 1.0),
            top_k: parse_u32_positive(store.get("gemini_top_k").await?, 40),
            timeout_secs: parse_u64_positive(store.get("gemini_timeout_seconds").await?, 120),
        };

        Ok(config)
    }

    /// Validate mandatory fields when enabled.
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.api_key.is_empty() {
            return Err(ConfigError::MissingKeys {
                keys: vec!["gemini_api_key".to_string()],
            });
        }
        if self.model.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "gemini_model".to_string(),
                message: "model name is empty".to_string(),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "gemini_timeout_seconds".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Parse a boolean: true/1/yes/on and false/0/no/off, any case.
pub fn parse_bool(value: Option<String>, default: bool) -> bool {
    match value {
        Some(v) => match v.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            other => {
                warn!(value = other, "unparseable boolean, using default");
                default
            }
        },
        None => default,
    }
}

fn parse_u32_positive(value: Option<String>, default: u32) -> u32 {
    value
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn parse_u64_positive(value: Option<String>, default: u64) -> u64 {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn parse_f64_positive(value: Option<String>, default: f64) -> f64 {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| *v > 0.0)
        .unwrap_or(default)
}

fn parse_f64_in_range(value: Option<String>, default: f64, min: f64, max: f64) -> f64 {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| (min..=max).contains(v))
        .unwrap_or(default)
}

/// Mask a sensitive value, keeping only the last four characters.
pub fn mask_secret(value: &str) -> String {
    if value.len() <= 4 {
        return "****".to_string();
    }
    let visible = &value[value.len() - 4..];
    format!("{}{}", "*".repeat(value.len() - 4), visible)
}
