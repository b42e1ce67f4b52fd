use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Memory store error: {0}")]
    Store(#[from] StoreError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Decision error: {0}")]
    Decision(#[from] DecisionError),

    #[error("Circuit breaker error: {0}")]
    Circuit(#[from] CircuitError),

    #[error("Version error: {0}")]
    Version(#[from] VersionError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Stored-payload version and migration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("cannot migrate from v{from} to v{current}: version too new")]
    TooNew { from: u32, current: u32 },

    #[error("no migration registered for v{from} -> v{}", .from + 1)]
    MissingMigration { from: u32 },

    #[error("migration v{from} -> v{} failed: {message}", .from + 1)]
    MigrationFailed { from: u32, message: String },

    #[error("invalid migration registration for v{from}: {message}")]
    InvalidRegistration { from: u32, message: String },

    #[error("unable to detect payload version")]
    UnknownVersion,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required keys: {keys:?}")]
    MissingKeys { keys: Vec<String> },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Config store error: {message}")]
    Store { message: String },
}

/// Memory store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Memory API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Memory not found: {id}")]
    NotFound { id: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl StoreError {
    /// Whether the failure is worth retrying. Transient failures are the
    /// unit of retry and circuit-breaker accounting.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Api { status, .. } => *status >= 500 || *status == 429,
            StoreError::Timeout { .. } => true,
            StoreError::Http(e) => e.is_timeout() || e.is_connect(),
            StoreError::NotFound { .. }
            | StoreError::InvalidResponse { .. }
            | StoreError::Encode(_)
            | StoreError::Cancelled => false,
        }
    }
}

/// Error code reported by a language-model client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelErrorCode {
    /// The call exceeded its deadline
    Timeout,
    /// The provider returned a non-success HTTP status
    ApiError,
    /// The provider throttled the request
    RateLimit,
    /// The client was constructed or invoked with bad configuration
    BadConfig,
    /// Anything else
    Unknown,
}

impl ModelErrorCode {
    /// String form used in logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelErrorCode::Timeout => "timeout",
            ModelErrorCode::ApiError => "api_error",
            ModelErrorCode::RateLimit => "rate_limit",
            ModelErrorCode::BadConfig => "bad_config",
            ModelErrorCode::Unknown => "unknown",
        }
    }
}

/// Language-model call error with retryability classification
#[derive(Debug, Error)]
#[error("[{}] {message}", .code.as_str())]
pub struct ModelError {
    /// Classified error code
    pub code: ModelErrorCode,
    /// Human-readable description
    pub message: String,
    /// Whether the caller may retry
    pub retryable: bool,
    /// HTTP status, when the provider answered
    pub http_status: Option<u16>,
}

impl ModelError {
    /// Timeout error, always retryable.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            code: ModelErrorCode::Timeout,
            message: message.into(),
            retryable: true,
            http_status: Some(408),
        }
    }

    /// API error; retryable iff the status is a server error or 429.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self {
            code: ModelErrorCode::ApiError,
            message: message.into(),
            retryable: status >= 500 || status == 429,
            http_status: Some(status),
        }
    }

    /// Rate-limit error, retryable with backoff.
    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self {
            code: ModelErrorCode::RateLimit,
            message: message.into(),
            retryable: true,
            http_status: Some(429),
        }
    }

    /// Configuration error, never retried.
    pub fn config(message: impl Into<String>) -> Self {
        Self {
            code: ModelErrorCode::BadConfig,
            message: message.into(),
            retryable: false,
            http_status: None,
        }
    }

    /// Unclassified error.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            code: ModelErrorCode::Unknown,
            message: message.into(),
            retryable: false,
            http_status: None,
        }
    }
}

/// Circuit breaker errors
#[derive(Debug, Error)]
pub enum CircuitError {
    #[error("circuit breaker open (retry in {remaining_secs}s)")]
    Open { remaining_secs: i64 },

    #[error("protected call failed: {message}")]
    CallFailed { message: String },
}

/// Decision pipeline errors
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("No market data available for analysis")]
    NoMarketData,

    #[error("Model call failed: {0}")]
    ModelCall(#[from] ModelError),

    #[error("Model call blocked: circuit breaker open (retry in {remaining_secs}s)")]
    CircuitOpen { remaining_secs: i64 },

    #[error("AI provider reports insufficient balance: {message}")]
    InsufficientBalance { message: String },

    #[error("Failed to parse model response: {message}")]
    Parse { message: String },

    #[error("Decision validation failed: {message}")]
    Validation { message: String },
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type alias for memory store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// Result type alias for decision-cycle operations
pub type DecisionResult<T> = Result<T, DecisionError>;
