use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{ModelError, ModelResult};

use super::types::{LanguageModel, ModelInfo};

/// One recorded mock invocation
#[derive(Debug, Clone)]
pub struct MockCallRecord {
    /// When the call happened
    pub timestamp: DateTime<Utc>,
    /// System prompt as received
    pub system_prompt: String,
    /// User prompt as received
    pub user_prompt: String,
    /// Response returned, when the call succeeded
    pub response: Option<String>,
    /// Error message, when the call failed
    pub error: Option<String>,
}

#[derive(Debug)]
struct MockState {
    response: String,
    error: Option<ModelErrorSpec>,
    healthy: bool,
    call_count: u64,
    history: Vec<MockCallRecord>,
}

#[derive(Debug, Clone)]
struct ModelErrorSpec {
    status: u16,
    message: String,
}

/// Configurable test double for [`LanguageModel`].
///
/// Returns a canned response (or error) with an optional simulated latency
/// and records every invocation for assertions.
#[derive(Debug)]
pub struct MockModel {
    state: Mutex<MockState>,
    latency: Duration,
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockModel {
    /// Create a mock returning an empty decision list.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                response: "wait for clearer signals\n[]".to_string(),
                error: None,
                healthy: true,
                call_count: 0,
                history: Vec::new(),
            }),
            latency: Duration::ZERO,
        }
    }

    /// Set the canned response.
    pub fn set_response(&self, response: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state.response = response.into();
        state.error = None;
    }

    /// Make subsequent calls fail with the given API status and message.
    pub fn set_error(&self, status: u16, message: impl Into<String>) {
        self.state.lock().unwrap().error = Some(ModelErrorSpec {
            status,
            message: message.into(),
        });
    }

    /// Clear a previously set error.
    pub fn clear_error(&self) {
        self.state.lock().unwrap().error = None;
    }

    /// Control the health-check result.
    pub fn set_healthy(&self, healthy: bool) {
        self.state.lock().unwrap().healthy = healthy;
    }

    /// Simulated per-call latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of calls made.
    pub fn call_count(&self) -> u64 {
        self.state.lock().unwrap().call_count
    }

    /// Copy of the invocation history.
    pub fn history(&self) -> Vec<MockCallRecord> {
        self.state.lock().unwrap().history.clone()
    }

    /// The most recent prompts, if any call was made.
    pub fn last_prompts(&self) -> Option<(String, String)> {
        self.state
            .lock()
            .unwrap()
            .history
            .last()
            .map(|r| (r.system_prompt.clone(), r.user_prompt.clone()))
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    async fn call(&self, system_prompt: &str, user_prompt: &str) -> ModelResult<String> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state.lock().unwrap();
        state.call_count += 1;

        let mut record = MockCallRecord {
            timestamp: Utc::now(),
            system_prompt: system_prompt.to_string(),
            user_prompt: user_prompt.to_string(),
            response: None,
            error: None,
        };

        if let Some(spec) = state.error.clone() {
            record.error = Some(spec.message.clone());
            state.history.push(record);
            return Err(ModelError::api(spec.status, spec.message));
        }

        let response = state.response.clone();
        record.response = Some(response.clone());
        state.history.push(record);
        Ok(response)
    }

    fn info(&self) -> ModelInfo {
        ModelInfo::new("mock", "Mock", "v0", 4096, 32_768, 0.0)
    }

    async fn health(&self) -> ModelResult<()> {
        if self.state.lock().unwrap().healthy {
            Ok(())
        } else {
            Err(ModelError::api(503, "mock is unhealthy"))
        }
    }
}
