use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

use super::store::MemoryStore;
use super::types::{
    FilterOperator, Memory, MemoryStats, MemoryStatus, MemoryType, Query, QueryFilter,
    Relationship, SaveOptions,
};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP implementation of [`MemoryStore`] speaking JSON to the memory API.
///
/// Requests carry a bearer token plus `user_id` / `org_id` tenancy fields.
/// The underlying client keeps a connection pool with idle reuse and a 30 s
/// default timeout.
#[derive(Clone)]
pub struct HttpMemoryStore {
    client: Client,
    endpoint: String,
    api_key: String,
    user_id: String,
    org_id: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<Memory>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SaveResponse {
    id: String,
    #[serde(default)]
    #[allow(dead_code)]
    error: Option<String>,
}

impl HttpMemoryStore {
    /// Create a store client for the given endpoint and tenant.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        user_id: impl Into<String>,
        org_id: impl Into<String>,
    ) -> StoreResult<Self> {
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(StoreError::Http)?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            user_id: user_id.into(),
            org_id: org_id.into(),
            timeout,
        })
    }

    /// The configured endpoint (for tests).
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn map_send_error(&self, e: reqwest::Error) -> StoreError {
        if e.is_timeout() {
            StoreError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            StoreError::Http(e)
        }
    }

    fn error_from_status(&self, status: StatusCode, body: String) -> StoreError {
        StoreError::Api {
            status: status.as_u16(),
            message: body,
        }
    }
}

#[async_trait]
impl MemoryStore for HttpMemoryStore {
    async fn search(&self, query: Query) -> StoreResult<Vec<Memory>> {
        let started = Instant::now();
        let url = format!("{}/memories/search", self.endpoint);

        let body = serde_json::json!({
            "type": query.query_type,
            "context": query.context,
            "filters": query.filters,
            "limit": query.limit,
            "offset": query.offset,
            "similarity": query.similarity_threshold,
            "user_id": self.user_id,
            "org_id": self.org_id,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.error_from_status(status, text));
        }

        let result: SearchResponse =
            response
                .json()
                .await
                .map_err(|e| StoreError::InvalidResponse {
                    message: format!("failed to parse search response: {}", e),
                })?;

        if let Some(err) = result.error {
            return Err(StoreError::InvalidResponse { message: err });
        }

        debug!(
            results = result.data.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "memory search completed"
        );

        Ok(result.data)
    }

    async fn save(&self, memory: Memory, _opts: Option<SaveOptions>) -> StoreResult<String> {
        let started = Instant::now();
        let url = format!("{}/memories", self.endpoint);

        let mut body = serde_json::json!({
            "id": memory.id,
            "content": memory.content,
            "type": memory.memory_type,
            "status": memory.status,
            "metadata": memory.metadata,
            "quality_score": memory.quality_score,
            "user_id": self.user_id,
            "org_id": self.org_id,
        });
        if let Some(reflection_id) = &memory.reflection_id {
            body["reflection_id"] = serde_json::json!(reflection_id);
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            let text = response.text().await.unwrap_or_default();
            return Err(self.error_from_status(status, text));
        }

        let result: SaveResponse =
            response
                .json()
                .await
                .map_err(|e| StoreError::InvalidResponse {
                    message: format!("failed to parse save response: {}", e),
                })?;

        info!(
            id = %result.id,
            latency_ms = started.elapsed().as_millis() as u64,
            "memory saved"
        );

        Ok(result.id)
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let url = format!("{}/memories/{}", self.endpoint, id);

        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        if status != StatusCode::OK && status != StatusCode::NO_CONTENT {
            let text = response.text().await.unwrap_or_default();
            return Err(self.error_from_status(status, text));
        }

        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Memory> {
        let url = format!("{}/memories/{}", self.endpoint, id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.error_from_status(status, text));
        }

        response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse {
                message: format!("failed to parse memory: {}", e),
            })
    }

    async fn update_status(&self, id: &str, status: MemoryStatus) -> StoreResult<()> {
        let url = format!("{}/memories/{}", self.endpoint, id);

        let response = self
            .client
            .patch(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let http_status = response.status();
        if http_status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        if !http_status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.error_from_status(http_status, text));
        }

        Ok(())
    }

    async fn save_batch(
        &self,
        memories: Vec<Memory>,
        opts: Option<SaveOptions>,
    ) -> StoreResult<Vec<String>> {
        let mut ids = Vec::with_capacity(memories.len());
        for memory in memories {
            let memory_id = memory.id.clone();
            match self.save(memory, opts.clone()).await {
                Ok(id) => ids.push(id),
                Err(e) => {
                    warn!(id = %memory_id, error = %e, "batch save entry failed");
                }
            }
        }
        Ok(ids)
    }

    async fn get_by_ids(&self, ids: &[String]) -> StoreResult<Vec<Memory>> {
        let mut memories = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_by_id(id).await {
                Ok(memory) => memories.push(memory),
                Err(StoreError::NotFound { .. }) => {
                    warn!(id = %id, "memory missing during batch fetch");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(memories)
    }

    async fn search_by_type(
        &self,
        memory_type: MemoryType,
        limit: usize,
    ) -> StoreResult<Vec<Memory>> {
        let query = Query::direct(
            vec![QueryFilter::new(
                "type",
                FilterOperator::Eq,
                serde_json::json!(memory_type.as_str()),
            )],
            limit,
        );
        self.search(query).await
    }

    async fn search_similar(&self, id: &str, limit: usize) -> StoreResult<Vec<Memory>> {
        let memory = self.get_by_id(id).await?;

        let query = Query {
            query_type: super::types::QueryType::SemanticSearch,
            context: Some(memory.metadata),
            limit,
            similarity_threshold: 0.7,
            ..Default::default()
        };
        self.search(query).await
    }

    async fn get_relationships(&self, id: &str) -> StoreResult<Vec<Relationship>> {
        let memory = self.get_by_id(id).await?;
        Ok(memory.relationships)
    }

    async fn get_stats(&self) -> StoreResult<MemoryStats> {
        let url = format!("{}/memories/stats", self.endpoint);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.error_from_status(status, text));
        }

        response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse {
                message: format!("failed to parse stats: {}", e),
            })
    }

    async fn delete_by_type(&self, memory_type: MemoryType) -> StoreResult<()> {
        let memories = self.search_by_type(memory_type, 1000).await?;
        for memory in memories {
            if let Err(e) = self.delete(&memory.id).await {
                warn!(id = %memory.id, error = %e, "delete by type entry failed");
            }
        }
        Ok(())
    }

    async fn delete_low_quality(&self, threshold: f64) -> StoreResult<i64> {
        let query = Query::graph(
            vec![QueryFilter::new(
                "quality_score",
                FilterOperator::Lt,
                serde_json::json!(threshold),
            )],
            10_000,
        );
        let memories = self.search(query).await?;

        let mut deleted = 0i64;
        for memory in memories {
            match self.delete(&memory.id).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    warn!(id = %memory.id, error = %e, "low-quality delete failed");
                }
            }
        }

        info!(deleted, threshold, "low-quality purge completed");
        Ok(deleted)
    }

    async fn health(&self) -> StoreResult<()> {
        let url = format!("{}/health", self.endpoint);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Api {
                status: status.as_u16(),
                message: "memory service unhealthy".to_string(),
            });
        }

        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        // reqwest pools are dropped with the client; nothing to tear down.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        let store = HttpMemoryStore::new("https://api.mem0.ai/v1/", "key", "u-1", "org-1").unwrap();
        assert_eq!(store.endpoint(), "https://api.mem0.ai/v1");
    }

    #[test]
    fn test_client_creation() {
        let store = HttpMemoryStore::new("https://api.mem0.ai/v1", "key", "u-1", "org-1");
        assert!(store.is_ok());
    }
}
