use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};

use super::store::MemoryStore;
use super::types::{
    FilterOperator, Memory, MemoryStats, MemoryStatus, MemoryType, Query, QueryFilter,
    Relationship, SaveOptions,
};

/// In-process [`MemoryStore`] backed by a `HashMap` behind a read/write lock.
///
/// Evaluates query filters locally against memory fields and metadata. Used
/// in tests and as the local-run backend; semantics match the HTTP store.
#[derive(Default)]
pub struct InMemoryStore {
    memories: RwLock<HashMap<String, Memory>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored memories (for tests).
    pub async fn len(&self) -> usize {
        self.memories.read().await.len()
    }

    /// Whether the store holds no memories.
    pub async fn is_empty(&self) -> bool {
        self.memories.read().await.is_empty()
    }

    fn field_value(memory: &Memory, field: &str) -> Option<serde_json::Value> {
        match field {
            "id" => Some(serde_json::json!(memory.id)),
            "type" => Some(serde_json::json!(memory.memory_type.as_str())),
            "status" => Some(serde_json::json!(memory.status.as_str())),
            "quality_score" => Some(serde_json::json!(memory.quality_score)),
            "similarity" => Some(serde_json::json!(memory.similarity)),
            "content" => Some(serde_json::json!(memory.content)),
            other => memory.metadata.get(other).cloned(),
        }
    }

    fn matches_filter(memory: &Memory, filter: &QueryFilter) -> bool {
        let Some(actual) = Self::field_value(memory, &filter.field) else {
            return false;
        };

        match filter.operator {
            FilterOperator::Eq => actual == filter.value,
            FilterOperator::Gt => Self::compare_numbers(&actual, &filter.value, |a, b| a > b),
            FilterOperator::Gte => Self::compare_numbers(&actual, &filter.value, |a, b| a >= b),
            FilterOperator::Lt => Self::compare_numbers(&actual, &filter.value, |a, b| a < b),
            FilterOperator::Lte => Self::compare_numbers(&actual, &filter.value, |a, b| a <= b),
            FilterOperator::In => filter
                .value
                .as_array()
                .map(|candidates| candidates.contains(&actual))
                .unwrap_or(false),
            FilterOperator::Contains => match (actual.as_str(), filter.value.as_str()) {
                (Some(haystack), Some(needle)) => haystack.contains(needle),
                _ => false,
            },
        }
    }

    fn compare_numbers(
        actual: &serde_json::Value,
        expected: &serde_json::Value,
        cmp: fn(f64, f64) -> bool,
    ) -> bool {
        match (actual.as_f64(), expected.as_f64()) {
            (Some(a), Some(b)) => cmp(a, b),
            _ => false,
        }
    }

    fn apply_query(memories: &HashMap<String, Memory>, query: &Query) -> Vec<Memory> {
        let mut matched: Vec<Memory> = memories
            .values()
            .filter(|m| query.filters.iter().all(|f| Self::matches_filter(m, f)))
            .filter(|m| m.similarity >= query.similarity_threshold || query.similarity_threshold == 0.0)
            .cloned()
            .collect();

        // Deterministic order: relevance first, then recency.
        matched.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
        });

        let offset = query.offset.min(matched.len());
        let mut page: Vec<Memory> = matched.into_iter().skip(offset).collect();
        if query.limit > 0 {
            page.truncate(query.limit);
        }
        page
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn search(&self, query: Query) -> StoreResult<Vec<Memory>> {
        let memories = self.memories.read().await;
        Ok(Self::apply_query(&memories, &query))
    }

    async fn save(&self, mut memory: Memory, _opts: Option<SaveOptions>) -> StoreResult<String> {
        if memory.id.is_empty() {
            memory.id = uuid::Uuid::new_v4().to_string();
        }
        memory.updated_at = Utc::now();

        let id = memory.id.clone();
        self.memories.write().await.insert(id.clone(), memory);
        Ok(id)
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let removed = self.memories.write().await.remove(id);
        if removed.is_none() {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Memory> {
        self.memories
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    async fn update_status(&self, id: &str, status: MemoryStatus) -> StoreResult<()> {
        let mut memories = self.memories.write().await;
        let memory = memories
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        memory.status = status;
        memory.updated_at = Utc::now();
        Ok(())
    }

    async fn save_batch(
        &self,
        memories: Vec<Memory>,
        opts: Option<SaveOptions>,
    ) -> StoreResult<Vec<String>> {
        let mut ids = Vec::with_capacity(memories.len());
        for memory in memories {
            ids.push(self.save(memory, opts.clone()).await?);
        }
        Ok(ids)
    }

    async fn get_by_ids(&self, ids: &[String]) -> StoreResult<Vec<Memory>> {
        let memories = self.memories.read().await;
        Ok(ids.iter().filter_map(|id| memories.get(id).cloned()).collect())
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
        let reference = self.get_by_id(id).await?;
        let memories = self.memories.read().await;

        let mut similar: Vec<Memory> = memories
            .values()
            .filter(|m| m.id != reference.id && m.memory_type == reference.memory_type)
            .cloned()
            .collect();
        similar.sort_by(|a, b| {
            b.quality_score
                .partial_cmp(&a.quality_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        similar.truncate(limit);
        Ok(similar)
    }

    async fn get_relationships(&self, id: &str) -> StoreResult<Vec<Relationship>> {
        Ok(self.get_by_id(id).await?.relationships)
    }

    async fn get_stats(&self) -> StoreResult<MemoryStats> {
        let memories = self.memories.read().await;

        let mut stats = MemoryStats {
            total_memories: memories.len() as i64,
            last_update_time: Some(Utc::now()),
            ..Default::default()
        };

        let mut quality_sum = 0.0;
        for memory in memories.values() {
            *stats
                .by_type
                .entry(memory.memory_type.as_str().to_string())
                .or_insert(0) += 1;
            stats.total_relationships += memory.relationships.len() as i64;
            quality_sum += memory.quality_score;

            stats.oldest_memory = Some(match stats.oldest_memory {
                Some(oldest) => oldest.min(memory.created_at),
                None => memory.created_at,
            });
            stats.newest_memory = Some(match stats.newest_memory {
                Some(newest) => newest.max(memory.created_at),
                None => memory.created_at,
            });
        }

        if !memories.is_empty() {
            stats.average_quality_score = quality_sum / memories.len() as f64;
        }

        Ok(stats)
    }

    async fn delete_by_type(&self, memory_type: MemoryType) -> StoreResult<()> {
        self.memories
            .write()
            .await
            .retain(|_, m| m.memory_type != memory_type);
        Ok(())
    }

    async fn delete_low_quality(&self, threshold: f64) -> StoreResult<i64> {
        let mut memories = self.memories.write().await;
        let before = memories.len();
        memories.retain(|_, m| m.quality_score >= threshold);
        Ok((before - memories.len()) as i64)
    }

    async fn health(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluated(content: &str, memory_type: MemoryType, quality: f64) -> Memory {
        let mut m = Memory::new(content, memory_type);
        m.status = MemoryStatus::Evaluated;
        m.quality_score = quality;
        m
    }

    #[tokio::test]
    async fn test_save_and_get_round_trip() {
        let store = InMemoryStore::new();
        let memory = Memory::new("ETH long at support", MemoryType::Decision);
        let id = store.save(memory, None).await.unwrap();

        let fetched = store.get_by_id(&id).await.unwrap();
        assert_eq!(fetched.content, "ETH long at support");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.get_by_id("absent").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_status_then_get_returns_new_status() {
        let store = InMemoryStore::new();
        let id = store
            .save(Memory::new("scalped SOL", MemoryType::Decision), None)
            .await
            .unwrap();

        store
            .update_status(&id, MemoryStatus::Applied)
            .await
            .unwrap();
        assert_eq!(
            store.get_by_id(&id).await.unwrap().status,
            MemoryStatus::Applied
        );

        store
            .update_status(&id, MemoryStatus::Evaluated)
            .await
            .unwrap();
        assert_eq!(
            store.get_by_id(&id).await.unwrap().status,
            MemoryStatus::Evaluated
        );
    }

    #[tokio::test]
    async fn test_filter_by_quality_and_status() {
        let store = InMemoryStore::new();
        store
            .save(evaluated("good trade", MemoryType::Decision, 0.9), None)
            .await
            .unwrap();
        store
            .save(evaluated("bad trade", MemoryType::Decision, 0.4), None)
            .await
            .unwrap();
        store
            .save(Memory::new("unevaluated", MemoryType::Decision), None)
            .await
            .unwrap();

        let query = Query::graph(
            vec![
                QueryFilter::new("quality_score", FilterOperator::Gte, serde_json::json!(0.8)),
                QueryFilter::new("status", FilterOperator::Eq, serde_json::json!("evaluated")),
            ],
            100,
        );
        let results = store.search(query).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "good trade");
    }

    #[tokio::test]
    async fn test_filter_in_and_contains_operators() {
        let store = InMemoryStore::new();
        store
            .save(
                Memory::new("breakout failed on BTC", MemoryType::Reflection)
                    .with_metadata("severity", serde_json::json!("high")),
                None,
            )
            .await
            .unwrap();
        store
            .save(
                Memory::new("minor slippage", MemoryType::Reflection)
                    .with_metadata("severity", serde_json::json!("low")),
                None,
            )
            .await
            .unwrap();

        let query = Query::graph(
            vec![QueryFilter::new(
                "severity",
                FilterOperator::In,
                serde_json::json!(["high", "critical"]),
            )],
            10,
        );
        let results = store.search(query).await.unwrap();
        assert_eq!(results.len(), 1);

        let query = Query::direct(
            vec![QueryFilter::new(
                "content",
                FilterOperator::Contains,
                serde_json::json!("BTC"),
            )],
            10,
        );
        let results = store.search(query).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_limit_and_offset() {
        let store = InMemoryStore::new();
        for i in 0..10 {
            store
                .save(
                    evaluated(&format!("memory {}", i), MemoryType::Outcome, 0.8),
                    None,
                )
                .await
                .unwrap();
        }

        let query = Query {
            limit: 3,
            ..Default::default()
        };
        assert_eq!(store.search(query).await.unwrap().len(), 3);

        let query = Query {
            limit: 5,
            offset: 8,
            ..Default::default()
        };
        assert_eq!(store.search(query).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_by_type_and_low_quality() {
        let store = InMemoryStore::new();
        store
            .save(evaluated("keep", MemoryType::Decision, 0.9), None)
            .await
            .unwrap();
        store
            .save(evaluated("purge quality", MemoryType::Decision, 0.2), None)
            .await
            .unwrap();
        store
            .save(evaluated("purge type", MemoryType::Pattern, 0.9), None)
            .await
            .unwrap();

        let deleted = store.delete_low_quality(0.5).await.unwrap();
        assert_eq!(deleted, 1);

        store.delete_by_type(MemoryType::Pattern).await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_stats_aggregation() {
        let store = InMemoryStore::new();
        store
            .save(evaluated("a", MemoryType::Decision, 0.8), None)
            .await
            .unwrap();
        store
            .save(evaluated("b", MemoryType::Outcome, 0.6), None)
            .await
            .unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_memories, 2);
        assert_eq!(stats.by_type.get("decision"), Some(&1));
        assert!((stats.average_quality_score - 0.7).abs() < 1e-9);
    }
}
