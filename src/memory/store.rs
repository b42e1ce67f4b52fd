use async_trait::async_trait;

use crate::error::StoreResult;

use super::types::{Memory, MemoryStats, MemoryStatus, MemoryType, Query, Relationship, SaveOptions};

/// Uniform retrieval and persistence interface over a memory backend.
///
/// The store is the only authoritative source of memory state; caches built
/// on top of it hold read-through copies. Every operation fails with a
/// distinguishable [`crate::error::StoreError`] kind so callers can separate
/// transient failures (the unit of retry and circuit-breaker accounting)
/// from permanent ones.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Run a uniform query and return matching memories.
    async fn search(&self, query: Query) -> StoreResult<Vec<Memory>>;

    /// Persist a memory, returning its id.
    async fn save(&self, memory: Memory, opts: Option<SaveOptions>) -> StoreResult<String>;

    /// Delete a memory by id.
    async fn delete(&self, id: &str) -> StoreResult<()>;

    /// Fetch a memory by id. `NotFound` when absent.
    async fn get_by_id(&self, id: &str) -> StoreResult<Memory>;

    /// Update the lifecycle status of a memory.
    async fn update_status(&self, id: &str, status: MemoryStatus) -> StoreResult<()>;

    /// Persist a batch of memories, returning the ids that succeeded.
    async fn save_batch(
        &self,
        memories: Vec<Memory>,
        opts: Option<SaveOptions>,
    ) -> StoreResult<Vec<String>>;

    /// Fetch several memories by id, skipping ones that are missing.
    async fn get_by_ids(&self, ids: &[String]) -> StoreResult<Vec<Memory>>;

    /// Fetch up to `limit` memories of the given type.
    async fn search_by_type(&self, memory_type: MemoryType, limit: usize)
        -> StoreResult<Vec<Memory>>;

    /// Fetch memories similar to the one identified by `id`.
    async fn search_similar(&self, id: &str, limit: usize) -> StoreResult<Vec<Memory>>;

    /// Fetch the relationship edges of a memory.
    async fn get_relationships(&self, id: &str) -> StoreResult<Vec<Relationship>>;

    /// Aggregate statistics over the store.
    async fn get_stats(&self) -> StoreResult<MemoryStats>;

    /// Delete every memory of the given type.
    async fn delete_by_type(&self, memory_type: MemoryType) -> StoreResult<()>;

    /// Delete memories whose quality score is below `threshold`.
    /// Returns the number deleted.
    async fn delete_low_quality(&self, threshold: f64) -> StoreResult<i64>;

    /// Liveness check against the backend.
    async fn health(&self) -> StoreResult<()>;

    /// Release held resources (connection pools, background tasks).
    async fn close(&self) -> StoreResult<()>;
}
