use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One unit of retained trading experience.
///
/// Memories are owned by the store; retrievals yield copies. A memory is
/// created `generated`, promoted to `applied` when its decision executes,
/// and to `evaluated` once the trade outcome materializes. After
/// `evaluated` it is never mutated in place, only deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Globally unique opaque id
    pub id: String,
    /// Free-form text summarizing a decision, outcome, reflection or pattern
    pub content: String,
    /// Kind of experience this memory records
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    /// Lifecycle status
    #[serde(default)]
    pub status: MemoryStatus,
    /// Quality score in [0,1]; meaningful only once status is `evaluated`
    #[serde(default)]
    pub quality_score: f64,
    /// Similarity in [0,1]; populated by retrieval, not storage
    #[serde(default)]
    pub similarity: f64,
    /// Free-form metadata. Recognized keys: `kelly_fraction`,
    /// `position_size`, `risk_reward`, `win_rate`, `stop_loss`, `trade_type`.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Typed edges to other memories
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    /// Back-reference to an owning reflection, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection_id: Option<String>,
    /// Creation timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Memory {
    /// Create a new `generated` memory with a fresh id.
    pub fn new(content: impl Into<String>, memory_type: MemoryType) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            memory_type,
            status: MemoryStatus::Generated,
            quality_score: 0.0,
            similarity: 0.0,
            metadata: HashMap::new(),
            relationships: Vec::new(),
            reflection_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a metadata value.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Read a numeric metadata value if present.
    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(|v| v.as_f64())
    }

    /// Read a string metadata value if present.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// First 8 characters of the id, for compact log lines.
    pub fn id_prefix(&self) -> &str {
        let end = self.id.len().min(8);
        &self.id[..end]
    }
}

/// Kind of experience a memory records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// A trading decision and its inputs
    Decision,
    /// The realized result of an executed decision
    Outcome,
    /// A post-hoc analysis linking decisions and outcomes
    Reflection,
    /// A recurring market or behavioral pattern
    Pattern,
}

impl MemoryType {
    /// String form used in queries and indexes.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Decision => "decision",
            MemoryType::Outcome => "outcome",
            MemoryType::Reflection => "reflection",
            MemoryType::Pattern => "pattern",
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decision" => Ok(MemoryType::Decision),
            "outcome" => Ok(MemoryType::Outcome),
            "reflection" => Ok(MemoryType::Reflection),
            "pattern" => Ok(MemoryType::Pattern),
            _ => Err(format!("Unknown memory type: {}", s)),
        }
    }
}

/// Lifecycle status of a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
    /// Produced by the decision engine, not yet executed
    #[default]
    Generated,
    /// The associated decision was executed
    Applied,
    /// The trade outcome materialized and was scored
    Evaluated,
}

impl MemoryStatus {
    /// String form used in queries and the HTTP API.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryStatus::Generated => "generated",
            MemoryStatus::Applied => "applied",
            MemoryStatus::Evaluated => "evaluated",
        }
    }
}

impl std::fmt::Display for MemoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MemoryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generated" => Ok(MemoryStatus::Generated),
            "applied" => Ok(MemoryStatus::Applied),
            "evaluated" => Ok(MemoryStatus::Evaluated),
            _ => Err(format!("Unknown memory status: {}", s)),
        }
    }
}

/// Typed edge between two memories.
///
/// Relationships form a directed graph over the flat memory container;
/// edges carry ids, never owning pointers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    /// Edge kind
    #[serde(rename = "type")]
    pub kind: RelationshipKind,
    /// Target memory id
    pub target: String,
    /// Edge strength in [0,1]
    pub weight: f64,
}

/// Kind of relationship edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    /// This memory caused the target
    Causes,
    /// This memory was caused by the target
    CausedBy,
    /// The two memories describe similar situations
    SimilarTo,
    /// The two memories disagree
    Contradicts,
}

/// Uniform retrieval request against the memory store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    /// Retrieval strategy
    #[serde(rename = "type")]
    pub query_type: QueryType,
    /// Free-form context used for similarity scoring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<HashMap<String, serde_json::Value>>,
    /// Field-level filters, all of which must match
    #[serde(default)]
    pub filters: Vec<QueryFilter>,
    /// Maximum records to return (0 = store default)
    #[serde(default)]
    pub limit: usize,
    /// Records to skip
    #[serde(default)]
    pub offset: usize,
    /// Minimum similarity in [0,1]
    #[serde(default)]
    pub similarity_threshold: f64,
}

impl Query {
    /// Semantic search with a similarity floor.
    pub fn semantic(limit: usize, similarity_threshold: f64) -> Self {
        Self {
            query_type: QueryType::SemanticSearch,
            limit,
            similarity_threshold,
            ..Default::default()
        }
    }

    /// Graph query over relationship edges and indexed fields.
    pub fn graph(filters: Vec<QueryFilter>, limit: usize) -> Self {
        Self {
            query_type: QueryType::GraphQuery,
            filters,
            limit,
            ..Default::default()
        }
    }

    /// Direct lookup by indexed fields.
    pub fn direct(filters: Vec<QueryFilter>, limit: usize) -> Self {
        Self {
            query_type: QueryType::DirectLookup,
            filters,
            limit,
            ..Default::default()
        }
    }

    /// Add a filter.
    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filters.push(filter);
        self
    }
}

/// Retrieval strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Vector-similarity search over memory content
    #[default]
    SemanticSearch,
    /// Query over the relationship graph
    GraphQuery,
    /// Lookup by indexed fields
    DirectLookup,
}

/// One field-level filter in a query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryFilter {
    /// Field name, e.g. `quality_score`
    pub field: String,
    /// Comparison operator
    pub operator: FilterOperator,
    /// Comparison value
    pub value: serde_json::Value,
}

impl QueryFilter {
    /// Build a filter.
    pub fn new(
        field: impl Into<String>,
        operator: FilterOperator,
        value: serde_json::Value,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }
}

/// Filter comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    /// Equal
    Eq,
    /// Greater than
    Gt,
    /// Greater than or equal
    Gte,
    /// Less than
    Lt,
    /// Less than or equal
    Lte,
    /// Value is a member of the given list
    In,
    /// String field contains the given substring
    Contains,
}

/// Options for save operations
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Fire-and-forget save
    pub asynchronous: bool,
    /// Per-operation timeout override
    pub timeout: Option<std::time::Duration>,
    /// Priority 1-10, 10 highest
    pub priority: u8,
}

/// Aggregate statistics over the memory store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Total stored memories
    pub total_memories: i64,
    /// Count per memory type
    #[serde(default)]
    pub by_type: HashMap<String, i64>,
    /// Mean quality score across evaluated memories
    #[serde(default)]
    pub average_quality_score: f64,
    /// Creation time of the oldest memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest_memory: Option<DateTime<Utc>>,
    /// Creation time of the newest memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newest_memory: Option<DateTime<Utc>>,
    /// Total relationship edges
    #[serde(default)]
    pub total_relationships: i64,
    /// Time of the last write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_new_defaults() {
        let m = Memory::new("BTC breakout held above resistance", MemoryType::Decision);
        assert_eq!(m.status, MemoryStatus::Generated);
        assert_eq!(m.quality_score, 0.0);
        assert!(!m.id.is_empty());
        assert!(m.relationships.is_empty());
    }

    #[test]
    fn test_memory_metadata_accessors() {
        let m = Memory::new("sized by Kelly", MemoryType::Decision)
            .with_metadata("kelly_fraction", serde_json::json!(0.12))
            .with_metadata("trade_type", serde_json::json!("long"));

        assert_eq!(m.metadata_f64("kelly_fraction"), Some(0.12));
        assert_eq!(m.metadata_str("trade_type"), Some("long"));
        assert_eq!(m.metadata_f64("missing"), None);
    }

    #[test]
    fn test_id_prefix_short_id() {
        let mut m = Memory::new("x", MemoryType::Outcome);
        m.id = "abc".to_string();
        assert_eq!(m.id_prefix(), "abc");
        m.id = "abcdefghij".to_string();
        assert_eq!(m.id_prefix(), "abcdefgh");
    }

    #[test]
    fn test_memory_type_round_trip() {
        for t in [
            MemoryType::Decision,
            MemoryType::Outcome,
            MemoryType::Reflection,
            MemoryType::Pattern,
        ] {
            assert_eq!(t.as_str().parse::<MemoryType>().unwrap(), t);
        }
        assert!("unknown".parse::<MemoryType>().is_err());
    }

    #[test]
    fn test_memory_status_round_trip() {
        for s in [
            MemoryStatus::Generated,
            MemoryStatus::Applied,
            MemoryStatus::Evaluated,
        ] {
            assert_eq!(s.as_str().parse::<MemoryStatus>().unwrap(), s);
        }
    }

    #[test]
    fn test_memory_serde_type_tag() {
        let m = Memory::new("pattern: OI spike precedes squeeze", MemoryType::Pattern);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["type"], "pattern");
        assert_eq!(json["status"], "generated");

        let back: Memory = serde_json::from_value(json).unwrap();
        assert_eq!(back.memory_type, MemoryType::Pattern);
    }

    #[test]
    fn test_query_builders() {
        let q = Query::semantic(5, 0.7);
        assert_eq!(q.query_type, QueryType::SemanticSearch);
        assert_eq!(q.limit, 5);
        assert_eq!(q.similarity_threshold, 0.7);

        let q = Query::graph(
            vec![QueryFilter::new(
                "quality_score",
                FilterOperator::Gte,
                serde_json::json!(0.8),
            )],
            100,
        )
        .with_filter(QueryFilter::new(
            "status",
            FilterOperator::Eq,
            serde_json::json!("evaluated"),
        ));
        assert_eq!(q.filters.len(), 2);
    }

    #[test]
    fn test_relationship_serde() {
        let r = Relationship {
            kind: RelationshipKind::Contradicts,
            target: "m-2".to_string(),
            weight: 0.6,
        };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["type"], "contradicts");
    }
}
