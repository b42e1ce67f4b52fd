use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::VersionError;

/// A single-step migration from version `v` to `v + 1`.
pub type MigrationFn = Box<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// Migration statistics
#[derive(Debug, Clone, Default)]
pub struct VersionMetrics {
    /// Total migration attempts
    pub migrations_run: u64,
    /// Attempts that completed
    pub success_count: u64,
    /// Attempts that failed
    pub failure_count: u64,
    /// Time of the last attempt
    pub last_migration_at: Option<DateTime<Utc>>,
    /// Mean duration of successful migrations
    pub average_duration: Duration,
    total_duration: Duration,
}

/// Migrates stored memory payloads across schema versions.
///
/// Holds a table of `v -> v+1` migration steps and chains them to bring a
/// payload from any older version up to `current_version`. Payloads newer
/// than the manager's version are rejected.
pub struct VersionManager {
    current_version: u32,
    migrations: RwLock<HashMap<u32, MigrationFn>>,
    metrics: RwLock<VersionMetrics>,
}

impl VersionManager {
    /// Create a manager for the given current schema version.
    pub fn new(current_version: u32) -> Self {
        Self {
            current_version,
            migrations: RwLock::new(HashMap::new()),
            metrics: RwLock::new(VersionMetrics::default()),
        }
    }

    /// Create a manager for schema v3 with the built-in migration chain
    /// registered.
    pub fn with_builtin_migrations() -> Self {
        let manager = Self::new(3);
        manager
            .register_migration(1, Box::new(migrate_v1_to_v2))
            .expect("v1 migration registers below current");
        manager
            .register_migration(2, Box::new(migrate_v2_to_v3))
            .expect("v2 migration registers below current");
        manager
    }

    /// The version payloads are migrated up to.
    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    /// Register the step migrating `from_version` to `from_version + 1`.
    pub fn register_migration(
        &self,
        from_version: u32,
        migration: MigrationFn,
    ) -> Result<(), VersionError> {
        if from_version >= self.current_version {
            return Err(VersionError::InvalidRegistration {
                from: from_version,
                message: format!(
                    "source must be below current version {}",
                    self.current_version
                ),
            });
        }
        self.migrations
            .write()
            .unwrap()
            .insert(from_version, migration);
        debug!(from = from_version, to = from_version + 1, "migration registered");
        Ok(())
    }

    /// Bring a payload from `from_version` to the current version.
    ///
    /// Identity at the current version; payloads above it fail with
    /// `TooNew`; otherwise migrations are chained step by step, failing on
    /// any missing or erroring step.
    pub fn migrate(&self, data: Value, from_version: u32) -> Result<Value, VersionError> {
        if from_version == self.current_version {
            return Ok(data);
        }
        if from_version > self.current_version {
            return Err(VersionError::TooNew {
                from: from_version,
                current: self.current_version,
            });
        }

        let started = Instant::now();
        let migrations = self.migrations.read().unwrap();

        let mut current = data;
        for version in from_version..self.current_version {
            let Some(step) = migrations.get(&version) else {
                self.record_failure();
                return Err(VersionError::MissingMigration { from: version });
            };

            current = step(current).map_err(|message| {
                self.record_failure();
                VersionError::MigrationFailed {
                    from: version,
                    message,
                }
            })?;
            debug!(from = version, to = version + 1, "migration step applied");
        }

        let elapsed = started.elapsed();
        self.record_success(elapsed);
        info!(
            from = from_version,
            to = self.current_version,
            elapsed_ms = elapsed.as_millis() as u64,
            "payload migrated"
        );
        Ok(current)
    }

    /// Detect the schema version of a payload by its marker fields.
    pub fn detect_version(&self, payload: &Value) -> Result<u32, VersionError> {
        let Some(object) = payload.as_object() else {
            return Err(VersionError::UnknownVersion);
        };

        if object.contains_key("trade_id") && object.contains_key("decision_time") {
            if object.contains_key("reflection_id") {
                if object.contains_key("quality_score_v2") {
                    return Ok(3);
                }
                return Ok(2);
            }
            return Ok(1);
        }

        Err(VersionError::UnknownVersion)
    }

    /// Migrate a batch, collecting per-index failures instead of aborting.
    /// Returns migrated payloads (None where the item failed) and the
    /// failures paired with their indexes.
    pub fn batch_migrate(
        &self,
        items: Vec<Value>,
        from_version: u32,
    ) -> (Vec<Option<Value>>, Vec<(usize, VersionError)>) {
        let mut results = Vec::with_capacity(items.len());
        let mut failures = Vec::new();

        for (index, item) in items.into_iter().enumerate() {
            match self.migrate(item, from_version) {
                Ok(migrated) => results.push(Some(migrated)),
                Err(e) => {
                    failures.push((index, e));
                    results.push(None);
                }
            }
        }

        if failures.is_empty() {
            info!(count = results.len(), "batch migration fully succeeded");
        } else {
            info!(
                succeeded = results.len() - failures.len(),
                failed = failures.len(),
                "batch migration partially succeeded"
            );
        }

        (results, failures)
    }

    fn record_success(&self, duration: Duration) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.migrations_run += 1;
        metrics.success_count += 1;
        metrics.total_duration += duration;
        metrics.average_duration = metrics.total_duration / metrics.migrations_run.max(1) as u32;
        metrics.last_migration_at = Some(Utc::now());
    }

    fn record_failure(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.migrations_run += 1;
        metrics.failure_count += 1;
        metrics.last_migration_at = Some(Utc::now());
    }

    /// Statistics snapshot.
    pub fn metrics(&self) -> VersionMetrics {
        self.metrics.read().unwrap().clone()
    }
}

/// v1 to v2: adds the `reflection_id` back-reference.
pub fn migrate_v1_to_v2(data: Value) -> Result<Value, String> {
    let Value::Object(mut object) = data else {
        return Err("expected a JSON object".to_string());
    };

    object
        .entry("reflection_id".to_string())
        .or_insert(Value::Null);
    object.insert("schema_version".to_string(), serde_json::json!(2));

    Ok(Value::Object(object))
}

/// v2 to v3: introduces `quality_score_v2` (seeded from the legacy
/// `quality_score` when present) and similarity metadata.
pub fn migrate_v2_to_v3(data: Value) -> Result<Value, String> {
    let Value::Object(mut object) = data else {
        return Err("expected a JSON object".to_string());
    };

    if !object.contains_key("quality_score_v2") {
        let seeded = object
            .get("quality_score")
            .cloned()
            .unwrap_or(serde_json::json!(0.5));
        object.insert("quality_score_v2".to_string(), seeded);
    }

    object
        .entry("similarity_metadata".to_string())
        .or_insert(serde_json::json!({
            "algorithm": "cosine",
            "dimension": 768,
        }));
    object.insert("schema_version".to_string(), serde_json::json!(3));

    Ok(Value::Object(object))
}
