use crate::error::TrellisError;
use crate::types::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Hash-chained transition log entry. The audit trail of the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionEntry {
    pub entry_id: String,
    pub index: u64,
    pub idea_id: Uuid,
    pub actor: String,
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub reason: String,
    /// Overall or average score captured at transition time, when one applies.
    pub score: Option<u8>,
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
    pub previous_hash: Option<String>,
    pub entry_hash: String,
}

/// Append-only transition log with hash-chain proofs.
///
/// No in-place mutation APIs are exposed. Every stage change becomes an
/// additional record, preserving full historical accountability.
#[derive(Debug, Default, Clone)]
pub struct TransitionLog {
    entries: Vec<TransitionEntry>,
}

impl TransitionLog {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Rebuild a log from persisted entries and verify hash-chain integrity.
    pub fn from_entries(entries: Vec<TransitionEntry>) -> Result<Self, TrellisError> {
        let log = Self { entries };

        for (expected_index, entry) in log.entries.iter().enumerate() {
            if entry.index != expected_index as u64 {
                return Err(TrellisError::Ledger(format!(
                    "transition log index gap detected at position {} (found {})",
                    expected_index, entry.index
                )));
            }
        }

        if !log.verify_chain() {
            return Err(TrellisError::Ledger(
                "persisted transition log hash-chain verification failed".to_string(),
            ));
        }

        Ok(log)
    }

    pub fn entries(&self) -> &[TransitionEntry] {
        &self.entries
    }

    pub fn for_idea(&self, idea_id: Uuid) -> Vec<TransitionEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.idea_id == idea_id)
            .cloned()
            .collect()
    }

    pub fn verify_chain(&self) -> bool {
        let mut previous_hash: Option<String> = None;
        for entry in &self.entries {
            let expected_hash = compute_entry_hash(
                entry.index,
                entry.idea_id,
                &entry.actor,
                entry.from_stage,
                entry.to_stage,
                &entry.reason,
                entry.score,
                entry.timestamp,
                &entry.metadata,
                previous_hash.as_deref(),
            );
            if entry.entry_hash != expected_hash {
                return false;
            }
            if entry.previous_hash != previous_hash {
                return false;
            }
            previous_hash = Some(entry.entry_hash.clone());
        }
        true
    }

    #[allow(clippy::too_many_arguments)]
    pub fn append(
        &mut self,
        idea_id: Uuid,
        actor: &str,
        from_stage: Stage,
        to_stage: Stage,
        reason: &str,
        score: Option<u8>,
        metadata: Value,
    ) -> Result<TransitionEntry, TrellisError> {
        let entry = self.build_entry(idea_id, actor, from_stage, to_stage, reason, score, metadata);
        self.commit_entry(entry.clone())?;
        Ok(entry)
    }

    /// Build the next deterministic entry without mutating the in-memory chain.
    #[allow(clippy::too_many_arguments)]
    pub fn build_entry(
        &self,
        idea_id: Uuid,
        actor: &str,
        from_stage: Stage,
        to_stage: Stage,
        reason: &str,
        score: Option<u8>,
        metadata: Value,
    ) -> TransitionEntry {
        let index = self.entries.len() as u64;
        let timestamp = Utc::now();
        let previous_hash = self.entries.last().map(|entry| entry.entry_hash.clone());
        let entry_hash = compute_entry_hash(
            index,
            idea_id,
            actor,
            from_stage,
            to_stage,
            reason,
            score,
            timestamp,
            &metadata,
            previous_hash.as_deref(),
        );

        TransitionEntry {
            entry_id: Uuid::new_v4().to_string(),
            index,
            idea_id,
            actor: actor.to_string(),
            from_stage,
            to_stage,
            reason: reason.to_string(),
            score,
            metadata,
            timestamp,
            previous_hash,
            entry_hash,
        }
    }

    /// Commit a pre-built entry after external durability succeeds.
    pub fn commit_entry(&mut self, entry: TransitionEntry) -> Result<(), TrellisError> {
        let expected_index = self.entries.len() as u64;
        if entry.index != expected_index {
            return Err(TrellisError::Ledger(format!(
                "commit index mismatch: expected {}, got {}",
                expected_index, entry.index
            )));
        }

        let expected_previous_hash = self.entries.last().map(|e| e.entry_hash.clone());
        if entry.previous_hash != expected_previous_hash {
            return Err(TrellisError::Ledger(
                "commit previous hash mismatch".to_string(),
            ));
        }

        let expected_hash = compute_entry_hash(
            entry.index,
            entry.idea_id,
            &entry.actor,
            entry.from_stage,
            entry.to_stage,
            &entry.reason,
            entry.score,
            entry.timestamp,
            &entry.metadata,
            entry.previous_hash.as_deref(),
        );

        if entry.entry_hash != expected_hash {
            return Err(TrellisError::Ledger(
                "commit hash mismatch for transition entry".to_string(),
            ));
        }

        self.entries.push(entry);
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn compute_entry_hash(
    index: u64,
    idea_id: Uuid,
    actor: &str,
    from_stage: Stage,
    to_stage: Stage,
    reason: &str,
    score: Option<u8>,
    timestamp: DateTime<Utc>,
    metadata: &Value,
    previous_hash: Option<&str>,
) -> String {
    let material = serde_json::json!({
        "index": index,
        "idea_id": idea_id,
        "actor": actor,
        "from_stage": from_stage,
        "to_stage": to_stage,
        "reason": reason,
        "score": score,
        "timestamp": timestamp,
        "metadata": metadata,
        "previous_hash": previous_hash,
    });

    let bytes = serde_json::to_vec(&material).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

// ── Persistence ─────────────────────────────────────────────────────────────

/// Transition log persistence backend configuration.
#[derive(Debug, Clone)]
pub enum LogStorageConfig {
    /// Keep all transition entries in process memory only.
    Memory,
    /// Persist entries in PostgreSQL and hydrate log state on startup.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl LogStorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

impl Default for LogStorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

#[derive(Debug, Clone)]
enum LogStorageBackend {
    Memory,
    Postgres(PostgresTransitionStore),
}

/// Runtime transition log that keeps an in-memory authoritative chain while
/// optionally mirroring each entry to PostgreSQL.
///
/// Invariant handling:
/// - Entry hash/index is computed against the in-memory chain first.
/// - Entry is persisted before it is committed in-memory.
/// - On startup, PostgreSQL entries are hydrated and hash-verified.
#[derive(Debug, Clone)]
pub struct PersistentTransitionLog {
    log: TransitionLog,
    backend: LogStorageBackend,
}

impl PersistentTransitionLog {
    pub fn from_entries(entries: Vec<TransitionEntry>) -> Result<Self, TrellisError> {
        Ok(Self {
            log: TransitionLog::from_entries(entries)?,
            backend: LogStorageBackend::Memory,
        })
    }

    pub async fn bootstrap(config: LogStorageConfig) -> Result<Self, TrellisError> {
        match config {
            LogStorageConfig::Memory => Ok(Self {
                log: TransitionLog::new(),
                backend: LogStorageBackend::Memory,
            }),
            LogStorageConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let store = PostgresTransitionStore::connect(&database_url, max_connections).await?;
                store.ensure_schema().await?;
                let entries = store.load_entries().await?;
                let log = TransitionLog::from_entries(entries)?;
                Ok(Self {
                    log,
                    backend: LogStorageBackend::Postgres(store),
                })
            }
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.backend {
            LogStorageBackend::Memory => "memory",
            LogStorageBackend::Postgres(_) => "postgres",
        }
    }

    pub fn entries(&self) -> &[TransitionEntry] {
        self.log.entries()
    }

    pub fn for_idea(&self, idea_id: Uuid) -> Vec<TransitionEntry> {
        self.log.for_idea(idea_id)
    }

    pub fn verify_chain(&self) -> bool {
        self.log.verify_chain()
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn append(
        &mut self,
        idea_id: Uuid,
        actor: &str,
        from_stage: Stage,
        to_stage: Stage,
        reason: &str,
        score: Option<u8>,
        metadata: Value,
    ) -> Result<TransitionEntry, TrellisError> {
        let entry = self
            .log
            .build_entry(idea_id, actor, from_stage, to_stage, reason, score, metadata);

        if let LogStorageBackend::Postgres(store) = &self.backend {
            store.insert_entry(&entry).await?;
        }

        self.log.commit_entry(entry.clone())?;
        Ok(entry)
    }
}

#[derive(Debug, Clone)]
struct PostgresTransitionStore {
    pool: PgPool,
}

impl PostgresTransitionStore {
    async fn connect(database_url: &str, max_connections: u32) -> Result<Self, TrellisError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| TrellisError::Ledger(format!("postgres connect failed: {e}")))?;

        Ok(Self { pool })
    }

    async fn ensure_schema(&self) -> Result<(), TrellisError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trellis_transitions (
                log_index BIGINT PRIMARY KEY,
                entry_id TEXT NOT NULL UNIQUE,
                idea_id UUID NOT NULL,
                actor TEXT NOT NULL,
                from_stage TEXT NOT NULL,
                to_stage TEXT NOT NULL,
                reason TEXT NOT NULL,
                score SMALLINT NULL,
                entry_timestamp TIMESTAMPTZ NOT NULL,
                metadata JSONB NOT NULL,
                previous_hash TEXT NULL,
                entry_hash TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| TrellisError::Ledger(format!("postgres schema create failed: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_trellis_transitions_idea_id ON trellis_transitions (idea_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| TrellisError::Ledger(format!("postgres index create failed: {e}")))?;

        Ok(())
    }

    async fn load_entries(&self) -> Result<Vec<TransitionEntry>, TrellisError> {
        let rows = sqlx::query(
            r#"
            SELECT
                log_index,
                entry_id,
                idea_id,
                actor,
                from_stage,
                to_stage,
                reason,
                score,
                entry_timestamp,
                metadata,
                previous_hash,
                entry_hash
            FROM trellis_transitions
            ORDER BY log_index ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TrellisError::Ledger(format!("postgres load failed: {e}")))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let index: i64 = row.try_get("log_index").map_err(|e| {
                TrellisError::Ledger(format!("postgres decode log_index failed: {e}"))
            })?;
            let from_stage: String = row.try_get("from_stage").map_err(|e| {
                TrellisError::Ledger(format!("postgres decode from_stage failed: {e}"))
            })?;
            let to_stage: String = row.try_get("to_stage").map_err(|e| {
                TrellisError::Ledger(format!("postgres decode to_stage failed: {e}"))
            })?;
            let score: Option<i16> = row
                .try_get("score")
                .map_err(|e| TrellisError::Ledger(format!("postgres decode score failed: {e}")))?;

            entries.push(TransitionEntry {
                entry_id: row.try_get("entry_id").map_err(|e| {
                    TrellisError::Ledger(format!("postgres decode entry_id failed: {e}"))
                })?,
                index: index.try_into().map_err(|_| {
                    TrellisError::Ledger("negative log index in storage".to_string())
                })?,
                idea_id: row.try_get("idea_id").map_err(|e| {
                    TrellisError::Ledger(format!("postgres decode idea_id failed: {e}"))
                })?,
                actor: row.try_get("actor").map_err(|e| {
                    TrellisError::Ledger(format!("postgres decode actor failed: {e}"))
                })?,
                from_stage: parse_stage(&from_stage)?,
                to_stage: parse_stage(&to_stage)?,
                reason: row.try_get("reason").map_err(|e| {
                    TrellisError::Ledger(format!("postgres decode reason failed: {e}"))
                })?,
                score: score
                    .map(|value| {
                        u8::try_from(value).map_err(|_| {
                            TrellisError::Ledger("score out of range in storage".to_string())
                        })
                    })
                    .transpose()?,
                timestamp: row.try_get("entry_timestamp").map_err(|e| {
                    TrellisError::Ledger(format!("postgres decode entry_timestamp failed: {e}"))
                })?,
                metadata: row.try_get("metadata").map_err(|e| {
                    TrellisError::Ledger(format!("postgres decode metadata failed: {e}"))
                })?,
                previous_hash: row.try_get("previous_hash").map_err(|e| {
                    TrellisError::Ledger(format!("postgres decode previous_hash failed: {e}"))
                })?,
                entry_hash: row.try_get("entry_hash").map_err(|e| {
                    TrellisError::Ledger(format!("postgres decode entry_hash failed: {e}"))
                })?,
            });
        }

        Ok(entries)
    }

    async fn insert_entry(&self, entry: &TransitionEntry) -> Result<(), TrellisError> {
        let index: i64 = entry.index.try_into().map_err(|_| {
            TrellisError::Ledger("log index exceeds postgres BIGINT range".to_string())
        })?;
        sqlx::query(
            r#"
            INSERT INTO trellis_transitions (
                log_index,
                entry_id,
                idea_id,
                actor,
                from_stage,
                to_stage,
                reason,
                score,
                entry_timestamp,
                metadata,
                previous_hash,
                entry_hash
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(index)
        .bind(&entry.entry_id)
        .bind(entry.idea_id)
        .bind(&entry.actor)
        .bind(entry.from_stage.name())
        .bind(entry.to_stage.name())
        .bind(&entry.reason)
        .bind(entry.score.map(i16::from))
        .bind(entry.timestamp)
        .bind(&entry.metadata)
        .bind(&entry.previous_hash)
        .bind(&entry.entry_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| TrellisError::Ledger(format!("postgres insert failed: {e}")))?;

        Ok(())
    }
}

fn parse_stage(value: &str) -> Result<Stage, TrellisError> {
    match value {
        "origination" => Ok(Stage::Origination),
        "matching" => Ok(Stage::Matching),
        "contracting" => Ok(Stage::Contracting),
        "completed" => Ok(Stage::Completed),
        other => Err(TrellisError::Ledger(format!(
            "unknown stage '{other}' in postgres"
        ))),
    }
}
