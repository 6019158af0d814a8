//! Narrow persistence seam used by the engine.
//!
//! Writes to the same `(learner, kind, item)` key must be serialized by the
//! implementation if several callers can race; the engine holds no locks.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{
    BookProgress, ItemKind, MistakeLogEntry, PronunciationRecord, RetentionState,
};

pub use memory::MemoryKnowledgeStore;
pub use sqlite::SqliteKnowledgeStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store backend failed: {0}")]
    Backend(String),
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn get_retention_state(
        &self,
        learner_id: &str,
        kind: ItemKind,
        item_id: &str,
    ) -> Result<Option<RetentionState>, StoreError>;

    async fn upsert_retention_state(&self, state: &RetentionState) -> Result<(), StoreError>;

    /// All states of a learner, optionally restricted to one kind.
    async fn list_retention_states(
        &self,
        learner_id: &str,
        kind: Option<ItemKind>,
    ) -> Result<Vec<RetentionState>, StoreError>;

    /// States with `next_review_at <= now`, oldest due first.
    async fn list_due_states(
        &self,
        learner_id: &str,
        kind: ItemKind,
        now: DateTime<Utc>,
    ) -> Result<Vec<RetentionState>, StoreError>;

    async fn get_pronunciation_record(
        &self,
        learner_id: &str,
        sound: &str,
    ) -> Result<Option<PronunciationRecord>, StoreError>;

    async fn upsert_pronunciation_record(
        &self,
        record: &PronunciationRecord,
    ) -> Result<(), StoreError>;

    async fn list_pronunciation_records(
        &self,
        learner_id: &str,
    ) -> Result<Vec<PronunciationRecord>, StoreError>;

    async fn append_mistake_log(&self, entry: &MistakeLogEntry) -> Result<(), StoreError>;

    /// Newest first, at most `limit` entries.
    async fn recent_mistake_logs(
        &self,
        learner_id: &str,
        limit: usize,
    ) -> Result<Vec<MistakeLogEntry>, StoreError>;

    async fn get_book_progress(&self, learner_id: &str) -> Result<Option<BookProgress>, StoreError>;
}
