use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::store::{KnowledgeStore, StoreError};
use crate::types::{
    BookProgress, ItemKind, MistakeLogEntry, PronunciationRecord, RetentionState,
};

type RetentionKey = (String, ItemKind, String);

/// Process-local store. Each write takes the lock for a single map operation,
/// so upserts to one key are serialized.
#[derive(Default)]
pub struct MemoryKnowledgeStore {
    retention: RwLock<HashMap<RetentionKey, RetentionState>>,
    pronunciation: RwLock<HashMap<(String, String), PronunciationRecord>>,
    mistakes: RwLock<HashMap<String, Vec<MistakeLogEntry>>>,
    books: RwLock<HashMap<String, BookProgress>>,
}

impl MemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_book_progress(&self, progress: BookProgress) {
        self.books.write().insert(progress.learner_id.clone(), progress);
    }

    pub fn retention_count(&self) -> usize {
        self.retention.read().len()
    }
}

#[async_trait]
impl KnowledgeStore for MemoryKnowledgeStore {
    async fn get_retention_state(
        &self,
        learner_id: &str,
        kind: ItemKind,
        item_id: &str,
    ) -> Result<Option<RetentionState>, StoreError> {
        let key = (learner_id.to_string(), kind, item_id.to_string());
        Ok(self.retention.read().get(&key).cloned())
    }

    async fn upsert_retention_state(&self, state: &RetentionState) -> Result<(), StoreError> {
        let key = (state.learner_id.clone(), state.kind, state.item_id.clone());
        self.retention.write().insert(key, state.clone());
        Ok(())
    }

    async fn list_retention_states(
        &self,
        learner_id: &str,
        kind: Option<ItemKind>,
    ) -> Result<Vec<RetentionState>, StoreError> {
        let mut out: Vec<RetentionState> = self
            .retention
            .read()
            .values()
            .filter(|s| s.learner_id == learner_id)
            .filter(|s| kind.map_or(true, |k| s.kind == k))
            .cloned()
            .collect();
        // HashMap order is arbitrary; keep listings reproducible.
        out.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        Ok(out)
    }

    async fn list_due_states(
        &self,
        learner_id: &str,
        kind: ItemKind,
        now: DateTime<Utc>,
    ) -> Result<Vec<RetentionState>, StoreError> {
        let mut out: Vec<RetentionState> = self
            .retention
            .read()
            .values()
            .filter(|s| s.learner_id == learner_id && s.kind == kind && s.is_due(now))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.next_review_at
                .cmp(&b.next_review_at)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        Ok(out)
    }

    async fn get_pronunciation_record(
        &self,
        learner_id: &str,
        sound: &str,
    ) -> Result<Option<PronunciationRecord>, StoreError> {
        let key = (learner_id.to_string(), sound.to_string());
        Ok(self.pronunciation.read().get(&key).cloned())
    }

    async fn upsert_pronunciation_record(
        &self,
        record: &PronunciationRecord,
    ) -> Result<(), StoreError> {
        let key = (record.learner_id.clone(), record.sound.clone());
        self.pronunciation.write().insert(key, record.clone());
        Ok(())
    }

    async fn list_pronunciation_records(
        &self,
        learner_id: &str,
    ) -> Result<Vec<PronunciationRecord>, StoreError> {
        let mut out: Vec<PronunciationRecord> = self
            .pronunciation
            .read()
            .values()
            .filter(|r| r.learner_id == learner_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.sound.cmp(&b.sound));
        Ok(out)
    }

    async fn append_mistake_log(&self, entry: &MistakeLogEntry) -> Result<(), StoreError> {
        self.mistakes
            .write()
            .entry(entry.learner_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn recent_mistake_logs(
        &self,
        learner_id: &str,
        limit: usize,
    ) -> Result<Vec<MistakeLogEntry>, StoreError> {
        let guard = self.mistakes.read();
        let Some(entries) = guard.get(learner_id) else {
            return Ok(Vec::new());
        };
        let mut out = entries.clone();
        // Stable sort, then reverse: among equal timestamps the last appended comes first.
        out.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at));
        out.reverse();
        out.truncate(limit);
        Ok(out)
    }

    async fn get_book_progress(&self, learner_id: &str) -> Result<Option<BookProgress>, StoreError> {
        Ok(self.books.read().get(learner_id).cloned())
    }
}
