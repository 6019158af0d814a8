//! Knowledge update engine against in-process stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use danci_tutor_core::types::{
    BookProgress, ItemKind, MistakeLogEntry, MistakeType, PronunciationRecord,
    PronunciationTrend, RetentionState,
};
use danci_tutor_core::{
    EngineConfig, EngineError, KnowledgeStore, KnowledgeUpdateEngine, MemoryKnowledgeStore,
    PracticeEvent, StoreError,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 12, 10, 0, 0).unwrap()
}

/// Wraps the memory store and counts writes.
#[derive(Default)]
struct CountingStore {
    inner: MemoryKnowledgeStore,
    writes: AtomicUsize,
}

#[async_trait]
impl KnowledgeStore for CountingStore {
    async fn get_retention_state(
        &self,
        learner_id: &str,
        kind: ItemKind,
        item_id: &str,
    ) -> Result<Option<RetentionState>, StoreError> {
        self.inner.get_retention_state(learner_id, kind, item_id).await
    }

    async fn upsert_retention_state(&self, state: &RetentionState) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert_retention_state(state).await
    }

    async fn list_retention_states(
        &self,
        learner_id: &str,
        kind: Option<ItemKind>,
    ) -> Result<Vec<RetentionState>, StoreError> {
        self.inner.list_retention_states(learner_id, kind).await
    }

    async fn list_due_states(
        &self,
        learner_id: &str,
        kind: ItemKind,
        now: DateTime<Utc>,
    ) -> Result<Vec<RetentionState>, StoreError> {
        self.inner.list_due_states(learner_id, kind, now).await
    }

    async fn get_pronunciation_record(
        &self,
        learner_id: &str,
        sound: &str,
    ) -> Result<Option<PronunciationRecord>, StoreError> {
        self.inner.get_pronunciation_record(learner_id, sound).await
    }

    async fn upsert_pronunciation_record(
        &self,
        record: &PronunciationRecord,
    ) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert_pronunciation_record(record).await
    }

    async fn list_pronunciation_records(
        &self,
        learner_id: &str,
    ) -> Result<Vec<PronunciationRecord>, StoreError> {
        self.inner.list_pronunciation_records(learner_id).await
    }

    async fn append_mistake_log(&self, entry: &MistakeLogEntry) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.append_mistake_log(entry).await
    }

    async fn recent_mistake_logs(
        &self,
        learner_id: &str,
        limit: usize,
    ) -> Result<Vec<MistakeLogEntry>, StoreError> {
        self.inner.recent_mistake_logs(learner_id, limit).await
    }

    async fn get_book_progress(&self, learner_id: &str) -> Result<Option<BookProgress>, StoreError> {
        self.inner.get_book_progress(learner_id).await
    }
}

/// Reads succeed with nothing stored; every write fails.
struct ReadOnlyStore;

#[async_trait]
impl KnowledgeStore for ReadOnlyStore {
    async fn get_retention_state(
        &self,
        _learner_id: &str,
        _kind: ItemKind,
        _item_id: &str,
    ) -> Result<Option<RetentionState>, StoreError> {
        Ok(None)
    }

    async fn upsert_retention_state(&self, _state: &RetentionState) -> Result<(), StoreError> {
        Err(StoreError::Backend("read-only".to_string()))
    }

    async fn list_retention_states(
        &self,
        _learner_id: &str,
        _kind: Option<ItemKind>,
    ) -> Result<Vec<RetentionState>, StoreError> {
        Ok(Vec::new())
    }

    async fn list_due_states(
        &self,
        _learner_id: &str,
        _kind: ItemKind,
        _now: DateTime<Utc>,
    ) -> Result<Vec<RetentionState>, StoreError> {
        Ok(Vec::new())
    }

    async fn get_pronunciation_record(
        &self,
        _learner_id: &str,
        _sound: &str,
    ) -> Result<Option<PronunciationRecord>, StoreError> {
        Ok(None)
    }

    async fn upsert_pronunciation_record(
        &self,
        _record: &PronunciationRecord,
    ) -> Result<(), StoreError> {
        Err(StoreError::Backend("read-only".to_string()))
    }

    async fn list_pronunciation_records(
        &self,
        _learner_id: &str,
    ) -> Result<Vec<PronunciationRecord>, StoreError> {
        Ok(Vec::new())
    }

    async fn append_mistake_log(&self, _entry: &MistakeLogEntry) -> Result<(), StoreError> {
        Err(StoreError::Backend("read-only".to_string()))
    }

    async fn recent_mistake_logs(
        &self,
        _learner_id: &str,
        _limit: usize,
    ) -> Result<Vec<MistakeLogEntry>, StoreError> {
        Ok(Vec::new())
    }

    async fn get_book_progress(&self, _learner_id: &str) -> Result<Option<BookProgress>, StoreError> {
        Ok(None)
    }
}

fn engine_with(store: Arc<dyn KnowledgeStore>) -> KnowledgeUpdateEngine {
    KnowledgeUpdateEngine::new(store, &EngineConfig::default())
}

#[tokio::test]
async fn first_practice_creates_state() {
    let store = Arc::new(MemoryKnowledgeStore::new());
    let engine = engine_with(store.clone());

    let event = PracticeEvent::new("u1", ItemKind::Word, "hablar", 4, 1, t0())
        .with_context("Yo hablo español");
    let state = engine.record_practice(&event).await.unwrap();

    assert_eq!(state.knowledge_level, 1);
    assert!((state.ease_factor - 2.5).abs() < 1e-9);
    assert!((state.interval_days - 1.0).abs() < 1e-9);
    assert_eq!(state.repetition_count, 1);
    assert_eq!(state.times_seen, 1);
    assert_eq!(state.times_correct, 1);
    assert_eq!(state.next_review_at, t0() + Duration::days(1));
    assert_eq!(state.recent_contexts.len(), 1);

    let stored = store
        .get_retention_state("u1", ItemKind::Word, "hablar")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, state);
    assert_eq!(store.retention_count(), 1);
}

#[tokio::test]
async fn each_practice_writes_exactly_once() {
    let store = Arc::new(CountingStore::default());
    let engine = engine_with(store.clone());

    for (i, quality) in [5, 5, 2, 4].into_iter().enumerate() {
        let at = t0() + Duration::days(i as i64);
        let event = PracticeEvent::new("u1", ItemKind::GrammarRule, "ser-vs-estar", quality, 0, at);
        engine.record_practice(&event).await.unwrap();
        assert_eq!(store.writes.load(Ordering::SeqCst), i + 1);
    }

    let state = store
        .get_retention_state("u1", ItemKind::GrammarRule, "ser-vs-estar")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.times_seen, 4);
    assert_eq!(state.times_correct, 3);
    assert_eq!(state.times_incorrect, 1);
    assert_eq!(state.repetition_count, 1);
    assert_eq!(state.perfect_streak, 0);
}

#[tokio::test]
async fn same_item_kinds_are_tracked_separately() {
    let store = Arc::new(MemoryKnowledgeStore::new());
    let engine = engine_with(store.clone());

    engine
        .record_practice(&PracticeEvent::new("u1", ItemKind::Word, "por", 5, 0, t0()))
        .await
        .unwrap();
    engine
        .record_practice(&PracticeEvent::new("u1", ItemKind::GrammarRule, "por", 1, 0, t0()))
        .await
        .unwrap();

    assert_eq!(store.retention_count(), 2);
    let word = store.get_retention_state("u1", ItemKind::Word, "por").await.unwrap().unwrap();
    assert_eq!(word.times_correct, 1);
}

#[tokio::test]
async fn mistakes_are_bounded_per_kind() {
    let store = Arc::new(MemoryKnowledgeStore::new());
    let engine = engine_with(store.clone());

    for i in 0..25 {
        let event = PracticeEvent::new("u1", ItemKind::GrammarRule, "subjuntivo", 1, 0, t0() + Duration::hours(i))
            .with_mistake("sea", format!("es-{i}"));
        engine.record_practice(&event).await.unwrap();
    }

    let state = store
        .get_retention_state("u1", ItemKind::GrammarRule, "subjuntivo")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.recent_mistakes.len(), 15);
    assert_eq!(state.recent_mistakes.back().map(|m| m.actual.as_str()), Some("es-24"));
    assert_eq!(state.recent_mistakes.front().map(|m| m.actual.as_str()), Some("es-10"));
}

#[tokio::test]
async fn store_errors_propagate_unchanged() {
    let engine = engine_with(Arc::new(ReadOnlyStore));

    let err = engine
        .record_practice(&PracticeEvent::new("u1", ItemKind::Word, "comer", 5, 0, t0()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Store(StoreError::Backend(ref msg)) if msg == "read-only"));

    let err = engine.record_pronunciation("u1", "rr", 0.4, t0()).await.unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));

    let entry = MistakeLogEntry::new("u1", MistakeType::Spelling, "comer", "comer", "comr", t0());
    assert!(engine.log_mistake(&entry).await.is_err());
}

#[tokio::test]
async fn empty_ids_are_rejected_before_any_write() {
    let store = Arc::new(CountingStore::default());
    let engine = engine_with(store.clone());

    let err = engine
        .record_practice(&PracticeEvent::new("  ", ItemKind::Word, "comer", 5, 0, t0()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(store.writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn pronunciation_trend_tracks_recent_scores() {
    let store = Arc::new(MemoryKnowledgeStore::new());
    let engine = engine_with(store.clone());

    let scores = [0.2, 0.25, 0.3, 0.6, 0.7, 0.8];
    let mut last = None;
    for (i, score) in scores.into_iter().enumerate() {
        last = Some(
            engine
                .record_pronunciation("u1", "rr", score, t0() + Duration::minutes(i as i64))
                .await
                .unwrap(),
        );
    }

    let record = last.unwrap();
    assert_eq!(record.total_attempts, 6);
    assert_eq!(record.trend, PronunciationTrend::Improving);
    assert!((record.best_score - 0.8).abs() < 1e-9);
    assert!((record.current_score - 0.475).abs() < 1e-9);

    let listed = store.list_pronunciation_records("u1").await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn logged_mistakes_come_back_newest_first() {
    let store = Arc::new(MemoryKnowledgeStore::new());
    let engine = engine_with(store.clone());

    for i in 0..3 {
        let entry = MistakeLogEntry::new(
            "u1",
            MistakeType::WordOrder,
            "question",
            "¿Dónde está?",
            format!("attempt {i}"),
            t0() + Duration::minutes(i),
        );
        engine.log_mistake(&entry).await.unwrap();
    }

    let logs = store.recent_mistake_logs("u1", 2).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].actual, "attempt 2");
    assert_eq!(logs[1].actual, "attempt 1");
}
