use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, HistoryLimits, PronunciationConfig, SchedulerConfig};
use crate::services::scheduler::{self, ReviewInput};
use crate::store::{KnowledgeStore, StoreError};
use crate::types::{
    ItemKind, MistakeLogEntry, MistakeNote, PronunciationRecord, PronunciationTrend,
    RetentionState, MAX_QUALITY, MIN_QUALITY,
};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MistakeInput {
    pub expected: String,
    pub actual: String,
}

/// One graded practice of one item, as reported by the evaluation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeEvent {
    pub learner_id: String,
    pub kind: ItemKind,
    pub item_id: String,
    pub suggested_level: i32,
    pub quality: i32,
    pub pronunciation_score: Option<f64>,
    pub context: Option<String>,
    pub mistake: Option<MistakeInput>,
    pub occurred_at: DateTime<Utc>,
}

impl PracticeEvent {
    pub fn new(
        learner_id: impl Into<String>,
        kind: ItemKind,
        item_id: impl Into<String>,
        quality: i32,
        suggested_level: i32,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            learner_id: learner_id.into(),
            kind,
            item_id: item_id.into(),
            suggested_level,
            quality,
            pronunciation_score: None,
            context: None,
            mistake: None,
            occurred_at,
        }
    }

    pub fn with_pronunciation(mut self, score: f64) -> Self {
        self.pronunciation_score = Some(score);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_mistake(mut self, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        self.mistake = Some(MistakeInput {
            expected: expected.into(),
            actual: actual.into(),
        });
        self
    }
}

/// Create-or-update of retention state. Each public call does at most one
/// read and exactly one write against the store; errors are returned as-is.
pub struct KnowledgeUpdateEngine {
    store: Arc<dyn KnowledgeStore>,
    scheduler: SchedulerConfig,
    history: HistoryLimits,
    pronunciation: PronunciationConfig,
}

impl KnowledgeUpdateEngine {
    pub fn new(store: Arc<dyn KnowledgeStore>, config: &EngineConfig) -> Self {
        Self {
            store,
            scheduler: config.scheduler.clone(),
            history: config.history.clone(),
            pronunciation: config.pronunciation.clone(),
        }
    }

    pub async fn record_practice(&self, event: &PracticeEvent) -> Result<RetentionState, EngineError> {
        require_id("learnerId", &event.learner_id)?;
        require_id("itemId", &event.item_id)?;

        let existing = self
            .store
            .get_retention_state(&event.learner_id, event.kind, &event.item_id)
            .await?;
        let is_new = existing.is_none();

        let next = apply_practice(existing, event, &self.scheduler, &self.history);
        self.store.upsert_retention_state(&next).await?;

        tracing::debug!(
            learner_id = %next.learner_id,
            item_id = %next.item_id,
            kind = next.kind.as_str(),
            created = is_new,
            level = next.knowledge_level,
            ease_factor = next.ease_factor,
            interval_days = next.interval_days,
            "retention state updated"
        );
        Ok(next)
    }

    pub async fn record_pronunciation(
        &self,
        learner_id: &str,
        sound: &str,
        score: f64,
        at: DateTime<Utc>,
    ) -> Result<PronunciationRecord, EngineError> {
        require_id("learnerId", learner_id)?;
        require_id("sound", sound)?;

        let existing = self.store.get_pronunciation_record(learner_id, sound).await?;
        let record = apply_pronunciation_attempt(
            existing.unwrap_or_else(|| PronunciationRecord::new(learner_id, sound, at)),
            score,
            at,
            &self.pronunciation,
        );
        self.store.upsert_pronunciation_record(&record).await?;

        tracing::debug!(
            learner_id = %learner_id,
            sound = %sound,
            score = record.current_score,
            trend = record.trend.as_str(),
            "pronunciation record updated"
        );
        Ok(record)
    }

    pub async fn log_mistake(&self, entry: &MistakeLogEntry) -> Result<(), EngineError> {
        require_id("learnerId", &entry.learner_id)?;
        require_id("item", &entry.item)?;
        self.store.append_mistake_log(entry).await?;
        Ok(())
    }
}

fn require_id(field: &str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Next retention state for `event`, starting from `existing` or a fresh state.
pub fn apply_practice(
    existing: Option<RetentionState>,
    event: &PracticeEvent,
    scheduler_config: &SchedulerConfig,
    history: &HistoryLimits,
) -> RetentionState {
    let now = event.occurred_at;
    let mut state = existing.unwrap_or_else(|| {
        RetentionState::new(
            event.learner_id.clone(),
            event.kind,
            event.item_id.clone(),
            scheduler_config.default_ease_factor,
            now,
        )
    });

    if !(MIN_QUALITY..=MAX_QUALITY).contains(&event.quality) {
        tracing::warn!(
            learner_id = %event.learner_id,
            item_id = %event.item_id,
            quality = event.quality,
            "quality out of range, clamping"
        );
    }
    let quality = scheduler::clamp_quality(event.quality);

    let input = ReviewInput {
        knowledge_level: state.knowledge_level,
        ease_factor: state.ease_factor,
        interval_days: state.interval_days,
        repetition_count: state.repetition_count,
        perfect_streak: state.perfect_streak,
    };
    let outcome = scheduler::plan_review(&input, quality, event.suggested_level, now, scheduler_config);

    state.knowledge_level = outcome.knowledge_level;
    state.ease_factor = outcome.ease_factor;
    state.interval_days = outcome.interval_days;
    state.repetition_count = outcome.repetition_count;
    state.perfect_streak = outcome.perfect_streak;
    state.next_review_at = outcome.next_review_at;

    state.times_seen = state.times_seen.saturating_add(1);
    state.last_seen = Some(now);
    if outcome.success {
        state.times_correct = state.times_correct.saturating_add(1);
        state.last_correct = Some(now);
    } else {
        state.times_incorrect = state.times_incorrect.saturating_add(1);
        state.last_incorrect = Some(now);
    }

    if let Some(score) = event.pronunciation_score.filter(|s| s.is_finite()) {
        let score = score.clamp(0.0, 1.0);
        state.pronunciation_score =
            running_average(state.pronunciation_score, state.pronunciation_attempts, score);
        state.pronunciation_attempts = state.pronunciation_attempts.saturating_add(1);
    }

    if let Some(context) = event.context.as_deref() {
        push_context(&mut state.recent_contexts, context, history.contexts);
    }

    if let Some(mistake) = &event.mistake {
        push_bounded(
            &mut state.recent_mistakes,
            MistakeNote {
                expected: mistake.expected.clone(),
                actual: mistake.actual.clone(),
                noted_at: now,
            },
            history.mistakes_for(state.kind),
        );
    }

    state.updated_at = now;
    state
}

/// `(prev_avg * prev_count + value) / (prev_count + 1)`.
pub fn running_average(previous_average: f64, previous_count: u32, value: f64) -> f64 {
    let count = previous_count as f64;
    (previous_average * count + value) / (count + 1.0)
}

pub fn push_bounded<T>(list: &mut VecDeque<T>, value: T, capacity: usize) {
    list.push_back(value);
    while list.len() > capacity {
        list.pop_front();
    }
}

/// Moves a repeated context to the newest slot instead of storing it twice.
pub fn push_context(list: &mut VecDeque<String>, context: &str, capacity: usize) {
    let context = context.trim();
    if context.is_empty() {
        return;
    }
    list.retain(|c| c != context);
    push_bounded(list, context.to_string(), capacity);
}

pub fn apply_pronunciation_attempt(
    mut record: PronunciationRecord,
    score: f64,
    at: DateTime<Utc>,
    config: &PronunciationConfig,
) -> PronunciationRecord {
    if !score.is_finite() {
        tracing::warn!(sound = %record.sound, "non-finite pronunciation score ignored");
        return record;
    }
    let score = score.clamp(0.0, 1.0);

    record.current_score = running_average(record.current_score, record.total_attempts, score);
    record.total_attempts = record.total_attempts.saturating_add(1);
    record.best_score = record.best_score.max(score);
    push_bounded(&mut record.recent_scores, score, config.recent_scores);
    record.trend = pronunciation_trend(&record.recent_scores, config);
    record.updated_at = at;
    record
}

/// Compares the newest `trend_window` scores with the window before them.
pub fn pronunciation_trend(scores: &VecDeque<f64>, config: &PronunciationConfig) -> PronunciationTrend {
    let window = config.trend_window.max(1);
    if scores.len() < window * 2 {
        return PronunciationTrend::Stable;
    }
    let mean = |values: &[f64]| values.iter().sum::<f64>() / values.len() as f64;

    let ordered: Vec<f64> = scores.iter().copied().collect();
    let split = ordered.len() - window;
    let recent = mean(&ordered[split..]);
    let previous = mean(&ordered[split - window..split]);
    let change = recent - previous;

    if change > config.trend_threshold {
        PronunciationTrend::Improving
    } else if change < -config.trend_threshold {
        PronunciationTrend::Declining
    } else {
        PronunciationTrend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap()
    }

    fn apply(existing: Option<RetentionState>, event: &PracticeEvent) -> RetentionState {
        apply_practice(existing, event, &SchedulerConfig::default(), &HistoryLimits::default())
    }

    #[test]
    fn test_first_practice_creates_state() {
        let event = PracticeEvent::new("u1", ItemKind::Word, "perro", 4, 2, now());
        let state = apply(None, &event);

        assert_eq!(state.times_seen, 1);
        assert_eq!(state.times_correct, 1);
        assert_eq!(state.times_incorrect, 0);
        assert_eq!(state.repetition_count, 1);
        assert_eq!(state.knowledge_level, 2);
        assert!((state.ease_factor - 2.5).abs() < 1e-9);
        assert!((state.interval_days - 1.0).abs() < 1e-9);
        assert_eq!(state.next_review_at, now() + Duration::days(1));
        assert_eq!(state.last_correct, Some(now()));
        assert!(state.last_incorrect.is_none());
    }

    #[test]
    fn test_failure_resets_repetitions() {
        let first = apply(None, &PracticeEvent::new("u1", ItemKind::Word, "gato", 5, 3, now()));
        let second = apply(
            Some(first),
            &PracticeEvent::new("u1", ItemKind::Word, "gato", 1, 3, now() + Duration::days(1)),
        );
        assert_eq!(second.repetition_count, 0);
        assert_eq!(second.perfect_streak, 0);
        assert_eq!(second.times_incorrect, 1);
        assert!((second.interval_days - 0.5).abs() < 1e-9);
        assert_eq!(second.knowledge_level, 3);
    }

    #[test]
    fn test_out_of_range_quality_is_clamped() {
        let state = apply(None, &PracticeEvent::new("u1", ItemKind::Word, "sol", 11, 99, now()));
        assert_eq!(state.knowledge_level, 7);
        assert!((state.ease_factor - 2.6).abs() < 1e-9);

        let state = apply(None, &PracticeEvent::new("u1", ItemKind::Word, "luna", -3, -9, now()));
        assert_eq!(state.knowledge_level, 0);
        assert_eq!(state.times_incorrect, 1);
    }

    #[test]
    fn test_pronunciation_running_average() {
        let first = apply(
            None,
            &PracticeEvent::new("u1", ItemKind::Word, "rojo", 4, 1, now()).with_pronunciation(0.4),
        );
        let second = apply(
            Some(first),
            &PracticeEvent::new("u1", ItemKind::Word, "rojo", 4, 1, now()).with_pronunciation(0.8),
        );
        assert_eq!(second.pronunciation_attempts, 2);
        assert!((second.pronunciation_score - 0.6).abs() < 1e-9);

        let third = apply(
            Some(second),
            &PracticeEvent::new("u1", ItemKind::Word, "rojo", 4, 1, now()).with_pronunciation(7.0),
        );
        assert!((third.pronunciation_score - (0.6 * 2.0 + 1.0) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_contexts_deduplicated_and_bounded() {
        let mut state = None;
        for i in 0..12 {
            let event = PracticeEvent::new("u1", ItemKind::Phrase, "de nada", 4, 2, now())
                .with_context(format!("ctx-{i}"));
            state = Some(apply(state, &event));
        }
        let event = PracticeEvent::new("u1", ItemKind::Phrase, "de nada", 4, 2, now())
            .with_context("ctx-5");
        let state = apply(state, &event);

        assert_eq!(state.recent_contexts.len(), 10);
        assert_eq!(state.recent_contexts.back().map(String::as_str), Some("ctx-5"));
        assert_eq!(state.recent_contexts.iter().filter(|c| *c == "ctx-5").count(), 1);
        assert!(!state.recent_contexts.iter().any(|c| c == "ctx-0"));
    }

    #[test]
    fn test_mistake_caps_follow_item_kind() {
        let mut word = None;
        let mut rule = None;
        for i in 0..25 {
            let w = PracticeEvent::new("u1", ItemKind::Word, "casa", 1, 0, now())
                .with_mistake("casa", format!("caza-{i}"));
            let r = PracticeEvent::new("u1", ItemKind::GrammarRule, "ser-estar", 1, 0, now())
                .with_mistake("es", format!("está-{i}"));
            word = Some(apply(word, &w));
            rule = Some(apply(rule, &r));
        }
        let word = word.unwrap();
        let rule = rule.unwrap();
        assert_eq!(word.recent_mistakes.len(), 20);
        assert_eq!(rule.recent_mistakes.len(), 15);
        assert_eq!(word.recent_mistakes.front().unwrap().actual, "caza-5");
        assert_eq!(rule.recent_mistakes.back().unwrap().actual, "está-24");
    }

    #[test]
    fn test_pronunciation_trend_detection() {
        let config = PronunciationConfig::default();
        let rising: VecDeque<f64> = vec![0.2, 0.25, 0.2, 0.5, 0.55, 0.6].into();
        assert_eq!(pronunciation_trend(&rising, &config), PronunciationTrend::Improving);
        let falling: VecDeque<f64> = vec![0.8, 0.8, 0.8, 0.5, 0.5, 0.5].into();
        assert_eq!(pronunciation_trend(&falling, &config), PronunciationTrend::Declining);
        let short: VecDeque<f64> = vec![0.1, 0.9].into();
        assert_eq!(pronunciation_trend(&short, &config), PronunciationTrend::Stable);
    }

    #[test]
    fn test_pronunciation_attempt_updates_record() {
        let config = PronunciationConfig::default();
        let mut record = PronunciationRecord::new("u1", "rr", now());
        for score in [0.2, 0.3, 0.9] {
            record = apply_pronunciation_attempt(record, score, now(), &config);
        }
        assert_eq!(record.total_attempts, 3);
        assert!((record.current_score - (0.2 + 0.3 + 0.9) / 3.0).abs() < 1e-9);
        assert!((record.best_score - 0.9).abs() < 1e-9);
        assert_eq!(record.recent_scores.len(), 3);

        let unchanged = apply_pronunciation_attempt(record.clone(), f64::NAN, now(), &config);
        assert_eq!(unchanged, record);
    }
}
