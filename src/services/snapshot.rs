use chrono::{DateTime, Utc};

use crate::config::{EngineConfig, PronunciationConfig};
use crate::services::knowledge_update::EngineError;
use crate::services::review_queue::ReviewQueueBuilder;
use crate::services::strategy::StrategySelector;
use crate::services::weak_points::{WeakPointDetector, WeakPointInput};
use crate::store::KnowledgeStore;
use crate::types::{
    BookProgress, DomainSummary, ItemKind, KnowledgeSnapshot, MistakeLogEntry,
    PronunciationRecord, PronunciationSummary, RetentionState,
};

/// Raw reads a snapshot is computed from.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotParts<'a> {
    pub states: &'a [RetentionState],
    pub pronunciation: &'a [PronunciationRecord],
    pub recent_mistakes: &'a [MistakeLogEntry],
    pub book_progress: Option<&'a BookProgress>,
}

pub struct SnapshotAssembler {
    detector: WeakPointDetector,
    queues: ReviewQueueBuilder,
    selector: StrategySelector,
    pronunciation: PronunciationConfig,
}

impl SnapshotAssembler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            detector: WeakPointDetector::new(
                config.weak_points.clone(),
                config.pronunciation.clone(),
            ),
            queues: ReviewQueueBuilder::new(config.review_queue.clone()),
            selector: StrategySelector::new(config.strategy.clone()),
            pronunciation: config.pronunciation.clone(),
        }
    }

    pub fn selector(&self) -> &StrategySelector {
        &self.selector
    }

    pub fn detector(&self) -> &WeakPointDetector {
        &self.detector
    }

    pub fn queues(&self) -> &ReviewQueueBuilder {
        &self.queues
    }

    /// Reads everything for `learner_id` and builds a fresh snapshot. Nothing is cached.
    pub async fn assemble(
        &self,
        store: &dyn KnowledgeStore,
        learner_id: &str,
        now: DateTime<Utc>,
    ) -> Result<KnowledgeSnapshot, EngineError> {
        if learner_id.trim().is_empty() {
            return Err(EngineError::Validation("learnerId must not be empty".to_string()));
        }

        let states = store.list_retention_states(learner_id, None).await?;
        let pronunciation = store.list_pronunciation_records(learner_id).await?;
        let mistakes = store
            .recent_mistake_logs(learner_id, self.detector.config().mistake_window)
            .await?;
        let book = store.get_book_progress(learner_id).await?;

        let snapshot = self.from_parts(
            learner_id,
            now,
            SnapshotParts {
                states: &states,
                pronunciation: &pronunciation,
                recent_mistakes: &mistakes,
                book_progress: book.as_ref(),
            },
        );

        tracing::debug!(
            learner_id = %learner_id,
            items = states.len(),
            weak_points = snapshot.weak_points.len(),
            queued = snapshot.review_queues.total_len(),
            "knowledge snapshot assembled"
        );
        Ok(snapshot)
    }

    pub fn from_parts(
        &self,
        learner_id: &str,
        now: DateTime<Utc>,
        parts: SnapshotParts<'_>,
    ) -> KnowledgeSnapshot {
        let words: Vec<RetentionState> = of_kind(parts.states, ItemKind::Word);
        let rules: Vec<RetentionState> = of_kind(parts.states, ItemKind::GrammarRule);
        let phrases: Vec<RetentionState> = of_kind(parts.states, ItemKind::Phrase);

        let weak_level = self.detector.config().max_weak_level;
        let weak_points = self.detector.detect(
            &WeakPointInput {
                vocabulary: &words,
                grammar: &rules,
                pronunciation: parts.pronunciation,
                recent_mistakes: parts.recent_mistakes,
            },
            None,
        );

        let mut snapshot = KnowledgeSnapshot {
            learner_id: learner_id.to_string(),
            generated_at: now,
            vocabulary: summarize(&words, now, weak_level),
            grammar: summarize(&rules, now, weak_level),
            phrases: summarize(&phrases, now, weak_level),
            pronunciation: self.summarize_pronunciation(parts.pronunciation),
            book_progress: parts.book_progress.cloned(),
            weak_points,
            review_queues: self.queues.session_queues(parts.states, now),
            recommendation: None,
        };
        snapshot.recommendation = Some(self.selector.select(&snapshot));
        snapshot
    }

    fn summarize_pronunciation(&self, records: &[PronunciationRecord]) -> PronunciationSummary {
        if records.is_empty() {
            return PronunciationSummary::default();
        }
        let problem_sounds = records
            .iter()
            .filter(|r| self.pronunciation.is_problem_sound(r.current_score, r.total_attempts))
            .map(|r| r.sound.clone())
            .collect();
        let average_score =
            records.iter().map(|r| r.current_score).sum::<f64>() / records.len() as f64;

        PronunciationSummary {
            tracked_sounds: records.len(),
            problem_sounds,
            average_score,
        }
    }
}

impl Default for SnapshotAssembler {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

fn of_kind(states: &[RetentionState], kind: ItemKind) -> Vec<RetentionState> {
    states.iter().filter(|s| s.kind == kind).cloned().collect()
}

pub fn summarize(states: &[RetentionState], now: DateTime<Utc>, weak_level: u8) -> DomainSummary {
    if states.is_empty() {
        return DomainSummary::default();
    }
    let level_sum: u32 = states.iter().map(|s| s.knowledge_level as u32).sum();
    DomainSummary {
        total: states.len(),
        due: states.iter().filter(|s| s.is_due(now)).count(),
        mastered: states.iter().filter(|s| s.is_mastered()).count(),
        struggling: states.iter().filter(|s| s.knowledge_level <= weak_level).count(),
        average_level: level_sum as f64 / states.len() as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LearningStrategy, PronunciationTrend};
    use chrono::{Duration, TimeZone};
    use std::collections::VecDeque;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 18, 0, 0).unwrap()
    }

    fn item(kind: ItemKind, id: &str, level: u8, due: bool) -> RetentionState {
        let mut s = RetentionState::new("u1", kind, id, 2.5, now() - Duration::days(30));
        s.knowledge_level = level;
        s.times_seen = 4;
        s.times_correct = 3;
        s.times_incorrect = 1;
        s.next_review_at = if due {
            now() - Duration::days(1)
        } else {
            now() + Duration::days(5)
        };
        s
    }

    #[test]
    fn test_summaries_count_due_and_mastered() {
        let states = vec![
            item(ItemKind::Word, "a", 7, true),
            item(ItemKind::Word, "b", 1, false),
            item(ItemKind::Word, "c", 4, true),
        ];
        let summary = summarize(&states, now(), 2);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.due, 2);
        assert_eq!(summary.mastered, 1);
        assert_eq!(summary.struggling, 1);
        assert!((summary.average_level - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_from_parts_recommends_repetition_when_many_due() {
        let assembler = SnapshotAssembler::default();
        let mut states: Vec<RetentionState> = (0..15)
            .map(|i| item(ItemKind::Word, &format!("w{i}"), 4, true))
            .collect();
        states.extend((0..2).map(|i| item(ItemKind::GrammarRule, &format!("g{i}"), 4, true)));
        states.extend((0..3).map(|i| item(ItemKind::GrammarRule, &format!("h{i}"), 4, false)));

        let snapshot = assembler.from_parts(
            "u1",
            now(),
            SnapshotParts {
                states: &states,
                ..Default::default()
            },
        );

        assert_eq!(snapshot.vocabulary.due, 15);
        assert_eq!(snapshot.grammar.due, 2);
        assert_eq!(snapshot.review_queues.words.len(), 15);
        assert_eq!(snapshot.review_queues.grammar_rules.len(), 2);
        assert_eq!(
            snapshot.recommendation.as_ref().map(|r| r.primary),
            Some(LearningStrategy::Repetition)
        );
    }

    #[test]
    fn test_problem_sound_override_reaches_summary_and_weak_points() {
        let mut config = EngineConfig::default();
        config.pronunciation.problem_score = 0.7;
        let assembler = SnapshotAssembler::new(&config);
        let records = vec![PronunciationRecord {
            learner_id: "u1".into(),
            sound: "rr".into(),
            current_score: 0.6,
            best_score: 0.6,
            total_attempts: 8,
            recent_scores: VecDeque::new(),
            trend: PronunciationTrend::Stable,
            updated_at: now(),
        }];

        let snapshot = assembler.from_parts(
            "u1",
            now(),
            SnapshotParts {
                pronunciation: &records,
                ..Default::default()
            },
        );
        assert_eq!(snapshot.pronunciation.problem_sounds, vec!["rr".to_string()]);
        assert!(snapshot
            .weak_points
            .iter()
            .any(|w| w.category == crate::types::WeakPointCategory::Pronunciation));
    }

    #[test]
    fn test_problem_sounds_counted() {
        let assembler = SnapshotAssembler::default();
        let records: Vec<PronunciationRecord> = [("rr", 0.3, 9), ("ñ", 0.45, 3), ("j", 0.8, 12)]
            .into_iter()
            .map(|(sound, score, attempts)| PronunciationRecord {
                learner_id: "u1".into(),
                sound: sound.into(),
                current_score: score,
                best_score: score,
                total_attempts: attempts,
                recent_scores: VecDeque::new(),
                trend: PronunciationTrend::Stable,
                updated_at: now(),
            })
            .collect();
        let summary = assembler.summarize_pronunciation(&records);
        assert_eq!(summary.tracked_sounds, 3);
        assert_eq!(summary.problem_sounds, vec!["rr".to_string()]);
    }
}
