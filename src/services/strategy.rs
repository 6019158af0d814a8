//! Teaching-strategy selection.
//!
//! Stateless: every decision is derived from the snapshot and session progress
//! passed in. Primary selection is first-match over:
//! due items, weak points, vocabulary/grammar balance, problem sounds, then the book.

use serde::{Deserialize, Serialize};

use crate::config::StrategyConfig;
use crate::types::{KnowledgeSnapshot, LearningStrategy, StrategyDecision};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    pub strategy: LearningStrategy,
    pub minutes_on_strategy: f64,
    pub recent_attempts: u32,
    pub recent_errors: u32,
    pub queue_remaining: usize,
}

impl SessionProgress {
    pub fn new(strategy: LearningStrategy) -> Self {
        Self {
            strategy,
            minutes_on_strategy: 0.0,
            recent_attempts: 0,
            recent_errors: 0,
            queue_remaining: 0,
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.recent_attempts == 0 {
            return 0.0;
        }
        let errors = self.recent_errors.min(self.recent_attempts);
        errors as f64 / self.recent_attempts as f64
    }

    fn minutes(&self) -> f64 {
        if self.minutes_on_strategy.is_finite() {
            self.minutes_on_strategy.max(0.0)
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchDecision {
    pub switch: bool,
    pub reason: Option<String>,
    pub next: Option<StrategyDecision>,
}

pub struct StrategySelector {
    config: StrategyConfig,
}

impl StrategySelector {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn select(&self, snapshot: &KnowledgeSnapshot) -> StrategyDecision {
        let (primary, reason) = self.primary(snapshot);
        let decision = StrategyDecision {
            primary,
            secondary: secondary_for(primary),
            reason,
        };
        tracing::info!(
            learner_id = %snapshot.learner_id,
            primary = decision.primary.as_str(),
            secondary = decision.secondary.as_str(),
            focus = decision.primary.focus(),
            reason = %decision.reason,
            "strategy selected"
        );
        decision
    }

    fn primary(&self, snapshot: &KnowledgeSnapshot) -> (LearningStrategy, String) {
        let cfg = &self.config;

        let due = snapshot.vocabulary.due + snapshot.grammar.due;
        if due > cfg.due_items_threshold {
            return (
                LearningStrategy::Repetition,
                format!(
                    "{due} items are due for review ({} words, {} rules; threshold {})",
                    snapshot.vocabulary.due, snapshot.grammar.due, cfg.due_items_threshold
                ),
            );
        }

        let weak = snapshot.weak_points.len();
        if weak > cfg.weak_points_threshold {
            return (
                LearningStrategy::GapFilling,
                format!("{weak} weak points detected (threshold {})", cfg.weak_points_threshold),
            );
        }

        let ratio = vocabulary_grammar_ratio(snapshot);
        if ratio > cfg.ratio_upper_bound {
            return (
                LearningStrategy::GrammarDrill,
                format!(
                    "vocabulary to grammar ratio {ratio:.2} is above {:.2}, grammar is lagging",
                    cfg.ratio_upper_bound
                ),
            );
        }
        if ratio < cfg.ratio_lower_bound {
            return (
                LearningStrategy::VocabularyBoost,
                format!(
                    "vocabulary to grammar ratio {ratio:.2} is below {:.2}, vocabulary is lagging",
                    cfg.ratio_lower_bound
                ),
            );
        }

        let problem_sounds = snapshot.pronunciation.problem_sounds.len();
        if problem_sounds > cfg.problem_sounds_threshold {
            return (
                LearningStrategy::Pronunciation,
                format!(
                    "{problem_sounds} problem sounds ({}) exceed threshold {}",
                    snapshot.pronunciation.problem_sounds.join(", "),
                    cfg.problem_sounds_threshold
                ),
            );
        }

        let reason = match &snapshot.book_progress {
            Some(book) => format!(
                "knowledge is balanced, continue book '{}' at chapter {}/{} ({:.0}% complete)",
                book.book_id,
                book.current_chapter,
                book.total_chapters,
                book.completion_ratio() * 100.0
            ),
            None => "knowledge is balanced, continue the curriculum".to_string(),
        };
        (LearningStrategy::LinearBook, reason)
    }

    /// Why the active strategy should be left, or `None` to keep it.
    pub fn switch_reason(&self, progress: &SessionProgress) -> Option<String> {
        let cfg = &self.config;
        let minutes = progress.minutes();
        if minutes >= cfg.max_minutes_per_strategy {
            return Some(format!(
                "{minutes:.0} minutes on {} reached the {:.0} minute limit",
                progress.strategy.as_str(),
                cfg.max_minutes_per_strategy
            ));
        }

        if progress.recent_attempts >= cfg.min_attempts_for_error_rate {
            let error_rate = progress.error_rate();
            if error_rate > cfg.max_error_rate {
                return Some(format!(
                    "recent error rate {:.0}% exceeds {:.0}%",
                    error_rate * 100.0,
                    cfg.max_error_rate * 100.0
                ));
            }
        }

        if progress.strategy == LearningStrategy::Repetition && progress.queue_remaining == 0 {
            return Some("review queue exhausted".to_string());
        }

        None
    }

    pub fn should_switch(&self, progress: &SessionProgress) -> bool {
        self.switch_reason(progress).is_some()
    }

    /// Strategy to move to once a switch is warranted.
    ///
    /// A struggling learner is de-escalated to free practice, or out of it when
    /// free practice is already running. Otherwise a fresh
    /// snapshot is re-evaluated; without one the fixed rotation applies.
    pub fn next_strategy(
        &self,
        progress: &SessionProgress,
        snapshot: Option<&KnowledgeSnapshot>,
    ) -> StrategyDecision {
        if self.is_struggling(progress) {
            let error_pct = progress.error_rate() * 100.0;
            if progress.strategy == LearningStrategy::FreePractice {
                let fallback = secondary_for(LearningStrategy::FreePractice);
                return StrategyDecision {
                    primary: fallback,
                    secondary: secondary_for(fallback),
                    reason: format!(
                        "error rate {error_pct:.0}% stays high during free practice, moving to {}",
                        fallback.as_str()
                    ),
                };
            }
            return StrategyDecision {
                primary: LearningStrategy::FreePractice,
                secondary: secondary_for(LearningStrategy::FreePractice),
                reason: format!("error rate {error_pct:.0}% is too high, easing off with free practice"),
            };
        }

        if let Some(snapshot) = snapshot {
            let (primary, reason) = self.primary(snapshot);
            if primary != progress.strategy {
                return StrategyDecision {
                    primary,
                    secondary: secondary_for(primary),
                    reason,
                };
            }
            let fallback = secondary_for(primary);
            return StrategyDecision {
                primary: fallback,
                secondary: secondary_for(fallback),
                reason: format!("{reason}; {} is already active, moving to its fallback", primary.as_str()),
            };
        }

        let next = rotation_after(progress.strategy);
        StrategyDecision {
            primary: next,
            secondary: secondary_for(next),
            reason: format!("rotating from {} to {}", progress.strategy.as_str(), next.as_str()),
        }
    }

    pub fn evaluate_session(
        &self,
        progress: &SessionProgress,
        snapshot: Option<&KnowledgeSnapshot>,
    ) -> SwitchDecision {
        let Some(reason) = self.switch_reason(progress) else {
            return SwitchDecision {
                switch: false,
                reason: None,
                next: None,
            };
        };

        let next = self.next_strategy(progress, snapshot);
        tracing::info!(
            from = progress.strategy.as_str(),
            to = next.primary.as_str(),
            trigger = %reason,
            "strategy switch"
        );
        SwitchDecision {
            switch: true,
            reason: Some(reason),
            next: Some(next),
        }
    }

    fn is_struggling(&self, progress: &SessionProgress) -> bool {
        progress.recent_attempts >= self.config.min_attempts_for_error_rate
            && progress.error_rate() > self.config.max_error_rate
    }
}

impl Default for StrategySelector {
    fn default() -> Self {
        Self::new(StrategyConfig::default())
    }
}

/// Vocabulary size over grammar size. An empty grammar side counts as one rule,
/// and an empty snapshot is balanced.
pub fn vocabulary_grammar_ratio(snapshot: &KnowledgeSnapshot) -> f64 {
    let vocabulary = snapshot.vocabulary.total as f64;
    let grammar = snapshot.grammar.total as f64;
    if vocabulary == 0.0 && grammar == 0.0 {
        return 1.0;
    }
    vocabulary / grammar.max(1.0)
}

/// Fixed fallback suggestion shown next to a primary choice.
pub fn secondary_for(primary: LearningStrategy) -> LearningStrategy {
    match primary {
        LearningStrategy::Repetition => LearningStrategy::LinearBook,
        LearningStrategy::GapFilling => LearningStrategy::Repetition,
        LearningStrategy::GrammarDrill => LearningStrategy::LinearBook,
        LearningStrategy::VocabularyBoost => LearningStrategy::LinearBook,
        LearningStrategy::Pronunciation => LearningStrategy::FreePractice,
        LearningStrategy::LinearBook => LearningStrategy::Repetition,
        LearningStrategy::FreePractice => LearningStrategy::LinearBook,
    }
}

/// Rotation used mid-session when no fresh snapshot is available.
pub fn rotation_after(current: LearningStrategy) -> LearningStrategy {
    match current {
        LearningStrategy::Repetition => LearningStrategy::LinearBook,
        LearningStrategy::GapFilling => LearningStrategy::FreePractice,
        LearningStrategy::GrammarDrill => LearningStrategy::VocabularyBoost,
        LearningStrategy::VocabularyBoost => LearningStrategy::GrammarDrill,
        LearningStrategy::Pronunciation => LearningStrategy::LinearBook,
        LearningStrategy::LinearBook => LearningStrategy::FreePractice,
        LearningStrategy::FreePractice => LearningStrategy::LinearBook,
    }
}
