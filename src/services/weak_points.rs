use std::collections::HashMap;

use crate::config::{PronunciationConfig, WeakPointConfig};
use crate::types::{
    MistakeLogEntry, MistakeType, PronunciationRecord, PronunciationTrend, RetentionState,
    WeakPoint, WeakPointCategory, MAX_KNOWLEDGE_LEVEL,
};

/// Aggregates scanned by the detector. `recent_mistakes` is expected newest first.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeakPointInput<'a> {
    pub vocabulary: &'a [RetentionState],
    pub grammar: &'a [RetentionState],
    pub pronunciation: &'a [PronunciationRecord],
    pub recent_mistakes: &'a [MistakeLogEntry],
}

pub struct WeakPointDetector {
    config: WeakPointConfig,
    pronunciation: PronunciationConfig,
}

impl WeakPointDetector {
    pub fn new(config: WeakPointConfig, pronunciation: PronunciationConfig) -> Self {
        Self {
            config,
            pronunciation,
        }
    }

    pub fn config(&self) -> &WeakPointConfig {
        &self.config
    }

    /// Ranked weak points, highest severity first. `limit` defaults to the configured one.
    pub fn detect(&self, input: &WeakPointInput<'_>, limit: Option<usize>) -> Vec<WeakPoint> {
        let limit = limit.unwrap_or(self.config.default_limit);

        let mut points = Vec::new();
        points.extend(self.vocabulary_points(input.vocabulary));
        points.extend(self.grammar_points(input.grammar));
        points.extend(self.pronunciation_points(input.pronunciation));
        points.extend(self.mistake_patterns(input.recent_mistakes));

        // sort_by is stable, so equal severities keep scan order.
        points.sort_by(|a, b| b.severity.total_cmp(&a.severity));
        points.truncate(limit);
        points
    }

    pub fn vocabulary_points(&self, states: &[RetentionState]) -> Vec<WeakPoint> {
        states
            .iter()
            .filter(|s| s.knowledge_level <= self.config.max_weak_level)
            .map(|s| {
                let (severity, detail) = if s.times_correct == 0 {
                    (1.0, "never recalled correctly".to_string())
                } else {
                    let accuracy = s.accuracy().unwrap_or(0.0);
                    (1.0 - accuracy, format!("accuracy {:.0}%", accuracy * 100.0))
                };
                WeakPoint {
                    description: format!(
                        "Word '{}' is weak (level {}, {})",
                        s.item_id, s.knowledge_level, detail
                    ),
                    category: WeakPointCategory::Vocabulary,
                    severity: clamp_severity(severity),
                }
            })
            .collect()
    }

    pub fn grammar_points(&self, states: &[RetentionState]) -> Vec<WeakPoint> {
        states
            .iter()
            .filter(|s| {
                s.knowledge_level <= self.config.max_weak_level
                    && s.times_seen >= self.config.min_grammar_practice
            })
            .map(|s| WeakPoint {
                description: format!(
                    "Grammar rule '{}' still at level {} after {} practices",
                    s.item_id, s.knowledge_level, s.times_seen
                ),
                category: WeakPointCategory::Grammar,
                severity: clamp_severity(
                    1.0 - s.knowledge_level as f64 / MAX_KNOWLEDGE_LEVEL as f64,
                ),
            })
            .collect()
    }

    pub fn pronunciation_points(&self, records: &[PronunciationRecord]) -> Vec<WeakPoint> {
        records
            .iter()
            .filter(|r| {
                self.pronunciation.is_problem_sound(r.current_score, r.total_attempts)
                    && r.trend != PronunciationTrend::Improving
            })
            .map(|r| WeakPoint {
                description: format!(
                    "Sound '{}' scores {:.0}% over {} attempts ({})",
                    r.sound,
                    r.current_score * 100.0,
                    r.total_attempts,
                    r.trend.as_str()
                ),
                category: WeakPointCategory::Pronunciation,
                severity: clamp_severity(1.0 - r.current_score),
            })
            .collect()
    }

    /// Groups the mistake window by `(type, item)`; groups keep first-seen order.
    pub fn mistake_patterns(&self, mistakes: &[MistakeLogEntry]) -> Vec<WeakPoint> {
        let window = &mistakes[..mistakes.len().min(self.config.mistake_window)];

        let mut order: Vec<(MistakeType, &str)> = Vec::new();
        let mut counts: HashMap<(MistakeType, &str), usize> = HashMap::new();
        for entry in window {
            let key = (entry.mistake_type, entry.item.as_str());
            let count = counts.entry(key).or_insert(0);
            if *count == 0 {
                order.push(key);
            }
            *count += 1;
        }

        let saturation = self.config.pattern_saturation.max(1.0);
        order
            .into_iter()
            .filter_map(|key| {
                let count = counts.get(&key).copied().unwrap_or(0);
                if count < self.config.pattern_min_occurrences {
                    return None;
                }
                Some(WeakPoint {
                    description: format!(
                        "Repeated {} mistake on '{}' ({} times)",
                        key.0.as_str(),
                        key.1,
                        count
                    ),
                    category: WeakPointCategory::MistakePattern,
                    severity: (count as f64 / saturation).min(1.0),
                })
            })
            .collect()
    }
}

impl Default for WeakPointDetector {
    fn default() -> Self {
        Self::new(WeakPointConfig::default(), PronunciationConfig::default())
    }
}

fn clamp_severity(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        1.0
    }
}
