use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::ItemKind;

pub const CONFIG_PATH_ENV: &str = "TUTOR_ENGINE_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulerConfig {
    pub min_ease_factor: f64,
    pub default_ease_factor: f64,
    pub failure_interval_days: f64,
    pub first_interval_days: f64,
    pub second_interval_days: f64,
    pub streak_threshold: u32,
    pub streak_multiplier: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_ease_factor: 1.3,
            default_ease_factor: 2.5,
            failure_interval_days: 0.5,
            first_interval_days: 1.0,
            second_interval_days: 3.0,
            streak_threshold: 3,
            streak_multiplier: 1.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HistoryLimits {
    pub word_mistakes: usize,
    pub grammar_mistakes: usize,
    pub phrase_mistakes: usize,
    pub contexts: usize,
}

impl HistoryLimits {
    pub fn mistakes_for(&self, kind: ItemKind) -> usize {
        match kind {
            ItemKind::Word => self.word_mistakes,
            ItemKind::GrammarRule => self.grammar_mistakes,
            ItemKind::Phrase => self.phrase_mistakes,
        }
    }
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            word_mistakes: 20,
            grammar_mistakes: 15,
            phrase_mistakes: 20,
            contexts: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PronunciationConfig {
    pub recent_scores: usize,
    pub trend_window: usize,
    pub trend_threshold: f64,
    pub problem_score: f64,
    pub min_attempts: u32,
}

impl PronunciationConfig {
    /// Problem sound: low running score over enough attempts. Shared by weak-point
    /// detection and the snapshot's pronunciation summary.
    pub fn is_problem_sound(&self, current_score: f64, total_attempts: u32) -> bool {
        current_score < self.problem_score && total_attempts > self.min_attempts
    }
}

impl Default for PronunciationConfig {
    fn default() -> Self {
        Self {
            recent_scores: 10,
            trend_window: 3,
            trend_threshold: 0.05,
            problem_score: 0.5,
            min_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WeakPointConfig {
    pub max_weak_level: u8,
    pub min_grammar_practice: u32,
    pub pattern_min_occurrences: usize,
    pub pattern_saturation: f64,
    pub mistake_window: usize,
    pub default_limit: usize,
}

impl Default for WeakPointConfig {
    fn default() -> Self {
        Self {
            max_weak_level: 2,
            min_grammar_practice: 3,
            pattern_min_occurrences: 3,
            pattern_saturation: 10.0,
            mistake_window: 50,
            default_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReviewQueueConfig {
    pub critical_max_level: u8,
    pub critical_overdue_days: f64,
    pub important_max_level: u8,
    pub supporting_max_level: u8,
    pub words_per_session: usize,
    pub rules_per_session: usize,
    pub phrases_per_session: usize,
}

impl ReviewQueueConfig {
    pub fn session_size(&self, kind: ItemKind) -> usize {
        match kind {
            ItemKind::Word => self.words_per_session,
            ItemKind::GrammarRule => self.rules_per_session,
            ItemKind::Phrase => self.phrases_per_session,
        }
    }
}

impl Default for ReviewQueueConfig {
    fn default() -> Self {
        Self {
            critical_max_level: 2,
            critical_overdue_days: 3.0,
            important_max_level: 4,
            supporting_max_level: 6,
            words_per_session: 15,
            rules_per_session: 10,
            phrases_per_session: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StrategyConfig {
    pub due_items_threshold: usize,
    pub weak_points_threshold: usize,
    pub ratio_upper_bound: f64,
    pub ratio_lower_bound: f64,
    pub problem_sounds_threshold: usize,
    pub max_minutes_per_strategy: f64,
    pub max_error_rate: f64,
    pub min_attempts_for_error_rate: u32,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            due_items_threshold: 10,
            weak_points_threshold: 5,
            ratio_upper_bound: 3.5,
            ratio_lower_bound: 0.5,
            problem_sounds_threshold: 3,
            max_minutes_per_strategy: 25.0,
            max_error_rate: 0.6,
            min_attempts_for_error_rate: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    pub level: String,
    pub file_logs: bool,
    pub log_dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logs: false,
            log_dir: "./logs".to_string(),
        }
    }
}

impl LoggingConfig {
    /// `TUTOR_LOG_LEVEL`/`RUST_LOG`, `ENABLE_FILE_LOGS` and `LOG_DIR` win over file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(level) = log_level_from_env() {
            self.level = level;
        }
        if let Ok(flag) = std::env::var("ENABLE_FILE_LOGS") {
            self.file_logs = flag == "true" || flag == "1";
        }
        if let Ok(dir) = std::env::var("LOG_DIR") {
            if !dir.trim().is_empty() {
                self.log_dir = dir.trim().to_string();
            }
        }
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub history: HistoryLimits,
    pub pronunciation: PronunciationConfig,
    pub weak_points: WeakPointConfig,
    pub review_queue: ReviewQueueConfig,
    pub strategy: StrategyConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Loads the file named by `TUTOR_ENGINE_CONFIG`, or defaults when unset, then
    /// applies the logging environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => {
                let config = Self::from_file(path.trim())?;
                tracing::info!(path = %path.trim(), "engine config loaded from file");
                config
            }
            _ => Self::default(),
        };
        config.logging = config.logging.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scheduler;
        if !(s.min_ease_factor > 0.0) {
            return Err(ConfigError::Invalid("minEaseFactor must be positive".to_string()));
        }
        if s.default_ease_factor < s.min_ease_factor {
            return Err(ConfigError::Invalid(
                "defaultEaseFactor must not be below minEaseFactor".to_string(),
            ));
        }
        if s.failure_interval_days < 0.0
            || s.first_interval_days < 0.0
            || s.second_interval_days < 0.0
        {
            return Err(ConfigError::Invalid("interval days must be non-negative".to_string()));
        }
        if s.streak_multiplier < 1.0 {
            return Err(ConfigError::Invalid("streakMultiplier must be at least 1.0".to_string()));
        }

        let h = &self.history;
        if h.word_mistakes == 0 || h.grammar_mistakes == 0 || h.phrase_mistakes == 0 || h.contexts == 0 {
            return Err(ConfigError::Invalid("history caps must be greater than zero".to_string()));
        }

        let p = &self.pronunciation;
        if p.recent_scores == 0 || p.trend_window == 0 {
            return Err(ConfigError::Invalid(
                "pronunciation windows must be greater than zero".to_string(),
            ));
        }
        // The trend compares two full windows, so fewer kept scores pins it at stable.
        if p.recent_scores < p.trend_window.saturating_mul(2) {
            return Err(ConfigError::Invalid(
                "recentScores must hold at least two trend windows".to_string(),
            ));
        }

        let st = &self.strategy;
        if st.ratio_lower_bound >= st.ratio_upper_bound {
            return Err(ConfigError::Invalid(
                "ratioLowerBound must be below ratioUpperBound".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&st.max_error_rate) {
            return Err(ConfigError::Invalid("maxErrorRate must be within [0, 1]".to_string()));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Invalid("logging level must not be empty".to_string()));
        }

        Ok(())
    }
}

/// `TUTOR_LOG_LEVEL` first, then `RUST_LOG`; `None` when neither is set.
pub fn log_level_from_env() -> Option<String> {
    std::env::var("TUTOR_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .filter(|level| !level.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.scheduler.min_ease_factor - 1.3).abs() < 1e-9);
        assert_eq!(config.history.mistakes_for(ItemKind::GrammarRule), 15);
        assert_eq!(config.review_queue.session_size(ItemKind::Phrase), 5);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            EngineConfig::from_json(r#"{"strategy":{"dueItemsThreshold":4}}"#).unwrap();
        assert_eq!(config.strategy.due_items_threshold, 4);
        assert_eq!(config.strategy.weak_points_threshold, 5);
        assert!((config.scheduler.default_ease_factor - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_inverted_ratio_bounds() {
        let err = EngineConfig::from_json(
            r#"{"strategy":{"ratioLowerBound":4.0,"ratioUpperBound":2.0}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_score_history_shorter_than_two_windows() {
        let err = EngineConfig::from_json(
            r#"{"pronunciation":{"recentScores":5,"trendWindow":3}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(EngineConfig::from_json(r#"{"pronunciation":{"recentScores":6,"trendWindow":3}}"#).is_ok());
    }

    #[test]
    fn test_problem_sound_threshold_is_strict() {
        let p = PronunciationConfig::default();
        assert!(p.is_problem_sound(0.49, 6));
        assert!(!p.is_problem_sound(0.5, 6));
        assert!(!p.is_problem_sound(0.2, 5));
    }

    #[test]
    fn test_rejects_zero_history_cap() {
        let err = EngineConfig::from_json(r#"{"history":{"contexts":0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
