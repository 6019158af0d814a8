use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MIN_KNOWLEDGE_LEVEL: u8 = 0;
pub const MAX_KNOWLEDGE_LEVEL: u8 = 7;
pub const MIN_QUALITY: i32 = 0;
pub const MAX_QUALITY: i32 = 5;
/// Lowest quality that still counts as a successful recall.
pub const PASSING_QUALITY: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Word,
    GrammarRule,
    Phrase,
}

impl ItemKind {
    pub const ALL: [ItemKind; 3] = [ItemKind::Word, ItemKind::GrammarRule, ItemKind::Phrase];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Word => "word",
            Self::GrammarRule => "grammar_rule",
            Self::Phrase => "phrase",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "word" | "vocabulary" => Some(Self::Word),
            "grammar_rule" | "grammar" | "rule" => Some(Self::GrammarRule),
            "phrase" => Some(Self::Phrase),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MistakeNote {
    pub expected: String,
    pub actual: String,
    pub noted_at: DateTime<Utc>,
}

/// Per learner and item scheduling state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionState {
    pub id: String,
    pub learner_id: String,
    pub item_id: String,
    pub kind: ItemKind,
    pub knowledge_level: u8,
    pub ease_factor: f64,
    pub interval_days: f64,
    pub repetition_count: u32,
    pub perfect_streak: u32,
    pub next_review_at: DateTime<Utc>,
    pub times_seen: u32,
    pub times_correct: u32,
    pub times_incorrect: u32,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_correct: Option<DateTime<Utc>>,
    pub last_incorrect: Option<DateTime<Utc>>,
    pub pronunciation_score: f64,
    pub pronunciation_attempts: u32,
    pub recent_mistakes: VecDeque<MistakeNote>,
    pub recent_contexts: VecDeque<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RetentionState {
    /// Blank state for an item the learner has never practiced.
    pub fn new(
        learner_id: impl Into<String>,
        kind: ItemKind,
        item_id: impl Into<String>,
        ease_factor: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            learner_id: learner_id.into(),
            item_id: item_id.into(),
            kind,
            knowledge_level: MIN_KNOWLEDGE_LEVEL,
            ease_factor,
            interval_days: 0.0,
            repetition_count: 0,
            perfect_streak: 0,
            next_review_at: now,
            times_seen: 0,
            times_correct: 0,
            times_incorrect: 0,
            last_seen: None,
            last_correct: None,
            last_incorrect: None,
            pronunciation_score: 0.0,
            pronunciation_attempts: 0,
            recent_mistakes: VecDeque::new(),
            recent_contexts: VecDeque::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_review_at
    }

    /// `None` until the item has been graded at least once.
    pub fn accuracy(&self) -> Option<f64> {
        let graded = self.times_correct + self.times_incorrect;
        if graded == 0 {
            return None;
        }
        Some(self.times_correct as f64 / graded as f64)
    }

    pub fn is_mastered(&self) -> bool {
        self.knowledge_level >= MAX_KNOWLEDGE_LEVEL
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PronunciationTrend {
    Improving,
    #[default]
    Stable,
    Declining,
}

impl PronunciationTrend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Improving => "improving",
            Self::Stable => "stable",
            Self::Declining => "declining",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "improving" => Self::Improving,
            "declining" => Self::Declining,
            _ => Self::Stable,
        }
    }
}

/// Per learner and sound (phoneme or cluster) pronunciation tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PronunciationRecord {
    pub learner_id: String,
    pub sound: String,
    pub current_score: f64,
    pub best_score: f64,
    pub total_attempts: u32,
    pub recent_scores: VecDeque<f64>,
    pub trend: PronunciationTrend,
    pub updated_at: DateTime<Utc>,
}

impl PronunciationRecord {
    pub fn new(learner_id: impl Into<String>, sound: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            learner_id: learner_id.into(),
            sound: sound.into(),
            current_score: 0.0,
            best_score: 0.0,
            total_attempts: 0,
            recent_scores: VecDeque::new(),
            trend: PronunciationTrend::Stable,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MistakeType {
    Vocabulary,
    Grammar,
    Pronunciation,
    WordOrder,
    Spelling,
}

impl MistakeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vocabulary => "vocabulary",
            Self::Grammar => "grammar",
            Self::Pronunciation => "pronunciation",
            Self::WordOrder => "word_order",
            Self::Spelling => "spelling",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "vocabulary" | "word" => Some(Self::Vocabulary),
            "grammar" => Some(Self::Grammar),
            "pronunciation" => Some(Self::Pronunciation),
            "word_order" => Some(Self::WordOrder),
            "spelling" => Some(Self::Spelling),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MistakeLogEntry {
    pub id: String,
    pub learner_id: String,
    pub mistake_type: MistakeType,
    pub item: String,
    pub expected: String,
    pub actual: String,
    pub occurred_at: DateTime<Utc>,
}

impl MistakeLogEntry {
    pub fn new(
        learner_id: impl Into<String>,
        mistake_type: MistakeType,
        item: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            learner_id: learner_id.into(),
            mistake_type,
            item: item.into(),
            expected: expected.into(),
            actual: actual.into(),
            occurred_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookProgress {
    pub learner_id: String,
    pub book_id: String,
    pub current_chapter: u32,
    pub total_chapters: u32,
    pub completed_lessons: u32,
    pub total_lessons: u32,
    pub updated_at: DateTime<Utc>,
}

impl BookProgress {
    pub fn completion_ratio(&self) -> f64 {
        if self.total_lessons == 0 {
            return 0.0;
        }
        (self.completed_lessons as f64 / self.total_lessons as f64).clamp(0.0, 1.0)
    }

    pub fn is_finished(&self) -> bool {
        self.total_lessons > 0 && self.completed_lessons >= self.total_lessons
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeakPointCategory {
    Vocabulary,
    Grammar,
    Pronunciation,
    MistakePattern,
}

impl WeakPointCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vocabulary => "vocabulary",
            Self::Grammar => "grammar",
            Self::Pronunciation => "pronunciation",
            Self::MistakePattern => "mistake_pattern",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeakPoint {
    pub description: String,
    pub category: WeakPointCategory,
    pub severity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriorityTier {
    Critical,
    Important,
    Supporting,
    Mastery,
}

impl PriorityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::Important => "IMPORTANT",
            Self::Supporting => "SUPPORTING",
            Self::Mastery => "MASTERY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQueueItem {
    pub item_id: String,
    pub kind: ItemKind,
    pub retention: RetentionState,
    pub priority_tier: PriorityTier,
    pub overdue_days: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LearningStrategy {
    Repetition,
    GapFilling,
    GrammarDrill,
    VocabularyBoost,
    Pronunciation,
    LinearBook,
    FreePractice,
}

impl LearningStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Repetition => "REPETITION",
            Self::GapFilling => "GAP_FILLING",
            Self::GrammarDrill => "GRAMMAR_DRILL",
            Self::VocabularyBoost => "VOCABULARY_BOOST",
            Self::Pronunciation => "PRONUNCIATION",
            Self::LinearBook => "LINEAR_BOOK",
            Self::FreePractice => "FREE_PRACTICE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "REPETITION" => Some(Self::Repetition),
            "GAP_FILLING" => Some(Self::GapFilling),
            "GRAMMAR_DRILL" => Some(Self::GrammarDrill),
            "VOCABULARY_BOOST" => Some(Self::VocabularyBoost),
            "PRONUNCIATION" => Some(Self::Pronunciation),
            "LINEAR_BOOK" => Some(Self::LinearBook),
            "FREE_PRACTICE" => Some(Self::FreePractice),
            _ => None,
        }
    }

    /// What the session driver should emphasize while this strategy is active.
    pub fn focus(&self) -> &'static str {
        match self {
            Self::Repetition => "review due words and rules before introducing anything new",
            Self::GapFilling => "target the detected weak points with focused exercises",
            Self::GrammarDrill => "drill grammar rules using already known vocabulary",
            Self::VocabularyBoost => "introduce and practice new vocabulary",
            Self::Pronunciation => "practice the problem sounds with short spoken repetitions",
            Self::LinearBook => "continue with the next lesson of the current book",
            Self::FreePractice => "hold a relaxed free conversation without corrections pressure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyDecision {
    pub primary: LearningStrategy,
    pub secondary: LearningStrategy,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainSummary {
    pub total: usize,
    pub due: usize,
    pub mastered: usize,
    pub struggling: usize,
    pub average_level: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PronunciationSummary {
    pub tracked_sounds: usize,
    pub problem_sounds: Vec<String>,
    pub average_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQueues {
    pub words: Vec<ReviewQueueItem>,
    pub grammar_rules: Vec<ReviewQueueItem>,
    pub phrases: Vec<ReviewQueueItem>,
}

impl ReviewQueues {
    pub fn total_len(&self) -> usize {
        self.words.len() + self.grammar_rules.len() + self.phrases.len()
    }

    pub fn for_kind(&self, kind: ItemKind) -> &[ReviewQueueItem] {
        match kind {
            ItemKind::Word => &self.words,
            ItemKind::GrammarRule => &self.grammar_rules,
            ItemKind::Phrase => &self.phrases,
        }
    }

    pub fn for_kind_mut(&mut self, kind: ItemKind) -> &mut Vec<ReviewQueueItem> {
        match kind {
            ItemKind::Word => &mut self.words,
            ItemKind::GrammarRule => &mut self.grammar_rules,
            ItemKind::Phrase => &mut self.phrases,
        }
    }
}

/// Aggregate read model for one learner, rebuilt for every session refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeSnapshot {
    pub learner_id: String,
    pub generated_at: DateTime<Utc>,
    pub vocabulary: DomainSummary,
    pub grammar: DomainSummary,
    pub phrases: DomainSummary,
    pub pronunciation: PronunciationSummary,
    pub book_progress: Option<BookProgress>,
    pub weak_points: Vec<WeakPoint>,
    pub review_queues: ReviewQueues,
    pub recommendation: Option<StrategyDecision>,
}

impl KnowledgeSnapshot {
    pub fn empty(learner_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            learner_id: learner_id.into(),
            generated_at: now,
            vocabulary: DomainSummary::default(),
            grammar: DomainSummary::default(),
            phrases: DomainSummary::default(),
            pronunciation: PronunciationSummary::default(),
            book_progress: None,
            weak_points: Vec::new(),
            review_queues: ReviewQueues::default(),
            recommendation: None,
        }
    }
}
