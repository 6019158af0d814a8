//! Modified SM-2 scheduling.
//!
//! Every function is pure. Out-of-range quality and level inputs are clamped
//! rather than rejected because the grading source is approximate.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;
use crate::types::{MAX_KNOWLEDGE_LEVEL, MAX_QUALITY, MIN_QUALITY, PASSING_QUALITY};

const MS_PER_DAY: f64 = 86_400_000.0;
const MAX_INTERVAL_DAYS: f64 = 36_500.0;

pub fn clamp_quality(quality: i32) -> i32 {
    quality.clamp(MIN_QUALITY, MAX_QUALITY)
}

pub fn clamp_level(level: i32) -> u8 {
    level.clamp(0, MAX_KNOWLEDGE_LEVEL as i32) as u8
}

pub fn is_success(quality: i32) -> bool {
    clamp_quality(quality) >= PASSING_QUALITY
}

/// `repetition` is the consecutive-success count before this review.
pub fn calculate_interval(
    repetition: u32,
    quality: i32,
    ease_factor: f64,
    previous_interval: f64,
    config: &SchedulerConfig,
) -> f64 {
    if !is_success(quality) {
        return config.failure_interval_days;
    }
    match repetition {
        0 => config.first_interval_days,
        1 => config.second_interval_days,
        _ => {
            let ef = sanitize_ease_factor(ease_factor, config);
            let previous = if previous_interval.is_finite() {
                previous_interval.max(0.0)
            } else {
                0.0
            };
            (previous * ef).min(MAX_INTERVAL_DAYS)
        }
    }
}

pub fn calculate_ease_factor(current_ease_factor: f64, quality: i32, config: &SchedulerConfig) -> f64 {
    let q = clamp_quality(quality) as f64;
    let miss = 5.0 - q;
    // Only non-finite input is replaced up front; the floor applies after the delta.
    let current = if current_ease_factor.is_finite() {
        current_ease_factor
    } else {
        config.default_ease_factor
    };
    let next = current + (0.1 - miss * (0.08 + miss * 0.02));
    next.max(config.min_ease_factor)
}

pub fn calculate_next_review(
    now: DateTime<Utc>,
    repetition: u32,
    quality: i32,
    ease_factor: f64,
    previous_interval: f64,
    config: &SchedulerConfig,
) -> DateTime<Utc> {
    let interval = calculate_interval(repetition, quality, ease_factor, previous_interval, config);
    now + interval_to_duration(interval)
}

pub fn calculate_knowledge_level(current_level: i32, quality: i32, suggested_level: i32) -> u8 {
    let current = clamp_level(current_level) as i32;
    let suggested = clamp_level(suggested_level) as i32;
    let max_level = MAX_KNOWLEDGE_LEVEL as i32;

    let next = match clamp_quality(quality) {
        5 => (current.max(suggested) + 1).min(max_level),
        4 => current.max(suggested).min(max_level),
        3 => current,
        _ => (current - 1).max(0),
    };
    clamp_level(next)
}

pub fn calculate_repetition_number(previous_count: u32, quality: i32) -> u32 {
    if is_success(quality) {
        previous_count.saturating_add(1)
    } else {
        0
    }
}

pub fn apply_streak_bonus(consecutive_perfect: u32, interval: f64, config: &SchedulerConfig) -> f64 {
    if consecutive_perfect >= config.streak_threshold {
        (interval * config.streak_multiplier).min(MAX_INTERVAL_DAYS)
    } else {
        interval
    }
}

pub fn next_perfect_streak(previous_streak: u32, quality: i32) -> u32 {
    if clamp_quality(quality) == MAX_QUALITY {
        previous_streak.saturating_add(1)
    } else {
        0
    }
}

pub fn interval_to_duration(interval_days: f64) -> Duration {
    let days = if interval_days.is_finite() {
        interval_days.clamp(0.0, MAX_INTERVAL_DAYS)
    } else {
        0.0
    };
    Duration::milliseconds((days * MS_PER_DAY).round() as i64)
}

/// Fractional days from `from` to `to`; negative when `to` is earlier.
pub fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / MS_PER_DAY
}

fn sanitize_ease_factor(ease_factor: f64, config: &SchedulerConfig) -> f64 {
    if ease_factor.is_finite() {
        ease_factor.max(config.min_ease_factor)
    } else {
        config.default_ease_factor.max(config.min_ease_factor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewInput {
    pub knowledge_level: u8,
    pub ease_factor: f64,
    pub interval_days: f64,
    pub repetition_count: u32,
    pub perfect_streak: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    pub knowledge_level: u8,
    pub ease_factor: f64,
    pub interval_days: f64,
    pub repetition_count: u32,
    pub perfect_streak: u32,
    pub next_review_at: DateTime<Utc>,
    pub success: bool,
}

/// One full scheduling step: ease factor first, then interval, streak bonus and level.
pub fn plan_review(
    input: &ReviewInput,
    quality: i32,
    suggested_level: i32,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
) -> ReviewOutcome {
    let quality = clamp_quality(quality);
    let success = is_success(quality);

    let ease_factor = calculate_ease_factor(input.ease_factor, quality, config);
    let perfect_streak = next_perfect_streak(input.perfect_streak, quality);
    let mut interval_days = calculate_interval(
        input.repetition_count,
        quality,
        ease_factor,
        input.interval_days,
        config,
    );
    if success {
        interval_days = apply_streak_bonus(perfect_streak, interval_days, config);
    }

    ReviewOutcome {
        knowledge_level: calculate_knowledge_level(
            input.knowledge_level as i32,
            quality,
            suggested_level,
        ),
        ease_factor,
        interval_days,
        repetition_count: calculate_repetition_number(input.repetition_count, quality),
        perfect_streak,
        next_review_at: now + interval_to_duration(interval_days),
        success,
    }
}
