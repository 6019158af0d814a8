use chrono::{DateTime, Utc};

use crate::config::ReviewQueueConfig;
use crate::services::scheduler::days_between;
use crate::types::{ItemKind, PriorityTier, RetentionState, ReviewQueueItem, ReviewQueues};

pub struct ReviewQueueBuilder {
    config: ReviewQueueConfig,
}

impl ReviewQueueBuilder {
    pub fn new(config: ReviewQueueConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReviewQueueConfig {
        &self.config
    }

    /// Weak items only become CRITICAL once overdue long enough; before that
    /// they rank with the IMPORTANT tier.
    pub fn priority_tier(&self, knowledge_level: u8, overdue_days: f64) -> PriorityTier {
        if knowledge_level <= self.config.critical_max_level {
            if overdue_days > self.config.critical_overdue_days {
                PriorityTier::Critical
            } else {
                PriorityTier::Important
            }
        } else if knowledge_level <= self.config.important_max_level {
            PriorityTier::Important
        } else if knowledge_level <= self.config.supporting_max_level {
            PriorityTier::Supporting
        } else {
            PriorityTier::Mastery
        }
    }

    pub fn overdue_days(state: &RetentionState, now: DateTime<Utc>) -> f64 {
        days_between(state.next_review_at, now).max(0.0)
    }

    /// Ranks candidates the caller already filtered to due items.
    ///
    /// Order is tier ascending, then overdue days descending; ties keep input order.
    pub fn build(
        &self,
        candidates: Vec<RetentionState>,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Vec<ReviewQueueItem> {
        let mut queue: Vec<ReviewQueueItem> = candidates
            .into_iter()
            .map(|state| {
                let overdue_days = Self::overdue_days(&state, now);
                ReviewQueueItem {
                    item_id: state.item_id.clone(),
                    kind: state.kind,
                    priority_tier: self.priority_tier(state.knowledge_level, overdue_days),
                    overdue_days,
                    retention: state,
                }
            })
            .collect();

        queue.sort_by(|a, b| {
            a.priority_tier
                .cmp(&b.priority_tier)
                .then_with(|| b.overdue_days.total_cmp(&a.overdue_days))
        });
        queue.truncate(limit);
        queue
    }

    /// Filters `states` of one kind to due items and ranks them at the session size for that kind.
    pub fn build_for_kind(
        &self,
        states: &[RetentionState],
        kind: ItemKind,
        now: DateTime<Utc>,
    ) -> Vec<ReviewQueueItem> {
        let due: Vec<RetentionState> = states
            .iter()
            .filter(|s| s.kind == kind && s.is_due(now))
            .cloned()
            .collect();
        self.build(due, self.config.session_size(kind), now)
    }

    pub fn session_queues(&self, states: &[RetentionState], now: DateTime<Utc>) -> ReviewQueues {
        let mut queues = ReviewQueues::default();
        for kind in ItemKind::ALL {
            *queues.for_kind_mut(kind) = self.build_for_kind(states, kind, now);
        }
        queues
    }
}

impl Default for ReviewQueueBuilder {
    fn default() -> Self {
        Self::new(ReviewQueueConfig::default())
    }
}
