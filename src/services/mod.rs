pub mod knowledge_update;
pub mod review_queue;
pub mod scheduler;
pub mod snapshot;
pub mod strategy;
pub mod weak_points;
