pub mod config;
pub mod logging;
pub mod services;
pub mod store;
pub mod types;

pub use config::{ConfigError, EngineConfig, LoggingConfig};
pub use services::knowledge_update::{EngineError, KnowledgeUpdateEngine, PracticeEvent};
pub use services::review_queue::ReviewQueueBuilder;
pub use services::snapshot::{SnapshotAssembler, SnapshotParts};
pub use services::strategy::{SessionProgress, StrategySelector, SwitchDecision};
pub use services::weak_points::{WeakPointDetector, WeakPointInput};
pub use store::{KnowledgeStore, MemoryKnowledgeStore, SqliteKnowledgeStore, StoreError};
