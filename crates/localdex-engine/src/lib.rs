//! Indexing pipeline, strategies and the per-project facade.

pub mod debounce;
pub mod dirty;
pub mod engine;
pub mod events;
pub mod guard;
pub mod integrity;
pub mod lock;
pub mod orchestrator;
pub mod project;
pub mod resources;
pub mod strategy;
pub mod watch;

pub use engine::{EngineStatus, IndexEngine, IndexReport, Progress, ProgressFn, ReconcileCounts, UpdateOutcome};
pub use events::{FileEvent, FileEventKind};
pub use integrity::{DriftReport, GroundTruth, IntegrityEngine};
pub use orchestrator::Orchestrator;
pub use project::{IndexStatus, OpenOptions, ProjectIndex};
pub use resources::{ResourceProbe, SystemProbe};
pub use strategy::{IndexingStrategy, StrategyStats};
pub use watch::ProjectWatcher;
