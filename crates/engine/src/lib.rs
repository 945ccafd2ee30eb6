//! The gamification and classification engine.
//!
//! The Evaluator turns committed events into achievement state deltas and
//! notifications; the Classifier derives the five behavioral axes; the
//! Leaderboard aggregator maintains the ranked snapshot; the Engine facade
//! serializes per-user work and publishes after commit.

pub mod classifier;
pub mod deadline;
pub mod engine;
pub mod evaluator;
pub mod leaderboard;
pub mod locks;
pub mod notifications;
pub mod streaks;

pub use classifier::Classifier;
pub use deadline::Deadline;
pub use engine::{ingest_detached, Engine, EngineTunables, IngestOutcome};
pub use evaluator::{AchievementStatus, Evaluator, StepTimeouts};
pub use leaderboard::{LeaderboardAggregator, Position};
pub use notifications::Notification;
pub use streaks::{advance_streak, StreakAdvance};
