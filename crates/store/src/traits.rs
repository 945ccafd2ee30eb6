//! Storage seams the engine depends on.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use chomp_core::{NewEvent, ProductId, UserEvent, UserId};

use crate::error::StoreError;
use crate::types::{
    EventDeltas, LeaderboardEntry, StreakRow, UserAchievement, UserClassification, UserProgress,
    UserRow,
};

/// Result of appending to the event log.
#[derive(Debug, Clone)]
pub enum AppendOutcome {
    /// Fresh event, committed with a new monotonic id.
    Committed(UserEvent),
    /// Same (user_id, source_id) was appended before; replay carries the
    /// original event so callers can answer idempotently.
    Duplicate(UserEvent),
}

/// Append-only user event sequence with monotonic ids.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, event: NewEvent) -> Result<AppendOutcome, StoreError>;

    /// Events for one user since `since`, ascending by event_id.
    async fn events_for_user_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<UserEvent>, StoreError>;
}

/// Keyed state tables. One `apply_event_deltas` call is one transaction.
#[async_trait]
pub trait StateStore: Send + Sync {
    // ── Users & sessions ──────────────────────────────────────

    async fn user(&self, user_id: &str) -> Result<Option<UserRow>, StoreError>;

    /// Resolve a session token to its user. Auth internals are out of
    /// scope; the token is opaque to the engine.
    async fn user_for_session(&self, token: &str) -> Result<Option<UserRow>, StoreError>;

    async fn display_names(
        &self,
        user_ids: &[UserId],
    ) -> Result<HashMap<UserId, String>, StoreError>;

    // ── Authoritative aggregates ──────────────────────────────

    /// product_id -> position for every non-null ranking of the user.
    async fn ranked_products(&self, user_id: &str)
        -> Result<HashMap<ProductId, i32>, StoreError>;

    async fn count_activities_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    /// Distinct calendar days with at least one activity, newest first.
    async fn activity_dates(&self, user_id: &str, days: i64)
        -> Result<Vec<NaiveDate>, StoreError>;

    // ── Keyed state ───────────────────────────────────────────

    async fn progress(&self, user_id: &str) -> Result<Option<UserProgress>, StoreError>;

    async fn achievements_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<UserAchievement>, StoreError>;

    async fn classification(
        &self,
        user_id: &str,
    ) -> Result<Option<UserClassification>, StoreError>;

    async fn put_classification(&self, row: &UserClassification) -> Result<(), StoreError>;

    async fn streaks_for_user(&self, user_id: &str) -> Result<Vec<StreakRow>, StoreError>;

    /// Commit all deltas for one event atomically.
    async fn apply_event_deltas(
        &self,
        user_id: &str,
        deltas: &EventDeltas,
    ) -> Result<(), StoreError>;

    // ── Leaderboard ───────────────────────────────────────────

    /// Every user's progress row, for full snapshot recompute.
    async fn all_progress(&self) -> Result<Vec<UserProgress>, StoreError>;

    /// Replace the snapshot wholesale.
    async fn replace_leaderboard(&self, entries: &[LeaderboardEntry]) -> Result<(), StoreError>;

    async fn leaderboard_top(&self, n: i64) -> Result<Vec<LeaderboardEntry>, StoreError>;

    /// Entry plus total snapshot size, for percentile computation.
    async fn leaderboard_position(
        &self,
        user_id: &str,
    ) -> Result<Option<(LeaderboardEntry, i64)>, StoreError>;

    // ── Trending ──────────────────────────────────────────────

    /// (product_id, view count) for product_view activities since `since`.
    async fn trending_products(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<(ProductId, i64)>, StoreError>;
}
