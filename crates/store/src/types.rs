//! Persisted state shapes shared by the engine and the Gateway.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use chomp_catalog::Tier;
use chomp_core::{ProductId, StreakType, UserId};

// ── Users ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRow {
    pub user_id: UserId,
    pub display_name: String,
    pub registered_at: DateTime<Utc>,
}

// ── Progress ──────────────────────────────────────────────────

/// Lifetime aggregates per user. Counters are recomputed from
/// authoritative queries on every evaluation, never incremented blindly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProgress {
    pub user_id: UserId,
    pub total_rankings: i64,
    pub unique_flavors: i64,
    pub unique_animals: i64,
    pub activities_30d: i64,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub total_points: i64,
}

impl UserProgress {
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            total_rankings: 0,
            unique_flavors: 0,
            unique_animals: 0,
            activities_30d: 0,
            current_streak: 0,
            longest_streak: 0,
            last_activity_at: None,
            total_points: 0,
        }
    }
}

// ── Achievements ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAchievement {
    pub user_id: UserId,
    pub achievement_code: String,
    pub earned_at: DateTime<Utc>,
    pub current_tier: Option<Tier>,
    pub progress_value: i64,
    pub progress_required: i64,
    /// Sum of points over all earned tiers.
    pub points_awarded: i64,
}

// ── Classification ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JourneyStage {
    NewUser,
    Exploring,
    Engaged,
    PowerUser,
    Dormant,
}

impl JourneyStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JourneyStage::NewUser => "new_user",
            JourneyStage::Exploring => "exploring",
            JourneyStage::Engaged => "engaged",
            JourneyStage::PowerUser => "power_user",
            JourneyStage::Dormant => "dormant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementLevel {
    None,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl EngagementLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementLevel::None => "none",
            EngagementLevel::Low => "low",
            EngagementLevel::Medium => "medium",
            EngagementLevel::High => "high",
            EngagementLevel::VeryHigh => "very_high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplorationBreadth {
    Narrow,
    Moderate,
    Diverse,
}

impl ExplorationBreadth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExplorationBreadth::Narrow => "narrow",
            ExplorationBreadth::Moderate => "moderate",
            ExplorationBreadth::Diverse => "diverse",
        }
    }
}

/// The five classification axes, recreated in place by the Classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserClassification {
    pub user_id: UserId,
    pub journey_stage: JourneyStage,
    pub engagement_level: EngagementLevel,
    pub exploration_breadth: ExplorationBreadth,
    /// Up to four flavor/animal tokens with count >= 3, count-descending.
    pub focus_areas: Vec<String>,
    /// Flavor -> community tier label.
    pub flavor_communities: BTreeMap<String, String>,
    pub last_calculated_at: DateTime<Utc>,
}

// ── Streaks ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreakRow {
    pub user_id: UserId,
    pub streak_type: StreakType,
    pub current_length: i64,
    pub longest_length: i64,
    pub last_tick_date: Option<NaiveDate>,
}

impl StreakRow {
    pub fn fresh(user_id: UserId, streak_type: StreakType) -> Self {
        Self {
            user_id,
            streak_type,
            current_length: 0,
            longest_length: 0,
            last_tick_date: None,
        }
    }
}

// ── Leaderboard ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgeSummary {
    pub name: String,
    pub tier: Option<Tier>,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: UserId,
    pub rank: i64,
    pub display_name: String,
    pub engagement_score: i64,
    pub unique_products: i64,
    pub badges: Vec<BadgeSummary>,
}

// ── Activities ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub user_id: UserId,
    pub activity_type: String,
    pub product_id: Option<ProductId>,
    pub created_at: DateTime<Utc>,
}

// ── Per-event deltas ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RankingDelta {
    Upsert { product_id: ProductId, position: i32 },
    Clear { product_id: ProductId },
}

/// Everything one event changes, committed in a single transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventDeltas {
    pub ranking: Option<RankingDelta>,
    pub activity: Option<ActivityRecord>,
    pub progress: Option<UserProgress>,
    pub achievements: Vec<UserAchievement>,
    pub streaks: Vec<StreakRow>,
    /// (order_id, product_id) pairs from delivered orders.
    pub order_items: Vec<(String, ProductId)>,
    /// Event marked applied in the same transaction as the deltas.
    pub applied_event_id: Option<i64>,
}

impl EventDeltas {
    pub fn is_empty(&self) -> bool {
        self.ranking.is_none()
            && self.activity.is_none()
            && self.progress.is_none()
            && self.achievements.is_empty()
            && self.streaks.is_empty()
            && self.order_items.is_empty()
            && self.applied_event_id.is_none()
    }
}
