//! Postgres implementations of the storage seams.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use tracing::warn;

use chomp_catalog::{
    normalize_icon, AchievementDef, CatalogData, CatalogError, CatalogSource, ClassificationConfig,
    CollectionType, ProductMeta, Requirement, ScoreConfig, StreakConfig, Tier,
};
use chomp_core::{EventBody, NewEvent, ProductId, StreakType, UserEvent, UserId};

use crate::error::StoreError;
use crate::traits::{AppendOutcome, EventLog, StateStore};
use crate::types::{
    EventDeltas, LeaderboardEntry, RankingDelta, StreakRow, UserAchievement, UserClassification,
    UserProgress, UserRow,
};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ── Row types ────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct EventRow {
    event_id: i64,
    user_id: String,
    source_id: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
    applied_at: Option<DateTime<Utc>>,
}

impl EventRow {
    fn into_event(self) -> Result<UserEvent, StoreError> {
        let body: EventBody = serde_json::from_value(self.payload)?;
        Ok(UserEvent {
            event_id: self.event_id,
            user_id: self.user_id,
            source_id: self.source_id,
            body,
            created_at: self.created_at,
            applied_at: self.applied_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserAchievementRow {
    user_id: String,
    achievement_code: String,
    earned_at: DateTime<Utc>,
    current_tier: Option<String>,
    progress_value: i64,
    progress_required: i64,
    points_awarded: i64,
}

impl UserAchievementRow {
    fn into_domain(self) -> UserAchievement {
        UserAchievement {
            user_id: self.user_id,
            achievement_code: self.achievement_code,
            earned_at: self.earned_at,
            current_tier: self.current_tier.as_deref().and_then(Tier::parse),
            progress_value: self.progress_value,
            progress_required: self.progress_required,
            points_awarded: self.points_awarded,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProgressRow {
    user_id: String,
    total_rankings: i64,
    unique_flavors: i64,
    unique_animals: i64,
    activities_30d: i64,
    current_streak: i64,
    longest_streak: i64,
    last_activity_at: Option<DateTime<Utc>>,
    total_points: i64,
}

impl From<ProgressRow> for UserProgress {
    fn from(r: ProgressRow) -> Self {
        UserProgress {
            user_id: r.user_id,
            total_rankings: r.total_rankings,
            unique_flavors: r.unique_flavors,
            unique_animals: r.unique_animals,
            activities_30d: r.activities_30d,
            current_streak: r.current_streak,
            longest_streak: r.longest_streak,
            last_activity_at: r.last_activity_at,
            total_points: r.total_points,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ClassificationRow {
    user_id: String,
    journey_stage: String,
    engagement_level: String,
    exploration_breadth: String,
    focus_areas: serde_json::Value,
    flavor_communities: serde_json::Value,
    last_calculated_at: DateTime<Utc>,
}

impl ClassificationRow {
    fn into_domain(self) -> Result<UserClassification, StoreError> {
        Ok(UserClassification {
            user_id: self.user_id,
            journey_stage: serde_json::from_value(serde_json::Value::String(self.journey_stage))?,
            engagement_level: serde_json::from_value(serde_json::Value::String(
                self.engagement_level,
            ))?,
            exploration_breadth: serde_json::from_value(serde_json::Value::String(
                self.exploration_breadth,
            ))?,
            focus_areas: serde_json::from_value(self.focus_areas)?,
            flavor_communities: serde_json::from_value(self.flavor_communities)?,
            last_calculated_at: self.last_calculated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StreakRowDb {
    user_id: String,
    streak_type: String,
    current_length: i64,
    longest_length: i64,
    last_tick_date: Option<NaiveDate>,
}

impl StreakRowDb {
    fn into_domain(self) -> Option<StreakRow> {
        Some(StreakRow {
            user_id: self.user_id,
            streak_type: StreakType::parse(&self.streak_type)?,
            current_length: self.current_length,
            longest_length: self.longest_length,
            last_tick_date: self.last_tick_date,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LeaderboardRow {
    rank: i64,
    user_id: String,
    display_name: String,
    engagement_score: i64,
    unique_products: i64,
    badges: serde_json::Value,
}

impl LeaderboardRow {
    fn into_domain(self) -> Result<LeaderboardEntry, StoreError> {
        Ok(LeaderboardEntry {
            user_id: self.user_id,
            rank: self.rank,
            display_name: self.display_name,
            engagement_score: self.engagement_score,
            unique_products: self.unique_products,
            badges: serde_json::from_value(self.badges)?,
        })
    }
}

// ── Event log ────────────────────────────────────────────────────

#[async_trait]
impl EventLog for PgStore {
    async fn append(&self, event: NewEvent) -> Result<AppendOutcome, StoreError> {
        let payload = serde_json::to_value(&event.body)?;

        let inserted = sqlx::query_as::<_, EventRow>(
            "INSERT INTO user_events (user_id, source_id, type, payload)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (user_id, source_id) DO NOTHING
             RETURNING event_id, user_id, source_id, payload, created_at, applied_at",
        )
        .bind(&event.user_id)
        .bind(&event.source_id)
        .bind(event.body.kind())
        .bind(&payload)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(AppendOutcome::Committed(row.into_event()?));
        }

        let existing = sqlx::query_as::<_, EventRow>(
            "SELECT event_id, user_id, source_id, payload, created_at, applied_at
             FROM user_events WHERE user_id = $1 AND source_id = $2",
        )
        .bind(&event.user_id)
        .bind(&event.source_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(AppendOutcome::Duplicate(existing.into_event()?))
    }

    async fn events_for_user_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<UserEvent>, StoreError> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT event_id, user_id, source_id, payload, created_at, applied_at
             FROM user_events
             WHERE user_id = $1 AND created_at >= $2
             ORDER BY event_id ASC",
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EventRow::into_event).collect()
    }
}

// ── State store ──────────────────────────────────────────────────

#[async_trait]
impl StateStore for PgStore {
    async fn user(&self, user_id: &str) -> Result<Option<UserRow>, StoreError> {
        let row = sqlx::query_as::<_, (String, String, DateTime<Utc>)>(
            "SELECT user_id, display_name, registered_at FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(user_id, display_name, registered_at)| UserRow {
            user_id,
            display_name,
            registered_at,
        }))
    }

    async fn user_for_session(&self, token: &str) -> Result<Option<UserRow>, StoreError> {
        let row = sqlx::query_as::<_, (String, String, DateTime<Utc>)>(
            "SELECT user_id, display_name, registered_at FROM users WHERE session_token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(user_id, display_name, registered_at)| UserRow {
            user_id,
            display_name,
            registered_at,
        }))
    }

    async fn display_names(
        &self,
        user_ids: &[UserId],
    ) -> Result<HashMap<UserId, String>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT user_id, display_name FROM users WHERE user_id = ANY($1)",
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn ranked_products(
        &self,
        user_id: &str,
    ) -> Result<HashMap<ProductId, i32>, StoreError> {
        let rows = sqlx::query_as::<_, (String, i32)>(
            "SELECT product_id, position FROM product_rankings WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn count_activities_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM user_activities WHERE user_id = $1 AND created_at >= $2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn activity_dates(
        &self,
        user_id: &str,
        days: i64,
    ) -> Result<Vec<NaiveDate>, StoreError> {
        let rows = sqlx::query_as::<_, (NaiveDate,)>(
            "SELECT DISTINCT created_at::date AS day FROM user_activities
             WHERE user_id = $1 AND created_at >= now() - make_interval(days => $2::int)
             ORDER BY day DESC",
        )
        .bind(user_id)
        .bind(days)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(d,)| d).collect())
    }

    async fn progress(&self, user_id: &str) -> Result<Option<UserProgress>, StoreError> {
        let row = sqlx::query_as::<_, ProgressRow>(
            "SELECT user_id, total_rankings, unique_flavors, unique_animals, activities_30d,
                    current_streak, longest_streak, last_activity_at, total_points
             FROM user_progress WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserProgress::from))
    }

    async fn achievements_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<UserAchievement>, StoreError> {
        let rows = sqlx::query_as::<_, UserAchievementRow>(
            "SELECT user_id, achievement_code, earned_at, current_tier,
                    progress_value, progress_required, points_awarded
             FROM user_achievements WHERE user_id = $1
             ORDER BY achievement_code",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(UserAchievementRow::into_domain).collect())
    }

    async fn classification(
        &self,
        user_id: &str,
    ) -> Result<Option<UserClassification>, StoreError> {
        let row = sqlx::query_as::<_, ClassificationRow>(
            "SELECT user_id, journey_stage, engagement_level, exploration_breadth,
                    focus_areas, flavor_communities, last_calculated_at
             FROM user_classifications WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ClassificationRow::into_domain).transpose()
    }

    async fn put_classification(&self, row: &UserClassification) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO user_classifications
               (user_id, journey_stage, engagement_level, exploration_breadth,
                focus_areas, flavor_communities, last_calculated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (user_id) DO UPDATE SET
               journey_stage = EXCLUDED.journey_stage,
               engagement_level = EXCLUDED.engagement_level,
               exploration_breadth = EXCLUDED.exploration_breadth,
               focus_areas = EXCLUDED.focus_areas,
               flavor_communities = EXCLUDED.flavor_communities,
               last_calculated_at = EXCLUDED.last_calculated_at",
        )
        .bind(&row.user_id)
        .bind(row.journey_stage.as_str())
        .bind(row.engagement_level.as_str())
        .bind(row.exploration_breadth.as_str())
        .bind(serde_json::to_value(&row.focus_areas)?)
        .bind(serde_json::to_value(&row.flavor_communities)?)
        .bind(row.last_calculated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn streaks_for_user(&self, user_id: &str) -> Result<Vec<StreakRow>, StoreError> {
        let rows = sqlx::query_as::<_, StreakRowDb>(
            "SELECT user_id, streak_type, current_length, longest_length, last_tick_date
             FROM streaks WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(StreakRowDb::into_domain).collect())
    }

    async fn apply_event_deltas(
        &self,
        user_id: &str,
        deltas: &EventDeltas,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        match &deltas.ranking {
            Some(RankingDelta::Upsert {
                product_id,
                position,
            }) => {
                sqlx::query(
                    "INSERT INTO product_rankings (user_id, product_id, position, updated_at)
                     VALUES ($1, $2, $3, now())
                     ON CONFLICT (user_id, product_id) DO UPDATE SET
                       position = EXCLUDED.position, updated_at = now()",
                )
                .bind(user_id)
                .bind(product_id)
                .bind(position)
                .execute(&mut *tx)
                .await?;
            }
            Some(RankingDelta::Clear { product_id }) => {
                sqlx::query("DELETE FROM product_rankings WHERE user_id = $1 AND product_id = $2")
                    .bind(user_id)
                    .bind(product_id)
                    .execute(&mut *tx)
                    .await?;
            }
            None => {}
        }

        if let Some(activity) = &deltas.activity {
            sqlx::query(
                "INSERT INTO user_activities (user_id, activity_type, product_id, created_at)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(&activity.user_id)
            .bind(&activity.activity_type)
            .bind(&activity.product_id)
            .bind(activity.created_at)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(p) = &deltas.progress {
            sqlx::query(
                "INSERT INTO user_progress
                   (user_id, total_rankings, unique_flavors, unique_animals, activities_30d,
                    current_streak, longest_streak, last_activity_at, total_points)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 ON CONFLICT (user_id) DO UPDATE SET
                   total_rankings = EXCLUDED.total_rankings,
                   unique_flavors = EXCLUDED.unique_flavors,
                   unique_animals = EXCLUDED.unique_animals,
                   activities_30d = EXCLUDED.activities_30d,
                   current_streak = EXCLUDED.current_streak,
                   longest_streak = EXCLUDED.longest_streak,
                   last_activity_at = EXCLUDED.last_activity_at,
                   total_points = EXCLUDED.total_points",
            )
            .bind(&p.user_id)
            .bind(p.total_rankings)
            .bind(p.unique_flavors)
            .bind(p.unique_animals)
            .bind(p.activities_30d)
            .bind(p.current_streak)
            .bind(p.longest_streak)
            .bind(p.last_activity_at)
            .bind(p.total_points)
            .execute(&mut *tx)
            .await?;
        }

        for row in &deltas.achievements {
            sqlx::query(
                "INSERT INTO user_achievements
                   (user_id, achievement_code, earned_at, current_tier,
                    progress_value, progress_required, points_awarded)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (user_id, achievement_code) DO UPDATE SET
                   current_tier = EXCLUDED.current_tier,
                   progress_value = EXCLUDED.progress_value,
                   progress_required = EXCLUDED.progress_required,
                   points_awarded = EXCLUDED.points_awarded",
            )
            .bind(&row.user_id)
            .bind(&row.achievement_code)
            .bind(row.earned_at)
            .bind(row.current_tier.map(|t| t.as_str()))
            .bind(row.progress_value)
            .bind(row.progress_required)
            .bind(row.points_awarded)
            .execute(&mut *tx)
            .await?;
        }

        for row in &deltas.streaks {
            sqlx::query(
                "INSERT INTO streaks
                   (user_id, streak_type, current_length, longest_length, last_tick_date)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (user_id, streak_type) DO UPDATE SET
                   current_length = EXCLUDED.current_length,
                   longest_length = EXCLUDED.longest_length,
                   last_tick_date = EXCLUDED.last_tick_date",
            )
            .bind(&row.user_id)
            .bind(row.streak_type.as_str())
            .bind(row.current_length)
            .bind(row.longest_length)
            .bind(row.last_tick_date)
            .execute(&mut *tx)
            .await?;
        }

        for (order_id, product_id) in &deltas.order_items {
            sqlx::query(
                "INSERT INTO customer_order_items (user_id, order_id, product_id, delivered_at)
                 VALUES ($1, $2, $3, now())
                 ON CONFLICT DO NOTHING",
            )
            .bind(user_id)
            .bind(order_id)
            .bind(product_id)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(event_id) = deltas.applied_event_id {
            sqlx::query("UPDATE user_events SET applied_at = now() WHERE event_id = $1")
                .bind(event_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn all_progress(&self) -> Result<Vec<UserProgress>, StoreError> {
        let rows = sqlx::query_as::<_, ProgressRow>(
            "SELECT user_id, total_rankings, unique_flavors, unique_animals, activities_30d,
                    current_streak, longest_streak, last_activity_at, total_points
             FROM user_progress ORDER BY user_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(UserProgress::from).collect())
    }

    async fn replace_leaderboard(
        &self,
        entries: &[LeaderboardEntry],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM leaderboard_snapshot")
            .execute(&mut *tx)
            .await?;

        for entry in entries {
            sqlx::query(
                "INSERT INTO leaderboard_snapshot
                   (rank, user_id, display_name, engagement_score, unique_products, badges)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(entry.rank)
            .bind(&entry.user_id)
            .bind(&entry.display_name)
            .bind(entry.engagement_score)
            .bind(entry.unique_products)
            .bind(serde_json::to_value(&entry.badges)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn leaderboard_top(&self, n: i64) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let rows = sqlx::query_as::<_, LeaderboardRow>(
            "SELECT rank, user_id, display_name, engagement_score, unique_products, badges
             FROM leaderboard_snapshot ORDER BY rank ASC LIMIT $1",
        )
        .bind(n)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LeaderboardRow::into_domain).collect()
    }

    async fn leaderboard_position(
        &self,
        user_id: &str,
    ) -> Result<Option<(LeaderboardEntry, i64)>, StoreError> {
        let row = sqlx::query_as::<_, LeaderboardRow>(
            "SELECT rank, user_id, display_name, engagement_score, unique_products, badges
             FROM leaderboard_snapshot WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM leaderboard_snapshot")
            .fetch_one(&self.pool)
            .await?;

        Ok(Some((row.into_domain()?, total)))
    }

    async fn trending_products(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<(ProductId, i64)>, StoreError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT product_id, COUNT(*) AS views FROM user_activities
             WHERE activity_type = 'product_view' AND product_id IS NOT NULL
               AND created_at >= $1
             GROUP BY product_id
             ORDER BY views DESC, product_id ASC
             LIMIT $2",
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

// ── Catalog source ───────────────────────────────────────────────

/// Loads the achievement catalog, product metadata, and configs from the
/// relational tables. Read-only at runtime.
pub struct PgCatalogSource {
    pool: PgPool,
    icon_prefix: Option<String>,
}

impl PgCatalogSource {
    pub fn new(pool: PgPool, icon_prefix: Option<String>) -> Self {
        Self { pool, icon_prefix }
    }

    async fn config_value<T: serde::de::DeserializeOwned + Default>(
        &self,
        key: &str,
    ) -> Result<T, CatalogError> {
        let row = sqlx::query_as::<_, (serde_json::Value,)>(
            "SELECT value FROM classification_config WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        match row {
            Some((value,)) => serde_json::from_value(value)
                .map_err(|e| CatalogError::Invalid(format!("config '{}': {}", key, e))),
            None => Ok(T::default()),
        }
    }
}

#[derive(sqlx::FromRow)]
struct AchievementRowDb {
    code: String,
    name: String,
    description: String,
    icon: String,
    points: i32,
    category: String,
    collection_type: serde_json::Value,
    requirement: serde_json::Value,
}

#[async_trait]
impl CatalogSource for PgCatalogSource {
    async fn load(&self) -> Result<CatalogData, CatalogError> {
        let rows = sqlx::query_as::<_, AchievementRowDb>(
            "SELECT code, name, description, icon, points, category, collection_type, requirement
             FROM achievements ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        let mut achievements = Vec::with_capacity(rows.len());
        for row in rows {
            let collection_type: CollectionType = serde_json::from_value(row.collection_type)
                .map_err(|e| CatalogError::Invalid(format!("{}: {}", row.code, e)))?;
            let requirement: Requirement = serde_json::from_value(row.requirement)
                .map_err(|e| CatalogError::Invalid(format!("{}: {}", row.code, e)))?;
            let normalized = normalize_icon(&row.icon, self.icon_prefix.as_deref());
            if row.points < 0 {
                return Err(CatalogError::Invalid(format!(
                    "{}: negative points",
                    row.code
                )));
            }
            achievements.push(AchievementDef {
                code: row.code,
                name: row.name,
                description: row.description,
                icon: normalized.icon,
                icon_type: normalized.icon_type,
                points: row.points as u32,
                category: row.category,
                collection_type,
                requirement,
            });
        }

        let product_rows = sqlx::query_as::<_, (String, String, String, String, serde_json::Value, bool)>(
            "SELECT product_id, animal_type, primary_flavor, vendor, tags, rankable
             FROM products_metadata",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        let mut products = Vec::with_capacity(product_rows.len());
        for (product_id, animal_type, primary_flavor, vendor, tags, rankable) in product_rows {
            let tags: Vec<String> = serde_json::from_value(tags).unwrap_or_else(|e| {
                warn!("Bad tags for product {}: {}", product_id, e);
                Vec::new()
            });
            products.push(ProductMeta {
                product_id,
                animal_type,
                primary_flavor,
                vendor,
                tags,
                rankable,
            });
        }

        let classification: ClassificationConfig = self.config_value("classification").await?;
        let score: ScoreConfig = self.config_value("score").await?;
        let streak: StreakConfig = self.config_value("streak").await?;

        Ok(CatalogData {
            achievements,
            products,
            classification,
            score,
            streak,
        })
    }
}
