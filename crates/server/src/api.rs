//! HTTP handlers for the Command Gateway.
//!
//! Writes route through the engine (and the retry policy); reads hit the
//! store directly. Every error response is `{error, code}` with the
//! status mapping from the error taxonomy.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use chomp_core::{ChompError, EventBody, NewEvent, StreakType};
use chomp_engine::{ingest_detached, AchievementStatus, IngestOutcome};
use chomp_store::StreakRow;

use crate::auth::CurrentUser;
use crate::retry::RetryPolicy;
use crate::state::AppState;

// ── Error mapping ─────────────────────────────────────────────

pub struct ApiError(pub ChompError);

impl From<ChompError> for ApiError {
    fn from(e: ChompError) -> Self {
        ApiError(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: self.0.to_string(),
            code: self.0.code(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Log, report to the error sink, and convert in one step.
async fn fail(
    state: &AppState,
    operation: &'static str,
    user_id: Option<&str>,
    started: Instant,
    error: ChompError,
) -> ApiError {
    let latency_ms = started.elapsed().as_millis() as u64;
    tracing::warn!(
        operation,
        user_id = user_id.unwrap_or("-"),
        code = error.code(),
        latency_ms,
        %error,
        "Request failed"
    );
    state
        .error_sink
        .report(operation, user_id, None, &error, latency_ms)
        .await;
    ApiError(error)
}

// ── Health ────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ── Event ingestion ───────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    /// Client idempotency key; replays of the same key are no-ops.
    pub source_id: String,
    pub event: EventBody,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub event_id: i64,
    pub duplicate: bool,
    pub notifications: usize,
}

/// Synchronous ingest for ranking saves and other first-class events.
pub async fn ingest_event(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<IngestRequest>,
) -> ApiResult<IngestResponse> {
    let started = Instant::now();
    if request.source_id.is_empty() {
        return Err(ApiError(ChompError::Validation(
            "sourceId must not be empty".to_string(),
        )));
    }

    let event = NewEvent {
        user_id: user.user_id.clone(),
        source_id: request.source_id,
        body: request.event,
    };

    let outcome = RetryPolicy::default()
        .run("ingest_event", || state.engine.ingest(event.clone()))
        .await;
    match outcome {
        Ok(IngestOutcome::Applied {
            event,
            notifications,
        }) => Ok(Json(IngestResponse {
            event_id: event.event_id,
            duplicate: false,
            notifications: notifications.len(),
        })),
        Ok(IngestOutcome::Duplicate { event }) => Ok(Json(IngestResponse {
            event_id: event.event_id,
            duplicate: true,
            notifications: 0,
        })),
        Err(error) => Err(fail(&state, "ingest_event", Some(&user.user_id), started, error).await),
    }
}

// ── Achievements ──────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementStats {
    pub total: usize,
    pub earned: usize,
    pub total_points: i64,
}

#[derive(Serialize)]
pub struct AchievementsResponse {
    pub achievements: Vec<AchievementStatus>,
    pub stats: AchievementStats,
}

pub async fn list_achievements(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<AchievementsResponse> {
    let started = Instant::now();
    let achievements = match state.engine.achievements(&user.user_id).await {
        Ok(a) => a,
        Err(e) => {
            return Err(fail(&state, "list_achievements", Some(&user.user_id), started, e).await)
        }
    };
    let stats = AchievementStats {
        total: achievements.len(),
        earned: achievements.iter().filter(|a| a.earned).count(),
        total_points: achievements.iter().map(|a| a.points_awarded).sum(),
    };
    Ok(Json(AchievementsResponse {
        achievements,
        stats,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementProduct {
    pub product_id: String,
    pub animal_type: String,
    pub primary_flavor: String,
    pub vendor: String,
    pub ranked: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementProductsResponse {
    pub achievement: AchievementStatus,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub products: Option<Vec<AchievementProduct>>,
    pub stats: AchievementStats,
    pub metadata: serde_json::Value,
}

/// Product backing for one achievement: which products count and which
/// the caller has already ranked. Engagement goals carry no product list.
pub async fn achievement_products(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(code): Path<String>,
) -> ApiResult<AchievementProductsResponse> {
    let started = Instant::now();
    let result = async {
        let catalog = state.engine.catalog().await?;
        let statuses = state.engine.achievements(&user.user_id).await?;
        let status = statuses
            .into_iter()
            .find(|s| s.code == code)
            .ok_or_else(|| ChompError::NotFound(format!("achievement {} not found", code)))?;
        let def = catalog
            .achievement(&code)
            .ok_or_else(|| ChompError::NotFound(format!("achievement {} not found", code)))?;

        let ranked = state.store().ranked_products(&user.user_id).await?;
        let products: Vec<AchievementProduct> = match &def.requirement {
            chomp_catalog::Requirement::DynamicCollection {
                animal_type,
                flavor,
                ..
            } => catalog
                .matching_products(animal_type.as_deref(), flavor.as_deref())
                .into_iter()
                .map(|meta| AchievementProduct {
                    product_id: meta.product_id.clone(),
                    animal_type: meta.animal_type.clone(),
                    primary_flavor: meta.primary_flavor.clone(),
                    vendor: meta.vendor.clone(),
                    ranked: ranked.contains_key(&meta.product_id),
                })
                .collect(),
            requirement => requirement
                .product_ids()
                .into_iter()
                .filter_map(|pid| catalog.product(pid))
                .map(|meta| AchievementProduct {
                    product_id: meta.product_id.clone(),
                    animal_type: meta.animal_type.clone(),
                    primary_flavor: meta.primary_flavor.clone(),
                    vendor: meta.vendor.clone(),
                    ranked: ranked.contains_key(&meta.product_id),
                })
                .collect(),
        };

        let kind = if products.is_empty() {
            "engagement"
        } else {
            "collection"
        };
        let stats = AchievementStats {
            total: products.len(),
            earned: products.iter().filter(|p| p.ranked).count(),
            total_points: status.points_awarded,
        };
        let metadata = serde_json::json!({
            "collectionType": def.collection_type,
            "requirementType": def.requirement.requirement_type(),
            "category": def.category,
        });

        Ok(AchievementProductsResponse {
            achievement: status,
            kind,
            products: if products.is_empty() {
                None
            } else {
                Some(products)
            },
            stats,
            metadata,
        })
    }
    .await;

    match result {
        Ok(response) => Ok(Json(response)),
        Err(e) => Err(fail(&state, "achievement_products", Some(&user.user_id), started, e).await),
    }
}

// ── Progress ──────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub kind: &'static str,
    pub label: String,
    pub current: i64,
    pub target: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    pub total_points: i64,
    pub total_rankings: i64,
    pub unique_flavors: i64,
    pub unique_animals: i64,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub next_milestones: Vec<Milestone>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressInsights {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favorite_vendor: Option<String>,
    /// Share of the catalog's flavors the user has tried, 0..=100.
    pub diversity_score: i64,
}

#[derive(Serialize)]
pub struct ProgressResponse {
    pub progress: ProgressSummary,
    pub insights: ProgressInsights,
}

pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<ProgressResponse> {
    let started = Instant::now();
    let result = async {
        let catalog = state.engine.catalog().await?;
        let progress = state.engine.progress(&user.user_id).await?;
        let achievements = state.engine.achievements(&user.user_id).await?;
        let ranked = state.store().ranked_products(&user.user_id).await?;

        let mut milestones: Vec<Milestone> = Vec::new();
        if let Some(&next) = catalog
            .streak
            .milestones
            .iter()
            .find(|&&m| i64::from(m) > progress.current_streak)
        {
            milestones.push(Milestone {
                kind: "streak",
                label: format!("{}-day streak", next),
                current: progress.current_streak,
                target: i64::from(next),
            });
        }
        // Closest unfinished achievements, by completion ratio.
        let mut unfinished: Vec<&AchievementStatus> = achievements
            .iter()
            .filter(|a| !a.earned && a.progress_required > 0)
            .collect();
        unfinished.sort_by(|a, b| {
            let ra = a.progress_value * b.progress_required;
            let rb = b.progress_value * a.progress_required;
            rb.cmp(&ra).then_with(|| a.code.cmp(&b.code))
        });
        for status in unfinished.into_iter().take(3) {
            milestones.push(Milestone {
                kind: "achievement",
                label: status.name.clone(),
                current: status.progress_value,
                target: status.progress_required,
            });
        }

        // Most-ranked vendor, ties resolved alphabetically.
        let mut vendor_counts: std::collections::HashMap<&str, i64> =
            std::collections::HashMap::new();
        for product_id in ranked.keys() {
            if let Some(meta) = catalog.product(product_id) {
                *vendor_counts.entry(meta.vendor.as_str()).or_default() += 1;
            }
        }
        let favorite_vendor = vendor_counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(vendor, _)| vendor.to_string());

        let catalog_flavors = catalog
            .products()
            .filter(|p| p.rankable)
            .map(|p| p.primary_flavor.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len() as i64;
        let diversity_score = if catalog_flavors > 0 {
            (progress.unique_flavors * 100 / catalog_flavors).clamp(0, 100)
        } else {
            0
        };

        Ok(ProgressResponse {
            progress: ProgressSummary {
                total_points: progress.total_points,
                total_rankings: progress.total_rankings,
                unique_flavors: progress.unique_flavors,
                unique_animals: progress.unique_animals,
                current_streak: progress.current_streak,
                longest_streak: progress.longest_streak,
                next_milestones: milestones,
            },
            insights: ProgressInsights {
                favorite_vendor,
                diversity_score,
            },
        })
    }
    .await;

    match result {
        Ok(response) => Ok(Json(response)),
        Err(e) => Err(fail(&state, "get_progress", Some(&user.user_id), started, e).await),
    }
}

// ── Streaks ───────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakView {
    pub streak_type: StreakType,
    pub current_length: i64,
    pub longest_length: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tick_date: Option<chrono::NaiveDate>,
}

impl From<StreakRow> for StreakView {
    fn from(row: StreakRow) -> Self {
        Self {
            streak_type: row.streak_type,
            current_length: row.current_length,
            longest_length: row.longest_length,
            last_tick_date: row.last_tick_date,
        }
    }
}

#[derive(Serialize)]
pub struct StreaksResponse {
    pub streaks: Vec<StreakView>,
}

pub async fn list_streaks(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<StreaksResponse> {
    let started = Instant::now();
    match state.engine.streaks(&user.user_id).await {
        Ok(rows) => Ok(Json(StreaksResponse {
            streaks: rows.into_iter().map(StreakView::from).collect(),
        })),
        Err(e) => Err(fail(&state, "list_streaks", Some(&user.user_id), started, e).await),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStreakRequest {
    pub streak_type: String,
}

/// Explicit streak tick. Idempotent per day: the source id embeds the
/// calendar date, so a second tick the same day is a duplicate append.
pub async fn update_streak(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<UpdateStreakRequest>,
) -> ApiResult<StreaksResponse> {
    let started = Instant::now();
    let streak_type = StreakType::parse(&request.streak_type).ok_or_else(|| {
        ApiError(ChompError::Validation(format!(
            "unknown streak type: {}",
            request.streak_type
        )))
    })?;

    let event = NewEvent {
        user_id: user.user_id.clone(),
        source_id: format!(
            "streak:{}:{}",
            streak_type.as_str(),
            Utc::now().date_naive()
        ),
        body: EventBody::StreakTick { streak_type },
    };

    let result = RetryPolicy::default()
        .run("update_streak", || state.engine.ingest(event.clone()))
        .await;
    if let Err(e) = result {
        return Err(fail(&state, "update_streak", Some(&user.user_id), started, e).await);
    }

    match state.engine.streaks(&user.user_id).await {
        Ok(rows) => Ok(Json(StreaksResponse {
            streaks: rows.into_iter().map(StreakView::from).collect(),
        })),
        Err(e) => Err(fail(&state, "update_streak", Some(&user.user_id), started, e).await),
    }
}

// ── Leaderboard ───────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LeaderboardParams {
    pub limit: Option<i64>,
    /// Only `all_time` is served; anything else is rejected rather than
    /// silently answered with all-time data.
    pub period: Option<String>,
}

#[derive(Serialize)]
pub struct LeaderboardResponse {
    pub leaderboard: Vec<LeaderboardEntryView>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntryView {
    pub user_id: String,
    pub rank: i64,
    pub display_name: String,
    pub engagement_score: i64,
    pub unique_products: i64,
    pub badges: Vec<chomp_store::BadgeSummary>,
}

pub async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<LeaderboardParams>,
) -> ApiResult<LeaderboardResponse> {
    let started = Instant::now();
    if let Some(period) = params.period.as_deref() {
        if period != "all_time" {
            return Err(ApiError(ChompError::Validation(format!(
                "unsupported leaderboard period: {}",
                period
            ))));
        }
    }
    let limit = params.limit.unwrap_or(25).clamp(1, 100);
    match state.engine.leaderboard_top(limit).await {
        Ok(entries) => Ok(Json(LeaderboardResponse {
            leaderboard: entries
                .into_iter()
                .map(|e| LeaderboardEntryView {
                    user_id: e.user_id,
                    rank: e.rank,
                    display_name: e.display_name,
                    engagement_score: e.engagement_score,
                    unique_products: e.unique_products,
                    badges: e.badges,
                })
                .collect(),
        })),
        Err(e) => Err(fail(&state, "get_leaderboard", Some(&user.user_id), started, e).await),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionResponse {
    pub user_id: String,
    pub rank: i64,
    pub percentile: i64,
}

pub async fn leaderboard_position(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<PositionResponse> {
    let started = Instant::now();
    match state.engine.leaderboard_position(&user.user_id).await {
        Ok(Some(position)) => Ok(Json(PositionResponse {
            user_id: user.user_id,
            rank: position.entry.rank,
            percentile: position.percentile,
        })),
        Ok(None) => Err(ApiError(ChompError::NotFound(
            "user is not on the leaderboard yet".to_string(),
        ))),
        Err(e) => Err(fail(&state, "leaderboard_position", Some(&user.user_id), started, e).await),
    }
}

// ── Fire-and-forget tracking ──────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductViewRequest {
    pub product_id: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// 202 immediately; ingestion happens off the request path and failures
/// are logged, never surfaced.
pub async fn log_product_view(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<ProductViewRequest>,
) -> StatusCode {
    let event = NewEvent {
        user_id: user.user_id,
        source_id: request
            .request_id
            .unwrap_or_else(|| format!("view:{}", Uuid::new_v4())),
        body: EventBody::ProductView {
            product_id: request.product_id,
        },
    };
    tokio::spawn(ingest_detached(Arc::clone(&state.engine), event));
    StatusCode::ACCEPTED
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageViewRequest {
    pub page: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

pub async fn track_page_view(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<PageViewRequest>,
) -> StatusCode {
    let event = NewEvent {
        user_id: user.user_id,
        source_id: request
            .request_id
            .unwrap_or_else(|| format!("page:{}", Uuid::new_v4())),
        body: EventBody::PageView { page: request.page },
    };
    tokio::spawn(ingest_detached(Arc::clone(&state.engine), event));
    StatusCode::ACCEPTED
}

// ── Trending ──────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct TrendingParams {
    pub hours: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendingProduct {
    pub product_id: String,
    pub views: i64,
}

#[derive(Serialize)]
pub struct TrendingResponse {
    pub products: Vec<TrendingProduct>,
}

pub async fn trending_products(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TrendingParams>,
) -> ApiResult<TrendingResponse> {
    let hours = params.hours.unwrap_or(24).clamp(1, 24 * 30);
    let limit = params.limit.unwrap_or(10).clamp(1, 100);
    // Trending is public; no session required.
    let products = state
        .engine
        .trending(hours, limit)
        .await?
        .into_iter()
        .map(|(product_id, views)| TrendingProduct { product_id, views })
        .collect();
    Ok(Json(TrendingResponse { products }))
}

// ── Classification & home stats ───────────────────────────────

pub async fn get_classification(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<chomp_store::UserClassification> {
    let started = Instant::now();
    match state.engine.classification(&user.user_id).await {
        Ok(classification) => Ok(Json(classification)),
        Err(e) => Err(fail(&state, "get_classification", Some(&user.user_id), started, e).await),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeStatsResponse {
    pub total_points: i64,
    pub total_rankings: i64,
    pub current_streak: i64,
    pub achievements_earned: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentile: Option<i64>,
    pub journey_stage: &'static str,
}

/// Denormalized composite for the landing page: one call instead of four.
pub async fn home_stats(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<HomeStatsResponse> {
    let started = Instant::now();
    let result = async {
        let progress = state.engine.progress(&user.user_id).await?;
        let achievements = state.engine.achievements(&user.user_id).await?;
        let position = state.engine.leaderboard_position(&user.user_id).await?;
        let classification = state.engine.classification(&user.user_id).await?;

        Ok(HomeStatsResponse {
            total_points: progress.total_points,
            total_rankings: progress.total_rankings,
            current_streak: progress.current_streak,
            achievements_earned: achievements.iter().filter(|a| a.earned).count(),
            rank: position.as_ref().map(|p| p.entry.rank),
            percentile: position.as_ref().map(|p| p.percentile),
            journey_stage: classification.journey_stage.as_str(),
        })
    }
    .await;

    match result {
        Ok(response) => Ok(Json(response)),
        Err(e) => Err(fail(&state, "home_stats", Some(&user.user_id), started, e).await),
    }
}
