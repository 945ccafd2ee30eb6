//! HTTP router construction.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;
use crate::{api, webhook, ws};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/events", post(api::ingest_event))
        .route("/achievements", get(api::list_achievements))
        .route(
            "/achievement/{code}/products",
            get(api::achievement_products),
        )
        .route("/progress", get(api::get_progress))
        .route("/streaks", get(api::list_streaks))
        .route("/streaks/update", post(api::update_streak))
        .route("/leaderboard", get(api::get_leaderboard))
        .route("/leaderboard/position", get(api::leaderboard_position))
        .route("/product-view", post(api::log_product_view))
        .route("/track-view", post(api::track_page_view))
        .route("/trending-products", get(api::trending_products))
        .route("/classification", get(api::get_classification))
        .route("/home-stats", get(api::home_stats))
        .route("/webhooks/orders", post(webhook::order_delivered))
        .route("/ws", get(ws::ws_upgrade))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
