//! Background tasks: the leaderboard refresh cadence.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use chomp_engine::Engine;

/// Refresh the leaderboard snapshot on a fixed cadence. Failures are
/// logged and the cadence continues; staleness is bounded, not zero.
pub async fn leaderboard_refresher(engine: Arc<Engine>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Err(error) = engine.refresh_leaderboard().await {
            warn!(%error, "Leaderboard refresh failed");
        }
    }
}
