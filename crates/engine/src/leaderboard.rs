//! Denormalized leaderboard snapshots.
//!
//! The aggregator recomputes the whole snapshot from progress rows and
//! replaces it wholesale; readers only ever see a complete snapshot.
//! Staleness is bounded by the background refresh interval.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::info;

use chomp_catalog::Catalog;
use chomp_core::ChompResult;
use chomp_store::{BadgeSummary, LeaderboardEntry, StateStore, UserAchievement};

/// How many badges a leaderboard row carries.
const BADGES_PER_ENTRY: usize = 3;

/// One user's place on the board.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Position {
    pub entry: LeaderboardEntry,
    /// 1..=100; higher is better.
    pub percentile: i64,
    pub total_users: i64,
}

pub struct LeaderboardAggregator {
    store: Arc<dyn StateStore>,
    // Serializes refreshes; a second caller waits, then overwrites.
    refresh_lock: Mutex<()>,
}

impl LeaderboardAggregator {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Recompute and replace the snapshot. Returns the refresh timestamp.
    pub async fn refresh(&self, catalog: &Catalog) -> ChompResult<DateTime<Utc>> {
        let _guard = self.refresh_lock.lock().await;

        let progress = self.store.all_progress().await?;
        let user_ids: Vec<String> = progress.iter().map(|p| p.user_id.clone()).collect();
        let names = self.store.display_names(&user_ids).await?;

        let mut entries = Vec::with_capacity(progress.len());
        for p in progress {
            let achievements = self.store.achievements_for_user(&p.user_id).await?;
            let score = catalog.score.engagement_score(
                p.total_points.max(0) as u64,
                p.longest_streak.max(0) as u64,
                p.total_rankings.max(0) as u64,
            );
            entries.push(LeaderboardEntry {
                display_name: names.get(&p.user_id).cloned().unwrap_or_default(),
                user_id: p.user_id,
                rank: 0,
                engagement_score: score as i64,
                unique_products: p.total_rankings,
                badges: badge_summary(catalog, &achievements),
            });
        }

        // Score descending, ties by unique products then user id.
        entries.sort_by(|a, b| {
            b.engagement_score
                .cmp(&a.engagement_score)
                .then_with(|| b.unique_products.cmp(&a.unique_products))
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.rank = i as i64 + 1;
        }

        self.store.replace_leaderboard(&entries).await?;
        let refreshed_at = Utc::now();
        info!(entries = entries.len(), "Leaderboard refreshed");
        Ok(refreshed_at)
    }

    pub async fn top(&self, n: i64) -> ChompResult<Vec<LeaderboardEntry>> {
        Ok(self.store.leaderboard_top(n).await?)
    }

    /// A user's snapshot entry with percentile, if they are on the board.
    pub async fn position(&self, user_id: &str) -> ChompResult<Option<Position>> {
        let Some((entry, total)) = self.store.leaderboard_position(user_id).await? else {
            return Ok(None);
        };
        let percentile = percentile(entry.rank, total);
        Ok(Some(Position {
            entry,
            percentile,
            total_users: total,
        }))
    }
}

/// Percentile of a rank in a board of `total`, clamped to 1..=100.
fn percentile(rank: i64, total: i64) -> i64 {
    if total <= 0 {
        return 1;
    }
    let raw = ((total - rank + 1) as f64 / total as f64 * 100.0).round() as i64;
    raw.clamp(1, 100)
}

/// Highest-value earned achievements, as compact badge chips.
fn badge_summary(catalog: &Catalog, achievements: &[UserAchievement]) -> Vec<BadgeSummary> {
    let mut sorted: Vec<&UserAchievement> = achievements.iter().collect();
    sorted.sort_by(|a, b| {
        b.points_awarded
            .cmp(&a.points_awarded)
            .then_with(|| a.achievement_code.cmp(&b.achievement_code))
    });
    sorted
        .into_iter()
        .take(BADGES_PER_ENTRY)
        .filter_map(|a| {
            catalog.achievement(&a.achievement_code).map(|def| BadgeSummary {
                name: def.name.clone(),
                tier: a.current_tier,
                icon: def.icon.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chomp_catalog::CatalogData;
    use chomp_store::{EventDeltas, MemoryStore, UserProgress};

    async fn seed_progress(store: &MemoryStore, user_id: &str, points: i64, rankings: i64) {
        store.seed_user(user_id, &format!("user {}", user_id), None);
        store
            .apply_event_deltas(
                user_id,
                &EventDeltas {
                    progress: Some(UserProgress {
                        total_points: points,
                        total_rankings: rankings,
                        ..UserProgress::empty(user_id.to_string())
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ties_break_by_unique_products_then_user_id() {
        let store = Arc::new(MemoryStore::new());
        // Same score (points + 2 * rankings): a = 104+2*8, b = 110+2*5.
        seed_progress(&store, "a", 104, 8).await;
        seed_progress(&store, "b", 110, 5).await;
        let catalog = Catalog::new(CatalogData::default()).unwrap();

        let board = LeaderboardAggregator::new(store.clone());
        board.refresh(&catalog).await.unwrap();

        let top = board.top(2).await.unwrap();
        assert_eq!(top[0].user_id, "a");
        assert_eq!(top[0].rank, 1);
        assert_eq!(top[1].user_id, "b");
        assert_eq!(top[1].rank, 2);
        assert_eq!(top[0].engagement_score, top[1].engagement_score);
    }

    #[tokio::test]
    async fn ranks_are_dense_from_one() {
        let store = Arc::new(MemoryStore::new());
        for (i, user) in ["u1", "u2", "u3", "u4"].iter().enumerate() {
            seed_progress(&store, user, (i as i64) * 10, 0).await;
        }
        let catalog = Catalog::new(CatalogData::default()).unwrap();

        let board = LeaderboardAggregator::new(store.clone());
        board.refresh(&catalog).await.unwrap();

        let top = board.top(10).await.unwrap();
        let ranks: Vec<i64> = top.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn position_carries_percentile() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..10 {
            seed_progress(&store, &format!("u{}", i), (10 - i) * 10, 0).await;
        }
        let catalog = Catalog::new(CatalogData::default()).unwrap();
        let board = LeaderboardAggregator::new(store.clone());
        board.refresh(&catalog).await.unwrap();

        let first = board.position("u0").await.unwrap().unwrap();
        assert_eq!(first.entry.rank, 1);
        assert_eq!(first.percentile, 100);

        let last = board.position("u9").await.unwrap().unwrap();
        assert_eq!(last.entry.rank, 10);
        assert_eq!(last.percentile, 10);

        assert!(board.position("stranger").await.unwrap().is_none());
    }

    #[test]
    fn percentile_is_clamped() {
        assert_eq!(percentile(1, 1), 100);
        assert_eq!(percentile(1000, 1000), 1);
        assert_eq!(percentile(500, 1000), 50);
    }
}
