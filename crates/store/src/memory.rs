//! In-memory store for engine tests and local development.
//!
//! Mirrors the Postgres semantics: duplicate (user_id, source_id) appends
//! are rejected, deltas commit atomically under one lock.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use chomp_core::{NewEvent, ProductId, StreakType, UserEvent, UserId};

use crate::error::StoreError;
use crate::traits::{AppendOutcome, EventLog, StateStore};
use crate::types::{
    ActivityRecord, EventDeltas, LeaderboardEntry, RankingDelta, StreakRow, UserAchievement,
    UserClassification, UserProgress, UserRow,
};

#[derive(Default)]
struct Inner {
    next_event_id: i64,
    events: Vec<UserEvent>,
    by_source: HashMap<(UserId, String), usize>,
    users: HashMap<UserId, UserRow>,
    sessions: HashMap<String, UserId>,
    rankings: HashMap<UserId, HashMap<ProductId, i32>>,
    activities: Vec<ActivityRecord>,
    progress: HashMap<UserId, UserProgress>,
    achievements: HashMap<(UserId, String), UserAchievement>,
    classifications: HashMap<UserId, UserClassification>,
    streaks: HashMap<(UserId, StreakType), StreakRow>,
    leaderboard: Vec<LeaderboardEntry>,
    order_items: Vec<(UserId, String, ProductId)>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user with an optional session token.
    pub fn seed_user(&self, user_id: &str, display_name: &str, token: Option<&str>) {
        let mut inner = self.inner.lock().unwrap();
        inner.users.insert(
            user_id.to_string(),
            UserRow {
                user_id: user_id.to_string(),
                display_name: display_name.to_string(),
                registered_at: Utc::now(),
            },
        );
        if let Some(t) = token {
            inner.sessions.insert(t.to_string(), user_id.to_string());
        }
    }

    /// Backdate a user's registration, for journey-stage tests.
    pub fn set_registered_at(&self, user_id: &str, at: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(user) = inner.users.get_mut(user_id) {
            user.registered_at = at;
        }
    }

    /// Insert an activity directly, bypassing the event log (test setup).
    pub fn seed_activity(&self, record: ActivityRecord) {
        self.inner.lock().unwrap().activities.push(record);
    }
}

#[async_trait]
impl EventLog for MemoryStore {
    async fn append(&self, event: NewEvent) -> Result<AppendOutcome, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (event.user_id.clone(), event.source_id.clone());
        if let Some(&idx) = inner.by_source.get(&key) {
            return Ok(AppendOutcome::Duplicate(inner.events[idx].clone()));
        }

        inner.next_event_id += 1;
        let committed = UserEvent {
            event_id: inner.next_event_id,
            user_id: event.user_id,
            source_id: event.source_id,
            body: event.body,
            created_at: Utc::now(),
            applied_at: None,
        };
        inner.events.push(committed.clone());
        let idx = inner.events.len() - 1;
        inner.by_source.insert(key, idx);
        Ok(AppendOutcome::Committed(committed))
    }

    async fn events_for_user_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<UserEvent>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .events
            .iter()
            .filter(|e| e.user_id == user_id && e.created_at >= since)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn user(&self, user_id: &str) -> Result<Option<UserRow>, StoreError> {
        Ok(self.inner.lock().unwrap().users.get(user_id).cloned())
    }

    async fn user_for_session(&self, token: &str) -> Result<Option<UserRow>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .sessions
            .get(token)
            .and_then(|uid| inner.users.get(uid))
            .cloned())
    }

    async fn display_names(
        &self,
        user_ids: &[UserId],
    ) -> Result<HashMap<UserId, String>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(user_ids
            .iter()
            .filter_map(|id| {
                inner
                    .users
                    .get(id)
                    .map(|u| (id.clone(), u.display_name.clone()))
            })
            .collect())
    }

    async fn ranked_products(
        &self,
        user_id: &str,
    ) -> Result<HashMap<ProductId, i32>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .rankings
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn count_activities_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .activities
            .iter()
            .filter(|a| a.user_id == user_id && a.created_at >= since)
            .count() as i64)
    }

    async fn activity_dates(
        &self,
        user_id: &str,
        days: i64,
    ) -> Result<Vec<NaiveDate>, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let inner = self.inner.lock().unwrap();
        let mut dates: Vec<NaiveDate> = inner
            .activities
            .iter()
            .filter(|a| a.user_id == user_id && a.created_at >= cutoff)
            .map(|a| a.created_at.date_naive())
            .collect();
        dates.sort();
        dates.dedup();
        dates.reverse();
        Ok(dates)
    }

    async fn progress(&self, user_id: &str) -> Result<Option<UserProgress>, StoreError> {
        Ok(self.inner.lock().unwrap().progress.get(user_id).cloned())
    }

    async fn achievements_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<UserAchievement>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<UserAchievement> = inner
            .achievements
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.achievement_code.cmp(&b.achievement_code));
        Ok(rows)
    }

    async fn classification(
        &self,
        user_id: &str,
    ) -> Result<Option<UserClassification>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .classifications
            .get(user_id)
            .cloned())
    }

    async fn put_classification(&self, row: &UserClassification) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .classifications
            .insert(row.user_id.clone(), row.clone());
        Ok(())
    }

    async fn streaks_for_user(&self, user_id: &str) -> Result<Vec<StreakRow>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .streaks
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn apply_event_deltas(
        &self,
        user_id: &str,
        deltas: &EventDeltas,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();

        match &deltas.ranking {
            Some(RankingDelta::Upsert {
                product_id,
                position,
            }) => {
                inner
                    .rankings
                    .entry(user_id.to_string())
                    .or_default()
                    .insert(product_id.clone(), *position);
            }
            Some(RankingDelta::Clear { product_id }) => {
                if let Some(map) = inner.rankings.get_mut(user_id) {
                    map.remove(product_id);
                }
            }
            None => {}
        }

        if let Some(activity) = &deltas.activity {
            inner.activities.push(activity.clone());
        }

        if let Some(progress) = &deltas.progress {
            inner
                .progress
                .insert(user_id.to_string(), progress.clone());
        }

        for row in &deltas.achievements {
            inner.achievements.insert(
                (row.user_id.clone(), row.achievement_code.clone()),
                row.clone(),
            );
        }

        for row in &deltas.streaks {
            inner
                .streaks
                .insert((row.user_id.clone(), row.streak_type), row.clone());
        }

        for (order_id, product_id) in &deltas.order_items {
            inner
                .order_items
                .push((user_id.to_string(), order_id.clone(), product_id.clone()));
        }

        if let Some(event_id) = deltas.applied_event_id {
            if let Some(event) = inner.events.iter_mut().find(|e| e.event_id == event_id) {
                event.applied_at = Some(Utc::now());
            }
        }

        Ok(())
    }

    async fn all_progress(&self) -> Result<Vec<UserProgress>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<UserProgress> = inner.progress.values().cloned().collect();
        rows.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(rows)
    }

    async fn replace_leaderboard(
        &self,
        entries: &[LeaderboardEntry],
    ) -> Result<(), StoreError> {
        self.inner.lock().unwrap().leaderboard = entries.to_vec();
        Ok(())
    }

    async fn leaderboard_top(&self, n: i64) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .leaderboard
            .iter()
            .take(n.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn leaderboard_position(
        &self,
        user_id: &str,
    ) -> Result<Option<(LeaderboardEntry, i64)>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let total = inner.leaderboard.len() as i64;
        Ok(inner
            .leaderboard
            .iter()
            .find(|e| e.user_id == user_id)
            .map(|e| (e.clone(), total)))
    }

    async fn trending_products(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<(ProductId, i64)>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut counts: HashMap<ProductId, i64> = HashMap::new();
        for a in &inner.activities {
            if a.activity_type == "product_view" && a.created_at >= since {
                if let Some(pid) = &a.product_id {
                    *counts.entry(pid.clone()).or_default() += 1;
                }
            }
        }
        let mut ranked: Vec<(ProductId, i64)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit.max(0) as usize);
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chomp_core::EventBody;

    fn ranking_event(user: &str, source: &str, product: &str) -> NewEvent {
        NewEvent {
            user_id: user.to_string(),
            source_id: source.to_string(),
            body: EventBody::RankingSaved {
                product_id: product.to_string(),
                position: 1,
            },
        }
    }

    #[tokio::test]
    async fn append_assigns_monotonic_ids_and_rejects_duplicates() {
        let store = MemoryStore::new();

        let first = store.append(ranking_event("u1", "s1", "p1")).await.unwrap();
        let second = store.append(ranking_event("u1", "s2", "p2")).await.unwrap();

        let (a, b) = match (first, second) {
            (AppendOutcome::Committed(a), AppendOutcome::Committed(b)) => (a, b),
            other => panic!("expected two commits, got {:?}", other),
        };
        assert!(b.event_id > a.event_id);

        match store.append(ranking_event("u1", "s1", "p9")).await.unwrap() {
            AppendOutcome::Duplicate(original) => {
                assert_eq!(original.event_id, a.event_id);
                // The original body wins; the replay payload is discarded.
                assert_eq!(original.body, a.body);
            }
            other => panic!("expected duplicate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn deltas_commit_together() {
        let store = MemoryStore::new();
        store.seed_user("u1", "Uma", None);

        let mut progress = UserProgress::empty("u1".to_string());
        progress.total_rankings = 1;
        progress.total_points = 100;

        let deltas = EventDeltas {
            ranking: Some(RankingDelta::Upsert {
                product_id: "p1".to_string(),
                position: 1,
            }),
            activity: Some(ActivityRecord {
                user_id: "u1".to_string(),
                activity_type: "ranking_saved".to_string(),
                product_id: Some("p1".to_string()),
                created_at: Utc::now(),
            }),
            progress: Some(progress.clone()),
            achievements: vec![],
            streaks: vec![],
            order_items: vec![],
            applied_event_id: None,
        };

        store.apply_event_deltas("u1", &deltas).await.unwrap();

        assert_eq!(store.ranked_products("u1").await.unwrap().len(), 1);
        assert_eq!(store.progress("u1").await.unwrap(), Some(progress));
        assert_eq!(
            store
                .count_activities_since("u1", Utc::now() - chrono::Duration::days(1))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn apply_marks_the_event_applied() {
        let store = MemoryStore::new();
        let committed = match store.append(ranking_event("u1", "s1", "p1")).await.unwrap() {
            AppendOutcome::Committed(e) => e,
            other => panic!("expected commit, got {:?}", other),
        };
        assert!(committed.applied_at.is_none());

        store
            .apply_event_deltas(
                "u1",
                &EventDeltas {
                    applied_event_id: Some(committed.event_id),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        match store.append(ranking_event("u1", "s1", "p1")).await.unwrap() {
            AppendOutcome::Duplicate(e) => assert!(e.applied_at.is_some()),
            other => panic!("expected duplicate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn trending_orders_by_count_then_product_id() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for (product, views) in [("p1", 3), ("p2", 5), ("p3", 3)] {
            for _ in 0..views {
                store.seed_activity(ActivityRecord {
                    user_id: "u1".to_string(),
                    activity_type: "product_view".to_string(),
                    product_id: Some(product.to_string()),
                    created_at: now,
                });
            }
        }

        let trending = store
            .trending_products(now - chrono::Duration::hours(24), 10)
            .await
            .unwrap();
        assert_eq!(
            trending,
            vec![
                ("p2".to_string(), 5),
                ("p1".to_string(), 3),
                ("p3".to_string(), 3)
            ]
        );
    }
}
