//! The engine facade the Gateway talks to.
//!
//! One `ingest` call is one command: append to the event log, evaluate
//! under the user's lock, commit, then publish. Publishing happens only
//! after the transaction commits; a duplicate append publishes nothing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use chomp_catalog::{Catalog, CatalogCache};
use chomp_core::{ChompResult, EventBody, NewEvent, UserEvent};
use chomp_notify::{OutboundFrame, Topic, TopicRouter};
use chomp_store::{
    AppendOutcome, EventLog, LeaderboardEntry, StateStore, StreakRow, UserClassification,
    UserProgress,
};

use crate::classifier::Classifier;
use crate::deadline::Deadline;
use crate::evaluator::{AchievementStatus, Evaluator, StepTimeouts};
use crate::leaderboard::{LeaderboardAggregator, Position};
use crate::locks::UserLocks;
use crate::notifications::Notification;

#[derive(Debug, Clone, Copy)]
pub struct EngineTunables {
    /// Wall-clock budget for one ingest command.
    pub command_deadline: Duration,
    pub step_timeouts: StepTimeouts,
    /// Lazy classification staleness bound.
    pub classification_ttl: Duration,
}

impl Default for EngineTunables {
    fn default() -> Self {
        Self {
            command_deadline: Duration::from_secs(1),
            step_timeouts: StepTimeouts::default(),
            classification_ttl: Duration::from_secs(300),
        }
    }
}

/// What one ingest call did.
#[derive(Debug)]
pub enum IngestOutcome {
    /// Fresh event: evaluated, committed, published.
    Applied {
        event: UserEvent,
        notifications: Vec<Notification>,
    },
    /// Replay of an already-applied event. Nothing changed, nothing
    /// published; carries the original event id for the caller.
    Duplicate { event: UserEvent },
}

impl IngestOutcome {
    pub fn event_id(&self) -> i64 {
        match self {
            IngestOutcome::Applied { event, .. } | IngestOutcome::Duplicate { event } => {
                event.event_id
            }
        }
    }
}

pub struct Engine {
    events: Arc<dyn EventLog>,
    store: Arc<dyn StateStore>,
    catalog: Arc<CatalogCache>,
    router: Arc<TopicRouter>,
    locks: UserLocks,
    evaluator: Evaluator,
    classifier: Classifier,
    leaderboard: LeaderboardAggregator,
    tunables: EngineTunables,
}

impl Engine {
    pub fn new(
        events: Arc<dyn EventLog>,
        store: Arc<dyn StateStore>,
        catalog: Arc<CatalogCache>,
        router: Arc<TopicRouter>,
        tunables: EngineTunables,
    ) -> Self {
        Self {
            evaluator: Evaluator::new(Arc::clone(&store), tunables.step_timeouts),
            classifier: Classifier::new(Arc::clone(&store), tunables.classification_ttl),
            leaderboard: LeaderboardAggregator::new(Arc::clone(&store)),
            locks: UserLocks::new(),
            events,
            store,
            catalog,
            router,
            tunables,
        }
    }

    pub fn router(&self) -> &Arc<TopicRouter> {
        &self.router
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Current catalog snapshot, through the TTL cache.
    pub async fn catalog(&self) -> ChompResult<Arc<Catalog>> {
        Ok(self.catalog.get().await?)
    }

    // ── Commands ──────────────────────────────────────────────

    /// Ingest one event end to end.
    pub async fn ingest(&self, event: NewEvent) -> ChompResult<IngestOutcome> {
        let deadline = Deadline::after(self.tunables.command_deadline);
        let catalog = self.catalog.get().await?;

        // All state changes for one user are serialized.
        let lock = self.locks.for_user(&event.user_id);
        let _guard = lock.lock().await;

        deadline.check("event append")?;
        let committed = match self.events.append(event).await? {
            AppendOutcome::Committed(e) => e,
            AppendOutcome::Duplicate(e) if e.applied_at.is_some() => {
                info!(
                    user_id = %e.user_id,
                    source_id = %e.source_id,
                    event_id = e.event_id,
                    "Duplicate event, skipping evaluation"
                );
                return Ok(IngestOutcome::Duplicate { event: e });
            }
            AppendOutcome::Duplicate(e) => {
                // The append landed but the apply never committed, so the
                // replay must evaluate; evaluation itself is idempotent.
                warn!(
                    user_id = %e.user_id,
                    event_id = e.event_id,
                    "Recovering an appended but unapplied event"
                );
                e
            }
        };

        let outcome = self.evaluator.apply(&catalog, &committed, &deadline).await?;

        // Rankings and deliveries move the classification inputs.
        if matches!(
            committed.body,
            EventBody::RankingSaved { .. }
                | EventBody::RankingCleared { .. }
                | EventBody::OrderDelivered { .. }
        ) {
            self.classifier.mark_dirty(&committed.user_id);
        }

        self.publish(&outcome.notifications).await;

        Ok(IngestOutcome::Applied {
            event: committed,
            notifications: outcome.notifications,
        })
    }

    /// Fan notifications out to their topics. Multiple achievement earns
    /// from one evaluation go to the user as a single batched frame.
    async fn publish(&self, notifications: &[Notification]) {
        let earned: Vec<&Notification> = notifications
            .iter()
            .filter(|n| matches!(n, Notification::AchievementEarned { .. }))
            .collect();

        if earned.len() > 1 {
            if let Some(topic) = earned.first().map(|n| n.topic()) {
                let payload = serde_json::json!({
                    "achievements": earned
                        .iter()
                        .map(|n| serde_json::to_value(n).unwrap_or_default())
                        .collect::<Vec<_>>(),
                });
                self.router
                    .publish(&topic, OutboundFrame::new("achievements:earned", payload))
                    .await;
            }
        }

        for notification in notifications {
            if earned.len() > 1 && matches!(notification, Notification::AchievementEarned { .. }) {
                continue;
            }
            self.router
                .publish(&notification.topic(), notification.to_frame())
                .await;
        }
    }

    /// Recompute the leaderboard snapshot and tell subscribers.
    pub async fn refresh_leaderboard(&self) -> ChompResult<()> {
        let catalog = self.catalog.get().await?;
        let refreshed_at = self.leaderboard.refresh(&catalog).await?;
        let notification = Notification::LeaderboardUpdated { refreshed_at };
        let delivered = self
            .router
            .publish(&Topic::Leaderboard, notification.to_frame())
            .await;
        if delivered == 0 {
            // Normal when nobody is watching the board.
            tracing::debug!("Leaderboard refreshed with no subscribers");
        }
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────

    pub async fn achievements(&self, user_id: &str) -> ChompResult<Vec<AchievementStatus>> {
        let catalog = self.catalog.get().await?;
        self.evaluator.achievement_statuses(&catalog, user_id).await
    }

    pub async fn progress(&self, user_id: &str) -> ChompResult<UserProgress> {
        Ok(self
            .store
            .progress(user_id)
            .await?
            .unwrap_or_else(|| UserProgress::empty(user_id.to_string())))
    }

    pub async fn classification(&self, user_id: &str) -> ChompResult<UserClassification> {
        let catalog = self.catalog.get().await?;
        self.classifier.classification(&catalog, user_id).await
    }

    pub async fn streaks(&self, user_id: &str) -> ChompResult<Vec<StreakRow>> {
        Ok(self.store.streaks_for_user(user_id).await?)
    }

    pub async fn leaderboard_top(&self, n: i64) -> ChompResult<Vec<LeaderboardEntry>> {
        self.leaderboard.top(n).await
    }

    pub async fn leaderboard_position(&self, user_id: &str) -> ChompResult<Option<Position>> {
        self.leaderboard.position(user_id).await
    }

    /// Most-viewed products over the window, for the trending widget.
    pub async fn trending(&self, hours: i64, limit: i64) -> ChompResult<Vec<(String, i64)>> {
        let since = Utc::now() - chrono::Duration::hours(hours);
        let trending = self.store.trending_products(since, limit).await?;
        Ok(trending)
    }

    /// Invalidate the cached catalog after an admin catalog change.
    pub async fn reload_catalog(&self) -> ChompResult<Arc<Catalog>> {
        self.catalog.invalidate().await;
        let catalog = self.catalog.get().await?;
        Ok(catalog)
    }
}

/// Log-and-continue wrapper for fire-and-forget ingestion paths.
pub async fn ingest_detached(engine: Arc<Engine>, event: NewEvent) {
    let kind = event.body.kind();
    let user_id = event.user_id.clone();
    if let Err(error) = engine.ingest(event).await {
        warn!(user_id = %user_id, kind, %error, "Detached ingest failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chomp_catalog::{
        CatalogData, CatalogError, CatalogSource, CollectionType, IconType, ProductMeta,
        Requirement,
    };
    use chomp_store::MemoryStore;
    use tokio::sync::mpsc;

    struct FixtureSource(CatalogData);

    #[async_trait]
    impl CatalogSource for FixtureSource {
        async fn load(&self) -> Result<CatalogData, CatalogError> {
            Ok(self.0.clone())
        }
    }

    fn test_engine(store: Arc<MemoryStore>) -> Engine {
        let data = CatalogData {
            achievements: vec![chomp_catalog::AchievementDef {
                code: "fc1".to_string(),
                name: "First Bite".to_string(),
                description: String::new(),
                icon: "🥩".to_string(),
                icon_type: IconType::Emoji,
                points: 50,
                category: "coins".to_string(),
                collection_type: CollectionType::FlavorCoin,
                requirement: Requirement::FlavorCoin {
                    product_id: "p1".to_string(),
                },
            }],
            products: vec![ProductMeta {
                product_id: "p1".to_string(),
                animal_type: "beef".to_string(),
                primary_flavor: "teriyaki".to_string(),
                vendor: "v".to_string(),
                tags: vec![],
                rankable: true,
            }],
            ..CatalogData::default()
        };
        let cache = Arc::new(CatalogCache::new(
            Arc::new(FixtureSource(data)),
            Duration::from_secs(300),
            Duration::from_millis(500),
        ));
        Engine::new(
            store.clone(),
            store,
            cache,
            Arc::new(TopicRouter::new()),
            EngineTunables::default(),
        )
    }

    fn ranking(source: &str) -> NewEvent {
        NewEvent {
            user_id: "u1".to_string(),
            source_id: source.to_string(),
            body: EventBody::RankingSaved {
                product_id: "p1".to_string(),
                position: 1,
            },
        }
    }

    #[tokio::test]
    async fn ingest_publishes_to_the_user_topic_after_commit() {
        let store = Arc::new(MemoryStore::new());
        store.seed_user("u1", "Uma", None);
        let engine = test_engine(store.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        engine
            .router()
            .subscribe(
                Topic::User("u1".to_string()),
                chomp_notify::SocketId::next(),
                tx,
            )
            .await;

        let outcome = engine.ingest(ranking("r1")).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Applied { .. }));

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.event, "flavor_coins:earned");
        // The state it announces is already committed.
        let rows = store.achievements_for_user("u1").await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_ingest_is_silent() {
        let store = Arc::new(MemoryStore::new());
        store.seed_user("u1", "Uma", None);
        let engine = test_engine(store.clone());

        let first = engine.ingest(ranking("r1")).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        engine
            .router()
            .subscribe(
                Topic::User("u1".to_string()),
                chomp_notify::SocketId::next(),
                tx,
            )
            .await;

        let replay = engine.ingest(ranking("r1")).await.unwrap();
        assert!(matches!(replay, IngestOutcome::Duplicate { .. }));
        assert_eq!(replay.event_id(), first.event_id());
        assert!(rx.try_recv().is_err());

        let progress = store.progress("u1").await.unwrap().unwrap();
        assert_eq!(progress.total_points, 50);
    }

    /// State store whose first delta commit fails, everything else
    /// delegating to the wrapped [`MemoryStore`].
    struct RecoveringStore {
        inner: Arc<MemoryStore>,
        fail_next_apply: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl StateStore for RecoveringStore {
        async fn user(
            &self,
            user_id: &str,
        ) -> Result<Option<chomp_store::UserRow>, chomp_store::StoreError> {
            self.inner.user(user_id).await
        }

        async fn user_for_session(
            &self,
            token: &str,
        ) -> Result<Option<chomp_store::UserRow>, chomp_store::StoreError> {
            self.inner.user_for_session(token).await
        }

        async fn display_names(
            &self,
            user_ids: &[chomp_core::UserId],
        ) -> Result<std::collections::HashMap<chomp_core::UserId, String>, chomp_store::StoreError>
        {
            self.inner.display_names(user_ids).await
        }

        async fn ranked_products(
            &self,
            user_id: &str,
        ) -> Result<std::collections::HashMap<chomp_core::ProductId, i32>, chomp_store::StoreError>
        {
            self.inner.ranked_products(user_id).await
        }

        async fn count_activities_since(
            &self,
            user_id: &str,
            since: chrono::DateTime<Utc>,
        ) -> Result<i64, chomp_store::StoreError> {
            self.inner.count_activities_since(user_id, since).await
        }

        async fn activity_dates(
            &self,
            user_id: &str,
            days: i64,
        ) -> Result<Vec<chrono::NaiveDate>, chomp_store::StoreError> {
            self.inner.activity_dates(user_id, days).await
        }

        async fn progress(
            &self,
            user_id: &str,
        ) -> Result<Option<UserProgress>, chomp_store::StoreError> {
            self.inner.progress(user_id).await
        }

        async fn achievements_for_user(
            &self,
            user_id: &str,
        ) -> Result<Vec<chomp_store::UserAchievement>, chomp_store::StoreError> {
            self.inner.achievements_for_user(user_id).await
        }

        async fn classification(
            &self,
            user_id: &str,
        ) -> Result<Option<UserClassification>, chomp_store::StoreError> {
            self.inner.classification(user_id).await
        }

        async fn put_classification(
            &self,
            row: &UserClassification,
        ) -> Result<(), chomp_store::StoreError> {
            self.inner.put_classification(row).await
        }

        async fn streaks_for_user(
            &self,
            user_id: &str,
        ) -> Result<Vec<StreakRow>, chomp_store::StoreError> {
            self.inner.streaks_for_user(user_id).await
        }

        async fn apply_event_deltas(
            &self,
            user_id: &str,
            deltas: &chomp_store::EventDeltas,
        ) -> Result<(), chomp_store::StoreError> {
            if self
                .fail_next_apply
                .swap(false, std::sync::atomic::Ordering::SeqCst)
            {
                return Err(chomp_store::StoreError::Timeout(
                    "state write".to_string(),
                ));
            }
            self.inner.apply_event_deltas(user_id, deltas).await
        }

        async fn all_progress(&self) -> Result<Vec<UserProgress>, chomp_store::StoreError> {
            self.inner.all_progress().await
        }

        async fn replace_leaderboard(
            &self,
            entries: &[LeaderboardEntry],
        ) -> Result<(), chomp_store::StoreError> {
            self.inner.replace_leaderboard(entries).await
        }

        async fn leaderboard_top(
            &self,
            n: i64,
        ) -> Result<Vec<LeaderboardEntry>, chomp_store::StoreError> {
            self.inner.leaderboard_top(n).await
        }

        async fn leaderboard_position(
            &self,
            user_id: &str,
        ) -> Result<Option<(LeaderboardEntry, i64)>, chomp_store::StoreError> {
            self.inner.leaderboard_position(user_id).await
        }

        async fn trending_products(
            &self,
            since: chrono::DateTime<Utc>,
            limit: i64,
        ) -> Result<Vec<(chomp_core::ProductId, i64)>, chomp_store::StoreError> {
            self.inner.trending_products(since, limit).await
        }
    }

    #[tokio::test]
    async fn retry_recovers_an_appended_but_unapplied_event() {
        let memory = Arc::new(MemoryStore::new());
        memory.seed_user("u1", "Uma", None);
        let flaky = Arc::new(RecoveringStore {
            inner: memory.clone(),
            fail_next_apply: std::sync::atomic::AtomicBool::new(true),
        });

        let data = CatalogData {
            achievements: vec![chomp_catalog::AchievementDef {
                code: "fc1".to_string(),
                name: "First Bite".to_string(),
                description: String::new(),
                icon: "🥩".to_string(),
                icon_type: IconType::Emoji,
                points: 50,
                category: "coins".to_string(),
                collection_type: CollectionType::FlavorCoin,
                requirement: Requirement::FlavorCoin {
                    product_id: "p1".to_string(),
                },
            }],
            products: vec![ProductMeta {
                product_id: "p1".to_string(),
                animal_type: "beef".to_string(),
                primary_flavor: "teriyaki".to_string(),
                vendor: "v".to_string(),
                tags: vec![],
                rankable: true,
            }],
            ..CatalogData::default()
        };
        let cache = Arc::new(CatalogCache::new(
            Arc::new(FixtureSource(data)),
            Duration::from_secs(300),
            Duration::from_millis(500),
        ));
        let engine = Engine::new(
            memory.clone(),
            flaky,
            cache,
            Arc::new(TopicRouter::new()),
            EngineTunables::default(),
        );

        // The append commits but the state write fails on the way out.
        let error = engine.ingest(ranking("r1")).await.unwrap_err();
        assert!(error.is_retryable());
        assert!(memory.achievements_for_user("u1").await.unwrap().is_empty());

        // The gateway retry hits the duplicate path and must still apply.
        let retried = engine.ingest(ranking("r1")).await.unwrap();
        assert!(matches!(retried, IngestOutcome::Applied { .. }));
        assert_eq!(memory.achievements_for_user("u1").await.unwrap().len(), 1);

        // Once applied, further replays stay silent.
        let replay = engine.ingest(ranking("r1")).await.unwrap();
        assert!(matches!(replay, IngestOutcome::Duplicate { .. }));
        assert_eq!(memory.achievements_for_user("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn queries_fall_back_to_empty_state() {
        let store = Arc::new(MemoryStore::new());
        store.seed_user("u1", "Uma", None);
        let engine = test_engine(store);

        let progress = engine.progress("u1").await.unwrap();
        assert_eq!(progress.total_points, 0);
        assert!(engine.streaks("u1").await.unwrap().is_empty());
        assert!(engine.leaderboard_position("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn trending_window_counts_hours_not_days() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        for (product, at) in [("fresh", now), ("stale", now - chrono::Duration::hours(3))] {
            store.seed_activity(chomp_store::ActivityRecord {
                user_id: "u1".to_string(),
                activity_type: "product_view".to_string(),
                product_id: Some(product.to_string()),
                created_at: at,
            });
        }
        let engine = test_engine(store);

        // A 2-hour window must not round up to a full day.
        let trending = engine.trending(2, 10).await.unwrap();
        assert_eq!(trending, vec![("fresh".to_string(), 1)]);

        let wide = engine.trending(4, 10).await.unwrap();
        assert_eq!(wide.len(), 2);
    }
}
