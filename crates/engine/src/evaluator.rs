//! Event evaluation: deterministic, idempotent achievement processing.
//!
//! For each committed event the Evaluator recomputes the user's counters
//! from authoritative aggregates, evaluates the candidate achievements
//! narrowed by the selector index, commits all deltas in one transaction,
//! and returns the notifications to publish after commit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use chomp_catalog::{AchievementDef, Catalog, CounterName, Requirement, Tier};
use chomp_core::{ChompError, ChompResult, EventBody, ProductId, StreakType, UserEvent};
use chomp_store::{
    ActivityRecord, EventDeltas, RankingDelta, StateStore, StoreError, StreakRow, UserAchievement,
    UserProgress,
};

use crate::deadline::Deadline;
use crate::notifications::Notification;
use crate::streaks::{advance_streak, settle_streak};

/// Per-step store timeouts (§ suspension points).
#[derive(Debug, Clone, Copy)]
pub struct StepTimeouts {
    pub state_read: Duration,
    pub state_write: Duration,
}

impl Default for StepTimeouts {
    fn default() -> Self {
        Self {
            state_read: Duration::from_millis(500),
            state_write: Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
pub struct EvalOutcome {
    pub event_id: i64,
    pub deltas: EventDeltas,
    pub notifications: Vec<Notification>,
}

/// A user's view of one achievement, for the Gateway's listings.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AchievementStatus {
    pub code: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub icon_type: chomp_catalog::IconType,
    pub category: String,
    pub points: u32,
    pub earned: bool,
    pub current_tier: Option<Tier>,
    pub progress_value: i64,
    pub progress_required: i64,
    pub points_awarded: i64,
}

pub struct Evaluator {
    store: Arc<dyn StateStore>,
    timeouts: StepTimeouts,
}

/// Counters recomputed from authoritative aggregates for one evaluation.
#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    total_rankings: i64,
    unique_flavors: i64,
    unique_animals: i64,
    activities_30d: i64,
    longest_streak: i64,
}

impl Counters {
    fn value(&self, name: CounterName) -> i64 {
        match name {
            CounterName::Rankings => self.total_rankings,
            CounterName::UniqueFlavors => self.unique_flavors,
            CounterName::UniqueAnimals => self.unique_animals,
            CounterName::Activities30d => self.activities_30d,
            CounterName::LongestStreak => self.longest_streak,
        }
    }
}

/// Result of evaluating one requirement against current state.
#[derive(Debug, Clone, Copy)]
struct ReqProgress {
    value: i64,
    required: i64,
    tier: Option<Tier>,
    earned: bool,
}

impl Evaluator {
    pub fn new(store: Arc<dyn StateStore>, timeouts: StepTimeouts) -> Self {
        Self { store, timeouts }
    }

    async fn timed<T, F>(&self, limit: Duration, operation: &str, fut: F) -> ChompResult<T>
    where
        F: std::future::Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result.map_err(ChompError::from),
            Err(_) => Err(ChompError::Transient(format!("{} timed out", operation))),
        }
    }

    /// Apply one committed event. All deltas commit atomically; the
    /// returned notifications must be published only after this returns.
    pub async fn apply(
        &self,
        catalog: &Catalog,
        event: &UserEvent,
        deadline: &Deadline,
    ) -> ChompResult<EvalOutcome> {
        let user_id = event.user_id.as_str();
        let read = self.timeouts.state_read;

        // Step 1: authoritative state reads.
        deadline.check("state read")?;
        let mut ranked = self
            .timed(read, "ranked_products", self.store.ranked_products(user_id))
            .await?;
        let prior_achievements = self
            .timed(
                read,
                "achievements_for_user",
                self.store.achievements_for_user(user_id),
            )
            .await?;
        let prior_streaks = self
            .timed(read, "streaks_for_user", self.store.streaks_for_user(user_id))
            .await?;
        let window_start = event.created_at - chrono::Duration::days(30);
        let prior_activities = self
            .timed(
                read,
                "count_activities_since",
                self.store.count_activities_since(user_id, window_start),
            )
            .await?;
        let prior_progress = self
            .timed(read, "progress", self.store.progress(user_id))
            .await?;

        let mut deltas = EventDeltas {
            applied_event_id: Some(event.event_id),
            ..EventDeltas::default()
        };
        let mut notifications: Vec<Notification> = Vec::new();

        // Step 2: fold this event into the ranked set and activity tally.
        match &event.body {
            EventBody::RankingSaved {
                product_id,
                position,
            } => {
                ranked.insert(product_id.clone(), *position);
                deltas.ranking = Some(RankingDelta::Upsert {
                    product_id: product_id.clone(),
                    position: *position,
                });
            }
            EventBody::RankingCleared { product_id } => {
                ranked.remove(product_id);
                deltas.ranking = Some(RankingDelta::Clear {
                    product_id: product_id.clone(),
                });
            }
            EventBody::OrderDelivered {
                order_id,
                product_ids,
            } => {
                deltas.order_items = product_ids
                    .iter()
                    .map(|p| (order_id.clone(), p.clone()))
                    .collect();
            }
            _ => {}
        }

        let is_activity = event.body.is_activity();
        if is_activity {
            deltas.activity = Some(ActivityRecord {
                user_id: event.user_id.clone(),
                activity_type: event.body.kind().to_string(),
                product_id: ranking_product(&event.body),
                created_at: event.created_at,
            });
        }

        // Step 3: streak advancement and settlement.
        let today = event.created_at.date_naive();
        let grace = catalog.streak.grace_days;
        let mut streaks: HashMap<StreakType, StreakRow> = prior_streaks
            .into_iter()
            .map(|row| (row.streak_type, row))
            .collect();

        for streak_type in [StreakType::Ranking, StreakType::Login] {
            let qualifies = match &event.body {
                EventBody::StreakTick { streak_type: t } => *t == streak_type,
                body => body.qualifies_for_streak(streak_type),
            };
            let prior = streaks
                .remove(&streak_type)
                .unwrap_or_else(|| StreakRow::fresh(event.user_id.clone(), streak_type));

            let next = if qualifies {
                let advance = advance_streak(&prior, today, grace, &catalog.streak.milestones);
                if advance.changed {
                    notifications.push(Notification::StreakUpdated {
                        user_id: event.user_id.clone(),
                        streak_type,
                        current_length: advance.row.current_length,
                        longest_length: advance.row.longest_length,
                    });
                    deltas.streaks.push(advance.row.clone());
                }
                if let Some(length) = advance.milestone {
                    notifications.push(Notification::StreakMilestone {
                        user_id: event.user_id.clone(),
                        streak_type,
                        length,
                    });
                }
                advance.row
            } else {
                let settled = settle_streak(&prior, today, grace);
                if settled != prior {
                    deltas.streaks.push(settled.clone());
                }
                settled
            };
            streaks.insert(streak_type, next);
        }

        // Step 4: counters, recomputed rather than incremented.
        let (unique_flavors, unique_animals) = flavor_animal_counts(catalog, &ranked);
        let ranking_streak = &streaks[&StreakType::Ranking];
        let counters = Counters {
            total_rankings: ranked.len() as i64,
            unique_flavors,
            unique_animals,
            activities_30d: prior_activities + i64::from(is_activity),
            longest_streak: ranking_streak.longest_length,
        };

        // Step 5: evaluate the narrowed candidate set.
        let candidates = candidate_codes(catalog, &event.body);
        let prior_by_code: HashMap<&str, &UserAchievement> = prior_achievements
            .iter()
            .map(|a| (a.achievement_code.as_str(), a))
            .collect();

        for code in &candidates {
            let Some(def) = catalog.achievement(code) else {
                continue;
            };
            let progress = evaluate_requirement(catalog, &def.requirement, &ranked, &counters);
            if let Some((row, notification)) = reconcile(
                &event.user_id,
                def,
                prior_by_code.get(code.as_str()).copied(),
                progress,
                event.created_at,
            ) {
                deltas.achievements.push(row);
                if let Some(n) = notification {
                    notifications.push(n);
                }
            }
        }

        // Step 4.1.4: among tiered notifications sharing a requirement
        // type, surface only the highest tier; all rows stay recorded.
        notifications = reduce_highest_tier(notifications);

        // Activity feed entries for the public feed.
        if let EventBody::RankingSaved { product_id, .. } = &event.body {
            notifications.push(Notification::ActivityNew {
                activity_type: "ranking_saved".to_string(),
                activity_data: serde_json::json!({
                    "userId": event.user_id,
                    "productId": product_id,
                }),
                ts: event.created_at,
            });
        }
        for n in notifications
            .iter()
            .filter(|n| matches!(n, Notification::AchievementEarned { .. }))
            .cloned()
            .collect::<Vec<_>>()
        {
            if let Notification::AchievementEarned { code, name, .. } = &n {
                notifications.push(Notification::ActivityNew {
                    activity_type: "achievement_earned".to_string(),
                    activity_data: serde_json::json!({
                        "userId": event.user_id,
                        "code": code,
                        "name": name,
                    }),
                    ts: event.created_at,
                });
            }
        }

        // Step 6: progress row, including the recomputed point total.
        let prior_points: i64 = prior_achievements.iter().map(|a| a.points_awarded).sum();
        let updated_codes: Vec<&str> = deltas
            .achievements
            .iter()
            .map(|a| a.achievement_code.as_str())
            .collect();
        let unchanged_points: i64 = prior_achievements
            .iter()
            .filter(|a| !updated_codes.contains(&a.achievement_code.as_str()))
            .map(|a| a.points_awarded)
            .sum();
        let new_points: i64 = deltas.achievements.iter().map(|a| a.points_awarded).sum();
        let total_points = unchanged_points + new_points;

        let ranking_streak = &streaks[&StreakType::Ranking];
        deltas.progress = Some(UserProgress {
            user_id: event.user_id.clone(),
            total_rankings: counters.total_rankings,
            unique_flavors: counters.unique_flavors,
            unique_animals: counters.unique_animals,
            activities_30d: counters.activities_30d,
            current_streak: ranking_streak.current_length,
            longest_streak: ranking_streak.longest_length,
            // Non-activity events must not erase the real last activity.
            last_activity_at: if is_activity {
                Some(event.created_at)
            } else {
                prior_progress.as_ref().and_then(|p| p.last_activity_at)
            },
            total_points,
        });

        debug!(
            user_id = %event.user_id,
            event_id = event.event_id,
            candidates = candidates.len(),
            upserts = deltas.achievements.len(),
            points_before = prior_points,
            points_after = total_points,
            "Evaluated event"
        );

        // Step 7: one transaction per event. Publish happens after this
        // returns; a deadline never cancels a write already issued.
        deadline.check("state write")?;
        self.timed(
            self.timeouts.state_write,
            "apply_event_deltas",
            self.store.apply_event_deltas(user_id, &deltas),
        )
        .await?;

        Ok(EvalOutcome {
            event_id: event.event_id,
            deltas,
            notifications,
        })
    }

    /// Achievement listing for one user. Hidden collections are omitted
    /// until earned; progress is computed live from the ranked set.
    pub async fn achievement_statuses(
        &self,
        catalog: &Catalog,
        user_id: &str,
    ) -> ChompResult<Vec<AchievementStatus>> {
        let read = self.timeouts.state_read;
        let ranked = self
            .timed(read, "ranked_products", self.store.ranked_products(user_id))
            .await?;
        let rows = self
            .timed(
                read,
                "achievements_for_user",
                self.store.achievements_for_user(user_id),
            )
            .await?;
        let progress = self
            .timed(read, "progress", self.store.progress(user_id))
            .await?;

        let by_code: HashMap<&str, &UserAchievement> = rows
            .iter()
            .map(|a| (a.achievement_code.as_str(), a))
            .collect();

        let counters = Counters {
            total_rankings: ranked.len() as i64,
            activities_30d: progress.as_ref().map_or(0, |p| p.activities_30d),
            longest_streak: progress.as_ref().map_or(0, |p| p.longest_streak),
            ..counters_from_ranked(catalog, &ranked)
        };

        let mut statuses = Vec::new();
        for def in catalog.achievements() {
            let row = by_code.get(def.code.as_str()).copied();
            if def.is_hidden() && row.is_none() {
                continue;
            }
            let rp = evaluate_requirement(catalog, &def.requirement, &ranked, &counters);
            statuses.push(AchievementStatus {
                code: def.code.clone(),
                name: def.name.clone(),
                description: def.description.clone(),
                icon: def.icon.clone(),
                icon_type: def.icon_type,
                category: def.category.clone(),
                points: def.points,
                earned: row.is_some(),
                current_tier: row.and_then(|r| r.current_tier),
                progress_value: rp.value,
                progress_required: rp.required,
                points_awarded: row.map_or(0, |r| r.points_awarded),
            });
        }
        Ok(statuses)
    }
}

fn ranking_product(body: &EventBody) -> Option<ProductId> {
    match body {
        EventBody::RankingSaved { product_id, .. }
        | EventBody::RankingCleared { product_id }
        | EventBody::ProductView { product_id } => Some(product_id.clone()),
        _ => None,
    }
}

fn counters_from_ranked(catalog: &Catalog, ranked: &HashMap<ProductId, i32>) -> Counters {
    let (unique_flavors, unique_animals) = flavor_animal_counts(catalog, ranked);
    Counters {
        unique_flavors,
        unique_animals,
        ..Counters::default()
    }
}

fn flavor_animal_counts(catalog: &Catalog, ranked: &HashMap<ProductId, i32>) -> (i64, i64) {
    let mut flavors = std::collections::HashSet::new();
    let mut animals = std::collections::HashSet::new();
    for product_id in ranked.keys() {
        if let Some(meta) = catalog.product(product_id) {
            flavors.insert(meta.primary_flavor.as_str());
            animals.insert(meta.animal_type.as_str());
        }
    }
    (flavors.len() as i64, animals.len() as i64)
}

/// Candidate achievement codes for this event, via the selector index.
fn candidate_codes(catalog: &Catalog, body: &EventBody) -> Vec<String> {
    match body {
        EventBody::RankingSaved { product_id, .. } | EventBody::RankingCleared { product_id } => {
            let meta = catalog.product(product_id);
            catalog.selector.candidates_for_ranking(meta)
        }
        EventBody::StreakTick { .. } => catalog
            .selector
            .candidates_for_counters(&[CounterName::LongestStreak]),
        _ => catalog
            .selector
            .candidates_for_counters(&[CounterName::Activities30d]),
    }
}

fn evaluate_requirement(
    catalog: &Catalog,
    requirement: &Requirement,
    ranked: &HashMap<ProductId, i32>,
    counters: &Counters,
) -> ReqProgress {
    match requirement {
        Requirement::StaticCollection { product_ids }
        | Requirement::HiddenCollection { product_ids } => {
            let value = product_ids.iter().filter(|p| ranked.contains_key(*p)).count() as i64;
            let required = product_ids.len() as i64;
            ReqProgress {
                value,
                required,
                tier: None,
                earned: required > 0 && value == required,
            }
        }
        Requirement::CustomProductList {
            product_ids,
            min_count,
        } => {
            let mut distinct: Vec<&ProductId> = product_ids
                .iter()
                .filter(|p| ranked.contains_key(*p))
                .collect();
            distinct.sort();
            distinct.dedup();
            let value = distinct.len() as i64;
            let required = i64::from(*min_count);
            ReqProgress {
                value,
                required,
                tier: None,
                earned: value >= required,
            }
        }
        Requirement::FlavorCoin { product_id } => {
            let earned = ranked.contains_key(product_id);
            ReqProgress {
                value: i64::from(earned),
                required: 1,
                tier: None,
                earned,
            }
        }
        Requirement::DynamicCollection {
            animal_type,
            flavor,
            tiers,
        } => {
            let matching = catalog.matching_products(animal_type.as_deref(), flavor.as_deref());
            let total = matching.len() as i64;
            let value = matching
                .iter()
                .filter(|p| ranked.contains_key(&p.product_id))
                .count() as i64;
            let percent = if total > 0 {
                value as f64 * 100.0 / total as f64
            } else {
                0.0
            };
            let tier = tiers
                .iter()
                .rev()
                .find(|spec| percent >= spec.threshold)
                .map(|spec| spec.tier);
            let top_threshold = tiers.last().map_or(0.0, |spec| spec.threshold);
            let required = ((total as f64) * top_threshold / 100.0).ceil() as i64;
            ReqProgress {
                value,
                required,
                tier,
                earned: tier.is_some(),
            }
        }
        Requirement::EngagementCollection { counter, tiers } => {
            let value = counters.value(*counter);
            let tier = tiers
                .iter()
                .rev()
                .find(|spec| value as f64 >= spec.threshold)
                .map(|spec| spec.tier);
            let required = tiers.last().map_or(0, |spec| spec.threshold as i64);
            ReqProgress {
                value,
                required,
                tier,
                earned: tier.is_some(),
            }
        }
        Requirement::Legacy { counters: minima } => {
            let satisfied = minima
                .iter()
                .filter(|(name, min)| counters.value(**name) >= **min as i64)
                .count() as i64;
            let required = minima.len() as i64;
            ReqProgress {
                value: satisfied,
                required,
                tier: None,
                earned: required > 0 && satisfied == required,
            }
        }
    }
}

/// Diff computed progress against the stored row. Returns the upsert and
/// notification when something was earned or upgraded; never downgrades.
fn reconcile(
    user_id: &str,
    def: &AchievementDef,
    prior: Option<&UserAchievement>,
    progress: ReqProgress,
    now: DateTime<Utc>,
) -> Option<(UserAchievement, Option<Notification>)> {
    if def.has_tiers() {
        let reached = progress.tier?;
        let prior_tier = prior.and_then(|p| p.current_tier);
        if Some(reached) <= prior_tier {
            return None;
        }

        let new_points = i64::from(def.points_for_tier(Some(reached)));
        let old_points = prior.map_or(0, |p| p.points_awarded);
        let row = UserAchievement {
            user_id: user_id.to_string(),
            achievement_code: def.code.clone(),
            earned_at: prior.map_or(now, |p| p.earned_at),
            current_tier: Some(reached),
            progress_value: progress.value,
            progress_required: progress.required,
            points_awarded: new_points,
        };
        let notification = if prior_tier.is_none() {
            Notification::AchievementEarned {
                user_id: user_id.to_string(),
                code: def.code.clone(),
                name: def.name.clone(),
                icon: def.icon.clone(),
                tier: Some(reached),
                points_delta: new_points - old_points,
                requirement_type: def.requirement.requirement_type().to_string(),
                is_flavor_coin: false,
            }
        } else {
            Notification::TierUpgraded {
                user_id: user_id.to_string(),
                code: def.code.clone(),
                name: def.name.clone(),
                icon: def.icon.clone(),
                tier: reached,
                points_delta: new_points - old_points,
                requirement_type: def.requirement.requirement_type().to_string(),
            }
        };
        return Some((row, Some(notification)));
    }

    if !progress.earned || prior.is_some() {
        return None;
    }

    let points = i64::from(def.points);
    let row = UserAchievement {
        user_id: user_id.to_string(),
        achievement_code: def.code.clone(),
        earned_at: now,
        current_tier: None,
        progress_value: progress.value,
        progress_required: progress.required,
        points_awarded: points,
    };
    let notification = Notification::AchievementEarned {
        user_id: user_id.to_string(),
        code: def.code.clone(),
        name: def.name.clone(),
        icon: def.icon.clone(),
        tier: None,
        points_delta: points,
        requirement_type: def.requirement.requirement_type().to_string(),
        is_flavor_coin: matches!(def.requirement, Requirement::FlavorCoin { .. }),
    };
    Some((row, Some(notification)))
}

/// Keep only the highest tier per requirement type among tiered
/// notifications; untiered notifications pass through unchanged.
fn reduce_highest_tier(notifications: Vec<Notification>) -> Vec<Notification> {
    let mut best: HashMap<String, Tier> = HashMap::new();
    for n in &notifications {
        if let (Some(req), Some(tier)) = (n.requirement_type(), n.tier()) {
            let entry = best.entry(req.to_string()).or_insert(tier);
            if tier > *entry {
                *entry = tier;
            }
        }
    }

    notifications
        .into_iter()
        .filter(|n| match (n.requirement_type(), n.tier()) {
            (Some(req), Some(tier)) => best.get(req) == Some(&tier),
            _ => true,
        })
        .collect()
}
