//! Five-axis user classification.
//!
//! Classification rows are recreated in place. Recomputation happens
//! opportunistically after ranking and order events (the engine marks the
//! user dirty) and lazily when a caller reads a record older than the TTL.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use chomp_catalog::{Catalog, ClassificationConfig};
use chomp_core::{ChompError, ChompResult, UserId};
use chomp_store::{
    EngagementLevel, ExplorationBreadth, JourneyStage, StateStore, UserClassification,
};

pub struct Classifier {
    store: Arc<dyn StateStore>,
    ttl: Duration,
    dirty: Mutex<HashSet<UserId>>,
}

/// Inputs to the pure classification rules.
#[derive(Debug, Clone, Default)]
pub struct ClassifierInputs {
    pub total_rankings: u64,
    pub activities_30d: u64,
    pub days_since_registration: i64,
    pub days_since_last_activity: Option<i64>,
    /// Ranked-product counts per primary flavor.
    pub flavor_counts: HashMap<String, u64>,
    /// Ranked-product counts per animal type.
    pub animal_counts: HashMap<String, u64>,
}

impl Classifier {
    pub fn new(store: Arc<dyn StateStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            dirty: Mutex::new(HashSet::new()),
        }
    }

    /// Force recomputation on the next read, without doing it inline.
    pub fn mark_dirty(&self, user_id: &str) {
        self.dirty.lock().unwrap().insert(user_id.to_string());
    }

    /// Cached-or-fresh classification for one user.
    pub async fn classification(
        &self,
        catalog: &Catalog,
        user_id: &str,
    ) -> ChompResult<UserClassification> {
        let now = Utc::now();
        let dirty = self.dirty.lock().unwrap().contains(user_id);
        if !dirty {
            if let Some(stored) = self.store.classification(user_id).await? {
                let age = now - stored.last_calculated_at;
                if age < chrono::Duration::from_std(self.ttl).unwrap_or_default() {
                    return Ok(stored);
                }
            }
        }
        self.classify(catalog, user_id, now).await
    }

    /// Recompute and persist the classification row. Idempotent.
    pub async fn classify(
        &self,
        catalog: &Catalog,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> ChompResult<UserClassification> {
        let user = self
            .store
            .user(user_id)
            .await?
            .ok_or_else(|| ChompError::NotFound(format!("user {} not found", user_id)))?;

        let ranked = self.store.ranked_products(user_id).await?;
        let progress = self.store.progress(user_id).await?;
        let activities_30d = self
            .store
            .count_activities_since(user_id, now - chrono::Duration::days(30))
            .await?;

        let mut flavor_counts: HashMap<String, u64> = HashMap::new();
        let mut animal_counts: HashMap<String, u64> = HashMap::new();
        for product_id in ranked.keys() {
            if let Some(meta) = catalog.product(product_id) {
                *flavor_counts.entry(meta.primary_flavor.clone()).or_default() += 1;
                *animal_counts.entry(meta.animal_type.clone()).or_default() += 1;
            }
        }

        let inputs = ClassifierInputs {
            total_rankings: ranked.len() as u64,
            activities_30d: activities_30d.max(0) as u64,
            days_since_registration: (now - user.registered_at).num_days(),
            days_since_last_activity: progress
                .as_ref()
                .and_then(|p| p.last_activity_at)
                .map(|at| (now - at).num_days()),
            flavor_counts,
            animal_counts,
        };

        let classification = classify_inputs(&catalog.classification, user_id, &inputs, now);
        self.store.put_classification(&classification).await?;
        self.dirty.lock().unwrap().remove(user_id);

        debug!(
            user_id,
            journey_stage = classification.journey_stage.as_str(),
            engagement_level = classification.engagement_level.as_str(),
            "Classified user"
        );
        Ok(classification)
    }
}

/// The classification rules, as a pure function of the inputs.
pub fn classify_inputs(
    cfg: &ClassificationConfig,
    user_id: &str,
    inputs: &ClassifierInputs,
    now: DateTime<Utc>,
) -> UserClassification {
    UserClassification {
        user_id: user_id.to_string(),
        journey_stage: journey_stage(cfg, inputs),
        engagement_level: engagement_level(cfg, inputs.activities_30d),
        exploration_breadth: exploration_breadth(cfg, inputs),
        focus_areas: focus_areas(cfg, inputs),
        flavor_communities: flavor_communities(cfg, &inputs.flavor_counts),
        last_calculated_at: now,
    }
}

fn journey_stage(cfg: &ClassificationConfig, inputs: &ClassifierInputs) -> JourneyStage {
    if inputs
        .days_since_last_activity
        .is_some_and(|days| days >= cfg.dormant_after_days)
    {
        return JourneyStage::Dormant;
    }
    if inputs.total_rankings == 0 && inputs.days_since_registration <= cfg.new_user_max_days {
        return JourneyStage::NewUser;
    }
    let rankings = inputs.total_rankings;
    let activities = inputs.activities_30d;
    if rankings >= cfg.power_user_min_rankings && activities >= cfg.power_user_min_activities_30d {
        JourneyStage::PowerUser
    } else if rankings >= cfg.engaged_min_rankings
        && rankings <= cfg.engaged_max_rankings
        && activities >= cfg.engaged_min_activities_30d
    {
        JourneyStage::Engaged
    } else if rankings >= cfg.exploring_min_rankings
        && rankings <= cfg.exploring_max_rankings
        && activities >= cfg.exploring_min_activities_30d
    {
        JourneyStage::Exploring
    } else {
        JourneyStage::NewUser
    }
}

fn engagement_level(cfg: &ClassificationConfig, activities_30d: u64) -> EngagementLevel {
    if activities_30d >= cfg.very_high_activities {
        EngagementLevel::VeryHigh
    } else if activities_30d >= cfg.high_activities {
        EngagementLevel::High
    } else if activities_30d >= cfg.medium_activities {
        EngagementLevel::Medium
    } else if activities_30d >= cfg.low_activities {
        EngagementLevel::Low
    } else {
        EngagementLevel::None
    }
}

fn exploration_breadth(cfg: &ClassificationConfig, inputs: &ClassifierInputs) -> ExplorationBreadth {
    let flavors = inputs.flavor_counts.len() as u64;
    let animals = inputs.animal_counts.len() as u64;
    if flavors >= cfg.diverse_min_flavors && animals >= cfg.diverse_min_animals {
        ExplorationBreadth::Diverse
    } else if flavors >= cfg.moderate_min_flavors
        && flavors <= cfg.moderate_max_flavors
        && animals >= cfg.moderate_min_animals
    {
        ExplorationBreadth::Moderate
    } else {
        ExplorationBreadth::Narrow
    }
}

/// Top two flavors and top two animals by count, kept only at or above the
/// focus minimum, merged and ordered by count descending.
fn focus_areas(cfg: &ClassificationConfig, inputs: &ClassifierInputs) -> Vec<String> {
    let mut merged: Vec<(String, u64)> = Vec::new();
    merged.extend(top_two(&inputs.flavor_counts, cfg.focus_min_count));
    merged.extend(top_two(&inputs.animal_counts, cfg.focus_min_count));
    merged.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    merged.truncate(cfg.focus_max_areas);
    merged.into_iter().map(|(token, _)| token).collect()
}

fn top_two(counts: &HashMap<String, u64>, min_count: u64) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> = counts
        .iter()
        .filter(|(_, &count)| count >= min_count)
        .map(|(token, &count)| (token.clone(), count))
        .collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(2);
    entries
}

fn flavor_communities(
    cfg: &ClassificationConfig,
    flavor_counts: &HashMap<String, u64>,
) -> BTreeMap<String, String> {
    flavor_counts
        .iter()
        .filter(|(_, &count)| count > 0)
        .map(|(flavor, &count)| (flavor.clone(), cfg.community_tier(count).to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chomp_catalog::{CatalogData, ProductMeta, ScoreConfig, StreakConfig};
    use chomp_store::{ActivityRecord, EventDeltas, MemoryStore, RankingDelta, UserProgress};

    fn inputs() -> ClassifierInputs {
        ClassifierInputs {
            days_since_registration: 100,
            ..ClassifierInputs::default()
        }
    }

    fn cfg() -> ClassificationConfig {
        ClassificationConfig::default()
    }

    #[test]
    fn power_user_needs_both_volume_and_recency() {
        let mut i = inputs();
        i.total_rankings = 35;
        i.activities_30d = 22;
        assert_eq!(journey_stage(&cfg(), &i), JourneyStage::PowerUser);

        i.activities_30d = 10;
        assert_eq!(journey_stage(&cfg(), &i), JourneyStage::NewUser);
    }

    #[test]
    fn dormant_overrides_everything() {
        let mut i = inputs();
        i.total_rankings = 35;
        i.activities_30d = 22;
        i.days_since_last_activity = Some(31);
        assert_eq!(journey_stage(&cfg(), &i), JourneyStage::Dormant);
    }

    #[test]
    fn fresh_account_with_no_rankings_is_new() {
        let mut i = inputs();
        i.days_since_registration = 3;
        assert_eq!(journey_stage(&cfg(), &i), JourneyStage::NewUser);
    }

    #[test]
    fn engaged_and_exploring_bands() {
        let mut i = inputs();
        i.total_rankings = 15;
        i.activities_30d = 6;
        assert_eq!(journey_stage(&cfg(), &i), JourneyStage::Engaged);

        i.total_rankings = 4;
        i.activities_30d = 2;
        assert_eq!(journey_stage(&cfg(), &i), JourneyStage::Exploring);
    }

    #[test]
    fn engagement_level_thresholds() {
        let cfg = cfg();
        assert_eq!(engagement_level(&cfg, 0), EngagementLevel::None);
        assert_eq!(engagement_level(&cfg, 1), EngagementLevel::Low);
        assert_eq!(engagement_level(&cfg, 5), EngagementLevel::Medium);
        assert_eq!(engagement_level(&cfg, 20), EngagementLevel::High);
        assert_eq!(engagement_level(&cfg, 50), EngagementLevel::VeryHigh);
    }

    #[test]
    fn breadth_bands() {
        let counts = |n: usize, prefix: &str| -> HashMap<String, u64> {
            (0..n).map(|i| (format!("{}{}", prefix, i), 1)).collect()
        };
        let mut i = inputs();
        i.flavor_counts = counts(9, "f");
        i.animal_counts = counts(3, "a");
        assert_eq!(exploration_breadth(&cfg(), &i), ExplorationBreadth::Diverse);

        i.flavor_counts = counts(5, "f");
        i.animal_counts = counts(2, "a");
        assert_eq!(exploration_breadth(&cfg(), &i), ExplorationBreadth::Moderate);

        i.flavor_counts = counts(2, "f");
        assert_eq!(exploration_breadth(&cfg(), &i), ExplorationBreadth::Narrow);
    }

    #[test]
    fn focus_areas_take_top_tokens_above_minimum() {
        let mut i = inputs();
        i.flavor_counts = [
            ("teriyaki".to_string(), 8),
            ("bbq".to_string(), 5),
            ("spicy".to_string(), 4),
            ("mild".to_string(), 2), // below minimum
        ]
        .into_iter()
        .collect();
        i.animal_counts = [("beef".to_string(), 12), ("turkey".to_string(), 3)]
            .into_iter()
            .collect();

        let areas = focus_areas(&cfg(), &i);
        assert_eq!(areas, vec!["beef", "teriyaki", "bbq", "turkey"]);
    }

    #[test]
    fn communities_cover_every_ranked_flavor() {
        let counts = [
            ("teriyaki".to_string(), 1),
            ("bbq".to_string(), 7),
            ("spicy".to_string(), 25),
        ]
        .into_iter()
        .collect();
        let communities = flavor_communities(&cfg(), &counts);
        assert_eq!(communities["teriyaki"], "curious");
        assert_eq!(communities["bbq"], "taster");
        assert_eq!(communities["spicy"], "explorer");
    }

    // Scenario: heavy recent activity classifies power_user; a month of
    // silence flips the same user to dormant.
    #[tokio::test]
    async fn reclassification_follows_recency() {
        let products: Vec<ProductMeta> = (0..35)
            .map(|i| ProductMeta {
                product_id: format!("p{}", i),
                animal_type: format!("animal{}", i % 3),
                primary_flavor: format!("flavor{}", i % 5),
                vendor: "v".to_string(),
                tags: vec![],
                rankable: true,
            })
            .collect();
        let catalog = Catalog::new(CatalogData {
            achievements: vec![],
            products,
            classification: ClassificationConfig::default(),
            score: ScoreConfig::default(),
            streak: StreakConfig::default(),
        })
        .unwrap();

        let store = Arc::new(MemoryStore::new());
        store.seed_user("u1", "Uma", None);
        let now = Utc::now();
        store.set_registered_at("u1", now - chrono::Duration::days(90));
        for i in 0..35 {
            store
                .apply_event_deltas(
                    "u1",
                    &EventDeltas {
                        ranking: Some(RankingDelta::Upsert {
                            product_id: format!("p{}", i),
                            position: i + 1,
                        }),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
        for i in 0..22 {
            store.seed_activity(ActivityRecord {
                user_id: "u1".to_string(),
                activity_type: "ranking_saved".to_string(),
                product_id: None,
                created_at: now - chrono::Duration::days(i % 20),
            });
        }
        store
            .apply_event_deltas(
                "u1",
                &EventDeltas {
                    progress: Some(UserProgress {
                        last_activity_at: Some(now - chrono::Duration::days(1)),
                        ..UserProgress::empty("u1".to_string())
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let classifier = Classifier::new(store.clone(), Duration::from_secs(300));
        let c = classifier.classify(&catalog, "u1", now).await.unwrap();
        assert_eq!(c.journey_stage, JourneyStage::PowerUser);
        assert_eq!(c.engagement_level, EngagementLevel::High);

        // 31 days later with no events: activities age out of the window
        // and the last activity is past the dormancy cutoff.
        let later = now + chrono::Duration::days(31);
        let c = classifier.classify(&catalog, "u1", later).await.unwrap();
        assert_eq!(c.journey_stage, JourneyStage::Dormant);
    }

    #[tokio::test]
    async fn cached_row_is_served_until_stale_or_dirty() {
        let catalog = Catalog::new(CatalogData::default()).unwrap();
        let store = Arc::new(MemoryStore::new());
        store.seed_user("u1", "Uma", None);

        let classifier = Classifier::new(store.clone(), Duration::from_secs(300));
        let first = classifier.classification(&catalog, "u1").await.unwrap();
        let second = classifier.classification(&catalog, "u1").await.unwrap();
        assert_eq!(first.last_calculated_at, second.last_calculated_at);

        classifier.mark_dirty("u1");
        let third = classifier.classification(&catalog, "u1").await.unwrap();
        assert!(third.last_calculated_at >= first.last_calculated_at);
    }
}
