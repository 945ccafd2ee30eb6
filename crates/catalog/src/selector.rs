//! Selector index: narrows the candidate achievement set for an event.
//!
//! Evaluating the full catalog on every event is legal but wasteful; the
//! index answers "which achievements care about this product / these
//! counters" in one lookup each.

use std::collections::HashMap;

use chomp_core::ProductId;

use crate::requirement::{CounterName, Requirement};
use crate::types::{AchievementDef, ProductMeta};

#[derive(Debug, Default)]
pub struct SelectorIndex {
    by_product: HashMap<ProductId, Vec<String>>,
    by_counter: HashMap<CounterName, Vec<String>>,
    by_animal: HashMap<String, Vec<String>>,
    by_flavor: HashMap<String, Vec<String>>,
    /// Dynamic collections with no filter at all match every product.
    unfiltered_dynamic: Vec<String>,
}

impl SelectorIndex {
    pub fn build(defs: &[AchievementDef]) -> Self {
        let mut index = SelectorIndex::default();

        for def in defs {
            for product_id in def.requirement.product_ids() {
                index
                    .by_product
                    .entry(product_id.clone())
                    .or_default()
                    .push(def.code.clone());
            }
            for counter in def.requirement.counters() {
                index
                    .by_counter
                    .entry(counter)
                    .or_default()
                    .push(def.code.clone());
            }
            if let Requirement::DynamicCollection {
                animal_type,
                flavor,
                ..
            } = &def.requirement
            {
                match (animal_type, flavor) {
                    (None, None) => index.unfiltered_dynamic.push(def.code.clone()),
                    (animal, flavor) => {
                        if let Some(a) = animal {
                            index
                                .by_animal
                                .entry(a.clone())
                                .or_default()
                                .push(def.code.clone());
                        }
                        if let Some(f) = flavor {
                            index
                                .by_flavor
                                .entry(f.clone())
                                .or_default()
                                .push(def.code.clone());
                        }
                    }
                }
            }
        }

        index
    }

    /// Candidate codes for a ranking change on `product`.
    ///
    /// Ranking changes also move the ranking-derived counters, so every
    /// counter-indexed achievement is a candidate too.
    pub fn candidates_for_ranking(&self, product: Option<&ProductMeta>) -> Vec<String> {
        let mut codes: Vec<String> = Vec::new();

        if let Some(meta) = product {
            if let Some(v) = self.by_product.get(&meta.product_id) {
                codes.extend(v.iter().cloned());
            }
            if let Some(v) = self.by_animal.get(&meta.animal_type) {
                codes.extend(v.iter().cloned());
            }
            if let Some(v) = self.by_flavor.get(&meta.primary_flavor) {
                codes.extend(v.iter().cloned());
            }
        }
        codes.extend(self.unfiltered_dynamic.iter().cloned());
        for v in self.by_counter.values() {
            codes.extend(v.iter().cloned());
        }

        codes.sort();
        codes.dedup();
        codes
    }

    /// Candidate codes when only the named counters changed.
    pub fn candidates_for_counters(&self, counters: &[CounterName]) -> Vec<String> {
        let mut codes: Vec<String> = Vec::new();
        for counter in counters {
            if let Some(v) = self.by_counter.get(counter) {
                codes.extend(v.iter().cloned());
            }
        }
        codes.sort();
        codes.dedup();
        codes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icon::IconType;
    use crate::requirement::{Tier, TierSpec};
    use crate::types::CollectionType;

    fn def(code: &str, collection_type: CollectionType, requirement: Requirement) -> AchievementDef {
        AchievementDef {
            code: code.into(),
            name: code.into(),
            description: String::new(),
            icon: "⭐".into(),
            icon_type: IconType::Emoji,
            points: 10,
            category: "test".into(),
            collection_type,
            requirement,
        }
    }

    fn meta(product_id: &str, animal: &str, flavor: &str) -> ProductMeta {
        ProductMeta {
            product_id: product_id.into(),
            animal_type: animal.into(),
            primary_flavor: flavor.into(),
            vendor: "v".into(),
            tags: vec![],
            rankable: true,
        }
    }

    fn sample_index() -> SelectorIndex {
        let defs = vec![
            def(
                "coin-7",
                CollectionType::FlavorCoin,
                Requirement::FlavorCoin {
                    product_id: "p-7".into(),
                },
            ),
            def(
                "beef-tour",
                CollectionType::DynamicCollection,
                Requirement::DynamicCollection {
                    animal_type: Some("beef".into()),
                    flavor: None,
                    tiers: vec![TierSpec {
                        tier: Tier::Bronze,
                        threshold: 40.0,
                        points: 50,
                    }],
                },
            ),
            def(
                "rank-master",
                CollectionType::EngagementCollection,
                Requirement::EngagementCollection {
                    counter: CounterName::Rankings,
                    tiers: vec![TierSpec {
                        tier: Tier::Bronze,
                        threshold: 5.0,
                        points: 50,
                    }],
                },
            ),
        ];
        SelectorIndex::build(&defs)
    }

    #[test]
    fn ranking_candidates_include_product_animal_and_counters() {
        let index = sample_index();
        let codes = index.candidates_for_ranking(Some(&meta("p-7", "beef", "teriyaki")));
        assert_eq!(codes, vec!["beef-tour", "coin-7", "rank-master"]);
    }

    #[test]
    fn unrelated_product_still_hits_counters() {
        let index = sample_index();
        let codes = index.candidates_for_ranking(Some(&meta("p-9", "turkey", "bbq")));
        assert_eq!(codes, vec!["rank-master"]);
    }

    #[test]
    fn counter_candidates() {
        let index = sample_index();
        let codes = index.candidates_for_counters(&[CounterName::Rankings]);
        assert_eq!(codes, vec!["rank-master"]);
        assert!(index
            .candidates_for_counters(&[CounterName::UniqueFlavors])
            .is_empty());
    }
}
