//! Achievement requirement variants.
//!
//! Each achievement's requirement is one tagged variant; the Evaluator
//! dispatches on the tag. Adding a new kind is one variant plus one
//! evaluation case.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use chomp_core::ProductId;

/// Ordered tier ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Bronze => "bronze",
            Tier::Silver => "silver",
            Tier::Gold => "gold",
            Tier::Platinum => "platinum",
            Tier::Diamond => "diamond",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bronze" => Some(Tier::Bronze),
            "silver" => Some(Tier::Silver),
            "gold" => Some(Tier::Gold),
            "platinum" => Some(Tier::Platinum),
            "diamond" => Some(Tier::Diamond),
            _ => None,
        }
    }
}

/// One rung of a tiered requirement.
///
/// `threshold` is a percentage (0..=100) for dynamic collections and an
/// absolute count for engagement collections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierSpec {
    pub tier: Tier,
    pub threshold: f64,
    pub points: u32,
}

/// Counters an engagement requirement can target. `Ord` keys the frozen
/// counter maps of legacy requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterName {
    Rankings,
    UniqueFlavors,
    UniqueAnimals,
    Activities30d,
    LongestStreak,
}

impl CounterName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterName::Rankings => "rankings",
            CounterName::UniqueFlavors => "unique_flavors",
            CounterName::UniqueAnimals => "unique_animals",
            CounterName::Activities30d => "activities_30d",
            CounterName::LongestStreak => "longest_streak",
        }
    }
}

/// The seven requirement kinds from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Requirement {
    /// Every product in the set must carry a non-null ranking.
    StaticCollection { product_ids: BTreeSet<ProductId> },

    /// At least `min_count` distinct products from the list are ranked.
    CustomProductList {
        product_ids: Vec<ProductId>,
        min_count: u32,
    },

    /// Fraction of catalog products matching (animal, flavor) that the
    /// user has ranked crosses each tier's percentage threshold.
    DynamicCollection {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        animal_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flavor: Option<String>,
        tiers: Vec<TierSpec>,
    },

    /// Single-product flavor coin: earned on any ranking of the target.
    FlavorCoin { product_id: ProductId },

    /// Same as static_collection; concealed until first earn.
    HiddenCollection { product_ids: BTreeSet<ProductId> },

    /// Counter crosses each tier's absolute threshold.
    EngagementCollection {
        counter: CounterName,
        tiers: Vec<TierSpec>,
    },

    /// Catalog-frozen predicate: every listed counter meets its minimum.
    Legacy {
        counters: BTreeMap<CounterName, u64>,
    },
}

impl Requirement {
    /// Discriminant used for the highest-tier notification reduction:
    /// tiered achievements sharing the same requirement type surface only
    /// the highest tier reached in one evaluation.
    pub fn requirement_type(&self) -> &'static str {
        match self {
            Requirement::StaticCollection { .. } => "static_collection",
            Requirement::CustomProductList { .. } => "custom_product_list",
            Requirement::DynamicCollection { .. } => "dynamic_collection",
            Requirement::FlavorCoin { .. } => "flavor_coin",
            Requirement::HiddenCollection { .. } => "hidden_collection",
            Requirement::EngagementCollection { .. } => "engagement_collection",
            Requirement::Legacy { .. } => "legacy",
        }
    }

    pub fn tiers(&self) -> Option<&[TierSpec]> {
        match self {
            Requirement::DynamicCollection { tiers, .. }
            | Requirement::EngagementCollection { tiers, .. } => Some(tiers),
            _ => None,
        }
    }

    /// Product ids this requirement references directly, for the selector.
    pub fn product_ids(&self) -> Vec<&ProductId> {
        match self {
            Requirement::StaticCollection { product_ids }
            | Requirement::HiddenCollection { product_ids } => product_ids.iter().collect(),
            Requirement::CustomProductList { product_ids, .. } => product_ids.iter().collect(),
            Requirement::FlavorCoin { product_id } => vec![product_id],
            _ => Vec::new(),
        }
    }

    /// Counters this requirement references, for the selector.
    pub fn counters(&self) -> Vec<CounterName> {
        match self {
            Requirement::EngagementCollection { counter, .. } => vec![*counter],
            Requirement::Legacy { counters } => counters.keys().copied().collect(),
            _ => Vec::new(),
        }
    }

    /// Tier thresholds must be strictly increasing, points non-decreasing.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(tiers) = self.tiers() {
            if tiers.is_empty() {
                return Err("tiered requirement has no tiers".to_string());
            }
            for pair in tiers.windows(2) {
                if pair[1].threshold <= pair[0].threshold {
                    return Err(format!(
                        "tier thresholds not strictly increasing: {} then {}",
                        pair[0].threshold, pair[1].threshold
                    ));
                }
                if pair[1].tier <= pair[0].tier {
                    return Err("tier order does not follow the ladder".to_string());
                }
                if pair[1].points < pair[0].points {
                    return Err("tier points must not decrease".to_string());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiers(specs: &[(Tier, f64, u32)]) -> Vec<TierSpec> {
        specs
            .iter()
            .map(|&(tier, threshold, points)| TierSpec {
                tier,
                threshold,
                points,
            })
            .collect()
    }

    #[test]
    fn requirement_serde_tag() {
        let req = Requirement::FlavorCoin {
            product_id: "p-7".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["kind"], "flavor_coin");
        let back: Requirement = serde_json::from_value(json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn strictly_increasing_thresholds_pass() {
        let req = Requirement::DynamicCollection {
            animal_type: Some("beef".into()),
            flavor: None,
            tiers: tiers(&[
                (Tier::Bronze, 40.0, 50),
                (Tier::Silver, 60.0, 100),
                (Tier::Gold, 75.0, 200),
            ]),
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn non_increasing_thresholds_fail() {
        let req = Requirement::EngagementCollection {
            counter: CounterName::Rankings,
            tiers: tiers(&[(Tier::Bronze, 10.0, 50), (Tier::Silver, 10.0, 100)]),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn legacy_counters_round_trip_in_declaration_order() {
        let req = Requirement::Legacy {
            counters: BTreeMap::from([
                (CounterName::LongestStreak, 7),
                (CounterName::Rankings, 10),
            ]),
        };
        let keys: Vec<CounterName> = req.counters();
        assert_eq!(keys, vec![CounterName::Rankings, CounterName::LongestStreak]);

        let json = serde_json::to_value(&req).unwrap();
        let back: Requirement = serde_json::from_value(json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn tier_ladder_is_ordered() {
        assert!(Tier::Bronze < Tier::Silver);
        assert!(Tier::Gold < Tier::Platinum);
        assert!(Tier::Platinum < Tier::Diamond);
    }
}
