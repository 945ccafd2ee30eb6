use serde::{Deserialize, Serialize};

use chomp_core::ProductId;

use crate::icon::IconType;
use crate::requirement::{Requirement, Tier};

/// Collection families as stored in the achievements table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionType {
    StaticCollection,
    CustomProductList,
    DynamicCollection,
    FlavorCoin,
    HiddenCollection,
    EngagementCollection,
    Legacy,
}

/// An achievement definition. Immutable at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementDef {
    pub code: String,
    pub name: String,
    pub description: String,
    /// Normalized on read; see `icon::normalize_icon`.
    pub icon: String,
    pub icon_type: IconType,
    /// Base points for untiered achievements. Tiered achievements carry
    /// points per tier in the requirement.
    pub points: u32,
    pub category: String,
    pub collection_type: CollectionType,
    pub requirement: Requirement,
}

impl AchievementDef {
    pub fn has_tiers(&self) -> bool {
        self.requirement.tiers().is_some()
    }

    /// Hidden collections are surfaced to a user only once unlocked.
    pub fn is_hidden(&self) -> bool {
        self.collection_type == CollectionType::HiddenCollection
    }

    /// Points granted for reaching `tier` (cumulative, not delta).
    pub fn points_for_tier(&self, tier: Option<Tier>) -> u32 {
        match (self.requirement.tiers(), tier) {
            (Some(tiers), Some(t)) => tiers
                .iter()
                .filter(|spec| spec.tier <= t)
                .map(|spec| spec.points)
                .sum(),
            _ => self.points,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.code.is_empty() {
            return Err("achievement code must not be empty".to_string());
        }
        self.requirement.validate()
    }
}

/// Product metadata consulted by dynamic collections and the classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductMeta {
    pub product_id: ProductId,
    pub animal_type: String,
    pub primary_flavor: String,
    pub vendor: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Derived from catalog plus order history; only rankable products
    /// count toward collections.
    pub rankable: bool,
}

impl ProductMeta {
    /// Whether this product matches a dynamic collection's filter.
    pub fn matches(&self, animal_type: Option<&str>, flavor: Option<&str>) -> bool {
        let animal_ok = animal_type.map_or(true, |a| self.animal_type == a);
        let flavor_ok = flavor.map_or(true, |f| self.primary_flavor == f);
        animal_ok && flavor_ok
    }
}

/// Streak tuning loaded alongside the classification config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreakConfig {
    /// Days a lapsed streak survives before resetting to zero.
    pub grace_days: u32,
    /// Day counts that emit a milestone toast over `notification:show`.
    pub milestones: Vec<u32>,
}

impl Default for StreakConfig {
    fn default() -> Self {
        Self {
            grace_days: 0,
            milestones: vec![3, 7, 14, 30, 60, 100],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirement::{CounterName, TierSpec};

    fn engagement_def() -> AchievementDef {
        AchievementDef {
            code: "rank-master".into(),
            name: "Rank Master".into(),
            description: "Rank lots of jerky".into(),
            icon: "🏆".into(),
            icon_type: IconType::Emoji,
            points: 0,
            category: "engagement".into(),
            collection_type: CollectionType::EngagementCollection,
            requirement: Requirement::EngagementCollection {
                counter: CounterName::Rankings,
                tiers: vec![
                    TierSpec { tier: Tier::Bronze, threshold: 5.0, points: 50 },
                    TierSpec { tier: Tier::Silver, threshold: 15.0, points: 100 },
                    TierSpec { tier: Tier::Gold, threshold: 30.0, points: 200 },
                ],
            },
        }
    }

    #[test]
    fn tier_points_are_cumulative() {
        let def = engagement_def();
        assert_eq!(def.points_for_tier(Some(Tier::Bronze)), 50);
        assert_eq!(def.points_for_tier(Some(Tier::Silver)), 150);
        assert_eq!(def.points_for_tier(Some(Tier::Gold)), 350);
    }

    #[test]
    fn untiered_points_fall_back_to_base() {
        let def = AchievementDef {
            points: 100,
            requirement: Requirement::FlavorCoin { product_id: "p-1".into() },
            collection_type: CollectionType::FlavorCoin,
            ..engagement_def()
        };
        assert_eq!(def.points_for_tier(None), 100);
    }

    #[test]
    fn product_filter_matching() {
        let meta = ProductMeta {
            product_id: "p-1".into(),
            animal_type: "beef".into(),
            primary_flavor: "teriyaki".into(),
            vendor: "Smoky Pete".into(),
            tags: vec![],
            rankable: true,
        };
        assert!(meta.matches(Some("beef"), None));
        assert!(meta.matches(None, Some("teriyaki")));
        assert!(meta.matches(Some("beef"), Some("teriyaki")));
        assert!(!meta.matches(Some("turkey"), None));
    }
}
