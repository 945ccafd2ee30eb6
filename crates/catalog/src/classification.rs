//! Classification thresholds, overridable from the `classification_config`
//! table. Defaults match the shipped rules.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Days without activity before a user is dormant.
    pub dormant_after_days: i64,
    /// New-user grace period measured from registration.
    pub new_user_max_days: i64,
    pub power_user_min_rankings: u64,
    pub power_user_min_activities_30d: u64,
    pub engaged_min_rankings: u64,
    pub engaged_max_rankings: u64,
    pub engaged_min_activities_30d: u64,
    pub exploring_min_rankings: u64,
    pub exploring_max_rankings: u64,
    pub exploring_min_activities_30d: u64,

    /// Engagement levels by activities_30d, highest first.
    pub very_high_activities: u64,
    pub high_activities: u64,
    pub medium_activities: u64,
    pub low_activities: u64,

    /// Exploration breadth.
    pub diverse_min_flavors: u64,
    pub diverse_min_animals: u64,
    pub moderate_min_flavors: u64,
    pub moderate_max_flavors: u64,
    pub moderate_min_animals: u64,

    /// Focus areas: per-token minimum count, max tokens kept.
    pub focus_min_count: u64,
    pub focus_max_areas: usize,

    /// Flavor community tier boundaries (inclusive lower bounds).
    pub community_seeker_min: u64,
    pub community_taster_min: u64,
    pub community_enthusiast_min: u64,
    pub community_explorer_min: u64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            dormant_after_days: 30,
            new_user_max_days: 7,
            power_user_min_rankings: 31,
            power_user_min_activities_30d: 20,
            engaged_min_rankings: 11,
            engaged_max_rankings: 30,
            engaged_min_activities_30d: 5,
            exploring_min_rankings: 1,
            exploring_max_rankings: 10,
            exploring_min_activities_30d: 1,
            very_high_activities: 50,
            high_activities: 20,
            medium_activities: 5,
            low_activities: 1,
            diverse_min_flavors: 9,
            diverse_min_animals: 3,
            moderate_min_flavors: 4,
            moderate_max_flavors: 8,
            moderate_min_animals: 2,
            focus_min_count: 3,
            focus_max_areas: 4,
            community_seeker_min: 3,
            community_taster_min: 6,
            community_enthusiast_min: 11,
            community_explorer_min: 21,
        }
    }
}

impl ClassificationConfig {
    /// Flavor community tier label for a ranking count (> 0).
    pub fn community_tier(&self, count: u64) -> &'static str {
        if count >= self.community_explorer_min {
            "explorer"
        } else if count >= self.community_enthusiast_min {
            "enthusiast"
        } else if count >= self.community_taster_min {
            "taster"
        } else if count >= self.community_seeker_min {
            "seeker"
        } else {
            "curious"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn community_tier_boundaries() {
        let cfg = ClassificationConfig::default();
        assert_eq!(cfg.community_tier(1), "curious");
        assert_eq!(cfg.community_tier(2), "curious");
        assert_eq!(cfg.community_tier(3), "seeker");
        assert_eq!(cfg.community_tier(5), "seeker");
        assert_eq!(cfg.community_tier(6), "taster");
        assert_eq!(cfg.community_tier(10), "taster");
        assert_eq!(cfg.community_tier(11), "enthusiast");
        assert_eq!(cfg.community_tier(20), "enthusiast");
        assert_eq!(cfg.community_tier(21), "explorer");
    }
}
