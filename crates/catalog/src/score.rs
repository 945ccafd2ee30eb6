//! Engagement score — the single Catalog-defined function ordering the
//! leaderboard. Monotone in each input, zero when all inputs are zero.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreConfig {
    /// Points per day of longest streak.
    pub streak_bonus: u64,
    /// Points per distinct ranked product.
    pub unique_product_bonus: u64,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            streak_bonus: 5,
            unique_product_bonus: 2,
        }
    }
}

impl ScoreConfig {
    pub fn engagement_score(
        &self,
        total_points: u64,
        longest_streak: u64,
        unique_products: u64,
    ) -> u64 {
        total_points
            + self.streak_bonus * longest_streak
            + self.unique_product_bonus * unique_products
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_inputs_score_zero() {
        assert_eq!(ScoreConfig::default().engagement_score(0, 0, 0), 0);
    }

    #[test]
    fn monotone_in_each_input() {
        let cfg = ScoreConfig::default();
        let base = cfg.engagement_score(100, 7, 12);
        assert!(cfg.engagement_score(101, 7, 12) > base);
        assert!(cfg.engagement_score(100, 8, 12) > base);
        assert!(cfg.engagement_score(100, 7, 13) > base);
    }
}
