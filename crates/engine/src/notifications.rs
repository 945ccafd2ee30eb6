//! Engine outputs bound for the topic router.

use chrono::{DateTime, Utc};
use serde::Serialize;

use chomp_catalog::Tier;
use chomp_core::{StreakType, UserId};
use chomp_notify::{OutboundFrame, Topic};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    AchievementEarned {
        user_id: UserId,
        code: String,
        name: String,
        icon: String,
        tier: Option<Tier>,
        points_delta: i64,
        requirement_type: String,
        is_flavor_coin: bool,
    },
    TierUpgraded {
        user_id: UserId,
        code: String,
        name: String,
        icon: String,
        tier: Tier,
        points_delta: i64,
        requirement_type: String,
    },
    StreakUpdated {
        user_id: UserId,
        streak_type: StreakType,
        current_length: i64,
        longest_length: i64,
    },
    StreakMilestone {
        user_id: UserId,
        streak_type: StreakType,
        length: i64,
    },
    LeaderboardUpdated {
        refreshed_at: DateTime<Utc>,
    },
    ActivityNew {
        activity_type: String,
        activity_data: serde_json::Value,
        ts: DateTime<Utc>,
    },
}

impl Notification {
    /// Topic this notification fans out on.
    pub fn topic(&self) -> Topic {
        match self {
            Notification::AchievementEarned { user_id, .. }
            | Notification::TierUpgraded { user_id, .. }
            | Notification::StreakUpdated { user_id, .. }
            | Notification::StreakMilestone { user_id, .. } => Topic::User(user_id.clone()),
            Notification::LeaderboardUpdated { .. } => Topic::Leaderboard,
            Notification::ActivityNew { .. } => Topic::ActivityFeed,
        }
    }

    /// Wire event name and payload, per the socket contract.
    pub fn to_frame(&self) -> OutboundFrame {
        let event = match self {
            Notification::AchievementEarned { is_flavor_coin, .. } => {
                if *is_flavor_coin {
                    "flavor_coins:earned"
                } else {
                    "achievement:earned"
                }
            }
            Notification::TierUpgraded { .. } => "achievement:earned",
            Notification::StreakUpdated { .. } => "streak:updated",
            // Milestones ride the generic toast channel; the payload's
            // `kind` tag tells the client what to render.
            Notification::StreakMilestone { .. } => "notification:show",
            Notification::LeaderboardUpdated { .. } => "leaderboard:updated",
            Notification::ActivityNew { .. } => "activity:new",
        };
        OutboundFrame::new(event, serde_json::to_value(self).unwrap_or_default())
    }

    /// Requirement-type discriminant, for the highest-tier reduction.
    pub fn requirement_type(&self) -> Option<&str> {
        match self {
            Notification::AchievementEarned {
                requirement_type, ..
            }
            | Notification::TierUpgraded {
                requirement_type, ..
            } => Some(requirement_type),
            _ => None,
        }
    }

    pub fn tier(&self) -> Option<Tier> {
        match self {
            Notification::AchievementEarned { tier, .. } => *tier,
            Notification::TierUpgraded { tier, .. } => Some(*tier),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streak_milestone_rides_the_toast_channel() {
        let milestone = Notification::StreakMilestone {
            user_id: "u1".to_string(),
            streak_type: StreakType::Ranking,
            length: 7,
        };

        assert_eq!(milestone.topic(), Topic::User("u1".to_string()));
        let frame = milestone.to_frame();
        assert_eq!(frame.event, "notification:show");
        assert_eq!(frame.data["kind"], "streak_milestone");
        assert_eq!(frame.data["length"], 7);
    }

    #[test]
    fn flavor_coins_get_their_own_event_name() {
        let earned = Notification::AchievementEarned {
            user_id: "u1".to_string(),
            code: "fc1".to_string(),
            name: "First Bite".to_string(),
            icon: "🥩".to_string(),
            tier: None,
            points_delta: 50,
            requirement_type: "flavor_coin".to_string(),
            is_flavor_coin: true,
        };
        assert_eq!(earned.to_frame().event, "flavor_coins:earned");
    }
}
