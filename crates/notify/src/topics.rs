use std::fmt;

use chomp_core::UserId;

/// Fan-out topics. Personal topics are per user; the other two are global.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    User(UserId),
    Leaderboard,
    ActivityFeed,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::User(id) => write!(f, "user:{}", id),
            Topic::Leaderboard => write!(f, "leaderboard"),
            Topic::ActivityFeed => write!(f, "activity-feed"),
        }
    }
}

impl Topic {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "leaderboard" => Some(Topic::Leaderboard),
            "activity-feed" => Some(Topic::ActivityFeed),
            _ => s.strip_prefix("user:").map(|id| Topic::User(id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_round_trip() {
        for topic in [
            Topic::User("42".to_string()),
            Topic::Leaderboard,
            Topic::ActivityFeed,
        ] {
            assert_eq!(Topic::parse(&topic.to_string()), Some(topic));
        }
        assert_eq!(Topic::parse("nope"), None);
    }
}
