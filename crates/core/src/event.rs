use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Shopify customer id, stringly typed end to end.
pub type UserId = String;

/// Shopify product id.
pub type ProductId = String;

/// Streak categories tracked per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakType {
    Ranking,
    Login,
}

impl StreakType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreakType::Ranking => "ranking",
            StreakType::Login => "login",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ranking" => Some(StreakType::Ranking),
            "login" => Some(StreakType::Login),
            _ => None,
        }
    }
}

/// Typed event body. The tag doubles as the `type` column in the event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    RankingSaved {
        product_id: ProductId,
        position: i32,
    },
    RankingCleared {
        product_id: ProductId,
    },
    ProductView {
        product_id: ProductId,
    },
    PageView {
        page: String,
    },
    Search {
        query: String,
    },
    Login,
    OrderDelivered {
        order_id: String,
        product_ids: Vec<ProductId>,
    },
    StreakTick {
        streak_type: StreakType,
    },
}

impl EventBody {
    /// Event type tag, matching the serde tag.
    pub fn kind(&self) -> &'static str {
        match self {
            EventBody::RankingSaved { .. } => "ranking_saved",
            EventBody::RankingCleared { .. } => "ranking_cleared",
            EventBody::ProductView { .. } => "product_view",
            EventBody::PageView { .. } => "page_view",
            EventBody::Search { .. } => "search",
            EventBody::Login => "login",
            EventBody::OrderDelivered { .. } => "order_delivered",
            EventBody::StreakTick { .. } => "streak_tick",
        }
    }

    /// Whether this event counts toward the 30-day activity window.
    pub fn is_activity(&self) -> bool {
        !matches!(self, EventBody::StreakTick { .. })
    }

    /// Whether this event sustains a daily streak.
    pub fn qualifies_for_streak(&self, streak_type: StreakType) -> bool {
        match streak_type {
            StreakType::Ranking => matches!(self, EventBody::RankingSaved { .. }),
            StreakType::Login => matches!(
                self,
                EventBody::Login | EventBody::RankingSaved { .. } | EventBody::PageView { .. }
            ),
        }
    }
}

/// An event as submitted by the Gateway, before the log assigns an id.
///
/// `source_id` is the idempotency key: the log rejects a second append with
/// the same (user_id, source_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub user_id: UserId,
    pub source_id: String,
    pub body: EventBody,
}

/// A committed event from the append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEvent {
    /// Monotonic per-stream id assigned by the log.
    pub event_id: i64,
    pub user_id: UserId,
    pub source_id: String,
    pub body: EventBody,
    pub created_at: DateTime<Utc>,
    /// When the event's state deltas committed. `None` means the append
    /// landed but evaluation did not, so a replay must re-evaluate.
    pub applied_at: Option<DateTime<Utc>>,
}
