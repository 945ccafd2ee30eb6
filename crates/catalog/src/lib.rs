//! Achievement and product catalog: definitions, requirement variants,
//! icon normalization, selector index, and the TTL cache the engine reads
//! through at runtime.

pub mod cache;
pub mod classification;
pub mod icon;
pub mod requirement;
pub mod score;
pub mod selector;
pub mod types;

pub use cache::{Catalog, CatalogCache, CatalogData, CatalogError, CatalogSource};
pub use classification::ClassificationConfig;
pub use icon::{normalize_icon, IconType, NormalizedIcon};
pub use requirement::{CounterName, Requirement, Tier, TierSpec};
pub use score::ScoreConfig;
pub use selector::SelectorIndex;
pub use types::{AchievementDef, CollectionType, ProductMeta, StreakConfig};
