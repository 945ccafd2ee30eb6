//! Persistent state: event log, user state tables, leaderboard snapshot.
//!
//! The engine talks to `EventLog` and `StateStore` traits; production
//! wires the Postgres implementation, tests the in-memory one.

pub mod error;
pub mod memory;
pub mod migrate;
pub mod pg;
pub mod traits;
pub mod types;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use pg::{PgCatalogSource, PgStore};
pub use traits::{AppendOutcome, EventLog, StateStore};
pub use types::*;
