//! Per-user serialization.
//!
//! Updates to one user's state are serialized by a lock held for the
//! whole evaluation. Locks are created on demand and shared by clones.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

use chomp_core::UserId;

#[derive(Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for one user. Hold the guard for the full evaluation.
    pub fn for_user(&self, user_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        // An entry only the map still holds belongs to no in-flight
        // evaluation; drop it so the map tracks active users, not
        // everyone ever seen.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_user_shares_a_lock() {
        let locks = UserLocks::new();
        let a = locks.for_user("u1");
        let b = locks.for_user("u1");
        let _guard = a.lock().await;
        assert!(b.try_lock().is_err());

        let other = locks.for_user("u2");
        assert!(other.try_lock().is_ok());
    }

    #[tokio::test]
    async fn idle_entries_are_evicted() {
        let locks = UserLocks::new();
        for i in 0..100 {
            let lock = locks.for_user(&format!("u{}", i));
            let _guard = lock.lock().await;
        }

        // Every earlier handle is dropped by now; only the entry being
        // fetched survives the sweep.
        let held = locks.for_user("held");
        let _guard = held.lock().await;
        assert_eq!(locks.len(), 1);

        let _other = locks.for_user("other");
        assert_eq!(locks.len(), 2);
    }
}
