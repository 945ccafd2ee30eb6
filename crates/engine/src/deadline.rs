//! Command deadlines.
//!
//! Workers check the deadline at each suspension point and abort before a
//! write. A write already issued is never cancelled — the deadline is a
//! lower bound on when we may stop, not an upper bound on commit.

use std::time::{Duration, Instant};

use chomp_core::{ChompError, ChompResult};

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn none() -> Self {
        Self { at: None }
    }

    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Some(Instant::now() + timeout),
        }
    }

    /// Error if the deadline has passed. Called before each suspension
    /// point, never after a write has been issued.
    pub fn check(&self, operation: &str) -> ChompResult<()> {
        match self.at {
            Some(at) if Instant::now() >= at => Err(ChompError::DeadlineExceeded(format!(
                "deadline passed before {}",
                operation
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_deadline_never_trips() {
        assert!(Deadline::none().check("anything").is_ok());
    }

    #[test]
    fn elapsed_deadline_trips() {
        let d = Deadline::after(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(2));
        let err = d.check("state read").unwrap_err();
        assert_eq!(err.code(), "deadline_exceeded");
    }
}
