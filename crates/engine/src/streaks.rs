//! Daily streak machine.
//!
//! States per (user, streak_type): inactive, active, grace. A qualifying
//! event today extends or restarts the chain; a missed day beyond the
//! grace window resets current_length to zero on the next evaluation.

use chrono::NaiveDate;

use chomp_store::StreakRow;

#[derive(Debug, Clone, PartialEq)]
pub struct StreakAdvance {
    pub row: StreakRow,
    pub changed: bool,
    /// Milestone day count crossed by this advance, if any.
    pub milestone: Option<i64>,
}

/// Advance a streak for a qualifying event on `today`.
///
/// `grace_days` is the number of missed days a streak survives;
/// `milestones` are the day counts that emit a notification.
pub fn advance_streak(
    prior: &StreakRow,
    today: NaiveDate,
    grace_days: u32,
    milestones: &[u32],
) -> StreakAdvance {
    let mut row = prior.clone();

    let new_length = match prior.last_tick_date {
        // Second qualifying event on the same day: no change.
        Some(last) if last == today => {
            return StreakAdvance {
                row,
                changed: false,
                milestone: None,
            }
        }
        Some(last) => {
            let gap = (today - last).num_days();
            if gap >= 1 && gap <= 1 + i64::from(grace_days) {
                prior.current_length + 1
            } else {
                // Grace window lapsed; this event starts a new chain.
                1
            }
        }
        None => 1,
    };

    row.current_length = new_length;
    row.longest_length = row.longest_length.max(new_length);
    row.last_tick_date = Some(today);

    let milestone = milestones
        .iter()
        .map(|&m| i64::from(m))
        .find(|&m| new_length == m);

    StreakAdvance {
        row,
        changed: true,
        milestone,
    }
}

/// Settle a streak without a qualifying event: zero out current_length if
/// the grace window has lapsed as of `today`.
pub fn settle_streak(prior: &StreakRow, today: NaiveDate, grace_days: u32) -> StreakRow {
    let mut row = prior.clone();
    if let Some(last) = prior.last_tick_date {
        let gap = (today - last).num_days();
        if gap > 1 + i64::from(grace_days) && row.current_length != 0 {
            row.current_length = 0;
        }
    }
    row
}
