//! XP ledger, level derivation, and achievement triggers.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::traits::{CheckinStore, DataStore, LedgerStore, ProfileStore};
use crate::types::GrantOutcome;

/// Cumulative XP needed to reach each level; index 0 is level 1. Monotonic
/// by construction.
pub const LEVEL_BREAKPOINTS: &[i64] = &[0, 100, 250, 450, 700, 1000, 1400, 1900, 2500, 3200];

/// Level for a cumulative XP total. Pure and monotonic.
pub fn level_for_xp(xp: i64) -> i64 {
    LEVEL_BREAKPOINTS
        .iter()
        .take_while(|&&threshold| xp >= threshold)
        .count()
        .max(1) as i64
}

/// Length of the consecutive-day run ending at the most recent of `dates`.
/// `dates` must be distinct and sorted newest first.
fn streak_days(dates: &[NaiveDate]) -> usize {
    let Some(&latest) = dates.first() else {
        return 0;
    };
    let mut streak = 1;
    let mut expected = latest;
    for &d in &dates[1..] {
        expected = expected.pred_opt().unwrap_or(expected);
        if d == expected {
            streak += 1;
        } else {
            break;
        }
    }
    streak
}

pub struct GamificationLedger {
    store: Arc<dyn DataStore>,
}

impl GamificationLedger {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    /// Append an XP grant and derive the new level.
    ///
    /// When `dedupe_key` is supplied and a grant with that key already
    /// exists for the user, the call is a no-op returning the current state.
    pub async fn grant(
        &self,
        user_id: &str,
        amount: i64,
        reason: &str,
        dedupe_key: Option<&str>,
    ) -> anyhow::Result<GrantOutcome> {
        let before_xp = self.store.total_xp(user_id).await?;
        let before_level = level_for_xp(before_xp);

        let inserted = self
            .store
            .insert_grant(user_id, amount, reason, dedupe_key)
            .await?;
        if !inserted {
            debug!(user_id, reason, "duplicate grant ignored");
            return Ok(GrantOutcome {
                new_xp: before_xp,
                new_level: before_level,
                leveled_up: false,
            });
        }

        // Re-read rather than add locally: concurrent grants would otherwise
        // race the mirror out of sync with the ledger.
        let new_xp = self.store.total_xp(user_id).await?;
        let new_level = level_for_xp(new_xp);
        self.store.set_xp_level(user_id, new_xp, new_level).await?;

        let leveled_up = new_level > before_level;
        if leveled_up {
            info!(user_id, new_level, "level up");
        }
        info!(user_id, amount, reason, new_xp, "xp granted");

        self.check_achievements(user_id, new_level, reason).await?;

        Ok(GrantOutcome {
            new_xp,
            new_level,
            leveled_up,
        })
    }

    /// Evaluate achievement predicates after a grant. Each achievement
    /// fires at most once per user (persisted id set).
    async fn check_achievements(
        &self,
        user_id: &str,
        level: i64,
        reason: &str,
    ) -> anyhow::Result<()> {
        if reason == "checkin_complete" {
            self.fire_once(user_id, "first_checkin").await?;

            let recent = self.store.recent_checkins_any(user_id, 100).await?;
            let mut dates: Vec<NaiveDate> =
                recent.iter().map(|e| e.created_at.date_naive()).collect();
            dates.sort_unstable();
            dates.dedup();
            dates.reverse();
            if streak_days(&dates) >= 7 {
                self.fire_once(user_id, "checkin_streak_7").await?;
            }
        }
        if reason == "onboarding_complete" {
            self.fire_once(user_id, "onboarded").await?;
        }
        if level >= 5 {
            self.fire_once(user_id, "level_5").await?;
        }
        Ok(())
    }

    async fn fire_once(&self, user_id: &str, achievement_id: &str) -> anyhow::Result<()> {
        if self
            .store
            .try_record_achievement(user_id, achievement_id)
            .await?
        {
            info!(user_id, achievement_id, "achievement unlocked");
        }
        Ok(())
    }
}
