//! Plan definitions and per-user usage records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel limit value meaning "no limit".
pub const UNLIMITED: i64 = -1;

/// Quota limits attached to a billing plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan name, e.g. "trial", "starter".
    pub name: String,
    /// Outbound emails allowed per billing period.
    pub emails_per_month: i64,
    /// AI-drafted replies allowed per billing period.
    pub ai_replies_limit: i64,
    /// Connected stores allowed.
    pub stores: i64,
    /// Whether this plan is a time-limited trial.
    pub is_trial: bool,
}

impl Plan {
    pub fn trial() -> Self {
        Self {
            name: "trial".into(),
            emails_per_month: 50,
            ai_replies_limit: 20,
            stores: 1,
            is_trial: true,
        }
    }

    pub fn starter() -> Self {
        Self {
            name: "starter".into(),
            emails_per_month: 500,
            ai_replies_limit: 200,
            stores: 1,
            is_trial: false,
        }
    }

    pub fn growth() -> Self {
        Self {
            name: "growth".into(),
            emails_per_month: 2000,
            ai_replies_limit: 1000,
            stores: 3,
            is_trial: false,
        }
    }

    pub fn scale() -> Self {
        Self {
            name: "scale".into(),
            emails_per_month: 10_000,
            ai_replies_limit: UNLIMITED,
            stores: 10,
            is_trial: false,
        }
    }
}

/// Trial state reported alongside every quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialStatus {
    pub is_trial: bool,
    pub expired: bool,
    pub days_remaining: i64,
}

impl TrialStatus {
    /// A non-trial account.
    pub fn none() -> Self {
        Self {
            is_trial: false,
            expired: false,
            days_remaining: 0,
        }
    }
}

/// Per-user, per-billing-period counters and limits as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: String,
    pub emails_sent: i64,
    pub ai_suggestions_generated: i64,
    pub emails_per_month: i64,
    pub ai_replies_limit: i64,
    pub stores: i64,
    pub is_trial: bool,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub period_start: DateTime<Utc>,
}

impl UsageRecord {
    /// Compute the trial state as of `now`.
    pub fn trial_status(&self, now: DateTime<Utc>) -> TrialStatus {
        if !self.is_trial {
            return TrialStatus::none();
        }
        match self.trial_ends_at {
            Some(ends_at) => TrialStatus {
                is_trial: true,
                expired: now > ends_at,
                days_remaining: (ends_at - now).num_days().max(0),
            },
            // Trial with no end date recorded: treat as expired rather than
            // open-ended, so the gate fails closed.
            None => TrialStatus {
                is_trial: true,
                expired: true,
                days_remaining: 0,
            },
        }
    }
}
