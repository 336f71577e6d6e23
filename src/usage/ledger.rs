//! Usage ledger — quota checks and metered increments.
//!
//! Wraps the usage table behind the two check functions and two increment
//! functions the pipeline (and the outbound send boundary) call. Checks fail
//! closed: a missing record or an unreachable store denies the action.
//! Increments are not idempotent — callers call them once per logical
//! action, after the action succeeded.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::DatabaseError;
use crate::store::Database;
use crate::usage::plan::{TrialStatus, UNLIMITED};

/// Result of an AI-suggestion quota check.
#[derive(Debug, Clone)]
pub struct UsageCheck {
    pub allowed: bool,
    pub limit: i64,
    pub current: i64,
    pub trial: TrialStatus,
}

/// Result of an email-send quota check.
#[derive(Debug, Clone)]
pub struct EmailUsageCheck {
    pub allowed: bool,
    pub current: i64,
    pub limit: i64,
    /// Sends left this period; `UNLIMITED` when the plan has no cap.
    pub remaining: i64,
    /// Percentage of the cap consumed (0.0 for unlimited plans).
    pub percentage: f32,
    pub trial: TrialStatus,
}

/// Per-user consumption tracking against plan quotas.
pub struct UsageLedger {
    db: Arc<dyn Database>,
}

impl UsageLedger {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Can this user generate another AI suggestion?
    ///
    /// An expired trial denies regardless of count.
    pub async fn can_use_ai(&self, user_id: &str) -> Result<UsageCheck, DatabaseError> {
        let record = self
            .db
            .usage_record(user_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "usage record".to_string(),
                id: user_id.to_string(),
            })?;

        let trial = record.trial_status(Utc::now());
        let under_limit = record.ai_replies_limit == UNLIMITED
            || record.ai_suggestions_generated < record.ai_replies_limit;
        let allowed = under_limit && !(trial.is_trial && trial.expired);

        debug!(
            user_id,
            allowed,
            current = record.ai_suggestions_generated,
            limit = record.ai_replies_limit,
            "AI usage check"
        );

        Ok(UsageCheck {
            allowed,
            limit: record.ai_replies_limit,
            current: record.ai_suggestions_generated,
            trial,
        })
    }

    /// Can this user send another email?
    pub async fn can_send_email(&self, user_id: &str) -> Result<EmailUsageCheck, DatabaseError> {
        let record = self
            .db
            .usage_record(user_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "usage record".to_string(),
                id: user_id.to_string(),
            })?;

        let trial = record.trial_status(Utc::now());
        let limit = record.emails_per_month;
        let current = record.emails_sent;

        let (allowed_by_count, remaining, percentage) = if limit == UNLIMITED {
            (true, UNLIMITED, 0.0)
        } else {
            let remaining = (limit - current).max(0);
            let percentage = if limit > 0 {
                ((current as f32 / limit as f32) * 100.0).min(100.0)
            } else {
                100.0
            };
            (current < limit, remaining, percentage)
        };
        let allowed = allowed_by_count && !(trial.is_trial && trial.expired);

        Ok(EmailUsageCheck {
            allowed,
            current,
            limit,
            remaining,
            percentage,
            trial,
        })
    }

    /// Count one generated AI suggestion.
    ///
    /// The store applies the increment only while below the limit; a
    /// declined increment is logged, not an error, since the suggestion
    /// it meters has already been persisted.
    pub async fn increment_ai_suggestion(&self, user_id: &str) -> Result<(), DatabaseError> {
        let applied = self.db.increment_ai_suggestions(user_id).await?;
        if !applied {
            warn!(user_id, "AI suggestion increment declined (at limit or unknown user)");
        }
        Ok(())
    }

    /// Count one sent email.
    pub async fn increment_email_sent(&self, user_id: &str) -> Result<(), DatabaseError> {
        let applied = self.db.increment_emails_sent(user_id).await?;
        if !applied {
            warn!(user_id, "email increment declined (at limit or unknown user)");
        }
        Ok(())
    }
}
