//! Unified `Database` trait — single async interface for all persistence.
//!
//! The pipeline reads message/thread/order context, upserts suggestions,
//! records advisory follow-ups, and reads/increments usage counters through
//! this trait. The ingestion collaborator owns the seeding operations
//! (connections, threads, messages, orders) in production; they live here so
//! the crate is exercisable end-to-end.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::pipeline::types::{
    AiSuggestion, Connection, ConversationMessage, FollowUpEvent, MessageContext, Order,
};
use crate::usage::plan::{Plan, UsageRecord};

/// Backend-agnostic database trait covering conversation context,
/// suggestions, follow-ups, and usage counters.
#[async_trait]
pub trait Database: Send + Sync {
    // ── Context ─────────────────────────────────────────────────────

    /// Load one message with its connection and (optional) order joined.
    /// Returns `None` if the message does not exist.
    async fn load_message_context(
        &self,
        message_id: &str,
    ) -> Result<Option<MessageContext>, DatabaseError>;

    /// Last `limit` messages of a thread, oldest → newest.
    async fn recent_thread_messages(
        &self,
        thread_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, DatabaseError>;

    // ── Suggestions ─────────────────────────────────────────────────

    /// Upsert a suggestion keyed by `message_id` — recomputation replaces
    /// rather than duplicates. The original `created_at` is preserved on
    /// replace.
    async fn upsert_suggestion(&self, suggestion: &AiSuggestion) -> Result<(), DatabaseError>;

    /// Get the suggestion for a message, if one has been generated.
    async fn suggestion_for_message(
        &self,
        message_id: &str,
    ) -> Result<Option<AiSuggestion>, DatabaseError>;

    // ── Follow-ups ──────────────────────────────────────────────────

    /// Record an advisory follow-up event.
    async fn record_follow_up(&self, event: &FollowUpEvent) -> Result<(), DatabaseError>;

    /// All follow-up events for a thread, oldest first.
    async fn follow_ups_for_thread(
        &self,
        thread_id: &str,
    ) -> Result<Vec<FollowUpEvent>, DatabaseError>;

    // ── Usage ───────────────────────────────────────────────────────

    /// Read a user's usage record for the current period.
    async fn usage_record(&self, user_id: &str) -> Result<Option<UsageRecord>, DatabaseError>;

    /// Create a usage record for a user on the given plan if none exists.
    async fn ensure_usage(
        &self,
        user_id: &str,
        plan: &Plan,
        trial_ends_at: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError>;

    /// Atomically increment the AI-suggestion counter if it is below the
    /// plan limit (or the limit is unlimited). Returns whether the
    /// increment was applied.
    async fn increment_ai_suggestions(&self, user_id: &str) -> Result<bool, DatabaseError>;

    /// Atomically increment the emails-sent counter if it is below the
    /// plan limit. Returns whether the increment was applied.
    async fn increment_emails_sent(&self, user_id: &str) -> Result<bool, DatabaseError>;

    // ── Ingestion-side seeding ──────────────────────────────────────

    async fn insert_connection(&self, connection: &Connection) -> Result<(), DatabaseError>;

    async fn insert_thread(
        &self,
        thread_id: &str,
        connection_id: &str,
        subject: Option<&str>,
    ) -> Result<(), DatabaseError>;

    async fn insert_message(&self, message: &ConversationMessage) -> Result<(), DatabaseError>;

    async fn insert_order(&self, order: &Order) -> Result<(), DatabaseError>;
}
