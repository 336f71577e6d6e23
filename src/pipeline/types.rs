//! Shared types for the suggestion pipeline.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ── Messages ────────────────────────────────────────────────────────

/// Direction of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Customer → merchant.
    Inbound,
    /// Merchant → customer.
    Outbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inbound => write!(f, "inbound"),
            Self::Outbound => write!(f, "outbound"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(Self::Inbound),
            "outbound" => Ok(Self::Outbound),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

/// One inbound or outbound email in a thread.
///
/// Immutable once created; a generated suggestion attaches to it later via
/// the suggestion's `message_id` key rather than by mutating the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Unique message ID.
    pub id: String,
    /// Thread this message belongs to.
    pub thread_id: String,
    /// Inbound (customer) or outbound (merchant).
    pub direction: Direction,
    /// Sender address.
    pub sender: String,
    /// Recipient address.
    pub recipient: String,
    /// Subject line, if any.
    pub subject: Option<String>,
    /// Message body text.
    pub body: String,
    /// Linked order, if one was correlated at ingestion time.
    pub order_id: Option<String>,
    /// When the message was created.
    pub created_at: DateTime<Utc>,
}

// ── Order context ───────────────────────────────────────────────────

/// Minimal order context consumed by the pipeline. Read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Internal order ID.
    pub id: String,
    /// External (storefront) order ID.
    pub external_id: String,
    /// Display name, e.g. "#1042".
    pub name: String,
    /// Total amount in integer minor-currency units.
    pub total_amount: i64,
    /// ISO currency code, e.g. "USD".
    pub currency: String,
    /// Order status, e.g. "open", "cancelled".
    pub status: String,
    /// Fulfillment status, e.g. "unfulfilled", "fulfilled".
    pub fulfillment_status: String,
    /// When the order was placed.
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Render the total as "{currency} {amount}", e.g. "USD 49.99".
    ///
    /// Minor units are assumed to be two decimal places.
    pub fn formatted_total(&self) -> String {
        let amount = Decimal::new(self.total_amount, 2);
        format!("{} {}", self.currency, amount)
    }
}

/// A merchant's linked mailbox/store integration. Read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    /// Connection ID.
    pub id: String,
    /// User who owns this connection.
    pub user_id: String,
    /// Store display name, used in replies and signatures.
    pub store_name: String,
    /// Merchant mailbox address.
    pub email: String,
}

/// Everything the pipeline needs about one triggering message, loaded in
/// a single store round-trip.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub message: ConversationMessage,
    pub connection: Connection,
    pub order: Option<Order>,
}

// ── Proposed action ─────────────────────────────────────────────────

/// The remedial operation the system recommends a human execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposedAction {
    Refund,
    Cancel,
    ReplaceItem,
    AddressChange,
    InfoRequest,
    None,
}

impl ProposedAction {
    /// Wire string used in prompts, persisted rows, and the output contract.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refund => "REFUND",
            Self::Cancel => "CANCEL",
            Self::ReplaceItem => "REPLACE_ITEM",
            Self::AddressChange => "ADDRESS_CHANGE",
            Self::InfoRequest => "INFO_REQUEST",
            Self::None => "NONE",
        }
    }
}

impl std::fmt::Display for ProposedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProposedAction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REFUND" => Ok(Self::Refund),
            "CANCEL" => Ok(Self::Cancel),
            "REPLACE_ITEM" => Ok(Self::ReplaceItem),
            "ADDRESS_CHANGE" => Ok(Self::AddressChange),
            "INFO_REQUEST" => Ok(Self::InfoRequest),
            "NONE" => Ok(Self::None),
            _ => Err(format!("Unknown proposed action: {}", s)),
        }
    }
}

// ── Suggestion ──────────────────────────────────────────────────────

/// The persisted pipeline output — one suggestion per triggering message.
///
/// Upsert is keyed on `message_id`, so recomputation replaces rather than
/// duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSuggestion {
    /// The triggering inbound message.
    pub message_id: String,
    /// Drafted reply text, ready for operator review.
    pub reply_text: String,
    /// Recommended remedial action.
    pub proposed_action: ProposedAction,
    /// Confidence score (0.0–1.0).
    pub confidence: f32,
    /// Linked order, if any.
    pub order_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AiSuggestion {
    /// Create a new suggestion for a message.
    pub fn new(
        message_id: impl Into<String>,
        reply_text: impl Into<String>,
        proposed_action: ProposedAction,
        confidence: f32,
        order_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            message_id: message_id.into(),
            reply_text: reply_text.into(),
            proposed_action,
            confidence: confidence.clamp(0.0, 1.0),
            order_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Terminal suggestion persisted when the user's AI quota is exhausted.
    ///
    /// A deliberate user-visible state, not a silent failure.
    pub fn limit_reached(message_id: impl Into<String>) -> Self {
        Self::new(
            message_id,
            "AI reply limit reached for this billing period. Upgrade your \
             plan to continue generating suggested replies.",
            ProposedAction::None,
            0.0,
            None,
        )
    }
}

// ── Follow-up ───────────────────────────────────────────────────────

/// Advisory bookkeeping for a committed follow-up — not a scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpEvent {
    pub id: String,
    /// Thread the commitment was made in.
    pub thread_id: String,
    /// When the committed check is due.
    pub due_at: DateTime<Utc>,
    /// Short human-readable note.
    pub note: String,
    pub created_at: DateTime<Utc>,
}

impl FollowUpEvent {
    /// Create a follow-up due `hours` from now.
    pub fn due_in_hours(thread_id: impl Into<String>, hours: f64, note: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            due_at: now + chrono::Duration::seconds((hours * 3600.0) as i64),
            note: note.into(),
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn direction_roundtrip() {
        assert_eq!(Direction::from_str("inbound").unwrap(), Direction::Inbound);
        assert_eq!(Direction::Outbound.to_string(), "outbound");
        assert!(Direction::from_str("sideways").is_err());
    }

    #[test]
    fn proposed_action_roundtrip() {
        for action in [
            ProposedAction::Refund,
            ProposedAction::Cancel,
            ProposedAction::ReplaceItem,
            ProposedAction::AddressChange,
            ProposedAction::InfoRequest,
            ProposedAction::None,
        ] {
            let parsed = ProposedAction::from_str(action.as_str()).unwrap();
            assert_eq!(parsed, action);
        }
        assert!(ProposedAction::from_str("ESCALATE").is_err());
        assert!(ProposedAction::from_str("refund").is_err());
    }

    #[test]
    fn order_formatted_total() {
        let order = Order {
            id: "o1".into(),
            external_id: "1042".into(),
            name: "#1042".into(),
            total_amount: 4999,
            currency: "USD".into(),
            status: "open".into(),
            fulfillment_status: "unfulfilled".into(),
            created_at: Utc::now(),
        };
        assert_eq!(order.formatted_total(), "USD 49.99");
    }

    #[test]
    fn suggestion_confidence_is_clamped() {
        let s = AiSuggestion::new("m1", "hi", ProposedAction::Refund, 1.4, None);
        assert_eq!(s.confidence, 1.0);
        let s = AiSuggestion::new("m1", "hi", ProposedAction::Refund, -0.2, None);
        assert_eq!(s.confidence, 0.0);
    }

    #[test]
    fn limit_reached_suggestion_is_terminal() {
        let s = AiSuggestion::limit_reached("m1");
        assert_eq!(s.proposed_action, ProposedAction::None);
        assert_eq!(s.confidence, 0.0);
        assert!(s.reply_text.contains("limit reached"));
    }

    #[test]
    fn follow_up_due_in_hours() {
        let event = FollowUpEvent::due_in_hours("t1", 24.0, "check fulfillment");
        let delta = event.due_at - event.created_at;
        assert_eq!(delta.num_hours(), 24);
        assert_eq!(event.thread_id, "t1");
    }
}
