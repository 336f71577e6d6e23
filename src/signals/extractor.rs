//! Deterministic signal extraction from conversation transcripts.
//!
//! Regex/keyword based — no model call. Produces the `SignalSet` consumed by
//! the policy engine and the prompt builder, plus a best-guess fallback
//! action from subject+body keywords.
//!
//! The boolean chain is a strict priority order: explicit refund intent
//! overrides conditional intent, which overrides inferred delay signals.

use chrono::Utc;
use regex::Regex;

use crate::pipeline::types::{ConversationMessage, Direction, Order, ProposedAction};

/// Fulfillment statuses treated as "not yet shipped".
const UNFULFILLED_STATUSES: &[&str] = &["", "unfulfilled", "unshipped", "pending"];

/// Order age (days) after which an unfulfilled order counts as a likely
/// breached delivery promise when the customer reports delay.
const BREACH_AGE_DAYS: f64 = 7.0;

/// Derived, ephemeral facts about one conversation — recomputed on every
/// pipeline run, never cached.
#[derive(Debug, Clone, Default)]
pub struct SignalSet {
    /// Direct "refund my money" phrasing anywhere in the corpus.
    pub explicit_refund_request: bool,
    /// "Refund if you can't deliver by ..." phrasing.
    pub conditional_refund_request: bool,
    /// Delay/no-progress language ("where is my order", "been N days").
    pub delay_or_no_progress: bool,
    /// Order exists and has not shipped.
    pub is_unfulfilled: bool,
    /// Delay language plus repeated contact or an old unfulfilled order.
    pub delivery_promise_likely_breached: bool,
    /// Refund should be offered now, without a feasibility check.
    pub refund_should_be_immediate: bool,
    /// A time-bound fulfillment check is worth committing to.
    pub feasibility_check_is_meaningful: bool,
    pub inbound_count: usize,
    pub outbound_count: usize,
    /// Age of the linked order in days, if there is one.
    pub order_age_days: Option<f64>,
}

/// Compiled extraction patterns.
pub struct SignalExtractor {
    explicit_refund: Regex,
    conditional_refund: Regex,
    delay: Regex,
    elapsed_time: Regex,
    fraud: Regex,
}

impl SignalExtractor {
    pub fn new() -> Self {
        Self {
            explicit_refund: Regex::new(
                r"refund my money|i want a refund|want a refund|need a refund|money back|don'?t want (it|this) anymore|cancel and refund|give me (a|my) refund",
            )
            .unwrap(),
            conditional_refund: Regex::new(
                r"refund if|refund me if|only if you can deliver|proceed only if|deliver(ed)? by",
            )
            .unwrap(),
            delay: Regex::new(
                r"where is my order|not received|haven'?t received|hasn'?t arrived|delayed|stuck|unfulfilled|still waiting|no update",
            )
            .unwrap(),
            elapsed_time: Regex::new(r"been \d+ (day|week)s?").unwrap(),
            fraud: Regex::new(r"fraud|scam|stolen|lost|damaged").unwrap(),
        }
    }

    /// Extract the signal set for one invocation.
    ///
    /// `thread` is the last ≤10 thread messages, oldest → newest. The
    /// current message's subject and body are concatenated into the corpus
    /// as well, so signals hold even before the triggering message lands
    /// in the thread window.
    pub fn extract(
        &self,
        thread: &[ConversationMessage],
        current_subject: Option<&str>,
        current_body: &str,
        order: Option<&Order>,
    ) -> SignalSet {
        let mut corpus = String::with_capacity(1024);
        for message in thread {
            corpus.push_str(&message.body);
            corpus.push('\n');
        }
        if let Some(subject) = current_subject {
            corpus.push_str(subject);
            corpus.push('\n');
        }
        corpus.push_str(current_body);
        let corpus = corpus.to_lowercase();

        let inbound_count = thread
            .iter()
            .filter(|m| m.direction == Direction::Inbound)
            .count();
        let outbound_count = thread.len() - inbound_count;

        let explicit_refund_request = self.explicit_refund.is_match(&corpus);
        let conditional_refund_request = self.conditional_refund.is_match(&corpus);
        let delay_or_no_progress =
            self.delay.is_match(&corpus) || self.elapsed_time.is_match(&corpus);

        let is_unfulfilled = order
            .map(|o| {
                UNFULFILLED_STATUSES.contains(&o.fulfillment_status.to_lowercase().as_str())
            })
            .unwrap_or(false);

        let order_age_days = order.map(|o| {
            (Utc::now() - o.created_at).num_seconds() as f64 / 86_400.0
        });

        let delivery_promise_likely_breached = delay_or_no_progress
            && (inbound_count >= 2
                || (order_age_days.unwrap_or(0.0) >= BREACH_AGE_DAYS && is_unfulfilled));

        let fraud_language = self.fraud.is_match(&corpus);
        let refund_should_be_immediate = explicit_refund_request
            || (delivery_promise_likely_breached && is_unfulfilled)
            || (fraud_language && (explicit_refund_request || inbound_count >= 2));

        // Only meaningful when no immediate refund already decided.
        let feasibility_check_is_meaningful = !refund_should_be_immediate
            && conditional_refund_request
            && is_unfulfilled
            && inbound_count <= 2;

        SignalSet {
            explicit_refund_request,
            conditional_refund_request,
            delay_or_no_progress,
            is_unfulfilled,
            delivery_promise_likely_breached,
            refund_should_be_immediate,
            feasibility_check_is_meaningful,
            inbound_count,
            outbound_count,
            order_age_days,
        }
    }

    /// Best-guess action from subject+body keywords alone.
    ///
    /// Fixed priority: refund → cancel → replace → address change → info
    /// request. First match wins, default `None`. Used as the fallback when
    /// no generative step runs or its output is rejected.
    pub fn keyword_action(&self, subject: Option<&str>, body: &str) -> ProposedAction {
        let mut text = String::with_capacity(body.len() + 64);
        if let Some(subject) = subject {
            text.push_str(subject);
            text.push('\n');
        }
        text.push_str(body);
        let text = text.to_lowercase();

        let contains_any = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

        if contains_any(&["refund", "money back", "chargeback"]) {
            ProposedAction::Refund
        } else if contains_any(&["cancel"]) {
            ProposedAction::Cancel
        } else if contains_any(&["replace", "replacement", "damaged", "broken", "defective", "wrong item"]) {
            ProposedAction::ReplaceItem
        } else if contains_any(&["change my address", "wrong address", "shipping address", "new address", "address change"]) {
            ProposedAction::AddressChange
        } else if contains_any(&["where is", "track", "status", "when will", "has my order shipped", "arrive"]) {
            ProposedAction::InfoRequest
        } else {
            ProposedAction::None
        }
    }
}

impl Default for SignalExtractor {
    fn default() -> Self {
        Self::new()
    }
}
