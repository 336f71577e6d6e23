//! Policy engine — maps extracted signals to reply directives.
//!
//! Directives are booleans consumed by the composer's prompt construction
//! and template selection, not free text. Deterministic function of the
//! signal set; no randomness, no external calls.

use crate::signals::SignalSet;

/// Directives shaping the drafted reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyDirectives {
    /// Offer the refund decisively and close — no "we'll look into it"
    /// promises on top of an already-warranted refund.
    pub decisive_refund: bool,
    /// Commit to a time-bound fulfillment check (within 24h) and refund
    /// conditionally on its outcome.
    pub time_bound_check: bool,
    /// Never end with an open-ended closing phrase.
    pub forbid_open_ended_closing: bool,
    /// Never re-ask for information already supplied in the thread.
    pub forbid_repeat_questions: bool,
    /// No order context: acknowledge and ask for order details instead of
    /// making fulfillment claims.
    pub generic_acknowledgment: bool,
}

/// Hours within which a committed fulfillment check must happen.
pub const FEASIBILITY_CHECK_HOURS: f64 = 24.0;

/// Deterministic signal → directive mapping.
pub struct PolicyEngine;

impl PolicyEngine {
    /// Derive reply directives from the signal set.
    ///
    /// With no order present, fulfillment-based directives are suppressed
    /// and the composer falls back to a generic acknowledgment.
    pub fn directives(signals: &SignalSet, has_order: bool) -> ReplyDirectives {
        if !has_order {
            return ReplyDirectives {
                decisive_refund: signals.explicit_refund_request,
                time_bound_check: false,
                forbid_open_ended_closing: true,
                forbid_repeat_questions: true,
                generic_acknowledgment: true,
            };
        }

        ReplyDirectives {
            decisive_refund: signals.refund_should_be_immediate,
            time_bound_check: signals.feasibility_check_is_meaningful,
            forbid_open_ended_closing: true,
            forbid_repeat_questions: true,
            generic_acknowledgment: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals() -> SignalSet {
        SignalSet::default()
    }

    #[test]
    fn immediate_refund_is_decisive() {
        let mut s = signals();
        s.refund_should_be_immediate = true;
        let d = PolicyEngine::directives(&s, true);
        assert!(d.decisive_refund);
        assert!(!d.time_bound_check);
    }

    #[test]
    fn feasibility_check_commits_to_time_bound_follow_up() {
        let mut s = signals();
        s.conditional_refund_request = true;
        s.feasibility_check_is_meaningful = true;
        let d = PolicyEngine::directives(&s, true);
        assert!(d.time_bound_check);
        assert!(!d.decisive_refund);
    }

    #[test]
    fn hygiene_directives_always_on() {
        let d = PolicyEngine::directives(&signals(), true);
        assert!(d.forbid_open_ended_closing);
        assert!(d.forbid_repeat_questions);
        let d = PolicyEngine::directives(&signals(), false);
        assert!(d.forbid_open_ended_closing);
        assert!(d.forbid_repeat_questions);
    }

    #[test]
    fn missing_order_suppresses_fulfillment_directives() {
        let mut s = signals();
        s.refund_should_be_immediate = true;
        s.feasibility_check_is_meaningful = true;
        s.explicit_refund_request = false;
        let d = PolicyEngine::directives(&s, false);
        assert!(d.generic_acknowledgment);
        assert!(!d.time_bound_check);
        // Immediate-refund urgency derived from fulfillment state is
        // suppressed too; only explicit customer intent survives.
        assert!(!d.decisive_refund);
    }

    #[test]
    fn explicit_intent_survives_missing_order() {
        let mut s = signals();
        s.explicit_refund_request = true;
        s.refund_should_be_immediate = true;
        let d = PolicyEngine::directives(&s, false);
        assert!(d.decisive_refund);
        assert!(d.generic_acknowledgment);
    }
}
