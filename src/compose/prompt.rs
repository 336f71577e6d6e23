//! Generative prompt construction and output-contract parsing.
//!
//! The model's response is treated as an untrusted tagged union: parsing
//! yields either a validated [`GenerativeReply`] or an explicit
//! `Unparseable` arm, and callers must handle both.

use crate::pipeline::types::{ConversationMessage, Direction, Order, ProposedAction};
use crate::policy::{FEASIBILITY_CHECK_HOURS, ReplyDirectives};
use crate::signals::SignalSet;

/// How many trailing thread messages go into the prompt.
const PROMPT_THREAD_MESSAGES: usize = 6;

/// Per-message body truncation in the prompt.
const PROMPT_BODY_TRUNCATE: usize = 250;

/// Actions the generative path may propose — deliberately narrower than the
/// full action enum. REPLACE_ITEM and ADDRESS_CHANGE stay reserved for the
/// deterministic keyword path.
const ACCEPTED_GENERATIVE_ACTIONS: &[ProposedAction] = &[
    ProposedAction::Refund,
    ProposedAction::Cancel,
    ProposedAction::InfoRequest,
    ProposedAction::None,
];

/// Validated generative output.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerativeReply {
    pub reply: String,
    pub proposed_action: ProposedAction,
    pub follow_up_required: bool,
    pub follow_up_hours: Option<f64>,
}

/// Result of parsing the model's raw completion.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerativeOutcome {
    /// Output satisfied the contract.
    Parsed(GenerativeReply),
    /// Malformed JSON, missing fields, or an action outside the accepted
    /// set. The caller downgrades to the deterministic fallback.
    Unparseable,
}

// ── Prompt construction ─────────────────────────────────────────────

/// Build the system prompt with the output contract.
pub fn build_system_prompt(store_name: &str) -> String {
    format!(
        "You are a customer support agent for {store_name}, an e-commerce store.\n\
         Draft a reply to the customer's latest message.\n\n\
         Respond with ONLY a single JSON object with exactly these fields:\n\
         {{\"reply\": \"...\", \"proposed_action\": \"REFUND|CANCEL|INFO_REQUEST|NONE\", \
         \"follow_up_required\": true/false, \"follow_up_hours\": number or null}}\n\n\
         - \"reply\" is the full email body, no subject line.\n\
         - \"proposed_action\" is the remedial action a human operator should take.\n\
         - Set \"follow_up_required\" and \"follow_up_hours\" only when the reply \
         commits to checking something within a stated time."
    )
}

/// Build the structured user prompt for one invocation.
pub fn build_user_prompt(
    store_name: &str,
    customer_name: &str,
    customer_email: &str,
    signals: &SignalSet,
    directives: &ReplyDirectives,
    thread: &[ConversationMessage],
    order: Option<&Order>,
) -> String {
    let mut prompt = String::with_capacity(2048);

    prompt.push_str(&format!("Store: {store_name}\n"));
    prompt.push_str(&format!("Customer: {customer_name} <{customer_email}>\n"));
    prompt.push_str(&format!(
        "Messages from customer: {}, from support: {}\n",
        signals.inbound_count, signals.outbound_count
    ));

    prompt.push_str("\nConversation signals:\n");
    let yes_no = |v: bool| if v { "YES" } else { "NO" };
    prompt.push_str(&format!(
        "- Explicit refund request: {}\n",
        yes_no(signals.explicit_refund_request)
    ));
    prompt.push_str(&format!(
        "- Conditional refund request: {}\n",
        yes_no(signals.conditional_refund_request)
    ));
    prompt.push_str(&format!(
        "- Delay or no progress reported: {}\n",
        yes_no(signals.delay_or_no_progress)
    ));
    prompt.push_str(&format!(
        "- Order unfulfilled: {}\n",
        yes_no(signals.is_unfulfilled)
    ));
    prompt.push_str(&format!(
        "- Delivery promise likely breached: {}\n",
        yes_no(signals.delivery_promise_likely_breached)
    ));
    prompt.push_str(&format!(
        "- Refund should be immediate: {}\n",
        yes_no(signals.refund_should_be_immediate)
    ));
    prompt.push_str(&format!(
        "- Feasibility check worthwhile: {}\n",
        yes_no(signals.feasibility_check_is_meaningful)
    ));
    if let Some(age) = signals.order_age_days {
        prompt.push_str(&format!("- Order age: {age:.1} days\n"));
    }

    // Chronological trimmed conversation
    if !thread.is_empty() {
        prompt.push_str("\nConversation (oldest first):\n");
        let start = thread.len().saturating_sub(PROMPT_THREAD_MESSAGES);
        for message in &thread[start..] {
            let label = match message.direction {
                Direction::Inbound => "CUSTOMER",
                Direction::Outbound => "SUPPORT",
            };
            let body: String = message.body.chars().take(PROMPT_BODY_TRUNCATE).collect();
            prompt.push_str(&format!("[{label}] {body}\n"));
        }
    }

    // Order context
    match order {
        Some(order) => {
            prompt.push_str(&format!(
                "\nOrder context:\n- Order: {}\n- Total: {}\n- Status: {}\n- Fulfillment: {}\n",
                order.name,
                order.formatted_total(),
                order.status,
                order.fulfillment_status
            ));
            prompt.push_str(&format!("- Customer email: {customer_email}\n"));
        }
        None => {
            prompt.push_str("\nNo order found for this customer.\n");
        }
    }

    // Policy rules
    prompt.push_str("\nPolicy rules:\n");
    prompt.push_str(
        "1. Read the whole conversation before replying; acknowledge what the \
         customer already told you.\n",
    );
    if directives.decisive_refund {
        prompt.push_str(
            "2. A refund is warranted. Confirm it plainly and close the matter — \
             do not promise additional checks or reviews on top of it.\n",
        );
    } else if directives.time_bound_check {
        prompt.push_str(&format!(
            "2. Commit to checking whether the order can still ship within the \
             next {FEASIBILITY_CHECK_HOURS:.0} hours, and to refunding if it \
             cannot. State the time bound explicitly and set follow_up_required \
             accordingly.\n",
        ));
    } else {
        prompt.push_str("2. Do not offer a refund the customer has not asked for.\n");
    }
    prompt.push_str(
        "3. Any promised check or update must carry a concrete time commitment, \
         never \"soon\" or \"as quickly as possible\".\n",
    );
    prompt.push_str(
        "4. Never end with an open-ended closing like \"let us know if you have \
         any questions\".\n",
    );
    prompt.push_str("5. Never re-ask for information already present in the conversation.\n");
    prompt.push_str(
        "6. Warm, concise, professional tone. No template placeholders of any kind.\n",
    );
    if directives.generic_acknowledgment {
        prompt.push_str(
            "Note: there is no order on file — acknowledge the message and ask \
             for the order number instead of making claims about fulfillment.\n",
        );
    }

    prompt
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct RawGenerativeReply {
    reply: String,
    proposed_action: String,
    #[serde(default)]
    follow_up_required: bool,
    #[serde(default)]
    follow_up_hours: Option<f64>,
}

/// Extract the substring between the first `{` and the last `}`.
///
/// Handles markdown fences and prose around the object without caring about
/// either.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start { Some(&text[start..=end]) } else { None }
}

/// Parse a raw completion against the output contract.
pub fn parse_generative_reply(raw: &str) -> GenerativeOutcome {
    let Some(json_str) = extract_json_object(raw) else {
        return GenerativeOutcome::Unparseable;
    };

    let parsed: RawGenerativeReply = match serde_json::from_str(json_str) {
        Ok(parsed) => parsed,
        Err(_) => return GenerativeOutcome::Unparseable,
    };

    if parsed.reply.trim().is_empty() {
        return GenerativeOutcome::Unparseable;
    }

    let action = match parsed.proposed_action.parse::<ProposedAction>() {
        Ok(action) if ACCEPTED_GENERATIVE_ACTIONS.contains(&action) => action,
        _ => return GenerativeOutcome::Unparseable,
    };

    GenerativeOutcome::Parsed(GenerativeReply {
        reply: parsed.reply,
        proposed_action: action,
        follow_up_required: parsed.follow_up_required,
        follow_up_hours: parsed.follow_up_hours,
    })
}
