//! Mandatory reply post-processing.
//!
//! Applies to both the generative and fallback paths: signature
//! enforcement, placeholder scrubbing, and quoting of the original message
//! for threading. Nothing here may fail — these are pure string passes.

use regex::Regex;
use std::sync::LazyLock;

use crate::pipeline::types::ConversationMessage;

/// The closing phrase every reply must carry exactly once.
pub const SIGNATURE_PHRASE: &str = "Warm Regards,";

/// Store names too generic to put in a signature.
const GENERIC_STORE_NAMES: &[&str] = &["store", "my store", "your store", "our store", "shop"];

/// Template placeholders that must never reach a customer.
static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[(?:your name|your company|your contact information|store name)\]").unwrap()
});

/// Derive the customer's display name from their email address.
///
/// Title-cases the local part, treating `.` and `_` as word separators:
/// `jane.doe@example.com` → `Jane Doe`.
pub fn customer_name_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    local
        .replace(['.', '_'], " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Signature block for a store.
///
/// Generic store names (and names already containing "support") collapse to
/// a plain "Support Team" so the signature never reads "Store Support Team".
pub fn signature_block(store_name: &str) -> String {
    let lowered = store_name.trim().to_lowercase();
    if lowered.is_empty()
        || lowered.contains("support")
        || GENERIC_STORE_NAMES.contains(&lowered.as_str())
    {
        "Support Team".to_string()
    } else {
        format!("{} Support Team", store_name.trim())
    }
}

/// Append the signature block unless the reply already carries one.
///
/// Idempotent: running twice never duplicates the closing.
pub fn enforce_signature(reply: &str, store_name: &str) -> String {
    if reply.to_lowercase().contains(&SIGNATURE_PHRASE.to_lowercase()) {
        return reply.to_string();
    }
    format!(
        "{}\n\n{}\n\n{}",
        reply.trim_end(),
        SIGNATURE_PHRASE,
        signature_block(store_name)
    )
}

/// Strip template placeholders left in generated text.
pub fn scrub_placeholders(reply: &str) -> String {
    PLACEHOLDER_RE.replace_all(reply, "").to_string()
}

/// Append the original message, quoted for threading.
pub fn quote_original(reply: &str, original: &ConversationMessage) -> String {
    let quoted_body = original
        .body
        .lines()
        .map(|line| format!("> {line}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "{}\n\n---\n\nOn {}, {} wrote:\n{}",
        reply.trim_end(),
        original.created_at.format("%b %d, %Y"),
        original.sender,
        quoted_body
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Direction;
    use chrono::Utc;

    #[test]
    fn customer_name_title_cases_local_part() {
        assert_eq!(customer_name_from_email("jane.doe@example.com"), "Jane Doe");
        assert_eq!(customer_name_from_email("bob_smith@x.io"), "Bob Smith");
        assert_eq!(customer_name_from_email("carol@x.io"), "Carol");
    }

    #[test]
    fn signature_block_uses_store_name() {
        assert_eq!(signature_block("Acme Gadgets"), "Acme Gadgets Support Team");
    }

    #[test]
    fn generic_store_name_collapses() {
        assert_eq!(signature_block("My Store"), "Support Team");
        assert_eq!(signature_block("shop"), "Support Team");
        assert_eq!(signature_block(""), "Support Team");
    }

    #[test]
    fn store_name_containing_support_collapses() {
        assert_eq!(signature_block("Acme Support"), "Support Team");
    }

    #[test]
    fn signature_appended_when_missing() {
        let signed = enforce_signature("Thanks for reaching out.", "Acme Gadgets");
        assert!(signed.contains("Warm Regards,"));
        assert!(signed.contains("Acme Gadgets Support Team"));
    }

    #[test]
    fn signature_enforcement_is_idempotent() {
        let once = enforce_signature("Thanks for reaching out.", "Acme Gadgets");
        let twice = enforce_signature(&once, "Acme Gadgets");
        assert_eq!(once, twice);
        assert_eq!(twice.matches("Warm Regards,").count(), 1);
    }

    #[test]
    fn signature_detection_is_case_insensitive() {
        let reply = "All sorted.\n\nwarm regards,\nThe Team";
        let signed = enforce_signature(reply, "Acme");
        assert_eq!(signed, reply);
    }

    #[test]
    fn placeholders_scrubbed_case_insensitively() {
        let reply = "Best,\n[Your Name]\n[YOUR COMPANY]\n[your contact information]\n[Store Name]";
        let scrubbed = scrub_placeholders(reply);
        assert!(!scrubbed.to_lowercase().contains("[your name]"));
        assert!(!scrubbed.to_lowercase().contains("[your company]"));
        assert!(!scrubbed.to_lowercase().contains("[your contact information]"));
        assert!(!scrubbed.to_lowercase().contains("[store name]"));
    }

    #[test]
    fn quote_prefixes_every_line() {
        let original = ConversationMessage {
            id: "m1".into(),
            thread_id: "t1".into(),
            direction: Direction::Inbound,
            sender: "jane@example.com".into(),
            recipient: "support@acme.com".into(),
            subject: None,
            body: "Where is my order?\nIt has been two weeks.".into(),
            order_id: None,
            created_at: Utc::now(),
        };
        let threaded = quote_original("On it.", &original);
        assert!(threaded.contains("---"));
        assert!(threaded.contains("jane@example.com wrote:"));
        assert!(threaded.contains("> Where is my order?"));
        assert!(threaded.contains("> It has been two weeks."));
    }
}
