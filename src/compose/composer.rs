//! Reply composer — generative path with deterministic fallback.
//!
//! The generative backend is attempted first when configured; any call
//! failure or contract violation downgrades to the template path
//! transparently. Post-processing (placeholder scrub, signature, quoting)
//! applies to both paths, so the composer never returns an unsendable
//! reply.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::compose::postprocess::{
    customer_name_from_email, enforce_signature, quote_original, scrub_placeholders,
};
use crate::compose::prompt::{
    GenerativeOutcome, GenerativeReply, build_system_prompt, build_user_prompt,
    parse_generative_reply,
};
use crate::compose::templates::fallback_reply;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::{ConversationMessage, Order, ProposedAction};
use crate::policy::ReplyDirectives;
use crate::signals::SignalSet;

/// Confidence for any successful generative completion. Fixed, not
/// model-reported.
pub const GENERATIVE_CONFIDENCE: f32 = 0.75;

/// Fallback-path confidence when a non-NONE action was detected.
pub const FALLBACK_CONFIDENCE_ACTION: f32 = 0.6;

/// Fallback-path confidence when no action was detected.
pub const FALLBACK_CONFIDENCE_NONE: f32 = 0.4;

/// Temperature for reply drafting.
const REPLY_TEMPERATURE: f32 = 0.3;

/// Default max output tokens for the reply call.
const DEFAULT_REPLY_MAX_TOKENS: u32 = 1024;

/// Inputs for one compose run.
pub struct ComposeContext<'a> {
    pub store_name: &'a str,
    pub customer_email: &'a str,
    pub signals: &'a SignalSet,
    pub directives: ReplyDirectives,
    /// Deterministic keyword-derived action, used whenever the generative
    /// path doesn't run or its output is rejected.
    pub fallback_action: ProposedAction,
    pub order: Option<&'a Order>,
    /// Last thread messages, oldest first.
    pub thread: &'a [ConversationMessage],
    /// The inbound message being replied to.
    pub current: &'a ConversationMessage,
}

/// Final composed output.
#[derive(Debug, Clone)]
pub struct ComposedReply {
    pub reply_text: String,
    pub proposed_action: ProposedAction,
    pub confidence: f32,
    /// Hours until a committed follow-up check is due, when the reply made
    /// such a commitment.
    pub follow_up_hours: Option<f64>,
}

/// Produces the final reply text, action, and confidence.
pub struct ReplyComposer {
    llm: Option<Arc<dyn LlmProvider>>,
    max_tokens: u32,
}

impl ReplyComposer {
    /// Create a composer. Pass `None` to run fallback-only.
    pub fn new(llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self {
            llm,
            max_tokens: DEFAULT_REPLY_MAX_TOKENS,
        }
    }

    /// Override the max output tokens for the generative call.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Compose the reply. Never fails — every error path degrades to the
    /// deterministic template.
    pub async fn compose(&self, ctx: &ComposeContext<'_>) -> ComposedReply {
        let customer_name = customer_name_from_email(ctx.customer_email);

        let (reply, action, confidence, follow_up_hours) = match &self.llm {
            Some(llm) => match self.generate(llm.as_ref(), ctx, &customer_name).await {
                Some(generated) => {
                    let follow_up = if generated.follow_up_required {
                        generated.follow_up_hours.filter(|hours| *hours > 0.0)
                    } else {
                        None
                    };
                    (
                        generated.reply,
                        generated.proposed_action,
                        GENERATIVE_CONFIDENCE,
                        follow_up,
                    )
                }
                None => self.fallback(ctx, &customer_name),
            },
            None => self.fallback(ctx, &customer_name),
        };

        // Mandatory post-processing, in order: scrub generated placeholders,
        // enforce the signature, then thread the original underneath.
        let reply = scrub_placeholders(&reply);
        let reply = enforce_signature(&reply, ctx.store_name);
        let reply = quote_original(&reply, ctx.current);

        ComposedReply {
            reply_text: reply,
            proposed_action: action,
            confidence,
            follow_up_hours,
        }
    }

    fn fallback(
        &self,
        ctx: &ComposeContext<'_>,
        customer_name: &str,
    ) -> (String, ProposedAction, f32, Option<f64>) {
        let action = ctx.fallback_action;
        let confidence = if action == ProposedAction::None {
            FALLBACK_CONFIDENCE_NONE
        } else {
            FALLBACK_CONFIDENCE_ACTION
        };
        debug!(action = %action, "Composing templated fallback reply");
        (
            fallback_reply(action, customer_name, ctx.store_name),
            action,
            confidence,
            None,
        )
    }

    async fn generate(
        &self,
        llm: &dyn LlmProvider,
        ctx: &ComposeContext<'_>,
        customer_name: &str,
    ) -> Option<GenerativeReply> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_system_prompt(ctx.store_name)),
            ChatMessage::user(build_user_prompt(
                ctx.store_name,
                customer_name,
                ctx.customer_email,
                ctx.signals,
                &ctx.directives,
                ctx.thread,
                ctx.order,
            )),
        ])
        .with_temperature(REPLY_TEMPERATURE)
        .with_max_tokens(self.max_tokens);

        match llm.complete(request).await {
            Ok(response) => match parse_generative_reply(&response.content) {
                GenerativeOutcome::Parsed(generated) => Some(generated),
                GenerativeOutcome::Unparseable => {
                    warn!(
                        raw_response = %response.content,
                        "Generative output failed the contract, using fallback"
                    );
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "Generative call failed, using fallback");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::provider::{CompletionResponse, FinishReason};
    use crate::pipeline::types::Direction;
    use async_trait::async_trait;
    use chrono::Utc;

    /// Mock backend returning a fixed completion.
    struct MockLlm {
        response: String,
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        fn model_name(&self) -> &str {
            "mock"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: self.response.clone(),
                input_tokens: 100,
                output_tokens: 50,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    /// Mock backend that always errors.
    struct FailingLlm;

    #[async_trait]
    impl LlmProvider for FailingLlm {
        fn model_name(&self) -> &str {
            "failing"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Err(LlmError::RequestFailed {
                provider: "mock".into(),
                reason: "connection refused".into(),
            })
        }
    }

    fn current_message() -> ConversationMessage {
        ConversationMessage {
            id: "m1".into(),
            thread_id: "t1".into(),
            direction: Direction::Inbound,
            sender: "jane.doe@example.com".into(),
            recipient: "support@acme.com".into(),
            subject: Some("Where is my order?".into()),
            body: "Where is my order? I want a refund.".into(),
            order_id: None,
            created_at: Utc::now(),
        }
    }

    fn directives() -> ReplyDirectives {
        ReplyDirectives {
            decisive_refund: false,
            time_bound_check: false,
            forbid_open_ended_closing: true,
            forbid_repeat_questions: true,
            generic_acknowledgment: false,
        }
    }

    fn context<'a>(
        signals: &'a SignalSet,
        current: &'a ConversationMessage,
        fallback_action: ProposedAction,
    ) -> ComposeContext<'a> {
        ComposeContext {
            store_name: "Acme Gadgets",
            customer_email: "jane.doe@example.com",
            signals,
            directives: directives(),
            fallback_action,
            order: None,
            thread: std::slice::from_ref(current),
            current,
        }
    }

    #[tokio::test]
    async fn generative_success_uses_model_reply() {
        let llm: Arc<dyn LlmProvider> = Arc::new(MockLlm {
            response: r#"{"reply": "We've issued your refund.", "proposed_action": "REFUND", "follow_up_required": false, "follow_up_hours": null}"#.into(),
        });
        let composer = ReplyComposer::new(Some(llm));
        let signals = SignalSet::default();
        let current = current_message();
        let composed = composer
            .compose(&context(&signals, &current, ProposedAction::InfoRequest))
            .await;

        assert!(composed.reply_text.contains("We've issued your refund."));
        assert_eq!(composed.proposed_action, ProposedAction::Refund);
        assert_eq!(composed.confidence, GENERATIVE_CONFIDENCE);
        assert!(composed.follow_up_hours.is_none());
        // Post-processing ran
        assert!(composed.reply_text.contains("Warm Regards,"));
        assert!(composed.reply_text.contains("> Where is my order?"));
    }

    #[tokio::test]
    async fn malformed_output_degrades_to_fallback() {
        let llm: Arc<dyn LlmProvider> = Arc::new(MockLlm {
            response: "Sure! Here's a nice reply for the customer.".into(),
        });
        let composer = ReplyComposer::new(Some(llm));
        let signals = SignalSet::default();
        let current = current_message();
        let composed = composer
            .compose(&context(&signals, &current, ProposedAction::Refund))
            .await;

        assert_eq!(composed.proposed_action, ProposedAction::Refund);
        assert_eq!(composed.confidence, FALLBACK_CONFIDENCE_ACTION);
        assert!(!composed.reply_text.trim().is_empty());
        assert!(composed.reply_text.contains("Jane Doe"));
    }

    #[tokio::test]
    async fn out_of_set_action_degrades_to_fallback() {
        let llm: Arc<dyn LlmProvider> = Arc::new(MockLlm {
            response: r#"{"reply": "We'll swap it.", "proposed_action": "REPLACE_ITEM"}"#.into(),
        });
        let composer = ReplyComposer::new(Some(llm));
        let signals = SignalSet::default();
        let current = current_message();
        let composed = composer
            .compose(&context(&signals, &current, ProposedAction::ReplaceItem))
            .await;

        // Deterministic action wins; the generative text is discarded.
        assert_eq!(composed.proposed_action, ProposedAction::ReplaceItem);
        assert_eq!(composed.confidence, FALLBACK_CONFIDENCE_ACTION);
        assert!(!composed.reply_text.contains("We'll swap it."));
    }

    #[tokio::test]
    async fn backend_error_degrades_to_fallback() {
        let composer = ReplyComposer::new(Some(Arc::new(FailingLlm)));
        let signals = SignalSet::default();
        let current = current_message();
        let composed = composer
            .compose(&context(&signals, &current, ProposedAction::Cancel))
            .await;

        assert_eq!(composed.proposed_action, ProposedAction::Cancel);
        assert_eq!(composed.confidence, FALLBACK_CONFIDENCE_ACTION);
    }

    #[tokio::test]
    async fn no_backend_uses_fallback_with_low_confidence_for_none() {
        let composer = ReplyComposer::new(None);
        let signals = SignalSet::default();
        let current = current_message();
        let composed = composer
            .compose(&context(&signals, &current, ProposedAction::None))
            .await;

        assert_eq!(composed.proposed_action, ProposedAction::None);
        assert_eq!(composed.confidence, FALLBACK_CONFIDENCE_NONE);
        assert!(composed.reply_text.contains("Warm Regards,"));
    }

    #[tokio::test]
    async fn placeholders_scrubbed_from_generated_reply() {
        let llm: Arc<dyn LlmProvider> = Arc::new(MockLlm {
            response: r#"{"reply": "Thanks!\n\nBest,\n[Your Name] at [Store Name]", "proposed_action": "NONE"}"#.into(),
        });
        let composer = ReplyComposer::new(Some(llm));
        let signals = SignalSet::default();
        let current = current_message();
        let composed = composer
            .compose(&context(&signals, &current, ProposedAction::None))
            .await;

        assert!(!composed.reply_text.contains("[Your Name]"));
        assert!(!composed.reply_text.contains("[Store Name]"));
    }

    #[tokio::test]
    async fn follow_up_hours_propagated_when_committed() {
        let llm: Arc<dyn LlmProvider> = Arc::new(MockLlm {
            response: r#"{"reply": "I'll check and update you within 24 hours.", "proposed_action": "INFO_REQUEST", "follow_up_required": true, "follow_up_hours": 24}"#.into(),
        });
        let composer = ReplyComposer::new(Some(llm));
        let signals = SignalSet::default();
        let current = current_message();
        let composed = composer
            .compose(&context(&signals, &current, ProposedAction::None))
            .await;

        assert_eq!(composed.follow_up_hours, Some(24.0));
    }

    #[tokio::test]
    async fn non_positive_follow_up_hours_dropped() {
        let llm: Arc<dyn LlmProvider> = Arc::new(MockLlm {
            response: r#"{"reply": "Done.", "proposed_action": "NONE", "follow_up_required": true, "follow_up_hours": 0}"#.into(),
        });
        let composer = ReplyComposer::new(Some(llm));
        let signals = SignalSet::default();
        let current = current_message();
        let composed = composer
            .compose(&context(&signals, &current, ProposedAction::None))
            .await;

        assert!(composed.follow_up_hours.is_none());
    }

    #[tokio::test]
    async fn fallback_path_sound_for_every_action() {
        let composer = ReplyComposer::new(None);
        let signals = SignalSet::default();
        let current = current_message();
        for action in [
            ProposedAction::Refund,
            ProposedAction::Cancel,
            ProposedAction::ReplaceItem,
            ProposedAction::AddressChange,
            ProposedAction::InfoRequest,
            ProposedAction::None,
        ] {
            let composed = composer.compose(&context(&signals, &current, action)).await;
            assert!(!composed.reply_text.trim().is_empty());
            assert!(composed.reply_text.contains("Acme Gadgets Support Team"));
            let lowered = composed.reply_text.to_lowercase();
            assert!(!lowered.contains("[your name]"));
            assert!(!lowered.contains("[your company]"));
            assert!(!lowered.contains("[store name]"));
            assert_eq!(composed.proposed_action, action);
        }
    }

    #[tokio::test]
    async fn already_signed_generative_reply_not_double_signed() {
        let llm: Arc<dyn LlmProvider> = Arc::new(MockLlm {
            response: r#"{"reply": "All done.\n\nWarm Regards,\n\nAcme Gadgets Support Team", "proposed_action": "NONE"}"#.into(),
        });
        let composer = ReplyComposer::new(Some(llm));
        let signals = SignalSet::default();
        let current = current_message();
        let composed = composer
            .compose(&context(&signals, &current, ProposedAction::None))
            .await;

        assert_eq!(composed.reply_text.matches("Warm Regards,").count(), 1);
    }
}
