//! Suggestion pipeline — the entry point for one inbound message.
//!
//! Flow per invocation, strictly sequential:
//! 1. Load message + thread + connection + order context
//! 2. Quota gate via the usage ledger
//! 3. Signal extraction (deterministic)
//! 4. Policy directives + reply composition
//! 5. Upsert the suggestion (keyed by message id)
//! 6. Meter usage, record any committed follow-up
//!
//! Steps 1–2 fail fast; step 4 absorbs generative failures internally;
//! step 6 failures are logged, never propagated. Expected states (missing
//! message, exhausted quota) are outcomes, not errors.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::compose::{ComposeContext, ReplyComposer};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::llm::LlmProvider;
use crate::pipeline::types::{AiSuggestion, FollowUpEvent};
use crate::policy::PolicyEngine;
use crate::signals::SignalExtractor;
use crate::store::Database;
use crate::usage::UsageLedger;

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// A suggestion was composed and persisted.
    Completed(AiSuggestion),
    /// Quota exhausted; the terminal limit-reached suggestion was persisted.
    QuotaExceeded(AiSuggestion),
    /// The triggering message doesn't exist. Nothing was written.
    MessageNotFound,
}

/// The reply-drafting and action-inference pipeline.
pub struct SuggestionPipeline {
    db: Arc<dyn Database>,
    ledger: UsageLedger,
    extractor: SignalExtractor,
    composer: ReplyComposer,
    config: PipelineConfig,
}

impl SuggestionPipeline {
    /// Create a pipeline. Pass `llm: None` to run fallback-only.
    pub fn new(
        db: Arc<dyn Database>,
        llm: Option<Arc<dyn LlmProvider>>,
        config: PipelineConfig,
    ) -> Self {
        let composer = ReplyComposer::new(llm).with_max_tokens(config.max_reply_tokens);
        Self {
            ledger: UsageLedger::new(Arc::clone(&db)),
            db,
            extractor: SignalExtractor::new(),
            composer,
            config,
        }
    }

    /// Fire-and-forget entry point for the event dispatcher.
    ///
    /// Logs and swallows everything — this is a best-effort background
    /// enrichment, not a request handler.
    pub async fn handle(&self, message_id: &str) {
        match self.run(message_id).await {
            Ok(PipelineOutcome::Completed(suggestion)) => {
                info!(
                    message_id,
                    action = %suggestion.proposed_action,
                    confidence = suggestion.confidence,
                    "Suggestion generated"
                );
            }
            Ok(PipelineOutcome::QuotaExceeded(_)) => {
                info!(message_id, "Suggestion skipped: AI quota exhausted");
            }
            Ok(PipelineOutcome::MessageNotFound) => {}
            Err(e) => {
                error!(message_id, error = %e, "Suggestion pipeline failed");
            }
        }
    }

    /// Run the pipeline for one message.
    ///
    /// Safe to re-invoke for the same message: persistence is an upsert, so
    /// recomputation replaces the earlier suggestion.
    pub async fn run(&self, message_id: &str) -> Result<PipelineOutcome, PipelineError> {
        // 1. Load
        let Some(context) = self.db.load_message_context(message_id).await? else {
            info!(message_id, "Message not found, skipping");
            return Ok(PipelineOutcome::MessageNotFound);
        };
        let thread = self
            .db
            .recent_thread_messages(&context.message.thread_id, self.config.context_messages)
            .await?;

        let store_name = if context.connection.store_name.trim().is_empty() {
            self.config.default_store_name.as_str()
        } else {
            context.connection.store_name.as_str()
        };

        // 2. Quota gate — a store error here fails closed.
        let check = self.ledger.can_use_ai(&context.connection.user_id).await?;
        if !check.allowed {
            let suggestion = AiSuggestion::limit_reached(message_id);
            self.db.upsert_suggestion(&suggestion).await?;
            info!(
                message_id,
                user_id = %context.connection.user_id,
                current = check.current,
                limit = check.limit,
                "AI quota exhausted, terminal suggestion written"
            );
            return Ok(PipelineOutcome::QuotaExceeded(suggestion));
        }

        // 3. Extract
        let subject = context.message.subject.as_deref();
        let signals = self.extractor.extract(
            &thread,
            subject,
            &context.message.body,
            context.order.as_ref(),
        );
        let fallback_action = self
            .extractor
            .keyword_action(subject, &context.message.body);

        // 4. Compose
        let directives = PolicyEngine::directives(&signals, context.order.is_some());
        let composed = self
            .composer
            .compose(&ComposeContext {
                store_name,
                customer_email: &context.message.sender,
                signals: &signals,
                directives,
                fallback_action,
                order: context.order.as_ref(),
                thread: &thread,
                current: &context.message,
            })
            .await;

        // 5. Persist
        let suggestion = AiSuggestion::new(
            message_id,
            composed.reply_text,
            composed.proposed_action,
            composed.confidence,
            context.message.order_id.clone(),
        );
        self.db
            .upsert_suggestion(&suggestion)
            .await
            .map_err(|e| PipelineError::Persist(e.to_string()))?;

        // 6. Meter — the suggestion is already saved, so a miss here is
        // logged, not propagated.
        if let Err(e) = self
            .ledger
            .increment_ai_suggestion(&context.connection.user_id)
            .await
        {
            warn!(
                user_id = %context.connection.user_id,
                error = %e,
                "Failed to record AI usage"
            );
        }

        if let Some(hours) = composed.follow_up_hours {
            let event = FollowUpEvent::due_in_hours(
                &context.message.thread_id,
                hours,
                "Committed fulfillment check",
            );
            if let Err(e) = self.db.record_follow_up(&event).await {
                warn!(
                    thread_id = %context.message.thread_id,
                    error = %e,
                    "Failed to record follow-up"
                );
            }
        }

        Ok(PipelineOutcome::Completed(suggestion))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::provider::{CompletionRequest, CompletionResponse, FinishReason};
    use crate::pipeline::types::{Connection, ConversationMessage, Direction, Order, ProposedAction};
    use crate::store::LibSqlBackend;
    use crate::usage::Plan;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};

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

    async fn seeded_db() -> Arc<LibSqlBackend> {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.insert_connection(&Connection {
            id: "conn-1".into(),
            user_id: "user-1".into(),
            store_name: "Acme Gadgets".into(),
            email: "support@acmegadgets.com".into(),
        })
        .await
        .unwrap();
        db.insert_thread("thread-1", "conn-1", Some("Where is my order?"))
            .await
            .unwrap();
        db.insert_order(&Order {
            id: "order-1".into(),
            external_id: "1042".into(),
            name: "#1042".into(),
            total_amount: 4999,
            currency: "USD".into(),
            status: "open".into(),
            fulfillment_status: "unfulfilled".into(),
            created_at: Utc::now() - Duration::days(10),
        })
        .await
        .unwrap();
        db.insert_message(&ConversationMessage {
            id: "m1".into(),
            thread_id: "thread-1".into(),
            direction: Direction::Inbound,
            sender: "jane.doe@example.com".into(),
            recipient: "support@acmegadgets.com".into(),
            subject: Some("Where is my order?".into()),
            body: "Where is my order?? It's been 9 days and nothing has shipped".into(),
            order_id: Some("order-1".into()),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        db
    }

    fn pipeline(db: Arc<LibSqlBackend>, llm: Option<Arc<dyn LlmProvider>>) -> SuggestionPipeline {
        SuggestionPipeline::new(db, llm, PipelineConfig::default())
    }

    #[tokio::test]
    async fn missing_message_is_a_clean_abort() {
        let db = seeded_db().await;
        db.ensure_usage("user-1", &Plan::starter(), None).await.unwrap();
        let pipeline = pipeline(Arc::clone(&db), None);

        let outcome = pipeline.run("no-such-message").await.unwrap();
        assert!(matches!(outcome, PipelineOutcome::MessageNotFound));
        assert!(db.suggestion_for_message("no-such-message").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn quota_gate_writes_terminal_suggestion_without_metering() {
        let db = seeded_db().await;
        let plan = Plan {
            name: "tiny".into(),
            emails_per_month: 10,
            ai_replies_limit: 0,
            stores: 1,
            is_trial: false,
        };
        db.ensure_usage("user-1", &plan, None).await.unwrap();
        let pipeline = pipeline(Arc::clone(&db), None);

        let outcome = pipeline.run("m1").await.unwrap();
        assert!(matches!(outcome, PipelineOutcome::QuotaExceeded(_)));

        let suggestion = db.suggestion_for_message("m1").await.unwrap().unwrap();
        assert_eq!(suggestion.proposed_action, ProposedAction::None);
        assert_eq!(suggestion.confidence, 0.0);

        // The increment was never called
        let record = db.usage_record("user-1").await.unwrap().unwrap();
        assert_eq!(record.ai_suggestions_generated, 0);
    }

    #[tokio::test]
    async fn fallback_run_persists_and_meters() {
        let db = seeded_db().await;
        db.ensure_usage("user-1", &Plan::starter(), None).await.unwrap();
        let pipeline = pipeline(Arc::clone(&db), None);

        let outcome = pipeline.run("m1").await.unwrap();
        let PipelineOutcome::Completed(suggestion) = outcome else {
            panic!("expected completion");
        };

        // "Where is my order" has no refund keyword: info request, 0.6
        assert_eq!(suggestion.proposed_action, ProposedAction::InfoRequest);
        assert!((suggestion.confidence - 0.6).abs() < 0.001);
        assert!(suggestion.reply_text.contains("Warm Regards,"));
        assert_eq!(suggestion.order_id.as_deref(), Some("order-1"));

        let record = db.usage_record("user-1").await.unwrap().unwrap();
        assert_eq!(record.ai_suggestions_generated, 1);
    }

    #[tokio::test]
    async fn generative_run_uses_model_output() {
        let db = seeded_db().await;
        db.ensure_usage("user-1", &Plan::starter(), None).await.unwrap();
        let llm: Arc<dyn LlmProvider> = Arc::new(MockLlm {
            response: r#"{"reply": "A refund is on its way.", "proposed_action": "REFUND", "follow_up_required": false, "follow_up_hours": null}"#.into(),
        });
        let pipeline = pipeline(Arc::clone(&db), Some(llm));

        let PipelineOutcome::Completed(suggestion) = pipeline.run("m1").await.unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(suggestion.proposed_action, ProposedAction::Refund);
        assert!((suggestion.confidence - 0.75).abs() < 0.001);
        assert!(suggestion.reply_text.contains("A refund is on its way."));
    }

    #[tokio::test]
    async fn rerun_replaces_suggestion() {
        let db = seeded_db().await;
        db.ensure_usage("user-1", &Plan::starter(), None).await.unwrap();
        let pipeline = pipeline(Arc::clone(&db), None);

        pipeline.run("m1").await.unwrap();
        let first = db.suggestion_for_message("m1").await.unwrap().unwrap();

        pipeline.run("m1").await.unwrap();
        let second = db.suggestion_for_message("m1").await.unwrap().unwrap();

        // Replaced, not duplicated: same key, original created_at kept
        assert_eq!(first.message_id, second.message_id);
        assert_eq!(
            first.created_at.timestamp(),
            second.created_at.timestamp()
        );
    }

    #[tokio::test]
    async fn committed_follow_up_is_recorded() {
        let db = seeded_db().await;
        db.ensure_usage("user-1", &Plan::starter(), None).await.unwrap();
        let llm: Arc<dyn LlmProvider> = Arc::new(MockLlm {
            response: r#"{"reply": "I'll confirm within 24 hours whether it can ship.", "proposed_action": "INFO_REQUEST", "follow_up_required": true, "follow_up_hours": 24}"#.into(),
        });
        let pipeline = pipeline(Arc::clone(&db), Some(llm));

        pipeline.run("m1").await.unwrap();
        let events = db.follow_ups_for_thread("thread-1").await.unwrap();
        assert_eq!(events.len(), 1);
        let delta = events[0].due_at - events[0].created_at;
        assert_eq!(delta.num_hours(), 24);
    }

    #[tokio::test]
    async fn missing_usage_record_fails_fast() {
        let db = seeded_db().await;
        // No ensure_usage call: the quota check fails closed.
        let pipeline = pipeline(Arc::clone(&db), None);
        assert!(pipeline.run("m1").await.is_err());
        assert!(db.suggestion_for_message("m1").await.unwrap().is_none());
    }
}
