//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. The schema is initialized
//! by the constructor; timestamps are stored as RFC 3339 text.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::pipeline::types::{
    AiSuggestion, Connection as StoreConnection, ConversationMessage, Direction, FollowUpEvent,
    MessageContext, Order, ProposedAction,
};
use crate::store::traits::Database;
use crate::usage::plan::{Plan, UsageRecord};

/// libSQL database backend.
///
/// Holds a single connection reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and initialize the schema.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn init_schema(&self) -> Result<(), DatabaseError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS connections (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                store_name TEXT NOT NULL,
                email TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS threads (
                id TEXT PRIMARY KEY,
                connection_id TEXT NOT NULL REFERENCES connections(id),
                subject TEXT,
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                external_id TEXT NOT NULL,
                name TEXT NOT NULL,
                total_amount INTEGER NOT NULL,
                currency TEXT NOT NULL,
                status TEXT NOT NULL,
                fulfillment_status TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL REFERENCES threads(id),
                direction TEXT NOT NULL,
                sender TEXT NOT NULL,
                recipient TEXT NOT NULL,
                subject TEXT,
                body TEXT NOT NULL,
                order_id TEXT REFERENCES orders(id),
                created_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_messages_thread
                ON messages(thread_id, created_at)",
            "CREATE TABLE IF NOT EXISTS suggestions (
                message_id TEXT PRIMARY KEY REFERENCES messages(id),
                reply_text TEXT NOT NULL,
                proposed_action TEXT NOT NULL,
                confidence REAL NOT NULL,
                order_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS follow_ups (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                due_at TEXT NOT NULL,
                note TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS usage_counters (
                user_id TEXT PRIMARY KEY,
                emails_sent INTEGER NOT NULL DEFAULT 0,
                ai_suggestions INTEGER NOT NULL DEFAULT 0,
                emails_per_month INTEGER NOT NULL,
                ai_replies_limit INTEGER NOT NULL,
                stores INTEGER NOT NULL,
                is_trial INTEGER NOT NULL,
                trial_ends_at TEXT,
                period_start TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        ];

        for sql in statements {
            self.conn()
                .execute(sql, ())
                .await
                .map_err(|e| DatabaseError::Query(format!("init_schema: {e}")))?;
        }
        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 datetime string from the store.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::MIN_UTC)
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<&str>` to a libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn row_to_message(row: &libsql::Row) -> Result<ConversationMessage, libsql::Error> {
    let direction_str: String = row.get(2)?;
    let created_str: String = row.get(8)?;
    Ok(ConversationMessage {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        direction: direction_str
            .parse::<Direction>()
            .unwrap_or(Direction::Inbound),
        sender: row.get(3)?,
        recipient: row.get(4)?,
        subject: row.get(5).ok(),
        body: row.get(6)?,
        order_id: row.get(7).ok(),
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_order(row: &libsql::Row) -> Result<Order, libsql::Error> {
    let created_str: String = row.get(7)?;
    Ok(Order {
        id: row.get(0)?,
        external_id: row.get(1)?,
        name: row.get(2)?,
        total_amount: row.get(3)?,
        currency: row.get(4)?,
        status: row.get(5)?,
        fulfillment_status: row.get(6)?,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_suggestion(row: &libsql::Row) -> Result<AiSuggestion, libsql::Error> {
    let action_str: String = row.get(2)?;
    let confidence: f64 = row.get(3)?;
    let created_str: String = row.get(5)?;
    let updated_str: String = row.get(6)?;
    Ok(AiSuggestion {
        message_id: row.get(0)?,
        reply_text: row.get(1)?,
        proposed_action: action_str
            .parse::<ProposedAction>()
            .unwrap_or(ProposedAction::None),
        confidence: confidence as f32,
        order_id: row.get(4).ok(),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_follow_up(row: &libsql::Row) -> Result<FollowUpEvent, libsql::Error> {
    let due_str: String = row.get(2)?;
    let created_str: String = row.get(4)?;
    Ok(FollowUpEvent {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        due_at: parse_datetime(&due_str),
        note: row.get(3)?,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_usage(row: &libsql::Row) -> Result<UsageRecord, libsql::Error> {
    let is_trial: i64 = row.get(6)?;
    let trial_ends_str: Option<String> = row.get(7).ok();
    let period_str: String = row.get(8)?;
    Ok(UsageRecord {
        user_id: row.get(0)?,
        emails_sent: row.get(1)?,
        ai_suggestions_generated: row.get(2)?,
        emails_per_month: row.get(3)?,
        ai_replies_limit: row.get(4)?,
        stores: row.get(5)?,
        is_trial: is_trial != 0,
        trial_ends_at: parse_optional_datetime(&trial_ends_str),
        period_start: parse_datetime(&period_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const MESSAGE_COLUMNS: &str =
    "id, thread_id, direction, sender, recipient, subject, body, order_id, created_at";

const ORDER_COLUMNS: &str =
    "id, external_id, name, total_amount, currency, status, fulfillment_status, created_at";

const SUGGESTION_COLUMNS: &str =
    "message_id, reply_text, proposed_action, confidence, order_id, created_at, updated_at";

const USAGE_COLUMNS: &str = "user_id, emails_sent, ai_suggestions, emails_per_month, \
     ai_replies_limit, stores, is_trial, trial_ends_at, period_start";

#[async_trait]
impl Database for LibSqlBackend {
    // ── Context ─────────────────────────────────────────────────────

    async fn load_message_context(
        &self,
        message_id: &str,
    ) -> Result<Option<MessageContext>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT m.id, m.thread_id, m.direction, m.sender, m.recipient, m.subject,
                        m.body, m.order_id, m.created_at,
                        c.id, c.user_id, c.store_name, c.email
                 FROM messages m
                 JOIN threads t ON t.id = m.thread_id
                 JOIN connections c ON c.id = t.connection_id
                 WHERE m.id = ?1",
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_message_context: {e}")))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(DatabaseError::Query(format!("load_message_context: {e}"))),
        };

        let message = row_to_message(&row)
            .map_err(|e| DatabaseError::Query(format!("load_message_context row parse: {e}")))?;
        let connection = StoreConnection {
            id: row
                .get(9)
                .map_err(|e| DatabaseError::Query(format!("connection id: {e}")))?,
            user_id: row
                .get(10)
                .map_err(|e| DatabaseError::Query(format!("connection user_id: {e}")))?,
            store_name: row
                .get(11)
                .map_err(|e| DatabaseError::Query(format!("connection store_name: {e}")))?,
            email: row
                .get(12)
                .map_err(|e| DatabaseError::Query(format!("connection email: {e}")))?,
        };

        let order = match &message.order_id {
            Some(order_id) => {
                let mut rows = conn
                    .query(
                        &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"),
                        params![order_id.as_str()],
                    )
                    .await
                    .map_err(|e| DatabaseError::Query(format!("load order: {e}")))?;
                match rows.next().await {
                    Ok(Some(row)) => Some(
                        row_to_order(&row)
                            .map_err(|e| DatabaseError::Query(format!("order row parse: {e}")))?,
                    ),
                    Ok(None) => None,
                    Err(e) => return Err(DatabaseError::Query(format!("load order: {e}"))),
                }
            }
            None => None,
        };

        Ok(Some(MessageContext {
            message,
            connection,
            order,
        }))
    }

    async fn recent_thread_messages(
        &self,
        thread_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE thread_id = ?1
                     ORDER BY created_at DESC LIMIT ?2"
                ),
                params![thread_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_thread_messages: {e}")))?;

        let mut messages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_message(&row) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    tracing::warn!("Skipping message row: {e}");
                }
            }
        }
        // Fetched newest-first; callers want chronological order.
        messages.reverse();
        Ok(messages)
    }

    // ── Suggestions ─────────────────────────────────────────────────

    async fn upsert_suggestion(&self, suggestion: &AiSuggestion) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO suggestions (message_id, reply_text, proposed_action, confidence,
                order_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(message_id) DO UPDATE SET
                reply_text = excluded.reply_text,
                proposed_action = excluded.proposed_action,
                confidence = excluded.confidence,
                order_id = excluded.order_id,
                updated_at = excluded.updated_at",
            params![
                suggestion.message_id.as_str(),
                suggestion.reply_text.as_str(),
                suggestion.proposed_action.as_str(),
                suggestion.confidence as f64,
                opt_text(suggestion.order_id.as_deref()),
                suggestion.created_at.to_rfc3339(),
                suggestion.updated_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_suggestion: {e}")))?;

        debug!(message_id = %suggestion.message_id, action = %suggestion.proposed_action, "Suggestion upserted");
        Ok(())
    }

    async fn suggestion_for_message(
        &self,
        message_id: &str,
    ) -> Result<Option<AiSuggestion>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {SUGGESTION_COLUMNS} FROM suggestions WHERE message_id = ?1"),
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("suggestion_for_message: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let suggestion = row_to_suggestion(&row)
                    .map_err(|e| DatabaseError::Query(format!("suggestion row parse: {e}")))?;
                Ok(Some(suggestion))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("suggestion_for_message: {e}"))),
        }
    }

    // ── Follow-ups ──────────────────────────────────────────────────

    async fn record_follow_up(&self, event: &FollowUpEvent) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO follow_ups (id, thread_id, due_at, note, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.id.as_str(),
                event.thread_id.as_str(),
                event.due_at.to_rfc3339(),
                event.note.as_str(),
                event.created_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("record_follow_up: {e}")))?;

        debug!(thread_id = %event.thread_id, due_at = %event.due_at, "Follow-up recorded");
        Ok(())
    }

    async fn follow_ups_for_thread(
        &self,
        thread_id: &str,
    ) -> Result<Vec<FollowUpEvent>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT id, thread_id, due_at, note, created_at FROM follow_ups
                 WHERE thread_id = ?1 ORDER BY created_at ASC",
                params![thread_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("follow_ups_for_thread: {e}")))?;

        let mut events = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_follow_up(&row) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!("Skipping follow-up row: {e}");
                }
            }
        }
        Ok(events)
    }

    // ── Usage ───────────────────────────────────────────────────────

    async fn usage_record(&self, user_id: &str) -> Result<Option<UsageRecord>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {USAGE_COLUMNS} FROM usage_counters WHERE user_id = ?1"),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("usage_record: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let record = row_to_usage(&row)
                    .map_err(|e| DatabaseError::Query(format!("usage row parse: {e}")))?;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("usage_record: {e}"))),
        }
    }

    async fn ensure_usage(
        &self,
        user_id: &str,
        plan: &Plan,
        trial_ends_at: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let trial_ends = trial_ends_at.map(|dt| dt.to_rfc3339());
        conn.execute(
            "INSERT INTO usage_counters (user_id, emails_sent, ai_suggestions,
                emails_per_month, ai_replies_limit, stores, is_trial, trial_ends_at,
                period_start, updated_at)
             VALUES (?1, 0, 0, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(user_id) DO NOTHING",
            params![
                user_id,
                plan.emails_per_month,
                plan.ai_replies_limit,
                plan.stores,
                plan.is_trial as i64,
                opt_text(trial_ends.as_deref()),
                now,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("ensure_usage: {e}")))?;
        Ok(())
    }

    async fn increment_ai_suggestions(&self, user_id: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        // Single guarded increment: the counter never passes the limit even
        // when concurrent invocations raced past the up-front check.
        let affected = conn
            .execute(
                "UPDATE usage_counters
                 SET ai_suggestions = ai_suggestions + 1, updated_at = ?2
                 WHERE user_id = ?1
                   AND (ai_replies_limit < 0 OR ai_suggestions < ai_replies_limit)",
                params![user_id, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("increment_ai_suggestions: {e}")))?;
        Ok(affected > 0)
    }

    async fn increment_emails_sent(&self, user_id: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let affected = conn
            .execute(
                "UPDATE usage_counters
                 SET emails_sent = emails_sent + 1, updated_at = ?2
                 WHERE user_id = ?1
                   AND (emails_per_month < 0 OR emails_sent < emails_per_month)",
                params![user_id, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("increment_emails_sent: {e}")))?;
        Ok(affected > 0)
    }

    // ── Ingestion-side seeding ──────────────────────────────────────

    async fn insert_connection(&self, connection: &StoreConnection) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO connections (id, user_id, store_name, email, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                connection.id.as_str(),
                connection.user_id.as_str(),
                connection.store_name.as_str(),
                connection.email.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_connection: {e}")))?;
        Ok(())
    }

    async fn insert_thread(
        &self,
        thread_id: &str,
        connection_id: &str,
        subject: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO threads (id, connection_id, subject, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                thread_id,
                connection_id,
                opt_text(subject),
                Utc::now().to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_thread: {e}")))?;
        Ok(())
    }

    async fn insert_message(&self, message: &ConversationMessage) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT INTO messages ({MESSAGE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                message.id.as_str(),
                message.thread_id.as_str(),
                message.direction.to_string(),
                message.sender.as_str(),
                message.recipient.as_str(),
                opt_text(message.subject.as_deref()),
                message.body.as_str(),
                opt_text(message.order_id.as_deref()),
                message.created_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_message: {e}")))?;
        Ok(())
    }

    async fn insert_order(&self, order: &Order) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            &format!("INSERT INTO orders ({ORDER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                order.id.as_str(),
                order.external_id.as_str(),
                order.name.as_str(),
                order.total_amount,
                order.currency.as_str(),
                order.status.as_str(),
                order.fulfillment_status.as_str(),
                order.created_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_order: {e}")))?;
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
