//! Audit trail for administrative mutations.
//!
//! Handlers publish events on a broadcast bus and return immediately. A background listener
//! appends each event to `activity_log`, chaining `hash = sha256(prev_hash || payload)`.
//! Logging failures never fail the request that caused them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::db::WriteTx;

pub mod loggable;
pub use loggable::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub severity: Severity,
    pub payload: Value,
}

pub type EventBus = broadcast::Sender<DomainEvent>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<DomainEvent>) {
    broadcast::channel(1024)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        let ip = header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| header("x-real-ip").map(String::from));

        Self {
            ip,
            user_agent: header(axum::http::header::USER_AGENT.as_str()).map(String::from),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPayload {
    #[serde(rename = "new")]
    pub current: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
}

/// Publishes `"{entity_type}.{action}"` for `entity`.
pub fn log_activity_with_context<T: Loggable>(
    event_bus: &EventBus,
    action: &str,
    actor_id: Option<Uuid>,
    entity: &T,
    old_entity: Option<&T>,
    context: Option<RequestContext>,
) {
    let payload = ActivityPayload {
        current: serde_json::to_value(entity).unwrap_or_default(),
        old: old_entity.map(|e| serde_json::to_value(e).unwrap_or_default()),
        context,
    };

    let event = DomainEvent {
        id: Uuid::new_v4(),
        name: format!("{}.{}", T::entity_type(), action),
        occurred_at: Utc::now(),
        actor_id,
        subject_id: Some(entity.subject_id()),
        severity: entity.severity_for_action(action),
        payload: serde_json::to_value(&payload).unwrap_or_default(),
    };

    // No receiver just means nobody is recording right now.
    if event_bus.send(event).is_err() {
        tracing::debug!("activity event dropped: no listener");
    }
}

fn describe(name: &str) -> String {
    match name {
        "project_access.granted" => "Project access granted".to_string(),
        "project_access.revoked" => "Project access revoked".to_string(),
        "department_access.granted" => "Department access granted".to_string(),
        "department_access.revoked" => "Department access revoked".to_string(),
        "group_membership.added" => "User added to group".to_string(),
        "group_membership.removed" => "User removed from group".to_string(),
        "user_permission.granted" => "Permission granted to user".to_string(),
        "user_permission.revoked" => "Permission revoked from user".to_string(),
        "group.seeded" => "Group permissions reseeded".to_string(),
        "user.flags_updated" => "User flags updated".to_string(),
        other => format!("System event ({other})"),
    }
}

pub fn chain_hash(prev_hash: Option<&str>, payload: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Appends one event to the chain. The chain head is read under the write lock taken at
/// `BEGIN IMMEDIATE`, so two writers can never extend the same head.
pub async fn record_event(pool: &SqlitePool, event: &DomainEvent) -> Result<(), sqlx::Error> {
    let payload = serde_json::to_string(event).unwrap_or_default();
    let mut tx = WriteTx::begin(pool).await?;

    let head: Option<(String, i64)> = sqlx::query_as("SELECT hash, seq FROM activity_log ORDER BY seq DESC LIMIT 1")
        .fetch_optional(tx.conn()?)
        .await?;

    let (prev_hash, seq) = match head {
        Some((hash, seq)) => (Some(hash), seq + 1),
        None => (None, 1),
    };
    let hash = chain_hash(prev_hash.as_deref(), &payload);

    sqlx::query(
        r#"
        INSERT INTO activity_log
            (id, event_name, description, actor_id, subject_id, occurred_at, properties, severity, prev_hash, hash, seq)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.id)
    .bind(&event.name)
    .bind(describe(&event.name))
    .bind(event.actor_id)
    .bind(event.subject_id)
    .bind(event.occurred_at)
    .bind(&payload)
    .bind(event.severity.as_str())
    .bind(&prev_hash)
    .bind(&hash)
    .bind(seq)
    .execute(tx.conn()?)
    .await?;

    tx.commit().await
}

pub async fn start_activity_listener(mut rx: broadcast::Receiver<DomainEvent>, pool: SqlitePool) {
    tracing::info!("activity listener started");
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Err(err) = record_event(&pool, &event).await {
                    tracing::error!(error = %err, event = %event.name, "failed to save activity log");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "activity listener lagged; events lost");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
