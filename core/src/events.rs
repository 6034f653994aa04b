use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// A propagation event — an immutable fact about something that happened
/// on a deal. Only the `processed` marker (and the back-reference to the
/// chain it produced) ever changes after insert.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PropagationEvent {
    /// Unique event ID (UUIDv7 — time-sortable)
    pub id: Uuid,
    /// Deal this event belongs to
    pub deal_id: Uuid,
    /// Event type, e.g. "dd.finding_confirmed" or "document.markup_received"
    pub event_type: String,
    /// Kind of entity that produced the event ("document", "checklist_item", ...)
    pub source_entity_type: String,
    /// The producing entity
    pub source_entity_id: Uuid,
    /// Structured event payload — shape depends on event_type
    pub payload: serde_json::Value,
    /// Set once a chain (or an explicit no-action decision) was derived
    pub processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    /// Weak back-reference to the chain this event produced, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Request to emit a new propagation event.
#[derive(Debug, Deserialize, ToSchema)]
pub struct EmitEventRequest {
    pub deal_id: Uuid,
    pub event_type: String,
    pub source_entity_type: String,
    pub source_entity_id: Uuid,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Offset pagination wrapper for list endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct PaginatedResponse<T: Serialize> {
    pub data: Vec<T>,
    /// Total matching rows, independent of limit/offset
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}
