use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dealflow_core::chains::{ActionChain, ProposedAction};
use dealflow_core::error::ApiError;
use dealflow_core::events::{EmitEventRequest, PaginatedResponse, PropagationEvent};
use dealflow_core::generate;

use crate::error::AppError;
use crate::state::AppState;
use crate::store::{
    ActionRow, ChainRow, EventRow, SELECT_ACTION_COLUMNS, SELECT_CHAIN_COLUMNS,
    SELECT_EVENT_COLUMNS, load_policy,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/events", get(list_events).post(emit_event))
        .route("/v1/events/{event_id}/reprocess", post(reprocess_event))
}

/// Response for event emission: the stored event plus the chain it
/// produced, if any. `chain` is null for no-action events.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct EmitEventResponse {
    pub event: PropagationEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<ActionChain>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ProposedAction>,
}

fn validate_emit(req: &EmitEventRequest) -> Result<(), AppError> {
    if req.event_type.is_empty() {
        return Err(AppError::Validation {
            message: "event_type must not be empty".to_string(),
            field: Some("event_type".to_string()),
            received: Some(serde_json::Value::String(req.event_type.clone())),
            docs_hint: Some(
                "event_type is a dotted string like 'dd.finding_confirmed' or \
                 'document.markup_received'"
                    .to_string(),
            ),
        });
    }
    if req.source_entity_type.is_empty() {
        return Err(AppError::Validation {
            message: "source_entity_type must not be empty".to_string(),
            field: Some("source_entity_type".to_string()),
            received: None,
            docs_hint: Some(
                "Name the entity kind that produced the event, e.g. 'document' or \
                 'checklist_item'"
                    .to_string(),
            ),
        });
    }
    Ok(())
}

/// Generation can only run against a still-unprocessed event; a
/// processed one already made its chain-or-no-chain decision.
fn ensure_unprocessed(event: &EventRow) -> Result<(), AppError> {
    if event.processed {
        return Err(AppError::AlreadyResolved {
            entity: "event",
            id: event.id,
            status: "processed".to_string(),
        });
    }
    Ok(())
}

/// Classify a stored, unprocessed event and persist whatever it
/// produces: either a chain with its actions and the event's processed
/// marker in one transaction, or just the processed marker for
/// no-action event types. Queue notification fires here, after commit;
/// the sink is only ever handed chains that need a human (tier >= 2).
async fn derive_chain(
    state: &AppState,
    event_id: Uuid,
    deal_id: Uuid,
    event_type: &str,
    payload: &serde_json::Value,
) -> Result<EmitEventResponse, AppError> {
    let policy = load_policy(&state.db, deal_id).await?;

    let Some(draft) = generate::draft(event_type, payload, &policy) else {
        // Explicit no-action decision: processed, no chain.
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "UPDATE propagation_events SET processed = TRUE, processed_at = now() \
             WHERE id = $1 RETURNING {SELECT_EVENT_COLUMNS}"
        ))
        .bind(event_id)
        .fetch_one(&state.db)
        .await?;
        return Ok(EmitEventResponse {
            event: row.into_event(),
            chain: None,
            actions: Vec::new(),
        });
    };

    if draft.actions.is_empty() {
        // A chain with zero actions is invalid and must not be persisted.
        return Err(AppError::GenerationFailed(format!(
            "drafted chain for event {} has no actions",
            event_id
        )));
    }

    // Chain, actions, and the processed marker commit together.
    let mut tx = state.db.begin().await?;

    let chain_id = Uuid::now_v7();
    let chain_row = sqlx::query_as::<_, ChainRow>(&format!(
        "INSERT INTO action_chains \
         (id, deal_id, trigger_event_id, summary, significance, approval_tier, status) \
         VALUES ($1, $2, $3, $4, $5, $6, 'pending') \
         RETURNING {SELECT_CHAIN_COLUMNS}"
    ))
    .bind(chain_id)
    .bind(deal_id)
    .bind(event_id)
    .bind(&draft.summary)
    .bind(draft.significance)
    .bind(draft.approval_tier.as_i32())
    .fetch_one(&mut *tx)
    .await?;

    let mut action_rows = Vec::with_capacity(draft.actions.len());
    for action in &draft.actions {
        let row = sqlx::query_as::<_, ActionRow>(&format!(
            "INSERT INTO proposed_actions \
             (id, chain_id, sequence_order, action_type, target_entity_type, payload, preview, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending') \
             RETURNING {SELECT_ACTION_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(chain_id)
        .bind(action.sequence_order)
        .bind(&action.action_type)
        .bind(&action.target_entity_type)
        .bind(&action.payload)
        .bind(&action.preview)
        .fetch_one(&mut *tx)
        .await?;
        action_rows.push(row);
    }

    let event_row = sqlx::query_as::<_, EventRow>(&format!(
        "UPDATE propagation_events \
         SET processed = TRUE, processed_at = now(), chain_id = $2 \
         WHERE id = $1 RETURNING {SELECT_EVENT_COLUMNS}"
    ))
    .bind(event_id)
    .bind(chain_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    let event = event_row.into_event();
    let chain = chain_row.into_chain()?;
    let actions = action_rows
        .into_iter()
        .map(|r| r.into_action())
        .collect::<Result<Vec<_>, _>>()?;

    if chain.approval_tier.needs_human() {
        state.notifier.chain_queued(&chain);
    } else {
        // Tier 1 executes autonomously: the external executor picks the
        // chain up from storage; the engine only exposes its existence.
        tracing::info!(
            chain_id = %chain.id,
            deal_id = %chain.deal_id,
            "tier-1 chain eligible for autonomous execution"
        );
    }

    Ok(EmitEventResponse {
        event,
        chain: Some(chain),
        actions,
    })
}

/// Emit a propagation event and derive its action chain
///
/// The event is stored first, then classification and chain generation
/// run in a single transaction: chain, actions, and the event's
/// processed marker all land together or not at all. If generation
/// fails the event stays stored with processed = false; drive it again
/// with POST /v1/events/{event_id}/reprocess rather than re-emitting,
/// which would mint a duplicate event. Events whose type maps to no
/// actions are marked processed without a chain.
#[utoipa::path(
    post,
    path = "/v1/events",
    request_body = EmitEventRequest,
    responses(
        (status = 201, description = "Event stored, chain derived if applicable", body = EmitEventResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 500, description = "Generation failed, event left unprocessed", body = ApiError)
    ),
    tag = "events"
)]
pub async fn emit_event(
    State(state): State<AppState>,
    Json(req): Json<EmitEventRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_emit(&req)?;

    // The event is durable before generation runs: a generation failure
    // leaves it stored with processed = FALSE, recoverable via reprocess.
    let event_id = Uuid::now_v7();
    sqlx::query(
        "INSERT INTO propagation_events \
         (id, deal_id, event_type, source_entity_type, source_entity_id, payload) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(event_id)
    .bind(req.deal_id)
    .bind(&req.event_type)
    .bind(&req.source_entity_type)
    .bind(req.source_entity_id)
    .bind(&req.payload)
    .execute(&state.db)
    .await?;

    let response = derive_chain(&state, event_id, req.deal_id, &req.event_type, &req.payload).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Re-run chain generation for a stored, unprocessed event
///
/// Recovery path for events whose original generation failed: the event
/// is already durable, so this re-drives classification and persistence
/// from the stored payload without minting a new event. Conflicts with
/// 409 once the event is processed.
#[utoipa::path(
    post,
    path = "/v1/events/{event_id}/reprocess",
    params(("event_id" = Uuid, Path, description = "Event ID")),
    responses(
        (status = 200, description = "Generation re-run, chain derived if applicable", body = EmitEventResponse),
        (status = 404, description = "Event not found", body = ApiError),
        (status = 409, description = "Event already processed", body = ApiError)
    ),
    tag = "events"
)]
pub async fn reprocess_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<EmitEventResponse>, AppError> {
    let event_row = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {SELECT_EVENT_COLUMNS} FROM propagation_events WHERE id = $1"
    ))
    .bind(event_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound {
        entity: "event",
        id: event_id,
    })?;
    ensure_unprocessed(&event_row)?;

    let response = derive_chain(
        &state,
        event_row.id,
        event_row.deal_id,
        &event_row.event_type,
        &event_row.payload,
    )
    .await?;
    Ok(Json(response))
}

/// Query parameters for listing events
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListEventsParams {
    /// Filter by deal
    #[serde(default)]
    pub deal_id: Option<Uuid>,
    /// Filter by processed flag
    #[serde(default)]
    pub processed: Option<bool>,
    /// Maximum number of events to return (default 50, max 200)
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// List propagation events, newest first
#[utoipa::path(
    get,
    path = "/v1/events",
    params(ListEventsParams),
    responses(
        (status = 200, description = "Paginated list of events", body = PaginatedResponse<PropagationEvent>)
    ),
    tag = "events"
)]
pub async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<ListEventsParams>,
) -> Result<Json<PaginatedResponse<PropagationEvent>>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let offset = params.offset.unwrap_or(0).max(0);

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM propagation_events \
         WHERE ($1::uuid IS NULL OR deal_id = $1) \
           AND ($2::boolean IS NULL OR processed = $2)",
    )
    .bind(params.deal_id)
    .bind(params.processed)
    .fetch_one(&state.db)
    .await?;

    let rows = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {SELECT_EVENT_COLUMNS} FROM propagation_events \
         WHERE ($1::uuid IS NULL OR deal_id = $1) \
           AND ($2::boolean IS NULL OR processed = $2) \
         ORDER BY created_at DESC, id DESC \
         LIMIT $3 OFFSET $4"
    ))
    .bind(params.deal_id)
    .bind(params.processed)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(PaginatedResponse {
        data: rows.into_iter().map(|r| r.into_event()).collect(),
        total,
        limit,
        offset,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn emit_request(event_type: &str) -> EmitEventRequest {
        EmitEventRequest {
            deal_id: Uuid::now_v7(),
            event_type: event_type.to_string(),
            source_entity_type: "document".to_string(),
            source_entity_id: Uuid::now_v7(),
            payload: serde_json::json!({}),
        }
    }

    fn stored_event(processed: bool) -> EventRow {
        EventRow {
            id: Uuid::now_v7(),
            deal_id: Uuid::now_v7(),
            event_type: "dd.finding_confirmed".to_string(),
            source_entity_type: "document".to_string(),
            source_entity_id: Uuid::now_v7(),
            payload: serde_json::json!({}),
            processed,
            processed_at: processed.then(Utc::now),
            chain_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn emit_validation_rejects_empty_event_type() {
        let req = emit_request("");
        assert!(matches!(
            validate_emit(&req),
            Err(AppError::Validation { .. })
        ));
    }

    #[test]
    fn emit_validation_rejects_empty_source_entity_type() {
        let mut req = emit_request("dd.finding_confirmed");
        req.source_entity_type = String::new();
        assert!(matches!(
            validate_emit(&req),
            Err(AppError::Validation { .. })
        ));
    }

    #[test]
    fn emit_validation_accepts_well_formed_request() {
        assert!(validate_emit(&emit_request("dd.finding_confirmed")).is_ok());
    }

    #[test]
    fn reprocess_only_applies_to_unprocessed_events() {
        assert!(ensure_unprocessed(&stored_event(false)).is_ok());

        let err = ensure_unprocessed(&stored_event(true)).unwrap_err();
        assert!(matches!(
            err,
            AppError::AlreadyResolved {
                entity: "event",
                status,
                ..
            } if status == "processed"
        ));
    }
}
