use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dealflow_core::chains::{
    ActionChain, ActionStatus, ProposedAction, merge_payload, rollup,
};
use dealflow_core::error::ApiError;

use crate::error::AppError;
use crate::state::AppState;
use crate::store::{ActionRow, ChainRow, SELECT_ACTION_COLUMNS, SELECT_CHAIN_COLUMNS};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/approval-queue/{chain_id}/approve", post(approve_chain))
        .route(
            "/v1/approval-queue/{chain_id}/actions/{action_id}/approve",
            post(approve_action),
        )
        .route(
            "/v1/approval-queue/{chain_id}/actions/{action_id}/modify",
            post(modify_action),
        )
        .route(
            "/v1/approval-queue/{chain_id}/actions/{action_id}/reject",
            post(reject_action),
        )
}

const DEFAULT_ACTOR: &str = "user";

/// Each action and each chain resolves exactly once: any status other
/// than pending means another reviewer already decided, and the second
/// decision conflicts instead of overwriting the first.
fn guard_pending(entity: &'static str, id: Uuid, status: &str) -> Result<(), AppError> {
    if status == "pending" {
        Ok(())
    } else {
        Err(AppError::AlreadyResolved {
            entity,
            id,
            status: status.to_string(),
        })
    }
}

/// A human decision on one action.
enum Decision {
    Approve,
    /// Shallow payload delta, caller keys win
    ModifyApprove(serde_json::Value),
    Reject,
}

/// Pure part of a resolution: the action's new status, the payload as it
/// should be executed, and the audit record of who resolved it. For
/// modifications the original payload travels in the audit record.
fn apply_decision(
    decision: &Decision,
    actor: &str,
    original_payload: &serde_json::Value,
) -> (ActionStatus, serde_json::Value, serde_json::Value) {
    match decision {
        Decision::Approve => (
            ActionStatus::Executed,
            original_payload.clone(),
            serde_json::json!({ "approved_by": actor }),
        ),
        Decision::ModifyApprove(delta) => (
            ActionStatus::Executed,
            merge_payload(original_payload, delta),
            serde_json::json!({
                "modified_by": actor,
                "original_payload": original_payload,
            }),
        ),
        Decision::Reject => (
            ActionStatus::Rejected,
            original_payload.clone(),
            serde_json::json!({ "rejected_by": actor }),
        ),
    }
}

/// Resolve one action inside a single transaction and re-evaluate the
/// owning chain's rollup against the same snapshot.
///
/// The chain row is locked before the action row, so two decisions on
/// different actions of one chain serialize at the chain and cannot
/// both conclude "no actions remain pending" against stale reads. The
/// action's own pending-status guard rejects a second decision on the
/// same action with AlreadyResolved. The terminal chain update is
/// additionally guarded on status = 'pending': a concurrent duplicate
/// transition is a benign no-op.
async fn resolve_action(
    state: &AppState,
    chain_id: Uuid,
    action_id: Uuid,
    decision: Decision,
    actor: &str,
) -> Result<(ProposedAction, ActionChain), AppError> {
    let mut tx = state.db.begin().await?;

    let chain_row = sqlx::query_as::<_, ChainRow>(&format!(
        "SELECT {SELECT_CHAIN_COLUMNS} FROM action_chains WHERE id = $1 FOR UPDATE"
    ))
    .bind(chain_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound {
        entity: "chain",
        id: chain_id,
    })?;

    let action_row = sqlx::query_as::<_, ActionRow>(&format!(
        "SELECT {SELECT_ACTION_COLUMNS} FROM proposed_actions \
         WHERE id = $1 AND chain_id = $2"
    ))
    .bind(action_id)
    .bind(chain_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound {
        entity: "action",
        id: action_id,
    })?;

    guard_pending("action", action_id, &action_row.status)?;

    let (new_status, payload, execution_result) =
        apply_decision(&decision, actor, &action_row.payload);

    // executed_at stamps authorization; rejected actions never carry one.
    let updated_action = sqlx::query_as::<_, ActionRow>(&format!(
        "UPDATE proposed_actions \
         SET status = $2, payload = $3, execution_result = $4, \
             executed_at = CASE WHEN $2 = 'executed' THEN now() ELSE executed_at END \
         WHERE id = $1 \
         RETURNING {SELECT_ACTION_COLUMNS}"
    ))
    .bind(action_id)
    .bind(new_status.as_str())
    .bind(&payload)
    .bind(&execution_result)
    .fetch_one(&mut *tx)
    .await?;

    let statuses: Vec<String> =
        sqlx::query_scalar("SELECT status FROM proposed_actions WHERE chain_id = $1")
            .bind(chain_id)
            .fetch_all(&mut *tx)
            .await?;
    let outcomes = statuses
        .iter()
        .map(|s| {
            ActionStatus::parse(s).ok_or_else(|| {
                AppError::Internal(format!("chain {} has action with status '{}'", chain_id, s))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let chain = match rollup(outcomes) {
        Some(terminal) => {
            let updated = sqlx::query_as::<_, ChainRow>(&format!(
                "UPDATE action_chains SET status = $2, approved_at = now() \
                 WHERE id = $1 AND status = 'pending' \
                 RETURNING {SELECT_CHAIN_COLUMNS}"
            ))
            .bind(chain_id)
            .bind(terminal.as_str())
            .fetch_optional(&mut *tx)
            .await?;
            match updated {
                Some(row) => row.into_chain()?,
                // Chain was already terminal: benign race, keep what is stored.
                None => chain_row.into_chain()?,
            }
        }
        None => chain_row.into_chain()?,
    };

    tx.commit().await?;

    let action = updated_action.into_action()?;
    if action.status == ActionStatus::Executed {
        state.executor.dispatch(&action);
    }
    if chain.status.is_terminal() {
        state.notifier.chain_resolved(&chain);
    }

    Ok((action, chain))
}

/// Optional request body for approve/reject decisions.
#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct ResolveRequest {
    /// Who made the decision; defaults to "user"
    #[serde(default)]
    pub actor: Option<String>,
}

/// Request body for modify-and-approve.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ModifyRequest {
    /// Shallow payload delta merged over the proposed payload;
    /// caller-supplied keys win. An empty delta executes the proposal
    /// unchanged.
    pub payload: serde_json::Value,
    #[serde(default)]
    pub actor: Option<String>,
}

/// Post-mutation view returned by every resolution endpoint: the action
/// as recorded plus the owning chain with its recomputed rollup.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ResolutionResponse {
    pub action: ProposedAction,
    pub chain: ActionChain,
}

/// Approve one proposed action
///
/// Marks the action executed and hands its payload to the execution
/// handler. Fails with 409 if the action was already resolved by
/// another reviewer.
#[utoipa::path(
    post,
    path = "/v1/approval-queue/{chain_id}/actions/{action_id}/approve",
    params(
        ("chain_id" = Uuid, Path, description = "Chain ID"),
        ("action_id" = Uuid, Path, description = "Action ID")
    ),
    request_body(content = ResolveRequest, description = "Optional actor attribution"),
    responses(
        (status = 200, description = "Action approved", body = ResolutionResponse),
        (status = 404, description = "Chain or action not found", body = ApiError),
        (status = 409, description = "Action already resolved", body = ApiError)
    ),
    tag = "resolution"
)]
pub async fn approve_action(
    State(state): State<AppState>,
    Path((chain_id, action_id)): Path<(Uuid, Uuid)>,
    body: Option<Json<ResolveRequest>>,
) -> Result<Json<ResolutionResponse>, AppError> {
    let actor = actor_from(body.map(|Json(b)| b.actor).flatten());
    let (action, chain) =
        resolve_action(&state, chain_id, action_id, Decision::Approve, &actor).await?;
    Ok(Json(ResolutionResponse { action, chain }))
}

/// Modify an action's payload and approve it
///
/// The merged payload, not the original proposal, is what gets
/// executed; the original payload is preserved in execution_result.
#[utoipa::path(
    post,
    path = "/v1/approval-queue/{chain_id}/actions/{action_id}/modify",
    params(
        ("chain_id" = Uuid, Path, description = "Chain ID"),
        ("action_id" = Uuid, Path, description = "Action ID")
    ),
    request_body = ModifyRequest,
    responses(
        (status = 200, description = "Action modified and approved", body = ResolutionResponse),
        (status = 404, description = "Chain or action not found", body = ApiError),
        (status = 409, description = "Action already resolved", body = ApiError)
    ),
    tag = "resolution"
)]
pub async fn modify_action(
    State(state): State<AppState>,
    Path((chain_id, action_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<ModifyRequest>,
) -> Result<Json<ResolutionResponse>, AppError> {
    let actor = actor_from(req.actor);
    let (action, chain) = resolve_action(
        &state,
        chain_id,
        action_id,
        Decision::ModifyApprove(req.payload),
        &actor,
    )
    .await?;
    Ok(Json(ResolutionResponse { action, chain }))
}

/// Reject one proposed action
///
/// No execution side effect is dispatched for rejected actions.
#[utoipa::path(
    post,
    path = "/v1/approval-queue/{chain_id}/actions/{action_id}/reject",
    params(
        ("chain_id" = Uuid, Path, description = "Chain ID"),
        ("action_id" = Uuid, Path, description = "Action ID")
    ),
    request_body(content = ResolveRequest, description = "Optional actor attribution"),
    responses(
        (status = 200, description = "Action rejected", body = ResolutionResponse),
        (status = 404, description = "Chain or action not found", body = ApiError),
        (status = 409, description = "Action already resolved", body = ApiError)
    ),
    tag = "resolution"
)]
pub async fn reject_action(
    State(state): State<AppState>,
    Path((chain_id, action_id)): Path<(Uuid, Uuid)>,
    body: Option<Json<ResolveRequest>>,
) -> Result<Json<ResolutionResponse>, AppError> {
    let actor = actor_from(body.map(|Json(b)| b.actor).flatten());
    let (action, chain) =
        resolve_action(&state, chain_id, action_id, Decision::Reject, &actor).await?;
    Ok(Json(ResolutionResponse { action, chain }))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ChainApprovalResponse {
    pub chain: ActionChain,
    /// All actions after the bulk approval, in sequence_order
    pub actions: Vec<ProposedAction>,
    /// How many actions this call transitioned to executed
    pub actions_executed: usize,
}

/// Approve every pending action in a chain
///
/// Bulk convenience: each pending action follows the single-action
/// approve rule, then the chain resolves per the rollup. Fails with 409
/// if the chain is no longer pending.
#[utoipa::path(
    post,
    path = "/v1/approval-queue/{chain_id}/approve",
    params(("chain_id" = Uuid, Path, description = "Chain ID")),
    request_body(content = ResolveRequest, description = "Optional actor attribution"),
    responses(
        (status = 200, description = "Chain approved", body = ChainApprovalResponse),
        (status = 404, description = "Chain not found", body = ApiError),
        (status = 409, description = "Chain already resolved", body = ApiError)
    ),
    tag = "resolution"
)]
pub async fn approve_chain(
    State(state): State<AppState>,
    Path(chain_id): Path<Uuid>,
    body: Option<Json<ResolveRequest>>,
) -> Result<Json<ChainApprovalResponse>, AppError> {
    let actor = actor_from(body.map(|Json(b)| b.actor).flatten());

    let mut tx = state.db.begin().await?;

    let chain_row = sqlx::query_as::<_, ChainRow>(&format!(
        "SELECT {SELECT_CHAIN_COLUMNS} FROM action_chains WHERE id = $1 FOR UPDATE"
    ))
    .bind(chain_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound {
        entity: "chain",
        id: chain_id,
    })?;

    guard_pending("chain", chain_id, &chain_row.status)?;

    let executed_rows = sqlx::query_as::<_, ActionRow>(&format!(
        "UPDATE proposed_actions \
         SET status = 'executed', executed_at = now(), execution_result = $2 \
         WHERE chain_id = $1 AND status = 'pending' \
         RETURNING {SELECT_ACTION_COLUMNS}"
    ))
    .bind(chain_id)
    .bind(serde_json::json!({ "approved_by": actor }))
    .fetch_all(&mut *tx)
    .await?;
    let executed_ids: Vec<Uuid> = executed_rows.iter().map(|r| r.id).collect();
    let actions_executed = executed_ids.len();

    let statuses: Vec<String> =
        sqlx::query_scalar("SELECT status FROM proposed_actions WHERE chain_id = $1")
            .bind(chain_id)
            .fetch_all(&mut *tx)
            .await?;
    let outcomes = statuses
        .iter()
        .map(|s| {
            ActionStatus::parse(s).ok_or_else(|| {
                AppError::Internal(format!("chain {} has action with status '{}'", chain_id, s))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    // Previously rejected actions keep their outcome, so bulk approval
    // of a partially rejected chain rolls up to partially_approved.
    let chain = match rollup(outcomes) {
        Some(terminal) => {
            let row = sqlx::query_as::<_, ChainRow>(&format!(
                "UPDATE action_chains SET status = $2, approved_at = now() \
                 WHERE id = $1 AND status = 'pending' \
                 RETURNING {SELECT_CHAIN_COLUMNS}"
            ))
            .bind(chain_id)
            .bind(terminal.as_str())
            .fetch_optional(&mut *tx)
            .await?;
            match row {
                Some(row) => row.into_chain()?,
                None => chain_row.into_chain()?,
            }
        }
        None => chain_row.into_chain()?,
    };

    let action_rows = sqlx::query_as::<_, ActionRow>(&format!(
        "SELECT {SELECT_ACTION_COLUMNS} FROM proposed_actions \
         WHERE chain_id = $1 ORDER BY sequence_order ASC"
    ))
    .bind(chain_id)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    let actions = action_rows
        .into_iter()
        .map(|r| r.into_action())
        .collect::<Result<Vec<_>, _>>()?;

    for action in &actions {
        if executed_ids.contains(&action.id) {
            state.executor.dispatch(action);
        }
    }
    if chain.status.is_terminal() {
        state.notifier.chain_resolved(&chain);
    }

    Ok(Json(ChainApprovalResponse {
        chain,
        actions,
        actions_executed,
    }))
}

fn actor_from(actor: Option<String>) -> String {
    match actor {
        Some(a) if !a.is_empty() => a,
        _ => DEFAULT_ACTOR.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn approving_records_the_actor_and_keeps_the_payload() {
        let payload = json!({ "action": "draft email", "priority": "high" });
        let (status, executed, result) = apply_decision(&Decision::Approve, "partner", &payload);
        assert_eq!(status, ActionStatus::Executed);
        assert_eq!(executed, payload);
        assert_eq!(result, json!({ "approved_by": "partner" }));
    }

    #[test]
    fn modify_with_empty_delta_executes_the_original_payload() {
        let payload = json!({ "action": "update checklist", "priority": "normal" });
        let (status, executed, result) =
            apply_decision(&Decision::ModifyApprove(json!({})), "partner", &payload);
        assert_eq!(status, ActionStatus::Executed);
        assert_eq!(executed, payload);
        assert_eq!(result["original_payload"], payload);
        assert_eq!(result["modified_by"], "partner");
    }

    #[test]
    fn modify_merges_shallowly_and_preserves_the_original() {
        let payload = json!({ "action": "draft email", "priority": "high" });
        let delta = json!({ "priority": "low", "cc": "partner" });
        let (_, executed, result) =
            apply_decision(&Decision::ModifyApprove(delta), "associate", &payload);
        assert_eq!(executed["action"], "draft email");
        assert_eq!(executed["priority"], "low");
        assert_eq!(executed["cc"], "partner");
        assert_eq!(result["original_payload"], payload);
    }

    #[test]
    fn rejecting_dispatches_nothing_and_records_the_actor() {
        let payload = json!({ "action": "notify team" });
        let (status, executed, result) = apply_decision(&Decision::Reject, "partner", &payload);
        assert_eq!(status, ActionStatus::Rejected);
        assert_eq!(executed, payload);
        assert_eq!(result, json!({ "rejected_by": "partner" }));
    }

    #[test]
    fn second_decision_on_a_resolved_action_conflicts() {
        let action_id = Uuid::now_v7();
        assert!(guard_pending("action", action_id, "pending").is_ok());

        // First decision executed the action; a second one must not
        // overwrite it.
        let err = guard_pending("action", action_id, "executed").unwrap_err();
        assert!(matches!(
            err,
            AppError::AlreadyResolved {
                entity: "action",
                status,
                ..
            } if status == "executed"
        ));

        let err = guard_pending("action", action_id, "rejected").unwrap_err();
        assert!(matches!(err, AppError::AlreadyResolved { .. }));
    }

    #[test]
    fn bulk_approval_of_a_terminal_chain_conflicts() {
        let chain_id = Uuid::now_v7();
        let err = guard_pending("chain", chain_id, "approved").unwrap_err();
        assert!(matches!(
            err,
            AppError::AlreadyResolved {
                entity: "chain",
                status,
                ..
            } if status == "approved"
        ));
    }

    #[test]
    fn missing_or_empty_actor_defaults_to_user() {
        assert_eq!(actor_from(None), "user");
        assert_eq!(actor_from(Some(String::new())), "user");
        assert_eq!(actor_from(Some("partner".to_string())), "partner");
    }
}
