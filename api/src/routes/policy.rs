use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use uuid::Uuid;

use dealflow_core::error::ApiError;
use dealflow_core::policy::ApprovalPolicy;

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/deals/{deal_id}/approval-policy",
            get(get_deal_policy).put(put_deal_policy),
        )
        .route("/v1/approval-policy/defaults", get(get_default_policy))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PolicyResponse {
    pub deal_id: Uuid,
    pub policy: ApprovalPolicy,
    /// True when no valid per-deal policy is configured and the system
    /// default is in effect
    pub is_default: bool,
}

/// Fetch the approval policy in effect for a deal
///
/// Falls back to the system default when the deal has none configured
/// or its stored document is malformed.
#[utoipa::path(
    get,
    path = "/v1/deals/{deal_id}/approval-policy",
    params(("deal_id" = Uuid, Path, description = "Deal ID")),
    responses(
        (status = 200, description = "Policy in effect", body = PolicyResponse)
    ),
    tag = "policy"
)]
pub async fn get_deal_policy(
    State(state): State<AppState>,
    Path(deal_id): Path<Uuid>,
) -> Result<Json<PolicyResponse>, AppError> {
    let doc: Option<serde_json::Value> = sqlx::query_scalar(
        "SELECT policy FROM approval_policies WHERE deal_id = $1 AND is_active = TRUE",
    )
    .bind(deal_id)
    .fetch_optional(&state.db)
    .await?;

    let (policy, is_default) = match doc {
        None => (ApprovalPolicy::default(), true),
        Some(doc) => match ApprovalPolicy::parse(&doc) {
            Ok(policy) => (policy, false),
            Err(err) => {
                tracing::warn!(
                    deal_id = %deal_id,
                    error = %err,
                    "invalid stored approval policy, serving default"
                );
                (ApprovalPolicy::default(), true)
            }
        },
    };

    Ok(Json(PolicyResponse {
        deal_id,
        policy,
        is_default,
    }))
}

/// Replace a deal's approval policy
///
/// The document is validated before it is stored; a policy with no
/// thresholds or out-of-range values is rejected. Edits apply to events
/// emitted after this call — evaluation of any in-flight event uses the
/// policy read at its generation time.
#[utoipa::path(
    put,
    path = "/v1/deals/{deal_id}/approval-policy",
    params(("deal_id" = Uuid, Path, description = "Deal ID")),
    request_body = ApprovalPolicy,
    responses(
        (status = 200, description = "Policy stored", body = PolicyResponse),
        (status = 400, description = "Malformed policy", body = ApiError)
    ),
    tag = "policy"
)]
pub async fn put_deal_policy(
    State(state): State<AppState>,
    Path(deal_id): Path<Uuid>,
    Json(policy): Json<ApprovalPolicy>,
) -> Result<Json<PolicyResponse>, AppError> {
    policy.validate().map_err(|err| AppError::InvalidPolicy {
        message: err.to_string(),
    })?;

    let doc = serde_json::to_value(&policy)
        .map_err(|e| AppError::Internal(format!("failed to serialize policy: {}", e)))?;

    sqlx::query(
        "INSERT INTO approval_policies (id, deal_id, policy, is_active) \
         VALUES ($1, $2, $3, TRUE) \
         ON CONFLICT (deal_id) \
         DO UPDATE SET policy = EXCLUDED.policy, is_active = TRUE, updated_at = now()",
    )
    .bind(Uuid::now_v7())
    .bind(deal_id)
    .bind(&doc)
    .execute(&state.db)
    .await?;

    Ok(Json(PolicyResponse {
        deal_id,
        policy,
        is_default: false,
    }))
}

/// The built-in default approval policy
#[utoipa::path(
    get,
    path = "/v1/approval-policy/defaults",
    responses(
        (status = 200, description = "System default policy", body = ApprovalPolicy)
    ),
    tag = "policy"
)]
pub async fn get_default_policy() -> Json<ApprovalPolicy> {
    Json(ApprovalPolicy::default())
}
