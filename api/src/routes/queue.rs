use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dealflow_core::chains::{ActionChain, ProposedAction, queue_priority};
use dealflow_core::error::ApiError;
use dealflow_core::events::PropagationEvent;

use crate::error::AppError;
use crate::state::AppState;
use crate::store::{
    ActionRow, ChainRow, EventRow, SELECT_ACTION_COLUMNS, SELECT_CHAIN_COLUMNS,
    SELECT_EVENT_COLUMNS,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/approval-queue", get(list_queue))
        .route("/v1/approval-queue/stats", get(queue_stats))
        .route("/v1/approval-queue/{chain_id}", get(chain_detail))
}

/// Terminal chains considered for the latency average — only the most
/// recent resolutions, so the figure tracks current review behavior.
const RESOLUTION_SAMPLE: i64 = 50;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct QueuedChain {
    #[serde(flatten)]
    pub chain: ActionChain,
    /// Actions in sequence_order
    pub actions: Vec<ProposedAction>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct QueueResponse {
    pub chains: Vec<QueuedChain>,
    /// Total pending chains matching the filter, independent of paging
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListQueueParams {
    /// Filter by deal
    #[serde(default)]
    pub deal_id: Option<Uuid>,
    /// Maximum number of chains to return (default 50, max 200)
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

async fn attach_actions(
    db: &sqlx::PgPool,
    chains: Vec<ActionChain>,
) -> Result<Vec<QueuedChain>, AppError> {
    let ids: Vec<Uuid> = chains.iter().map(|c| c.id).collect();
    let rows = sqlx::query_as::<_, ActionRow>(&format!(
        "SELECT {SELECT_ACTION_COLUMNS} FROM proposed_actions \
         WHERE chain_id = ANY($1) ORDER BY chain_id, sequence_order ASC"
    ))
    .bind(&ids)
    .fetch_all(db)
    .await?;

    let mut by_chain: HashMap<Uuid, Vec<ProposedAction>> = HashMap::new();
    for row in rows {
        let action = row.into_action()?;
        by_chain.entry(action.chain_id).or_default().push(action);
    }

    Ok(chains
        .into_iter()
        .map(|chain| {
            let actions = by_chain.remove(&chain.id).unwrap_or_default();
            QueuedChain { chain, actions }
        })
        .collect())
}

/// List pending chains awaiting human decision
///
/// Ordered by significance descending, then creation time ascending, so
/// equally risky items resolve first-in-first-out and do not starve.
/// Tier-1 chains never enter the queue — they execute autonomously.
#[utoipa::path(
    get,
    path = "/v1/approval-queue",
    params(ListQueueParams),
    responses(
        (status = 200, description = "Pending chains in priority order", body = QueueResponse)
    ),
    tag = "approval-queue"
)]
pub async fn list_queue(
    State(state): State<AppState>,
    Query(params): Query<ListQueueParams>,
) -> Result<Json<QueueResponse>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let offset = params.offset.unwrap_or(0).max(0);

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM action_chains \
         WHERE status = 'pending' AND approval_tier >= 2 \
           AND ($1::uuid IS NULL OR deal_id = $1)",
    )
    .bind(params.deal_id)
    .fetch_one(&state.db)
    .await?;

    let rows = sqlx::query_as::<_, ChainRow>(&format!(
        "SELECT {SELECT_CHAIN_COLUMNS} FROM action_chains \
         WHERE status = 'pending' AND approval_tier >= 2 \
           AND ($1::uuid IS NULL OR deal_id = $1) \
         ORDER BY significance DESC, created_at ASC \
         LIMIT $2 OFFSET $3"
    ))
    .bind(params.deal_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db)
    .await?;

    let mut chains = rows
        .into_iter()
        .map(|r| r.into_chain())
        .collect::<Result<Vec<_>, _>>()?;
    // The SQL ORDER BY pages in queue order; queue_priority is the
    // canonical definition of that order and re-asserts it in the page.
    chains.sort_by(queue_priority);
    let chains = attach_actions(&state.db, chains).await?;

    Ok(Json(QueueResponse {
        chains,
        total,
        limit,
        offset,
    }))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct TierCounts {
    pub tier_1: i64,
    pub tier_2: i64,
    pub tier_3: i64,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct QueueStatsResponse {
    /// Pending chains across all tiers
    pub pending_count: i64,
    pub by_tier: TierCounts,
    /// Mean terminal-resolution latency (approved_at - created_at) over
    /// the most recently resolved chains; 0 when none have resolved yet
    pub avg_resolution_ms: i64,
    /// Size of the resolution sample behind avg_resolution_ms
    pub recently_resolved: i64,
}

/// Aggregate queue statistics
///
/// Tolerates an empty store: all aggregates are zero-valued when there
/// is no history yet.
#[utoipa::path(
    get,
    path = "/v1/approval-queue/stats",
    responses(
        (status = 200, description = "Queue statistics", body = QueueStatsResponse)
    ),
    tag = "approval-queue"
)]
pub async fn queue_stats(
    State(state): State<AppState>,
) -> Result<Json<QueueStatsResponse>, AppError> {
    let tier_rows: Vec<(i32, i64)> = sqlx::query_as(
        "SELECT approval_tier, COUNT(*) FROM action_chains \
         WHERE status = 'pending' GROUP BY approval_tier",
    )
    .fetch_all(&state.db)
    .await?;

    let mut by_tier = TierCounts {
        tier_1: 0,
        tier_2: 0,
        tier_3: 0,
    };
    for (tier, count) in &tier_rows {
        match tier {
            1 => by_tier.tier_1 = *count,
            2 => by_tier.tier_2 = *count,
            3 => by_tier.tier_3 = *count,
            _ => {}
        }
    }
    let pending_count = by_tier.tier_1 + by_tier.tier_2 + by_tier.tier_3;

    // Latency is measured only over chains that reached a terminal
    // state; approved_at is the terminal timestamp whatever the outcome.
    let resolved: Vec<(chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>)> =
        sqlx::query_as(
            "SELECT created_at, approved_at FROM action_chains \
             WHERE status <> 'pending' AND approved_at IS NOT NULL \
             ORDER BY approved_at DESC LIMIT $1",
        )
        .bind(RESOLUTION_SAMPLE)
        .fetch_all(&state.db)
        .await?;

    let recently_resolved = resolved.len() as i64;
    let avg_resolution_ms = if resolved.is_empty() {
        0
    } else {
        let total_ms: i64 = resolved
            .iter()
            .map(|(created, approved)| (*approved - *created).num_milliseconds())
            .sum();
        total_ms / recently_resolved
    };

    Ok(Json(QueueStatsResponse {
        pending_count,
        by_tier,
        avg_resolution_ms,
        recently_resolved,
    }))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ChainDetailResponse {
    pub chain: ActionChain,
    /// Actions in sequence_order
    pub actions: Vec<ProposedAction>,
    /// The event that produced this chain, if it was event-triggered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_event: Option<PropagationEvent>,
}

/// Fetch one chain with its actions and originating event
#[utoipa::path(
    get,
    path = "/v1/approval-queue/{chain_id}",
    params(("chain_id" = Uuid, Path, description = "Chain ID")),
    responses(
        (status = 200, description = "Chain detail", body = ChainDetailResponse),
        (status = 404, description = "Chain not found", body = ApiError)
    ),
    tag = "approval-queue"
)]
pub async fn chain_detail(
    State(state): State<AppState>,
    Path(chain_id): Path<Uuid>,
) -> Result<Json<ChainDetailResponse>, AppError> {
    let chain_row = sqlx::query_as::<_, ChainRow>(&format!(
        "SELECT {SELECT_CHAIN_COLUMNS} FROM action_chains WHERE id = $1"
    ))
    .bind(chain_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound {
        entity: "chain",
        id: chain_id,
    })?;
    let chain = chain_row.into_chain()?;

    let action_rows = sqlx::query_as::<_, ActionRow>(&format!(
        "SELECT {SELECT_ACTION_COLUMNS} FROM proposed_actions \
         WHERE chain_id = $1 ORDER BY sequence_order ASC"
    ))
    .bind(chain_id)
    .fetch_all(&state.db)
    .await?;
    let actions = action_rows
        .into_iter()
        .map(|r| r.into_action())
        .collect::<Result<Vec<_>, _>>()?;

    let trigger_event = match chain.trigger_event_id {
        None => None,
        Some(event_id) => sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {SELECT_EVENT_COLUMNS} FROM propagation_events WHERE id = $1"
        ))
        .bind(event_id)
        .fetch_optional(&state.db)
        .await?
        .map(|r| r.into_event()),
    };

    Ok(Json(ChainDetailResponse {
        chain,
        actions,
        trigger_event,
    }))
}
