use chrono::{DateTime, Utc};
use uuid::Uuid;

use dealflow_core::chains::{ActionChain, ActionStatus, ChainStatus, ProposedAction};
use dealflow_core::events::PropagationEvent;
use dealflow_core::policy::{ApprovalPolicy, Tier};

use crate::error::AppError;

/// sqlx row mapping for action_chains
#[derive(Debug, sqlx::FromRow)]
pub struct ChainRow {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub trigger_event_id: Option<Uuid>,
    pub summary: String,
    pub significance: f64,
    pub approval_tier: i32,
    pub status: String,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ChainRow {
    pub fn into_chain(self) -> Result<ActionChain, AppError> {
        let status = ChainStatus::parse(&self.status).ok_or_else(|| {
            AppError::Internal(format!("chain {} has unknown status '{}'", self.id, self.status))
        })?;
        let approval_tier = Tier::from_i32(self.approval_tier).map_err(AppError::Internal)?;
        Ok(ActionChain {
            id: self.id,
            deal_id: self.deal_id,
            trigger_event_id: self.trigger_event_id,
            summary: self.summary,
            significance: self.significance,
            approval_tier,
            status,
            approved_at: self.approved_at,
            created_at: self.created_at,
        })
    }
}

/// sqlx row mapping for proposed_actions
#[derive(Debug, sqlx::FromRow)]
pub struct ActionRow {
    pub id: Uuid,
    pub chain_id: Uuid,
    pub sequence_order: i32,
    pub action_type: String,
    pub target_entity_type: String,
    pub payload: serde_json::Value,
    pub preview: serde_json::Value,
    pub status: String,
    pub execution_result: Option<serde_json::Value>,
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ActionRow {
    pub fn into_action(self) -> Result<ProposedAction, AppError> {
        let status = ActionStatus::parse(&self.status).ok_or_else(|| {
            AppError::Internal(format!(
                "action {} has unknown status '{}'",
                self.id, self.status
            ))
        })?;
        Ok(ProposedAction {
            id: self.id,
            chain_id: self.chain_id,
            sequence_order: self.sequence_order,
            action_type: self.action_type,
            target_entity_type: self.target_entity_type,
            payload: self.payload,
            preview: self.preview,
            status,
            execution_result: self.execution_result,
            executed_at: self.executed_at,
            created_at: self.created_at,
        })
    }
}

/// sqlx row mapping for propagation_events
#[derive(Debug, sqlx::FromRow)]
pub struct EventRow {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub event_type: String,
    pub source_entity_type: String,
    pub source_entity_id: Uuid,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub chain_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl EventRow {
    pub fn into_event(self) -> PropagationEvent {
        PropagationEvent {
            id: self.id,
            deal_id: self.deal_id,
            event_type: self.event_type,
            source_entity_type: self.source_entity_type,
            source_entity_id: self.source_entity_id,
            payload: self.payload,
            processed: self.processed,
            processed_at: self.processed_at,
            chain_id: self.chain_id,
            created_at: self.created_at,
        }
    }
}

pub const SELECT_CHAIN_COLUMNS: &str = "id, deal_id, trigger_event_id, summary, significance, \
     approval_tier, status, approved_at, created_at";

pub const SELECT_ACTION_COLUMNS: &str = "id, chain_id, sequence_order, action_type, \
     target_entity_type, payload, preview, status, execution_result, executed_at, created_at";

pub const SELECT_EVENT_COLUMNS: &str = "id, deal_id, event_type, source_entity_type, \
     source_entity_id, payload, processed, processed_at, chain_id, created_at";

/// Load the active approval policy for a deal. A missing or malformed
/// policy document falls back to the system default rather than failing
/// the caller — an unreadable policy must never block generation.
pub async fn load_policy(
    executor: impl sqlx::PgExecutor<'_>,
    deal_id: Uuid,
) -> Result<ApprovalPolicy, AppError> {
    let doc: Option<serde_json::Value> = sqlx::query_scalar(
        "SELECT policy FROM approval_policies WHERE deal_id = $1 AND is_active = TRUE",
    )
    .bind(deal_id)
    .fetch_optional(executor)
    .await?;

    match doc {
        None => Ok(ApprovalPolicy::default()),
        Some(doc) => match ApprovalPolicy::parse(&doc) {
            Ok(policy) => Ok(policy),
            Err(err) => {
                tracing::warn!(
                    deal_id = %deal_id,
                    error = %err,
                    "invalid approval policy, falling back to default"
                );
                Ok(ApprovalPolicy::default())
            }
        },
    }
}
