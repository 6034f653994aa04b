use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::policy::Tier;

/// Terminal-or-pending status of a chain. Pending until every owned
/// action is terminal; computed once from the action outcomes and never
/// recomputed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    Pending,
    Approved,
    Rejected,
    PartiallyApproved,
}

impl ChainStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChainStatus::Pending => "pending",
            ChainStatus::Approved => "approved",
            ChainStatus::Rejected => "rejected",
            ChainStatus::PartiallyApproved => "partially_approved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ChainStatus::Pending),
            "approved" => Some(ChainStatus::Approved),
            "rejected" => Some(ChainStatus::Rejected),
            "partially_approved" => Some(ChainStatus::PartiallyApproved),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != ChainStatus::Pending
    }
}

/// Status of a single proposed action. pending → executed or
/// pending → rejected, exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Executed,
    Rejected,
}

impl ActionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Executed => "executed",
            ActionStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ActionStatus::Pending),
            "executed" => Some(ActionStatus::Executed),
            "rejected" => Some(ActionStatus::Rejected),
            _ => None,
        }
    }
}

/// A chain of proposed actions — the unit of human review.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ActionChain {
    pub id: Uuid,
    pub deal_id: Uuid,
    /// Event that triggered this chain. None for manually created chains.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_event_id: Option<Uuid>,
    pub summary: String,
    pub significance: f64,
    pub approval_tier: Tier,
    pub status: ChainStatus,
    /// Terminal-resolution timestamp, stamped whatever the outcome —
    /// approved, rejected, or partially approved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A single proposed action owned by a chain.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProposedAction {
    pub id: Uuid,
    pub chain_id: Uuid,
    /// Intra-chain ordering, strictly increasing from 0
    pub sequence_order: i32,
    pub action_type: String,
    pub target_entity_type: String,
    /// Opaque instructions for the execution side-effect handler
    pub payload: serde_json::Value,
    /// Human-readable title/description shown in the review queue
    pub preview: serde_json::Value,
    pub status: ActionStatus,
    /// Who resolved the action and, for modifications, the original payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Review-queue priority: most significant first, ties broken by
/// creation time so equally risky chains resolve first-in-first-out.
/// The queue listing pages in this order.
pub fn queue_priority(a: &ActionChain, b: &ActionChain) -> std::cmp::Ordering {
    b.significance
        .partial_cmp(&a.significance)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.created_at.cmp(&b.created_at))
}

/// Chain rollup: the deterministic function from a chain's action
/// outcomes to its terminal status.
///
/// Returns None while any action is still pending (or for an empty set —
/// a chain with zero actions is never persisted). Otherwise: all
/// executed → approved, all rejected → rejected, mixed → partially
/// approved. Depends only on the multiset of outcomes, not on the order
/// they were resolved in.
pub fn rollup<I>(statuses: I) -> Option<ChainStatus>
where
    I: IntoIterator<Item = ActionStatus>,
{
    let mut executed = 0usize;
    let mut rejected = 0usize;
    for status in statuses {
        match status {
            ActionStatus::Pending => return None,
            ActionStatus::Executed => executed += 1,
            ActionStatus::Rejected => rejected += 1,
        }
    }
    match (executed, rejected) {
        (0, 0) => None,
        (_, 0) => Some(ChainStatus::Approved),
        (0, _) => Some(ChainStatus::Rejected),
        (_, _) => Some(ChainStatus::PartiallyApproved),
    }
}

/// Shallow-merge a modification delta into an action payload. Top-level
/// keys from the delta win; everything else is carried over unchanged.
/// A non-object delta replaces the payload wholesale.
pub fn merge_payload(
    original: &serde_json::Value,
    delta: &serde_json::Value,
) -> serde_json::Value {
    match (original.as_object(), delta.as_object()) {
        (Some(orig), Some(overrides)) => {
            let mut merged = orig.clone();
            for (key, value) in overrides {
                merged.insert(key.clone(), value.clone());
            }
            serde_json::Value::Object(merged)
        }
        _ => {
            if delta.is_null() {
                original.clone()
            } else {
                delta.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ActionStatus::{Executed, Pending, Rejected};

    #[test]
    fn rollup_holds_while_any_action_pending() {
        assert_eq!(rollup([Executed, Pending, Rejected]), None);
        assert_eq!(rollup([Pending]), None);
    }

    #[test]
    fn rollup_of_empty_set_is_none() {
        assert_eq!(rollup([]), None);
    }

    #[test]
    fn rollup_all_executed_is_approved() {
        assert_eq!(rollup([Executed, Executed]), Some(ChainStatus::Approved));
    }

    #[test]
    fn rollup_all_rejected_is_rejected() {
        assert_eq!(rollup([Rejected, Rejected]), Some(ChainStatus::Rejected));
    }

    #[test]
    fn rollup_mixed_outcomes_is_partially_approved() {
        assert_eq!(
            rollup([Executed, Rejected, Executed]),
            Some(ChainStatus::PartiallyApproved)
        );
    }

    #[test]
    fn rollup_is_permutation_invariant() {
        let outcomes = [Executed, Rejected, Executed, Rejected, Executed];
        let expected = rollup(outcomes);
        // Rotate through every cyclic ordering of the same multiset.
        for start in 0..outcomes.len() {
            let mut rotated = outcomes;
            rotated.rotate_left(start);
            assert_eq!(rollup(rotated), expected);
        }
    }

    fn queued_chain(significance: f64, tier: Tier, created_at: DateTime<Utc>) -> ActionChain {
        ActionChain {
            id: Uuid::now_v7(),
            deal_id: Uuid::now_v7(),
            trigger_event_id: None,
            summary: "review markup".to_string(),
            significance,
            approval_tier: tier,
            status: ChainStatus::Pending,
            approved_at: None,
            created_at,
        }
    }

    #[test]
    fn queue_priority_orders_by_significance_then_fifo() {
        use chrono::TimeZone;

        let t1 = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        let t3 = Utc.with_ymd_and_hms(2026, 3, 2, 11, 0, 0).unwrap();

        let oldest_high = queued_chain(0.9, Tier::Review, t1);
        let newer_high = queued_chain(0.9, Tier::Review, t2);
        let low = queued_chain(0.3, Tier::Approve, t3);

        // Highest significance first; the 0.9 tie resolves oldest-first.
        let mut queue = vec![low.clone(), newer_high.clone(), oldest_high.clone()];
        queue.sort_by(queue_priority);
        let ids: Vec<Uuid> = queue.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![oldest_high.id, newer_high.id, low.id]);
    }

    #[test]
    fn merge_with_empty_delta_keeps_original_payload() {
        let original = serde_json::json!({ "action": "draft email", "priority": "high" });
        let merged = merge_payload(&original, &serde_json::json!({}));
        assert_eq!(merged, original);
    }

    #[test]
    fn merge_caller_keys_win_shallowly() {
        let original = serde_json::json!({
            "action": "draft email",
            "priority": "high",
            "recipients": { "to": "client" },
        });
        let delta = serde_json::json!({
            "priority": "low",
            "recipients": { "cc": "partner" },
        });
        let merged = merge_payload(&original, &delta);
        assert_eq!(merged["action"], "draft email");
        assert_eq!(merged["priority"], "low");
        // Shallow merge: nested objects are replaced, not merged.
        assert_eq!(merged["recipients"], serde_json::json!({ "cc": "partner" }));
    }

    #[test]
    fn merge_null_delta_keeps_original() {
        let original = serde_json::json!({ "action": "update checklist" });
        assert_eq!(merge_payload(&original, &serde_json::Value::Null), original);
    }

    #[test]
    fn chain_status_string_round_trip() {
        for status in [
            ChainStatus::Pending,
            ChainStatus::Approved,
            ChainStatus::Rejected,
            ChainStatus::PartiallyApproved,
        ] {
            assert_eq!(ChainStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ChainStatus::parse("expired"), None);
    }
}
