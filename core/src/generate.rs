use serde::Serialize;
use utoipa::ToSchema;

use crate::classify::{Classification, classify};
use crate::policy::{ApprovalPolicy, Tier};

/// Relative urgency of a proposed action, carried in its payload for the
/// execution handler and the review queue preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Immediate,
    High,
    Normal,
    Low,
}

/// A template for one proposed action, matched by event type.
struct ActionBlueprint {
    action_type: &'static str,
    target: &'static str,
    description: &'static str,
    priority: Priority,
}

/// Predicate over the event payload gating a blueprint set.
enum Condition {
    /// payload[field] == true
    Truthy(&'static str),
}

impl Condition {
    fn matches(&self, payload: &serde_json::Value) -> bool {
        match self {
            Condition::Truthy(field) => payload
                .get(*field)
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        }
    }
}

struct BlueprintMap {
    trigger: &'static str,
    conditions: &'static [Condition],
    actions: &'static [ActionBlueprint],
}

/// Event type → ordered proposed actions. An event type absent from this
/// table produces no chain.
static BLUEPRINT_MAPS: &[BlueprintMap] = &[
    BlueprintMap {
        trigger: "dd.finding_confirmed",
        conditions: &[],
        actions: &[
            ActionBlueprint {
                action_type: "document_modification",
                target: "document",
                description: "Update relevant document sections based on DD finding",
                priority: Priority::High,
            },
            ActionBlueprint {
                action_type: "disclosure_schedule_update",
                target: "disclosure_schedule",
                description: "Add or update disclosure schedule entry for confirmed finding",
                priority: Priority::High,
            },
            ActionBlueprint {
                action_type: "notification",
                target: "deal_team",
                description: "Notify deal team of confirmed DD finding",
                priority: Priority::Immediate,
            },
            ActionBlueprint {
                action_type: "client_communication",
                target: "client",
                description: "Draft client communication regarding DD finding impact",
                priority: Priority::High,
            },
        ],
    },
    BlueprintMap {
        trigger: "document.markup_received",
        conditions: &[],
        actions: &[
            ActionBlueprint {
                action_type: "analysis",
                target: "document",
                description: "Analyze markup changes and identify key modifications",
                priority: Priority::Immediate,
            },
            ActionBlueprint {
                action_type: "negotiation_update",
                target: "negotiation",
                description: "Update negotiation positions based on markup",
                priority: Priority::High,
            },
            ActionBlueprint {
                action_type: "checklist_status_update",
                target: "checklist_item",
                description: "Update checklist item status based on markup receipt",
                priority: Priority::Normal,
            },
        ],
    },
    BlueprintMap {
        trigger: "email.position_extracted",
        conditions: &[],
        actions: &[
            ActionBlueprint {
                action_type: "negotiation_update",
                target: "negotiation",
                description: "Update negotiation tracker with extracted position",
                priority: Priority::High,
            },
            ActionBlueprint {
                action_type: "agent_evaluation",
                target: "agent",
                description: "Evaluate strategic implications of extracted position",
                priority: Priority::Normal,
            },
        ],
    },
    BlueprintMap {
        trigger: "checklist.item_overdue",
        conditions: &[],
        actions: &[
            ActionBlueprint {
                action_type: "notification",
                target: "deal_team",
                description: "Send overdue notification to responsible party",
                priority: Priority::Immediate,
            },
            ActionBlueprint {
                action_type: "critical_path_update",
                target: "deal",
                description: "Recalculate critical path considering overdue item",
                priority: Priority::High,
            },
        ],
    },
    BlueprintMap {
        trigger: "deal.parameters_updated",
        conditions: &[],
        actions: &[
            ActionBlueprint {
                action_type: "checklist_regeneration",
                target: "checklist",
                description: "Regenerate checklist items based on updated parameters",
                priority: Priority::High,
            },
            ActionBlueprint {
                action_type: "document_review",
                target: "document",
                description: "Flag documents that may need revision based on parameter changes",
                priority: Priority::Normal,
            },
        ],
    },
    BlueprintMap {
        trigger: "closing.condition_satisfied",
        conditions: &[],
        actions: &[
            ActionBlueprint {
                action_type: "closing_checklist_update",
                target: "closing_checklist",
                description: "Mark closing condition as satisfied in closing checklist",
                priority: Priority::Immediate,
            },
            ActionBlueprint {
                action_type: "closing_readiness_check",
                target: "deal",
                description: "Evaluate overall closing readiness after condition satisfied",
                priority: Priority::High,
            },
        ],
    },
    BlueprintMap {
        trigger: "negotiation.impasse_detected",
        conditions: &[Condition::Truthy("strategic")],
        actions: &[ActionBlueprint {
            action_type: "client_communication",
            target: "client",
            description: "Draft client briefing on the negotiation impasse",
            priority: Priority::High,
        }],
    },
];

const SUMMARY_MAX_CHARS: usize = 500;

/// An unpersisted chain plus its actions, ready to be written in one
/// transaction. sequence_order is strictly increasing from 0.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChainDraft {
    pub summary: String,
    pub significance: f64,
    pub approval_tier: Tier,
    pub actions: Vec<ActionDraft>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ActionDraft {
    pub sequence_order: i32,
    pub action_type: String,
    pub target_entity_type: String,
    pub payload: serde_json::Value,
    pub preview: serde_json::Value,
}

/// Materialize the proposed actions for an event, or None when the event
/// type has no matching blueprints (an explicit no-action decision —
/// the caller marks the event processed without a chain; this function
/// itself never touches the event).
pub fn draft(
    event_type: &str,
    payload: &serde_json::Value,
    policy: &ApprovalPolicy,
) -> Option<ChainDraft> {
    let blueprints: Vec<&ActionBlueprint> = BLUEPRINT_MAPS
        .iter()
        .filter(|map| map.trigger == event_type)
        .filter(|map| map.conditions.iter().all(|c| c.matches(payload)))
        .flat_map(|map| map.actions.iter())
        .collect();

    if blueprints.is_empty() {
        return None;
    }

    let Classification {
        significance,
        tier,
    } = classify(event_type, payload, policy);

    let actions: Vec<ActionDraft> = blueprints
        .iter()
        .enumerate()
        .map(|(index, bp)| ActionDraft {
            sequence_order: index as i32,
            action_type: bp.action_type.to_string(),
            target_entity_type: bp.target.to_string(),
            payload: serde_json::json!({
                "action": bp.description,
                "priority": bp.priority,
            }),
            preview: serde_json::json!({
                "title": format!("{}: {}", bp.action_type, truncate(bp.description, 80)),
                "description": bp.description,
            }),
        })
        .collect();

    let summary = truncate(
        &blueprints
            .iter()
            .map(|bp| bp.description)
            .collect::<Vec<_>>()
            .join("; "),
        SUMMARY_MAX_CHARS,
    )
    .to_string();

    Some(ChainDraft {
        summary,
        significance,
        approval_tier: tier,
        actions,
    })
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &s[..byte_index],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_trigger_drafts_ordered_actions_from_zero() {
        let policy = ApprovalPolicy::default();
        let draft = draft("dd.finding_confirmed", &json!({}), &policy).unwrap();
        assert_eq!(draft.actions.len(), 4);
        for (i, action) in draft.actions.iter().enumerate() {
            assert_eq!(action.sequence_order, i as i32);
        }
        assert_eq!(draft.actions[0].action_type, "document_modification");
        assert!(draft.summary.contains("DD finding"));
    }

    #[test]
    fn draft_carries_the_classifier_output() {
        let policy = ApprovalPolicy::default();
        let payload = json!({ "financial_impact": true, "counterparty_visible": true });
        let classification = classify("dd.finding_confirmed", &payload, &policy);
        let draft = draft("dd.finding_confirmed", &payload, &policy).unwrap();
        assert_eq!(draft.significance, classification.significance);
        assert_eq!(draft.approval_tier, classification.tier);
    }

    #[test]
    fn unknown_trigger_drafts_no_chain() {
        let policy = ApprovalPolicy::default();
        assert!(draft("deal.status_changed", &json!({}), &policy).is_none());
    }

    #[test]
    fn conditional_blueprint_requires_its_payload_flag() {
        let policy = ApprovalPolicy::default();
        assert!(draft("negotiation.impasse_detected", &json!({}), &policy).is_none());
        let with_flag = draft(
            "negotiation.impasse_detected",
            &json!({ "strategic": true }),
            &policy,
        )
        .unwrap();
        assert_eq!(with_flag.actions.len(), 1);
        assert_eq!(with_flag.actions[0].action_type, "client_communication");
    }

    #[test]
    fn action_payload_carries_description_and_priority() {
        let policy = ApprovalPolicy::default();
        let draft = draft("checklist.item_overdue", &json!({}), &policy).unwrap();
        let payload = &draft.actions[0].payload;
        assert_eq!(payload["priority"], "immediate");
        assert!(payload["action"].as_str().unwrap().contains("overdue"));
    }
}
