use serde::Serialize;
use utoipa::ToSchema;

use crate::policy::{ApprovalPolicy, Tier};

/// Classifier output: a normalized [0,1] risk/impact score and the
/// approval tier it maps to under the supplied policy.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct Classification {
    pub significance: f64,
    pub tier: Tier,
}

/// Base weight applied when neither the policy nor the built-in table
/// knows the event type.
const DEFAULT_BASE_WEIGHT: f64 = 0.3;

/// Built-in base weights per event type. A policy's `base_weights`
/// override these per deal.
const BASE_WEIGHTS: &[(&str, f64)] = &[
    ("dd.finding_confirmed", 0.55),
    ("deal.parameters_updated", 0.5),
    ("document.markup_received", 0.45),
    ("email.position_extracted", 0.4),
    ("negotiation.impasse_detected", 0.6),
    ("closing.condition_satisfied", 0.35),
    ("closing.blocking_issue_identified", 0.6),
    ("checklist.item_overdue", 0.3),
];

/// Additional weight when the payload flags a financial impact.
const FINANCIAL_IMPACT_WEIGHT: f64 = 0.15;
/// Additional weight when the action's effect is visible to the
/// counterparty or the client.
const COUNTERPARTY_VISIBLE_WEIGHT: f64 = 0.15;
/// Maximum weight contributed by monetary exposure; scales linearly up
/// to the policy's exposure ceiling.
const EXPOSURE_WEIGHT: f64 = 0.3;

/// Classify an event's significance and approval tier.
///
/// Pure — no I/O, no clock, no randomness — so chain generation stays
/// idempotent and classification is reproducible from (event, policy).
/// The score is the event-type base weight plus payload-derived risk
/// features, clamped to [0,1]; the tier comes from the policy's
/// threshold table (closed `>=` bounds, highest threshold first).
pub fn classify(
    event_type: &str,
    payload: &serde_json::Value,
    policy: &ApprovalPolicy,
) -> Classification {
    let base = policy
        .base_weights
        .get(event_type)
        .copied()
        .or_else(|| {
            BASE_WEIGHTS
                .iter()
                .find(|(t, _)| *t == event_type)
                .map(|(_, w)| *w)
        })
        .unwrap_or(DEFAULT_BASE_WEIGHT);

    let mut significance = base;

    if payload_flag(payload, "financial_impact") {
        significance += FINANCIAL_IMPACT_WEIGHT;
    }
    if payload_flag(payload, "counterparty_visible") {
        significance += COUNTERPARTY_VISIBLE_WEIGHT;
    }
    if let Some(exposure) = payload.get("monetary_exposure").and_then(|v| v.as_f64()) {
        let normalized = (exposure / policy.exposure_ceiling).clamp(0.0, 1.0);
        significance += EXPOSURE_WEIGHT * normalized;
    }

    let significance = significance.clamp(0.0, 1.0);

    Classification {
        significance,
        tier: policy.tier_for(significance),
    }
}

fn payload_flag(payload: &serde_json::Value, field: &str) -> bool {
    payload.get(field).and_then(|v| v.as_bool()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_event_type_scores_the_default_base_weight() {
        let policy = ApprovalPolicy::default();
        let c = classify("deal.status_changed", &json!({}), &policy);
        assert_eq!(c.significance, DEFAULT_BASE_WEIGHT);
        assert_eq!(c.tier, Tier::Autonomous);
    }

    #[test]
    fn risk_features_stack_on_the_base_weight() {
        let policy = ApprovalPolicy::default();
        let c = classify(
            "dd.finding_confirmed",
            &json!({ "financial_impact": true, "counterparty_visible": true }),
            &policy,
        );
        assert!((c.significance - 0.85).abs() < 1e-9);
        assert_eq!(c.tier, Tier::Review);
    }

    #[test]
    fn monetary_exposure_saturates_at_the_policy_ceiling() {
        let policy = ApprovalPolicy::default();
        let at_ceiling = classify(
            "checklist.item_overdue",
            &json!({ "monetary_exposure": policy.exposure_ceiling }),
            &policy,
        );
        let past_ceiling = classify(
            "checklist.item_overdue",
            &json!({ "monetary_exposure": policy.exposure_ceiling * 10.0 }),
            &policy,
        );
        assert_eq!(at_ceiling.significance, past_ceiling.significance);
        assert!((at_ceiling.significance - 0.6).abs() < 1e-9);
    }

    #[test]
    fn significance_is_clamped_to_one() {
        let policy = ApprovalPolicy::default();
        let c = classify(
            "negotiation.impasse_detected",
            &json!({
                "financial_impact": true,
                "counterparty_visible": true,
                "monetary_exposure": 1e12,
            }),
            &policy,
        );
        assert_eq!(c.significance, 1.0);
        assert_eq!(c.tier, Tier::Review);
    }

    #[test]
    fn score_exactly_at_a_threshold_takes_the_higher_tier() {
        let mut policy = ApprovalPolicy::default();
        // Pin the base weight so the score lands exactly on 0.70.
        policy
            .base_weights
            .insert("document.markup_received".to_string(), 0.7);
        let c = classify("document.markup_received", &json!({}), &policy);
        assert_eq!(c.significance, 0.7);
        assert_eq!(c.tier, Tier::Review);
    }

    #[test]
    fn policy_base_weight_overrides_the_builtin_table() {
        let mut policy = ApprovalPolicy::default();
        policy
            .base_weights
            .insert("checklist.item_overdue".to_string(), 0.9);
        let c = classify("checklist.item_overdue", &json!({}), &policy);
        assert_eq!(c.significance, 0.9);
        assert_eq!(c.tier, Tier::Review);
    }

    #[test]
    fn classification_returns_exactly_one_tier_across_the_range() {
        let policy = ApprovalPolicy::default();
        let mut last_significance = -1.0;
        for step in 0..=20 {
            let exposure = policy.exposure_ceiling * step as f64 / 20.0;
            let c = classify(
                "document.markup_received",
                &json!({ "monetary_exposure": exposure }),
                &policy,
            );
            // Higher exposure never lowers significance (monotone inputs).
            assert!(c.significance >= last_significance);
            last_significance = c.significance;
        }
    }
}
