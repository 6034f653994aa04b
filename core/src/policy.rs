use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Approval tier for a chain of proposed actions.
///
/// Tier 1 executes autonomously, tier 2 needs a one-tap human approval,
/// tier 3 needs full human review with modification rights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "u8", into = "u8")]
pub enum Tier {
    Autonomous = 1,
    Approve = 2,
    Review = 3,
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> u8 {
        tier as u8
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Tier::Autonomous),
            2 => Ok(Tier::Approve),
            3 => Ok(Tier::Review),
            other => Err(format!("approval tier must be 1, 2, or 3, got {}", other)),
        }
    }
}

impl Tier {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Result<Self, String> {
        u8::try_from(value)
            .map_err(|_| format!("approval tier out of range: {}", value))
            .and_then(Tier::try_from)
    }

    /// Tiers 2 and 3 wait in the review queue for a human decision;
    /// tier 1 executes autonomously and is never queued or notified.
    pub fn needs_human(self) -> bool {
        self >= Tier::Approve
    }
}

/// One row of the tier table: significance at or above `min_significance`
/// maps to `tier`, unless a higher threshold also matches.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TierThreshold {
    pub tier: Tier,
    pub min_significance: f64,
}

/// Per-deal approval policy. Passed explicitly into classification —
/// never read from ambient configuration — so a classification is
/// reproducible from (event, policy) alone.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApprovalPolicy {
    pub name: String,
    /// Tier thresholds, evaluated highest `min_significance` first.
    pub thresholds: Vec<TierThreshold>,
    /// Per-event-type base-weight overrides for the classifier, in [0,1].
    #[serde(default)]
    pub base_weights: BTreeMap<String, f64>,
    /// Monetary exposure (in the deal currency) at which the exposure
    /// risk feature saturates.
    #[serde(default = "default_exposure_ceiling")]
    pub exposure_ceiling: f64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_exposure_ceiling() -> f64 {
    5_000_000.0
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("policy has no tier thresholds")]
    EmptyThresholds,
    #[error("threshold for tier {tier:?} is out of range: {value}")]
    ThresholdOutOfRange { tier: Tier, value: f64 },
    #[error(
        "tier {higher:?} threshold {higher_min} must exceed tier {lower:?} threshold {lower_min}"
    )]
    TierOrderMismatch {
        lower: Tier,
        lower_min: f64,
        higher: Tier,
        higher_min: f64,
    },
    #[error("base weight for '{event_type}' is out of range: {value}")]
    BaseWeightOutOfRange { event_type: String, value: f64 },
    #[error("exposure ceiling must be positive, got {0}")]
    NonPositiveCeiling(f64),
    #[error("policy document is malformed: {0}")]
    Malformed(String),
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        ApprovalPolicy {
            name: "Default Partner Policy".to_string(),
            thresholds: vec![
                TierThreshold {
                    tier: Tier::Review,
                    min_significance: 0.7,
                },
                TierThreshold {
                    tier: Tier::Approve,
                    min_significance: 0.4,
                },
            ],
            base_weights: BTreeMap::new(),
            exposure_ceiling: default_exposure_ceiling(),
            is_active: true,
        }
    }
}

impl ApprovalPolicy {
    /// Parse a stored policy document, rejecting malformed threshold
    /// tables. Callers fall back to `ApprovalPolicy::default()` on error
    /// rather than failing generation.
    pub fn parse(value: &serde_json::Value) -> Result<Self, PolicyError> {
        let policy: ApprovalPolicy = serde_json::from_value(value.clone())
            .map_err(|e| PolicyError::Malformed(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.thresholds.is_empty() {
            return Err(PolicyError::EmptyThresholds);
        }
        for t in &self.thresholds {
            if !(0.0..=1.0).contains(&t.min_significance) {
                return Err(PolicyError::ThresholdOutOfRange {
                    tier: t.tier,
                    value: t.min_significance,
                });
            }
        }
        // A higher tier must sit strictly above every lower tier, or
        // raising significance could lower the tier.
        for lower in &self.thresholds {
            for higher in &self.thresholds {
                if lower.tier < higher.tier && higher.min_significance <= lower.min_significance {
                    return Err(PolicyError::TierOrderMismatch {
                        lower: lower.tier,
                        lower_min: lower.min_significance,
                        higher: higher.tier,
                        higher_min: higher.min_significance,
                    });
                }
            }
        }
        for (event_type, weight) in &self.base_weights {
            if !(0.0..=1.0).contains(weight) {
                return Err(PolicyError::BaseWeightOutOfRange {
                    event_type: event_type.clone(),
                    value: *weight,
                });
            }
        }
        if self.exposure_ceiling <= 0.0 {
            return Err(PolicyError::NonPositiveCeiling(self.exposure_ceiling));
        }
        Ok(())
    }

    /// Map a significance score to its tier: the highest threshold whose
    /// `min_significance` is at or below the score wins (closed `>=`
    /// bounds, so a score exactly at a threshold takes the higher tier).
    /// Scores below every threshold are tier 1.
    pub fn tier_for(&self, significance: f64) -> Tier {
        let mut thresholds: Vec<&TierThreshold> = self.thresholds.iter().collect();
        thresholds.sort_by(|a, b| {
            b.min_significance
                .partial_cmp(&a.min_significance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for t in thresholds {
            if significance >= t.min_significance {
                return t.tier;
            }
        }
        Tier::Autonomous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_maps_thresholds_with_closed_bounds() {
        let policy = ApprovalPolicy::default();
        assert_eq!(policy.tier_for(0.0), Tier::Autonomous);
        assert_eq!(policy.tier_for(0.39), Tier::Autonomous);
        assert_eq!(policy.tier_for(0.4), Tier::Approve);
        assert_eq!(policy.tier_for(0.69), Tier::Approve);
        assert_eq!(policy.tier_for(0.7), Tier::Review);
        assert_eq!(policy.tier_for(1.0), Tier::Review);
    }

    #[test]
    fn tier_mapping_is_monotonic() {
        let policy = ApprovalPolicy::default();
        let mut last = Tier::Autonomous;
        for step in 0..=100 {
            let s = step as f64 / 100.0;
            let tier = policy.tier_for(s);
            assert!(tier >= last, "tier regressed at significance {}", s);
            last = tier;
        }
    }

    #[test]
    fn unordered_threshold_table_still_resolves_highest_first() {
        let policy = ApprovalPolicy {
            thresholds: vec![
                TierThreshold {
                    tier: Tier::Approve,
                    min_significance: 0.4,
                },
                TierThreshold {
                    tier: Tier::Review,
                    min_significance: 0.7,
                },
            ],
            ..ApprovalPolicy::default()
        };
        assert_eq!(policy.tier_for(0.95), Tier::Review);
    }

    #[test]
    fn validate_rejects_threshold_table_that_inverts_tier_order() {
        // Tier 3 below tier 2 would send the riskiest chains to the
        // lighter review path.
        let policy = ApprovalPolicy {
            thresholds: vec![
                TierThreshold {
                    tier: Tier::Approve,
                    min_significance: 0.8,
                },
                TierThreshold {
                    tier: Tier::Review,
                    min_significance: 0.4,
                },
            ],
            ..ApprovalPolicy::default()
        };
        assert_eq!(
            policy.validate().unwrap_err(),
            PolicyError::TierOrderMismatch {
                lower: Tier::Approve,
                lower_min: 0.8,
                higher: Tier::Review,
                higher_min: 0.4,
            }
        );
    }

    #[test]
    fn validate_rejects_equal_thresholds_across_tiers() {
        let policy = ApprovalPolicy {
            thresholds: vec![
                TierThreshold {
                    tier: Tier::Approve,
                    min_significance: 0.5,
                },
                TierThreshold {
                    tier: Tier::Review,
                    min_significance: 0.5,
                },
            ],
            ..ApprovalPolicy::default()
        };
        assert!(matches!(
            policy.validate(),
            Err(PolicyError::TierOrderMismatch { .. })
        ));
    }

    #[test]
    fn validate_accepts_properly_ordered_three_tier_table() {
        let policy = ApprovalPolicy {
            thresholds: vec![
                TierThreshold {
                    tier: Tier::Autonomous,
                    min_significance: 0.0,
                },
                TierThreshold {
                    tier: Tier::Approve,
                    min_significance: 0.3,
                },
                TierThreshold {
                    tier: Tier::Review,
                    min_significance: 0.6,
                },
            ],
            ..ApprovalPolicy::default()
        };
        assert!(policy.validate().is_ok());
        assert_eq!(policy.tier_for(0.2), Tier::Autonomous);
        assert_eq!(policy.tier_for(0.7), Tier::Review);
    }

    #[test]
    fn only_tier_one_skips_the_human_queue() {
        assert!(!Tier::Autonomous.needs_human());
        assert!(Tier::Approve.needs_human());
        assert!(Tier::Review.needs_human());
    }

    #[test]
    fn parse_rejects_out_of_range_thresholds() {
        let doc = serde_json::json!({
            "name": "broken",
            "thresholds": [{ "tier": 3, "min_significance": 1.5 }],
        });
        let err = ApprovalPolicy::parse(&doc).unwrap_err();
        assert_eq!(
            err,
            PolicyError::ThresholdOutOfRange {
                tier: Tier::Review,
                value: 1.5
            }
        );
    }

    #[test]
    fn parse_rejects_empty_threshold_table() {
        let doc = serde_json::json!({ "name": "empty", "thresholds": [] });
        assert_eq!(
            ApprovalPolicy::parse(&doc).unwrap_err(),
            PolicyError::EmptyThresholds
        );
    }

    #[test]
    fn parse_accepts_default_document_round_trip() {
        let doc = serde_json::to_value(ApprovalPolicy::default()).unwrap();
        let parsed = ApprovalPolicy::parse(&doc).unwrap();
        assert_eq!(parsed.name, "Default Partner Policy");
        assert_eq!(parsed.thresholds.len(), 2);
    }

    #[test]
    fn tier_from_i32_rejects_out_of_range() {
        assert!(Tier::from_i32(0).is_err());
        assert!(Tier::from_i32(4).is_err());
        assert_eq!(Tier::from_i32(2).unwrap(), Tier::Approve);
    }
}
