//! Hybrid Planner Router: picks a planning approach for a goal and produces the step
//! list the Step Executor will consume (SPEC_FULL §4.7).
//!
//! The teacher's original DAG/topological-sort executor has no counterpart here — the
//! Step Executor is single-tick, not a parallel scheduler — so this module is new
//! content grounded directly on SPEC_FULL §4.7's decision rules, in the teacher's
//! "deterministic rule table, no ML" idiom.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanningApproach {
    SkillBased,
    McpCapabilities,
    Htn,
    Goap,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Low,
    Medium,
    High,
    Emergency,
}

impl Urgency {
    fn multiplier(&self) -> f64 {
        match self {
            Self::Low => 1.5,
            Self::Medium => 1.0,
            Self::High => 0.7,
            Self::Emergency => 0.5,
        }
    }
}

/// Caller preferences influencing routing (SPEC_FULL §4.7).
#[derive(Debug, Clone, Default)]
pub struct RoutingPreferences {
    pub prefer_skills: bool,
    pub prefer_mcp: bool,
    pub prefer_htn: bool,
    pub prefer_goap: bool,
    pub allow_hybrid: bool,
    pub prefer_simple: bool,
}

/// Confidence inputs the router's deterministic heuristics produce (SPEC_FULL §9
/// "Confidence heuristics are bounded [0,1] and are deterministic functions of goal
/// keywords, number of applicable skills, goal complexity/structure, and urgency").
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceInputs {
    pub skill_confidence: f64,
    pub mcp_confidence: f64,
    pub htn_confidence: f64,
    pub goap_confidence: f64,
    pub impasse_detected: bool,
    pub mcp_adapter_available: bool,
}

#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub approach: PlanningApproach,
    pub reasoning: String,
    pub confidence: f64,
    pub estimated_latency_ms: f64,
}

fn base_latency(approach: PlanningApproach) -> f64 {
    match approach {
        PlanningApproach::SkillBased => 100.0,
        PlanningApproach::McpCapabilities => 300.0,
        PlanningApproach::Htn => 500.0,
        PlanningApproach::Goap => 200.0,
        PlanningApproach::Hybrid => 800.0,
    }
}

/// Implements SPEC_FULL §4.7's first-match decision rules.
pub fn route(
    prefs: &RoutingPreferences,
    confidence: &ConfidenceInputs,
    urgency: Urgency,
) -> RoutingDecision {
    let (approach, reasoning, base_confidence) = if prefs.prefer_mcp
        && (confidence.mcp_confidence >= 0.8 || confidence.impasse_detected)
        && confidence.mcp_adapter_available
    {
        (
            PlanningApproach::McpCapabilities,
            "mcp preferred with high confidence or impasse, adapter available".to_string(),
            confidence.mcp_confidence,
        )
    } else if prefs.prefer_skills && confidence.skill_confidence >= 0.8 {
        (
            PlanningApproach::SkillBased,
            "skill preferred with high confidence".to_string(),
            confidence.skill_confidence,
        )
    } else if prefs.prefer_htn && confidence.htn_confidence >= 0.7 {
        (
            PlanningApproach::Htn,
            "htn preferred with sufficient confidence".to_string(),
            confidence.htn_confidence,
        )
    } else if prefs.prefer_goap && confidence.goap_confidence >= 0.6 {
        (
            PlanningApproach::Goap,
            "goap preferred with sufficient confidence".to_string(),
            confidence.goap_confidence,
        )
    } else {
        let max_confidence = confidence
            .skill_confidence
            .max(confidence.htn_confidence)
            .max(confidence.mcp_confidence);

        if prefs.allow_hybrid && max_confidence >= 0.5 {
            (
                PlanningApproach::Hybrid,
                "hybrid allowed and best sub-plan confidence meets threshold".to_string(),
                0.9 * max_confidence,
            )
        } else {
            (
                PlanningApproach::Goap,
                "fallback: no preference threshold met".to_string(),
                confidence.goap_confidence,
            )
        }
    };

    let estimated_latency_ms = base_latency(approach) * urgency.multiplier();

    RoutingDecision {
        approach,
        reasoning,
        confidence: base_confidence.clamp(0.0, 1.0),
        estimated_latency_ms,
    }
}

/// A planning node; `HybridPlan` composes these per `planningApproach`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: String,
    pub leaf: String,
    pub args: serde_json::Value,
}

/// The four plan kinds compose into a `HybridPlan`, with an optional slot per kind
/// (SPEC_FULL §9 "Planner sub-plans").
#[derive(Debug, Clone, Default)]
pub struct HybridPlan {
    pub nodes: Vec<PlanNode>,
    pub execution_order: Vec<String>,
    pub confidence: f64,
    pub estimated_latency_ms: f64,
    pub planning_approach: Option<PlanningApproach>,
    pub skill_plan: Option<Vec<PlanNode>>,
    pub mcp_plan: Option<Vec<PlanNode>>,
    pub hrm_plan: Option<Vec<PlanNode>>,
    pub htn_plan: Option<Vec<PlanNode>>,
    pub goap_plan: Option<Vec<PlanNode>>,
}

impl HybridPlan {
    /// Merges using the HRM-style high-level structure as a skeleton, filling details
    /// from the HTN steps; merged confidence is the mean of available sub-plan
    /// confidences (SPEC_FULL §4.7).
    pub fn merge_hybrid(
        hrm_plan: Vec<PlanNode>,
        htn_plan: Vec<PlanNode>,
        sub_plan_confidences: &[f64],
    ) -> Self {
        let mut nodes = hrm_plan.clone();
        nodes.extend(htn_plan.iter().cloned());
        let execution_order = nodes.iter().map(|n| n.id.clone()).collect();

        let confidence = if sub_plan_confidences.is_empty() {
            0.0
        } else {
            sub_plan_confidences.iter().sum::<f64>() / sub_plan_confidences.len() as f64
        };

        Self {
            nodes,
            execution_order,
            confidence,
            estimated_latency_ms: base_latency(PlanningApproach::Hybrid),
            planning_approach: Some(PlanningApproach::Hybrid),
            skill_plan: None,
            mcp_plan: None,
            hrm_plan: Some(hrm_plan),
            htn_plan: Some(htn_plan),
            goap_plan: None,
        }
    }
}

/// Tracks `planId → RoutingDecision` so the Coordinator can feed execute-completion
/// metrics back into the router's adaptive state (SPEC_FULL §4.8).
#[derive(Debug, Default)]
pub struct RoutingHistory {
    decisions: HashMap<String, RoutingDecision>,
}

impl RoutingHistory {
    pub fn record(&mut self, plan_id: &str, decision: RoutingDecision) {
        self.decisions.insert(plan_id.to_string(), decision);
    }

    pub fn get(&self, plan_id: &str) -> Option<&RoutingDecision> {
        self.decisions.get(plan_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mcp_preferred_wins_when_confident_and_available() {
        let prefs = RoutingPreferences {
            prefer_mcp: true,
            ..Default::default()
        };
        let confidence = ConfidenceInputs {
            mcp_confidence: 0.9,
            mcp_adapter_available: true,
            ..Default::default()
        };

        let decision = route(&prefs, &confidence, Urgency::Medium);
        assert_eq!(decision.approach, PlanningApproach::McpCapabilities);
    }

    #[test]
    fn falls_back_to_goap_when_nothing_meets_threshold() {
        let prefs = RoutingPreferences::default();
        let confidence = ConfidenceInputs {
            goap_confidence: 0.2,
            ..Default::default()
        };

        let decision = route(&prefs, &confidence, Urgency::Low);
        assert_eq!(decision.approach, PlanningApproach::Goap);
    }

    #[test]
    fn hybrid_chosen_when_allowed_and_max_confidence_meets_threshold() {
        let prefs = RoutingPreferences {
            allow_hybrid: true,
            ..Default::default()
        };
        let confidence = ConfidenceInputs {
            skill_confidence: 0.6,
            ..Default::default()
        };

        let decision = route(&prefs, &confidence, Urgency::Medium);
        assert_eq!(decision.approach, PlanningApproach::Hybrid);
        assert!((decision.confidence - 0.54).abs() < 1e-9);
    }

    #[test]
    fn estimated_latency_scales_with_urgency() {
        let prefs = RoutingPreferences::default();
        let confidence = ConfidenceInputs::default();

        let emergency = route(&prefs, &confidence, Urgency::Emergency);
        let low = route(&prefs, &confidence, Urgency::Low);
        assert!(emergency.estimated_latency_ms < low.estimated_latency_ms);
    }

    #[test]
    fn merge_hybrid_confidence_is_mean_of_sub_plans() {
        let plan = HybridPlan::merge_hybrid(
            vec![PlanNode {
                id: "n1".to_string(),
                leaf: "craft_recipe".to_string(),
                args: serde_json::json!({}),
            }],
            vec![PlanNode {
                id: "n2".to_string(),
                leaf: "acquire_material".to_string(),
                args: serde_json::json!({}),
            }],
            &[0.6, 0.8],
        );

        assert_eq!(plan.nodes.len(), 2);
        assert!((plan.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn routing_history_tracks_decisions_by_plan_id() {
        let mut history = RoutingHistory::default();
        let decision = route(&RoutingPreferences::default(), &ConfidenceInputs::default(), Urgency::Medium);
        history.record("plan-1", decision);
        assert!(history.get("plan-1").is_some());
        assert!(history.get("plan-2").is_none());
    }
}
