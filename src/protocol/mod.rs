//! Wire and in-memory shapes for the task/step data model.
//!
//! A `Task` owns an ordered list of `Step`s and a free-form `metadata` map that the
//! executor treats as its only durable state (SPEC_FULL §3). Steps are resolved to
//! `LeafExecution`s by `crate::leaf` before dispatch.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// The closed set of atomic executable actions, plus the intent leaves that can never
/// be dispatched and must be re-planned (SPEC_FULL §4.4, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeafKind {
    CraftRecipe,
    AcquireMaterial,
    Smelt,
    PlaceBlock,
    PlaceWorkstation,
    ExploreForResources,
    StepForwardSafely,
    RetreatFromThreat,
    DigBlock,
}

impl LeafKind {
    /// Parses a leaf name as it appears in `step.meta.leaf`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "craft_recipe" => Some(Self::CraftRecipe),
            "acquire_material" => Some(Self::AcquireMaterial),
            "smelt" => Some(Self::Smelt),
            "place_block" => Some(Self::PlaceBlock),
            "place_workstation" => Some(Self::PlaceWorkstation),
            "explore_for_resources" => Some(Self::ExploreForResources),
            "step_forward_safely" => Some(Self::StepForwardSafely),
            "retreat_from_threat" => Some(Self::RetreatFromThreat),
            "dig_block" => Some(Self::DigBlock),
            _ => None,
        }
    }

    pub fn as_name(&self) -> &'static str {
        match self {
            Self::CraftRecipe => "craft_recipe",
            Self::AcquireMaterial => "acquire_material",
            Self::Smelt => "smelt",
            Self::PlaceBlock => "place_block",
            Self::PlaceWorkstation => "place_workstation",
            Self::ExploreForResources => "explore_for_resources",
            Self::StepForwardSafely => "step_forward_safely",
            Self::RetreatFromThreat => "retreat_from_threat",
            Self::DigBlock => "dig_block",
        }
    }

    /// Tool name as seen by `ctx.execute_tool`, e.g. `minecraft.craft_recipe`.
    pub fn tool_name(&self) -> String {
        format!("minecraft.{}", self.as_name())
    }

    /// Leaves treated as resource acquisition for recovery-mode selection (SPEC_FULL §4.6).
    pub fn is_acquisition(&self) -> bool {
        matches!(self, Self::AcquireMaterial | Self::DigBlock)
    }
}

/// Planner-level pseudo-leaves that are never executable (SPEC_FULL §4.4, glossary).
pub const INTENT_LEAVES: &[&str] = &["task_type_craft", "task_type_gather", "task_type_build"];

pub fn is_intent_leaf(name: &str) -> bool {
    INTENT_LEAVES.contains(&name)
}

/// A single atomic step inside a task's plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub order: i64,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub done: bool,
    pub meta: StepMeta,
}

/// `step.meta`: at minimum a leaf name, optionally explicit args or a `produces` list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepMeta {
    #[serde(default)]
    pub leaf: Option<String>,
    #[serde(default)]
    pub args: Option<Value>,
    #[serde(default)]
    pub produces: Option<Vec<Produces>>,
    #[serde(default)]
    pub authority: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Produces {
    pub name: String,
    pub count: u64,
}

/// A step resolved to a dispatchable leaf (SPEC_FULL §3 / §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeafExecution {
    pub leaf_name: String,
    pub args: Value,
    pub args_source: ArgsSource,
    #[serde(default)]
    pub original_leaf: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgsSource {
    Explicit,
    Derived,
    Default,
}

/// Sentinel values used for default-sourced args that must be rejected in live mode.
pub const SENTINEL_RECIPE: &str = "unknown";
pub const SENTINEL_INPUT: &str = "unknown";

/// A task: an ordered step list plus the free-form metadata the executor mutates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub metadata: TaskMetadata,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub status: TaskStatus,
}

impl Task {
    pub fn next_pending_step(&self) -> Option<&Step> {
        self.steps.iter().filter(|s| !s.done).min_by_key(|s| s.order)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Active,
    Failed,
    Completed,
}

/// The exhaustive set of metadata keys the executor reads and writes (SPEC_FULL §3).
///
/// Modeled as a typed struct rather than a bag of `Value`s so that patch application
/// (`crate::metadata`) can express "this field is present and cleared" distinctly from
/// "this field was never set".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_eligible_at: Option<i64>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub verify_fail_count: u32,
    #[serde(default)]
    pub repair_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_repair_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regen_disabled_until: Option<i64>,
    #[serde(default)]
    pub regen_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regen_last_attempt_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_steps_digest: Option<String>,
    #[serde(default)]
    pub planning_incomplete: bool,
    #[serde(default)]
    pub planning_incomplete_reasons: Vec<PlanningIncompleteReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub golden_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub no_retry: bool,
    #[serde(default)]
    pub disable_regen: bool,
    #[serde(default)]
    pub reposition_retry_count: u32,
    #[serde(default)]
    pub recovery_action_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_recovery_outcome: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_recovery_leaf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_recovery_mode: Option<String>,
    #[serde(default)]
    pub smoke_policy_applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smoke_policy_reason: Option<String>,
    #[serde(default)]
    pub smoke_verify_skipped: bool,
    #[serde(default)]
    pub smoke_no_retry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_skipped_step: Option<String>,
    /// Per-leaf build-exec budget buckets (SPEC_FULL §4.5 guard 6), keyed by leaf name.
    #[serde(default)]
    pub build_exec_budgets: HashMap<String, BuildExecBudget>,
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningIncompleteReason {
    pub leaf: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildExecBudget {
    pub attempts: u32,
    pub first_at: i64,
    pub last_at: i64,
}

/// The registry of stable blocked-reason strings (SPEC_FULL §6).
///
/// These are the *newer* (snake_case/UPPER_SNAKE) contract per SPEC_FULL §9's open
/// question; legacy kebab-case aliases are recognized only on input, never emitted
/// (see `crate::leaf`).
pub mod block_reasons {
    pub const PLANNING_INCOMPLETE: &str = "PLANNING_INCOMPLETE";
    pub const DERIVED_ARGS_NOT_ALLOWED_LIVE: &str = "DERIVED_ARGS_NOT_ALLOWED_LIVE";
    pub const SENTINEL_ARGS_NOT_ALLOWED_LIVE: &str = "SENTINEL_ARGS_NOT_ALLOWED_LIVE";
    pub const LEGACY_LEAF_REWRITE_DISABLED: &str = "LEGACY_LEAF_REWRITE_DISABLED";
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
    pub const MAX_RETRIES_EXCEEDED: &str = "MAX_RETRIES_EXCEEDED";
    pub const SAFETY_PREEMPTED: &str = "SAFETY_PREEMPTED";
    pub const NO_MAPPED_ACTION: &str = "NO_MAPPED_ACTION";
    pub const RIG_G_BLOCKED: &str = "rig_g_blocked";
    pub const NAVIGATING_IN_PROGRESS: &str = "navigating_in_progress";
    pub const LOOP_SUPPRESSED: &str = "loop_suppressed";

    pub fn unknown_leaf(leaf: &str) -> String {
        format!("unknown-leaf:{leaf}")
    }

    pub fn budget_exhausted_time(leaf: &str) -> String {
        format!("budget-exhausted:time:{leaf}")
    }

    pub fn budget_exhausted_attempts(leaf: &str) -> String {
        format!("budget-exhausted:attempts:{leaf}")
    }

    pub fn deterministic_failure(code: &str) -> String {
        format!("deterministic-failure:{code}")
    }

    pub fn invalid_args(detail: &str) -> String {
        format!("invalid-args: {detail}")
    }

    pub fn task_type_bridge_only_shadow(leaf: &str) -> String {
        format!("task_type_bridge_only_shadow:{leaf}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_kind_round_trips_through_name() {
        for kind in [
            LeafKind::CraftRecipe,
            LeafKind::AcquireMaterial,
            LeafKind::Smelt,
            LeafKind::DigBlock,
        ] {
            let name = kind.as_name();
            assert_eq!(LeafKind::from_name(name), Some(kind));
        }
    }

    #[test]
    fn tool_name_is_namespaced() {
        assert_eq!(LeafKind::CraftRecipe.tool_name(), "minecraft.craft_recipe");
    }

    #[test]
    fn intent_leaves_are_not_executable_leaf_kinds() {
        for leaf in INTENT_LEAVES {
            assert!(is_intent_leaf(leaf));
            assert_eq!(LeafKind::from_name(leaf), None);
        }
    }

    #[test]
    fn task_metadata_defaults_are_unblocked() {
        let meta = TaskMetadata::default();
        assert!(meta.blocked_reason.is_none());
        assert_eq!(meta.max_retries, 3);
    }
}
