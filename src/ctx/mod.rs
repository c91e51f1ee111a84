//! `ExecutorContext`: the single seam through which the Step Executor reaches every
//! injected dependency (SPEC_FULL §4.5, §5).
//!
//! Grounded on `runner/src/executors/mod.rs`'s `StepExecutor` trait — `#[async_trait]
//! Send + Sync`, one trait is the whole seam — generalized from "one trait per action
//! kind" to "one trait bundling every collaborator the executor needs for a tick", since
//! SPEC_FULL's executor talks to a single injected `ctx` rather than dispatching across
//! executor implementations. Crates: `async-trait` (teacher's async-trait pattern),
//! `tokio` (the in-memory fake's internal state).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::protocol::Task;

/// Result of one tool dispatch, mirroring SPEC_FULL §6's `executeTool` contract.
#[derive(Debug, Clone, Default)]
pub struct ActionResult {
    pub ok: Option<bool>,
    pub error: Option<String>,
    pub data: Option<Value>,
    pub failure_code: Option<String>,
    pub tool_diagnostics: Option<ToolDiagnostics>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct ToolDiagnostics {
    pub diag_version: u32,
    pub retry_hint: Option<String>,
    pub reason_code: Option<String>,
}

/// `ctx.getThreatSnapshot()`'s shape (SPEC_FULL §4.6).
#[derive(Debug, Clone)]
pub struct ThreatSnapshot {
    pub overall_threat_level: ThreatLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThreatLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

/// Result of `ctx.regenerateSteps` (SPEC_FULL §4.5 "Regeneration").
#[derive(Debug, Clone)]
pub struct RegenerationResult {
    pub success: bool,
    pub steps_digest: Option<String>,
}

/// One required input of a recipe, as returned by `ctx.introspectRecipe` (SPEC_FULL
/// §4.5 guard 8, §5's suspension-point list).
#[derive(Debug, Clone)]
pub struct RecipeInput {
    pub item: String,
    pub required: u64,
}

/// Cooperative abort handle passed through every tool dispatch, including recovery
/// dispatches (SPEC_FULL §5 "Cancellation").
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn fire(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_fired(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Every dependency the Step Executor reaches for during a tick. No hidden state lives
/// on the executor itself; all of it is reached through this trait (SPEC_FULL §4.5).
#[async_trait]
pub trait ExecutorContext: Send + Sync {
    async fn execute_tool(
        &self,
        tool_name: &str,
        args: &Value,
        abort_signal: &AbortSignal,
    ) -> ActionResult;

    fn can_execute_step(&self) -> bool;

    async fn start_task_step(&self, task_id: &str, step_id: &str, dry_run: bool) -> bool;

    /// Returns whether the step's completion verified successfully (SPEC_FULL §4.5
    /// post-dispatch: "success -> reset verifyFailCount; failure -> increment").
    /// `skip_verification` is set for a forced completion (the verify-fail ramp's 5th
    /// tick, or the sterling-smoke verify-skip policy); a forced completion always
    /// succeeds.
    async fn complete_task_step(&self, task_id: &str, step_id: &str, skip_verification: bool) -> bool;

    /// `ctx.getCount(inv, item)` (SPEC_FULL §4.5 guard 8).
    async fn get_count(&self, inventory: &str, item: &str) -> u64;

    /// `ctx.introspectRecipe(recipe)` — the recipe's required inputs (SPEC_FULL §4.5
    /// guard 8). An unrecognized recipe returns an empty list.
    async fn introspect_recipe(&self, recipe: &str) -> Vec<RecipeInput>;

    async fn inject_dynamic_prereq_for_craft(&self, task: &Task) -> bool;

    async fn get_threat_snapshot(&self) -> ThreatSnapshot;

    async fn regenerate_steps(
        &self,
        task_id: &str,
        failed_leaf: &str,
        reason_class: &str,
        attempt_count: u32,
    ) -> RegenerationResult;

    async fn recompute_progress_and_maybe_complete(&self, task: &Task);

    fn get_abort_signal(&self) -> AbortSignal;

    fn leaf_allowlist(&self) -> &[String];
}

/// In-memory `ExecutorContext` for tests. No real tool dispatch: outcomes are scripted
/// by the test via `queue_tool_result`.
pub struct FakeContext {
    pub queued_results: Mutex<HashMap<String, Vec<ActionResult>>>,
    pub can_execute: std::sync::atomic::AtomicBool,
    pub start_step_result: std::sync::atomic::AtomicBool,
    pub verify_result: std::sync::atomic::AtomicBool,
    pub inventory: Mutex<HashMap<String, u64>>,
    pub recipe_inputs: Mutex<HashMap<String, Vec<RecipeInput>>>,
    pub inject_prereq_result: std::sync::atomic::AtomicBool,
    pub threat_level: Mutex<ThreatLevel>,
    pub regen_result: Mutex<RegenerationResult>,
    pub allowlist: Vec<String>,
    pub abort_signal: AbortSignal,
    pub dispatched_tools: Mutex<Vec<String>>,
}

impl FakeContext {
    pub fn new(allowlist: Vec<String>) -> Self {
        Self {
            queued_results: Mutex::new(HashMap::new()),
            can_execute: std::sync::atomic::AtomicBool::new(true),
            start_step_result: std::sync::atomic::AtomicBool::new(true),
            verify_result: std::sync::atomic::AtomicBool::new(true),
            inventory: Mutex::new(HashMap::new()),
            recipe_inputs: Mutex::new(HashMap::new()),
            inject_prereq_result: std::sync::atomic::AtomicBool::new(false),
            threat_level: Mutex::new(ThreatLevel::None),
            regen_result: Mutex::new(RegenerationResult {
                success: false,
                steps_digest: None,
            }),
            allowlist,
            abort_signal: AbortSignal::new(),
            dispatched_tools: Mutex::new(Vec::new()),
        }
    }

    pub async fn queue_result(&self, tool_name: &str, result: ActionResult) {
        self.queued_results
            .lock()
            .await
            .entry(tool_name.to_string())
            .or_default()
            .push(result);
    }

    pub async fn set_inventory(&self, item: &str, count: u64) {
        self.inventory.lock().await.insert(item.to_string(), count);
    }

    pub async fn set_recipe_inputs(&self, recipe: &str, inputs: Vec<RecipeInput>) {
        self.recipe_inputs.lock().await.insert(recipe.to_string(), inputs);
    }
}

#[async_trait]
impl ExecutorContext for FakeContext {
    async fn execute_tool(
        &self,
        tool_name: &str,
        _args: &Value,
        _abort_signal: &AbortSignal,
    ) -> ActionResult {
        self.dispatched_tools.lock().await.push(tool_name.to_string());
        let mut queued = self.queued_results.lock().await;
        match queued.get_mut(tool_name).and_then(|q| {
            if q.is_empty() {
                None
            } else {
                Some(q.remove(0))
            }
        }) {
            Some(result) => result,
            None => ActionResult {
                ok: Some(true),
                ..Default::default()
            },
        }
    }

    fn can_execute_step(&self) -> bool {
        self.can_execute.load(Ordering::SeqCst)
    }

    async fn start_task_step(&self, _task_id: &str, _step_id: &str, _dry_run: bool) -> bool {
        self.start_step_result.load(Ordering::SeqCst)
    }

    async fn complete_task_step(&self, _task_id: &str, _step_id: &str, skip_verification: bool) -> bool {
        if skip_verification {
            return true;
        }
        self.verify_result.load(Ordering::SeqCst)
    }

    async fn get_count(&self, _inventory: &str, item: &str) -> u64 {
        *self.inventory.lock().await.get(item).unwrap_or(&0)
    }

    async fn introspect_recipe(&self, recipe: &str) -> Vec<RecipeInput> {
        self.recipe_inputs.lock().await.get(recipe).cloned().unwrap_or_default()
    }

    async fn inject_dynamic_prereq_for_craft(&self, _task: &Task) -> bool {
        self.inject_prereq_result.load(Ordering::SeqCst)
    }

    async fn get_threat_snapshot(&self) -> ThreatSnapshot {
        ThreatSnapshot {
            overall_threat_level: *self.threat_level.lock().await,
        }
    }

    async fn regenerate_steps(
        &self,
        _task_id: &str,
        _failed_leaf: &str,
        _reason_class: &str,
        _attempt_count: u32,
    ) -> RegenerationResult {
        self.regen_result.lock().await.clone()
    }

    async fn recompute_progress_and_maybe_complete(&self, _task: &Task) {}

    fn get_abort_signal(&self) -> AbortSignal {
        self.abort_signal.clone()
    }

    fn leaf_allowlist(&self) -> &[String] {
        &self.allowlist
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_context_returns_queued_result_then_default_ok() {
        let ctx = FakeContext::new(vec!["minecraft.craft_recipe".to_string()]);
        ctx.queue_result(
            "minecraft.craft_recipe",
            ActionResult {
                ok: Some(false),
                error: Some("boom".to_string()),
                ..Default::default()
            },
        )
        .await;

        let first = ctx
            .execute_tool("minecraft.craft_recipe", &Value::Null, &AbortSignal::new())
            .await;
        assert_eq!(first.ok, Some(false));

        let second = ctx
            .execute_tool("minecraft.craft_recipe", &Value::Null, &AbortSignal::new())
            .await;
        assert_eq!(second.ok, Some(true));
    }

    #[tokio::test]
    async fn introspect_recipe_returns_scripted_inputs_then_empty_for_unknown() {
        let ctx = FakeContext::new(vec![]);
        ctx.set_recipe_inputs(
            "oak_planks",
            vec![RecipeInput { item: "oak_log".to_string(), required: 1 }],
        )
        .await;

        let inputs = ctx.introspect_recipe("oak_planks").await;
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].item, "oak_log");

        assert!(ctx.introspect_recipe("unknown_recipe").await.is_empty());
    }

    #[tokio::test]
    async fn complete_task_step_with_skip_verification_always_succeeds() {
        let ctx = FakeContext::new(vec![]);
        ctx.verify_result.store(false, Ordering::SeqCst);

        assert!(!ctx.complete_task_step("task-1", "step-1", false).await);
        assert!(ctx.complete_task_step("task-1", "step-1", true).await);
    }

    #[tokio::test]
    async fn abort_signal_fires_and_is_observed() {
        let signal = AbortSignal::new();
        assert!(!signal.is_fired());
        signal.fire();
        assert!(signal.is_fired());
    }
}
