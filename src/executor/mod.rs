//! Step Executor: the guard pipeline and post-dispatch state machine (SPEC_FULL §4.5).
//!
//! One call per scheduling tick. Pure-dispatch with side effects on `ctx`; no hidden
//! state lives on the executor. Never throws across its own boundary — every failure
//! routes to a metadata patch plus a recorded decision (SPEC_FULL §7).
//!
//! Grounded on `runner/src/main.rs`'s `execute_step_with_retry` for the retry-loop shape
//! and `tracing` event placement, generalized from "retry an HTTP assertion" to "walk
//! fifteen ordered guards, then the post-dispatch state machine".

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::backoff::{exponential_backoff_ms, fixed_backoff_ms, next_eligible_at, BlockKind};
use crate::config::ExecutorConfig;
use crate::ctx::{ActionResult, ExecutorContext};
use crate::errors::error_code_for_block_reason;
use crate::leaf::{normalize_leaf_args, step_to_leaf_execution};
use crate::loop_breaker::LoopBreaker;
use crate::metadata::{block_task_patch, clear_blocked_state, regen_success_patch};
use crate::protocol::{
    block_reasons, ArgsSource, LeafExecution, Step, Task, TaskStatus, SENTINEL_INPUT,
    SENTINEL_RECIPE,
};
use crate::recorder::GoldenRunRecorder;
use crate::recovery;
use crate::signature::{self, FailureCategory, FailureTuple};
use crate::validation::validate_leaf_args;

/// The outcome of a single `execute_step` tick, mostly useful for tests and CLI output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Blocked(String),
    Dispatched,
    ShadowDispatched,
    PrerequisiteInjected,
    RecoveryDispatched,
}

/// A closed set of failure codes the tool layer documents as deterministic (SPEC_FULL
/// §9 "Deterministic failure classification"). Unknown codes default to non-deterministic.
fn is_deterministic_failure(code: &str) -> bool {
    matches!(
        code,
        "INVALID_RECIPE" | "UNKNOWN_BLOCK" | "PERMISSION_DENIED" | "WORLD_READ_ONLY"
    )
}

/// Executes one scheduling tick for `task`'s next pending step. Mutates `task.metadata`
/// and `task.status` in place; records decisions via `recorder`.
#[instrument(skip(task, step, ctx, config, recorder, loop_breaker), fields(task_id = %task.id, step_id = %step.id))]
#[allow(clippy::too_many_arguments)]
pub async fn execute_step(
    task: &mut Task,
    step: &Step,
    ctx: &dyn ExecutorContext,
    config: &ExecutorConfig,
    recorder: &GoldenRunRecorder,
    loop_breaker: &mut LoopBreaker,
    run_id: &str,
    now: DateTime<Utc>,
) -> TickOutcome {
    // Guard 1: planning-incomplete gate.
    if task.metadata.planning_incomplete {
        let leaf = step.meta.leaf.clone().unwrap_or_else(|| "unknown".to_string());
        return block(
            task,
            recorder,
            run_id,
            &leaf,
            block_reasons::PLANNING_INCOMPLETE,
            Some(next_eligible_at(now, crate::config::PLANNING_INCOMPLETE_BACKOFF_MS)),
            now,
        )
        .await;
    }

    // Guard 2: leaf resolution.
    let leaf_exec = match step_to_leaf_execution(step) {
        Some(exec) => exec,
        None => {
            let leaf = step.meta.leaf.clone().unwrap_or_else(|| "unknown".to_string());
            recorder
                .record_executor_blocked(
                    run_id,
                    "unknown_leaf",
                    &leaf,
                    None,
                    Some(&task.id),
                    now,
                )
                .await;
            return TickOutcome::Blocked("unknown_leaf".to_string());
        }
    };

    let is_live = matches!(config.mode, crate::config::ExecutionMode::Live);

    // Guard 2b: loop-breaker suppression. Recomputes the signature of this task's last
    // known failure (if any) and blocks re-dispatch while that signature is suppressed
    // (SPEC_FULL §4.2 `isSuppressed`, §7 "in active mode, suppression prevents
    // re-execution until the TTL elapses").
    if task.metadata.failure_code.is_some() || task.metadata.blocked_reason.is_some() {
        let tuple = FailureTuple {
            category: Some(FailureCategory::ToolFailure),
            leaf: leaf_exec.leaf_name.clone(),
            failure_code: task.metadata.failure_code.clone(),
            blocked_reason: task.metadata.blocked_reason.clone(),
            ..Default::default()
        };
        let signature_id = signature::compute_signature_id(&tuple);
        if loop_breaker.is_suppressed(signature_id.as_str(), now) {
            return block(
                task,
                recorder,
                run_id,
                &leaf_exec.leaf_name,
                block_reasons::LOOP_SUPPRESSED,
                Some(next_eligible_at(now, fixed_backoff_ms(BlockKind::Transient))),
                now,
            )
            .await;
        }
    }

    // Guard 3: derived-args rejection (live only).
    if is_live && leaf_exec.args_source == ArgsSource::Derived {
        return block(
            task,
            recorder,
            run_id,
            &leaf_exec.leaf_name,
            block_reasons::DERIVED_ARGS_NOT_ALLOWED_LIVE,
            Some(next_eligible_at(now, fixed_backoff_ms(BlockKind::Deterministic))),
            now,
        )
        .await;
    }

    // Guard 4: sentinel-args rejection (live only).
    if is_live && is_sentinel_args(&leaf_exec) {
        return block(
            task,
            recorder,
            run_id,
            &leaf_exec.leaf_name,
            block_reasons::SENTINEL_ARGS_NOT_ALLOWED_LIVE,
            Some(next_eligible_at(now, fixed_backoff_ms(BlockKind::Deterministic))),
            now,
        )
        .await;
    }

    // Guard 5: legacy rewrite policy.
    if let Some(original_leaf) = &leaf_exec.original_leaf {
        if is_live && !config.legacy_leaf_rewrite_enabled {
            return block(
                task,
                recorder,
                run_id,
                &leaf_exec.leaf_name,
                block_reasons::LEGACY_LEAF_REWRITE_DISABLED,
                None,
                now,
            )
            .await;
        }
        recorder
            .record_leaf_rewrite_used(run_id, &leaf_exec.leaf_name, original_leaf)
            .await;
    }

    // Guard 6: build-exec budget.
    if !config.build_exec_budget_disabled && config.building_leaves.contains(&leaf_exec.leaf_name) {
        if let Some(outcome) = check_build_exec_budget(task, config, &leaf_exec, now) {
            let reason = outcome.clone();
            recorder
                .record_executor_blocked(
                    run_id,
                    &reason,
                    &leaf_exec.leaf_name,
                    None,
                    Some(&task.id),
                    now,
                )
                .await;
            return TickOutcome::Blocked(reason);
        }
    }

    // Guard 7: normalize + validate args.
    let normalized_args = normalize_leaf_args(&leaf_exec.leaf_name, leaf_exec.args.clone());
    if let Some(detail) = validate_leaf_args(&leaf_exec.leaf_name, &normalized_args, true) {
        return block(
            task,
            recorder,
            run_id,
            &leaf_exec.leaf_name,
            &block_reasons::invalid_args(&detail),
            Some(next_eligible_at(now, fixed_backoff_ms(BlockKind::Deterministic))),
            now,
        )
        .await;
    }

    // Guard 8: craft prerequisite injection.
    if leaf_exec.leaf_name == "craft_recipe" {
        if let Some(recipe) = normalized_args.get("recipe").and_then(Value::as_str) {
            if prereq_injection_needed(ctx, recipe).await
                && ctx.inject_dynamic_prereq_for_craft(task).await
            {
                return TickOutcome::PrerequisiteInjected;
            }
        }
    }

    // Guard 9: allowlist.
    let tool_name = format!("minecraft.{}", leaf_exec.leaf_name);
    if !ctx.leaf_allowlist().iter().any(|t| t == &tool_name) {
        return block(
            task,
            recorder,
            run_id,
            &leaf_exec.leaf_name,
            &block_reasons::unknown_leaf(&leaf_exec.leaf_name),
            None,
            now,
        )
        .await;
    }

    // Guard 10: task-type bridge gate.
    if config.task_type_bridge_leaf_names.contains(&leaf_exec.leaf_name)
        && !(matches!(config.mode, crate::config::ExecutionMode::Shadow) && config.bridge_enabled)
    {
        return block(
            task,
            recorder,
            run_id,
            &leaf_exec.leaf_name,
            &block_reasons::task_type_bridge_only_shadow(&leaf_exec.leaf_name),
            None,
            now,
        )
        .await;
    }

    // Guard 11: shadow short-circuit.
    if matches!(config.mode, crate::config::ExecutionMode::Shadow) {
        recorder
            .record_shadow_dispatch(
                run_id,
                &step.id,
                json!({"step_id": step.id, "leaf": leaf_exec.leaf_name}),
            )
            .await;
        recorder
            .record_verification(
                run_id,
                crate::recorder::VerificationRecord {
                    status: "skipped".to_string(),
                    kind: Some("trace_only".to_string()),
                    detail: None,
                },
            )
            .await;
        ctx.start_task_step(&task.id, &step.id, true).await;
        return TickOutcome::ShadowDispatched;
    }

    // Guard 12: live args shape check.
    if !normalized_args.is_object() {
        return block(
            task,
            recorder,
            run_id,
            &leaf_exec.leaf_name,
            "invalid_args: args must be a plain object",
            Some(next_eligible_at(now, fixed_backoff_ms(BlockKind::Deterministic))),
            now,
        )
        .await;
    }

    // Guard 13: rate limiter.
    if !ctx.can_execute_step() {
        return block(
            task,
            recorder,
            run_id,
            &leaf_exec.leaf_name,
            block_reasons::RATE_LIMITED,
            Some(next_eligible_at(now, fixed_backoff_ms(BlockKind::Transient))),
            now,
        )
        .await;
    }

    // Guard 14: step start.
    if !ctx.start_task_step(&task.id, &step.id, false).await {
        return block(
            task,
            recorder,
            run_id,
            &leaf_exec.leaf_name,
            block_reasons::RIG_G_BLOCKED,
            Some(next_eligible_at(now, fixed_backoff_ms(BlockKind::Transient))),
            now,
        )
        .await;
    }

    // Guard 15: dispatch.
    info!(leaf = %leaf_exec.leaf_name, tool = %tool_name, "dispatching step");
    let abort_signal = ctx.get_abort_signal();
    let action_result = ctx.execute_tool(&tool_name, &normalized_args, &abort_signal).await;

    recorder
        .record_dispatch(
            run_id,
            json!({
                "step_id": step.id,
                "leaf": leaf_exec.leaf_name,
                "original_leaf": leaf_exec.original_leaf,
            }),
        )
        .await;

    post_dispatch(
        task,
        step,
        &leaf_exec,
        action_result,
        ctx,
        recorder,
        loop_breaker,
        run_id,
        now,
    )
    .await
}

/// Guard 8: introspects `recipe`'s required inputs and checks each against inventory
/// (SPEC_FULL §4.5 guard 8 — "introspect the recipe; for each required input, check
/// inventory"). An unrecognized recipe introspects to no inputs and is never short.
async fn prereq_injection_needed(ctx: &dyn ExecutorContext, recipe: &str) -> bool {
    for input in ctx.introspect_recipe(recipe).await {
        if ctx.get_count("default", &input.item).await < input.required {
            return true;
        }
    }
    false
}

fn is_sentinel_args(leaf_exec: &LeafExecution) -> bool {
    match leaf_exec.leaf_name.as_str() {
        "craft_recipe" => leaf_exec.args.get("recipe").and_then(Value::as_str) == Some(SENTINEL_RECIPE),
        "smelt" => leaf_exec.args.get("input").and_then(Value::as_str) == Some(SENTINEL_INPUT),
        _ => false,
    }
}

/// Guard 6's per-step budget bucket. Returns `Some(reason)` to block, or `None` after
/// bumping the bucket in place.
fn check_build_exec_budget(
    task: &mut Task,
    config: &ExecutorConfig,
    leaf_exec: &LeafExecution,
    now: DateTime<Utc>,
) -> Option<String> {
    let now_ms = now.timestamp_millis();
    let bucket = task
        .metadata
        .build_exec_budgets
        .entry(leaf_exec.leaf_name.clone())
        .or_insert_with(|| crate::protocol::BuildExecBudget {
            attempts: 0,
            first_at: now_ms,
            last_at: now_ms,
        });

    if now_ms - bucket.first_at > config.build_exec_max_elapsed.as_millis() as i64 {
        return Some(block_reasons::budget_exhausted_time(&leaf_exec.leaf_name));
    }
    if bucket.attempts >= config.build_exec_max_attempts {
        return Some(block_reasons::budget_exhausted_attempts(&leaf_exec.leaf_name));
    }
    let min_interval = config.build_exec_min_interval.as_millis() as i64;
    if bucket.attempts > 0 && now_ms - bucket.last_at < min_interval {
        return Some(block_reasons::RATE_LIMITED.to_string());
    }

    bucket.attempts += 1;
    bucket.last_at = now_ms;
    None
}

async fn block(
    task: &mut Task,
    recorder: &GoldenRunRecorder,
    run_id: &str,
    leaf: &str,
    reason: &str,
    next_eligible: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> TickOutcome {
    let patch = block_task_patch(reason, &task.metadata, next_eligible, now);
    patch.apply(&mut task.metadata);
    recorder
        .record_executor_blocked(run_id, reason, leaf, None, Some(&task.id), now)
        .await;
    if let Some(code) = error_code_for_block_reason(reason) {
        warn!(task_id = %task.id, leaf, reason, error_code = %code, "step blocked");
    } else {
        warn!(task_id = %task.id, leaf, reason, "step blocked");
    }
    TickOutcome::Blocked(reason.to_string())
}

#[allow(clippy::too_many_arguments)]
async fn post_dispatch(
    task: &mut Task,
    step: &Step,
    leaf_exec: &LeafExecution,
    action_result: ActionResult,
    ctx: &dyn ExecutorContext,
    recorder: &GoldenRunRecorder,
    loop_breaker: &mut LoopBreaker,
    run_id: &str,
    now: DateTime<Utc>,
) -> TickOutcome {
    if action_result
        .metadata
        .as_ref()
        .and_then(|m| m.get("reason"))
        .and_then(Value::as_str)
        == Some("no_mapped_action")
    {
        let patch = block_task_patch(
            block_reasons::NO_MAPPED_ACTION,
            &task.metadata,
            Some(next_eligible_at(now, fixed_backoff_ms(BlockKind::Deterministic))),
            now,
        );
        patch.apply(&mut task.metadata);
        recorder
            .record_executor_blocked(
                run_id,
                block_reasons::NO_MAPPED_ACTION,
                &leaf_exec.leaf_name,
                None,
                Some(&task.id),
                now,
            )
            .await;
        return TickOutcome::Blocked(block_reasons::NO_MAPPED_ACTION.to_string());
    }

    if action_result.ok == Some(true) {
        return handle_dispatch_success(task, step, ctx, now).await;
    }

    if let Some(error) = &action_result.error {
        if error.contains("already navigating") {
            observe_failure(
                loop_breaker,
                recorder,
                run_id,
                &task.id,
                FailureTuple {
                    category: Some(FailureCategory::ToolFailure),
                    leaf: leaf_exec.leaf_name.clone(),
                    blocked_reason: Some(block_reasons::NAVIGATING_IN_PROGRESS.to_string()),
                    ..Default::default()
                },
                now,
            )
            .await;
            recorder
                .record_executor_blocked(
                    run_id,
                    block_reasons::NAVIGATING_IN_PROGRESS,
                    &leaf_exec.leaf_name,
                    None,
                    Some(&task.id),
                    now,
                )
                .await;
            return TickOutcome::Blocked(block_reasons::NAVIGATING_IN_PROGRESS.to_string());
        }

        if error == "NAV_PREEMPTED" {
            observe_failure(
                loop_breaker,
                recorder,
                run_id,
                &task.id,
                FailureTuple {
                    category: Some(FailureCategory::ToolFailure),
                    leaf: leaf_exec.leaf_name.clone(),
                    failure_code: Some("NAV_PREEMPTED".to_string()),
                    blocked_reason: Some(block_reasons::SAFETY_PREEMPTED.to_string()),
                    ..Default::default()
                },
                now,
            )
            .await;
            let patch = block_task_patch(
                block_reasons::SAFETY_PREEMPTED,
                &task.metadata,
                Some(next_eligible_at(now, fixed_backoff_ms(BlockKind::Transient))),
                now,
            );
            patch.apply(&mut task.metadata);
            recorder
                .record_executor_blocked(
                    run_id,
                    block_reasons::SAFETY_PREEMPTED,
                    &leaf_exec.leaf_name,
                    None,
                    Some(&task.id),
                    now,
                )
                .await;
            return TickOutcome::Blocked(block_reasons::SAFETY_PREEMPTED.to_string());
        }
    }

    let failure_code = action_result.failure_code.clone().or_else(|| {
        action_result
            .data
            .as_ref()
            .and_then(|d| d.pointer("/error/code"))
            .and_then(Value::as_str)
            .map(String::from)
    });

    if let Some(code) = &failure_code {
        if is_deterministic_failure(code) {
            let reason = block_reasons::deterministic_failure(code);
            observe_failure(
                loop_breaker,
                recorder,
                run_id,
                &task.id,
                FailureTuple {
                    category: Some(FailureCategory::ToolFailure),
                    leaf: leaf_exec.leaf_name.clone(),
                    failure_code: Some(code.clone()),
                    blocked_reason: Some(reason.clone()),
                    ..Default::default()
                },
                now,
            )
            .await;
            task.metadata.blocked_reason = Some(reason.clone());
            task.metadata.blocked_at = Some(now.timestamp_millis());
            task.metadata.failure_code = Some(code.clone());
            task.metadata.failure_error = action_result.error.clone();
            task.status = TaskStatus::Failed;
            ctx.recompute_progress_and_maybe_complete(task).await;
            return TickOutcome::Blocked(reason);
        }
    }

    if let Some(diag) = &action_result.tool_diagnostics {
        if diag.retry_hint.as_deref() == Some("reposition_or_rescan") {
            return recovery::inject_recovery(
                task,
                leaf_exec,
                ctx,
                recorder,
                loop_breaker,
                run_id,
                now,
            )
            .await;
        }
    }

    if leaf_exec.leaf_name == "craft_recipe" {
        if let Some(recipe) = leaf_exec.args.get("recipe").and_then(Value::as_str) {
            if prereq_injection_needed(ctx, recipe).await
                && ctx.inject_dynamic_prereq_for_craft(task).await
            {
                return TickOutcome::PrerequisiteInjected;
            }
        }
    }

    retry_or_regenerate(
        task,
        leaf_exec,
        &action_result,
        ctx,
        recorder,
        loop_breaker,
        run_id,
        now,
    )
    .await
}

async fn handle_dispatch_success(
    task: &mut Task,
    step: &Step,
    ctx: &dyn ExecutorContext,
    now: DateTime<Utc>,
) -> TickOutcome {
    let completed = ctx.complete_task_step(&task.id, &step.id, false).await;

    let is_smoke = task.metadata.source.as_deref() == Some("sterling-smoke");

    if completed {
        task.metadata.verify_fail_count = 0;
        return TickOutcome::Dispatched;
    }

    if is_smoke {
        task.metadata.smoke_policy_applied = true;
        task.metadata.smoke_policy_reason = Some("skip_verification".to_string());
        task.metadata.smoke_verify_skipped = true;
        ctx.complete_task_step(&task.id, &step.id, true).await;
        force_complete_step(task, &step.id);
        return TickOutcome::Dispatched;
    }

    task.metadata.verify_fail_count += 1;
    if task.metadata.verify_fail_count >= 5 {
        task.metadata.verify_fail_count = 0;
        task.metadata.last_skipped_step = Some(step.id.clone());
        ctx.complete_task_step(&task.id, &step.id, true).await;
        force_complete_step(task, &step.id);
    } else {
        let backoff = (5000 * task.metadata.verify_fail_count as i64).min(30_000);
        task.metadata.next_eligible_at = Some(next_eligible_at(now, backoff).timestamp_millis());
    }
    TickOutcome::Dispatched
}

/// Marks `step_id` done directly on `task.steps`, bypassing verification. Used for the
/// verify-fail ramp's forced 5th-tick completion and the sterling-smoke verify-skip
/// policy, both of which must stop `next_pending_step` from re-offering the step.
fn force_complete_step(task: &mut Task, step_id: &str) {
    if let Some(step) = task.steps.iter_mut().find(|s| s.id == step_id) {
        step.done = true;
    }
}

/// Computes the failure signature for `tuple`, records the occurrence with the Loop
/// Breaker, and persists any resulting episode (SPEC_FULL §4.2, §4.3).
async fn observe_failure(
    loop_breaker: &mut LoopBreaker,
    recorder: &GoldenRunRecorder,
    run_id: &str,
    task_id: &str,
    tuple: FailureTuple,
    now: DateTime<Utc>,
) {
    let signature_id = signature::compute_signature_id(&tuple);
    if let Some(episode) = loop_breaker.record_failure(&signature_id, task_id, run_id, now) {
        recorder
            .record_loop_detected(
                run_id,
                json!({
                    "signature_id": episode.signature_id,
                    "occurrence_count": episode.occurrence_count,
                    "window_ms": episode.window_ms,
                    "suppressed_until": episode.suppressed_until,
                    "contributing_task_ids": episode.contributing_task_ids,
                    "mode": format!("{:?}", episode.mode),
                }),
            )
            .await;
    }
    recorder.mark_loop_breaker_evaluated(run_id).await;
}

#[allow(clippy::too_many_arguments)]
async fn retry_or_regenerate(
    task: &mut Task,
    leaf_exec: &LeafExecution,
    action_result: &ActionResult,
    ctx: &dyn ExecutorContext,
    recorder: &GoldenRunRecorder,
    loop_breaker: &mut LoopBreaker,
    run_id: &str,
    now: DateTime<Utc>,
) -> TickOutcome {
    task.metadata.retry_count += 1;
    let retry_count = task.metadata.retry_count;
    let max_retries = task.metadata.max_retries;
    let backoff_ms = exponential_backoff_ms(retry_count);

    if retry_count < max_retries {
        task.metadata.next_eligible_at = Some(next_eligible_at(now, backoff_ms).timestamp_millis());
        return TickOutcome::Blocked("retry_scheduled".to_string());
    }

    let is_smoke = task.metadata.source.as_deref() == Some("sterling-smoke");
    if is_smoke && action_result.ok != Some(true) {
        task.metadata.smoke_policy_applied = true;
        task.metadata.smoke_policy_reason = Some("fail_no_regen".to_string());
        task.metadata.smoke_no_retry = true;
        task.status = TaskStatus::Failed;
        observe_failure(
            loop_breaker,
            recorder,
            run_id,
            &task.id,
            FailureTuple {
                category: Some(FailureCategory::TaskTerminal),
                leaf: leaf_exec.leaf_name.clone(),
                blocked_reason: Some(block_reasons::MAX_RETRIES_EXCEEDED.to_string()),
                ..Default::default()
            },
            now,
        )
        .await;
        return TickOutcome::Blocked(block_reasons::MAX_RETRIES_EXCEEDED.to_string());
    }

    if task.metadata.disable_regen {
        task.metadata.blocked_reason = Some(block_reasons::MAX_RETRIES_EXCEEDED.to_string());
        task.metadata.blocked_at = Some(now.timestamp_millis());
        task.status = TaskStatus::Failed;
        observe_failure(
            loop_breaker,
            recorder,
            run_id,
            &task.id,
            FailureTuple {
                category: Some(FailureCategory::TaskTerminal),
                leaf: leaf_exec.leaf_name.clone(),
                blocked_reason: Some(block_reasons::MAX_RETRIES_EXCEEDED.to_string()),
                ..Default::default()
            },
            now,
        )
        .await;
        return TickOutcome::Blocked(block_reasons::MAX_RETRIES_EXCEEDED.to_string());
    }

    if task.metadata.repair_count < 2 {
        let result = ctx
            .regenerate_steps(&task.id, &leaf_exec.leaf_name, "tool_failure", retry_count)
            .await;
        recorder
            .record_regeneration_attempt(run_id, result.success, "regen_failed")
            .await;

        if result.success {
            if let Some(digest) = result.steps_digest {
                if task.metadata.last_steps_digest.as_deref() != Some(digest.as_str()) {
                    let patch = regen_success_patch(task.metadata.repair_count + 1, digest, now);
                    patch.apply(&mut task.metadata);
                    warn!(task_id = %task.id, "regeneration produced progress, retry state reset");
                    return TickOutcome::Dispatched;
                }
            }
        }
    }

    task.metadata.blocked_reason = Some(block_reasons::MAX_RETRIES_EXCEEDED.to_string());
    task.metadata.blocked_at = Some(now.timestamp_millis());
    task.status = TaskStatus::Failed;
    observe_failure(
        loop_breaker,
        recorder,
        run_id,
        &task.id,
        FailureTuple {
            category: Some(FailureCategory::TaskTerminal),
            leaf: leaf_exec.leaf_name.clone(),
            blocked_reason: Some(block_reasons::MAX_RETRIES_EXCEEDED.to_string()),
            ..Default::default()
        },
        now,
    )
    .await;
    TickOutcome::Blocked(block_reasons::MAX_RETRIES_EXCEEDED.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionMode;
    use crate::ctx::FakeContext;
    use crate::loop_breaker::LoopBreakerRuntimeMode;
    use crate::protocol::{StepMeta, TaskMetadata};
    use serde_json::json;

    fn step_with(leaf: &str, args: Value) -> Step {
        Step {
            id: "step-1".to_string(),
            order: 0,
            label: None,
            done: false,
            meta: StepMeta {
                leaf: Some(leaf.to_string()),
                args: Some(args),
                produces: None,
                authority: Some("sterling".to_string()),
            },
        }
    }

    fn task_with_step(step: &Step) -> Task {
        Task {
            id: "task-1".to_string(),
            title: None,
            steps: vec![step.clone()],
            metadata: TaskMetadata::default(),
            progress: 0.0,
            status: TaskStatus::Active,
        }
    }

    #[tokio::test]
    async fn s1_explicit_craft_dispatch_dispatches_once() {
        let dir = std::env::temp_dir().join(format!("sterling-exec-test-{}", uuid::Uuid::new_v4()));
        let recorder = GoldenRunRecorder::new(dir);
        let ctx = FakeContext::new(vec!["minecraft.craft_recipe".to_string()]);
        ctx.set_inventory("oak_planks", 4).await;
        let mut loop_breaker = LoopBreaker::new(LoopBreakerRuntimeMode::Shadow);

        let step = step_with("craft_recipe", json!({"recipe": "oak_planks", "count": 4}));
        let mut task = task_with_step(&step);

        let config = ExecutorConfig {
            mode: ExecutionMode::Live,
            ..Default::default()
        };

        let outcome = execute_step(
            &mut task,
            &step,
            &ctx,
            &config,
            &recorder,
            &mut loop_breaker,
            "run-1",
            Utc::now(),
        )
        .await;

        assert_eq!(outcome, TickOutcome::Dispatched);
        assert_eq!(ctx.dispatched_tools.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn s2_derived_args_live_is_blocked() {
        let dir = std::env::temp_dir().join(format!("sterling-exec-test-{}", uuid::Uuid::new_v4()));
        let recorder = GoldenRunRecorder::new(dir);
        let ctx = FakeContext::new(vec!["minecraft.craft_recipe".to_string()]);
        let mut loop_breaker = LoopBreaker::new(LoopBreakerRuntimeMode::Shadow);

        let mut step = step_with("craft_recipe", json!({}));
        step.meta.args = None;
        step.meta.produces = Some(vec![crate::protocol::Produces {
            name: "oak_planks".to_string(),
            count: 4,
        }]);
        let mut task = task_with_step(&step);

        let config = ExecutorConfig {
            mode: ExecutionMode::Live,
            ..Default::default()
        };

        let outcome = execute_step(
            &mut task,
            &step,
            &ctx,
            &config,
            &recorder,
            &mut loop_breaker,
            "run-1",
            Utc::now(),
        )
        .await;

        assert_eq!(
            outcome,
            TickOutcome::Blocked(block_reasons::DERIVED_ARGS_NOT_ALLOWED_LIVE.to_string())
        );
        assert_eq!(
            task.metadata.blocked_reason.as_deref(),
            Some(block_reasons::DERIVED_ARGS_NOT_ALLOWED_LIVE)
        );
        assert_eq!(ctx.dispatched_tools.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn s3_planning_incomplete_blocks_without_tool_call() {
        let dir = std::env::temp_dir().join(format!("sterling-exec-test-{}", uuid::Uuid::new_v4()));
        let recorder = GoldenRunRecorder::new(dir);
        let ctx = FakeContext::new(vec!["minecraft.craft_recipe".to_string()]);
        let mut loop_breaker = LoopBreaker::new(LoopBreakerRuntimeMode::Shadow);

        let step = step_with("craft_recipe", json!({"recipe": "oak_planks", "count": 4}));
        let mut task = task_with_step(&step);
        task.metadata.planning_incomplete = true;

        let config = ExecutorConfig::default();
        let now = Utc::now();

        let outcome = execute_step(
            &mut task, &step, &ctx, &config, &recorder, &mut loop_breaker, "run-1", now,
        )
        .await;

        assert_eq!(
            outcome,
            TickOutcome::Blocked(block_reasons::PLANNING_INCOMPLETE.to_string())
        );
        let eligible = task.metadata.next_eligible_at.unwrap();
        let delta = eligible - now.timestamp_millis();
        assert!((299_000..=301_000).contains(&delta));
        assert_eq!(ctx.dispatched_tools.lock().await.len(), 0);
    }

    #[test]
    fn unknown_failure_code_is_not_deterministic() {
        assert!(!is_deterministic_failure("SOME_NEW_CODE"));
        assert!(is_deterministic_failure("INVALID_RECIPE"));
    }

    #[tokio::test]
    async fn guard8_injects_prereq_when_a_required_input_is_short() {
        let dir = std::env::temp_dir().join(format!("sterling-exec-test-{}", uuid::Uuid::new_v4()));
        let recorder = GoldenRunRecorder::new(dir);
        let ctx = FakeContext::new(vec!["minecraft.craft_recipe".to_string()]);
        ctx.set_inventory("oak_planks", 4).await;
        ctx.set_recipe_inputs(
            "oak_planks",
            vec![crate::ctx::RecipeInput { item: "oak_log".to_string(), required: 1 }],
        )
        .await;
        ctx.inject_prereq_result
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let mut loop_breaker = LoopBreaker::new(LoopBreakerRuntimeMode::Shadow);

        let step = step_with("craft_recipe", json!({"recipe": "oak_planks", "count": 4}));
        let mut task = task_with_step(&step);

        let config = ExecutorConfig {
            mode: ExecutionMode::Live,
            ..Default::default()
        };

        let outcome = execute_step(
            &mut task,
            &step,
            &ctx,
            &config,
            &recorder,
            &mut loop_breaker,
            "run-1",
            Utc::now(),
        )
        .await;

        assert_eq!(outcome, TickOutcome::PrerequisiteInjected);
        assert_eq!(ctx.dispatched_tools.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn guard8_does_not_inject_when_required_inputs_are_satisfied() {
        let dir = std::env::temp_dir().join(format!("sterling-exec-test-{}", uuid::Uuid::new_v4()));
        let recorder = GoldenRunRecorder::new(dir);
        let ctx = FakeContext::new(vec!["minecraft.craft_recipe".to_string()]);
        ctx.set_recipe_inputs(
            "oak_planks",
            vec![crate::ctx::RecipeInput { item: "oak_log".to_string(), required: 1 }],
        )
        .await;
        ctx.set_inventory("oak_log", 3).await;
        ctx.inject_prereq_result
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let mut loop_breaker = LoopBreaker::new(LoopBreakerRuntimeMode::Shadow);

        let step = step_with("craft_recipe", json!({"recipe": "oak_planks", "count": 4}));
        let mut task = task_with_step(&step);

        let config = ExecutorConfig {
            mode: ExecutionMode::Live,
            ..Default::default()
        };

        let outcome = execute_step(
            &mut task,
            &step,
            &ctx,
            &config,
            &recorder,
            &mut loop_breaker,
            "run-1",
            Utc::now(),
        )
        .await;

        assert_eq!(outcome, TickOutcome::Dispatched);
    }

    #[tokio::test]
    async fn s4_fifth_verify_failure_force_completes_and_stops_the_ramp() {
        let dir = std::env::temp_dir().join(format!("sterling-exec-test-{}", uuid::Uuid::new_v4()));
        let recorder = GoldenRunRecorder::new(dir);
        let ctx = FakeContext::new(vec!["minecraft.craft_recipe".to_string()]);
        ctx.verify_result.store(false, std::sync::atomic::Ordering::SeqCst);
        let mut loop_breaker = LoopBreaker::new(LoopBreakerRuntimeMode::Shadow);

        let step = step_with("craft_recipe", json!({"recipe": "oak_planks", "count": 4}));
        let mut task = task_with_step(&step);
        task.metadata.verify_fail_count = 4;

        let config = ExecutorConfig {
            mode: ExecutionMode::Live,
            ..Default::default()
        };

        execute_step(
            &mut task,
            &step,
            &ctx,
            &config,
            &recorder,
            &mut loop_breaker,
            "run-1",
            Utc::now(),
        )
        .await;

        assert_eq!(task.metadata.verify_fail_count, 0);
        assert_eq!(task.metadata.last_skipped_step.as_deref(), Some("step-1"));
        assert!(
            task.steps[0].done,
            "the 5th verify failure must force-complete the step, not just reset the counter"
        );
    }

    #[tokio::test]
    async fn suppressed_signature_blocks_before_dispatch_in_active_mode() {
        let dir = std::env::temp_dir().join(format!("sterling-exec-test-{}", uuid::Uuid::new_v4()));
        let recorder = GoldenRunRecorder::new(dir);
        let ctx = FakeContext::new(vec!["minecraft.craft_recipe".to_string()]);
        let mut loop_breaker = LoopBreaker::new(LoopBreakerRuntimeMode::Active);
        let now = Utc::now();

        let tuple = FailureTuple {
            category: Some(FailureCategory::ToolFailure),
            leaf: "craft_recipe".to_string(),
            failure_code: Some("TOOL_TIMEOUT".to_string()),
            blocked_reason: Some("deterministic-failure:TOOL_TIMEOUT".to_string()),
            ..Default::default()
        };
        let signature_id = signature::compute_signature_id(&tuple);
        loop_breaker.record_failure(&signature_id, "task-a", "run-a", now);
        loop_breaker.record_failure(&signature_id, "task-b", "run-b", now);
        loop_breaker.record_failure(&signature_id, "task-c", "run-c", now);

        let step = step_with("craft_recipe", json!({"recipe": "oak_planks", "count": 4}));
        let mut task = task_with_step(&step);
        task.metadata.failure_code = Some("TOOL_TIMEOUT".to_string());
        task.metadata.blocked_reason = Some("deterministic-failure:TOOL_TIMEOUT".to_string());

        let config = ExecutorConfig {
            mode: ExecutionMode::Live,
            ..Default::default()
        };

        let outcome = execute_step(
            &mut task, &step, &ctx, &config, &recorder, &mut loop_breaker, "run-1", now,
        )
        .await;

        assert_eq!(
            outcome,
            TickOutcome::Blocked(block_reasons::LOOP_SUPPRESSED.to_string())
        );
        assert_eq!(ctx.dispatched_tools.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn shadow_mode_loop_breaker_never_suppresses_dispatch() {
        let dir = std::env::temp_dir().join(format!("sterling-exec-test-{}", uuid::Uuid::new_v4()));
        let recorder = GoldenRunRecorder::new(dir);
        let ctx = FakeContext::new(vec!["minecraft.craft_recipe".to_string()]);
        let mut loop_breaker = LoopBreaker::new(LoopBreakerRuntimeMode::Shadow);
        let now = Utc::now();

        let tuple = FailureTuple {
            category: Some(FailureCategory::ToolFailure),
            leaf: "craft_recipe".to_string(),
            failure_code: Some("TOOL_TIMEOUT".to_string()),
            blocked_reason: Some("deterministic-failure:TOOL_TIMEOUT".to_string()),
            ..Default::default()
        };
        let signature_id = signature::compute_signature_id(&tuple);
        loop_breaker.record_failure(&signature_id, "task-a", "run-a", now);
        loop_breaker.record_failure(&signature_id, "task-b", "run-b", now);
        loop_breaker.record_failure(&signature_id, "task-c", "run-c", now);

        let step = step_with("craft_recipe", json!({"recipe": "oak_planks", "count": 4}));
        let mut task = task_with_step(&step);
        task.metadata.failure_code = Some("TOOL_TIMEOUT".to_string());
        task.metadata.blocked_reason = Some("deterministic-failure:TOOL_TIMEOUT".to_string());

        let config = ExecutorConfig {
            mode: ExecutionMode::Live,
            ..Default::default()
        };

        let outcome = execute_step(
            &mut task, &step, &ctx, &config, &recorder, &mut loop_breaker, "run-1", now,
        )
        .await;

        assert_eq!(outcome, TickOutcome::Dispatched);
    }

    #[tokio::test]
    async fn first_dispatch_of_a_building_leaf_is_not_rate_limited() {
        let dir = std::env::temp_dir().join(format!("sterling-exec-test-{}", uuid::Uuid::new_v4()));
        let recorder = GoldenRunRecorder::new(dir);
        let ctx = FakeContext::new(vec!["minecraft.place_block".to_string()]);
        let mut loop_breaker = LoopBreaker::new(LoopBreakerRuntimeMode::Shadow);

        let step = step_with("place_block", json!({"block": "cobblestone", "x": 0, "y": 64, "z": 0}));
        let mut task = task_with_step(&step);

        let config = ExecutorConfig {
            mode: ExecutionMode::Live,
            ..Default::default()
        };

        let outcome = execute_step(
            &mut task,
            &step,
            &ctx,
            &config,
            &recorder,
            &mut loop_breaker,
            "run-1",
            Utc::now(),
        )
        .await;

        assert_eq!(outcome, TickOutcome::Dispatched);
    }

    #[tokio::test]
    async fn deterministic_failure_is_recorded_by_loop_breaker() {
        let dir = std::env::temp_dir().join(format!("sterling-exec-test-{}", uuid::Uuid::new_v4()));
        let recorder = GoldenRunRecorder::new(dir);
        let ctx = FakeContext::new(vec!["minecraft.craft_recipe".to_string()]);
        ctx.queue_result(
            "minecraft.craft_recipe",
            crate::ctx::ActionResult {
                ok: Some(false),
                failure_code: Some("INVALID_RECIPE".to_string()),
                ..Default::default()
            },
        )
        .await;
        let mut loop_breaker = LoopBreaker::new(LoopBreakerRuntimeMode::Active);

        let step = step_with("craft_recipe", json!({"recipe": "oak_planks", "count": 4}));
        let mut task = task_with_step(&step);

        let config = ExecutorConfig {
            mode: ExecutionMode::Live,
            ..Default::default()
        };

        let outcome = execute_step(
            &mut task,
            &step,
            &ctx,
            &config,
            &recorder,
            &mut loop_breaker,
            "run-1",
            Utc::now(),
        )
        .await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(matches!(outcome, TickOutcome::Blocked(_)));

        let report = recorder.get_report("run-1").await.unwrap();
        assert!(report.loop_breaker_evaluated);
    }
}
