//! Recovery Injector: a doom-loop breaker for tool failures that ask to reposition or
//! rescan rather than simply retry (SPEC_FULL §4.6).
//!
//! Grounded on SPEC_FULL §4.6; dispatch shape mirrors `executor`'s own
//! `ctx.execute_tool` call, generalized into its own module since the recovery path has
//! a distinct budget and mode-selection policy from the main retry ramp.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::backoff::next_eligible_at;
use crate::config::RECOVERY_MAX_ACTIONS;
use crate::ctx::{ExecutorContext, ThreatLevel};
use crate::executor::TickOutcome;
use crate::loop_breaker::LoopBreaker;
use crate::protocol::{block_reasons, LeafExecution, Task, TaskStatus};
use crate::recorder::GoldenRunRecorder;
use crate::signature::{self, FailureCategory, FailureTuple};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecoveryMode {
    Retreat,
    Explore,
    Reposition,
}

impl RecoveryMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Retreat => "retreat",
            Self::Explore => "explore",
            Self::Reposition => "reposition",
        }
    }

    fn tool_name(&self) -> &'static str {
        match self {
            Self::Retreat => "minecraft.retreat_from_threat",
            Self::Explore => "minecraft.explore_for_resources",
            Self::Reposition => "minecraft.step_forward_safely",
        }
    }
}

/// Runs the Recovery Injector for one failed dispatch whose diagnostics asked for
/// `reposition_or_rescan` (SPEC_FULL §4.6).
pub async fn inject_recovery(
    task: &mut Task,
    leaf_exec: &LeafExecution,
    ctx: &dyn ExecutorContext,
    recorder: &GoldenRunRecorder,
    loop_breaker: &mut LoopBreaker,
    run_id: &str,
    now: DateTime<Utc>,
) -> TickOutcome {
    let recovery_action_count = task.metadata.recovery_action_count;
    let reposition_retry_count = task.metadata.reposition_retry_count;

    // Step 1: recovery budget exhausted.
    if recovery_action_count >= RECOVERY_MAX_ACTIONS {
        task.metadata.last_recovery_outcome = Some("budget_exhausted".to_string());
        task.metadata.next_eligible_at = Some(next_eligible_at(now, 60_000).timestamp_millis());
        return TickOutcome::Blocked("recovery_budget_exhausted".to_string());
    }

    // Step 2: terminate after RECOVERY_MAX_ACTIONS + 1 reposition retries overall.
    if reposition_retry_count + 1 >= RECOVERY_MAX_ACTIONS + 1 {
        task.metadata.blocked_reason = Some(block_reasons::MAX_RETRIES_EXCEEDED.to_string());
        task.metadata.blocked_at = Some(now.timestamp_millis());
        task.status = TaskStatus::Failed;
        observe_recovery_failure(
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

    // Step 3: threat snapshot.
    let threat = ctx.get_threat_snapshot().await;

    // Step 4: choose recovery mode.
    let (mode, args) = if threat.overall_threat_level >= ThreatLevel::Medium {
        (RecoveryMode::Retreat, json!({"retreatDistance": 15}))
    } else if leaf_exec_is_acquisition(leaf_exec) {
        if reposition_retry_count < 2 {
            let item = leaf_exec.args.get("item").and_then(|v| v.as_str());
            (
                RecoveryMode::Explore,
                json!({
                    "reason": "recovery_reposition",
                    "resource_tags": item.map(|i| vec![i]).unwrap_or_default(),
                }),
            )
        } else {
            (RecoveryMode::Explore, json!({"reason": "recovery_broadened"}))
        }
    } else {
        (RecoveryMode::Reposition, json!({"distance": 2.0}))
    };

    // Step 5: dispatch.
    let abort_signal = ctx.get_abort_signal();
    let result = ctx.execute_tool(mode.tool_name(), &args, &abort_signal).await;

    recorder
        .record_dispatch(
            run_id,
            json!({
                "step_id": format!("recovery-{}", uuid::Uuid::new_v4()),
                "leaf": mode.tool_name(),
                "recovery_mode": mode.as_str(),
                "recovery_for_task": task.id,
            }),
        )
        .await;

    // Step 6: outcome bookkeeping.
    if result.ok == Some(true) {
        task.metadata.last_recovery_outcome = Some("success".to_string());
        task.metadata.last_recovery_leaf = Some(
            mode.tool_name()
                .strip_prefix("minecraft.")
                .unwrap_or(mode.tool_name())
                .to_string(),
        );
        task.metadata.last_recovery_mode = Some(mode.as_str().to_string());
        task.metadata.recovery_action_count = recovery_action_count + 1;
        task.metadata.reposition_retry_count = reposition_retry_count + 1;
        task.metadata.next_eligible_at = Some(next_eligible_at(now, 5_000).timestamp_millis());
    } else {
        task.metadata.last_recovery_outcome = Some("failure".to_string());
        task.metadata.recovery_action_count = recovery_action_count + 1;
        task.metadata.reposition_retry_count = reposition_retry_count + 1;
        task.metadata.next_eligible_at = Some(next_eligible_at(now, 10_000).timestamp_millis());
        observe_recovery_failure(
            loop_breaker,
            recorder,
            run_id,
            &task.id,
            FailureTuple {
                category: Some(FailureCategory::ToolFailure),
                leaf: mode.tool_name().to_string(),
                failure_code: result.failure_code.clone(),
                blocked_reason: Some("recovery_failed".to_string()),
                ..Default::default()
            },
            now,
        )
        .await;
    }

    TickOutcome::RecoveryDispatched
}

fn leaf_exec_is_acquisition(leaf_exec: &LeafExecution) -> bool {
    crate::protocol::LeafKind::from_name(&leaf_exec.leaf_name)
        .map(|k| k.is_acquisition())
        .unwrap_or(false)
}

/// Computes the failure signature for `tuple`, records the occurrence with the Loop
/// Breaker, and persists any resulting episode (SPEC_FULL §4.2, §4.3).
async fn observe_recovery_failure(
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
