//! Loads `Task` and `ExecutorConfig` fixtures from disk for the CLI's `tick` and
//! `replay-run` subcommands.
//!
//! Grounded on the teacher's original loader shape (`fs::read_to_string` +
//! `serde_json::from_str` wrapped in `anyhow::Context`), retargeted from UTDL `Plan`
//! documents to the executor's own `Task` wire format (SPEC_FULL §3).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::ctx::{ActionResult, FakeContext, RecipeInput, ThreatLevel};
use crate::protocol::Task;

pub fn load_task_from_file<P: AsRef<Path>>(path: P) -> Result<Task> {
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read task file at {}", path.as_ref().display()))?;
    let task = serde_json::from_str(&content).context("failed to parse task JSON")?;
    Ok(task)
}

pub fn write_task_to_file<P: AsRef<Path>>(path: P, task: &Task) -> Result<()> {
    let content = serde_json::to_string_pretty(task).context("failed to serialize task")?;
    fs::write(&path, content)
        .with_context(|| format!("failed to write task file at {}", path.as_ref().display()))?;
    Ok(())
}

/// An in-memory `ExecutorContext` fixture for driving `executor tick` standalone
/// (SPEC_FULL §12). Each key in `queued_results` is a tool name (`minecraft.<leaf>`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CtxFixture {
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default)]
    pub inventory: HashMap<String, u64>,
    #[serde(default = "default_true")]
    pub can_execute: bool,
    #[serde(default = "default_true")]
    pub start_step_result: bool,
    #[serde(default)]
    pub threat_level: String,
    #[serde(default)]
    pub queued_results: HashMap<String, Vec<Value>>,
    #[serde(default)]
    pub recipes: HashMap<String, Vec<RecipeInputFixture>>,
}

/// One `recipes.<name>[]` entry in a ctx fixture file (SPEC_FULL §4.5 guard 8).
#[derive(Debug, Clone, Deserialize)]
pub struct RecipeInputFixture {
    pub item: String,
    pub required: u64,
}

fn default_true() -> bool {
    true
}

pub fn load_ctx_fixture_from_file<P: AsRef<Path>>(path: P) -> Result<CtxFixture> {
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read ctx fixture at {}", path.as_ref().display()))?;
    let fixture = serde_json::from_str(&content).context("failed to parse ctx fixture JSON")?;
    Ok(fixture)
}

fn parse_threat_level(level: &str) -> ThreatLevel {
    match level {
        "low" => ThreatLevel::Low,
        "medium" => ThreatLevel::Medium,
        "high" => ThreatLevel::High,
        "critical" => ThreatLevel::Critical,
        _ => ThreatLevel::None,
    }
}

fn action_result_from_json(value: &Value) -> ActionResult {
    ActionResult {
        ok: value.get("ok").and_then(|v| v.as_bool()),
        error: value.get("error").and_then(|v| v.as_str()).map(String::from),
        data: value.get("data").cloned(),
        failure_code: value.get("failure_code").and_then(|v| v.as_str()).map(String::from),
        tool_diagnostics: None,
        metadata: value.get("metadata").cloned(),
    }
}

/// Builds a `FakeContext` from a `CtxFixture`, queueing every scripted tool result in
/// file order.
pub async fn build_fake_context(fixture: CtxFixture) -> FakeContext {
    let ctx = FakeContext::new(fixture.allowlist);
    ctx.can_execute
        .store(fixture.can_execute, std::sync::atomic::Ordering::SeqCst);
    ctx.start_step_result
        .store(fixture.start_step_result, std::sync::atomic::Ordering::SeqCst);
    *ctx.threat_level.lock().await = parse_threat_level(&fixture.threat_level);

    for (item, count) in fixture.inventory {
        ctx.set_inventory(&item, count).await;
    }

    for (recipe, inputs) in fixture.recipes {
        let inputs = inputs
            .into_iter()
            .map(|i| RecipeInput { item: i.item, required: i.required })
            .collect();
        ctx.set_recipe_inputs(&recipe, inputs).await;
    }

    for (tool_name, results) in fixture.queued_results {
        for result in results {
            ctx.queue_result(&tool_name, action_result_from_json(&result)).await;
        }
    }

    ctx
}
