//! Golden-Run Recorder: an append-only, per-run audit ledger (SPEC_FULL §4.3).
//!
//! Grounded on the teacher's `ExecutionReport` (`protocol::ExecutionReport`, written via
//! `serde_json::to_string_pretty` + `fs::write` in `main.rs`), generalized from "write one
//! report at the end of a run" to "append to a live report throughout a run, atomically
//! and idempotently, under concurrent writers". Crates: `serde_json` (wire format),
//! `tokio::sync::Mutex` (per-run single-flight), `uuid`/`chrono` (ids and timestamps),
//! `sha2` (payload fingerprint for throttling).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::config::{
    RECORDER_DECISIONS_CAP, RECORDER_EXPANSION_RETRIES_CAP, RECORDER_STALE_EVICTION_MS,
    RECORDER_TASK_INDEX_LRU_CAP, RECORDER_THROTTLE_WINDOW_MS,
};

/// A single appended decision, the bulk of a golden run's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub reason: String,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VerificationRecord {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutionSection {
    #[serde(default)]
    pub dispatched_steps: Vec<Value>,
    #[serde(default)]
    pub shadow_steps: Vec<Value>,
    #[serde(default)]
    pub decisions: Vec<Decision>,
    #[serde(default)]
    pub verification: Vec<VerificationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_blocked_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_blocked_payload: Option<Value>,
}

/// A per-run golden-run report. Field names mirror SPEC_FULL §4.3's named sections.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GoldenRunReport {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub injection: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sterling_expand_requested: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sterling_expand_result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expansion: Option<Value>,
    #[serde(default)]
    pub expansion_retries: Vec<Value>,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_episode: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_banner: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planning_banner: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflex_proof: Option<Value>,
    pub bridge_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_detected: Option<Value>,
    #[serde(default)]
    pub loop_breaker_evaluated: bool,
}

impl GoldenRunReport {
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            ..Default::default()
        }
    }

    /// `runtime.executor.loop_started` is derived from evidence, not stored state
    /// (SPEC_FULL §4.3 invariant 1).
    pub fn loop_started(&self) -> bool {
        !self.execution.dispatched_steps.is_empty() || !self.execution.shadow_steps.is_empty()
    }

    /// SPEC_FULL §4.3 invariant 2: an artifact with a bridge-enabled runtime cannot claim
    /// certifiability.
    pub fn certifiable(&self) -> bool {
        !self.bridge_enabled
    }
}

struct ThrottleEntry {
    fingerprint: String,
    at: DateTime<Utc>,
}

struct RunState {
    report: GoldenRunReport,
    shadow_step_ids: std::collections::HashSet<String>,
    blocked_throttle: HashMap<String, ThrottleEntry>,
    last_touched: DateTime<Utc>,
}

/// Append-only golden-run ledger. One instance is shared across the executor process.
pub struct GoldenRunRecorder {
    dir: PathBuf,
    runs: Mutex<HashMap<String, Arc<Mutex<RunState>>>>,
    task_index: Mutex<HashMap<String, String>>,
    task_index_order: Mutex<Vec<String>>,
}

/// Strips path separators, `..`, and anything outside `[A-Za-z0-9_-]`; caps at 96 chars;
/// falls back to a fixed name if the result would be empty (SPEC_FULL §4.3 invariant 4).
pub fn sanitize_run_id(run_id: &str) -> String {
    let cleaned: String = run_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    let truncated: String = cleaned.chars().take(96).collect();
    if truncated.is_empty() {
        "run".to_string()
    } else {
        truncated
    }
}

/// A stable, order-independent fingerprint of a JSON payload excluding noise keys
/// (SPEC_FULL §4.3 invariant 5).
fn fingerprint_payload(payload: &Value) -> String {
    const NOISE_KEYS: &[&str] = &[
        "dispatched_at",
        "observed_at",
        "timestamp",
        "updated_at",
        "created_at",
    ];

    let canonical = canonicalize(payload, NOISE_KEYS);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn canonicalize(value: &Value, noise_keys: &[&str]) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().filter(|k| !noise_keys.contains(&k.as_str())).collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", k, canonicalize(&map[k], noise_keys)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(|v| canonicalize(v, noise_keys)).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

impl GoldenRunRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            runs: Mutex::new(HashMap::new()),
            task_index: Mutex::new(HashMap::new()),
            task_index_order: Mutex::new(Vec::new()),
        }
    }

    async fn run_state(&self, run_id: &str) -> Arc<Mutex<RunState>> {
        self.evict_stale_runs(Utc::now()).await;
        let sanitized = sanitize_run_id(run_id);
        let mut runs = self.runs.lock().await;
        runs.entry(sanitized.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(RunState {
                    report: GoldenRunReport::new(&sanitized),
                    shadow_step_ids: std::collections::HashSet::new(),
                    blocked_throttle: HashMap::new(),
                    last_touched: Utc::now(),
                }))
            })
            .clone()
    }

    pub async fn record_injection(&self, run_id: &str, payload: Value) {
        let state = self.run_state(run_id).await;
        let mut guard = state.lock().await;
        guard.report.injection = Some(payload);
        guard.last_touched = Utc::now();
    }

    pub async fn record_runtime(&self, run_id: &str, payload: Value) {
        let state = self.run_state(run_id).await;
        let mut guard = state.lock().await;
        guard.report.runtime = Some(payload);
        guard.last_touched = Utc::now();
    }

    pub async fn record_task(&self, run_id: &str, task_id: &str, payload: Value) {
        let state = self.run_state(run_id).await;
        {
            let mut guard = state.lock().await;
            guard.report.task = Some(payload);
            guard.last_touched = Utc::now();
        }
        self.index_task(task_id, run_id).await;
    }

    pub async fn record_expansion(&self, run_id: &str, payload: Value) {
        let state = self.run_state(run_id).await;
        let mut guard = state.lock().await;
        guard.report.expansion = Some(payload);
        guard.last_touched = Utc::now();
    }

    pub async fn record_server_banner(&self, run_id: &str, banner: Value) {
        let state = self.run_state(run_id).await;
        let mut guard = state.lock().await;
        guard.report.server_banner = Some(banner);
        guard.last_touched = Utc::now();
    }

    pub async fn record_planning_banner(
        &self,
        run_id: &str,
        banner: Value,
        config_digest: &str,
        bridge_enabled: bool,
    ) {
        let state = self.run_state(run_id).await;
        let mut guard = state.lock().await;
        guard.report.planning_banner = Some(serde_json::json!({
            "banner": banner,
            "config_digest": config_digest,
        }));
        guard.report.bridge_enabled = bridge_enabled;
        guard.last_touched = Utc::now();
    }

    pub async fn record_sterling_expand_requested(&self, run_id: &str, payload: Value) {
        let state = self.run_state(run_id).await;
        let mut guard = state.lock().await;
        guard.report.sterling_expand_requested = Some(payload);
        guard.last_touched = Utc::now();
    }

    pub async fn record_sterling_expand_result(&self, run_id: &str, payload: Value) {
        let state = self.run_state(run_id).await;
        let mut guard = state.lock().await;
        guard.report.sterling_expand_result = Some(payload);
        guard.last_touched = Utc::now();
    }

    /// Bounded at `RECORDER_EXPANSION_RETRIES_CAP` entries (oldest dropped first).
    pub async fn record_expansion_retry(&self, run_id: &str, entry: Value) {
        let state = self.run_state(run_id).await;
        let mut guard = state.lock().await;
        guard.report.expansion_retries.push(entry);
        if guard.report.expansion_retries.len() > RECORDER_EXPANSION_RETRIES_CAP {
            let overflow = guard.report.expansion_retries.len() - RECORDER_EXPANSION_RETRIES_CAP;
            guard.report.expansion_retries.drain(0..overflow);
        }
        guard.last_touched = Utc::now();
    }

    /// Appends to `dispatched_steps`, appends a `dispatch` decision, and clears any prior
    /// `executor_blocked_*` state (SPEC_FULL §4.3).
    pub async fn record_dispatch(&self, run_id: &str, step: Value) {
        let state = self.run_state(run_id).await;
        let mut guard = state.lock().await;
        guard.report.execution.dispatched_steps.push(step);
        push_decision(&mut guard.report.execution.decisions, "dispatch", None);
        guard.report.execution.executor_blocked_reason = None;
        guard.report.execution.executor_blocked_payload = None;
        guard.last_touched = Utc::now();
    }

    /// Idempotent per `step_id` within a run.
    pub async fn record_shadow_dispatch(&self, run_id: &str, step_id: &str, step: Value) {
        let state = self.run_state(run_id).await;
        let mut guard = state.lock().await;
        if guard.shadow_step_ids.contains(step_id) {
            return;
        }
        guard.shadow_step_ids.insert(step_id.to_string());
        guard.report.execution.shadow_steps.push(step);
        push_decision(&mut guard.report.execution.decisions, "shadow", None);
        guard.last_touched = Utc::now();
    }

    pub async fn record_verification(&self, run_id: &str, record: VerificationRecord) {
        let state = self.run_state(run_id).await;
        let mut guard = state.lock().await;
        guard.report.execution.verification.push(record);
        guard.last_touched = Utc::now();
    }

    /// Throttled: for the same `(run_id, reason, leaf)` key with an identical payload
    /// fingerprint within `RECORDER_THROTTLE_WINDOW_MS`, no write occurs (SPEC_FULL §4.3).
    pub async fn record_executor_blocked(
        &self,
        run_id: &str,
        reason: &str,
        leaf: &str,
        payload: Option<Value>,
        task_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        let state = self.run_state(run_id).await;
        let throttle_key = format!("{}:{}", reason, leaf);
        let fingerprint = payload
            .as_ref()
            .map(fingerprint_payload)
            .unwrap_or_default();

        {
            let mut guard = state.lock().await;
            if let Some(entry) = guard.blocked_throttle.get(&throttle_key) {
                let elapsed = (now - entry.at).num_milliseconds();
                if entry.fingerprint == fingerprint && elapsed < RECORDER_THROTTLE_WINDOW_MS {
                    return false;
                }
            }

            guard.blocked_throttle.insert(
                throttle_key,
                ThrottleEntry {
                    fingerprint,
                    at: now,
                },
            );
            guard.report.execution.executor_blocked_reason = Some(reason.to_string());
            guard.report.execution.executor_blocked_payload = payload.clone();
            push_decision(
                &mut guard.report.execution.decisions,
                "executor_blocked",
                payload,
            );
            guard.last_touched = now;
        }

        if let Some(task_id) = task_id {
            self.index_task(task_id, run_id).await;
        }

        true
    }

    pub async fn record_regeneration_attempt(&self, run_id: &str, success: bool, reason: &str) {
        let state = self.run_state(run_id).await;
        let mut guard = state.lock().await;
        let decision_reason = if success { "regen_success" } else { reason };
        push_decision(&mut guard.report.execution.decisions, decision_reason, None);
        guard.last_touched = Utc::now();
    }

    pub async fn record_leaf_rewrite_used(&self, run_id: &str, leaf: &str, original_leaf: &str) {
        let state = self.run_state(run_id).await;
        let mut guard = state.lock().await;
        push_decision(
            &mut guard.report.execution.decisions,
            "rewrite_used",
            Some(serde_json::json!({ "leaf": leaf, "original_leaf": original_leaf })),
        );
        guard.last_touched = Utc::now();
    }

    pub async fn record_loop_detected(&self, run_id: &str, episode: Value) {
        let state = self.run_state(run_id).await;
        let mut guard = state.lock().await;
        guard.report.loop_detected = Some(episode);
        guard.last_touched = Utc::now();
    }

    pub async fn mark_loop_breaker_evaluated(&self, run_id: &str) {
        let state = self.run_state(run_id).await;
        let mut guard = state.lock().await;
        guard.report.loop_breaker_evaluated = true;
        guard.last_touched = Utc::now();
    }

    pub async fn record_reflex_proof(&self, run_id: &str, bundle: Value) {
        let state = self.run_state(run_id).await;
        let mut guard = state.lock().await;
        guard.report.reflex_proof = Some(bundle);
        guard.last_touched = Utc::now();
    }

    /// Writes the current state to disk: serialize, write to a temp file, then rename.
    /// The per-run mutex already serializes concurrent writers FIFO (SPEC_FULL §4.3
    /// invariant 3).
    pub async fn flush_run(&self, run_id: &str) -> std::io::Result<()> {
        let state = self.run_state(run_id).await;
        let guard = state.lock().await;
        let sanitized = sanitize_run_id(run_id);
        self.write_atomic(&sanitized, &guard.report)
    }

    fn write_atomic(&self, sanitized_run_id: &str, report: &GoldenRunReport) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let final_path = self.dir.join(format!("{}.json", sanitized_run_id));
        let temp_path = self.dir.join(format!("{}.json.tmp", sanitized_run_id));
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&temp_path, json)?;
        std::fs::rename(&temp_path, &final_path)?;
        Ok(())
    }

    pub async fn get_report(&self, run_id: &str) -> Option<GoldenRunReport> {
        let sanitized = sanitize_run_id(run_id);
        let runs = self.runs.lock().await;
        let state = runs.get(&sanitized)?.clone();
        drop(runs);
        let guard = state.lock().await;
        Some(guard.report.clone())
    }

    pub async fn get_latest_report_by_task_id(&self, task_id: &str) -> Option<GoldenRunReport> {
        let index = self.task_index.lock().await;
        let run_id = index.get(task_id)?.clone();
        drop(index);
        self.get_report(&run_id).await
    }

    pub fn get_report_from_disk(&self, run_id: &str) -> std::io::Result<GoldenRunReport> {
        let sanitized = sanitize_run_id(run_id);
        let path = self.path_for(&sanitized);
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    fn path_for(&self, sanitized_run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitized_run_id))
    }

    /// Maintains a `taskId → latestRunId` index with LRU eviction at
    /// `RECORDER_TASK_INDEX_LRU_CAP` entries (SPEC_FULL §4.3 invariant 6).
    async fn index_task(&self, task_id: &str, run_id: &str) {
        let sanitized = sanitize_run_id(run_id);
        let mut index = self.task_index.lock().await;
        let mut order = self.task_index_order.lock().await;

        if index.contains_key(task_id) {
            order.retain(|k| k != task_id);
        }
        index.insert(task_id.to_string(), sanitized);
        order.push(task_id.to_string());

        while index.len() > RECORDER_TASK_INDEX_LRU_CAP {
            if let Some(oldest) = order.first().cloned() {
                order.remove(0);
                index.remove(&oldest);
            } else {
                break;
            }
        }
    }

    /// Evicts throttle/shadow state for runs inactive more than
    /// `RECORDER_STALE_EVICTION_MS` (SPEC_FULL §4.3 invariant 7). Invoked by `run_state`
    /// at the top of every mutating call, before that call takes its own per-run lock.
    pub async fn evict_stale_runs(&self, now: DateTime<Utc>) {
        let mut runs = self.runs.lock().await;
        let cutoff = now - chrono::Duration::milliseconds(RECORDER_STALE_EVICTION_MS);
        let mut stale_keys = Vec::new();
        for (key, state) in runs.iter() {
            let guard = state.lock().await;
            if guard.last_touched < cutoff {
                stale_keys.push(key.clone());
            }
        }
        for key in stale_keys {
            runs.remove(&key);
        }
    }
}

fn push_decision(decisions: &mut Vec<Decision>, reason: &str, detail: Option<Value>) {
    decisions.push(Decision {
        reason: reason.to_string(),
        at: Utc::now(),
        detail,
    });
    if decisions.len() > RECORDER_DECISIONS_CAP {
        let overflow = decisions.len() - RECORDER_DECISIONS_CAP;
        decisions.drain(0..overflow);
    }
}

#[allow(dead_code)]
fn default_recorder_dir() -> PathBuf {
    Path::new(".").join("golden_runs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_run_id_strips_path_separators_and_dotdot() {
        assert_eq!(sanitize_run_id("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_run_id(""), "run");
        assert_eq!(sanitize_run_id("run_123-ABC"), "run_123-ABC");
    }

    #[test]
    fn sanitize_run_id_caps_length() {
        let long = "a".repeat(200);
        assert_eq!(sanitize_run_id(&long).len(), 96);
    }

    #[tokio::test]
    async fn record_dispatch_clears_prior_blocked_state() {
        let dir = std::env::temp_dir().join(format!("sterling-recorder-test-{}", uuid::Uuid::new_v4()));
        let recorder = GoldenRunRecorder::new(dir);

        recorder
            .record_executor_blocked(
                "run-1",
                "rate_limited",
                "craft_recipe",
                Some(serde_json::json!({"x": 1})),
                None,
                Utc::now(),
            )
            .await;

        let report = recorder.get_report("run-1").await.unwrap();
        assert!(report.execution.executor_blocked_reason.is_some());

        recorder
            .record_dispatch("run-1", serde_json::json!({"step_id": "s1"}))
            .await;

        let report = recorder.get_report("run-1").await.unwrap();
        assert!(report.execution.executor_blocked_reason.is_none());
        assert_eq!(report.execution.dispatched_steps.len(), 1);
    }

    #[tokio::test]
    async fn record_executor_blocked_throttles_identical_payload() {
        let dir = std::env::temp_dir().join(format!("sterling-recorder-test-{}", uuid::Uuid::new_v4()));
        let recorder = GoldenRunRecorder::new(dir);
        let now = Utc::now();
        let payload = Some(serde_json::json!({"detail": "x", "timestamp": "irrelevant-1"}));

        let first = recorder
            .record_executor_blocked("run-1", "rate_limited", "craft_recipe", payload.clone(), None, now)
            .await;
        assert!(first);

        let payload_with_different_timestamp =
            Some(serde_json::json!({"detail": "x", "timestamp": "irrelevant-2"}));
        let second = recorder
            .record_executor_blocked(
                "run-1",
                "rate_limited",
                "craft_recipe",
                payload_with_different_timestamp,
                None,
                now + chrono::Duration::milliseconds(1_000),
            )
            .await;
        assert!(!second, "identical payload modulo noise keys should be throttled");

        let later = now + chrono::Duration::milliseconds(RECORDER_THROTTLE_WINDOW_MS + 1);
        let third = recorder
            .record_executor_blocked("run-1", "rate_limited", "craft_recipe", payload, None, later)
            .await;
        assert!(third, "after the throttle window elapses a write should occur");
    }

    #[tokio::test]
    async fn record_shadow_dispatch_is_idempotent_per_step_id() {
        let dir = std::env::temp_dir().join(format!("sterling-recorder-test-{}", uuid::Uuid::new_v4()));
        let recorder = GoldenRunRecorder::new(dir);

        recorder
            .record_shadow_dispatch("run-1", "step-1", serde_json::json!({"step_id": "step-1"}))
            .await;
        recorder
            .record_shadow_dispatch("run-1", "step-1", serde_json::json!({"step_id": "step-1"}))
            .await;

        let report = recorder.get_report("run-1").await.unwrap();
        assert_eq!(report.execution.shadow_steps.len(), 1);
    }

    #[tokio::test]
    async fn loop_started_is_derived_from_dispatch_evidence() {
        let dir = std::env::temp_dir().join(format!("sterling-recorder-test-{}", uuid::Uuid::new_v4()));
        let recorder = GoldenRunRecorder::new(dir);

        let report = recorder.get_report("run-1").await;
        assert!(report.is_none());

        recorder
            .record_dispatch("run-1", serde_json::json!({"step_id": "s1"}))
            .await;
        let report = recorder.get_report("run-1").await.unwrap();
        assert!(report.loop_started());
    }

    #[tokio::test]
    async fn certifiable_is_false_when_bridge_enabled() {
        let dir = std::env::temp_dir().join(format!("sterling-recorder-test-{}", uuid::Uuid::new_v4()));
        let recorder = GoldenRunRecorder::new(dir);

        recorder
            .record_planning_banner("run-1", serde_json::json!({}), "digest-1", true)
            .await;

        let report = recorder.get_report("run-1").await.unwrap();
        assert!(!report.certifiable());
    }

    #[tokio::test]
    async fn flush_run_writes_atomically_to_disk() {
        let dir = std::env::temp_dir().join(format!("sterling-recorder-test-{}", uuid::Uuid::new_v4()));
        let recorder = GoldenRunRecorder::new(dir.clone());

        recorder
            .record_dispatch("run-1", serde_json::json!({"step_id": "s1"}))
            .await;
        recorder.flush_run("run-1").await.unwrap();

        let from_disk = recorder.get_report_from_disk("run-1").unwrap();
        assert_eq!(from_disk.execution.dispatched_steps.len(), 1);

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn stale_run_state_is_evicted_opportunistically_on_the_next_write() {
        let dir = std::env::temp_dir().join(format!("sterling-recorder-test-{}", uuid::Uuid::new_v4()));
        let recorder = GoldenRunRecorder::new(dir);
        let now = Utc::now();

        recorder
            .record_dispatch("run-1", serde_json::json!({"step_id": "s1"}))
            .await;
        assert!(recorder.get_report("run-1").await.is_some());

        let later = now + chrono::Duration::milliseconds(RECORDER_STALE_EVICTION_MS + 60_000);
        recorder.evict_stale_runs(later).await;
        assert!(recorder.get_report("run-1").await.is_none());

        recorder
            .record_dispatch("run-2", serde_json::json!({"step_id": "s2"}))
            .await;
        assert!(recorder.get_report("run-2").await.is_some());
    }

    #[tokio::test]
    async fn task_index_tracks_latest_run_for_task() {
        let dir = std::env::temp_dir().join(format!("sterling-recorder-test-{}", uuid::Uuid::new_v4()));
        let recorder = GoldenRunRecorder::new(dir);

        recorder
            .record_task("run-1", "task-1", serde_json::json!({"id": "task-1"}))
            .await;

        let report = recorder.get_latest_report_by_task_id("task-1").await;
        assert!(report.is_some());
        assert_eq!(report.unwrap().run_id, "run-1");
    }
}
