//! Layered configuration for the executor: compiled-in defaults, overridable by
//! environment variables (SPEC_FULL §6, §11).
//!
//! Mirrors `runner`'s `ExecutionLimits::from_env` shape: start from `Default`, walk a
//! fixed list of env vars, parse and clamp into place.

use std::collections::HashSet;
use std::time::Duration;

pub const DETERMINISTIC_BLOCK_BACKOFF_MS: i64 = 300_000;
pub const TRANSIENT_BLOCK_BACKOFF_MS: i64 = 30_000;
pub const PLANNING_INCOMPLETE_BACKOFF_MS: i64 = 300_000;
pub const RECOVERY_MAX_ACTIONS: u32 = 3;
pub const MAX_RETRY_BACKOFF_MS: i64 = 30_000;
pub const LOOP_BREAKER_MAX_SIGNATURES: usize = 500;
pub const LOOP_BREAKER_WINDOW_MS: i64 = 5 * 60 * 1000;
pub const LOOP_BREAKER_THRESHOLD: usize = 3;
pub const LOOP_BREAKER_SUPPRESSION_TTL_MS: i64 = 10 * 60 * 1000;
pub const RECORDER_DECISIONS_CAP: usize = 200;
pub const RECORDER_EXPANSION_RETRIES_CAP: usize = 20;
pub const RECORDER_THROTTLE_WINDOW_MS: i64 = 5_000;
pub const RECORDER_TASK_INDEX_LRU_CAP: usize = 500;
pub const RECORDER_STALE_EVICTION_MS: i64 = 15 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Shadow,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopBreakerMode {
    Shadow,
    Active,
}

/// Runtime configuration for a single executor process (SPEC_FULL §6 "Configuration").
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub mode: ExecutionMode,
    pub build_exec_budget_disabled: bool,
    pub build_exec_max_attempts: u32,
    pub build_exec_min_interval: Duration,
    pub build_exec_max_elapsed: Duration,
    pub building_leaves: HashSet<String>,
    pub task_type_bridge_leaf_names: HashSet<String>,
    pub enable_task_type_bridge: bool,
    pub bridge_enabled: bool,
    pub legacy_leaf_rewrite_enabled: bool,
    pub loop_breaker_mode: LoopBreakerMode,
    pub memory_endpoint: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Live,
            build_exec_budget_disabled: false,
            build_exec_max_attempts: 8,
            build_exec_min_interval: Duration::from_millis(1_500),
            build_exec_max_elapsed: Duration::from_secs(120),
            building_leaves: ["place_block", "place_workstation"]
                .into_iter()
                .map(String::from)
                .collect(),
            task_type_bridge_leaf_names: HashSet::new(),
            enable_task_type_bridge: false,
            bridge_enabled: false,
            legacy_leaf_rewrite_enabled: true,
            // Shadow mode is the documented default (SPEC_FULL §4.2).
            loop_breaker_mode: LoopBreakerMode::Shadow,
            memory_endpoint: "http://localhost:3001/memory/hints".to_string(),
        }
    }
}

impl ExecutorConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("EXECUTOR_MODE") {
            config.mode = match val.as_str() {
                "shadow" => ExecutionMode::Shadow,
                "live" => ExecutionMode::Live,
                _ => config.mode,
            };
        }

        if let Ok(val) = std::env::var("BUILD_EXEC_BUDGET_DISABLED") {
            config.build_exec_budget_disabled = parse_bool(&val, config.build_exec_budget_disabled);
        }

        if let Ok(val) = std::env::var("BUILD_EXEC_MAX_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                config.build_exec_max_attempts = n;
            }
        }

        if let Ok(val) = std::env::var("BUILD_EXEC_MIN_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                config.build_exec_min_interval = Duration::from_millis(n);
            }
        }

        if let Ok(val) = std::env::var("BUILD_EXEC_MAX_ELAPSED_MS") {
            if let Ok(n) = val.parse() {
                config.build_exec_max_elapsed = Duration::from_millis(n);
            }
        }

        if let Ok(val) = std::env::var("ENABLE_TASK_TYPE_BRIDGE") {
            config.enable_task_type_bridge = parse_bool(&val, config.enable_task_type_bridge);
        }

        if let Ok(val) = std::env::var("BRIDGE_ENABLED") {
            config.bridge_enabled = parse_bool(&val, config.bridge_enabled);
        }

        if let Ok(val) = std::env::var("LEGACY_LEAF_REWRITE_ENABLED") {
            config.legacy_leaf_rewrite_enabled = parse_bool(&val, config.legacy_leaf_rewrite_enabled);
        }

        if let Ok(val) = std::env::var("LOOP_BREAKER_ENABLED") {
            config.loop_breaker_mode = if parse_bool(&val, false) {
                LoopBreakerMode::Active
            } else {
                LoopBreakerMode::Shadow
            };
        }

        if let Ok(val) = std::env::var("MEMORY_ENDPOINT") {
            config.memory_endpoint = val;
        }

        config
    }
}

fn parse_bool(val: &str, default: bool) -> bool {
    match val.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => true,
        "0" | "false" | "no" => false,
        _ => default,
    }
}
