//! Loop Breaker: detects repeated failures of the same semantic signature across
//! different tasks and optionally suppresses retries (SPEC_FULL §4.2).
//!
//! No direct teacher analogue exists (the teacher has no cross-task loop detector); this
//! follows the general sliding-window-plus-LRU shape used by the recorder's task index
//! and by agent-recovery material in the example pack.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};

use crate::config::{
    LOOP_BREAKER_MAX_SIGNATURES, LOOP_BREAKER_SUPPRESSION_TTL_MS, LOOP_BREAKER_THRESHOLD,
    LOOP_BREAKER_WINDOW_MS,
};
use crate::signature::FailureSignature;

/// One observed failure of a signature, for sliding-window accounting.
#[derive(Debug, Clone)]
struct WindowEvent {
    at: DateTime<Utc>,
    task_id: String,
    #[allow(dead_code)]
    run_id: String,
}

#[derive(Debug, Default)]
struct SignatureWindow {
    events: VecDeque<WindowEvent>,
    seen_task_ids: HashSet<String>,
    last_seen: DateTime<Utc>,
}

/// Emitted when a signature crosses `threshold` unique tasks within `windowMs`
/// (SPEC_FULL §4.2 step 4).
#[derive(Debug, Clone)]
pub struct LoopDetectedEpisode {
    pub signature_id: String,
    pub occurrence_count: usize,
    pub window_ms: i64,
    pub suppressed_until: DateTime<Utc>,
    pub contributing_task_ids: Vec<String>,
    pub mode: LoopBreakerRuntimeMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopBreakerRuntimeMode {
    Shadow,
    Active,
}

/// Per-process, in-memory loop detector. Not persisted across restarts — acceptable
/// because suppression TTLs are short (SPEC_FULL §4.2).
pub struct LoopBreaker {
    mode: LoopBreakerRuntimeMode,
    max_signatures: usize,
    window_ms: i64,
    threshold: usize,
    suppression_ttl_ms: i64,
    windows: HashMap<String, SignatureWindow>,
    suppressed_until: HashMap<String, DateTime<Utc>>,
}

impl LoopBreaker {
    pub fn new(mode: LoopBreakerRuntimeMode) -> Self {
        Self {
            mode,
            max_signatures: LOOP_BREAKER_MAX_SIGNATURES,
            window_ms: LOOP_BREAKER_WINDOW_MS,
            threshold: LOOP_BREAKER_THRESHOLD,
            suppression_ttl_ms: LOOP_BREAKER_SUPPRESSION_TTL_MS,
            windows: HashMap::new(),
            suppressed_until: HashMap::new(),
        }
    }

    pub fn mode(&self) -> LoopBreakerRuntimeMode {
        self.mode
    }

    /// Records one failure occurrence. Returns `Some(episode)` if this occurrence pushed
    /// the signature's window over `threshold` unique task ids, in which case the window
    /// is reset (SPEC_FULL §4.2 steps 1-4).
    pub fn record_failure(
        &mut self,
        signature: &FailureSignature,
        task_id: &str,
        run_id: &str,
        now: DateTime<Utc>,
    ) -> Option<LoopDetectedEpisode> {
        self.evict_lru_if_needed(signature.as_str());

        let window = self
            .windows
            .entry(signature.as_str().to_string())
            .or_default();
        window.last_seen = now;

        if window.seen_task_ids.contains(task_id) {
            return None;
        }

        window.events.push_back(WindowEvent {
            at: now,
            task_id: task_id.to_string(),
            run_id: run_id.to_string(),
        });
        window.seen_task_ids.insert(task_id.to_string());

        let cutoff = now - chrono::Duration::milliseconds(self.window_ms);
        while let Some(front) = window.events.front() {
            if front.at < cutoff {
                let evicted = window.events.pop_front().unwrap();
                window.seen_task_ids.remove(&evicted.task_id);
            } else {
                break;
            }
        }

        let unique_task_ids: HashSet<&str> =
            window.events.iter().map(|e| e.task_id.as_str()).collect();

        if unique_task_ids.len() < self.threshold {
            return None;
        }

        let occurrence_count = window.events.len();
        let contributing_task_ids: Vec<String> =
            window.events.iter().map(|e| e.task_id.clone()).collect();
        let suppressed_until = now + chrono::Duration::milliseconds(self.suppression_ttl_ms);

        self.suppressed_until
            .insert(signature.as_str().to_string(), suppressed_until);

        window.events.clear();
        window.seen_task_ids.clear();

        Some(LoopDetectedEpisode {
            signature_id: signature.as_str().to_string(),
            occurrence_count,
            window_ms: self.window_ms,
            suppressed_until,
            contributing_task_ids,
            mode: self.mode,
        })
    }

    /// `false` in shadow mode unconditionally; otherwise `true` iff `suppressedUntil` is
    /// still in the future for this signature (SPEC_FULL §4.2 `isSuppressed`). Expired
    /// entries are cleaned lazily.
    pub fn is_suppressed(&mut self, signature_id: &str, now: DateTime<Utc>) -> bool {
        if self.mode == LoopBreakerRuntimeMode::Shadow {
            return false;
        }

        match self.suppressed_until.get(signature_id).copied() {
            Some(until) if until > now => true,
            Some(_) => {
                self.suppressed_until.remove(signature_id);
                false
            }
            None => false,
        }
    }

    fn evict_lru_if_needed(&mut self, incoming_signature: &str) {
        if self.windows.len() < self.max_signatures || self.windows.contains_key(incoming_signature)
        {
            return;
        }

        if let Some(oldest_key) = self
            .windows
            .iter()
            .min_by_key(|(_, w)| w.last_seen)
            .map(|(k, _)| k.clone())
        {
            self.windows.remove(&oldest_key);
            self.suppressed_until.remove(&oldest_key);
        }
    }
}
