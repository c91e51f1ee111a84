//! Backoff computation for the retry/backoff state machine (SPEC_FULL §4.5, §7).
//!
//! Three distinct policies apply depending on why a step was blocked:
//! - deterministic block (config/planner/allowlist problem): fixed 5-minute backoff,
//! - transient block (rate limit, navigation busy, safety preemption): fixed 30-second
//!   backoff,
//! - non-deterministic tool failure: exponential, `1000 * 2^retryCount` capped at 30s.
//!
//! Grounded on `runner/src/retry/mod.rs`'s `RecoveryStrategy::Retry` backoff-factor math,
//! generalized from "retry an HTTP assertion with a configurable factor" to "retry a task
//! step with the executor's fixed exponential schedule".

use chrono::{DateTime, Utc};

use crate::config::{
    DETERMINISTIC_BLOCK_BACKOFF_MS, MAX_RETRY_BACKOFF_MS, TRANSIENT_BLOCK_BACKOFF_MS,
};

/// Why a step is being blocked, for the purpose of choosing a backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Deterministic,
    Transient,
}

/// Fixed backoff for deterministic and transient blocks (SPEC_FULL §7).
pub fn fixed_backoff_ms(kind: BlockKind) -> i64 {
    match kind {
        BlockKind::Deterministic => DETERMINISTIC_BLOCK_BACKOFF_MS,
        BlockKind::Transient => TRANSIENT_BLOCK_BACKOFF_MS,
    }
}

/// Exponential backoff for a non-deterministic tool failure: `1000 * 2^retry_count`,
/// capped at `MAX_RETRY_BACKOFF_MS` (SPEC_FULL §4.5 step 18: "backoffMs = min(1000 *
/// 2^retryCount, 30_000)"). `retry_count` is the count *after* incrementing for this
/// failure.
pub fn exponential_backoff_ms(retry_count: u32) -> i64 {
    let shift = retry_count.min(20);
    let scaled = 1000i64.saturating_mul(1i64 << shift);
    scaled.min(MAX_RETRY_BACKOFF_MS)
}

/// `now + backoff_ms` as an RFC3339-capable timestamp, the value written to
/// `metadata.nextEligibleAt`.
pub fn next_eligible_at(now: DateTime<Utc>, backoff_ms: i64) -> DateTime<Utc> {
    now + chrono::Duration::milliseconds(backoff_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_backoff_is_five_minutes() {
        assert_eq!(fixed_backoff_ms(BlockKind::Deterministic), 300_000);
    }

    #[test]
    fn transient_backoff_is_thirty_seconds() {
        assert_eq!(fixed_backoff_ms(BlockKind::Transient), 30_000);
    }

    #[test]
    fn exponential_backoff_doubles_then_caps() {
        assert_eq!(exponential_backoff_ms(0), 1_000);
        assert_eq!(exponential_backoff_ms(1), 2_000);
        assert_eq!(exponential_backoff_ms(2), 4_000);
        assert_eq!(exponential_backoff_ms(5), 30_000);
        assert_eq!(exponential_backoff_ms(30), 30_000);
    }

    #[test]
    fn next_eligible_at_adds_backoff_window() {
        let now = Utc::now();
        let later = next_eligible_at(now, 300_000);
        let delta = (later - now).num_milliseconds();
        assert_eq!(delta, 300_000);
    }
}
