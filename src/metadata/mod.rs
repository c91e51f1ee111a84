//! Pure metadata patch primitives (SPEC_FULL §4.5 "Metadata patch primitives").
//!
//! A patch is a shallow field overlay: every key present in the patch overwrites the
//! prior value, even when that value is the "cleared" sentinel — this is how the merge
//! model distinguishes "never set" from "explicitly cleared" without the caller needing
//! to know the full key set. Grounded on SPEC_FULL §4.5/§9; no teacher analogue (the
//! teacher's `ExecutionReport` is write-once, not patch-merged).

use chrono::{DateTime, Utc};

use crate::protocol::TaskMetadata;

/// A field that is either left untouched (`Keep`), set to a value (`Set`), or explicitly
/// cleared (`Clear`) by a patch. `Keep` fields are never touched during `apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchField<T> {
    Keep,
    Set(T),
    Clear,
}

impl<T: Clone> PatchField<T> {
    fn apply(&self, target: &mut Option<T>) {
        match self {
            PatchField::Keep => {}
            PatchField::Set(v) => *target = Some(v.clone()),
            PatchField::Clear => *target = None,
        }
    }
}

/// A patch to a task's metadata, built by the pure functions below and applied by
/// `apply_patch`.
#[derive(Debug, Clone, Default)]
pub struct MetadataPatch {
    pub blocked_reason: PatchFieldOrKeep<String>,
    pub blocked_at: PatchFieldOrKeep<i64>,
    pub next_eligible_at: PatchFieldOrKeep<i64>,
    pub retry_count: Option<u32>,
    pub repair_count: Option<u32>,
    pub last_repair_at: PatchFieldOrKeep<i64>,
    pub last_steps_digest: PatchFieldOrKeep<String>,
    pub failure_code: PatchFieldOrKeep<String>,
    pub failure_error: PatchFieldOrKeep<String>,
    pub regen_last_attempt_at: PatchFieldOrKeep<i64>,
    pub regen_disabled_until: PatchFieldOrKeep<i64>,
    pub regen_attempts: Option<u32>,
}

type PatchFieldOrKeep<T> = PatchField<T>;

impl MetadataPatch {
    pub fn apply(&self, target: &mut TaskMetadata) {
        self.blocked_reason.apply(&mut target.blocked_reason);
        self.blocked_at.apply(&mut target.blocked_at);
        self.next_eligible_at.apply(&mut target.next_eligible_at);
        if let Some(v) = self.retry_count {
            target.retry_count = v;
        }
        if let Some(v) = self.repair_count {
            target.repair_count = v;
        }
        self.last_repair_at.apply(&mut target.last_repair_at);
        self.last_steps_digest.apply(&mut target.last_steps_digest);
        self.failure_code.apply(&mut target.failure_code);
        self.failure_error.apply(&mut target.failure_error);
        self.regen_last_attempt_at
            .apply(&mut target.regen_last_attempt_at);
        self.regen_disabled_until
            .apply(&mut target.regen_disabled_until);
        if let Some(v) = self.regen_attempts {
            target.regen_attempts = v;
        }
    }
}

/// `blockTaskPatch(reason, opts)`: `blockedAt` is preserved when the existing metadata
/// already carries the same `blocked_reason`; otherwise it becomes `now`.
pub fn block_task_patch(
    reason: &str,
    existing: &TaskMetadata,
    next_eligible_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> MetadataPatch {
    let blocked_at = if existing.blocked_reason.as_deref() == Some(reason) {
        existing.blocked_at.unwrap_or_else(|| now.timestamp_millis())
    } else {
        now.timestamp_millis()
    };

    MetadataPatch {
        blocked_reason: PatchField::Set(reason.to_string()),
        blocked_at: PatchField::Set(blocked_at),
        next_eligible_at: match next_eligible_at {
            Some(at) => PatchField::Set(at.timestamp_millis()),
            None => PatchField::Keep,
        },
        ..Default::default()
    }
}

/// `clearBlockedState()`: clears `blocked_reason`/`blocked_at`/`next_eligible_at` via the
/// cleared sentinel, so the merge overwrites prior values rather than leaving them.
pub fn clear_blocked_state() -> MetadataPatch {
    MetadataPatch {
        blocked_reason: PatchField::Clear,
        blocked_at: PatchField::Clear,
        next_eligible_at: PatchField::Clear,
        ..Default::default()
    }
}

/// `regenSuccessPatch`: union of `clear_blocked_state()` plus the regeneration-success
/// bookkeeping fields.
pub fn regen_success_patch(repair_count: u32, steps_digest: String, now: DateTime<Utc>) -> MetadataPatch {
    let mut patch = clear_blocked_state();
    patch.retry_count = Some(0);
    patch.repair_count = Some(repair_count);
    patch.last_repair_at = PatchField::Set(now.timestamp_millis());
    patch.last_steps_digest = PatchField::Set(steps_digest);
    patch.failure_code = PatchField::Clear;
    patch.failure_error = PatchField::Clear;
    patch.regen_last_attempt_at = PatchField::Clear;
    patch.regen_disabled_until = PatchField::Clear;
    patch.regen_attempts = Some(0);
    patch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_task_patch_preserves_blocked_at_for_same_reason() {
        let mut existing = TaskMetadata::default();
        existing.blocked_reason = Some("RATE_LIMITED".to_string());
        existing.blocked_at = Some(1_000);

        let now = Utc::now();
        let patch = block_task_patch("RATE_LIMITED", &existing, None, now);

        let mut target = existing.clone();
        patch.apply(&mut target);
        assert_eq!(target.blocked_at, Some(1_000));
    }

    #[test]
    fn block_task_patch_resets_blocked_at_for_new_reason() {
        let mut existing = TaskMetadata::default();
        existing.blocked_reason = Some("RATE_LIMITED".to_string());
        existing.blocked_at = Some(1_000);

        let now = Utc::now();
        let patch = block_task_patch("MAX_RETRIES_EXCEEDED", &existing, None, now);

        let mut target = existing.clone();
        patch.apply(&mut target);
        assert_eq!(target.blocked_reason, Some("MAX_RETRIES_EXCEEDED".to_string()));
        assert_eq!(target.blocked_at, Some(now.timestamp_millis()));
    }

    #[test]
    fn clear_blocked_state_overwrites_prior_values() {
        let mut target = TaskMetadata::default();
        target.blocked_reason = Some("RATE_LIMITED".to_string());
        target.blocked_at = Some(1_000);
        target.next_eligible_at = Some(2_000);

        clear_blocked_state().apply(&mut target);

        assert!(target.blocked_reason.is_none());
        assert!(target.blocked_at.is_none());
        assert!(target.next_eligible_at.is_none());
    }

    #[test]
    fn regen_success_patch_resets_retry_and_regen_state() {
        let mut target = TaskMetadata::default();
        target.retry_count = 3;
        target.regen_attempts = 2;
        target.failure_code = Some("NAV_TIMEOUT".to_string());

        let now = Utc::now();
        let patch = regen_success_patch(1, "digest-abc".to_string(), now);
        patch.apply(&mut target);

        assert_eq!(target.retry_count, 0);
        assert_eq!(target.repair_count, 1);
        assert_eq!(target.regen_attempts, 0);
        assert!(target.failure_code.is_none());
        assert_eq!(target.last_steps_digest.as_deref(), Some("digest-abc"));
    }
}
