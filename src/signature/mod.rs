//! Failure Signature: a pure, content-addressed identity for a semantic failure tuple
//! (SPEC_FULL §4.1).
//!
//! The signature has no owner and no lifecycle of its own; it is derived on demand from
//! a failure tuple and is equal whenever the tuple is equal. Timestamps and task ids are
//! excluded from the identity on purpose, so the same underlying condition hashes the
//! same way no matter which task or run hit it.
//!
//! Grounded on SPEC_FULL §4.1's hash recipe; hex-truncated SHA-256 content addressing is
//! the same family of technique the teacher reaches for in its own fingerprinting needs,
//! here via the `sha2` crate rather than rolled by hand.

use sha2::{Digest, Sha256};

const SIGNATURE_DOMAIN: &str = "failure_signature_v1";

/// The category of failure a signature was derived from (SPEC_FULL §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    ExpansionBlocked,
    ExecutorError,
    ToolFailure,
    PrereqExhausted,
    TaskTerminal,
    DedupRepeat,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExpansionBlocked => "expansion_blocked",
            Self::ExecutorError => "executor_error",
            Self::ToolFailure => "tool_failure",
            Self::PrereqExhausted => "prereq_exhausted",
            Self::TaskTerminal => "task_terminal",
            Self::DedupRepeat => "dedup_repeat",
        }
    }
}

/// The semantic tuple a Failure Signature is derived from. All fields except
/// `category` and `leaf` are optional; absent fields hash as empty strings.
#[derive(Debug, Clone, Default)]
pub struct FailureTuple {
    pub category: Option<FailureCategory>,
    pub leaf: String,
    pub target_param: Option<String>,
    pub failure_code: Option<String>,
    pub blocked_reason: Option<String>,
    pub diag_reason_code: Option<String>,
}

/// A 16-hex-character content-addressed identity. Carries no task id, run id, or
/// timestamp — two tuples with the same semantic fields always produce the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FailureSignature(pub String);

impl FailureSignature {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Computes the signature id for a failure tuple (SPEC_FULL §4.1, invariant P10): SHA-256
/// over `("failure_signature_v1", category, leaf, targetParam, failureCode, blockedReason,
/// diagReasonCode)` joined with NUL bytes, truncated to the first 16 hex characters.
pub fn compute_signature_id(tuple: &FailureTuple) -> FailureSignature {
    let fields = [
        SIGNATURE_DOMAIN,
        tuple.category.map(FailureCategory::as_str).unwrap_or(""),
        tuple.leaf.as_str(),
        tuple.target_param.as_deref().unwrap_or(""),
        tuple.failure_code.as_deref().unwrap_or(""),
        tuple.blocked_reason.as_deref().unwrap_or(""),
        tuple.diag_reason_code.as_deref().unwrap_or(""),
    ];

    let mut hasher = Sha256::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(field.as_bytes());
    }

    let digest = hasher.finalize();
    let hex = digest.iter().map(|b| format!("{:02x}", b)).collect::<String>();
    FailureSignature(hex[..16].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple() -> FailureTuple {
        FailureTuple {
            category: Some(FailureCategory::ToolFailure),
            leaf: "craft_recipe".to_string(),
            target_param: Some("oak_planks".to_string()),
            failure_code: Some("NAV_TIMEOUT".to_string()),
            blocked_reason: None,
            diag_reason_code: Some("timeout".to_string()),
        }
    }

    #[test]
    fn signature_id_is_sixteen_hex_chars() {
        let id = compute_signature_id(&tuple());
        assert_eq!(id.as_str().len(), 16);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_id_is_deterministic() {
        let a = compute_signature_id(&tuple());
        let b = compute_signature_id(&tuple());
        assert_eq!(a, b);
    }

    #[test]
    fn signature_id_changes_when_any_tracked_field_changes() {
        let base = compute_signature_id(&tuple());

        let mut other = tuple();
        other.diag_reason_code = Some("other_code".to_string());
        assert_ne!(base, compute_signature_id(&other));

        let mut other = tuple();
        other.leaf = "smelt".to_string();
        assert_ne!(base, compute_signature_id(&other));

        let mut other = tuple();
        other.category = Some(FailureCategory::ExecutorError);
        assert_ne!(base, compute_signature_id(&other));
    }

    #[test]
    fn signature_id_excludes_task_and_run_identity() {
        // The tuple has no task/run fields at all; this test documents that
        // constraint structurally rather than by comparing irrelevant ids.
        let tuple = tuple();
        assert_eq!(compute_signature_id(&tuple), compute_signature_id(&tuple));
    }

    #[test]
    fn absent_fields_hash_as_empty_strings_not_as_none_marker() {
        let mut minimal = FailureTuple::default();
        minimal.leaf = "dig_block".to_string();
        minimal.category = Some(FailureCategory::ExpansionBlocked);

        let id = compute_signature_id(&minimal);
        assert_eq!(id.as_str().len(), 16);
    }
}
