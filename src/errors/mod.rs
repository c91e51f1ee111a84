//! Structured error codes for the executor.
//!
//! Codes are grouped by numeric range the way a phone country code works: the first
//! digit names the category, the rest identify the specific condition (SPEC_FULL §10).
//!
//! | Range | Category               |
//! |-------|------------------------|
//! | E1xxx | Planning / step-shape  |
//! | E2xxx | Tool dispatch          |
//! | E3xxx | Guard rejection        |
//! | E4xxx | Lifecycle / config     |
//! | E5xxx | Internal / recorder    |

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(u16);

impl ErrorCode {
    // E1xxx: planning / step-shape
    pub const UNKNOWN_LEAF: Self = Self(1001);
    pub const INTENT_LEAF_NOT_EXECUTABLE: Self = Self(1002);
    pub const INVALID_ARGS: Self = Self(1003);
    pub const PLANNING_INCOMPLETE: Self = Self(1004);

    // E2xxx: tool dispatch
    pub const TOOL_TIMEOUT: Self = Self(2001);
    pub const TOOL_TRANSPORT_ERROR: Self = Self(2002);
    pub const NO_MAPPED_ACTION: Self = Self(2003);

    // E3xxx: guard rejection
    pub const DERIVED_ARGS_LIVE: Self = Self(3001);
    pub const SENTINEL_ARGS_LIVE: Self = Self(3002);
    pub const LEGACY_REWRITE_DISABLED: Self = Self(3003);
    pub const RATE_LIMITED: Self = Self(3004);
    pub const BUDGET_EXHAUSTED: Self = Self(3005);
    pub const TASK_TYPE_BRIDGE_ONLY_SHADOW: Self = Self(3006);

    // E4xxx: lifecycle / config
    pub const MAX_RETRIES_EXCEEDED: Self = Self(4001);
    pub const REGEN_DISABLED: Self = Self(4002);
    pub const INVALID_CONFIG: Self = Self(4003);

    // E5xxx: internal / recorder
    pub const RECORDER_WRITE_FAILED: Self = Self(5001);
    pub const SIGNATURE_HASH_FAILED: Self = Self(5002);
    pub const LOOP_BREAKER_INTERNAL: Self = Self(5003);

    pub fn code(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// Maps a stable blocked-reason string (`crate::protocol::block_reasons`) to its error
/// code category, for inclusion in `block()`'s tracing event. Prefix-matched since
/// several reasons carry a dynamic suffix (e.g. `unknown-leaf:<leaf>`).
pub fn error_code_for_block_reason(reason: &str) -> Option<ErrorCode> {
    use crate::protocol::block_reasons as r;

    if reason == r::PLANNING_INCOMPLETE {
        Some(ErrorCode::PLANNING_INCOMPLETE)
    } else if reason == r::DERIVED_ARGS_NOT_ALLOWED_LIVE {
        Some(ErrorCode::DERIVED_ARGS_LIVE)
    } else if reason == r::SENTINEL_ARGS_NOT_ALLOWED_LIVE {
        Some(ErrorCode::SENTINEL_ARGS_LIVE)
    } else if reason == r::LEGACY_LEAF_REWRITE_DISABLED {
        Some(ErrorCode::LEGACY_REWRITE_DISABLED)
    } else if reason == r::RATE_LIMITED {
        Some(ErrorCode::RATE_LIMITED)
    } else if reason == r::MAX_RETRIES_EXCEEDED {
        Some(ErrorCode::MAX_RETRIES_EXCEEDED)
    } else if reason == r::NO_MAPPED_ACTION {
        Some(ErrorCode::NO_MAPPED_ACTION)
    } else if reason == r::LOOP_SUPPRESSED {
        Some(ErrorCode::LOOP_BREAKER_INTERNAL)
    } else if reason.starts_with("unknown-leaf:") || reason.starts_with("unknown_leaf") {
        Some(ErrorCode::UNKNOWN_LEAF)
    } else if reason.starts_with("invalid-args:") {
        Some(ErrorCode::INVALID_ARGS)
    } else if reason.starts_with("budget-exhausted:") {
        Some(ErrorCode::BUDGET_EXHAUSTED)
    } else if reason.starts_with("task_type_bridge_only_shadow:") {
        Some(ErrorCode::TASK_TYPE_BRIDGE_ONLY_SHADOW)
    } else {
        None
    }
}

/// The executor's internal error type, used for classification and logging only.
///
/// Per SPEC_FULL §7, no error crosses the `ctx` boundary: guard and post-dispatch code
/// converts an `ExecutorError` to a metadata patch plus a recorded decision before
/// returning control to the scheduler.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("[{0}] unknown leaf: {1}")]
    UnknownLeaf(ErrorCode, String),

    #[error("[{0}] invalid args: {1}")]
    InvalidArgs(ErrorCode, String),

    #[error("[{0}] planning incomplete for task {1}")]
    PlanningIncomplete(ErrorCode, String),

    #[error("[{0}] tool dispatch failed: {1}")]
    ToolDispatchFailed(ErrorCode, String),

    #[error("[{0}] guard rejected step: {1}")]
    GuardRejected(ErrorCode, String),

    #[error("[{0}] max retries exceeded for task {1}")]
    MaxRetriesExceeded(ErrorCode, String),

    #[error("[{0}] invalid configuration: {1}")]
    InvalidConfig(ErrorCode, String),

    #[error("[{0}] recorder write failed: {1}")]
    RecorderWriteFailed(ErrorCode, String),

    #[error("[{0}] internal error: {1}")]
    Internal(ErrorCode, String),
}

impl ExecutorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownLeaf(c, _)
            | Self::InvalidArgs(c, _)
            | Self::PlanningIncomplete(c, _)
            | Self::ToolDispatchFailed(c, _)
            | Self::GuardRejected(c, _)
            | Self::MaxRetriesExceeded(c, _)
            | Self::InvalidConfig(c, _)
            | Self::RecorderWriteFailed(c, _)
            | Self::Internal(c, _) => *c,
        }
    }
}
