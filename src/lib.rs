//! `sterling-executor` library: the Step Executor, Failure Signature, Loop Breaker,
//! Golden-Run Recorder, Recovery Injector, Hybrid Planner Router, and Integrated
//! Coordinator (SPEC_FULL §§4.1-4.8). The binary at `src/main.rs` is a thin CLI over
//! this crate, mirroring the teacher's own lib/bin split.

pub mod backoff;
pub mod config;
pub mod coordinator;
pub mod ctx;
pub mod errors;
pub mod executor;
pub mod leaf;
pub mod loader;
pub mod loop_breaker;
pub mod metadata;
pub mod planner;
pub mod protocol;
pub mod recorder;
pub mod recovery;
pub mod signature;
pub mod telemetry;
pub mod validation;
