//! Core orchestration engine for pipfleet.
//!
//! This crate ties together the schema, store, and runtime layers into the
//! `Engine`, the central API for creating management units, reconciling
//! desired state, and running playbook operations. It also provides the
//! TTL-based `LockRegistry` for admission control, per-kind output
//! post-processors and extracted-information handlers, the pure
//! reconciliation planner, and lifecycle state validation.

pub mod concurrency;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod handlers;
pub mod lifecycle;
pub mod locking;
pub mod postprocess;
pub mod reconcile;
pub mod vars;

pub use concurrency::{install_signal_handler, request_shutdown, shutdown_requested, StoreLock};
pub use config::{CacheBackend, Dispatch, EngineConfig, LockConfig};
pub use engine::{Engine, Submission, UnitSummary};
pub use handlers::{ExtractedInformationHandler, HandlerContext};
pub use lifecycle::validate_transition;
pub use locking::{EntryPointGuard, LockRegistry, LockedResponse, ScopeGuard};
pub use postprocess::{ExtractedFacts, OutputPostProcessor};
pub use reconcile::{plan, EnvironmentChange, ReconciliationPlan};
pub use vars::{AccessTokenSource, StaticToken};

use thiserror::Error;

/// Written to an operation's output when it reaches execution while its
/// scope is held by another operation.
pub const REFUSAL_MESSAGE: &str = "Whole environment or the particular virtual environment is now being processed, request cannot be executed!";

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("desired state error: {0}")]
    DesiredState(#[from] pipfleet_schema::DesiredStateError),
    #[error("store error: {0}")]
    Store(#[from] pipfleet_store::StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] pipfleet_runtime::RuntimeError),
    #[error("playbook exited with code {exit_code}")]
    ExecutionFailed { exit_code: i32, output: String },
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Store and I/O failures are never folded into an operation outcome;
    /// they propagate to the caller.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, CoreError::Store(_) | CoreError::Io(_))
    }
}
