//! External-tool execution layer for pipfleet.
//!
//! This crate implements process plumbing: the pluggable `ProcessRunner`
//! trait with a system runner (stdout and stderr merged into one line stream)
//! and a scripted mock runner, playbook invocation building
//! (`PlaybookCommand`), base-image to system-user resolution, the output
//! marker grammar playbooks use to report facts, and prerequisite checking.

pub mod backend;
pub mod image;
pub mod markers;
pub mod mock;
pub mod playbook;
pub mod prereq;
pub mod system;

pub use backend::{select_runner, Invocation, ProcessRunner, RunningProcess};
pub use image::default_system_user;
pub use markers::Marker;
pub use mock::{MockResponse, MockRunner};
pub use playbook::PlaybookCommand;
pub use prereq::{check_prereqs, format_missing, MissingPrereq};
pub use system::SystemRunner;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("runner '{0}' is not available")]
    RunnerUnavailable(String),
    #[error("failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("playbook not found: {}", .0.display())]
    ScriptMissing(PathBuf),
    #[error("no default system user known for image '{0}'")]
    UnknownImage(String),
    #[error("runtime execution failed: {0}")]
    ExecFailed(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
