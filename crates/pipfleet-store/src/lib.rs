//! File-backed persistence for pipfleet.
//!
//! This crate provides the storage layer: `StoreLayout` for directory
//! structure and format versioning, `UnitStore` for management units and
//! their virtual environments, `OperationStore` for operation records and
//! their append-only output logs, the `LockCache` TTL key-value abstraction
//! (`FileCache`, `MemoryCache`) backing the lock registry, and
//! `verify_store_integrity` for checksum audits.

pub mod cache;
pub mod integrity;
pub mod layout;
pub mod operations;
mod record;
pub mod units;

pub use cache::{FileCache, LockCache, MemoryCache};
pub use integrity::{verify_store_integrity, IntegrityFailure, IntegrityReport};
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use operations::OperationStore;
pub use units::UnitStore;

use std::path::Path;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// POSIX does not guarantee rename durability without it.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Record identifiers become file names, so only a safe alphabet is accepted.
pub(crate) fn validate_record_id(id: &str) -> Result<(), StoreError> {
    if id.is_empty()
        || id.len() > 128
        || !id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(StoreError::InvalidName(format!(
            "identifier '{id}' must match [a-zA-Z0-9_-]{{1,128}}"
        )));
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("integrity check failed for record '{record}': expected {expected}, got {actual}")]
    IntegrityFailure {
        record: String,
        expected: String,
        actual: String,
    },
    #[error("management unit not found: {0}")]
    UnitNotFound(String),
    #[error("virtual environment '{name}' not found in unit {unit}")]
    EnvNotFound { unit: String, name: String },
    #[error("operation not found: {0}")]
    OperationNotFound(String),
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("invalid lock ttl: {0}")]
    InvalidTtl(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_ids_reject_path_components() {
        assert!(validate_record_id("abc-123_X").is_ok());
        assert!(validate_record_id("").is_err());
        assert!(validate_record_id("../x").is_err());
        assert!(validate_record_id("a/b").is_err());
        assert!(validate_record_id(&"a".repeat(129)).is_err());
    }

    #[test]
    fn store_error_display_env_not_found() {
        let e = StoreError::EnvNotFound {
            unit: "u1".to_owned(),
            name: "ml".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("u1"));
        assert!(msg.contains("ml"));
    }

    #[test]
    fn store_error_display_version_mismatch() {
        let e = StoreError::VersionMismatch {
            expected: 2,
            found: 1,
        };
        let msg = e.to_string();
        assert!(msg.contains('2'));
        assert!(msg.contains('1'));
    }

    #[test]
    fn store_error_display_integrity_failure() {
        let e = StoreError::IntegrityFailure {
            record: "r".to_owned(),
            expected: "exp".to_owned(),
            actual: "act".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("exp"));
        assert!(msg.contains("act"));
    }
}
