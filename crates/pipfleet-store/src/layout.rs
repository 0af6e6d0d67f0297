use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Current store format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout of a pipfleet store.
///
/// Manages paths for management units, their virtual environments, operation
/// records and output logs, lock-cache entries, and the store version marker.
/// All subdirectories are created lazily on [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    #[inline]
    pub fn units_dir(&self) -> PathBuf {
        self.store_dir().join("units")
    }

    #[inline]
    pub fn unit_dir(&self, unit_id: &str) -> PathBuf {
        self.units_dir().join(unit_id)
    }

    #[inline]
    pub fn unit_file(&self, unit_id: &str) -> PathBuf {
        self.unit_dir(unit_id).join("unit.json")
    }

    #[inline]
    pub fn venvs_dir(&self, unit_id: &str) -> PathBuf {
        self.unit_dir(unit_id).join("venvs")
    }

    #[inline]
    pub fn venv_file(&self, unit_id: &str, name: &str) -> PathBuf {
        self.venvs_dir(unit_id).join(format!("{name}.json"))
    }

    #[inline]
    pub fn operations_dir(&self) -> PathBuf {
        self.store_dir().join("operations")
    }

    #[inline]
    pub fn operation_file(&self, op_id: &str) -> PathBuf {
        self.operations_dir().join(format!("{op_id}.json"))
    }

    /// Append-only output log of one operation.
    #[inline]
    pub fn output_log(&self, op_id: &str) -> PathBuf {
        self.operations_dir().join(format!("{op_id}.log"))
    }

    /// Entries of the file-backed lock cache.
    #[inline]
    pub fn locks_dir(&self) -> PathBuf {
        self.store_dir().join("locks")
    }

    /// Per-unit mutex files serializing handler writes to one unit.
    #[inline]
    pub fn unit_locks_dir(&self) -> PathBuf {
        self.store_dir().join("unit-locks")
    }

    #[inline]
    pub fn unit_lock_file(&self, unit_id: &str) -> PathBuf {
        self.unit_locks_dir().join(format!("{unit_id}.lock"))
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.store_dir().join(".lock")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.units_dir())?;
        fs::create_dir_all(self.operations_dir())?;
        fs::create_dir_all(self.locks_dir())?;
        fs::create_dir_all(self.unit_locks_dir())?;

        let version_path = self.store_dir().join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let store_dir = self.store_dir();
            let mut tmp = NamedTempFile::new_in(&store_dir)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| StoreError::Io(e.error))?;
            crate::fsync_dir(&store_dir)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.store_dir().join(VERSION_FILE);
        let content = fs::read_to_string(&version_path)?;
        let ver: StoreVersion = serde_json::from_str(&content)?;

        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}
