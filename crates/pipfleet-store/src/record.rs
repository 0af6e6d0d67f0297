use crate::{fsync_dir, StoreError};
use pipfleet_schema::{ManagementUnit, Operation, VirtualEnvironment};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// A JSON record that embeds a blake3 checksum of its own content.
pub(crate) trait Checksummed: Clone + Serialize + DeserializeOwned {
    fn checksum(&self) -> Option<&str>;
    fn set_checksum(&mut self, checksum: Option<String>);

    /// Checksum over the record content, excluding the checksum field itself.
    fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.set_checksum(None);
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

macro_rules! impl_checksummed {
    ($($ty:ty),*) => {
        $(impl Checksummed for $ty {
            fn checksum(&self) -> Option<&str> {
                self.checksum.as_deref()
            }
            fn set_checksum(&mut self, checksum: Option<String>) {
                self.checksum = checksum;
            }
        })*
    };
}

impl_checksummed!(ManagementUnit, VirtualEnvironment, Operation);

/// Seal `record` with its checksum and atomically replace `dest`.
pub(crate) fn write_record<T: Checksummed>(dest: &Path, record: &T) -> Result<(), StoreError> {
    let dir = dest
        .parent()
        .ok_or_else(|| StoreError::InvalidName(format!("no parent for {}", dest.display())))?;
    let mut sealed = record.clone();
    sealed.set_checksum(Some(sealed.compute_checksum()?));
    let content = serde_json::to_string_pretty(&sealed)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

/// Read a record and verify its embedded checksum when present.
pub(crate) fn read_record<T: Checksummed>(path: &Path, label: &str) -> Result<T, StoreError> {
    let content = fs::read_to_string(path)?;
    let record: T = serde_json::from_str(&content)?;
    if let Some(expected) = record.checksum() {
        let actual = record.compute_checksum()?;
        if actual != expected {
            return Err(StoreError::IntegrityFailure {
                record: label.to_owned(),
                expected: expected.to_owned(),
                actual,
            });
        }
    }
    Ok(record)
}
