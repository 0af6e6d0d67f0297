use crate::layout::StoreLayout;
use crate::record::read_record;
use crate::StoreError;
use pipfleet_schema::{ManagementUnit, Operation, VirtualEnvironment};
use std::fs;
use std::path::Path;

#[derive(Debug, Default)]
pub struct IntegrityReport {
    pub units_checked: usize,
    pub units_passed: usize,
    pub envs_checked: usize,
    pub envs_passed: usize,
    pub operations_checked: usize,
    pub operations_passed: usize,
    pub failed: Vec<IntegrityFailure>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug)]
pub struct IntegrityFailure {
    pub record: String,
    pub reason: String,
}

fn json_files(dir: &Path) -> Result<Vec<std::path::PathBuf>, StoreError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn describe(e: &StoreError) -> String {
    match e {
        StoreError::IntegrityFailure { actual, .. } => format!("checksum mismatch: got {actual}"),
        other => format!("read error: {other}"),
    }
}

/// Re-read every unit, environment and operation record and verify its
/// embedded checksum.
pub fn verify_store_integrity(layout: &StoreLayout) -> Result<IntegrityReport, StoreError> {
    let mut report = IntegrityReport::default();

    let units_dir = layout.units_dir();
    let mut unit_ids = Vec::new();
    if units_dir.exists() {
        for entry in fs::read_dir(&units_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                unit_ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
    }
    unit_ids.sort();

    for unit_id in &unit_ids {
        report.units_checked += 1;
        match read_record::<ManagementUnit>(&layout.unit_file(unit_id), unit_id) {
            Ok(_) => report.units_passed += 1,
            Err(e) => report.failed.push(IntegrityFailure {
                record: format!("unit {unit_id}"),
                reason: describe(&e),
            }),
        }

        for path in json_files(&layout.venvs_dir(unit_id))? {
            report.envs_checked += 1;
            let label = format!(
                "environment {unit_id}/{}",
                path.file_stem().unwrap_or_default().to_string_lossy()
            );
            match read_record::<VirtualEnvironment>(&path, &label) {
                Ok(_) => report.envs_passed += 1,
                Err(e) => report.failed.push(IntegrityFailure {
                    record: label,
                    reason: describe(&e),
                }),
            }
        }
    }

    for path in json_files(&layout.operations_dir())? {
        report.operations_checked += 1;
        let label = format!(
            "operation {}",
            path.file_stem().unwrap_or_default().to_string_lossy()
        );
        match read_record::<Operation>(&path, &label) {
            Ok(_) => report.operations_passed += 1,
            Err(e) => report.failed.push(IntegrityFailure {
                record: label,
                reason: describe(&e),
            }),
        }
    }

    Ok(report)
}
