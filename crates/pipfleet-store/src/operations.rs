use crate::layout::StoreLayout;
use crate::record::{read_record, write_record};
use crate::{validate_record_id, StoreError};
use pipfleet_schema::{Operation, OperationState};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};

/// Operation records plus one append-only output log per operation.
///
/// The record (`<id>.json`) is replaced atomically on every state change; the
/// log (`<id>.log`) only ever grows, one synced line at a time, so a reader
/// always sees a strict prefix of the final output.
pub struct OperationStore {
    layout: StoreLayout,
}

impl OperationStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    /// Persist a new operation with an empty output log.
    pub fn create(&self, op: &Operation) -> Result<(), StoreError> {
        validate_record_id(&op.id)?;
        let log = self.layout.output_log(&op.id);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&log)?;
        file.write_all(op.output.as_bytes())?;
        file.sync_all()?;
        write_record(&self.layout.operation_file(&op.id), op)
    }

    /// Load an operation with its output filled in from the log.
    pub fn get(&self, op_id: &str) -> Result<Operation, StoreError> {
        let mut op = self.get_record(op_id)?;
        op.output = self.read_output(op_id)?;
        Ok(op)
    }

    fn get_record(&self, op_id: &str) -> Result<Operation, StoreError> {
        validate_record_id(op_id)?;
        let path = self.layout.operation_file(op_id);
        if !path.exists() {
            return Err(StoreError::OperationNotFound(op_id.to_owned()));
        }
        read_record(&path, op_id)
    }

    pub fn exists(&self, op_id: &str) -> bool {
        validate_record_id(op_id).is_ok() && self.layout.operation_file(op_id).exists()
    }

    pub fn update_state(
        &self,
        op_id: &str,
        state: OperationState,
        error_message: Option<&str>,
    ) -> Result<Operation, StoreError> {
        let mut op = self.get_record(op_id)?;
        op.state = state;
        if let Some(msg) = error_message {
            op.error_message = Some(msg.to_owned());
        }
        op.updated_at = chrono::Utc::now().to_rfc3339();
        write_record(&self.layout.operation_file(op_id), &op)?;
        op.output = self.read_output(op_id)?;
        Ok(op)
    }

    /// Append one line to the output log and flush it to disk before
    /// returning.
    pub fn append_output(&self, op_id: &str, line: &str) -> Result<(), StoreError> {
        validate_record_id(op_id)?;
        if !self.layout.operation_file(op_id).exists() {
            return Err(StoreError::OperationNotFound(op_id.to_owned()));
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.layout.output_log(op_id))?;
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        file.write_all(buf.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    pub fn read_output(&self, op_id: &str) -> Result<String, StoreError> {
        validate_record_id(op_id)?;
        match fs::read_to_string(self.layout.output_log(op_id)) {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// All operation records (without output), newest first.
    pub fn list(&self) -> Result<Vec<Operation>, StoreError> {
        let dir = self.layout.operations_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
            if !entry.file_type()?.is_file() || !is_json {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match read_record::<Operation>(&path, stem) {
                Ok(op) => results.push(op),
                Err(e) => {
                    tracing::warn!("skipping corrupted operation entry '{stem}': {e}");
                }
            }
        }
        results.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(results)
    }

    /// Operations of one unit, newest first.
    pub fn list_for_unit(&self, unit_id: &str) -> Result<Vec<Operation>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|op| op.unit_id == unit_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipfleet_schema::UnitId;

    fn test_operation_store() -> (tempfile::TempDir, OperationStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        (dir, OperationStore::new(layout))
    }

    #[test]
    fn create_and_get() {
        let (_dir, store) = test_operation_store();
        let op = Operation::find_virtual_envs(UnitId::new("u1"));
        store.create(&op).unwrap();
        let back = store.get(&op.id).unwrap();
        assert_eq!(back.state, OperationState::Scheduled);
        assert_eq!(back.output, "");
        assert!(back.checksum.is_some());
    }

    #[test]
    fn append_output_is_visible_immediately() {
        let (_dir, store) = test_operation_store();
        let op = Operation::find_virtual_envs(UnitId::new("u1"));
        store.create(&op).unwrap();

        store.append_output(&op.id, "PLAY [all]").unwrap();
        assert_eq!(store.read_output(&op.id).unwrap(), "PLAY [all]\n");
        store.append_output(&op.id, "TASK [find]").unwrap();
        assert_eq!(store.get(&op.id).unwrap().output, "PLAY [all]\nTASK [find]\n");
    }

    #[test]
    fn state_change_keeps_output() {
        let (_dir, store) = test_operation_store();
        let op = Operation::delete(UnitId::new("u1"));
        store.create(&op).unwrap();
        store.append_output(&op.id, "line").unwrap();

        let updated = store
            .update_state(&op.id, OperationState::Erred, Some("boom"))
            .unwrap();
        assert_eq!(updated.state, OperationState::Erred);
        assert_eq!(updated.error_message.as_deref(), Some("boom"));
        assert_eq!(updated.output, "line\n");
    }

    #[test]
    fn append_to_unknown_operation_fails() {
        let (_dir, store) = test_operation_store();
        assert!(matches!(
            store.append_output("missing", "x"),
            Err(StoreError::OperationNotFound(_))
        ));
    }

    #[test]
    fn list_for_unit_filters_and_orders_newest_first() {
        let (_dir, store) = test_operation_store();
        let mut first = Operation::find_virtual_envs(UnitId::new("u1"));
        first.created_at = "2025-01-01T00:00:00Z".to_owned();
        let mut second = Operation::delete(UnitId::new("u1"));
        second.created_at = "2025-01-02T00:00:00Z".to_owned();
        let other = Operation::delete(UnitId::new("u2"));
        for op in [&first, &second, &other] {
            store.create(op).unwrap();
        }

        let ids: Vec<_> = store
            .list_for_unit("u1")
            .unwrap()
            .into_iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }
}
