//! Cross-handle behavior of the store: separate `OperationStore` instances
//! over the same root must observe each other's writes.

use pipfleet_schema::{Operation, OperationState, UnitId};
use pipfleet_store::{OperationStore, StoreLayout};
use std::sync::{Arc, Barrier};

fn store(dir: &tempfile::TempDir) -> OperationStore {
    let layout = StoreLayout::new(dir.path());
    layout.initialize().unwrap();
    OperationStore::new(layout)
}

#[test]
fn reader_sees_strict_prefix_while_writer_appends() {
    let dir = tempfile::tempdir().unwrap();
    let writer = store(&dir);
    let reader = store(&dir);
    let op = Operation::synchronize(UnitId::new("u1"), "ml", vec![], vec![]);
    writer.create(&op).unwrap();

    let lines: Vec<String> = (0..50).map(|i| format!("TASK [step {i}] ok")).collect();
    let full: String = lines.iter().map(|l| format!("{l}\n")).collect();

    for line in &lines {
        writer.append_output(&op.id, line).unwrap();
        let seen = reader.read_output(&op.id).unwrap();
        assert!(full.starts_with(&seen));
        assert!(seen.ends_with(&format!("{line}\n")));
    }
    assert_eq!(reader.get(&op.id).unwrap().output, full);
}

#[test]
fn concurrent_appenders_never_interleave_within_a_line() {
    let dir = tempfile::tempdir().unwrap();
    let layout = StoreLayout::new(dir.path());
    layout.initialize().unwrap();
    let op = Operation::find_virtual_envs(UnitId::new("u1"));
    OperationStore::new(layout.clone()).create(&op).unwrap();

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let layout = layout.clone();
            let barrier = Arc::clone(&barrier);
            let id = op.id.clone();
            std::thread::spawn(move || {
                let store = OperationStore::new(layout);
                barrier.wait();
                for i in 0..25 {
                    store
                        .append_output(&id, &format!("thread-{t} line-{i}"))
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let output = OperationStore::new(layout).read_output(&op.id).unwrap();
    let lines: Vec<_> = output.lines().collect();
    assert_eq!(lines.len(), 100);
    assert!(lines.iter().all(|l| l.starts_with("thread-") && l.contains(" line-")));
}

#[test]
fn state_updates_from_another_handle_are_visible() {
    let dir = tempfile::tempdir().unwrap();
    let a = store(&dir);
    let b = store(&dir);
    let op = Operation::delete(UnitId::new("u1"));
    a.create(&op).unwrap();
    a.update_state(&op.id, OperationState::Deleting, None).unwrap();
    assert_eq!(b.get(&op.id).unwrap().state, OperationState::Deleting);
}
