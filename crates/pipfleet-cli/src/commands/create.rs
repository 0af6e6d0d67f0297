use super::{
    json_pretty, load_desired, operation_summary, print_operation_line, settle, spin_fail,
    spin_ok, spinner, EXIT_FAILURE, EXIT_SUCCESS,
};
use pipfleet_core::Engine;
use pipfleet_schema::{DesiredState, NewUnit, OperationState};
use std::path::Path;

pub fn run(
    engine: &Engine,
    new: NewUnit,
    desired: Option<&Path>,
    json: bool,
) -> Result<u8, String> {
    let desired = match desired {
        Some(path) => load_desired(path)?,
        None => DesiredState::default(),
    };

    let pb = if json {
        None
    } else {
        Some(spinner("creating management unit..."))
    };
    let (unit, _init_id) = match engine.create_unit(new, &desired) {
        Ok(created) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, "unit registered");
            }
            created
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "unit creation failed");
            }
            return Err(e.to_string());
        }
    };

    settle(engine, json);
    let mut operations = engine
        .list_operations(&unit.id)
        .map_err(|e| e.to_string())?;
    operations.reverse();
    let erred = operations
        .iter()
        .any(|op| op.state == OperationState::Erred);

    if json {
        let payload = serde_json::json!({
            "unit_id": unit.id,
            "name": unit.name,
            "operations": operations.iter().map(operation_summary).collect::<Vec<_>>(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("created unit '{}' ({})", unit.name, unit.id);
        for op in &operations {
            print_operation_line(op);
        }
    }
    Ok(if erred { EXIT_FAILURE } else { EXIT_SUCCESS })
}
