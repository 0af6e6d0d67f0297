use super::{json_pretty, EXIT_SUCCESS};
use pipfleet_core::Engine;

/// Print an operation's output. The operation must belong to `unit`, which
/// may be a deleted unit's id.
pub fn run(engine: &Engine, unit: &str, operation: &str, json: bool) -> Result<u8, String> {
    let owned = engine
        .list_operations(unit)
        .map_err(|e| e.to_string())?
        .iter()
        .any(|op| *op.id == *operation);
    if !owned {
        return Err(format!(
            "operation '{operation}' does not belong to unit '{unit}'"
        ));
    }

    let op = engine.get_operation(operation).map_err(|e| e.to_string())?;
    if json {
        // The record format leaves output out; it lives in the operation's log.
        let mut payload =
            serde_json::to_value(&op).map_err(|e| format!("JSON serialization failed: {e}"))?;
        payload["output"] = serde_json::Value::String(op.output.clone());
        println!("{}", json_pretty(&payload)?);
    } else {
        print!("{}", op.output);
        if let Some(msg) = &op.error_message {
            eprintln!("operation {} ended {}: {msg}", op.id, op.state);
        }
    }
    Ok(EXIT_SUCCESS)
}
