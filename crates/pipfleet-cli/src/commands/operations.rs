use super::{colorize_state, json_pretty, EXIT_SUCCESS};
use console::{pad_str, Alignment};
use pipfleet_core::Engine;

pub fn run(engine: &Engine, unit: &str, json: bool) -> Result<u8, String> {
    let operations = engine.list_operations(unit).map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&operations)?);
    } else if operations.is_empty() {
        println!("no operations found");
    } else {
        println!(
            "{:<38} {:<28} {:<20} {:<20} UPDATED_AT",
            "OPERATION_ID", "KIND", "VIRTUAL_ENV", "STATE"
        );
        for op in &operations {
            let state = colorize_state(&op.state.to_string());
            println!(
                "{:<38} {:<28} {:<20} {} {}",
                op.id,
                op.kind().plain_name(),
                op.virtual_env_name,
                pad_str(&state, 20, Alignment::Left, None),
                op.updated_at
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
