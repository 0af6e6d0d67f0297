use super::{json_pretty, EXIT_SUCCESS};
use pipfleet_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let units = engine.list_units().map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&units)?);
    } else if units.is_empty() {
        println!("no management units found");
    } else {
        println!("{:<20} {:<24} {:<38} UNIT_ID", "NAME", "IMAGE", "INSTANCE");
        for unit in &units {
            println!(
                "{:<20} {:<24} {:<38} {}",
                unit.name, unit.image_name, unit.instance_uuid, unit.id
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
