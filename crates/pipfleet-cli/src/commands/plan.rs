use super::{json_pretty, load_desired, EXIT_SUCCESS};
use pipfleet_core::Engine;
use pipfleet_schema::Library;
use std::path::Path;

fn join(libraries: &[Library]) -> String {
    libraries
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn run(engine: &Engine, unit: &str, file: &Path, json: bool) -> Result<u8, String> {
    let desired = load_desired(file)?;
    let plan = engine.plan(unit, &desired).map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&plan)?);
        return Ok(EXIT_SUCCESS);
    }
    if plan.is_empty() {
        println!("unit already matches the desired state");
        return Ok(EXIT_SUCCESS);
    }
    for env in &plan.to_create {
        println!("+ {} ({} libraries)", env.name, env.libraries.len());
    }
    for name in &plan.to_remove {
        println!("- {name}");
    }
    for change in &plan.to_change {
        println!("~ {}", change.name);
        if !change.libraries_to_install.is_empty() {
            println!("    install: {}", join(&change.libraries_to_install));
        }
        if !change.libraries_to_remove.is_empty() {
            println!("    remove:  {}", join(&change.libraries_to_remove));
        }
    }
    Ok(EXIT_SUCCESS)
}
