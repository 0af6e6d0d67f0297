use super::{colorize_state, json_pretty, EXIT_SUCCESS};
use pipfleet_core::Engine;

pub fn run(engine: &Engine, unit: &str, json: bool) -> Result<u8, String> {
    let summary = engine.inspect_unit(unit).map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&summary)?);
        return Ok(EXIT_SUCCESS);
    }

    let unit = &summary.unit;
    println!("unit_id:       {}", unit.id);
    println!("name:          {}", unit.name);
    println!("owner:         {}", unit.owner);
    println!("instance:      {}", unit.instance_uuid);
    println!("image:         {}", unit.image_name);
    println!("venvs_dir:     {}", unit.virtual_envs_dir_path);
    println!("created_at:    {}", unit.created_at);

    println!("virtual environments: {}", summary.virtual_environments.len());
    for env in &summary.virtual_environments {
        println!("  {} ({} libraries)", env.name, env.installed_libraries.len());
        for lib in &env.installed_libraries {
            println!("    {lib}");
        }
    }

    println!("operations: {}", summary.operations.len());
    if let Some(latest) = summary.operations.first() {
        println!(
            "  latest: {} {} {}",
            latest.id,
            latest.kind().plain_name(),
            colorize_state(&latest.state.to_string())
        );
    }
    Ok(EXIT_SUCCESS)
}
