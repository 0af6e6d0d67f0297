use super::{load_desired, report_submission};
use pipfleet_core::Engine;
use std::path::Path;

pub fn run(engine: &Engine, unit: &str, file: &Path, json: bool) -> Result<u8, String> {
    let desired = load_desired(file)?;
    let submission = engine
        .apply_desired_state(unit, &desired)
        .map_err(|e| e.to_string())?;
    report_submission(engine, &submission, json)
}
