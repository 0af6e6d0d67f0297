use super::report_submission;
use pipfleet_core::Engine;

pub fn run(engine: &Engine, unit: &str, json: bool) -> Result<u8, String> {
    let submission = engine.delete_unit(unit).map_err(|e| e.to_string())?;
    report_submission(engine, &submission, json)
}
