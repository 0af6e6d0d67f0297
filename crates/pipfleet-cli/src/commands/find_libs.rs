use super::report_submission;
use pipfleet_core::Engine;

pub fn run(engine: &Engine, unit: &str, venv: &str, json: bool) -> Result<u8, String> {
    let submission = engine
        .find_installed_libraries(unit, venv)
        .map_err(|e| e.to_string())?;
    report_submission(engine, &submission, json)
}
