use super::{json_pretty, EXIT_STORE_ERROR, EXIT_SUCCESS};
use pipfleet_core::Engine;
use pipfleet_store::verify_store_integrity;

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let report = verify_store_integrity(engine.store_layout()).map_err(|e| e.to_string())?;

    if json {
        let payload = serde_json::json!({
            "units": { "checked": report.units_checked, "passed": report.units_passed },
            "virtual_environments": { "checked": report.envs_checked, "passed": report.envs_passed },
            "operations": { "checked": report.operations_checked, "passed": report.operations_passed },
            "failed": report.failed.iter().map(|f| serde_json::json!({
                "record": f.record,
                "reason": f.reason,
            })).collect::<Vec<_>>(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "units: {}/{} passed",
            report.units_passed, report.units_checked
        );
        println!(
            "virtual environments: {}/{} passed",
            report.envs_passed, report.envs_checked
        );
        println!(
            "operations: {}/{} passed",
            report.operations_passed, report.operations_checked
        );
        for f in &report.failed {
            println!("  FAIL {}: {}", f.record, f.reason);
        }
    }

    if report.is_clean() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_STORE_ERROR)
    }
}
