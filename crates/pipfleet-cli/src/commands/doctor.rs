use super::{EXIT_FAILURE, EXIT_SUCCESS};
use pipfleet_core::{CacheBackend, EngineConfig, StoreLock};
use pipfleet_store::{FileCache, LockCache, StoreLayout};
use std::path::Path;
use std::time::Duration;

const PROBE_KEY: &str = "pipfleet_doctor_probe";

pub fn run(store_path: &Path, config: &EngineConfig, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_prereqs(config, &mut checks, &mut all_pass);
    check_playbooks(config, &mut checks, &mut all_pass);

    let layout = StoreLayout::new(store_path);
    if store_path.join("store").exists() {
        checks.push(Check::pass("store_exists", "Store directory exists"));
        check_store(&layout, &mut checks, &mut all_pass);
        check_lock_cache(&layout, config, &mut checks, &mut all_pass);
    } else {
        checks.push(Check::info(
            "store_exists",
            "Store not initialized (will be created on first use)",
        ));
    }

    print_results(&checks, all_pass, json_output)
}

fn check_prereqs(config: &EngineConfig, checks: &mut Vec<Check>, all_pass: &mut bool) {
    if config.runner != "system" {
        checks.push(Check::info(
            "runtime_prereqs",
            &format!("Runner '{}' needs no host tools", config.runner),
        ));
        return;
    }
    let missing = pipfleet_runtime::check_prereqs(&config.execution_command);
    if missing.is_empty() {
        checks.push(Check::pass(
            "runtime_prereqs",
            "Runtime prerequisites satisfied",
        ));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "runtime_prereqs",
            &format!(
                "Missing prerequisites: {}",
                pipfleet_runtime::format_missing(&missing)
            ),
        ));
    }
}

fn check_playbooks(config: &EngineConfig, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let command = config.playbook_command();
    let missing: Vec<String> = pipfleet_schema::OperationKind::ALL
        .iter()
        .map(|kind| command.playbook_path(kind.playbook()))
        .filter(|path| !path.is_file())
        .map(|path| path.display().to_string())
        .collect();
    if missing.is_empty() {
        checks.push(Check::pass(
            "playbooks",
            &format!("All playbooks present in {}", config.playbooks_dir.display()),
        ));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "playbooks",
            &format!("Missing playbooks: {}", missing.join(", ")),
        ));
    }
}

fn check_store(layout: &StoreLayout, checks: &mut Vec<Check>, all_pass: &mut bool) {
    // Version
    match layout.verify_version() {
        Ok(()) => checks.push(Check::pass("store_version", "Store format version valid")),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "store_version",
                &format!("Store version check failed: {e}"),
            ));
        }
    }

    // Integrity
    match pipfleet_store::verify_store_integrity(layout) {
        Ok(report) if report.is_clean() => {
            let checked =
                report.units_checked + report.envs_checked + report.operations_checked;
            checks.push(Check::pass(
                "store_integrity",
                &format!("Store integrity OK ({checked} records checked)"),
            ));
        }
        Ok(report) => {
            *all_pass = false;
            checks.push(Check::fail(
                "store_integrity",
                &format!("{} records corrupted", report.failed.len()),
            ));
        }
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "store_integrity",
                &format!("Integrity check failed: {e}"),
            ));
        }
    }

    // Lock
    match StoreLock::try_acquire(&layout.lock_file()) {
        Ok(Some(_)) => checks.push(Check::pass("store_lock", "Store lock is free")),
        Ok(None) => checks.push(Check::warn(
            "store_lock",
            "Store lock is held by another process",
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "store_lock",
                &format!("Cannot check store lock: {e}"),
            ));
        }
    }
}

/// Write, read back and delete a short-lived entry.
fn probe(cache: &dyn LockCache) -> Result<(), String> {
    cache
        .set_with_ttl(PROBE_KEY, Duration::from_secs(5))
        .map_err(|e| e.to_string())?;
    let seen = cache.exists(PROBE_KEY).map_err(|e| e.to_string())?;
    cache.delete(PROBE_KEY).map_err(|e| e.to_string())?;
    if seen {
        Ok(())
    } else {
        Err("probe entry vanished before it could be read".to_owned())
    }
}

fn check_lock_cache(
    layout: &StoreLayout,
    config: &EngineConfig,
    checks: &mut Vec<Check>,
    all_pass: &mut bool,
) {
    if config.lock.backend == CacheBackend::Memory {
        checks.push(Check::info(
            "lock_cache",
            "Lock cache is in-process; locks are not shared between processes",
        ));
        return;
    }
    let result = FileCache::new(layout.locks_dir())
        .map_err(|e| e.to_string())
        .and_then(|cache| probe(&cache));
    match result {
        Ok(()) => checks.push(Check::pass("lock_cache", "Lock cache is reachable")),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "lock_cache",
                &format!("Lock cache unusable: {e}"),
            ));
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("pipfleet doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}
