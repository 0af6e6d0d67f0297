pub mod apply;
pub mod completions;
pub mod create;
pub mod delete;
pub mod doctor;
pub mod find_envs;
pub mod find_libs;
pub mod inspect;
pub mod list;
pub mod operations;
pub mod output;
pub mod plan;
pub mod verify_store;

use indicatif::{ProgressBar, ProgressStyle};
use pipfleet_core::{Engine, Submission};
use pipfleet_schema::{parse_desired_file, DesiredState, Operation, OperationState};
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_DESIRED_STATE_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;
pub const EXIT_LOCKED: u8 = 4;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish_plain(pb: &ProgressBar, msg: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(msg);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish_plain(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish_plain(pb, format!("✗ {msg}"));
}

pub fn colorize_state(state: &str) -> String {
    use console::Style;
    match state {
        "ok" => Style::new().green().apply_to(state).to_string(),
        "erred" => Style::new().red().bold().apply_to(state).to_string(),
        "executing" | "creating" | "deleting" => {
            Style::new().cyan().bold().apply_to(state).to_string()
        }
        "scheduled" | "creation_scheduled" | "deletion_scheduled" => {
            Style::new().yellow().apply_to(state).to_string()
        }
        other => other.to_owned(),
    }
}

pub fn load_desired(path: &Path) -> Result<DesiredState, String> {
    parse_desired_file(path).map_err(|e| format!("desired state error: {e}"))
}

/// Wait for background work, with a spinner unless output is JSON.
pub fn settle(engine: &Engine, json: bool) {
    if json {
        engine.wait_idle();
        return;
    }
    let pb = spinner("waiting for operations...");
    engine.wait_idle();
    pb.finish_and_clear();
}

pub fn operation_summary(op: &Operation) -> serde_json::Value {
    serde_json::json!({
        "id": op.id,
        "kind": op.kind().plain_name(),
        "virtual_env_name": op.virtual_env_name,
        "state": op.state,
        "error_message": op.error_message,
    })
}

/// Print a submission outcome once its operations have settled.
///
/// Exits with `EXIT_LOCKED` when any scope was refused, `EXIT_FAILURE` when
/// an admitted operation erred.
pub fn report_submission(
    engine: &Engine,
    submission: &Submission,
    json: bool,
) -> Result<u8, String> {
    settle(engine, json);

    let mut ops = Vec::new();
    for id in submission.operations() {
        ops.push(engine.get_operation(id).map_err(|e| e.to_string())?);
    }
    let erred = ops.iter().any(|op| op.state == OperationState::Erred);

    if json {
        let mut payload = serde_json::to_value(submission)
            .map_err(|e| format!("JSON serialization failed: {e}"))?;
        payload["results"] = ops.iter().map(operation_summary).collect();
        println!("{}", json_pretty(&payload)?);
    } else {
        if let Submission::Locked { response, .. } = submission {
            if response.global_lock {
                println!("refused: the whole unit is being processed");
            } else {
                println!("refused: busy environments: {}", response.locked_scopes.join(", "));
            }
        }
        if ops.is_empty() && !submission.is_locked() {
            println!("nothing to do");
        }
        for op in &ops {
            print_operation_line(op);
        }
    }

    Ok(if submission.is_locked() {
        EXIT_LOCKED
    } else if erred {
        EXIT_FAILURE
    } else {
        EXIT_SUCCESS
    })
}

pub fn print_operation_line(op: &Operation) {
    let venv = if op.virtual_env_name.is_empty() {
        String::new()
    } else {
        format!(" [{}]", op.virtual_env_name)
    };
    let state = colorize_state(&op.state.to_string());
    match &op.error_message {
        Some(msg) => println!("{} {}{venv}: {state} ({msg})", op.id, op.kind().plain_name()),
        None => println!("{} {}{venv}: {state}", op.id, op.kind().plain_name()),
    }
}
