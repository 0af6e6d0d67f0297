//! CLI subprocess integration tests.
//!
//! These tests invoke the `pipfleet` binary as a subprocess against a
//! temporary store, with the mock runner and inline dispatch, and verify
//! exit codes, stdout content, and JSON output.

use pipfleet_schema::OperationKind;
use pipfleet_store::{FileCache, LockCache, StoreLayout};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

struct Env {
    store: tempfile::TempDir,
    work: tempfile::TempDir,
    config: PathBuf,
}

impl Env {
    fn new() -> Self {
        Self::with_config("")
    }

    fn with_config(extra: &str) -> Self {
        let store = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let playbooks = work.path().join("playbooks");
        std::fs::create_dir_all(&playbooks).unwrap();
        for kind in OperationKind::ALL {
            std::fs::write(
                playbooks.join(format!("{}.yml", kind.playbook())),
                "- hosts: all\n",
            )
            .unwrap();
        }
        let config = work.path().join("config.toml");
        std::fs::write(
            &config,
            format!(
                "playbooks_dir = '{}'\nrunner = \"mock\"\ndispatch = \"inline\"\n{extra}",
                playbooks.display()
            ),
        )
        .unwrap();
        Self {
            store,
            work,
            config,
        }
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_pipfleet"))
            .arg("--store")
            .arg(self.store.path())
            .arg("--config")
            .arg(&self.config)
            .args(args)
            .output()
            .unwrap()
    }

    fn json(&self, args: &[&str]) -> serde_json::Value {
        let mut full = vec!["--json"];
        full.extend_from_slice(args);
        let output = self.run(&full);
        let stdout = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str(&stdout).unwrap_or_else(|e| {
            panic!(
                "{args:?} --json must produce valid JSON: {e}\nstdout: {stdout}\nstderr: {}",
                String::from_utf8_lossy(&output.stderr)
            )
        })
    }

    fn desired(&self, file: &str, content: &str) -> PathBuf {
        let path = self.work.path().join(file);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn create(&self, name: &str, image: &str, desired: Option<&Path>) -> Output {
        let instance = format!("instance-{name}");
        let desired = desired.map(|p| p.to_string_lossy().into_owned());
        let mut args = vec!["create", name, "--instance", &instance, "--image", image];
        if let Some(path) = &desired {
            args.push("--desired");
            args.push(path);
        }
        self.run(&args)
    }

    fn unit_id(&self, name: &str) -> String {
        let units = self.json(&["list"]);
        units
            .as_array()
            .unwrap()
            .iter()
            .find(|u| u["name"] == name)
            .unwrap_or_else(|| panic!("unit {name} not listed: {units}"))["id"]
            .as_str()
            .unwrap()
            .to_owned()
    }
}

const ANALYTICS: &str = r#"
[[virtual_environments]]
name = "analytics"
libraries = [{ name = "flask", version = "1.0" }]
"#;

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn cli_version_exits_zero() {
    let output = Command::new(env!("CARGO_BIN_EXE_pipfleet"))
        .arg("--version")
        .output()
        .unwrap();
    assert!(output.status.success(), "pipfleet --version must exit 0");
    assert!(String::from_utf8_lossy(&output.stdout).contains("pipfleet"));
}

#[test]
fn cli_help_lists_commands() {
    let output = Command::new(env!("CARGO_BIN_EXE_pipfleet"))
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["create", "apply", "plan", "find-envs", "find-libs", "delete"] {
        assert!(stdout.contains(command), "help must list '{command}'");
    }
}

#[test]
fn cli_list_empty_store() {
    let env = Env::new();
    let output = env.run(&["list"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(String::from_utf8_lossy(&output.stdout).contains("no management units found"));
    assert_eq!(env.json(&["list"]), serde_json::json!([]));
}

#[test]
fn cli_create_synchronizes_declared_environments() {
    let env = Env::new();
    let desired = env.desired("desired.toml", ANALYTICS);
    let output = env.create("lab", "debian-12", Some(&desired));
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let summary = env.json(&["inspect", "lab"]);
    assert_eq!(summary["unit"]["name"], "lab");
    let envs = summary["virtual_environments"].as_array().unwrap();
    assert_eq!(envs.len(), 1);
    assert_eq!(envs[0]["name"], "analytics");
    assert_eq!(
        envs[0]["installed_libraries"],
        serde_json::json!([{ "name": "flask", "version": "1.0" }])
    );

    let ops = env.json(&["operations", "lab"]);
    let states: Vec<&str> = ops
        .as_array()
        .unwrap()
        .iter()
        .map(|op| op["state"].as_str().unwrap())
        .collect();
    assert_eq!(states, vec!["ok", "ok"]);
}

#[test]
fn cli_create_with_unknown_image_fails() {
    let env = Env::new();
    let desired = env.desired("desired.toml", ANALYTICS);
    let output = env.create("lab", "centos-stream-9", Some(&desired));
    assert_eq!(output.status.code(), Some(1));

    let ops = env.json(&["operations", "lab"]);
    for op in ops.as_array().unwrap() {
        assert_eq!(op["state"], "erred", "{op}");
    }
}

#[test]
fn cli_plan_reports_removal_without_creating_operations() {
    let env = Env::new();
    let desired = env.desired("desired.toml", ANALYTICS);
    assert!(env.create("lab", "ubuntu-22.04", Some(&desired)).status.success());
    let empty = env.desired("empty.toml", "");

    let plan = env.json(&["plan", "lab", &empty.to_string_lossy()]);
    assert_eq!(plan["to_remove"], serde_json::json!(["analytics"]));
    assert_eq!(plan["to_create"], serde_json::json!([]));

    let ops = env.json(&["operations", "lab"]);
    assert_eq!(ops.as_array().unwrap().len(), 2);
}

#[test]
fn cli_apply_removes_undeclared_environment() {
    let env = Env::new();
    let desired = env.desired("desired.toml", ANALYTICS);
    assert!(env.create("lab", "debian-12", Some(&desired)).status.success());
    let empty = env.desired("empty.toml", "");

    let result = env.json(&["apply", "lab", &empty.to_string_lossy()]);
    assert_eq!(result["outcome"], "accepted");
    assert_eq!(result["results"][0]["kind"], "virtual_environment_deletion");
    assert_eq!(result["results"][0]["state"], "ok");

    let summary = env.json(&["inspect", "lab"]);
    assert_eq!(summary["virtual_environments"], serde_json::json!([]));
}

#[test]
fn cli_apply_current_state_is_a_no_op() {
    let env = Env::new();
    let desired = env.desired("desired.toml", ANALYTICS);
    assert!(env.create("lab", "debian-12", Some(&desired)).status.success());

    let output = env.run(&["apply", "lab", &desired.to_string_lossy()]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(String::from_utf8_lossy(&output.stdout).contains("nothing to do"));
}

#[test]
fn cli_apply_invalid_desired_state_exits_2() {
    let env = Env::new();
    assert!(env.create("lab", "debian-12", None).status.success());
    let bad = env.desired(
        "bad.toml",
        "[[virtual_environments]]\nname = \"../escape\"\n",
    );

    let output = env.run(&["apply", "lab", &bad.to_string_lossy()]);
    assert_eq!(output.status.code(), Some(2), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("desired state error"));
}

#[test]
fn cli_unknown_unit_exits_3() {
    let env = Env::new();
    let output = env.run(&["find-envs", "ghost"]);
    assert_eq!(output.status.code(), Some(3), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("management unit not found"));
}

#[test]
fn cli_globally_locked_unit_exits_4() {
    let env = Env::new();
    let desired = env.desired("desired.toml", ANALYTICS);
    assert!(env.create("lab", "debian-12", Some(&desired)).status.success());
    let unit_id = env.unit_id("lab");

    let cache = FileCache::new(StoreLayout::new(env.store.path()).locks_dir()).unwrap();
    cache
        .set_with_ttl(&format!("pipfleet_global_{unit_id}"), Duration::from_secs(600))
        .unwrap();

    let empty = env.desired("empty.toml", "");
    let output = env.run(&["--json", "apply", "lab", &empty.to_string_lossy()]);
    assert_eq!(output.status.code(), Some(4), "stderr: {}", stderr(&output));
    let result: serde_json::Value =
        serde_json::from_str(&String::from_utf8_lossy(&output.stdout)).unwrap();
    assert_eq!(result["outcome"], "locked");
    assert_eq!(result["response"]["global_lock"], true);

    let ops = env.json(&["operations", "lab"]);
    assert_eq!(ops.as_array().unwrap().len(), 2, "refused apply creates nothing");
}

#[test]
fn cli_find_libs_rejects_bad_environment_name() {
    let env = Env::new();
    assert!(env.create("lab", "debian-12", None).status.success());
    let output = env.run(&["find-libs", "lab", ".hidden"]);
    assert_eq!(output.status.code(), Some(2), "stderr: {}", stderr(&output));
}

#[test]
fn cli_output_prints_captured_lines() {
    let env = Env::new();
    assert!(env.create("lab", "debian-12", None).status.success());
    let ops = env.json(&["operations", "lab"]);
    let op_id = ops[0]["id"].as_str().unwrap().to_owned();

    let output = env.run(&["output", "lab", &op_id]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("install_python_environment"), "{stdout}");
    assert!(stdout.contains("PLAY RECAP"), "{stdout}");
}

#[test]
fn cli_output_of_foreign_operation_fails() {
    let env = Env::new();
    assert!(env.create("lab", "debian-12", None).status.success());
    assert!(env.create("other", "debian-12", None).status.success());
    let ops = env.json(&["operations", "other"]);
    let op_id = ops[0]["id"].as_str().unwrap().to_owned();

    let output = env.run(&["output", "lab", &op_id]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("does not belong"));
}

#[test]
fn cli_delete_removes_unit_and_keeps_history() {
    let env = Env::new();
    assert!(env.create("lab", "debian-12", None).status.success());
    let unit_id = env.unit_id("lab");

    let result = env.json(&["delete", "lab"]);
    assert_eq!(result["outcome"], "accepted");
    assert_eq!(result["results"][0]["state"], "ok");

    assert_eq!(env.json(&["list"]), serde_json::json!([]));
    let ops = env.json(&["operations", &unit_id]);
    let kinds: Vec<&str> = ops
        .as_array()
        .unwrap()
        .iter()
        .map(|op| op["payload"]["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["delete", "initialize"]);
}

#[test]
fn cli_verify_store_detects_corruption() {
    let env = Env::new();
    assert!(env.create("lab", "debian-12", None).status.success());
    let output = env.run(&["verify-store"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let unit_id = env.unit_id("lab");
    let unit_file = StoreLayout::new(env.store.path()).unit_file(&unit_id);
    let content = std::fs::read_to_string(&unit_file).unwrap();
    std::fs::write(&unit_file, content.replace("\"lab\"", "\"tampered\"")).unwrap();

    let output = env.run(&["verify-store"]);
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stdout).contains("FAIL"));
}

#[test]
fn cli_doctor_json_is_structured() {
    let env = Env::new();
    assert!(env.create("lab", "debian-12", None).status.success());
    let report = env.json(&["doctor"]);
    assert_eq!(report["healthy"], true, "{report}");
    let names: Vec<&str> = report["checks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    for name in ["runtime_prereqs", "playbooks", "store_integrity", "lock_cache"] {
        assert!(names.contains(&name), "missing check {name}: {names:?}");
    }
}

#[test]
fn cli_rejects_unknown_config_keys() {
    let env = Env::with_config("playbook_dir = \"/typo\"\n");
    let output = env.run(&["list"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("configuration error"));
}

#[test]
fn cli_completions_bash() {
    let output = Command::new(env!("CARGO_BIN_EXE_pipfleet"))
        .args(["completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("pipfleet"));
}

#[test]
fn cli_output_json_carries_the_log() {
    let env = Env::new();
    assert!(env.create("lab", "debian-12", None).status.success());
    let ops = env.json(&["operations", "lab"]);
    let op_id = ops[0]["id"].as_str().unwrap().to_owned();

    let op = env.json(&["output", "lab", &op_id]);
    assert_eq!(op["id"], op_id.as_str());
    assert!(op["output"].as_str().unwrap().contains("PLAY RECAP"), "{op}");
}
