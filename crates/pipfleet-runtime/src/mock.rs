use crate::backend::{Invocation, ProcessRunner, RunningProcess};
use crate::markers;
use crate::RuntimeError;
use pipfleet_schema::Library;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

/// Output and exit code a mock process produces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockResponse {
    pub lines: Vec<String>,
    pub exit_code: i32,
}

impl MockResponse {
    pub fn ok<S: Into<String>>(lines: impl IntoIterator<Item = S>) -> Self {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            exit_code: 0,
        }
    }

    pub fn failed<S: Into<String>>(lines: impl IntoIterator<Item = S>, exit_code: i32) -> Self {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            exit_code,
        }
    }
}

type Script = dyn Fn(&Invocation) -> MockResponse + Send + Sync;
type HostState = BTreeMap<String, BTreeSet<Library>>;

/// In-process stand-in for `ansible-playbook`.
///
/// Without a script it simulates managed hosts in memory, keyed by
/// `instance_uuid`, and answers each playbook the way the real one reports
/// through [`markers`]. A script replaces that simulation entirely.
pub struct MockRunner {
    script: Option<Box<Script>>,
    hosts: Mutex<HashMap<String, HostState>>,
    invocations: Mutex<Vec<Invocation>>,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self {
            script: None,
            hosts: Mutex::new(HashMap::new()),
            invocations: Mutex::new(Vec::new()),
        }
    }
}

fn poisoned<T>(_: T) -> RuntimeError {
    RuntimeError::ExecFailed("mock runner mutex poisoned".to_owned())
}

fn str_var<'a>(vars: &'a Value, key: &str) -> &'a str {
    vars.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn libraries_var(vars: &Value, key: &str) -> Vec<Library> {
    vars.get(key)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

fn debug_msg(marker: &str) -> String {
    format!("    \"msg\": \"{marker}\"")
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(
        script: impl Fn(&Invocation) -> MockResponse + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Some(Box::new(script)),
            ..Self::default()
        }
    }

    /// Every invocation answers with the same output and exit code.
    pub fn replying(lines: &[&str], exit_code: i32) -> Self {
        let response = MockResponse::failed(lines.iter().copied(), exit_code);
        Self::scripted(move |_| response.clone())
    }

    /// Pre-populate a simulated host with an environment.
    pub fn seed_env(&self, instance_uuid: &str, venv: &str, libraries: &[Library]) {
        if let Ok(mut hosts) = self.hosts.lock() {
            hosts
                .entry(instance_uuid.to_owned())
                .or_default()
                .insert(venv.to_owned(), libraries.iter().cloned().collect());
        }
    }

    /// Libraries currently installed in a simulated environment.
    pub fn host_env(&self, instance_uuid: &str, venv: &str) -> Option<Vec<Library>> {
        let hosts = self.hosts.lock().ok()?;
        hosts
            .get(instance_uuid)?
            .get(venv)
            .map(|libs| libs.iter().cloned().collect())
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    fn simulate(&self, invocation: &Invocation) -> Result<MockResponse, RuntimeError> {
        let stem = invocation
            .args
            .last()
            .and_then(|p| Path::new(p).file_stem())
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let vars = invocation.extra_vars().unwrap_or(Value::Null);
        let instance = str_var(&vars, "instance_uuid").to_owned();
        let venv = str_var(&vars, "virtual_env_name").to_owned();

        let mut lines = vec![
            "PLAY [all] *********************************************************".to_owned(),
            format!("TASK [{stem}] ******************************************"),
            "ok: [mock-host] => {".to_owned(),
        ];

        let mut hosts = self.hosts.lock().map_err(poisoned)?;
        match stem.as_str() {
            "install_python_environment" => {
                hosts.entry(instance).or_default();
            }
            "synchronize_packages" => {
                let host = hosts.entry(instance).or_default();
                let libs = host.entry(venv.clone()).or_default();
                for lib in libraries_var(&vars, "libraries_to_remove") {
                    libs.remove(&lib);
                }
                libs.extend(libraries_var(&vars, "libraries_to_install"));
                lines.push(debug_msg(markers::LIBRARIES_BEGIN));
                lines.extend(libs.iter().map(|l| debug_msg(&markers::format_library(l))));
                if libs.is_empty() {
                    host.remove(&venv);
                }
            }
            "find_installed_virtual_environments" => {
                if let Some(host) = hosts.get(&instance) {
                    lines.extend(
                        host.keys()
                            .map(|name| debug_msg(&markers::format_virtual_env(name))),
                    );
                }
            }
            "find_installed_libraries_for_virtual_environment" => {
                lines.push(debug_msg(markers::LIBRARIES_BEGIN));
                if let Some(libs) = hosts.get(&instance).and_then(|h| h.get(&venv)) {
                    lines.extend(libs.iter().map(|l| debug_msg(&markers::format_library(l))));
                }
            }
            "delete_virtual_environment" => {
                if let Some(host) = hosts.get_mut(&instance) {
                    host.remove(&venv);
                }
            }
            "delete_python_environment" => {
                hosts.remove(&instance);
            }
            _ => {}
        }

        lines.push("}".to_owned());
        lines.push("PLAY RECAP *********************************************".to_owned());
        lines.push("mock-host : ok=1 changed=1 unreachable=0 failed=0".to_owned());
        Ok(MockResponse::ok(lines))
    }
}

struct MockProcess {
    lines: VecDeque<String>,
    exit_code: i32,
}

impl RunningProcess for MockProcess {
    fn next_line(&mut self) -> Option<Result<String, RuntimeError>> {
        self.lines.pop_front().map(Ok)
    }

    fn wait(self: Box<Self>) -> Result<i32, RuntimeError> {
        Ok(self.exit_code)
    }
}

impl ProcessRunner for MockRunner {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn RunningProcess>, RuntimeError> {
        self.invocations
            .lock()
            .map_err(poisoned)?
            .push(invocation.clone());
        let response = match &self.script {
            Some(script) => script(invocation),
            None => self.simulate(invocation)?,
        };
        Ok(Box::new(MockProcess {
            lines: response.lines.into(),
            exit_code: response.exit_code,
        }))
    }
}
