use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A fully resolved external command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Overrides applied on top of the inherited parent environment.
    pub env: BTreeMap<String, String>,
}

impl Invocation {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Value following the first occurrence of `flag`.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Parsed `--extra-vars` blob, if present and valid JSON.
    pub fn extra_vars(&self) -> Option<serde_json::Value> {
        self.flag_value("--extra-vars")
            .and_then(|v| serde_json::from_str(v).ok())
    }
}

/// A spawned process whose merged output is consumed line by line.
pub trait RunningProcess: Send {
    /// Block until the next output line is available. `None` once both
    /// output streams are closed.
    fn next_line(&mut self) -> Option<Result<String, RuntimeError>>;

    /// Wait for exit and return the exit code (`-1` when killed by a signal).
    fn wait(self: Box<Self>) -> Result<i32, RuntimeError>;
}

pub trait ProcessRunner: Send + Sync {
    fn name(&self) -> &'static str;

    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn RunningProcess>, RuntimeError>;
}

pub fn select_runner(name: &str) -> Result<Box<dyn ProcessRunner>, RuntimeError> {
    match name {
        "system" => Ok(Box::new(crate::system::SystemRunner::new())),
        "mock" => Ok(Box::new(crate::mock::MockRunner::new())),
        other => Err(RuntimeError::RunnerUnavailable(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_valid_runners() {
        assert_eq!(select_runner("system").unwrap().name(), "system");
        assert_eq!(select_runner("mock").unwrap().name(), "mock");
    }

    #[test]
    fn select_invalid_runner_fails() {
        assert!(matches!(
            select_runner("docker"),
            Err(RuntimeError::RunnerUnavailable(_))
        ));
    }

    #[test]
    fn flag_values_and_extra_vars() {
        let inv = Invocation {
            program: "ansible-playbook".to_owned(),
            args: vec![
                "--extra-vars".to_owned(),
                r#"{"virtual_env_name":"ml"}"#.to_owned(),
                "site.yml".to_owned(),
            ],
            env: BTreeMap::new(),
        };
        assert_eq!(inv.extra_vars().unwrap()["virtual_env_name"], "ml");
        assert_eq!(inv.flag_value("--missing"), None);
        assert!(inv.command_line().starts_with("ansible-playbook --extra-vars"));
    }
}
