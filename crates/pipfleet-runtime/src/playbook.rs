use crate::backend::Invocation;
use crate::RuntimeError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

/// Host keys of freshly provisioned instances are unknown, so they are
/// neither checked nor recorded.
pub const SSH_COMMON_ARGS: &str = "-o UserKnownHostsFile=/dev/null";

/// Builds `ansible-playbook` invocations for a playbook directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybookCommand {
    pub execution_command: String,
    /// Fixed flags inserted before the per-run arguments.
    pub playbook_arguments: Vec<String>,
    pub playbooks_dir: PathBuf,
    /// `ANSIBLE_LIBRARY` override for custom modules.
    pub ansible_library: Option<String>,
}

impl PlaybookCommand {
    pub fn playbook_path(&self, stem: &str) -> PathBuf {
        self.playbooks_dir.join(format!("{stem}.yml"))
    }

    /// Resolve the playbook and assemble the command. Fails with
    /// [`RuntimeError::ScriptMissing`] before anything is spawned when the
    /// playbook file does not exist.
    pub fn build(
        &self,
        stem: &str,
        extra_vars: &Map<String, Value>,
    ) -> Result<Invocation, RuntimeError> {
        let path = self.playbook_path(stem);
        if !path.is_file() {
            return Err(RuntimeError::ScriptMissing(path));
        }

        let mut args = self.playbook_arguments.clone();
        args.push("--extra-vars".to_owned());
        args.push(serde_json::to_string(extra_vars)?);
        args.push("--ssh-common-args".to_owned());
        args.push(SSH_COMMON_ARGS.to_owned());
        args.push(path.to_string_lossy().into_owned());

        let mut env = BTreeMap::new();
        if let Some(lib) = &self.ansible_library {
            env.insert("ANSIBLE_LIBRARY".to_owned(), lib.clone());
        }
        env.insert("ANSIBLE_HOST_KEY_CHECKING".to_owned(), "False".to_owned());

        debug!("playbook invocation for {stem}: {} args", args.len());
        Ok(Invocation {
            program: self.execution_command.clone(),
            args,
            env,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command(dir: &std::path::Path) -> PlaybookCommand {
        PlaybookCommand {
            execution_command: "ansible-playbook".to_owned(),
            playbook_arguments: vec!["-i".to_owned(), "hosts.ini".to_owned()],
            playbooks_dir: dir.to_path_buf(),
            ansible_library: Some("/usr/share/pipfleet/modules".to_owned()),
        }
    }

    #[test]
    fn builds_full_argument_vector() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("synchronize_packages.yml"), "---\n").unwrap();
        let mut vars = Map::new();
        vars.insert("virtual_env_name".to_owned(), json!("ml"));

        let inv = command(dir.path()).build("synchronize_packages", &vars).unwrap();
        assert_eq!(inv.program, "ansible-playbook");
        assert_eq!(&inv.args[..3], ["-i", "hosts.ini", "--extra-vars"]);
        assert_eq!(inv.extra_vars().unwrap(), json!({"virtual_env_name": "ml"}));
        assert_eq!(inv.flag_value("--ssh-common-args"), Some(SSH_COMMON_ARGS));
        assert!(inv.args.last().unwrap().ends_with("synchronize_packages.yml"));
        assert_eq!(inv.env["ANSIBLE_HOST_KEY_CHECKING"], "False");
        assert_eq!(inv.env["ANSIBLE_LIBRARY"], "/usr/share/pipfleet/modules");
    }

    #[test]
    fn missing_playbook_fails_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let err = command(dir.path())
            .build("delete_python_environment", &Map::new())
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::ScriptMissing(p) if p.ends_with("delete_python_environment.yml")
        ));
    }

    #[test]
    fn library_override_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.yml"), "---\n").unwrap();
        let mut cmd = command(dir.path());
        cmd.ansible_library = None;
        let inv = cmd.build("x", &Map::new()).unwrap();
        assert!(!inv.env.contains_key("ANSIBLE_LIBRARY"));
    }
}
