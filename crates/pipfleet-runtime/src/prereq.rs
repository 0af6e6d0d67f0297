use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

pub fn command_exists(name: &str) -> bool {
    if name.contains('/') {
        return std::path::Path::new(name).is_file();
    }
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check the tools playbook execution needs.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_prereqs(execution_command: &str) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists(execution_command) {
        missing.push(MissingPrereq {
            name: execution_command.to_owned(),
            purpose: "running management playbooks against managed hosts",
            install_hint: "pipx install ansible-core | apt install ansible | dnf install ansible-core",
        });
    }

    if !command_exists("ssh") {
        missing.push(MissingPrereq {
            name: "ssh".to_owned(),
            purpose: "connecting to managed hosts",
            install_hint: "apt install openssh-client | dnf install openssh-clients",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\npipfleet requires these tools to run playbooks against managed hosts.");
    msg
}
