use crate::CoreError;
use pipfleet_runtime::PlaybookCommand;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How submitted operations are handed to the execution engine.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Dispatch {
    /// One worker thread per submitted operation.
    #[default]
    Background,
    /// Run on the submitting thread. Used by tests and one-shot tooling.
    Inline,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Lock entries live in the store and are visible to every process.
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LockConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    #[serde(default = "default_global_prefix")]
    pub global_prefix: String,
    #[serde(default = "default_virtual_env_prefix")]
    pub virtual_env_prefix: String,
    #[serde(default = "default_entry_point_prefix")]
    pub entry_point_prefix: String,
    /// Lifetime of a scope lock held by a running operation.
    #[serde(default = "default_operation_ttl")]
    pub operation_ttl_secs: u64,
    /// Lifetime of the check-then-enqueue window at entry points.
    #[serde(default = "default_entry_point_ttl")]
    pub entry_point_ttl_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            global_prefix: default_global_prefix(),
            virtual_env_prefix: default_virtual_env_prefix(),
            entry_point_prefix: default_entry_point_prefix(),
            operation_ttl_secs: default_operation_ttl(),
            entry_point_ttl_secs: default_entry_point_ttl(),
        }
    }
}

impl LockConfig {
    pub fn operation_ttl(&self) -> Duration {
        Duration::from_secs(self.operation_ttl_secs)
    }

    pub fn entry_point_ttl(&self) -> Duration {
        Duration::from_secs(self.entry_point_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default = "default_playbooks_dir")]
    pub playbooks_dir: PathBuf,
    #[serde(default = "default_execution_command")]
    pub execution_command: String,
    #[serde(default)]
    pub playbook_arguments: Vec<String>,
    #[serde(default)]
    pub ansible_library: Option<String>,
    /// Control-plane endpoint playbooks report back to.
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub private_key_path: String,
    #[serde(default)]
    pub public_key_uuid: String,
    /// `system` runs real processes, `mock` simulates hosts in memory.
    #[serde(default = "default_runner")]
    pub runner: String,
    #[serde(default)]
    pub dispatch: Dispatch,
    #[serde(default)]
    pub lock: LockConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            playbooks_dir: default_playbooks_dir(),
            execution_command: default_execution_command(),
            playbook_arguments: Vec::new(),
            ansible_library: None,
            api_url: String::new(),
            access_token: None,
            private_key_path: String::new(),
            public_key_uuid: String::new(),
            runner: default_runner(),
            dispatch: Dispatch::default(),
            lock: LockConfig::default(),
        }
    }
}

fn default_playbooks_dir() -> PathBuf {
    PathBuf::from("/usr/share/pipfleet/playbooks")
}

fn default_execution_command() -> String {
    "ansible-playbook".to_owned()
}

fn default_runner() -> String {
    "system".to_owned()
}

fn default_global_prefix() -> String {
    "pipfleet_global_".to_owned()
}

fn default_virtual_env_prefix() -> String {
    "pipfleet_venv_".to_owned()
}

fn default_entry_point_prefix() -> String {
    "pipfleet_entry_point_".to_owned()
}

fn default_operation_ttl() -> u64 {
    3600
}

fn default_entry_point_ttl() -> u64 {
    120
}

impl EngineConfig {
    pub fn parse_str(input: &str) -> Result<Self, CoreError> {
        toml::from_str(input).map_err(|e| CoreError::Config(format!("invalid config: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::parse_str(&content)
    }

    /// Load `~/.config/pipfleet/config.toml`, or defaults when it is absent.
    pub fn load_default() -> Result<Self, CoreError> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn playbook_command(&self) -> PlaybookCommand {
        PlaybookCommand {
            execution_command: self.execution_command.clone(),
            playbook_arguments: self.playbook_arguments.clone(),
            playbooks_dir: self.playbooks_dir.clone(),
            ansible_library: self.ansible_library.clone(),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/pipfleet/config.toml"))
}
