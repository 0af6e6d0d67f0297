use crate::library::Library;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DesiredStateError {
    #[error("failed to read desired-state file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse desired state: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("failed to parse desired state: {0}")]
    ParseJson(#[from] serde_json::Error),
    #[error("invalid virtual environment name '{0}': expected 1-64 characters of [A-Za-z0-9._-], not starting with '.'")]
    InvalidEnvName(String),
    #[error("virtual environment '{0}' is declared more than once")]
    DuplicateEnv(String),
    #[error("virtual environment '{env}' declares a library with an empty {field}")]
    EmptyLibraryField { env: String, field: &'static str },
}

/// Snapshot of the virtual environments an operator wants on one host.
///
/// Order is preserved: it drives the order in which follow-up operations are
/// generated.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DesiredState {
    #[serde(default)]
    pub virtual_environments: Vec<DesiredEnvironment>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DesiredEnvironment {
    pub name: String,
    #[serde(default)]
    pub libraries: Vec<Library>,
}

impl DesiredState {
    /// Trim names and versions, then drop exact duplicate libraries while
    /// keeping first-seen order.
    pub fn normalized(&self) -> Self {
        let virtual_environments = self
            .virtual_environments
            .iter()
            .map(|env| {
                let mut seen = HashSet::new();
                let libraries = env
                    .libraries
                    .iter()
                    .map(|lib| Library::new(lib.name.trim(), lib.version.trim()))
                    .filter(|lib| seen.insert(lib.clone()))
                    .collect();
                DesiredEnvironment {
                    name: env.name.trim().to_owned(),
                    libraries,
                }
            })
            .collect();
        Self {
            virtual_environments,
        }
    }

    pub fn validate(&self) -> Result<(), DesiredStateError> {
        let mut names = HashSet::new();
        for env in &self.virtual_environments {
            validate_env_name(&env.name)?;
            if !names.insert(env.name.as_str()) {
                return Err(DesiredStateError::DuplicateEnv(env.name.clone()));
            }
            for lib in &env.libraries {
                if lib.name.is_empty() {
                    return Err(DesiredStateError::EmptyLibraryField {
                        env: env.name.clone(),
                        field: "name",
                    });
                }
                if lib.version.is_empty() {
                    return Err(DesiredStateError::EmptyLibraryField {
                        env: env.name.clone(),
                        field: "version",
                    });
                }
            }
        }
        Ok(())
    }

    pub fn environment(&self, name: &str) -> Option<&DesiredEnvironment> {
        self.virtual_environments.iter().find(|e| e.name == name)
    }
}

/// Environment names end up as directory names on the managed host and as
/// store file names, so they are restricted to a conservative alphabet.
pub fn validate_env_name(name: &str) -> Result<(), DesiredStateError> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(DesiredStateError::InvalidEnvName(name.to_owned()))
    }
}

/// Parse, normalize and validate a TOML desired-state document.
pub fn parse_desired_str(input: &str) -> Result<DesiredState, DesiredStateError> {
    let parsed: DesiredState = toml::from_str(input)?;
    let normalized = parsed.normalized();
    normalized.validate()?;
    Ok(normalized)
}

/// Same as [`parse_desired_str`] for the JSON form submitted by API callers.
pub fn parse_desired_json(input: &str) -> Result<DesiredState, DesiredStateError> {
    let parsed: DesiredState = serde_json::from_str(input)?;
    let normalized = parsed.normalized();
    normalized.validate()?;
    Ok(normalized)
}

pub fn parse_desired_file(path: impl AsRef<Path>) -> Result<DesiredState, DesiredStateError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    if path.extension().is_some_and(|ext| ext == "json") {
        parse_desired_json(&content)
    } else {
        parse_desired_str(&content)
    }
}
