//! `--extra-vars` assembly for playbook runs.

use crate::config::EngineConfig;
use crate::CoreError;
use pipfleet_runtime::default_system_user;
use pipfleet_schema::{ManagementUnit, Operation, OperationPayload};
use serde_json::{json, Map, Value};

/// Issues the credential a playbook uses to report back to the control
/// plane. Called once per run, so implementations may mint short-lived
/// tokens.
pub trait AccessTokenSource: Send + Sync {
    fn issue(&self, unit: &ManagementUnit) -> Result<String, CoreError>;
}

/// Hands out the same configured token for every run.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub String);

impl AccessTokenSource for StaticToken {
    fn issue(&self, _unit: &ManagementUnit) -> Result<String, CoreError> {
        Ok(self.0.clone())
    }
}

/// Variables every playbook receives.
pub fn common_vars(
    config: &EngineConfig,
    unit: &ManagementUnit,
    access_token: &str,
) -> Result<Map<String, Value>, CoreError> {
    let user = default_system_user(&unit.image_name)?;
    let mut vars = Map::new();
    vars.insert("api_url".to_owned(), json!(config.api_url));
    vars.insert("access_token".to_owned(), json!(access_token));
    vars.insert("project_uuid".to_owned(), json!(unit.project_uuid));
    vars.insert("provider_uuid".to_owned(), json!(unit.provider_uuid));
    vars.insert("private_key_path".to_owned(), json!(config.private_key_path));
    vars.insert("public_key_uuid".to_owned(), json!(config.public_key_uuid));
    vars.insert("default_system_user".to_owned(), json!(user));
    vars.insert("instance_uuid".to_owned(), json!(unit.instance_uuid));
    vars.insert(
        "virtual_envs_dir_path".to_owned(),
        json!(unit.virtual_envs_dir_path),
    );
    Ok(vars)
}

/// Environment-scoped kinds name the environment they act on.
pub fn additional_extra_vars(op: &Operation) -> Map<String, Value> {
    let mut vars = Map::new();
    vars.insert("virtual_env_name".to_owned(), json!(op.virtual_env_name));
    vars
}

pub fn synchronization_extra_vars(op: &Operation) -> Map<String, Value> {
    let mut vars = additional_extra_vars(op);
    if let OperationPayload::Synchronize {
        libraries_to_install,
        libraries_to_remove,
    } = &op.payload
    {
        vars.insert("libraries_to_install".to_owned(), json!(libraries_to_install));
        vars.insert("libraries_to_remove".to_owned(), json!(libraries_to_remove));
    }
    vars
}
