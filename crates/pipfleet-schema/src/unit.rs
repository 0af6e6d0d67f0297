use crate::library::Library;
use crate::types::UnitId;
use serde::{Deserialize, Serialize};

/// One managed host's Python environment configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManagementUnit {
    pub id: UnitId,
    pub name: String,
    /// Account that owns the unit on the control plane.
    pub owner: String,
    pub instance_uuid: String,
    /// Base image of the managed host; selects the default system user.
    pub image_name: String,
    pub project_uuid: String,
    pub provider_uuid: String,
    /// Directory on the managed host that holds the virtual environments.
    pub virtual_envs_dir_path: String,
    pub created_at: String,
    /// blake3 checksum for integrity verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Caller-supplied fields for a new management unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewUnit {
    pub name: String,
    pub owner: String,
    pub instance_uuid: String,
    pub image_name: String,
    pub project_uuid: String,
    pub provider_uuid: String,
    pub virtual_envs_dir_path: String,
}

impl ManagementUnit {
    pub fn from_new(new: NewUnit) -> Self {
        Self {
            id: UnitId::generate(),
            name: new.name,
            owner: new.owner,
            instance_uuid: new.instance_uuid,
            image_name: new.image_name,
            project_uuid: new.project_uuid,
            provider_uuid: new.provider_uuid,
            virtual_envs_dir_path: new.virtual_envs_dir_path,
            created_at: chrono::Utc::now().to_rfc3339(),
            checksum: None,
        }
    }
}

/// Persisted reflection of one remote virtual environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VirtualEnvironment {
    pub name: String,
    #[serde(default)]
    pub installed_libraries: Vec<Library>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl VirtualEnvironment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            installed_libraries: Vec::new(),
            checksum: None,
        }
    }
}
