use crate::library::Library;
use crate::types::{OperationId, UnitId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The six kinds of orchestration work a management unit can receive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Initialize,
    Synchronize,
    FindVirtualEnvs,
    FindInstalledLibraries,
    DeleteVirtualEnv,
    Delete,
}

/// Lock granularity an operation kind works at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Never blocked and never locks: a unit is initialized exactly once.
    Unscoped,
    Global,
    VirtualEnv,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        OperationKind::Initialize,
        OperationKind::Synchronize,
        OperationKind::FindVirtualEnvs,
        OperationKind::FindInstalledLibraries,
        OperationKind::DeleteVirtualEnv,
        OperationKind::Delete,
    ];

    /// Playbook file stem run for this kind.
    pub fn playbook(self) -> &'static str {
        match self {
            OperationKind::Initialize => "install_python_environment",
            OperationKind::Synchronize => "synchronize_packages",
            OperationKind::FindVirtualEnvs => "find_installed_virtual_environments",
            OperationKind::FindInstalledLibraries => {
                "find_installed_libraries_for_virtual_environment"
            }
            OperationKind::DeleteVirtualEnv => "delete_virtual_environment",
            OperationKind::Delete => "delete_python_environment",
        }
    }

    /// Human-facing name used in listings.
    pub fn plain_name(self) -> &'static str {
        match self {
            OperationKind::Initialize => "initialization",
            OperationKind::Synchronize => "synchronization",
            OperationKind::FindVirtualEnvs => "virtual_envs_search",
            OperationKind::FindInstalledLibraries => "installed_libraries_search",
            OperationKind::DeleteVirtualEnv => "virtual_environment_deletion",
            OperationKind::Delete => "python_management_deletion",
        }
    }

    pub fn scope_kind(self) -> ScopeKind {
        match self {
            OperationKind::Initialize => ScopeKind::Unscoped,
            OperationKind::FindVirtualEnvs | OperationKind::Delete => ScopeKind::Global,
            OperationKind::Synchronize
            | OperationKind::FindInstalledLibraries
            | OperationKind::DeleteVirtualEnv => ScopeKind::VirtualEnv,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plain_name())
    }
}

/// Kind-specific payload. Only synchronization carries data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationPayload {
    Initialize,
    Synchronize {
        #[serde(default)]
        libraries_to_install: Vec<Library>,
        #[serde(default)]
        libraries_to_remove: Vec<Library>,
    },
    FindVirtualEnvs,
    FindInstalledLibraries,
    DeleteVirtualEnv,
    Delete,
}

impl OperationPayload {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationPayload::Initialize => OperationKind::Initialize,
            OperationPayload::Synchronize { .. } => OperationKind::Synchronize,
            OperationPayload::FindVirtualEnvs => OperationKind::FindVirtualEnvs,
            OperationPayload::FindInstalledLibraries => OperationKind::FindInstalledLibraries,
            OperationPayload::DeleteVirtualEnv => OperationKind::DeleteVirtualEnv,
            OperationPayload::Delete => OperationKind::Delete,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Scheduled,
    Executing,
    CreationScheduled,
    Creating,
    DeletionScheduled,
    Deleting,
    Ok,
    Erred,
}

impl OperationState {
    pub fn initial_for(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Initialize => OperationState::CreationScheduled,
            OperationKind::Delete => OperationState::DeletionScheduled,
            _ => OperationState::Scheduled,
        }
    }

    /// The in-flight state a scheduled state moves to when execution starts.
    pub fn running(self) -> Option<Self> {
        match self {
            OperationState::Scheduled => Some(OperationState::Executing),
            OperationState::CreationScheduled => Some(OperationState::Creating),
            OperationState::DeletionScheduled => Some(OperationState::Deleting),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OperationState::Ok | OperationState::Erred)
    }

    pub fn is_scheduled(self) -> bool {
        matches!(
            self,
            OperationState::Scheduled
                | OperationState::CreationScheduled
                | OperationState::DeletionScheduled
        )
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationState::Scheduled => write!(f, "scheduled"),
            OperationState::Executing => write!(f, "executing"),
            OperationState::CreationScheduled => write!(f, "creation_scheduled"),
            OperationState::Creating => write!(f, "creating"),
            OperationState::DeletionScheduled => write!(f, "deletion_scheduled"),
            OperationState::Deleting => write!(f, "deleting"),
            OperationState::Ok => write!(f, "ok"),
            OperationState::Erred => write!(f, "erred"),
        }
    }
}

/// Resolved lock scope of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    VirtualEnv(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => write!(f, "<global>"),
            Scope::VirtualEnv(name) => f.write_str(name),
        }
    }
}

/// One unit of orchestration work against a management unit.
///
/// `output` is never serialized with the record: the store keeps it in a
/// separate append-only log and fills it in on read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Operation {
    pub id: OperationId,
    pub unit_id: UnitId,
    pub payload: OperationPayload,
    /// Empty for operations that act on the whole unit.
    #[serde(default)]
    pub virtual_env_name: String,
    pub state: OperationState,
    #[serde(skip)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Initialization this synchronization was declared alongside; it is
    /// submitted once that initialization succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialization: Option<OperationId>,
    pub created_at: String,
    pub updated_at: String,
    /// blake3 checksum for integrity verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl Operation {
    pub fn new(unit_id: UnitId, payload: OperationPayload, virtual_env_name: &str) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: OperationId::generate(),
            unit_id,
            state: OperationState::initial_for(payload.kind()),
            payload,
            virtual_env_name: virtual_env_name.to_owned(),
            output: String::new(),
            error_message: None,
            initialization: None,
            created_at: now.clone(),
            updated_at: now,
            checksum: None,
        }
    }

    pub fn initialize(unit_id: UnitId) -> Self {
        Self::new(unit_id, OperationPayload::Initialize, "")
    }

    pub fn synchronize(
        unit_id: UnitId,
        virtual_env_name: &str,
        libraries_to_install: Vec<Library>,
        libraries_to_remove: Vec<Library>,
    ) -> Self {
        Self::new(
            unit_id,
            OperationPayload::Synchronize {
                libraries_to_install,
                libraries_to_remove,
            },
            virtual_env_name,
        )
    }

    pub fn find_virtual_envs(unit_id: UnitId) -> Self {
        Self::new(unit_id, OperationPayload::FindVirtualEnvs, "")
    }

    pub fn find_installed_libraries(unit_id: UnitId, virtual_env_name: &str) -> Self {
        Self::new(unit_id, OperationPayload::FindInstalledLibraries, virtual_env_name)
    }

    pub fn delete_virtual_env(unit_id: UnitId, virtual_env_name: &str) -> Self {
        Self::new(unit_id, OperationPayload::DeleteVirtualEnv, virtual_env_name)
    }

    pub fn delete(unit_id: UnitId) -> Self {
        Self::new(unit_id, OperationPayload::Delete, "")
    }

    pub fn kind(&self) -> OperationKind {
        self.payload.kind()
    }

    pub fn scope(&self) -> Scope {
        if self.virtual_env_name.is_empty() {
            Scope::Global
        } else {
            Scope::VirtualEnv(self.virtual_env_name.clone())
        }
    }
}
