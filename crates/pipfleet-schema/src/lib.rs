//! Data model for pipfleet.
//!
//! This crate defines the schema layer: typed identifiers (`UnitId`,
//! `OperationId`), the desired-state descriptor parsed from TOML
//! (`DesiredState`), the operation tagged variant with its lifecycle states
//! (`Operation`, `OperationKind`, `OperationState`), lock scopes, and the
//! persisted management-unit and virtual-environment records.

pub mod desired;
pub mod library;
pub mod operation;
pub mod types;
pub mod unit;

pub use desired::{
    parse_desired_file, parse_desired_json, parse_desired_str, validate_env_name, DesiredEnvironment,
    DesiredState, DesiredStateError,
};
pub use library::{parse_requirement, Library};
pub use operation::{
    Operation, OperationKind, OperationPayload, OperationState, Scope, ScopeKind,
};
pub use types::{OperationId, UnitId};
pub use unit::{ManagementUnit, NewUnit, VirtualEnvironment};
