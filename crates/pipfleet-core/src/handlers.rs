//! Per-kind reconciliation of extracted facts into persisted records.

use crate::locking::LockRegistry;
use crate::postprocess::ExtractedFacts;
use crate::CoreError;
use pipfleet_schema::{Library, Operation, VirtualEnvironment};
use pipfleet_store::UnitStore;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// What a handler may touch while it runs.
pub trait HandlerContext {
    fn units(&self) -> &UnitStore;

    fn locks(&self) -> &LockRegistry;

    /// Persist a follow-up operation. It is submitted once the current
    /// operation has finished.
    fn enqueue(&mut self, op: Operation) -> Result<(), CoreError>;
}

pub trait ExtractedInformationHandler: Sync {
    fn handle(
        &self,
        ctx: &mut dyn HandlerContext,
        op: &Operation,
        facts: ExtractedFacts,
    ) -> Result<(), CoreError>;
}

pub struct NullHandler;

impl ExtractedInformationHandler for NullHandler {
    fn handle(
        &self,
        _ctx: &mut dyn HandlerContext,
        _op: &Operation,
        _facts: ExtractedFacts,
    ) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Makes the persisted environment match the observed library set.
pub struct InstalledLibrariesHandler;

impl ExtractedInformationHandler for InstalledLibrariesHandler {
    fn handle(
        &self,
        ctx: &mut dyn HandlerContext,
        op: &Operation,
        facts: ExtractedFacts,
    ) -> Result<(), CoreError> {
        let ExtractedFacts::InstalledLibraries(observed) = facts else {
            warn!(
                "operation {} never listed '{}'; persisted libraries left as they are",
                op.id, op.virtual_env_name
            );
            return Ok(());
        };
        let units = ctx.units();
        let venv = op.virtual_env_name.as_str();
        let persisted = units.find_env(&op.unit_id, venv)?;

        match (persisted, observed.is_empty()) {
            (None, true) => {
                debug!("{venv}: not present and nothing installed");
            }
            (Some(_), true) => {
                units.remove_env(&op.unit_id, venv)?;
                info!("{venv}: no libraries left, environment removed");
            }
            (existing, false) => {
                let mut env = existing.unwrap_or_else(|| VirtualEnvironment::new(venv));
                let (added, removed) = upsert_libraries(&mut env.installed_libraries, &observed);
                units.put_env(&op.unit_id, &env)?;
                info!("{venv}: {added} libraries added, {removed} removed");
            }
        }
        Ok(())
    }
}

/// Bring `persisted` to exactly `observed` by set difference. Returns the
/// number of entries added and removed.
fn upsert_libraries(persisted: &mut Vec<Library>, observed: &[Library]) -> (usize, usize) {
    let wanted: HashSet<&Library> = observed.iter().collect();
    let before = persisted.len();
    persisted.retain(|lib| wanted.contains(lib));
    let removed = before - persisted.len();

    let present: HashSet<Library> = persisted.iter().cloned().collect();
    let missing: Vec<Library> = observed
        .iter()
        .filter(|lib| !present.contains(*lib))
        .cloned()
        .collect();
    let added = missing.len();
    persisted.extend(missing);
    (added, removed)
}

/// Forgets an environment once it is gone from the host.
pub struct VirtualEnvDeletionHandler;

impl ExtractedInformationHandler for VirtualEnvDeletionHandler {
    fn handle(
        &self,
        ctx: &mut dyn HandlerContext,
        op: &Operation,
        _facts: ExtractedFacts,
    ) -> Result<(), CoreError> {
        ctx.units().remove_env(&op.unit_id, &op.virtual_env_name)?;
        info!("{}: environment deleted", op.virtual_env_name);
        Ok(())
    }
}

/// Drops the whole unit with all of its environments.
pub struct DeletionHandler;

impl ExtractedInformationHandler for DeletionHandler {
    fn handle(
        &self,
        ctx: &mut dyn HandlerContext,
        op: &Operation,
        _facts: ExtractedFacts,
    ) -> Result<(), CoreError> {
        ctx.units().remove(&op.unit_id)?;
        info!("unit {} deleted", op.unit_id);
        Ok(())
    }
}

/// Queues a library search for every environment found on the host.
pub struct FindVirtualEnvsHandler;

impl ExtractedInformationHandler for FindVirtualEnvsHandler {
    fn handle(
        &self,
        ctx: &mut dyn HandlerContext,
        op: &Operation,
        facts: ExtractedFacts,
    ) -> Result<(), CoreError> {
        // The searches below lock their own environments; the global lock
        // would refuse every one of them.
        ctx.locks().release_global(&op.unit_id)?;

        let ExtractedFacts::VirtualEnvironments(names) = facts else {
            return Ok(());
        };
        debug!("found {} virtual environments on unit {}", names.len(), op.unit_id);
        for name in names {
            ctx.enqueue(Operation::find_installed_libraries(op.unit_id.clone(), &name))?;
        }
        Ok(())
    }
}
