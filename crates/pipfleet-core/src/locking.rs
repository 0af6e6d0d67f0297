//! TTL scope locks and admission control.
//!
//! Locks are optimistic: a held key only stops *new* operations on an
//! overlapping scope from being admitted. Nothing records who holds a key,
//! and an expired key admits the next operation even if the old process is
//! still running.

use crate::config::LockConfig;
use crate::CoreError;
use pipfleet_schema::{Operation, ScopeKind};
use pipfleet_store::{LockCache, StoreError};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Structured refusal returned to callers instead of an error.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LockedResponse {
    /// `true` when the whole unit was locked rather than individual
    /// environments.
    pub global_lock: bool,
    pub locked_scopes: Vec<String>,
}

impl LockedResponse {
    pub fn global() -> Self {
        Self {
            global_lock: true,
            locked_scopes: Vec::new(),
        }
    }

    pub fn scopes(locked_scopes: Vec<String>) -> Self {
        Self {
            global_lock: locked_scopes.is_empty(),
            locked_scopes,
        }
    }
}

pub struct LockRegistry {
    cache: Arc<dyn LockCache>,
    config: LockConfig,
    admission: Mutex<()>,
}

impl LockRegistry {
    pub fn new(cache: Arc<dyn LockCache>, config: LockConfig) -> Self {
        Self {
            cache,
            config,
            admission: Mutex::new(()),
        }
    }

    pub fn cache(&self) -> &dyn LockCache {
        self.cache.as_ref()
    }

    pub fn global_key(&self, unit_id: &str) -> String {
        format!("{}{unit_id}", self.config.global_prefix)
    }

    pub fn virtual_env_key(&self, unit_id: &str, venv: &str) -> String {
        format!("{}{unit_id}_{venv}", self.config.virtual_env_prefix)
    }

    pub fn entry_point_key(&self, unit_id: &str) -> String {
        format!("{}{unit_id}", self.config.entry_point_prefix)
    }

    /// Key of the lock `op` holds while running; `None` for unscoped kinds.
    pub fn scope_key(&self, op: &Operation) -> Option<String> {
        match op.kind().scope_kind() {
            ScopeKind::Unscoped => None,
            ScopeKind::Global => Some(self.global_key(&op.unit_id)),
            ScopeKind::VirtualEnv => Some(self.virtual_env_key(&op.unit_id, &op.virtual_env_name)),
        }
    }

    pub fn is_global_locked(&self, unit_id: &str) -> Result<bool, CoreError> {
        Ok(self.cache.exists(&self.global_key(unit_id))?)
    }

    /// Global work blocks all environment work on the same unit; environment
    /// work only blocks its own environment.
    pub fn is_admissible(&self, op: &Operation) -> Result<bool, CoreError> {
        let admissible = match op.kind().scope_kind() {
            ScopeKind::Unscoped => true,
            ScopeKind::Global => !self.is_global_locked(&op.unit_id)?,
            ScopeKind::VirtualEnv => {
                !self
                    .cache
                    .exists(&self.virtual_env_key(&op.unit_id, &op.virtual_env_name))?
                    && !self.is_global_locked(&op.unit_id)?
            }
        };
        Ok(admissible)
    }

    /// Set (or extend) the scope lock for `op` and return a guard that
    /// releases it when dropped.
    pub fn acquire(&self, op: &Operation) -> Result<ScopeGuard<'_>, CoreError> {
        let key = self.scope_key(op);
        if let Some(key) = &key {
            self.cache.set_with_ttl(key, self.config.operation_ttl())?;
            debug!("acquired scope lock {key}");
        }
        Ok(ScopeGuard {
            cache: self.cache.as_ref(),
            key,
        })
    }

    /// Admission check and acquisition as one step for callers in this
    /// process. `None` when the scope is taken.
    pub fn try_acquire(&self, op: &Operation) -> Result<Option<ScopeGuard<'_>>, CoreError> {
        let _admission = self.admission_lock()?;
        if !self.is_admissible(op)? {
            return Ok(None);
        }
        self.acquire(op).map(Some)
    }

    pub fn release(&self, op: &Operation) -> Result<(), CoreError> {
        if let Some(key) = self.scope_key(op) {
            self.cache.delete(&key)?;
            debug!("released scope lock {key}");
        }
        Ok(())
    }

    pub fn release_global(&self, unit_id: &str) -> Result<(), CoreError> {
        self.cache.delete(&self.global_key(unit_id))?;
        debug!("released global lock of unit {unit_id}");
        Ok(())
    }

    /// Open the short entry-point window for `unit_id`. `None` when another
    /// request is already inside it.
    pub fn enter(&self, unit_id: &str) -> Result<Option<EntryPointGuard<'_>>, CoreError> {
        let _admission = self.admission_lock()?;
        let key = self.entry_point_key(unit_id);
        if self.cache.exists(&key)? {
            return Ok(None);
        }
        self.cache.set_with_ttl(&key, self.config.entry_point_ttl())?;
        Ok(Some(EntryPointGuard {
            cache: self.cache.as_ref(),
            key,
        }))
    }

    fn admission_lock(&self) -> Result<std::sync::MutexGuard<'_, ()>, CoreError> {
        self.admission
            .lock()
            .map_err(|_| CoreError::Store(StoreError::LockFailed("admission mutex poisoned".to_owned())))
    }
}

fn release_key(cache: &dyn LockCache, key: &str) {
    if let Err(e) = cache.delete(key) {
        warn!("failed to release lock {key}: {e}; it expires with its ttl");
    }
}

/// Releases an operation's scope lock on every exit path.
pub struct ScopeGuard<'a> {
    cache: &'a dyn LockCache,
    key: Option<String>,
}

impl ScopeGuard<'_> {
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            release_key(self.cache, &key);
            debug!("released scope lock {key}");
        }
    }
}

/// Holds the entry-point window open until dropped.
pub struct EntryPointGuard<'a> {
    cache: &'a dyn LockCache,
    key: String,
}

impl Drop for EntryPointGuard<'_> {
    fn drop(&mut self) {
        release_key(self.cache, &self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipfleet_schema::UnitId;
    use pipfleet_store::MemoryCache;
    use std::time::Duration;

    fn registry() -> LockRegistry {
        LockRegistry::new(Arc::new(MemoryCache::new()), LockConfig::default())
    }

    fn unit() -> UnitId {
        UnitId::new("u1")
    }

    #[test]
    fn key_formats() {
        let r = registry();
        assert_eq!(r.global_key("u1"), "pipfleet_global_u1");
        assert_eq!(r.virtual_env_key("u1", "ml"), "pipfleet_venv_u1_ml");
        assert_eq!(r.entry_point_key("u1"), "pipfleet_entry_point_u1");
        assert_eq!(r.scope_key(&Operation::initialize(unit())), None);
    }

    #[test]
    fn same_environment_excludes() {
        let r = registry();
        let a = Operation::synchronize(unit(), "ml", vec![], vec![]);
        let b = Operation::find_installed_libraries(unit(), "ml");
        let _guard = r.acquire(&a).unwrap();
        assert!(!r.is_admissible(&b).unwrap());
    }

    #[test]
    fn different_environments_do_not_exclude() {
        let r = registry();
        let a = Operation::synchronize(unit(), "ml", vec![], vec![]);
        let b = Operation::delete_virtual_env(unit(), "web");
        let _guard = r.acquire(&a).unwrap();
        assert!(r.is_admissible(&b).unwrap());
    }

    #[test]
    fn global_blocks_environment_work() {
        let r = registry();
        let global = Operation::find_virtual_envs(unit());
        let env_op = Operation::synchronize(unit(), "ml", vec![], vec![]);
        let _guard = r.acquire(&global).unwrap();
        assert!(!r.is_admissible(&env_op).unwrap());
        assert!(!r.is_admissible(&Operation::delete(unit())).unwrap());
    }

    #[test]
    fn environment_work_does_not_block_global() {
        let r = registry();
        let env_op = Operation::synchronize(unit(), "ml", vec![], vec![]);
        let _guard = r.acquire(&env_op).unwrap();
        assert!(r.is_admissible(&Operation::find_virtual_envs(unit())).unwrap());
    }

    #[test]
    fn other_units_are_independent() {
        let r = registry();
        let _guard = r.acquire(&Operation::delete(unit())).unwrap();
        assert!(r
            .is_admissible(&Operation::find_virtual_envs(UnitId::new("u2")))
            .unwrap());
    }

    #[test]
    fn initialize_is_never_blocked() {
        let r = registry();
        let _guard = r.acquire(&Operation::delete(unit())).unwrap();
        assert!(r.is_admissible(&Operation::initialize(unit())).unwrap());
    }

    #[test]
    fn guard_releases_on_drop() {
        let r = registry();
        let op = Operation::delete_virtual_env(unit(), "ml");
        {
            let guard = r.acquire(&op).unwrap();
            assert_eq!(guard.key(), Some("pipfleet_venv_u1_ml"));
        }
        assert!(r.is_admissible(&op).unwrap());
    }

    #[test]
    fn try_acquire_refuses_when_held() {
        let r = registry();
        let op = Operation::find_virtual_envs(unit());
        let first = r.try_acquire(&op).unwrap();
        assert!(first.is_some());
        assert!(r.try_acquire(&op).unwrap().is_none());
        drop(first);
        assert!(r.try_acquire(&op).unwrap().is_some());
    }

    #[test]
    fn expired_lock_admits() {
        let config = LockConfig {
            operation_ttl_secs: 0,
            ..LockConfig::default()
        };
        let r = LockRegistry::new(Arc::new(MemoryCache::new()), config);
        let op = Operation::delete(unit());
        let guard = r.acquire(&op).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(r.is_admissible(&op).unwrap());
        drop(guard);
    }

    #[test]
    fn entry_point_window_is_exclusive() {
        let r = registry();
        let first = r.enter("u1").unwrap();
        assert!(first.is_some());
        assert!(r.enter("u1").unwrap().is_none());
        assert!(r.enter("u2").unwrap().is_some());
        drop(first);
        assert!(r.enter("u1").unwrap().is_some());
    }

    #[test]
    fn explicit_release() {
        let r = registry();
        let op = Operation::find_virtual_envs(unit());
        std::mem::forget(r.acquire(&op).unwrap());
        assert!(r.is_global_locked("u1").unwrap());
        r.release(&op).unwrap();
        assert!(!r.is_global_locked("u1").unwrap());

        std::mem::forget(r.acquire(&op).unwrap());
        r.release_global("u1").unwrap();
        assert!(!r.is_global_locked("u1").unwrap());
    }

    #[test]
    fn locked_response_shape() {
        assert_eq!(
            LockedResponse::global(),
            LockedResponse {
                global_lock: true,
                locked_scopes: vec![]
            }
        );
        let r = LockedResponse::scopes(vec!["ml".to_owned()]);
        assert!(!r.global_lock);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["locked_scopes"][0], "ml");
    }
}
