use crate::concurrency::{shutdown_requested, StoreLock};
use crate::config::{CacheBackend, Dispatch, EngineConfig};
use crate::dispatch::strategy;
use crate::handlers::HandlerContext;
use crate::lifecycle::validate_transition;
use crate::locking::{EntryPointGuard, LockRegistry, LockedResponse};
use crate::postprocess::OutputPostProcessor;
use crate::reconcile::{self, ReconciliationPlan};
use crate::vars::{common_vars, AccessTokenSource, StaticToken};
use crate::{CoreError, REFUSAL_MESSAGE};
use pipfleet_runtime::{select_runner, PlaybookCommand, ProcessRunner, RunningProcess};
use pipfleet_schema::{
    validate_env_name, DesiredState, ManagementUnit, NewUnit, Operation, OperationId,
    OperationKind, OperationState, VirtualEnvironment,
};
use pipfleet_store::{
    FileCache, LockCache, MemoryCache, OperationStore, StoreError, StoreLayout, UnitStore,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Error message given to synchronizations whose initialization failed.
const INITIALIZATION_FAILED: &str = "initialization failed";
const UNIT_NOT_FOUND: &str = "management unit not found";

/// Outcome of a request that creates operations.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Submission {
    Accepted {
        operations: Vec<OperationId>,
    },
    /// At least one scope was busy. Operations in `accepted` were admitted
    /// and submitted anyway; the refused ones were never persisted.
    Locked {
        accepted: Vec<OperationId>,
        response: LockedResponse,
    },
}

impl Submission {
    fn locked_global() -> Self {
        Submission::Locked {
            accepted: Vec::new(),
            response: LockedResponse::global(),
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, Submission::Locked { .. })
    }

    /// Operations that were admitted.
    pub fn operations(&self) -> &[OperationId] {
        match self {
            Submission::Accepted { operations } => operations,
            Submission::Locked { accepted, .. } => accepted,
        }
    }
}

/// A unit with everything recorded about it.
#[derive(Debug, Clone, Serialize)]
pub struct UnitSummary {
    pub unit: ManagementUnit,
    pub virtual_environments: Vec<VirtualEnvironment>,
    /// Newest first, without output.
    pub operations: Vec<Operation>,
}

/// Central orchestration engine.
///
/// Owns the stores, the lock registry and the process runner, and drives
/// operations from admission through streaming execution to reconciliation
/// of their results. Cloning is cheap; clones share all state, including the
/// set of background workers [`wait_idle`](Self::wait_idle) waits for.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    layout: StoreLayout,
    config: EngineConfig,
    playbooks: PlaybookCommand,
    units: UnitStore,
    operations: OperationStore,
    locks: LockRegistry,
    runner: Arc<dyn ProcessRunner>,
    tokens: Box<dyn AccessTokenSource>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Handler view of the engine during one execution. Follow-up operations are
/// persisted immediately but only submitted once the current operation has
/// finished and released its locks.
struct ExecutionContext<'a> {
    inner: &'a EngineInner,
    follow_ups: Vec<OperationId>,
}

impl HandlerContext for ExecutionContext<'_> {
    fn units(&self) -> &UnitStore {
        &self.inner.units
    }

    fn locks(&self) -> &LockRegistry {
        &self.inner.locks
    }

    fn enqueue(&mut self, op: Operation) -> Result<(), CoreError> {
        self.inner.operations.create(&op)?;
        debug!(
            "queued {} of '{}' as {}",
            op.kind(),
            op.virtual_env_name,
            op.id
        );
        self.follow_ups.push(op.id);
        Ok(())
    }
}

impl Engine {
    /// Open (and initialize if needed) the store under `root`, with the
    /// runner and lock cache named by `config`.
    pub fn new(root: impl Into<PathBuf>, config: EngineConfig) -> Result<Self, CoreError> {
        let root: PathBuf = root.into();
        let layout = StoreLayout::new(&root);
        layout.initialize()?;

        let runner: Arc<dyn ProcessRunner> = Arc::from(select_runner(&config.runner)?);
        let cache: Arc<dyn LockCache> = match config.lock.backend {
            CacheBackend::File => {
                let cache = FileCache::new(layout.locks_dir())?;
                purge_stale_locks(&layout, &cache);
                Arc::new(cache)
            }
            CacheBackend::Memory => Arc::new(MemoryCache::new()),
        };
        Self::with_parts(root, config, runner, cache)
    }

    /// Build an engine around an explicit runner and lock cache.
    pub fn with_parts(
        root: impl Into<PathBuf>,
        config: EngineConfig,
        runner: Arc<dyn ProcessRunner>,
        cache: Arc<dyn LockCache>,
    ) -> Result<Self, CoreError> {
        let layout = StoreLayout::new(root.into());
        layout.initialize()?;
        debug!(
            "engine at {} (runner={}, locks={}, dispatch={:?})",
            layout.root().display(),
            runner.name(),
            cache.name(),
            config.dispatch
        );

        let tokens = Box::new(StaticToken(config.access_token.clone().unwrap_or_default()));
        Ok(Self {
            inner: Arc::new(EngineInner {
                units: UnitStore::new(layout.clone()),
                operations: OperationStore::new(layout.clone()),
                locks: LockRegistry::new(cache, config.lock.clone()),
                playbooks: config.playbook_command(),
                layout,
                config,
                runner,
                tokens,
                workers: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn store_layout(&self) -> &StoreLayout {
        &self.inner.layout
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.inner.locks
    }

    /// Run one scheduled operation to a terminal state.
    ///
    /// A failing playbook, a missing script or a busy scope end the operation
    /// `Erred` and still return `Ok`; only store and I/O failures are
    /// returned as errors.
    pub fn execute(&self, op_id: &str) -> Result<Operation, CoreError> {
        let inner = &self.inner;
        let op = inner.operations.get(op_id)?;
        let Some(running) = op.state.running() else {
            return Err(CoreError::InvalidTransition {
                from: op.state.to_string(),
                to: "running".to_owned(),
            });
        };

        let unit = match inner.units.get(&op.unit_id) {
            Ok(unit) => unit,
            Err(StoreError::UnitNotFound(_)) => {
                warn!("operation {} targets a deleted unit {}", op.id, op.unit_id);
                return self.finish_unstarted(&op, UNIT_NOT_FOUND);
            }
            Err(e) => return Err(e.into()),
        };

        let guard = {
            let _admission = StoreLock::acquire(&inner.layout.lock_file())?;
            inner.locks.try_acquire(&op)?
        };
        let Some(guard) = guard else {
            info!("{} {} refused: scope '{}' is busy", op.kind(), op.id, op.scope());
            inner.operations.append_output(&op.id, REFUSAL_MESSAGE)?;
            return self.finish_unstarted(&op, REFUSAL_MESSAGE);
        };

        validate_transition(op.state, running)?;
        let op = inner.operations.update_state(&op.id, running, None)?;
        info!("{} {} started on unit {}", op.kind(), op.id, unit.name);

        let outcome = self.run(&op, &unit);
        drop(guard);

        match outcome {
            Ok(follow_ups) => {
                validate_transition(op.state, OperationState::Ok)?;
                let done = inner.operations.update_state(&op.id, OperationState::Ok, None)?;
                info!("{} {} finished", done.kind(), done.id);
                if done.kind() == OperationKind::Delete {
                    self.remove_unit_lock(&done.unit_id);
                }
                for id in &follow_ups {
                    self.dispatch(id)?;
                }
                if done.kind() == OperationKind::Initialize {
                    self.release_linked(&done)?;
                }
                Ok(done)
            }
            Err(e) if e.is_infrastructure() => {
                error!("{} {} aborted: {e}", op.kind(), op.id);
                if let Err(mark) =
                    inner
                        .operations
                        .update_state(&op.id, OperationState::Erred, Some(&e.to_string()))
                {
                    warn!("could not mark {} erred: {mark}", op.id);
                }
                Err(e)
            }
            Err(e) => {
                warn!("{} {} failed: {e}", op.kind(), op.id);
                validate_transition(op.state, OperationState::Erred)?;
                let done = inner.operations.update_state(
                    &op.id,
                    OperationState::Erred,
                    Some(&e.to_string()),
                )?;
                if done.kind() == OperationKind::Initialize {
                    self.fail_linked(&done)?;
                }
                Ok(done)
            }
        }
    }

    /// Build, spawn, stream and reconcile. Returns follow-up operations the
    /// handler queued.
    fn run(&self, op: &Operation, unit: &ManagementUnit) -> Result<Vec<OperationId>, CoreError> {
        let inner = &self.inner;
        let kind = strategy(op.kind());

        let token = inner.tokens.issue(unit)?;
        let mut vars = common_vars(&inner.config, unit, &token)?;
        if let Some(extra) = kind.extra_vars {
            vars.extend(extra(op));
        }
        let invocation = inner.playbooks.build(kind.playbook, &vars)?;
        debug!("running {} for {}", kind.playbook, op.id);

        let mut process = inner.runner.spawn(&invocation)?;
        let mut post = (kind.post_processor)();
        let streamed = self.stream(op, process.as_mut(), post.as_mut());
        let exit_code = process.wait()?;
        streamed?;

        if exit_code != 0 {
            return Err(CoreError::ExecutionFailed {
                exit_code,
                output: inner.operations.read_output(&op.id)?,
            });
        }

        let facts = post.finish();
        let _unit_lock = StoreLock::acquire(&inner.layout.unit_lock_file(&op.unit_id))?;
        let mut ctx = ExecutionContext {
            inner,
            follow_ups: Vec::new(),
        };
        kind.handler.handle(&mut ctx, op, facts)?;
        Ok(ctx.follow_ups)
    }

    /// Persist each line before handing it to the post-processor. Stops at
    /// the first read or write failure; the caller still reaps the process.
    fn stream(
        &self,
        op: &Operation,
        process: &mut dyn RunningProcess,
        post: &mut dyn OutputPostProcessor,
    ) -> Result<(), CoreError> {
        while let Some(line) = process.next_line() {
            let line = line?;
            self.inner.operations.append_output(&op.id, &line)?;
            post.post_process_line(&line);
        }
        Ok(())
    }

    fn finish_unstarted(&self, op: &Operation, message: &str) -> Result<Operation, CoreError> {
        validate_transition(op.state, OperationState::Erred)?;
        let done = self
            .inner
            .operations
            .update_state(&op.id, OperationState::Erred, Some(message))?;
        if done.kind() == OperationKind::Initialize {
            self.fail_linked(&done)?;
        }
        Ok(done)
    }

    /// The per-unit handler lock file outlives its unit otherwise.
    fn remove_unit_lock(&self, unit_id: &str) {
        let path = self.inner.layout.unit_lock_file(unit_id);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("could not remove {}: {e}", path.display()),
        }
    }

    fn linked_to(&self, init: &Operation) -> Result<Vec<Operation>, CoreError> {
        Ok(self
            .inner
            .operations
            .list_for_unit(&init.unit_id)?
            .into_iter()
            .rev()
            .filter(|op| op.initialization.as_ref() == Some(&init.id) && op.state.is_scheduled())
            .collect())
    }

    fn release_linked(&self, init: &Operation) -> Result<(), CoreError> {
        for op in self.linked_to(init)? {
            self.dispatch(&op.id)?;
        }
        Ok(())
    }

    fn fail_linked(&self, init: &Operation) -> Result<(), CoreError> {
        for op in self.linked_to(init)? {
            self.inner.operations.update_state(
                &op.id,
                OperationState::Erred,
                Some(INITIALIZATION_FAILED),
            )?;
        }
        Ok(())
    }

    /// Hand an operation to the execution engine, on a worker thread when
    /// `background` is set, otherwise on the calling thread.
    pub fn submit(&self, op_id: &OperationId, background: bool) -> Result<(), CoreError> {
        if !background {
            let op = self.execute(op_id)?;
            debug!("{} {} ended {}", op.kind(), op.id, op.state);
            return Ok(());
        }

        let engine = self.clone();
        let id = op_id.clone();
        let handle = std::thread::Builder::new()
            .name(format!("pipfleet-op-{}", op_id.chars().take(8).collect::<String>()))
            .spawn(move || {
                if let Err(e) = engine.execute(&id) {
                    error!("operation {id}: {e}");
                }
            })?;
        self.inner
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        Ok(())
    }

    fn dispatch(&self, op_id: &OperationId) -> Result<(), CoreError> {
        if shutdown_requested() {
            warn!("shutdown requested; operation {op_id} stays scheduled");
            return Ok(());
        }
        self.submit(op_id, self.inner.config.dispatch == Dispatch::Background)
    }

    /// Block until every background operation, including follow-ups they
    /// queue, has finished.
    pub fn wait_idle(&self) {
        loop {
            let handles = std::mem::take(
                &mut *self
                    .inner
                    .workers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if handle.join().is_err() {
                    warn!("operation worker panicked");
                }
            }
        }
    }

    /// Open the entry-point window for a unit, serialized against other
    /// processes sharing the store.
    fn enter(&self, unit_id: &str) -> Result<Option<EntryPointGuard<'_>>, CoreError> {
        let _admission = StoreLock::acquire(&self.inner.layout.lock_file())?;
        self.inner.locks.enter(unit_id)
    }

    /// Persist and submit every admissible operation; collect the scopes of
    /// the others.
    fn create_or_refuse(&self, ops: Vec<Operation>) -> Result<Submission, CoreError> {
        let mut accepted = Vec::new();
        let mut locked_scopes = Vec::new();
        let mut refused = false;

        for op in ops {
            if self.inner.locks.is_admissible(&op)? {
                self.inner.operations.create(&op)?;
                debug!("accepted {} of '{}' as {}", op.kind(), op.virtual_env_name, op.id);
                accepted.push(op.id);
            } else {
                refused = true;
                if !op.virtual_env_name.is_empty() {
                    locked_scopes.push(op.virtual_env_name);
                }
            }
        }

        for id in &accepted {
            self.dispatch(id)?;
        }

        if refused {
            Ok(Submission::Locked {
                accepted,
                response: LockedResponse::scopes(locked_scopes),
            })
        } else {
            Ok(Submission::Accepted {
                operations: accepted,
            })
        }
    }

    /// Register a new unit and initialize its host. Every environment in
    /// `desired` gets a synchronization that starts once initialization has
    /// succeeded.
    pub fn create_unit(
        &self,
        new: NewUnit,
        desired: &DesiredState,
    ) -> Result<(ManagementUnit, OperationId), CoreError> {
        let desired = desired.normalized();
        desired.validate()?;

        let unit = ManagementUnit::from_new(new);
        info!("creating unit {} ({})", unit.name, unit.id);
        self.inner.units.put(&unit)?;

        let init = Operation::initialize(unit.id.clone());
        self.inner.operations.create(&init)?;
        for env in desired.virtual_environments {
            let mut sync =
                Operation::synchronize(unit.id.clone(), &env.name, env.libraries, Vec::new());
            sync.initialization = Some(init.id.clone());
            self.inner.operations.create(&sync)?;
        }

        self.dispatch(&init.id)?;
        Ok((unit, init.id))
    }

    /// Reconcile a unit toward `desired`.
    pub fn apply_desired_state(
        &self,
        unit_ref: &str,
        desired: &DesiredState,
    ) -> Result<Submission, CoreError> {
        let desired = desired.normalized();
        desired.validate()?;
        let unit = self.inner.units.resolve(unit_ref)?;

        let Some(_window) = self.enter(&unit.id)? else {
            info!("unit {} is busy at the entry point", unit.name);
            return Ok(Submission::locked_global());
        };
        if self.inner.locks.is_global_locked(&unit.id)? {
            info!("unit {} is globally locked", unit.name);
            return Ok(Submission::locked_global());
        }

        let persisted = self.inner.units.list_envs(&unit.id)?;
        let plan = reconcile::plan(&desired, &persisted);
        if plan.is_empty() {
            info!("unit {} already matches the desired state", unit.name);
        }
        self.create_or_refuse(plan.into_operations(&unit.id))
    }

    /// Compute what [`apply_desired_state`](Self::apply_desired_state) would
    /// do, without creating anything.
    pub fn plan(
        &self,
        unit_ref: &str,
        desired: &DesiredState,
    ) -> Result<ReconciliationPlan, CoreError> {
        let desired = desired.normalized();
        desired.validate()?;
        let unit = self.inner.units.resolve(unit_ref)?;
        let persisted = self.inner.units.list_envs(&unit.id)?;
        Ok(reconcile::plan(&desired, &persisted))
    }

    fn submit_single(
        &self,
        unit_ref: &str,
        build: impl FnOnce(&ManagementUnit) -> Operation,
    ) -> Result<Submission, CoreError> {
        let unit = self.inner.units.resolve(unit_ref)?;
        let Some(_window) = self.enter(&unit.id)? else {
            info!("unit {} is busy at the entry point", unit.name);
            return Ok(Submission::locked_global());
        };
        self.create_or_refuse(vec![build(&unit)])
    }

    /// Discover the environments on the host; each one found gets a library
    /// search.
    pub fn find_virtual_environments(&self, unit_ref: &str) -> Result<Submission, CoreError> {
        self.submit_single(unit_ref, |unit| Operation::find_virtual_envs(unit.id.clone()))
    }

    pub fn find_installed_libraries(
        &self,
        unit_ref: &str,
        virtual_env_name: &str,
    ) -> Result<Submission, CoreError> {
        validate_env_name(virtual_env_name)?;
        self.submit_single(unit_ref, |unit| {
            Operation::find_installed_libraries(unit.id.clone(), virtual_env_name)
        })
    }

    /// Remove the Python environment from the host and, on success, the unit
    /// from the store. Operation history is kept.
    pub fn delete_unit(&self, unit_ref: &str) -> Result<Submission, CoreError> {
        self.submit_single(unit_ref, |unit| Operation::delete(unit.id.clone()))
    }

    pub fn inspect_unit(&self, unit_ref: &str) -> Result<UnitSummary, CoreError> {
        let unit = self.inner.units.resolve(unit_ref)?;
        Ok(UnitSummary {
            virtual_environments: self.inner.units.list_envs(&unit.id)?,
            operations: self.inner.operations.list_for_unit(&unit.id)?,
            unit,
        })
    }

    pub fn list_units(&self) -> Result<Vec<ManagementUnit>, CoreError> {
        Ok(self.inner.units.list()?)
    }

    pub fn list_virtual_environments(
        &self,
        unit_ref: &str,
    ) -> Result<Vec<VirtualEnvironment>, CoreError> {
        let unit = self.inner.units.resolve(unit_ref)?;
        Ok(self.inner.units.list_envs(&unit.id)?)
    }

    /// One operation including its output so far.
    pub fn get_operation(&self, op_id: &str) -> Result<Operation, CoreError> {
        Ok(self.inner.operations.get(op_id)?)
    }

    /// Operations of a unit, newest first. Deleted units are looked up by id.
    pub fn list_operations(&self, unit_ref: &str) -> Result<Vec<Operation>, CoreError> {
        let unit_id = match self.inner.units.resolve(unit_ref) {
            Ok(unit) => unit.id.into_inner(),
            Err(StoreError::UnitNotFound(_)) => unit_ref.to_owned(),
            Err(e) => return Err(e.into()),
        };
        Ok(self.inner.operations.list_for_unit(&unit_id)?)
    }
}

/// Drop lock entries that outlived their TTL, unless another process holds
/// the store.
fn purge_stale_locks(layout: &StoreLayout, cache: &FileCache) {
    match StoreLock::try_acquire(&layout.lock_file()) {
        Ok(Some(_lock)) => match cache.purge_expired() {
            Ok(0) => {}
            Ok(n) => debug!("purged {n} expired lock entries"),
            Err(e) => warn!("lock cache cleanup failed: {e}"),
        },
        Ok(None) => debug!("store lock held; skipping lock cache cleanup"),
        Err(e) => warn!("store lock check failed; skipping lock cache cleanup: {e}"),
    }
}
