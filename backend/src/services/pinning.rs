//! Maintenance orchestration.
//!
//! [`PinningService`] starts reset and incremental runs. A run is admitted
//! only when no run is in progress in this process and the cross-process
//! advisory lock could be taken; it then executes on a single background
//! worker inside one transaction on the session that holds the lock. Callers
//! get a task id back immediately and poll its status.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::task_state::{RunSummary, TaskKind, TaskState, TaskStatus, TaskTracker};
use crate::batch::{PinBatcher, ViewStore};
use crate::catalog::{load_mapping_file, CatalogError, LayerCatalog, LayerRegistry, MappingEntry};
use crate::config::PinningSettings;
use crate::db::repository::{
    PinningRepository, PinningSession, PinningStore, RepositoryError, RepositoryResult,
};
use crate::feed::{parse_view, FeedError, RawView, ViewFeed};
use crate::models::ParsedView;
use crate::reconciler::{self, ReconcileError, Reconciler};

type SessionBox = Box<dyn PinningSession>;

/// Result of a step that hands the session back. The session is `None` only
/// when the blocking task that owned it was lost.
type StepOutcome<T> = (Option<SessionBox>, Result<T, PinningError>);

#[derive(Debug, thiserror::Error)]
pub enum PinningError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Worker failure: {0}")]
    Worker(String),
}

/// Where the layer mapping is read from on every reset.
#[derive(Debug, Clone)]
pub enum MappingSource {
    File(PathBuf),
    Entries(Vec<MappingEntry>),
}

impl MappingSource {
    fn load(&self) -> Result<Vec<MappingEntry>, CatalogError> {
        match self {
            Self::File(path) => load_mapping_file(path),
            Self::Entries(entries) => Ok(entries.clone()),
        }
    }
}

struct Job {
    task_id: String,
    kind: TaskKind,
    session: SessionBox,
}

struct RunContext {
    repository: Arc<dyn PinningRepository>,
    feed: Arc<dyn ViewFeed>,
    catalog: Arc<dyn LayerCatalog>,
    settings: PinningSettings,
    mapping: MappingSource,
    registry: RwLock<Arc<LayerRegistry>>,
    tracker: TaskTracker,
}

/// Handle on the pinning engine. Clones share the same worker and task state.
#[derive(Clone)]
pub struct PinningService {
    context: Arc<RunContext>,
    start_gate: Arc<tokio::sync::Mutex<()>>,
    jobs: mpsc::UnboundedSender<Job>,
}

impl PinningService {
    /// Builds the service with the mapping file named in `settings` and
    /// spawns its worker. Must be called from within a Tokio runtime.
    pub fn new(
        repository: Arc<dyn PinningRepository>,
        feed: Arc<dyn ViewFeed>,
        catalog: Arc<dyn LayerCatalog>,
        settings: PinningSettings,
    ) -> Result<Self, PinningError> {
        let mapping = MappingSource::File(settings.mapping_file.clone());
        Self::with_mapping(repository, feed, catalog, settings, mapping)
    }

    pub fn with_mapping(
        repository: Arc<dyn PinningRepository>,
        feed: Arc<dyn ViewFeed>,
        catalog: Arc<dyn LayerCatalog>,
        settings: PinningSettings,
        mapping: MappingSource,
    ) -> Result<Self, PinningError> {
        let registry = LayerRegistry::resolve(&mapping.load()?, catalog.as_ref())?;
        let context = Arc::new(RunContext {
            repository,
            feed,
            catalog,
            settings,
            mapping,
            registry: RwLock::new(Arc::new(registry)),
            tracker: TaskTracker::new(),
        });

        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();
        let worker = context.clone();
        tokio::spawn(async move {
            while let Some(job) = queue.recv().await {
                worker.run(job).await;
            }
            debug!("Pinning worker stopped");
        });

        Ok(Self {
            context,
            start_gate: Arc::new(tokio::sync::Mutex::new(())),
            jobs,
        })
    }

    /// Starts a full reset. `None` when a run is already in progress here or
    /// elsewhere, or when the store cannot be reached.
    pub async fn reset(&self) -> Option<String> {
        self.start(TaskKind::Reset).await
    }

    /// Starts an incremental run. Same admission rules as [`reset`](Self::reset).
    pub async fn incremental(&self) -> Option<String> {
        self.start(TaskKind::Incremental).await
    }

    pub fn status(&self, task_id: &str) -> TaskStatus {
        self.context.tracker.status(task_id)
    }

    /// Full state of `task_id`, `None` unless it is the current task.
    pub fn task(&self, task_id: &str) -> Option<TaskState> {
        self.context.tracker.task(task_id)
    }

    pub fn snapshot(&self) -> TaskState {
        self.context.tracker.snapshot()
    }

    pub fn registry(&self) -> Arc<LayerRegistry> {
        self.context.registry.read().clone()
    }

    async fn start(&self, kind: TaskKind) -> Option<String> {
        let _gate = self.start_gate.lock().await;
        if self.context.tracker.is_running() {
            info!("A pinning task is already running, {} not started", kind);
            return None;
        }

        let repository = self.context.repository.clone();
        let key = self.context.settings.lock_key;
        let acquired = tokio::task::spawn_blocking(move || -> RepositoryResult<Option<SessionBox>> {
            let mut session = repository.open_session()?;
            if session.try_advisory_lock(key)? {
                Ok(Some(session))
            } else {
                Ok(None)
            }
        })
        .await;

        let session = match acquired {
            Ok(Ok(Some(session))) => session,
            Ok(Ok(None)) => {
                info!("Advisory lock {} is held elsewhere, {} not started", key, kind);
                return None;
            }
            Ok(Err(e)) => {
                error!("Cannot start {}: {}", kind, e);
                return None;
            }
            Err(e) => {
                error!("Cannot start {}: lock task failed: {}", kind, e);
                return None;
            }
        };

        let task_id = self.context.tracker.begin(kind);
        let job = Job {
            task_id: task_id.clone(),
            kind,
            session,
        };
        if self.jobs.send(job).is_err() {
            error!("Pinning worker is gone, {} task {} dropped", kind, task_id);
            self.context.tracker.fail(&task_id, "pinning worker stopped");
            return None;
        }
        info!("Started {} task {}", kind, task_id);
        Some(task_id)
    }
}

impl RunContext {
    async fn run(self: &Arc<Self>, job: Job) {
        let Job {
            task_id,
            kind,
            session,
        } = job;
        debug!("Running {} task {}", kind, task_id);

        let (session, result) = match kind {
            TaskKind::Reset => self.reset(session).await,
            TaskKind::Incremental => self.incremental(session).await,
        };
        if let Some(session) = session {
            self.release(session).await;
        }

        match result {
            Ok(summary) => {
                info!(
                    "{} task {} completed: {} views ({} created, {} updated, {} disabled, \
                     {} unchanged, {} ignored), {} pin statements",
                    kind,
                    task_id,
                    summary.views_seen,
                    summary.created,
                    summary.updated,
                    summary.disabled,
                    summary.unchanged,
                    summary.ignored,
                    summary.pin_statements
                );
                self.tracker.complete(&task_id, summary);
            }
            Err(e) => {
                error!("{} task {} failed: {}", kind, task_id, e);
                self.tracker.fail(&task_id, e.to_string());
            }
        }
    }

    async fn release(&self, session: SessionBox) {
        let key = self.settings.lock_key;
        let released = tokio::task::spawn_blocking(move || {
            let mut session = session;
            session.advisory_unlock(key)
        })
        .await;
        match released {
            Ok(Ok(true)) => debug!("Released advisory lock {}", key),
            Ok(Ok(false)) => warn!("Advisory lock {} was not held at release", key),
            Ok(Err(e)) => warn!("Failed to release advisory lock {}: {}", key, e),
            Err(e) => warn!("Lock release task failed: {}", e),
        }
    }

    /// Runs `step` against the session on the blocking pool.
    async fn blocking<T, F>(session: SessionBox, step: F) -> StepOutcome<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn PinningSession) -> Result<T, PinningError> + Send + 'static,
    {
        let joined = tokio::task::spawn_blocking(move || {
            let mut session = session;
            let result = step(session.as_mut());
            (session, result)
        })
        .await;
        match joined {
            Ok((session, result)) => (Some(session), result),
            Err(e) => (
                None,
                Err(PinningError::Worker(format!("blocking task failed: {}", e))),
            ),
        }
    }

    fn reload_registry(&self) -> Result<Arc<LayerRegistry>, PinningError> {
        let entries = self.mapping.load()?;
        let registry = Arc::new(LayerRegistry::resolve(&entries, self.catalog.as_ref())?);
        *self.registry.write() = registry.clone();
        Ok(registry)
    }

    async fn fetch(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<(Vec<ParsedView>, Option<DateTime<Utc>>), PinningError> {
        let raw = self.feed.fetch_views(since).await?;
        let views = raw.iter().map(parse_view).collect::<Result<Vec<_>, _>>()?;
        Ok((views, latest_update(&raw)))
    }

    async fn reset(self: &Arc<Self>, session: SessionBox) -> StepOutcome<RunSummary> {
        let registry = match self.reload_registry() {
            Ok(registry) => registry,
            Err(e) => return (Some(session), Err(e)),
        };
        let (views, latest) = match self.fetch(None).await {
            Ok(fetched) => fetched,
            Err(e) => return (Some(session), Err(e)),
        };
        info!(
            "Reset: {} views over {} tables",
            views.len(),
            registry.tables().len()
        );

        let context = self.clone();
        Self::blocking(session, move |session| {
            let mut summary = RunSummary::default();
            session.transaction(&mut |store| {
                summary = RunSummary::default();
                let mut pins = PinBatcher::new(context.settings.batch_size);
                let mut view_store = ViewStore::new(context.settings.batch_size);

                for table in registry.tables() {
                    pins.reset_pins(store, &table.table_name)?;
                }
                pins.flush(store)?;
                view_store.truncate(store)?;

                context.reconcile_all(
                    store,
                    &registry,
                    &views,
                    &mut pins,
                    &mut view_store,
                    &mut summary,
                )?;
                context.finish(store, &mut pins, &mut view_store, latest, &mut summary)
            })?;
            Ok(summary)
        })
        .await
    }

    async fn incremental(self: &Arc<Self>, session: SessionBox) -> StepOutcome<RunSummary> {
        let (session, since) =
            match Self::blocking(session, |session| Ok(session.last_run()?)).await {
                (Some(session), Ok(since)) => (session, since),
                (session, result) => {
                    let err = result
                        .err()
                        .unwrap_or_else(|| PinningError::Worker("session lost".to_string()));
                    return (session, Err(err));
                }
            };

        let (views, latest) = match self.fetch(since).await {
            Ok(fetched) => fetched,
            Err(e) => return (Some(session), Err(e)),
        };
        info!("Incremental: {} views changed since {:?}", views.len(), since);

        let registry = self.registry.read().clone();
        let watermark = match (since, latest) {
            (Some(since), Some(latest)) => Some(since.max(latest)),
            (since, latest) => latest.or(since),
        };

        let context = self.clone();
        Self::blocking(session, move |session| {
            let mut summary = RunSummary::default();
            session.transaction(&mut |store| {
                summary = RunSummary::default();
                let mut pins = PinBatcher::new(context.settings.batch_size);
                let mut view_store = ViewStore::new(context.settings.batch_size);
                context.reconcile_all(
                    store,
                    &registry,
                    &views,
                    &mut pins,
                    &mut view_store,
                    &mut summary,
                )?;
                context.finish(store, &mut pins, &mut view_store, watermark, &mut summary)
            })?;
            Ok(summary)
        })
        .await
    }

    fn reconcile_all(
        &self,
        store: &mut dyn PinningStore,
        registry: &LayerRegistry,
        views: &[ParsedView],
        pins: &mut PinBatcher,
        view_store: &mut ViewStore,
        summary: &mut RunSummary,
    ) -> RepositoryResult<()> {
        let reconciler = Reconciler::new(registry, self.settings.window());
        for view in views {
            let previous = view_store.fetch_view(store, view.view_id)?;
            let plan = reconciler.plan(&mut *store, previous.as_ref(), view)?;
            reconciler::apply(&plan, store, pins, view_store)?;
            summary.record(plan.case);
        }
        Ok(())
    }

    /// Flushes both batchers and stores the watermark, inside the transaction.
    fn finish(
        &self,
        store: &mut dyn PinningStore,
        pins: &mut PinBatcher,
        view_store: &mut ViewStore,
        watermark: Option<DateTime<Utc>>,
        summary: &mut RunSummary,
    ) -> RepositoryResult<()> {
        pins.flush(store)?;
        view_store.flush(store)?;
        if let Some(watermark) = watermark {
            store.store_last_run(watermark)?;
        }
        summary.pin_statements = pins.executed();
        summary.view_statements = view_store.executed();
        summary.watermark = watermark;
        pins.release();
        view_store.release();
        Ok(())
    }
}

fn latest_update(views: &[RawView]) -> Option<DateTime<Utc>> {
    views.iter().filter_map(|v| v.last_update).max()
}
