//! In-memory local repository implementation.
//!
//! Holds data tables, the `views` table, the watermark and the advisory
//! locks in memory, for unit tests and local development. Transactions run
//! against a copy of the data that replaces the original only on commit, so
//! a failing run leaves nothing behind, exactly like a Postgres rollback.

use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::db::repository::{
    ErrorContext, PinningRepository, PinningSession, PinningStore, RepositoryError,
    RepositoryResult, TimestampLookup, UnitOfWork,
};
use crate::db::statement::{PinStatement, ViewStatement};
use crate::models::{MappedLayer, ViewId, ViewRecord};

/// One row of an in-memory data table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalRow {
    pub time: DateTime<Utc>,
    pub pin: i64,
}

#[derive(Debug, Clone)]
struct LocalTable {
    temporal_attribute: String,
    rows: Vec<LocalRow>,
}

#[derive(Debug, Clone, Default)]
struct LocalData {
    tables: HashMap<String, LocalTable>,
    views: BTreeMap<ViewId, ViewRecord>,
    last_run: Option<DateTime<Utc>>,
    /// Committed pin statements, oldest first.
    pin_log: Vec<PinStatement>,
}

#[derive(Debug, Default)]
struct Faults {
    /// Number of pin batches that may still succeed before one fails.
    pin_batches_before_failure: Option<usize>,
    unhealthy: bool,
}

/// In-memory local repository.
///
/// Cloning shares the underlying data, so a test can keep a handle while the
/// pinning service owns another.
///
/// # Example
/// ```
/// use chrono::{TimeZone, Utc};
/// use pinning_engine::db::repositories::LocalRepository;
///
/// let repo = LocalRepository::new();
/// let t = Utc.with_ymd_and_hms(2025, 3, 20, 15, 0, 0).unwrap();
/// repo.create_table("public.msg_fes_rdt", "testtime", [t]);
/// assert_eq!(repo.pin_at("public.msg_fes_rdt", t), Some(0));
/// ```
#[derive(Clone, Default)]
pub struct LocalRepository {
    data: Arc<Mutex<LocalData>>,
    locks: Arc<Mutex<HashMap<i64, u64>>>,
    faults: Arc<Mutex<Faults>>,
    next_session: Arc<AtomicU64>,
}

impl LocalRepository {
    /// Create a new empty local repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) a data table with one unpinned row per timestamp.
    pub fn create_table(
        &self,
        table: &str,
        temporal_attribute: &str,
        times: impl IntoIterator<Item = DateTime<Utc>>,
    ) {
        let mut rows: Vec<LocalRow> = times
            .into_iter()
            .map(|time| LocalRow { time, pin: 0 })
            .collect();
        rows.sort_by_key(|row| row.time);
        self.data.lock().tables.insert(
            table.to_string(),
            LocalTable {
                temporal_attribute: temporal_attribute.to_string(),
                rows,
            },
        );
    }

    /// Append rows to an existing table, as a data ingester would.
    pub fn insert_rows(&self, table: &str, times: impl IntoIterator<Item = DateTime<Utc>>) {
        let mut data = self.data.lock();
        if let Some(t) = data.tables.get_mut(table) {
            t.rows
                .extend(times.into_iter().map(|time| LocalRow { time, pin: 0 }));
            t.rows.sort_by_key(|row| row.time);
        }
    }

    /// All rows of a table, ordered by time.
    pub fn rows(&self, table: &str) -> Vec<LocalRow> {
        self.data
            .lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Pin counter of the first row stamped `time`.
    pub fn pin_at(&self, table: &str, time: DateTime<Utc>) -> Option<i64> {
        self.data
            .lock()
            .tables
            .get(table)
            .and_then(|t| t.rows.iter().find(|row| row.time == time))
            .map(|row| row.pin)
    }

    /// Overwrite a row's pin counter, for seeding stale state in tests.
    pub fn set_pin(&self, table: &str, time: DateTime<Utc>, pin: i64) {
        let mut data = self.data.lock();
        if let Some(row) = data
            .tables
            .get_mut(table)
            .and_then(|t| t.rows.iter_mut().find(|row| row.time == time))
        {
            row.pin = pin;
        }
    }

    pub fn views(&self) -> Vec<ViewRecord> {
        self.data.lock().views.values().cloned().collect()
    }

    pub fn view(&self, view_id: ViewId) -> Option<ViewRecord> {
        self.data.lock().views.get(&view_id).cloned()
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.data.lock().last_run
    }

    /// Committed pin statements, oldest first.
    pub fn pin_log(&self) -> Vec<PinStatement> {
        self.data.lock().pin_log.clone()
    }

    pub fn clear_pin_log(&self) {
        self.data.lock().pin_log.clear();
    }

    /// Whether any session currently holds advisory lock `key`.
    pub fn is_locked(&self, key: i64) -> bool {
        self.locks.lock().contains_key(&key)
    }

    /// Make the pin batch after `successes` successful ones fail.
    pub fn fail_pin_batch_after(&self, successes: usize) {
        self.faults.lock().pin_batches_before_failure = Some(successes);
    }

    pub fn clear_faults(&self) {
        *self.faults.lock() = Faults::default();
    }

    /// Set the health status for testing connection failures.
    pub fn set_healthy(&self, healthy: bool) {
        self.faults.lock().unhealthy = !healthy;
    }
}

impl PinningRepository for LocalRepository {
    fn open_session(&self) -> RepositoryResult<Box<dyn PinningSession>> {
        if self.faults.lock().unhealthy {
            return Err(RepositoryError::connection_with_context(
                "local repository marked unhealthy",
                ErrorContext::new("open_session"),
            ));
        }
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(LocalSession {
            id,
            repo: self.clone(),
        }))
    }

    fn health_check(&self) -> RepositoryResult<bool> {
        Ok(!self.faults.lock().unhealthy)
    }
}

struct LocalSession {
    id: u64,
    repo: LocalRepository,
}

impl PinningSession for LocalSession {
    fn try_advisory_lock(&mut self, key: i64) -> RepositoryResult<bool> {
        let mut locks = self.repo.locks.lock();
        match locks.get(&key) {
            Some(owner) => Ok(*owner == self.id),
            None => {
                locks.insert(key, self.id);
                Ok(true)
            }
        }
    }

    fn advisory_unlock(&mut self, key: i64) -> RepositoryResult<bool> {
        let mut locks = self.repo.locks.lock();
        if locks.get(&key) == Some(&self.id) {
            locks.remove(&key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn last_run(&mut self) -> RepositoryResult<Option<DateTime<Utc>>> {
        Ok(self.repo.data.lock().last_run)
    }

    fn transaction(&mut self, work: &mut UnitOfWork<'_>) -> RepositoryResult<()> {
        let mut data = self.repo.data.lock();
        let mut working = data.clone();
        let mut store = LocalStore {
            data: &mut working,
            faults: &self.repo.faults,
        };
        work(&mut store)?;
        *data = working;
        debug!("local session {} committed", self.id);
        Ok(())
    }
}

impl Drop for LocalSession {
    fn drop(&mut self) {
        self.repo.locks.lock().retain(|_, owner| *owner != self.id);
    }
}

struct LocalStore<'a> {
    data: &'a mut LocalData,
    faults: &'a Mutex<Faults>,
}

impl LocalStore<'_> {
    fn table_mut(&mut self, table: &str, operation: &str) -> RepositoryResult<&mut LocalTable> {
        self.data.tables.get_mut(table).ok_or_else(|| {
            RepositoryError::query_with_context(
                format!("relation \"{}\" does not exist", table),
                ErrorContext::new(operation.to_string())
                    .with_entity("table")
                    .with_entity_id(table),
            )
        })
    }

    fn check_fault(&self) -> RepositoryResult<()> {
        let mut faults = self.faults.lock();
        match faults.pin_batches_before_failure {
            Some(0) => {
                faults.pin_batches_before_failure = None;
                Err(RepositoryError::query_with_context(
                    "injected pin batch failure",
                    ErrorContext::new("pin_batch"),
                ))
            }
            Some(n) => {
                faults.pin_batches_before_failure = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn check_column(table: &str, actual: &str, requested: &str) -> RepositoryResult<()> {
    if actual == requested {
        Ok(())
    } else {
        Err(RepositoryError::query_with_context(
            format!("column \"{}\" does not exist", requested),
            ErrorContext::new("pin_batch")
                .with_entity("table")
                .with_entity_id(table),
        ))
    }
}

impl TimestampLookup for LocalStore<'_> {
    fn nearest_timestamp(
        &mut self,
        layer: &MappedLayer,
        target: DateTime<Utc>,
    ) -> RepositoryResult<Option<DateTime<Utc>>> {
        let table = self.table_mut(&layer.table_name, "nearest_timestamp")?;
        check_column(
            &layer.table_name,
            &table.temporal_attribute,
            &layer.temporal_attribute,
        )?;
        Ok(table
            .rows
            .iter()
            .map(|row| row.time)
            .min_by_key(|time| ((*time - target).abs(), *time)))
    }
}

impl PinningStore for LocalStore<'_> {
    fn execute_pin_batch(&mut self, batch: &[PinStatement]) -> RepositoryResult<usize> {
        self.check_fault()?;
        for statement in batch {
            match statement {
                PinStatement::Shift {
                    table,
                    temporal_attribute,
                    range,
                    add,
                } => {
                    let t = self.table_mut(table, "pin_batch")?;
                    check_column(table, &t.temporal_attribute, temporal_attribute)?;
                    for row in t.rows.iter_mut().filter(|row| range.contains(row.time)) {
                        if *add {
                            row.pin += 1;
                        } else if row.pin > 0 {
                            row.pin -= 1;
                        }
                    }
                }
                PinStatement::Reset { table } => {
                    let t = self.table_mut(table, "pin_batch")?;
                    t.rows.iter_mut().for_each(|row| row.pin = 0);
                }
            }
            self.data.pin_log.push(statement.clone());
        }
        Ok(batch.len())
    }

    fn execute_view_batch(&mut self, batch: &[ViewStatement]) -> RepositoryResult<usize> {
        let mut affected = 0;
        for statement in batch {
            match statement {
                ViewStatement::Insert(record) => {
                    self.data.views.insert(record.id, record.clone());
                    affected += 1;
                }
                ViewStatement::Update(record) => {
                    if let Some(existing) = self.data.views.get_mut(&record.id) {
                        *existing = record.clone();
                        affected += 1;
                    }
                }
                ViewStatement::Delete(id) => {
                    if self.data.views.remove(id).is_some() {
                        affected += 1;
                    }
                }
            }
        }
        Ok(affected)
    }

    fn fetch_view(&mut self, view_id: ViewId) -> RepositoryResult<Option<ViewRecord>> {
        Ok(self.data.views.get(&view_id).cloned())
    }

    fn truncate_views(&mut self) -> RepositoryResult<()> {
        self.data.views.clear();
        Ok(())
    }

    fn store_last_run(&mut self, at: DateTime<Utc>) -> RepositoryResult<()> {
        self.data.last_run = Some(at);
        Ok(())
    }
}
