//! Repository trait definitions for the pinning engine.
//!
//! Storage access is split along the lifetime of a maintenance run:
//!
//! - [`PinningRepository`] hands out sessions (one database connection each).
//! - [`PinningSession`] owns the advisory lock and opens transactions.
//! - [`PinningStore`] is the view of the database inside one transaction;
//!   batchers flush into it and the reconciler reads through it.
//!
//! All methods are synchronous. Async callers move sessions onto the blocking
//! pool with `tokio::task::spawn_blocking`.

pub mod error;

pub use error::{ErrorContext, RepositoryError, RepositoryResult};

use chrono::{DateTime, Utc};

use crate::db::statement::{PinStatement, ViewStatement};
use crate::models::{MappedLayer, ViewId, ViewRecord};

/// Nearest-match lookup over the temporal column of a layer's table.
pub trait TimestampLookup {
    /// Existing timestamp closest to `target`, ties resolved to the earlier
    /// one. `None` when the table holds no rows.
    fn nearest_timestamp(
        &mut self,
        layer: &MappedLayer,
        target: DateTime<Utc>,
    ) -> RepositoryResult<Option<DateTime<Utc>>>;
}

/// Database access inside one transaction.
pub trait PinningStore: TimestampLookup {
    /// Executes queued pin statements in order. Returns the number executed.
    fn execute_pin_batch(&mut self, batch: &[PinStatement]) -> RepositoryResult<usize>;

    /// Executes queued view statements in order. Returns the number of rows affected.
    fn execute_view_batch(&mut self, batch: &[ViewStatement]) -> RepositoryResult<usize>;

    fn fetch_view(&mut self, view_id: ViewId) -> RepositoryResult<Option<ViewRecord>>;

    fn truncate_views(&mut self) -> RepositoryResult<()>;

    /// Upserts the single-row watermark.
    fn store_last_run(&mut self, at: DateTime<Utc>) -> RepositoryResult<()>;
}

/// Work executed inside [`PinningSession::transaction`].
pub type UnitOfWork<'a> = dyn FnMut(&mut dyn PinningStore) -> RepositoryResult<()> + 'a;

/// One connection to the store.
///
/// Dropping a session releases any advisory lock it still holds.
pub trait PinningSession: Send {
    /// Non-blocking attempt at the cross-process advisory lock `key`.
    fn try_advisory_lock(&mut self, key: i64) -> RepositoryResult<bool>;

    /// Returns whether the lock was held by this session.
    fn advisory_unlock(&mut self, key: i64) -> RepositoryResult<bool>;

    /// Watermark stored by the last maintenance run.
    fn last_run(&mut self) -> RepositoryResult<Option<DateTime<Utc>>>;

    /// Runs `work` in a transaction: committed when it returns `Ok`, rolled
    /// back otherwise.
    fn transaction(&mut self, work: &mut UnitOfWork<'_>) -> RepositoryResult<()>;
}

/// Source of sessions.
pub trait PinningRepository: Send + Sync {
    fn open_session(&self) -> RepositoryResult<Box<dyn PinningSession>>;

    fn health_check(&self) -> RepositoryResult<bool>;
}
