//! Batched writes and point lookups on the `views` table.

use log::debug;

use super::StatementQueue;
use crate::db::repository::{PinningStore, RepositoryResult};
use crate::db::statement::ViewStatement;
use crate::models::{ViewId, ViewRecord};

/// Queues view mutations and serves lookups of persisted records.
///
/// Lookups flush pending mutations first, so a read always observes every
/// earlier write of the same run.
#[derive(Debug)]
pub struct ViewStore {
    queue: StatementQueue<ViewStatement>,
}

impl ViewStore {
    pub fn new(batch_size: usize) -> Self {
        Self {
            queue: StatementQueue::new("view store", batch_size),
        }
    }

    pub fn insert_view(
        &mut self,
        store: &mut dyn PinningStore,
        record: &ViewRecord,
    ) -> RepositoryResult<String> {
        self.enqueue(store, ViewStatement::Insert(record.clone()))
    }

    pub fn update_view(
        &mut self,
        store: &mut dyn PinningStore,
        record: &ViewRecord,
    ) -> RepositoryResult<String> {
        self.enqueue(store, ViewStatement::Update(record.clone()))
    }

    pub fn delete_view(
        &mut self,
        store: &mut dyn PinningStore,
        view_id: ViewId,
    ) -> RepositoryResult<String> {
        self.enqueue(store, ViewStatement::Delete(view_id))
    }

    /// Queues `statement` as produced by the reconciler.
    pub fn apply(
        &mut self,
        store: &mut dyn PinningStore,
        statement: ViewStatement,
    ) -> RepositoryResult<String> {
        self.enqueue(store, statement)
    }

    fn enqueue(
        &mut self,
        store: &mut dyn PinningStore,
        statement: ViewStatement,
    ) -> RepositoryResult<String> {
        let sql = statement.to_sql();
        debug!("{}", sql);
        if self.queue.push(statement)? {
            self.flush(store)?;
        }
        Ok(sql)
    }

    pub fn fetch_view(
        &mut self,
        store: &mut dyn PinningStore,
        view_id: ViewId,
    ) -> RepositoryResult<Option<ViewRecord>> {
        self.flush(store)?;
        store.fetch_view(view_id)
    }

    /// Removes every persisted view, including queued inserts.
    pub fn truncate(&mut self, store: &mut dyn PinningStore) -> RepositoryResult<()> {
        self.flush(store)?;
        debug!("{}", crate::db::sql::TRUNCATE_VIEWS);
        store.truncate_views()
    }

    /// Executes everything queued. Returns the number of rows affected.
    pub fn flush(&mut self, store: &mut dyn PinningStore) -> RepositoryResult<usize> {
        let batch = self.queue.take();
        if batch.is_empty() {
            return Ok(0);
        }
        let affected = store.execute_view_batch(&batch)?;
        self.queue.record_executed(batch.len());
        debug!("Flushed {} view statements ({} rows)", batch.len(), affected);
        Ok(affected)
    }

    pub fn release(&mut self) {
        self.queue.release();
    }

    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    /// Statements executed since creation.
    pub fn executed(&self) -> usize {
        self.queue.executed()
    }
}
