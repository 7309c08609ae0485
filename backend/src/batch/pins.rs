use chrono::{DateTime, Utc};
use log::debug;

use super::StatementQueue;
use crate::db::repository::{PinningStore, RepositoryResult};
use crate::db::statement::PinStatement;
use crate::models::TimeRange;

/// Queues `pin` counter updates and executes them in one round trip.
#[derive(Debug)]
pub struct PinBatcher {
    queue: StatementQueue<PinStatement>,
}

impl PinBatcher {
    pub fn new(batch_size: usize) -> Self {
        Self {
            queue: StatementQueue::new("pin batcher", batch_size),
        }
    }

    /// Queues `pin ± 1` over rows whose temporal column lies in `[start, end]`.
    ///
    /// Returns the SQL text of the queued statement.
    pub fn update(
        &mut self,
        store: &mut dyn PinningStore,
        table: &str,
        temporal_attribute: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        add: bool,
    ) -> RepositoryResult<String> {
        let statement = PinStatement::Shift {
            table: table.to_string(),
            temporal_attribute: temporal_attribute.to_string(),
            range: TimeRange::new(start, end),
            add,
        };
        self.enqueue(store, statement)
    }

    /// Queues `pin = 0` for every pinned row of `table`.
    pub fn reset_pins(
        &mut self,
        store: &mut dyn PinningStore,
        table: &str,
    ) -> RepositoryResult<String> {
        self.enqueue(
            store,
            PinStatement::Reset {
                table: table.to_string(),
            },
        )
    }

    fn enqueue(
        &mut self,
        store: &mut dyn PinningStore,
        statement: PinStatement,
    ) -> RepositoryResult<String> {
        let sql = statement.to_sql();
        debug!("{}", sql);
        if self.queue.push(statement)? {
            self.flush(store)?;
        }
        Ok(sql)
    }

    /// Executes everything queued. Returns the number of statements executed.
    pub fn flush(&mut self, store: &mut dyn PinningStore) -> RepositoryResult<usize> {
        let batch = self.queue.take();
        if batch.is_empty() {
            return Ok(0);
        }
        let executed = store.execute_pin_batch(&batch)?;
        self.queue.record_executed(executed);
        debug!("Flushed {} pin statements", executed);
        Ok(executed)
    }

    /// Discards anything still queued. Later enqueues fail.
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
