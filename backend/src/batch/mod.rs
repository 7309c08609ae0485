//! Batched writers used inside a maintenance transaction.
//!
//! [`PinBatcher`] queues `pin` counter updates and [`ViewStore`] queues view
//! mutations. Both flush on their own once `batch_size` statements are
//! pending and must be flushed explicitly before the transaction commits.

pub mod pins;
pub mod views;

pub use pins::PinBatcher;
pub use views::ViewStore;

use log::warn;

use crate::db::repository::{ErrorContext, RepositoryError, RepositoryResult};

/// Pending statements with a flush threshold.
#[derive(Debug)]
pub(crate) struct StatementQueue<T> {
    name: &'static str,
    pending: Vec<T>,
    batch_size: usize,
    released: bool,
    executed: usize,
}

impl<T> StatementQueue<T> {
    pub(crate) fn new(name: &'static str, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            name,
            pending: Vec::with_capacity(batch_size),
            batch_size,
            released: false,
            executed: 0,
        }
    }

    /// Queues `statement`. Returns `true` once the batch is full.
    pub(crate) fn push(&mut self, statement: T) -> RepositoryResult<bool> {
        if self.released {
            return Err(RepositoryError::internal_with_context(
                format!("{} used after release", self.name),
                ErrorContext::new("enqueue").with_entity(self.name),
            ));
        }
        self.pending.push(statement);
        Ok(self.pending.len() >= self.batch_size)
    }

    pub(crate) fn take(&mut self) -> Vec<T> {
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn record_executed(&mut self, count: usize) {
        self.executed += count;
    }

    pub(crate) fn release(&mut self) {
        if self.released {
            return;
        }
        if !self.pending.is_empty() {
            warn!(
                "{} released with {} unflushed statements, discarding",
                self.name,
                self.pending.len()
            );
            self.pending.clear();
        }
        self.released = true;
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn executed(&self) -> usize {
        self.executed
    }
}
