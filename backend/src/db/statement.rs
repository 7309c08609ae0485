//! Queued mutations, executed by a [`PinningStore`](super::repository::PinningStore)
//! when a batcher flushes.

use super::sql;
use std::collections::HashSet;

use crate::models::{TimeRange, ViewId, ViewRecord};

/// A mutation of the `pin` counters of one data table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinStatement {
    /// `pin ± 1` for rows whose temporal column falls in `range` (inclusive).
    Shift {
        table: String,
        temporal_attribute: String,
        range: TimeRange,
        add: bool,
    },
    /// `pin = 0` for every row of the table.
    Reset { table: String },
}

impl PinStatement {
    pub fn table(&self) -> &str {
        match self {
            Self::Shift { table, .. } | Self::Reset { table } => table,
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            Self::Shift {
                table,
                temporal_attribute,
                range,
                add,
            } => sql::pin_shift(table, temporal_attribute, range, *add),
            Self::Reset { table } => sql::pin_reset(table),
        }
    }
}

/// A mutation of the `views` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewStatement {
    Insert(ViewRecord),
    Update(ViewRecord),
    Delete(ViewId),
}

impl ViewStatement {
    pub fn view_id(&self) -> ViewId {
        match self {
            Self::Insert(record) | Self::Update(record) => record.id,
            Self::Delete(id) => *id,
        }
    }

    /// Human-readable equivalent of the parameterised statement.
    pub fn to_sql(&self) -> String {
        match self {
            Self::Insert(record) => sql::insert_view(record),
            Self::Update(record) => sql::update_view(record),
            Self::Delete(id) => sql::delete_view(*id),
        }
    }
}

/// A unit of execution for a flushed view batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewChunk<'a> {
    /// Consecutive inserts of distinct views, sent as one multi-row insert.
    Insert(&'a [ViewStatement]),
    Update(&'a ViewRecord),
    Delete(ViewId),
}

/// Groups `batch` for execution, preserving statement order.
///
/// A run of inserts ends at the first non-insert or at the first view id
/// already present in the run.
pub fn coalesce_views(batch: &[ViewStatement]) -> Vec<ViewChunk<'_>> {
    let mut chunks = Vec::new();
    let mut run_start = 0;
    let mut run_ids = HashSet::new();

    for (index, statement) in batch.iter().enumerate() {
        let single = match statement {
            ViewStatement::Insert(record) => {
                if !run_ids.insert(record.id) {
                    chunks.push(ViewChunk::Insert(&batch[run_start..index]));
                    run_start = index;
                    run_ids.clear();
                    run_ids.insert(record.id);
                }
                continue;
            }
            ViewStatement::Update(record) => ViewChunk::Update(record),
            ViewStatement::Delete(id) => ViewChunk::Delete(*id),
        };
        if run_start < index {
            chunks.push(ViewChunk::Insert(&batch[run_start..index]));
        }
        run_start = index + 1;
        run_ids.clear();
        chunks.push(single);
    }
    if run_start < batch.len() {
        chunks.push(ViewChunk::Insert(&batch[run_start..]));
    }
    chunks
}
