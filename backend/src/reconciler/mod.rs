//! Window reconciliation.
//!
//! Every layer of a persisted [`ViewRecord`] is pinned over the snapped hull
//! of the windows around `time_original` and `time_main`. Given the previous
//! record of a view and its new state from the feed, [`Reconciler::plan`]
//! computes the pin and unpin ranges that move each layer from its old hull
//! to its new one, plus the view mutation to persist.
//!
//! Planning only reads (nearest-timestamp lookups). [`apply`] hands the plan
//! to the batchers.

mod snap;

use chrono::{Duration, Utc};
use log::debug;
use std::collections::BTreeSet;
use std::fmt;

use crate::batch::{PinBatcher, ViewStore};
use crate::catalog::LayerRegistry;
use crate::db::repository::{
    ErrorContext, PinningStore, RepositoryError, RepositoryResult, TimestampLookup,
};
use crate::db::statement::ViewStatement;
use crate::models::{MappedLayer, ParsedView, PinningWindow, TimeRange, ViewId, ViewRecord};
use snap::Snapper;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("View {view_id} references layer '{layer_id}' which has no table mapping")]
    UnmappedLayer { view_id: ViewId, layer_id: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<ReconcileError> for RepositoryError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::UnmappedLayer { view_id, layer_id } => {
                RepositoryError::validation_with_context(
                    format!("layer '{}' has no table mapping", layer_id),
                    ErrorContext::new("reconcile")
                        .with_entity("view")
                        .with_entity_id(view_id)
                        .with_details(format!("layer_id={}", layer_id)),
                )
            }
            ReconcileError::Repository(e) => e,
        }
    }
}

/// How a view change was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconcileCase {
    /// Disabled and never pinned.
    Ignored,
    /// Pinned for the first time.
    Created,
    /// Disabled after being pinned.
    Disabled,
    /// Same time and layers.
    Unchanged,
    /// Same time, different layers.
    Relayer,
    /// Moved within the window of its original time.
    Extend,
    /// Moved out of the window of its original time.
    Redo,
}

impl fmt::Display for ReconcileCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ignored => "ignored",
            Self::Created => "created",
            Self::Disabled => "disabled",
            Self::Unchanged => "unchanged",
            Self::Relayer => "relayer",
            Self::Extend => "extend",
            Self::Redo => "redo",
        };
        f.write_str(name)
    }
}

/// One `pin ± 1` over a range of a physical table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinOperation {
    pub layer: MappedLayer,
    pub range: TimeRange,
    pub add: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub view_id: ViewId,
    pub case: ReconcileCase,
    /// Unpins are listed before pins.
    pub operations: Vec<PinOperation>,
    pub view: Option<ViewStatement>,
}

impl ReconcilePlan {
    fn new(view_id: ViewId, case: ReconcileCase) -> Self {
        Self {
            view_id,
            case,
            operations: Vec::new(),
            view: None,
        }
    }

    pub fn pins(&self) -> impl Iterator<Item = &PinOperation> {
        self.operations.iter().filter(|op| op.add)
    }

    pub fn unpins(&self) -> impl Iterator<Item = &PinOperation> {
        self.operations.iter().filter(|op| !op.add)
    }

    /// Record persisted once the plan is applied. `None` after a delete.
    pub fn record(&self) -> Option<&ViewRecord> {
        match &self.view {
            Some(ViewStatement::Insert(record)) | Some(ViewStatement::Update(record)) => {
                Some(record)
            }
            _ => None,
        }
    }
}

/// Plans window transitions for views against a layer registry.
pub struct Reconciler<'r> {
    registry: &'r LayerRegistry,
    window: PinningWindow,
}

impl<'r> Reconciler<'r> {
    pub fn new(registry: &'r LayerRegistry, window: PinningWindow) -> Self {
        Self { registry, window }
    }

    pub fn window(&self) -> PinningWindow {
        self.window
    }

    /// Plans the transition of `view` from its `previous` record.
    pub fn plan<L>(
        &self,
        lookup: &mut L,
        previous: Option<&ViewRecord>,
        view: &ParsedView,
    ) -> Result<ReconcilePlan, ReconcileError>
    where
        L: TimestampLookup + ?Sized,
    {
        let mut snapper = Snapper::new(lookup);
        let plan = match (previous, view.disabled) {
            (None, true) => ReconcilePlan::new(view.view_id, ReconcileCase::Ignored),
            (Some(prev), true) => self.plan_disable(&mut snapper, prev)?,
            (None, false) => self.plan_create(&mut snapper, view)?,
            (Some(prev), false) => self.plan_update(&mut snapper, prev, view)?,
        };
        debug!(
            "View {}: {} ({} pin operations)",
            plan.view_id,
            plan.case,
            plan.operations.len()
        );
        Ok(plan)
    }

    fn mapped(&self, view_id: ViewId, layer_id: &str) -> Result<&'r [MappedLayer], ReconcileError> {
        let layers = self.registry.layers_for(layer_id);
        if layers.is_empty() {
            return Err(ReconcileError::UnmappedLayer {
                view_id,
                layer_id: layer_id.to_string(),
            });
        }
        Ok(layers)
    }

    /// Pins (or unpins) the whole hull of `record` for each of `layer_ids`.
    fn cover<'a, L: TimestampLookup + ?Sized>(
        &self,
        snapper: &mut Snapper<'_, L>,
        plan: &mut ReconcilePlan,
        record: &ViewRecord,
        layer_ids: impl IntoIterator<Item = &'a String>,
        add: bool,
    ) -> Result<(), ReconcileError> {
        for layer_id in layer_ids {
            for layer in self.mapped(record.id, layer_id)? {
                let range =
                    snapper.hull(layer, &self.window, record.time_original, record.time_main)?;
                plan.operations.push(PinOperation {
                    layer: layer.clone(),
                    range,
                    add,
                });
            }
        }
        Ok(())
    }

    fn plan_disable<L: TimestampLookup + ?Sized>(
        &self,
        snapper: &mut Snapper<'_, L>,
        prev: &ViewRecord,
    ) -> Result<ReconcilePlan, ReconcileError> {
        let mut plan = ReconcilePlan::new(prev.id, ReconcileCase::Disabled);
        self.cover(snapper, &mut plan, prev, &prev.layers, false)?;
        plan.view = Some(ViewStatement::Delete(prev.id));
        Ok(plan)
    }

    fn plan_create<L: TimestampLookup + ?Sized>(
        &self,
        snapper: &mut Snapper<'_, L>,
        view: &ParsedView,
    ) -> Result<ReconcilePlan, ReconcileError> {
        let record = view.fresh_record();
        let mut plan = ReconcilePlan::new(view.view_id, ReconcileCase::Created);
        self.cover(snapper, &mut plan, &record, &record.layers, true)?;
        plan.view = Some(ViewStatement::Insert(record));
        Ok(plan)
    }

    fn plan_update<L: TimestampLookup + ?Sized>(
        &self,
        snapper: &mut Snapper<'_, L>,
        prev: &ViewRecord,
        view: &ParsedView,
    ) -> Result<ReconcilePlan, ReconcileError> {
        let layers = view.layer_set();
        let removed: BTreeSet<String> = prev.layers.difference(&layers).cloned().collect();
        let added: BTreeSet<String> = layers.difference(&prev.layers).cloned().collect();
        let kept: BTreeSet<String> = prev.layers.intersection(&layers).cloned().collect();
        let t = view.time;

        let (case, time_original) = if prev.time_main == t {
            if removed.is_empty() && added.is_empty() {
                (ReconcileCase::Unchanged, prev.time_original)
            } else {
                (ReconcileCase::Relayer, prev.time_original)
            }
        } else if self.window.overlaps(prev.time_original, t) {
            (ReconcileCase::Extend, prev.time_original)
        } else {
            (ReconcileCase::Redo, t)
        };

        let next = ViewRecord {
            id: prev.id,
            time_original,
            time_main: t,
            layers,
            last_update: view.last_update.unwrap_or_else(Utc::now),
            driving_layer: view.driving_layer.clone(),
        };

        let mut plan = ReconcilePlan::new(prev.id, case);
        self.cover(snapper, &mut plan, prev, &removed, false)?;
        match case {
            ReconcileCase::Extend => {
                for layer_id in &kept {
                    for layer in self.mapped(prev.id, layer_id)? {
                        let old = snapper.hull(
                            layer,
                            &self.window,
                            prev.time_original,
                            prev.time_main,
                        )?;
                        let new =
                            snapper.hull(layer, &self.window, next.time_original, next.time_main)?;
                        plan.operations.extend(
                            edge_delta(old, new)
                                .into_iter()
                                .map(|(range, add)| PinOperation {
                                    layer: layer.clone(),
                                    range,
                                    add,
                                }),
                        );
                    }
                }
            }
            ReconcileCase::Redo => {
                self.cover(snapper, &mut plan, prev, &kept, false)?;
                self.cover(snapper, &mut plan, &next, &kept, true)?;
            }
            _ => {}
        }
        self.cover(snapper, &mut plan, &next, &added, true)?;

        plan.operations.sort_by_key(|op| op.add);
        plan.view = Some(ViewStatement::Update(next));
        Ok(plan)
    }
}

/// Operations turning the pinned range `old` into `new`, touching only the
/// edges that moved. Disjoint ranges are unpinned and pinned whole.
pub fn edge_delta(old: TimeRange, new: TimeRange) -> Vec<(TimeRange, bool)> {
    if old == new {
        return Vec::new();
    }
    if !old.overlaps(&new) {
        return vec![(old, false), (new, true)];
    }

    let tick = Duration::microseconds(1);
    let mut delta = Vec::with_capacity(2);
    if new.start < old.start {
        delta.push((TimeRange::new(new.start, old.start - tick), true));
    } else if new.start > old.start {
        delta.push((TimeRange::new(old.start, new.start - tick), false));
    }
    if new.end > old.end {
        delta.push((TimeRange::new(old.end + tick, new.end), true));
    } else if new.end < old.end {
        delta.push((TimeRange::new(new.end + tick, old.end), false));
    }
    delta
}

/// Queues every operation of `plan` on the batchers.
///
/// Returns the SQL of each queued statement, in order.
pub fn apply(
    plan: &ReconcilePlan,
    store: &mut dyn PinningStore,
    pins: &mut PinBatcher,
    views: &mut ViewStore,
) -> RepositoryResult<Vec<String>> {
    let mut statements = Vec::with_capacity(plan.operations.len() + 1);
    for op in &plan.operations {
        statements.push(pins.update(
            store,
            &op.layer.table_name,
            &op.layer.temporal_attribute,
            op.range.start,
            op.range.end,
            op.add,
        )?);
    }
    if let Some(statement) = &plan.view {
        statements.push(views.apply(store, statement.clone())?);
    }
    Ok(statements)
}
