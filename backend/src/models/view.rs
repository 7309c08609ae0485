//! View records as persisted in the `views` table and as decoded from the feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::window::ordered_pair;

/// Identifier of a view, shared by the feed and the `views` table.
pub type ViewId = i64;

/// A view that has been pinned at least once.
///
/// `time_original` is the reference time of the first pin and `time_main`
/// the current reference time. Every layer of the record is pinned over the
/// hull of the windows around both times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewRecord {
    pub id: ViewId,
    pub time_original: DateTime<Utc>,
    pub time_main: DateTime<Utc>,
    pub layers: BTreeSet<String>,
    pub last_update: DateTime<Utc>,
    pub driving_layer: Option<String>,
}

impl ViewRecord {
    /// Earliest and latest of the two reference times.
    pub fn span(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        ordered_pair(self.time_original, self.time_main)
    }
}

/// How the time of a view preference should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeMode {
    /// The value is a fixed instant.
    Absolute,
    /// The value was chosen relative to the wall clock when the view was saved.
    Relative,
    #[serde(other)]
    Unknown,
}

/// A feed view decoded into its flat shape. Never persisted directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedView {
    pub view_id: ViewId,
    pub layers: Vec<String>,
    pub time: DateTime<Utc>,
    pub time_mode: TimeMode,
    pub disabled: bool,
    pub driving_layer: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
}

impl ParsedView {
    pub fn layer_set(&self) -> BTreeSet<String> {
        self.layers.iter().cloned().collect()
    }

    /// Record persisted for this view when it is pinned from scratch.
    pub fn fresh_record(&self) -> ViewRecord {
        ViewRecord {
            id: self.view_id,
            time_original: self.time,
            time_main: self.time,
            layers: self.layer_set(),
            last_update: self.last_update.unwrap_or_else(Utc::now),
            driving_layer: self.driving_layer.clone(),
        }
    }
}
