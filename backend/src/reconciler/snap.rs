//! Snapping of raw window boundaries to existing data timestamps.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::db::repository::{RepositoryResult, TimestampLookup};
use crate::models::{MappedLayer, PinningWindow, TimeRange};

type SnapKey = (String, String, DateTime<Utc>);

/// Memoizing nearest-timestamp lookup, scoped to one reconciliation.
pub(crate) struct Snapper<'a, L: TimestampLookup + ?Sized> {
    lookup: &'a mut L,
    cache: HashMap<SnapKey, DateTime<Utc>>,
}

impl<'a, L: TimestampLookup + ?Sized> Snapper<'a, L> {
    pub(crate) fn new(lookup: &'a mut L) -> Self {
        Self {
            lookup,
            cache: HashMap::new(),
        }
    }

    /// Nearest timestamp of the layer's table. An empty table keeps `target`.
    pub(crate) fn snap(
        &mut self,
        layer: &MappedLayer,
        target: DateTime<Utc>,
    ) -> RepositoryResult<DateTime<Utc>> {
        let key = (
            layer.table_name.clone(),
            layer.temporal_attribute.clone(),
            target,
        );
        if let Some(snapped) = self.cache.get(&key) {
            return Ok(*snapped);
        }
        let snapped = self.lookup.nearest_timestamp(layer, target)?.unwrap_or(target);
        self.cache.insert(key, snapped);
        Ok(snapped)
    }

    /// Snapped hull of the windows around `a` and `b`.
    pub(crate) fn hull(
        &mut self,
        layer: &MappedLayer,
        window: &PinningWindow,
        a: DateTime<Utc>,
        b: DateTime<Utc>,
    ) -> RepositoryResult<TimeRange> {
        let raw = window.hull(a, b);
        let start = self.snap(layer, raw.start)?;
        let end = self.snap(layer, raw.end)?;
        Ok(TimeRange::new(start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct CountingLookup {
        rows: Vec<DateTime<Utc>>,
        calls: usize,
    }

    impl TimestampLookup for CountingLookup {
        fn nearest_timestamp(
            &mut self,
            _layer: &MappedLayer,
            target: DateTime<Utc>,
        ) -> RepositoryResult<Option<DateTime<Utc>>> {
            self.calls += 1;
            Ok(self
                .rows
                .iter()
                .copied()
                .min_by_key(|t| ((*t - target).abs(), *t)))
        }
    }

    fn at(m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 20, 15, m, s).unwrap()
    }

    fn layer() -> MappedLayer {
        MappedLayer::new("fes", "meteo", "fes_rdt", "public.msg_fes_rdt", "testtime")
    }

    #[test]
    fn test_snap_is_cached_per_target() {
        let mut lookup = CountingLookup {
            rows: vec![at(0, 0), at(0, 20)],
            calls: 0,
        };
        let mut snapper = Snapper::new(&mut lookup);
        assert_eq!(snapper.snap(&layer(), at(0, 10)).unwrap(), at(0, 0));
        assert_eq!(snapper.snap(&layer(), at(0, 10)).unwrap(), at(0, 0));
        assert_eq!(snapper.snap(&layer(), at(0, 11)).unwrap(), at(0, 20));
        drop(snapper);
        assert_eq!(lookup.calls, 2);
    }

    #[test]
    fn test_empty_table_keeps_raw_boundary() {
        let mut lookup = CountingLookup {
            rows: Vec::new(),
            calls: 0,
        };
        let mut snapper = Snapper::new(&mut lookup);
        let window = PinningWindow::from_minutes(1);
        let hull = snapper.hull(&layer(), &window, at(1, 0), at(1, 0)).unwrap();
        assert_eq!(hull, TimeRange::new(at(0, 30), at(1, 30)));
    }
}
