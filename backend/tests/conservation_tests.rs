//! Pin counters always equal the number of persisted views covering a row.

mod support;

use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;

use pinning_engine::feed::RawView;
use pinning_engine::models::ViewRecord;
use pinning_engine::services::TaskStatus;
use support::{at, disabled_view, raw_view, Harness, FES_TABLE, RADAR_TABLE};

const MINUTES: u32 = 2;

#[derive(Debug, Clone)]
struct Step {
    view_id: i64,
    layers: Vec<&'static str>,
    time: DateTime<Utc>,
    disabled: bool,
}

impl Step {
    fn to_raw(&self, last_update: DateTime<Utc>) -> RawView {
        if self.disabled {
            disabled_view(self.view_id, &self.layers, self.time, last_update)
        } else {
            raw_view(self.view_id, &self.layers, self.time, last_update)
        }
    }
}

/// View changes with times `step_secs` apart, from 15:00 on.
fn step(slots: i64, step_secs: i64) -> impl Strategy<Value = Step> {
    (
        1i64..=3,
        prop::sample::select(vec![
            vec!["fes"],
            vec!["radar"],
            vec!["fes", "radar"],
        ]),
        0..slots,
        prop::bool::weighted(0.2),
    )
        .prop_map(move |(view_id, layers, slot, disabled)| Step {
            view_id,
            layers,
            time: at(15, 0, 0) + Duration::seconds(slot * step_secs),
            disabled,
        })
}

/// Irregular row timestamps between 14:50 and 15:20.
fn rows() -> impl Strategy<Value = Vec<DateTime<Utc>>> {
    prop::collection::vec(0i64..1800, 3..25).prop_map(|offsets| {
        offsets
            .into_iter()
            .map(|secs| at(14, 50, 0) + Duration::seconds(secs))
            .collect()
    })
}

fn half_window() -> Duration {
    Duration::seconds(i64::from(MINUTES) * 30)
}

/// Nearest row, ties to the earlier one. The target itself when there are no rows.
fn snap(rows: &[DateTime<Utc>], target: DateTime<Utc>) -> DateTime<Utc> {
    rows.iter()
        .copied()
        .min_by_key(|t| ((*t - target).abs(), *t))
        .unwrap_or(target)
}

/// Counter each row of `table` should hold given the persisted views, with
/// hull bounds snapped to the table's rows.
fn expected_pins(h: &Harness, table: &str, layer_id: &str) -> Vec<i64> {
    let times: Vec<DateTime<Utc>> = h.repo.rows(table).into_iter().map(|row| row.time).collect();
    let hulls: Vec<(DateTime<Utc>, DateTime<Utc>)> = h
        .repo
        .views()
        .iter()
        .filter(|v| v.layers.contains(layer_id))
        .map(|v: &ViewRecord| {
            let low = v.time_original.min(v.time_main) - half_window();
            let high = v.time_original.max(v.time_main) + half_window();
            (snap(&times, low), snap(&times, high))
        })
        .collect();
    times
        .iter()
        .map(|t| {
            hulls
                .iter()
                .filter(|(start, end)| start <= t && t <= end)
                .count() as i64
        })
        .collect()
}

fn assert_conserved(h: &Harness) {
    assert_eq!(h.pins(FES_TABLE), expected_pins(h, FES_TABLE, "fes"));
    assert_eq!(h.pins(RADAR_TABLE), expected_pins(h, RADAR_TABLE, "radar"));
}

async fn run_incremental_steps(h: &Harness, steps: &[Step]) {
    for (i, step) in steps.iter().enumerate() {
        h.feed
            .upsert(step.to_raw(at(18, 0, 0) + Duration::seconds(i as i64 + 1)));

        let state = h.incremental().await;
        assert_eq!(state.status, TaskStatus::Completed, "{:?}", state.failure);
        assert_conserved(h);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_incremental_runs_conserve_pins(steps in prop::collection::vec(step(360, 10), 1..10)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let h = Harness::new(MINUTES);
            run_incremental_steps(&h, &steps).await;
        });
    }

    #[test]
    fn prop_reset_matches_fresh_pinning(steps in prop::collection::vec(step(360, 10), 1..8)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let h = Harness::new(MINUTES);
            for (i, step) in steps.iter().enumerate() {
                h.feed
                    .upsert(step.to_raw(at(18, 0, 0) + Duration::seconds(i as i64 + 1)));
            }

            let first = h.reset().await;
            assert_eq!(first.status, TaskStatus::Completed, "{:?}", first.failure);
            let fes = h.pins(FES_TABLE);
            let radar = h.pins(RADAR_TABLE);
            assert_conserved(&h);
            for record in h.repo.views() {
                assert_eq!(record.time_original, record.time_main);
            }

            let second = h.reset().await;
            assert_eq!(second.status, TaskStatus::Completed);
            assert_eq!(h.pins(FES_TABLE), fes);
            assert_eq!(h.pins(RADAR_TABLE), radar);
        });
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_sparse_rows_conserve_snapped_hulls(
        fes_rows in rows(),
        radar_rows in rows(),
        steps in prop::collection::vec(step(600, 1), 1..12),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let h = Harness::with_rows(MINUTES, fes_rows, radar_rows);
            run_incremental_steps(&h, &steps).await;

            let reset = h.reset().await;
            assert_eq!(reset.status, TaskStatus::Completed, "{:?}", reset.failure);
            assert_conserved(&h);
        });
    }
}
