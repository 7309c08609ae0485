#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use pinning_engine::catalog::{MappingEntry, StaticCatalog};
use pinning_engine::config::PinningSettings;
use pinning_engine::db::repositories::LocalRepository;
use pinning_engine::feed::{MemoryViewFeed, RawView};
use pinning_engine::models::ViewId;
use pinning_engine::services::{MappingSource, PinningService, TaskState, TaskStatus};

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Runs `f` with environment variables temporarily modified.
///
/// This is panic-safe (restores variables on unwind) and also serializes access to
/// process-global env vars to avoid flaky tests when Rust runs tests in parallel.
///
/// `changes` is a list of `(key, value)` pairs:
/// - `Some(v)` sets the variable to `v`
/// - `None` removes the variable
pub fn with_scoped_env<F, R>(changes: &[(&str, Option<&str>)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let _guard = ScopedEnv::new(changes);
    f()
}

struct ScopedEnv {
    snapshot: Vec<(String, Option<String>)>,
}

impl ScopedEnv {
    fn new(changes: &[(&str, Option<&str>)]) -> Self {
        let keys: HashSet<&str> = changes.iter().map(|(k, _)| *k).collect();
        let snapshot = keys
            .into_iter()
            .map(|k| (k.to_string(), std::env::var(k).ok()))
            .collect::<Vec<_>>();

        for (k, v) in changes {
            match v {
                Some(val) => std::env::set_var(k, val),
                None => std::env::remove_var(k),
            }
        }

        Self { snapshot }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (k, v) in self.snapshot.drain(..) {
            match v {
                Some(val) => std::env::set_var(&k, val),
                None => std::env::remove_var(&k),
            }
        }
    }
}

pub const FES_TABLE: &str = "public.msg_fes_rdt";
pub const RADAR_TABLE: &str = "public.radar";
pub const LOCK_KEY: i64 = 7_331;

pub fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 20, h, m, s).unwrap()
}

/// Timestamps from `from` to `to` inclusive, `step_secs` apart.
pub fn grid(from: DateTime<Utc>, to: DateTime<Utc>, step_secs: i64) -> Vec<DateTime<Utc>> {
    let mut times = Vec::new();
    let mut t = from;
    while t <= to {
        times.push(t);
        t += Duration::seconds(step_secs);
    }
    times
}

pub fn catalog() -> StaticCatalog {
    StaticCatalog::new()
        .with_layer("meteo", "fes_rdt", FES_TABLE, "testtime")
        .with_layer("meteo", "radar", RADAR_TABLE, "obs_time")
}

pub fn mapping() -> Vec<MappingEntry> {
    vec![
        MappingEntry {
            layer_id: "fes".into(),
            workspace: "meteo".into(),
            layer_name: "fes_rdt".into(),
        },
        MappingEntry {
            layer_id: "radar".into(),
            workspace: "meteo".into(),
            layer_name: "radar".into(),
        },
    ]
}

pub fn raw_view(
    id: ViewId,
    layers: &[&str],
    time: DateTime<Utc>,
    last_update: DateTime<Utc>,
) -> RawView {
    let layers: Vec<serde_json::Value> = layers
        .iter()
        .map(|l| serde_json::json!({ "id": l, "name": l }))
        .collect();
    let preference = serde_json::json!({
        "layers": layers,
        "time": { "mode": "absolute", "value": time },
        "drivingLayer": null,
    });
    RawView {
        id,
        disabled: false,
        preference: preference.to_string(),
        last_update: Some(last_update),
    }
}

pub fn disabled_view(
    id: ViewId,
    layers: &[&str],
    time: DateTime<Utc>,
    last_update: DateTime<Utc>,
) -> RawView {
    RawView {
        disabled: true,
        ..raw_view(id, layers, time, last_update)
    }
}

/// Local repository, in-memory feed and a running service wired together.
///
/// Unless built with [`Harness::with_rows`], both tables hold one row every
/// 10 seconds between 14:00 and 17:00.
pub struct Harness {
    pub repo: LocalRepository,
    pub feed: MemoryViewFeed,
    pub service: PinningService,
}

impl Harness {
    /// Must be called from within a Tokio runtime.
    pub fn new(minutes: u32) -> Self {
        let rows = grid(at(14, 0, 0), at(17, 0, 0), 10);
        Self::with_rows(minutes, rows.clone(), rows)
    }

    /// Same wiring over caller-supplied row timestamps.
    pub fn with_rows(
        minutes: u32,
        fes_rows: Vec<DateTime<Utc>>,
        radar_rows: Vec<DateTime<Utc>>,
    ) -> Self {
        let repo = LocalRepository::new();
        repo.create_table(FES_TABLE, "testtime", fes_rows);
        repo.create_table(RADAR_TABLE, "obs_time", radar_rows);
        let feed = MemoryViewFeed::new();
        let settings = PinningSettings {
            minutes,
            batch_size: 4,
            lock_key: LOCK_KEY,
            ..PinningSettings::default()
        };
        let service = PinningService::with_mapping(
            Arc::new(repo.clone()),
            Arc::new(feed.clone()),
            Arc::new(catalog()),
            settings,
            MappingSource::Entries(mapping()),
        )
        .unwrap();
        Self {
            repo,
            feed,
            service,
        }
    }

    pub async fn reset(&self) -> TaskState {
        let task_id = self.service.reset().await.expect("reset not started");
        wait_for(&self.service, &task_id).await
    }

    pub async fn incremental(&self) -> TaskState {
        let task_id = self
            .service
            .incremental()
            .await
            .expect("incremental not started");
        wait_for(&self.service, &task_id).await
    }

    /// Rows of `table` with a positive counter.
    pub fn pinned(&self, table: &str) -> Vec<DateTime<Utc>> {
        self.repo
            .rows(table)
            .into_iter()
            .filter(|row| row.pin > 0)
            .map(|row| row.time)
            .collect()
    }

    pub fn pins(&self, table: &str) -> Vec<i64> {
        self.repo.rows(table).into_iter().map(|row| row.pin).collect()
    }
}

/// Polls until `task_id` is no longer running.
pub async fn wait_for(service: &PinningService, task_id: &str) -> TaskState {
    for _ in 0..500 {
        match service.task(task_id) {
            Some(state) if state.status != TaskStatus::Running => return state,
            Some(_) => {}
            None => panic!("task {} is no longer current", task_id),
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("task {} did not finish", task_id);
}
