//! Periodic triggers for maintenance runs.

use log::{debug, info};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::pinning::PinningService;
use super::task_state::TaskKind;
use crate::config::ScheduleSettings;

/// Spawns one interval loop per configured cadence.
///
/// A tick that cannot start its run (another run in progress, lock held
/// elsewhere) is skipped. The first tick of each loop fires after one full
/// interval.
pub fn spawn_periodic(service: &PinningService, schedule: &ScheduleSettings) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    if let Some(secs) = schedule.incremental_interval_secs.filter(|s| *s > 0) {
        handles.push(spawn_loop(service.clone(), TaskKind::Incremental, secs));
    }
    if let Some(secs) = schedule.reset_interval_secs.filter(|s| *s > 0) {
        handles.push(spawn_loop(service.clone(), TaskKind::Reset, secs));
    }
    handles
}

fn spawn_loop(service: PinningService, kind: TaskKind, secs: u64) -> JoinHandle<()> {
    info!("Scheduling {} every {}s", kind, secs);
    tokio::spawn(async move {
        let period = Duration::from_secs(secs);
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let started = match kind {
                TaskKind::Reset => service.reset().await,
                TaskKind::Incremental => service.incremental().await,
            };
            match started {
                Some(task_id) => debug!("Scheduled {} started as task {}", kind, task_id),
                None => debug!("Scheduled {} skipped", kind),
            }
        }
    })
}
