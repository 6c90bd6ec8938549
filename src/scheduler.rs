//! Daily backup scheduler.
//!
//! Sleeps until the next configured `HH:MM` (local time), then starts a full
//! run. At most one run is active at a time: a trigger that arrives while a
//! run is still going is logged and skipped.

use std::{future::Future, sync::Arc};

use chrono::{DateTime, Local, NaiveTime, TimeZone};
use tokio::sync::Mutex;

use crate::{
    config::ScheduleConfig,
    orchestrator::{BackupKind, Orchestrator, RunResult},
};

/// First configured time strictly after `now`. `times` must be sorted.
///
/// Local times that do not exist on a given day (DST gaps) are skipped for
/// that day.
pub fn next_occurrence<Tz: TimeZone>(times: &[NaiveTime], now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let today = now.date_naive();
    (0..=2)
        .filter_map(|offset| today.checked_add_days(chrono::Days::new(offset)))
        .flat_map(|day| times.iter().map(move |t| day.and_time(*t)))
        .filter_map(|naive| now.timezone().from_local_datetime(&naive).earliest())
        .find(|candidate| candidate > now)
}

pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    times: Vec<NaiveTime>,
    active: Arc<Mutex<()>>,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, config: &ScheduleConfig) -> Self {
        Self {
            orchestrator,
            times: config.parsed(),
            active: Arc::new(Mutex::new(())),
        }
    }

    pub fn times(&self) -> &[NaiveTime] {
        &self.times
    }

    /// Run now unless a run is already active.
    pub async fn trigger(&self, kind: BackupKind) -> Option<RunResult> {
        let Ok(_guard) = self.active.try_lock() else {
            tracing::warn!(kind = %kind, "A backup is already running, skipping trigger");
            return None;
        };
        Some(self.orchestrator.run(kind).await)
    }

    /// Fire scheduled runs until `shutdown` completes, then wait for an active
    /// run to finish.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        if self.times.is_empty() {
            tracing::warn!("No valid schedule times configured, scheduler idle");
            shutdown.await;
            return;
        }

        tracing::info!(
            times = ?self.times.iter().map(|t| t.format("%H:%M").to_string()).collect::<Vec<_>>(),
            "Scheduler started"
        );
        tokio::pin!(shutdown);

        loop {
            let now = Local::now();
            let Some(next) = next_occurrence(&self.times, &now) else {
                tracing::error!("Could not compute the next scheduled run, scheduler stopping");
                break;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            tracing::info!(next = %next.format("%Y-%m-%d %H:%M"), "Next backup scheduled");

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, scheduler stopping");
                    break;
                }
                _ = tokio::time::sleep(wait) => self.fire(),
            }
        }

        // Let an in-flight run finish; runs are never cancelled.
        let _guard = self.active.lock().await;
    }

    fn fire(&self) {
        let Ok(guard) = self.active.clone().try_lock_owned() else {
            tracing::warn!("Previous backup still running, skipping scheduled run");
            return;
        };
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            let result = orchestrator.run(BackupKind::Full).await;
            tracing::debug!(success = result.success, "Scheduled backup finished");
            drop(guard);
        });
    }
}
