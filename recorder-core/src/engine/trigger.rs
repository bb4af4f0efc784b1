use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::{debug, error, info, warn};

use crate::capture::ProcessSupervisor;
use crate::schedule::{Schedule, SqliteScheduleStore};

use super::dispatch::Dispatch;
use super::RecorderResult;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Admission {
    pub admitted: Vec<Schedule>,
    pub deferred: Vec<Schedule>,
}

/// Picks the pending schedules to start now: ongoing ones first, then the
/// ones starting within `lookahead`, truncated to `cap`.
pub fn select_candidates(
    pending: &[Schedule],
    now: NaiveDateTime,
    lookahead: Duration,
    cap: usize,
) -> Admission {
    let ongoing = pending
        .iter()
        .filter(|schedule| !schedule.triggered && schedule.window().is_ongoing(now));
    let starting_soon = pending
        .iter()
        .filter(|schedule| !schedule.triggered && schedule.window().starts_within(now, lookahead));

    let mut seen = HashSet::new();
    let mut candidates: Vec<Schedule> = ongoing
        .chain(starting_soon)
        .filter(|schedule| seen.insert(schedule.id))
        .cloned()
        .collect();

    let deferred = if candidates.len() > cap {
        candidates.split_off(cap)
    } else {
        Vec::new()
    };
    Admission {
        admitted: candidates,
        deferred,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerReport {
    pub orphans_stopped: Vec<i64>,
    pub admitted: Vec<i64>,
    pub deferred: Vec<i64>,
    pub dispatch_failures: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct TriggerSettings {
    pub lookahead: Duration,
    pub max_concurrent: usize,
}

pub struct TriggerLoop {
    store: SqliteScheduleStore,
    supervisor: Arc<ProcessSupervisor>,
    dispatcher: Arc<dyn Dispatch>,
    settings: TriggerSettings,
}

impl TriggerLoop {
    pub fn new(
        store: SqliteScheduleStore,
        supervisor: Arc<ProcessSupervisor>,
        dispatcher: Arc<dyn Dispatch>,
        settings: TriggerSettings,
    ) -> Self {
        Self {
            store,
            supervisor,
            dispatcher,
            settings,
        }
    }

    pub async fn tick(&self, now: NaiveDateTime) -> RecorderResult<TriggerReport> {
        let mut report = TriggerReport {
            orphans_stopped: self.supervisor.stop_orphans().await,
            ..TriggerReport::default()
        };

        let pending = self.store.find_by_triggered(false)?;
        let Admission { admitted, deferred } = select_candidates(
            &pending,
            now,
            self.settings.lookahead,
            self.settings.max_concurrent,
        );
        if !deferred.is_empty() {
            let names: Vec<&str> = deferred.iter().map(|s| s.file_name.as_str()).collect();
            warn!(
                target: "recorder.trigger",
                cap = self.settings.max_concurrent,
                deferred = ?names,
                "recording cap reached; deferring schedules"
            );
            report.deferred = deferred.iter().map(|s| s.id).collect();
        }
        if admitted.is_empty() {
            debug!(target: "recorder.trigger", pending = pending.len(), "nothing to trigger");
            return Ok(report);
        }

        let requested: Vec<i64> = admitted.iter().map(|s| s.id).collect();
        let claimed = self.store.mark_triggered(&requested)?;
        if claimed.len() < requested.len() {
            let skipped: Vec<i64> = requested
                .iter()
                .copied()
                .filter(|id| !claimed.contains(id))
                .collect();
            warn!(
                target: "recorder.trigger",
                skipped = ?skipped,
                "schedules changed since they were read; not triggering them"
            );
        }

        // Dispatch the rows as stored now, not the snapshot read above.
        let mut admitted = Vec::with_capacity(claimed.len());
        for id in claimed {
            match self.store.find_by_id(id)? {
                Some(schedule) => admitted.push(schedule),
                None => warn!(
                    target: "recorder.trigger",
                    schedule_id = id,
                    "schedule vanished after trigger"
                ),
            }
        }

        for schedule in admitted {
            let schedule_id = schedule.id;
            let file_name = schedule.file_name.clone();
            match self.dispatcher.dispatch(schedule) {
                Ok(()) => {
                    info!(
                        target: "recorder.trigger",
                        schedule_id,
                        file_name = %file_name,
                        "recording triggered"
                    );
                    report.admitted.push(schedule_id);
                }
                Err(err) => {
                    error!(
                        target: "recorder.trigger",
                        schedule_id,
                        file_name = %file_name,
                        error = %err,
                        "dispatch failed"
                    );
                    report.dispatch_failures.push(schedule_id);
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2030, 1, 1)
            .unwrap()
            .and_hms_opt(hour, minute, second)
            .unwrap()
    }

    fn pending(id: i64, start: NaiveDateTime, end: NaiveDateTime) -> Schedule {
        Schedule {
            id,
            start,
            end,
            channel: None,
            stream_url: "http://example.com/live.m3u8".into(),
            file_name: format!("show-{id}.mkv"),
            triggered: false,
        }
    }

    fn ids(schedules: &[Schedule]) -> Vec<i64> {
        schedules.iter().map(|s| s.id).collect()
    }

    #[test]
    fn ongoing_schedules_win_over_upcoming_ones() {
        let schedules = vec![
            pending(1, at(10, 0, 0), at(11, 0, 0)),
            pending(2, at(9, 0, 0), at(11, 0, 0)),
            pending(3, at(9, 30, 0), at(10, 30, 0)),
        ];
        let admission = select_candidates(&schedules, at(9, 59, 45), Duration::from_secs(30), 2);
        assert_eq!(ids(&admission.admitted), vec![2, 3]);
        assert_eq!(ids(&admission.deferred), vec![1]);
    }

    #[test]
    fn schedules_outside_the_lookahead_or_already_over_are_ignored() {
        let schedules = vec![
            pending(1, at(10, 5, 0), at(11, 0, 0)),
            pending(2, at(8, 0, 0), at(9, 0, 0)),
            pending(3, at(10, 0, 0), at(10, 30, 0)),
        ];
        let admission = select_candidates(&schedules, at(10, 0, 0), Duration::from_secs(30), 5);
        assert!(admission.admitted.is_empty());
        assert!(admission.deferred.is_empty());
    }

    #[test]
    fn already_triggered_rows_are_never_candidates() {
        let mut running = pending(1, at(9, 0, 0), at(11, 0, 0));
        running.triggered = true;
        let admission = select_candidates(&[running], at(10, 0, 0), Duration::from_secs(30), 2);
        assert!(admission.admitted.is_empty());
    }
}
