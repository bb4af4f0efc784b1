use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use recorder_core::time::{format_timestamp, local_now};
use recorder_core::{
    load_recorder_config, CaptureError, CaptureExit, CaptureRequest, CaptureResult,
    CompletionStatus, Dispatch, Encoder, ForcedStop, ProbeOutcome, Prober, ProcessSupervisor,
    Reaper, RecorderError, RecorderRuntime, RecoveryInitializer, Schedule, ScheduleError,
    ScheduleRequest, SqliteDatabase, SqliteHistoryStore, SqliteScheduleStore, StopRequest,
    StopSignal, SupervisorSettings, TriggerLoop, TriggerSettings, ValidatedSchedule, VideoCodec,
};
use tempfile::TempDir;

struct H264;

#[async_trait]
impl Prober for H264 {
    async fn probe(&self, _url: &str) -> ProbeOutcome {
        ProbeOutcome::Video(VideoCodec::H264)
    }
}

struct WaitForStop;

#[async_trait]
impl Encoder for WaitForStop {
    async fn capture(
        &self,
        _request: CaptureRequest,
        mut signal: StopSignal,
    ) -> CaptureResult<CaptureExit> {
        loop {
            if signal.changed().await != StopRequest::Running {
                return Ok(CaptureExit::Stopped);
            }
        }
    }
}

/// Records dispatched ids; refuses the ids listed in `refuse`.
#[derive(Default)]
struct RecordingDispatch {
    dispatched: Mutex<Vec<i64>>,
    refuse: Vec<i64>,
}

impl Dispatch for RecordingDispatch {
    fn dispatch(&self, schedule: Schedule) -> CaptureResult<()> {
        if self.refuse.contains(&schedule.id) {
            return Err(CaptureError::PoolClosed);
        }
        self.dispatched.lock().unwrap().push(schedule.id);
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    db: SqliteDatabase,
    store: SqliteScheduleStore,
    history: SqliteHistoryStore,
    supervisor: Arc<ProcessSupervisor>,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = SqliteDatabase::new(dir.path().join("recorder.sqlite")).unwrap();
    let store = SqliteScheduleStore::new(db.clone());
    let history = SqliteHistoryStore::new(db.clone());
    store.initialize().unwrap();
    history.initialize().unwrap();
    let supervisor = Arc::new(ProcessSupervisor::new(
        store.clone(),
        Arc::new(H264),
        Arc::new(WaitForStop),
        SupervisorSettings {
            output_dir: dir.path().join("recordings"),
            stop_grace: Duration::from_secs(20),
            retry_guard: Duration::from_secs(30),
            graceful_stop_wait: Duration::from_millis(100),
            retry_delay: Duration::ZERO,
        },
    ));
    Harness {
        _dir: dir,
        db,
        store,
        history,
        supervisor,
    }
}

fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2030, 1, 1)
        .unwrap()
        .and_hms_opt(hour, minute, second)
        .unwrap()
}

fn book(
    store: &SqliteScheduleStore,
    start: NaiveDateTime,
    end: NaiveDateTime,
    name: &str,
) -> Schedule {
    store
        .insert(&ValidatedSchedule {
            start,
            end,
            channel: Some("news".into()),
            stream_url: "http://tv.example.com/news.m3u8".into(),
            file_name: format!("{name}.mkv"),
        })
        .unwrap()
}

fn triggered(store: &SqliteScheduleStore, mut schedule: Schedule) -> Schedule {
    schedule.triggered = true;
    store.save(&schedule).unwrap();
    schedule
}

fn trigger_loop(h: &Harness, dispatch: Arc<RecordingDispatch>, cap: usize) -> TriggerLoop {
    TriggerLoop::new(
        h.store.clone(),
        Arc::clone(&h.supervisor),
        dispatch,
        TriggerSettings {
            lookahead: Duration::from_secs(30),
            max_concurrent: cap,
        },
    )
}

#[tokio::test]
async fn cap_defers_the_upcoming_schedule_until_the_next_tick() {
    let h = harness();
    // Windows overlap on purpose; the store does not validate.
    let a = book(&h.store, at(9, 0, 0), at(11, 0, 0), "a");
    let b = book(&h.store, at(9, 30, 0), at(10, 30, 0), "b");
    let c = book(&h.store, at(10, 0, 0), at(12, 0, 0), "c");
    let dispatch = Arc::new(RecordingDispatch::default());
    let trigger = trigger_loop(&h, Arc::clone(&dispatch), 2);

    let report = trigger.tick(at(9, 59, 45)).await.unwrap();
    assert_eq!(report.admitted, vec![a.id, b.id]);
    assert_eq!(report.deferred, vec![c.id]);
    assert!(h.store.find_by_id(a.id).unwrap().unwrap().triggered);
    assert!(h.store.find_by_id(b.id).unwrap().unwrap().triggered);
    assert!(!h.store.find_by_id(c.id).unwrap().unwrap().triggered);

    let report = trigger.tick(at(10, 0, 30)).await.unwrap();
    assert_eq!(report.admitted, vec![c.id]);
    assert!(report.deferred.is_empty());
    assert_eq!(*dispatch.dispatched.lock().unwrap(), vec![a.id, b.id, c.id]);

    let report = trigger.tick(at(10, 1, 0)).await.unwrap();
    assert!(report.admitted.is_empty());
}

#[tokio::test]
async fn one_failed_dispatch_does_not_block_the_rest() {
    let h = harness();
    let a = book(&h.store, at(9, 0, 0), at(10, 0, 0), "a");
    let b = book(&h.store, at(10, 0, 0), at(11, 0, 0), "b");
    let dispatch = Arc::new(RecordingDispatch {
        dispatched: Mutex::new(Vec::new()),
        refuse: vec![a.id],
    });
    let trigger = trigger_loop(&h, Arc::clone(&dispatch), 5);

    let report = trigger.tick(at(9, 59, 50)).await.unwrap();
    assert_eq!(report.dispatch_failures, vec![a.id]);
    assert_eq!(report.admitted, vec![b.id]);
    assert_eq!(*dispatch.dispatched.lock().unwrap(), vec![b.id]);
    assert!(h.store.find_by_id(a.id).unwrap().unwrap().triggered);
}

#[test]
fn reaper_archives_expired_triggered_schedules_once() {
    let h = harness();
    let done = triggered(&h.store, book(&h.store, at(8, 0, 0), at(9, 0, 0), "done"));
    let live = triggered(&h.store, book(&h.store, at(9, 30, 0), at(11, 0, 0), "live"));
    let never_started = book(&h.store, at(7, 0, 0), at(7, 30, 0), "never");
    let in_grace = triggered(&h.store, book(&h.store, at(9, 30, 0), at(9, 59, 50), "grace"));
    let reaper = Reaper::new(h.store.clone(), h.history.clone(), Duration::from_secs(20));

    let report = reaper.run_once(at(10, 0, 0)).unwrap();
    assert_eq!(report.archived, vec![done.id]);
    assert!(h.store.exists(in_grace.id).unwrap());
    assert!(report.failed.is_empty());

    let report = reaper.run_once(at(10, 0, 0)).unwrap();
    assert!(report.archived.is_empty());

    let archive = h.history.list_all().unwrap();
    assert_eq!(archive.len(), 1);
    assert_eq!(archive[0].file_name, "done.mkv");
    assert_eq!(archive[0].status, CompletionStatus::Completed);
    assert!(archive[0].was_triggered);
    assert!(!h.store.exists(done.id).unwrap());
    assert!(h.store.exists(live.id).unwrap());
    assert!(h.store.exists(never_started.id).unwrap());

    let report = reaper.run_once(at(10, 0, 11)).unwrap();
    assert_eq!(report.archived, vec![in_grace.id]);
}

#[test]
fn reaper_skips_a_schedule_it_cannot_archive_and_reaps_the_rest() {
    let h = harness();
    let broken = triggered(&h.store, book(&h.store, at(7, 0, 0), at(8, 0, 0), "broken"));
    let fine = triggered(&h.store, book(&h.store, at(8, 0, 0), at(9, 0, 0), "fine"));
    let conn = rusqlite::Connection::open(h.db.path()).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER refuse_broken BEFORE INSERT ON past_recordings \
         WHEN NEW.file_name = 'broken.mkv' \
         BEGIN SELECT RAISE(ABORT, 'archive unavailable'); END;",
    )
    .unwrap();
    let reaper = Reaper::new(h.store.clone(), h.history.clone(), Duration::ZERO);

    let report = reaper.run_once(at(10, 0, 0)).unwrap();
    assert_eq!(report.archived, vec![fine.id]);
    assert_eq!(report.failed, vec![broken.id]);
    assert!(h.store.exists(broken.id).unwrap());
    assert!(!h.store.exists(fine.id).unwrap());

    conn.execute_batch("DROP TRIGGER refuse_broken;").unwrap();
    let report = reaper.run_once(at(10, 0, 0)).unwrap();
    assert_eq!(report.archived, vec![broken.id]);
    assert!(report.failed.is_empty());
    let files: Vec<String> = h
        .history
        .list_all()
        .unwrap()
        .into_iter()
        .map(|record| record.file_name)
        .collect();
    assert_eq!(files.len(), 2);
    assert!(files.contains(&"broken.mkv".to_string()));
}

#[test]
fn recovery_resubmits_only_unfinished_recordings() {
    let h = harness();
    let now = at(12, 0, 0);
    let unfinished = triggered(&h.store, book(&h.store, at(11, 0, 0), at(13, 0, 0), "unfinished"));
    let finished = triggered(&h.store, book(&h.store, at(10, 0, 0), at(11, 0, 0), "finished"));
    book(&h.store, at(14, 0, 0), at(15, 0, 0), "pending");
    let dispatch = Arc::new(RecordingDispatch::default());

    let recovery = RecoveryInitializer::new(h.store.clone(), dispatch.clone());
    let resumed = recovery.resume(now).unwrap();

    assert_eq!(resumed, vec![unfinished.id]);
    assert_eq!(*dispatch.dispatched.lock().unwrap(), vec![unfinished.id]);
    assert!(h.store.exists(finished.id).unwrap());
}

#[tokio::test]
async fn forced_stop_checks_state_then_archives_and_deletes() {
    let h = harness();
    let now = at(10, 0, 0);
    let stop = ForcedStop::new(h.store.clone(), h.history.clone(), Arc::clone(&h.supervisor));

    assert!(matches!(
        stop.stop(404, now).await,
        Err(RecorderError::Schedule(ScheduleError::NotFound { id: 404 }))
    ));

    let pending = book(&h.store, at(11, 0, 0), at(12, 0, 0), "pending");
    assert!(matches!(
        stop.stop(pending.id, now).await,
        Err(RecorderError::Schedule(ScheduleError::NotCurrentlyRecording { .. }))
    ));
    assert!(h.store.exists(pending.id).unwrap());

    let running = triggered(&h.store, book(&h.store, at(9, 0, 0), at(10, 30, 0), "running"));
    let outcome = stop.stop(running.id, now).await.unwrap();
    assert!(!outcome.handle_found);
    assert_eq!(outcome.record.status, CompletionStatus::StoppedByUser);
    assert_eq!(outcome.record.file_name, "running.mkv");
    assert!(!h.store.exists(running.id).unwrap());
    assert_eq!(h.history.list_all().unwrap().len(), 1);
}

fn runtime_config(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("recorder.toml");
    std::fs::write(
        &path,
        "[paths]\n\
         data_dir = \"data\"\n\
         output_dir = \"recordings\"\n\
         \n\
         [scheduler]\n\
         max_concurrent_recordings = 1\n\
         graceful_stop_wait_seconds = 1\n\
         worker_pool_size = 2\n",
    )
    .unwrap();
    path
}

#[tokio::test]
async fn runtime_triggers_and_force_stops_a_live_recording() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_recorder_config(runtime_config(&dir)).unwrap();
    let runtime =
        RecorderRuntime::with_components(&config, Arc::new(H264), Arc::new(WaitForStop)).unwrap();
    assert!(config.database_path().exists());

    let now = local_now();
    let schedule = runtime
        .manager()
        .create(
            &ScheduleRequest {
                start: format_timestamp(now - ChronoDuration::minutes(5)),
                end: format_timestamp(now + ChronoDuration::hours(2)),
                channel: None,
                stream_url: Some("http://tv.example.com/live.m3u8".into()),
                file_name: "evening".into(),
            },
            now,
        )
        .unwrap();

    let report = runtime.trigger().tick(local_now()).await.unwrap();
    assert_eq!(report.admitted, vec![schedule.id]);

    let supervisor = runtime.supervisor();
    for _ in 0..200 {
        if supervisor.is_active(schedule.id) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(supervisor.active_ids(), vec![schedule.id]);

    let outcome = runtime.force_stop(schedule.id).await.unwrap();
    assert!(outcome.handle_found);
    assert_eq!(outcome.record.status, CompletionStatus::StoppedByUser);
    assert!(runtime.manager().list().unwrap().is_empty());
    assert!(supervisor.active_ids().is_empty());
}
