use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{NaiveDate, NaiveDateTime};
use recorder_core::{
    ChannelDirectory, CompletionStatus, ScheduleError, ScheduleManager, ScheduleRequest,
    ScheduleValidator, SqliteChannelStore, SqliteDatabase, SqliteHistoryStore,
    SqliteScheduleStore, ValidationError,
};
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    manager: ScheduleManager,
    channels: SqliteChannelStore,
    history: SqliteHistoryStore,
    store: SqliteScheduleStore,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = SqliteDatabase::builder()
        .path(dir.path().join("recorder.sqlite"))
        .create_if_missing(true)
        .build()
        .unwrap();
    let store = SqliteScheduleStore::new(db.clone());
    let channels = SqliteChannelStore::new(db.clone());
    let history = SqliteHistoryStore::new(db);
    store.initialize().unwrap();
    channels.initialize().unwrap();
    history.initialize().unwrap();
    let directory: Arc<dyn ChannelDirectory> = Arc::new(channels.clone());
    let validator = ScheduleValidator::new(directory, store.clone());
    let manager = ScheduleManager::new(store.clone(), history.clone(), validator);
    Harness {
        _dir: dir,
        manager,
        channels,
        history,
        store,
    }
}

fn morning() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2030, 1, 1)
        .unwrap()
        .and_hms_opt(8, 0, 0)
        .unwrap()
}

fn request(start: &str, end: &str, file_name: &str) -> ScheduleRequest {
    ScheduleRequest {
        start: start.into(),
        end: end.into(),
        channel: None,
        stream_url: Some("http://streams.example.com/live.m3u8".into()),
        file_name: file_name.into(),
    }
}

fn validation_error(err: ScheduleError) -> ValidationError {
    match err {
        ScheduleError::Validation(inner) => inner,
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn overlapping_booking_is_rejected_and_back_to_back_is_accepted() {
    let h = harness();
    let a = h
        .manager
        .create(&request("10:00 01/01/2030", "11:00 01/01/2030", "a"), morning())
        .unwrap();
    assert_eq!(a.file_name, "a.mkv");
    assert!(!a.triggered);

    let err = h
        .manager
        .create(&request("10:30 01/01/2030", "11:30 01/01/2030", "b"), morning())
        .unwrap_err();
    assert_eq!(
        validation_error(err),
        ValidationError::Overlap {
            file_name: "a.mkv".into(),
            schedule_id: a.id,
        }
    );

    let c = h
        .manager
        .create(&request("11:00 01/01/2030", "12:00 01/01/2030", "c.ts"), morning())
        .unwrap();
    assert_eq!(c.file_name, "c.mkv");
    assert_eq!(h.manager.list().unwrap().len(), 2);
}

#[test]
fn concurrent_overlapping_creates_admit_exactly_one() {
    let h = harness();
    let barrier = Barrier::new(4);
    let results: Vec<_> = thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|n| {
                let manager = &h.manager;
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    manager.create(
                        &request("10:00 01/01/2030", "11:00 01/01/2030", &format!("race-{n}")),
                        morning(),
                    )
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect()
    });

    let created: Vec<_> = results.iter().filter(|result| result.is_ok()).collect();
    assert_eq!(created.len(), 1);
    for result in results.iter().filter(|result| result.is_err()) {
        assert!(matches!(
            result,
            Err(ScheduleError::Validation(ValidationError::Overlap { .. }))
        ));
    }
    assert_eq!(h.store.find_all().unwrap().len(), 1);
}

#[test]
fn requests_are_checked_in_order() {
    let h = harness();
    let now = morning();

    let err = h
        .manager
        .create(&request("10:00 2030-01-01", "11:00 01/01/2030", "x"), now)
        .unwrap_err();
    assert!(matches!(
        validation_error(err),
        ValidationError::InvalidTimeFormat(_)
    ));

    let err = h
        .manager
        .create(&request(" 10:00 01/01/2030", "11:00 01/01/2030", "x"), now)
        .unwrap_err();
    assert!(matches!(
        validation_error(err),
        ValidationError::InvalidTimeFormat(_)
    ));

    let err = h
        .manager
        .create(&request("10:00 01/01/2030", "11:00 01/01/2030 ", "x"), now)
        .unwrap_err();
    assert!(matches!(
        validation_error(err),
        ValidationError::InvalidTimeFormat(_)
    ));

    let err = h
        .manager
        .create(&request("11:00 01/01/2030", "10:00 01/01/2030", "x"), now)
        .unwrap_err();
    assert_eq!(validation_error(err), ValidationError::TimeOrder);

    let err = h
        .manager
        .create(&request("10:00 01/01/2030", "10:00 01/01/2030", "x"), now)
        .unwrap_err();
    assert_eq!(validation_error(err), ValidationError::TimeOrder);

    let err = h
        .manager
        .create(&request("06:00 01/01/2030", "07:59 01/01/2030", "x"), now)
        .unwrap_err();
    assert_eq!(validation_error(err), ValidationError::PastEndTime);

    let mut no_source = request("10:00 01/01/2030", "11:00 01/01/2030", "x");
    no_source.stream_url = Some("not a url".into());
    let err = h.manager.create(&no_source, now).unwrap_err();
    assert_eq!(validation_error(err), ValidationError::MissingUrl);

    let err = h
        .manager
        .create(&request("10:00 01/01/2030", "11:00 01/01/2030", "dir/x.mkv"), now)
        .unwrap_err();
    assert!(matches!(
        validation_error(err),
        ValidationError::InvalidFileName(_)
    ));

    assert!(h.store.find_all().unwrap().is_empty());
}

#[test]
fn channel_aliases_resolve_or_fall_back_to_urls() {
    let h = harness();
    let now = morning();
    h.channels
        .add("sports", "http://tv.example.com/sports.m3u8")
        .unwrap();

    let mut by_alias = request("10:00 01/01/2030", "11:00 01/01/2030", "match");
    by_alias.channel = Some("sports".into());
    by_alias.stream_url = None;
    let schedule = h.manager.create(&by_alias, now).unwrap();
    assert_eq!(schedule.channel.as_deref(), Some("sports"));
    assert_eq!(schedule.stream_url, "http://tv.example.com/sports.m3u8");

    let mut url_as_alias = request("12:00 01/01/2030", "13:00 01/01/2030", "direct");
    url_as_alias.channel = Some("http://other.example.com/feed.m3u8".into());
    url_as_alias.stream_url = None;
    let schedule = h.manager.create(&url_as_alias, now).unwrap();
    assert_eq!(schedule.channel, None);
    assert_eq!(schedule.stream_url, "http://other.example.com/feed.m3u8");

    let mut unknown = request("14:00 01/01/2030", "15:00 01/01/2030", "unknown");
    unknown.channel = Some("news".into());
    let err = h.manager.create(&unknown, now).unwrap_err();
    assert_eq!(
        validation_error(err),
        ValidationError::InvalidChannelOrUrl("news".into())
    );
}

#[test]
fn update_excludes_itself_and_keeps_triggered_flag() {
    let h = harness();
    let now = morning();
    let mut a = h
        .manager
        .create(&request("10:00 01/01/2030", "11:00 01/01/2030", "a"), now)
        .unwrap();
    h.manager
        .create(&request("12:00 01/01/2030", "13:00 01/01/2030", "b"), now)
        .unwrap();

    a.triggered = true;
    h.store.save(&a).unwrap();

    let updated = h
        .manager
        .update(a.id, &request("10:30 01/01/2030", "11:30 01/01/2030", "a2.mp4"), now)
        .unwrap();
    assert_eq!(updated.id, a.id);
    assert_eq!(updated.file_name, "a2.mkv");
    assert!(updated.triggered);
    assert_eq!(h.manager.get(a.id).unwrap(), updated);

    let err = h
        .manager
        .update(a.id, &request("11:00 01/01/2030", "12:30 01/01/2030", "a"), now)
        .unwrap_err();
    assert!(matches!(
        validation_error(err),
        ValidationError::Overlap { ref file_name, .. } if file_name == "b.mkv"
    ));

    let err = h
        .manager
        .update(999, &request("15:00 01/01/2030", "16:00 01/01/2030", "z"), now)
        .unwrap_err();
    assert!(matches!(err, ScheduleError::NotFound { id: 999 }));
}

#[test]
fn delete_archives_and_list_is_sorted_by_start() {
    let h = harness();
    let now = morning();
    let late = h
        .manager
        .create(&request("20:00 01/01/2030", "21:00 01/01/2030", "late"), now)
        .unwrap();
    let early = h
        .manager
        .create(&request("09:00 01/01/2030", "10:00 01/01/2030", "early"), now)
        .unwrap();

    let listed: Vec<i64> = h.manager.list().unwrap().iter().map(|s| s.id).collect();
    assert_eq!(listed, vec![early.id, late.id]);

    let removed = h.manager.delete(late.id, now).unwrap();
    assert_eq!(removed.file_name, "late.mkv");
    assert!(matches!(
        h.manager.get(late.id),
        Err(ScheduleError::NotFound { .. })
    ));

    let archive = h.history.list_all().unwrap();
    assert_eq!(archive.len(), 1);
    assert_eq!(archive[0].status, CompletionStatus::DeletedByUser);
    assert_eq!(archive[0].file_name, "late.mkv");
    assert!(!archive[0].was_triggered);

    assert!(matches!(
        h.manager.delete(late.id, now),
        Err(ScheduleError::NotFound { .. })
    ));
}
