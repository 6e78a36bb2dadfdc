use crate::helpers::{Process, at, raw_state, t0};
use chrono::Duration;
use fae_alerts::manager::{AlertStatus, AlertStore, DropReason};
use fae_alerts::{Alert, Recurrence};

fn temp_store() -> (tempfile::TempDir, AlertStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = AlertStore::new(dir.path().join("alerts.json"));
    (dir, store)
}

#[test]
fn crash_while_pending_surfaces_alert_as_missed() {
    let (_dir, store) = temp_store();

    let first = Process::start(&store, t0());
    first
        .manager
        .add(Alert::builder(at(Duration::days(2))).id("trip").build().unwrap())
        .unwrap();
    drop(first);

    let second = Process::start(&store, t0() + Duration::days(3));
    let report = second.manager.load().unwrap();

    assert_eq!(report.lapsed, vec!["trip".to_owned()]);
    assert!(report.rescheduled.is_empty());
    assert!(report.dropped.is_empty());
    assert_eq!(second.manager.get_status("trip"), Some(AlertStatus::Missed));
    assert!(second.manager.pending().is_empty());
    assert!(second.scheduler.is_empty());
    assert_eq!(second.fired(), 0);

    let state = raw_state(&store);
    assert!(state["missed"].get("trip").is_some());
    assert!(state["pending"].get("trip").is_none());
}

#[test]
fn shutdown_persists_unacknowledged_alert_as_missed() {
    let (_dir, store) = temp_store();

    let process = Process::start(&store, t0());
    process
        .manager
        .add(Alert::builder(at(Duration::hours(1))).id("tea").build().unwrap())
        .unwrap();
    process.clock.advance(Duration::hours(1));
    assert_eq!(process.fire_due(), 1);
    assert_eq!(process.manager.get_status("tea"), Some(AlertStatus::Active));

    process.manager.shutdown().unwrap();

    let state = raw_state(&store);
    let keys: Vec<&String> = state.as_object().unwrap().keys().collect();
    assert_eq!(keys.len(), 2);
    assert!(state["missed"].get("tea").is_some());
    assert!(state["pending"].get("tea").is_none());
    assert!(state.get("active").is_none());
}

#[test]
fn future_pending_alert_is_rescheduled_at_its_stored_instant() {
    let (_dir, store) = temp_store();

    let first = Process::start(&store, t0());
    first
        .manager
        .add(
            Alert::builder(at(Duration::days(1)))
                .id("dentist")
                .name("dentist")
                .priority(9)
                .build()
                .unwrap(),
        )
        .unwrap();
    first.manager.shutdown().unwrap();

    let second = Process::start(&store, t0() + Duration::hours(1));
    let report = second.manager.load().unwrap();
    assert_eq!(report.rescheduled, vec!["dentist".to_owned()]);
    assert_eq!(
        second.scheduler.registered_at("dentist"),
        Some(at(Duration::days(1)))
    );

    let (status, alert) = second.manager.get("dentist").unwrap();
    assert_eq!(status, AlertStatus::Pending);
    assert_eq!(alert.name(), "dentist");
    assert_eq!(alert.priority(), 9);
}

#[test]
fn recurring_alert_lapses_once_and_resumes_in_the_future() {
    let (_dir, store) = temp_store();

    let first = Process::start(&store, t0());
    first
        .manager
        .add(
            Alert::builder(at(Duration::hours(1)))
                .id("stretch")
                .recurrence(Recurrence::Frequency { secs: 3600 })
                .build()
                .unwrap(),
        )
        .unwrap();
    drop(first);

    let second = Process::start(&store, t0() + Duration::minutes(330));
    let report = second.manager.load().unwrap();

    assert_eq!(report.lapsed, vec!["stretch".to_owned()]);
    assert_eq!(report.rescheduled, vec!["stretch".to_owned()]);
    assert_eq!(
        second.scheduler.registered_at("stretch"),
        Some(at(Duration::hours(6)))
    );

    let snapshot = second.manager.snapshot();
    assert_eq!(
        snapshot.missed["stretch"].stored_expiration(),
        at(Duration::hours(1))
    );
    assert_eq!(
        snapshot.pending["stretch"].stored_expiration(),
        at(Duration::hours(6))
    );
    assert!(snapshot.active.is_empty());
    assert_eq!(second.fired(), 0);

    second.clock.advance(Duration::minutes(30));
    assert_eq!(second.fire_due(), 1);
    let snapshot = second.manager.snapshot();
    assert!(snapshot.active.contains_key("stretch"));
    assert_eq!(
        snapshot.missed["stretch"].stored_expiration(),
        at(Duration::hours(1))
    );
    assert_eq!(
        second.scheduler.registered_at("stretch"),
        Some(at(Duration::hours(7)))
    );
}

#[test]
fn exhausted_recurrence_is_reported_as_dropped() {
    let (_dir, store) = temp_store();

    let first = Process::start(&store, t0());
    first
        .manager
        .add(
            Alert::builder(at(Duration::hours(1)))
                .id("short")
                .recurrence(Recurrence::Frequency { secs: 3600 })
                .end_repeat(at(Duration::hours(3)))
                .build()
                .unwrap(),
        )
        .unwrap();
    drop(first);

    let second = Process::start(&store, t0() + Duration::hours(10));
    let report = second.manager.load().unwrap();

    assert_eq!(report.lapsed, vec!["short".to_owned()]);
    assert!(report.rescheduled.is_empty());
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(report.dropped[0].id, "short");
    assert_eq!(report.dropped[0].reason, DropReason::Exhausted);
    assert_eq!(second.manager.get_status("short"), Some(AlertStatus::Missed));
    assert!(second.scheduler.is_empty());
}

#[test]
fn undecodable_records_are_dropped_without_blocking_others() {
    let (_dir, store) = temp_store();
    let good = Alert::builder(at(Duration::hours(2)))
        .id("good")
        .build()
        .unwrap()
        .to_record();
    let state = serde_json::json!({
        "missed": {
            "naive": {
                "next_expiration_time": "2026-03-02T07:00:00",
                "alert_type": 0,
                "priority": 5,
                "alert_name": "naive",
                "context": {"ident": "naive"}
            }
        },
        "pending": {
            "good": good,
            "both": {
                "next_expiration_time": "2026-03-02T10:00:00+00:00",
                "alert_type": 1,
                "priority": 5,
                "repeat_frequency": 60,
                "repeat_days": [1],
                "alert_name": "both",
                "context": {"ident": "both"}
            }
        }
    });
    std::fs::write(store.path(), serde_json::to_vec(&state).unwrap()).unwrap();

    let process = Process::start(&store, t0());
    let report = process.manager.load().unwrap();

    assert_eq!(report.rescheduled, vec!["good".to_owned()]);
    let mut dropped: Vec<&str> = report.dropped.iter().map(|d| d.id.as_str()).collect();
    dropped.sort_unstable();
    assert_eq!(dropped, vec!["both", "naive"]);
    assert!(
        report
            .dropped
            .iter()
            .all(|d| matches!(d.reason, DropReason::Undecodable(_)))
    );

    let rewritten = raw_state(&store);
    assert!(rewritten["pending"].get("both").is_none());
    assert!(rewritten["missed"].get("naive").is_none());

    let bytes = std::fs::read(store.rejected_path()).unwrap();
    let set_aside: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(set_aside["pending"]["both"]["repeat_frequency"], 60);
    assert_eq!(
        set_aside["missed"]["naive"]["next_expiration_time"],
        "2026-03-02T07:00:00"
    );
}

#[test]
fn daily_alert_missed_earlier_survives_later_occurrences() {
    let (_dir, store) = temp_store();

    let process = Process::start(&store, t0());
    process
        .manager
        .add(
            Alert::builder(at(Duration::hours(1)))
                .id("daily")
                .recurrence(Recurrence::Frequency { secs: 86_400 })
                .build()
                .unwrap(),
        )
        .unwrap();
    process.clock.advance(Duration::hours(1));
    assert_eq!(process.fire_due(), 1);
    assert!(process.manager.make_missed("daily"));

    process.clock.advance(Duration::days(1));
    assert_eq!(process.fire_due(), 1);
    assert_eq!(
        process.manager.missed()["daily"].stored_expiration(),
        at(Duration::hours(1))
    );
    assert!(raw_state(&store)["missed"].get("daily").is_some());

    process.manager.shutdown().unwrap();
    let restarted = Process::start(&store, t0() + Duration::days(1) + Duration::hours(2));
    let report = restarted.manager.load().unwrap();
    assert_eq!(report.restored_missed, vec!["daily".to_owned()]);
}

#[test]
fn missed_alerts_survive_restart_until_cleared() {
    let (_dir, store) = temp_store();

    let first = Process::start(&store, t0());
    for id in ["a", "b"] {
        first
            .manager
            .add(Alert::builder(at(Duration::hours(1))).id(id).build().unwrap())
            .unwrap();
    }
    first.clock.advance(Duration::hours(1));
    first.fire_due();
    first.manager.shutdown().unwrap();

    let second = Process::start(&store, t0() + Duration::hours(2));
    let report = second.manager.load().unwrap();
    assert_eq!(report.restored_missed, vec!["a".to_owned(), "b".to_owned()]);
    assert!(second.manager.clear_missed("a"));
    drop(second);

    let third = Process::start(&store, t0() + Duration::hours(3));
    third.manager.load().unwrap();
    assert_eq!(third.manager.get_status("a"), None);
    assert_eq!(third.manager.get_status("b"), Some(AlertStatus::Missed));
}

#[test]
fn without_write_through_only_shutdown_persists() {
    let (_dir, store) = temp_store();

    let process = Process::start(&store, t0());
    let manager = process.manager.with_write_through(false);
    manager
        .add(Alert::builder(at(Duration::hours(1))).id("quiet").build().unwrap())
        .unwrap();
    assert!(!store.path().exists());

    manager.shutdown().unwrap();
    assert!(raw_state(&store)["pending"].get("quiet").is_some());
}

#[test]
fn corrupt_state_file_fails_load() {
    let (_dir, store) = temp_store();
    std::fs::write(store.path(), "{ nope").unwrap();
    let process = Process::start(&store, t0());
    assert!(process.manager.load().is_err());
}
