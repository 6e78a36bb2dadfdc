use chrono::{DateTime, Duration, FixedOffset, SubsecRound, Utc};
use fae_alerts::manager::{AlertManager, AlertStatus};
use fae_alerts::scheduling::{FireEvent, TokioScheduler};
use fae_alerts::{Alert, Recurrence};
use std::sync::Arc;
use tokio::sync::mpsc;

const WAIT: std::time::Duration = std::time::Duration::from_secs(5);

fn soon(secs: i64) -> DateTime<FixedOffset> {
    (Utc::now().trunc_subsecs(0) + Duration::seconds(secs)).fixed_offset()
}

type Parts = (
    Arc<AlertManager>,
    Arc<TokioScheduler>,
    mpsc::UnboundedReceiver<FireEvent>,
    mpsc::UnboundedReceiver<String>,
);

/// Manager on live timers whose fire loop has not been started yet.
fn idle_manager() -> Parts {
    let (fire_tx, fire_rx) = mpsc::unbounded_channel();
    let (expired_tx, expired_rx) = mpsc::unbounded_channel();
    let scheduler = Arc::new(TokioScheduler::new(fire_tx).expect("inside runtime"));
    let manager = Arc::new(AlertManager::new(
        scheduler.clone(),
        Box::new(move |alert: &Alert| {
            let _ = expired_tx.send(alert.id().to_owned());
        }),
    ));
    (manager, scheduler, fire_rx, expired_rx)
}

fn live_manager() -> (
    Arc<AlertManager>,
    Arc<TokioScheduler>,
    mpsc::UnboundedReceiver<String>,
) {
    let (manager, scheduler, fire_rx, expired_rx) = idle_manager();
    manager.spawn_fire_loop(fire_rx);
    (manager, scheduler, expired_rx)
}

/// Wait until the timer for `id` has elapsed and handed off its event.
async fn wait_until_handed_off(scheduler: &TokioScheduler, id: &str) {
    tokio::time::timeout(WAIT, async {
        while scheduler.is_registered(id) {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timer elapsed in time");
}

#[tokio::test]
async fn one_shot_fires_once_and_becomes_active() {
    let (manager, scheduler, mut expired) = live_manager();
    manager
        .add(Alert::builder(soon(2)).id("kettle").build().unwrap())
        .unwrap();
    assert!(scheduler.is_registered("kettle"));

    let id = tokio::time::timeout(WAIT, expired.recv())
        .await
        .expect("fired in time")
        .expect("callback channel open");
    assert_eq!(id, "kettle");
    assert_eq!(manager.get_status("kettle"), Some(AlertStatus::Active));
    assert_eq!(scheduler.pending_timers(), 0);

    assert!(manager.dismiss("kettle"));
    assert_eq!(manager.get_status("kettle"), None);
}

#[tokio::test]
async fn recurring_alert_keeps_firing_until_removed() {
    let (manager, scheduler, mut expired) = live_manager();
    manager
        .add(
            Alert::builder(soon(1))
                .id("tick")
                .recurrence(Recurrence::Frequency { secs: 1 })
                .build()
                .unwrap(),
        )
        .unwrap();

    for _ in 0..2 {
        let id = tokio::time::timeout(WAIT, expired.recv())
            .await
            .expect("fired in time")
            .expect("callback channel open");
        assert_eq!(id, "tick");
    }
    assert!(scheduler.is_registered("tick"));

    assert!(manager.remove("tick"));
    assert!(!scheduler.is_registered("tick"));
    assert!(manager.pending().is_empty());
}

#[tokio::test]
async fn removed_alert_never_fires() {
    let (manager, scheduler, mut expired) = live_manager();
    manager
        .add(Alert::builder(soon(1)).id("cancelled").build().unwrap())
        .unwrap();
    assert!(manager.remove("cancelled"));
    assert_eq!(scheduler.pending_timers(), 0);

    let outcome = tokio::time::timeout(std::time::Duration::from_secs(2), expired.recv()).await;
    assert!(outcome.is_err(), "removed alert fired");
    assert_eq!(manager.get_status("cancelled"), None);
}

#[tokio::test]
async fn removal_after_hand_off_suppresses_the_fire() {
    let (manager, scheduler, fire_rx, mut expired) = idle_manager();
    manager
        .add(Alert::builder(soon(1)).id("x").build().unwrap())
        .unwrap();
    wait_until_handed_off(&scheduler, "x").await;

    assert!(manager.remove("x"));
    manager.spawn_fire_loop(fire_rx);

    let outcome = tokio::time::timeout(std::time::Duration::from_millis(500), expired.recv()).await;
    assert!(outcome.is_err(), "removed alert fired");
    assert_eq!(manager.get_status("x"), None);
}

#[tokio::test]
async fn replacement_survives_a_handed_off_fire() {
    let (manager, scheduler, fire_rx, mut expired) = idle_manager();
    manager
        .add(Alert::builder(soon(1)).id("x").build().unwrap())
        .unwrap();
    wait_until_handed_off(&scheduler, "x").await;

    let later = soon(3600);
    manager
        .add(Alert::builder(later).id("x").build().unwrap())
        .unwrap();
    manager.spawn_fire_loop(fire_rx);

    let outcome = tokio::time::timeout(std::time::Duration::from_millis(500), expired.recv()).await;
    assert!(outcome.is_err(), "stale registration fired");
    assert_eq!(manager.get_status("x"), Some(AlertStatus::Pending));
    assert_eq!(manager.pending()["x"].stored_expiration(), later);
    assert!(scheduler.is_registered("x"));
}

