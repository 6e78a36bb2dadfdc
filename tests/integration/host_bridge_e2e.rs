use chrono::{Duration, SecondsFormat, SubsecRound, Utc};
use fae_alerts::Alert;
use fae_alerts::config::AlertDefaults;
use fae_alerts::host::contract::{EVENT_ALERT_EXPIRED, EventEnvelope};
use fae_alerts::host::handler::{ManagerCommandHandler, broadcast_expired};
use fae_alerts::host::stdio::run_bridge;
use fae_alerts::manager::{AlertManager, AlertStatus, AlertStore};
use fae_alerts::scheduling::TokioScheduler;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::sync::{broadcast, mpsc};

const WAIT: std::time::Duration = std::time::Duration::from_secs(5);

struct Session {
    input: DuplexStream,
    output: Lines<BufReader<DuplexStream>>,
    bridge: tokio::task::JoinHandle<fae_alerts::Result<()>>,
    manager: Arc<AlertManager>,
}

impl Session {
    fn start(store: AlertStore) -> Self {
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = broadcast::channel::<EventEnvelope>(16);
        let scheduler = Arc::new(TokioScheduler::new(fire_tx).expect("inside runtime"));
        let manager = Arc::new(
            AlertManager::new(scheduler, broadcast_expired(event_tx)).with_store(store),
        );
        manager.load().expect("load state");
        manager.spawn_fire_loop(fire_rx);
        Self::attach(manager, events)
    }

    /// Start a bridge over an existing manager and event subscription.
    fn attach(manager: Arc<AlertManager>, events: broadcast::Receiver<EventEnvelope>) -> Self {
        let handler = ManagerCommandHandler::new(Arc::clone(&manager), AlertDefaults::default());
        let (input, bridge_in) = tokio::io::duplex(16 * 1024);
        let (bridge_out, output) = tokio::io::duplex(16 * 1024);
        let bridge = tokio::spawn(run_bridge(
            BufReader::new(bridge_in),
            bridge_out,
            handler,
            events,
        ));

        Self {
            input,
            output: BufReader::new(output).lines(),
            bridge,
            manager,
        }
    }

    async fn send(&mut self, line: serde_json::Value) {
        let mut raw = serde_json::to_string(&line).unwrap();
        raw.push('\n');
        self.input.write_all(raw.as_bytes()).await.unwrap();
    }

    async fn next(&mut self) -> serde_json::Value {
        let line = tokio::time::timeout(WAIT, self.output.next_line())
            .await
            .expect("bridge answered in time")
            .unwrap()
            .expect("bridge output open");
        serde_json::from_str(&line).unwrap()
    }

    async fn request(
        &mut self,
        request_id: &str,
        command: &str,
        payload: serde_json::Value,
    ) -> serde_json::Value {
        self.send(serde_json::json!({
            "v": 1,
            "request_id": request_id,
            "command": command,
            "payload": payload,
        }))
        .await;
        let response = self.next().await;
        assert_eq!(response["request_id"], request_id);
        response
    }
}

fn in_secs(secs: i64) -> String {
    (Utc::now().trunc_subsecs(0) + Duration::seconds(secs))
        .fixed_offset()
        .to_rfc3339_opts(SecondsFormat::Secs, false)
}

#[tokio::test]
async fn add_fire_and_dismiss_over_the_bridge() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::start(AlertStore::new(dir.path().join("alerts.json")));

    let added = session
        .request(
            "add-1",
            "alerts.add",
            serde_json::json!({
                "expiration": in_secs(2),
                "id": "pasta",
                "kind": "timer",
                "name": "pasta"
            }),
        )
        .await;
    assert_eq!(added["ok"], true);
    assert_eq!(added["payload"]["id"], "pasta");

    let status = session
        .request("st-1", "alerts.status", serde_json::json!({"id": "pasta"}))
        .await;
    assert_eq!(status["payload"]["status"], "pending");

    let event = session.next().await;
    assert_eq!(event["event"], EVENT_ALERT_EXPIRED);
    assert_eq!(event["payload"]["id"], "pasta");
    assert_eq!(event["payload"]["kind"], "timer");

    let dismissed = session
        .request("d-1", "alerts.dismiss", serde_json::json!({"id": "pasta"}))
        .await;
    assert_eq!(dismissed["ok"], true);
    assert_eq!(session.manager.get_status("pasta"), None);

    let again = session
        .request("d-2", "alerts.dismiss", serde_json::json!({"id": "pasta"}))
        .await;
    assert_eq!(again["ok"], false);

    let stop = session
        .request("stop", "runtime.stop", serde_json::json!({}))
        .await;
    assert_eq!(stop["ok"], true);
    session.bridge.await.unwrap().unwrap();
}

#[tokio::test]
async fn invalid_requests_get_error_envelopes() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::start(AlertStore::new(dir.path().join("alerts.json")));

    let naive = session
        .request(
            "bad-1",
            "alerts.add",
            serde_json::json!({"expiration": "2030-01-01T09:00:00"}),
        )
        .await;
    assert_eq!(naive["ok"], false);
    assert!(
        naive["error"]
            .as_str()
            .unwrap()
            .contains("no UTC offset")
    );

    let past = session
        .request(
            "bad-2",
            "alerts.add",
            serde_json::json!({"expiration": "2020-01-01T09:00:00+00:00"}),
        )
        .await;
    assert_eq!(past["ok"], false);

    let unknown = session
        .request("bad-3", "alerts.remove", serde_json::json!({"id": "ghost"}))
        .await;
    assert_eq!(unknown["ok"], false);

    session.input.write_all(b"{not json}\n").await.unwrap();
    let parse_error = session.next().await;
    assert_eq!(parse_error["request_id"], "parse-error");

    drop(session.input);
    session.bridge.await.unwrap().unwrap();
}

#[tokio::test]
async fn list_and_clear_missed_after_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let store = AlertStore::new(dir.path().join("alerts.json"));

    let mut first = Session::start(store.clone());
    first
        .request(
            "add",
            "alerts.add",
            serde_json::json!({"expiration": in_secs(2), "id": "call", "user": "ana"}),
        )
        .await;
    let event = first.next().await;
    assert_eq!(event["event"], EVENT_ALERT_EXPIRED);
    first
        .request("stop", "runtime.stop", serde_json::json!({}))
        .await;
    first.bridge.await.unwrap().unwrap();
    first.manager.shutdown().unwrap();

    let mut second = Session::start(store);
    let listed = second
        .request("ls", "alerts.list", serde_json::json!({"user": "ana"}))
        .await;
    let alerts = listed["payload"]["alerts"].as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["id"], "call");
    assert_eq!(alerts[0]["status"], "missed");

    let cleared = second
        .request("clr", "alerts.clear_missed", serde_json::json!({}))
        .await;
    assert_eq!(cleared["payload"]["cleared"], 1);

    let listed = second
        .request("ls-2", "alerts.list", serde_json::Value::Null)
        .await;
    assert!(listed["payload"]["alerts"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn expiry_before_the_bridge_runs_is_still_written() {
    let (fire_tx, fire_rx) = mpsc::unbounded_channel();
    let (event_tx, events) = broadcast::channel::<EventEnvelope>(16);
    let scheduler = Arc::new(TokioScheduler::new(fire_tx).expect("inside runtime"));
    let manager = Arc::new(AlertManager::new(scheduler, broadcast_expired(event_tx)));
    manager.spawn_fire_loop(fire_rx);

    let due = (Utc::now() + Duration::seconds(1)).fixed_offset();
    manager
        .add(Alert::builder(due).id("overnight").build().unwrap())
        .unwrap();
    tokio::time::timeout(WAIT, async {
        while manager.get_status("overnight") != Some(AlertStatus::Active) {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("alert fired before the bridge started");

    let mut session = Session::attach(manager, events);
    let event = session.next().await;
    assert_eq!(event["event"], EVENT_ALERT_EXPIRED);
    assert_eq!(event["payload"]["id"], "overnight");

    drop(session.input);
    session.bridge.await.unwrap().unwrap();
}
