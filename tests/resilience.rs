use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use vigil::*;

/// Server state shared between a test and its driver
#[derive(Debug, Default)]
struct Server {
    online: bool,
    connects: u32,
    disconnects: u32,
    subscriptions: Vec<String>,
    values: HashMap<String, Value>,
    denied: Vec<String>,
    heartbeat_fails: bool,
    /// Server-side acknowledgments as (address, event id, comment)
    acks: Vec<(String, String, String)>,
    acks_refused: bool,
}

#[derive(Clone)]
struct ScriptedDriver {
    server: Arc<Mutex<Server>>,
    connected: bool,
}

#[async_trait]
impl ProtocolDriver for ScriptedDriver {
    async fn connect(&mut self) -> Result<()> {
        let mut server = self.server.lock().unwrap();
        server.connects += 1;
        if !server.online {
            return Err(MonitorError::Connection("connection refused".into()));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.server.lock().unwrap().disconnects += 1;
        self.connected = false;
        Ok(())
    }

    async fn subscribe(&mut self, address: &str, _interval: Duration) -> Result<()> {
        let mut server = self.server.lock().unwrap();
        if server.denied.iter().any(|d| d == address) {
            return Err(MonitorError::AccessDenied(address.into()));
        }
        server.subscriptions.push(address.to_string());
        Ok(())
    }

    async fn read_value(&mut self, address: &str) -> Result<Value> {
        let server = self.server.lock().unwrap();
        if !server.online || !self.connected {
            return Err(MonitorError::Connection("link down".into()));
        }
        if address == "i=1008" {
            if server.heartbeat_fails {
                return Err(MonitorError::Connection("heartbeat timeout".into()));
            }
            return Ok(Value::Int(0));
        }
        server
            .values
            .get(address)
            .cloned()
            .ok_or_else(|| MonitorError::protocol(address, "no such node"))
    }

    async fn acknowledge(&mut self, address: &str, event_id: &str, comment: &str) -> Result<()> {
        let mut server = self.server.lock().unwrap();
        if server.acks_refused {
            return Err(MonitorError::protocol(address, "BadMethodInvalid"));
        }
        server.acks.push((address.to_string(), event_id.to_string(), comment.to_string()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn protocol_name(&self) -> &'static str {
        "scripted"
    }
}

struct Harness {
    _dir: TempDir,
    config_path: PathBuf,
    server: Arc<Mutex<Server>>,
    samples: mpsc::Sender<RawSample>,
    handle: MonitorHandle,
    task: JoinHandle<()>,
}

fn harness() -> Harness {
    harness_with(r#"{"maxRetries": 3, "retryDelayMs": 3000}"#)
}

fn harness_with(connection: &str) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = Config::from_json(&format!(
        r#"{{
            "sensors": [
                {{"name": "Temp1", "nodeId": "ns=3;i=1001", "deadband": 2, "scanRate": 1000,
                 "alarms": {{"high": 80}}}},
                {{"name": "Level", "nodeId": "ns=3;i=1002", "scanRate": 1000,
                 "alarms": {{"low": 10}}}}
            ],
            "connection": {}
        }}"#,
        connection
    ))
    .unwrap();
    config.history.directory = dir.path().join("history");

    let config_path = dir.path().join("config.json");
    std::fs::write(&config_path, serde_json::to_string(&config).unwrap()).unwrap();

    let server = Arc::new(Mutex::new(Server {
        online: true,
        values: HashMap::from([
            ("ns=3;i=1001".to_string(), Value::Float(20.0)),
            ("ns=3;i=1002".to_string(), Value::Text("offline".into())),
        ]),
        ..Default::default()
    }));
    let driver = ScriptedDriver {
        server: server.clone(),
        connected: false,
    };

    let (notifier, _dashboard) = DashboardNotifier::channel(16);
    let (samples, sample_rx) = mpsc::channel(64);
    let session = MonitoringSession::new(config, notifier);
    let (monitor, handle) = Monitor::new(session, &config_path, driver, sample_rx);
    let task = tokio::spawn(monitor.run());

    Harness {
        _dir: dir,
        config_path,
        server,
        samples,
        handle,
        task,
    }
}

fn sample(value: f64, secs: i64) -> RawSample {
    RawSample::new("ns=3;i=1001", value).at(Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap())
}

async fn wait_for_status(handle: &MonitorHandle, expected: MonitorStatus) {
    let mut status = handle.subscribe_status();
    status.wait_for(|s| *s == expected).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_start_subscribes_and_reads_initial_values() {
    let h = harness();
    let path = h.handle.start_monitoring().await.unwrap();
    assert!(path.starts_with(h._dir.path().join("history")));
    assert_eq!(h.handle.status(), MonitorStatus::Monitoring { history_file: path });

    let server = h.server.lock().unwrap();
    assert_eq!(server.connects, 1);
    assert_eq!(server.subscriptions, vec!["ns=3;i=1001", "ns=3;i=1002"]);
}

#[tokio::test(start_paused = true)]
async fn test_samples_raise_alarms_visible_to_commands() {
    let h = harness();
    let path = h.handle.start_monitoring().await.unwrap();

    h.samples.send(sample(79.0, 0)).await.unwrap();
    h.samples.send(sample(80.0, 1)).await.unwrap();

    let alarms = h.handle.alarms().await.unwrap();
    assert_eq!(alarms.len(), 1);
    assert_eq!(alarms[0].value, "80.00");
    assert!(path.exists());

    h.handle.acknowledge_alarm(0).await.unwrap();
    assert!(matches!(
        h.handle.acknowledge_alarm(0).await,
        Err(MonitorError::AlreadyAcknowledged(0))
    ));
    assert!(matches!(
        h.handle.acknowledge_alarm(7).await,
        Err(MonitorError::AlarmNotFound(7))
    ));

    h.handle.set_decimal_precision(1).await.unwrap();
    h.samples.send(sample(70.0, 2)).await.unwrap();
    h.samples.send(sample(85.0, 3)).await.unwrap();
    let alarms = h.handle.alarms().await.unwrap();
    assert_eq!(alarms.len(), 2);
    assert!(!alarms[0].active);
    assert_eq!(alarms[0].duration, Some(1.0));
    assert_eq!(alarms[1].value, "85.0");

    let csv = h.handle.export_csv().await.unwrap().unwrap();
    assert_eq!(csv, path.with_extension("csv"));
}

#[tokio::test(start_paused = true)]
async fn test_reload_refused_while_monitoring() {
    let h = harness();
    h.handle.start_monitoring().await.unwrap();
    assert!(matches!(
        h.handle.reload_configuration().await,
        Err(MonitorError::SessionActive)
    ));
    assert!(matches!(
        h.handle.start_monitoring().await,
        Err(MonitorError::SessionActive)
    ));

    assert!(h.handle.stop_monitoring().await.unwrap());
    wait_for_status(&h.handle, MonitorStatus::Finished(SessionOutcome::Stopped)).await;
    assert!(!h.handle.stop_monitoring().await.unwrap());
    assert_eq!(h.handle.reload_configuration().await.unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_reload_keeps_state() {
    let h = harness();
    h.handle.start_monitoring().await.unwrap();
    h.samples.send(sample(90.0, 0)).await.unwrap();
    h.handle.stop_monitoring().await.unwrap();

    std::fs::write(&h.config_path, "{ not json").unwrap();
    assert!(matches!(
        h.handle.reload_configuration().await,
        Err(MonitorError::Config(_))
    ));
    assert_eq!(h.handle.alarms().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_fails_when_server_unreachable() {
    let h = harness();
    h.server.lock().unwrap().online = false;

    let err = h.handle.start_monitoring().await.unwrap_err();
    assert!(matches!(err, MonitorError::ConnectionExhausted { attempts: 3 }));
    assert_eq!(h.server.lock().unwrap().connects, 3);
    assert_eq!(h.handle.status(), MonitorStatus::Idle);

    // The monitor is still serving commands
    assert!(h.handle.alarms().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_lost_link_exhausts_reconnect_and_ends_session() {
    let h = harness();
    let path = h.handle.start_monitoring().await.unwrap();
    h.samples.send(sample(95.0, 0)).await.unwrap();
    assert_eq!(h.handle.alarms().await.unwrap().len(), 1);

    h.server.lock().unwrap().online = false;
    wait_for_status(
        &h.handle,
        MonitorStatus::Finished(SessionOutcome::ConnectionExhausted),
    )
    .await;

    let server = h.server.lock().unwrap();
    // One initial connect plus a three-attempt reconnect run
    assert_eq!(server.connects, 4);
    assert!(server.disconnects >= 2);
    drop(server);

    let saved = HistoryStore::new(path).load().unwrap();
    assert_eq!(saved.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_resubscribes() {
    let h = harness();
    h.handle.start_monitoring().await.unwrap();

    h.server.lock().unwrap().online = false;
    wait_for_status(&h.handle, MonitorStatus::Reconnecting).await;
    h.server.lock().unwrap().online = true;

    let mut status = h.handle.subscribe_status();
    status
        .wait_for(|s| matches!(s, MonitorStatus::Monitoring { .. }))
        .await
        .unwrap();

    let server = h.server.lock().unwrap();
    assert_eq!(server.subscriptions.len(), 4);
    assert!(server.connects >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_failing_heartbeat_inside_cooldown_does_not_reconnect() {
    // A zero cooldown is raised to the 2 s minimum
    let h = harness_with(r#"{"maxRetries": 3, "retryDelayMs": 3000, "reconnectCooldownMs": 0}"#);
    h.handle.start_monitoring().await.unwrap();
    h.server.lock().unwrap().heartbeat_fails = true;

    // Heartbeats at 1 s and 2 s: the first reconnects, the second is inside the cooldown
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(h.server.lock().unwrap().connects, 2);

    tokio::time::sleep(Duration::from_millis(2000)).await;
    let server = h.server.lock().unwrap();
    assert_eq!(server.connects, 3);
    assert_eq!(server.disconnects, 2);
}

#[tokio::test(start_paused = true)]
async fn test_acknowledge_reaches_server() {
    let h = harness();
    h.handle.start_monitoring().await.unwrap();
    h.samples.send(sample(90.0, 0)).await.unwrap();

    h.handle.acknowledge_alarm(0).await.unwrap();
    let alarms = h.handle.alarms().await.unwrap();
    assert!(alarms[0].acknowledged);

    let server = h.server.lock().unwrap();
    assert_eq!(server.acks.len(), 1);
    let (address, event_id, _) = &server.acks[0];
    assert_eq!(address, "ns=3;i=1001");
    assert_eq!(*event_id, alarms[0].timestamp.to_rfc3339());
}

#[tokio::test(start_paused = true)]
async fn test_refused_server_acknowledge_still_marks_locally() {
    let h = harness();
    h.handle.start_monitoring().await.unwrap();
    h.samples.send(sample(90.0, 0)).await.unwrap();
    h.server.lock().unwrap().acks_refused = true;

    h.handle.acknowledge_alarm(0).await.unwrap();
    assert!(h.handle.alarms().await.unwrap()[0].acknowledged);

    // Invalid requests never reach the server
    assert!(h.handle.acknowledge_alarm(0).await.is_err());
    assert!(h.handle.acknowledge_alarm(5).await.is_err());
    assert!(h.server.lock().unwrap().acks.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_precision_out_of_range_keeps_monitor_alive() {
    let h = harness();
    h.handle.start_monitoring().await.unwrap();
    h.handle.set_decimal_precision(1).await.unwrap();
    assert!(matches!(
        h.handle.set_decimal_precision(70_000).await,
        Err(MonitorError::Config(_))
    ));

    h.samples.send(sample(85.0, 0)).await.unwrap();
    let alarms = h.handle.alarms().await.unwrap();
    assert_eq!(alarms[0].value, "85.0");
}

#[tokio::test(start_paused = true)]
async fn test_subscription_denied_skips_sensor() {
    let h = harness();
    h.server.lock().unwrap().denied.push("ns=3;i=1002".to_string());
    h.handle.start_monitoring().await.unwrap();
    assert_eq!(h.server.lock().unwrap().subscriptions, vec!["ns=3;i=1001"]);
}

#[tokio::test(start_paused = true)]
async fn test_exit_and_shutdown() {
    let h = harness();
    h.handle.start_monitoring().await.unwrap();
    h.handle.shutdown();
    h.task.await.unwrap();
    assert_eq!(h.handle.status(), MonitorStatus::Exited);
    assert!(matches!(h.handle.alarms().await, Err(MonitorError::ChannelClosed)));

    let h = harness();
    h.handle.exit().await.unwrap();
    h.task.await.unwrap();
    assert_eq!(h.handle.status(), MonitorStatus::Exited);
}
