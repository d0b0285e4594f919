use api_contract::{ConnectorRunStatus, SetupConnectorRequest};
use async_trait::async_trait;
use domain::Reading;
use pdm_ingest::{ConnectorSupervisor, SupervisorError};
use pdm_protocol::{
    ConnectorConfig, ConnectorFactory, ConnectorState, ConnectorTimeouts, ConnectorType,
    ProtocolError, ReadingHandler, RegisterClient, RegisterEndpoint, RegisterTransport,
};
use serde_json::{Map, Value, json};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct RecordingHandler {
    readings: Mutex<Vec<Reading>>,
    closed: Mutex<Vec<String>>,
}

impl RecordingHandler {
    fn count_for(&self, equipment_id: &str) -> usize {
        self.readings
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.equipment_id == equipment_id)
            .count()
    }
}

#[async_trait]
impl ReadingHandler for RecordingHandler {
    async fn handle(&self, reading: Reading) -> Result<(), ProtocolError> {
        self.readings.lock().unwrap().push(reading);
        Ok(())
    }

    async fn stream_closed(&self, equipment_id: &str) {
        self.closed.lock().unwrap().push(equipment_id.to_string());
    }
}

/// 每条读数阻塞 3 秒。
#[derive(Default)]
struct StalledHandler {
    calls: AtomicUsize,
}

#[async_trait]
impl ReadingHandler for StalledHandler {
    async fn handle(&self, _: Reading) -> Result<(), ProtocolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3)).await;
        Ok(())
    }
}

/// 固定返回 `[0x447A, 0x0000]` 的寄存器传输。
struct FixedRegisters;

struct FixedClient;

#[async_trait]
impl RegisterClient for FixedClient {
    async fn read_holding_registers(&mut self, _: u16, _: u16) -> Result<Vec<u16>, ProtocolError> {
        Ok(vec![0x447A, 0x0000])
    }

    async fn read_input_registers(&mut self, _: u16, _: u16) -> Result<Vec<u16>, ProtocolError> {
        Ok(vec![0x447A, 0x0000])
    }

    async fn read_coils(&mut self, _: u16, _: u16) -> Result<Vec<bool>, ProtocolError> {
        Ok(vec![true])
    }

    async fn read_discrete_inputs(&mut self, _: u16, _: u16) -> Result<Vec<bool>, ProtocolError> {
        Ok(vec![false])
    }
}

#[async_trait]
impl RegisterTransport for FixedRegisters {
    async fn open(&self, _: &RegisterEndpoint) -> Result<Box<dyn RegisterClient>, ProtocolError> {
        Ok(Box::new(FixedClient))
    }
}

/// 建连耗时 1.5 秒的寄存器传输。
struct SlowRegisters;

#[async_trait]
impl RegisterTransport for SlowRegisters {
    async fn open(&self, _: &RegisterEndpoint) -> Result<Box<dyn RegisterClient>, ProtocolError> {
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        Ok(Box::new(FixedClient))
    }
}

fn csv_fixture() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(file, "timestamp,temperature,vibration").expect("write");
    writeln!(file, "2024-01-01 00:00:00,70.5,2.1").expect("write");
    writeln!(file, "2024-01-01 00:00:05,71.0,2.3").expect("write");
    file
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn file_config(equipment_id: &str, path: &std::path::Path) -> ConnectorConfig {
    ConnectorConfig::from_parts(
        equipment_id,
        "file",
        &object(json!({ "polling_interval_seconds": 1 })),
        &object(json!({ "file_path": path.to_string_lossy() })),
    )
    .expect("file config")
}

fn registers_config(equipment_id: &str) -> ConnectorConfig {
    ConnectorConfig::from_parts(
        equipment_id,
        "modbus",
        &object(json!({ "interval": 1 })),
        &object(json!({
            "host": "plc.local",
            "registers": {
                "pressure": { "type": "holding", "address": 0, "count": 2, "data_type": "float32" }
            }
        })),
    )
    .expect("registers config")
}

fn supervisor(handler: Arc<RecordingHandler>) -> ConnectorSupervisor {
    let factory = ConnectorFactory::default().with_register_transport(Arc::new(FixedRegisters));
    ConnectorSupervisor::new(factory, handler)
}

#[tokio::test]
async fn second_setup_replaces_first_connector() {
    let fixture = csv_fixture();
    let handler = Arc::new(RecordingHandler::default());
    let supervisor = supervisor(handler.clone());

    let first = supervisor
        .setup(file_config("PUMP-001", fixture.path()))
        .await
        .expect("file setup");
    assert_eq!(first.state(), ConnectorState::Polling);

    let second = supervisor
        .setup(registers_config("PUMP-001"))
        .await
        .expect("registers setup");

    let entries = supervisor.list().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].equipment_id, "PUMP-001");
    assert_eq!(entries[0].connector_type, ConnectorType::Registers);
    assert_eq!(first.state(), ConnectorState::Stopped);
    assert_eq!(second.state(), ConnectorState::Polling);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let last = second.last_reading().expect("register reading");
    assert_eq!(last.numeric("pressure"), Some(1000.0));
    assert_eq!(*handler.closed.lock().unwrap(), vec!["PUMP-001".to_string()]);

    supervisor.stop("PUMP-001").await.expect("stop");
    assert_eq!(handler.closed.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn no_callbacks_after_stop() {
    let fixture = csv_fixture();
    let handler = Arc::new(RecordingHandler::default());
    let supervisor = supervisor(handler.clone());

    supervisor
        .setup(file_config("FAN-2", fixture.path()))
        .await
        .expect("setup");
    tokio::time::sleep(Duration::from_millis(1_300)).await;
    assert!(handler.count_for("FAN-2") >= 1);

    supervisor.stop("FAN-2").await.expect("stop");
    let after_stop = handler.count_for("FAN-2");
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert_eq!(handler.count_for("FAN-2"), after_stop);
    assert!(supervisor.status("FAN-2").await.is_none());
}

#[tokio::test]
async fn failed_connect_is_not_registered() {
    let handler = Arc::new(RecordingHandler::default());
    let supervisor = supervisor(handler);

    let err = supervisor
        .setup(file_config("PUMP-404", std::path::Path::new("/nonexistent/pump.csv")))
        .await
        .err()
        .expect("missing file must fail");
    assert!(matches!(err, SupervisorError::Connection(_)));
    assert!(supervisor.list().await.is_empty());
}

#[tokio::test]
async fn failed_replacement_leaves_no_stale_entry() {
    let fixture = csv_fixture();
    let handler = Arc::new(RecordingHandler::default());
    let supervisor = supervisor(handler);

    let first = supervisor
        .setup(file_config("PUMP-001", fixture.path()))
        .await
        .expect("setup");
    let err = supervisor
        .setup(file_config("PUMP-001", std::path::Path::new("/nonexistent/pump.csv")))
        .await
        .err()
        .expect("replacement must fail");
    assert!(matches!(err, SupervisorError::Connection(_)));
    assert_eq!(first.state(), ConnectorState::Stopped);
    assert!(supervisor.status("PUMP-001").await.is_none());
}

#[tokio::test]
async fn stop_unknown_equipment_is_not_found() {
    let supervisor = supervisor(Arc::new(RecordingHandler::default()));
    let err = supervisor.stop("GHOST").await.unwrap_err();
    assert!(matches!(err, SupervisorError::NotFound(ref id) if id == "GHOST"));
    assert_eq!(err.code(), "CONNECTOR.NOT_FOUND");
}

#[tokio::test]
async fn request_helpers_follow_the_api_contract() {
    let fixture = csv_fixture();
    let supervisor = supervisor(Arc::new(RecordingHandler::default()));

    let request: SetupConnectorRequest = serde_json::from_value(json!({
        "equipmentId": "PUMP-007",
        "connector_type": "csv",
        "config": { "polling_interval_seconds": 2 },
        "connection_params": { "file_path": fixture.path().to_string_lossy() }
    }))
    .expect("request");
    let response = supervisor.setup_request(&request).await.expect("setup");
    assert_eq!(response.equipment_id, "PUMP-007");
    assert_eq!(response.connector_type, "file");
    assert_eq!(response.status, ConnectorRunStatus::Running);

    let summaries = supervisor.summaries().await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].status, ConnectorRunStatus::Running);

    let stopped = supervisor.stop_request("PUMP-007").await.expect("stop");
    assert_eq!(stopped.status, ConnectorRunStatus::Stopped);

    let bad: SetupConnectorRequest = serde_json::from_value(json!({
        "equipment_id": "PUMP-008",
        "connector_type": "bacnet"
    }))
    .expect("request");
    let err = supervisor.setup_request(&bad).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Config(_)));
    assert_eq!(err.code(), "CONNECTOR.CONFIG");
}

#[tokio::test]
async fn stop_all_drains_registry_sorted() {
    let fixture = csv_fixture();
    let supervisor = supervisor(Arc::new(RecordingHandler::default()));
    for id in ["PUMP-B", "PUMP-A", "PUMP-C"] {
        supervisor
            .setup(file_config(id, fixture.path()))
            .await
            .expect("setup");
    }
    let ids: Vec<String> = supervisor
        .list()
        .await
        .into_iter()
        .map(|status| status.equipment_id)
        .collect();
    assert_eq!(ids, vec!["PUMP-A", "PUMP-B", "PUMP-C"]);

    assert_eq!(supervisor.stop_all().await, 3);
    assert!(supervisor.list().await.is_empty());
}

#[tokio::test]
async fn stop_reports_shutdown_timeout_and_still_deregisters() {
    let fixture = csv_fixture();
    let handler = Arc::new(StalledHandler::default());
    let factory = ConnectorFactory::new(ConnectorTimeouts::new(
        Duration::from_secs(1),
        Duration::from_secs(1),
        Duration::from_millis(200),
    ));
    let supervisor = ConnectorSupervisor::new(factory, handler.clone());

    let connector = supervisor
        .setup(file_config("MIXER-3", fixture.path()))
        .await
        .expect("setup");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

    let started = Instant::now();
    let err = supervisor.stop("MIXER-3").await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(matches!(
        err,
        SupervisorError::ShutdownTimeout { ref equipment_id, timeout }
            if equipment_id == "MIXER-3" && timeout == Duration::from_millis(200)
    ));
    assert_eq!(err.code(), "CONNECTOR.SHUTDOWN_TIMEOUT");
    assert!(supervisor.list().await.is_empty());
    assert_eq!(connector.state(), ConnectorState::Stopped);

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn slow_connect_does_not_block_other_equipment() {
    let fixture = csv_fixture();
    let factory = ConnectorFactory::default().with_register_transport(Arc::new(SlowRegisters));
    let supervisor = Arc::new(ConnectorSupervisor::new(
        factory,
        Arc::new(RecordingHandler::default()),
    ));

    let slow = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move { supervisor.setup(registers_config("SLOW")).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let listed = tokio::time::timeout(Duration::from_millis(300), supervisor.list())
        .await
        .expect("list must not wait for another equipment's connect");
    assert!(listed.is_empty());

    tokio::time::timeout(
        Duration::from_millis(500),
        supervisor.setup(file_config("FAST", fixture.path())),
    )
    .await
    .expect("setup must not wait for another equipment's connect")
    .expect("fast setup");
    assert!(supervisor.status("SLOW").await.is_none());

    let slow = slow.await.expect("join").expect("slow setup");
    assert_eq!(slow.state(), ConnectorState::Polling);
    let ids: Vec<String> = supervisor
        .list()
        .await
        .into_iter()
        .map(|status| status.equipment_id)
        .collect();
    assert_eq!(ids, vec!["FAST", "SLOW"]);
    assert_eq!(supervisor.stop_all().await, 2);
}
