//! 连接器运行时
//!
//! `PollingConnector` 负责状态机、超时与后台轮询任务；具体协议只实现
//! `ConnectorSource`（打开、关闭、读取）。

use crate::error::ProtocolError;
use crate::types::{ConnectorConfig, ConnectorState, ConnectorTimeouts, ConnectorType};
use async_trait::async_trait;
use domain::Reading;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 读数回调
#[async_trait]
pub trait ReadingHandler: Send + Sync {
    async fn handle(&self, reading: Reading) -> Result<(), ProtocolError>;

    /// 设备的连接器已停止或被替换，之后不会再有旧连接器的读数。
    async fn stream_closed(&self, _equipment_id: &str) {}
}

/// 连接器能力集合
#[async_trait]
pub trait Connector: Send + Sync {
    fn equipment_id(&self) -> &str;

    fn connector_type(&self) -> ConnectorType;

    fn state(&self) -> ConnectorState;

    /// 建立连接，失败时进入 `Failed`。
    async fn connect(&self) -> Result<(), ProtocolError>;

    /// 停止轮询并断开；对已断开的连接器直接成功。
    async fn disconnect(&self) -> Result<(), ProtocolError>;

    /// 单次读取，不触发回调。
    async fn read_once(&self) -> Result<Vec<Reading>, ProtocolError>;

    /// 注册回调并启动后台轮询任务。
    fn read_loop(&self, handler: Arc<dyn ReadingHandler>) -> Result<(), ProtocolError>;

    /// 替换轮询任务使用的回调。
    fn set_callback(&self, handler: Arc<dyn ReadingHandler>);

    /// 最近一次产出的读数。
    fn last_reading(&self) -> Option<Reading>;
}

/// 协议数据源
#[async_trait]
pub trait ConnectorSource: Send + 'static {
    async fn open(&mut self) -> Result<(), ProtocolError>;

    async fn close(&mut self);

    /// 读取当前全部可得读数。
    async fn read_all(&mut self) -> Result<Vec<Reading>, ProtocolError>;

    /// 轮询一次；默认与 `read_all` 相同。
    async fn poll(&mut self) -> Result<Vec<Reading>, ProtocolError> {
        self.read_all().await
    }
}

struct PollTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Lifecycle {
    state: ConnectorState,
    task: Option<PollTask>,
}

struct Shared<S> {
    equipment_id: String,
    connector_type: ConnectorType,
    interval: Duration,
    timeouts: ConnectorTimeouts,
    source: AsyncMutex<S>,
    lifecycle: Mutex<Lifecycle>,
    callback: Mutex<Option<Arc<dyn ReadingHandler>>>,
    last_reading: Mutex<Option<Reading>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<S: ConnectorSource> Shared<S> {
    fn set_state(&self, state: ConnectorState) {
        lock(&self.lifecycle).state = state;
    }

    fn callback(&self) -> Option<Arc<dyn ReadingHandler>> {
        lock(&self.callback).clone()
    }

    fn remember(&self, reading: &Reading) {
        *lock(&self.last_reading) = Some(reading.clone());
    }

    async fn poll_source(&self) -> Result<Vec<Reading>, ProtocolError> {
        let mut source = self.source.lock().await;
        match timeout(self.timeouts.read, source.poll()).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Read(format!(
                "read timed out after {:?}",
                self.timeouts.read
            ))),
        }
    }
}

/// 通用轮询连接器
pub struct PollingConnector<S> {
    shared: Arc<Shared<S>>,
}

impl<S: ConnectorSource> PollingConnector<S> {
    pub fn new(config: &ConnectorConfig, source: S, timeouts: ConnectorTimeouts) -> Self {
        Self {
            shared: Arc::new(Shared {
                equipment_id: config.equipment_id.clone(),
                connector_type: config.connector_type,
                interval: config.polling_interval(),
                timeouts,
                source: AsyncMutex::new(source),
                lifecycle: Mutex::new(Lifecycle {
                    state: ConnectorState::Disconnected,
                    task: None,
                }),
                callback: Mutex::new(None),
                last_reading: Mutex::new(None),
            }),
        }
    }

    pub fn polling_interval(&self) -> Duration {
        self.shared.interval
    }
}

#[async_trait]
impl<S: ConnectorSource> Connector for PollingConnector<S> {
    fn equipment_id(&self) -> &str {
        &self.shared.equipment_id
    }

    fn connector_type(&self) -> ConnectorType {
        self.shared.connector_type
    }

    fn state(&self) -> ConnectorState {
        lock(&self.shared.lifecycle).state
    }

    async fn connect(&self) -> Result<(), ProtocolError> {
        let state = self.state();
        if state.is_running() {
            return Ok(());
        }
        if !state.can_connect() {
            return Err(ProtocolError::Connection(format!(
                "connector is {state}, cannot connect"
            )));
        }

        let shared = &self.shared;
        let mut source = shared.source.lock().await;
        let result = match timeout(shared.timeouts.connect, source.open()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(ProtocolError::Connection(message))) => Err(ProtocolError::Connection(message)),
            Ok(Err(err)) => Err(ProtocolError::Connection(err.to_string())),
            Err(_) => Err(ProtocolError::Connection(format!(
                "connect timed out after {:?}",
                shared.timeouts.connect
            ))),
        };
        drop(source);

        match &result {
            Ok(()) => {
                shared.set_state(ConnectorState::Connected);
                info!(
                    equipment_id = %shared.equipment_id,
                    connector_type = %shared.connector_type,
                    "connector_connected"
                );
            }
            Err(err) => {
                shared.set_state(ConnectorState::Failed);
                warn!(
                    equipment_id = %shared.equipment_id,
                    connector_type = %shared.connector_type,
                    error = %err,
                    "connector_connect_failed"
                );
            }
        }
        result
    }

    async fn disconnect(&self) -> Result<(), ProtocolError> {
        let shared = &self.shared;
        let task = {
            let mut lifecycle = lock(&shared.lifecycle);
            if lifecycle.task.is_none()
                && matches!(
                    lifecycle.state,
                    ConnectorState::Disconnected | ConnectorState::Stopped
                )
            {
                return Ok(());
            }
            lifecycle.state = ConnectorState::Stopping;
            lifecycle.task.take()
        };

        let mut outcome = Ok(());
        if let Some(PollTask { token, mut handle }) = task {
            token.cancel();
            if timeout(shared.timeouts.shutdown, &mut handle).await.is_err() {
                handle.abort();
                warn!(
                    equipment_id = %shared.equipment_id,
                    timeout_ms = shared.timeouts.shutdown.as_millis() as u64,
                    "poll_task_shutdown_timeout"
                );
                outcome = Err(ProtocolError::ShutdownTimeout(shared.timeouts.shutdown));
            }
        }

        match timeout(shared.timeouts.shutdown, shared.source.lock()).await {
            Ok(mut source) => source.close().await,
            Err(_) => warn!(
                equipment_id = %shared.equipment_id,
                "source_close_skipped"
            ),
        }

        shared.set_state(ConnectorState::Stopped);
        info!(equipment_id = %shared.equipment_id, "connector_disconnected");
        outcome
    }

    async fn read_once(&self) -> Result<Vec<Reading>, ProtocolError> {
        if !self.state().is_running() {
            return Err(ProtocolError::NotConnected);
        }
        let shared = &self.shared;
        let mut source = shared.source.lock().await;
        let readings = match timeout(shared.timeouts.read, source.read_all()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ProtocolError::Read(format!(
                    "read timed out after {:?}",
                    shared.timeouts.read
                )));
            }
        };
        if let Some(last) = readings.last() {
            shared.remember(last);
        }
        Ok(readings)
    }

    fn read_loop(&self, handler: Arc<dyn ReadingHandler>) -> Result<(), ProtocolError> {
        let shared = &self.shared;
        let mut lifecycle = lock(&shared.lifecycle);
        *lock(&shared.callback) = Some(handler);
        if lifecycle.task.is_some() {
            return Ok(());
        }
        if lifecycle.state != ConnectorState::Connected {
            return Err(ProtocolError::NotConnected);
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ProtocolError::Config(format!("no async runtime: {e}")))?;
        let token = CancellationToken::new();
        let handle = runtime.spawn(run_loop(Arc::clone(shared), token.clone()));
        lifecycle.task = Some(PollTask { token, handle });
        lifecycle.state = ConnectorState::Polling;
        info!(
            equipment_id = %shared.equipment_id,
            connector_type = %shared.connector_type,
            interval_secs = shared.interval.as_secs(),
            "poll_loop_started"
        );
        Ok(())
    }

    fn set_callback(&self, handler: Arc<dyn ReadingHandler>) {
        *lock(&self.shared.callback) = Some(handler);
    }

    fn last_reading(&self) -> Option<Reading> {
        lock(&self.shared.last_reading).clone()
    }
}

/// 后台轮询：每轮开始与每条读数前检查取消信号。
async fn run_loop<S: ConnectorSource>(shared: Arc<Shared<S>>, token: CancellationToken) {
    loop {
        if token.is_cancelled() {
            break;
        }

        let polled = tokio::select! {
            _ = token.cancelled() => break,
            polled = shared.poll_source() => polled,
        };

        match polled {
            Ok(readings) => {
                for reading in readings {
                    if token.is_cancelled() {
                        break;
                    }
                    pdm_telemetry::record_reading_acquired();
                    shared.remember(&reading);
                    let Some(handler) = shared.callback() else {
                        continue;
                    };
                    if let Err(err) = handler.handle(reading).await {
                        warn!(
                            equipment_id = %shared.equipment_id,
                            error = %err,
                            "reading_handler_failed"
                        );
                    }
                }
            }
            Err(err) => {
                pdm_telemetry::record_read_error();
                warn!(
                    equipment_id = %shared.equipment_id,
                    connector_type = %shared.connector_type,
                    error = %err,
                    "poll_failed"
                );
            }
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = sleep(shared.interval) => {}
        }
    }
    debug!(equipment_id = %shared.equipment_id, "poll_loop_exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        fail_open: bool,
        failing_reads: usize,
        reads: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ConnectorSource for CountingSource {
        async fn open(&mut self) -> Result<(), ProtocolError> {
            if self.fail_open {
                return Err(ProtocolError::Connection("refused".to_string()));
            }
            Ok(())
        }

        async fn close(&mut self) {}

        async fn read_all(&mut self) -> Result<Vec<Reading>, ProtocolError> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            if n < self.failing_reads {
                return Err(ProtocolError::Read("device busy".to_string()));
            }
            Ok(vec![Reading::now("PUMP-1").with_value("n", n as f64)])
        }
    }

    struct Collect(Mutex<Vec<Reading>>);

    #[async_trait]
    impl ReadingHandler for Collect {
        async fn handle(&self, reading: Reading) -> Result<(), ProtocolError> {
            lock(&self.0).push(reading);
            Ok(())
        }
    }

    fn config() -> ConnectorConfig {
        let params = json!({ "file_path": "/unused", "polling_interval_seconds": 1 });
        ConnectorConfig::from_parts(
            "PUMP-1",
            "file",
            params.as_object().unwrap(),
            &Map::new(),
        )
        .unwrap()
    }

    /// 第一次调用失败，之后正常收集。
    #[derive(Default)]
    struct FailFirst {
        calls: AtomicUsize,
        accepted: Mutex<Vec<Reading>>,
    }

    #[async_trait]
    impl ReadingHandler for FailFirst {
        async fn handle(&self, reading: Reading) -> Result<(), ProtocolError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(ProtocolError::Handler("sink unavailable".to_string()));
            }
            lock(&self.accepted).push(reading);
            Ok(())
        }
    }

    fn connector(fail_open: bool) -> (PollingConnector<CountingSource>, Arc<AtomicUsize>) {
        flaky_connector(fail_open, 0)
    }

    fn flaky_connector(
        fail_open: bool,
        failing_reads: usize,
    ) -> (PollingConnector<CountingSource>, Arc<AtomicUsize>) {
        let reads = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            fail_open,
            failing_reads,
            reads: reads.clone(),
        };
        (
            PollingConnector::new(&config(), source, ConnectorTimeouts::default()),
            reads,
        )
    }

    #[tokio::test]
    async fn failed_connect_is_recoverable_state() {
        let (connector, _) = connector(true);
        let err = connector.connect().await.unwrap_err();
        assert!(matches!(err, ProtocolError::Connection(_)));
        assert_eq!(connector.state(), ConnectorState::Failed);
        assert!(connector.read_once().await.is_err());
    }

    #[tokio::test]
    async fn read_once_requires_connect_and_skips_callback() {
        let (connector, _) = connector(false);
        assert!(matches!(
            connector.read_once().await,
            Err(ProtocolError::NotConnected)
        ));

        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        connector.set_callback(sink.clone());
        connector.connect().await.unwrap();
        let readings = connector.read_once().await.unwrap();
        assert_eq!(readings.len(), 1);
        assert!(lock(&sink.0).is_empty());
        assert_eq!(connector.last_reading(), readings.last().cloned());
    }

    #[tokio::test]
    async fn loop_delivers_then_disconnect_is_idempotent() {
        let (connector, _) = connector(false);
        connector.connect().await.unwrap();
        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        connector.read_loop(sink.clone()).unwrap();
        assert_eq!(connector.state(), ConnectorState::Polling);

        tokio::time::sleep(Duration::from_millis(200)).await;
        connector.disconnect().await.unwrap();
        assert_eq!(connector.state(), ConnectorState::Stopped);
        assert_eq!(lock(&sink.0).len(), 1);

        connector.disconnect().await.unwrap();
        assert_eq!(connector.state(), ConnectorState::Stopped);
    }

    #[tokio::test]
    async fn poll_error_does_not_stop_loop() {
        let (connector, reads) = flaky_connector(false, 1);
        connector.connect().await.unwrap();
        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        connector.read_loop(sink.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(1_300)).await;
        assert_eq!(connector.state(), ConnectorState::Polling);
        assert!(reads.load(Ordering::SeqCst) >= 2);
        let delivered = lock(&sink.0).clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].numeric("n"), Some(1.0));

        connector.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn handler_error_does_not_stop_loop() {
        let (connector, _) = connector(false);
        connector.connect().await.unwrap();
        let handler = Arc::new(FailFirst::default());
        connector.read_loop(handler.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(1_300)).await;
        assert_eq!(connector.state(), ConnectorState::Polling);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        let accepted = lock(&handler.accepted).clone();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].numeric("n"), Some(1.0));

        connector.disconnect().await.unwrap();
    }
}
