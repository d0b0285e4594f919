use crate::error::SupervisorError;
use api_contract::{
    ConnectorRunStatus, ConnectorSummary, SetupConnectorRequest, SetupConnectorResponse,
    StopConnectorResponse,
};
use domain::Reading;
use pdm_protocol::{
    Connector, ConnectorConfig, ConnectorFactory, ConnectorState, ConnectorType, ProtocolError,
    ReadingHandler,
};
use pdm_telemetry::{record_connector_started, record_connector_stopped, record_shutdown_timeout};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// setup 成功后返回的连接器句柄
#[derive(Clone)]
pub struct ConnectorHandle {
    equipment_id: String,
    connector: Arc<dyn Connector>,
}

impl ConnectorHandle {
    pub fn equipment_id(&self) -> &str {
        &self.equipment_id
    }

    pub fn connector_type(&self) -> ConnectorType {
        self.connector.connector_type()
    }

    pub fn state(&self) -> ConnectorState {
        self.connector.state()
    }

    pub fn last_reading(&self) -> Option<Reading> {
        self.connector.last_reading()
    }
}

/// 注册表中单个条目的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorStatus {
    pub equipment_id: String,
    pub connector_type: ConnectorType,
    pub state: ConnectorState,
}

impl ConnectorStatus {
    pub fn summary(&self) -> ConnectorSummary {
        ConnectorSummary {
            equipment_id: self.equipment_id.clone(),
            connector_type: self.connector_type.to_string(),
            status: run_status(self.state),
        }
    }
}

fn run_status(state: ConnectorState) -> ConnectorRunStatus {
    if state.is_running() {
        ConnectorRunStatus::Running
    } else {
        ConnectorRunStatus::Stopped
    }
}

/// 连接器注册表
pub struct ConnectorSupervisor {
    factory: ConnectorFactory,
    handler: Arc<dyn ReadingHandler>,
    // 只在增删查时短暂持有
    entries: Mutex<BTreeMap<String, Arc<dyn Connector>>>,
    // 同一设备的 setup / stop 串行；连接与停止等待在此锁内进行
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConnectorSupervisor {
    pub fn new(factory: ConnectorFactory, handler: Arc<dyn ReadingHandler>) -> Self {
        Self {
            factory,
            handler,
            entries: Mutex::new(BTreeMap::new()),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn factory(&self) -> &ConnectorFactory {
        &self.factory
    }

    async fn slot(&self, equipment_id: &str) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().await;
        Arc::clone(slots.entry(equipment_id.to_string()).or_default())
    }

    /// 启动设备的连接器。
    ///
    /// 先构造（配置错误在此同步返回，不影响旧连接器），再停止并注销旧条目，
    /// 最后连接并启动轮询。连接失败时新连接器不注册，状态为 `Failed`。
    ///
    /// 连接期间只占用该设备自己的锁，其他设备的操作与 `list` 不受影响。
    pub async fn setup(&self, config: ConnectorConfig) -> Result<ConnectorHandle, SupervisorError> {
        let connector = self.factory.create(&config)?;
        let equipment_id = config.equipment_id.clone();

        let slot = self.slot(&equipment_id).await;
        let _slot_guard = slot.lock().await;

        let previous = self.entries.lock().await.remove(&equipment_id);
        if let Some(previous) = previous {
            info!(
                equipment_id = %equipment_id,
                previous_type = %previous.connector_type(),
                connector_type = %config.connector_type,
                "connector_replaced"
            );
            // 旧任务超时已记录，条目已移除，继续启动新连接器
            let _ = shutdown(&equipment_id, previous.as_ref()).await;
            self.handler.stream_closed(&equipment_id).await;
        }

        connector.connect().await.map_err(connect_error)?;
        if let Err(err) = connector.read_loop(Arc::clone(&self.handler)) {
            let _ = connector.disconnect().await;
            return Err(err.into());
        }

        self.entries
            .lock()
            .await
            .insert(equipment_id.clone(), Arc::clone(&connector));
        record_connector_started();
        info!(
            equipment_id = %equipment_id,
            connector_type = %config.connector_type,
            interval_secs = config.polling_interval_seconds,
            "connector_started"
        );

        Ok(ConnectorHandle {
            equipment_id,
            connector,
        })
    }

    /// 停止并注销设备的连接器。返回后不会再有该设备的回调。
    pub async fn stop(&self, equipment_id: &str) -> Result<(), SupervisorError> {
        let slot = self.slot(equipment_id).await;
        let _slot_guard = slot.lock().await;

        let connector = self
            .entries
            .lock()
            .await
            .remove(equipment_id)
            .ok_or_else(|| SupervisorError::NotFound(equipment_id.to_string()))?;
        let result = shutdown(equipment_id, connector.as_ref()).await;
        self.handler.stream_closed(equipment_id).await;
        result
    }

    /// 停止全部连接器，返回正常停止的数量。
    pub async fn stop_all(&self) -> usize {
        let equipment_ids: Vec<String> = self.entries.lock().await.keys().cloned().collect();
        let mut stopped = 0;
        for equipment_id in equipment_ids {
            if self.stop(&equipment_id).await.is_ok() {
                stopped += 1;
            }
        }
        stopped
    }

    /// 按设备 ID 排序。
    pub async fn list(&self) -> Vec<ConnectorStatus> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .map(|(equipment_id, connector)| ConnectorStatus {
                equipment_id: equipment_id.clone(),
                connector_type: connector.connector_type(),
                state: connector.state(),
            })
            .collect()
    }

    pub async fn status(&self, equipment_id: &str) -> Option<ConnectorStatus> {
        let entries = self.entries.lock().await;
        entries.get(equipment_id).map(|connector| ConnectorStatus {
            equipment_id: equipment_id.to_string(),
            connector_type: connector.connector_type(),
            state: connector.state(),
        })
    }

    pub async fn handle(&self, equipment_id: &str) -> Option<ConnectorHandle> {
        let entries = self.entries.lock().await;
        entries.get(equipment_id).map(|connector| ConnectorHandle {
            equipment_id: equipment_id.to_string(),
            connector: Arc::clone(connector),
        })
    }

    pub async fn setup_request(
        &self,
        request: &SetupConnectorRequest,
    ) -> Result<SetupConnectorResponse, SupervisorError> {
        let config = ConnectorConfig::from_parts(
            &request.equipment_id,
            &request.connector_type,
            &request.config,
            &request.connection_params,
        )?;
        let handle = self.setup(config).await?;
        Ok(SetupConnectorResponse {
            equipment_id: handle.equipment_id().to_string(),
            connector_type: handle.connector_type().to_string(),
            status: run_status(handle.state()),
        })
    }

    pub async fn stop_request(
        &self,
        equipment_id: &str,
    ) -> Result<StopConnectorResponse, SupervisorError> {
        self.stop(equipment_id).await?;
        Ok(StopConnectorResponse {
            equipment_id: equipment_id.to_string(),
            status: ConnectorRunStatus::Stopped,
        })
    }

    pub async fn summaries(&self) -> Vec<ConnectorSummary> {
        self.list()
            .await
            .iter()
            .map(ConnectorStatus::summary)
            .collect()
    }
}

fn connect_error(err: ProtocolError) -> SupervisorError {
    match err {
        ProtocolError::Config(message) => SupervisorError::Config(message),
        other => SupervisorError::Connection(other.to_string()),
    }
}

async fn shutdown(equipment_id: &str, connector: &dyn Connector) -> Result<(), SupervisorError> {
    match connector.disconnect().await {
        Ok(()) => {
            record_connector_stopped();
            info!(equipment_id = %equipment_id, "connector_stopped");
            Ok(())
        }
        Err(ProtocolError::ShutdownTimeout(timeout)) => {
            record_shutdown_timeout();
            warn!(
                equipment_id = %equipment_id,
                timeout_ms = timeout.as_millis() as u64,
                "connector_shutdown_timeout"
            );
            Err(SupervisorError::ShutdownTimeout {
                equipment_id: equipment_id.to_string(),
                timeout,
            })
        }
        Err(err) => {
            record_connector_stopped();
            warn!(equipment_id = %equipment_id, error = %err, "connector_disconnect_failed");
            Ok(())
        }
    }
}
