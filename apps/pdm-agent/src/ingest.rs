//! 采集链路装配模块
//!
//! 把连接器工厂、监管器、特征处理、评分网关与存储组装成一条完整链路：
//! 连接器产出的读数经 [`IngestionPipeline`] 处理、评分后写入存储。

use api_contract::SetupConnectorRequest;
use pdm_config::AppConfig;
use pdm_ingest::ConnectorSupervisor;
use pdm_normalize::{DataProcessor, ProcessorConfig};
use pdm_pipeline::{IngestionPipeline, PipelineConfig, StorageReadingWriter};
use pdm_protocol::{ConnectorFactory, ConnectorTimeouts};
use pdm_scoring::ScorerGateway;
use pdm_storage::{InMemoryReadingStore, JsonLinesReadingStore, ReadingStore};
use pdm_telemetry::metrics;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 连接器配置文件加载错误
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// 读取 setup 请求数组。
pub async fn load_requests(path: &Path) -> Result<Vec<SetupConnectorRequest>, LoadError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
    serde_json::from_str(&raw).map_err(|source| LoadError::Json {
        path: path.display().to_string(),
        source,
    })
}

/// 后台定时 flush 任务
pub struct Flusher {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct IngestRuntime {
    supervisor: Arc<ConnectorSupervisor>,
    pipeline: IngestionPipeline,
    scorer_name: &'static str,
}

impl IngestRuntime {
    pub fn build(config: &AppConfig) -> Self {
        // 未配置输出文件时写入内存，仅用于本地试运行
        let store: Arc<dyn ReadingStore> = match &config.sink_path {
            Some(path) => Arc::new(JsonLinesReadingStore::new(path.clone())),
            None => {
                warn!("sink_path_not_configured_using_memory");
                Arc::new(InMemoryReadingStore::new())
            }
        };
        let scorer = ScorerGateway::from_artifact(config.model_path.as_deref());
        let scorer_name = scorer.scorer_name();
        let processor = Arc::new(DataProcessor::with_config(ProcessorConfig {
            window: config.rolling_window,
            ..ProcessorConfig::default()
        }));
        let pipeline = IngestionPipeline::with_config(
            processor,
            scorer,
            Arc::new(StorageReadingWriter::new(store)),
            PipelineConfig {
                batch_size: config.batch_size,
                ..PipelineConfig::default()
            },
        );
        let factory = ConnectorFactory::new(ConnectorTimeouts::new(
            config.connect_timeout(),
            config.read_timeout(),
            config.shutdown_timeout(),
        ));
        let supervisor = Arc::new(ConnectorSupervisor::new(
            factory,
            Arc::new(pipeline.clone()),
        ));

        Self {
            supervisor,
            pipeline,
            scorer_name,
        }
    }

    pub fn supervisor(&self) -> &Arc<ConnectorSupervisor> {
        &self.supervisor
    }

    pub fn scorer_name(&self) -> &'static str {
        self.scorer_name
    }

    /// 逐个启动连接器；单个失败只记录，返回成功数量。
    pub async fn start(&self, requests: &[SetupConnectorRequest]) -> usize {
        let mut started = 0;
        for request in requests {
            match self.supervisor.setup_request(request).await {
                Ok(response) => {
                    started += 1;
                    info!(
                        equipment_id = %response.equipment_id,
                        connector_type = %response.connector_type,
                        "connector_setup_ok"
                    );
                }
                Err(err) => {
                    error!(
                        equipment_id = %request.equipment_id,
                        connector_type = %request.connector_type,
                        code = err.code(),
                        error = %err,
                        "connector_setup_failed"
                    );
                }
            }
        }
        started
    }

    pub fn spawn_flusher(&self, interval: Duration) -> Flusher {
        let token = CancellationToken::new();
        let pipeline = self.pipeline.clone();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if let Err(err) = pipeline.flush().await {
                    warn!(target: "pdm.ingest", error = %err, "periodic_flush_failed");
                }
            }
        });
        Flusher { token, handle }
    }

    /// 停止全部连接器并写出剩余缓冲。
    pub async fn shutdown(&self, flusher: Flusher) {
        flusher.token.cancel();
        if let Err(err) = flusher.handle.await {
            warn!(error = %err, "flusher_join_failed");
        }
        let stopped = self.supervisor.stop_all().await;
        match self.pipeline.flush().await {
            Ok(flushed) => info!(target: "pdm.ingest", flushed, "final_flush"),
            Err(err) => warn!(target: "pdm.ingest", error = %err, "final_flush_failed"),
        }
        let snapshot = metrics().snapshot();
        info!(
            stopped,
            readings_acquired = snapshot.readings_acquired,
            readings_scored = snapshot.readings_scored,
            readings_unscored = snapshot.readings_unscored,
            persist_success = snapshot.persist_success,
            persist_failure = snapshot.persist_failure,
            shutdown_timeouts = snapshot.shutdown_timeouts,
            "agent_stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config(connectors_file: &Path, sink_path: &Path) -> AppConfig {
        AppConfig {
            connectors_file: connectors_file.to_path_buf(),
            sink_path: Some(sink_path.to_path_buf()),
            model_path: None,
            connect_timeout_ms: 1_000,
            read_timeout_ms: 1_000,
            shutdown_timeout_ms: 1_000,
            batch_size: 2,
            flush_interval_ms: 100,
            rolling_window: 5,
        }
    }

    #[tokio::test]
    async fn connectors_file_drives_end_to_end_ingestion() {
        let dir = tempfile::tempdir().expect("tempdir");
        let csv_path = dir.path().join("pump.csv");
        let mut csv = std::fs::File::create(&csv_path).expect("csv");
        writeln!(csv, "timestamp,temperature,vibration").expect("write");
        writeln!(csv, "2024-01-01 00:00:00,90.0,6.0").expect("write");
        writeln!(csv, "2024-01-01 00:00:05,70.0,2.0").expect("write");

        let connectors_path = dir.path().join("connectors.json");
        let connectors = serde_json::json!([
            {
                "equipment_id": "PUMP-001",
                "connector_type": "file",
                "config": { "polling_interval_seconds": 1 },
                "connection_params": { "file_path": csv_path }
            },
            { "equipment_id": "PUMP-002", "connector_type": "bacnet" }
        ]);
        std::fs::write(&connectors_path, connectors.to_string()).expect("connectors");

        let sink_path = dir.path().join("readings.jsonl");
        let app_config = config(&connectors_path, &sink_path);
        let runtime = IngestRuntime::build(&app_config);
        assert_eq!(runtime.scorer_name(), "rule_based");

        let requests = load_requests(&connectors_path).await.expect("load");
        assert_eq!(requests.len(), 2);
        assert_eq!(runtime.start(&requests).await, 1);

        let flusher = runtime.spawn_flusher(app_config.flush_interval());
        tokio::time::sleep(Duration::from_millis(1_300)).await;
        runtime.shutdown(flusher).await;
        assert!(runtime.supervisor().list().await.is_empty());

        let saved = JsonLinesReadingStore::new(&sink_path)
            .read_all()
            .await
            .expect("read sink");
        assert!(saved.len() >= 2);
        assert_eq!(saved[0].equipment_id, "PUMP-001");
        assert_eq!(saved[0].anomaly_detected, Some(true));
        assert_eq!(saved[1].anomaly_detected, Some(false));
    }

    #[tokio::test]
    async fn malformed_connectors_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("connectors.json");
        std::fs::write(&path, "{ not json").expect("write");
        assert!(matches!(
            load_requests(&path).await,
            Err(LoadError::Json { .. })
        ));
        assert!(matches!(
            load_requests(&dir.path().join("missing.json")).await,
            Err(LoadError::Io { .. })
        ));
    }
}
