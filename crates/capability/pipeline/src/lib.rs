//! 采集回调流水线
//!
//! 连接器每产出一条读数调用一次 [`IngestionPipeline`]：
//!
//! ```text
//! Reading ──▶ DataProcessor ──▶ ScorerGateway ──▶ 缓冲 ──▶ ReadingWriter
//! ```
//!
//! 特征处理或评分失败时读数照常写入，只是不带异常字段；写入失败在有限次
//! 重试后记录并丢弃该批次，不影响轮询任务。

use async_trait::async_trait;
use domain::Reading;
use pdm_normalize::DataProcessor;
use pdm_protocol::{ProtocolError, ReadingHandler};
use pdm_scoring::ScorerGateway;
use pdm_storage::ReadingStore;
use pdm_telemetry::{
    record_persist_failure, record_persist_success, record_reading_processed,
    record_reading_scored, record_reading_unscored,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Pipeline 处理错误。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("writer error: {0}")]
    Writer(String),
}

/// Pipeline 参数。
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub max_retries: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            max_retries: 3,
        }
    }
}

impl PipelineConfig {
    fn sanitized(mut self) -> Self {
        if self.batch_size == 0 {
            self.batch_size = 1;
        }
        self
    }
}

/// 单条读数的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    pub scored: bool,
    /// 本次调用触发写入的条数（仅缓冲时为 0）
    pub persisted: usize,
}

/// 读数写入器抽象。
#[async_trait]
pub trait ReadingWriter: Send + Sync {
    async fn write_batch(&self, readings: &[Reading]) -> Result<usize, PipelineError>;
}

/// 基于存储层的写入器。
#[derive(Clone)]
pub struct StorageReadingWriter {
    store: Arc<dyn ReadingStore>,
}

impl StorageReadingWriter {
    pub fn new(store: Arc<dyn ReadingStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ReadingWriter for StorageReadingWriter {
    async fn write_batch(&self, readings: &[Reading]) -> Result<usize, PipelineError> {
        if readings.is_empty() {
            return Ok(0);
        }
        self.store
            .save_batch(readings)
            .await
            .map_err(|err| PipelineError::Writer(err.to_string()))
    }
}

struct PipelineInner {
    processor: Arc<DataProcessor>,
    scorer: ScorerGateway,
    writer: Arc<dyn ReadingWriter>,
    config: PipelineConfig,
    buffer: Mutex<Vec<Reading>>,
    // 批次按切分顺序落盘
    write_lock: Mutex<()>,
}

/// 采集流水线入口。
#[derive(Clone)]
pub struct IngestionPipeline {
    inner: Arc<PipelineInner>,
}

impl IngestionPipeline {
    pub fn new(
        processor: Arc<DataProcessor>,
        scorer: ScorerGateway,
        writer: Arc<dyn ReadingWriter>,
    ) -> Self {
        Self::with_config(processor, scorer, writer, PipelineConfig::default())
    }

    pub fn with_config(
        processor: Arc<DataProcessor>,
        scorer: ScorerGateway,
        writer: Arc<dyn ReadingWriter>,
        config: PipelineConfig,
    ) -> Self {
        let inner = PipelineInner {
            processor,
            scorer,
            writer,
            config: config.sanitized(),
            buffer: Mutex::new(Vec::new()),
            write_lock: Mutex::new(()),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn processor(&self) -> &Arc<DataProcessor> {
        &self.inner.processor
    }

    /// 处理、评分并缓冲一条读数；缓冲满一批时写入。
    pub async fn ingest(&self, mut reading: Reading) -> Result<IngestOutcome, PipelineError> {
        let scored = self.annotate(&mut reading);

        let mut buffer = self.inner.buffer.lock().await;
        buffer.push(reading);
        if buffer.len() < self.inner.config.batch_size {
            return Ok(IngestOutcome {
                scored,
                persisted: 0,
            });
        }
        let batch = std::mem::take(&mut *buffer);
        let _write_guard = self.inner.write_lock.lock().await;
        drop(buffer);

        let persisted = self.write_batch_with_retry(&batch).await?;
        Ok(IngestOutcome { scored, persisted })
    }

    /// 写出缓冲中的全部读数。
    pub async fn flush(&self) -> Result<usize, PipelineError> {
        let mut buffer = self.inner.buffer.lock().await;
        if buffer.is_empty() {
            return Ok(0);
        }
        let batch = std::mem::take(&mut *buffer);
        let _write_guard = self.inner.write_lock.lock().await;
        drop(buffer);
        self.write_batch_with_retry(&batch).await
    }

    pub async fn buffered(&self) -> usize {
        self.inner.buffer.lock().await.len()
    }

    /// 返回是否成功评分。
    fn annotate(&self, reading: &mut Reading) -> bool {
        let features = match self.inner.processor.process(reading) {
            Ok(features) => {
                record_reading_processed();
                features
            }
            Err(err) => {
                record_reading_unscored();
                warn!(
                    target: "pdm.ingest",
                    equipment_id = %reading.equipment_id,
                    error = %err,
                    "process_failed"
                );
                return false;
            }
        };

        match self.inner.scorer.annotate(reading, &features) {
            Ok(result) => {
                record_reading_scored();
                debug!(
                    target: "pdm.ingest",
                    equipment_id = %reading.equipment_id,
                    features = features.len(),
                    anomaly_detected = result.anomaly_detected,
                    anomaly_score = result.anomaly_score,
                    "reading_scored"
                );
                true
            }
            Err(err) => {
                record_reading_unscored();
                warn!(
                    target: "pdm.ingest",
                    equipment_id = %reading.equipment_id,
                    scorer = self.inner.scorer.scorer_name(),
                    error = %err,
                    "score_failed"
                );
                false
            }
        }
    }

    async fn write_batch_with_retry(&self, readings: &[Reading]) -> Result<usize, PipelineError> {
        let mut attempt = 0;
        loop {
            match self.inner.writer.write_batch(readings).await {
                Ok(written) => {
                    record_persist_success(written as u64);
                    return Ok(written);
                }
                Err(err) => {
                    attempt += 1;
                    if attempt > self.inner.config.max_retries {
                        record_persist_failure(readings.len() as u64);
                        warn!(
                            target: "pdm.ingest",
                            batch = readings.len(),
                            attempts = attempt,
                            error = %err,
                            "persist_failed"
                        );
                        return Err(err);
                    }
                    debug!(target: "pdm.ingest", attempt, error = %err, "persist_retry");
                }
            }
        }
    }
}

#[async_trait]
impl ReadingHandler for IngestionPipeline {
    async fn handle(&self, reading: Reading) -> Result<(), ProtocolError> {
        self.ingest(reading)
            .await
            .map(|_| ())
            .map_err(|err| ProtocolError::Handler(err.to_string()))
    }

    async fn stream_closed(&self, equipment_id: &str) {
        match self.inner.processor.reset(equipment_id) {
            Ok(()) => debug!(target: "pdm.ingest", equipment_id, "stream_state_reset"),
            Err(err) => warn!(
                target: "pdm.ingest",
                equipment_id,
                error = %err,
                "stream_state_reset_failed"
            ),
        }
    }
}
