//! 追踪初始化与采集计数。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 采集指标快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub readings_acquired: u64,
    pub read_errors: u64,
    pub decode_errors: u64,
    pub readings_processed: u64,
    pub readings_scored: u64,
    pub readings_unscored: u64,
    pub persist_success: u64,
    pub persist_failure: u64,
    pub connectors_started: u64,
    pub connectors_stopped: u64,
    pub shutdown_timeouts: u64,
}

/// 采集链路计数器（进程内累计）。
pub struct TelemetryMetrics {
    readings_acquired: AtomicU64,
    read_errors: AtomicU64,
    decode_errors: AtomicU64,
    readings_processed: AtomicU64,
    readings_scored: AtomicU64,
    readings_unscored: AtomicU64,
    persist_success: AtomicU64,
    persist_failure: AtomicU64,
    connectors_started: AtomicU64,
    connectors_stopped: AtomicU64,
    shutdown_timeouts: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            readings_acquired: AtomicU64::new(0),
            read_errors: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            readings_processed: AtomicU64::new(0),
            readings_scored: AtomicU64::new(0),
            readings_unscored: AtomicU64::new(0),
            persist_success: AtomicU64::new(0),
            persist_failure: AtomicU64::new(0),
            connectors_started: AtomicU64::new(0),
            connectors_stopped: AtomicU64::new(0),
            shutdown_timeouts: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            readings_acquired: self.readings_acquired.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            readings_processed: self.readings_processed.load(Ordering::Relaxed),
            readings_scored: self.readings_scored.load(Ordering::Relaxed),
            readings_unscored: self.readings_unscored.load(Ordering::Relaxed),
            persist_success: self.persist_success.load(Ordering::Relaxed),
            persist_failure: self.persist_failure.load(Ordering::Relaxed),
            connectors_started: self.connectors_started.load(Ordering::Relaxed),
            connectors_stopped: self.connectors_stopped.load(Ordering::Relaxed),
            shutdown_timeouts: self.shutdown_timeouts.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 记录连接器产出的读数次数。
pub fn record_reading_acquired() {
    metrics().readings_acquired.fetch_add(1, Ordering::Relaxed);
}

/// 记录单次轮询失败次数。
pub fn record_read_error() {
    metrics().read_errors.fetch_add(1, Ordering::Relaxed);
}

/// 记录单字段解码失败次数。
pub fn record_decode_error() {
    metrics().decode_errors.fetch_add(1, Ordering::Relaxed);
}

pub fn record_reading_processed() {
    metrics().readings_processed.fetch_add(1, Ordering::Relaxed);
}

pub fn record_reading_scored() {
    metrics().readings_scored.fetch_add(1, Ordering::Relaxed);
}

/// 记录因处理或评分失败而未评分的读数。
pub fn record_reading_unscored() {
    metrics().readings_unscored.fetch_add(1, Ordering::Relaxed);
}

/// 记录写入成功条数。
pub fn record_persist_success(count: u64) {
    metrics()
        .persist_success
        .fetch_add(count, Ordering::Relaxed);
}

/// 记录写入失败（丢弃）条数。
pub fn record_persist_failure(count: u64) {
    metrics()
        .persist_failure
        .fetch_add(count, Ordering::Relaxed);
}

pub fn record_connector_started() {
    metrics().connectors_started.fetch_add(1, Ordering::Relaxed);
}

pub fn record_connector_stopped() {
    metrics().connectors_stopped.fetch_add(1, Ordering::Relaxed);
}

/// 记录停止超时次数。
pub fn record_shutdown_timeout() {
    metrics().shutdown_timeouts.fetch_add(1, Ordering::Relaxed);
}
