//! 采集代理运行配置加载。

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// 连接超时上限（毫秒）。
pub const MAX_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 采集代理运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub connectors_file: PathBuf,
    pub sink_path: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub rolling_window: usize,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let connectors_file = env::var("PDM_CONNECTORS_FILE")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::Missing("PDM_CONNECTORS_FILE".to_string()))?;
        let sink_path = read_optional("PDM_SINK_PATH").map(PathBuf::from);
        let model_path = read_optional("PDM_MODEL_PATH").map(PathBuf::from);
        // 连接超时不超过 10s。
        let connect_timeout_ms =
            read_u64_with_default("PDM_CONNECT_TIMEOUT_MS", MAX_CONNECT_TIMEOUT_MS)?
                .min(MAX_CONNECT_TIMEOUT_MS);
        let read_timeout_ms = read_u64_with_default("PDM_READ_TIMEOUT_MS", 5_000)?;
        let shutdown_timeout_ms = read_u64_with_default("PDM_SHUTDOWN_TIMEOUT_MS", 2_000)?;
        let batch_size = read_positive_usize_with_default("PDM_BATCH_SIZE", 1)?;
        let flush_interval_ms = read_u64_with_default("PDM_FLUSH_INTERVAL_MS", 1_000)?;
        let rolling_window = read_positive_usize_with_default("PDM_ROLLING_WINDOW", 5)?;

        Ok(Self {
            connectors_file,
            sink_path,
            model_path,
            connect_timeout_ms,
            read_timeout_ms,
            shutdown_timeout_ms,
            batch_size,
            flush_interval_ms,
            rolling_window,
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_positive_usize_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    match value.parse::<usize>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(ConfigError::Invalid(key.to_string(), value)),
    }
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}
