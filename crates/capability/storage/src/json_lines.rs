//! JSON Lines 文件存储
//!
//! 每条读数按线上格式序列化为一行 JSON，追加写入同一个文件。

use crate::error::StorageError;
use crate::traits::ReadingStore;
use async_trait::async_trait;
use domain::Reading;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// 追加写入的 JSON Lines 存储
pub struct JsonLinesReadingStore {
    path: PathBuf,
    // 串行化追加，保证批次内行序
    write_lock: Mutex<()>,
}

impl JsonLinesReadingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取文件中的全部读数（用于测试与回放）
    pub async fn read_all(&self) -> Result<Vec<Reading>, StorageError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| Reading::from_json_str(line).map_err(|e| StorageError::new(e.to_string())))
            .collect()
    }

    async fn append(&self, readings: &[Reading]) -> Result<usize, StorageError> {
        let mut buffer = String::new();
        for reading in readings {
            buffer.push_str(&serde_json::to_string(&reading.to_wire())?);
            buffer.push('\n');
        }

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(buffer.as_bytes()).await?;
        file.flush().await?;
        debug!(path = %self.path.display(), count = readings.len(), "readings_appended");
        Ok(readings.len())
    }
}

#[async_trait]
impl ReadingStore for JsonLinesReadingStore {
    async fn save(&self, reading: &Reading) -> Result<(), StorageError> {
        self.append(std::slice::from_ref(reading)).await.map(|_| ())
    }

    async fn save_batch(&self, readings: &[Reading]) -> Result<usize, StorageError> {
        if readings.is_empty() {
            return Ok(0);
        }
        self.append(readings).await
    }
}
