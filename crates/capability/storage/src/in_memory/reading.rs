//! 读数内存实现
//!
//! 仅用于本地测试和未配置输出文件时的占位。

use crate::error::StorageError;
use crate::traits::ReadingStore;
use domain::Reading;
use std::sync::RwLock;

/// 读数内存存储
pub struct InMemoryReadingStore {
    readings: RwLock<Vec<Reading>>,
}

impl InMemoryReadingStore {
    pub fn new() -> Self {
        Self {
            readings: RwLock::new(Vec::new()),
        }
    }

    /// 获取当前累计的读数数量（用于测试）
    pub fn len(&self) -> usize {
        self.readings.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按写入顺序列出某台设备的读数
    pub fn list_by_equipment(&self, equipment_id: &str) -> Result<Vec<Reading>, StorageError> {
        let readings = self
            .readings
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(readings
            .iter()
            .filter(|reading| reading.equipment_id == equipment_id)
            .cloned()
            .collect())
    }

    pub fn all(&self) -> Result<Vec<Reading>, StorageError> {
        let readings = self
            .readings
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(readings.clone())
    }
}

impl Default for InMemoryReadingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ReadingStore for InMemoryReadingStore {
    async fn save(&self, reading: &Reading) -> Result<(), StorageError> {
        let mut readings = self
            .readings
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        readings.push(reading.clone());
        Ok(())
    }

    async fn save_batch(&self, batch: &[Reading]) -> Result<usize, StorageError> {
        let mut readings = self
            .readings
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        readings.extend(batch.iter().cloned());
        Ok(batch.len())
    }
}
