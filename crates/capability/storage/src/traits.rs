//! 存储接口 Trait 定义
//!
//! 持久化契约：`save(Reading)`。实现需要保证同一批次内的顺序。

use crate::error::StorageError;
use async_trait::async_trait;
use domain::Reading;

/// 读数存储接口
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// 保存单条读数
    async fn save(&self, reading: &Reading) -> Result<(), StorageError>;

    /// 按顺序保存一批读数，返回写入条数
    async fn save_batch(&self, readings: &[Reading]) -> Result<usize, StorageError> {
        for reading in readings {
            self.save(reading).await?;
        }
        Ok(readings.len())
    }
}
