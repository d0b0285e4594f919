//! # PdM Storage 模块
//!
//! 持久化抽象层：采集流水线只依赖 [`ReadingStore`]，不关心具体后端。
//!
//! ## 模块说明
//!
//! - [`traits`]：存储接口（`save` / `save_batch`）
//! - [`error`]：存储错误类型
//! - [`in_memory`]：内存实现，使用 `RwLock<Vec>`，适用于测试和未配置输出文件的场景
//! - [`json_lines`]：JSON Lines 文件实现，每行一条线上格式读数
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use pdm_storage::{JsonLinesReadingStore, ReadingStore};
//!
//! let store = JsonLinesReadingStore::new("/var/lib/pdm/readings.jsonl");
//! store.save(&reading).await?;
//! ```
//!
//! ## 投递语义
//!
//! 至少一次：流水线在失败时会重试整批，消费方需按 `(equipment_id, timestamp)` 幂等。

pub mod error;
pub mod in_memory;
pub mod json_lines;
pub mod traits;

pub use error::*;
pub use in_memory::InMemoryReadingStore;
pub use json_lines::JsonLinesReadingStore;
pub use traits::*;
