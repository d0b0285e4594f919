//! 内存存储实现（测试与演示）

mod reading;

pub use reading::InMemoryReadingStore;
