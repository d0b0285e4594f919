//! 领域模型：所有模块共享的读数类型。

pub mod data;

pub use data::{Reading, ReadingValue, WireError, format_timestamp, parse_timestamp};
