//! # 连接器能力模块
//!
//! 从异构数据源采集设备读数，支持：
//! - **文件回放**：分隔符文件按行循环回放
//! - **REST 轮询**：周期性 GET，JSON 数组/对象转读数
//! - **寄存器映射**：Modbus TCP 寄存器读取与二进制解码（`registers` 特性）
//! - **节点集**：按节点 ID 读取当前值（`nodes` 特性）
//!
//! ## 架构设计
//!
//! ```text
//! ConnectorConfig (setup 请求)
//!       │
//!       ▼
//! ConnectorFactory ──▶ Arc<dyn Connector>
//!       │
//!       ├── FileSeriesConnector
//!       ├── RestPollConnector
//!       ├── RegisterMapConnector
//!       └── NodeSetConnector
//!       │
//!       ▼  PollingConnector（状态机 + 可取消轮询任务）
//! ReadingHandler (与 pipeline 共用)
//! ```
//!
//! ## 配置格式
//!
//! ```json
//! { "polling_interval_seconds": 5, "file_path": "/data/pump.csv" }
//! { "url": "http://gateway/api/pump/1", "headers": {"X-Key": "k"}, "auth": {"username": "u", "password": "p"} }
//! { "host": "192.168.1.100", "port": 502, "unit_id": 1, "registers": { "temperature": {"type": "holding", "address": 0, "count": 2, "data_type": "float32"} } }
//! { "server_url": "http://127.0.0.1:4840", "nodes": { "temperature": "ns=2;s=Temp" } }
//! ```

pub mod decode;
mod error;
mod factory;
mod file;
#[cfg(feature = "nodes")]
mod nodes;
#[cfg(feature = "registers")]
mod registers;
mod rest;
mod runtime;
mod types;

pub use error::{DecodeError, ProtocolError};
pub use factory::ConnectorFactory;
pub use file::{FileSeriesConnector, FileSeriesSource};
#[cfg(feature = "nodes")]
pub use nodes::{NodeSetConnector, NodeSetSource};
#[cfg(feature = "registers")]
pub use registers::{
    DEFAULT_MODBUS_PORT, DEFAULT_UNIT_ID, ModbusTcpTransport, RegisterClient, RegisterEndpoint,
    RegisterMapConnector, RegisterMapSource, RegisterTransport,
};
pub use rest::{RestPollConnector, RestPollSource, readings_from_json};
pub use runtime::{Connector, ConnectorSource, PollingConnector, ReadingHandler};
pub use types::*;
