//! # 连接器生命周期管理
//!
//! [`ConnectorSupervisor`] 以设备 ID 为键维护活动连接器，保证同一设备
//! 任一时刻至多一个连接器：对已有条目的设备再次 setup 时，先完整停止
//! （断开 + 注销）旧连接器，再连接新连接器。
//!
//! 同一设备的 setup / stop 由该设备的锁串行化；注册表锁只覆盖增删查，
//! 慢连接不会阻塞其他设备。停止等待有上限（`ConnectorTimeouts::shutdown`），
//! 超时后条目仍被移除。停止或替换后通过 `ReadingHandler::stream_closed`
//! 通知下游丢弃该设备的流状态。

mod error;
mod supervisor;

pub use error::SupervisorError;
pub use supervisor::{ConnectorHandle, ConnectorStatus, ConnectorSupervisor};
