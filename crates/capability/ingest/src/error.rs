use pdm_protocol::ProtocolError;
use std::time::Duration;

/// 生命周期管理错误。
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("config error: {0}")]
    Config(String),
    #[error("unsupported connector type: {0}")]
    UnsupportedConnectorType(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("no connector registered for {0}")]
    NotFound(String),
    /// 条目已移除，但轮询任务未在时限内退出
    #[error("connector {equipment_id} did not stop within {timeout:?}")]
    ShutdownTimeout {
        equipment_id: String,
        timeout: Duration,
    },
}

impl SupervisorError {
    /// 对外错误码
    pub fn code(&self) -> &'static str {
        match self {
            SupervisorError::Config(_) => "CONNECTOR.CONFIG",
            SupervisorError::UnsupportedConnectorType(_) => "CONNECTOR.UNSUPPORTED",
            SupervisorError::Connection(_) => "CONNECTOR.CONNECTION",
            SupervisorError::NotFound(_) => "CONNECTOR.NOT_FOUND",
            SupervisorError::ShutdownTimeout { .. } => "CONNECTOR.SHUTDOWN_TIMEOUT",
        }
    }
}

impl From<ProtocolError> for SupervisorError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Config(message) => SupervisorError::Config(message),
            ProtocolError::UnsupportedConnectorType(kind) => {
                SupervisorError::UnsupportedConnectorType(kind)
            }
            other => SupervisorError::Connection(other.to_string()),
        }
    }
}
