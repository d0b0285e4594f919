//! 协议错误类型定义

use std::time::Duration;

/// 连接器错误
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// 配置错误（setup 时同步返回，不启动任务）
    #[error("config error: {0}")]
    Config(String),

    /// 连接器类型未编译进当前构建
    #[error("unsupported connector type: {0}")]
    UnsupportedConnectorType(String),

    /// 连接错误
    #[error("connection error: {0}")]
    Connection(String),

    /// 单次读取失败
    #[error("read error: {0}")]
    Read(String),

    /// 单个字段解码失败
    #[error("decode error for {field}: {source}")]
    Decode {
        field: String,
        #[source]
        source: DecodeError,
    },

    /// 停止超时
    #[error("shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    /// 未连接
    #[error("connector is not connected")]
    NotConnected,

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 回调处理失败
    #[error("handler error: {0}")]
    Handler(String),
}

impl ProtocolError {
    pub fn decode(field: impl Into<String>, source: DecodeError) -> Self {
        Self::Decode {
            field: field.into(),
            source,
        }
    }
}

/// 原始值解码错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("{data_type} needs {required} registers, got {actual}")]
    InsufficientWidth {
        data_type: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("empty response")]
    Empty,

    #[error("bad status: {0}")]
    BadStatus(String),

    #[error("unsupported value: {0}")]
    Unsupported(String),
}
