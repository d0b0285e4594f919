//! 稳定的 DTO 与 API 响应契约。
//!
//! 连接器 setup/stop/list 的请求与响应结构；字段使用 snake_case，
//! 同时接受 camelCase 别名。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 标准 API 响应封装。
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

/// 失败响应的错误体。
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// 连接器 setup 请求体。
///
/// `connector_type` 保持为字符串，由协议层解析（未知类型在 setup 时同步报错）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupConnectorRequest {
    #[serde(alias = "equipmentId")]
    pub equipment_id: String,
    #[serde(alias = "connectorType")]
    pub connector_type: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default, alias = "connectionParams")]
    pub connection_params: Map<String, Value>,
}

/// 连接器运行状态（对外只区分运行/停止）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorRunStatus {
    Running,
    Stopped,
}

/// setup 成功响应。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupConnectorResponse {
    pub equipment_id: String,
    pub connector_type: String,
    pub status: ConnectorRunStatus,
}

/// stop 成功响应。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopConnectorResponse {
    pub equipment_id: String,
    pub status: ConnectorRunStatus,
}

/// list 返回的单条连接器摘要。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorSummary {
    pub equipment_id: String,
    pub connector_type: String,
    pub status: ConnectorRunStatus,
}
