//! 连接器配置与状态类型定义

use crate::error::{DecodeError, ProtocolError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 默认轮询间隔（秒）
pub const DEFAULT_POLLING_INTERVAL_SECONDS: u64 = 5;
/// 连接超时上限
pub const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// 连接器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorType {
    /// 分隔符文件回放
    File,
    /// REST 轮询
    Rest,
    /// 寄存器映射（Modbus 风格）
    Registers,
    /// 节点集（OPC-UA 风格）
    Nodes,
}

impl ConnectorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorType::File => "file",
            ConnectorType::Rest => "rest",
            ConnectorType::Registers => "registers",
            ConnectorType::Nodes => "nodes",
        }
    }
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectorType {
    type Err = ProtocolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "file" | "csv" => Ok(ConnectorType::File),
            "rest" | "api" => Ok(ConnectorType::Rest),
            "registers" | "modbus" => Ok(ConnectorType::Registers),
            "nodes" | "opcua" => Ok(ConnectorType::Nodes),
            other => Err(ProtocolError::Config(format!(
                "unknown connector type: {other}"
            ))),
        }
    }
}

/// 连接器生命周期状态
///
/// ```text
/// Disconnected ─connect─▶ Connected ─read_loop─▶ Polling
///      │                                            │
///      └──────▶ Failed        disconnect ─▶ Stopping ─▶ Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorState {
    Disconnected,
    Connected,
    Polling,
    Stopping,
    Stopped,
    Failed,
}

impl ConnectorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorState::Disconnected => "disconnected",
            ConnectorState::Connected => "connected",
            ConnectorState::Polling => "polling",
            ConnectorState::Stopping => "stopping",
            ConnectorState::Stopped => "stopped",
            ConnectorState::Failed => "failed",
        }
    }

    /// 是否处于可读取状态。
    pub fn is_running(&self) -> bool {
        matches!(self, ConnectorState::Connected | ConnectorState::Polling)
    }

    /// 是否允许发起新的 connect。
    pub fn can_connect(&self) -> bool {
        matches!(
            self,
            ConnectorState::Disconnected | ConnectorState::Failed | ConnectorState::Stopped
        )
    }
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 寄存器区类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    /// 保持寄存器 (0x03)
    #[default]
    #[serde(alias = "holding_register")]
    Holding,
    /// 输入寄存器 (0x04)
    #[serde(alias = "input_register")]
    Input,
    /// 线圈 (0x01)
    #[serde(alias = "coils")]
    Coil,
    /// 离散输入 (0x02)
    #[serde(alias = "discrete_input")]
    Discrete,
}

impl RegisterKind {
    pub fn is_bit(&self) -> bool {
        matches!(self, RegisterKind::Coil | RegisterKind::Discrete)
    }
}

/// 寄存器数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterDataType {
    /// 32位浮点数（2个寄存器，高字在前）
    #[default]
    #[serde(alias = "float")]
    Float32,
    /// 32位整数（2个寄存器）
    Int32,
    /// 16位整数（1个寄存器）
    #[serde(alias = "uint16")]
    Int16,
    /// 布尔（1个寄存器，非零为真）
    Bool,
}

impl RegisterDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterDataType::Float32 => "float32",
            RegisterDataType::Int32 => "int32",
            RegisterDataType::Int16 => "int16",
            RegisterDataType::Bool => "bool",
        }
    }

    /// 所需寄存器个数
    pub fn width(&self) -> usize {
        match self {
            RegisterDataType::Float32 | RegisterDataType::Int32 => 2,
            RegisterDataType::Int16 | RegisterDataType::Bool => 1,
        }
    }
}

/// 单个寄存器字段定义
///
/// 线上格式：`{<name>: {type, address, count, data_type, scaling}}`，
/// `name` 取自外层键。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterSpec {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub register_kind: RegisterKind,
    pub address: u16,
    #[serde(default = "default_register_count")]
    pub count: u8,
    #[serde(default)]
    pub data_type: RegisterDataType,
    #[serde(default = "default_scaling")]
    pub scaling: f64,
}

fn default_register_count() -> u8 {
    1
}

fn default_scaling() -> f64 {
    1.0
}

impl RegisterSpec {
    /// 检查 `count` 是否满足数据类型宽度；线圈/离散输入只需 1 位。
    pub fn check_width(&self) -> Result<(), DecodeError> {
        let required = if self.register_kind.is_bit() {
            1
        } else {
            self.data_type.width()
        };
        let actual = usize::from(self.count);
        if actual < required {
            return Err(DecodeError::InsufficientWidth {
                data_type: if self.register_kind.is_bit() {
                    "bit"
                } else {
                    self.data_type.as_str()
                },
                required,
                actual,
            });
        }
        Ok(())
    }
}

/// 节点引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    pub name: String,
    pub node_id: String,
}

/// 协议映射项
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEntry {
    Register(RegisterSpec),
    Node(NodeRef),
}

/// 连接器配置（构造后不可变）
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub equipment_id: String,
    pub connector_type: ConnectorType,
    pub connection_params: Map<String, Value>,
    pub polling_interval_seconds: u64,
    pub protocol_map: IndexMap<String, ProtocolEntry>,
}

impl ConnectorConfig {
    /// 由 setup 请求的 `config` 与 `connection_params` 构造；后者覆盖前者。
    pub fn from_parts(
        equipment_id: &str,
        connector_type: &str,
        config: &Map<String, Value>,
        connection_params: &Map<String, Value>,
    ) -> Result<Self, ProtocolError> {
        let equipment_id = equipment_id.trim();
        if equipment_id.is_empty() {
            return Err(ProtocolError::Config("equipment_id is required".to_string()));
        }
        let connector_type: ConnectorType = connector_type.parse()?;

        let mut params = config.clone();
        for (key, value) in connection_params {
            params.insert(key.clone(), value.clone());
        }

        let polling_interval_seconds = parse_interval(&params)?;
        let protocol_map = match connector_type {
            ConnectorType::Registers => parse_registers(params.get("registers"))?,
            ConnectorType::Nodes => parse_nodes(params.get("nodes"))?,
            ConnectorType::File | ConnectorType::Rest => IndexMap::new(),
        };

        let built = Self {
            equipment_id: equipment_id.to_string(),
            connector_type,
            connection_params: params,
            polling_interval_seconds,
            protocol_map,
        };
        built.check_required()?;
        Ok(built)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_seconds)
    }

    /// 读取字符串参数（按顺序尝试别名）。
    pub fn param_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|key| self.connection_params.get(*key))
            .filter_map(Value::as_str)
            .map(str::trim)
            .find(|value| !value.is_empty())
    }

    /// 读取整数参数，接受数字或数字字符串。
    pub fn param_u64(&self, key: &str) -> Result<Option<u64>, ProtocolError> {
        match self.connection_params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value_as_u64(value)
                .map(Some)
                .ok_or_else(|| ProtocolError::Config(format!("{key} must be an integer"))),
        }
    }

    pub fn registers(&self) -> impl Iterator<Item = &RegisterSpec> {
        self.protocol_map.values().filter_map(|entry| match entry {
            ProtocolEntry::Register(spec) => Some(spec),
            ProtocolEntry::Node(_) => None,
        })
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeRef> {
        self.protocol_map.values().filter_map(|entry| match entry {
            ProtocolEntry::Node(node) => Some(node),
            ProtocolEntry::Register(_) => None,
        })
    }

    fn check_required(&self) -> Result<(), ProtocolError> {
        let (keys, label): (&[&str], &str) = match self.connector_type {
            ConnectorType::File => (&["file_path", "path"], "file_path"),
            ConnectorType::Rest => (&["url", "api_url"], "url"),
            ConnectorType::Registers => (&["host"], "host"),
            ConnectorType::Nodes => (&["server_url", "endpoint"], "server_url"),
        };
        if self.param_str(keys).is_none() {
            return Err(ProtocolError::Config(format!(
                "{} connector requires {label}",
                self.connector_type
            )));
        }
        match self.connector_type {
            ConnectorType::Registers if self.protocol_map.is_empty() => Err(
                ProtocolError::Config("registers connector requires a register map".to_string()),
            ),
            ConnectorType::Nodes if self.protocol_map.is_empty() => Err(ProtocolError::Config(
                "nodes connector requires at least one node".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn parse_interval(params: &Map<String, Value>) -> Result<u64, ProtocolError> {
    let raw = params
        .get("polling_interval_seconds")
        .or_else(|| params.get("interval"));
    let Some(raw) = raw.filter(|value| !value.is_null()) else {
        return Ok(DEFAULT_POLLING_INTERVAL_SECONDS);
    };
    match value_as_u64(raw) {
        Some(seconds) if seconds >= 1 => Ok(seconds),
        _ => Err(ProtocolError::Config(format!(
            "polling_interval_seconds must be an integer >= 1, got {raw}"
        ))),
    }
}

fn parse_registers(raw: Option<&Value>) -> Result<IndexMap<String, ProtocolEntry>, ProtocolError> {
    let Some(raw) = raw else {
        return Ok(IndexMap::new());
    };
    let entries = raw
        .as_object()
        .ok_or_else(|| ProtocolError::Config("registers must be an object".to_string()))?;
    let mut map = IndexMap::with_capacity(entries.len());
    for (name, entry) in entries {
        let mut spec: RegisterSpec = serde_json::from_value(entry.clone())
            .map_err(|e| ProtocolError::Config(format!("register {name}: {e}")))?;
        spec.name = name.clone();
        map.insert(name.clone(), ProtocolEntry::Register(spec));
    }
    Ok(map)
}

fn parse_nodes(raw: Option<&Value>) -> Result<IndexMap<String, ProtocolEntry>, ProtocolError> {
    let mut map = IndexMap::new();
    match raw {
        None => {}
        // { "temperature": "ns=2;s=Temp" }
        Some(Value::Object(entries)) => {
            for (name, node_id) in entries {
                let node_id = node_id.as_str().ok_or_else(|| {
                    ProtocolError::Config(format!("node {name}: node id must be a string"))
                })?;
                let node = NodeRef {
                    name: name.clone(),
                    node_id: node_id.to_string(),
                };
                map.insert(name.clone(), ProtocolEntry::Node(node));
            }
        }
        // [ "ns=2;s=Temp" ]：字段名即节点 ID
        Some(Value::Array(entries)) => {
            for entry in entries {
                let node_id = entry.as_str().ok_or_else(|| {
                    ProtocolError::Config("node ids must be strings".to_string())
                })?;
                let node = NodeRef {
                    name: node_id.to_string(),
                    node_id: node_id.to_string(),
                };
                map.insert(node_id.to_string(), ProtocolEntry::Node(node));
            }
        }
        Some(_) => {
            return Err(ProtocolError::Config(
                "nodes must be an object or an array".to_string(),
            ));
        }
    }
    Ok(map)
}

/// 连接器超时设置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorTimeouts {
    pub connect: Duration,
    pub read: Duration,
    pub shutdown: Duration,
}

impl ConnectorTimeouts {
    /// 连接超时会被截断到 10s。
    pub fn new(connect: Duration, read: Duration, shutdown: Duration) -> Self {
        Self {
            connect: connect.min(MAX_CONNECT_TIMEOUT),
            read,
            shutdown,
        }
    }
}

impl Default for ConnectorTimeouts {
    fn default() -> Self {
        Self::new(
            MAX_CONNECT_TIMEOUT,
            Duration::from_secs(5),
            Duration::from_secs(2),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn connector_type_aliases() {
        assert_eq!("csv".parse::<ConnectorType>().unwrap(), ConnectorType::File);
        assert_eq!("API".parse::<ConnectorType>().unwrap(), ConnectorType::Rest);
        assert_eq!(
            "modbus".parse::<ConnectorType>().unwrap(),
            ConnectorType::Registers
        );
        assert_eq!("opcua".parse::<ConnectorType>().unwrap(), ConnectorType::Nodes);
        assert!(matches!(
            "mqtt".parse::<ConnectorType>(),
            Err(ProtocolError::Config(_))
        ));
    }

    #[test]
    fn register_spec_defaults_follow_wire_format() {
        let spec: RegisterSpec = serde_json::from_value(json!({ "address": 100 })).unwrap();
        assert_eq!(spec.register_kind, RegisterKind::Holding);
        assert_eq!(spec.count, 1);
        assert_eq!(spec.data_type, RegisterDataType::Float32);
        assert_eq!(spec.scaling, 1.0);
        assert!(spec.check_width().is_err());

        let spec: RegisterSpec = serde_json::from_value(
            json!({ "type": "coil", "address": 3, "data_type": "float" }),
        )
        .unwrap();
        assert!(spec.check_width().is_ok());
    }

    #[test]
    fn params_override_config_and_interval_is_validated() {
        let config = object(json!({ "polling_interval_seconds": 10, "host": "a" }));
        let params = object(json!({
            "host": "10.0.0.5",
            "registers": { "temperature": { "address": 0, "count": 2 } }
        }));
        let built = ConnectorConfig::from_parts("PUMP-1", "registers", &config, &params).unwrap();
        assert_eq!(built.param_str(&["host"]), Some("10.0.0.5"));
        assert_eq!(built.polling_interval_seconds, 10);
        assert_eq!(built.registers().count(), 1);

        let bad = object(json!({ "interval": 0, "file_path": "/tmp/x.csv" }));
        assert!(ConnectorConfig::from_parts("PUMP-1", "file", &bad, &Map::new()).is_err());
    }

    #[test]
    fn missing_required_param_is_config_error() {
        let err = ConnectorConfig::from_parts("PUMP-1", "rest", &Map::new(), &Map::new())
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Config(_)));
    }

    #[test]
    fn nodes_accept_map_or_list() {
        let params = object(json!({
            "server_url": "http://127.0.0.1:4840",
            "nodes": ["ns=2;s=Temp"]
        }));
        let built = ConnectorConfig::from_parts("HVAC-1", "nodes", &Map::new(), &params).unwrap();
        let node = built.nodes().next().unwrap();
        assert_eq!(node.name, "ns=2;s=Temp");
    }

    #[test]
    fn connect_timeout_is_clamped() {
        let timeouts = ConnectorTimeouts::new(
            Duration::from_secs(30),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert_eq!(timeouts.connect, MAX_CONNECT_TIMEOUT);
    }
}
