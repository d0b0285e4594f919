//! 采集读数模型与线上格式。

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// 线上格式中的保留字段，不会出现在 `values` 里。
pub const RESERVED_FIELDS: [&str; 4] = [
    "equipment_id",
    "timestamp",
    "anomaly_detected",
    "anomaly_score",
];

/// 单个通道的取值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl ReadingValue {
    /// 数值通道返回 `Some`（布尔与文本不参与数值特征）。
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ReadingValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ReadingValue::Number(_))
    }

    /// 从 JSON 标量转换；null、数组、对象返回 `None`。
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(v) => Some(ReadingValue::Bool(*v)),
            Value::Number(n) => n.as_f64().map(ReadingValue::Number),
            Value::String(s) => Some(ReadingValue::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ReadingValue::Bool(v) => Value::Bool(*v),
            ReadingValue::Number(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ReadingValue::Text(v) => Value::String(v.clone()),
        }
    }
}

impl From<f64> for ReadingValue {
    fn from(value: f64) -> Self {
        ReadingValue::Number(value)
    }
}

impl From<bool> for ReadingValue {
    fn from(value: bool) -> Self {
        ReadingValue::Bool(value)
    }
}

impl From<&str> for ReadingValue {
    fn from(value: &str) -> Self {
        ReadingValue::Text(value.to_string())
    }
}

/// 线上格式解析错误。
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("reading must be a json object")]
    NotAnObject,
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// 单台设备在单个时刻的一次采样。
///
/// `equipment_id` 与 `timestamp` 始终存在；`values` 保持通道的首次出现顺序，
/// 键唯一。异常字段由评分阶段写入。
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub equipment_id: String,
    pub timestamp: DateTime<Utc>,
    pub values: IndexMap<String, ReadingValue>,
    pub anomaly_detected: Option<bool>,
    pub anomaly_score: Option<f64>,
}

impl Reading {
    pub fn new(equipment_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            equipment_id: equipment_id.into(),
            timestamp,
            values: IndexMap::new(),
            anomaly_detected: None,
            anomaly_score: None,
        }
    }

    /// 以当前时间创建。
    pub fn now(equipment_id: impl Into<String>) -> Self {
        Self::new(equipment_id, Utc::now())
    }

    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<ReadingValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// 写入通道值；保留字段会被忽略。
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ReadingValue>) {
        let name = name.into();
        if RESERVED_FIELDS.contains(&name.as_str()) {
            return;
        }
        self.values.insert(name, value.into());
    }

    pub fn numeric(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(ReadingValue::as_f64)
    }

    pub fn is_scored(&self) -> bool {
        self.anomaly_detected.is_some()
    }

    /// 转换为扁平 JSON 对象：`{equipment_id, timestamp, <field>..., anomaly_*?}`。
    pub fn to_wire(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            "equipment_id".to_string(),
            Value::String(self.equipment_id.clone()),
        );
        map.insert(
            "timestamp".to_string(),
            Value::String(format_timestamp(&self.timestamp)),
        );
        for (name, value) in &self.values {
            map.insert(name.clone(), value.to_json());
        }
        if let Some(detected) = self.anomaly_detected {
            map.insert("anomaly_detected".to_string(), Value::Bool(detected));
        }
        if let Some(score) = self.anomaly_score {
            if let Some(number) = serde_json::Number::from_f64(score) {
                map.insert("anomaly_score".to_string(), Value::Number(number));
            }
        }
        Value::Object(map)
    }

    /// 从扁平 JSON 对象解析；null 与嵌套字段被跳过。
    pub fn from_wire(value: &Value) -> Result<Self, WireError> {
        let object = value.as_object().ok_or(WireError::NotAnObject)?;
        let equipment_id = object
            .get("equipment_id")
            .and_then(Value::as_str)
            .ok_or(WireError::MissingField("equipment_id"))?;
        let raw_timestamp = object
            .get("timestamp")
            .and_then(Value::as_str)
            .ok_or(WireError::MissingField("timestamp"))?;
        let timestamp = parse_timestamp(raw_timestamp)
            .ok_or_else(|| WireError::InvalidTimestamp(raw_timestamp.to_string()))?;

        let mut reading = Reading::new(equipment_id, timestamp);
        reading.anomaly_detected = object.get("anomaly_detected").and_then(Value::as_bool);
        reading.anomaly_score = object.get("anomaly_score").and_then(Value::as_f64);
        for (name, field) in object {
            if RESERVED_FIELDS.contains(&name.as_str()) {
                continue;
            }
            if let Some(value) = ReadingValue::from_json(field) {
                reading.values.insert(name.clone(), value);
            }
        }
        Ok(reading)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, WireError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_wire(&value)
    }
}

impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let Value::Object(map) = self.to_wire() else {
            return Err(serde::ser::Error::custom("reading did not encode to an object"));
        };
        let mut out = serializer.serialize_map(Some(map.len()))?;
        for (key, value) in &map {
            out.serialize_entry(key, value)?;
        }
        out.end()
    }
}

impl<'de> Deserialize<'de> for Reading {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Reading::from_wire(&value).map_err(D::Error::custom)
    }
}

/// ISO-8601（RFC 3339，微秒精度，UTC）。
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// 解析带时区的 RFC 3339；不带时区的 ISO 时间按 UTC 处理。
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
