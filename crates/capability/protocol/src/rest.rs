//! REST 轮询连接器
//!
//! `connect` 发送一次限时探测请求；读取时 GET 一次，JSON 数组按元素
//! 产出多条读数，JSON 对象产出一条。

use crate::error::ProtocolError;
use crate::runtime::{ConnectorSource, PollingConnector};
use crate::types::{ConnectorConfig, ConnectorTimeouts};
use async_trait::async_trait;
use domain::{Reading, ReadingValue, parse_timestamp};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};
use tracing::debug;

pub type RestPollConnector = PollingConnector<RestPollSource>;

impl RestPollConnector {
    pub fn from_config(
        config: &ConnectorConfig,
        timeouts: ConnectorTimeouts,
    ) -> Result<Self, ProtocolError> {
        let source = RestPollSource::from_config(config, timeouts)?;
        Ok(PollingConnector::new(config, source, timeouts))
    }
}

#[derive(Debug, Clone)]
struct BasicAuth {
    username: String,
    password: Option<String>,
}

pub struct RestPollSource {
    equipment_id: String,
    url: reqwest::Url,
    client: reqwest::Client,
    auth: Option<BasicAuth>,
    timeouts: ConnectorTimeouts,
}

impl RestPollSource {
    pub fn from_config(
        config: &ConnectorConfig,
        timeouts: ConnectorTimeouts,
    ) -> Result<Self, ProtocolError> {
        let raw_url = config
            .param_str(&["url", "api_url"])
            .ok_or_else(|| ProtocolError::Config("rest connector requires url".to_string()))?;
        let url = reqwest::Url::parse(raw_url)
            .map_err(|e| ProtocolError::Config(format!("invalid url {raw_url}: {e}")))?;
        let headers = parse_headers(config.connection_params.get("headers"))?;
        let auth = parse_auth(config.connection_params.get("auth"))?;
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .default_headers(headers)
            .build()
            .map_err(|e| ProtocolError::Config(format!("http client: {e}")))?;

        Ok(Self {
            equipment_id: config.equipment_id.clone(),
            url,
            client,
            auth,
            timeouts,
        })
    }

    fn get(&self) -> reqwest::RequestBuilder {
        let request = self.client.get(self.url.clone());
        match &self.auth {
            Some(auth) => request.basic_auth(&auth.username, auth.password.as_ref()),
            None => request,
        }
    }
}

fn parse_headers(raw: Option<&Value>) -> Result<HeaderMap, ProtocolError> {
    let mut headers = HeaderMap::new();
    let Some(raw) = raw.filter(|value| !value.is_null()) else {
        return Ok(headers);
    };
    let entries = raw
        .as_object()
        .ok_or_else(|| ProtocolError::Config("headers must be an object".to_string()))?;
    for (name, value) in entries {
        let value = value
            .as_str()
            .ok_or_else(|| ProtocolError::Config(format!("header {name} must be a string")))?;
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ProtocolError::Config(format!("header {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ProtocolError::Config(format!("header {name}: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn parse_auth(raw: Option<&Value>) -> Result<Option<BasicAuth>, ProtocolError> {
    let invalid = || ProtocolError::Config("auth must be {username, password}".to_string());
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(object)) => {
            let username = object
                .get("username")
                .and_then(Value::as_str)
                .ok_or_else(invalid)?;
            let password = object
                .get("password")
                .and_then(Value::as_str)
                .map(str::to_string);
            Ok(Some(BasicAuth {
                username: username.to_string(),
                password,
            }))
        }
        // ["user", "pass"]
        Some(Value::Array(items)) => {
            let username = items.first().and_then(Value::as_str).ok_or_else(invalid)?;
            let password = items.get(1).and_then(Value::as_str).map(str::to_string);
            Ok(Some(BasicAuth {
                username: username.to_string(),
                password,
            }))
        }
        Some(_) => Err(invalid()),
    }
}

/// 把 REST 响应体转换为读数。
///
/// 对象中的 `readings` 字段可以是数组（展开为多条）或对象（合并进顶层）；
/// 嵌套的非标量字段被跳过；标量响应作为 `value` 字段。
pub fn readings_from_json(equipment_id: &str, body: &Value) -> Vec<Reading> {
    match body {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| reading_from_item(equipment_id, item))
            .collect(),
        Value::Object(object) => match object.get("readings") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| reading_from_item(equipment_id, item))
                .collect(),
            Some(Value::Object(inner)) => {
                let mut merged = object.clone();
                merged.remove("readings");
                for (key, value) in inner {
                    merged.insert(key.clone(), value.clone());
                }
                reading_from_object(equipment_id, &merged)
                    .into_iter()
                    .collect()
            }
            _ => reading_from_object(equipment_id, object).into_iter().collect(),
        },
        other => reading_from_item(equipment_id, other).into_iter().collect(),
    }
}

fn reading_from_item(equipment_id: &str, item: &Value) -> Option<Reading> {
    match item {
        Value::Object(object) => reading_from_object(equipment_id, object),
        scalar => ReadingValue::from_json(scalar)
            .map(|value| Reading::now(equipment_id).with_value("value", value)),
    }
}

fn reading_from_object(equipment_id: &str, object: &Map<String, Value>) -> Option<Reading> {
    let timestamp = object
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(parse_timestamp);
    let mut reading = match timestamp {
        Some(ts) => Reading::new(equipment_id, ts),
        None => Reading::now(equipment_id),
    };
    for (name, value) in object {
        if let Some(value) = ReadingValue::from_json(value) {
            reading.insert(name.clone(), value);
        }
    }
    (!reading.values.is_empty()).then_some(reading)
}

#[async_trait]
impl ConnectorSource for RestPollSource {
    async fn open(&mut self) -> Result<(), ProtocolError> {
        let response = self
            .get()
            .timeout(self.timeouts.connect)
            .send()
            .await
            .map_err(|e| ProtocolError::Connection(format!("probe {}: {e}", self.url)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProtocolError::Connection(format!(
                "probe {} returned {status}",
                self.url
            )));
        }
        debug!(equipment_id = %self.equipment_id, url = %self.url, "rest_probe_ok");
        Ok(())
    }

    async fn close(&mut self) {}

    async fn read_all(&mut self) -> Result<Vec<Reading>, ProtocolError> {
        let response = self
            .get()
            .timeout(self.timeouts.read)
            .send()
            .await
            .map_err(|e| ProtocolError::Read(e.to_string()))?
            .error_for_status()
            .map_err(|e| ProtocolError::Read(e.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProtocolError::Read(format!("invalid json: {e}")))?;
        let readings = readings_from_json(&self.equipment_id, &body);
        if readings.is_empty() {
            return Err(ProtocolError::Read("response contained no readings".to_string()));
        }
        Ok(readings)
    }
}
