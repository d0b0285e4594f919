//! 节点集连接器（OPC-UA 风格）
//!
//! 通过节点网关的 HTTP/JSON 接口访问服务器：
//! - `GET {server_url}`：会话探测
//! - `GET {server_url}/nodes/{node_id}`：读取节点当前值（标量或 `{value, status}`）
//!
//! 单个节点读取失败只省略该字段；至少一个节点成功即产出读数。

use crate::decode::decode_node_value;
use crate::error::ProtocolError;
use crate::runtime::{ConnectorSource, PollingConnector};
use crate::types::{ConnectorConfig, ConnectorTimeouts, NodeRef};
use async_trait::async_trait;
use domain::{Reading, ReadingValue};
use serde_json::Value;
use tracing::{debug, warn};

pub type NodeSetConnector = PollingConnector<NodeSetSource>;

impl NodeSetConnector {
    pub fn from_config(
        config: &ConnectorConfig,
        timeouts: ConnectorTimeouts,
    ) -> Result<Self, ProtocolError> {
        let source = NodeSetSource::from_config(config, timeouts)?;
        Ok(PollingConnector::new(config, source, timeouts))
    }
}

pub struct NodeSetSource {
    equipment_id: String,
    server_url: reqwest::Url,
    nodes: Vec<NodeRef>,
    client: reqwest::Client,
    timeouts: ConnectorTimeouts,
    connected: bool,
}

impl NodeSetSource {
    pub fn from_config(
        config: &ConnectorConfig,
        timeouts: ConnectorTimeouts,
    ) -> Result<Self, ProtocolError> {
        let raw_url = config
            .param_str(&["server_url", "endpoint"])
            .ok_or_else(|| ProtocolError::Config("nodes connector requires server_url".into()))?;
        let server_url = reqwest::Url::parse(raw_url)
            .map_err(|e| ProtocolError::Config(format!("invalid server_url {raw_url}: {e}")))?;
        if server_url.cannot_be_a_base() {
            return Err(ProtocolError::Config(format!(
                "server_url {raw_url} cannot carry node paths"
            )));
        }
        let nodes: Vec<NodeRef> = config.nodes().cloned().collect();
        if nodes.is_empty() {
            return Err(ProtocolError::Config(
                "nodes connector requires at least one node".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .build()
            .map_err(|e| ProtocolError::Config(format!("http client: {e}")))?;

        Ok(Self {
            equipment_id: config.equipment_id.clone(),
            server_url,
            nodes,
            client,
            timeouts,
            connected: false,
        })
    }

    fn node_url(&self, node: &NodeRef) -> Result<reqwest::Url, ProtocolError> {
        let mut url = self.server_url.clone();
        url.path_segments_mut()
            .map_err(|_| ProtocolError::Config("server_url cannot carry node paths".into()))?
            .pop_if_empty()
            .push("nodes")
            .push(&node.node_id);
        Ok(url)
    }

    async fn read_node(&self, node: &NodeRef) -> Result<ReadingValue, ProtocolError> {
        let url = self.node_url(node)?;
        let body: Value = self
            .client
            .get(url)
            .timeout(self.timeouts.read)
            .send()
            .await
            .map_err(|e| ProtocolError::Read(e.to_string()))?
            .error_for_status()
            .map_err(|e| ProtocolError::Read(e.to_string()))?
            .json()
            .await
            .map_err(|e| ProtocolError::Read(format!("invalid json: {e}")))?;
        decode_node_value(&body).map_err(|e| ProtocolError::decode(&node.name, e))
    }
}

#[async_trait]
impl ConnectorSource for NodeSetSource {
    async fn open(&mut self) -> Result<(), ProtocolError> {
        let response = self
            .client
            .get(self.server_url.clone())
            .timeout(self.timeouts.connect)
            .send()
            .await
            .map_err(|e| ProtocolError::Connection(format!("{}: {e}", self.server_url)))?;
        if !response.status().is_success() {
            return Err(ProtocolError::Connection(format!(
                "{} returned {}",
                self.server_url,
                response.status()
            )));
        }
        self.connected = true;
        debug!(
            equipment_id = %self.equipment_id,
            server_url = %self.server_url,
            nodes = self.nodes.len(),
            "node_session_opened"
        );
        Ok(())
    }

    async fn close(&mut self) {
        self.connected = false;
    }

    async fn read_all(&mut self) -> Result<Vec<Reading>, ProtocolError> {
        if !self.connected {
            return Err(ProtocolError::NotConnected);
        }
        let mut reading = Reading::now(self.equipment_id.clone());
        for node in &self.nodes {
            match self.read_node(node).await {
                Ok(value) => reading.insert(node.name.clone(), value),
                Err(err) => {
                    pdm_telemetry::record_decode_error();
                    warn!(
                        equipment_id = %self.equipment_id,
                        node_id = %node.node_id,
                        error = %err,
                        "node_read_skipped"
                    );
                }
            }
        }
        if reading.values.is_empty() {
            return Err(ProtocolError::Read("no node could be read".to_string()));
        }
        Ok(vec![reading])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    #[test]
    fn node_url_escapes_node_id() {
        let params = json!({
            "server_url": "http://127.0.0.1:4840/gateway/",
            "nodes": { "temperature": "ns=2;s=Boiler/Temp" }
        });
        let config = ConnectorConfig::from_parts(
            "BOILER-1",
            "nodes",
            params.as_object().unwrap(),
            &Map::new(),
        )
        .unwrap();
        let source = NodeSetSource::from_config(&config, ConnectorTimeouts::default()).unwrap();
        let node = config.nodes().next().unwrap();
        let url = source.node_url(node).unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:4840/gateway/nodes/ns=2;s=Boiler%2FTemp"
        );
    }
}
