//! 连接器工厂
//!
//! 按 `connector_type` 构造连接器；未编译进当前构建的协议返回
//! `UnsupportedConnectorType`，不会替换为其他实现。

use crate::error::ProtocolError;
use crate::file::FileSeriesConnector;
use crate::rest::RestPollConnector;
use crate::runtime::Connector;
use crate::types::{ConnectorConfig, ConnectorTimeouts, ConnectorType};
use std::sync::Arc;

#[cfg(feature = "nodes")]
use crate::nodes::NodeSetConnector;
#[cfg(feature = "registers")]
use crate::registers::{ModbusTcpTransport, RegisterMapConnector, RegisterTransport};

/// 连接器工厂
#[derive(Clone)]
pub struct ConnectorFactory {
    timeouts: ConnectorTimeouts,
    #[cfg(feature = "registers")]
    register_transport: Arc<dyn RegisterTransport>,
}

impl ConnectorFactory {
    pub fn new(timeouts: ConnectorTimeouts) -> Self {
        Self {
            timeouts,
            #[cfg(feature = "registers")]
            register_transport: Arc::new(ModbusTcpTransport),
        }
    }

    /// 替换寄存器传输（测试或自定义网关）。
    #[cfg(feature = "registers")]
    pub fn with_register_transport(mut self, transport: Arc<dyn RegisterTransport>) -> Self {
        self.register_transport = transport;
        self
    }

    pub fn timeouts(&self) -> ConnectorTimeouts {
        self.timeouts
    }

    /// 当前构建支持的连接器类型。
    pub fn supported_types() -> Vec<ConnectorType> {
        let mut types = vec![ConnectorType::File, ConnectorType::Rest];
        if cfg!(feature = "registers") {
            types.push(ConnectorType::Registers);
        }
        if cfg!(feature = "nodes") {
            types.push(ConnectorType::Nodes);
        }
        types
    }

    pub fn create(&self, config: &ConnectorConfig) -> Result<Arc<dyn Connector>, ProtocolError> {
        match config.connector_type {
            ConnectorType::File => Ok(Arc::new(FileSeriesConnector::from_config(
                config,
                self.timeouts,
            )?)),
            ConnectorType::Rest => Ok(Arc::new(RestPollConnector::from_config(
                config,
                self.timeouts,
            )?)),
            ConnectorType::Registers => self.create_registers(config),
            ConnectorType::Nodes => self.create_nodes(config),
        }
    }

    #[cfg(feature = "registers")]
    fn create_registers(
        &self,
        config: &ConnectorConfig,
    ) -> Result<Arc<dyn Connector>, ProtocolError> {
        Ok(Arc::new(RegisterMapConnector::from_config(
            config,
            self.timeouts,
            Arc::clone(&self.register_transport),
        )?))
    }

    #[cfg(not(feature = "registers"))]
    fn create_registers(
        &self,
        config: &ConnectorConfig,
    ) -> Result<Arc<dyn Connector>, ProtocolError> {
        Err(ProtocolError::UnsupportedConnectorType(
            config.connector_type.to_string(),
        ))
    }

    #[cfg(feature = "nodes")]
    fn create_nodes(&self, config: &ConnectorConfig) -> Result<Arc<dyn Connector>, ProtocolError> {
        Ok(Arc::new(NodeSetConnector::from_config(config, self.timeouts)?))
    }

    #[cfg(not(feature = "nodes"))]
    fn create_nodes(&self, config: &ConnectorConfig) -> Result<Arc<dyn Connector>, ProtocolError> {
        Err(ProtocolError::UnsupportedConnectorType(
            config.connector_type.to_string(),
        ))
    }
}

impl Default for ConnectorFactory {
    fn default() -> Self {
        Self::new(ConnectorTimeouts::default())
    }
}
