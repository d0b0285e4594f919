//! 寄存器映射连接器（Modbus TCP）
//!
//! 每次读取遍历寄存器映射表，逐字段读取并解码。单字段失败只跳过该字段；
//! 所有字段都失败时本轮读取失败。
//!
//! ```json
//! {
//!   "host": "192.168.1.100", "port": 502, "unit_id": 1,
//!   "registers": {
//!     "temperature": { "type": "holding", "address": 0, "count": 2, "data_type": "float32" },
//!     "running":     { "type": "coil", "address": 10 }
//!   }
//! }
//! ```

use crate::decode::{decode_bits, decode_registers};
use crate::error::ProtocolError;
use crate::runtime::{ConnectorSource, PollingConnector};
use crate::types::{ConnectorConfig, ConnectorTimeouts, RegisterKind, RegisterSpec};
use async_trait::async_trait;
use domain::{Reading, ReadingValue};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_modbus::prelude::*;
use tracing::{debug, warn};

/// Modbus 默认端口
pub const DEFAULT_MODBUS_PORT: u16 = 502;
/// 默认从站 ID
pub const DEFAULT_UNIT_ID: u8 = 1;

pub type RegisterMapConnector = PollingConnector<RegisterMapSource>;

impl RegisterMapConnector {
    pub fn from_config(
        config: &ConnectorConfig,
        timeouts: ConnectorTimeouts,
        transport: Arc<dyn RegisterTransport>,
    ) -> Result<Self, ProtocolError> {
        let source = RegisterMapSource::from_config(config, transport)?;
        Ok(PollingConnector::new(config, source, timeouts))
    }
}

/// 寄存器设备地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterEndpoint {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
}

/// 已建立的寄存器会话
#[async_trait]
pub trait RegisterClient: Send {
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ProtocolError>;

    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ProtocolError>;

    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>, ProtocolError>;

    async fn read_discrete_inputs(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, ProtocolError>;
}

/// 寄存器会话工厂
#[async_trait]
pub trait RegisterTransport: Send + Sync {
    async fn open(
        &self,
        endpoint: &RegisterEndpoint,
    ) -> Result<Box<dyn RegisterClient>, ProtocolError>;
}

/// 基于 tokio-modbus 的 TCP 传输
#[derive(Debug, Clone, Copy, Default)]
pub struct ModbusTcpTransport;

#[async_trait]
impl RegisterTransport for ModbusTcpTransport {
    async fn open(
        &self,
        endpoint: &RegisterEndpoint,
    ) -> Result<Box<dyn RegisterClient>, ProtocolError> {
        let addr: SocketAddr = tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| ProtocolError::Connection(format!("resolve {}: {e}", endpoint.host)))?
            .next()
            .ok_or_else(|| {
                ProtocolError::Connection(format!("no address for {}", endpoint.host))
            })?;
        let ctx = tcp::connect_slave(addr, Slave(endpoint.unit_id))
            .await
            .map_err(|e| ProtocolError::Connection(format!("modbus {addr}: {e}")))?;
        debug!(%addr, unit_id = endpoint.unit_id, "modbus_session_opened");
        Ok(Box::new(ModbusTcpClient { ctx }))
    }
}

struct ModbusTcpClient {
    ctx: tokio_modbus::client::Context,
}

#[async_trait]
impl RegisterClient for ModbusTcpClient {
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ProtocolError> {
        self.ctx
            .read_holding_registers(address, count)
            .await
            .map_err(|e| ProtocolError::Read(e.to_string()))?
            .map_err(|e| ProtocolError::Read(format!("exception: {e:?}")))
    }

    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ProtocolError> {
        self.ctx
            .read_input_registers(address, count)
            .await
            .map_err(|e| ProtocolError::Read(e.to_string()))?
            .map_err(|e| ProtocolError::Read(format!("exception: {e:?}")))
    }

    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>, ProtocolError> {
        self.ctx
            .read_coils(address, count)
            .await
            .map_err(|e| ProtocolError::Read(e.to_string()))?
            .map_err(|e| ProtocolError::Read(format!("exception: {e:?}")))
    }

    async fn read_discrete_inputs(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, ProtocolError> {
        self.ctx
            .read_discrete_inputs(address, count)
            .await
            .map_err(|e| ProtocolError::Read(e.to_string()))?
            .map_err(|e| ProtocolError::Read(format!("exception: {e:?}")))
    }
}

pub struct RegisterMapSource {
    equipment_id: String,
    endpoint: RegisterEndpoint,
    specs: Vec<RegisterSpec>,
    transport: Arc<dyn RegisterTransport>,
    client: Option<Box<dyn RegisterClient>>,
}

impl RegisterMapSource {
    pub fn from_config(
        config: &ConnectorConfig,
        transport: Arc<dyn RegisterTransport>,
    ) -> Result<Self, ProtocolError> {
        let host = config
            .param_str(&["host"])
            .ok_or_else(|| ProtocolError::Config("registers connector requires host".into()))?;
        let port = match config.param_u64("port")? {
            None => DEFAULT_MODBUS_PORT,
            Some(port) => u16::try_from(port)
                .ok()
                .filter(|port| *port > 0)
                .ok_or_else(|| ProtocolError::Config(format!("invalid port: {port}")))?,
        };
        let unit_id = match config.param_u64("unit_id")? {
            None => DEFAULT_UNIT_ID,
            Some(id) => u8::try_from(id)
                .map_err(|_| ProtocolError::Config(format!("invalid unit_id: {id}")))?,
        };
        let specs: Vec<RegisterSpec> = config.registers().cloned().collect();
        if specs.is_empty() {
            return Err(ProtocolError::Config(
                "registers connector requires a register map".to_string(),
            ));
        }

        Ok(Self {
            equipment_id: config.equipment_id.clone(),
            endpoint: RegisterEndpoint {
                host: host.to_string(),
                port,
                unit_id,
            },
            specs,
            transport,
            client: None,
        })
    }

    pub fn endpoint(&self) -> &RegisterEndpoint {
        &self.endpoint
    }
}

/// 读取并解码单个字段。
async fn read_spec(
    client: &mut dyn RegisterClient,
    spec: &RegisterSpec,
) -> Result<ReadingValue, ProtocolError> {
    spec.check_width()
        .map_err(|e| ProtocolError::decode(&spec.name, e))?;
    let count = u16::from(spec.count);
    match spec.register_kind {
        RegisterKind::Holding => {
            let words = client.read_holding_registers(spec.address, count).await?;
            decode_registers(&words, spec.data_type, spec.scaling)
                .map_err(|e| ProtocolError::decode(&spec.name, e))
        }
        RegisterKind::Input => {
            let words = client.read_input_registers(spec.address, count).await?;
            decode_registers(&words, spec.data_type, spec.scaling)
                .map_err(|e| ProtocolError::decode(&spec.name, e))
        }
        RegisterKind::Coil => {
            let bits = client.read_coils(spec.address, count).await?;
            decode_bits(&bits).map_err(|e| ProtocolError::decode(&spec.name, e))
        }
        RegisterKind::Discrete => {
            let bits = client.read_discrete_inputs(spec.address, count).await?;
            decode_bits(&bits).map_err(|e| ProtocolError::decode(&spec.name, e))
        }
    }
}

#[async_trait]
impl ConnectorSource for RegisterMapSource {
    async fn open(&mut self) -> Result<(), ProtocolError> {
        self.client = None;
        let client = self.transport.open(&self.endpoint).await?;
        self.client = Some(client);
        Ok(())
    }

    async fn close(&mut self) {
        self.client = None;
    }

    async fn read_all(&mut self) -> Result<Vec<Reading>, ProtocolError> {
        let client = self.client.as_mut().ok_or(ProtocolError::NotConnected)?;
        let mut reading = Reading::now(self.equipment_id.clone());
        for spec in &self.specs {
            match read_spec(&mut **client, spec).await {
                Ok(value) => reading.insert(spec.name.clone(), value),
                Err(err) => {
                    pdm_telemetry::record_decode_error();
                    warn!(
                        equipment_id = %self.equipment_id,
                        field = %spec.name,
                        address = spec.address,
                        error = %err,
                        "register_field_skipped"
                    );
                }
            }
        }
        if reading.values.is_empty() {
            return Err(ProtocolError::Read(
                "no register field could be decoded".to_string(),
            ));
        }
        Ok(vec![reading])
    }
}
