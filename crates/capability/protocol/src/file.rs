//! 分隔符文件回放连接器
//!
//! 确定性的回放源：`read_once` 一次解析所有行；轮询时每个间隔输出一行，
//! 读到末尾后从第一行重新开始（回绕时重新读取文件）。

use crate::decode::decode_cell;
use crate::error::ProtocolError;
use crate::runtime::{ConnectorSource, PollingConnector};
use crate::types::{ConnectorConfig, ConnectorTimeouts};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Reading, ReadingValue, parse_timestamp};
use indexmap::IndexMap;
use std::path::PathBuf;
use tracing::debug;

pub type FileSeriesConnector = PollingConnector<FileSeriesSource>;

impl FileSeriesConnector {
    pub fn from_config(
        config: &ConnectorConfig,
        timeouts: ConnectorTimeouts,
    ) -> Result<Self, ProtocolError> {
        let source = FileSeriesSource::from_config(config)?;
        Ok(PollingConnector::new(config, source, timeouts))
    }
}

/// 解析后的一行
#[derive(Debug, Clone)]
struct Row {
    timestamp: Option<DateTime<Utc>>,
    values: IndexMap<String, ReadingValue>,
}

pub struct FileSeriesSource {
    equipment_id: String,
    path: PathBuf,
    delimiter: u8,
    rows: Vec<Row>,
    cursor: usize,
}

impl FileSeriesSource {
    pub fn from_config(config: &ConnectorConfig) -> Result<Self, ProtocolError> {
        let path = config
            .param_str(&["file_path", "path"])
            .ok_or_else(|| ProtocolError::Config("file connector requires file_path".into()))?;
        let delimiter = match config.param_str(&["delimiter"]) {
            None => b',',
            Some(raw) if raw.len() == 1 => raw.as_bytes()[0],
            Some(raw) if raw == "\\t" => b'\t',
            Some(raw) => {
                return Err(ProtocolError::Config(format!(
                    "delimiter must be a single byte, got {raw:?}"
                )));
            }
        };
        Ok(Self {
            equipment_id: config.equipment_id.clone(),
            path: PathBuf::from(path),
            delimiter,
            rows: Vec::new(),
            cursor: 0,
        })
    }

    async fn load_rows(&self) -> Result<Vec<Row>, ProtocolError> {
        let bytes = tokio::fs::read(&self.path).await?;
        let rows = parse_rows(&bytes, self.delimiter)?;
        if rows.is_empty() {
            return Err(ProtocolError::Read(format!(
                "{} has no data rows",
                self.path.display()
            )));
        }
        debug!(path = %self.path.display(), rows = rows.len(), "file_rows_loaded");
        Ok(rows)
    }

    fn to_reading(&self, row: &Row) -> Reading {
        let mut reading = Reading::new(
            self.equipment_id.clone(),
            row.timestamp.unwrap_or_else(Utc::now),
        );
        reading.values = row.values.clone();
        reading
    }
}

fn parse_rows(bytes: &[u8], delimiter: u8) -> Result<Vec<Row>, ProtocolError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| ProtocolError::Read(format!("invalid header: {e}")))?
        .clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ProtocolError::Read(format!("invalid row: {e}")))?;
        let mut row = Row {
            timestamp: None,
            values: IndexMap::with_capacity(headers.len()),
        };
        for (header, cell) in headers.iter().zip(record.iter()) {
            match header {
                "equipment_id" => {}
                "timestamp" => row.timestamp = parse_timestamp(cell),
                name => {
                    if let Some(value) = decode_cell(cell) {
                        row.values.insert(name.to_string(), value);
                    }
                }
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

#[async_trait]
impl ConnectorSource for FileSeriesSource {
    async fn open(&mut self) -> Result<(), ProtocolError> {
        let metadata = tokio::fs::metadata(&self.path).await.map_err(|e| {
            ProtocolError::Connection(format!("{}: {e}", self.path.display()))
        })?;
        if !metadata.is_file() {
            return Err(ProtocolError::Connection(format!(
                "{} is not a file",
                self.path.display()
            )));
        }
        self.rows.clear();
        self.cursor = 0;
        Ok(())
    }

    async fn close(&mut self) {
        self.rows.clear();
        self.cursor = 0;
    }

    async fn read_all(&mut self) -> Result<Vec<Reading>, ProtocolError> {
        let rows = self.load_rows().await?;
        Ok(rows.iter().map(|row| self.to_reading(row)).collect())
    }

    async fn poll(&mut self) -> Result<Vec<Reading>, ProtocolError> {
        if self.cursor == 0 || self.rows.is_empty() {
            self.rows = self.load_rows().await?;
            self.cursor = 0;
        }
        let row = &self.rows[self.cursor];
        let reading = self.to_reading(row);
        self.cursor = (self.cursor + 1) % self.rows.len();
        Ok(vec![reading])
    }
}
