//! 读数特征工程。
//!
//! 每台设备维护一条独立的流状态，`process` 依次执行：
//! 时间特征 → 缺失值填充 → 滚动统计与变化率 → 交互特征。
//! 缺失数据只会触发填充规则，不会报错。

use chrono::{DateTime, Datelike, Timelike, Utc};
use domain::{Reading, ReadingValue};
use indexmap::IndexMap;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// 缺失文本字段的填充值。
pub const UNKNOWN_SENTINEL: &str = "unknown";

/// 时间特征名。
pub const TIME_FEATURES: [&str; 5] = ["hour", "day", "month", "year", "day_of_week"];

/// 规范化错误。
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("processor state unavailable: {0}")]
    State(String),
}

/// 特征工程参数。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessorConfig {
    /// 滚动窗口大小
    pub window: usize,
    /// 参与交互特征的数值字段上限
    pub max_interaction_fields: usize,
    /// 比值特征分母为 0 时的替代值
    pub ratio_epsilon: f64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            window: 5,
            max_interaction_fields: 5,
            ratio_epsilon: 1e-10,
        }
    }
}

/// 评分前的特征集合。
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedFeatureSet {
    pub equipment_id: String,
    pub timestamp: DateTime<Utc>,
    pub features: IndexMap<String, ReadingValue>,
}

impl ProcessedFeatureSet {
    pub fn numeric(&self, name: &str) -> Option<f64> {
        self.features.get(name).and_then(ReadingValue::as_f64)
    }

    pub fn get(&self, name: &str) -> Option<&ReadingValue> {
        self.features.get(name)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[derive(Debug, Default)]
struct FieldHistory {
    window: VecDeque<f64>,
    observed_sum: f64,
    observed_count: u64,
    last: Option<(f64, DateTime<Utc>)>,
}

impl FieldHistory {
    fn running_mean(&self) -> Option<f64> {
        (self.observed_count > 0).then(|| self.observed_sum / self.observed_count as f64)
    }

    fn push(&mut self, value: f64, window: usize) {
        self.window.push_back(value);
        while self.window.len() > window {
            self.window.pop_front();
        }
    }

    fn rolling(&self) -> RollingStats {
        RollingStats::of(self.window.iter().copied())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct RollingStats {
    mean: f64,
    std: f64,
    min: f64,
    max: f64,
}

impl RollingStats {
    /// 样本标准差（n-1）；单个样本时为 0。
    fn of(values: impl Iterator<Item = f64> + Clone) -> Self {
        let count = values.clone().count();
        if count == 0 {
            return Self {
                mean: 0.0,
                std: 0.0,
                min: 0.0,
                max: 0.0,
            };
        }
        let n = count as f64;
        let mean = values.clone().sum::<f64>() / n;
        let std = if count < 2 {
            0.0
        } else {
            (values.clone().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        };
        let min = values.clone().fold(f64::INFINITY, f64::min);
        let max = values.fold(f64::NEG_INFINITY, f64::max);
        Self {
            mean,
            std,
            min,
            max,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FieldKind {
    Text,
    Bool,
}

/// 单台设备的流状态。
#[derive(Debug, Default)]
struct StreamState {
    numeric: IndexMap<String, FieldHistory>,
    other: IndexMap<String, FieldKind>,
}

#[derive(Debug, Clone, Copy)]
struct Emit {
    rolling: bool,
    rate: bool,
}

impl StreamState {
    fn derive(&mut self, reading: &Reading, config: &ProcessorConfig, emit: Emit) -> ProcessedFeatureSet {
        let mut features: IndexMap<String, ReadingValue> = IndexMap::new();
        let mut numeric_now: IndexMap<String, f64> = IndexMap::new();

        for (name, value) in &reading.values {
            match value {
                ReadingValue::Number(v) if v.is_finite() => {
                    let history = self.numeric.entry(name.clone()).or_default();
                    history.observed_sum += v;
                    history.observed_count += 1;
                    numeric_now.insert(name.clone(), *v);
                    features.insert(name.clone(), value.clone());
                }
                // NaN / 无穷视为缺失，由下面的填充处理
                ReadingValue::Number(_) => {
                    self.numeric.entry(name.clone()).or_default();
                }
                ReadingValue::Text(_) if self.numeric.contains_key(name) => {}
                ReadingValue::Text(_) => {
                    self.other.entry(name.clone()).or_insert(FieldKind::Text);
                    features.insert(name.clone(), value.clone());
                }
                ReadingValue::Bool(_) => {
                    self.other.entry(name.clone()).or_insert(FieldKind::Bool);
                    features.insert(name.clone(), value.clone());
                }
            }
        }

        // 缺失的数值字段用已观测均值填充；本条已带值（如布尔）的字段保留原值
        for (name, history) in &self.numeric {
            if numeric_now.contains_key(name) || features.contains_key(name) {
                continue;
            }
            if let Some(mean) = history.running_mean() {
                numeric_now.insert(name.clone(), mean);
                features.insert(name.clone(), ReadingValue::Number(mean));
            }
        }
        for (name, kind) in &self.other {
            if features.contains_key(name) || self.numeric.contains_key(name) {
                continue;
            }
            let filled = match kind {
                FieldKind::Text => ReadingValue::Text(UNKNOWN_SENTINEL.to_string()),
                FieldKind::Bool => ReadingValue::Bool(false),
            };
            features.insert(name.clone(), filled);
        }

        let ts = reading.timestamp;
        for (name, value) in time_features(&ts) {
            features.insert(name.to_string(), ReadingValue::Number(value));
        }

        for (name, history) in self.numeric.iter_mut() {
            let Some(&value) = numeric_now.get(name) else {
                continue;
            };
            history.push(value, config.window);
            if emit.rolling {
                let stats = history.rolling();
                features.insert(format!("{name}_rolling_mean"), stats.mean.into());
                features.insert(format!("{name}_rolling_std"), stats.std.into());
                features.insert(format!("{name}_rolling_min"), stats.min.into());
                features.insert(format!("{name}_rolling_max"), stats.max.into());
            }
            if emit.rate {
                let rate = match history.last {
                    Some((previous, previous_ts)) => {
                        let seconds = (ts - previous_ts).num_microseconds().unwrap_or(0) as f64 / 1e6;
                        if seconds > 0.0 {
                            (value - previous) / seconds
                        } else {
                            0.0
                        }
                    }
                    None => 0.0,
                };
                features.insert(format!("{name}_rate"), rate.into());
            }
            history.last = Some((value, ts));
        }

        let sensors: Vec<(&String, f64)> = self
            .numeric
            .keys()
            .filter_map(|name| numeric_now.get(name).map(|v| (name, *v)))
            .take(config.max_interaction_fields)
            .collect();
        for (i, (a, a_value)) in sensors.iter().enumerate() {
            for (b, b_value) in sensors.iter().skip(i + 1) {
                let divisor = if *b_value == 0.0 {
                    config.ratio_epsilon
                } else {
                    *b_value
                };
                features.insert(format!("{a}_{b}_product"), (a_value * b_value).into());
                features.insert(format!("{a}_{b}_ratio"), (a_value / divisor).into());
            }
        }

        ProcessedFeatureSet {
            equipment_id: reading.equipment_id.clone(),
            timestamp: ts,
            features,
        }
    }
}

/// `{hour, day, month, year, day_of_week}`，周一为 0。
pub fn time_features(ts: &DateTime<Utc>) -> [(&'static str, f64); 5] {
    [
        ("hour", f64::from(ts.hour())),
        ("day", f64::from(ts.day())),
        ("month", f64::from(ts.month())),
        ("year", f64::from(ts.year())),
        ("day_of_week", f64::from(ts.weekday().num_days_from_monday())),
    ]
}

/// 特征工程处理器。
pub struct DataProcessor {
    config: ProcessorConfig,
    streams: Mutex<HashMap<String, StreamState>>,
}

impl DataProcessor {
    pub fn new() -> Self {
        Self::with_config(ProcessorConfig::default())
    }

    pub fn with_config(mut config: ProcessorConfig) -> Self {
        config.window = config.window.max(1);
        Self {
            config,
            streams: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// 流式处理一条读数；滚动统计按 `min_periods=1` 从第一条开始输出。
    pub fn process(&self, reading: &Reading) -> Result<ProcessedFeatureSet, NormalizeError> {
        let mut streams = self
            .streams
            .lock()
            .map_err(|_| NormalizeError::State("lock poisoned".to_string()))?;
        let state = streams.entry(reading.equipment_id.clone()).or_default();
        Ok(state.derive(
            reading,
            &self.config,
            Emit {
                rolling: true,
                rate: true,
            },
        ))
    }

    /// 批量处理，不读写流状态。
    ///
    /// 缺失数值用整批均值填充；同一设备的行数达到窗口大小时才输出滚动统计，
    /// 多于一行时输出变化率。
    pub fn process_batch(&self, readings: &[Reading]) -> Vec<ProcessedFeatureSet> {
        let mut groups: IndexMap<&str, Vec<usize>> = IndexMap::new();
        for (index, reading) in readings.iter().enumerate() {
            groups
                .entry(reading.equipment_id.as_str())
                .or_default()
                .push(index);
        }

        let mut out: Vec<Option<ProcessedFeatureSet>> = vec![None; readings.len()];
        for rows in groups.values() {
            let filled = fill_with_batch_means(rows.iter().map(|i| &readings[*i]));
            let emit = Emit {
                rolling: rows.len() >= self.config.window,
                rate: rows.len() > 1,
            };
            let mut state = StreamState::default();
            for (index, reading) in rows.iter().zip(filled.iter()) {
                out[*index] = Some(state.derive(reading, &self.config, emit));
            }
        }
        out.into_iter().flatten().collect()
    }

    /// 丢弃某台设备的流状态。
    ///
    /// 连接器停止或被替换时由采集流水线的 `stream_closed` 回调触发，
    /// 新连接器的滚动窗口、变化率基准与均值从零开始。
    pub fn reset(&self, equipment_id: &str) -> Result<(), NormalizeError> {
        let mut streams = self
            .streams
            .lock()
            .map_err(|_| NormalizeError::State("lock poisoned".to_string()))?;
        streams.remove(equipment_id);
        Ok(())
    }
}

impl Default for DataProcessor {
    fn default() -> Self {
        Self::new()
    }
}

fn fill_with_batch_means<'a>(rows: impl Iterator<Item = &'a Reading> + Clone) -> Vec<Reading> {
    let mut sums: IndexMap<&str, (f64, u64)> = IndexMap::new();
    for reading in rows.clone() {
        for (name, value) in &reading.values {
            if let Some(v) = value.as_f64().filter(|v| v.is_finite()) {
                let entry = sums.entry(name.as_str()).or_insert((0.0, 0));
                entry.0 += v;
                entry.1 += 1;
            }
        }
    }

    rows.map(|reading| {
        let mut filled = reading.clone();
        for (name, (sum, count)) in &sums {
            let present = filled
                .values
                .get(*name)
                .and_then(ReadingValue::as_f64)
                .is_some_and(f64::is_finite);
            if !present {
                filled
                    .values
                    .insert(name.to_string(), ReadingValue::Number(sum / *count as f64));
            }
        }
        filled
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_stats_single_sample_has_zero_std() {
        let stats = RollingStats::of([4.0].into_iter());
        assert_eq!(stats.std, 0.0);
        assert_eq!(stats.min, 4.0);
    }

    #[test]
    fn rolling_stats_sample_std() {
        let stats = RollingStats::of([1.0, 2.0, 3.0, 4.0, 5.0].into_iter());
        assert_eq!(stats.mean, 3.0);
        assert!((stats.std - 2.5f64.sqrt()).abs() < 1e-12);
        assert_eq!(stats.max, 5.0);
    }
}
