//! 逻辑回归模型制品。
//!
//! ```json
//! {
//!   "features": ["temperature", "vibration", "temperature_rolling_std"],
//!   "defaults": { "temperature": 70.0, "vibration": 3.0 },
//!   "weights": [0.12, 0.8, 0.3],
//!   "intercept": -12.5,
//!   "anomaly_threshold": 0.6
//! }
//! ```

use crate::Scorer;
use crate::error::ScoringError;
use crate::types::{AnomalyResult, PredictionResult};
use pdm_normalize::ProcessedFeatureSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// 训练模型的置信度
pub const MODEL_CONFIDENCE: f64 = 0.85;

fn default_anomaly_threshold() -> f64 {
    0.6
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub features: Vec<String>,
    #[serde(default)]
    pub defaults: HashMap<String, f64>,
    pub weights: Vec<f64>,
    #[serde(default)]
    pub intercept: f64,
    #[serde(default = "default_anomaly_threshold")]
    pub anomaly_threshold: f64,
}

impl LogisticModel {
    pub fn load(path: &Path) -> Result<Self, ScoringError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ScoringError> {
        let model: LogisticModel = serde_json::from_str(raw)?;
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<(), ScoringError> {
        if self.features.is_empty() {
            return Err(ScoringError::InvalidModel("no features".to_string()));
        }
        if self.features.len() != self.weights.len() {
            return Err(ScoringError::InvalidModel(format!(
                "{} features but {} weights",
                self.features.len(),
                self.weights.len()
            )));
        }
        if !self.intercept.is_finite() || self.weights.iter().any(|w| !w.is_finite()) {
            return Err(ScoringError::InvalidModel(
                "weights must be finite".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.anomaly_threshold) {
            return Err(ScoringError::InvalidModel(format!(
                "anomaly_threshold out of range: {}",
                self.anomaly_threshold
            )));
        }
        Ok(())
    }

    /// 按 `features` 顺序组装特征向量；缺失且无默认值时报错。
    pub fn feature_vector(&self, features: &ProcessedFeatureSet) -> Result<Vec<f64>, ScoringError> {
        self.features
            .iter()
            .map(|name| {
                features
                    .numeric(name)
                    .filter(|v| v.is_finite())
                    .or_else(|| self.defaults.get(name).copied())
                    .ok_or_else(|| ScoringError::MissingFeature(name.clone()))
            })
            .collect()
    }

    pub fn probability(&self, features: &ProcessedFeatureSet) -> Result<f64, ScoringError> {
        let vector = self.feature_vector(features)?;
        let z = self.intercept
            + vector
                .iter()
                .zip(&self.weights)
                .map(|(x, w)| x * w)
                .sum::<f64>();
        Ok(1.0 / (1.0 + (-z).exp()))
    }
}

impl Scorer for LogisticModel {
    fn name(&self) -> &'static str {
        "logistic_model"
    }

    fn score(&self, features: &ProcessedFeatureSet) -> Result<AnomalyResult, ScoringError> {
        let p = self.probability(features)?;
        Ok(AnomalyResult {
            anomaly_detected: p > self.anomaly_threshold,
            anomaly_score: p,
        })
    }

    fn predict(&self, features: &ProcessedFeatureSet) -> Result<PredictionResult, ScoringError> {
        Ok(PredictionResult::from_probability(
            self.probability(features)?,
            MODEL_CONFIDENCE,
        ))
    }
}
