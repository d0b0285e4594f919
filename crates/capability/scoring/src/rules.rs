//! 规则评分（无模型时的兜底）。

use crate::Scorer;
use crate::error::ScoringError;
use crate::types::{AnomalyResult, PredictionResult};
use pdm_normalize::ProcessedFeatureSet;

/// 规则评分参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleThresholds {
    pub temperature_limit: f64,
    pub vibration_limit: f64,
    /// 字段缺失时的取值
    pub default_temperature: f64,
    pub default_vibration: f64,
    pub weight: f64,
    pub anomaly_threshold: f64,
    pub confidence: f64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            temperature_limit: 85.0,
            vibration_limit: 5.0,
            default_temperature: 70.0,
            default_vibration: 3.0,
            weight: 0.4,
            anomaly_threshold: 0.6,
            confidence: 0.7,
        }
    }
}

/// `p = 0.4·[temperature>85] + 0.4·[vibration>5]`，同输入同输出。
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedScorer {
    thresholds: RuleThresholds,
}

impl RuleBasedScorer {
    pub fn new(thresholds: RuleThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &RuleThresholds {
        &self.thresholds
    }

    pub fn probability(&self, features: &ProcessedFeatureSet) -> f64 {
        let t = &self.thresholds;
        let temperature = features
            .numeric("temperature")
            .unwrap_or(t.default_temperature);
        let vibration = features.numeric("vibration").unwrap_or(t.default_vibration);
        let mut p = 0.0;
        if temperature > t.temperature_limit {
            p += t.weight;
        }
        if vibration > t.vibration_limit {
            p += t.weight;
        }
        p
    }
}

impl Scorer for RuleBasedScorer {
    fn name(&self) -> &'static str {
        "rule_based"
    }

    fn score(&self, features: &ProcessedFeatureSet) -> Result<AnomalyResult, ScoringError> {
        let p = self.probability(features);
        Ok(AnomalyResult {
            anomaly_detected: p > self.thresholds.anomaly_threshold,
            anomaly_score: p,
        })
    }

    fn predict(&self, features: &ProcessedFeatureSet) -> Result<PredictionResult, ScoringError> {
        Ok(PredictionResult::from_probability(
            self.probability(features),
            self.thresholds.confidence,
        ))
    }
}
