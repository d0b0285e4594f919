use serde::{Deserialize, Serialize};

/// 异常检测结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub anomaly_detected: bool,
    pub anomaly_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionLabel {
    Normal,
    Warning,
    Critical,
}

impl PredictionLabel {
    /// `> 0.7` 严重，`> 0.4` 警告，其余正常。
    pub fn from_probability(probability: f64) -> Self {
        if probability > 0.7 {
            PredictionLabel::Critical
        } else if probability > 0.4 {
            PredictionLabel::Warning
        } else {
            PredictionLabel::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionLabel::Normal => "normal",
            PredictionLabel::Warning => "warning",
            PredictionLabel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendedAction {
    Maintenance,
    Monitor,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedAction::Maintenance => "maintenance",
            RecommendedAction::Monitor => "monitor",
        }
    }
}

/// 故障预测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub prediction: PredictionLabel,
    pub probability: f64,
    pub maintenance_required: bool,
    /// 剩余寿命（天）
    pub estimated_time_to_failure_days: u32,
    pub recommended_action: RecommendedAction,
    pub confidence: f64,
}

impl PredictionResult {
    /// 由故障概率推导其余字段。
    pub fn from_probability(probability: f64, confidence: f64) -> Self {
        let probability = probability.clamp(0.0, 1.0);
        Self {
            prediction: PredictionLabel::from_probability(probability),
            probability,
            maintenance_required: probability > 0.5,
            estimated_time_to_failure_days: remaining_days(probability),
            recommended_action: if probability > 0.6 {
                RecommendedAction::Maintenance
            } else {
                RecommendedAction::Monitor
            },
            confidence,
        }
    }
}

/// `floor(30 * (1 - p))`。
///
/// 加一个很小的偏移，避免 `30 * (1 - 0.8)` 这类乘积落在整数下方一个 ulp。
pub fn remaining_days(probability: f64) -> u32 {
    let days = (30.0 * (1.0 - probability.clamp(0.0, 1.0)) + 1e-9).floor();
    days as u32
}
