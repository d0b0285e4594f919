//! # 评分网关
//!
//! 对特征集做异常检测（`score`）与故障预测（`predict`）。
//!
//! - 有训练模型制品时使用 [`LogisticModel`]
//! - 没有或加载失败时退回 [`RuleBasedScorer`]，两条路径可以独立选择
//!
//! 两种评分器都是输入的纯函数，没有随机性。

mod error;
mod model;
mod rules;
mod types;

pub use error::ScoringError;
pub use model::{LogisticModel, MODEL_CONFIDENCE};
pub use rules::{RuleBasedScorer, RuleThresholds};
pub use types::{
    AnomalyResult, PredictionLabel, PredictionResult, RecommendedAction, remaining_days,
};

use domain::Reading;
use pdm_normalize::ProcessedFeatureSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// 评分器接口
pub trait Scorer: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, features: &ProcessedFeatureSet) -> Result<AnomalyResult, ScoringError>;

    fn predict(&self, features: &ProcessedFeatureSet) -> Result<PredictionResult, ScoringError>;
}

#[derive(Clone)]
pub struct ScorerGateway {
    scorer: Arc<dyn Scorer>,
}

impl ScorerGateway {
    pub fn new(scorer: Arc<dyn Scorer>) -> Self {
        Self { scorer }
    }

    pub fn rule_based() -> Self {
        Self::new(Arc::new(RuleBasedScorer::default()))
    }

    pub fn with_model(model: LogisticModel) -> Self {
        Self::new(Arc::new(model))
    }

    /// 从制品路径加载模型；路径为空或加载失败时使用规则评分。
    pub fn from_artifact(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            info!(scorer = "rule_based", "scorer_selected");
            return Self::rule_based();
        };
        match LogisticModel::load(path) {
            Ok(model) => {
                info!(
                    scorer = "logistic_model",
                    path = %path.display(),
                    features = model.features.len(),
                    "scorer_selected"
                );
                Self::with_model(model)
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "model_artifact_unavailable_using_rules"
                );
                Self::rule_based()
            }
        }
    }

    pub fn scorer_name(&self) -> &'static str {
        self.scorer.name()
    }

    pub fn score(&self, features: &ProcessedFeatureSet) -> Result<AnomalyResult, ScoringError> {
        self.scorer.score(features)
    }

    pub fn predict(&self, features: &ProcessedFeatureSet) -> Result<PredictionResult, ScoringError> {
        self.scorer.predict(features)
    }

    /// 评分并写入读数的异常字段。
    pub fn annotate(
        &self,
        reading: &mut Reading,
        features: &ProcessedFeatureSet,
    ) -> Result<AnomalyResult, ScoringError> {
        let result = self.score(features)?;
        reading.anomaly_detected = Some(result.anomaly_detected);
        reading.anomaly_score = Some(result.anomaly_score);
        Ok(result)
    }
}

impl Default for ScorerGateway {
    fn default() -> Self {
        Self::rule_based()
    }
}
