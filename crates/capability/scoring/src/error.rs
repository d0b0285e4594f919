/// 评分错误。
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("model artifact unreadable: {0}")]
    Io(#[from] std::io::Error),
    #[error("model artifact invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid model: {0}")]
    InvalidModel(String),
    #[error("missing feature: {0}")]
    MissingFeature(String),
}
