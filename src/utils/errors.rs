use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Exploding gradients, tune learning rate: {0}")]
    Diverged(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid model config: {0}")]
    InvalidConfig(String),

    #[error("Graph {0} has no label")]
    MissingLabel(usize),

    #[error("Contract analysis failed: {0}")]
    AnalysisError(String),

    #[error("ML model error: {0}")]
    MLError(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Array shape error: {0}")]
    ArrayShapeError(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, DetectorError>;
