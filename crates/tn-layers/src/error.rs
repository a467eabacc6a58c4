use thiserror::Error;

#[derive(Error, Debug)]
pub enum LayerError {
    #[error("tensor error: {0}")]
    Tensor(#[from] tn_tensor::TensorError),
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("backward pass requested without a recorded forward pass")]
    MissingForward,
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, LayerError>;
