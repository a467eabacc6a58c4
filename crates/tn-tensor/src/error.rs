use thiserror::Error;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("matmul dimension mismatch: [{m}x{k}] @ [{k2}x{n}]")]
    MatmulMismatch {
        m: usize,
        k: usize,
        k2: usize,
        n: usize,
    },
    #[error("index {index:?} out of bounds for dimensions {dims:?}")]
    IndexOutOfBounds { index: Vec<usize>, dims: Vec<usize> },
    #[error("dimensions must be positive, got {0:?}")]
    InvalidDimensions(Vec<usize>),
    #[error("buffer length {got} does not match expected {expected}")]
    BufferLength { expected: usize, got: usize },
    #[error("non-finite value {value} at ({row}, {col}) in matrix product")]
    NonFinite { row: usize, col: usize, value: f64 },
    #[error("invalid range: min {min} must be below max {max}")]
    InvalidRange { min: f64, max: f64 },
    #[error("division by zero")]
    DivisionByZero,
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, TensorError>;
