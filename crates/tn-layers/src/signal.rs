use tn_tensor::{Matrix, Tensor};

use crate::error::{LayerError, Result};

/// The data flowing between layers: either a 2-D matrix or a 3-D tensor.
///
/// Layers match on the variant to pick their code path.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Matrix(Matrix),
    Tensor(Tensor),
}

impl Signal {
    /// Short variant name, used in type-mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Matrix(_) => "matrix",
            Signal::Tensor(_) => "tensor",
        }
    }

    pub fn dims(&self) -> Vec<usize> {
        match self {
            Signal::Matrix(m) => m.dims().to_vec(),
            Signal::Tensor(t) => t.dims().to_vec(),
        }
    }

    pub fn as_matrix(&self) -> Option<&Matrix> {
        match self {
            Signal::Matrix(m) => Some(m),
            Signal::Tensor(_) => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Signal::Tensor(t) => Some(t),
            Signal::Matrix(_) => None,
        }
    }

    pub fn into_matrix(self) -> Result<Matrix> {
        match self {
            Signal::Matrix(m) => Ok(m),
            other => Err(LayerError::TypeMismatch {
                expected: "matrix".to_string(),
                got: other.kind().to_string(),
            }),
        }
    }

    pub fn into_tensor(self) -> Result<Tensor> {
        match self {
            Signal::Tensor(t) => Ok(t),
            other => Err(LayerError::TypeMismatch {
                expected: "tensor".to_string(),
                got: other.kind().to_string(),
            }),
        }
    }
}

impl From<Matrix> for Signal {
    fn from(m: Matrix) -> Self {
        Signal::Matrix(m)
    }
}

impl From<Tensor> for Signal {
    fn from(t: Tensor) -> Self {
        Signal::Tensor(t)
    }
}
