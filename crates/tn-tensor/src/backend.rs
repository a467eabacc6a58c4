use std::fmt::Debug;

use crate::error::Result;
use crate::matrix::Matrix;

/// Trait for pluggable matrix multiplication backends.
///
/// Layers hold a shared `Arc<dyn ComputeBackend>` and route every linear
/// transform through it, so the same network can run on the parallel
/// [`GemmEngine`](crate::GemmEngine) or on the reference [`CpuBackend`](crate::CpuBackend).
pub trait ComputeBackend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "cpu", "gemm").
    fn name(&self) -> &str;

    /// Matrix multiplication: C = A @ B.
    ///
    /// - `a`: matrix of shape [m, k]
    /// - `b`: matrix of shape [k, n]
    /// - Returns: a new matrix of shape [m, n]; neither operand is modified
    ///
    /// # Errors
    /// Returns `TensorError::MatmulMismatch` if `a.cols() != b.rows()`.
    fn matmul(&self, a: &Matrix, b: &Matrix) -> Result<Matrix>;
}
