use crate::backend::ComputeBackend;
use crate::error::{Result, TensorError};
use crate::matrix::Matrix;

/// Pure-Rust reference multiplication backend.
///
/// A straightforward triple loop on the calling thread, optimized for
/// correctness rather than speed. Used as the oracle the parallel
/// [`GemmEngine`](crate::GemmEngine) is checked against, and as a
/// dependency-free backend for small networks.
#[derive(Debug, Clone)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn matmul(&self, a: &Matrix, b: &Matrix) -> Result<Matrix> {
        let (m, k, k2, n) = (a.rows(), a.cols(), b.rows(), b.cols());
        if k != k2 {
            return Err(TensorError::MatmulMismatch { m, k, k2, n });
        }

        let (a, b) = (a.data(), b.data());
        let mut c = vec![0.0f64; m * n];
        for i in 0..m {
            for j in 0..n {
                let mut sum = 0.0f64;
                for p in 0..k {
                    sum += a[i * k + p] * b[p * n + j];
                }
                c[i * n + j] = sum;
            }
        }
        Matrix::from_vec(c, m, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> CpuBackend {
        CpuBackend::new()
    }

    #[test]
    fn test_matmul_identity() {
        let b = backend();
        let a = Matrix::from_vec(vec![1.0, 2.0, 3.0, 4.0], 2, 2).unwrap();
        let c = b.matmul(&a, &Matrix::identity(2).unwrap()).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn test_matmul_basic() {
        let b = backend();
        // [1,2;3,4] @ [5,6;7,8] = [19,22;43,50]
        let a = Matrix::from_vec(vec![1.0, 2.0, 3.0, 4.0], 2, 2).unwrap();
        let x = Matrix::from_vec(vec![5.0, 6.0, 7.0, 8.0], 2, 2).unwrap();
        let c = b.matmul(&a, &x).unwrap();
        assert_eq!(c.data(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_dimension_mismatch() {
        let b = backend();
        let a = Matrix::new(2, 3).unwrap();
        assert!(matches!(
            b.matmul(&a, &a),
            Err(TensorError::MatmulMismatch {
                m: 2,
                k: 3,
                k2: 2,
                n: 3
            })
        ));
    }
}
