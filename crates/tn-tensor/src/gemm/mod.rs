//! Parallel tiled GEMM.
//!
//! [`GemmEngine`] multiplies dense matrices by recursively halving the
//! (row, column, depth) iteration space until each block is small enough,
//! running the halves as fork-join tasks on a thread pool the engine owns.
//! Leaves compute with cache tiles and a 4-way unrolled inner loop into a
//! private buffer, and take the output lock only to merge that buffer.
//!
//! Depth splits produce partial sums for the same output cells that merge in
//! whatever order the leaves finish, so results match a sequential run only
//! up to floating-point summation order.

mod kernel;

use log::{debug, trace};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::backend::ComputeBackend;
use crate::error::{Result, TensorError};
use crate::matrix::Matrix;

use kernel::{Block, Kernel};

pub const DEFAULT_TILE_SIZE: usize = 32;
pub const DEFAULT_PARALLELISM_THRESHOLD: usize = 1024;

/// Tuning knobs for a [`GemmEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GemmConfig {
    /// Edge length of the square cache tiles used by each leaf.
    pub tile_size: usize,
    /// Blocks whose rows * cols * depth is at or below this run without forking.
    pub parallelism_threshold: usize,
    /// Worker count. `None` uses the available hardware parallelism.
    pub num_threads: Option<usize>,
}

impl Default for GemmConfig {
    fn default() -> Self {
        GemmConfig {
            tile_size: DEFAULT_TILE_SIZE,
            parallelism_threshold: DEFAULT_PARALLELISM_THRESHOLD,
            num_threads: None,
        }
    }
}

impl GemmConfig {
    pub fn with_tile_size(mut self, tile_size: usize) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.parallelism_threshold = threshold;
        self
    }

    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err(TensorError::InvalidConfig(
                "tile_size must be > 0".to_string(),
            ));
        }
        if self.parallelism_threshold == 0 {
            return Err(TensorError::InvalidConfig(
                "parallelism_threshold must be > 0".to_string(),
            ));
        }
        if self.num_threads == Some(0) {
            return Err(TensorError::InvalidConfig(
                "num_threads must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fork-join GEMM over a dedicated rayon pool.
///
/// Build one engine and share it (usually as `Arc<GemmEngine>`) between every
/// layer of a network; the pool lives exactly as long as the engine and is
/// never torn down while a multiply is running on it.
#[derive(Debug)]
pub struct GemmEngine {
    pool: ThreadPool,
    config: GemmConfig,
}

impl GemmEngine {
    /// Validate `config` and spawn the worker pool.
    pub fn new(config: GemmConfig) -> Result<Self> {
        config.validate()?;
        let threads = config.num_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("tn-gemm-{}", i))
            .build()?;

        debug!(
            "gemm engine ready: threads={} tile={} threshold={}",
            threads, config.tile_size, config.parallelism_threshold
        );
        Ok(GemmEngine { pool, config })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(GemmConfig::default())
    }

    pub fn config(&self) -> &GemmConfig {
        &self.config
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// `a @ b` using the parallel fork-join path.
    ///
    /// # Errors
    /// - `TensorError::MatmulMismatch` if `a.cols() != b.rows()`, before any work
    /// - `TensorError::NonFinite` if a leaf produces NaN or infinity
    pub fn multiply(&self, a: &Matrix, b: &Matrix) -> Result<Matrix> {
        self.run(a, b, self.config.parallelism_threshold)
    }

    /// `a @ b` as a single leaf on the calling thread.
    ///
    /// Same tiling and unrolling as [`multiply`](Self::multiply), without forking.
    pub fn multiply_sequential(&self, a: &Matrix, b: &Matrix) -> Result<Matrix> {
        self.run(a, b, usize::MAX)
    }

    fn run(&self, a: &Matrix, b: &Matrix, threshold: usize) -> Result<Matrix> {
        let (m, k, k2, n) = (a.rows(), a.cols(), b.rows(), b.cols());
        if k != k2 {
            return Err(TensorError::MatmulMismatch { m, k, k2, n });
        }
        trace!("gemm [{}x{}] @ [{}x{}] threshold={}", m, k, k2, n, threshold);

        let bt = b.transposed();
        let output = Mutex::new(vec![0.0f64; m * n]);
        let kernel = Kernel {
            a: a.data(),
            bt: bt.data(),
            depth: k,
            cols: n,
            tile: self.config.tile_size,
            output: &output,
        };
        let block = Block::full(m, n, k);

        if block.volume() <= threshold {
            kernel.run_leaf(&block)?;
        } else {
            self.pool.install(|| kernel.fork(block, threshold))?;
        }

        Matrix::from_vec(output.into_inner(), m, n)
    }
}

impl ComputeBackend for GemmEngine {
    fn name(&self) -> &str {
        "gemm"
    }

    fn matmul(&self, a: &Matrix, b: &Matrix) -> Result<Matrix> {
        self.multiply(a, b)
    }
}
