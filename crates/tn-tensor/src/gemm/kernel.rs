//! Tiled, unrolled multiplication kernel and the fork-join block splitter.
//!
//! The kernel multiplies `A` (m x k) by `B` (k x n) using the row-major
//! transpose `BT` (n x k), so every inner product walks two contiguous rows.

use std::ops::Range;

use log::warn;
use parking_lot::Mutex;

use crate::error::{Result, TensorError};

/// Output columns computed per pass of the reduction loop.
pub(crate) const UNROLL_FACTOR: usize = 4;

/// A sub-box of the (row, column, depth) iteration space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Block {
    pub rows: Range<usize>,
    pub cols: Range<usize>,
    pub depth: Range<usize>,
}

impl Block {
    /// The whole iteration space of an `m x k` by `k x n` product.
    pub fn full(m: usize, n: usize, k: usize) -> Self {
        Block {
            rows: 0..m,
            cols: 0..n,
            depth: 0..k,
        }
    }

    pub fn volume(&self) -> usize {
        self.rows
            .len()
            .saturating_mul(self.cols.len())
            .saturating_mul(self.depth.len())
    }

    /// True when no range can be halved any further.
    ///
    /// `fork` stops at atomic blocks even when `threshold` is 0, which
    /// `GemmConfig::validate` rejects but `Kernel::fork` itself accepts.
    pub fn is_atomic(&self) -> bool {
        self.rows.len() <= 1 && self.cols.len() <= 1 && self.depth.len() <= 1
    }

    /// Halve the largest range. Ties go to rows, then columns.
    pub fn split(&self) -> (Block, Block) {
        let (r, c, d) = (self.rows.len(), self.cols.len(), self.depth.len());
        let (mut lo, mut hi) = (self.clone(), self.clone());
        if r >= c && r >= d {
            let mid = self.rows.start + r / 2;
            lo.rows.end = mid;
            hi.rows.start = mid;
        } else if c >= d {
            let mid = self.cols.start + c / 2;
            lo.cols.end = mid;
            hi.cols.start = mid;
        } else {
            let mid = self.depth.start + d / 2;
            lo.depth.end = mid;
            hi.depth.start = mid;
        }
        (lo, hi)
    }
}

/// Borrowed operands plus the shared output of one multiplication.
pub(crate) struct Kernel<'a> {
    /// `A`, row-major m x k.
    pub a: &'a [f64],
    /// `B` transposed, row-major n x k.
    pub bt: &'a [f64],
    /// Reduction length k.
    pub depth: usize,
    /// Output width n.
    pub cols: usize,
    pub tile: usize,
    /// Row-major m x n result. Only locked while a leaf merges.
    pub output: &'a Mutex<Vec<f64>>,
}

impl Kernel<'_> {
    /// Recursively split `block` until its volume is at most `threshold`,
    /// running both halves of every split through `rayon::join`.
    ///
    /// Must be called from inside the engine's pool so the forks land on its workers.
    pub fn fork(&self, block: Block, threshold: usize) -> Result<()> {
        if block.volume() <= threshold || block.is_atomic() {
            return self.run_leaf(&block);
        }
        let (lo, hi) = block.split();
        let (left, right) = rayon::join(|| self.fork(lo, threshold), || self.fork(hi, threshold));
        left?;
        right
    }

    /// Multiply one block sequentially into a private buffer, then merge it.
    pub fn run_leaf(&self, block: &Block) -> Result<()> {
        let width = block.cols.len();
        let mut local = vec![0.0f64; block.rows.len() * width];

        for i0 in block.rows.clone().step_by(self.tile) {
            for j0 in block.cols.clone().step_by(self.tile) {
                for k0 in block.depth.clone().step_by(self.tile) {
                    self.multiply_tile(block, i0, j0, k0, &mut local);
                }
            }
        }

        self.merge(block, &local)
    }

    fn bt_row(&self, j: usize) -> &[f64] {
        &self.bt[j * self.depth..(j + 1) * self.depth]
    }

    fn multiply_tile(&self, block: &Block, i0: usize, j0: usize, k0: usize, local: &mut [f64]) {
        let i_max = (i0 + self.tile).min(block.rows.end);
        let j_max = (j0 + self.tile).min(block.cols.end);
        let k_max = (k0 + self.tile).min(block.depth.end);
        let width = block.cols.len();

        for i in i0..i_max {
            let a_row = &self.a[i * self.depth..(i + 1) * self.depth];
            let local_row = i - block.rows.start;
            let out = &mut local[local_row * width..(local_row + 1) * width];

            let mut j = j0;
            while j < j_max {
                // Lanes past the tile edge alias the last valid row and are never written.
                let lanes = (j_max - j).min(UNROLL_FACTOR);
                let b = [0, 1, 2, 3].map(|lane: usize| self.bt_row(j + lane.min(lanes - 1)));

                let (mut sum0, mut sum1, mut sum2, mut sum3) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
                for k in k0..k_max {
                    let aik = a_row[k];
                    sum0 += aik * b[0][k];
                    if lanes > 1 {
                        sum1 += aik * b[1][k];
                    }
                    if lanes > 2 {
                        sum2 += aik * b[2][k];
                    }
                    if lanes > 3 {
                        sum3 += aik * b[3][k];
                    }
                }

                let c = j - block.cols.start;
                out[c] += sum0;
                if lanes > 1 {
                    out[c + 1] += sum1;
                }
                if lanes > 2 {
                    out[c + 2] += sum2;
                }
                if lanes > 3 {
                    out[c + 3] += sum3;
                }
                j += UNROLL_FACTOR;
            }
        }
    }

    /// Add a leaf's local block into the shared output.
    ///
    /// The block is rejected if it holds NaN or infinity, or if adding it to
    /// the partial sums already in the output would overflow. A rejected
    /// block writes nothing.
    fn merge(&self, block: &Block, local: &[f64]) -> Result<()> {
        let width = block.cols.len();
        if let Some(pos) = local.iter().position(|v| !v.is_finite()) {
            return Err(self.reject(block, pos, local[pos]));
        }

        let mut output = self.output.lock();
        let start_of = |r: usize| (block.rows.start + r) * self.cols + block.cols.start;

        for (r, chunk) in local.chunks_exact(width).enumerate() {
            let start = start_of(r);
            let overflow = output[start..start + width]
                .iter()
                .zip(chunk)
                .map(|(dst, v)| dst + v)
                .enumerate()
                .find(|(_, sum)| !sum.is_finite());
            if let Some((c, sum)) = overflow {
                return Err(self.reject(block, r * width + c, sum));
            }
        }

        for (r, chunk) in local.chunks_exact(width).enumerate() {
            let start = start_of(r);
            for (dst, v) in output[start..start + width].iter_mut().zip(chunk) {
                *dst += v;
            }
        }
        Ok(())
    }

    fn reject(&self, block: &Block, pos: usize, value: f64) -> TensorError {
        let width = block.cols.len();
        let row = block.rows.start + pos / width;
        let col = block.cols.start + pos % width;
        warn!("gemm leaf rejected non-finite value {} at ({}, {})", value, row, col);
        TensorError::NonFinite { row, col, value }
    }
}
