//! `tn-tensor` - Dense numeric storage and a parallel GEMM engine for tilenet.
//!
//! This crate provides:
//! - A row-major `Matrix` of f64 with elementwise, scalar and statistics helpers
//! - A `Tensor` of shape depth x height x width for per-channel statistics
//! - A `ComputeBackend` trait for pluggable matrix multiplication
//! - `GemmEngine`, a tiled, unrolled, fork-join GEMM over an owned thread pool
//! - `CpuBackend`, a naive reference backend used to verify the engine

pub mod backend;
pub mod cpu;
pub mod error;
pub mod gemm;
pub mod matrix;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use backend::ComputeBackend;
pub use cpu::CpuBackend;
pub use error::{Result, TensorError};
pub use gemm::{GemmConfig, GemmEngine};
pub use matrix::Matrix;
pub use tensor::Tensor;
