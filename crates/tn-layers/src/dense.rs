use std::any::Any;
use std::sync::Arc;

use log::trace;
use rand::Rng;
use tn_tensor::{ComputeBackend, Matrix};

use crate::error::{LayerError, Result};
use crate::layer::{downcast_target, Layer, LayerMeta};
use crate::signal::Signal;

/// Fully connected affine layer: `y = x @ W + b`.
///
/// Inputs are `batch x input_size` matrices with one sample per row; the bias
/// row is added to every output row. No activation is applied.
#[derive(Debug, Clone)]
pub struct DenseLayer {
    meta: LayerMeta,
    /// Shape [input_size, output_size].
    weights: Matrix,
    /// Shape [1, output_size].
    bias: Matrix,
    grad_weights: Matrix,
    grad_bias: Matrix,
    backend: Arc<dyn ComputeBackend>,
}

impl DenseLayer {
    /// Weights uniform in [-1, 1) from the thread-local RNG, bias set to `bias`.
    pub fn new(
        input_size: usize,
        output_size: usize,
        bias: f64,
        backend: Arc<dyn ComputeBackend>,
    ) -> Result<Self> {
        Self::with_rng(input_size, output_size, bias, &mut rand::thread_rng(), backend)
    }

    /// Like [`new`](Self::new) but drawing weights from `rng`.
    pub fn with_rng<R: Rng + ?Sized>(
        input_size: usize,
        output_size: usize,
        bias: f64,
        rng: &mut R,
        backend: Arc<dyn ComputeBackend>,
    ) -> Result<Self> {
        let mut weights = Matrix::new(input_size, output_size)?;
        weights.randomize_with(rng, -1.0, 1.0)?;
        let mut bias_row = Matrix::new(1, output_size)?;
        bias_row.fill(bias);
        Self::from_parameters(weights, bias_row, backend)
    }

    /// All-zero weights and bias.
    pub fn zeros(
        input_size: usize,
        output_size: usize,
        backend: Arc<dyn ComputeBackend>,
    ) -> Result<Self> {
        Self::from_parameters(
            Matrix::new(input_size, output_size)?,
            Matrix::new(1, output_size)?,
            backend,
        )
    }

    /// Build from explicit parameters.
    ///
    /// # Errors
    /// Returns `LayerError::ShapeMismatch` unless `bias` is `1 x weights.cols()`.
    pub fn from_parameters(
        weights: Matrix,
        bias: Matrix,
        backend: Arc<dyn ComputeBackend>,
    ) -> Result<Self> {
        let expected = [1, weights.cols()];
        if bias.dims() != expected {
            return Err(LayerError::ShapeMismatch {
                expected: expected.to_vec(),
                got: bias.dims().to_vec(),
            });
        }
        let grad_weights = Matrix::new(weights.rows(), weights.cols())?;
        let grad_bias = Matrix::new(1, weights.cols())?;
        Ok(DenseLayer {
            meta: LayerMeta::new(weights.rows(), weights.cols()),
            weights,
            bias,
            grad_weights,
            grad_bias,
            backend,
        })
    }

    pub fn weights(&self) -> &Matrix {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut Matrix {
        &mut self.weights
    }

    pub fn bias(&self) -> &Matrix {
        &self.bias
    }

    pub fn bias_mut(&mut self) -> &mut Matrix {
        &mut self.bias
    }

    pub fn grad_weights(&self) -> &Matrix {
        &self.grad_weights
    }

    pub fn grad_bias(&self) -> &Matrix {
        &self.grad_bias
    }

    fn expect_matrix<'a>(&self, signal: &'a Signal) -> Result<&'a Matrix> {
        signal.as_matrix().ok_or_else(|| LayerError::TypeMismatch {
            expected: "matrix".to_string(),
            got: signal.kind().to_string(),
        })
    }

    fn check_input(&self, x: &Matrix) -> Result<()> {
        if x.cols() != self.weights.rows() {
            return Err(LayerError::ShapeMismatch {
                expected: vec![x.rows(), self.weights.rows()],
                got: x.dims().to_vec(),
            });
        }
        Ok(())
    }
}

impl Layer for DenseLayer {
    fn name(&self) -> &str {
        "dense"
    }

    fn meta(&self) -> &LayerMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut LayerMeta {
        &mut self.meta
    }

    fn compute(&mut self, input: &Signal) -> Result<Signal> {
        let x = self.expect_matrix(input)?;
        self.check_input(x)?;
        trace!("dense compute {:?} via {}", x.dims(), self.backend.name());

        let mut y = x.matmul(&self.weights, self.backend.as_ref())?;
        let bias = self.bias.data();
        for row in y.data_mut().chunks_exact_mut(bias.len()) {
            for (v, b) in row.iter_mut().zip(bias) {
                *v += b;
            }
        }
        Ok(Signal::Matrix(y))
    }

    fn backpropagate(&mut self, input: &Signal, grad_output: &Signal) -> Result<Signal> {
        let x = self.expect_matrix(input)?;
        let g = self.expect_matrix(grad_output)?;
        self.check_input(x)?;
        let expected = [x.rows(), self.meta.output_size];
        if g.dims() != expected {
            return Err(LayerError::ShapeMismatch {
                expected: expected.to_vec(),
                got: g.dims().to_vec(),
            });
        }

        let backend = self.backend.as_ref();
        let grad_w = x.transposed().matmul(g, backend)?;
        let grad_input = g.matmul(&self.weights.transposed(), backend)?;

        self.grad_weights.add(&grad_w)?;
        self.grad_bias.add(&g.column_sums())?;
        Ok(Signal::Matrix(grad_input))
    }

    fn update_parameters(&mut self, learning_rate: f64) {
        for (w, g) in self
            .weights
            .data_mut()
            .iter_mut()
            .zip(self.grad_weights.data())
        {
            *w -= learning_rate * g;
        }
        for (b, g) in self.bias.data_mut().iter_mut().zip(self.grad_bias.data()) {
            *b -= learning_rate * g;
        }
        self.grad_weights.fill(0.0);
        self.grad_bias.fill(0.0);
    }

    fn copy(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }

    fn copy_to(&self, target: &mut dyn Layer, ignore_primitives: bool) -> Result<()> {
        let target = downcast_target::<DenseLayer>(target, self.name())?;
        target.weights = self.weights.clone();
        target.bias = self.bias.clone();
        target.grad_weights = self.grad_weights.clone();
        target.grad_bias = self.grad_bias.clone();
        if ignore_primitives {
            // Sizes follow the copied weights; only alpha is left alone.
            target.meta.input_size = self.weights.rows();
            target.meta.output_size = self.weights.cols();
        } else {
            target.meta = self.meta.clone();
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
