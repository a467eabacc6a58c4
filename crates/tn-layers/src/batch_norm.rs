//! Batch normalization over the channels of a 3-D tensor, or over a whole
//! matrix treated as a single channel.
//!
//! Forward normalizes with the statistics of the current input and folds them
//! into the running estimates. The tensor backward pass reads the running
//! estimates instead of the batch statistics, and the matrix backward pass
//! derives its variance term from a summed `grad @ (x - mean)^T` product.
//! In tensor mode every channel's scale and shift gradient receives the sum of
//! the whole gradient tensor.

use std::any::Any;
use std::sync::Arc;

use log::trace;
use tn_tensor::{ComputeBackend, Matrix, Tensor};

use crate::error::{LayerError, Result};
use crate::layer::{downcast_target, Layer, LayerMeta};
use crate::signal::Signal;

pub const DEFAULT_EPSILON: f64 = 1e-5;
pub const DEFAULT_MOMENTUM: f64 = 0.99;

/// Hyperparameters for [`BatchNormLayer`].
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormConfig {
    /// Added to the variance before the square root.
    pub epsilon: f64,
    /// Share of the old running statistic kept by each update.
    pub momentum: f64,
}

impl Default for BatchNormConfig {
    fn default() -> Self {
        BatchNormConfig {
            epsilon: DEFAULT_EPSILON,
            momentum: DEFAULT_MOMENTUM,
        }
    }
}

impl BatchNormConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.epsilon > 0.0) {
            return Err(LayerError::InvalidConfig(format!(
                "epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        if !(0.0..=1.0).contains(&self.momentum) {
            return Err(LayerError::InvalidConfig(format!(
                "momentum must be in [0, 1], got {}",
                self.momentum
            )));
        }
        Ok(())
    }
}

/// First and second moment storage for an external optimizer.
///
/// Slot 0 belongs to gamma, slot 1 to beta; each slot has one entry per channel.
/// Nothing in this crate reads or writes these values.
#[derive(Debug, Clone, PartialEq)]
pub struct Moments {
    pub m: [Vec<f64>; 2],
    pub v: [Vec<f64>; 2],
}

impl Moments {
    pub fn zeros(depth: usize) -> Self {
        Moments {
            m: [vec![0.0; depth], vec![0.0; depth]],
            v: [vec![0.0; depth], vec![0.0; depth]],
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchNormLayer {
    meta: LayerMeta,
    depth: usize,
    height: usize,
    width: usize,
    config: BatchNormConfig,

    gamma: Vec<f64>,
    beta: Vec<f64>,
    running_mean: Vec<f64>,
    running_var: Vec<f64>,

    d_gamma: Vec<f64>,
    d_beta: Vec<f64>,

    pub moments: Moments,

    backend: Arc<dyn ComputeBackend>,
}

impl BatchNormLayer {
    /// Layer for `depth` channels of `height x width`, with default hyperparameters.
    pub fn new(
        depth: usize,
        height: usize,
        width: usize,
        backend: Arc<dyn ComputeBackend>,
    ) -> Result<Self> {
        Self::with_config(depth, height, width, BatchNormConfig::default(), backend)
    }

    pub fn with_config(
        depth: usize,
        height: usize,
        width: usize,
        config: BatchNormConfig,
        backend: Arc<dyn ComputeBackend>,
    ) -> Result<Self> {
        if depth == 0 || height == 0 || width == 0 {
            return Err(LayerError::InvalidConfig(format!(
                "batch norm dimensions must be positive, got [{}, {}, {}]",
                depth, height, width
            )));
        }
        config.validate()?;

        let size = depth * height * width;
        Ok(BatchNormLayer {
            meta: LayerMeta::new(size, size),
            depth,
            height,
            width,
            config,
            gamma: vec![1.0; depth],
            beta: vec![0.0; depth],
            running_mean: vec![0.0; depth],
            running_var: vec![0.0; depth],
            d_gamma: vec![0.0; depth],
            d_beta: vec![0.0; depth],
            moments: Moments::zeros(depth),
            backend,
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn config(&self) -> &BatchNormConfig {
        &self.config
    }

    pub fn gamma(&self) -> &[f64] {
        &self.gamma
    }

    pub fn gamma_mut(&mut self) -> &mut [f64] {
        &mut self.gamma
    }

    pub fn beta(&self) -> &[f64] {
        &self.beta
    }

    pub fn beta_mut(&mut self) -> &mut [f64] {
        &mut self.beta
    }

    pub fn running_mean(&self) -> &[f64] {
        &self.running_mean
    }

    pub fn running_var(&self) -> &[f64] {
        &self.running_var
    }

    /// Accumulated gamma gradient since the last update.
    pub fn grad_gamma(&self) -> &[f64] {
        &self.d_gamma
    }

    /// Accumulated beta gradient since the last update.
    pub fn grad_beta(&self) -> &[f64] {
        &self.d_beta
    }

    fn check_tensor(&self, t: &Tensor) -> Result<()> {
        let expected = [self.depth, self.height, self.width];
        if t.dims() != expected {
            return Err(LayerError::ShapeMismatch {
                expected: expected.to_vec(),
                got: t.dims().to_vec(),
            });
        }
        Ok(())
    }

    fn update_running(&mut self, d: usize, mean: f64, variance: f64) {
        let momentum = self.config.momentum;
        self.running_mean[d] = momentum * self.running_mean[d] + (1.0 - momentum) * mean;
        self.running_var[d] = momentum * self.running_var[d] + (1.0 - momentum) * variance;
    }

    fn compute_tensor(&mut self, input: &Tensor) -> Result<Tensor> {
        self.check_tensor(input)?;
        let mut output = Tensor::new(self.depth, self.height, self.width)?;
        let n = input.channel_len() as f64;

        for d in 0..self.depth {
            let x = input.channel(d)?;
            let mean = x.iter().sum::<f64>() / n;
            let variance = x.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
            self.update_running(d, mean, variance);

            let std_dev = (variance + self.config.epsilon).sqrt();
            let (gamma, beta) = (self.gamma[d], self.beta[d]);
            for (out, v) in output.channel_mut(d)?.iter_mut().zip(x) {
                *out = gamma * ((v - mean) / std_dev) + beta;
            }
        }

        Ok(output)
    }

    fn compute_matrix(&mut self, input: &Matrix) -> Result<Matrix> {
        let mean = input.mean();
        let variance = input.variance(mean);
        self.update_running(0, mean, variance);

        let std_dev = (variance + self.config.epsilon).sqrt();
        let (gamma, beta) = (self.gamma[0], self.beta[0]);
        let mut output = input.clone();
        for v in output.data_mut() {
            *v = gamma * ((*v - mean) / std_dev) + beta;
        }
        Ok(output)
    }

    fn backpropagate_tensor(&mut self, input: &Tensor, grad_output: &Tensor) -> Result<Tensor> {
        self.check_tensor(input)?;
        self.check_tensor(grad_output)?;
        let mut grad_input = Tensor::new(self.depth, self.height, self.width)?;
        let n = input.channel_len() as f64;
        // Scale and shift gradients take the sum over every channel.
        let total_grad = grad_output.sum();

        for d in 0..self.depth {
            let mean = self.running_mean[d];
            let var_eps = self.running_var[d] + self.config.epsilon;
            let std_dev = var_eps.sqrt();

            let x = input.channel(d)?;
            let g = grad_output.channel(d)?;
            let grad_sum: f64 = g.iter().sum();
            let d_mean = grad_sum / n;
            let d_var = -0.5 / var_eps
                * x.iter()
                    .zip(g)
                    .map(|(x, g)| (x - mean) * g)
                    .sum::<f64>();

            for ((out, x), g) in grad_input.channel_mut(d)?.iter_mut().zip(x).zip(g) {
                *out = g / std_dev + d_var * 2.0 * (x - mean) / n + d_mean;
            }

            self.d_gamma[d] += total_grad / std_dev;
            self.d_beta[d] += total_grad;
        }

        Ok(grad_input)
    }

    fn backpropagate_matrix(&mut self, input: &Matrix, grad_output: &Matrix) -> Result<Matrix> {
        if input.dims() != grad_output.dims() {
            return Err(LayerError::ShapeMismatch {
                expected: input.dims().to_vec(),
                got: grad_output.dims().to_vec(),
            });
        }

        let mean = input.mean();
        let var_eps = input.variance(mean) + self.config.epsilon;
        let std_dev = var_eps.sqrt();
        let n = (input.rows() * input.cols()) as f64;

        let centered = input.shifted(-mean);
        let product = grad_output.matmul(&centered.transposed(), self.backend.as_ref())?;
        let d_var = -0.5 / var_eps * product.sum();

        let grad_sum = grad_output.sum();
        let d_mean = grad_sum / n;

        let mut grad_input = grad_output.scaled(1.0 / std_dev);
        grad_input.add(&centered.scaled(d_var * 2.0 / n))?;
        grad_input.add_scalar(d_mean);

        self.d_gamma[0] += grad_sum / std_dev;
        self.d_beta[0] += grad_sum;

        Ok(grad_input)
    }
}

impl Layer for BatchNormLayer {
    fn name(&self) -> &str {
        "batch_norm"
    }

    fn meta(&self) -> &LayerMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut LayerMeta {
        &mut self.meta
    }

    fn compute(&mut self, input: &Signal) -> Result<Signal> {
        trace!("batch_norm compute {} {:?}", input.kind(), input.dims());
        match input {
            Signal::Tensor(t) => Ok(Signal::Tensor(self.compute_tensor(t)?)),
            Signal::Matrix(m) => Ok(Signal::Matrix(self.compute_matrix(m)?)),
        }
    }

    fn backpropagate(&mut self, input: &Signal, grad_output: &Signal) -> Result<Signal> {
        trace!("batch_norm backpropagate {} {:?}", input.kind(), input.dims());
        match (input, grad_output) {
            (Signal::Tensor(x), Signal::Tensor(g)) => {
                Ok(Signal::Tensor(self.backpropagate_tensor(x, g)?))
            }
            (Signal::Matrix(x), Signal::Matrix(g)) => {
                Ok(Signal::Matrix(self.backpropagate_matrix(x, g)?))
            }
            (x, g) => Err(LayerError::TypeMismatch {
                expected: x.kind().to_string(),
                got: g.kind().to_string(),
            }),
        }
    }

    fn update_parameters(&mut self, learning_rate: f64) {
        for d in 0..self.depth {
            self.gamma[d] -= learning_rate * self.d_gamma[d];
            self.beta[d] -= learning_rate * self.d_beta[d];
        }
        self.d_gamma.fill(0.0);
        self.d_beta.fill(0.0);
    }

    /// Clones parameters, statistics and pending gradients. Optimizer moments
    /// start from zero in the copy.
    fn copy(&self) -> Box<dyn Layer> {
        let mut copy = self.clone();
        copy.moments = Moments::zeros(self.depth);
        Box::new(copy)
    }

    fn copy_to(&self, target: &mut dyn Layer, ignore_primitives: bool) -> Result<()> {
        let target = downcast_target::<BatchNormLayer>(target, self.name())?;

        target.gamma.clone_from(&self.gamma);
        target.beta.clone_from(&self.beta);
        target.running_mean.clone_from(&self.running_mean);
        target.running_var.clone_from(&self.running_var);
        target.d_gamma.clone_from(&self.d_gamma);
        target.d_beta.clone_from(&self.d_beta);

        if ignore_primitives {
            target.meta.input_size = self.meta.input_size;
            target.meta.output_size = self.meta.output_size;
        } else {
            target.meta = self.meta.clone();
        }

        target.depth = self.depth;
        target.height = self.height;
        target.width = self.width;
        target.config = self.config.clone();
        if target.moments.m[0].len() != self.depth {
            target.moments = Moments::zeros(self.depth);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dense::DenseLayer;
    use approx::assert_abs_diff_eq;
    use tn_tensor::{CpuBackend, GemmConfig, GemmEngine};

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn cpu() -> Arc<dyn ComputeBackend> {
        init_logging();
        Arc::new(CpuBackend::new())
    }

    fn tensor(data: Vec<f64>, depth: usize, height: usize, width: usize) -> Signal {
        Signal::Tensor(Tensor::from_vec(data, depth, height, width).unwrap())
    }

    fn matrix(rows: Vec<Vec<f64>>) -> Signal {
        Signal::Matrix(Matrix::from_rows(rows).unwrap())
    }

    #[test]
    fn test_initial_state() {
        let layer = BatchNormLayer::new(3, 2, 2, cpu()).unwrap();
        assert_eq!(layer.gamma(), &[1.0; 3]);
        assert_eq!(layer.beta(), &[0.0; 3]);
        assert_eq!(layer.running_mean(), &[0.0; 3]);
        assert_eq!(layer.running_var(), &[0.0; 3]);
        assert_eq!(layer.input_size(), 12);
        assert_eq!(layer.output_size(), 12);
        assert_eq!(layer.moments, Moments::zeros(3));
        assert_eq!(layer.summary(), "batch_norm: in:12 out:12");
    }

    #[test]
    fn test_invalid_construction() {
        assert!(BatchNormLayer::new(0, 1, 1, cpu()).is_err());
        let bad = BatchNormConfig {
            epsilon: 0.0,
            ..BatchNormConfig::default()
        };
        assert!(matches!(
            BatchNormLayer::with_config(1, 1, 1, bad, cpu()),
            Err(LayerError::InvalidConfig(_))
        ));
        let bad = BatchNormConfig {
            momentum: 1.5,
            ..BatchNormConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_forward_scenario() {
        let mut layer = BatchNormLayer::new(1, 1, 4, cpu()).unwrap();
        let out = layer
            .compute(&tensor(vec![2.0, 4.0, 4.0, 6.0], 1, 1, 4))
            .unwrap()
            .into_tensor()
            .unwrap();
        let s = 2.0 / (2.0f64 + 1e-5).sqrt();
        let expected = [-s, 0.0, 0.0, s];
        for (o, e) in out.data().iter().zip(expected) {
            assert_abs_diff_eq!(*o, e, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(out.data()[3], 1.414, epsilon = 1e-3);
    }

    #[test]
    fn test_forward_updates_running_stats() {
        let mut layer = BatchNormLayer::new(1, 1, 4, cpu()).unwrap();
        let input = tensor(vec![2.0, 4.0, 4.0, 6.0], 1, 1, 4);
        layer.compute(&input).unwrap();
        assert_abs_diff_eq!(layer.running_mean()[0], 0.04, epsilon = 1e-12);
        assert_abs_diff_eq!(layer.running_var()[0], 0.02, epsilon = 1e-12);

        layer.compute(&input).unwrap();
        assert_abs_diff_eq!(layer.running_mean()[0], 0.99 * 0.04 + 0.04, epsilon = 1e-12);
    }

    #[test]
    fn test_forward_ignores_running_stats() {
        let mut layer = BatchNormLayer::new(1, 2, 2, cpu()).unwrap();
        let input = tensor(vec![1.0, 5.0, -2.0, 3.0], 1, 2, 2);
        let first = layer.compute(&input).unwrap();
        let second = layer.compute(&input).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_constant_channel_outputs_beta() {
        let mut layer = BatchNormLayer::new(2, 2, 2, cpu()).unwrap();
        layer.beta_mut().copy_from_slice(&[0.5, -1.0]);
        layer.gamma_mut().copy_from_slice(&[3.0, 3.0]);
        let out = layer
            .compute(&tensor(vec![7.0; 8], 2, 2, 2))
            .unwrap()
            .into_tensor()
            .unwrap();
        assert!(out.data().iter().all(|v| v.is_finite()));
        assert_eq!(out.channel(0).unwrap(), &[0.5; 4]);
        assert_eq!(out.channel(1).unwrap(), &[-1.0; 4]);
    }

    #[test]
    fn test_channels_normalized_independently() {
        let mut layer = BatchNormLayer::new(2, 2, 3, cpu()).unwrap();
        let data = vec![
            1.0, 2.0, 3.0, 4.0, 5.0, 6.0, //
            -10.0, 0.0, 10.0, 20.0, 35.0, 100.0,
        ];
        let out = layer
            .compute(&tensor(data, 2, 2, 3))
            .unwrap()
            .into_tensor()
            .unwrap();
        for d in 0..2 {
            let ch = out.channel(d).unwrap();
            let mean = ch.iter().sum::<f64>() / 6.0;
            let var = ch.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / 6.0;
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-9);
            assert_abs_diff_eq!(var, 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_gamma_beta_applied_per_channel() {
        let mut layer = BatchNormLayer::new(2, 1, 2, cpu()).unwrap();
        layer.gamma_mut().copy_from_slice(&[2.0, 1.0]);
        layer.beta_mut().copy_from_slice(&[1.0, -1.0]);
        let out = layer
            .compute(&tensor(vec![0.0, 2.0, 5.0, 5.0], 2, 1, 2))
            .unwrap()
            .into_tensor()
            .unwrap();
        let s = 1.0 / (1.0f64 + 1e-5).sqrt();
        assert_abs_diff_eq!(out.get(0, 0, 0).unwrap(), 1.0 - 2.0 * s, epsilon = 1e-12);
        assert_abs_diff_eq!(out.get(0, 0, 1).unwrap(), 1.0 + 2.0 * s, epsilon = 1e-12);
        assert_eq!(out.channel(1).unwrap(), &[-1.0, -1.0]);
    }

    #[test]
    fn test_tensor_shape_checked() {
        let mut layer = BatchNormLayer::new(2, 2, 2, cpu()).unwrap();
        let wrong = tensor(vec![0.0; 8], 1, 2, 4);
        assert!(matches!(
            layer.compute(&wrong),
            Err(LayerError::ShapeMismatch { .. })
        ));
        assert_eq!(layer.running_mean(), &[0.0, 0.0]);
    }

    #[test]
    fn test_backward_uses_running_stats() {
        let mut layer = BatchNormLayer::new(1, 1, 4, cpu()).unwrap();
        let input = tensor(vec![2.0, 4.0, 4.0, 6.0], 1, 1, 4);
        layer.compute(&input).unwrap();

        let grad = tensor(vec![1.0, 0.0, 0.0, -1.0], 1, 1, 4);
        let out = layer
            .backpropagate(&input, &grad)
            .unwrap()
            .into_tensor()
            .unwrap();

        let (mean, var_eps) = (0.04, 0.02 + 1e-5);
        let std_dev = f64::sqrt(var_eps);
        let d_var = -0.5 / var_eps * ((2.0 - mean) * 1.0 + (6.0 - mean) * -1.0);
        let expected0 = 1.0 / std_dev + d_var * 2.0 * (2.0 - mean) / 4.0;
        let expected1 = d_var * 2.0 * (4.0 - mean) / 4.0;
        assert_abs_diff_eq!(out.data()[0], expected0, epsilon = 1e-6);
        assert_abs_diff_eq!(out.data()[1], expected1, epsilon = 1e-6);
        assert_abs_diff_eq!(layer.grad_gamma()[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(layer.grad_beta()[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_gradient_accumulation_and_reset() {
        let mut layer = BatchNormLayer::new(2, 1, 2, cpu()).unwrap();
        let input = tensor(vec![1.0, 3.0, -1.0, 1.0], 2, 1, 2);
        let grad = tensor(vec![0.5, 0.5, 1.0, 2.0], 2, 1, 2);
        layer.compute(&input).unwrap();

        layer.backpropagate(&input, &grad).unwrap();
        let (g1, b1) = (layer.grad_gamma().to_vec(), layer.grad_beta().to_vec());
        // Every channel accumulates the sum of the whole gradient tensor.
        assert_abs_diff_eq!(b1[0], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(b1[1], 4.0, epsilon = 1e-12);
        for d in 0..2 {
            let std_dev = (layer.running_var()[d] + 1e-5).sqrt();
            assert_abs_diff_eq!(g1[d], 4.0 / std_dev, epsilon = 1e-9);
        }

        layer.backpropagate(&input, &grad).unwrap();
        for d in 0..2 {
            assert_abs_diff_eq!(layer.grad_gamma()[d], 2.0 * g1[d], epsilon = 1e-9);
            assert_abs_diff_eq!(layer.grad_beta()[d], 2.0 * b1[d], epsilon = 1e-12);
        }

        layer.update_parameters(0.1);
        assert_abs_diff_eq!(layer.gamma()[0], 1.0 - 0.1 * 2.0 * g1[0], epsilon = 1e-9);
        assert_abs_diff_eq!(layer.beta()[1], -0.1 * 2.0 * b1[1], epsilon = 1e-12);
        assert_eq!(layer.grad_gamma(), &[0.0, 0.0]);
        assert_eq!(layer.grad_beta(), &[0.0, 0.0]);
    }

    #[test]
    fn test_matrix_mode_forward() {
        let mut layer = BatchNormLayer::new(1, 2, 2, cpu()).unwrap();
        layer.beta_mut()[0] = 1.0;
        let out = layer
            .compute(&matrix(vec![vec![2.0, 4.0], vec![4.0, 6.0]]))
            .unwrap()
            .into_matrix()
            .unwrap();
        let s = 2.0 / (2.0f64 + 1e-5).sqrt();
        assert_abs_diff_eq!(out.get(0, 0).unwrap(), 1.0 - s, epsilon = 1e-12);
        assert_abs_diff_eq!(out.get(1, 0).unwrap(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out.get(1, 1).unwrap(), 1.0 + s, epsilon = 1e-12);
        assert_abs_diff_eq!(layer.running_mean()[0], 0.04, epsilon = 1e-12);
    }

    #[test]
    fn test_matrix_mode_backward() {
        init_logging();
        let engine: Arc<dyn ComputeBackend> =
            Arc::new(GemmEngine::new(GemmConfig::default().with_threads(2)).unwrap());
        let mut layer = BatchNormLayer::new(1, 2, 2, engine).unwrap();
        let input = matrix(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let grad = matrix(vec![vec![1.0, 0.0], vec![0.0, 0.0]]);
        let out = layer
            .backpropagate(&input, &grad)
            .unwrap()
            .into_matrix()
            .unwrap();

        // mean 2.5, variance 1.25; sum(grad @ (x - mean)^T) = -1.5 + 0.5
        let var_eps = 1.25 + 1e-5;
        let std_dev = f64::sqrt(var_eps);
        let d_var = -0.5 / var_eps * -1.0;
        let expected = |x: f64, g: f64| g / std_dev + d_var * 2.0 * (x - 2.5) / 4.0 + 0.25;
        assert_abs_diff_eq!(out.get(0, 0).unwrap(), expected(1.0, 1.0), epsilon = 1e-12);
        assert_abs_diff_eq!(out.get(1, 1).unwrap(), expected(4.0, 0.0), epsilon = 1e-12);
        assert_abs_diff_eq!(layer.grad_gamma()[0], 1.0 / std_dev, epsilon = 1e-12);
        assert_abs_diff_eq!(layer.grad_beta()[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_matrix_grad_shape_checked() {
        let mut layer = BatchNormLayer::new(1, 2, 2, cpu()).unwrap();
        let input = matrix(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let grad = matrix(vec![vec![1.0, 2.0]]);
        assert!(matches!(
            layer.backpropagate(&input, &grad),
            Err(LayerError::ShapeMismatch { .. })
        ));
        assert_eq!(layer.grad_beta(), &[0.0]);
    }

    #[test]
    fn test_mixed_signals_rejected() {
        let mut layer = BatchNormLayer::new(1, 2, 2, cpu()).unwrap();
        let input = tensor(vec![1.0, 2.0, 3.0, 4.0], 1, 2, 2);
        let grad = matrix(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert!(matches!(
            layer.backpropagate(&input, &grad),
            Err(LayerError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_copy_is_deep() {
        let mut layer = BatchNormLayer::new(2, 1, 1, cpu()).unwrap();
        layer.gamma_mut()[0] = 4.0;
        layer.moments.m[0][0] = 9.0;

        let mut copy = layer.copy();
        let bn = copy.as_any().downcast_ref::<BatchNormLayer>().unwrap();
        assert_eq!(bn.gamma(), &[4.0, 1.0]);
        assert_eq!(bn.moments, Moments::zeros(2));

        copy.update_parameters(1.0);
        copy.as_any_mut()
            .downcast_mut::<BatchNormLayer>()
            .unwrap()
            .gamma_mut()[0] = -1.0;
        assert_eq!(layer.gamma()[0], 4.0);
    }

    #[test]
    fn test_copy_to_same_variant() {
        let backend = cpu();
        let mut source = BatchNormLayer::new(2, 2, 2, backend.clone()).unwrap();
        source.compute(&tensor((0..8).map(|v| v as f64).collect(), 2, 2, 2)).unwrap();
        source.gamma_mut()[1] = 0.25;
        source.meta_mut().alpha = 0.3;

        let mut target = BatchNormLayer::new(2, 2, 2, backend.clone()).unwrap();
        source.copy_to(&mut target, true).unwrap();
        assert_eq!(target.gamma(), source.gamma());
        assert_eq!(target.running_var(), source.running_var());
        assert_eq!(target.meta().alpha, 0.0);

        source.copy_to(&mut target, false).unwrap();
        assert_eq!(target.meta().alpha, 0.3);
    }

    #[test]
    fn test_copy_to_resized_target_keeps_sizes() {
        let backend = cpu();
        let source = BatchNormLayer::new(2, 2, 2, backend.clone()).unwrap();
        let mut target = BatchNormLayer::new(1, 1, 3, backend).unwrap();
        target.meta_mut().alpha = 0.7;
        source.copy_to(&mut target, true).unwrap();
        assert_eq!(target.input_size(), 8);
        assert_eq!(target.output_size(), 8);
        assert_eq!(target.meta().alpha, 0.7);

        let input = tensor(vec![1.0; 8], 2, 2, 2);
        assert!(target.compute(&input).is_ok());
    }

    #[test]
    fn test_copy_to_other_variant_fails() {
        let backend = cpu();
        let source = BatchNormLayer::new(1, 1, 2, backend.clone()).unwrap();
        let mut dense = DenseLayer::zeros(2, 2, backend).unwrap();
        assert!(matches!(
            source.copy_to(&mut dense, false),
            Err(LayerError::TypeMismatch { .. })
        ));
    }
}
