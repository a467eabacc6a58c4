use std::fmt;

use log::debug;

use crate::error::{LayerError, Result};
use crate::layer::Layer;
use crate::signal::Signal;

/// Chains layers through the [`Layer`] contract.
///
/// `forward` records the input each layer received so that `backward` can
/// hand it back in reverse order.
#[derive(Debug, Clone, Default)]
pub struct Sequential {
    layers: Vec<Box<dyn Layer>>,
    inputs: Vec<Signal>,
}

impl Sequential {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer. Returns self for builder-style usage.
    pub fn with(mut self, layer: Box<dyn Layer>) -> Self {
        self.push(layer);
        self
    }

    pub fn push(&mut self, layer: Box<dyn Layer>) {
        self.layers.push(layer);
        self.inputs.clear();
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn layer_mut(&mut self, i: usize) -> Option<&mut Box<dyn Layer>> {
        self.layers.get_mut(i)
    }

    /// Run `input` through every layer in order.
    pub fn forward(&mut self, input: Signal) -> Result<Signal> {
        self.inputs.clear();
        let mut x = input;
        for layer in self.layers.iter_mut() {
            let y = layer.compute(&x)?;
            self.inputs.push(x);
            x = y;
        }
        Ok(x)
    }

    /// Propagate `grad_output` back through every layer, last to first.
    ///
    /// Returns the gradient w.r.t. the network input.
    ///
    /// # Errors
    /// Returns `LayerError::MissingForward` unless the last `forward` completed.
    pub fn backward(&mut self, grad_output: Signal) -> Result<Signal> {
        if self.inputs.len() != self.layers.len() || self.layers.is_empty() {
            return Err(LayerError::MissingForward);
        }
        let mut grad = grad_output;
        for (layer, input) in self.layers.iter_mut().zip(self.inputs.iter()).rev() {
            grad = layer.backpropagate(input, &grad)?;
        }
        Ok(grad)
    }

    /// Apply and reset the accumulated gradients of every layer.
    pub fn update(&mut self, learning_rate: f64) {
        debug!("updating {} layers, lr={}", self.layers.len(), learning_rate);
        for layer in self.layers.iter_mut() {
            layer.update_parameters(learning_rate);
        }
    }
}

impl fmt::Display for Sequential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for layer in &self.layers {
            writeln!(f, "{}", layer.summary())?;
        }
        Ok(())
    }
}
