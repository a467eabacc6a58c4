use std::any::Any;
use std::fmt::Debug;

use crate::error::{LayerError, Result};
use crate::signal::Signal;

/// Fields every layer carries regardless of its variant.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerMeta {
    pub input_size: usize,
    pub output_size: usize,
    /// Free coefficient a network driver may attach to the layer, such as the
    /// slope of the activation it applies afterwards.
    pub alpha: f64,
}

impl LayerMeta {
    pub fn new(input_size: usize, output_size: usize) -> Self {
        LayerMeta {
            input_size,
            output_size,
            alpha: 0.0,
        }
    }
}

/// The forward/backward/update contract shared by all layers.
///
/// A layer instance is single-writer: every mutating call takes `&mut self`,
/// so concurrent `backpropagate`/`update_parameters` on the same layer cannot
/// happen. Layers may still use a shared multi-threaded backend internally.
pub trait Layer: Send + Sync + Debug {
    /// Returns the variant name of this layer (e.g., "dense", "batch_norm").
    fn name(&self) -> &str;

    fn meta(&self) -> &LayerMeta;

    fn meta_mut(&mut self) -> &mut LayerMeta;

    fn input_size(&self) -> usize {
        self.meta().input_size
    }

    fn output_size(&self) -> usize {
        self.meta().output_size
    }

    /// Forward pass. Takes `&mut self` because some layers update running
    /// statistics as a side effect.
    fn compute(&mut self, input: &Signal) -> Result<Signal>;

    /// Backward pass.
    ///
    /// `input` is the value this layer received in the forward pass and
    /// `grad_output` the gradient w.r.t. its output. Returns the gradient
    /// w.r.t. `input` and adds (never assigns) this call's parameter
    /// gradients to the layer's accumulators, so several calls can build up a
    /// minibatch before one [`update_parameters`](Layer::update_parameters).
    fn backpropagate(&mut self, input: &Signal, grad_output: &Signal) -> Result<Signal>;

    /// Plain SGD step: `param -= learning_rate * grad` for every learnable
    /// parameter, then reset all accumulated gradients to zero.
    fn update_parameters(&mut self, learning_rate: f64);

    /// Deep copy of this layer.
    fn copy(&self) -> Box<dyn Layer>;

    /// Copy learnable state into `target`, which must be the same variant.
    ///
    /// Unless `ignore_primitives` is set, the shared [`LayerMeta`] fields are copied too.
    ///
    /// # Errors
    /// Returns `LayerError::TypeMismatch` if `target` is a different variant.
    fn copy_to(&self, target: &mut dyn Layer, ignore_primitives: bool) -> Result<()>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// One-line description, e.g. `batch_norm: in:16 out:16`.
    fn summary(&self) -> String {
        format!(
            "{}: in:{} out:{}",
            self.name(),
            self.input_size(),
            self.output_size()
        )
    }
}

impl Clone for Box<dyn Layer> {
    fn clone(&self) -> Self {
        self.copy()
    }
}

/// Downcast `target` to the concrete layer type `T` for `copy_to`.
pub(crate) fn downcast_target<'a, T: Layer + 'static>(
    target: &'a mut dyn Layer,
    expected: &str,
) -> Result<&'a mut T> {
    let got = target.name().to_string();
    target
        .as_any_mut()
        .downcast_mut::<T>()
        .ok_or_else(|| LayerError::TypeMismatch {
            expected: expected.to_string(),
            got,
        })
}
