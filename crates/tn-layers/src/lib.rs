//! `tn-layers` - Trainable layers built on `tn-tensor`.
//!
//! Every layer implements the [`Layer`] contract: a forward `compute`, a
//! `backpropagate` that accumulates parameter gradients, and an SGD
//! `update_parameters`. [`Sequential`] chains layers and replays recorded
//! inputs for the backward pass.

pub mod batch_norm;
pub mod dense;
pub mod error;
pub mod layer;
pub mod sequential;
pub mod signal;

pub use batch_norm::{BatchNormConfig, BatchNormLayer, Moments};
pub use dense::DenseLayer;
pub use error::{LayerError, Result};
pub use layer::{Layer, LayerMeta};
pub use sequential::Sequential;
pub use signal::Signal;
