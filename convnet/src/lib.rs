//! Trainable convolution layer: strided valid cross-correlation over
//! `height × width × depth` inputs, its input and filter gradients,
//! minibatch accumulation and a batch-mean descent step.

pub mod config;
pub mod conv;
pub mod error;
pub mod malgebra;
pub mod traits;

pub use config::LayerConfig;
pub use conv::{ConvLayer, gradcheck::GradientCheck, init::TruncatedNormal};
pub use error::LayerError;
pub use malgebra::cube::Cube;
pub use traits::{ConfigFS, Neural};
