use crate::{config::LayerConfig, malgebra::cube::Cube};

pub mod impliment;
pub mod init;
pub mod neural;
pub mod gradcheck;
pub mod fs;

/// Trainable valid cross-correlation layer.
///
/// Holds the filter bank plus the state one training batch needs: the last
/// forward pair, the gradients of the last backward call and their running
/// sums since the last weight update.
#[derive(Clone, Debug)]
pub struct ConvLayer {
    config: LayerConfig,
    // filter -> (filter_h, filter_w, input_depth)
    filters: Vec<Cube>,
    input: Option<Cube>,
    output: Option<Cube>,
    grad_input: Cube,
    grad_filters: Vec<Cube>,
    accumulated_grad_input: Cube,
    accumulated_grad_filters: Vec<Cube>,
}
