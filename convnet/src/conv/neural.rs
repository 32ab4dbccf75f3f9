use rayon::prelude::*;

use crate::{conv::ConvLayer, malgebra::cube::Cube, traits::Neural};

// Loop convention shared by every pass: (r, c) walks output space,
// 0..out_h and 0..out_w. The receptive field of (r, c) starts at input
// position (r * vertical_stride, c * horizontal_stride, 0).
impl ConvLayer {
    fn receptive_origin(&self, r: usize, c: usize) -> (usize, usize, usize) {
        (r * self.config.vertical_stride, c * self.config.horizontal_stride, 0)
    }

    // Input patches in output-space order, index r + c * out_h.
    fn patches(&self, input: &Cube) -> Vec<Cube> {
        let (out_h, out_w, _) = self.config.output_shape();
        let (fh, fw, depth) = self.config.filter_shape();
        (0..out_w)
            .flat_map(|c| (0..out_h).map(move |r| (r, c)))
            .map(|(r, c)| {
                let first = self.receptive_origin(r, c);
                input.subcube(first, (first.0 + fh - 1, first.1 + fw - 1, depth - 1))
            }).collect()
    }

    /// Valid strided cross-correlation of `input` with every filter in `filters`.
    /// Used by `forward` and by the gradient check with perturbed banks.
    pub(crate) fn correlate(&self, input: &Cube, filters: &[Cube]) -> Cube {
        let (out_h, out_w, _) = self.config.output_shape();
        let patches = self.patches(input);
        let maps: Vec<Vec<f64>> = filters.par_iter()
            .map(|filter| patches.iter().map(|patch| patch.dot(filter)).collect())
            .collect();
        Cube::from_fn((out_h, out_w, filters.len()), |r, c, f| maps[f][r + c * out_h])
    }

    /// Adjoint of `correlate` with respect to the input: every filter, scaled
    /// by the upstream value of its placement, is scattered back onto the
    /// receptive field. Overlapping fields add up.
    pub(crate) fn input_gradient(&self, upstream: &Cube) -> Cube {
        let (out_h, out_w, _) = self.config.output_shape();
        let mut grad = Cube::zeros(self.config.input_shape());
        for (f, filter) in self.filters.iter().enumerate() {
            for c in 0..out_w {
                for r in 0..out_h {
                    grad.add_scaled_at(self.receptive_origin(r, c), upstream[(r, c, f)], filter);
                }
            }
        }
        grad
    }

    /// Gradient of every filter: the sum over placements of the upstream value
    /// times the input patch of that placement.
    pub(crate) fn filter_gradients(&self, input: &Cube, upstream: &Cube) -> Vec<Cube> {
        let (out_h, out_w, _) = self.config.output_shape();
        let patches = self.patches(input);
        (0..self.config.num_filters).into_par_iter()
            .map(|f| {
                let mut grad = Cube::zeros(self.config.filter_shape());
                for c in 0..out_w {
                    for r in 0..out_h {
                        grad.scaled_add(upstream[(r, c, f)], &patches[r + c * out_h]);
                    }
                }
                grad
            }).collect()
    }
}

impl Neural for ConvLayer {
    /// # Panics
    /// Panics if `input` is not `input_height × input_width × input_depth`.
    fn forward(&mut self, input: &Cube) -> Cube {
        let config = &self.config;
        assert!((config.input_height - config.filter_height) % config.vertical_stride == 0);
        assert!((config.input_width - config.filter_width) % config.horizontal_stride == 0);
        assert_eq!(input.shape(), config.input_shape(), "input shape does not match the layer");

        let output = self.correlate(input, &self.filters);
        log::trace!("conv forward {:?} -> {:?}", input.shape(), output.shape());

        self.input = Some(input.clone());
        self.output = Some(output.clone());
        output
    }

    /// # Panics
    /// Panics if no forward pass ran yet or if `upstream` is not shaped like
    /// the cached output.
    fn backward(&mut self, upstream: &Cube) {
        let (Some(input), Some(output)) = (self.input.as_ref(), self.output.as_ref()) else {
            panic!("backward called before forward");
        };
        assert_eq!(upstream.n_slices(), self.config.num_filters, "upstream filter count mismatch");
        assert_eq!(upstream.n_rows(), output.n_rows(), "upstream row count mismatch");
        assert_eq!(upstream.n_cols(), output.n_cols(), "upstream column count mismatch");

        let grad_input = self.input_gradient(upstream);
        let grad_filters = self.filter_gradients(input, upstream);
        log::trace!("conv backward {:?} -> {:?}", upstream.shape(), grad_input.shape());

        self.accumulated_grad_input += &grad_input;
        self.accumulated_grad_filters.iter_mut()
            .zip(grad_filters.iter())
            .for_each(|(acc, grad)| *acc += grad);

        self.grad_input = grad_input;
        self.grad_filters = grad_filters;
    }

    /// Plain descent on the batch mean: `filter -= accumulated / batch_size`,
    /// then both accumulators go back to zero.
    ///
    /// # Panics
    /// Panics if `batch_size` is zero.
    fn update_weights(&mut self, batch_size: usize) {
        assert!(batch_size > 0, "batch size must be positive");
        let batch = batch_size as f64;
        self.filters.iter_mut()
            .zip(self.accumulated_grad_filters.iter())
            .for_each(|(filter, acc)| *filter -= &acc.map(|v| v / batch));
        log::debug!("conv update over batch of {batch_size}, {} filters", self.filters.len());
        self.reset_accumulated_gradients();
    }
}


#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use crate::config::LayerConfig;

    use super::*;

    fn diagonal_layer() -> ConvLayer {
        let config = LayerConfig::new((3, 3, 1), (2, 2), (1, 1), 1);
        let filter = Cube::from_slices(&[vec![vec![1.0, 0.0], vec![0.0, 1.0]]]);
        ConvLayer::from_filters(config, vec![filter]).unwrap()
    }

    fn grid_input() -> Cube {
        Cube::from_slices(&[vec![
            vec![1.0, 2.0, 3.0],
            vec![4.0, 5.0, 6.0],
            vec![7.0, 8.0, 9.0],
        ]])
    }

    fn ones(shape: (usize, usize, usize)) -> Cube {
        Cube::from_fn(shape, |_, _, _| 1.0)
    }

    #[test]
    fn forward_sums_patch_diagonals() {
        let mut layer = diagonal_layer();
        let output = layer.forward(&grid_input());
        assert_eq!(output.shape(), (2, 2, 1));
        assert_eq!(output[(0, 0, 0)], 6.0);
        assert_eq!(output[(0, 1, 0)], 8.0);
        assert_eq!(output[(1, 0, 0)], 12.0);
        assert_eq!(output[(1, 1, 0)], 14.0);
        assert_eq!(layer.input(), Some(&grid_input()));
        assert_eq!(layer.output(), Some(&output));
    }

    #[test]
    fn forward_output_shape_with_strides() {
        let config = LayerConfig::new((7, 10, 3), (3, 2), (2, 2), 5).with_seed(1);
        let mut layer = ConvLayer::new(config);
        let output = layer.forward(&Cube::zeros((7, 10, 3)));
        assert_eq!(output.shape(), ((7 - 3) / 2 + 1, (10 - 2) / 2 + 1, 5));
    }

    #[test]
    fn strided_forward_uses_input_space_origins() {
        // 5x5 input with value 10*row + col, 1x1 filter of weight 1, stride 2
        let config = LayerConfig::new((5, 5, 1), (1, 1), (2, 2), 1);
        let mut layer = ConvLayer::from_filters(config, vec![ones((1, 1, 1))]).unwrap();
        let input = Cube::from_fn((5, 5, 1), |r, c, _| (10 * r + c) as f64);
        let output = layer.forward(&input);
        assert_eq!(output.shape(), (3, 3, 1));
        assert_eq!(output[(1, 2, 0)], 24.0);
        assert_eq!(output[(2, 1, 0)], 42.0);
    }

    #[test]
    fn forward_mixes_depth() {
        let config = LayerConfig::new((2, 2, 2), (2, 2), (1, 1), 2);
        let sum = ones((2, 2, 2));
        let second_slice = Cube::from_fn((2, 2, 2), |_, _, s| s as f64);
        let mut layer = ConvLayer::from_filters(config, vec![sum, second_slice]).unwrap();
        let input = Cube::from_fn((2, 2, 2), |r, c, s| (r + 2 * c + 4 * s) as f64);
        let output = layer.forward(&input);
        assert_eq!(output[(0, 0, 0)], (0..8).sum::<usize>() as f64);
        assert_eq!(output[(0, 0, 1)], (4..8).sum::<usize>() as f64);
    }

    #[test]
    fn backward_counts_overlapping_windows() {
        let mut layer = diagonal_layer();
        layer.forward(&grid_input());
        layer.backward(&ones((2, 2, 1)));
        let expected = Cube::from_slices(&[vec![
            vec![1.0, 1.0, 0.0],
            vec![1.0, 2.0, 1.0],
            vec![0.0, 1.0, 1.0],
        ]]);
        assert_eq!(layer.grad_input(), &expected);

        // all-ones filter: each cell counts the windows covering it
        let config = LayerConfig::new((3, 3, 1), (2, 2), (1, 1), 1);
        let mut layer = ConvLayer::from_filters(config, vec![ones((2, 2, 1))]).unwrap();
        layer.forward(&grid_input());
        layer.backward(&ones((2, 2, 1)));
        let expected = Cube::from_slices(&[vec![
            vec![1.0, 2.0, 1.0],
            vec![2.0, 4.0, 2.0],
            vec![1.0, 2.0, 1.0],
        ]]);
        assert_eq!(layer.grad_input(), &expected);
    }

    #[test]
    fn backward_filter_gradient_sums_patches() {
        let mut layer = diagonal_layer();
        layer.forward(&grid_input());
        layer.backward(&ones((2, 2, 1)));
        // sum of the four 2x2 patches of the grid
        let expected = Cube::from_slices(&[vec![vec![12.0, 16.0], vec![24.0, 28.0]]]);
        assert_eq!(layer.grad_filters().len(), 1);
        assert_eq!(&layer.grad_filters()[0], &expected);
        assert_eq!(layer.grad_filters()[0].shape(), (2, 2, 1));
    }

    #[test]
    fn strided_backward_places_gradients_at_origins() {
        let config = LayerConfig::new((5, 5, 1), (1, 1), (2, 2), 1);
        let mut layer = ConvLayer::from_filters(config, vec![ones((1, 1, 1)).scaled(3.0)]).unwrap();
        let input = Cube::from_fn((5, 5, 1), |r, c, _| (10 * r + c) as f64);
        layer.forward(&input);
        let mut upstream = Cube::zeros((3, 3, 1));
        upstream[(1, 2, 0)] = 1.0;
        layer.backward(&upstream);
        assert_eq!(layer.grad_input()[(2, 4, 0)], 3.0);
        assert_eq!(layer.grad_input().iter().sum::<f64>(), 3.0);
        assert_eq!(layer.grad_filters()[0][(0, 0, 0)], 24.0);
    }

    #[test]
    fn backward_twice_doubles_accumulators() {
        let config = LayerConfig::new((6, 6, 2), (2, 2), (2, 2), 3).with_seed(21);
        let mut layer = ConvLayer::new(config);
        let input = Cube::from_fn((6, 6, 2), |r, c, s| (r as f64 - c as f64) * 0.25 + s as f64);
        let upstream = Cube::from_fn((3, 3, 3), |r, c, f| 0.5 + r as f64 - 0.5 * (c * f) as f64);
        layer.forward(&input);

        layer.backward(&upstream);
        let single_input = layer.accumulated_grad_input().clone();
        let single_filters = layer.accumulated_grad_filters().to_vec();
        assert_eq!(&single_input, layer.grad_input());

        layer.backward(&upstream);
        assert_eq!(layer.accumulated_grad_input(), &single_input.scaled(2.0));
        layer.accumulated_grad_filters().iter()
            .zip(single_filters.iter())
            .for_each(|(acc, single)| assert_eq!(acc, &single.scaled(2.0)));
    }

    #[test]
    fn batch_mean_matches_single_step() {
        let config = LayerConfig::new((4, 4, 1), (3, 3), (1, 1), 2).with_seed(8);
        let input = Cube::from_fn((4, 4, 1), |r, c, _| (r * 4 + c) as f64 / 16.0);
        let upstream = Cube::from_fn((2, 2, 2), |r, c, f| r as f64 + 0.5 * c as f64 - f as f64);

        let mut single = ConvLayer::new(config.clone());
        single.forward(&input);
        single.backward(&upstream);
        single.update_weights(1);

        let mut batched = ConvLayer::new(config);
        for _ in 0..4 {
            batched.forward(&input);
            batched.backward(&upstream);
        }
        batched.update_weights(4);

        single.filters().iter()
            .zip(batched.filters().iter())
            .for_each(|(a, b)| a.iter().zip(b.iter()).for_each(|(x, y)| assert_relative_eq!(x, y, epsilon = 1e-12)));
    }

    #[test]
    fn update_descends_and_resets() {
        let mut layer = diagonal_layer();
        layer.forward(&grid_input());
        layer.backward(&ones((2, 2, 1)));
        layer.update_weights(2);
        let expected = Cube::from_slices(&[vec![vec![1.0 - 6.0, -8.0], vec![-12.0, 1.0 - 14.0]]]);
        assert_eq!(&layer.filters()[0], &expected);
        assert!(layer.accumulated_grad_input().iter().all(|v| *v == 0.0));
        assert!(layer.accumulated_grad_filters()[0].iter().all(|v| *v == 0.0));
        assert_eq!(layer.accumulated_grad_filters()[0].shape(), (2, 2, 1));

        // accumulation restarts from zero
        layer.forward(&grid_input());
        layer.backward(&ones((2, 2, 1)));
        assert_eq!(layer.accumulated_grad_input(), layer.grad_input());
        assert_eq!(&layer.accumulated_grad_filters()[0], &layer.grad_filters()[0]);
    }

    #[test]
    fn layers_are_interchangeable_behind_the_trait() {
        let mut stack: Vec<Box<dyn Neural>> = vec![Box::new(diagonal_layer())];
        let output = stack[0].forward(&grid_input());
        stack[0].backward(&output.map(|_| 0.0));
        stack[0].update_weights(1);
        assert_eq!(output.shape(), (2, 2, 1));
    }

    #[test]
    #[should_panic(expected = "backward called before forward")]
    fn backward_without_forward_panics() {
        diagonal_layer().backward(&ones((2, 2, 1)));
    }

    #[test]
    #[should_panic(expected = "upstream row count mismatch")]
    fn mis_shaped_upstream_panics() {
        let mut layer = diagonal_layer();
        layer.forward(&grid_input());
        layer.backward(&ones((3, 2, 1)));
    }

    #[test]
    #[should_panic]
    fn mis_shaped_input_panics() {
        diagonal_layer().forward(&Cube::zeros((3, 4, 1)));
    }

    #[test]
    #[should_panic(expected = "batch size must be positive")]
    fn zero_batch_panics() {
        diagonal_layer().update_weights(0);
    }
}
