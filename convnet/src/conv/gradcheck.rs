use crate::{conv::ConvLayer, malgebra::cube::Cube};

/// Largest absolute gap between analytic and central-difference gradients.
#[derive(Clone, Debug, PartialEq)]
pub struct GradientCheck {
    pub max_input_error: f64,
    pub max_filter_error: f64,
    pub passed: bool,
}

// Central difference of `loss` around element `idx` of `cube`; the element is restored.
fn central_difference<F>(cube: &mut Cube, idx: (usize, usize, usize), epsilon: f64, mut loss: F) -> f64
where
    F: FnMut(&Cube) -> f64,
{
    let original = cube[idx];
    cube[idx] = original + epsilon;
    let plus = loss(cube);
    cube[idx] = original - epsilon;
    let minus = loss(cube);
    cube[idx] = original;
    (plus - minus) / (2.0 * epsilon)
}

// Running maximum that keeps NaN, so a poisoned comparison cannot pass.
fn worst(acc: f64, deviation: f64) -> f64 {
    if acc.is_nan() || deviation.is_nan() { f64::NAN } else { acc.max(deviation) }
}

fn indices(shape: (usize, usize, usize)) -> impl Iterator<Item = (usize, usize, usize)> {
    (0..shape.2).flat_map(move |s| (0..shape.1).flat_map(move |c| (0..shape.0).map(move |r| (r, c, s))))
}

impl ConvLayer {
    /// Compares the backward-pass formulas against finite differences of the
    /// probe loss `sum(forward(input) * upstream)`.
    ///
    /// Works on copies: the filter bank, the cached forward pair and the
    /// accumulators are left untouched.
    ///
    /// # Panics
    /// Panics on mis-shaped `input`/`upstream` or a non-positive `epsilon`.
    pub fn check_gradients(&self, input: &Cube, upstream: &Cube, epsilon: f64, tolerance: f64) -> GradientCheck {
        assert!(epsilon > 0.0, "epsilon must be positive");
        assert_eq!(input.shape(), self.config.input_shape(), "input shape does not match the layer");
        assert_eq!(upstream.shape(), self.config.output_shape(), "upstream shape does not match the layer output");

        let analytic_input = self.input_gradient(upstream);
        let analytic_filters = self.filter_gradients(input, upstream);

        let mut shifted_input = input.clone();
        let max_input_error = indices(input.shape())
            .map(|idx| {
                let numeric = central_difference(&mut shifted_input, idx, epsilon, |x| {
                    self.correlate(x, &self.filters).dot(upstream)
                });
                (numeric - analytic_input[idx]).abs()
            })
            .fold(0.0, worst);

        let mut bank = self.filters.clone();
        let mut max_filter_error: f64 = 0.0;
        for f in 0..bank.len() {
            for idx in indices(bank[f].shape()) {
                let mut filter = bank[f].clone();
                let numeric = central_difference(&mut filter, idx, epsilon, |shifted| {
                    bank[f] = shifted.clone();
                    self.correlate(input, &bank).dot(upstream)
                });
                bank[f] = filter;
                max_filter_error = worst(max_filter_error, (numeric - analytic_filters[f][idx]).abs());
            }
        }

        // NaN compares false, so any NaN deviation fails here
        let passed = max_input_error <= tolerance && max_filter_error <= tolerance;
        if !passed {
            log::warn!("gradient check failed: input {max_input_error:e}, filters {max_filter_error:e}");
        }
        GradientCheck {
            max_input_error: max_input_error,
            max_filter_error: max_filter_error,
            passed: passed,
        }
    }
}
