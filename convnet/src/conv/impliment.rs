use crate::{config::LayerConfig, conv::{ConvLayer, init::TruncatedNormal}, error::LayerError, malgebra::cube::Cube};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaChaRng;
use rand_distr::Distribution;


impl ConvLayer {
    /// Builds a layer with truncated-normal filters drawn from the config's
    /// mean and variance. A seeded config is reproducible.
    ///
    /// # Panics
    /// Panics if the config is invalid (see [`LayerConfig::validate`]).
    pub fn new(config: LayerConfig) -> Self {
        match config.seed {
            Some(seed) => Self::with_rng(config, &mut ChaChaRng::seed_from_u64(seed)),
            None => Self::with_rng(config, &mut rand::rng()),
        }
    }

    pub fn with_rng<R: Rng + ?Sized>(config: LayerConfig, rng: &mut R) -> Self {
        if let Err(e) = config.validate() {
            panic!("{e}");
        }
        let dist = TruncatedNormal::new(config.init_mean, config.init_variance);
        let filters: Vec<Cube> = (0..config.num_filters)
            .map(|_| {
                let mut filter = Cube::zeros(config.filter_shape());
                filter.imbue(|| dist.sample(&mut *rng));
                filter
            }).collect();
        let layer = Self::assemble(config, filters);
        layer.log_filter_bank();
        layer
    }

    /// Rebuilds a layer around an existing filter bank, e.g. one read back
    /// from disk. Accumulators start at zero and nothing is cached.
    pub fn from_filters(config: LayerConfig, filters: Vec<Cube>) -> Result<Self, LayerError> {
        config.validate()?;
        if filters.len() != config.num_filters {
            return Err(LayerError::FilterCount { expected: config.num_filters, found: filters.len() });
        }
        let expected = config.filter_shape();
        if let Some((index, filter)) = filters.iter().enumerate().find(|(_, f)| f.shape() != expected) {
            return Err(LayerError::FilterShape { index: index, expected: expected, found: filter.shape() });
        }
        let layer = Self::assemble(config, filters);
        layer.log_filter_bank();
        Ok(layer)
    }

    fn assemble(config: LayerConfig, filters: Vec<Cube>) -> Self {
        let mut layer = Self {
            grad_input: Cube::zeros(config.input_shape()),
            grad_filters: vec![Cube::zeros(config.filter_shape()); config.num_filters],
            accumulated_grad_input: Cube::zeros((0, 0, 0)),
            accumulated_grad_filters: Vec::new(),
            input: None,
            output: None,
            filters: filters,
            config: config,
        };
        layer.reset_accumulated_gradients();
        layer
    }

    pub(crate) fn reset_accumulated_gradients(&mut self) {
        self.accumulated_grad_filters = vec![Cube::zeros(self.config.filter_shape()); self.config.num_filters];
        self.accumulated_grad_input = Cube::zeros(self.config.input_shape());
    }

    fn log_filter_bank(&self) {
        let Some(level) = self.config.log_filters else {
            return;
        };
        if !log::log_enabled!(level) {
            return;
        }
        for (i, filter) in self.filters.iter().enumerate() {
            log::log!(level, "Filter #{i}");
            log::log!(level, "{:?}", filter.shape());
            for s in 0..filter.n_slices() {
                log::log!(level, "  Slice # {s}");
                for row in filter.slice_rows(s) {
                    log::log!(level, "{row:?}");
                }
            }
        }
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn filters(&self) -> &[Cube] {
        &self.filters
    }

    pub fn output_shape(&self) -> (usize, usize, usize) {
        self.config.output_shape()
    }

    /// Input of the most recent forward pass.
    pub fn input(&self) -> Option<&Cube> {
        self.input.as_ref()
    }

    /// Output of the most recent forward pass.
    pub fn output(&self) -> Option<&Cube> {
        self.output.as_ref()
    }

    pub fn grad_input(&self) -> &Cube {
        &self.grad_input
    }

    pub fn grad_filters(&self) -> &[Cube] {
        &self.grad_filters
    }

    pub fn accumulated_grad_input(&self) -> &Cube {
        &self.accumulated_grad_input
    }

    pub fn accumulated_grad_filters(&self) -> &[Cube] {
        &self.accumulated_grad_filters
    }

    pub fn get_weight_count(&self) -> u64 {
        (self.config.num_filters * self.config.filter_height * self.config.filter_width * self.config.input_depth) as u64
    }
}
