use std::fs::File;
use std::io::{BufWriter, Read, Write};

use crate::error::LayerError;

fn default_mean() -> f64 {
    0.0
}

fn default_variance() -> f64 {
    1.0
}

// Geometry and initialisation settings of one convolution layer.
// Immutable once a layer has been built from it.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LayerConfig {
    pub input_height: usize,
    pub input_width: usize,
    pub input_depth: usize,
    pub filter_height: usize,
    pub filter_width: usize,
    pub horizontal_stride: usize,
    pub vertical_stride: usize,
    pub num_filters: usize,
    #[serde(default = "default_mean")]
    pub init_mean: f64,
    #[serde(default = "default_variance")]
    pub init_variance: f64,
    // Seeded runs are reproducible; None draws from the thread rng.
    #[serde(default)]
    pub seed: Option<u64>,
    // Level of the filter dump written after construction, None to skip it.
    #[serde(default)]
    pub log_filters: Option<log::Level>,
}

impl LayerConfig {
    // Builds a config with a standard normal initializer, no seed and no filter dump.
    // `stride` is (horizontal, vertical).
    pub fn new(
        input: (usize, usize, usize),
        filter: (usize, usize),
        stride: (usize, usize),
        num_filters: usize,
    ) -> Self {
        Self {
            input_height: input.0,
            input_width: input.1,
            input_depth: input.2,
            filter_height: filter.0,
            filter_width: filter.1,
            horizontal_stride: stride.0,
            vertical_stride: stride.1,
            num_filters: num_filters,
            init_mean: default_mean(),
            init_variance: default_variance(),
            seed: None,
            log_filters: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_init(mut self, mean: f64, variance: f64) -> Self {
        self.init_mean = mean;
        self.init_variance = variance;
        self
    }

    pub fn with_log_filters(mut self, level: log::Level) -> Self {
        self.log_filters = Some(level);
        self
    }

    pub fn input_shape(&self) -> (usize, usize, usize) {
        (self.input_height, self.input_width, self.input_depth)
    }

    pub fn filter_shape(&self) -> (usize, usize, usize) {
        (self.filter_height, self.filter_width, self.input_depth)
    }

    // (outH, outW, numFilters); meaningful only for a valid config.
    pub fn output_shape(&self) -> (usize, usize, usize) {
        (
            (self.input_height - self.filter_height) / self.vertical_stride + 1,
            (self.input_width - self.filter_width) / self.horizontal_stride + 1,
            self.num_filters,
        )
    }

    // Reports the first violated constraint.
    pub fn validate(&self) -> Result<(), LayerError> {
        let invalid = |msg: String| -> Result<(), LayerError> { Err(LayerError::InvalidConfig(msg)) };
        if self.input_height == 0 || self.input_width == 0 || self.input_depth == 0 {
            return invalid(format!("input extent {:?} has a zero axis", self.input_shape()));
        }
        if self.filter_height == 0 || self.filter_width == 0 {
            return invalid(format!("filter extent ({}, {}) has a zero axis", self.filter_height, self.filter_width));
        }
        if self.num_filters == 0 {
            return invalid("layer needs at least one filter".to_string());
        }
        if self.horizontal_stride == 0 || self.vertical_stride == 0 {
            return invalid("strides must be positive".to_string());
        }
        if self.filter_height > self.input_height || self.filter_width > self.input_width {
            return invalid(format!(
                "filter ({}, {}) larger than input ({}, {})",
                self.filter_height, self.filter_width, self.input_height, self.input_width
            ));
        }
        if (self.input_height - self.filter_height) % self.vertical_stride != 0 {
            return invalid(format!(
                "vertical stride {} does not tile input height {} with filter height {}",
                self.vertical_stride, self.input_height, self.filter_height
            ));
        }
        if (self.input_width - self.filter_width) % self.horizontal_stride != 0 {
            return invalid(format!(
                "horizontal stride {} does not tile input width {} with filter width {}",
                self.horizontal_stride, self.input_width, self.filter_width
            ));
        }
        if !self.init_mean.is_finite() {
            return invalid(format!("initializer mean {} is not finite", self.init_mean));
        }
        if !self.init_variance.is_finite() || self.init_variance < 0.0 {
            return invalid(format!("initializer variance {} must be finite and non-negative", self.init_variance));
        }
        Ok(())
    }

    // Reads a JSON config from disk and validates it.
    pub fn read(path: &String) -> Result<Self, LayerError> {
        let mut file = File::open(path).map_err(|e| LayerError::io(path, e))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).map_err(|e| LayerError::io(path, e))?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    // Saves the config as pretty-formatted JSON.
    pub fn save(&self, path: &String) -> Result<(), LayerError> {
        let pretty_json = serde_json::to_string_pretty(self)?;

        let data_file = File::create(path).map_err(|e| LayerError::io(path, e))?;
        let mut data_file = BufWriter::new(data_file);
        data_file.write_all(pretty_json.as_bytes()).map_err(|e| LayerError::io(path, e))?;
        data_file.flush().map_err(|e| LayerError::io(path, e))?;
        Ok(())
    }
}
