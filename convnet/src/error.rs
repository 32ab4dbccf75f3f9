//! Recoverable failures. Programming errors (bad shapes, wrong call order)
//! are assertions instead and never show up here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LayerError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not a .json path: {0}")]
    NotJson(String),
    #[error("invalid layer config: {0}")]
    InvalidConfig(String),
    #[error("expected {expected} filters, found {found}")]
    FilterCount { expected: usize, found: usize },
    #[error("filter #{index} has shape {found:?}, expected {expected:?}")]
    FilterShape {
        index: usize,
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },
}

impl LayerError {
    pub(crate) fn io(path: &str, source: std::io::Error) -> Self {
        LayerError::Io { path: path.to_string(), source: source }
    }
}
