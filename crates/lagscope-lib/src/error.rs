//! Error taxonomy for the detection / alignment / aggregation core.

use thiserror::Error;

/// Errors raised by the algorithmic core.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LagError {
    /// Missing or invalid threshold profile for a condition.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A window had no usable samples for one of the two signals.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// Nothing left to summarise after filtering.
    #[error("no data: {0}")]
    NoData(String),

    /// Missing columns, mismatched lengths or non-monotonic time.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// FFT planning or execution failed.
    #[error("transform failed: {0}")]
    Transform(String),
}

impl LagError {
    /// Short machine-readable tag used in batch reports.
    pub fn kind(&self) -> &'static str {
        match self {
            LagError::Configuration(_) => "configuration",
            LagError::InsufficientData(_) => "insufficient_data",
            LagError::NoData(_) => "no_data",
            LagError::MalformedInput(_) => "malformed_input",
            LagError::Transform(_) => "transform",
        }
    }
}

pub type LagResult<T> = Result<T, LagError>;
