//! Error types raised by configuration parsing.
//!
//! Per the decoder and pipeline stage contracts, malformed *input data*
//! (bad packets, mismatched calibration files) is never propagated as an
//! error: it is counted and logged, and processing continues. Only
//! malformed *configuration* raises.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MercuryError {
    #[error("malformed FEM port map entry {entry:?} in {source:?}")]
    InvalidFemPortMap { source: String, entry: String },

    #[error("malformed sensor layout string {0:?}, expected \"RxC\"")]
    InvalidSensorLayout(String),

    #[error("unknown threshold mode {0:?}, expected none|value|filename")]
    InvalidThresholdMode(String),

    #[error("pixel_grid_size must be an odd integer >= 3, got {0}")]
    InvalidPixelGridSize(i64),
}
