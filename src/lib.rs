//! UDP frame decoder and processing pipeline for the Mercury pixelated
//! X-ray detector's data plane: packet decoding and frame reassembly,
//! followed by a configurable chain of per-frame processing stages
//! (calibration, thresholding, charged-sharing addition/discrimination,
//! next-frame suppression, histogramming).

pub mod buffer;
pub mod decoder;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod pipeline;
pub mod protocol;
pub mod tables;
