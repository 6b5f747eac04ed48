//! Whitespace-separated value-file loaders for the Calibration and
//! Threshold stages.
//!
//! Grounded on `MercuryCalibrationPlugin::getData` and
//! `MercuryThresholdPlugin::get_data`: both count the number of values in
//! the file first and, on a mismatch against the expected pixel count, log
//! and fall back to filling every slot with a default rather than failing
//! the run. Malformed configuration is not a [`crate::error::MercuryError`]
//! here for the same reason it isn't in the original: a bad calibration
//! file is an operational condition, not a startup-time configuration
//! error, so it is reported via the returned `bool`/log lines instead of
//! `Result`.

use std::path::Path;

/// Per-pixel gradient/intercept calibration table.
#[derive(Debug, Clone)]
pub struct CalibrationTable {
    pub gradients: Vec<f32>,
    pub intercepts: Vec<f32>,
}

impl CalibrationTable {
    /// An identity table: gradient 1.0, intercept 0.0 everywhere.
    pub fn identity(image_pixels: usize) -> Self {
        CalibrationTable {
            gradients: vec![1.0; image_pixels],
            intercepts: vec![0.0; image_pixels],
        }
    }

    /// Load gradients from `path`, falling back to 1.0 everywhere and
    /// logging if the file doesn't contain exactly `image_pixels` values.
    pub fn load_gradients(&mut self, path: impl AsRef<Path>, image_pixels: usize) -> bool {
        load_f32_values(path.as_ref(), image_pixels, 1.0, &mut self.gradients)
    }

    /// Load intercepts from `path`, falling back to 0.0 everywhere.
    pub fn load_intercepts(&mut self, path: impl AsRef<Path>, image_pixels: usize) -> bool {
        load_f32_values(path.as_ref(), image_pixels, 0.0, &mut self.intercepts)
    }
}

/// Per-pixel threshold table (`threshold_mode = filename`).
#[derive(Debug, Clone)]
pub struct ThresholdTable {
    pub thresholds: Vec<u16>,
}

impl ThresholdTable {
    pub fn zeroed(image_pixels: usize) -> Self {
        ThresholdTable {
            thresholds: vec![0; image_pixels],
        }
    }

    pub fn load(&mut self, path: impl AsRef<Path>, image_pixels: usize) -> bool {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                log::error!("Failed to open threshold file {path:?}: {e}");
                self.thresholds.iter_mut().for_each(|v| *v = 0);
                return false;
            }
        };

        let values: Vec<u16> = text
            .split_whitespace()
            .filter_map(|tok| tok.parse::<f64>().ok().map(|v| v as u16))
            .collect();

        if values.len() != image_pixels {
            log::error!(
                "Expected {image_pixels} values but read {} values from file: {path:?}",
                values.len()
            );
            log::warn!("Using default values instead");
            self.thresholds.iter_mut().for_each(|v| *v = 0);
            return false;
        }

        self.thresholds = values;
        true
    }
}

fn load_f32_values(path: &Path, image_pixels: usize, default_value: f32, dest: &mut Vec<f32>) -> bool {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            log::error!("Failed to open calibration file {path:?}: {e}");
            dest.clear();
            dest.resize(image_pixels, default_value);
            return false;
        }
    };

    let values: Vec<f32> = text.split_whitespace().filter_map(|tok| tok.parse::<f32>().ok()).collect();

    if values.len() != image_pixels {
        log::error!(
            "Expected {image_pixels} values but read {} values from file: {path:?}",
            values.len()
        );
        log::warn!("Using default values instead");
        dest.clear();
        dest.resize(image_pixels, default_value);
        return false;
    }

    *dest = values;
    true
}
