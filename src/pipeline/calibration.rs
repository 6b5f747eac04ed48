//! Per-pixel gradient/intercept calibration.
//!
//! Grounded on `MercuryCalibrationPlugin::calibrate_pixels`: every
//! strictly-positive pixel is replaced by `pixel * gradient + intercept`;
//! zero and negative pixels (there shouldn't be any, since the wire format
//! is unsigned, but a prior stage could in principle zero one out) are
//! left alone.

use crate::frame::{DatasetTag, Frame};
use crate::geometry::SensorLayout;
use crate::pipeline::{is_pass_through, Stage, StageConfig};
use crate::tables::CalibrationTable;

pub struct CalibrationStage {
    table: CalibrationTable,
    gradients_filename: String,
    intercepts_filename: String,
    image_pixels: usize,
}

impl CalibrationStage {
    pub fn new(layout: SensorLayout) -> Self {
        CalibrationStage {
            table: CalibrationTable::identity(layout.image_pixels()),
            gradients_filename: String::new(),
            intercepts_filename: String::new(),
            image_pixels: layout.image_pixels(),
        }
    }

    fn calibrate(&self, pixels: &mut [f32]) {
        for (i, pixel) in pixels.iter_mut().enumerate() {
            if *pixel > 0.0 {
                *pixel = *pixel * self.table.gradients[i] + self.table.intercepts[i];
            }
        }
    }
}

impl Stage for CalibrationStage {
    fn name(&self) -> &'static str {
        "calibration"
    }

    fn configure(&mut self, config: &StageConfig) -> Vec<Frame> {
        if let Some(path) = config.get_str("gradients_filename") {
            self.gradients_filename = path.to_string();
            if self.table.load_gradients(path, self.image_pixels) {
                log::trace!("Setting Gradients Successful, used file: {path}");
            } else {
                log::error!("setGradients() Failed (using default value instead)");
            }
        }
        if let Some(path) = config.get_str("intercepts_filename") {
            self.intercepts_filename = path.to_string();
            if self.table.load_intercepts(path, self.image_pixels) {
                log::trace!("Setting Intercepts Successful, used file: {path}");
            } else {
                log::error!("setIntercepts() Failed (using default value instead)");
            }
        }
        Vec::new()
    }

    fn request_configuration(&self) -> StageConfig {
        let mut config = StageConfig::new();
        config
            .set("gradients_filename", &self.gradients_filename)
            .set("intercepts_filename", &self.intercepts_filename);
        config
    }

    fn status(&self) -> StageConfig {
        self.request_configuration()
    }

    fn reset_statistics(&mut self) {}

    fn process_frame(&mut self, mut frame: Frame) -> Vec<Frame> {
        if is_pass_through(frame.metadata.dataset) {
            return vec![frame];
        }
        self.calibrate(frame.payload.as_f32_mut());
        vec![frame]
    }
}
