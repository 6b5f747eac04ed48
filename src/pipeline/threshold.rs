//! Thresholding: none, a single scalar value, or a per-pixel table loaded
//! from file.
//!
//! Grounded on `MercuryThresholdPlugin::process_threshold_value` /
//! `process_threshold_file`: any pixel strictly below its threshold is
//! zeroed.

use crate::error::MercuryError;
use crate::frame::{DatasetTag, Frame};
use crate::geometry::SensorLayout;
use crate::pipeline::{is_pass_through, Stage, StageConfig};
use crate::tables::ThresholdTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdMode {
    None,
    Value,
    Filename,
}

impl ThresholdMode {
    fn parse(s: &str) -> Result<Self, MercuryError> {
        match s {
            "none" => Ok(ThresholdMode::None),
            "value" => Ok(ThresholdMode::Value),
            "filename" => Ok(ThresholdMode::Filename),
            other => Err(MercuryError::InvalidThresholdMode(other.to_string())),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ThresholdMode::None => "none",
            ThresholdMode::Value => "value",
            ThresholdMode::Filename => "filename",
        }
    }
}

pub struct ThresholdStage {
    mode: ThresholdMode,
    value: f32,
    per_pixel: ThresholdTable,
    filename: String,
    image_pixels: usize,
}

impl ThresholdStage {
    pub fn new(layout: SensorLayout) -> Self {
        ThresholdStage {
            mode: ThresholdMode::None,
            value: 0.0,
            per_pixel: ThresholdTable::zeroed(layout.image_pixels()),
            filename: String::new(),
            image_pixels: layout.image_pixels(),
        }
    }
}

impl Stage for ThresholdStage {
    fn name(&self) -> &'static str {
        "threshold"
    }

    fn configure(&mut self, config: &StageConfig) -> Vec<Frame> {
        if let Some(mode) = config.get_str("threshold_mode") {
            match ThresholdMode::parse(mode) {
                Ok(parsed) => {
                    self.mode = parsed;
                    log::trace!("User selected threshold mode: {mode}");
                }
                Err(e) => log::error!("{e}"),
            }
        }
        if let Some(v) = config.get_f64("threshold_value") {
            self.value = v as f32;
            log::trace!("Setting threshold value to: {v}");
        }
        if let Some(path) = config.get_str("threshold_filename") {
            self.filename = path.to_string();
            if !path.is_empty() {
                if self.per_pixel.load(path, self.image_pixels) {
                    log::trace!("Read thresholds from file successfully");
                } else {
                    log::error!("Failed to read thresholds from file");
                }
            }
        }
        Vec::new()
    }

    fn request_configuration(&self) -> StageConfig {
        let mut config = StageConfig::new();
        config
            .set("threshold_mode", self.mode.as_str())
            .set("threshold_value", self.value)
            .set("threshold_filename", &self.filename);
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

        match self.mode {
            ThresholdMode::None => {}
            ThresholdMode::Value => {
                for pixel in frame.payload.as_f32_mut() {
                    if *pixel < self.value {
                        *pixel = 0.0;
                    }
                }
            }
            ThresholdMode::Filename => {
                let pixels = frame.payload.as_f32_mut();
                for (pixel, &threshold) in pixels.iter_mut().zip(self.per_pixel.thresholds.iter()) {
                    if *pixel < threshold as f32 {
                        *pixel = 0.0;
                    }
                }
            }
        }

        vec![frame]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FramePayload;

    fn frame_with(layout: SensorLayout, values: &[(usize, usize, f32)]) -> Frame {
        let mut pixels = vec![0.0f32; layout.image_pixels()];
        for &(row, col, value) in values {
            pixels[row * layout.image_width() + col] = value;
        }
        Frame::new(0, layout, DatasetTag::ProcessedFrames, FramePayload::F32(pixels))
    }

    #[test]
    fn value_mode_zeroes_below_threshold() {
        let layout = SensorLayout::parse("1x1").unwrap();
        let mut stage = ThresholdStage::new(layout);
        let mut config = StageConfig::new();
        config.set("threshold_mode", "value").set("threshold_value", 50);
        stage.configure(&config);

        let frame = frame_with(layout, &[(0, 0, 49.0), (0, 1, 50.0), (0, 2, 51.0)]);
        let out = stage.process_frame(frame);
        assert_eq!(out[0].pixel(0, 0), 0.0);
        assert_eq!(out[0].pixel(0, 1), 50.0);
        assert_eq!(out[0].pixel(0, 2), 51.0);
    }

    #[test]
    fn none_mode_is_a_no_op() {
        let layout = SensorLayout::parse("1x1").unwrap();
        let mut stage = ThresholdStage::new(layout);
        let frame = frame_with(layout, &[(0, 0, 1.0)]);
        let out = stage.process_frame(frame);
        assert_eq!(out[0].pixel(0, 0), 1.0);
    }

    #[test]
    fn rejects_unknown_mode_string() {
        assert!(ThresholdMode::parse("bogus").is_err());
    }
}
