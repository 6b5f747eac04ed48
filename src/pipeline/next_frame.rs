//! Suppress pixels that were also lit in the immediately preceding frame.
//!
//! Grounded on `MercuryNextFramePlugin::apply_algorithm`: a pixel is
//! zeroed if the *previous* frame had a nonzero value there, regardless of
//! whether the current frame's value at that pixel is itself zero or not.
//! The comparison only runs when the current frame number is exactly one
//! past the last frame processed; a gap (a dropped or skipped frame)
//! disables the correction for that frame but the last-frame buffer is
//! still updated so the next call has something to compare against.

use crate::frame::{DatasetTag, Frame};
use crate::geometry::SensorLayout;
use crate::pipeline::{is_pass_through, Stage, StageConfig};

pub struct NextFrameStage {
    last_frame_number: i64,
    last_frame: Vec<f32>,
}

impl NextFrameStage {
    pub fn new(layout: SensorLayout) -> Self {
        NextFrameStage {
            last_frame_number: -1,
            last_frame: vec![0.0; layout.image_pixels()],
        }
    }
}

impl Stage for NextFrameStage {
    fn name(&self) -> &'static str {
        "next_frame"
    }

    fn configure(&mut self, _config: &StageConfig) -> Vec<Frame> {
        Vec::new()
    }

    fn request_configuration(&self) -> StageConfig {
        StageConfig::new()
    }

    fn status(&self) -> StageConfig {
        StageConfig::new()
    }

    fn reset_statistics(&mut self) {}

    fn process_frame(&mut self, mut frame: Frame) -> Vec<Frame> {
        if is_pass_through(frame.metadata.dataset) {
            return vec![frame];
        }

        let current_frame_number = frame.metadata.frame_number as i64;

        if self.last_frame_number + 1 == current_frame_number {
            for (pixel, &last) in frame.payload.as_f32_mut().iter_mut().zip(self.last_frame.iter()) {
                if last > 0.0 {
                    *pixel = 0.0;
                }
            }
        } else {
            log::trace!(
                "Not correcting current frame; last frame number: {} versus current_frame_number: {}",
                self.last_frame_number,
                current_frame_number
            );
        }

        self.last_frame_number = current_frame_number;
        self.last_frame.copy_from_slice(frame.payload.as_f32());

        vec![frame]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FramePayload;

    fn frame_with_pixel(layout: SensorLayout, frame_number: u32, row: usize, col: usize, value: f32) -> Frame {
        let mut pixels = vec![0.0f32; layout.image_pixels()];
        pixels[row * layout.image_width() + col] = value;
        Frame::new(frame_number, layout, DatasetTag::ProcessedFrames, FramePayload::F32(pixels))
    }

    #[test]
    fn suppresses_pixel_lit_in_previous_frame() {
        let layout = SensorLayout::parse("1x1").unwrap();
        let mut stage = NextFrameStage::new(layout);

        let first = frame_with_pixel(layout, 0, 5, 5, 7.0);
        let out = stage.process_frame(first);
        assert_eq!(out[0].pixel(5, 5), 7.0);

        let second = frame_with_pixel(layout, 1, 5, 5, 7.0);
        let out = stage.process_frame(second);
        assert_eq!(out[0].pixel(5, 5), 0.0);
    }

    #[test]
    fn skips_correction_across_a_frame_gap() {
        let layout = SensorLayout::parse("1x1").unwrap();
        let mut stage = NextFrameStage::new(layout);

        stage.process_frame(frame_with_pixel(layout, 0, 5, 5, 7.0));
        // Frame 2 is not adjacent to frame 0 (frame 1 was skipped).
        let out = stage.process_frame(frame_with_pixel(layout, 2, 5, 5, 9.0));
        assert_eq!(out[0].pixel(5, 5), 9.0);
    }
}
