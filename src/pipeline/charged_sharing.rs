//! The charged-sharing Addition and Discrimination kernels.
//!
//! Both stages copy the frame into a zero-padded "extended" buffer so that
//! every real pixel has a full neighbourhood to scan, even at the image's
//! edges, then scan it as a single flat range and copy the result back.
//! Grounded on `MercuryAdditionPlugin::prepare_charged_sharing` /
//! `process_addition` and `MercuryDiscriminationPlugin::prepareChargedSharing`
//! / `processDiscrimination`, which share this padding scheme exactly; only
//! the body of the inner scan differs (energy-merge onto the local max vs.
//! cluster rejection).
//!
//! One deliberate deviation from the original: neighbour offsets are
//! computed using the extended frame's column stride, not its row count.
//! The original multiplies by row count there too, which only matches the
//! column stride because every layout it runs against happens to be
//! square (NxN sensors); this implementation's [`SensorLayout`] is not
//! restricted to square grids, so using the actual column stride is the
//! correct generalization rather than a literal port of that coincidence.

use crate::error::MercuryError;
use crate::frame::{DatasetTag, Frame};
use crate::geometry::SensorLayout;
use crate::pipeline::{is_pass_through, Stage, StageConfig};

/// `pixel_grid_size` must be an odd integer >= 3 so the neighbourhood it
/// describes has a well-defined centre pixel.
fn validate_pixel_grid_size(value: i64) -> Result<i64, MercuryError> {
    if value >= 3 && value % 2 == 1 {
        Ok(value)
    } else {
        Err(MercuryError::InvalidPixelGridSize(value))
    }
}

/// Zero-pad `pixels` (row-major, `rows` x `cols`) by `distance` pixels on
/// every side, returning the extended buffer and its column stride.
fn extend(pixels: &[f32], rows: usize, cols: usize, distance: usize) -> (Vec<f32>, usize, usize) {
    let ext_cols = cols + 2 * distance;
    let ext_rows = rows + 2 * distance;
    let mut extended = vec![0.0f32; ext_rows * ext_cols];

    for row in 0..rows {
        let src = row * cols;
        let dst = (row + distance) * ext_cols + distance;
        extended[dst..dst + cols].copy_from_slice(&pixels[src..src + cols]);
    }

    (extended, ext_rows, ext_cols)
}

/// Copy the inner (non-padded) region of `extended` back into `pixels`.
fn retract(extended: &[f32], pixels: &mut [f32], rows: usize, cols: usize, distance: usize) {
    let ext_cols = cols + 2 * distance;
    for row in 0..rows {
        let src = (row + distance) * ext_cols + distance;
        let dst = row * cols;
        pixels[dst..dst + cols].copy_from_slice(&extended[src..src + cols]);
    }
}

fn neighbour_offsets(distance: usize, stride: usize) -> Vec<isize> {
    let distance = distance as isize;
    let stride = stride as isize;
    let mut offsets = Vec::new();
    for row in -distance..=distance {
        for col in -distance..=distance {
            if row == 0 && col == 0 {
                continue;
            }
            offsets.push(row * stride + col);
        }
    }
    offsets
}

fn process_addition(extended: &mut [f32], distance: usize, stride: usize) {
    let offsets = neighbour_offsets(distance, stride);
    let pad = distance * stride + distance;
    let end = extended.len() - pad;

    for i in pad..end {
        if extended[i] <= 0.0 {
            continue;
        }
        let mut max_value = extended[i];
        for &offset in &offsets {
            let j = (i as isize + offset) as usize;
            if extended[j] > 0.0 {
                if extended[j] > max_value {
                    extended[j] += extended[i];
                    max_value = extended[j];
                    extended[i] = 0.0;
                } else {
                    extended[i] += extended[j];
                    max_value = extended[i];
                    extended[j] = 0.0;
                }
            }
        }
    }
}

fn process_discrimination(extended: &mut [f32], distance: usize, stride: usize) {
    let offsets = neighbour_offsets(distance, stride);
    let pad = distance * stride + distance;
    let end = extended.len() - pad;

    for i in pad..end {
        if extended[i] <= 0.0 {
            continue;
        }
        let mut wiped = false;
        for &offset in &offsets {
            let j = (i as isize + offset) as usize;
            if wiped {
                extended[j] = 0.0;
            } else if extended[j] > 0.0 {
                extended[j] = 0.0;
                extended[i] = 0.0;
                wiped = true;
            }
        }
    }
}

fn run_kernel(pixels: &mut [f32], rows: usize, cols: usize, distance: usize, kernel: fn(&mut [f32], usize, usize)) {
    let (mut extended, _ext_rows, ext_cols) = extend(pixels, rows, cols, distance);
    kernel(&mut extended, distance, ext_cols);
    retract(&extended, pixels, rows, cols, distance);
}

fn directional_distance(pixel_grid_size: i64) -> usize {
    (pixel_grid_size / 2).max(0) as usize
}

pub struct AdditionStage {
    pixel_grid_size: i64,
    layout: SensorLayout,
}

impl AdditionStage {
    pub fn new(layout: SensorLayout) -> Self {
        AdditionStage {
            pixel_grid_size: 3,
            layout,
        }
    }
}

impl Stage for AdditionStage {
    fn name(&self) -> &'static str {
        "addition"
    }

    fn configure(&mut self, config: &StageConfig) -> Vec<Frame> {
        if let Some(v) = config.get_i64("pixel_grid_size") {
            match validate_pixel_grid_size(v) {
                Ok(v) => self.pixel_grid_size = v,
                Err(e) => log::error!("{e} (keeping pixel_grid_size={})", self.pixel_grid_size),
            }
        }
        Vec::new()
    }

    fn request_configuration(&self) -> StageConfig {
        let mut config = StageConfig::new();
        config.set("pixel_grid_size", self.pixel_grid_size);
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
        let distance = directional_distance(self.pixel_grid_size);
        let (rows, cols) = (self.layout.image_height(), self.layout.image_width());
        run_kernel(frame.payload.as_f32_mut(), rows, cols, distance, process_addition);
        vec![frame]
    }
}

pub struct DiscriminationStage {
    pixel_grid_size: i64,
    layout: SensorLayout,
}

impl DiscriminationStage {
    pub fn new(layout: SensorLayout) -> Self {
        DiscriminationStage {
            pixel_grid_size: 3,
            layout,
        }
    }
}

impl Stage for DiscriminationStage {
    fn name(&self) -> &'static str {
        "discrimination"
    }

    fn configure(&mut self, config: &StageConfig) -> Vec<Frame> {
        if let Some(v) = config.get_i64("pixel_grid_size") {
            match validate_pixel_grid_size(v) {
                Ok(v) => self.pixel_grid_size = v,
                Err(e) => log::error!("{e} (keeping pixel_grid_size={})", self.pixel_grid_size),
            }
        }
        Vec::new()
    }

    fn request_configuration(&self) -> StageConfig {
        let mut config = StageConfig::new();
        config.set("pixel_grid_size", self.pixel_grid_size);
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
        let distance = directional_distance(self.pixel_grid_size);
        let (rows, cols) = (self.layout.image_height(), self.layout.image_width());
        run_kernel(frame.payload.as_f32_mut(), rows, cols, distance, process_discrimination);
        vec![frame]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FramePayload;

    fn frame_3x3(layout: SensorLayout, values: &[(usize, usize, f32)]) -> Frame {
        let mut pixels = vec![0.0f32; layout.image_pixels()];
        let width = layout.image_width();
        for &(row, col, value) in values {
            pixels[row * width + col] = value;
        }
        Frame::new(0, layout, DatasetTag::ProcessedFrames, FramePayload::F32(pixels))
    }

    #[test]
    fn addition_merges_onto_local_max() {
        let layout = SensorLayout::parse("1x1").unwrap();
        let mut stage = AdditionStage::new(layout);
        // Cluster at (10,10)=5, (10,11)=3, (11,10)=2: all merge onto (10,10).
        let frame = frame_3x3(layout, &[(10, 10, 5.0), (10, 11, 3.0), (11, 10, 2.0)]);
        let out = stage.process_frame(frame);
        assert_eq!(out[0].pixel(10, 10), 10.0);
        assert_eq!(out[0].pixel(10, 11), 0.0);
        assert_eq!(out[0].pixel(11, 10), 0.0);
    }

    #[test]
    fn addition_ignores_isolated_pixel() {
        let layout = SensorLayout::parse("1x1").unwrap();
        let mut stage = AdditionStage::new(layout);
        let frame = frame_3x3(layout, &[(40, 40, 7.0)]);
        let out = stage.process_frame(frame);
        assert_eq!(out[0].pixel(40, 40), 7.0);
    }

    #[test]
    fn discrimination_wipes_clustered_pixels() {
        let layout = SensorLayout::parse("1x1").unwrap();
        let mut stage = DiscriminationStage::new(layout);
        let frame = frame_3x3(layout, &[(10, 10, 5.0), (10, 11, 3.0)]);
        let out = stage.process_frame(frame);
        assert_eq!(out[0].pixel(10, 10), 0.0);
        assert_eq!(out[0].pixel(10, 11), 0.0);
    }

    #[test]
    fn discrimination_keeps_isolated_pixel() {
        let layout = SensorLayout::parse("1x1").unwrap();
        let mut stage = DiscriminationStage::new(layout);
        let frame = frame_3x3(layout, &[(40, 40, 9.0)]);
        let out = stage.process_frame(frame);
        assert_eq!(out[0].pixel(40, 40), 9.0);
    }

    #[test]
    fn edge_pixels_do_not_panic() {
        let layout = SensorLayout::parse("1x1").unwrap();
        let mut addition = AdditionStage::new(layout);
        let frame = frame_3x3(layout, &[(0, 0, 5.0), (79, 79, 5.0)]);
        let out = addition.process_frame(frame);
        assert_eq!(out[0].pixel(0, 0), 5.0);
        assert_eq!(out[0].pixel(79, 79), 5.0);
    }

    #[test]
    fn rejects_even_or_too_small_pixel_grid_size() {
        let layout = SensorLayout::parse("1x1").unwrap();
        let mut stage = AdditionStage::new(layout);

        let mut config = StageConfig::new();
        config.set("pixel_grid_size", 4);
        stage.configure(&config);
        assert_eq!(stage.pixel_grid_size, 3, "even size must be rejected, keeping the default");

        let mut config = StageConfig::new();
        config.set("pixel_grid_size", 1);
        stage.configure(&config);
        assert_eq!(stage.pixel_grid_size, 3, "size below 3 must be rejected, keeping the default");
    }

    #[test]
    fn accepts_valid_pixel_grid_size() {
        let layout = SensorLayout::parse("1x1").unwrap();
        let mut stage = DiscriminationStage::new(layout);

        let mut config = StageConfig::new();
        config.set("pixel_grid_size", 5);
        stage.configure(&config);
        assert_eq!(stage.pixel_grid_size, 5);
    }
}
