//! Per-pixel and summed energy-spectrum accumulation, with periodic
//! flush-to-output of the accumulated spectra.
//!
//! Grounded on `MercuryHistogramPlugin::add_frame_data_to_histogram_with_sum`
//! and `writeHistogramsToDisk`. The original allocates `number_bins_`
//! slots and then writes to index `bin` whenever `bin <= number_bins_` —
//! one past the last valid index — which in C++ is an out-of-bounds write.
//! This implementation allocates `number_bins + 1` slots instead, so that
//! overflow bin is a real, safely addressable slot rather than a memory
//! corruption bug reproduced on purpose.

use crate::frame::{DatasetTag, Frame, FrameMetadata, FramePayload};
use crate::geometry::SensorLayout;
use crate::pipeline::{is_pass_through, Stage, StageConfig};

pub struct HistogramStage {
    layout: SensorLayout,
    max_frames_received: u32,
    bin_start: i64,
    bin_end: i64,
    bin_width: f64,
    number_bins: usize,
    pass_processed: bool,

    frames_processed: u32,
    histograms_written: u32,

    pixel_spectra: Vec<f32>,
    summed_spectra: Vec<u64>,
}

fn compute_number_bins(bin_start: i64, bin_end: i64, bin_width: f64) -> usize {
    (((bin_end - bin_start) as f64 / bin_width) + 0.5) as usize
}

impl HistogramStage {
    pub fn new(layout: SensorLayout) -> Self {
        let bin_start = 0;
        let bin_end = 8000;
        let bin_width = 10.0;
        let number_bins = compute_number_bins(bin_start, bin_end, bin_width);

        HistogramStage {
            layout,
            max_frames_received: 0,
            bin_start,
            bin_end,
            bin_width,
            number_bins,
            pass_processed: true,
            frames_processed: 0,
            histograms_written: 0,
            pixel_spectra: vec![0.0; layout.image_pixels() * (number_bins + 1)],
            summed_spectra: vec![0u64; number_bins + 1],
        }
    }

    fn reinitialise(&mut self) {
        self.number_bins = compute_number_bins(self.bin_start, self.bin_end, self.bin_width);
        self.pixel_spectra = vec![0.0; self.layout.image_pixels() * (self.number_bins + 1)];
        self.summed_spectra = vec![0u64; self.number_bins + 1];
    }

    fn add_frame_data(&mut self, pixels: &[f32]) {
        for (pixel, &energy) in pixels.iter().enumerate() {
            if energy <= 0.0 {
                continue;
            }
            let bin = (energy as f64 / self.bin_width) as usize;
            if bin <= self.number_bins {
                self.pixel_spectra[pixel * (self.number_bins + 1) + bin] += 1.0;
                self.summed_spectra[bin] += 1;
            }
        }
    }

    fn spectra_bin_edges(&self) -> Vec<f32> {
        (0..self.number_bins)
            .map(|i| self.bin_start as f32 + i as f32 * self.bin_width as f32)
            .collect()
    }

    fn flush_frames(&mut self) -> Vec<Frame> {
        let bins_frame = Frame {
            metadata: FrameMetadata {
                frame_number: self.frames_processed,
                layout: self.layout,
                dataset: DatasetTag::SpectraBins,
                element_type: crate::frame::ElementType::F32,
            },
            payload: FramePayload::F32(self.spectra_bin_edges()),
        };
        let summed_frame = Frame {
            metadata: FrameMetadata {
                frame_number: self.frames_processed,
                layout: self.layout,
                dataset: DatasetTag::SummedSpectra,
                element_type: crate::frame::ElementType::U64,
            },
            payload: FramePayload::U64(self.summed_spectra.clone()),
        };
        let pixel_frame = Frame {
            metadata: FrameMetadata {
                frame_number: self.frames_processed,
                layout: self.layout,
                dataset: DatasetTag::PixelSpectra,
                element_type: crate::frame::ElementType::F32,
            },
            payload: FramePayload::F32(self.pixel_spectra.clone()),
        };
        vec![bins_frame, summed_frame, pixel_frame]
    }
}

impl Stage for HistogramStage {
    fn name(&self) -> &'static str {
        "histogram"
    }

    fn configure(&mut self, config: &StageConfig) -> Vec<Frame> {
        if let Some(v) = config.get_i64("max_frames_received") {
            self.max_frames_received = v as u32;
        }
        if let Some(v) = config.get_i64("bin_start") {
            self.bin_start = v;
        }
        if let Some(v) = config.get_i64("bin_end") {
            self.bin_end = v;
        }
        if let Some(v) = config.get_f64("bin_width") {
            self.bin_width = v;
        }
        if config.get_i64("reset_histograms") == Some(1) {
            self.frames_processed = 0;
        }

        // Flush must read the accumulated spectra before `reinitialise()`
        // below clears them.
        let flushed = if config.get_i64("flush_histograms") == Some(1) {
            let frames = self.flush_frames();
            self.histograms_written = self.frames_processed;
            self.frames_processed = 0;
            frames
        } else {
            Vec::new()
        };

        if let Some(v) = config.get_bool("pass_processed") {
            self.pass_processed = v;
        }
        self.reinitialise();
        flushed
    }

    fn request_configuration(&self) -> StageConfig {
        let mut config = StageConfig::new();
        config
            .set("max_frames_received", self.max_frames_received)
            .set("bin_start", self.bin_start)
            .set("bin_end", self.bin_end)
            .set("bin_width", self.bin_width)
            .set("frames_processed", self.frames_processed)
            .set("histograms_written", self.histograms_written)
            .set("pass_processed", self.pass_processed);
        config
    }

    fn status(&self) -> StageConfig {
        self.request_configuration()
    }

    fn reset_statistics(&mut self) {
        self.frames_processed = 0;
        self.histograms_written = 0;
    }

    fn process_frame(&mut self, frame: Frame) -> Vec<Frame> {
        if is_pass_through(frame.metadata.dataset) {
            return vec![frame];
        }

        self.add_frame_data(frame.payload.as_f32());

        let mut out = Vec::new();

        if self.max_frames_received > 0 && (self.frames_processed + 1) % self.max_frames_received == 0 {
            out.extend(self.flush_frames());
            self.histograms_written = self.frames_processed;
        }

        if self.pass_processed {
            out.push(frame);
        }

        self.frames_processed += 1;

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FramePayload;

    fn frame_with_pixel(layout: SensorLayout, row: usize, col: usize, value: f32) -> Frame {
        let mut pixels = vec![0.0f32; layout.image_pixels()];
        pixels[row * layout.image_width() + col] = value;
        Frame::new(0, layout, DatasetTag::ProcessedFrames, FramePayload::F32(pixels))
    }

    #[test]
    fn accumulates_into_correct_bin() {
        let layout = SensorLayout::parse("1x1").unwrap();
        let mut stage = HistogramStage::new(layout);
        // bin_width defaults to 10; value 15 -> bin 1, value 25 -> bin 2.
        let mut pixels = vec![0.0f32; layout.image_pixels()];
        pixels[0] = 15.0;
        pixels[1] = 25.0;
        let frame = Frame::new(0, layout, DatasetTag::ProcessedFrames, FramePayload::F32(pixels));

        stage.process_frame(frame);

        let bins = stage.number_bins;
        assert_eq!(stage.pixel_spectra[0 * (bins + 1) + 1], 1.0);
        assert_eq!(stage.pixel_spectra[1 * (bins + 1) + 2], 1.0);
        assert_eq!(stage.summed_spectra[1], 1);
        assert_eq!(stage.summed_spectra[2], 1);
    }

    #[test]
    fn flushes_on_configured_interval() {
        let layout = SensorLayout::parse("1x1").unwrap();
        let mut stage = HistogramStage::new(layout);
        let mut config = StageConfig::new();
        config.set("max_frames_received", 2);
        stage.configure(&config);

        let out = stage.process_frame(frame_with_pixel(layout, 0, 0, 5.0));
        assert_eq!(out.len(), 1); // no flush yet, just the passthrough frame

        let out = stage.process_frame(frame_with_pixel(layout, 0, 0, 5.0));
        // frames_processed+1 == 2 -> flush triggers 3 extra frames
        assert_eq!(out.len(), 4);
        let tags: Vec<_> = out.iter().map(|f| f.metadata.dataset).collect();
        assert!(tags.contains(&DatasetTag::SpectraBins));
        assert!(tags.contains(&DatasetTag::SummedSpectra));
        assert!(tags.contains(&DatasetTag::PixelSpectra));
    }

    #[test]
    fn flush_histograms_config_emits_spectra_and_resets_count() {
        let layout = SensorLayout::parse("1x1").unwrap();
        let mut stage = HistogramStage::new(layout);

        stage.process_frame(frame_with_pixel(layout, 0, 0, 15.0));
        stage.process_frame(frame_with_pixel(layout, 0, 0, 15.0));
        assert_eq!(stage.frames_processed, 2);

        let mut config = StageConfig::new();
        config.set("flush_histograms", 1);
        let flushed = stage.configure(&config);

        assert_eq!(flushed.len(), 3);
        let tags: Vec<_> = flushed.iter().map(|f| f.metadata.dataset).collect();
        assert!(tags.contains(&DatasetTag::SpectraBins));
        assert!(tags.contains(&DatasetTag::SummedSpectra));
        assert!(tags.contains(&DatasetTag::PixelSpectra));
        let summed = match &flushed.iter().find(|f| f.metadata.dataset == DatasetTag::SummedSpectra).unwrap().payload
        {
            FramePayload::U64(v) => v.clone(),
            _ => panic!("expected u64 payload"),
        };
        assert_eq!(summed[1], 2); // two frames each contributed one count to bin 1

        assert_eq!(stage.frames_processed, 0);
        assert_eq!(stage.histograms_written, 2);
        // The accumulated spectra themselves are cleared by reinitialise().
        assert!(stage.summed_spectra.iter().all(|&v| v == 0));
    }

    #[test]
    fn raw_frames_pass_through_without_accumulating() {
        let layout = SensorLayout::parse("1x1").unwrap();
        let mut stage = HistogramStage::new(layout);
        let mut pixels = vec![0.0f32; layout.image_pixels()];
        pixels[0] = 500.0;
        let frame = Frame::new(0, layout, DatasetTag::RawFrames, FramePayload::F32(pixels));
        stage.process_frame(frame);
        assert!(stage.summed_spectra.iter().all(|&v| v == 0));
    }
}
