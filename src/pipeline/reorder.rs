//! The buffer-to-frame adapter that opens every pipeline run.
//!
//! Grounded on `MercuryReorderPlugin::process_frame`: widen u16 to f32,
//! count and log any packets lost for the frame, apply the firmware
//! frame-number workaround (an internal counter replaces the hardware's
//! own, which repeats), and emit a `processed_frames` frame plus an
//! optional `raw_frames` copy.

use crate::buffer::FrameBuffer;
use crate::frame::{DatasetTag, Frame, FramePayload};
use crate::geometry::SensorLayout;
use crate::pipeline::StageConfig;

pub struct ReorderStage {
    layout: SensorLayout,
    packets_lost: u32,
    /// Replaces the hardware frame counter on every frame passed through,
    /// incrementing by one each call. Works around firmware that repeats
    /// frame numbers; configurable so a run can be
    /// resumed at a particular count.
    frame_number: u32,
    write_raw_data: bool,
}

impl ReorderStage {
    pub fn new(layout: SensorLayout, write_raw_data: bool) -> Self {
        ReorderStage {
            layout,
            packets_lost: 0,
            frame_number: 0,
            write_raw_data,
        }
    }

    /// Widen the buffer's payload into one or two [`Frame`]s. Returns the
    /// now-emptied `FrameBuffer` alongside them so the caller can recycle
    /// it back to the decoder's pool: the decoder must not reuse a buffer
    /// until the pipeline is done with it, but once this method has copied
    /// the pixel data out, it is done.
    pub fn process(&mut self, buffer: FrameBuffer) -> (Vec<Frame>, FrameBuffer) {
        let expected = buffer.header.fem_rx_state.packet_state.len() as u32;
        if buffer.header.total_packets_received < expected {
            let lost = expected - buffer.header.total_packets_received;
            log::error!(
                "Frame number {} has dropped {} packet(s)",
                buffer.header.frame_number,
                lost
            );
            self.packets_lost += lost;
            log::error!("Total packets lost since startup {}", self.packets_lost);
        }

        let layout = self.layout;

        let pixels: Vec<f32> = buffer
            .payload
            .chunks_exact(2)
            .map(|b| u16::from_ne_bytes([b[0], b[1]]) as f32)
            .collect();

        let frame_number = self.frame_number;
        self.frame_number += 1;

        let mut out = Vec::with_capacity(2);
        out.push(Frame::new(
            frame_number,
            layout,
            DatasetTag::ProcessedFrames,
            FramePayload::F32(pixels.clone()),
        ));

        if self.write_raw_data {
            out.push(Frame::new(
                frame_number,
                layout,
                DatasetTag::RawFrames,
                FramePayload::F32(pixels),
            ));
        }

        (out, buffer)
    }

    pub fn reset_statistics(&mut self) {
        self.packets_lost = 0;
    }

    pub fn status(&self) -> StageConfig {
        let mut config = StageConfig::new();
        config
            .set("packets_lost", self.packets_lost)
            .set("raw_data", self.write_raw_data)
            .set("frame_number", self.frame_number);
        config
    }

    pub fn configure(&mut self, config: &StageConfig) {
        if let Some(v) = config.get_i64("packets_lost") {
            self.packets_lost = v as u32;
        }
        if let Some(v) = config.get_bool("raw_data") {
            self.write_raw_data = v;
        }
        if let Some(v) = config.get_i64("frame_number") {
            log::debug!("*** RESET frame_number to be {v}");
            self.frame_number = v as u32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::FrameBufferPool;
    use crate::geometry::SensorLayout;

    #[test]
    fn widens_and_tags_frame() {
        let layout = SensorLayout::parse("1x1").unwrap();
        let mut pool = FrameBufferPool::new(1, layout);
        let mut buffer = pool.acquire(5, 0).unwrap();
        buffer.header.total_packets_received = layout.expected_packet_count() as u32;
        buffer.payload[0..2].copy_from_slice(&15u16.to_ne_bytes());
        buffer.payload[2..4].copy_from_slice(&25u16.to_ne_bytes());

        let mut stage = ReorderStage::new(layout, true);
        let (frames, returned) = stage.process(buffer);

        assert_eq!(frames.len(), 2);
        assert_eq!(returned.id, 0);
        assert_eq!(frames[0].metadata.dataset, DatasetTag::ProcessedFrames);
        assert_eq!(frames[1].metadata.dataset, DatasetTag::RawFrames);
        assert_eq!(frames[0].pixel(0, 0), 15.0);
        assert_eq!(frames[0].pixel(0, 1), 25.0);
        // Hardware frame number (5) is replaced by the internal counter (0).
        assert_eq!(frames[0].metadata.frame_number, 0);
    }

    #[test]
    fn frame_number_increments_and_resets() {
        let layout = SensorLayout::parse("1x1").unwrap();
        let mut pool = FrameBufferPool::new(2, layout);
        let mut stage = ReorderStage::new(layout, false);

        let b0 = pool.acquire(0, 0).unwrap();
        let (frames, _) = stage.process(b0);
        assert_eq!(frames[0].metadata.frame_number, 0);

        let b1 = pool.acquire(0, 0).unwrap();
        let (frames, _) = stage.process(b1);
        assert_eq!(frames[0].metadata.frame_number, 1);

        let mut config = StageConfig::new();
        config.set("frame_number", 100);
        stage.configure(&config);
        let b2 = pool.acquire(0, 0).unwrap();
        let (frames, _) = stage.process(b2);
        assert_eq!(frames[0].metadata.frame_number, 100);
    }

    #[test]
    fn missing_packets_are_counted_as_lost() {
        let layout = SensorLayout::parse("1x1").unwrap();
        let mut pool = FrameBufferPool::new(1, layout);
        let buffer = pool.acquire(1, 0).unwrap();
        // total_packets_received stays 0: whole frame missing.
        let mut stage = ReorderStage::new(layout, false);
        stage.process(buffer);
        assert_eq!(stage.status().get_i64("packets_lost"), Some(layout.expected_packet_count() as i64));
    }
}
