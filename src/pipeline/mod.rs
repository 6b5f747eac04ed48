//! The per-frame processing pipeline: a chain of [`Stage`]s threaded by
//! [`Pipeline`], fed by the buffer-to-frame [`reorder::ReorderStage`]
//! adapter.
//!
//! The original odin-data plugin chain is a graph of `FrameProcessorPlugin`
//! subclasses wired together at runtime, each holding a shared_ptr to its
//! successor and calling `push()` to forward a frame. That's flattened
//! here, composition over inheritance, into a single ordered
//! `Vec<Box<dyn Stage>>` that [`Pipeline::process`] drives
//! directly, with dataset-tag routing (`raw_frames` passed through
//! unmodified, `processed_frames`/`data` transformed) handled uniformly by
//! each stage rather than repeated per-plugin dispatch.

mod calibration;
mod charged_sharing;
mod histogram;
mod next_frame;
mod reorder;
mod threshold;

pub use calibration::CalibrationStage;
pub use charged_sharing::{AdditionStage, DiscriminationStage};
pub use histogram::HistogramStage;
pub use next_frame::NextFrameStage;
pub use reorder::ReorderStage;
pub use threshold::ThresholdStage;

use std::collections::HashMap;
use std::sync::mpsc::Sender;

use crate::buffer::FrameBuffer;
use crate::frame::{DatasetTag, Frame};

/// A flat key/value configuration bag, the way the original's `IpcMessage`
/// carries `configure()`/`requestConfiguration()`/`status()` parameters.
/// Values are stored as strings and parsed on read; a stage that receives
/// a malformed value for a key it understands logs and keeps its current
/// setting rather than raising, matching the plugins' own tolerant
/// `configure()` methods.
#[derive(Debug, Clone, Default)]
pub struct StageConfig(HashMap<String, String>);

impl StageConfig {
    pub fn new() -> Self {
        StageConfig(HashMap::new())
    }

    pub fn set(&mut self, key: &str, value: impl ToString) -> &mut Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get_str(key)?.parse().ok()
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get_str(key)?.parse().ok()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_str(key)?.parse().ok()
    }
}

/// The capability set every processing stage implements: configure, report
/// its configuration and status back, reset its running statistics, and
/// process one frame. This is the composition seam used in place of the
/// original's plugin base-class inheritance chain.
pub trait Stage: Send {
    fn name(&self) -> &'static str;

    /// Apply a configuration update, returning any frames the stage wants
    /// emitted as a side effect (e.g. [`HistogramStage`] flushing its
    /// accumulated spectra on `flush_histograms=1`). Empty for every other
    /// stage.
    fn configure(&mut self, config: &StageConfig) -> Vec<Frame>;
    fn request_configuration(&self) -> StageConfig;
    fn status(&self) -> StageConfig;
    fn reset_statistics(&mut self);

    /// Process one frame, returning zero or more output frames. Zero when
    /// the frame decode failed and was dropped; more than one for stages
    /// like [`HistogramStage`] that periodically emit extra spectra frames
    /// alongside the frame they pass through.
    fn process_frame(&mut self, frame: Frame) -> Vec<Frame>;
}

/// True for datasets every stage forwards untouched rather than
/// transforming. `raw_frames` is the only such tag; unlike the original's
/// string comparison against `"raw_frames"` this is a closed enum match,
/// so there is no "unknown dataset" branch to fall through to.
fn is_pass_through(tag: DatasetTag) -> bool {
    matches!(tag, DatasetTag::RawFrames)
}

/// The ordered stage chain, fed by the Reorder buffer-to-frame adapter.
/// Owns the channel that returns emptied [`FrameBuffer`]s to the decoder's
/// pool once Reorder has copied their pixel data out.
pub struct Pipeline {
    reorder: ReorderStage,
    stages: Vec<Box<dyn Stage>>,
    release_tx: Sender<FrameBuffer>,
}

impl Pipeline {
    pub fn new(reorder: ReorderStage, stages: Vec<Box<dyn Stage>>, release_tx: Sender<FrameBuffer>) -> Self {
        Pipeline {
            reorder,
            stages,
            release_tx,
        }
    }

    /// Run one decoded frame buffer through the whole chain, returning
    /// every frame the chain ultimately produced (processed output,
    /// optional raw passthrough, and any histogram flush frames). The
    /// underlying buffer is sent back to the decoder's pool as soon as
    /// Reorder is done with it.
    pub fn process(&mut self, buffer: FrameBuffer) -> Vec<Frame> {
        let (mut current, buffer) = self.reorder.process(buffer);
        let _ = self.release_tx.send(buffer);

        for stage in self.stages.iter_mut() {
            let mut next = Vec::with_capacity(current.len());
            for frame in current {
                next.extend(stage.process_frame(frame));
            }
            current = next;
        }

        current
    }

    pub fn reset_statistics(&mut self) {
        self.reorder.reset_statistics();
        for stage in self.stages.iter_mut() {
            stage.reset_statistics();
        }
    }

    pub fn status(&self) -> Vec<(&'static str, StageConfig)> {
        let mut status: Vec<(&'static str, StageConfig)> = vec![("reorder", self.reorder.status())];
        status.extend(self.stages.iter().map(|s| (s.name(), s.status())));
        status
    }
}
