//! Frame buffers and the bounded frame buffer pool.
//!
//! Grounded on `MercuryFrameDecoder`'s `frame_buffer_map_` /
//! `empty_buffer_queue_` / `dropped_frame_buffer_` /
//! `ignored_packet_buffer_`, reimplemented as owned byte regions with
//! typed views rather than raw pointer arithmetic over a shared arena.
//! The free list follows the same acquire/release free-list shape as a
//! plain `Vec<Box<[u8]>>` pool: pop on acquire, push back on release.

use std::collections::VecDeque;
use std::time::Instant;

use crate::geometry::SensorLayout;
use crate::protocol::FrameReceiveState;

/// Per-FEM packet arrival bookkeeping for one frame.
#[derive(Debug, Clone)]
pub struct FemReceiveState {
    pub packets_received: u32,
    /// Incremented on both SOF and EOF packets, preserving the original
    /// decoder's quirk. The separate `eof_count` field below is therefore
    /// never incremented at the FEM level; the frame-level totals in
    /// [`FrameHeader`] are tracked correctly.
    pub sof_count: u8,
    pub eof_count: u8,
    pub packet_state: Vec<bool>,
}

impl FemReceiveState {
    fn new(max_packets: usize) -> Self {
        FemReceiveState {
            packets_received: 0,
            sof_count: 0,
            eof_count: 0,
            packet_state: vec![false; max_packets],
        }
    }

    fn reset(&mut self) {
        self.packets_received = 0;
        self.sof_count = 0;
        self.eof_count = 0;
        self.packet_state.iter_mut().for_each(|b| *b = false);
    }
}

/// Metadata tracked for one in-flight or completed frame.
#[derive(Debug, Clone)]
pub struct FrameHeader {
    pub frame_number: u32,
    pub state: FrameReceiveState,
    pub start_time: Instant,
    pub total_packets_received: u32,
    pub total_sof_count: u32,
    pub total_eof_count: u32,
    pub active_fem_idx: i32,
    pub fem_rx_state: FemReceiveState,
}

impl FrameHeader {
    fn new(max_packets: usize) -> Self {
        FrameHeader {
            frame_number: 0,
            state: FrameReceiveState::Incomplete,
            start_time: Instant::now(),
            total_packets_received: 0,
            total_sof_count: 0,
            total_eof_count: 0,
            active_fem_idx: crate::geometry::ILLEGAL_FEM_IDX,
            fem_rx_state: FemReceiveState::new(max_packets),
        }
    }

    fn reinitialise(&mut self, frame_number: u32, active_fem_idx: i32) {
        self.frame_number = frame_number;
        self.state = FrameReceiveState::Incomplete;
        self.start_time = Instant::now();
        self.total_packets_received = 0;
        self.total_sof_count = 0;
        self.total_eof_count = 0;
        self.active_fem_idx = active_fem_idx;
        self.fem_rx_state.reset();
    }
}

/// An owned frame buffer: header plus raw payload region, large enough to
/// hold one frame's worth of packet payloads for the configured sensor
/// layout.
#[derive(Debug)]
pub struct FrameBuffer {
    pub id: usize,
    pub header: FrameHeader,
    pub payload: Box<[u8]>,
}

impl FrameBuffer {
    fn new(id: usize, layout: SensorLayout) -> Self {
        FrameBuffer {
            id,
            header: FrameHeader::new(layout.expected_packet_count()),
            payload: vec![0u8; layout.frame_payload_size()].into_boxed_slice(),
        }
    }
}

/// A bounded pool of frame buffers. Buffers transition
/// empty -> assigned-to-frame -> ready -> empty.
/// Acquisition is non-blocking: an empty pool routes the caller to the
/// dropped-frame sink instead of blocking the receive loop.
pub struct FrameBufferPool {
    free: VecDeque<FrameBuffer>,
    capacity: usize,
}

impl FrameBufferPool {
    pub fn new(capacity: usize, layout: SensorLayout) -> Self {
        let free = (0..capacity).map(|id| FrameBuffer::new(id, layout)).collect();
        FrameBufferPool { free, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn num_empty(&self) -> usize {
        self.free.len()
    }

    /// Take a buffer from the empty pool and initialise its header for a
    /// new frame. Returns `None` if the pool is exhausted.
    pub fn acquire(&mut self, frame_number: u32, active_fem_idx: i32) -> Option<FrameBuffer> {
        let mut buffer = self.free.pop_front()?;
        buffer.header.reinitialise(frame_number, active_fem_idx);
        Some(buffer)
    }

    /// Return a buffer to the empty pool after the pipeline has finished
    /// with it.
    pub fn release(&mut self, buffer: FrameBuffer) {
        self.free.push_back(buffer);
    }
}
