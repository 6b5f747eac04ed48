//! The 8-byte wire packet header.
//!
//! Grounded on `MercuryFrameDecoder::get_frame_counter` /
//! `get_packet_number` / `get_start_of_frame_marker` /
//! `get_end_of_frame_marker`, which extract these fields from the raw
//! packet header buffer: a `#[repr(C)]`, `bytemuck`-derived struct read
//! directly out of the UDP receive buffer.

use bytemuck::{Pod, Zeroable};

use crate::geometry::PACKET_HEADER_SIZE;

const PACKET_NUMBER_MASK: u32 = 0x3FFF_FFFF;
const START_OF_FRAME_MASK: u32 = 0x8000_0000;
const END_OF_FRAME_MASK: u32 = 0x4000_0000;

/// The 8-byte header carried at the start of every UDP packet.
#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable, Pod)]
pub struct PacketHeader {
    pub frame_counter: u32,
    pub flags_and_number: u32,
}

impl PacketHeader {
    /// Interpret a byte slice of exactly [`PACKET_HEADER_SIZE`] bytes as a
    /// packet header. The decoder only ever calls this with exactly that
    /// many bytes (`requires_header_peek`), so a mismatched length is an
    /// internal invariant violation, not malformed wire input.
    pub fn from_bytes(bytes: &[u8]) -> PacketHeader {
        assert_eq!(
            bytes.len(),
            PACKET_HEADER_SIZE,
            "packet header peek must supply exactly {PACKET_HEADER_SIZE} bytes"
        );
        *bytemuck::from_bytes(bytes)
    }

    pub fn packet_number(&self) -> u32 {
        self.flags_and_number & PACKET_NUMBER_MASK
    }

    pub fn start_of_frame(&self) -> bool {
        self.flags_and_number & START_OF_FRAME_MASK != 0
    }

    pub fn end_of_frame(&self) -> bool {
        self.flags_and_number & END_OF_FRAME_MASK != 0
    }
}

/// Result of processing one packet's payload, as returned by
/// [`crate::decoder::UdpFrameDecoder::process_packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameReceiveState {
    Incomplete,
    Complete,
    TimedOut,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(frame_counter: u32, flags_and_number: u32) -> PacketHeader {
        let mut bytes = [0u8; PACKET_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&frame_counter.to_ne_bytes());
        bytes[4..8].copy_from_slice(&flags_and_number.to_ne_bytes());
        PacketHeader::from_bytes(&bytes)
    }

    #[test]
    fn extracts_packet_number_and_markers() {
        let h = header(42, START_OF_FRAME_MASK | 0);
        assert_eq!(h.frame_counter, 42);
        assert_eq!(h.packet_number(), 0);
        assert!(h.start_of_frame());
        assert!(!h.end_of_frame());

        let h = header(42, END_OF_FRAME_MASK | 6);
        assert_eq!(h.packet_number(), 6);
        assert!(!h.start_of_frame());
        assert!(h.end_of_frame());
    }

    #[test]
    fn sof_and_eof_can_coincide_on_single_packet_frame() {
        let h = header(1, START_OF_FRAME_MASK | END_OF_FRAME_MASK | 0);
        assert!(h.start_of_frame());
        assert!(h.end_of_frame());
        assert_eq!(h.packet_number(), 0);
    }
}
