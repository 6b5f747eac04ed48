//! Compile-time geometry and wire-protocol constants, and the sensor layout
//! and FEM port-map parsers.
//!
//! Grounded on `common/include/MercuryDefinitions.h` and the
//! `parse_fem_port_map` / `parse_sensors_layout_map` methods of
//! `MercuryFrameDecoder.cpp` / `MercuryProcessorPlugin.cpp`.

use std::collections::HashMap;

use crate::error::MercuryError;

/// A Mercury sensor is 80x80 pixels.
pub const PIXELS_PER_SENSOR_SIDE: usize = 80;

/// Size in bytes of a primary UDP packet's payload.
pub const PRIMARY_PACKET_SIZE: usize = 8000;

/// Size in bytes of the 8-byte wire packet header (frame counter + flags/number).
pub const PACKET_HEADER_SIZE: usize = 8;

/// Number of individually-reported "packet ignored" log lines before the
/// decoder suppresses further reports for the remainder of the run.
pub const MAX_IGNORED_PACKET_REPORTS: u32 = 10;

/// Default FEM-to-port map, one active FEM on port 61651.
pub const DEFAULT_FEM_PORT_MAP: &str = "61651:0";

/// Default sensor layout, two rows by two columns of 80x80 sensors.
pub const DEFAULT_SENSORS_LAYOUT: &str = "2x2";

/// Sentinel FEM index for "not mapped" / "not yet assigned".
pub const ILLEGAL_FEM_IDX: i32 = -1;

/// A sensor layout parsed from an "RxC" string: R rows, C columns of 80x80
/// sensors. Only 1x1 and 2x2 are exercised in practice; the implementation
/// treats any positive RxC as a computed product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SensorLayout {
    pub rows: u32,
    pub columns: u32,
}

impl SensorLayout {
    pub fn parse(s: &str) -> Result<Self, MercuryError> {
        let (rows_str, cols_str) = s
            .split_once('x')
            .ok_or_else(|| MercuryError::InvalidSensorLayout(s.to_string()))?;
        let rows: u32 = rows_str
            .trim()
            .parse()
            .map_err(|_| MercuryError::InvalidSensorLayout(s.to_string()))?;
        let columns: u32 = cols_str
            .trim()
            .parse()
            .map_err(|_| MercuryError::InvalidSensorLayout(s.to_string()))?;
        if rows == 0 || columns == 0 {
            return Err(MercuryError::InvalidSensorLayout(s.to_string()));
        }
        Ok(SensorLayout { rows, columns })
    }

    pub fn image_height(&self) -> usize {
        self.rows as usize * PIXELS_PER_SENSOR_SIDE
    }

    pub fn image_width(&self) -> usize {
        self.columns as usize * PIXELS_PER_SENSOR_SIDE
    }

    pub fn image_pixels(&self) -> usize {
        self.image_height() * self.image_width()
    }

    /// Total payload size in bytes for one frame from one FEM: one u16 per pixel.
    pub fn frame_payload_size(&self) -> usize {
        self.image_pixels() * size_of::<u16>()
    }

    /// Number of fixed-size primary packets that make up one frame.
    pub fn num_primary_packets(&self) -> usize {
        self.frame_payload_size() / PRIMARY_PACKET_SIZE
    }

    /// Size in bytes of the single tail packet that completes one frame.
    pub fn tail_packet_size(&self) -> usize {
        self.frame_payload_size() - self.num_primary_packets() * PRIMARY_PACKET_SIZE
    }

    /// Total packets (primary + tail) expected to complete one frame from one FEM.
    pub fn expected_packet_count(&self) -> usize {
        self.num_primary_packets() + 1
    }

    /// Payload size in bytes to expect for the packet with this index.
    pub fn payload_size_for_packet(&self, packet_number: u32) -> usize {
        if (packet_number as usize) < self.num_primary_packets() {
            PRIMARY_PACKET_SIZE
        } else {
            self.tail_packet_size()
        }
    }
}

impl Default for SensorLayout {
    fn default() -> Self {
        Self::parse(DEFAULT_SENSORS_LAYOUT).expect("default sensor layout is well-formed")
    }
}

/// One entry of the FEM-to-port map: which port a FEM's packets arrive on,
/// and which buffer-region index (within a multi-FEM frame buffer) its
/// payload should land at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FemMapEntry {
    pub fem_idx: i32,
    pub buf_idx: u32,
}

/// Port -> FEM map, parsed from a `"port:idx,port:idx,..."` configuration
/// string. The decoder currently only supports one active FEM; additional
/// entries are parsed but truncated with a warning, matching
/// `parse_fem_port_map`'s own behavior.
pub fn parse_fem_port_map(spec: &str) -> Result<HashMap<u16, FemMapEntry>, MercuryError> {
    let mut map = HashMap::new();
    let mut buf_idx = 0u32;

    for entry in spec.split(',') {
        if buf_idx >= 1 {
            log::warn!(
                "Decoder FEM port map configuration contains too many elements, \
                 truncating to maximum number of FEMs allowed (1)"
            );
            break;
        }

        let mut parts = entry.splitn(2, ':');
        let (port_str, idx_str) = match (parts.next(), parts.next()) {
            (Some(p), Some(i)) => (p, i),
            _ => {
                return Err(MercuryError::InvalidFemPortMap {
                    source: spec.to_string(),
                    entry: entry.to_string(),
                });
            }
        };

        let port: u16 = port_str.trim().parse().map_err(|_| MercuryError::InvalidFemPortMap {
            source: spec.to_string(),
            entry: entry.to_string(),
        })?;
        let fem_idx: i32 = idx_str.trim().parse().map_err(|_| MercuryError::InvalidFemPortMap {
            source: spec.to_string(),
            entry: entry.to_string(),
        })?;

        map.insert(port, FemMapEntry { fem_idx, buf_idx });
        buf_idx += 1;
    }

    Ok(map)
}
