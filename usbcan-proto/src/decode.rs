//! Host → gateway packet decoder.
//!
//! Packet layouts (multi-byte fields little-endian):
//!
//! ```text
//! legacy config   AA 55 12 rate -- id[4] mask[4] 00.. sum      20 bytes
//! status request  AA 55 04 00.. sum                            20 bytes
//! compact config  AA 13 flags rate[4] id[4] mask[4] 55         16 bytes
//! CAN frame       AA (C0|ext|len) id[2|4] data[len] 55       5..15 bytes
//! ```
//!
//! `decode` never fails. It reports how many bytes the caller may discard and,
//! if those bytes held an intact packet, the packet itself.

use log::{debug, trace};

use crate::config::{bitrate_from_code, ProtocolConfig};
use crate::frame::{CanFrame, CanId};

pub const START: u8 = 0xAA;
pub const STOP: u8 = 0x55;

pub const LEGACY: u8 = 0x55;
pub const LEGACY_CONFIG: u8 = 0x12;
pub const LEGACY_STATUS: u8 = 0x04;
pub const LEGACY_LENGTH: usize = 20;
/// First byte covered by the legacy checksum.
pub const CHECKSUM_START: usize = 2;
/// Offset of the checksum, which covers `CHECKSUM_START..CHECKSUM_OFFSET`.
pub const CHECKSUM_OFFSET: usize = LEGACY_LENGTH - 1;

pub const COMPACT_CONFIG: u8 = 0x13;
pub const COMPACT_LENGTH: usize = 16;
pub const FLAG_TERMINATOR: u8 = 1 << 0;
pub const FLAG_SILENT: u8 = 1 << 1;
pub const FLAG_ERROR_REPORTING: u8 = 1 << 2;

pub const ERROR_NOTIFY: u8 = 0x15;
pub const ERROR_LENGTH: usize = 4;

pub const CAN_MARKER: u8 = 0xC0;
pub const CAN_EXT: u8 = 1 << 5;
pub const CAN_LEN_MASK: u8 = 0x0F;

/// No packet is shorter than this, so fewer bytes are never decoded.
pub const MIN_LENGTH: usize = 5;
pub const MAX_LENGTH: usize = LEGACY_LENGTH;

/// Header bytes dropped when a header makes no sense.
const HEADER_LENGTH: usize = 2;

// legacy config
const LEGACY_BITRATE: usize = 3;
const LEGACY_FILTER_ID: usize = 5;
const LEGACY_FILTER_MASK: usize = 9;

// compact config
const COMPACT_FLAGS: usize = 2;
const COMPACT_BITRATE: usize = 3;
const COMPACT_FILTER_ID: usize = 7;
const COMPACT_FILTER_MASK: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet {
    Configure(ProtocolConfig),
    StatusRequest,
    Transmit(CanFrame),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    /// Bytes to drop from the front of the buffer. Zero means "wait for more".
    pub consumed: usize,
    pub packet: Option<Packet>,
}

impl Decoded {
    fn need_more() -> Decoded {
        Decoded::skip(0)
    }

    fn skip(consumed: usize) -> Decoded {
        Decoded {
            consumed,
            packet: None,
        }
    }

    fn packet(consumed: usize, packet: Packet) -> Decoded {
        Decoded {
            consumed,
            packet: Some(packet),
        }
    }
}

/// Unsigned sum of `data`, truncated to eight bits.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |total, byte| total.wrapping_add(*byte))
}

pub(crate) fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Bytes before the next start marker, or all of them.
pub(crate) fn resync(data: &[u8]) -> usize {
    data.iter().position(|b| *b == START).unwrap_or(data.len())
}

/// Whether a complete legacy packet carries a matching checksum.
pub(crate) fn legacy_checksum_ok(data: &[u8]) -> bool {
    data[CHECKSUM_OFFSET] == checksum(&data[CHECKSUM_START..CHECKSUM_OFFSET])
}

pub fn decode(data: &[u8]) -> Decoded {
    if data.len() < MIN_LENGTH {
        return Decoded::need_more();
    }

    if data[0] != START {
        let skipped = resync(data);
        trace!("Skipping {} bytes without start marker", skipped);
        return Decoded::skip(skipped);
    }

    match data[1] {
        LEGACY => decode_legacy(data),
        COMPACT_CONFIG => decode_compact_config(data),
        header if header & CAN_MARKER == CAN_MARKER => match decode_can_frame(data) {
            FrameDecode::Frame(consumed, frame) => Decoded::packet(consumed, Packet::Transmit(frame)),
            FrameDecode::Corrupt(consumed) => Decoded::skip(consumed),
            FrameDecode::NeedMore => Decoded::need_more(),
        },
        header => {
            trace!("Discarding unknown header {:02x}", header);
            Decoded::skip(HEADER_LENGTH)
        }
    }
}

fn decode_legacy(data: &[u8]) -> Decoded {
    let command = data[2];
    if command != LEGACY_CONFIG && command != LEGACY_STATUS {
        debug!("Ignoring unknown legacy command {:02x}", command);
        return Decoded::skip(HEADER_LENGTH);
    }

    if data.len() < LEGACY_LENGTH {
        return Decoded::need_more();
    }

    if !legacy_checksum_ok(data) {
        debug!("Dropping legacy packet {:02x} with bad checksum", command);
        return Decoded::skip(LEGACY_LENGTH);
    }

    if command == LEGACY_STATUS {
        return Decoded::packet(LEGACY_LENGTH, Packet::StatusRequest);
    }

    let config = ProtocolConfig {
        bitrate: bitrate_from_code(data[LEGACY_BITRATE]),
        filter_id: read_u32(data, LEGACY_FILTER_ID),
        filter_mask: read_u32(data, LEGACY_FILTER_MASK),
        terminator: true,
        silent: false,
        error_reporting: false,
    };
    Decoded::packet(LEGACY_LENGTH, Packet::Configure(config))
}

fn decode_compact_config(data: &[u8]) -> Decoded {
    if data.len() < COMPACT_LENGTH {
        return Decoded::need_more();
    }

    if data[COMPACT_LENGTH - 1] != STOP {
        debug!("Dropping compact config without stop byte");
        return Decoded::skip(COMPACT_LENGTH);
    }

    let flags = data[COMPACT_FLAGS];
    let config = ProtocolConfig {
        bitrate: read_u32(data, COMPACT_BITRATE),
        filter_id: read_u32(data, COMPACT_FILTER_ID),
        filter_mask: read_u32(data, COMPACT_FILTER_MASK),
        terminator: flags & FLAG_TERMINATOR != 0,
        silent: flags & FLAG_SILENT != 0,
        error_reporting: flags & FLAG_ERROR_REPORTING != 0,
    };
    Decoded::packet(COMPACT_LENGTH, Packet::Configure(config))
}

pub(crate) enum FrameDecode {
    Frame(usize, CanFrame),
    Corrupt(usize),
    NeedMore,
}

/// Shared by both directions: a CAN frame packet looks the same either way.
/// `data[0]` is the start marker and `data[1]` a CAN header.
pub(crate) fn decode_can_frame(data: &[u8]) -> FrameDecode {
    let header = data[1];
    let extended = header & CAN_EXT != 0;
    let len = (header & CAN_LEN_MASK) as usize;

    if len > crate::frame::MAX_PAYLOAD_LENGTH {
        trace!("Discarding CAN header with length {}", len);
        return FrameDecode::Corrupt(HEADER_LENGTH);
    }

    let id_length = if extended { 4 } else { 2 };
    let packet_size = 3 + id_length + len;

    if data.len() < packet_size {
        return FrameDecode::NeedMore;
    }

    if data[packet_size - 1] != STOP {
        debug!("Dropping CAN frame without stop byte");
        return FrameDecode::Corrupt(packet_size);
    }

    let id = if extended {
        CanId::Extended(read_u32(data, 2))
    } else {
        CanId::Standard(read_u16(data, 2))
    };
    let payload_start = 2 + id_length;

    match CanFrame::new(id, &data[payload_start..payload_start + len]) {
        Some(frame) => FrameDecode::Frame(packet_size, frame),
        None => FrameDecode::Corrupt(packet_size),
    }
}
