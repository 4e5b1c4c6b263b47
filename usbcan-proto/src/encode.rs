//! Packet encoders. Gateway → host packets first, then the host → gateway
//! packets used by host tooling.

use bytes::BufMut;

use crate::config::{bitrate_code, ProtocolConfig, ProtocolStatus};
use crate::decode::*;
use crate::error::ProtocolError;
use crate::frame::{CanFrame, CanId};

/// Encoded size of a CAN frame packet.
pub fn can_frame_length(frame: &CanFrame) -> usize {
    let id_length = if frame.is_extended() { 4 } else { 2 };
    3 + id_length + frame.len()
}

/// CAN frame packet:
/// +----+------------------+-----------+--------------+----+
/// | AA | C0 | ext | len   | id[2 / 4] | payload[len] | 55 |
/// +----+------------------+-----------+--------------+----+
pub fn encode_can_frame<B: BufMut>(frame: &CanFrame, dst: &mut B) {
    dst.put_u8(START);
    match frame.id() {
        CanId::Extended(id) => {
            dst.put_u8(CAN_MARKER | CAN_EXT | frame.len() as u8);
            dst.put_u32_le(id);
        }
        CanId::Standard(id) => {
            dst.put_u8(CAN_MARKER | frame.len() as u8);
            dst.put_u16_le(id);
        }
    }
    dst.put_slice(frame.data());
    dst.put_u8(STOP);
}

pub fn encode_status<B: BufMut>(status: &ProtocolStatus, dst: &mut B) {
    let mut packet = legacy_packet(LEGACY_STATUS);
    packet[3] = status.rx_errors;
    packet[4] = status.tx_errors;
    seal_legacy(&mut packet);
    dst.put_slice(&packet);
}

pub fn encode_error<B: BufMut>(error: ProtocolError, dst: &mut B) {
    dst.put_slice(&[START, ERROR_NOTIFY, error.code(), STOP]);
}

pub fn encode_status_request<B: BufMut>(dst: &mut B) {
    let mut packet = legacy_packet(LEGACY_STATUS);
    seal_legacy(&mut packet);
    dst.put_slice(&packet);
}

/// The legacy layout only carries a bitrate code and no flags. Rates missing
/// from the code table fall back to the slowest code.
pub fn encode_legacy_config<B: BufMut>(config: &ProtocolConfig, dst: &mut B) {
    let mut packet = legacy_packet(LEGACY_CONFIG);
    packet[3] = bitrate_code(config.bitrate).unwrap_or(0x0C);
    packet[5..9].copy_from_slice(&config.filter_id.to_le_bytes());
    packet[9..13].copy_from_slice(&config.filter_mask.to_le_bytes());
    seal_legacy(&mut packet);
    dst.put_slice(&packet);
}

pub fn encode_compact_config<B: BufMut>(config: &ProtocolConfig, dst: &mut B) {
    let mut flags = 0;
    if config.terminator {
        flags |= FLAG_TERMINATOR;
    }
    if config.silent {
        flags |= FLAG_SILENT;
    }
    if config.error_reporting {
        flags |= FLAG_ERROR_REPORTING;
    }

    dst.put_u8(START);
    dst.put_u8(COMPACT_CONFIG);
    dst.put_u8(flags);
    dst.put_u32_le(config.bitrate);
    dst.put_u32_le(config.filter_id);
    dst.put_u32_le(config.filter_mask);
    dst.put_u8(STOP);
}

fn legacy_packet(command: u8) -> [u8; LEGACY_LENGTH] {
    let mut packet = [0u8; LEGACY_LENGTH];
    packet[0] = START;
    packet[1] = LEGACY;
    packet[2] = command;
    packet
}

fn seal_legacy(packet: &mut [u8; LEGACY_LENGTH]) {
    packet[CHECKSUM_OFFSET] = checksum(&packet[CHECKSUM_START..CHECKSUM_OFFSET]);
}
