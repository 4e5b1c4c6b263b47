use bytes::{Buf, BytesMut};
use log::{debug, trace};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::{bitrate_from_code, ProtocolConfig, ProtocolStatus};
use crate::decode::*;
use crate::encode::{
    encode_can_frame, encode_compact_config, encode_legacy_config, encode_status_request,
};
use crate::error::ProtocolError;
use crate::frame::CanFrame;

/// What a gateway sends to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMessage {
    Frame(CanFrame),
    Status(ProtocolStatus),
    /// Echo of a legacy configuration packet.
    ConfigAck(ProtocolConfig),
    Error(ProtocolError),
}

/// What the host sends to a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMessage {
    Frame(CanFrame),
    Configure(ProtocolConfig),
    /// Configuration in the 20-byte dialect older gateways understand.
    ConfigureLegacy(ProtocolConfig),
    StatusRequest,
}

/// Host side of the link: decodes gateway packets, encodes host packets.
#[derive(Debug, Default)]
pub struct HostCodec;

enum Step {
    Skip(usize),
    Message(usize, DeviceMessage),
    NeedMore,
}

impl HostCodec {
    fn step(src: &[u8]) -> Step {
        if src[0] != START {
            return Step::Skip(resync(src).max(1));
        }
        if src.len() < 2 {
            return Step::NeedMore;
        }

        match src[1] {
            ERROR_NOTIFY => {
                if src.len() < ERROR_LENGTH {
                    return Step::NeedMore;
                }
                if src[ERROR_LENGTH - 1] != STOP {
                    debug!("Dropping error notification without stop byte");
                    return Step::Skip(ERROR_LENGTH);
                }
                Step::Message(ERROR_LENGTH, DeviceMessage::Error(ProtocolError::from(src[2])))
            }
            LEGACY => {
                if src.len() < 3 {
                    return Step::NeedMore;
                }
                if src[2] != LEGACY_STATUS && src[2] != LEGACY_CONFIG {
                    debug!("Ignoring legacy packet {:02x}", src[2]);
                    return Step::Skip(2);
                }
                if src.len() < LEGACY_LENGTH {
                    return Step::NeedMore;
                }
                if !legacy_checksum_ok(src) {
                    debug!("Dropping legacy packet with bad checksum");
                    return Step::Skip(LEGACY_LENGTH);
                }
                match src[2] {
                    LEGACY_STATUS => Step::Message(
                        LEGACY_LENGTH,
                        DeviceMessage::Status(ProtocolStatus {
                            rx_errors: src[3],
                            tx_errors: src[4],
                        }),
                    ),
                    LEGACY_CONFIG => Step::Message(
                        LEGACY_LENGTH,
                        DeviceMessage::ConfigAck(ProtocolConfig {
                            bitrate: bitrate_from_code(src[3]),
                            filter_id: read_u32(src, 5),
                            filter_mask: read_u32(src, 9),
                            terminator: true,
                            silent: false,
                            error_reporting: false,
                        }),
                    ),
                    _ => Step::Skip(LEGACY_LENGTH),
                }
            }
            header if header & CAN_MARKER == CAN_MARKER => {
                if src.len() < MIN_LENGTH {
                    return Step::NeedMore;
                }
                match decode_can_frame(src) {
                    FrameDecode::Frame(len, frame) => Step::Message(len, DeviceMessage::Frame(frame)),
                    FrameDecode::Corrupt(len) => Step::Skip(len),
                    FrameDecode::NeedMore => Step::NeedMore,
                }
            }
            header => {
                trace!("Discarding unknown header {:02x}", header);
                Step::Skip(2)
            }
        }
    }
}

impl Decoder for HostCodec {
    type Item = DeviceMessage;
    type Error = crate::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while !src.is_empty() {
            match HostCodec::step(&src[..]) {
                Step::Skip(len) => src.advance(len),
                Step::Message(len, message) => {
                    src.advance(len);
                    return Ok(Some(message));
                }
                Step::NeedMore => {
                    src.reserve(MAX_LENGTH);
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }
}

impl Encoder<HostMessage> for HostCodec {
    type Error = crate::Error;

    fn encode(&mut self, item: HostMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(MAX_LENGTH);

        match item {
            HostMessage::Frame(frame) => encode_can_frame(&frame, dst),
            HostMessage::Configure(config) => encode_compact_config(&config, dst),
            HostMessage::ConfigureLegacy(config) => encode_legacy_config(&config, dst),
            HostMessage::StatusRequest => encode_status_request(dst),
        }

        Ok(())
    }
}
