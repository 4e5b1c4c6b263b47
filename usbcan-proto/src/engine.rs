use bytes::BytesMut;
use log::{debug, info, trace};

use crate::config::{ProtocolConfig, ProtocolStatus};
use crate::decode::{decode, Packet, MAX_LENGTH};
use crate::encode::{encode_can_frame, encode_error, encode_status};
use crate::error::ProtocolError;
use crate::frame::CanFrame;

pub const RX_BUFFER_SIZE: usize = 128;

/// Everything the engine needs from the outside world.
///
/// All calls happen synchronously from inside `Engine` methods and must not
/// block.
pub trait Gateway {
    /// A frame the host wants on the bus.
    fn transmit_can(&mut self, frame: &CanFrame);
    fn apply_configuration(&mut self, config: &ProtocolConfig);
    fn query_status(&mut self) -> ProtocolStatus;
    /// Bytes for the host.
    fn write_bytes(&mut self, data: &[u8]);
    /// Fills `buf` with whatever host bytes are available, returning the count.
    fn read_bytes(&mut self, buf: &mut [u8]) -> usize;
}

/// Host link protocol engine.
///
/// Holds the reassembly buffer for host bytes and the last configuration the
/// host applied.
pub struct Engine<G> {
    gateway: G,
    rx: [u8; RX_BUFFER_SIZE],
    rx_len: usize,
    active_config: Option<ProtocolConfig>,
}

impl<G: Gateway> Engine<G> {
    pub fn new(gateway: G) -> Engine<G> {
        Engine {
            gateway,
            rx: [0u8; RX_BUFFER_SIZE],
            rx_len: 0,
            active_config: None,
        }
    }

    /// One pass: pull in host bytes, handle every complete packet, keep the rest.
    pub fn run(&mut self) {
        let received = self.gateway.read_bytes(&mut self.rx[self.rx_len..]);
        self.rx_len += received;

        let mut tail = 0;
        while tail < self.rx_len {
            let decoded = decode(&self.rx[tail..self.rx_len]);
            if decoded.consumed == 0 {
                break;
            }
            if let Some(packet) = decoded.packet {
                self.handle(packet, tail, decoded.consumed);
            }
            tail += decoded.consumed;
        }

        let remaining = self.rx_len - tail;
        if remaining > 0 && tail > 0 {
            self.rx.copy_within(tail..self.rx_len, 0);
        }
        self.rx_len = remaining;

        if self.rx_len == RX_BUFFER_SIZE {
            trace!("Receive buffer full without a decodable packet");
        }
    }

    /// Forwards a frame received from the bus to the host.
    pub fn on_can_received(&mut self, frame: &CanFrame) {
        let mut out = BytesMut::with_capacity(MAX_LENGTH);
        encode_can_frame(frame, &mut out);
        self.gateway.write_bytes(&out);
    }

    /// Notifies the host of an error, if it asked for error reports.
    pub fn on_bus_error(&mut self, error: ProtocolError) {
        if !self.error_reporting() {
            trace!("Not reporting {}", error);
            return;
        }
        let mut out = BytesMut::with_capacity(MAX_LENGTH);
        encode_error(error, &mut out);
        self.gateway.write_bytes(&out);
    }

    pub fn active_config(&self) -> Option<&ProtocolConfig> {
        self.active_config.as_ref()
    }

    pub fn error_reporting(&self) -> bool {
        self.active_config
            .map(|config| config.error_reporting)
            .unwrap_or(false)
    }

    /// Bytes received from the host but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.rx_len
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    pub fn into_inner(self) -> G {
        self.gateway
    }

    fn handle(&mut self, packet: Packet, offset: usize, len: usize) {
        match packet {
            Packet::Transmit(frame) => {
                trace!("Host frame {}", frame);
                self.gateway.transmit_can(&frame);
            }
            Packet::Configure(config) => {
                info!(
                    "Configuring {} bit/s, filter {:08x}/{:08x}, terminator {}, silent {}, error reports {}",
                    config.bitrate,
                    config.filter_id,
                    config.filter_mask,
                    config.terminator,
                    config.silent,
                    config.error_reporting
                );
                self.gateway.apply_configuration(&config);
                self.active_config = Some(config);
                if self.rx[offset + 1] == crate::decode::LEGACY {
                    // Legacy configuration is acknowledged by echoing it.
                    self.gateway.write_bytes(&self.rx[offset..offset + len]);
                }
            }
            Packet::StatusRequest => {
                let status = self.gateway.query_status();
                debug!("Status request: {:?}", status);
                let mut out = BytesMut::with_capacity(MAX_LENGTH);
                encode_status(&status, &mut out);
                self.gateway.write_bytes(&out);
            }
        }
    }
}
