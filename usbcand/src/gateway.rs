use bytes::{Buf, BytesMut};
use log::{debug, info, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use usbcan_proto::{
    CanFrame, Engine, Gateway, ProtocolConfig, ProtocolError, ProtocolStatus, Queue,
};

use crate::backend::socketcan::{Bus, BusEvent};

pub const TX_QUEUE_SIZE: usize = 64;
const ERROR_QUEUE_SIZE: usize = 8;
const READ_CHUNK: usize = 64;

/// Gateway state of one host session.
#[derive(Default)]
pub struct Link {
    inbound: BytesMut,
    outbound: BytesMut,
    tx_queue: Queue<CanFrame, TX_QUEUE_SIZE>,
    errors: Queue<ProtocolError, ERROR_QUEUE_SIZE>,
    status: ProtocolStatus,
    pending_config: Option<ProtocolConfig>,
}

impl Link {
    pub fn new() -> Link {
        Link::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.inbound.extend_from_slice(data);
    }

    pub fn has_input(&self) -> bool {
        !self.inbound.is_empty()
    }

    /// Bytes waiting for the host, handed out once.
    pub fn take_output(&mut self) -> BytesMut {
        self.outbound.split()
    }

    pub fn next_frame(&mut self) -> Option<CanFrame> {
        self.tx_queue.pop()
    }

    pub fn queued_frames(&self) -> usize {
        self.tx_queue.len()
    }

    pub fn take_config(&mut self) -> Option<ProtocolConfig> {
        self.pending_config.take()
    }

    pub fn next_error(&mut self) -> Option<ProtocolError> {
        self.errors.pop()
    }

    /// Counts an error reported by the bus.
    pub fn count_bus_error(&mut self, error: ProtocolError) {
        if error == ProtocolError::TxFailure {
            self.status.count_tx_error();
        } else {
            self.status.count_rx_error();
        }
    }

    fn report(&mut self, error: ProtocolError) {
        if self.errors.push(error).is_err() {
            trace!("Error queue full, dropping {}", error);
        }
    }
}

impl Gateway for Link {
    fn transmit_can(&mut self, frame: &CanFrame) {
        if self.tx_queue.push(*frame).is_err() {
            debug!("Transmit queue full, dropping {}", frame);
            self.status.count_tx_error();
            self.report(ProtocolError::BufferFull);
        }
    }

    fn apply_configuration(&mut self, config: &ProtocolConfig) {
        self.pending_config = Some(*config);
    }

    fn query_status(&mut self) -> ProtocolStatus {
        self.status
    }

    fn write_bytes(&mut self, data: &[u8]) {
        self.outbound.extend_from_slice(data);
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> usize {
        let count = buf.len().min(self.inbound.len());
        buf[..count].copy_from_slice(&self.inbound[..count]);
        self.inbound.advance(count);
        count
    }
}

/// Feeds everything the host sent through the engine and hands the results to
/// the rest of the gateway: queued errors are reported, queued frames move to
/// the bus while it has room.
pub fn pump<F>(engine: &mut Engine<Link>, mut bus_ready: F)
where
    F: FnMut(&CanFrame) -> bool,
{
    while engine.gateway().has_input() {
        let pending = engine.gateway().inbound.len();
        engine.run();
        if engine.gateway().inbound.len() == pending {
            break;
        }
    }

    while let Some(error) = engine.gateway_mut().next_error() {
        engine.on_bus_error(error);
    }

    while let Some(frame) = engine.gateway().tx_queue.peek() {
        if !bus_ready(&frame) {
            break;
        }
        engine.gateway_mut().next_frame();
    }
}

/// Serves one host until it disconnects.
pub async fn serve<S>(stream: &mut S, bus: &mut Bus, manage_link: bool) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut engine = Engine::new(Link::new());
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        tokio::select! {
            read = stream.read(&mut chunk) => {
                let count = read?;
                if count == 0 {
                    info!("Host disconnected");
                    return Ok(());
                }
                engine.gateway_mut().feed(&chunk[..count]);
            }
            event = bus.events.recv() => match event {
                Some(BusEvent::Frame(frame)) => engine.on_can_received(&frame),
                Some(BusEvent::Error(error)) => {
                    debug!("Bus error on {}: {}", bus.interface(), error);
                    engine.gateway_mut().count_bus_error(error);
                    engine.on_bus_error(error);
                }
                Some(BusEvent::Restarted) => {
                    info!("{} restarted", bus.interface());
                    if let Some(config) = engine.active_config().copied() {
                        engine.gateway_mut().pending_config = Some(config);
                    }
                }
                None => anyhow::bail!("CAN interface {} went away", bus.interface()),
            }
        }

        pump(&mut engine, |frame| {
            if !bus.can_send() {
                return false;
            }
            if let Err(e) = bus.frames.try_send(*frame) {
                warn!("Could not hand {} to the bus: {}", frame, e);
                return false;
            }
            true
        });

        if let Some(config) = engine.gateway_mut().take_config() {
            if let Err(e) = bus.apply(&config, manage_link).await {
                log::error!("Could not configure {}: {}", bus.interface(), e);
                log::debug!("Details: {:?}", e);
                engine.gateway_mut().count_bus_error(ProtocolError::TxFailure);
                engine.on_bus_error(ProtocolError::TxFailure);
            }
        }

        let output = engine.gateway_mut().take_output();
        if !output.is_empty() {
            stream.write_all(&output).await?;
            stream.flush().await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use usbcan_proto::encode::{encode_can_frame, encode_compact_config, encode_status_request};
    use usbcan_proto::CanId;

    use super::*;

    fn frame(id: u16) -> CanFrame {
        CanFrame::new(CanId::Standard(id), &id.to_le_bytes()).unwrap()
    }

    fn error_reporting() -> BytesMut {
        let mut packet = BytesMut::new();
        encode_compact_config(
            &ProtocolConfig {
                error_reporting: true,
                ..ProtocolConfig::default()
            },
            &mut packet,
        );
        packet
    }

    #[test]
    fn test_frames_wait_for_free_mailboxes() {
        let mut input = BytesMut::new();
        for id in 0..5 {
            encode_can_frame(&frame(id), &mut input);
        }

        let mut engine = Engine::new(Link::new());
        engine.gateway_mut().feed(&input);

        let mut sent = Vec::new();
        pump(&mut engine, |frame| {
            if sent.len() == 3 {
                return false;
            }
            sent.push(*frame);
            true
        });
        assert_eq!(sent, vec![frame(0), frame(1), frame(2)]);
        assert_eq!(engine.gateway().queued_frames(), 2);

        sent.clear();
        pump(&mut engine, |frame| {
            sent.push(*frame);
            true
        });
        assert_eq!(sent, vec![frame(3), frame(4)]);
        assert_eq!(engine.gateway().queued_frames(), 0);
    }

    #[test]
    fn test_full_queue_reports_buffer_full() {
        let mut input = error_reporting();
        for id in 0..(TX_QUEUE_SIZE as u16 + 1) {
            encode_can_frame(&frame(id), &mut input);
        }

        let mut engine = Engine::new(Link::new());
        engine.gateway_mut().feed(&input);
        pump(&mut engine, |_| false);

        assert_eq!(engine.gateway().queued_frames(), TX_QUEUE_SIZE);
        assert_eq!(engine.gateway().status.tx_errors, 1);
        assert_eq!(&engine.gateway_mut().take_output()[..], &[0xAA, 0x15, 0x04, 0x55]);
    }

    #[test]
    fn test_configuration_is_handed_over() {
        let mut engine = Engine::new(Link::new());
        engine.gateway_mut().feed(&error_reporting());
        pump(&mut engine, |_| true);

        let config = engine.gateway_mut().take_config().unwrap();
        assert!(config.error_reporting);
        assert_eq!(engine.gateway_mut().take_config(), None);
    }

    #[test]
    fn test_status_counts_bus_errors() {
        let mut engine = Engine::new(Link::new());
        engine.gateway_mut().count_bus_error(ProtocolError::CrcError);
        engine.gateway_mut().count_bus_error(ProtocolError::TxFailure);
        engine.gateway_mut().count_bus_error(ProtocolError::AcknowledgementMissing);

        let mut request = BytesMut::new();
        encode_status_request(&mut request);
        engine.gateway_mut().feed(&request);
        pump(&mut engine, |_| true);

        let output = engine.gateway_mut().take_output();
        assert_eq!(output.len(), 20);
        assert_eq!(output[3], 2);
        assert_eq!(output[4], 1);
    }

    #[tokio::test]
    async fn test_host_bytes_split_across_reads() {
        let (mut host, mut device) = tokio::io::duplex(64);
        let mut packet = BytesMut::new();
        encode_status_request(&mut packet);

        host.write_all(&packet[..9]).await.unwrap();
        host.write_all(&packet[9..]).await.unwrap();
        drop(host);

        let mut engine = Engine::new(Link::new());
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let count = device.read(&mut chunk).await.unwrap();
            if count == 0 {
                break;
            }
            engine.gateway_mut().feed(&chunk[..count]);
            pump(&mut engine, |_| true);
        }

        assert_eq!(engine.gateway_mut().take_output().len(), 20);
    }
}
