use std::io;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace, warn};
use socketcan::{
    CanDataFrame, CanFilter, CanFrame as BusFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame,
    Id, Socket, SocketOptions, StandardId,
};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task;
use usbcan_proto::frame::EXTENDED_ID_MAX;
use usbcan_proto::{CanFrame, CanId, Error, ProtocolConfig, ProtocolError, TransceiverFault};

/// Frames the writer accepts before the gateway has to hold on to them, like
/// the three transmit mailboxes of a CAN controller.
pub const TX_MAILBOXES: usize = 3;

const EVENT_QUEUE_SIZE: usize = 64;
const READ_TIMEOUT: Duration = Duration::from_millis(100);
const LINK_DOWN_DELAY: Duration = Duration::from_millis(100);

// asm-generic/errno.h
const ENETDOWN: i32 = 100;

// Error classes, see linux/can/error.h
const ERR_TX_TIMEOUT: u32 = 0x001;
const ERR_CRTL: u32 = 0x004;
const ERR_PROT: u32 = 0x008;
const ERR_TRX: u32 = 0x010;
const ERR_ACK: u32 = 0x020;
const ERR_BUSOFF: u32 = 0x040;
const ERR_RESTARTED: u32 = 0x100;

const CRTL_RX_OVERFLOW: u8 = 0x01;
const CRTL_TX_OVERFLOW: u8 = 0x02;

const PROT_FORM: u8 = 0x02;
const PROT_STUFF: u8 = 0x04;
const PROT_BIT0: u8 = 0x08;
const PROT_BIT1: u8 = 0x10;
const PROT_LOC_CRC_SEQ: u8 = 0x08;
const PROT_LOC_CRC_DEL: u8 = 0x18;

/// What the reader does after a failed read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadAction {
    /// Nothing arrived within the read timeout.
    Retry,
    /// The interface is down, e.g. while `ip link` reconfigures it.
    Wait,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    Frame(CanFrame),
    Error(ProtocolError),
    /// The controller left bus-off.
    Restarted,
}

/// A SocketCAN interface, split into a reading and a writing socket that are
/// each served by a blocking thread.
pub struct Bus {
    interface: String,
    filter: Arc<CanSocket>,
    pub frames: mpsc::Sender<CanFrame>,
    pub events: mpsc::Receiver<BusEvent>,
}

impl Bus {
    pub fn open(interface: &str) -> anyhow::Result<Bus> {
        let read = Arc::new(CanSocket::open(interface)?);
        let write = CanSocket::open(interface)?;

        read.set_read_timeout(READ_TIMEOUT)?;
        read.set_error_filter_accept_all()?;

        let (event_sender, events) = mpsc::channel(EVENT_QUEUE_SIZE);
        let (frames, frame_receiver) = frame_channel();

        let reader = read.clone();
        let reader_events = event_sender.clone();
        task::spawn_blocking(move || read_frames(&reader, reader_events));
        task::spawn_blocking(move || write_frames(&write, frame_receiver, event_sender));

        info!("Opened CAN interface {}", interface);

        Ok(Bus {
            interface: interface.to_owned(),
            filter: read,
            frames,
            events,
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Whether the writer takes another frame right now.
    pub fn can_send(&self) -> bool {
        self.frames.capacity() > 0
    }

    /// Acceptance filter: a frame passes when `id & mask == filter_id & mask`.
    pub fn set_filter(&self, filter_id: u32, filter_mask: u32) -> io::Result<()> {
        self.filter
            .set_filters(&[CanFilter::new(filter_id, filter_mask)])
    }

    pub async fn apply(&self, config: &ProtocolConfig, manage_link: bool) -> anyhow::Result<()> {
        self.set_filter(config.filter_id, config.filter_mask)?;

        if manage_link {
            configure_link(&self.interface, config.bitrate, config.silent).await?;
        } else {
            debug!(
                "Leaving bitrate and listen-only mode of {} alone",
                self.interface
            );
        }

        if !config.terminator {
            debug!("Bus termination is not switchable on {}", self.interface);
        }

        Ok(())
    }
}

/// The writer holds one frame while it blocks in `write_frame`, so the channel
/// gets one slot less than there are mailboxes.
fn frame_channel() -> (mpsc::Sender<CanFrame>, mpsc::Receiver<CanFrame>) {
    mpsc::channel(TX_MAILBOXES - 1)
}

fn read_error_action(e: &io::Error) -> ReadAction {
    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) {
        ReadAction::Retry
    } else if e.raw_os_error() == Some(ENETDOWN) {
        ReadAction::Wait
    } else {
        ReadAction::Stop
    }
}

fn read_frames(socket: &CanSocket, events: mpsc::Sender<BusEvent>) {
    loop {
        let event = match socket.read_frame() {
            Ok(BusFrame::Data(frame)) => match from_bus_frame(&frame) {
                Some(frame) => BusEvent::Frame(frame),
                None => continue,
            },
            Ok(BusFrame::Remote(frame)) => {
                trace!("Ignoring remote frame {:x}", frame.raw_id());
                continue;
            }
            Ok(BusFrame::Error(frame)) => match classify_error(frame.raw_id(), frame.data()) {
                Some(event) => event,
                None => continue,
            },
            Err(e) => match read_error_action(&e) {
                ReadAction::Retry => {
                    if events.is_closed() {
                        break;
                    }
                    continue;
                }
                ReadAction::Wait => {
                    if events.is_closed() {
                        break;
                    }
                    trace!("CAN interface is down, waiting");
                    std::thread::sleep(LINK_DOWN_DELAY);
                    continue;
                }
                ReadAction::Stop => {
                    log::error!("Reading from the CAN interface failed: {}", e);
                    log::debug!("Details: {:?}", e);
                    break;
                }
            },
        };

        if events.blocking_send(event).is_err() {
            break;
        }
    }
    debug!("CAN reader stopped");
}

fn write_frames(
    socket: &CanSocket,
    mut frames: mpsc::Receiver<CanFrame>,
    events: mpsc::Sender<BusEvent>,
) {
    while let Some(frame) = frames.blocking_recv() {
        let result = to_bus_frame(&frame)
            .and_then(|bus_frame| socket.write_frame(&bus_frame).map_err(Error::from));

        if let Err(e) = result {
            warn!("Could not transmit {}: {}", frame, e);
            if events
                .blocking_send(BusEvent::Error(ProtocolError::TxFailure))
                .is_err()
            {
                break;
            }
        }
    }
    debug!("CAN writer stopped");
}

pub fn to_bus_frame(frame: &CanFrame) -> usbcan_proto::Result<CanDataFrame> {
    let id = match frame.id() {
        CanId::Standard(raw) => StandardId::new(raw).map(Id::Standard),
        CanId::Extended(raw) => ExtendedId::new(raw).map(Id::Extended),
    }
    .ok_or(Error::InvalidId(frame.id()))?;

    CanDataFrame::new(id, frame.data()).ok_or(Error::PayloadTooLong(frame.len()))
}

pub fn from_bus_frame(frame: &CanDataFrame) -> Option<CanFrame> {
    let id = if frame.is_extended() {
        CanId::Extended(frame.raw_id() & EXTENDED_ID_MAX)
    } else {
        CanId::Standard(frame.raw_id() as u16)
    };
    CanFrame::new(id, frame.data())
}

/// Turns the class bits and payload of an error frame into the error the host
/// gets to see. Arbitration losses and warnings are normal bus life and yield
/// nothing.
pub fn classify_error(class: u32, data: &[u8]) -> Option<BusEvent> {
    let byte = |index: usize| data.get(index).copied().unwrap_or(0);

    if class & ERR_RESTARTED != 0 {
        return Some(BusEvent::Restarted);
    }
    if class & ERR_TRX != 0 {
        return Some(BusEvent::Error(transceiver_fault(byte(4)).into()));
    }
    if class & ERR_PROT != 0 {
        let kind = byte(2);
        let location = byte(3);
        let bus_code = if kind & PROT_STUFF != 0 {
            1
        } else if kind & PROT_FORM != 0 {
            2
        } else if kind & PROT_BIT1 != 0 {
            4
        } else if kind & PROT_BIT0 != 0 {
            5
        } else if location == PROT_LOC_CRC_SEQ || location == PROT_LOC_CRC_DEL {
            6
        } else {
            0
        };
        return Some(BusEvent::Error(ProtocolError::from_bus_code(bus_code)));
    }
    if class & ERR_ACK != 0 {
        return Some(BusEvent::Error(ProtocolError::AcknowledgementMissing));
    }
    if class & ERR_CRTL != 0 {
        if byte(1) & CRTL_RX_OVERFLOW != 0 {
            return Some(BusEvent::Error(ProtocolError::RxOverrun));
        }
        if byte(1) & CRTL_TX_OVERFLOW != 0 {
            return Some(BusEvent::Error(ProtocolError::TxFailure));
        }
        return None;
    }
    if class & (ERR_TX_TIMEOUT | ERR_BUSOFF) != 0 {
        return Some(BusEvent::Error(ProtocolError::TxFailure));
    }
    None
}

fn transceiver_fault(status: u8) -> TransceiverFault {
    // Low nibble is CAN-H, high nibble CAN-L.
    let short = |nibble: u8| match nibble {
        0x5 | 0x6 => Some(TransceiverFault::Overvoltage),
        0x7 => Some(TransceiverFault::Overcurrent),
        _ => None,
    };
    short(status & 0x0F)
        .or_else(|| short(status >> 4))
        .unwrap_or(TransceiverFault::Unknown)
}

/// Sets bitrate and listen-only mode. The interface has to go down for that.
async fn configure_link(interface: &str, bitrate: u32, silent: bool) -> anyhow::Result<()> {
    info!(
        "Configuring {} for {} bit/s, listen-only {}",
        interface, bitrate, silent
    );

    let bitrate = bitrate.to_string();
    let listen_only = if silent { "on" } else { "off" };

    ip(&["link", "set", interface, "down"]).await?;
    ip(&[
        "link",
        "set",
        interface,
        "type",
        "can",
        "bitrate",
        &bitrate,
        "listen-only",
        listen_only,
    ])
    .await?;
    ip(&["link", "set", interface, "up"]).await
}

async fn ip(args: &[&str]) -> anyhow::Result<()> {
    let output = Command::new("ip").args(args).output().await?;
    if !output.status.success() {
        anyhow::bail!(
            "ip {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}
