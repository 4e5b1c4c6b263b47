//! Host side of the link, for poking at a gateway from the command line.

use std::num::ParseIntError;
use std::time::Duration;

use anyhow::Context;
use futures::{SinkExt, StreamExt};
use hex::FromHex;
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::codec::Framed;
use usbcan_proto::{
    CanFrame, CanId, DeviceMessage, Error, HostCodec, HostMessage, ProtocolConfig,
};

const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

pub trait HostIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> HostIo for T {}

pub type Connection = Framed<Box<dyn HostIo>, HostCodec>;

pub enum Endpoint {
    Serial { path: String, baud: u32 },
    Tcp(String),
}

pub async fn connect(endpoint: &Endpoint) -> anyhow::Result<Connection> {
    let io: Box<dyn HostIo> = match endpoint {
        Endpoint::Serial { path, baud } => Box::new(
            tokio_serial::new(path.as_str(), *baud)
                .open_native_async()
                .with_context(|| format!("Could not open {}", path))?,
        ),
        Endpoint::Tcp(addr) => Box::new(
            TcpStream::connect(addr)
                .await
                .with_context(|| format!("Could not connect to {}", addr))?,
        ),
    };
    Ok(Framed::new(io, HostCodec))
}

/// Accepts decimal or `0x` prefixed hex.
pub fn parse_number(text: &str) -> Result<u32, ParseIntError> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    }
}

pub fn parse_frame(id: &str, payload: &str, extended: bool) -> anyhow::Result<CanFrame> {
    let raw = parse_number(id).with_context(|| format!("Invalid identifier {}", id))?;
    let id = if extended {
        CanId::Extended(raw)
    } else {
        let raw = u16::try_from(raw).map_err(|_| Error::InvalidId(CanId::Extended(raw)))?;
        CanId::Standard(raw)
    };
    if !id.is_valid() {
        return Err(Error::InvalidId(id).into());
    }

    let data = Vec::from_hex(payload).with_context(|| format!("Invalid payload {}", payload))?;
    CanFrame::new(id, &data).ok_or_else(|| Error::PayloadTooLong(data.len()).into())
}

/// Prints everything the gateway sends until it goes away.
pub async fn monitor(conn: &mut Connection) -> anyhow::Result<()> {
    while let Some(message) = conn.next().await {
        match message? {
            DeviceMessage::Frame(frame) => println!("{}", frame),
            DeviceMessage::Status(status) => println!(
                "status: {} rx errors, {} tx errors",
                status.rx_errors, status.tx_errors
            ),
            DeviceMessage::ConfigAck(config) => println!(
                "configured: {} bit/s, filter {:08x}/{:08x}",
                config.bitrate, config.filter_id, config.filter_mask
            ),
            DeviceMessage::Error(error) => println!("error: {}", error),
        }
    }
    Ok(())
}

pub async fn send(conn: &mut Connection, frame: CanFrame) -> anyhow::Result<()> {
    conn.send(HostMessage::Frame(frame)).await?;
    debug!("Sent {}", frame);
    Ok(())
}

/// The legacy dialect is answered with an echo, which is waited for.
pub async fn configure(
    conn: &mut Connection,
    config: ProtocolConfig,
    legacy: bool,
) -> anyhow::Result<()> {
    if !legacy {
        conn.send(HostMessage::Configure(config)).await?;
        return Ok(());
    }

    conn.send(HostMessage::ConfigureLegacy(config)).await?;
    let ack = wait_for(conn, |message| match message {
        DeviceMessage::ConfigAck(config) => Some(config),
        _ => None,
    })
    .await?;
    println!(
        "configured: {} bit/s, filter {:08x}/{:08x}",
        ack.bitrate, ack.filter_id, ack.filter_mask
    );
    Ok(())
}

pub async fn status(conn: &mut Connection) -> anyhow::Result<()> {
    conn.send(HostMessage::StatusRequest).await?;
    let status = wait_for(conn, |message| match message {
        DeviceMessage::Status(status) => Some(status),
        _ => None,
    })
    .await?;
    println!("rx errors: {}", status.rx_errors);
    println!("tx errors: {}", status.tx_errors);
    Ok(())
}

async fn wait_for<T, F>(conn: &mut Connection, mut pick: F) -> anyhow::Result<T>
where
    F: FnMut(DeviceMessage) -> Option<T>,
{
    let reply = tokio::time::timeout(REPLY_TIMEOUT, async {
        while let Some(message) = conn.next().await {
            let message = message?;
            if let Some(reply) = pick(message) {
                return Ok(Some(reply));
            }
            debug!("Skipping {:?}", message);
        }
        Ok::<_, Error>(None)
    })
    .await
    .context("Gateway did not answer")??;

    reply.context("Gateway closed the connection")
}
