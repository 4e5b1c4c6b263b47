use std::net::SocketAddr;

use log::{info, trace};
use tokio::net::TcpListener;

use crate::backend::socketcan::Bus;
use crate::{gateway, util};

/// Serves one host connection at a time. Bus traffic arriving while nobody is
/// connected is dropped.
pub async fn listen(addr: SocketAddr, bus: &mut Bus, manage_link: bool) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (mut conn, peer) = accepted?;
                info!("Host connected from {}", peer);
                conn.set_nodelay(true)?;
                let result = gateway::serve(&mut conn, bus, manage_link).await;
                util::log_failure("Host connection failed", result);
            }
            event = bus.events.recv() => match event {
                Some(event) => trace!("No host connected, dropping {:?}", event),
                None => anyhow::bail!("CAN interface {} went away", bus.interface()),
            }
        }
    }
}
