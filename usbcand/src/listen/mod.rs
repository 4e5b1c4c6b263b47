pub mod serial;
pub mod tcp;

use crate::backend::socketcan::Bus;
use crate::config::{Config, Host};

pub async fn run(config: Config) -> anyhow::Result<()> {
    let mut bus = Bus::open(&config.bus.interface)?;
    let manage_link = config.bus.manage_link;

    match config.host {
        Host::Serial { path, baud } => serial::serve(&path, baud, &mut bus, manage_link).await,
        Host::Tcp { bind } => tcp::listen(bind, &mut bus, manage_link).await,
    }
}
