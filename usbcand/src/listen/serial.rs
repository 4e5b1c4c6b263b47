use std::path::Path;
use std::time::Duration;

use log::info;
use tokio_serial::SerialPortBuilderExt;

use crate::backend::socketcan::Bus;
use crate::{gateway, util};

const REOPEN_DELAY: Duration = Duration::from_secs(1);

/// Serves the host on a serial port, reopening it whenever the host goes away.
pub async fn serve(
    path: &Path,
    baud: u32,
    bus: &mut Bus,
    manage_link: bool,
) -> anyhow::Result<()> {
    let name = path.to_string_lossy();

    loop {
        match tokio_serial::new(name.as_ref(), baud).open_native_async() {
            Ok(mut port) => {
                info!("Serving host on {} at {} baud", name, baud);
                let result = gateway::serve(&mut port, bus, manage_link).await;
                util::log_failure("Host link failed", result);
            }
            Err(e) => util::log_failure("Could not open serial port", Err(e)),
        }
        tokio::time::sleep(REOPEN_DELAY).await;
    }
}
