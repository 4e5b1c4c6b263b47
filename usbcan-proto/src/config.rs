/// Bus settings requested by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Bits per second.
    pub bitrate: u32,
    pub filter_id: u32,
    pub filter_mask: u32,
    pub terminator: bool,
    pub silent: bool,
    pub error_reporting: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            bitrate: 250_000,
            filter_id: 0,
            filter_mask: 0,
            terminator: false,
            silent: false,
            error_reporting: false,
        }
    }
}

/// Error counters reported in a status response. Both wrap at 256.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolStatus {
    pub rx_errors: u8,
    pub tx_errors: u8,
}

impl ProtocolStatus {
    pub fn count_rx_error(&mut self) {
        self.rx_errors = self.rx_errors.wrapping_add(1);
    }

    pub fn count_tx_error(&mut self) {
        self.tx_errors = self.tx_errors.wrapping_add(1);
    }
}

const BITRATES: [(u8, u32); 12] = [
    (0x01, 1_000_000),
    (0x02, 800_000),
    (0x03, 500_000),
    (0x04, 400_000),
    (0x05, 250_000),
    (0x06, 200_000),
    (0x07, 125_000),
    (0x08, 100_000),
    (0x09, 50_000),
    (0x0A, 20_000),
    (0x0B, 10_000),
    (0x0C, 5_000),
];

/// Legacy bitrate code. Anything unknown selects the slowest rate.
pub fn bitrate_from_code(code: u8) -> u32 {
    BITRATES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, bitrate)| *bitrate)
        .unwrap_or(5_000)
}

/// Inverse of [`bitrate_from_code`], only for rates in the legacy table.
pub fn bitrate_code(bitrate: u32) -> Option<u8> {
    BITRATES
        .iter()
        .find(|(_, b)| *b == bitrate)
        .map(|(code, _)| *code)
}
