use std::fmt;

use thiserror::Error;

use crate::frame::CanId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Payload too long for a CAN frame: {0} bytes")]
    PayloadTooLong(usize),

    #[error("Identifier {0} does not fit its frame format")]
    InvalidId(CanId),
}

/// Error codes sent to the host in an error notification.
///
/// The values are part of the wire format. Codes 5 and up are the CAN
/// controller's last-error codes shifted by [`BUS_ERROR_OFFSET`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolError {
    #[default]
    Unknown = 0x00,
    Overcurrent = 0x01,
    Overvoltage = 0x02,
    TxFailure = 0x03,
    BufferFull = 0x04,
    BitStuffing = 0x05,
    FormViolation = 0x06,
    AcknowledgementMissing = 0x07,
    RecessiveBitError = 0x08,
    DominantBitError = 0x09,
    CrcError = 0x0A,
    SoftwareError = 0x0B,
    RxOverrun = 0x0C,
}

pub const BUS_ERROR_OFFSET: u8 = 0x04;

/// Controller error code → wire error code.
///
/// | bus code | error |
/// |---|---|
/// | 1 | BitStuffing |
/// | 2 | FormViolation |
/// | 3 | AcknowledgementMissing |
/// | 4 | RecessiveBitError |
/// | 5 | DominantBitError |
/// | 6 | CrcError |
/// | 7 | SoftwareError |
/// | 8 | RxOverrun |
const BUS_ERRORS: [ProtocolError; 8] = [
    ProtocolError::BitStuffing,
    ProtocolError::FormViolation,
    ProtocolError::AcknowledgementMissing,
    ProtocolError::RecessiveBitError,
    ProtocolError::DominantBitError,
    ProtocolError::CrcError,
    ProtocolError::SoftwareError,
    ProtocolError::RxOverrun,
];

impl ProtocolError {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Maps a controller error code (1..=8). Everything else is `Unknown`.
    pub fn from_bus_code(code: u8) -> ProtocolError {
        match code {
            1..=8 => BUS_ERRORS[code as usize - 1],
            _ => ProtocolError::Unknown,
        }
    }
}

impl From<u8> for ProtocolError {
    fn from(code: u8) -> Self {
        match code {
            0x01 => ProtocolError::Overcurrent,
            0x02 => ProtocolError::Overvoltage,
            0x03 => ProtocolError::TxFailure,
            0x04 => ProtocolError::BufferFull,
            code @ 0x05..=0x0C => ProtocolError::from_bus_code(code - BUS_ERROR_OFFSET),
            _ => ProtocolError::Unknown,
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ProtocolError::Unknown => "unknown error",
            ProtocolError::Overcurrent => "transceiver overcurrent",
            ProtocolError::Overvoltage => "transceiver overvoltage",
            ProtocolError::TxFailure => "transmit failure",
            ProtocolError::BufferFull => "transmit buffer full",
            ProtocolError::BitStuffing => "bit stuffing error",
            ProtocolError::FormViolation => "form violation",
            ProtocolError::AcknowledgementMissing => "acknowledgement missing",
            ProtocolError::RecessiveBitError => "recessive bit error",
            ProtocolError::DominantBitError => "dominant bit error",
            ProtocolError::CrcError => "CRC error",
            ProtocolError::SoftwareError => "software error",
            ProtocolError::RxOverrun => "receive overrun",
        };
        f.write_str(text)
    }
}

/// Fault reported by the bus transceiver after a fault-clear sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverFault {
    Unknown,
    Overcurrent,
    Overvoltage,
    TxFailure,
}

impl TransceiverFault {
    /// Classifies the 6-bit code clocked out of the transceiver.
    pub fn from_code(code: u8) -> TransceiverFault {
        match code {
            0x2A => TransceiverFault::Overcurrent,
            0x2C => TransceiverFault::Overvoltage,
            0x32 => TransceiverFault::TxFailure,
            _ => TransceiverFault::Unknown,
        }
    }
}

impl From<TransceiverFault> for ProtocolError {
    fn from(fault: TransceiverFault) -> Self {
        match fault {
            TransceiverFault::Unknown => ProtocolError::Unknown,
            TransceiverFault::Overcurrent => ProtocolError::Overcurrent,
            TransceiverFault::Overvoltage => ProtocolError::Overvoltage,
            TransceiverFault::TxFailure => ProtocolError::TxFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_codes_are_offset() {
        for code in 1..=8u8 {
            let error = ProtocolError::from_bus_code(code);
            assert_eq!(error.code(), code + BUS_ERROR_OFFSET);
        }
        assert_eq!(ProtocolError::from_bus_code(0), ProtocolError::Unknown);
        assert_eq!(ProtocolError::from_bus_code(9), ProtocolError::Unknown);
    }

    #[test]
    fn test_wire_codes_are_stable() {
        assert_eq!(ProtocolError::BufferFull.code(), 0x04);
        assert_eq!(ProtocolError::BitStuffing.code(), 0x05);
        assert_eq!(ProtocolError::CrcError.code(), 0x0A);
        assert_eq!(ProtocolError::RxOverrun.code(), 0x0C);
        for code in 0..=0x0Cu8 {
            assert_eq!(ProtocolError::from(code).code(), code);
        }
        assert_eq!(ProtocolError::from(0x42), ProtocolError::Unknown);
    }

    #[test]
    fn test_transceiver_faults() {
        assert_eq!(
            ProtocolError::from(TransceiverFault::from_code(0x2A)),
            ProtocolError::Overcurrent
        );
        assert_eq!(
            ProtocolError::from(TransceiverFault::from_code(0x2C)),
            ProtocolError::Overvoltage
        );
        assert_eq!(
            ProtocolError::from(TransceiverFault::from_code(0x32)),
            ProtocolError::TxFailure
        );
        assert_eq!(TransceiverFault::from_code(0x3F), TransceiverFault::Unknown);
    }
}
