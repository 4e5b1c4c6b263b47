use std::fmt;

pub const MAX_PAYLOAD_LENGTH: usize = 8;

/// Largest identifier that fits an 11-bit standard frame.
pub const STANDARD_ID_MAX: u32 = 0x7FF;
/// Largest identifier that fits a 29-bit extended frame.
pub const EXTENDED_ID_MAX: u32 = 0x1FFF_FFFF;

/// CAN identifier, tagged with its width.
///
/// The host link carries standard identifiers in two bytes, so a `Standard`
/// id holds whatever 16 bits the host sent. Use [`CanId::is_valid`] before
/// putting it on a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanId {
    Standard(u16),
    Extended(u32),
}

impl CanId {
    pub fn raw(&self) -> u32 {
        match *self {
            CanId::Standard(id) => id as u32,
            CanId::Extended(id) => id,
        }
    }

    pub fn is_extended(&self) -> bool {
        matches!(self, CanId::Extended(_))
    }

    pub fn is_valid(&self) -> bool {
        match *self {
            CanId::Standard(id) => id as u32 <= STANDARD_ID_MAX,
            CanId::Extended(id) => id <= EXTENDED_ID_MAX,
        }
    }
}

impl Default for CanId {
    fn default() -> Self {
        CanId::Standard(0)
    }
}

impl fmt::Display for CanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CanId::Standard(id) => write!(f, "{:03x}", id),
            CanId::Extended(id) => write!(f, "{:08x}", id),
        }
    }
}

/// A classic CAN data frame with up to eight payload bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanFrame {
    id: CanId,
    len: u8,
    data: [u8; MAX_PAYLOAD_LENGTH],
}

impl CanFrame {
    /// Returns `None` if the payload is longer than eight bytes.
    pub fn new(id: CanId, payload: &[u8]) -> Option<CanFrame> {
        if payload.len() > MAX_PAYLOAD_LENGTH {
            return None;
        }
        let mut data = [0u8; MAX_PAYLOAD_LENGTH];
        data[..payload.len()].copy_from_slice(payload);
        Some(CanFrame {
            id,
            len: payload.len() as u8,
            data,
        })
    }

    pub fn id(&self) -> CanId {
        self.id
    }

    pub fn is_extended(&self) -> bool {
        self.id.is_extended()
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.id, self.len)?;
        for byte in self.data() {
            write!(f, " {:02x}", byte)?;
        }
        Ok(())
    }
}
