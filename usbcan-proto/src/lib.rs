//! Wire protocol spoken between a USB-CAN gateway and its host.
//!
//! The gateway side is [`Engine`], a non-blocking run loop that reassembles
//! host bytes, decodes them and calls back into a [`Gateway`]. The host side is
//! [`HostCodec`], a `tokio_util` codec for the opposite direction.

pub mod codec;
pub mod config;
pub mod decode;
pub mod encode;
pub mod engine;
mod error;
pub mod frame;
pub mod queue;

pub use codec::{DeviceMessage, HostCodec, HostMessage};
pub use config::{ProtocolConfig, ProtocolStatus};
pub use decode::{decode, Decoded, Packet};
pub use engine::{Engine, Gateway};
pub use error::*;
pub use frame::{CanFrame, CanId};
pub use queue::Queue;
