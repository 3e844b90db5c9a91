//! Protocol module - recovery-mode ADB dialect definitions.

pub mod constants;
pub mod packet;

pub use constants::*;
pub use packet::{Command, PacketError, PacketHeader};
