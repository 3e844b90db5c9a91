//! Wire header for the recovery ADB dialect.
//!
//! Every packet starts with a fixed 24-byte header of six little-endian u32
//! fields; a non-empty payload follows in a second bulk transfer.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::Cursor;
use thiserror::Error;

use super::constants::{ADB_CLSE, ADB_CONNECT, ADB_OKAY, ADB_OPEN, ADB_WRTE};

#[derive(Error, Debug)]
pub enum PacketError {
    #[error("Header too short: expected {expected} bytes, got {actual}")]
    HeaderTooShort { expected: usize, actual: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The five commands of the dialect, plus anything else a device might emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Open,
    Okay,
    Write,
    Close,
    /// A command word outside the known set; kept raw for logging.
    Unknown(u32),
}

impl Command {
    pub fn from_u32(word: u32) -> Self {
        match word {
            ADB_CONNECT => Command::Connect,
            ADB_OPEN => Command::Open,
            ADB_OKAY => Command::Okay,
            ADB_WRTE => Command::Write,
            ADB_CLSE => Command::Close,
            other => Command::Unknown(other),
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            Command::Connect => ADB_CONNECT,
            Command::Open => ADB_OPEN,
            Command::Okay => ADB_OKAY,
            Command::Write => ADB_WRTE,
            Command::Close => ADB_CLSE,
            Command::Unknown(word) => *word,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Connect => write!(f, "CNXN"),
            Command::Open => write!(f, "OPEN"),
            Command::Okay => write!(f, "OKAY"),
            Command::Write => write!(f, "WRTE"),
            Command::Close => write!(f, "CLSE"),
            Command::Unknown(word) => write!(f, "0x{word:08X}"),
        }
    }
}

/// Packet header (24 bytes).
///
/// `checksum` is always zero in this dialect; the target recovery does not
/// compute or verify it. `magic` is the bitwise complement of the command
/// word and serves as a cheap framing sanity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub command: u32,
    pub arg0: u32,
    pub arg1: u32,
    pub payload_length: u32,
    pub checksum: u32,
    pub magic: u32,
}

impl PacketHeader {
    pub const SIZE: usize = 24;

    pub fn new(command: Command, arg0: u32, arg1: u32, payload_length: u32) -> Self {
        let word = command.as_u32();
        Self {
            command: word,
            arg0,
            arg1,
            payload_length,
            checksum: 0,
            magic: !word,
        }
    }

    pub fn command(&self) -> Command {
        Command::from_u32(self.command)
    }

    /// Whether `magic` is the complement of `command`. Devices are not
    /// rejected on mismatch, but callers log it.
    pub fn magic_ok(&self) -> bool {
        self.magic == !self.command
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        {
            let mut cursor = Cursor::new(&mut buf[..]);
            // Writes into a fixed array cannot fail.
            cursor.write_u32::<LittleEndian>(self.command).unwrap();
            cursor.write_u32::<LittleEndian>(self.arg0).unwrap();
            cursor.write_u32::<LittleEndian>(self.arg1).unwrap();
            cursor.write_u32::<LittleEndian>(self.payload_length).unwrap();
            cursor.write_u32::<LittleEndian>(self.checksum).unwrap();
            cursor.write_u32::<LittleEndian>(self.magic).unwrap();
        }
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < Self::SIZE {
            return Err(PacketError::HeaderTooShort {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        Ok(Self {
            command: cursor.read_u32::<LittleEndian>()?,
            arg0: cursor.read_u32::<LittleEndian>()?,
            arg1: cursor.read_u32::<LittleEndian>()?,
            payload_length: cursor.read_u32::<LittleEndian>()?,
            checksum: cursor.read_u32::<LittleEndian>()?,
            magic: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = PacketHeader::new(Command::Open, 1, 0, 42);
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), PacketHeader::SIZE);

        let parsed = PacketHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.command(), Command::Open);
        assert_eq!(parsed.payload_length, 42);
        assert_eq!(parsed.checksum, 0);
    }

    #[test]
    fn test_magic_is_complement() {
        let header = PacketHeader::new(Command::Write, 0, 0, 0);
        assert_eq!(header.magic, !ADB_WRTE);
        assert!(header.magic_ok());

        let mut bad = header;
        bad.magic ^= 0xFF;
        assert!(!bad.magic_ok());
    }

    #[test]
    fn test_little_endian_layout() {
        let header = PacketHeader::new(Command::Connect, 0x0100_0001, 0x0010_0000, 7);
        let bytes = header.to_bytes();
        // 'CNXN' as little-endian u32 puts 'C' first on the wire.
        assert_eq!(&bytes[0..4], b"CNXN");
        assert_eq!(&bytes[4..8], &[0x01, 0x00, 0x00, 0x01]);
        assert_eq!(&bytes[12..16], &[7, 0, 0, 0]);
    }

    #[test]
    fn test_short_header_rejected() {
        let err = PacketHeader::from_bytes(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, PacketError::HeaderTooShort { actual: 10, .. }));
    }

    #[test]
    fn test_unknown_command_preserved() {
        let cmd = Command::from_u32(0xDEAD_BEEF);
        assert_eq!(cmd, Command::Unknown(0xDEAD_BEEF));
        assert_eq!(cmd.as_u32(), 0xDEAD_BEEF);
        assert_eq!(format!("{cmd}"), "0xDEADBEEF");
    }
}
