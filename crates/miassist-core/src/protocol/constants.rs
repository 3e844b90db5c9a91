//! Protocol constants for the Mi Assistant recovery ADB dialect.
//!
//! Command words are the standard ADB 4-byte ASCII codes read as
//! little-endian u32.

// ============================================================================
// USB Identification
// ============================================================================

/// Interface class presented by devices in Mi Assistant mode.
pub const ADB_CLASS: u8 = 0xFF;
/// Interface subclass.
pub const ADB_SUBCLASS: u8 = 0x42;
// The protocol byte (nominally 0x01) is intentionally not matched: devices in
// the wild present inconsistent protocol codes.

// ============================================================================
// Command Words (Host <-> Device)
// ============================================================================

/// Connect handshake
pub const ADB_CONNECT: u32 = 0x4E58_4E43; // 'CNXN'
/// Open a logical stream
pub const ADB_OPEN: u32 = 0x4E45_504F; // 'OPEN'
/// Acknowledge
pub const ADB_OKAY: u32 = 0x5941_4B4F; // 'OKAY'
/// Stream data
pub const ADB_WRTE: u32 = 0x4554_5257; // 'WRTE'
/// Close a logical stream
pub const ADB_CLSE: u32 = 0x4553_4C43; // 'CLSE'

// ============================================================================
// Size and Version Constants
// ============================================================================

/// Maximum payload the host advertises in CONNECT arg1.
pub const ADB_MAX_DATA: u32 = 1024 * 1024;

/// Protocol version sent in CONNECT arg0.
pub const ADB_VERSION: u32 = 0x0100_0001;

/// Sideload block size; the device requests blocks of exactly this many bytes.
pub const SIDELOAD_CHUNK_SIZE: u32 = 1024 * 64;

/// Host identity payload for CONNECT, trailing NUL included (7 bytes).
pub const HOST_BANNER: &[u8] = b"host::\0";

/// Local stream id used for every OPEN; only one stream is ever open.
pub const LOCAL_STREAM_ID: u32 = 1;

/// Chunk size used when draining oversized payloads off the wire.
pub const DRAIN_CHUNK_SIZE: usize = 512;

// ============================================================================
// Service Strings
// ============================================================================

pub const SVC_GET_DEVICE: &str = "getdevice:";
pub const SVC_GET_VERSION: &str = "getversion:";
pub const SVC_GET_SN: &str = "getsn:";
pub const SVC_GET_CODEBASE: &str = "getcodebase:";
pub const SVC_GET_BRANCH: &str = "getbranch:";
pub const SVC_GET_LANGUAGE: &str = "getlanguage:";
pub const SVC_GET_REGION: &str = "getregion:";
pub const SVC_GET_ROMZONE: &str = "getromzone:";
pub const SVC_FORMAT_DATA: &str = "format-data:";
pub const SVC_REBOOT: &str = "reboot:";
