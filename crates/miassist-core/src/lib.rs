//! miassist-core: Mi Assistant recovery-mode flashing in Rust.
//!
//! Talks to Xiaomi devices booted into the "Mi Assistant" USB recovery mode,
//! which speaks a restricted dialect of the ADB wire protocol over a pair of
//! bulk endpoints.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: packet commands and the 24-byte wire header
//! - **Transport**: USB communication abstraction (nusb, mock)
//! - **Connection**: CONNECT handshake and single-shot command exchange
//! - **Sideload**: chunked, device-pull image transfer
//! - **Validate**: Xiaomi OTA validation client (flash token / ROM listing)
//! - **Events**: observer pattern for UI decoupling
//! - **Session**: high-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use miassist_core::session::{RecoverySession, SessionConfig};
//!
//! let mut session = RecoverySession::open(SessionConfig::default()).expect("no device");
//! let handshake = session.handshake().expect("CONNECT failed");
//! let info = session.read_identity(&handshake).expect("queries failed");
//! println!("{}", info.device);
//! ```

pub mod checksum;
pub mod connection;
pub mod device;
pub mod events;
pub mod protocol;
pub mod session;
pub mod sideload;
pub mod transport;
pub mod validate;

// Re-exports for convenience
pub use connection::{AdbConnection, Handshake, ProtocolError};
pub use device::DeviceInfo;
pub use events::{FlashEvent, FlashObserver, FlashPhase, NullObserver, TracingObserver};
pub use protocol::{Command, PacketHeader};
pub use session::{RecoverySession, SessionConfig};
pub use sideload::{SideloadError, SideloadOutcome, sideload};
pub use transport::{MockTransport, NusbTransport, RecoveryTransport, TransportError};
pub use validate::{ValidateError, Validation, Validator};
