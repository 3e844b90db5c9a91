//! USB transport layer abstraction.
//!
//! Defines the `RecoveryTransport` trait for bulk-endpoint communication,
//! allowing different implementations (nusb, mock, etc.).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No device exposes a compatible recovery interface")]
    NoCompatibleInterface,

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract bulk-endpoint transport.
///
/// Both calls block up to the timeout the transport was constructed with.
/// A short or failed transfer is fatal to the current operation and is never
/// retried here; retry policy belongs to the operator.
///
/// This trait enables:
/// - Production implementation using nusb
/// - Mock implementation for unit testing
pub trait RecoveryTransport {
    /// Write raw bytes to the bulk OUT endpoint. Returns bytes written.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read raw bytes from the bulk IN endpoint into `buf`. Returns bytes read,
    /// at most `buf.len()`.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write, requiring the full buffer to go out.
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let n = self.write(data)?;
        if n != data.len() {
            return Err(TransportError::ShortTransfer {
                expected: data.len(),
                actual: n,
            });
        }
        Ok(())
    }
}
