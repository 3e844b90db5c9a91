//! Event system for UI decoupling.
//!
//! Allows the CLI (or any other frontend) to follow the flashing lifecycle
//! without tight coupling to the protocol code.

use std::fmt;

/// Phases of a flashing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashPhase {
    /// Probing the bus for a recovery device.
    Discovery,
    /// CONNECT handshake.
    Handshake,
    /// Identity query round-trips.
    Identity,
    /// Talking to the OTA validation service.
    Validation,
    /// Chunked image transfer.
    Sideload,
    /// Finished (successfully or with a device-reported message).
    Done,
}

impl fmt::Display for FlashPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashPhase::Discovery => write!(f, "Discovery"),
            FlashPhase::Handshake => write!(f, "Handshake"),
            FlashPhase::Identity => write!(f, "Identity"),
            FlashPhase::Validation => write!(f, "Validation"),
            FlashPhase::Sideload => write!(f, "Sideload"),
            FlashPhase::Done => write!(f, "Done"),
        }
    }
}

/// Events emitted during a session.
#[derive(Debug, Clone)]
pub enum FlashEvent {
    /// Recovery interface claimed.
    DeviceFound {
        interface: u8,
        bulk_in: u8,
        bulk_out: u8,
    },
    /// CONNECT completed; banner received.
    Connected { banner: String, sideload_only: bool },
    /// Phase changed.
    PhaseChanged { phase: FlashPhase },
    /// Sideload progress.
    Progress { sent: u64, total: u64 },
    /// The device sent its human-readable terminal message.
    DeviceMessage { text: String },
    /// Session finished.
    Complete,
}

/// Observer trait for receiving session events.
pub trait FlashObserver: Send + Sync {
    fn on_event(&self, event: &FlashEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl FlashObserver for NullObserver {
    fn on_event(&self, _event: &FlashEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl FlashObserver for TracingObserver {
    fn on_event(&self, event: &FlashEvent) {
        match event {
            FlashEvent::DeviceFound {
                interface,
                bulk_in,
                bulk_out,
            } => {
                tracing::info!(
                    interface,
                    in_ep = %format!("0x{bulk_in:02X}"),
                    out_ep = %format!("0x{bulk_out:02X}"),
                    "Device found"
                );
            }
            FlashEvent::Connected {
                banner,
                sideload_only,
            } => {
                tracing::info!(%banner, sideload_only, "Connected");
            }
            FlashEvent::PhaseChanged { phase } => {
                tracing::info!(%phase, "Phase changed");
            }
            FlashEvent::Progress { sent, total } => {
                let pct = if *total > 0 {
                    ((*sent * 100) / *total).min(100)
                } else {
                    0
                };
                tracing::debug!(sent, total, progress = %format!("{pct}%"), "Progress");
            }
            FlashEvent::DeviceMessage { text } => {
                tracing::info!(%text, "Device message");
            }
            FlashEvent::Complete => {
                tracing::info!("Session complete");
            }
        }
    }
}
