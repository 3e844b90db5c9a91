//! High-level orchestrator for a recovery-mode session.
//!
//! Exactly one session is active at a time; it owns the claimed interface
//! through the transport, and dropping it releases the claim and closes the
//! device handle on every exit path.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::connection::{AdbConnection, Handshake, ProtocolError};
use crate::device::DeviceInfo;
use crate::events::{FlashEvent, FlashObserver, FlashPhase, TracingObserver};
use crate::protocol::constants::{SVC_FORMAT_DATA, SVC_REBOOT};
use crate::sideload::{SideloadError, SideloadOutcome, sideload};
use crate::transport::NusbTransport;
use crate::validate::{ValidateError, Validation, Validator};

/// Configuration for a recovery session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Per-call bulk transfer timeout for handshake and queries, in ms.
    pub io_timeout_ms: u64,
    /// Per-call timeout during sideload, in ms. The device stalls while it
    /// verifies each block, so this is longer.
    pub sideload_timeout_ms: u64,
    /// Override for the OTA validation endpoint.
    pub update_url: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            io_timeout_ms: 5_000,
            sideload_timeout_ms: 30_000,
            update_url: None,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    fn sideload_timeout(&self) -> Duration {
        Duration::from_millis(self.sideload_timeout_ms)
    }
}

/// A claimed recovery device plus the observer the UI registered.
pub struct RecoverySession<O: FlashObserver> {
    config: SessionConfig,
    observer: Arc<O>,
    conn: AdbConnection<NusbTransport>,
}

impl RecoverySession<TracingObserver> {
    /// Open the first attached recovery device with the default tracing
    /// observer.
    pub fn open(config: SessionConfig) -> Result<Self> {
        Self::open_with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: FlashObserver> RecoverySession<O> {
    /// Probe the bus and claim the first compatible device.
    pub fn open_with_observer(config: SessionConfig, observer: Arc<O>) -> Result<Self> {
        observer.on_event(&FlashEvent::PhaseChanged {
            phase: FlashPhase::Discovery,
        });
        let transport = NusbTransport::open(config.io_timeout())?;
        Ok(Self::from_transport(config, observer, transport))
    }

    /// Claim a device through a pre-opened file descriptor (sandboxed
    /// callers without bus enumeration rights).
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn open_from_fd(
        config: SessionConfig,
        fd: std::os::fd::OwnedFd,
        observer: Arc<O>,
    ) -> Result<Self> {
        observer.on_event(&FlashEvent::PhaseChanged {
            phase: FlashPhase::Discovery,
        });
        let transport = NusbTransport::from_fd(fd, config.io_timeout())?;
        Ok(Self::from_transport(config, observer, transport))
    }

    fn from_transport(config: SessionConfig, observer: Arc<O>, transport: NusbTransport) -> Self {
        let target = transport.claim_target();
        observer.on_event(&FlashEvent::DeviceFound {
            interface: target.interface_number,
            bulk_in: target.bulk_in,
            bulk_out: target.bulk_out,
        });
        Self {
            config,
            observer,
            conn: AdbConnection::new(transport),
        }
    }

    /// CONNECT handshake; must run before anything else.
    #[instrument(skip(self))]
    pub fn handshake(&mut self) -> Result<Handshake, ProtocolError> {
        self.observer.on_event(&FlashEvent::PhaseChanged {
            phase: FlashPhase::Handshake,
        });
        let handshake = self.conn.connect()?;
        self.observer.on_event(&FlashEvent::Connected {
            banner: handshake.banner.clone(),
            sideload_only: handshake.sideload_only,
        });
        Ok(handshake)
    }

    /// Query the eight identity fields (or report "unknown" for a
    /// sideload-only recovery).
    #[instrument(skip(self, handshake))]
    pub fn read_identity(&mut self, handshake: &Handshake) -> Result<DeviceInfo, ProtocolError> {
        self.observer.on_event(&FlashEvent::PhaseChanged {
            phase: FlashPhase::Identity,
        });
        self.conn.read_identity(handshake)
    }

    /// Ask the OTA service for a flash token for the package checksum.
    #[instrument(skip(self, info))]
    pub fn request_validation(
        &self,
        info: &DeviceInfo,
        md5: &str,
    ) -> Result<Validation, ValidateError> {
        self.observer.on_event(&FlashEvent::PhaseChanged {
            phase: FlashPhase::Validation,
        });
        Validator::new(self.config.update_url.as_deref())?.request_token(info, md5)
    }

    /// List the ROM packages the OTA service offers for this device.
    pub fn list_roms(&self, info: &DeviceInfo) -> Result<serde_json::Value, ValidateError> {
        self.observer.on_event(&FlashEvent::PhaseChanged {
            phase: FlashPhase::Validation,
        });
        Validator::new(self.config.update_url.as_deref())?.list_roms(info)
    }

    /// Stream the image to the device through the sideload service.
    #[instrument(skip(self, token), fields(image = %image.display()))]
    pub fn sideload(
        &mut self,
        image: &Path,
        token: &str,
    ) -> Result<SideloadOutcome, SideloadError> {
        self.observer.on_event(&FlashEvent::PhaseChanged {
            phase: FlashPhase::Sideload,
        });

        let sideload_timeout = self.config.sideload_timeout();
        let io_timeout = self.config.io_timeout();
        self.conn.transport_mut().set_timeout(sideload_timeout);
        let result = sideload(&mut self.conn, image, token, self.observer.as_ref());
        self.conn.transport_mut().set_timeout(io_timeout);

        if let Ok(outcome) = &result {
            info!(bytes_sent = outcome.bytes_sent, "sideload finished");
            self.observer.on_event(&FlashEvent::PhaseChanged {
                phase: FlashPhase::Done,
            });
            self.observer.on_event(&FlashEvent::Complete);
        }
        result
    }

    /// Wipe userdata. The recovery replies with a status line.
    pub fn format_data(&mut self) -> Result<String, ProtocolError> {
        self.conn.run_command(SVC_FORMAT_DATA)
    }

    /// Reboot out of recovery mode.
    pub fn reboot(&mut self) -> Result<String, ProtocolError> {
        self.conn.run_command(SVC_REBOOT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.io_timeout(), Duration::from_secs(5));
        assert_eq!(config.sideload_timeout(), Duration::from_secs(30));
        assert!(config.update_url.is_none());
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = SessionConfig {
            io_timeout_ms: 7_000,
            sideload_timeout_ms: 60_000,
            update_url: Some("http://localhost:8080/ota".into()),
        };
        let tmp = tempfile::NamedTempFile::new().unwrap();
        config.save_to_file(tmp.path()).unwrap();
        let loaded = SessionConfig::load_from_file(tmp.path()).unwrap();
        assert_eq!(loaded.io_timeout_ms, 7_000);
        assert_eq!(loaded.update_url.as_deref(), Some("http://localhost:8080/ota"));
    }
}
