//! nusb-based USB transport implementation.
//!
//! Discovery scans every attached device for the recovery interface
//! (class 0xFF, subclass 0x42) with a bulk IN/OUT endpoint pair on the same
//! alternate setting, claims it, and exposes blocking bulk I/O.

use nusb::transfer::{Bulk, In, Out};
use nusb::{Device, Interface, MaybeFuture, list_devices};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::traits::{RecoveryTransport, TransportError};
use crate::protocol::constants::{ADB_CLASS, ADB_SUBCLASS};

/// One alternate setting reduced to what discovery matches on.
#[derive(Debug, Clone)]
pub(crate) struct AltSettingSummary {
    pub interface_number: u8,
    pub class: u8,
    pub subclass: u8,
    pub endpoints: Vec<EndpointSummary>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct EndpointSummary {
    pub address: u8,
    pub bulk: bool,
    pub dir_in: bool,
}

/// Resolved claim target: interface number plus both bulk endpoint addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimTarget {
    pub interface_number: u8,
    pub bulk_in: u8,
    pub bulk_out: u8,
}

/// Pick the first alternate setting matching the recovery class/subclass that
/// carries both a bulk IN and a bulk OUT endpoint. The protocol byte is not
/// inspected.
pub(crate) fn select_endpoints<I>(alt_settings: I) -> Option<ClaimTarget>
where
    I: IntoIterator<Item = AltSettingSummary>,
{
    for alt in alt_settings {
        if alt.class != ADB_CLASS || alt.subclass != ADB_SUBCLASS {
            continue;
        }
        let mut bulk_in = None;
        let mut bulk_out = None;
        for ep in &alt.endpoints {
            if !ep.bulk {
                continue;
            }
            if ep.dir_in {
                bulk_in.get_or_insert(ep.address);
            } else {
                bulk_out.get_or_insert(ep.address);
            }
        }
        // Both directions must exist on the same setting.
        if let (Some(bulk_in), Some(bulk_out)) = (bulk_in, bulk_out) {
            return Some(ClaimTarget {
                interface_number: alt.interface_number,
                bulk_in,
                bulk_out,
            });
        }
    }
    None
}

fn summarize_device(device: &Device) -> Vec<AltSettingSummary> {
    let mut alts = Vec::new();
    for config in device.configurations() {
        for iface in config.interfaces() {
            for alt in iface.alt_settings() {
                alts.push(AltSettingSummary {
                    interface_number: alt.interface_number(),
                    class: alt.class(),
                    subclass: alt.subclass(),
                    endpoints: alt
                        .endpoints()
                        .map(|ep| EndpointSummary {
                            address: ep.address(),
                            bulk: ep.transfer_type() == nusb::descriptors::TransferType::Bulk,
                            dir_in: ep.direction() == nusb::transfer::Direction::In,
                        })
                        .collect(),
                });
            }
        }
    }
    alts
}

/// nusb-based recovery transport.
///
/// Owns the claimed interface; dropping it releases the claim and closes the
/// device handle on every exit path.
pub struct NusbTransport {
    interface: Interface,
    target: ClaimTarget,
    timeout: Duration,
    /// Bytes received beyond what a caller asked for, served first on the
    /// next read so nothing is ever left stranded in a transfer.
    pending: VecDeque<u8>,
}

impl NusbTransport {
    /// Probe every attached device and open the first one exposing the
    /// recovery interface.
    #[instrument(level = "info", skip(timeout))]
    pub fn open(timeout: Duration) -> Result<Self, TransportError> {
        let devices = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        for device_info in devices {
            let device = match device_info.open().wait() {
                Ok(d) => d,
                // A device we cannot open is simply not ours; keep probing.
                Err(e) => {
                    debug!(error = %e, "Skipping unopenable device");
                    continue;
                }
            };
            if let Some(target) = select_endpoints(summarize_device(&device)) {
                info!(
                    vendor_id = %format!("{:04X}", device_info.vendor_id()),
                    product_id = %format!("{:04X}", device_info.product_id()),
                    "Found recovery device"
                );
                return Self::claim(device, target, timeout);
            }
        }

        Err(TransportError::NoCompatibleInterface)
    }

    /// Wrap a pre-opened device file descriptor (for sandboxed callers such
    /// as termux-usb that lack bus enumeration rights) and run the same
    /// discovery/claim path.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    #[instrument(level = "info", skip(fd, timeout))]
    pub fn from_fd(fd: std::os::fd::OwnedFd, timeout: Duration) -> Result<Self, TransportError> {
        let device = Device::from_fd(fd)
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;
        let target = select_endpoints(summarize_device(&device))
            .ok_or(TransportError::NoCompatibleInterface)?;
        Self::claim(device, target, timeout)
    }

    fn claim(device: Device, target: ClaimTarget, timeout: Duration) -> Result<Self, TransportError> {
        // Detaches any bound kernel driver on Linux before claiming, like the
        // libusb auto-detach the recovery interface needs there.
        let interface = device
            .detach_and_claim_interface(target.interface_number)
            .wait()
            .map_err(|e| TransportError::ClaimInterfaceFailed {
                interface: target.interface_number,
                message: e.to_string(),
            })?;

        info!(
            interface = target.interface_number,
            in_ep = %format!("0x{:02X}", target.bulk_in),
            out_ep = %format!("0x{:02X}", target.bulk_out),
            "Interface claimed"
        );

        Ok(Self {
            interface,
            target,
            timeout,
            pending: VecDeque::new(),
        })
    }

    /// The resolved interface/endpoint triple.
    pub fn claim_target(&self) -> ClaimTarget {
        self.target
    }

    /// Adjust the per-call I/O timeout. Sideload verification pauses on the
    /// device routinely exceed the handshake timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

impl RecoveryTransport for NusbTransport {
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let ep = self
            .interface
            .endpoint::<Bulk, Out>(self.target.bulk_out)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        let mut writer = ep.writer(4096).with_write_timeout(self.timeout);
        writer
            .write_all(data)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        debug!(bytes_written = data.len(), "Write complete");
        Ok(data.len())
    }

    #[instrument(skip(self, buf), fields(capacity = buf.len()))]
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        // Serve leftovers from an earlier oversized transfer first.
        if !self.pending.is_empty() {
            let mut n = 0;
            while n < buf.len() {
                match self.pending.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            debug!(bytes_read = n, from_pending = true, "Read complete");
            return Ok(n);
        }

        let ep = self
            .interface
            .endpoint::<Bulk, In>(self.target.bulk_in)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;

        // Always request at least a full transfer's worth so a device sending
        // more than the caller asked for does not fault the endpoint; the
        // surplus is kept for the next call.
        let mut scratch = vec![0u8; buf.len().max(4096)];
        let mut reader = ep.reader(4096).with_read_timeout(self.timeout);
        let n = reader
            .read(&mut scratch)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;

        let delivered = n.min(buf.len());
        buf[..delivered].copy_from_slice(&scratch[..delivered]);
        if n > delivered {
            warn!(surplus = n - delivered, "Transfer larger than requested, buffering surplus");
            self.pending.extend(&scratch[delivered..n]);
        }

        debug!(bytes_read = delivered, "Read complete");
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(address: u8, bulk: bool, dir_in: bool) -> EndpointSummary {
        EndpointSummary { address, bulk, dir_in }
    }

    fn alt(interface_number: u8, class: u8, subclass: u8, endpoints: Vec<EndpointSummary>) -> AltSettingSummary {
        AltSettingSummary {
            interface_number,
            class,
            subclass,
            endpoints,
        }
    }

    #[test]
    fn test_selects_matching_pair() {
        let target = select_endpoints(vec![
            alt(0, 0x08, 0x06, vec![ep(0x81, true, true), ep(0x02, true, false)]),
            alt(1, 0xFF, 0x42, vec![ep(0x83, true, true), ep(0x03, true, false)]),
        ])
        .unwrap();
        assert_eq!(
            target,
            ClaimTarget {
                interface_number: 1,
                bulk_in: 0x83,
                bulk_out: 0x03
            }
        );
    }

    #[test]
    fn test_rejects_single_direction() {
        // A matching setting with only an IN endpoint must not be selected.
        assert!(
            select_endpoints(vec![alt(0, 0xFF, 0x42, vec![ep(0x81, true, true)])]).is_none()
        );
        assert!(
            select_endpoints(vec![alt(0, 0xFF, 0x42, vec![ep(0x01, true, false)])]).is_none()
        );
    }

    #[test]
    fn test_rejects_non_bulk_endpoints() {
        let alts = vec![alt(
            0,
            0xFF,
            0x42,
            vec![ep(0x81, false, true), ep(0x02, true, false)],
        )];
        assert!(select_endpoints(alts).is_none());
    }

    #[test]
    fn test_rejects_wrong_class() {
        let alts = vec![alt(
            2,
            0xFF,
            0x43,
            vec![ep(0x81, true, true), ep(0x02, true, false)],
        )];
        assert!(select_endpoints(alts).is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let target = select_endpoints(vec![
            alt(0, 0xFF, 0x42, vec![ep(0x81, true, true), ep(0x01, true, false)]),
            alt(1, 0xFF, 0x42, vec![ep(0x82, true, true), ep(0x02, true, false)]),
        ])
        .unwrap();
        assert_eq!(target.interface_number, 0);
    }
}
