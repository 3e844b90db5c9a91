//! CONNECT handshake and single-shot command exchange.
//!
//! The recovery speaks one logical stream at a time: every named query is an
//! `OPEN -> {OKAY|WRTE} -> OKAY -> CLSE` round-trip with the local stream id
//! fixed at 1 and the remote id learned from the device's first reply.

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::device::DeviceInfo;
use crate::protocol::constants::{
    ADB_MAX_DATA, ADB_VERSION, DRAIN_CHUNK_SIZE, HOST_BANNER, LOCAL_STREAM_ID, SVC_GET_BRANCH,
    SVC_GET_CODEBASE, SVC_GET_DEVICE, SVC_GET_LANGUAGE, SVC_GET_REGION, SVC_GET_ROMZONE,
    SVC_GET_SN, SVC_GET_VERSION,
};
use crate::protocol::{Command, PacketHeader};
use crate::transport::{RecoveryTransport, TransportError};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Unexpected command: expected {expected}, got {actual}")]
    UnexpectedCommand { expected: Command, actual: Command },

    #[error("Command '{service}' failed: {source}")]
    CommandFailed {
        service: String,
        #[source]
        source: Box<ProtocolError>,
    },

    #[error("Device sent an invalid block request: {0:?}")]
    InvalidBlockRequest(String),
}

/// Result of the CONNECT handshake.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Colon-delimited identity string from the device's CONNECT reply.
    pub banner: String,
    /// The recovery only offers sideload; identity queries must be skipped.
    pub sideload_only: bool,
}

/// A connected recovery-mode ADB endpoint.
pub struct AdbConnection<T: RecoveryTransport> {
    transport: T,
}

impl<T: RecoveryTransport> AdbConnection<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Serialize and send one packet: header first, payload (if any) as a
    /// second transfer. Any write failure aborts the send.
    pub fn send_packet(
        &mut self,
        command: Command,
        arg0: u32,
        arg1: u32,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        let header = PacketHeader::new(command, arg0, arg1, payload.len() as u32);
        self.transport.write_all(&header.to_bytes())?;
        if !payload.is_empty() {
            self.transport.write_all(payload)?;
        }
        debug!(%command, arg0, arg1, len = payload.len(), "sent packet");
        Ok(())
    }

    /// Receive one packet into `dest`, returning the header and the number of
    /// bytes actually delivered (`<= header.payload_length`).
    ///
    /// A payload longer than `dest` is truncated; the remainder is read off
    /// the wire in bounded chunks and discarded. Leaving it unread would
    /// desynchronize the endpoint for every subsequent packet.
    pub fn recv_packet(&mut self, dest: &mut [u8]) -> Result<(PacketHeader, usize), ProtocolError> {
        let mut raw = [0u8; PacketHeader::SIZE];
        let n = self.transport.read(&mut raw)?;
        if n != PacketHeader::SIZE {
            return Err(ProtocolError::Framing(format!(
                "header read returned {n} of {} bytes",
                PacketHeader::SIZE
            )));
        }
        let header =
            PacketHeader::from_bytes(&raw).map_err(|e| ProtocolError::Framing(e.to_string()))?;
        if !header.magic_ok() {
            // The C tool never rejected these either; real devices have been
            // seen sending stale magic after mode switches.
            warn!(command = %header.command(), magic = format!("0x{:08X}", header.magic), "magic mismatch");
        }

        let declared = header.payload_length as usize;
        if declared == 0 {
            return Ok((header, 0));
        }

        let deliver = declared.min(dest.len());
        if deliver > 0 {
            let got = self.transport.read(&mut dest[..deliver])?;
            if got != deliver {
                return Err(ProtocolError::Framing(format!(
                    "payload read returned {got} of {deliver} bytes"
                )));
            }
        }

        let mut remaining = declared - deliver;
        if remaining > 0 {
            debug!(declared, deliver, remaining, "draining oversized payload");
            let mut dump = [0u8; DRAIN_CHUNK_SIZE];
            while remaining > 0 {
                let chunk = remaining.min(DRAIN_CHUNK_SIZE);
                let got = self.transport.read(&mut dump[..chunk])?;
                if got != chunk {
                    return Err(ProtocolError::Framing(format!(
                        "drain read returned {got} of {chunk} bytes"
                    )));
                }
                remaining -= got;
            }
        }

        Ok((header, deliver))
    }

    /// Perform the CONNECT handshake and read the device banner.
    #[instrument(skip(self))]
    pub fn connect(&mut self) -> Result<Handshake, ProtocolError> {
        self.send_packet(Command::Connect, ADB_VERSION, ADB_MAX_DATA, HOST_BANNER)?;

        let mut buf = [0u8; 512];
        let (header, delivered) = self.recv_packet(&mut buf)?;
        if header.command() != Command::Connect {
            warn!(command = %header.command(), "CONNECT reply carried unexpected command");
        }

        let banner = String::from_utf8_lossy(&buf[..delivered]).into_owned();
        let sideload_only = banner.contains("sideload");
        info!(%banner, sideload_only, "device connected");
        Ok(Handshake {
            banner,
            sideload_only,
        })
    }

    /// Run one named service query and return its text response.
    #[instrument(skip(self))]
    pub fn run_command(&mut self, service: &str) -> Result<String, ProtocolError> {
        self.exchange(service)
            .map_err(|source| ProtocolError::CommandFailed {
                service: service.to_string(),
                source: Box::new(source),
            })
    }

    fn exchange(&mut self, service: &str) -> Result<String, ProtocolError> {
        // Service names go out without a trailing NUL.
        self.send_packet(Command::Open, LOCAL_STREAM_ID, 0, service.as_bytes())?;

        let mut buf = [0u8; 1024];
        let (mut header, mut delivered) = self.recv_packet(&mut buf)?;

        // The device may ack the OPEN with OKAY before the data-bearing WRTE,
        // or send WRTE directly; both orderings occur in the wild.
        if header.command() == Command::Okay {
            let (next, next_delivered) = self.recv_packet(&mut buf)?;
            header = next;
            delivered = next_delivered;
        }
        if header.command() != Command::Write {
            return Err(ProtocolError::UnexpectedCommand {
                expected: Command::Write,
                actual: header.command(),
            });
        }

        let text = response_text(&buf[..delivered]);

        // Ack with the stream ids role-swapped relative to what we received.
        self.send_packet(Command::Okay, header.arg1, header.arg0, &[])?;

        // The device closes the stream with CLSE; its content is not
        // inspected, and a failure to read it is deliberately ignored.
        let mut discard = [0u8; 64];
        let _ = self.recv_packet(&mut discard);

        Ok(text)
    }

    /// Query the eight identity fields, one round-trip each. Aborts the whole
    /// batch on the first failure. A sideload-only recovery answers none of
    /// these, so every field is reported as "unknown" without any I/O.
    #[instrument(skip(self, handshake))]
    pub fn read_identity(&mut self, handshake: &Handshake) -> Result<DeviceInfo, ProtocolError> {
        if handshake.sideload_only {
            info!("sideload-only banner, skipping identity queries");
            return Ok(DeviceInfo::unknown());
        }

        let mut info = DeviceInfo::default();
        for (field, service) in [
            (&mut info.device, SVC_GET_DEVICE),
            (&mut info.version, SVC_GET_VERSION),
            (&mut info.sn, SVC_GET_SN),
            (&mut info.codebase, SVC_GET_CODEBASE),
            (&mut info.branch, SVC_GET_BRANCH),
            (&mut info.language, SVC_GET_LANGUAGE),
            (&mut info.region, SVC_GET_REGION),
            (&mut info.romzone, SVC_GET_ROMZONE),
        ] {
            *field = self.run_command(service)?;
        }
        Ok(info)
    }
}

/// Response text: bytes up to the first NUL, with at most one trailing
/// newline stripped.
fn response_text(payload: &[u8]) -> String {
    let end = payload
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(payload.len());
    let text = String::from_utf8_lossy(&payload[..end]);
    match text.strip_suffix('\n') {
        Some(stripped) => stripped.to_string(),
        None => text.into_owned(),
    }
}
