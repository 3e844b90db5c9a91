//! Sideload transfer engine.
//!
//! The transfer is device-pull: after the host opens the sideload service,
//! the recovery requests blocks by decimal index and the host answers each
//! request with a WRTE carrying that block plus an OKAY ack. There is no
//! explicit "done" command; the loop ends when the device sends a
//! human-readable message (recognized by its length alone) or requests a
//! block past end of file.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::connection::{AdbConnection, ProtocolError};
use crate::events::{FlashEvent, FlashObserver};
use crate::protocol::constants::{LOCAL_STREAM_ID, SIDELOAD_CHUNK_SIZE};
use crate::protocol::Command;
use crate::transport::RecoveryTransport;

#[derive(Error, Debug)]
pub enum SideloadError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Image file error: {0}")]
    File(#[from] std::io::Error),
}

/// How a transfer ended. Partial progress is reported as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideloadOutcome {
    /// Terminal message from the device, if it sent one. Success or failure
    /// notice; the protocol does not distinguish them.
    pub message: Option<String>,
    /// Cumulative payload bytes sent (re-requested blocks count again).
    pub bytes_sent: u64,
}

/// Byte span of one requested block: `(offset, length)`. `None` when the
/// request is past end of file, which signals transfer completion. The last
/// in-range block may be partial, or empty when the file length is an exact
/// chunk multiple.
pub fn chunk_span(file_len: u64, chunk_size: u32, block: u64) -> Option<(u64, u32)> {
    let offset = block.checked_mul(chunk_size as u64)?;
    if offset > file_len {
        return None;
    }
    let len = (file_len - offset).min(chunk_size as u64) as u32;
    Some((offset, len))
}

fn parse_block_index(payload: &[u8]) -> Result<u64, ProtocolError> {
    let text = String::from_utf8_lossy(payload);
    let trimmed = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    trimmed
        .parse::<u64>()
        .map_err(|_| ProtocolError::InvalidBlockRequest(trimmed.to_string()))
}

/// Push `image` to the device through the sideload service, using the
/// validation token obtained from the OTA service.
#[instrument(skip(conn, observer), fields(image = %image.display()))]
pub fn sideload<T: RecoveryTransport>(
    conn: &mut AdbConnection<T>,
    image: &Path,
    token: &str,
    observer: &dyn FlashObserver,
) -> Result<SideloadOutcome, SideloadError> {
    let mut file = File::open(image)?;
    let file_len = file.metadata()?.len();

    // Unlike plain service names, the sideload open string embeds a trailing
    // NUL on the wire.
    let mut service =
        format!("sideload-host:{file_len}:{SIDELOAD_CHUNK_SIZE}:{token}:0").into_bytes();
    service.push(0);
    conn.send_packet(Command::Open, LOCAL_STREAM_ID, 0, &service)?;
    info!(file_len, "sideload opened");

    let mut chunk = vec![0u8; SIDELOAD_CHUNK_SIZE as usize];
    let mut request = [0u8; 64];
    let mut sent: u64 = 0;

    loop {
        let (header, delivered) = conn.recv_packet(&mut request)?;

        // A payload longer than a block index is the device's terminal
        // message, whatever command carried it.
        if delivered > 8 {
            let text = String::from_utf8_lossy(&request[..delivered])
                .trim_end_matches('\0')
                .to_string();
            observer.on_event(&FlashEvent::DeviceMessage { text: text.clone() });
            return Ok(SideloadOutcome {
                message: Some(text),
                bytes_sent: sent,
            });
        }

        match header.command() {
            Command::Okay => {
                // Flow-control ping; ack and keep going.
                conn.send_packet(Command::Okay, header.arg1, header.arg0, &[])?;
                continue;
            }
            Command::Write => {}
            other => {
                debug!(command = %other, "ignoring unrelated packet during sideload");
                continue;
            }
        }

        let block = parse_block_index(&request[..delivered])?;
        let Some((offset, len)) = chunk_span(file_len, SIDELOAD_CHUNK_SIZE, block) else {
            debug!(block, "block request past end of file, transfer complete");
            return Ok(SideloadOutcome {
                message: None,
                bytes_sent: sent,
            });
        };

        // Blocks may be requested out of order or repeatedly.
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut chunk[..len as usize])?;

        conn.send_packet(Command::Write, header.arg1, header.arg0, &chunk[..len as usize])?;
        conn.send_packet(Command::Okay, header.arg1, header.arg0, &[])?;

        sent += len as u64;
        observer.on_event(&FlashEvent::Progress {
            sent: sent.min(file_len),
            total: file_len,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;
    use crate::transport::MockTransport;
    use std::io::Write as _;

    #[test]
    fn test_chunk_span_arithmetic() {
        // 1_000_000 bytes in 65536-byte chunks: block 15 is the last, partial.
        assert_eq!(chunk_span(1_000_000, 65536, 15), Some((983_040, 16_960)));
        assert_eq!(chunk_span(1_000_000, 65536, 0), Some((0, 65536)));
        // Block 16 starts past end of file.
        assert_eq!(chunk_span(1_000_000, 65536, 16), None);
        // An exact multiple: the boundary block is in range but empty.
        assert_eq!(chunk_span(65536, 65536, 1), Some((65536, 0)));
        assert_eq!(chunk_span(65536, 65536, 2), None);
    }

    #[test]
    fn test_parse_block_index() {
        assert_eq!(parse_block_index(b"15").unwrap(), 15);
        assert_eq!(parse_block_index(b"0\0").unwrap(), 0);
        assert_eq!(parse_block_index(b" 7 ").unwrap(), 7);
        assert!(matches!(
            parse_block_index(b"abc"),
            Err(ProtocolError::InvalidBlockRequest(_))
        ));
    }

    fn temp_image(len: usize) -> (tempfile::NamedTempFile, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();
        (file, data)
    }

    #[test]
    fn test_transfer_serves_blocks_out_of_order() {
        let chunk = SIDELOAD_CHUNK_SIZE as usize;
        let (image, data) = temp_image(chunk * 2 + 1000);

        let mut mock = MockTransport::new();
        mock.queue_packet(Command::Okay, 9, 1, b"");
        mock.queue_packet(Command::Write, 9, 1, b"0");
        mock.queue_packet(Command::Write, 9, 1, b"2");
        mock.queue_packet(Command::Write, 9, 1, b"1");
        mock.queue_packet(Command::Write, 9, 1, b"Install from ADB complete.");

        let mut conn = AdbConnection::new(mock);
        let outcome = sideload(&mut conn, image.path(), "token123", &NullObserver).unwrap();
        assert_eq!(outcome.message.as_deref(), Some("Install from ADB complete."));
        assert_eq!(outcome.bytes_sent, data.len() as u64);

        let packets = conn.into_inner().written_packets();
        // OPEN, OKAY ping ack, then (WRTE, OKAY) per block.
        assert_eq!(packets.len(), 8);

        let (open, service) = &packets[0];
        assert_eq!(open.command(), Command::Open);
        let expected = format!("sideload-host:{}:{}:token123:0\0", data.len(), chunk);
        assert_eq!(service.as_slice(), expected.as_bytes());

        assert_eq!(packets[1].0.command(), Command::Okay);

        // Blocks came back in requested order 0, 2, 1 with role-swapped ids.
        let wrte0 = &packets[2];
        assert_eq!(wrte0.0.command(), Command::Write);
        assert_eq!((wrte0.0.arg0, wrte0.0.arg1), (1, 9));
        assert_eq!(wrte0.1, &data[..chunk]);
        assert_eq!(packets[3].0.command(), Command::Okay);

        assert_eq!(packets[4].1, &data[chunk * 2..]);
        assert_eq!(packets[6].1, &data[chunk..chunk * 2]);
    }

    #[test]
    fn test_transfer_completes_on_past_eof_request() {
        let (image, _) = temp_image(1000);

        let mut mock = MockTransport::new();
        mock.queue_packet(Command::Write, 9, 1, b"0");
        mock.queue_packet(Command::Write, 9, 1, b"5");

        let mut conn = AdbConnection::new(mock);
        let outcome = sideload(&mut conn, image.path(), "t", &NullObserver).unwrap();
        assert_eq!(outcome.message, None);
        assert_eq!(outcome.bytes_sent, 1000);
    }

    #[test]
    fn test_terminal_message_recognized_on_any_command() {
        let (image, _) = temp_image(100);

        let mut mock = MockTransport::new();
        // Not a WRTE, but longer than a block index: still terminates.
        mock.queue_packet(Command::Close, 9, 1, b"Installation aborted.");

        let mut conn = AdbConnection::new(mock);
        let outcome = sideload(&mut conn, image.path(), "t", &NullObserver).unwrap();
        assert_eq!(outcome.message.as_deref(), Some("Installation aborted."));
        assert_eq!(outcome.bytes_sent, 0);
    }

    #[test]
    fn test_unrelated_chatter_is_ignored() {
        let (image, _) = temp_image(100);

        let mut mock = MockTransport::new();
        mock.queue_packet(Command::Connect, 0, 0, b"x");
        mock.queue_packet(Command::Write, 9, 1, b"9");

        let mut conn = AdbConnection::new(mock);
        let outcome = sideload(&mut conn, image.path(), "t", &NullObserver).unwrap();
        assert_eq!(outcome.message, None);
    }

    #[test]
    fn test_transport_failure_is_fatal() {
        let (image, _) = temp_image(100);

        let mut mock = MockTransport::new();
        mock.fail_reads();
        let mut conn = AdbConnection::new(mock);
        assert!(sideload(&mut conn, image.path(), "t", &NullObserver).is_err());
    }
}
