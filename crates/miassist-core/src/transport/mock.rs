//! Mock transport for testing.
//!
//! Models the bulk IN endpoint as a scripted byte stream so the
//! truncate-and-drain receive discipline is exercised exactly as it would be
//! against a real endpoint: bytes a caller does not consume stay on the wire
//! for the next read.

use std::collections::VecDeque;

use super::traits::{RecoveryTransport, TransportError};
use crate::protocol::{Command, PacketHeader};

/// Mock transport for unit testing protocol and state machine logic.
#[derive(Default)]
pub struct MockTransport {
    /// Scripted inbound bytes.
    inbound: VecDeque<u8>,
    /// Captured writes, one entry per write call.
    write_log: Vec<Vec<u8>>,
    /// When set, the next read fails with this many reads remaining scripted.
    fail_reads: bool,
    /// When set, every write fails.
    fail_writes: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script raw bytes to arrive on the IN endpoint.
    pub fn queue_bytes(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    /// Script a full packet: header followed by its payload.
    pub fn queue_packet(&mut self, command: Command, arg0: u32, arg1: u32, payload: &[u8]) {
        let header = PacketHeader::new(command, arg0, arg1, payload.len() as u32);
        self.queue_bytes(&header.to_bytes());
        self.queue_bytes(payload);
    }

    /// Script a packet whose declared length exceeds the payload actually
    /// provided (for short-read scenarios) or differs from it.
    pub fn queue_packet_with_declared_len(
        &mut self,
        command: Command,
        arg0: u32,
        arg1: u32,
        declared_len: u32,
        payload: &[u8],
    ) {
        let header = PacketHeader::new(command, arg0, arg1, declared_len);
        self.queue_bytes(&header.to_bytes());
        self.queue_bytes(payload);
    }

    /// All captured writes.
    pub fn writes(&self) -> &[Vec<u8>] {
        &self.write_log
    }

    /// Captured writes parsed back into (header, payload) packets.
    pub fn written_packets(&self) -> Vec<(PacketHeader, Vec<u8>)> {
        let mut packets = Vec::new();
        let mut iter = self.write_log.iter();
        while let Some(chunk) = iter.next() {
            let header = PacketHeader::from_bytes(chunk).expect("write was not a header");
            let payload = if header.payload_length > 0 {
                iter.next().cloned().expect("missing payload write")
            } else {
                Vec::new()
            };
            packets.push((header, payload));
        }
        packets
    }

    pub fn clear_writes(&mut self) {
        self.write_log.clear();
    }

    /// Bytes still unread on the simulated wire.
    pub fn unread_len(&self) -> usize {
        self.inbound.len()
    }

    /// Make subsequent reads fail as a transport error.
    pub fn fail_reads(&mut self) {
        self.fail_reads = true;
    }

    /// Make subsequent writes fail as a transport error.
    pub fn fail_writes(&mut self) {
        self.fail_writes = true;
    }
}

impl RecoveryTransport for MockTransport {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if self.fail_writes {
            return Err(TransportError::WriteFailed("simulated failure".into()));
        }
        self.write_log.push(data.to_vec());
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.fail_reads {
            return Err(TransportError::ReadFailed("simulated failure".into()));
        }
        if self.inbound.is_empty() {
            return Err(TransportError::Timeout { timeout_ms: 5000 });
        }
        let mut n = 0;
        while n < buf.len() {
            match self.inbound.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queued_bytes_stream_across_reads() {
        let mut mock = MockTransport::new();
        mock.queue_bytes(b"abcdef");

        let mut buf = [0u8; 4];
        assert_eq!(mock.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");

        assert_eq!(mock.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");

        // Exhausted stream reads time out, like a silent device.
        assert!(matches!(
            mock.read(&mut buf),
            Err(TransportError::Timeout { .. })
        ));
    }

    #[test]
    fn test_write_capture() {
        let mut mock = MockTransport::new();
        mock.write(b"hello").unwrap();
        mock.write(b"world").unwrap();
        assert_eq!(mock.writes().len(), 2);
        assert_eq!(mock.writes()[0], b"hello");
    }

    #[test]
    fn test_written_packets_reassembly() {
        let mut mock = MockTransport::new();
        let header = PacketHeader::new(Command::Open, 1, 0, 5);
        mock.write(&header.to_bytes()).unwrap();
        mock.write(b"data!").unwrap();

        let packets = mock.written_packets();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].0.command(), Command::Open);
        assert_eq!(packets[0].1, b"data!");
    }

    #[test]
    fn test_simulated_failures() {
        let mut mock = MockTransport::new();
        mock.fail_writes();
        assert!(mock.write(b"x").is_err());

        let mut mock = MockTransport::new();
        mock.queue_bytes(b"abc");
        mock.fail_reads();
        assert!(mock.read(&mut [0u8; 4]).is_err());
    }
}
