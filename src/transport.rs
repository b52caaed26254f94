//! Transport: two TCP connections, length-prefixed framing, read timeout
//! (§4.2).
//!
//! [`Framer`] turns an arbitrary stream of TCP reads into whole packets.
//! [`Channel`] wraps one `TcpStream` with a `Framer`, a send primitive, and a
//! blocking receive with a per-call timeout. The session owns two
//! `Channel`s (command, event); this module has no opinion about what goes
//! on the wire beyond the framing rule.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::codec;
use crate::error::{PtpError, Result};
use crate::packet::HEADER_LEN;

/// Connect timeout (§4.3 state machine, `Connecting`).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-operation read timeout (§4.2).
pub const READ_TIMEOUT: Duration = Duration::from_secs(15);

/// Splits a byte stream into individual length-prefixed packets. Buffers
/// partial data across calls so it can be fed arbitrary TCP chunk sizes —
/// one packet split across many reads, or many packets in one read.
#[derive(Default)]
pub struct Framer {
    buf: Vec<u8>,
}

impl Framer {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(4096) }
    }

    /// Feed newly read bytes and extract any complete packets. A packet is
    /// complete once the accumulator holds at least 4 bytes and the
    /// declared `total_len` fits within what has accumulated so far.
    ///
    /// Rejects a `total_len` shorter than the 8-byte header (§3): a peer
    /// that sends one can't ever be satisfied by more bytes, and accepting
    /// it would hand callers a packet too short to have a type, or — for
    /// `total_len == 0..4` — detach a zero-length slice every call forever.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.buf.extend_from_slice(data);
        let mut packets = Vec::new();

        loop {
            if self.buf.len() < 4 {
                break;
            }
            let total_len = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
            if total_len < HEADER_LEN {
                return Err(PtpError::ProtocolError(format!(
                    "packet length prefix {total_len} is below the minimum header size {HEADER_LEN}"
                )));
            }
            if total_len > self.buf.len() {
                break; // incomplete — wait for more data
            }
            let packet: Vec<u8> = self.buf.drain(..total_len).collect();
            packets.push(packet);
        }

        Ok(packets)
    }
}

/// One TCP connection (command or event channel) with framing and a
/// per-receive timeout.
pub struct Channel {
    stream: TcpStream,
    framer: Framer,
    read_buf: [u8; 4096],
    pending: std::collections::VecDeque<Vec<u8>>,
}

impl Channel {
    /// Connect with the standard 10-second connect timeout (§4.3).
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        // ToSocketAddrs doesn't expose a timeout-aware API directly; resolve
        // first, then connect with an explicit deadline.
        let resolved = addr
            .to_socket_addrs()
            .map_err(PtpError::ConnectFailed)?
            .next()
            .ok_or_else(|| {
                PtpError::ConnectFailed(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "no addresses to connect to",
                ))
            })?;
        Self::connect_addr(resolved)
    }

    fn connect_addr(addr: SocketAddr) -> Result<Self> {
        let stream =
            TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).map_err(PtpError::ConnectFailed)?;
        let _ = stream.set_nodelay(true);
        Ok(Self {
            stream,
            framer: Framer::new(),
            read_buf: [0u8; 4096],
            pending: std::collections::VecDeque::new(),
        })
    }

    /// Serialize an outbound write. Fire-and-forget: completes when the
    /// bytes are handed to the OS socket buffer.
    pub fn send(&mut self, wire: &[u8]) -> Result<()> {
        self.stream.write_all(wire).map_err(PtpError::from_io)?;
        Ok(())
    }

    /// Block until one complete packet is available or `timeout` elapses.
    pub fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        if let Some(packet) = self.pending.pop_front() {
            return Ok(packet);
        }

        self.stream
            .set_read_timeout(Some(timeout))
            .map_err(PtpError::from_io)?;

        loop {
            let n = match self.stream.read(&mut self.read_buf) {
                Ok(0) => return Err(PtpError::ConnectionLost),
                Ok(n) => n,
                Err(e) => {
                    return Err(match e.kind() {
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                            PtpError::Timeout(timeout)
                        }
                        _ => PtpError::from_io(e),
                    });
                }
            };

            let mut packets = self.framer.feed(&self.read_buf[..n])?;
            if packets.is_empty() {
                continue;
            }
            let first = packets.remove(0);
            self.pending.extend(packets);
            return Ok(first);
        }
    }

    /// Read the fixed header of a just-received packet (used by callers that
    /// already have the packet's bytes from [`recv`](Self::recv)).
    pub fn packet_type_of(wire: &[u8]) -> Result<crate::packet::PacketType> {
        Ok(crate::packet::PacketHeader::parse(wire)?.packet_type()?)
    }

    /// Read a u32 field from a received packet without re-validating the
    /// header (convenience for callers pulling fixed fields like
    /// `connection_id`).
    pub fn field_u32(wire: &[u8], offset: usize) -> Result<u32> {
        Ok(codec::read_u32(wire, offset)?)
    }

    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    /// A cloned handle to the underlying socket, so a caller holding onto
    /// this `Channel` elsewhere (e.g. inside a spawned reader thread) can
    /// still be shut down from another thread to unblock a pending read.
    pub fn try_clone_stream(&self) -> std::io::Result<TcpStream> {
        self.stream.try_clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framer_single_packet_one_read() {
        let mut framer = Framer::new();
        let mut packet = vec![0x08, 0x00, 0x00, 0x00, 0x0D, 0x00, 0x00, 0x00];
        let got = framer.feed(&packet).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0], packet);
        packet.clear();
    }

    #[test]
    fn framer_split_across_many_reads() {
        let mut framer = Framer::new();
        let packet = vec![0x0C, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 1, 2, 3, 4];
        for chunk in packet.chunks(3) {
            let got = framer.feed(chunk).unwrap();
            if !got.is_empty() {
                assert_eq!(got[0], packet);
            }
        }
    }

    #[test]
    fn framer_many_packets_one_read() {
        let mut framer = Framer::new();
        let p1 = vec![0x08, 0x00, 0x00, 0x00, 0x0D, 0x00, 0x00, 0x00];
        let p2 = vec![0x09, 0x00, 0x00, 0x00, 0x0E, 0x00, 0x00, 0x00, 0xFF];
        let mut combined = p1.clone();
        combined.extend_from_slice(&p2);
        let got = framer.feed(&combined).unwrap();
        assert_eq!(got, vec![p1, p2]);
    }

    #[test]
    fn framer_no_partial_delivery() {
        let mut framer = Framer::new();
        let packet = vec![0x10, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 1, 2, 3, 4, 5, 6, 7, 8];
        let got = framer.feed(&packet[..10]).unwrap();
        assert!(got.is_empty());
        let got = framer.feed(&packet[10..]).unwrap();
        assert_eq!(got, vec![packet]);
    }

    #[test]
    fn framer_random_partitioning_matches_whole_stream() {
        // Build a stream of several concatenated valid frames, then feed it
        // back in varying chunk sizes; the resulting frame sequence must be
        // identical regardless of partitioning.
        let frames: Vec<Vec<u8>> = (0..5)
            .map(|i| {
                let payload_len = i * 3;
                let total_len = 8 + payload_len;
                let mut f = Vec::with_capacity(total_len);
                f.extend_from_slice(&(total_len as u32).to_le_bytes());
                f.extend_from_slice(&0x0006u32.to_le_bytes());
                f.extend(std::iter::repeat(i as u8).take(payload_len));
                f
            })
            .collect();
        let mut stream = Vec::new();
        for f in &frames {
            stream.extend_from_slice(f);
        }

        for chunk_size in [1usize, 2, 3, 7, 16, 1000] {
            let mut framer = Framer::new();
            let mut got = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                got.extend(framer.feed(chunk).unwrap());
            }
            assert_eq!(got, frames, "mismatch at chunk_size={chunk_size}");
        }
    }

    #[test]
    fn framer_rejects_zero_length_prefix_instead_of_spinning() {
        let mut framer = Framer::new();
        let malformed = vec![0x00, 0x00, 0x00, 0x00, 0xAA, 0xBB];
        assert!(matches!(framer.feed(&malformed), Err(PtpError::ProtocolError(_))));
    }

    #[test]
    fn framer_rejects_length_prefix_shorter_than_header() {
        for bad_len in [1u32, 4, 7] {
            let mut framer = Framer::new();
            let mut malformed = bad_len.to_le_bytes().to_vec();
            malformed.extend_from_slice(&[0u8; 8]); // trailing noise, irrelevant
            assert!(
                matches!(framer.feed(&malformed), Err(PtpError::ProtocolError(_))),
                "bad_len={bad_len}"
            );
        }
    }
}
