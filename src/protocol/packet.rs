//! Packet framing.
//!
//! Every packet starts with a 4-byte header: 3-byte little-endian payload
//! length and a 1-byte sequence id. A payload of `MAX_PAYLOAD_LEN` bytes or
//! more is split into several packets; the message ends with the first packet
//! shorter than the maximum, which is an empty packet when the payload length
//! is an exact multiple of the maximum.

use std::io::Read;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::constant::MAX_PAYLOAD_LEN;
use crate::error::{Error, Result};

/// Size of the packet header.
pub const HEADER_LEN: usize = 4;

/// Packet header (4 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct PacketHeader {
    /// Payload length, little-endian
    pub length: [u8; 3],
    /// Sequence id
    pub sequence_id: u8,
}

impl PacketHeader {
    /// Build a header for a payload of `length` bytes.
    pub fn new(length: usize, sequence_id: u8) -> Self {
        let bytes = (length as u32).to_le_bytes();
        Self {
            length: [bytes[0], bytes[1], bytes[2]],
            sequence_id,
        }
    }

    /// Parse a header from exactly four bytes.
    pub fn parse(bytes: &[u8]) -> Result<&Self> {
        Ok(Self::ref_from_bytes(bytes)?)
    }

    /// Payload length.
    pub fn length(&self) -> usize {
        usize::from(self.length[0])
            | (usize::from(self.length[1]) << 8)
            | (usize::from(self.length[2]) << 16)
    }
}

/// Check a received sequence id against the expected one and advance it.
#[inline]
pub fn check_sequence(expected: &mut u8, received: u8) -> Result<()> {
    if received != *expected {
        return Err(Error::Protocol(format!(
            "packet sequence mismatch: expected {}, got {}",
            expected, received
        )));
    }
    *expected = expected.wrapping_add(1);
    Ok(())
}

/// Frame `payload` into one or more packets appended to `out`.
///
/// `sequence_id` is the id of the first packet and is advanced past the last one.
pub fn write_packets(out: &mut Vec<u8>, payload: &[u8], sequence_id: &mut u8) {
    let mut rest = payload;
    loop {
        let n = rest.len().min(MAX_PAYLOAD_LEN);
        out.extend_from_slice(PacketHeader::new(n, *sequence_id).as_bytes());
        *sequence_id = sequence_id.wrapping_add(1);
        out.extend_from_slice(&rest[..n]);
        rest = &rest[n..];
        if n < MAX_PAYLOAD_LEN {
            break;
        }
    }
}

/// Packet builder that reserves the header and fills it in on `finish`.
///
/// ```ignore
/// let mut packet = PacketBuilder::new(&mut buffer_set.write_buffer);
/// codec::write_u8(packet.buf(), CommandByte::Ping as u8);
/// packet.finish(&mut buffer_set.sequence_id);
/// ```
pub struct PacketBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> PacketBuilder<'a> {
    /// Start a packet at the end of `buf`.
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        let start = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]); // Placeholder for header
        Self { buf, start }
    }

    /// Get mutable access to the underlying buffer.
    pub fn buf(&mut self) -> &mut Vec<u8> {
        self.buf
    }

    /// Fill in the header, splitting into several packets if the payload is too large.
    pub fn finish(self, sequence_id: &mut u8) {
        let payload_start = self.start + HEADER_LEN;
        let payload_len = self.buf.len() - payload_start;
        if payload_len < MAX_PAYLOAD_LEN {
            let header = PacketHeader::new(payload_len, *sequence_id);
            self.buf[self.start..payload_start].copy_from_slice(header.as_bytes());
            *sequence_id = sequence_id.wrapping_add(1);
        } else {
            let payload = self.buf.split_off(payload_start);
            self.buf.truncate(self.start);
            write_packets(self.buf, &payload, sequence_id);
        }
    }
}

/// Read exactly `buf.len()` bytes, reporting how much arrived if the stream closes.
pub fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(Error::IncompleteRead {
                    expected: buf.len(),
                    actual: filled,
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Read one logical packet into `out`, reassembling multi-packet payloads.
///
/// `read_exact` fills its argument completely from the transport, which may
/// be a plain socket or the inflated side of a compressed stream.
pub fn read_payload<F>(mut read_exact: F, sequence_id: &mut u8, out: &mut Vec<u8>) -> Result<()>
where
    F: FnMut(&mut [u8]) -> Result<()>,
{
    out.clear();
    loop {
        let mut header = [0u8; HEADER_LEN];
        read_exact(&mut header)?;
        let header = PacketHeader::parse(&header)?;
        check_sequence(sequence_id, header.sequence_id)?;
        let len = header.length();
        let start = out.len();
        out.resize(start + len, 0);
        read_exact(&mut out[start..])?;
        if len < MAX_PAYLOAD_LEN {
            return Ok(());
        }
    }
}
