//! Compressed transport.
//!
//! When `CLIENT_COMPRESS` is negotiated, the packet stream is carried inside
//! compressed frames with a 7-byte header:
//!
//! ```text
//! [compressed length: 3][sequence id: 1][uncompressed length: 3][body]
//! ```
//!
//! An uncompressed length of zero means the body is sent as-is. Otherwise the
//! body is a zlib stream (`0x78 0x9c` header, deflate data, Adler-32 trailer).
//! Frames have their own sequence counter, restarted with every command.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::constant::MAX_PAYLOAD_LEN;
use crate::error::{Error, Result};

/// Size of the compressed frame header.
pub const COMPRESSED_HEADER_LEN: usize = 7;

/// Payloads shorter than this are never compressed.
pub const MIN_COMPRESS_LENGTH: usize = 50;

/// Compressed frame header (7 bytes).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct CompressedHeader {
    /// Length of the frame body on the wire
    pub compressed_length: [u8; 3],
    /// Frame sequence id
    pub sequence_id: u8,
    /// Length after inflating, 0 if the body is not compressed
    pub uncompressed_length: [u8; 3],
}

fn u24(bytes: [u8; 3]) -> usize {
    usize::from(bytes[0]) | (usize::from(bytes[1]) << 8) | (usize::from(bytes[2]) << 16)
}

fn le24(value: usize) -> [u8; 3] {
    let b = (value as u32).to_le_bytes();
    [b[0], b[1], b[2]]
}

impl CompressedHeader {
    /// Build a frame header.
    pub fn new(compressed_length: usize, sequence_id: u8, uncompressed_length: usize) -> Self {
        Self {
            compressed_length: le24(compressed_length),
            sequence_id,
            uncompressed_length: le24(uncompressed_length),
        }
    }

    /// Parse a header from exactly seven bytes.
    pub fn parse(bytes: &[u8]) -> Result<&Self> {
        Ok(Self::ref_from_bytes(bytes)?)
    }

    /// Body length on the wire.
    pub fn compressed_length(&self) -> usize {
        u24(self.compressed_length)
    }

    /// Inflated length (0 = body not compressed).
    pub fn uncompressed_length(&self) -> usize {
        u24(self.uncompressed_length)
    }
}

/// Append one frame carrying `chunk` to `out`.
fn write_frame(out: &mut Vec<u8>, chunk: &[u8], sequence_id: u8) -> Result<()> {
    if chunk.len() >= MIN_COMPRESS_LENGTH {
        let mut encoder = ZlibEncoder::new(
            Vec::with_capacity(chunk.len() / 2),
            Compression::default(),
        );
        encoder
            .write_all(chunk)
            .map_err(|e| Error::Compression(format!("deflate failed: {e}")))?;
        let compressed = encoder
            .finish()
            .map_err(|e| Error::Compression(format!("deflate failed: {e}")))?;
        if compressed.len() < chunk.len() {
            out.extend_from_slice(
                CompressedHeader::new(compressed.len(), sequence_id, chunk.len()).as_bytes(),
            );
            out.extend_from_slice(&compressed);
            return Ok(());
        }
    }
    out.extend_from_slice(CompressedHeader::new(chunk.len(), sequence_id, 0).as_bytes());
    out.extend_from_slice(chunk);
    Ok(())
}

/// Wrap `data` (already framed packets) into compressed frames appended to `out`.
pub fn compress_frames(data: &[u8], sequence_id: &mut u8, out: &mut Vec<u8>) -> Result<()> {
    for chunk in data.chunks(MAX_PAYLOAD_LEN) {
        write_frame(out, chunk, *sequence_id)?;
        *sequence_id = sequence_id.wrapping_add(1);
    }
    Ok(())
}

/// Decode a frame body, appending the protocol bytes it carries to `out`.
///
/// Any inflate failure, Adler-32 mismatch or length mismatch is an error;
/// nothing is appended in that case.
pub fn decompress_frame(header: &CompressedHeader, body: &[u8], out: &mut Vec<u8>) -> Result<()> {
    if body.len() != header.compressed_length() {
        return Err(Error::Compression(format!(
            "frame body length {} does not match header {}",
            body.len(),
            header.compressed_length()
        )));
    }

    let expected = header.uncompressed_length();
    if expected == 0 {
        out.extend_from_slice(body);
        return Ok(());
    }

    check_zlib_header(body)?;

    let start = out.len();
    out.reserve(expected);
    let mut decoder = ZlibDecoder::new(body);
    if let Err(e) = decoder.read_to_end(out) {
        out.truncate(start);
        return Err(Error::Compression(format!("inflate failed: {e}")));
    }
    let actual = out.len() - start;
    if actual != expected {
        out.truncate(start);
        return Err(Error::Compression(format!(
            "inflated length {} does not match header {}",
            actual, expected
        )));
    }
    Ok(())
}

/// Validate the 2-byte zlib header (CM = deflate, FCHECK, no preset dictionary).
fn check_zlib_header(body: &[u8]) -> Result<()> {
    let [cmf, flg, ..] = body else {
        return Err(Error::Compression("frame body shorter than zlib header".into()));
    };
    if cmf & 0x0F != 8 || (u16::from(*cmf) * 256 + u16::from(*flg)) % 31 != 0 || flg & 0x20 != 0 {
        return Err(Error::Compression(format!(
            "invalid zlib header {:#04x} {:#04x}",
            cmf, flg
        )));
    }
    Ok(())
}

/// Per-connection compression state shared by the sync and async streams.
///
/// Outgoing packets are framed as soon as they are written, so nothing is
/// ever left unsent when a connection closes. Incoming frames are inflated
/// into a buffer the packet reader consumes from.
#[derive(Debug, Default)]
pub struct CompressionState {
    sequence_id: u8,
    inflated: Vec<u8>,
    pos: usize,
}

impl CompressionState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart the frame sequence (start of a command).
    pub fn reset_sequence(&mut self) {
        self.sequence_id = 0;
    }

    /// Compress framed packets into frames appended to `out`.
    pub fn compress(&mut self, data: &[u8], out: &mut Vec<u8>) -> Result<()> {
        compress_frames(data, &mut self.sequence_id, out)
    }

    /// True if inflated bytes remain to be consumed.
    pub fn has_inflated(&self) -> bool {
        self.pos < self.inflated.len()
    }

    /// Copy inflated bytes into `buf`, returning how many were copied.
    pub fn take_inflated(&mut self, buf: &mut [u8]) -> usize {
        let available = &self.inflated[self.pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        if self.pos == self.inflated.len() {
            self.inflated.clear();
            self.pos = 0;
        }
        n
    }

    /// Accept a frame read from the socket.
    pub fn accept_frame(&mut self, header: &CompressedHeader, body: &[u8]) -> Result<()> {
        if header.sequence_id != self.sequence_id {
            return Err(Error::Protocol(format!(
                "compressed sequence mismatch: expected {}, got {}",
                self.sequence_id, header.sequence_id
            )));
        }
        self.sequence_id = self.sequence_id.wrapping_add(1);
        if self.pos > 0 {
            self.inflated.drain(..self.pos);
            self.pos = 0;
        }
        decompress_frame(header, body, &mut self.inflated)
    }
}
