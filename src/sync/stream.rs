//! Blocking transport: TCP or TLS, optionally carrying compressed frames.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

#[cfg(feature = "sync-tls")]
use native_tls::TlsStream;
use tracing::trace;

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::protocol::compress::{COMPRESSED_HEADER_LEN, CompressedHeader, CompressionState};
use crate::protocol::packet::{HEADER_LEN, read_full, read_payload};

pub enum Stream {
    Tcp(BufReader<TcpStream>),
    #[cfg(feature = "sync-tls")]
    Tls(BufReader<TlsStream<TcpStream>>),
}

impl Stream {
    pub fn tcp(stream: TcpStream) -> Self {
        Self::Tcp(BufReader::new(stream))
    }

    fn socket(&self) -> &TcpStream {
        match self {
            Stream::Tcp(r) => r.get_ref(),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(r) => r.get_ref().get_ref(),
        }
    }

    fn buffered(&self) -> bool {
        match self {
            Stream::Tcp(r) => !r.buffer().is_empty(),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(r) => !r.buffer().is_empty(),
        }
    }

    fn fill_buf(&mut self) -> std::io::Result<usize> {
        match self {
            Stream::Tcp(r) => r.fill_buf().map(<[u8]>::len),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(r) => r.fill_buf().map(<[u8]>::len),
        }
    }

    pub fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().write_all(buf),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(r) => r.get_mut().write_all(buf),
        }
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().flush(),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(r) => r.get_mut().flush(),
        }
    }

    /// Upgrade a plain TCP stream to TLS.
    #[cfg(feature = "sync-tls")]
    pub fn upgrade_to_tls(self, host: &str) -> Result<Self> {
        let Stream::Tcp(reader) = self else {
            return Err(Error::InvalidUsage("stream is already TLS".into()));
        };
        let connector = native_tls::TlsConnector::new()?;
        let tls = connector
            .connect(host, reader.into_inner())
            .map_err(|e| match e {
                native_tls::HandshakeError::Failure(err) => Error::Tls(err),
                native_tls::HandshakeError::WouldBlock(_) => {
                    Error::Io(std::io::Error::from(std::io::ErrorKind::WouldBlock))
                }
            })?;
        Ok(Stream::Tls(BufReader::new(tls)))
    }

    pub fn is_tls(&self) -> bool {
        !matches!(self, Stream::Tcp(_))
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Tcp(r) => r.read(buf),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(r) => r.read(buf),
        }
    }
}

/// `set_read_timeout(Some(0))` is an error; clamp to the smallest usable value.
fn socket_timeout(timeout: Option<Duration>) -> Option<Duration> {
    timeout.map(|d| d.max(Duration::from_millis(1)))
}

/// Packet-level stream: framing, optional compression and timeouts.
pub struct PacketStream {
    stream: Stream,
    compression: Option<CompressionState>,
    frame: Vec<u8>,
    wire: Vec<u8>,
    read_timeout: Option<Duration>,
    trace: bool,
}

impl PacketStream {
    pub fn new(stream: Stream, trace: bool) -> Self {
        Self {
            stream,
            compression: None,
            frame: Vec::new(),
            wire: Vec::new(),
            read_timeout: None,
            trace,
        }
    }

    /// Switch to compressed frames. Called right after authentication.
    pub fn enable_compression(&mut self) {
        self.compression = Some(CompressionState::new());
    }

    pub fn is_compressed(&self) -> bool {
        self.compression.is_some()
    }

    pub fn is_tls(&self) -> bool {
        self.stream.is_tls()
    }

    #[cfg(feature = "sync-tls")]
    pub fn upgrade_to_tls(self, host: &str) -> Result<Self> {
        Ok(Self {
            stream: self.stream.upgrade_to_tls(host)?,
            ..self
        })
    }

    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.stream
            .socket()
            .set_write_timeout(socket_timeout(timeout))?;
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        if self.read_timeout != timeout {
            self.stream
                .socket()
                .set_read_timeout(socket_timeout(timeout))?;
            self.read_timeout = timeout;
        }
        Ok(())
    }

    fn has_pending_input(&self) -> bool {
        self.stream.buffered()
            || self
                .compression
                .as_ref()
                .is_some_and(CompressionState::has_inflated)
    }

    /// Fill `buf` from the logical (decompressed) byte stream.
    fn read_exact_logical(&mut self, buf: &mut [u8]) -> Result<()> {
        let Some(state) = &mut self.compression else {
            return read_full(&mut self.stream, buf);
        };
        let mut filled = 0;
        while filled < buf.len() {
            if state.has_inflated() {
                filled += state.take_inflated(&mut buf[filled..]);
                continue;
            }
            let mut header = [0u8; COMPRESSED_HEADER_LEN];
            read_full(&mut self.stream, &mut header)?;
            let header = *CompressedHeader::parse(&header)?;
            self.frame.resize(header.compressed_length(), 0);
            read_full(&mut self.stream, &mut self.frame)?;
            state.accept_frame(&header, &self.frame)?;
        }
        Ok(())
    }

    /// Read one logical packet into `buffer_set.read_buffer`.
    ///
    /// Waiting for the first byte is bounded by `timeout` and reported as
    /// [`Error::Timeout`]. Once a packet has started, a stall is reported as
    /// [`Error::TransferTimeout`]: the stream position is lost.
    pub fn read_packet(&mut self, buffer_set: &mut BufferSet, timeout: Option<Duration>) -> Result<()> {
        self.set_read_timeout(timeout)?;
        if !self.has_pending_input() {
            match self.stream.fill_buf() {
                Ok(0) => {
                    return Err(Error::IncompleteRead {
                        expected: HEADER_LEN,
                        actual: 0,
                    });
                }
                Ok(_) => {}
                Err(e) => return Err(Error::from_io_with_timeout(e)),
            }
        }
        read_payload(
            |buf| self.read_exact_logical(buf),
            &mut buffer_set.sequence_id,
            &mut buffer_set.read_buffer,
        )
        .map_err(|e| e.during("read"))?;
        if self.trace {
            trace!(
                len = buffer_set.read_buffer.len(),
                seq = buffer_set.sequence_id.wrapping_sub(1),
                "recv packet"
            );
        }
        Ok(())
    }

    /// Write framed packets and flush. A write that exceeds the write
    /// timeout is reported as [`Error::TransferTimeout`].
    pub fn write_packets(&mut self, data: &[u8]) -> Result<()> {
        if self.trace {
            trace!(len = data.len(), seq = data.get(3).copied(), "send packets");
        }
        let bytes = match &mut self.compression {
            Some(state) => {
                // a packet with sequence id 0 starts a new command
                if data.get(3) == Some(&0) {
                    state.reset_sequence();
                }
                self.wire.clear();
                state.compress(data, &mut self.wire)?;
                self.wire.as_slice()
            }
            None => data,
        };
        self.stream
            .write_all(bytes)
            .and_then(|()| self.stream.flush())
            .map_err(|e| Error::Io(e).during("write"))
    }

    pub fn shutdown(&mut self) {
        let _ = self.stream.socket().shutdown(std::net::Shutdown::Both);
    }
}
