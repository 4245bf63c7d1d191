//! Async transport for tokio: TCP or TLS, optionally carrying compressed frames.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
#[cfg(feature = "tokio-tls")]
use tokio_native_tls::TlsStream;
use tracing::trace;

use crate::buffer_set::BufferSet;
use crate::constant::MAX_PAYLOAD_LEN;
use crate::error::{Error, Result};
use crate::protocol::compress::{COMPRESSED_HEADER_LEN, CompressedHeader, CompressionState};
use crate::protocol::packet::{HEADER_LEN, PacketHeader, check_sequence};

pub enum Stream {
    Tcp(BufReader<TcpStream>),
    #[cfg(feature = "tokio-tls")]
    Tls(BufReader<TlsStream<TcpStream>>),
}

/// Map an early EOF from `read_exact` to `IncompleteRead`.
fn read_error(err: std::io::Error, expected: usize) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::IncompleteRead {
            expected,
            actual: 0,
        }
    } else {
        Error::Io(err)
    }
}

impl Stream {
    pub fn tcp(stream: TcpStream) -> Self {
        Self::Tcp(BufReader::new(stream))
    }

    fn buffered(&self) -> bool {
        match self {
            Stream::Tcp(r) => !r.buffer().is_empty(),
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(r) => !r.buffer().is_empty(),
        }
    }

    async fn fill_buf(&mut self) -> std::io::Result<usize> {
        match self {
            Stream::Tcp(r) => r.fill_buf().await.map(<[u8]>::len),
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(r) => r.fill_buf().await.map(<[u8]>::len),
        }
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let result = match self {
            Stream::Tcp(r) => r.read_exact(buf).await,
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(r) => r.read_exact(buf).await,
        };
        result.map(|_| ()).map_err(|e| read_error(e, buf.len()))
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().write_all(buf).await,
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(r) => r.get_mut().write_all(buf).await,
        }
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().flush().await,
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(r) => r.get_mut().flush().await,
        }
    }

    /// Upgrade a plain TCP stream to TLS.
    #[cfg(feature = "tokio-tls")]
    pub async fn upgrade_to_tls(self, host: &str) -> Result<Self> {
        let Stream::Tcp(reader) = self else {
            return Err(Error::InvalidUsage("stream is already TLS".into()));
        };
        let connector = tokio_native_tls::TlsConnector::from(native_tls::TlsConnector::new()?);
        let tls = connector.connect(host, reader.into_inner()).await?;
        Ok(Stream::Tls(BufReader::new(tls)))
    }

    pub fn is_tls(&self) -> bool {
        !matches!(self, Stream::Tcp(_))
    }
}

/// Packet-level stream: framing, optional compression and timeouts.
pub struct PacketStream {
    stream: Stream,
    compression: Option<CompressionState>,
    frame: Vec<u8>,
    wire: Vec<u8>,
    trace: bool,
}

impl PacketStream {
    pub fn new(stream: Stream, trace: bool) -> Self {
        Self {
            stream,
            compression: None,
            frame: Vec::new(),
            wire: Vec::new(),
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

    #[cfg(feature = "tokio-tls")]
    pub async fn upgrade_to_tls(self, host: &str) -> Result<Self> {
        Ok(Self {
            stream: self.stream.upgrade_to_tls(host).await?,
            ..self
        })
    }

    fn has_pending_input(&self) -> bool {
        self.stream.buffered()
            || self
                .compression
                .as_ref()
                .is_some_and(CompressionState::has_inflated)
    }

    /// Fill `buf` from the logical (decompressed) byte stream.
    async fn read_exact_logical(&mut self, buf: &mut [u8]) -> Result<()> {
        let Some(state) = &mut self.compression else {
            return self.stream.read_exact(buf).await;
        };
        let mut filled = 0;
        while filled < buf.len() {
            if state.has_inflated() {
                filled += state.take_inflated(&mut buf[filled..]);
                continue;
            }
            let mut header = [0u8; COMPRESSED_HEADER_LEN];
            self.stream.read_exact(&mut header).await?;
            let header = *CompressedHeader::parse(&header)?;
            self.frame.resize(header.compressed_length(), 0);
            self.stream.read_exact(&mut self.frame).await?;
            state.accept_frame(&header, &self.frame)?;
        }
        Ok(())
    }

    async fn read_payload(&mut self, buffer_set: &mut BufferSet) -> Result<()> {
        let out = &mut buffer_set.read_buffer;
        out.clear();
        loop {
            let mut header = [0u8; HEADER_LEN];
            self.read_exact_logical(&mut header).await?;
            let header = PacketHeader::parse(&header)?;
            check_sequence(&mut buffer_set.sequence_id, header.sequence_id)?;
            let len = header.length();
            let start = out.len();
            out.resize(start + len, 0);
            self.read_exact_logical(&mut out[start..]).await?;
            if len < MAX_PAYLOAD_LEN {
                return Ok(());
            }
        }
    }

    /// Read one logical packet into `buffer_set.read_buffer`.
    ///
    /// Waiting for the first byte is bounded by `timeout` and reported as
    /// [`Error::Timeout`]. A packet that stalls halfway is reported as
    /// [`Error::TransferTimeout`].
    pub async fn read_packet(
        &mut self,
        buffer_set: &mut BufferSet,
        timeout: Option<Duration>,
    ) -> Result<()> {
        if !self.has_pending_input() {
            let filled = match timeout {
                Some(t) => tokio::time::timeout(t, self.stream.fill_buf())
                    .await
                    .map_err(|_| Error::Timeout)?,
                None => self.stream.fill_buf().await,
            };
            if filled? == 0 {
                return Err(Error::IncompleteRead {
                    expected: HEADER_LEN,
                    actual: 0,
                });
            }
        }
        match timeout {
            Some(t) => tokio::time::timeout(t, self.read_payload(buffer_set))
                .await
                .map_err(|_| Error::TransferTimeout("read"))??,
            None => self.read_payload(buffer_set).await?,
        }
        if self.trace {
            trace!(
                len = buffer_set.read_buffer.len(),
                seq = buffer_set.sequence_id.wrapping_sub(1),
                "recv packet"
            );
        }
        Ok(())
    }

    /// Write framed packets and flush, bounded by `timeout`. Exceeding it is
    /// reported as [`Error::TransferTimeout`].
    pub async fn write_packets(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<()> {
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
        let stream = &mut self.stream;
        let write = async move {
            stream.write_all(bytes).await?;
            stream.flush().await
        };
        match timeout {
            Some(t) => tokio::time::timeout(t, write)
                .await
                .map_err(|_| Error::TransferTimeout("write"))??,
            None => write.await?,
        }
        Ok(())
    }
}
