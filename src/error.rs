//! Error types for zero-mysql.

use thiserror::Error;

/// Result type for zero-mysql operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Server error codes the client reacts to.
pub mod error_code {
    /// Server shutdown in progress
    pub const ER_SERVER_SHUTDOWN: u16 = 1053;
    /// Query execution was interrupted (KILL QUERY)
    pub const ER_QUERY_INTERRUPTED: u16 = 1317;
    /// Access denied for user
    pub const ER_ACCESS_DENIED_ERROR: u16 = 1045;
    /// Division by 0
    pub const ER_DIVISION_BY_ZERO: u16 = 1365;
    /// Password must be reset before executing this statement
    pub const ER_MUST_CHANGE_PASSWORD: u16 = 1820;
    /// Password has expired, log in with a client that supports expired passwords
    pub const ER_MUST_CHANGE_PASSWORD_LOGIN: u16 = 1862;
    /// Connection was killed
    pub const ER_CONNECTION_KILLED: u16 = 1927;
    /// Too many connections
    pub const ER_CON_COUNT_ERROR: u16 = 1040;
    /// Unknown command (e.g. COM_RESET_CONNECTION on an old server)
    pub const ER_UNKNOWN_COM_ERROR: u16 = 1047;
}

/// Error reported by the server in an ERR packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Numeric error code
    pub code: u16,
    /// 5-character SQLSTATE (`HY000` when the server sent none)
    pub sql_state: String,
    /// Human-readable message
    pub message: String,
}

impl ServerError {
    /// True for errors after which the connection (and its pool) must not be reused.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.code,
            error_code::ER_SERVER_SHUTDOWN
                | error_code::ER_MUST_CHANGE_PASSWORD
                | error_code::ER_MUST_CHANGE_PASSWORD_LOGIN
                | error_code::ER_CONNECTION_KILLED
        )
    }

    /// True when the error was caused by `KILL QUERY`.
    pub fn is_query_interrupted(&self) -> bool {
        self.code == error_code::ER_QUERY_INTERRUPTED
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ERROR {} ({}): {}", self.code, self.sql_state, self.message)
    }
}

/// Error type for zero-mysql.
#[derive(Debug, Error)]
pub enum Error {
    /// Server error response (ERR packet)
    #[error("MySQL error: {0}")]
    Server(ServerError),

    /// Protocol error (malformed packet, sequence desync, unexpected response)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream closed before a complete packet was read
    #[error("Incomplete read: expected {expected} bytes, got {actual}")]
    IncompleteRead {
        /// Bytes requested
        expected: usize,
        /// Bytes received before the stream closed
        actual: usize,
    },

    /// A read exceeded its timeout before the next packet started
    #[error("Operation timed out")]
    Timeout,

    /// A write, or a read in the middle of a packet, exceeded its timeout.
    /// The stream position is lost.
    #[error("Operation timed out during {0}")]
    TransferTimeout(&'static str),

    /// Authentication failed on the client side
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// TLS error
    #[cfg(any(feature = "sync-tls", feature = "tokio-tls"))]
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    /// Compressed frame could not be inflated or failed its checks
    #[error("Compression error: {0}")]
    Compression(String),

    /// Connection is broken and cannot be reused
    #[error("Connection is broken")]
    ConnectionBroken,

    /// No pooled connection became available within the wait timeout
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Reading or sending a LOCAL INFILE failed
    #[error("LOCAL INFILE error: {0}")]
    LocalInfile(String),

    /// Invalid usage (e.g., nested transactions)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Value decoding error
    #[error("Decode error: {0}")]
    Decode(String),
}

impl Error {
    /// Returns true if the error indicates the connection is broken and cannot be reused.
    ///
    /// Transport failures and protocol desyncs are always fatal. Server errors
    /// are fatal only for the codes in [`ServerError::is_fatal`]. Timeouts are
    /// not listed here: the drivers attempt a kill-query recovery first and
    /// mark the connection broken themselves if that fails.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_)
            | Error::IncompleteRead { .. }
            | Error::Protocol(_)
            | Error::Compression(_)
            | Error::TransferTimeout(_)
            | Error::ConnectionBroken => true,
            #[cfg(any(feature = "sync-tls", feature = "tokio-tls"))]
            Error::Tls(_) => true,
            Error::Server(err) => err.is_fatal(),
            _ => false,
        }
    }

    /// Returns true for server errors that invalidate every connection of a pool.
    pub fn is_fatal_server_error(&self) -> bool {
        matches!(self, Error::Server(err) if err.is_fatal())
    }

    /// Returns true if this is a timeout of either kind.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout | Error::TransferTimeout(_))
    }

    /// Get the server error if this is one.
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            Error::Server(err) => Some(err),
            _ => None,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sql_state(&self) -> Option<&str> {
        self.server_error().map(|err| err.sql_state.as_str())
    }

    /// Map an I/O error from a socket with timeouts into `Timeout` where applicable.
    pub(crate) fn from_io_with_timeout(err: std::io::Error) -> Self {
        if is_timeout_kind(&err) {
            Error::Timeout
        } else {
            Error::Io(err)
        }
    }

    /// Turn a socket timeout surfacing after a transfer started into
    /// [`Error::TransferTimeout`].
    pub(crate) fn during(self, what: &'static str) -> Self {
        match self {
            Error::Timeout => Error::TransferTimeout(what),
            Error::Io(err) if is_timeout_kind(&err) => Error::TransferTimeout(what),
            other => other,
        }
    }
}

fn is_timeout_kind(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

impl<Src: std::fmt::Debug, Dst: std::fmt::Debug + ?Sized>
    From<zerocopy::error::CastError<Src, Dst>> for Error
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        Error::Protocol(format!("zerocopy cast error: {err:?}"))
    }
}
