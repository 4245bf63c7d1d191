//! Connection options.

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::buffer_pool::{BufferPool, GLOBAL_BUFFER_POOL};
use crate::constant::UTF8MB4_GENERAL_CI;
use crate::error::Error;

/// SSL connection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SslMode {
    /// Don't use SSL
    Disable,
    /// Use SSL if the server supports it and TLS support is compiled in
    #[default]
    Prefer,
    /// Require SSL connection; fail before sending credentials otherwise
    Require,
}

/// Connection options for MySQL.
#[derive(Debug, Clone)]
pub struct Opts {
    /// Hostname or IP address.
    ///
    /// Default: `""`
    pub host: String,

    /// Port number for the MySQL server.
    ///
    /// Default: `3306`
    pub port: u16,

    /// Username for authentication.
    ///
    /// Default: `""`
    pub user: String,

    /// Password for authentication.
    ///
    /// Default: `None`
    pub password: Option<String>,

    /// Initial database.
    ///
    /// Default: `None`
    pub database: Option<String>,

    /// SSL connection mode.
    ///
    /// Default: `SslMode::Prefer`
    pub ssl_mode: SslMode,

    /// Negotiate zlib compression (`CLIENT_COMPRESS`).
    ///
    /// Default: `false`
    pub compress: bool,

    /// Timeout for establishing the TCP connection.
    ///
    /// Default: `Some(15s)`
    pub connect_timeout: Option<Duration>,

    /// Command timeout: how long to wait for a server response. On expiry the
    /// running statement is killed through a second connection.
    ///
    /// Default: `None`
    pub read_timeout: Option<Duration>,

    /// Timeout for socket writes.
    ///
    /// Default: `None`
    pub write_timeout: Option<Duration>,

    /// Connection collation id.
    ///
    /// Default: `45` (utf8mb4_general_ci)
    pub charset: u8,

    /// Auth plugin used for the first response instead of the server default.
    ///
    /// Default: `None`
    pub auth_plugin: Option<String>,

    /// Allow several statements in one COM_QUERY.
    ///
    /// Default: `true`
    pub multi_statements: bool,

    /// Serve `LOAD DATA LOCAL INFILE` requests from the local file system.
    ///
    /// Default: `false`
    pub allow_local_infile: bool,

    /// Allow `mysql_clear_password` over an unencrypted connection.
    ///
    /// Default: `false`
    pub allow_cleartext_password: bool,

    /// Send client connection attributes in the handshake.
    ///
    /// Default: `true`
    pub connection_attrs: bool,

    /// Return connections to a pool on drop. When false, pooled connections are
    /// closed on release.
    ///
    /// Default: `true`
    pub pooling: bool,

    /// Connections opened by `Pool::warm_up` and kept through idle pruning.
    ///
    /// Default: `0`
    pub pool_min_size: usize,

    /// Maximum number of open connections per pool.
    ///
    /// Default: `100`
    pub pool_max_size: usize,

    /// Maximum number of idle connections in the pool.
    ///
    /// Default: `100`
    pub pool_max_idle: usize,

    /// Connections older than this are closed instead of reused.
    ///
    /// Default: `None`
    pub connection_lifetime: Option<Duration>,

    /// Idle connections unused for longer than this are pruned.
    ///
    /// Default: `180s`
    pub connection_idle_timeout: Duration,

    /// Reset session state (COM_RESET_CONNECTION) when a connection returns to the pool.
    ///
    /// Default: `true`
    pub connection_reset: bool,

    /// How long `Pool::get` waits for a connection.
    ///
    /// Default: `15s`
    pub pool_timeout: Duration,

    /// Capacity of the per-connection result cache.
    ///
    /// Default: `64`
    pub result_cache_capacity: usize,

    /// Emit a `trace!` line per packet.
    ///
    /// Default: `false`
    pub trace_protocol: bool,

    /// Buffer pool for reusing buffers across connections.
    ///
    /// Default: the global buffer pool
    pub buffer_pool: Arc<BufferPool>,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 3306,
            user: String::new(),
            password: None,
            database: None,
            ssl_mode: SslMode::Prefer,
            compress: false,
            connect_timeout: Some(Duration::from_secs(15)),
            read_timeout: None,
            write_timeout: None,
            charset: UTF8MB4_GENERAL_CI,
            auth_plugin: None,
            multi_statements: true,
            allow_local_infile: false,
            allow_cleartext_password: false,
            connection_attrs: true,
            pooling: true,
            pool_min_size: 0,
            pool_max_size: 100,
            pool_max_idle: 100,
            connection_lifetime: None,
            connection_idle_timeout: Duration::from_secs(180),
            connection_reset: true,
            pool_timeout: Duration::from_secs(15),
            result_cache_capacity: 64,
            trace_protocol: false,
            buffer_pool: Arc::clone(&GLOBAL_BUFFER_POOL),
        }
    }
}

/// Pool identity: the options that change what a physical connection is.
///
/// Logging, timeouts and pool sizing are left out, so two `Opts` that differ
/// only in those share a pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    host: String,
    port: u16,
    user: String,
    password: Option<String>,
    database: Option<String>,
    ssl_mode: SslMode,
    compress: bool,
    charset: u8,
    auth_plugin: Option<String>,
    multi_statements: bool,
    allow_local_infile: bool,
    allow_cleartext_password: bool,
    connection_attrs: bool,
}

impl Opts {
    /// Derive the pool identity.
    pub fn pool_key(&self) -> PoolKey {
        PoolKey {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            ssl_mode: self.ssl_mode,
            compress: self.compress,
            charset: self.charset,
            auth_plugin: self.auth_plugin.clone(),
            multi_statements: self.multi_statements,
            allow_local_infile: self.allow_local_infile,
            allow_cleartext_password: self.allow_cleartext_password,
            connection_attrs: self.connection_attrs,
        }
    }

    /// Idle connections kept by the pool (0 when pooling is off).
    pub fn effective_max_idle(&self) -> usize {
        if self.pooling {
            self.pool_max_idle.min(self.pool_max_size)
        } else {
            0
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Error> {
    match value {
        "true" | "True" | "1" | "yes" | "on" => Ok(true),
        "false" | "False" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidUsage(format!("Invalid {}: {}", key, value))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, Error> {
    value
        .parse()
        .map_err(|_| Error::InvalidUsage(format!("Invalid {}: {}", key, value)))
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, Error> {
    parse_number::<u64>(key, value).map(Duration::from_secs)
}

/// 0 disables the timeout.
fn parse_optional_secs(key: &str, value: &str) -> Result<Option<Duration>, Error> {
    let secs = parse_number::<u64>(key, value)?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

impl TryFrom<&Url> for Opts {
    type Error = Error;

    /// Parse a MySQL connection URL.
    ///
    /// Format: `mysql://[user[:password]@]host[:port][/database][?param1=value1&param2=value2&..]`
    ///
    /// Supported query parameters (durations in seconds, 0 = none):
    /// - `sslmode`: disable, prefer, require
    /// - `compress`, `multi_statements`, `allow_local_infile`,
    ///   `allow_cleartext_password`, `connection_attrs`, `pooling`,
    ///   `connection_reset`, `trace_protocol`: true/True/1/yes/on or false/False/0/no/off
    /// - `connect_timeout`, `read_timeout`, `write_timeout`, `connection_lifetime`
    /// - `connection_idle_timeout`, `pool_timeout`
    /// - `charset`: collation id
    /// - `auth_plugin`: plugin name
    /// - `pool_min_size`, `pool_max_size`, `pool_max_idle`, `result_cache_capacity`
    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if !["mysql", "mariadb"].contains(&url.scheme()) {
            return Err(Error::InvalidUsage(format!(
                "Invalid scheme: expected 'mysql://' or 'mariadb://', got '{}://'",
                url.scheme()
            )));
        }

        let mut opts = Opts {
            host: url.host_str().unwrap_or("localhost").to_string(),
            port: url.port().unwrap_or(3306),
            user: url.username().to_string(),
            password: url.password().map(|s| s.to_string()),
            database: url.path().strip_prefix('/').and_then(|s| {
                if s.is_empty() {
                    None
                } else {
                    Some(s.to_string())
                }
            }),
            ..Opts::default()
        };

        for (key, value) in url.query_pairs() {
            let key = key.as_ref();
            let value = value.as_ref();
            match key {
                "sslmode" => {
                    opts.ssl_mode = match value {
                        "disable" => SslMode::Disable,
                        "prefer" => SslMode::Prefer,
                        "require" => SslMode::Require,
                        _ => {
                            return Err(Error::InvalidUsage(format!(
                                "Invalid sslmode: expected one of ['disable', 'prefer', 'require'], got {}",
                                value
                            )));
                        }
                    };
                }
                "compress" => opts.compress = parse_bool(key, value)?,
                "multi_statements" => opts.multi_statements = parse_bool(key, value)?,
                "allow_local_infile" => opts.allow_local_infile = parse_bool(key, value)?,
                "allow_cleartext_password" => {
                    opts.allow_cleartext_password = parse_bool(key, value)?;
                }
                "connection_attrs" => opts.connection_attrs = parse_bool(key, value)?,
                "pooling" => opts.pooling = parse_bool(key, value)?,
                "connection_reset" => opts.connection_reset = parse_bool(key, value)?,
                "trace_protocol" => opts.trace_protocol = parse_bool(key, value)?,
                "connect_timeout" => opts.connect_timeout = parse_optional_secs(key, value)?,
                "read_timeout" => opts.read_timeout = parse_optional_secs(key, value)?,
                "write_timeout" => opts.write_timeout = parse_optional_secs(key, value)?,
                "connection_lifetime" => {
                    opts.connection_lifetime = parse_optional_secs(key, value)?;
                }
                "connection_idle_timeout" => {
                    opts.connection_idle_timeout = parse_secs(key, value)?;
                }
                "pool_timeout" => opts.pool_timeout = parse_secs(key, value)?,
                "charset" => opts.charset = parse_number(key, value)?,
                "auth_plugin" => opts.auth_plugin = Some(value.to_string()),
                "pool_min_size" => opts.pool_min_size = parse_number(key, value)?,
                "pool_max_size" => opts.pool_max_size = parse_number(key, value)?,
                "pool_max_idle" => opts.pool_max_idle = parse_number(key, value)?,
                "result_cache_capacity" => opts.result_cache_capacity = parse_number(key, value)?,
                _ => {
                    return Err(Error::InvalidUsage(format!(
                        "Unknown connection option: {}",
                        key
                    )));
                }
            }
        }

        if opts.pool_max_size == 0 {
            return Err(Error::InvalidUsage("pool_max_size must be positive".into()));
        }
        if opts.pool_min_size > opts.pool_max_size {
            return Err(Error::InvalidUsage(
                "pool_min_size must not exceed pool_max_size".into(),
            ));
        }

        Ok(opts)
    }
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let url = Url::parse(s).map_err(|e| Error::InvalidUsage(format!("Invalid URL: {}", e)))?;
        Self::try_from(&url)
    }
}
