//! Asynchronous MySQL connection.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::buffer_pool::PooledBufferSet;
use crate::buffer_set::BufferSet;
use crate::cache::{CachedResult, ResultCache};
use crate::constant::LOCAL_INFILE_CHUNK;
use crate::conversion::{FromRow, ToParams};
use crate::error::{Error, Result, error_code};
use crate::handler::{BinaryHandler, CollectHandler, DropHandler, FirstRowHandler, TextHandler};
use crate::opts::Opts;
use crate::protocol::command::{write_execute, write_query};
use crate::protocol::packet::write_packets;
use crate::protocol::response::OkPacket;
use crate::protocol::server_version::{Feature, ServerFeatures};
use crate::state::command::CommandStateMachine;
use crate::state::connection::{ConnectionStateMachine, ServerInfo};
use crate::state::execute::ExecuteStateMachine;
use crate::state::prepare::PrepareStateMachine;
use crate::state::query::QueryStateMachine;
use crate::state::result::{ResultEvent, ResultSetDecoder};
use crate::state::{Action, StateMachine};
use crate::statement::{IntoStatement, PreparedStatement};
use crate::timeout::CommandTimeout;

use super::result::QueryResult;
use super::stream::{PacketStream, Stream};
use super::transaction::Transaction;

async fn connect_tcp(opts: &Opts) -> Result<TcpStream> {
    let addr = (opts.host.as_str(), opts.port);
    match opts.connect_timeout {
        Some(timeout) => tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(Error::from_io_with_timeout),
        None => TcpStream::connect(addr)
            .await
            .map_err(Error::from_io_with_timeout),
    }
}

/// Asynchronous MySQL connection.
pub struct Conn {
    stream: PacketStream,
    buffer_set: PooledBufferSet,
    opts: Opts,
    info: ServerInfo,
    secure: bool,
    command_timeout: CommandTimeout,
    cache: ResultCache,
    /// Result stream dropped before its end, drained before the next command
    pending_result: Option<ResultSetDecoder>,
    created_at: Instant,
    is_broken: bool,
    fatal_server_error: bool,
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("connection_id", &self.info.connection_id)
            .field("server_version", &self.info.server_version)
            .field("host", &self.opts.host)
            .field("is_broken", &self.is_broken)
            .finish_non_exhaustive()
    }
}

impl Conn {
    /// Connect to a MySQL server.
    #[allow(unused_mut)]
    pub async fn new<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts = opts.try_into()?;
        if opts.host.is_empty() {
            return Err(Error::InvalidUsage("host is empty".into()));
        }

        let tcp = connect_tcp(&opts).await?;
        tcp.set_nodelay(true)?;
        let mut stream = PacketStream::new(Stream::tcp(tcp), opts.trace_protocol);

        let mut buffer_set = opts.buffer_pool.get_buffer_set();
        let mut state_machine =
            ConnectionStateMachine::new(&mut buffer_set, opts.clone(), cfg!(feature = "tokio-tls"));

        loop {
            match state_machine.step(&mut buffer_set)? {
                Action::ReadPacket => {
                    stream.read_packet(&mut buffer_set, opts.connect_timeout).await?;
                }
                Action::WriteAndReadPacket => {
                    stream
                        .write_packets(&buffer_set.write_buffer, opts.write_timeout)
                        .await?;
                    stream.read_packet(&mut buffer_set, opts.connect_timeout).await?;
                }
                Action::WritePacket => {
                    stream
                        .write_packets(&buffer_set.write_buffer, opts.write_timeout)
                        .await?;
                }
                Action::TlsHandshake => {
                    stream
                        .write_packets(&buffer_set.write_buffer, opts.write_timeout)
                        .await?;
                    #[cfg(feature = "tokio-tls")]
                    {
                        stream = stream.upgrade_to_tls(&opts.host).await?;
                    }
                    #[cfg(not(feature = "tokio-tls"))]
                    {
                        return Err(Error::Unsupported(
                            "TLS requested but tokio-tls feature not enabled".into(),
                        ));
                    }
                }
                Action::SendLocalInfile(_) => {
                    return Err(Error::Protocol("LOCAL INFILE request during handshake".into()));
                }
                Action::Finished => break,
            }
        }

        let info = state_machine
            .take_info()
            .ok_or_else(|| Error::Protocol("handshake finished without server info".into()))?;
        debug!(
            connection_id = info.connection_id,
            server_version = %info.server_version,
            plugin = info.auth_plugin.name(),
            tls = stream.is_tls(),
            "connected"
        );
        if info.compression() {
            debug!(connection_id = info.connection_id, "compression negotiated");
            stream.enable_compression();
        }

        Ok(Self {
            stream,
            buffer_set,
            cache: ResultCache::new(opts.result_cache_capacity),
            secure: state_machine.is_secure(),
            opts,
            info,
            command_timeout: CommandTimeout::default(),
            pending_result: None,
            created_at: Instant::now(),
            is_broken: false,
            fatal_server_error: false,
        })
    }

    /// Ask the server to abort the statement running on connection `connection_id`.
    ///
    /// Opens a short-lived side connection with `opts` and issues `KILL QUERY`.
    pub fn kill_query(
        opts: &Opts,
        connection_id: u32,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut side_opts = opts.clone();
            side_opts.read_timeout = opts.connect_timeout;
            side_opts.compress = false;
            side_opts.result_cache_capacity = 0;
            let mut side = Conn::new(side_opts).await?;
            debug!(connection_id, side = side.connection_id(), "kill query");
            side.query_drop(&format!("KILL QUERY {}", connection_id))
                .await?;
            side.close().await
        })
    }

    /// Get the connection ID (server thread id).
    pub fn connection_id(&self) -> u32 {
        self.info.connection_id
    }

    /// Server version string from the greeting.
    pub fn server_version(&self) -> &str {
        &self.info.server_version
    }

    /// Version-derived server features.
    pub fn server_features(&self) -> ServerFeatures {
        self.info.features
    }

    /// Negotiated connection state.
    pub fn server_info(&self) -> &ServerInfo {
        &self.info
    }

    /// Options this connection was opened with.
    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    /// Check if currently in a transaction.
    pub fn in_transaction(&self) -> bool {
        self.info.status_flags.in_transaction()
    }

    /// Check if the connection is broken.
    pub fn is_broken(&self) -> bool {
        self.is_broken
    }

    pub(crate) fn saw_fatal_server_error(&self) -> bool {
        self.fatal_server_error
    }

    /// When the connection was opened.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Run `f` with a command timeout.
    ///
    /// While the timeout is active, timeouts requested by nested calls are
    /// ignored. A read that exceeds it kills the running query through a side
    /// connection and returns [`Error::Timeout`].
    pub async fn with_command_timeout<T>(
        &mut self,
        timeout: Option<Duration>,
        f: impl AsyncFnOnce(&mut Conn) -> Result<T>,
    ) -> Result<T> {
        let installed = self.command_timeout.enter(timeout);
        let result = f(self).await;
        self.command_timeout.exit(installed);
        result
    }

    // === Driver internals ===

    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_connection_broken() {
                self.is_broken = true;
            }
            if e.is_fatal_server_error() {
                self.fatal_server_error = true;
            }
        }
        result
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.is_broken {
            return Err(Error::ConnectionBroken);
        }
        Ok(())
    }

    /// Check the connection and drain a result stream dropped before its end.
    async fn ensure_ready(&mut self) -> Result<()> {
        self.ensure_usable()?;
        self.finish_pending_result().await
    }

    /// Keep an unfinished result for draining before the next command.
    pub(super) fn park_result(&mut self, decoder: ResultSetDecoder) {
        self.pending_result = Some(decoder);
    }

    /// True if a dropped result stream still has unread responses.
    pub fn has_pending_result(&self) -> bool {
        self.pending_result.is_some()
    }

    /// Read and discard the rest of a result stream that was dropped early.
    pub(crate) async fn finish_pending_result(&mut self) -> Result<()> {
        let Some(mut decoder) = self.pending_result.take() else {
            return Ok(());
        };
        debug!(connection_id = self.info.connection_id, "draining unfinished result");
        let timeout = self.command_read_timeout();
        match self.drain_result(&mut decoder, timeout).await {
            Ok(()) => Ok(()),
            Err(Error::Timeout) => {
                if let Some(e) = self.kill_running_query().await {
                    return Err(e);
                }
                let drained = self.drain_result(&mut decoder, None).await;
                Err(self.finish_recovery(drained).await)
            }
            Err(e) => {
                self.is_broken = true;
                Err(e)
            }
        }
    }

    /// Read and discard the rest of a command's response.
    pub(super) async fn drain_result(
        &mut self,
        decoder: &mut ResultSetDecoder,
        timeout: Option<Duration>,
    ) -> Result<()> {
        while !decoder.is_done() {
            self.read_packet(timeout).await?;
            match decoder.on_packet(&mut self.buffer_set) {
                Ok(ResultEvent::LocalInfile(file_name)) => {
                    self.send_local_infile(&file_name).await?;
                }
                Ok(ResultEvent::ResultEnd(ok)) => self.set_status(&ok),
                Ok(_) => {}
                // ERR ends the command
                Err(Error::Server(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub(super) fn buffer_set(&self) -> &BufferSet {
        &self.buffer_set
    }

    pub(super) fn buffer_set_mut(&mut self) -> &mut BufferSet {
        &mut self.buffer_set
    }

    pub(super) fn mark_broken(&mut self) {
        self.is_broken = true;
    }

    pub(super) fn set_status(&mut self, ok: &OkPacket) {
        self.info.status_flags = ok.status_flags;
    }

    pub(super) fn command_read_timeout(&self) -> Option<Duration> {
        self.command_timeout.effective(self.opts.read_timeout)
    }

    pub(super) async fn read_packet(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.stream.read_packet(&mut self.buffer_set, timeout).await
    }

    pub(super) async fn write_buffered(&mut self) -> Result<()> {
        self.stream
            .write_packets(&self.buffer_set.write_buffer, self.opts.write_timeout)
            .await
    }

    async fn write_data_packet(&mut self, data: &[u8]) -> Result<()> {
        let buffer_set = &mut *self.buffer_set;
        buffer_set.write_buffer.clear();
        write_packets(&mut buffer_set.write_buffer, data, &mut buffer_set.sequence_id);
        self.stream
            .write_packets(&buffer_set.write_buffer, self.opts.write_timeout)
            .await
    }

    /// Answer a LOCAL INFILE request.
    ///
    /// The terminating empty packet is always sent so the exchange stays in
    /// step. A refused or unreadable file is returned as `Ok(Some(error))`;
    /// only transport failures are `Err`.
    pub(super) async fn send_local_infile(&mut self, file_name: &str) -> Result<Option<Error>> {
        let mut refused = None;
        if !self.opts.allow_local_infile {
            refused = Some(Error::LocalInfile(format!(
                "local infile is disabled, refusing to send {}",
                file_name
            )));
        } else {
            match tokio::fs::File::open(file_name).await {
                Ok(mut file) => {
                    let mut chunk = vec![0u8; LOCAL_INFILE_CHUNK];
                    loop {
                        let n = match file.read(&mut chunk).await {
                            Ok(0) => break,
                            Ok(n) => n,
                            Err(e) => {
                                refused = Some(Error::LocalInfile(format!("{}: {}", file_name, e)));
                                break;
                            }
                        };
                        self.write_data_packet(&chunk[..n]).await?;
                    }
                }
                Err(e) => {
                    refused = Some(Error::LocalInfile(format!("{}: {}", file_name, e)));
                }
            }
        }
        self.write_data_packet(&[]).await?;
        Ok(refused)
    }

    /// Drive a state machine to completion with reads bounded by `timeout`.
    async fn drive_with<S: StateMachine>(
        &mut self,
        sm: &mut S,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let mut infile_error = None;
        loop {
            match sm.step(&mut self.buffer_set)? {
                Action::ReadPacket => self.read_packet(timeout).await?,
                Action::WriteAndReadPacket => {
                    self.write_buffered().await?;
                    self.read_packet(timeout).await?;
                }
                Action::WritePacket => self.write_buffered().await?,
                Action::TlsHandshake => {
                    return Err(Error::Protocol("unexpected TLS upgrade request".into()));
                }
                Action::SendLocalInfile(file_name) => {
                    if let Some(e) = self.send_local_infile(&file_name).await? {
                        infile_error.get_or_insert(e);
                    }
                    self.read_packet(timeout).await?;
                }
                Action::Finished => break,
            }
        }
        match infile_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drive a command, recovering from a command timeout.
    async fn drive<S: StateMachine>(&mut self, sm: &mut S) -> Result<()> {
        let timeout = self.command_read_timeout();
        match self.drive_with(sm, timeout).await {
            Err(Error::Timeout) => {
                if let Some(e) = self.kill_running_query().await {
                    return Err(e);
                }
                let finished = match self.read_packet(None).await {
                    Ok(()) => self.drive_with(sm, None).await,
                    Err(e) => Err(e),
                };
                Err(self.finish_recovery(finished).await)
            }
            result => result,
        }
    }

    /// First half of timeout recovery: kill the running query through a
    /// side connection. Returns the error to report if that failed.
    pub(super) async fn kill_running_query(&mut self) -> Option<Error> {
        let connection_id = self.info.connection_id;
        debug!(connection_id, "command timed out, killing query");
        match Conn::kill_query(&self.opts, connection_id).await {
            Ok(()) => None,
            Err(e) => {
                warn!(connection_id, error = %e, "kill query failed");
                self.is_broken = true;
                Some(Error::Timeout)
            }
        }
    }

    /// Second half of timeout recovery, after the interrupted response was
    /// consumed: clear the server's kill flag with `DO 0`.
    pub(super) async fn finish_recovery(&mut self, finished: Result<()>) -> Error {
        if let Err(e) = finished
            && e.is_connection_broken()
        {
            self.is_broken = true;
            return e;
        }
        let mut handler = DropHandler::new();
        let mut sm = QueryStateMachine::new(&mut self.buffer_set, &mut handler, "DO 0");
        match self.drive_with(&mut sm, None).await {
            Ok(()) => Error::Timeout,
            Err(Error::Server(e)) if e.code == error_code::ER_QUERY_INTERRUPTED => Error::Timeout,
            Err(e) => {
                warn!(connection_id = self.info.connection_id, error = %e, "could not clear kill flag");
                self.is_broken = true;
                e
            }
        }
    }

    // === Text protocol ===

    /// Execute a text query with a handler.
    pub async fn query<H: TextHandler>(&mut self, sql: &str, handler: &mut H) -> Result<()> {
        let result = self.query_inner(sql, handler).await;
        self.check(result)
    }

    async fn query_inner<H: TextHandler>(&mut self, sql: &str, handler: &mut H) -> Result<()> {
        self.ensure_ready().await?;
        let mut state_machine = QueryStateMachine::new(&mut self.buffer_set, handler, sql);
        self.drive(&mut state_machine).await?;
        let ok = state_machine.last_ok();
        self.set_status(&ok);
        Ok(())
    }

    /// Execute a text query and discard results. Returns the affected rows of the last result.
    pub async fn query_drop(&mut self, sql: &str) -> Result<u64> {
        let mut handler = DropHandler::new();
        self.query(sql, &mut handler).await?;
        Ok(handler.rows_affected())
    }

    /// Execute a text query and collect typed rows.
    pub async fn query_collect<T: for<'a> FromRow<'a>>(&mut self, sql: &str) -> Result<Vec<T>> {
        let mut handler = CollectHandler::<T>::new();
        self.query(sql, &mut handler).await?;
        Ok(handler.into_rows())
    }

    /// Execute a text query and return the first typed row.
    pub async fn query_first<T: for<'a> FromRow<'a>>(&mut self, sql: &str) -> Result<Option<T>> {
        let mut handler = FirstRowHandler::<T>::new();
        self.query(sql, &mut handler).await?;
        Ok(handler.into_row())
    }

    /// Execute a text query and stream its rows.
    ///
    /// A stream dropped before its end is drained when the connection runs
    /// its next command.
    pub async fn query_iter(&mut self, sql: &str) -> Result<QueryResult<'_>> {
        let result = self.send_query(sql).await;
        self.check(result)?;
        QueryResult::start(self, false).await
    }

    async fn send_query(&mut self, sql: &str) -> Result<()> {
        self.ensure_ready().await?;
        let buffer_set = &mut *self.buffer_set;
        buffer_set.start_command();
        write_query(&mut buffer_set.write_buffer, &mut buffer_set.sequence_id, sql);
        self.write_buffered().await
    }

    /// Return a cached result for `sql` if one younger than `max_age` exists,
    /// otherwise run the query and cache its (last) result set.
    pub async fn query_cached(&mut self, sql: &str, max_age: Duration) -> Result<Arc<CachedResult>> {
        if let Some(hit) = self.cache.get(sql, max_age) {
            return Ok(hit);
        }
        let mut result = CachedResult::default();
        self.query(sql, &mut result).await?;
        Ok(self.cache.insert(sql, result))
    }

    /// Drop cached results.
    pub fn clear_result_cache(&mut self) {
        self.cache.clear();
    }

    // === Prepared statements ===

    /// Prepare a statement.
    pub async fn prepare(&mut self, sql: &str) -> Result<PreparedStatement> {
        let result = self.prepare_inner(sql).await;
        self.check(result)
    }

    async fn prepare_inner(&mut self, sql: &str) -> Result<PreparedStatement> {
        self.ensure_ready().await?;
        let mut state_machine =
            PrepareStateMachine::new(&mut self.buffer_set, sql, self.info.connection_id);
        self.drive(&mut state_machine).await?;
        Ok(state_machine.take_statement())
    }

    fn check_owner(&self, statement: &PreparedStatement) -> Result<()> {
        if statement.connection_id != self.info.connection_id {
            return Err(Error::InvalidUsage(format!(
                "statement {} belongs to connection {}, not {}",
                statement.id, statement.connection_id, self.info.connection_id
            )));
        }
        Ok(())
    }

    async fn execute_prepared<P: ToParams, H: BinaryHandler>(
        &mut self,
        statement: &PreparedStatement,
        params: &P,
        fetch_rows: Option<u32>,
        handler: &mut H,
    ) -> Result<()> {
        self.check_owner(statement)?;
        let mut state_machine =
            ExecuteStateMachine::new(&mut self.buffer_set, handler, statement, params, fetch_rows)?;
        self.drive(&mut state_machine).await?;
        let ok = state_machine.last_ok();
        self.set_status(&ok);
        Ok(())
    }

    /// Execute a statement with a handler.
    ///
    /// The statement can be a [`PreparedStatement`] or raw SQL; raw SQL is
    /// prepared and closed again around the execution.
    pub async fn exec<S: IntoStatement, P: ToParams, H: BinaryHandler>(
        &mut self,
        statement: S,
        params: P,
        handler: &mut H,
    ) -> Result<()> {
        let result = self.exec_inner(&statement, &params, handler).await;
        self.check(result)
    }

    async fn exec_inner<S: IntoStatement, P: ToParams, H: BinaryHandler>(
        &mut self,
        statement: &S,
        params: &P,
        handler: &mut H,
    ) -> Result<()> {
        self.ensure_ready().await?;
        if let Some(prepared) = statement.as_prepared() {
            return self.execute_prepared(prepared, params, None, handler).await;
        }
        let sql = statement
            .as_sql()
            .ok_or_else(|| Error::InvalidUsage("statement has neither SQL nor an id".into()))?;
        let prepared = self.prepare_inner(sql).await?;
        let result = self.execute_prepared(&prepared, params, None, handler).await;
        if result.as_ref().is_err_and(Error::is_connection_broken) {
            return result;
        }
        self.close_statement_inner(&prepared).await?;
        result
    }

    /// Execute a statement and discard results. Returns the affected rows.
    pub async fn exec_drop<S: IntoStatement, P: ToParams>(
        &mut self,
        statement: S,
        params: P,
    ) -> Result<u64> {
        let mut handler = DropHandler::new();
        self.exec(statement, params, &mut handler).await?;
        Ok(handler.rows_affected())
    }

    /// Execute a statement and collect typed rows.
    pub async fn exec_collect<T: for<'a> FromRow<'a>, S: IntoStatement, P: ToParams>(
        &mut self,
        statement: S,
        params: P,
    ) -> Result<Vec<T>> {
        let mut handler = CollectHandler::<T>::new();
        self.exec(statement, params, &mut handler).await?;
        Ok(handler.into_rows())
    }

    /// Execute a statement and return the first typed row.
    pub async fn exec_first<T: for<'a> FromRow<'a>, S: IntoStatement, P: ToParams>(
        &mut self,
        statement: S,
        params: P,
    ) -> Result<Option<T>> {
        let mut handler = FirstRowHandler::<T>::new();
        self.exec(statement, params, &mut handler).await?;
        Ok(handler.into_row())
    }

    /// Execute a prepared statement and stream its binary rows.
    pub async fn exec_iter<P: ToParams>(
        &mut self,
        statement: &PreparedStatement,
        params: P,
    ) -> Result<QueryResult<'_>> {
        let result = self.send_execute(statement, &params).await;
        self.check(result)?;
        QueryResult::start(self, true).await
    }

    async fn send_execute<P: ToParams>(
        &mut self,
        statement: &PreparedStatement,
        params: &P,
    ) -> Result<()> {
        self.ensure_ready().await?;
        self.check_owner(statement)?;
        let buffer_set = &mut *self.buffer_set;
        buffer_set.start_command();
        write_execute(
            &mut buffer_set.write_buffer,
            &mut buffer_set.sequence_id,
            statement.id,
            statement.num_params(),
            params,
            false,
        )?;
        self.write_buffered().await
    }

    /// Execute a prepared statement through a read-only cursor, fetching
    /// `fetch_rows` rows per round trip.
    pub async fn exec_fetch<P: ToParams, H: BinaryHandler>(
        &mut self,
        statement: &PreparedStatement,
        params: P,
        fetch_rows: u32,
        handler: &mut H,
    ) -> Result<()> {
        let result = match self.ensure_ready().await {
            Ok(()) => {
                self.execute_prepared(statement, &params, Some(fetch_rows), handler)
                    .await
            }
            Err(e) => Err(e),
        };
        self.check(result)
    }

    /// Close a prepared statement.
    pub async fn close_statement(&mut self, statement: &PreparedStatement) -> Result<()> {
        let result = self.close_statement_inner(statement).await;
        self.check(result)
    }

    async fn close_statement_inner(&mut self, statement: &PreparedStatement) -> Result<()> {
        self.ensure_ready().await?;
        self.check_owner(statement)?;
        let mut state_machine =
            CommandStateMachine::close_statement(&mut self.buffer_set, statement.id);
        self.drive(&mut state_machine).await
    }

    /// Reset a prepared statement's server-side state (open cursor, long data).
    pub async fn reset_statement(&mut self, statement: &PreparedStatement) -> Result<()> {
        let result = match self.check_owner(statement) {
            Ok(()) => {
                let id = statement.id;
                self.run_command(|bs| CommandStateMachine::reset_statement(bs, id))
                    .await
            }
            Err(e) => Err(e),
        };
        self.check(result)
    }

    // === Utility commands ===

    async fn run_command(
        &mut self,
        start: impl FnOnce(&mut BufferSet) -> CommandStateMachine,
    ) -> Result<()> {
        self.ensure_ready().await?;
        let mut state_machine = start(&mut self.buffer_set);
        self.drive(&mut state_machine).await?;
        let ok = state_machine.ok();
        self.set_status(&ok);
        Ok(())
    }

    /// Check that the server is alive.
    pub async fn ping(&mut self) -> Result<()> {
        let result = self.run_command(CommandStateMachine::ping).await;
        self.check(result)
    }

    /// Change the default database.
    pub async fn select_db(&mut self, database: &str) -> Result<()> {
        let result = self
            .run_command(|bs| CommandStateMachine::init_db(bs, database))
            .await;
        self.check(result)?;
        self.opts.database = Some(database.to_string());
        Ok(())
    }

    /// Reset the session state without reconnecting.
    ///
    /// Uses COM_RESET_CONNECTION where the server supports it and falls back
    /// to re-authenticating with the connection's own credentials. Prepared
    /// statements of this connection become invalid.
    pub async fn reset(&mut self) -> Result<()> {
        let result = if self.info.features.supports(Feature::ResetConnection) {
            self.run_command(CommandStateMachine::reset_connection).await
        } else {
            let opts = self.opts.clone();
            self.change_user_inner(opts).await
        };
        self.check(result)?;
        self.cache.clear();
        Ok(())
    }

    /// Re-authenticate as another user over the open connection (COM_CHANGE_USER).
    pub async fn change_user(
        &mut self,
        user: &str,
        password: Option<&str>,
        database: Option<&str>,
    ) -> Result<()> {
        let mut opts = self.opts.clone();
        opts.user = user.to_string();
        opts.password = password.map(str::to_string);
        opts.database = database.map(str::to_string);
        let result = self.change_user_inner(opts).await;
        self.check(result)?;
        self.cache.clear();
        Ok(())
    }

    async fn change_user_inner(&mut self, opts: Opts) -> Result<()> {
        self.ensure_ready().await?;
        let mut state_machine = ConnectionStateMachine::change_user(
            &mut self.buffer_set,
            opts.clone(),
            self.info.clone(),
            self.secure,
        )?;
        self.drive(&mut state_machine).await?;
        if let Some(info) = state_machine.take_info() {
            self.info = info;
        }
        self.opts = opts;
        Ok(())
    }

    /// Close the connection gracefully.
    pub async fn close(mut self) -> Result<()> {
        self.ensure_ready().await?;
        let mut state_machine = CommandStateMachine::quit(&mut self.buffer_set);
        self.drive_with(&mut state_machine, None).await
    }

    // === Transactions ===

    /// Start a transaction and return its token.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUsage` if a transaction is already open.
    pub async fn begin(&mut self) -> Result<Transaction> {
        if self.in_transaction() {
            return Err(Error::InvalidUsage("nested transactions are not supported".into()));
        }
        self.query_drop("BEGIN").await?;
        Ok(Transaction::new(self.connection_id()))
    }

    /// Execute an async closure within a transaction.
    ///
    /// If the closure returns `Ok`, the transaction is committed.
    /// If the closure returns `Err` or the transaction is not explicitly
    /// committed or rolled back, the transaction is rolled back.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUsage` if called while already in a transaction.
    pub async fn run_transaction<F, R>(&mut self, f: F) -> Result<R>
    where
        F: AsyncFnOnce(&mut Conn, Transaction) -> Result<R>,
    {
        let tx = self.begin().await?;
        let result = f(self, tx).await;

        // If still in a transaction (not committed or rolled back), roll it back
        if self.in_transaction() && !self.is_broken {
            let rollback_result = self.query_drop("ROLLBACK").await;

            // Return the first error (either from closure or rollback)
            if let Err(e) = result {
                return Err(e);
            }
            rollback_result?;
        }

        result
    }
}

