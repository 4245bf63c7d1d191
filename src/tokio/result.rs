//! Forward-only row stream over a text or binary result.

use crate::conversion::FromRow;
use crate::error::{Error, Result};
use crate::protocol::column::ColumnDefs;
use crate::protocol::response::OkPacket;
use crate::protocol::row::{BinaryRow, TextRow};
use crate::state::result::{ResultEvent, ResultSetDecoder};

use super::conn::Conn;

/// Lazily decoded results of one command.
///
/// Each [`next_row`](Self::next_row) reads exactly one packet from the
/// connection. Rows cannot be revisited. A stream dropped before the command
/// finished leaves the rest on the connection, which discards it before its
/// next command. A stream dropped while a read was in progress has lost its
/// place in the packet stream and marks the connection broken.
pub struct QueryResult<'c> {
    conn: &'c mut Conn,
    decoder: ResultSetDecoder,
    binary: bool,
    has_rows: bool,
    ok: OkPacket,
    infile_error: Option<Error>,
    in_flight: bool,
}

impl<'c> QueryResult<'c> {
    /// Read up to the first result of a command that was just written.
    pub(super) async fn start(conn: &'c mut Conn, binary: bool) -> Result<Self> {
        let mut result = Self {
            conn,
            decoder: ResultSetDecoder::new(),
            binary,
            has_rows: false,
            ok: OkPacket::default(),
            infile_error: None,
            in_flight: false,
        };
        result.advance().await?;
        Ok(result)
    }

    /// Column definitions of the current result set (empty for OK results).
    pub fn columns(&self) -> ColumnDefs<'_> {
        self.decoder.column_defs(self.conn.buffer_set())
    }

    /// True while the current result set has unread rows.
    pub fn has_rows(&self) -> bool {
        self.has_rows
    }

    /// Affected rows of the last finished result.
    pub fn affected_rows(&self) -> u64 {
        self.ok.affected_rows
    }

    /// Last insert id of the last finished result.
    pub fn last_insert_id(&self) -> u64 {
        self.ok.last_insert_id
    }

    /// The OK/EOF packet that closed the last finished result.
    pub fn last_ok(&self) -> OkPacket {
        self.ok
    }

    /// Read the next row of the current result set.
    ///
    /// Returns `None` at the end of the result set, and keeps returning
    /// `None` until [`next_result`](Self::next_result) moves on.
    pub async fn next_row<R: for<'a> FromRow<'a>>(&mut self) -> Result<Option<R>> {
        if !self.has_rows {
            return Ok(None);
        }
        match self.next_event().await? {
            ResultEvent::Row => {
                let cols = self.decoder.columns();
                let payload = self.conn.buffer_set().read_buffer.as_slice();
                let row = if self.binary {
                    BinaryRow::new(payload, cols).and_then(|row| R::from_binary_row(cols, row))
                } else {
                    R::from_text_row(cols, TextRow::new(payload, cols.len()))
                };
                row.map(Some)
            }
            ResultEvent::ResultEnd(ok) => {
                self.end(ok);
                Ok(None)
            }
            _ => Err(self.desync("expected a row")),
        }
    }

    /// Skip the rest of the current result and move to the next one.
    ///
    /// Returns false when the command has no more results.
    pub async fn next_result(&mut self) -> Result<bool> {
        while self.has_rows {
            self.next_row::<()>().await?;
        }
        if self.decoder.is_done() {
            return match self.infile_error.take() {
                Some(e) => Err(e),
                None => Ok(false),
            };
        }
        self.advance().await?;
        Ok(true)
    }

    /// Read all remaining rows of the current result set.
    pub async fn collect_rows<R: for<'a> FromRow<'a>>(&mut self) -> Result<Vec<R>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Discard every remaining result.
    pub async fn finish(mut self) -> Result<()> {
        while self.next_result().await? {}
        Ok(())
    }

    fn end(&mut self, ok: OkPacket) {
        self.has_rows = false;
        self.ok = ok;
        self.conn.set_status(&ok);
    }

    fn desync(&mut self, what: &str) -> Error {
        self.conn.mark_broken();
        Error::Protocol(format!("unexpected packet in result stream: {}", what))
    }

    async fn advance(&mut self) -> Result<()> {
        loop {
            match self.next_event().await? {
                ResultEvent::Continue => {}
                ResultEvent::ResultStart { .. } => {
                    self.has_rows = true;
                    return Ok(());
                }
                ResultEvent::ResultEnd(ok) => {
                    self.end(ok);
                    return Ok(());
                }
                ResultEvent::LocalInfile(file_name) => {
                    self.in_flight = true;
                    let result = self.conn.send_local_infile(&file_name).await;
                    self.in_flight = false;
                    if let Some(e) = self.guard(result)? {
                        self.infile_error.get_or_insert(e);
                    }
                }
                ResultEvent::Row => return Err(self.desync("row before column metadata")),
            }
        }
    }

    async fn next_event(&mut self) -> Result<ResultEvent> {
        self.in_flight = true;
        let timeout = self.conn.command_read_timeout();
        let read = self.conn.read_packet(timeout).await;
        if let Err(Error::Timeout) = read {
            let e = self.recover().await;
            self.in_flight = false;
            return Err(e);
        }
        self.in_flight = false;
        self.guard(read)?;
        let event = self.decoder.on_packet(self.conn.buffer_set_mut());
        self.guard(event)
    }

    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_connection_broken() {
                self.conn.mark_broken();
            }
            self.has_rows = false;
        }
        result
    }

    async fn recover(&mut self) -> Error {
        self.has_rows = false;
        if let Some(e) = self.conn.kill_running_query().await {
            return e;
        }
        let drained = self.conn.drain_result(&mut self.decoder, None).await;
        self.conn.finish_recovery(drained).await
    }
}

impl Drop for QueryResult<'_> {
    fn drop(&mut self) {
        if self.in_flight {
            self.conn.mark_broken();
        } else if !self.conn.is_broken() && !self.decoder.is_done() {
            self.conn.park_result(std::mem::take(&mut self.decoder));
        }
    }
}
