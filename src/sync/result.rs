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
/// connection. Rows cannot be revisited. Dropping the stream early reads and
/// discards whatever the server still sends, so the connection stays usable.
pub struct QueryResult<'c> {
    conn: &'c mut Conn,
    decoder: ResultSetDecoder,
    binary: bool,
    has_rows: bool,
    ok: OkPacket,
    infile_error: Option<Error>,
}

impl<'c> QueryResult<'c> {
    /// Read up to the first result of a command that was just written.
    pub(super) fn start(conn: &'c mut Conn, binary: bool) -> Result<Self> {
        let mut result = Self {
            conn,
            decoder: ResultSetDecoder::new(),
            binary,
            has_rows: false,
            ok: OkPacket::default(),
            infile_error: None,
        };
        result.advance()?;
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
    pub fn next_row<R: for<'a> FromRow<'a>>(&mut self) -> Result<Option<R>> {
        if !self.has_rows {
            return Ok(None);
        }
        let event = self.next_event()?;
        match event {
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
    pub fn next_result(&mut self) -> Result<bool> {
        while self.has_rows {
            self.next_row::<()>()?;
        }
        if self.decoder.is_done() {
            return match self.infile_error.take() {
                Some(e) => Err(e),
                None => Ok(false),
            };
        }
        self.advance()?;
        Ok(true)
    }

    /// Read all remaining rows of the current result set.
    pub fn collect_rows<R: for<'a> FromRow<'a>>(&mut self) -> Result<Vec<R>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
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

    /// Read packets until a result set header or a complete OK result.
    fn advance(&mut self) -> Result<()> {
        loop {
            match self.next_event()? {
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
                    let result = self.conn.send_local_infile(&file_name);
                    if let Some(e) = self.guard(result)? {
                        self.infile_error.get_or_insert(e);
                    }
                }
                ResultEvent::Row => return Err(self.desync("row before column metadata")),
            }
        }
    }

    fn next_event(&mut self) -> Result<ResultEvent> {
        let timeout = self.conn.command_read_timeout();
        let read = self.conn.read_packet(timeout);
        if let Err(Error::Timeout) = read {
            return Err(self.recover());
        }
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

    fn recover(&mut self) -> Error {
        self.has_rows = false;
        let decoder = &mut self.decoder;
        self.conn
            .recover_from_timeout(|conn| drain(conn, decoder, None))
    }
}

/// Read and discard the rest of a command's response.
fn drain(
    conn: &mut Conn,
    decoder: &mut ResultSetDecoder,
    timeout: Option<std::time::Duration>,
) -> Result<()> {
    while !decoder.is_done() {
        conn.read_packet(timeout)?;
        match decoder.on_packet(conn.buffer_set_mut()) {
            Ok(ResultEvent::LocalInfile(file_name)) => {
                conn.send_local_infile(&file_name)?;
            }
            Ok(ResultEvent::ResultEnd(ok)) => conn.set_status(&ok),
            Ok(_) => {}
            // ERR ends the command
            Err(Error::Server(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

impl Drop for QueryResult<'_> {
    fn drop(&mut self) {
        if self.conn.is_broken() || self.decoder.is_done() {
            return;
        }
        let timeout = self.conn.command_read_timeout();
        if drain(self.conn, &mut self.decoder, timeout).is_err() {
            self.conn.mark_broken();
        }
    }
}
