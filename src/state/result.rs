//! Result set decoder shared by COM_QUERY, COM_STMT_EXECUTE and COM_STMT_FETCH.
//!
//! ```text
//! response := OK | ERR | LOCAL_INFILE | result_set
//! result_set := column_count column_def* EOF row* (EOF | ERR)
//! ```
//!
//! When the status flags of the closing OK/EOF carry `SERVER_MORE_RESULTS_EXISTS`
//! the decoder goes back to waiting for the next response.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::protocol::codec::read_lenenc_int;
use crate::protocol::column::{ColumnDefs, ColumnInfo, parse_column_info, push_column};
use crate::protocol::response::{
    EofPacket, LOCAL_INFILE_HEADER, OK_HEADER, OkPacket, is_eof, is_err, parse_local_infile,
    server_error,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    WaitingResponse,
    ReadingColumns { remaining: u64 },
    ColumnEof,
    ReadingRows,
    Done,
}

/// What the last packet meant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultEvent {
    /// Nothing to report; read the next packet.
    Continue,
    /// Column metadata is complete. `cursor` is true when the server opened a
    /// cursor instead of sending rows.
    ResultStart {
        /// A server-side cursor was opened
        cursor: bool,
    },
    /// `buffer_set.read_buffer` holds a row.
    Row,
    /// A result (OK packet or the end of a result set) finished.
    ResultEnd(OkPacket),
    /// The server requests the named local file.
    LocalInfile(String),
}

/// Incremental decoder for one command's responses.
#[derive(Debug)]
pub struct ResultSetDecoder {
    phase: Phase,
    columns: Vec<ColumnInfo>,
    last_ok: OkPacket,
}

impl ResultSetDecoder {
    /// Decoder for a fresh command response.
    pub fn new() -> Self {
        Self {
            phase: Phase::WaitingResponse,
            columns: Vec::new(),
            last_ok: OkPacket::default(),
        }
    }

    /// Decoder for a COM_STMT_FETCH response: rows of a known column set, then EOF.
    pub fn for_fetch(columns: Vec<ColumnInfo>) -> Self {
        Self {
            phase: Phase::ReadingRows,
            columns,
            last_ok: OkPacket::default(),
        }
    }

    /// Type information of the current result set.
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Column definitions of the current result set.
    pub fn column_defs<'a>(&'a self, buffer_set: &'a BufferSet) -> ColumnDefs<'a> {
        ColumnDefs::new(&buffer_set.column_buffer, &self.columns)
    }

    /// The last OK/EOF seen.
    pub fn last_ok(&self) -> OkPacket {
        self.last_ok
    }

    /// True once the final result of the command was decoded.
    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// True while rows of a result set are being read.
    pub fn in_rows(&self) -> bool {
        self.phase == Phase::ReadingRows
    }

    /// Decode the packet in `buffer_set.read_buffer`.
    ///
    /// An ERR packet ends the command and is returned as `Error::Server`; the
    /// connection stays usable.
    pub fn on_packet(&mut self, buffer_set: &mut BufferSet) -> Result<ResultEvent> {
        let payload = &buffer_set.read_buffer;
        if is_err(payload) {
            self.phase = Phase::Done;
            return Err(server_error(payload));
        }

        match self.phase {
            Phase::WaitingResponse => match payload.first() {
                Some(&OK_HEADER) => {
                    let ok = OkPacket::parse(payload)?;
                    Ok(self.end(ok))
                }
                Some(&LOCAL_INFILE_HEADER) => {
                    Ok(ResultEvent::LocalInfile(parse_local_infile(payload)?))
                }
                Some(_) => {
                    let (count, _) = read_lenenc_int(payload)?;
                    if count == 0 {
                        return Err(Error::Protocol("result set with zero columns".into()));
                    }
                    self.columns.clear();
                    buffer_set.column_buffer.clear();
                    self.phase = Phase::ReadingColumns { remaining: count };
                    Ok(ResultEvent::Continue)
                }
                None => Err(Error::Protocol("empty response packet".into())),
            },
            Phase::ReadingColumns { remaining } => {
                self.columns.push(parse_column_info(payload)?);
                push_column(&mut buffer_set.column_buffer, payload);
                self.phase = if remaining == 1 {
                    Phase::ColumnEof
                } else {
                    Phase::ReadingColumns {
                        remaining: remaining - 1,
                    }
                };
                Ok(ResultEvent::Continue)
            }
            Phase::ColumnEof => {
                let eof = EofPacket::parse(payload)?;
                let cursor = eof.status_flags.cursor_exists();
                if cursor {
                    self.last_ok = eof.into();
                    self.phase = Phase::Done;
                } else {
                    self.phase = Phase::ReadingRows;
                }
                Ok(ResultEvent::ResultStart { cursor })
            }
            Phase::ReadingRows => {
                if is_eof(payload) {
                    let eof = EofPacket::parse(payload)?;
                    Ok(self.end(eof.into()))
                } else {
                    Ok(ResultEvent::Row)
                }
            }
            Phase::Done => Err(Error::Protocol(
                "unexpected packet after the final result".into(),
            )),
        }
    }

    fn end(&mut self, ok: OkPacket) -> ResultEvent {
        self.last_ok = ok;
        self.phase = if ok.more_results() {
            Phase::WaitingResponse
        } else {
            Phase::Done
        };
        ResultEvent::ResultEnd(ok)
    }
}

impl Default for ResultSetDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::constant::ColumnType;
    use crate::protocol::codec::write_lenenc_bytes;

    /// Column definition payload for a column named `name`.
    pub(crate) fn column_payload(name: &str, column_type: ColumnType, flags: u16) -> Vec<u8> {
        let mut out = Vec::new();
        for part in ["def", "", "", "", name, name] {
            write_lenenc_bytes(&mut out, part.as_bytes());
        }
        out.push(0x0c);
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&11u32.to_le_bytes());
        out.push(column_type as u8);
        out.extend_from_slice(&flags.to_le_bytes());
        out.push(0);
        out.extend_from_slice(&[0, 0]);
        out
    }

    pub(crate) fn eof(status: u16) -> Vec<u8> {
        let mut out = vec![0xFE, 0, 0];
        out.extend_from_slice(&status.to_le_bytes());
        out
    }

    fn feed(decoder: &mut ResultSetDecoder, bs: &mut BufferSet, payload: &[u8]) -> Result<ResultEvent> {
        bs.read_buffer.clear();
        bs.read_buffer.extend_from_slice(payload);
        decoder.on_packet(bs)
    }

    #[test]
    fn test_ok_only() {
        let mut bs = BufferSet::new();
        let mut decoder = ResultSetDecoder::new();
        let event = feed(&mut decoder, &mut bs, &[0x00, 2, 0, 0x02, 0, 0, 0]).unwrap();
        assert!(matches!(event, ResultEvent::ResultEnd(ok) if ok.affected_rows == 2));
        assert!(decoder.is_done());
    }

    #[test]
    fn test_result_set() {
        let mut bs = BufferSet::new();
        let mut decoder = ResultSetDecoder::new();
        assert_eq!(feed(&mut decoder, &mut bs, &[1]).unwrap(), ResultEvent::Continue);
        let column = column_payload("1", ColumnType::LongLong, 0);
        assert_eq!(feed(&mut decoder, &mut bs, &column).unwrap(), ResultEvent::Continue);
        assert_eq!(
            feed(&mut decoder, &mut bs, &eof(0x0002)).unwrap(),
            ResultEvent::ResultStart { cursor: false }
        );
        assert_eq!(decoder.column_defs(&bs).names().unwrap(), ["1"]);
        assert_eq!(feed(&mut decoder, &mut bs, &[1, b'1']).unwrap(), ResultEvent::Row);
        assert!(matches!(
            feed(&mut decoder, &mut bs, &eof(0x0002)).unwrap(),
            ResultEvent::ResultEnd(_)
        ));
        assert!(decoder.is_done());
    }

    #[test]
    fn test_more_results_and_error() {
        let mut bs = BufferSet::new();
        let mut decoder = ResultSetDecoder::new();
        // OK with SERVER_MORE_RESULTS_EXISTS
        feed(&mut decoder, &mut bs, &[0x00, 0, 0, 0x0A, 0, 0, 0]).unwrap();
        assert!(!decoder.is_done());

        let mut err = vec![0xFF];
        err.extend_from_slice(&1365u16.to_le_bytes());
        err.extend_from_slice(b"#22012Division by 0");
        let err = feed(&mut decoder, &mut bs, &err).unwrap_err();
        assert_eq!(err.server_error().map(|e| e.code), Some(1365));
        assert!(decoder.is_done());
    }

    #[test]
    fn test_local_infile_request() {
        let mut bs = BufferSet::new();
        let mut decoder = ResultSetDecoder::new();
        let event = feed(&mut decoder, &mut bs, b"\xFBdata.csv").unwrap();
        assert_eq!(event, ResultEvent::LocalInfile("data.csv".into()));
        assert!(!decoder.is_done());
    }

    #[test]
    fn test_cursor_opened() {
        let mut bs = BufferSet::new();
        let mut decoder = ResultSetDecoder::new();
        feed(&mut decoder, &mut bs, &[1]).unwrap();
        feed(&mut decoder, &mut bs, &column_payload("id", ColumnType::Long, 0)).unwrap();
        let event = feed(&mut decoder, &mut bs, &eof(0x0042)).unwrap();
        assert_eq!(event, ResultEvent::ResultStart { cursor: true });
        assert!(decoder.is_done());

        let mut fetch = ResultSetDecoder::for_fetch(decoder.columns().to_vec());
        let row = [0x00, 0x00, 7, 0, 0, 0];
        assert_eq!(feed(&mut fetch, &mut bs, &row).unwrap(), ResultEvent::Row);
        let event = feed(&mut fetch, &mut bs, &eof(0x00C2)).unwrap();
        assert!(matches!(event, ResultEvent::ResultEnd(ok) if ok.status_flags.last_row_sent()));
    }
}
