//! COM_STMT_EXECUTE / COM_STMT_FETCH state machine (binary protocol).
//!
//! Without a cursor the execute response is an ordinary result set with
//! binary rows. With a read-only cursor the server only sends column metadata
//! (its EOF carries `SERVER_STATUS_CURSOR_EXISTS`) and the rows are pulled
//! with COM_STMT_FETCH until an EOF carries `SERVER_STATUS_LAST_ROW_SENT`.

use crate::buffer_set::BufferSet;
use crate::conversion::ToParams;
use crate::error::{Error, Result};
use crate::handler::BinaryHandler;
use crate::protocol::command::{write_execute, write_fetch};
use crate::protocol::response::OkPacket;
use crate::protocol::row::BinaryRow;
use crate::statement::PreparedStatement;

use super::action::{Action, StateMachine};
use super::result::{ResultEvent, ResultSetDecoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    Reading,
    Fetching,
    Finished,
}

/// State machine for executing a prepared statement.
pub struct ExecuteStateMachine<'h, H> {
    state: State,
    handler: &'h mut H,
    decoder: ResultSetDecoder,
    statement_id: u32,
    fetch_rows: Option<u32>,
    handler_error: Option<Error>,
}

impl<'h, H: BinaryHandler> ExecuteStateMachine<'h, H> {
    /// Create a new execute state machine. Writes the COM_STMT_EXECUTE packet to the buffer.
    ///
    /// With `fetch_rows`, a read-only cursor is requested and rows are fetched
    /// in batches of that size.
    pub fn new<P: ToParams + ?Sized>(
        buffer_set: &mut BufferSet,
        handler: &'h mut H,
        statement: &PreparedStatement,
        params: &P,
        fetch_rows: Option<u32>,
    ) -> Result<Self> {
        buffer_set.start_command();
        write_execute(
            &mut buffer_set.write_buffer,
            &mut buffer_set.sequence_id,
            statement.id,
            statement.num_params(),
            params,
            fetch_rows.is_some(),
        )?;
        Ok(Self {
            state: State::Initial,
            handler,
            decoder: ResultSetDecoder::new(),
            statement_id: statement.id,
            fetch_rows: fetch_rows.map(|n| n.max(1)),
            handler_error: None,
        })
    }

    /// Status of the last result.
    pub fn last_ok(&self) -> OkPacket {
        self.decoder.last_ok()
    }

    fn record(&mut self, result: Result<()>) {
        if let Err(e) = result
            && self.handler_error.is_none()
        {
            self.handler_error = Some(e);
        }
    }

    fn finish(&mut self) -> Result<Action> {
        self.state = State::Finished;
        match self.handler_error.take() {
            Some(e) => Err(e),
            None => Ok(Action::Finished),
        }
    }

    fn fetch(&mut self, buffer_set: &mut BufferSet, num_rows: u32) -> Action {
        buffer_set.start_command();
        write_fetch(
            &mut buffer_set.write_buffer,
            &mut buffer_set.sequence_id,
            self.statement_id,
            num_rows,
        );
        self.decoder = ResultSetDecoder::for_fetch(self.decoder.columns().to_vec());
        self.state = State::Fetching;
        Action::WriteAndReadPacket
    }
}

impl<H: BinaryHandler> StateMachine for ExecuteStateMachine<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.state {
            State::Initial => {
                self.state = State::Reading;
                return Ok(Action::WriteAndReadPacket);
            }
            State::Finished => {
                return Err(Error::Protocol("execute state machine already finished".into()));
            }
            State::Reading | State::Fetching => {}
        }

        let event = match self.decoder.on_packet(buffer_set) {
            Ok(event) => event,
            Err(e) => {
                self.state = State::Finished;
                return Err(self.handler_error.take().unwrap_or(e));
            }
        };

        let skip = self.handler_error.is_some();
        match event {
            ResultEvent::Continue => {}
            ResultEvent::ResultStart { cursor } => {
                if !skip {
                    let cols = self.decoder.column_defs(buffer_set);
                    let result = self.handler.result_start(cols);
                    self.record(result);
                }
                if cursor {
                    let num_rows = self.fetch_rows.unwrap_or(u32::MAX);
                    return Ok(self.fetch(buffer_set, num_rows));
                }
            }
            ResultEvent::Row => {
                if !skip {
                    let cols = self.decoder.column_defs(buffer_set);
                    let result = BinaryRow::new(&buffer_set.read_buffer, cols.info())
                        .and_then(|row| self.handler.row(cols, row));
                    self.record(result);
                }
            }
            ResultEvent::ResultEnd(ok) => {
                if self.state == State::Fetching && !ok.status_flags.last_row_sent() {
                    let num_rows = self.fetch_rows.unwrap_or(u32::MAX);
                    return Ok(self.fetch(buffer_set, num_rows));
                }
                if !skip {
                    let result = self.handler.result_end(ok);
                    self.record(result);
                }
                if self.decoder.is_done() {
                    return self.finish();
                }
            }
            ResultEvent::LocalInfile(_) => {
                self.state = State::Finished;
                return Err(Error::Protocol(
                    "LOCAL INFILE request in a binary protocol response".into(),
                ));
            }
        }
        Ok(Action::ReadPacket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::{ColumnFlags, ColumnType};
    use crate::handler::{CollectHandler, DropHandler};
    use crate::protocol::column::ColumnInfo;
    use crate::state::result::tests::{column_payload, eof};

    fn statement(num_params: usize) -> PreparedStatement {
        let info = ColumnInfo {
            column_type: ColumnType::LongLong,
            flags: ColumnFlags::new(0),
            charset: 63,
            length: 20,
            decimals: 0,
        };
        PreparedStatement {
            id: 3,
            connection_id: 1,
            params: vec![info; num_params],
            columns: vec![info],
        }
    }

    fn deliver<S: StateMachine>(sm: &mut S, bs: &mut BufferSet, payload: &[u8]) -> Result<Action> {
        bs.read_buffer.clear();
        bs.read_buffer.extend_from_slice(payload);
        sm.step(bs)
    }

    fn long_row(value: i32) -> Vec<u8> {
        let mut row = vec![0x00, 0x00];
        row.extend_from_slice(&value.to_le_bytes());
        row
    }

    #[test]
    fn test_execute_binary_rows() {
        let mut bs = BufferSet::new();
        let mut handler = CollectHandler::<(i32,)>::new();
        let stmt = statement(1);
        let mut sm = ExecuteStateMachine::new(&mut bs, &mut handler, &stmt, &(7i64,), None).unwrap();
        assert_eq!(bs.write_buffer[4], 0x17);
        assert_eq!(sm.step(&mut bs).unwrap(), Action::WriteAndReadPacket);

        deliver(&mut sm, &mut bs, &[1]).unwrap();
        deliver(&mut sm, &mut bs, &column_payload("v", ColumnType::Long, 0)).unwrap();
        deliver(&mut sm, &mut bs, &eof(2)).unwrap();
        deliver(&mut sm, &mut bs, &long_row(7)).unwrap();
        assert_eq!(deliver(&mut sm, &mut bs, &eof(2)).unwrap(), Action::Finished);
        drop(sm);
        assert_eq!(handler.into_rows(), vec![(7,)]);
    }

    #[test]
    fn test_param_count_mismatch() {
        let mut bs = BufferSet::new();
        let mut handler = DropHandler::new();
        let stmt = statement(2);
        let result = ExecuteStateMachine::new(&mut bs, &mut handler, &stmt, &(1i64,), None);
        assert!(matches!(result, Err(Error::InvalidUsage(_))));
    }

    #[test]
    fn test_cursor_fetch_batches() {
        let mut bs = BufferSet::new();
        let mut handler = CollectHandler::<(i32,)>::new();
        let stmt = statement(0);
        let mut sm = ExecuteStateMachine::new(&mut bs, &mut handler, &stmt, &(), Some(1)).unwrap();
        sm.step(&mut bs).unwrap();
        deliver(&mut sm, &mut bs, &[1]).unwrap();
        deliver(&mut sm, &mut bs, &column_payload("v", ColumnType::Long, 0)).unwrap();

        // metadata EOF with CURSOR_EXISTS -> first fetch
        assert_eq!(deliver(&mut sm, &mut bs, &eof(0x0042)).unwrap(), Action::WriteAndReadPacket);
        assert_eq!(bs.write_buffer[4], 0x1c);
        assert_eq!(bs.sequence_id, 1);

        deliver(&mut sm, &mut bs, &long_row(1)).unwrap();
        // batch done, cursor still open -> next fetch
        assert_eq!(deliver(&mut sm, &mut bs, &eof(0x0042)).unwrap(), Action::WriteAndReadPacket);
        deliver(&mut sm, &mut bs, &long_row(2)).unwrap();
        // LAST_ROW_SENT
        assert_eq!(deliver(&mut sm, &mut bs, &eof(0x00C2)).unwrap(), Action::Finished);
        drop(sm);
        assert_eq!(handler.into_rows(), vec![(1,), (2,)]);
    }
}
