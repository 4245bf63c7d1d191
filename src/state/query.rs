//! COM_QUERY state machine (text protocol).

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::handler::TextHandler;
use crate::protocol::command::write_query;
use crate::protocol::response::OkPacket;
use crate::protocol::row::TextRow;

use super::action::{Action, StateMachine};
use super::result::{ResultEvent, ResultSetDecoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    Reading,
    Finished,
}

/// State machine for a text-protocol query, including multi-statement
/// queries and `LOAD DATA LOCAL INFILE` requests.
pub struct QueryStateMachine<'h, H> {
    state: State,
    handler: &'h mut H,
    decoder: ResultSetDecoder,
    handler_error: Option<Error>,
}

impl<'h, H: TextHandler> QueryStateMachine<'h, H> {
    /// Create a new query state machine. Writes the COM_QUERY packet to the buffer.
    pub fn new(buffer_set: &mut BufferSet, handler: &'h mut H, sql: &str) -> Self {
        buffer_set.start_command();
        write_query(&mut buffer_set.write_buffer, &mut buffer_set.sequence_id, sql);
        Self {
            state: State::Initial,
            handler,
            decoder: ResultSetDecoder::new(),
            handler_error: None,
        }
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
}

impl<H: TextHandler> StateMachine for QueryStateMachine<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.state {
            State::Initial => {
                self.state = State::Reading;
                return Ok(Action::WriteAndReadPacket);
            }
            State::Finished => {
                return Err(Error::Protocol("query state machine already finished".into()));
            }
            State::Reading => {}
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
            ResultEvent::ResultStart { .. } => {
                if !skip {
                    let cols = self.decoder.column_defs(buffer_set);
                    let result = self.handler.result_start(cols);
                    self.record(result);
                }
            }
            ResultEvent::Row => {
                if !skip {
                    let cols = self.decoder.column_defs(buffer_set);
                    let row = TextRow::new(&buffer_set.read_buffer, cols.len());
                    let result = self.handler.row(cols, row);
                    self.record(result);
                }
            }
            ResultEvent::ResultEnd(ok) => {
                if !skip {
                    let result = self.handler.result_end(ok);
                    self.record(result);
                }
                if self.decoder.is_done() {
                    return self.finish();
                }
            }
            ResultEvent::LocalInfile(file_name) => {
                return Ok(Action::SendLocalInfile(file_name));
            }
        }
        Ok(Action::ReadPacket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::ColumnType;
    use crate::handler::CollectHandler;
    use crate::state::result::tests::{column_payload, eof};

    fn deliver<S: StateMachine>(sm: &mut S, bs: &mut BufferSet, payload: &[u8]) -> Result<Action> {
        bs.read_buffer.clear();
        bs.read_buffer.extend_from_slice(payload);
        sm.step(bs)
    }

    #[test]
    fn test_select_one() {
        let mut bs = BufferSet::new();
        let mut handler = CollectHandler::<(i64,)>::new();
        let mut sm = QueryStateMachine::new(&mut bs, &mut handler, "SELECT 1");
        assert_eq!(&bs.write_buffer[..5], &[9, 0, 0, 0, 0x03]);
        assert_eq!(sm.step(&mut bs).unwrap(), Action::WriteAndReadPacket);

        let col = column_payload("1", ColumnType::LongLong, 0);
        assert_eq!(deliver(&mut sm, &mut bs, &[1]).unwrap(), Action::ReadPacket);
        assert_eq!(deliver(&mut sm, &mut bs, &col).unwrap(), Action::ReadPacket);
        assert_eq!(deliver(&mut sm, &mut bs, &eof(2)).unwrap(), Action::ReadPacket);
        assert_eq!(deliver(&mut sm, &mut bs, &[1, b'1']).unwrap(), Action::ReadPacket);
        assert_eq!(deliver(&mut sm, &mut bs, &eof(2)).unwrap(), Action::Finished);
        drop(sm);
        assert_eq!(handler.into_rows(), vec![(1,)]);
    }

    #[test]
    fn test_decode_error_drains_and_reports_first_error() {
        let mut bs = BufferSet::new();
        let mut handler = CollectHandler::<(i64,)>::new();
        let mut sm = QueryStateMachine::new(&mut bs, &mut handler, "SELECT 'x'");
        sm.step(&mut bs).unwrap();
        deliver(&mut sm, &mut bs, &[1]).unwrap();
        deliver(&mut sm, &mut bs, &column_payload("x", ColumnType::VarString, 0)).unwrap();
        deliver(&mut sm, &mut bs, &eof(2)).unwrap();
        assert_eq!(deliver(&mut sm, &mut bs, &[1, b'x']).unwrap(), Action::ReadPacket);
        assert_eq!(deliver(&mut sm, &mut bs, &[1, b'y']).unwrap(), Action::ReadPacket);
        let err = deliver(&mut sm, &mut bs, &eof(2)).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_local_infile_then_ok() {
        let mut bs = BufferSet::new();
        let mut handler = crate::handler::DropHandler::new();
        let mut sm = QueryStateMachine::new(&mut bs, &mut handler, "LOAD DATA LOCAL INFILE 'a.csv'");
        sm.step(&mut bs).unwrap();
        assert_eq!(
            deliver(&mut sm, &mut bs, b"\xFBa.csv").unwrap(),
            Action::SendLocalInfile("a.csv".into())
        );
        assert_eq!(
            deliver(&mut sm, &mut bs, &[0x00, 3, 0, 2, 0, 0, 0]).unwrap(),
            Action::Finished
        );
        drop(sm);
        assert_eq!(handler.rows_affected(), 3);
    }
}
