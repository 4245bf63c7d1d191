//! COM_STMT_PREPARE state machine.
//!
//! ```text
//! response := ERR | PREPARE_OK [param_def* EOF] [column_def* EOF]
//! ```

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::protocol::column::{ColumnInfo, parse_column_info};
use crate::protocol::command::write_prepare;
use crate::protocol::response::{EofPacket, PrepareOk, is_err, server_error};
use crate::statement::PreparedStatement;

use super::action::{Action, StateMachine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingPrepareOk,
    ReadingParams { remaining: u16 },
    ParamsEof,
    ReadingColumns { remaining: u16 },
    ColumnsEof,
    Finished,
}

/// State machine for preparing one statement.
pub struct PrepareStateMachine {
    state: State,
    connection_id: u32,
    statement_id: u32,
    num_columns: u16,
    params: Vec<ColumnInfo>,
    columns: Vec<ColumnInfo>,
}

impl PrepareStateMachine {
    /// Create a new prepare state machine. Writes the COM_STMT_PREPARE packet to the buffer.
    pub fn new(buffer_set: &mut BufferSet, sql: &str, connection_id: u32) -> Self {
        buffer_set.start_command();
        write_prepare(&mut buffer_set.write_buffer, &mut buffer_set.sequence_id, sql);
        Self {
            state: State::Initial,
            connection_id,
            statement_id: 0,
            num_columns: 0,
            params: Vec::new(),
            columns: Vec::new(),
        }
    }

    /// Take the prepared statement after completion.
    pub fn take_statement(&mut self) -> PreparedStatement {
        PreparedStatement {
            id: self.statement_id,
            connection_id: self.connection_id,
            params: std::mem::take(&mut self.params),
            columns: std::mem::take(&mut self.columns),
        }
    }

    fn after_params(&mut self) -> Action {
        if self.num_columns > 0 {
            self.state = State::ReadingColumns {
                remaining: self.num_columns,
            };
            Action::ReadPacket
        } else {
            self.state = State::Finished;
            Action::Finished
        }
    }
}

impl StateMachine for PrepareStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == State::Initial {
            self.state = State::WaitingPrepareOk;
            return Ok(Action::WriteAndReadPacket);
        }

        let payload = buffer_set.read_buffer.as_slice();
        if is_err(payload) {
            self.state = State::Finished;
            return Err(server_error(payload));
        }

        match self.state {
            State::WaitingPrepareOk => {
                let ok = PrepareOk::parse(payload)?;
                self.statement_id = ok.statement_id;
                self.num_columns = ok.num_columns;
                self.params.reserve(usize::from(ok.num_params));
                self.columns.reserve(usize::from(ok.num_columns));
                if ok.num_params > 0 {
                    self.state = State::ReadingParams {
                        remaining: ok.num_params,
                    };
                    Ok(Action::ReadPacket)
                } else {
                    Ok(self.after_params())
                }
            }
            State::ReadingParams { remaining } => {
                self.params.push(parse_column_info(payload)?);
                self.state = if remaining == 1 {
                    State::ParamsEof
                } else {
                    State::ReadingParams {
                        remaining: remaining - 1,
                    }
                };
                Ok(Action::ReadPacket)
            }
            State::ParamsEof => {
                EofPacket::parse(payload)?;
                Ok(self.after_params())
            }
            State::ReadingColumns { remaining } => {
                self.columns.push(parse_column_info(payload)?);
                self.state = if remaining == 1 {
                    State::ColumnsEof
                } else {
                    State::ReadingColumns {
                        remaining: remaining - 1,
                    }
                };
                Ok(Action::ReadPacket)
            }
            State::ColumnsEof => {
                EofPacket::parse(payload)?;
                self.state = State::Finished;
                Ok(Action::Finished)
            }
            State::Initial | State::Finished => Err(Error::Protocol(format!(
                "unexpected packet in prepare state {:?}",
                self.state
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::ColumnType;
    use crate::state::result::tests::{column_payload, eof};

    fn deliver(sm: &mut PrepareStateMachine, bs: &mut BufferSet, payload: &[u8]) -> Result<Action> {
        bs.read_buffer.clear();
        bs.read_buffer.extend_from_slice(payload);
        sm.step(bs)
    }

    #[test]
    fn test_prepare_with_params_and_columns() {
        let mut bs = BufferSet::new();
        let mut sm = PrepareStateMachine::new(&mut bs, "SELECT id FROM t WHERE a = ?", 9);
        assert_eq!(bs.write_buffer[4], 0x16);
        assert_eq!(sm.step(&mut bs).unwrap(), Action::WriteAndReadPacket);

        let ok = [0x00, 5, 0, 0, 0, 1, 0, 1, 0, 0, 0, 0];
        assert_eq!(deliver(&mut sm, &mut bs, &ok).unwrap(), Action::ReadPacket);
        let param = column_payload("?", ColumnType::LongLong, 0);
        assert_eq!(deliver(&mut sm, &mut bs, &param).unwrap(), Action::ReadPacket);
        assert_eq!(deliver(&mut sm, &mut bs, &eof(2)).unwrap(), Action::ReadPacket);
        let column = column_payload("id", ColumnType::Long, 0);
        assert_eq!(deliver(&mut sm, &mut bs, &column).unwrap(), Action::ReadPacket);
        assert_eq!(deliver(&mut sm, &mut bs, &eof(2)).unwrap(), Action::Finished);

        let stmt = sm.take_statement();
        assert_eq!(stmt.id(), 5);
        assert_eq!(stmt.connection_id(), 9);
        assert_eq!(stmt.num_params(), 1);
        assert_eq!(stmt.columns()[0].column_type, ColumnType::Long);
    }

    #[test]
    fn test_prepare_without_metadata() {
        let mut bs = BufferSet::new();
        let mut sm = PrepareStateMachine::new(&mut bs, "DO 1", 1);
        sm.step(&mut bs).unwrap();
        let ok = [0x00, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(deliver(&mut sm, &mut bs, &ok).unwrap(), Action::Finished);
        assert_eq!(sm.take_statement().num_params(), 0);
    }

    #[test]
    fn test_prepare_error() {
        let mut bs = BufferSet::new();
        let mut sm = PrepareStateMachine::new(&mut bs, "SELEC", 1);
        sm.step(&mut bs).unwrap();
        let mut err = vec![0xFF];
        err.extend_from_slice(&1064u16.to_le_bytes());
        err.extend_from_slice(b"#42000syntax");
        let err = deliver(&mut sm, &mut bs, &err).unwrap_err();
        assert_eq!(err.sql_state(), Some("42000"));
    }
}
