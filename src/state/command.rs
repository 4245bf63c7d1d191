//! Utility commands answered by a single OK packet (or not answered at all).

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::protocol::command::{
    write_close_statement, write_init_db, write_ping, write_quit, write_reset_connection,
    write_reset_statement,
};
use crate::protocol::response::{OkPacket, is_err, server_error};

use super::action::{Action, StateMachine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingOk,
    Written,
    Finished,
}

/// State machine for COM_PING, COM_INIT_DB, COM_RESET_CONNECTION,
/// COM_STMT_RESET, COM_STMT_CLOSE and COM_QUIT.
pub struct CommandStateMachine {
    state: State,
    expects_response: bool,
    ok: OkPacket,
}

impl CommandStateMachine {
    fn start(
        buffer_set: &mut BufferSet,
        expects_response: bool,
        write: impl FnOnce(&mut Vec<u8>, &mut u8),
    ) -> Self {
        buffer_set.start_command();
        write(&mut buffer_set.write_buffer, &mut buffer_set.sequence_id);
        Self {
            state: State::Initial,
            expects_response,
            ok: OkPacket::default(),
        }
    }

    /// COM_PING
    pub fn ping(buffer_set: &mut BufferSet) -> Self {
        Self::start(buffer_set, true, write_ping)
    }

    /// COM_INIT_DB
    pub fn init_db(buffer_set: &mut BufferSet, database: &str) -> Self {
        Self::start(buffer_set, true, |out, seq| write_init_db(out, seq, database))
    }

    /// COM_RESET_CONNECTION
    pub fn reset_connection(buffer_set: &mut BufferSet) -> Self {
        Self::start(buffer_set, true, write_reset_connection)
    }

    /// COM_STMT_RESET
    pub fn reset_statement(buffer_set: &mut BufferSet, statement_id: u32) -> Self {
        Self::start(buffer_set, true, |out, seq| {
            write_reset_statement(out, seq, statement_id)
        })
    }

    /// COM_STMT_CLOSE (no response)
    pub fn close_statement(buffer_set: &mut BufferSet, statement_id: u32) -> Self {
        Self::start(buffer_set, false, |out, seq| {
            write_close_statement(out, seq, statement_id)
        })
    }

    /// COM_QUIT (the server closes the connection)
    pub fn quit(buffer_set: &mut BufferSet) -> Self {
        Self::start(buffer_set, false, write_quit)
    }

    /// The OK packet of the response.
    pub fn ok(&self) -> OkPacket {
        self.ok
    }
}

impl StateMachine for CommandStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.state {
            State::Initial if self.expects_response => {
                self.state = State::WaitingOk;
                Ok(Action::WriteAndReadPacket)
            }
            State::Initial => {
                self.state = State::Written;
                Ok(Action::WritePacket)
            }
            State::Written => {
                self.state = State::Finished;
                Ok(Action::Finished)
            }
            State::WaitingOk => {
                self.state = State::Finished;
                let payload = buffer_set.read_buffer.as_slice();
                if is_err(payload) {
                    return Err(server_error(payload));
                }
                self.ok = OkPacket::parse(payload)?;
                Ok(Action::Finished)
            }
            State::Finished => Err(Error::Protocol("command state machine already finished".into())),
        }
    }
}
