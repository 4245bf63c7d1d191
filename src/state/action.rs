//! Action types for state machine I/O requests.

use crate::buffer_set::BufferSet;
use crate::error::Result;

/// Action requested by a state machine.
///
/// The caller should perform the requested I/O and then call `step()` again.
/// Packets read by the caller land in `buffer_set.read_buffer` (one logical
/// packet, multi-packet payloads reassembled), with `buffer_set.sequence_id`
/// checked and advanced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Read one packet from the server.
    ReadPacket,

    /// Write `buffer_set.write_buffer` to the server and flush.
    ///
    /// Used by commands without a response (COM_STMT_CLOSE, COM_QUIT).
    WritePacket,

    /// Write `buffer_set.write_buffer` to the server, then read one packet.
    WriteAndReadPacket,

    /// Write `buffer_set.write_buffer` (an SSLRequest), then upgrade the
    /// stream to TLS.
    TlsHandshake,

    /// The server asked for a local file (`LOAD DATA LOCAL INFILE`).
    ///
    /// The caller should:
    /// 1. Send the file contents as packets, continuing `buffer_set.sequence_id`
    /// 2. Send an empty packet, also when the file could not be read
    /// 3. Read the server's response packet and call `step()` again
    SendLocalInfile(String),

    /// The state machine has finished successfully.
    Finished,
}

/// A sans-I/O protocol exchange.
pub trait StateMachine {
    /// Process the last packet read (if any) and return the next action.
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action>;
}
