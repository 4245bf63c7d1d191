//! COM_* command packets.
//!
//! Every writer appends one framed command to `out`, starting at `sequence_id`
//! (0 for a fresh command) and advancing it past the written packets.

use crate::constant::{CommandByte, cursor_type};
use crate::conversion::ToParams;
use crate::error::{Error, Result};
use crate::protocol::codec::{write_bytes, write_u8, write_u32};
use crate::protocol::packet::PacketBuilder;

fn write_command(out: &mut Vec<u8>, sequence_id: &mut u8, command: CommandByte, body: &[u8]) {
    let mut packet = PacketBuilder::new(out);
    write_u8(packet.buf(), command as u8);
    write_bytes(packet.buf(), body);
    packet.finish(sequence_id);
}

/// COM_QUERY
pub fn write_query(out: &mut Vec<u8>, sequence_id: &mut u8, sql: &str) {
    write_command(out, sequence_id, CommandByte::Query, sql.as_bytes());
}

/// COM_STMT_PREPARE
pub fn write_prepare(out: &mut Vec<u8>, sequence_id: &mut u8, sql: &str) {
    write_command(out, sequence_id, CommandByte::StmtPrepare, sql.as_bytes());
}

/// COM_PING
pub fn write_ping(out: &mut Vec<u8>, sequence_id: &mut u8) {
    write_command(out, sequence_id, CommandByte::Ping, &[]);
}

/// COM_QUIT
pub fn write_quit(out: &mut Vec<u8>, sequence_id: &mut u8) {
    write_command(out, sequence_id, CommandByte::Quit, &[]);
}

/// COM_INIT_DB
pub fn write_init_db(out: &mut Vec<u8>, sequence_id: &mut u8, database: &str) {
    write_command(out, sequence_id, CommandByte::InitDb, database.as_bytes());
}

/// COM_RESET_CONNECTION
pub fn write_reset_connection(out: &mut Vec<u8>, sequence_id: &mut u8) {
    write_command(out, sequence_id, CommandByte::ResetConnection, &[]);
}

/// COM_STMT_CLOSE (the server sends no response)
pub fn write_close_statement(out: &mut Vec<u8>, sequence_id: &mut u8, statement_id: u32) {
    write_command(out, sequence_id, CommandByte::StmtClose, &statement_id.to_le_bytes());
}

/// COM_STMT_RESET
pub fn write_reset_statement(out: &mut Vec<u8>, sequence_id: &mut u8, statement_id: u32) {
    write_command(out, sequence_id, CommandByte::StmtReset, &statement_id.to_le_bytes());
}

/// COM_STMT_FETCH
pub fn write_fetch(out: &mut Vec<u8>, sequence_id: &mut u8, statement_id: u32, num_rows: u32) {
    let mut packet = PacketBuilder::new(out);
    let buf = packet.buf();
    write_u8(buf, CommandByte::StmtFetch as u8);
    write_u32(buf, statement_id);
    write_u32(buf, num_rows);
    packet.finish(sequence_id);
}

/// COM_STMT_EXECUTE
///
/// ```text
/// 0x17 | statement_id u32 | flags u8 | iteration_count u32 (=1)
/// if num_params > 0:
///   NULL bitmap ((n + 7) / 8) | new_params_bound u8 (=1) | types (2 * n) | values
/// ```
///
/// The bitmap and type list are reserved up front and filled in while the
/// parameters are visited, so values are encoded straight into the packet.
pub fn write_execute<P: ToParams + ?Sized>(
    out: &mut Vec<u8>,
    sequence_id: &mut u8,
    statement_id: u32,
    num_params: usize,
    params: &P,
    read_only_cursor: bool,
) -> Result<()> {
    let given = params.param_count();
    if given != num_params {
        return Err(Error::InvalidUsage(format!(
            "statement expects {} parameters, got {}",
            num_params, given
        )));
    }

    let start = out.len();
    let mut packet = PacketBuilder::new(out);
    let buf = packet.buf();
    write_u8(buf, CommandByte::StmtExecute as u8);
    write_u32(buf, statement_id);
    write_u8(
        buf,
        if read_only_cursor {
            cursor_type::READ_ONLY
        } else {
            cursor_type::NO_CURSOR
        },
    );
    write_u32(buf, 1);

    if num_params > 0 {
        let bitmap_start = buf.len();
        buf.resize(bitmap_start + num_params.div_ceil(8), 0);
        write_u8(buf, 1);
        let types_start = buf.len();
        buf.resize(types_start + 2 * num_params, 0);

        let mut index = 0;
        let visited = params.visit(&mut |value| {
            if value.is_null() {
                buf[bitmap_start + index / 8] |= 1 << (index % 8);
            }
            let ty = value.param_type().to_bytes();
            buf[types_start + 2 * index..types_start + 2 * index + 2].copy_from_slice(&ty);
            if !value.is_null() {
                value.encode(buf)?;
            }
            index += 1;
            Ok(())
        });
        if let Err(e) = visited {
            // leave no half-built packet behind
            buf.truncate(start);
            return Err(e);
        }
    }

    packet.finish(sequence_id);
    Ok(())
}
