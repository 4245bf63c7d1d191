//! Generic response packets: OK, ERR, EOF, LOCAL INFILE request and the
//! COM_STMT_PREPARE OK header.

use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::constant::StatusFlags;
use crate::error::{Error, Result, ServerError};
use crate::protocol::codec::{read_bytes, read_lenenc_int, read_u8, read_u16};

/// First byte of an OK packet.
pub const OK_HEADER: u8 = 0x00;
/// First byte of an EOF packet (and of an auth switch request).
pub const EOF_HEADER: u8 = 0xFE;
/// First byte of an ERR packet.
pub const ERR_HEADER: u8 = 0xFF;
/// First byte of a LOCAL INFILE request.
pub const LOCAL_INFILE_HEADER: u8 = 0xFB;

/// Summary of a finished statement, from an OK packet or a result set's EOF.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OkPacket {
    /// Rows affected by INSERT/UPDATE/DELETE (0 for result sets)
    pub affected_rows: u64,
    /// AUTO_INCREMENT id generated by the statement
    pub last_insert_id: u64,
    /// Server status after the statement
    pub status_flags: StatusFlags,
    /// Number of warnings
    pub warnings: u16,
}

impl OkPacket {
    /// Parse an OK payload (including the 0x00 header byte).
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (header, data) = read_u8(payload)?;
        if header != OK_HEADER && header != EOF_HEADER {
            return Err(Error::Protocol(format!(
                "expected OK packet, got {header:#04x}"
            )));
        }
        let (affected_rows, data) = read_lenenc_int(data)?;
        let (last_insert_id, data) = read_lenenc_int(data)?;
        // Pre-4.1 servers stop here
        if data.len() < 4 {
            return Ok(Self {
                affected_rows,
                last_insert_id,
                ..Self::default()
            });
        }
        let (status, data) = read_u16(data)?;
        let (warnings, _info) = read_u16(data)?;
        Ok(Self {
            affected_rows,
            last_insert_id,
            status_flags: StatusFlags::new(status),
            warnings,
        })
    }

    /// True if another result follows this one.
    pub fn more_results(&self) -> bool {
        self.status_flags.more_results()
    }
}

/// EOF packet (0xFE with a payload shorter than 9 bytes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EofPacket {
    /// Number of warnings
    pub warnings: u16,
    /// Server status
    pub status_flags: StatusFlags,
}

impl EofPacket {
    /// Parse an EOF payload (including the 0xFE header byte).
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if !is_eof(payload) {
            return Err(Error::Protocol("expected EOF packet".into()));
        }
        if payload.len() < 5 {
            return Ok(Self::default());
        }
        let (warnings, data) = read_u16(&payload[1..])?;
        let (status, _) = read_u16(data)?;
        Ok(Self {
            warnings,
            status_flags: StatusFlags::new(status),
        })
    }
}

impl From<EofPacket> for OkPacket {
    fn from(eof: EofPacket) -> Self {
        Self {
            affected_rows: 0,
            last_insert_id: 0,
            status_flags: eof.status_flags,
            warnings: eof.warnings,
        }
    }
}

/// True for an EOF packet. A row may also start with 0xFE, but then it is at least 9 bytes long.
#[inline]
pub fn is_eof(payload: &[u8]) -> bool {
    payload.first() == Some(&EOF_HEADER) && payload.len() < 9
}

/// True for an ERR packet.
#[inline]
pub fn is_err(payload: &[u8]) -> bool {
    payload.first() == Some(&ERR_HEADER)
}

/// Parse an ERR payload (including the 0xFF header byte).
pub fn parse_err(payload: &[u8]) -> Result<ServerError> {
    let (header, data) = read_u8(payload)?;
    if header != ERR_HEADER {
        return Err(Error::Protocol(format!(
            "expected ERR packet, got {header:#04x}"
        )));
    }
    let (code, data) = read_u16(data)?;
    let (sql_state, message) = match data.split_first() {
        Some((&b'#', rest)) if rest.len() >= 5 => {
            let (state, message) = read_bytes(rest, 5)?;
            (String::from_utf8_lossy(state).into_owned(), message)
        }
        _ => ("HY000".to_string(), data),
    };
    Ok(ServerError {
        code,
        sql_state,
        message: String::from_utf8_lossy(message).into_owned(),
    })
}

/// Turn an ERR payload into an `Error`, falling back to a protocol error if it is malformed.
pub fn server_error(payload: &[u8]) -> Error {
    match parse_err(payload) {
        Ok(err) => Error::Server(err),
        Err(e) => e,
    }
}

/// Parse a LOCAL INFILE request (0xFB + file name).
pub fn parse_local_infile(payload: &[u8]) -> Result<String> {
    match payload.split_first() {
        Some((&LOCAL_INFILE_HEADER, name)) => Ok(String::from_utf8_lossy(name).into_owned()),
        _ => Err(Error::Protocol("expected LOCAL INFILE request".into())),
    }
}

/// Fixed part of the COM_STMT_PREPARE OK response (after the status byte).
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct PrepareOkTail {
    /// Server-side statement id
    pub statement_id: U32LE,
    /// Columns in the result set (0 if none)
    pub num_columns: U16LE,
    /// Parameter placeholders
    pub num_params: U16LE,
    /// Always 0
    pub reserved: u8,
    /// Warnings
    pub warning_count: U16LE,
}

/// COM_STMT_PREPARE OK response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareOk {
    /// Server-side statement id
    pub statement_id: u32,
    /// Columns in the result set
    pub num_columns: u16,
    /// Parameter placeholders
    pub num_params: u16,
    /// Warnings
    pub warning_count: u16,
}

impl PrepareOk {
    /// Parse a prepare OK payload (including the 0x00 status byte).
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (status, data) = read_u8(payload)?;
        if status != OK_HEADER {
            return Err(Error::Protocol(format!(
                "expected prepare OK, got {status:#04x}"
            )));
        }
        let size = size_of::<PrepareOkTail>();
        let (tail, _) = read_bytes(data, size)?;
        let tail = PrepareOkTail::ref_from_bytes(tail)?;
        Ok(Self {
            statement_id: tail.statement_id.get(),
            num_columns: tail.num_columns.get(),
            num_params: tail.num_params.get(),
            warning_count: tail.warning_count.get(),
        })
    }
}
