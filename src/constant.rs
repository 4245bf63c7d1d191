//! MySQL protocol constants.

/// Largest payload a single packet can carry (16 MiB - 1).
pub const MAX_PAYLOAD_LEN: usize = 0xFF_FFFF;

/// Max packet size the client announces in the handshake response.
pub const MAX_ALLOWED_PACKET: u32 = 0x4000_0000;

/// Chunk size for streaming a LOCAL INFILE to the server.
pub const LOCAL_INFILE_CHUNK: usize = 64 * 1024;

/// utf8mb4_general_ci
pub const UTF8MB4_GENERAL_CI: u8 = 45;

/// binary collation, used to detect binary string columns
pub const BINARY_COLLATION: u16 = 63;

/// MySQL command bytes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandByte {
    Quit = 0x01,
    InitDb = 0x02,
    Query = 0x03,
    FieldList = 0x04,
    Statistics = 0x09,
    ProcessKill = 0x0c,
    Ping = 0x0e,
    ChangeUser = 0x11,
    StmtPrepare = 0x16,
    StmtExecute = 0x17,
    StmtSendLongData = 0x18,
    StmtClose = 0x19,
    StmtReset = 0x1a,
    SetOption = 0x1b,
    StmtFetch = 0x1c,
    ResetConnection = 0x1f,
}

/// Capability flags negotiated during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilityFlags(pub u32);

impl CapabilityFlags {
    pub const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;
    pub const CLIENT_FOUND_ROWS: u32 = 0x0000_0002;
    pub const CLIENT_LONG_FLAG: u32 = 0x0000_0004;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
    pub const CLIENT_NO_SCHEMA: u32 = 0x0000_0010;
    pub const CLIENT_COMPRESS: u32 = 0x0000_0020;
    pub const CLIENT_ODBC: u32 = 0x0000_0040;
    pub const CLIENT_LOCAL_FILES: u32 = 0x0000_0080;
    pub const CLIENT_IGNORE_SPACE: u32 = 0x0000_0100;
    pub const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
    pub const CLIENT_INTERACTIVE: u32 = 0x0000_0400;
    pub const CLIENT_SSL: u32 = 0x0000_0800;
    pub const CLIENT_IGNORE_SIGPIPE: u32 = 0x0000_1000;
    pub const CLIENT_TRANSACTIONS: u32 = 0x0000_2000;
    pub const CLIENT_RESERVED: u32 = 0x0000_4000;
    pub const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
    pub const CLIENT_MULTI_STATEMENTS: u32 = 0x0001_0000;
    pub const CLIENT_MULTI_RESULTS: u32 = 0x0002_0000;
    pub const CLIENT_PS_MULTI_RESULTS: u32 = 0x0004_0000;
    pub const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;
    pub const CLIENT_CONNECT_ATTRS: u32 = 0x0010_0000;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 0x0020_0000;
    pub const CLIENT_CAN_HANDLE_EXPIRED_PASSWORDS: u32 = 0x0040_0000;
    pub const CLIENT_SESSION_TRACK: u32 = 0x0080_0000;
    pub const CLIENT_DEPRECATE_EOF: u32 = 0x0100_0000;

    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn has(&self, flag: u32) -> bool {
        (self.0 & flag) != 0
    }

    pub fn set(&mut self, flag: u32) {
        self.0 |= flag;
    }

    pub fn unset(&mut self, flag: u32) {
        self.0 &= !flag;
    }

    /// Flags present in both `self` and `other`.
    pub fn intersect(self, other: CapabilityFlags) -> CapabilityFlags {
        CapabilityFlags(self.0 & other.0)
    }
}

/// Server status flags reported in OK and EOF packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFlags(pub u16);

impl StatusFlags {
    pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
    pub const SERVER_STATUS_NO_GOOD_INDEX_USED: u16 = 0x0010;
    pub const SERVER_STATUS_NO_INDEX_USED: u16 = 0x0020;
    pub const SERVER_STATUS_CURSOR_EXISTS: u16 = 0x0040;
    pub const SERVER_STATUS_LAST_ROW_SENT: u16 = 0x0080;
    pub const SERVER_STATUS_DB_DROPPED: u16 = 0x0100;
    pub const SERVER_STATUS_NO_BACKSLASH_ESCAPES: u16 = 0x0200;
    pub const SERVER_STATUS_METADATA_CHANGED: u16 = 0x0400;
    pub const SERVER_QUERY_WAS_SLOW: u16 = 0x0800;
    pub const SERVER_PS_OUT_PARAMS: u16 = 0x1000;
    pub const SERVER_STATUS_IN_TRANS_READONLY: u16 = 0x2000;
    pub const SERVER_SESSION_STATE_CHANGED: u16 = 0x4000;

    pub fn new(value: u16) -> Self {
        Self(value)
    }

    pub fn has(&self, flag: u16) -> bool {
        (self.0 & flag) != 0
    }

    pub fn in_transaction(&self) -> bool {
        self.has(Self::SERVER_STATUS_IN_TRANS)
    }

    pub fn more_results(&self) -> bool {
        self.has(Self::SERVER_MORE_RESULTS_EXISTS)
    }

    pub fn cursor_exists(&self) -> bool {
        self.has(Self::SERVER_STATUS_CURSOR_EXISTS)
    }

    pub fn last_row_sent(&self) -> bool {
        self.has(Self::SERVER_STATUS_LAST_ROW_SENT)
    }

    pub fn out_params(&self) -> bool {
        self.has(Self::SERVER_PS_OUT_PARAMS)
    }
}

/// Column definition flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColumnFlags(pub u16);

impl ColumnFlags {
    pub const NOT_NULL_FLAG: u16 = 0x0001;
    pub const PRI_KEY_FLAG: u16 = 0x0002;
    pub const UNIQUE_KEY_FLAG: u16 = 0x0004;
    pub const MULTIPLE_KEY_FLAG: u16 = 0x0008;
    pub const BLOB_FLAG: u16 = 0x0010;
    pub const UNSIGNED_FLAG: u16 = 0x0020;
    pub const ZEROFILL_FLAG: u16 = 0x0040;
    pub const BINARY_FLAG: u16 = 0x0080;
    pub const ENUM_FLAG: u16 = 0x0100;
    pub const AUTO_INCREMENT_FLAG: u16 = 0x0200;
    pub const TIMESTAMP_FLAG: u16 = 0x0400;
    pub const SET_FLAG: u16 = 0x0800;

    pub fn new(value: u16) -> Self {
        Self(value)
    }

    pub fn has(&self, flag: u16) -> bool {
        (self.0 & flag) != 0
    }

    pub fn is_unsigned(&self) -> bool {
        self.has(Self::UNSIGNED_FLAG)
    }
}

/// MySQL column types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0a,
    Time = 0x0b,
    DateTime = 0x0c,
    Year = 0x0d,
    NewDate = 0x0e,
    VarChar = 0x0f,
    Bit = 0x10,
    Timestamp2 = 0x11,
    DateTime2 = 0x12,
    Time2 = 0x13,
    Json = 0xf5,
    NewDecimal = 0xf6,
    Enum = 0xf7,
    Set = 0xf8,
    TinyBlob = 0xf9,
    MediumBlob = 0xfa,
    LongBlob = 0xfb,
    Blob = 0xfc,
    VarString = 0xfd,
    String = 0xfe,
    Geometry = 0xff,
}

impl ColumnType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Decimal),
            0x01 => Some(Self::Tiny),
            0x02 => Some(Self::Short),
            0x03 => Some(Self::Long),
            0x04 => Some(Self::Float),
            0x05 => Some(Self::Double),
            0x06 => Some(Self::Null),
            0x07 => Some(Self::Timestamp),
            0x08 => Some(Self::LongLong),
            0x09 => Some(Self::Int24),
            0x0a => Some(Self::Date),
            0x0b => Some(Self::Time),
            0x0c => Some(Self::DateTime),
            0x0d => Some(Self::Year),
            0x0e => Some(Self::NewDate),
            0x0f => Some(Self::VarChar),
            0x10 => Some(Self::Bit),
            0x11 => Some(Self::Timestamp2),
            0x12 => Some(Self::DateTime2),
            0x13 => Some(Self::Time2),
            0xf5 => Some(Self::Json),
            0xf6 => Some(Self::NewDecimal),
            0xf7 => Some(Self::Enum),
            0xf8 => Some(Self::Set),
            0xf9 => Some(Self::TinyBlob),
            0xfa => Some(Self::MediumBlob),
            0xfb => Some(Self::LongBlob),
            0xfc => Some(Self::Blob),
            0xfd => Some(Self::VarString),
            0xfe => Some(Self::String),
            0xff => Some(Self::Geometry),
            _ => None,
        }
    }

    /// Integer column types.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Tiny | Self::Short | Self::Long | Self::LongLong | Self::Int24 | Self::Year
        )
    }

    /// Date/time column types.
    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            Self::Date
                | Self::NewDate
                | Self::DateTime
                | Self::DateTime2
                | Self::Timestamp
                | Self::Timestamp2
                | Self::Time
                | Self::Time2
        )
    }
}

/// Cursor type byte of COM_STMT_EXECUTE.
pub mod cursor_type {
    pub const NO_CURSOR: u8 = 0x00;
    pub const READ_ONLY: u8 = 0x01;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_intersection() {
        let server = CapabilityFlags::new(
            CapabilityFlags::CLIENT_PROTOCOL_41 | CapabilityFlags::CLIENT_SSL,
        );
        let client = CapabilityFlags::new(
            CapabilityFlags::CLIENT_PROTOCOL_41 | CapabilityFlags::CLIENT_COMPRESS,
        );
        let negotiated = server.intersect(client);
        assert!(negotiated.has(CapabilityFlags::CLIENT_PROTOCOL_41));
        assert!(!negotiated.has(CapabilityFlags::CLIENT_SSL));
        assert!(!negotiated.has(CapabilityFlags::CLIENT_COMPRESS));
    }

    #[test]
    fn test_status_flags() {
        let flags = StatusFlags::new(0x0009);
        assert!(flags.in_transaction());
        assert!(flags.more_results());
        assert!(!flags.cursor_exists());
    }

    #[test]
    fn test_column_type_roundtrip() {
        for byte in [0x00u8, 0x03, 0x0c, 0xf6, 0xfd, 0xff] {
            let ty = ColumnType::from_u8(byte).unwrap();
            assert_eq!(ty as u8, byte);
        }
        assert!(ColumnType::from_u8(0x20).is_none());
    }
}
