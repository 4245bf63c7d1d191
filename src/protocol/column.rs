//! Column definition packets.

use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::constant::{BINARY_COLLATION, ColumnFlags, ColumnType};
use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_lenenc_bytes, read_u32};

/// Fixed-size tail of a column definition (13 bytes).
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct ColumnDefinitionTail {
    /// Length of the fixed fields, always 0x0c
    pub fixed_len: u8,
    /// Column collation
    pub charset: U16LE,
    /// Maximum display length
    pub column_length: U32LE,
    /// Column type byte
    pub column_type: u8,
    /// Column flags
    pub flags: U16LE,
    /// Decimal digits
    pub decimals: u8,
    /// Filler
    pub reserved: [u8; 2],
}

/// Type information of a column, resolved once per result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Declared type
    pub column_type: ColumnType,
    /// Column flags (unsigned, binary, ...)
    pub flags: ColumnFlags,
    /// Column collation
    pub charset: u16,
    /// Maximum display length
    pub length: u32,
    /// Decimal digits (scale)
    pub decimals: u8,
}

impl ColumnInfo {
    /// True for unsigned integer columns.
    pub fn is_unsigned(&self) -> bool {
        self.flags.is_unsigned()
    }

    /// True for binary string columns (BLOB/BINARY/VARBINARY).
    pub fn is_binary(&self) -> bool {
        self.charset == BINARY_COLLATION
    }
}

/// A parsed column definition.
#[derive(Debug, Clone, Copy)]
pub struct ColumnDefinition<'a> {
    /// Catalog (always `def`)
    pub catalog: &'a [u8],
    /// Schema name
    pub schema: &'a [u8],
    /// Table alias
    pub table: &'a [u8],
    /// Physical table name
    pub org_table: &'a [u8],
    /// Column alias
    pub name: &'a [u8],
    /// Physical column name
    pub org_name: &'a [u8],
    /// Type information
    pub info: ColumnInfo,
}

impl<'a> ColumnDefinition<'a> {
    /// Parse a column definition (protocol 4.1) payload.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (catalog, data) = read_lenenc_bytes(payload)?;
        let (schema, data) = read_lenenc_bytes(data)?;
        let (table, data) = read_lenenc_bytes(data)?;
        let (org_table, data) = read_lenenc_bytes(data)?;
        let (name, data) = read_lenenc_bytes(data)?;
        let (org_name, data) = read_lenenc_bytes(data)?;
        let info = parse_tail(data)?;
        Ok(Self {
            catalog,
            schema,
            table,
            org_table,
            name,
            org_name,
            info,
        })
    }

    /// Column alias as a string (lossy for invalid UTF-8).
    pub fn name_str(&self) -> std::borrow::Cow<'a, str> {
        String::from_utf8_lossy(self.name)
    }
}

fn parse_tail(data: &[u8]) -> Result<ColumnInfo> {
    let (tail, _default_values) = read_bytes(data, size_of::<ColumnDefinitionTail>())?;
    let tail = ColumnDefinitionTail::ref_from_bytes(tail)?;
    let column_type = ColumnType::from_u8(tail.column_type).ok_or_else(|| {
        Error::Protocol(format!("unknown column type {:#04x}", tail.column_type))
    })?;
    Ok(ColumnInfo {
        column_type,
        flags: ColumnFlags::new(tail.flags.get()),
        charset: tail.charset.get(),
        length: tail.column_length.get(),
        decimals: tail.decimals,
    })
}

/// Extract only the type information of a column definition payload.
pub fn parse_column_info(payload: &[u8]) -> Result<ColumnInfo> {
    let mut data = payload;
    for _ in 0..6 {
        let (_, rest) = read_lenenc_bytes(data)?;
        data = rest;
    }
    parse_tail(data)
}

/// Append a column definition payload to the column buffer (u32-LE length prefixed).
pub fn push_column(column_buffer: &mut Vec<u8>, payload: &[u8]) {
    column_buffer.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    column_buffer.extend_from_slice(payload);
}

/// Column definitions of the current result set.
///
/// Names are parsed lazily from the raw packets; type information is
/// available without parsing.
#[derive(Debug, Clone, Copy)]
pub struct ColumnDefs<'a> {
    raw: &'a [u8],
    info: &'a [ColumnInfo],
}

impl<'a> ColumnDefs<'a> {
    /// Create a view over the column buffer and the resolved type information.
    pub fn new(raw: &'a [u8], info: &'a [ColumnInfo]) -> Self {
        Self { raw, info }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.info.len()
    }

    /// True if the result set has no columns.
    pub fn is_empty(&self) -> bool {
        self.info.is_empty()
    }

    /// Type information of every column.
    pub fn info(&self) -> &'a [ColumnInfo] {
        self.info
    }

    /// Iterate over the full definitions.
    pub fn iter(&self) -> ColumnDefIter<'a> {
        ColumnDefIter { remaining: self.raw }
    }

    /// Full definition of column `index`.
    pub fn get(&self, index: usize) -> Result<ColumnDefinition<'a>> {
        self.iter()
            .nth(index)
            .unwrap_or_else(|| Err(Error::InvalidUsage(format!("no column {index}"))))
    }

    /// Column aliases.
    pub fn names(&self) -> Result<Vec<String>> {
        self.iter()
            .map(|def| def.map(|d| d.name_str().into_owned()))
            .collect()
    }
}

/// Iterator over column definitions stored in a column buffer.
#[derive(Debug, Clone)]
pub struct ColumnDefIter<'a> {
    remaining: &'a [u8],
}

impl<'a> Iterator for ColumnDefIter<'a> {
    type Item = Result<ColumnDefinition<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }
        let parsed = read_u32(self.remaining).and_then(|(len, rest)| {
            let (payload, rest) = read_bytes(rest, len as usize)?;
            self.remaining = rest;
            ColumnDefinition::parse(payload)
        });
        if parsed.is_err() {
            self.remaining = &[];
        }
        Some(parsed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::codec::write_lenenc_bytes;

    /// Build a column definition payload.
    pub(crate) fn column(name: &str, column_type: ColumnType, flags: u16) -> Vec<u8> {
        let mut out = Vec::new();
        for part in ["def", "test", "t", "t", name, name] {
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

    #[test]
    fn test_parse_column() {
        let payload = column("id", ColumnType::LongLong, ColumnFlags::UNSIGNED_FLAG);
        let def = ColumnDefinition::parse(&payload).unwrap();
        assert_eq!(def.name, b"id");
        assert_eq!(def.catalog, b"def");
        assert_eq!(def.info.column_type, ColumnType::LongLong);
        assert!(def.info.is_unsigned());
        assert_eq!(parse_column_info(&payload).unwrap(), def.info);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let mut payload = column("x", ColumnType::Long, 0);
        let type_pos = payload.len() - 6;
        payload[type_pos] = 0x42;
        assert!(ColumnDefinition::parse(&payload).is_err());
    }

    #[test]
    fn test_column_defs_view() {
        let mut raw = Vec::new();
        let a = column("a", ColumnType::Long, 0);
        let b = column("b", ColumnType::VarString, 0);
        push_column(&mut raw, &a);
        push_column(&mut raw, &b);
        let info = [parse_column_info(&a).unwrap(), parse_column_info(&b).unwrap()];
        let defs = ColumnDefs::new(&raw, &info);
        assert_eq!(defs.len(), 2);
        assert_eq!(defs.names().unwrap(), vec!["a", "b"]);
        assert_eq!(defs.get(1).unwrap().info.column_type, ColumnType::VarString);
        assert!(defs.get(2).is_err());
    }
}
