//! Row packets of the text and binary protocols.

use crate::constant::ColumnType;
use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_lenenc_bytes, read_lenenc_bytes_nullable, read_u8};
use crate::protocol::column::ColumnInfo;

/// A text protocol row: one length-encoded string (or 0xFB for NULL) per column.
#[derive(Debug, Clone, Copy)]
pub struct TextRow<'a> {
    payload: &'a [u8],
    num_columns: usize,
}

impl<'a> TextRow<'a> {
    /// Wrap a row payload.
    pub fn new(payload: &'a [u8], num_columns: usize) -> Self {
        Self {
            payload,
            num_columns,
        }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.num_columns
    }

    /// True if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.num_columns == 0
    }

    /// Raw payload.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.payload
    }

    /// Iterate over column values (`None` = NULL).
    pub fn iter(&self) -> TextValues<'a> {
        TextValues {
            remaining: self.payload,
            left: self.num_columns,
        }
    }
}

/// Iterator over text row values.
#[derive(Debug, Clone)]
pub struct TextValues<'a> {
    remaining: &'a [u8],
    left: usize,
}

impl<'a> Iterator for TextValues<'a> {
    type Item = Result<Option<&'a [u8]>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.left == 0 {
            return None;
        }
        self.left -= 1;
        match read_lenenc_bytes_nullable(self.remaining) {
            Ok((value, rest)) => {
                self.remaining = rest;
                Some(Ok(value))
            }
            Err(e) => {
                self.left = 0;
                Some(Err(e))
            }
        }
    }
}

/// A binary protocol row: `0x00`, a NULL bitmap with a 2-bit offset, then the
/// non-NULL values in their binary encodings.
#[derive(Debug, Clone, Copy)]
pub struct BinaryRow<'a> {
    null_bitmap: &'a [u8],
    values: &'a [u8],
    columns: &'a [ColumnInfo],
}

impl<'a> BinaryRow<'a> {
    /// Parse the row header and NULL bitmap.
    pub fn new(payload: &'a [u8], columns: &'a [ColumnInfo]) -> Result<Self> {
        let (header, data) = read_u8(payload)?;
        if header != 0x00 {
            return Err(Error::Protocol(format!(
                "binary row must start with 0x00, got {header:#04x}"
            )));
        }
        let (null_bitmap, values) = read_bytes(data, (columns.len() + 7 + 2) / 8)?;
        Ok(Self {
            null_bitmap,
            values,
            columns,
        })
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// True if column `index` is NULL.
    pub fn is_null(&self, index: usize) -> bool {
        let bit = index + 2;
        self.null_bitmap
            .get(bit / 8)
            .is_some_and(|byte| byte & (1 << (bit % 8)) != 0)
    }

    /// Iterate over column values (`None` = NULL). Each value is the raw binary encoding.
    pub fn iter(&self) -> BinaryValues<'a> {
        BinaryValues {
            row: *self,
            remaining: self.values,
            index: 0,
        }
    }
}

/// Iterator over binary row values.
#[derive(Debug, Clone)]
pub struct BinaryValues<'a> {
    row: BinaryRow<'a>,
    remaining: &'a [u8],
    index: usize,
}

impl<'a> Iterator for BinaryValues<'a> {
    type Item = Result<Option<&'a [u8]>>;

    fn next(&mut self) -> Option<Self::Item> {
        let column = self.row.columns.get(self.index)?;
        let index = self.index;
        self.index += 1;
        if self.row.is_null(index) {
            return Some(Ok(None));
        }
        match split_binary_value(column.column_type, self.remaining) {
            Ok((value, rest)) => {
                self.remaining = rest;
                Some(Ok(Some(value)))
            }
            Err(e) => {
                self.index = self.row.columns.len();
                Some(Err(e))
            }
        }
    }
}

/// Split one binary-encoded value of type `column_type` off the front of `data`.
///
/// Temporal values keep their length byte stripped: the returned slice is the
/// 0/4/7/11 (date-time) or 0/8/12 (time) byte body.
pub fn split_binary_value(column_type: ColumnType, data: &[u8]) -> Result<(&[u8], &[u8])> {
    match column_type {
        ColumnType::Null => Ok((&data[..0], data)),
        ColumnType::Tiny => read_bytes(data, 1),
        ColumnType::Short | ColumnType::Year => read_bytes(data, 2),
        ColumnType::Long | ColumnType::Int24 | ColumnType::Float => read_bytes(data, 4),
        ColumnType::LongLong | ColumnType::Double => read_bytes(data, 8),
        ColumnType::Date
        | ColumnType::NewDate
        | ColumnType::DateTime
        | ColumnType::DateTime2
        | ColumnType::Timestamp
        | ColumnType::Timestamp2
        | ColumnType::Time
        | ColumnType::Time2 => {
            let (len, rest) = read_u8(data)?;
            read_bytes(rest, usize::from(len))
        }
        _ => read_lenenc_bytes(data),
    }
}

/// Pull the next value from a row iterator, failing if the row is short.
pub(crate) fn next_value<'a, I>(iter: &mut I) -> Result<Option<&'a [u8]>>
where
    I: Iterator<Item = Result<Option<&'a [u8]>>>,
{
    iter.next()
        .unwrap_or_else(|| Err(Error::Decode("row has fewer columns than expected".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::ColumnFlags;

    fn info(column_type: ColumnType) -> ColumnInfo {
        ColumnInfo {
            column_type,
            flags: ColumnFlags::default(),
            charset: 45,
            length: 0,
            decimals: 0,
        }
    }

    #[test]
    fn test_text_row_with_null() {
        let payload = [1, b'1', 0xFB, 3, b'a', b'b', b'c'];
        let row = TextRow::new(&payload, 3);
        let values: Vec<_> = row.iter().collect::<Result<_>>().unwrap();
        assert_eq!(values, vec![Some(&b"1"[..]), None, Some(&b"abc"[..])]);
    }

    #[test]
    fn test_text_row_truncated() {
        let payload = [5, b'1'];
        let row = TextRow::new(&payload, 1);
        assert!(row.iter().next().unwrap().is_err());
    }

    #[test]
    fn test_binary_row() {
        let columns = [
            info(ColumnType::Long),
            info(ColumnType::VarString),
            info(ColumnType::LongLong),
            info(ColumnType::DateTime),
        ];
        // column 2 is NULL: bit 2 + 2 = 4
        let mut payload = vec![0x00, 0b0001_0000];
        payload.extend_from_slice(&7i32.to_le_bytes());
        payload.extend_from_slice(&[2, b'h', b'i']);
        payload.extend_from_slice(&[4, 0xE8, 0x07, 1, 31]);
        let row = BinaryRow::new(&payload, &columns).unwrap();
        assert!(row.is_null(2));
        let values: Vec<_> = row.iter().collect::<Result<_>>().unwrap();
        assert_eq!(values[0], Some(&7i32.to_le_bytes()[..]));
        assert_eq!(values[1], Some(&b"hi"[..]));
        assert_eq!(values[2], None);
        assert_eq!(values[3], Some(&[0xE8, 0x07, 1, 31][..]));
    }

    #[test]
    fn test_binary_row_bad_header() {
        let columns = [info(ColumnType::Long)];
        assert!(BinaryRow::new(&[0x01, 0x00], &columns).is_err());
    }

    #[test]
    fn test_next_value_short_row() {
        let payload = [1, b'1'];
        let row = TextRow::new(&payload, 1);
        let mut iter = row.iter();
        assert!(next_value(&mut iter).unwrap().is_some());
        assert!(next_value(&mut iter).is_err());
    }
}
