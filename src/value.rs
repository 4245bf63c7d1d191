//! Owned column values for dynamic rows and cached results.

use crate::constant::ColumnType;
use crate::conversion::{FromValue, ParamType, ToValue, text_str};
use crate::error::{Error, Result};
use crate::protocol::codec::write_lenenc_bytes;
use crate::protocol::column::ColumnInfo;

/// DATE, DATETIME and TIMESTAMP values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: u32,
}

impl DateTime {
    /// Decode the binary body (0, 4, 7 or 11 bytes, length byte already stripped).
    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut dt = Self::default();
        match bytes.len() {
            0 => {}
            4 | 7 | 11 => {
                dt.year = u16::from_le_bytes([bytes[0], bytes[1]]);
                dt.month = bytes[2];
                dt.day = bytes[3];
                if bytes.len() >= 7 {
                    dt.hour = bytes[4];
                    dt.minute = bytes[5];
                    dt.second = bytes[6];
                }
                if bytes.len() == 11 {
                    dt.microsecond = u32::from_le_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]);
                }
            }
            n => return Err(Error::Decode(format!("invalid datetime length: {}", n))),
        }
        Ok(dt)
    }

    /// Parse `YYYY-MM-DD[ HH:MM:SS[.ffffff]]`.
    pub fn from_text(bytes: &[u8]) -> Result<Self> {
        let s = text_str(bytes)?;
        let invalid = || Error::Decode(format!("invalid datetime: {:?}", s));
        let (date, time) = match s.split_once(' ') {
            Some((date, time)) => (date, Some(time)),
            None => (s, None),
        };
        let mut parts = date.splitn(3, '-');
        let mut dt = Self {
            year: parse_field(parts.next(), &invalid)?,
            month: parse_field(parts.next(), &invalid)?,
            day: parse_field(parts.next(), &invalid)?,
            ..Self::default()
        };
        if let Some(time) = time {
            let t = Time::from_text(time.as_bytes())?;
            if t.negative || t.days > 0 {
                return Err(invalid());
            }
            dt.hour = t.hour;
            dt.minute = t.minute;
            dt.second = t.second;
            dt.microsecond = t.microsecond;
        }
        Ok(dt)
    }

    /// Append the binary encoding (length byte + shortest body).
    pub fn encode(&self, out: &mut Vec<u8>) {
        let has_time = self.hour != 0 || self.minute != 0 || self.second != 0;
        let len: u8 = if self.microsecond != 0 {
            11
        } else if has_time {
            7
        } else if self.year != 0 || self.month != 0 || self.day != 0 {
            4
        } else {
            0
        };
        out.push(len);
        if len >= 4 {
            out.extend_from_slice(&self.year.to_le_bytes());
            out.push(self.month);
            out.push(self.day);
        }
        if len >= 7 {
            out.push(self.hour);
            out.push(self.minute);
            out.push(self.second);
        }
        if len == 11 {
            out.extend_from_slice(&self.microsecond.to_le_bytes());
        }
    }
}

/// TIME values (a signed duration, possibly longer than a day).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Time {
    pub negative: bool,
    pub days: u32,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: u32,
}

impl Time {
    /// Decode the binary body (0, 8 or 12 bytes, length byte already stripped).
    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut t = Self::default();
        match bytes.len() {
            0 => {}
            8 | 12 => {
                t.negative = bytes[0] == 1;
                t.days = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
                t.hour = bytes[5];
                t.minute = bytes[6];
                t.second = bytes[7];
                if bytes.len() == 12 {
                    t.microsecond = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
                }
            }
            n => return Err(Error::Decode(format!("invalid time length: {}", n))),
        }
        Ok(t)
    }

    /// Parse `[-]HHH:MM:SS[.ffffff]`.
    pub fn from_text(bytes: &[u8]) -> Result<Self> {
        let s = text_str(bytes)?;
        let invalid = || Error::Decode(format!("invalid time: {:?}", s));
        let (negative, rest) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (hms, fraction) = match rest.split_once('.') {
            Some((hms, fraction)) => (hms, Some(fraction)),
            None => (rest, None),
        };
        let mut parts = hms.splitn(3, ':');
        let hours: u32 = parse_field(parts.next(), &invalid)?;
        let minute = parse_field(parts.next(), &invalid)?;
        let second = parse_field(parts.next(), &invalid)?;
        let microsecond = match fraction {
            None => 0,
            Some(f) if f.len() <= 6 && f.bytes().all(|b| b.is_ascii_digit()) => {
                let digits: u32 = if f.is_empty() { 0 } else { f.parse().map_err(|_| invalid())? };
                digits * 10u32.pow(6 - f.len() as u32)
            }
            Some(_) => return Err(invalid()),
        };
        Ok(Self {
            negative,
            days: hours / 24,
            hour: (hours % 24) as u8,
            minute,
            second,
            microsecond,
        })
    }

    /// Append the binary encoding (length byte + shortest body).
    pub fn encode(&self, out: &mut Vec<u8>) {
        let zero = self.days == 0
            && self.hour == 0
            && self.minute == 0
            && self.second == 0
            && self.microsecond == 0;
        if zero {
            out.push(0);
            return;
        }
        out.push(if self.microsecond != 0 { 12 } else { 8 });
        out.push(u8::from(self.negative));
        out.extend_from_slice(&self.days.to_le_bytes());
        out.push(self.hour);
        out.push(self.minute);
        out.push(self.second);
        if self.microsecond != 0 {
            out.extend_from_slice(&self.microsecond.to_le_bytes());
        }
    }
}

fn parse_field<T: std::str::FromStr>(
    part: Option<&str>,
    invalid: &dyn Fn() -> Error,
) -> Result<T> {
    part.and_then(|p| p.parse().ok()).ok_or_else(invalid)
}

/// A decoded column value.
///
/// Integers keep their signedness, DECIMAL/JSON/strings/blobs stay as raw bytes,
/// and temporal columns are decoded into [`DateTime`] / [`Time`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    Bytes(Vec<u8>),
    DateTime(DateTime),
    Time(Time),
}

impl Value {
    /// True for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// String contents of a `Bytes` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Bytes(bytes) => simdutf8::compat::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    /// Integer contents, converting unsigned values that fit.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }
}

impl FromValue<'_> for Value {
    fn from_null() -> Result<Self> {
        Ok(Self::Null)
    }

    fn from_text(col: &ColumnInfo, bytes: &[u8]) -> Result<Self> {
        match col.column_type {
            ty if ty.is_integer() => {
                if col.is_unsigned() {
                    u64::from_text(col, bytes).map(Self::UInt)
                } else {
                    i64::from_text(col, bytes).map(Self::Int)
                }
            }
            ColumnType::Float => f32::from_text(col, bytes).map(Self::Float),
            ColumnType::Double => f64::from_text(col, bytes).map(Self::Double),
            ColumnType::Time | ColumnType::Time2 => Time::from_text(bytes).map(Self::Time),
            ty if ty.is_temporal() => DateTime::from_text(bytes).map(Self::DateTime),
            _ => Ok(Self::Bytes(bytes.to_vec())),
        }
    }

    fn from_binary(col: &ColumnInfo, bytes: &[u8]) -> Result<Self> {
        match col.column_type {
            ty if ty.is_integer() => {
                if col.is_unsigned() {
                    u64::from_binary(col, bytes).map(Self::UInt)
                } else {
                    i64::from_binary(col, bytes).map(Self::Int)
                }
            }
            ColumnType::Float => f32::from_binary(col, bytes).map(Self::Float),
            ColumnType::Double => f64::from_binary(col, bytes).map(Self::Double),
            ColumnType::Time | ColumnType::Time2 => Time::from_binary(bytes).map(Self::Time),
            ty if ty.is_temporal() => DateTime::from_binary(bytes).map(Self::DateTime),
            _ => Ok(Self::Bytes(bytes.to_vec())),
        }
    }
}

impl ToValue for Value {
    fn param_type(&self) -> ParamType {
        match self {
            Self::Null => ParamType::new(ColumnType::Null),
            Self::Int(_) => ParamType::new(ColumnType::LongLong),
            Self::UInt(_) => ParamType::unsigned(ColumnType::LongLong),
            Self::Float(_) => ParamType::new(ColumnType::Float),
            Self::Double(_) => ParamType::new(ColumnType::Double),
            Self::Bytes(_) => ParamType::new(ColumnType::VarString),
            Self::DateTime(_) => ParamType::new(ColumnType::DateTime),
            Self::Time(_) => ParamType::new(ColumnType::Time),
        }
    }

    fn is_null(&self) -> bool {
        Value::is_null(self)
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Self::Null => {}
            Self::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::UInt(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::Double(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::Bytes(v) => write_lenenc_bytes(out, v),
            Self::DateTime(v) => v.encode(out),
            Self::Time(v) => v.encode(out),
        }
        Ok(())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Bytes(v.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Bytes(v.into_bytes())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
