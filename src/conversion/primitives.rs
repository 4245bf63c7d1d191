//! Primitive type implementations (bool, integers, floats).

use crate::constant::ColumnType;
use crate::error::{Error, Result};
use crate::protocol::column::ColumnInfo;

use super::{FromValue, ParamType, ToValue, text_str};

/// Decode a binary integer of any width according to the column type and sign flag.
fn binary_integer(col: &ColumnInfo, bytes: &[u8]) -> Result<i128> {
    let unsigned = col.is_unsigned();
    let value = match (col.column_type, bytes.len()) {
        (ColumnType::Tiny, 1) => {
            if unsigned {
                i128::from(bytes[0])
            } else {
                i128::from(bytes[0] as i8)
            }
        }
        (ColumnType::Short | ColumnType::Year, 2) => {
            let arr = [bytes[0], bytes[1]];
            if unsigned {
                i128::from(u16::from_le_bytes(arr))
            } else {
                i128::from(i16::from_le_bytes(arr))
            }
        }
        (ColumnType::Long | ColumnType::Int24, 4) => {
            let arr = [bytes[0], bytes[1], bytes[2], bytes[3]];
            if unsigned {
                i128::from(u32::from_le_bytes(arr))
            } else {
                i128::from(i32::from_le_bytes(arr))
            }
        }
        (ColumnType::LongLong, 8) => {
            let mut arr = [0u8; 8];
            arr.copy_from_slice(bytes);
            if unsigned {
                i128::from(u64::from_le_bytes(arr))
            } else {
                i128::from(i64::from_le_bytes(arr))
            }
        }
        (ty, len) if ty.is_integer() => {
            return Err(Error::Decode(format!(
                "invalid {:?} length: {}",
                ty, len
            )));
        }
        (ty, _) => {
            return Err(Error::Decode(format!("cannot decode {:?} as integer", ty)));
        }
    };
    Ok(value)
}

/// Parse a text integer. DECIMAL columns are accepted when they carry no fraction.
fn text_integer(col: &ColumnInfo, bytes: &[u8]) -> Result<i128> {
    if !col.column_type.is_integer()
        && !matches!(col.column_type, ColumnType::Decimal | ColumnType::NewDecimal)
    {
        return Err(Error::Decode(format!(
            "cannot decode {:?} as integer",
            col.column_type
        )));
    }
    let s = text_str(bytes)?;
    s.parse()
        .map_err(|e| Error::Decode(format!("invalid integer {:?}: {}", s, e)))
}

macro_rules! impl_integer {
    ($($ty:ty => $column_type:ident, $signed:expr);+ $(;)?) => {
        $(
            impl FromValue<'_> for $ty {
                fn from_text(col: &ColumnInfo, bytes: &[u8]) -> Result<Self> {
                    let value = text_integer(col, bytes)?;
                    <$ty>::try_from(value).map_err(|_| {
                        Error::Decode(format!("{} out of range for {}", value, stringify!($ty)))
                    })
                }

                fn from_binary(col: &ColumnInfo, bytes: &[u8]) -> Result<Self> {
                    let value = binary_integer(col, bytes)?;
                    <$ty>::try_from(value).map_err(|_| {
                        Error::Decode(format!("{} out of range for {}", value, stringify!($ty)))
                    })
                }
            }

            impl ToValue for $ty {
                fn param_type(&self) -> ParamType {
                    if $signed {
                        ParamType::new(ColumnType::$column_type)
                    } else {
                        ParamType::unsigned(ColumnType::$column_type)
                    }
                }

                fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
                    out.extend_from_slice(&self.to_le_bytes());
                    Ok(())
                }
            }
        )+
    };
}

impl_integer! {
    i8 => Tiny, true;
    u8 => Tiny, false;
    i16 => Short, true;
    u16 => Short, false;
    i32 => Long, true;
    u32 => Long, false;
    i64 => LongLong, true;
    u64 => LongLong, false;
}

// === Boolean ===

impl FromValue<'_> for bool {
    fn from_text(col: &ColumnInfo, bytes: &[u8]) -> Result<Self> {
        match bytes {
            b"1" => Ok(true),
            b"0" => Ok(false),
            _ => text_integer(col, bytes).map(|v| v != 0),
        }
    }

    fn from_binary(col: &ColumnInfo, bytes: &[u8]) -> Result<Self> {
        binary_integer(col, bytes).map(|v| v != 0)
    }
}

impl ToValue for bool {
    fn param_type(&self) -> ParamType {
        ParamType::new(ColumnType::Tiny)
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        out.push(u8::from(*self));
        Ok(())
    }
}

// === Floating point ===

fn text_float(col: &ColumnInfo, bytes: &[u8]) -> Result<f64> {
    let numeric = col.column_type.is_integer()
        || matches!(
            col.column_type,
            ColumnType::Float | ColumnType::Double | ColumnType::Decimal | ColumnType::NewDecimal
        );
    if !numeric {
        return Err(Error::Decode(format!(
            "cannot decode {:?} as float",
            col.column_type
        )));
    }
    let s = text_str(bytes)?;
    s.parse()
        .map_err(|e| Error::Decode(format!("invalid float {:?}: {}", s, e)))
}

impl FromValue<'_> for f32 {
    fn from_text(col: &ColumnInfo, bytes: &[u8]) -> Result<Self> {
        if col.column_type != ColumnType::Float {
            return Err(Error::Decode(format!(
                "cannot decode {:?} as f32",
                col.column_type
            )));
        }
        let s = text_str(bytes)?;
        s.parse()
            .map_err(|e| Error::Decode(format!("invalid f32 {:?}: {}", s, e)))
    }

    fn from_binary(col: &ColumnInfo, bytes: &[u8]) -> Result<Self> {
        if col.column_type != ColumnType::Float {
            return Err(Error::Decode(format!(
                "cannot decode {:?} as f32",
                col.column_type
            )));
        }
        let arr: [u8; 4] = bytes
            .try_into()
            .map_err(|_| Error::Decode(format!("invalid f32 length: {}", bytes.len())))?;
        Ok(f32::from_le_bytes(arr))
    }
}

impl FromValue<'_> for f64 {
    fn from_text(col: &ColumnInfo, bytes: &[u8]) -> Result<Self> {
        text_float(col, bytes)
    }

    fn from_binary(col: &ColumnInfo, bytes: &[u8]) -> Result<Self> {
        match col.column_type {
            ColumnType::Double => {
                let arr: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| Error::Decode(format!("invalid f64 length: {}", bytes.len())))?;
                Ok(f64::from_le_bytes(arr))
            }
            ColumnType::Float => f32::from_binary(col, bytes).map(f64::from),
            // DECIMAL travels as a string even in the binary protocol
            ColumnType::Decimal | ColumnType::NewDecimal => text_float(col, bytes),
            other => Err(Error::Decode(format!("cannot decode {:?} as f64", other))),
        }
    }
}

impl ToValue for f32 {
    fn param_type(&self) -> ParamType {
        ParamType::new(ColumnType::Float)
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl ToValue for f64 {
    fn param_type(&self) -> ParamType {
        ParamType::new(ColumnType::Double)
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}
