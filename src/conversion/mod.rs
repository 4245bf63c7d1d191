//! Type encoding and decoding for the MySQL wire protocol.
//!
//! This module provides traits and implementations for converting between
//! Rust types and MySQL text/binary protocol values.

mod bytes;
mod primitives;
mod row;
mod string;

#[cfg(feature = "with-chrono")]
mod chrono;
#[cfg(feature = "with-rust-decimal")]
mod decimal;

use crate::constant::ColumnType;
use crate::error::{Error, Result};
use crate::protocol::column::ColumnInfo;
pub use row::FromRow;

/// Trait for decoding MySQL values into Rust types.
///
/// - `from_null()` - Handle NULL values
/// - `from_text()` - Decode from the text protocol (COM_QUERY results), where
///   every value is a string
/// - `from_binary()` - Decode from the binary protocol (prepared statements),
///   where the encoding depends on the column type
///
/// The column information lets implementations reject incompatible column
/// types with clear error messages.
pub trait FromValue<'a>: Sized {
    /// Decode from NULL value.
    ///
    /// Default implementation returns an error. Override for types that can
    /// represent NULL (like `Option<T>`).
    fn from_null() -> Result<Self> {
        Err(Error::Decode("unexpected NULL value".into()))
    }

    /// Decode from a text protocol value.
    fn from_text(col: &ColumnInfo, bytes: &'a [u8]) -> Result<Self>;

    /// Decode from a binary protocol value.
    fn from_binary(col: &ColumnInfo, bytes: &'a [u8]) -> Result<Self>;
}

/// Binary protocol type of a parameter: type byte plus the unsigned flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamType {
    /// Column type sent in the parameter type list
    pub column_type: ColumnType,
    /// Sets the 0x80 flag on the type
    pub unsigned: bool,
}

impl ParamType {
    /// Signed (or non-numeric) parameter type.
    pub const fn new(column_type: ColumnType) -> Self {
        Self {
            column_type,
            unsigned: false,
        }
    }

    /// Unsigned integer parameter type.
    pub const fn unsigned(column_type: ColumnType) -> Self {
        Self {
            column_type,
            unsigned: true,
        }
    }

    /// The two bytes written to the COM_STMT_EXECUTE type list.
    pub fn to_bytes(self) -> [u8; 2] {
        [self.column_type as u8, if self.unsigned { 0x80 } else { 0 }]
    }
}

/// Trait for encoding Rust values as prepared-statement parameters.
pub trait ToValue {
    /// Binary protocol type of this value.
    fn param_type(&self) -> ParamType;

    /// True if the value is sent as NULL (bit set in the NULL bitmap, no value bytes).
    fn is_null(&self) -> bool {
        false
    }

    /// Append the binary encoding of the value.
    fn encode(&self, out: &mut Vec<u8>) -> Result<()>;
}

/// Trait for encoding a parameter list.
pub trait ToParams {
    /// Number of parameters.
    fn param_count(&self) -> usize;

    /// Call `f` for every parameter in order.
    fn visit(&self, f: &mut dyn FnMut(&dyn ToValue) -> Result<()>) -> Result<()>;
}

// === Option<T> - NULL handling ===

impl<'a, T: FromValue<'a>> FromValue<'a> for Option<T> {
    fn from_null() -> Result<Self> {
        Ok(None)
    }

    fn from_text(col: &ColumnInfo, bytes: &'a [u8]) -> Result<Self> {
        T::from_text(col, bytes).map(Some)
    }

    fn from_binary(col: &ColumnInfo, bytes: &'a [u8]) -> Result<Self> {
        T::from_binary(col, bytes).map(Some)
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn param_type(&self) -> ParamType {
        match self {
            Some(v) => v.param_type(),
            None => ParamType::new(ColumnType::Null),
        }
    }

    fn is_null(&self) -> bool {
        match self {
            Some(v) => v.is_null(),
            None => true,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Some(v) => v.encode(out),
            None => Ok(()),
        }
    }
}

// === Reference support ===

impl<T: ToValue + ?Sized> ToValue for &T {
    fn param_type(&self) -> ParamType {
        (*self).param_type()
    }

    fn is_null(&self) -> bool {
        (*self).is_null()
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        (*self).encode(out)
    }
}

// === ToParams implementations ===

impl ToParams for () {
    fn param_count(&self) -> usize {
        0
    }

    fn visit(&self, _f: &mut dyn FnMut(&dyn ToValue) -> Result<()>) -> Result<()> {
        Ok(())
    }
}

impl<T: ToParams + ?Sized> ToParams for &T {
    fn param_count(&self) -> usize {
        (*self).param_count()
    }

    fn visit(&self, f: &mut dyn FnMut(&dyn ToValue) -> Result<()>) -> Result<()> {
        (*self).visit(f)
    }
}

impl<T: ToValue> ToParams for [T] {
    fn param_count(&self) -> usize {
        self.len()
    }

    fn visit(&self, f: &mut dyn FnMut(&dyn ToValue) -> Result<()>) -> Result<()> {
        for value in self {
            f(value)?;
        }
        Ok(())
    }
}

impl<T: ToValue> ToParams for Vec<T> {
    fn param_count(&self) -> usize {
        self.len()
    }

    fn visit(&self, f: &mut dyn FnMut(&dyn ToValue) -> Result<()>) -> Result<()> {
        self.as_slice().visit(f)
    }
}

// Tuple implementations via macro
macro_rules! impl_to_params {
    ($count:expr, $($idx:tt: $T:ident),+) => {
        impl<$($T: ToValue),+> ToParams for ($($T,)+) {
            fn param_count(&self) -> usize {
                $count
            }

            fn visit(&self, f: &mut dyn FnMut(&dyn ToValue) -> Result<()>) -> Result<()> {
                $(
                    f(&self.$idx)?;
                )+
                Ok(())
            }
        }
    };
}

impl_to_params!(1, 0: T0);
impl_to_params!(2, 0: T0, 1: T1);
impl_to_params!(3, 0: T0, 1: T1, 2: T2);
impl_to_params!(4, 0: T0, 1: T1, 2: T2, 3: T3);
impl_to_params!(5, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4);
impl_to_params!(6, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5);
impl_to_params!(7, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6);
impl_to_params!(8, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7);
impl_to_params!(9, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8);
impl_to_params!(10, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9);
impl_to_params!(11, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10);
impl_to_params!(12, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10, 11: T11);

/// Decode a text protocol value as UTF-8.
pub(crate) fn text_str(bytes: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))
}

/// Column types whose binary encoding is a length-encoded string.
pub(crate) fn is_string_encoded(column_type: ColumnType) -> bool {
    !column_type.is_integer()
        && !column_type.is_temporal()
        && !matches!(
            column_type,
            ColumnType::Float | ColumnType::Double | ColumnType::Null
        )
}
