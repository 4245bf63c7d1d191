//! Row decoding traits and implementations.

use crate::conversion::FromValue;
use crate::error::{Error, Result};
use crate::protocol::column::ColumnInfo;
use crate::protocol::row::{BinaryRow, TextRow, next_value};
use crate::value::Value;

/// Trait for decoding a MySQL row into a Rust type.
pub trait FromRow<'a>: Sized {
    /// Decode a row from the text protocol (COM_QUERY).
    fn from_text_row(cols: &[ColumnInfo], row: TextRow<'a>) -> Result<Self>;

    /// Decode a row from the binary protocol (COM_STMT_EXECUTE).
    fn from_binary_row(cols: &[ColumnInfo], row: BinaryRow<'a>) -> Result<Self>;
}

/// Decode a single column value as text.
fn decode_column_text<'a, T: FromValue<'a>>(col: &ColumnInfo, value: Option<&'a [u8]>) -> Result<T> {
    match value {
        None => T::from_null(),
        Some(bytes) => T::from_text(col, bytes),
    }
}

/// Decode a single column value as binary.
fn decode_column_binary<'a, T: FromValue<'a>>(
    col: &ColumnInfo,
    value: Option<&'a [u8]>,
) -> Result<T> {
    match value {
        None => T::from_null(),
        Some(bytes) => T::from_binary(col, bytes),
    }
}

// === Tuple implementations ===

/// Implementation for empty tuple - used for statements that don't return rows
impl FromRow<'_> for () {
    fn from_text_row(_cols: &[ColumnInfo], _row: TextRow<'_>) -> Result<Self> {
        Ok(())
    }

    fn from_binary_row(_cols: &[ColumnInfo], _row: BinaryRow<'_>) -> Result<Self> {
        Ok(())
    }
}

macro_rules! impl_from_row_tuple {
    ($count:literal: $($idx:tt => $T:ident),+) => {
        impl<'a, $($T: FromValue<'a>),+> FromRow<'a> for ($($T,)+) {
            fn from_text_row(cols: &[ColumnInfo], row: TextRow<'a>) -> Result<Self> {
                if cols.len() < $count {
                    return Err(Error::Decode("not enough columns for tuple".into()));
                }
                let mut iter = row.iter();
                Ok(($(
                    decode_column_text(&cols[$idx], next_value(&mut iter)?)?,
                )+))
            }

            fn from_binary_row(cols: &[ColumnInfo], row: BinaryRow<'a>) -> Result<Self> {
                if cols.len() < $count {
                    return Err(Error::Decode("not enough columns for tuple".into()));
                }
                let mut iter = row.iter();
                Ok(($(
                    decode_column_binary(&cols[$idx], next_value(&mut iter)?)?,
                )+))
            }
        }
    };
}

impl_from_row_tuple!(1: 0 => T1);
impl_from_row_tuple!(2: 0 => T1, 1 => T2);
impl_from_row_tuple!(3: 0 => T1, 1 => T2, 2 => T3);
impl_from_row_tuple!(4: 0 => T1, 1 => T2, 2 => T3, 3 => T4);
impl_from_row_tuple!(5: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5);
impl_from_row_tuple!(6: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6);
impl_from_row_tuple!(7: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7);
impl_from_row_tuple!(8: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8);
impl_from_row_tuple!(9: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8, 8 => T9);
impl_from_row_tuple!(10: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8, 8 => T9, 9 => T10);
impl_from_row_tuple!(11: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8, 8 => T9, 9 => T10, 10 => T11);
impl_from_row_tuple!(12: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8, 8 => T9, 9 => T10, 10 => T11, 11 => T12);

// === Dynamic rows ===

impl FromRow<'_> for Vec<Value> {
    fn from_text_row(cols: &[ColumnInfo], row: TextRow<'_>) -> Result<Self> {
        cols.iter()
            .zip(row.iter())
            .map(|(col, value)| decode_column_text(col, value?))
            .collect()
    }

    fn from_binary_row(cols: &[ColumnInfo], row: BinaryRow<'_>) -> Result<Self> {
        cols.iter()
            .zip(row.iter())
            .map(|(col, value)| decode_column_binary(col, value?))
            .collect()
    }
}
