//! String type implementations (&str, String).

use crate::constant::ColumnType;
use crate::error::{Error, Result};
use crate::protocol::codec::write_lenenc_bytes;
use crate::protocol::column::ColumnInfo;

use super::{FromValue, ParamType, ToValue, is_string_encoded, text_str};

/// In the text protocol every value is a string; in the binary protocol only
/// length-encoded columns are.
fn check_binary_string(col: &ColumnInfo, target: &str) -> Result<()> {
    if !is_string_encoded(col.column_type) {
        return Err(Error::Decode(format!(
            "cannot decode {:?} as {}",
            col.column_type, target
        )));
    }
    Ok(())
}

impl<'a> FromValue<'a> for &'a str {
    fn from_text(_col: &ColumnInfo, bytes: &'a [u8]) -> Result<Self> {
        text_str(bytes)
    }

    fn from_binary(col: &ColumnInfo, bytes: &'a [u8]) -> Result<Self> {
        check_binary_string(col, "str")?;
        text_str(bytes)
    }
}

impl FromValue<'_> for String {
    fn from_text(_col: &ColumnInfo, bytes: &[u8]) -> Result<Self> {
        text_str(bytes).map(|s| s.to_owned())
    }

    fn from_binary(col: &ColumnInfo, bytes: &[u8]) -> Result<Self> {
        check_binary_string(col, "String")?;
        text_str(bytes).map(|s| s.to_owned())
    }
}

impl ToValue for str {
    fn param_type(&self) -> ParamType {
        ParamType::new(ColumnType::VarString)
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        write_lenenc_bytes(out, self.as_bytes());
        Ok(())
    }
}

impl ToValue for String {
    fn param_type(&self) -> ParamType {
        self.as_str().param_type()
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        self.as_str().encode(out)
    }
}
