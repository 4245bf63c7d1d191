//! Byte type implementations (`&[u8]`, `Vec<u8>`).

use crate::constant::ColumnType;
use crate::error::{Error, Result};
use crate::protocol::codec::write_lenenc_bytes;
use crate::protocol::column::ColumnInfo;

use super::{FromValue, ParamType, ToValue, is_string_encoded};

impl<'a> FromValue<'a> for &'a [u8] {
    fn from_text(_col: &ColumnInfo, bytes: &'a [u8]) -> Result<Self> {
        Ok(bytes)
    }

    fn from_binary(col: &ColumnInfo, bytes: &'a [u8]) -> Result<Self> {
        if !is_string_encoded(col.column_type) {
            return Err(Error::Decode(format!(
                "cannot decode {:?} as bytes",
                col.column_type
            )));
        }
        Ok(bytes)
    }
}

impl FromValue<'_> for Vec<u8> {
    fn from_text(col: &ColumnInfo, bytes: &[u8]) -> Result<Self> {
        <&[u8]>::from_text(col, bytes).map(<[u8]>::to_vec)
    }

    fn from_binary(col: &ColumnInfo, bytes: &[u8]) -> Result<Self> {
        <&[u8]>::from_binary(col, bytes).map(<[u8]>::to_vec)
    }
}

impl ToValue for [u8] {
    fn param_type(&self) -> ParamType {
        ParamType::new(ColumnType::Blob)
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        write_lenenc_bytes(out, self);
        Ok(())
    }
}

impl ToValue for Vec<u8> {
    fn param_type(&self) -> ParamType {
        self.as_slice().param_type()
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        self.as_slice().encode(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::ColumnFlags;

    #[test]
    fn test_blob_roundtrip() {
        let col = ColumnInfo {
            column_type: ColumnType::Blob,
            flags: ColumnFlags::default(),
            charset: 63,
            length: 0,
            decimals: 0,
        };
        let data = [0u8, 1, 2, 0xFF];
        assert_eq!(Vec::<u8>::from_binary(&col, &data).unwrap(), data.to_vec());

        let mut out = Vec::new();
        data.as_slice().encode(&mut out).unwrap();
        assert_eq!(out, vec![4, 0, 1, 2, 0xFF]);
    }
}
