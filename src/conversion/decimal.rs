//! Decimal type implementation (rust_decimal crate).
//!
//! DECIMAL travels as a string in both protocols, so parameters are sent as
//! NEWDECIMAL text and results are parsed from text.

use rust_decimal::Decimal;

use crate::constant::ColumnType;
use crate::error::{Error, Result};
use crate::protocol::codec::write_lenenc_bytes;
use crate::protocol::column::ColumnInfo;

use super::{FromValue, ParamType, ToValue, text_str};

fn parse_decimal(col: &ColumnInfo, bytes: &[u8]) -> Result<Decimal> {
    let ty = col.column_type;
    if !matches!(ty, ColumnType::Decimal | ColumnType::NewDecimal) && !ty.is_integer() {
        return Err(Error::Decode(format!("cannot decode {:?} as Decimal", ty)));
    }
    let s = text_str(bytes)?;
    Decimal::from_str_exact(s).map_err(|e| Error::Decode(format!("invalid decimal: {}", e)))
}

impl FromValue<'_> for Decimal {
    fn from_text(col: &ColumnInfo, bytes: &[u8]) -> Result<Self> {
        parse_decimal(col, bytes)
    }

    fn from_binary(col: &ColumnInfo, bytes: &[u8]) -> Result<Self> {
        if col.column_type.is_integer() {
            let value = i64::from_binary(col, bytes)?;
            return Ok(Decimal::from(value));
        }
        parse_decimal(col, bytes)
    }
}

impl ToValue for Decimal {
    fn param_type(&self) -> ParamType {
        ParamType::new(ColumnType::NewDecimal)
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        write_lenenc_bytes(out, self.to_string().as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::ColumnFlags;

    fn col(column_type: ColumnType) -> ColumnInfo {
        ColumnInfo {
            column_type,
            flags: ColumnFlags::default(),
            charset: 63,
            length: 0,
            decimals: 2,
        }
    }

    #[test]
    fn test_decimal_text() {
        let d = Decimal::from_text(&col(ColumnType::NewDecimal), b"-123.45").unwrap();
        assert_eq!(d.to_string(), "-123.45");
        assert!(Decimal::from_text(&col(ColumnType::VarString), b"1").is_err());
    }

    #[test]
    fn test_decimal_encode() {
        let d = Decimal::new(1050, 2);
        let mut out = Vec::new();
        d.encode(&mut out).unwrap();
        assert_eq!(out, b"\x0510.50");
        assert_eq!(d.param_type().to_bytes(), [0xf6, 0]);
    }
}
