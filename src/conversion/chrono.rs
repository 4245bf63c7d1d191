//! Chrono crate type implementations (NaiveDate, NaiveTime, NaiveDateTime).
//!
//! Values go through [`crate::value::DateTime`] / [`crate::value::Time`], which
//! understand both protocol encodings.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::constant::ColumnType;
use crate::error::{Error, Result};
use crate::protocol::column::ColumnInfo;
use crate::value::{DateTime, Time};

use super::{FromValue, ParamType, ToValue};

fn datetime(col: &ColumnInfo, bytes: &[u8], binary: bool) -> Result<DateTime> {
    match col.column_type {
        ColumnType::Time | ColumnType::Time2 => Err(Error::Decode(format!(
            "cannot decode {:?} as a date",
            col.column_type
        ))),
        ty if ty.is_temporal() => {
            if binary {
                DateTime::from_binary(bytes)
            } else {
                DateTime::from_text(bytes)
            }
        }
        ty => Err(Error::Decode(format!("cannot decode {:?} as a date", ty))),
    }
}

fn to_naive_date(dt: &DateTime) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(i32::from(dt.year), u32::from(dt.month), u32::from(dt.day))
        .ok_or_else(|| {
            Error::Decode(format!(
                "invalid date: {:04}-{:02}-{:02}",
                dt.year, dt.month, dt.day
            ))
        })
}

fn to_naive_datetime(dt: &DateTime) -> Result<NaiveDateTime> {
    let date = to_naive_date(dt)?;
    let time = NaiveTime::from_hms_micro_opt(
        u32::from(dt.hour),
        u32::from(dt.minute),
        u32::from(dt.second),
        dt.microsecond,
    )
    .ok_or_else(|| Error::Decode("invalid time of day".into()))?;
    Ok(date.and_time(time))
}

impl FromValue<'_> for NaiveDate {
    fn from_text(col: &ColumnInfo, bytes: &[u8]) -> Result<Self> {
        to_naive_date(&datetime(col, bytes, false)?)
    }

    fn from_binary(col: &ColumnInfo, bytes: &[u8]) -> Result<Self> {
        to_naive_date(&datetime(col, bytes, true)?)
    }
}

impl FromValue<'_> for NaiveDateTime {
    fn from_text(col: &ColumnInfo, bytes: &[u8]) -> Result<Self> {
        to_naive_datetime(&datetime(col, bytes, false)?)
    }

    fn from_binary(col: &ColumnInfo, bytes: &[u8]) -> Result<Self> {
        to_naive_datetime(&datetime(col, bytes, true)?)
    }
}

fn time_of_day(t: &Time) -> Result<NaiveTime> {
    if t.negative || t.days > 0 {
        return Err(Error::Decode("TIME value outside 00:00:00..24:00:00".into()));
    }
    NaiveTime::from_hms_micro_opt(
        u32::from(t.hour),
        u32::from(t.minute),
        u32::from(t.second),
        t.microsecond,
    )
    .ok_or_else(|| Error::Decode("invalid time of day".into()))
}

impl FromValue<'_> for NaiveTime {
    fn from_text(col: &ColumnInfo, bytes: &[u8]) -> Result<Self> {
        if !matches!(col.column_type, ColumnType::Time | ColumnType::Time2) {
            return Err(Error::Decode(format!(
                "cannot decode {:?} as NaiveTime",
                col.column_type
            )));
        }
        time_of_day(&Time::from_text(bytes)?)
    }

    fn from_binary(col: &ColumnInfo, bytes: &[u8]) -> Result<Self> {
        if !matches!(col.column_type, ColumnType::Time | ColumnType::Time2) {
            return Err(Error::Decode(format!(
                "cannot decode {:?} as NaiveTime",
                col.column_type
            )));
        }
        time_of_day(&Time::from_binary(bytes)?)
    }
}

fn from_naive(date: NaiveDate, time: Option<NaiveTime>) -> Result<DateTime> {
    let year = u16::try_from(date.year())
        .map_err(|_| Error::InvalidUsage(format!("year {} out of range", date.year())))?;
    let mut dt = DateTime {
        year,
        month: date.month() as u8,
        day: date.day() as u8,
        ..DateTime::default()
    };
    if let Some(time) = time {
        dt.hour = time.hour() as u8;
        dt.minute = time.minute() as u8;
        dt.second = time.second() as u8;
        dt.microsecond = time.nanosecond() / 1_000;
    }
    Ok(dt)
}

impl ToValue for NaiveDate {
    fn param_type(&self) -> ParamType {
        ParamType::new(ColumnType::Date)
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        from_naive(*self, None)?.encode(out);
        Ok(())
    }
}

impl ToValue for NaiveDateTime {
    fn param_type(&self) -> ParamType {
        ParamType::new(ColumnType::DateTime)
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        from_naive(self.date(), Some(self.time()))?.encode(out);
        Ok(())
    }
}

impl ToValue for NaiveTime {
    fn param_type(&self) -> ParamType {
        ParamType::new(ColumnType::Time)
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        Time {
            negative: false,
            days: 0,
            hour: self.hour() as u8,
            minute: self.minute() as u8,
            second: self.second() as u8,
            microsecond: self.nanosecond() / 1_000,
        }
        .encode(out);
        Ok(())
    }
}
