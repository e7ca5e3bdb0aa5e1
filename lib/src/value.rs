//! Cell values as they come out of a registry extract.
//!
//! Spreadsheets are loosely typed: a year might be stored as a number, a date, or text, and
//! missing values are spelled in several different ways. Everything is read into [`Value`] first
//! and then coerced per column.
use crate::{util::is_null_like, ArcStr};
use chrono::{Datelike, NaiveDate};
use noisy_float::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shared empty cell, handed out for out-of-range lookups.
pub(crate) static MISSING: Value = Value::Missing;

/// Years outside this range are treated as data-entry errors.
const PLAUSIBLE_YEARS: std::ops::RangeInclusive<i32> = 1800..=2200;

/// A single cell.
///
/// Ordering is by variant first, then by value, so that values can key `BTreeMap`s when grouping.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    Missing,
    Number(R64),
    Text(ArcStr),
    Bool(bool),
    Date(NaiveDate),
}

impl Value {
    /// A number, or `Missing` if it isn't finite.
    pub fn number(v: f64) -> Self {
        R64::try_new(v).map(Value::Number).unwrap_or(Value::Missing)
    }

    /// Text as-is, except that null-like spellings become `Missing`.
    pub fn text(s: &str) -> Self {
        let s = s.trim();
        if is_null_like(s) {
            Value::Missing
        } else {
            Value::Text(s.into())
        }
    }

    /// Like `text`, but numbers are recognised. Used for sources with no cell types (CSV).
    pub fn infer(s: &str) -> Self {
        match Self::text(s) {
            Value::Text(t) => match t.parse::<f64>() {
                Ok(v) if v.is_finite() => Value::number(v),
                _ => Value::Text(t),
            },
            other => other,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(v.raw()),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Interpret this cell as a year.
    ///
    /// Whole numbers are taken as the year itself, dates give their year, and text is parsed as
    /// either of those. Fractional numbers and implausible years give `None`.
    pub fn as_year(&self) -> Option<i32> {
        let year = match self {
            Value::Number(v) => {
                let v = v.raw();
                if v.fract() != 0. {
                    return None;
                }
                v as i32
            }
            Value::Date(d) => d.year(),
            Value::Text(t) => match t.parse::<i32>() {
                Ok(year) => year,
                Err(_) => match NaiveDate::parse_from_str(t, "%Y-%m-%d") {
                    Ok(date) => date.year(),
                    // numbers stored as text, e.g. "1980.0"
                    Err(_) => {
                        return match Value::infer(t) {
                            number @ Value::Number(_) => number.as_year(),
                            _ => None,
                        }
                    }
                },
            },
            Value::Missing | Value::Bool(_) => return None,
        };
        PLAUSIBLE_YEARS.contains(&year).then(|| year)
    }

    /// Coerce to a year number, or `Missing`.
    pub fn into_year(self) -> Self {
        match self.as_year() {
            Some(year) => Value::from(year),
            None => Value::Missing,
        }
    }

    /// Coerce to a number, or `Missing`.
    pub fn into_number(self) -> Self {
        match self {
            Value::Number(_) => self,
            Value::Text(t) => t
                .parse::<f64>()
                .map(Value::number)
                .unwrap_or(Value::Missing),
            _ => Value::Missing,
        }
    }

    /// Replace `Missing` with a placeholder label.
    pub fn or_label(self, label: &str) -> Self {
        match self {
            Value::Missing => Value::Text(label.into()),
            other => other,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Missing => serde_json::Value::Null,
            Value::Number(v) => match self.as_whole() {
                Some(v) => v.into(),
                None => v.raw().into(),
            },
            Value::Text(t) => t.to_string().into(),
            Value::Bool(b) => (*b).into(),
            Value::Date(d) => d.to_string().into(),
        }
    }

    /// Whole numbers print without a decimal point.
    fn as_whole(&self) -> Option<i64> {
        let v = self.as_number()?;
        (v.fract() == 0. && v.abs() < 1e15).then(|| v as i64)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Missing => Ok(()),
            Value::Number(v) => match self.as_whole() {
                Some(v) => write!(f, "{}", v),
                None => write!(f, "{}", v),
            },
            Value::Text(t) => f.write_str(t),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Date(d) => write!(f, "{}", d),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::number(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::number(v.into())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::number(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Missing)
    }
}

#[cfg(test)]
mod test {
    use super::Value;
    use chrono::NaiveDate;

    #[test]
    fn null_spellings() {
        for s in ["", "  ", "null", "NULL", "NA", "n/a", "nan"] {
            assert_eq!(Value::text(s), Value::Missing, "{:?}", s);
            assert_eq!(Value::infer(s), Value::Missing, "{:?}", s);
        }
        assert_eq!(Value::text(" Thyroid "), Value::Text("Thyroid".into()));
    }

    #[test]
    fn infer_numbers() {
        assert_eq!(Value::infer("1980"), Value::number(1980.));
        assert_eq!(Value::infer("1.5"), Value::number(1.5));
        assert_eq!(Value::infer("Female"), Value::Text("Female".into()));
        assert_eq!(Value::number(f64::NAN), Value::Missing);
    }

    #[test]
    fn years() {
        assert_eq!(Value::number(2005.).as_year(), Some(2005));
        assert_eq!(Value::number(2005.5).as_year(), None);
        assert_eq!(Value::Text("1999".into()).as_year(), Some(1999));
        assert_eq!(Value::Text("1999-06-01".into()).as_year(), Some(1999));
        assert_eq!(Value::Text("nineteen".into()).as_year(), None);
        // spreadsheet string cells holding a formatted number
        assert_eq!(Value::Text("1980.0".into()).as_year(), Some(1980));
        assert_eq!(Value::Text("1980.5".into()).as_year(), None);
        assert_eq!(Value::text("1980.0").into_year(), Value::from(1980));
        assert_eq!(
            Value::Date(NaiveDate::from_ymd_opt(1980, 3, 4).unwrap()).as_year(),
            Some(1980)
        );
        assert_eq!(Value::number(12.).as_year(), None);
        assert_eq!(Value::Bool(true).into_year(), Value::Missing);
    }

    #[test]
    fn numbers() {
        assert_eq!(Value::Text("172.5".into()).into_number(), Value::number(172.5));
        assert_eq!(Value::Text("tall".into()).into_number(), Value::Missing);
        assert_eq!(Value::Bool(false).into_number(), Value::Missing);
    }

    #[test]
    fn display_and_json() {
        assert_eq!(Value::number(25.).to_string(), "25");
        assert_eq!(Value::number(1.25).to_string(), "1.25");
        assert_eq!(Value::Missing.to_string(), "");
        assert_eq!(Value::number(25.).to_json(), serde_json::json!(25));
        assert_eq!(Value::Missing.to_json(), serde_json::Value::Null);
        assert_eq!(Value::Missing.or_label("NS"), Value::Text("NS".into()));
    }

    #[test]
    fn serde_numbers() {
        let json = serde_json::to_string(&Value::number(1.5)).unwrap();
        assert_eq!(json, r#"{"Number":1.5}"#);
        assert_eq!(serde_json::from_str::<Value>(&json).unwrap(), Value::number(1.5));
    }

    #[test]
    fn ordering_groups_by_variant() {
        let mut values = vec![
            Value::Text("b".into()),
            Value::number(2.),
            Value::Missing,
            Value::Text("a".into()),
            Value::number(1.),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::Missing,
                Value::number(1.),
                Value::number(2.),
                Value::Text("a".into()),
                Value::Text("b".into()),
            ]
        );
    }
}
