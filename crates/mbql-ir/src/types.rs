//! Identifiers, literals and option types shared across clauses

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::codec::{self, impl_serde_via_json, Tagged};
use crate::error::ModelError;

pub type FieldId = i64;
pub type TableId = i64;
pub type CardId = i64;
pub type SegmentId = i64;
pub type DatabaseId = i64;

/// A field is addressed either by its numeric id or, for columns of nested
/// queries and native results, by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKey {
    Id(FieldId),
    Name(String),
}

impl Tagged for FieldKey {
    const CLAUSE: &'static str = "field key";

    fn to_json(&self) -> Json {
        match self {
            FieldKey::Id(id) => Json::from(*id),
            FieldKey::Name(name) => Json::from(name.as_str()),
        }
    }

    fn from_json(value: &Json) -> Result<Self, ModelError> {
        match value {
            Json::String(name) => Ok(FieldKey::Name(name.clone())),
            other => codec::as_i64(Self::CLAUSE, other).map(FieldKey::Id),
        }
    }
}

impl From<FieldId> for FieldKey {
    fn from(id: FieldId) -> Self {
        FieldKey::Id(id)
    }
}

/// `source-table`: a table id, or `"card__<id>"` for a saved question used as a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceTable {
    Table(TableId),
    Card(CardId),
}

const CARD_PREFIX: &str = "card__";

impl Tagged for SourceTable {
    const CLAUSE: &'static str = "source-table";

    fn to_json(&self) -> Json {
        match self {
            SourceTable::Table(id) => Json::from(*id),
            SourceTable::Card(id) => Json::from(format!("{CARD_PREFIX}{id}")),
        }
    }

    fn from_json(value: &Json) -> Result<Self, ModelError> {
        match value {
            Json::String(s) => s
                .strip_prefix(CARD_PREFIX)
                .and_then(|id| id.parse().ok())
                .map(SourceTable::Card)
                .ok_or_else(|| {
                    ModelError::shape(Self::CLAUSE, format!("expected \"card__<id>\", got \"{s}\""))
                }),
            other => codec::as_i64(Self::CLAUSE, other).map(SourceTable::Table),
        }
    }
}

/// A JSON number. Integers keep their exact value; `UInt` holds those
/// above `i64::MAX`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Tagged for Number {
    const CLAUSE: &'static str = "number";

    fn to_json(&self) -> Json {
        match self {
            Number::Int(i) => Json::from(*i),
            Number::UInt(u) => Json::from(*u),
            Number::Float(f) => Json::from(*f),
        }
    }

    fn from_json(value: &Json) -> Result<Self, ModelError> {
        let Json::Number(n) = value else {
            return Err(ModelError::shape(Self::CLAUSE, format!("expected a number, got {value}")));
        };
        if let Some(i) = n.as_i64() {
            return Ok(Number::Int(i));
        }
        if let Some(u) = n.as_u64() {
            return Ok(Number::UInt(u));
        }
        match n.as_f64() {
            Some(f) if f.is_finite() => Ok(Number::Float(f)),
            _ => Err(ModelError::shape(Self::CLAUSE, format!("unrepresentable number {n}"))),
        }
    }
}

impl Number {
    pub fn as_f64(&self) -> f64 {
        match self {
            Number::Int(i) => *i as f64,
            Number::UInt(u) => *u as f64,
            Number::Float(f) => *f,
        }
    }
}

impl From<i64> for Number {
    fn from(i: i64) -> Self {
        Number::Int(i)
    }
}

impl From<u64> for Number {
    /// Values that fit in `i64` become [`Number::Int`].
    fn from(u: u64) -> Self {
        i64::try_from(u).map_or(Number::UInt(u), Number::Int)
    }
}

impl From<f64> for Number {
    fn from(f: f64) -> Self {
        Number::Float(f)
    }
}

/// Operand of equality filters and payload of `["value", …]`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    String(String),
    Number(Number),
}

impl Tagged for Value {
    const CLAUSE: &'static str = "value";

    fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::String(s) => Json::from(s.as_str()),
            Value::Number(n) => n.to_json(),
        }
    }

    fn from_json(value: &Json) -> Result<Self, ModelError> {
        match value {
            Json::Null => Ok(Value::Null),
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::String(s) => Ok(Value::String(s.clone())),
            Json::Number(_) => Number::from_json(value).map(Value::Number),
            other => Err(ModelError::shape(
                Self::CLAUSE,
                format!("expected null, boolean, string or number, got {other}"),
            )),
        }
    }
}

impl Value {
    /// Orderable view of this value, if it has one.
    pub fn as_orderable(&self) -> Option<OrderableValue> {
        match self {
            Value::Number(n) => Some(OrderableValue::Number(*n)),
            Value::String(s) if is_datetime_literal(s) => Some(OrderableValue::Datetime(s.clone())),
            _ => None,
        }
    }
}

/// Operand of comparison and `between` filters: numbers and datetime strings only.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderableValue {
    Number(Number),
    Datetime(String),
}

impl Tagged for OrderableValue {
    const CLAUSE: &'static str = "orderable value";

    fn to_json(&self) -> Json {
        match self {
            OrderableValue::Number(n) => n.to_json(),
            OrderableValue::Datetime(s) => Json::from(s.as_str()),
        }
    }

    fn from_json(value: &Json) -> Result<Self, ModelError> {
        match value {
            Json::Number(_) => Number::from_json(value).map(OrderableValue::Number),
            Json::String(s) if is_datetime_literal(s) => Ok(OrderableValue::Datetime(s.clone())),
            other => Err(ModelError::shape(
                Self::CLAUSE,
                format!("expected a number or datetime string, got {other}"),
            )),
        }
    }
}

/// Whether `s` is an ISO-8601 date, date-time or time literal.
pub fn is_datetime_literal(s: &str) -> bool {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        || DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M").is_ok()
        || NaiveTime::parse_from_str(s, "%H:%M:%S").is_ok()
        || NaiveTime::parse_from_str(s, "%H:%M:%S%.f").is_ok()
        || NaiveTime::parse_from_str(s, "%H:%M").is_ok()
}

/// Expression literal. Unlike [`Value`] there is no null literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(Number),
    String(String),
    Bool(bool),
}

impl Tagged for Literal {
    const CLAUSE: &'static str = "literal";

    fn to_json(&self) -> Json {
        match self {
            Literal::Number(n) => n.to_json(),
            Literal::String(s) => Json::from(s.as_str()),
            Literal::Bool(b) => Json::Bool(*b),
        }
    }

    fn from_json(value: &Json) -> Result<Self, ModelError> {
        match value {
            Json::Number(_) => Number::from_json(value).map(Literal::Number),
            Json::String(s) => Ok(Literal::String(s.clone())),
            Json::Bool(b) => Ok(Literal::Bool(*b)),
            other => Err(ModelError::shape(
                Self::CLAUSE,
                format!("expected a number, string or boolean, got {other}"),
            )),
        }
    }
}

impl_serde_via_json!(FieldKey, SourceTable, Number, Value, OrderableValue, Literal);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatetimeUnit {
    Default,
    // Absolute
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
    // Relative
    MinuteOfHour,
    HourOfDay,
    DayOfWeek,
    DayOfMonth,
    DayOfYear,
    WeekOfYear,
    MonthOfYear,
    QuarterOfYear,
}

impl DatetimeUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatetimeUnit::Default => "default",
            DatetimeUnit::Minute => "minute",
            DatetimeUnit::Hour => "hour",
            DatetimeUnit::Day => "day",
            DatetimeUnit::Week => "week",
            DatetimeUnit::Month => "month",
            DatetimeUnit::Quarter => "quarter",
            DatetimeUnit::Year => "year",
            DatetimeUnit::MinuteOfHour => "minute-of-hour",
            DatetimeUnit::HourOfDay => "hour-of-day",
            DatetimeUnit::DayOfWeek => "day-of-week",
            DatetimeUnit::DayOfMonth => "day-of-month",
            DatetimeUnit::DayOfYear => "day-of-year",
            DatetimeUnit::WeekOfYear => "week-of-year",
            DatetimeUnit::MonthOfYear => "month-of-year",
            DatetimeUnit::QuarterOfYear => "quarter-of-year",
        }
    }

    pub fn is_absolute(&self) -> bool {
        AbsoluteUnit::try_from(*self).is_ok()
    }
}

/// Units a `time-interval` filter may step by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbsoluteUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl From<AbsoluteUnit> for DatetimeUnit {
    fn from(unit: AbsoluteUnit) -> Self {
        match unit {
            AbsoluteUnit::Minute => DatetimeUnit::Minute,
            AbsoluteUnit::Hour => DatetimeUnit::Hour,
            AbsoluteUnit::Day => DatetimeUnit::Day,
            AbsoluteUnit::Week => DatetimeUnit::Week,
            AbsoluteUnit::Month => DatetimeUnit::Month,
            AbsoluteUnit::Quarter => DatetimeUnit::Quarter,
            AbsoluteUnit::Year => DatetimeUnit::Year,
        }
    }
}

impl AbsoluteUnit {
    pub fn as_str(&self) -> &'static str {
        DatetimeUnit::from(*self).as_str()
    }
}

impl TryFrom<DatetimeUnit> for AbsoluteUnit {
    type Error = DatetimeUnit;

    fn try_from(unit: DatetimeUnit) -> Result<Self, Self::Error> {
        match unit {
            DatetimeUnit::Minute => Ok(AbsoluteUnit::Minute),
            DatetimeUnit::Hour => Ok(AbsoluteUnit::Hour),
            DatetimeUnit::Day => Ok(AbsoluteUnit::Day),
            DatetimeUnit::Week => Ok(AbsoluteUnit::Week),
            DatetimeUnit::Month => Ok(AbsoluteUnit::Month),
            DatetimeUnit::Quarter => Ok(AbsoluteUnit::Quarter),
            DatetimeUnit::Year => Ok(AbsoluteUnit::Year),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum BinningOptions {
    Default,
    NumBins {
        #[serde(rename = "num-bins")]
        num_bins: u32,
    },
    BinWidth {
        #[serde(rename = "bin-width")]
        bin_width: f64,
    },
}

impl BinningOptions {
    pub fn to_json(&self) -> Json {
        let mut object = Map::new();
        match self {
            BinningOptions::Default => {
                object.insert("strategy".to_string(), Json::from("default"));
            }
            BinningOptions::NumBins { num_bins } => {
                object.insert("strategy".to_string(), Json::from("num-bins"));
                object.insert("num-bins".to_string(), Json::from(*num_bins));
            }
            BinningOptions::BinWidth { bin_width } => {
                object.insert("strategy".to_string(), Json::from("bin-width"));
                object.insert("bin-width".to_string(), Json::from(*bin_width));
            }
        }
        Json::Object(object)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_source_table_card_prefix() {
        assert_eq!(SourceTable::from_json(&json!("card__4")).unwrap(), SourceTable::Card(4));
        assert_eq!(SourceTable::from_json(&json!(12)).unwrap(), SourceTable::Table(12));
        assert_eq!(SourceTable::Card(4).to_json(), json!("card__4"));
        assert!(SourceTable::from_json(&json!("orders")).is_err());
    }

    #[test]
    fn test_orderable_rejects_plain_strings_and_booleans() {
        assert!(OrderableValue::from_json(&json!("hello")).is_err());
        assert!(OrderableValue::from_json(&json!(true)).is_err());
        assert!(OrderableValue::from_json(&json!(null)).is_err());
        assert_eq!(
            OrderableValue::from_json(&json!("2024-01-31")).unwrap(),
            OrderableValue::Datetime("2024-01-31".to_string())
        );
        assert!(OrderableValue::from_json(&json!("2024-01-31T10:15:00Z")).is_ok());
        assert!(OrderableValue::from_json(&json!("2024-01-31T10:15:00.250")).is_ok());
        assert!(OrderableValue::from_json(&json!("10:15")).is_ok());
    }

    #[test]
    fn test_number_keeps_integer_and_float_apart() {
        assert_eq!(Number::from_json(&json!(3)).unwrap(), Number::Int(3));
        assert_eq!(Number::from_json(&json!(3.5)).unwrap(), Number::Float(3.5));
    }

    #[test]
    fn test_number_above_i64_stays_exact() {
        let big = json!(u64::MAX);
        let number = Number::from_json(&big).unwrap();
        assert_eq!(number, Number::UInt(u64::MAX));
        assert_eq!(number.to_json(), big);

        assert_eq!(Number::from(7u64), Number::Int(7));
        assert_eq!(Number::from(u64::MAX), Number::UInt(u64::MAX));
    }

    #[test]
    fn test_datetime_unit_names() {
        assert_eq!(serde_json::to_value(DatetimeUnit::DayOfWeek).unwrap(), json!("day-of-week"));
        assert!(DatetimeUnit::Month.is_absolute());
        assert!(!DatetimeUnit::MonthOfYear.is_absolute());
        assert!(!DatetimeUnit::Default.is_absolute());
    }

    #[test]
    fn test_unit_names_match_serde() {
        for unit in [
            DatetimeUnit::Default,
            DatetimeUnit::Minute,
            DatetimeUnit::Week,
            DatetimeUnit::QuarterOfYear,
            DatetimeUnit::MinuteOfHour,
        ] {
            assert_eq!(serde_json::to_value(unit).unwrap(), json!(unit.as_str()));
        }
        assert_eq!(serde_json::to_value(AbsoluteUnit::Day).unwrap(), json!(AbsoluteUnit::Day.as_str()));
    }

    #[test]
    fn test_binning_strategies() {
        let bins: BinningOptions = serde_json::from_value(json!({"strategy": "num-bins", "num-bins": 10})).unwrap();
        assert_eq!(bins, BinningOptions::NumBins { num_bins: 10 });
        assert_eq!(
            serde_json::to_value(BinningOptions::Default).unwrap(),
            json!({"strategy": "default"})
        );
        for binning in [
            BinningOptions::Default,
            BinningOptions::NumBins { num_bins: 4 },
            BinningOptions::BinWidth { bin_width: 2.5 },
        ] {
            assert_eq!(binning.to_json(), serde_json::to_value(binning).unwrap());
        }
    }
}
