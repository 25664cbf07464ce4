//! Property values and their wire encoding
//!
//! `Value` is the tagged union application code converts its data into.
//! `Localized` holds the per-locale values of a multi-language property.
//! `encode`/`decode` translate between `Value` and the `SqlValue` a
//! `DatabaseClient` binds and returns.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeDelta, Utc};
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::client::SqlValue;
use crate::error::{MismatchReason, PersistenceError, Result};
use crate::types::{ColumnType, DATETIME_FRACTIONS};

/// Locale key of the fallback value of a multi-language property
pub const DEFAULT_LOCALE: &str = "";

// ============================================================================
// Timestamps
// ============================================================================

/// UTC timestamp carrying its fractional-second precision (0, 3 or 6 digits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timestamp {
    instant: DateTime<Utc>,
    fraction: u8,
}

impl Timestamp {
    /// Truncate `instant` to `fraction` sub-second digits
    pub fn from_utc(instant: DateTime<Utc>, fraction: u8) -> Self {
        let fraction = fraction.min(6);
        Self {
            instant: instant.trunc_subsecs(fraction as u16),
            fraction,
        }
    }

    /// Current time with `fraction` sub-second digits
    pub fn now(fraction: u8) -> Self {
        Self::from_utc(Utc::now(), fraction)
    }

    /// Parse the canonical `YYYY-MM-DD HH:MM:SS[.fraction]<offset>` form
    ///
    /// The offset must be UTC (`Z`, `+00:00` or `+0000`) and the fraction must
    /// have 0, 3 or 6 digits.
    pub fn parse(input: &str) -> std::result::Result<Self, (MismatchReason, String)> {
        static CANONICAL_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(
                r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})(?:\.(\d+))? ?(Z|[+-]\d{2}:?\d{2})$",
            )
            .expect("valid regex")
        });

        if input.is_empty() {
            return Err((
                MismatchReason::Incompatible,
                "empty string is not a timestamp".to_string(),
            ));
        }

        let caps = CANONICAL_RE.captures(input).ok_or_else(|| {
            (
                MismatchReason::Incompatible,
                format!("'{}' is not in YYYY-MM-DD HH:MM:SS[.fraction]+00:00 form", input),
            )
        })?;

        let offset = &caps[3];
        if !matches!(offset, "Z" | "+00:00" | "+0000" | "-00:00" | "-0000") {
            return Err((
                MismatchReason::NonUtcTimestamp,
                format!("offset '{}' is not UTC", offset),
            ));
        }

        let digits = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let fraction = digits.len() as u8;
        if !DATETIME_FRACTIONS.contains(&fraction) {
            return Err((
                MismatchReason::PrecisionMismatch,
                format!("{} fractional digits, expected 0, 3 or 6", fraction),
            ));
        }

        let naive = NaiveDateTime::parse_from_str(&caps[1], "%Y-%m-%d %H:%M:%S")
            .map_err(|e| (MismatchReason::Incompatible, format!("'{}': {}", input, e)))?;
        let micros: i64 = if digits.is_empty() {
            0
        } else {
            format!("{:0<6}", digits).parse().unwrap_or(0)
        };
        let instant = naive.and_utc() + TimeDelta::microseconds(micros);

        Ok(Self { instant, fraction })
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.instant
    }

    /// Number of fractional-second digits
    pub fn fraction(&self) -> u8 {
        self.fraction
    }

    pub fn to_naive(&self) -> NaiveDateTime {
        self.instant.naive_utc()
    }

    /// Smallest timestamp with the same precision strictly after `self`
    pub fn next_tick(&self) -> Self {
        let step = match self.fraction {
            0 => TimeDelta::seconds(1),
            3 => TimeDelta::milliseconds(1),
            _ => TimeDelta::microseconds(1),
        };
        Self {
            instant: self.instant + step,
            fraction: self.fraction,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pattern = match self.fraction {
            0 => "%Y-%m-%d %H:%M:%S+00:00",
            3 => "%Y-%m-%d %H:%M:%S%.3f+00:00",
            _ => "%Y-%m-%d %H:%M:%S%.6f+00:00",
        };
        write!(f, "{}", self.instant.format(pattern))
    }
}

impl TryFrom<String> for Timestamp {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Timestamp::parse(&value).map_err(|(_, detail)| detail)
    }
}

impl From<Timestamp> for String {
    fn from(value: Timestamp) -> Self {
        value.to_string()
    }
}

// ============================================================================
// Values
// ============================================================================

/// A property value at the engine boundary
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    #[default]
    Null,
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
    #[serde(rename = "datetime")]
    DateTime(Timestamp),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Short name of the value's variant, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::Bool(_) => "bool",
            Value::DateTime(_) => "datetime",
            Value::Array(_) => "array",
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Timestamp> for Value {
    fn from(value: Timestamp) -> Self {
        Value::DateTime(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::Array(value.into_iter().map(Into::into).collect())
    }
}

// ============================================================================
// Multi-language values
// ============================================================================

/// Per-locale values of a multi-language property
///
/// The empty locale (`DEFAULT_LOCALE`) holds the fallback value. Locale keys
/// are stored the way their column is named, so `en-US` and `en_US` address
/// the same value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, Value>", into = "BTreeMap<String, Value>")]
pub struct Localized {
    values: BTreeMap<String, Value>,
}

/// Key a locale is stored under
pub(crate) fn locale_key(locale: &str) -> String {
    locale.trim().replace('-', "_")
}

impl From<BTreeMap<String, Value>> for Localized {
    fn from(values: BTreeMap<String, Value>) -> Self {
        let mut localized = Localized::new();
        for (locale, value) in values {
            localized.set(locale, value);
        }
        localized
    }
}

impl From<Localized> for BTreeMap<String, Value> {
    fn from(localized: Localized) -> Self {
        localized.values
    }
}

impl Localized {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback value
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.set(DEFAULT_LOCALE, value);
        self
    }

    /// Set the value of one locale
    pub fn with(mut self, locale: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(locale, value);
        self
    }

    pub fn set(&mut self, locale: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(locale_key(&locale.into()), value.into());
    }

    pub fn get(&self, locale: &str) -> Option<&Value> {
        self.values.get(&locale_key(locale))
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.values.get(DEFAULT_LOCALE)
    }

    /// Value exposed through the unqualified accessor: the first configured
    /// locale holding a non-null value, else the fallback
    pub fn resolve(&self, locales: &[String]) -> &Value {
        static NULL: Value = Value::Null;
        locales
            .iter()
            .filter_map(|locale| self.get(locale))
            .find(|value| !value.is_null())
            .or_else(|| self.default_value())
            .unwrap_or(&NULL)
    }

    /// All (locale, value) pairs, fallback first
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ============================================================================
// Wire encoding
// ============================================================================

/// Encode a scalar value for a column of `column_type`
pub fn encode(value: &Value, column_type: &ColumnType, property: &str) -> Result<SqlValue> {
    let incompatible = || {
        PersistenceError::mismatch(
            property,
            MismatchReason::Incompatible,
            format!("cannot store {} in {}", value.type_name(), column_type),
        )
    };

    Ok(match (column_type, value) {
        (_, Value::Null) => SqlValue::Null,
        (ColumnType::String { .. }, Value::String(s)) => SqlValue::Text(s.clone()),
        (ColumnType::String { .. }, Value::Int(i)) => SqlValue::Text(i.to_string()),
        (ColumnType::String { .. }, Value::Double(d)) => SqlValue::Text(d.to_string()),
        (ColumnType::String { .. }, Value::Bool(b)) => SqlValue::Text(bool_text(*b).to_string()),
        (ColumnType::String { .. }, Value::DateTime(ts)) => SqlValue::Text(ts.to_string()),
        (ColumnType::Int { .. }, Value::Int(i)) => SqlValue::Int(*i),
        (ColumnType::Int { .. }, Value::String(s)) => {
            SqlValue::Int(s.trim().parse().map_err(|_| incompatible())?)
        }
        (ColumnType::Double { .. }, Value::Double(d)) => SqlValue::Double(*d),
        (ColumnType::Double { .. }, Value::Int(i)) => SqlValue::Double(*i as f64),
        (ColumnType::Double { .. }, Value::String(s)) => {
            SqlValue::Double(s.trim().parse().map_err(|_| incompatible())?)
        }
        (ColumnType::Bool, Value::Bool(b)) => SqlValue::Int(*b as i64),
        (ColumnType::Bool, Value::Int(i @ (0 | 1))) => SqlValue::Int(*i),
        (ColumnType::Bool, Value::String(s)) => {
            SqlValue::Int(parse_bool(s).ok_or_else(incompatible)? as i64)
        }
        (ColumnType::DateTime { .. }, Value::DateTime(ts)) => SqlValue::DateTime(ts.to_naive()),
        (ColumnType::DateTime { .. }, Value::String(s)) => {
            let ts = Timestamp::parse(s)
                .map_err(|(reason, detail)| PersistenceError::mismatch(property, reason, detail))?;
            SqlValue::DateTime(ts.to_naive())
        }
        _ => return Err(incompatible()),
    })
}

/// Decode a column value read back from the database
pub fn decode(raw: &SqlValue, column_type: &ColumnType, column: &str) -> Result<Value> {
    let undecodable = || {
        PersistenceError::database(format!(
            "cannot decode {:?} from column '{}' as {}",
            raw, column, column_type
        ))
    };

    Ok(match (column_type, raw) {
        (_, SqlValue::Null) => Value::Null,
        (ColumnType::String { .. }, SqlValue::Text(s)) => Value::String(s.clone()),
        (ColumnType::Int { .. }, SqlValue::Int(i)) => Value::Int(*i),
        (ColumnType::Int { .. }, SqlValue::UInt(u)) => {
            Value::Int(i64::try_from(*u).map_err(|_| undecodable())?)
        }
        (ColumnType::Double { .. }, SqlValue::Decimal(d)) => {
            Value::Double(d.to_f64().ok_or_else(undecodable)?)
        }
        (ColumnType::Double { .. }, SqlValue::Double(d)) => Value::Double(*d),
        (ColumnType::Double { .. }, SqlValue::Int(i)) => Value::Double(*i as f64),
        (ColumnType::Bool, SqlValue::Int(i)) => Value::Bool(*i != 0),
        (ColumnType::Bool, SqlValue::UInt(u)) => Value::Bool(*u != 0),
        (ColumnType::DateTime { fraction }, SqlValue::DateTime(naive)) => {
            Value::DateTime(Timestamp::from_utc(naive.and_utc(), *fraction))
        }
        _ => return Err(undecodable()),
    })
}

/// Boolean coercion accepted for BOOL columns: `true`/`false`/`0`/`1`
pub fn parse_bool(input: &str) -> Option<bool> {
    match input.trim().to_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn bool_text(b: bool) -> &'static str {
    if b { "1" } else { "0" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // =========================================================================
    // Timestamp Tests
    // =========================================================================

    #[test]
    fn test_parse_canonical_timestamps() {
        let ts = Timestamp::parse("2024-01-15 10:30:00+00:00").unwrap();
        assert_eq!(ts.fraction(), 0);
        assert_eq!(ts.to_string(), "2024-01-15 10:30:00+00:00");

        let ts = Timestamp::parse("2024-01-15 10:30:00.123Z").unwrap();
        assert_eq!(ts.fraction(), 3);
        assert_eq!(ts.to_string(), "2024-01-15 10:30:00.123+00:00");

        let ts = Timestamp::parse("2024-01-15 10:30:00.000456+0000").unwrap();
        assert_eq!(ts.fraction(), 6);
        assert_eq!(ts.to_string(), "2024-01-15 10:30:00.000456+00:00");
    }

    #[test]
    fn test_parse_rejects_non_utc_offset() {
        let (reason, _) = Timestamp::parse("2024-01-15 10:30:00+02:00").unwrap_err();
        assert_eq!(reason, MismatchReason::NonUtcTimestamp);
    }

    #[test]
    fn test_parse_rejects_odd_precision() {
        let (reason, _) = Timestamp::parse("2024-01-15 10:30:00.12+00:00").unwrap_err();
        assert_eq!(reason, MismatchReason::PrecisionMismatch);
    }

    #[test]
    fn test_parse_rejects_empty_and_missing_offset() {
        assert!(Timestamp::parse("").is_err());
        assert!(Timestamp::parse("2024-01-15 10:30:00").is_err());
        assert!(Timestamp::parse("2024-01-15T10:30:00Z").is_err());
    }

    #[test]
    fn test_from_utc_truncates() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
            + TimeDelta::microseconds(123_456);
        let ts = Timestamp::from_utc(instant, 3);
        assert_eq!(ts.to_string(), "2024-03-01 12:00:00.123+00:00");
    }

    #[test]
    fn test_next_tick_is_strictly_later() {
        let ts = Timestamp::parse("2024-01-15 10:30:00.000001+00:00").unwrap();
        let next = ts.next_tick();
        assert!(next > ts);
        assert_eq!(next.to_string(), "2024-01-15 10:30:00.000002+00:00");
    }

    #[test]
    fn test_timestamp_serde_as_string() {
        let ts = Timestamp::parse("2024-01-15 10:30:00.123+00:00").unwrap();
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"2024-01-15 10:30:00.123+00:00\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }

    // =========================================================================
    // Localized Tests
    // =========================================================================

    #[test]
    fn test_localized_resolve_follows_locale_order() {
        let title = Localized::new()
            .with_default("Title")
            .with("en", "Title (en)")
            .with("fr", "Titre");

        let en_first = vec!["en".to_string(), "fr".to_string()];
        let fr_first = vec!["fr".to_string(), "en".to_string()];
        assert_eq!(title.resolve(&en_first), &Value::from("Title (en)"));
        assert_eq!(title.resolve(&fr_first), &Value::from("Titre"));
    }

    #[test]
    fn test_localized_hyphenated_locale_keys() {
        let title = Localized::new()
            .with_default("Chair")
            .with("en-US", "Chair US");

        assert_eq!(title.get("en-US"), Some(&Value::from("Chair US")));
        assert_eq!(title.get("en_US"), Some(&Value::from("Chair US")));
        assert_eq!(title.resolve(&["en-US".to_string()]), &Value::from("Chair US"));

        // A value loaded under the column spelling answers the given spelling
        let mut loaded = Localized::new();
        loaded.set("en_US", "Chair US");
        assert_eq!(loaded.get("en-US"), Some(&Value::from("Chair US")));
    }

    #[test]
    fn test_localized_serde_normalizes_keys() {
        let json = r#"{"en-US":{"type":"string","value":"Chair US"}}"#;
        let title: Localized = serde_json::from_str(json).unwrap();
        assert_eq!(title.get("en_US"), Some(&Value::from("Chair US")));
        assert_eq!(
            serde_json::to_string(&title).unwrap(),
            r#"{"en_US":{"type":"string","value":"Chair US"}}"#
        );
    }

    #[test]
    fn test_localized_resolve_falls_back_to_default() {
        let title = Localized::new().with_default("Title").with("de", Value::Null);
        assert_eq!(title.resolve(&["de".to_string()]), &Value::from("Title"));
        assert_eq!(Localized::new().resolve(&[]), &Value::Null);
    }

    // =========================================================================
    // Encoding Tests
    // =========================================================================

    #[test]
    fn test_encode_scalars() {
        assert_eq!(
            encode(&Value::from("john"), &ColumnType::string(4), "name").unwrap(),
            SqlValue::Text("john".to_string())
        );
        assert_eq!(
            encode(&Value::Bool(true), &ColumnType::Bool, "active").unwrap(),
            SqlValue::Int(1)
        );
        assert_eq!(
            encode(&Value::from("0"), &ColumnType::Bool, "active").unwrap(),
            SqlValue::Int(0)
        );
        assert_eq!(
            encode(&Value::Null, &ColumnType::int(3), "age").unwrap(),
            SqlValue::Null
        );
    }

    #[test]
    fn test_encode_datetime_string() {
        let encoded = encode(
            &Value::from("2024-01-15 10:30:00+00:00"),
            &ColumnType::datetime(0),
            "seen",
        )
        .unwrap();
        match encoded {
            SqlValue::DateTime(naive) => {
                assert_eq!(naive.to_string(), "2024-01-15 10:30:00");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_encode_rejects_incompatible() {
        let err = encode(&Value::from("abc"), &ColumnType::int(3), "age").unwrap_err();
        assert!(matches!(err, PersistenceError::TypeMismatch { .. }));

        let err = encode(&Value::from("maybe"), &ColumnType::Bool, "flag").unwrap_err();
        assert!(matches!(err, PersistenceError::TypeMismatch { .. }));
    }

    // =========================================================================
    // Decoding Tests
    // =========================================================================

    #[test]
    fn test_decode_scalars() {
        assert_eq!(
            decode(&SqlValue::Int(1), &ColumnType::Bool, "active").unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            decode(
                &SqlValue::Decimal(rust_decimal::Decimal::new(314, 2)),
                &ColumnType::double(3, 2),
                "ratio"
            )
            .unwrap(),
            Value::Double(3.14)
        );
        assert_eq!(
            decode(&SqlValue::UInt(7), &ColumnType::int(19), "id").unwrap(),
            Value::Int(7)
        );
    }

    #[test]
    fn test_decode_mismatch_is_error() {
        assert!(decode(&SqlValue::Text("x".into()), &ColumnType::int(9), "age").is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("yes"), None);
    }
}
