//! Scalar literal values and the validators for the typed string literals (`$uuid`, `$date`,
//! `$timestamp`). Grounded on `datastore/encode_v8.rs`'s per-repr encode dispatch and
//! `sql_writer.rs`'s escaping helpers, generalized from "encode a JS value" to "emit a
//! literal SQL token from a parsed scalar".

use anyhow::{bail, Result};
use schema::Dialect;

use crate::lexical;
use crate::types::ExpressionType;

/// An already-evaluated scalar: the result of resolving a `$var`, a bare literal in a
/// condition, or a folded constant during mutation partial evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
}

impl Literal {
    pub fn from_schema_value(value: &schema::Value) -> Literal {
        match value {
            schema::Value::String(s) => Literal::String(s.clone()),
            schema::Value::Number(n) => Literal::Number(n.as_f64().unwrap_or(f64::NAN)),
            schema::Value::Boolean(b) => Literal::Boolean(*b),
        }
    }

    pub fn inferred_type(&self) -> ExpressionType {
        match self {
            Literal::Null => ExpressionType::Any,
            Literal::Boolean(_) => ExpressionType::Boolean,
            Literal::Number(_) => ExpressionType::Number,
            Literal::String(_) => ExpressionType::Text,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Literal::Null)
    }

    /// Emits this literal as a plain (untyped) SQL token.
    pub fn to_sql(&self) -> Result<String> {
        Ok(match self {
            Literal::Null => lexical::NULL.to_string(),
            Literal::Boolean(b) => lexical::format_bool(*b).to_string(),
            Literal::Number(n) => lexical::format_number(*n)?,
            Literal::String(s) => lexical::escape_string(s),
        })
    }
}

/// Validates `s` is `8-4-4-4-12` hex (case-insensitive), per RFC 4122's textual grouping.
pub fn validate_uuid(s: &str) -> Result<()> {
    let groups: Vec<&str> = s.split('-').collect();
    let expected_lens = [8, 4, 4, 4, 12];
    if groups.len() != 5 || groups.iter().zip(expected_lens).any(|(g, len)| g.len() != len) {
        bail!("Invalid UUID format");
    }
    if groups.iter().any(|g| !g.chars().all(|c| c.is_ascii_hexdigit())) {
        bail!("Invalid UUID format");
    }
    Ok(())
}

pub fn uuid_literal_sql(s: &str, dialect: Dialect) -> String {
    if dialect.is_sqlite() {
        lexical::escape_string(s)
    } else {
        format!("{}::UUID", lexical::escape_string(s))
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => Some(31),
        4 | 6 | 9 | 11 => Some(30),
        2 if is_leap_year(year) => Some(29),
        2 => Some(28),
        _ => None,
    }
}

/// Validates `YYYY-MM-DD` with full calendar correctness (leap years, month lengths).
pub fn validate_date(s: &str) -> Result<()> {
    validate_date_parts(s).ok_or_else(|| anyhow::anyhow!("Invalid date format"))
}

fn validate_date_parts(s: &str) -> Option<()> {
    let bytes = s.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    let year: i32 = s.get(0..4)?.parse().ok()?;
    let month: u32 = s.get(5..7)?.parse().ok()?;
    let day: u32 = s.get(8..10)?.parse().ok()?;
    if s[0..4].bytes().any(|b| !b.is_ascii_digit())
        || s[5..7].bytes().any(|b| !b.is_ascii_digit())
        || s[8..10].bytes().any(|b| !b.is_ascii_digit())
    {
        return None;
    }
    let max_day = days_in_month(year, month)?;
    if day == 0 || day > max_day {
        return None;
    }
    Some(())
}

pub fn date_literal_sql(s: &str, dialect: Dialect) -> String {
    if dialect.is_sqlite() {
        lexical::escape_string(s)
    } else {
        format!("{}::DATE", lexical::escape_string(s))
    }
}

/// Validates `YYYY-MM-DD[T ]HH:MM:SS[.fraction]` (1-6 fraction digits) and normalizes the
/// `T` separator to a space. Returns the normalized string.
pub fn validate_timestamp(s: &str) -> Result<String> {
    validate_timestamp_parts(s).ok_or_else(|| anyhow::anyhow!("Invalid timestamp format"))
}

fn validate_timestamp_parts(s: &str) -> Option<String> {
    if s.len() < 19 {
        return None;
    }
    let (date_part, rest) = s.split_at(10);
    validate_date_parts(date_part)?;
    let sep = rest.as_bytes().first().copied()?;
    if sep != b'T' && sep != b' ' {
        return None;
    }
    let time_part = &rest[1..];
    let bytes = time_part.as_bytes();
    if bytes.len() < 8 || bytes[2] != b':' || bytes[5] != b':' {
        return None;
    }
    let hour: u32 = time_part.get(0..2)?.parse().ok()?;
    let minute: u32 = time_part.get(3..5)?.parse().ok()?;
    let second: u32 = time_part.get(6..8)?.parse().ok()?;
    if hour > 23 || minute > 59 || second > 59 {
        return None;
    }
    let fraction = &time_part[8..];
    if !fraction.is_empty() {
        let digits = fraction.strip_prefix('.')?;
        if digits.is_empty() || digits.len() > 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }
    Some(format!("{date_part} {time_part}"))
}

pub fn timestamp_literal_sql(normalized: &str, dialect: Dialect) -> String {
    if dialect.is_sqlite() {
        lexical::escape_string(normalized)
    } else {
        format!("{}::TIMESTAMP", lexical::escape_string(normalized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_validation() {
        assert!(validate_uuid("6ba7b810-9dad-11d1-80b4-00c04fd430c8").is_ok());
        assert!(validate_uuid("6BA7B810-9DAD-11D1-80B4-00C04FD430C8").is_ok());
        assert!(validate_uuid("not-a-uuid").is_err());
        assert!(validate_uuid("6ba7b810-9dad-11d1-80b4-00c04fd430c8-extra").is_err());
    }

    #[test]
    fn date_validation() {
        assert!(validate_date("2024-02-29").is_ok());
        assert!(validate_date("2023-02-29").is_err());
        assert!(validate_date("2023-13-01").is_err());
        assert!(validate_date("2023-00-01").is_err());
        assert!(validate_date("not-a-date").is_err());
    }

    #[test]
    fn timestamp_validation_normalizes_t() {
        let normalized = validate_timestamp("2024-02-29T12:30:00.123").unwrap();
        assert_eq!(normalized, "2024-02-29 12:30:00.123");
        assert!(validate_timestamp("2024-02-29 12:30:00").is_ok());
        assert!(validate_timestamp("2024-02-29T12:30:61").is_err());
        assert!(validate_timestamp("2024-02-29T12:30:00.1234567").is_err());
    }

    #[test]
    fn literal_escape_soundness() {
        assert_eq!(Literal::String("it's".into()).to_sql().unwrap(), "'it''s'");
        assert!(Literal::Number(f64::NAN).to_sql().is_err());
    }
}
