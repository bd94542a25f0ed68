//! Lexical utilities: identifier validation, literal escaping, double-quoting, and the plain
//! `NAME(args...)` function-call shape shared by every dialect. Dialect-specific function
//! shims (e.g. `STRING_AGG` vs `GROUP_CONCAT`) live in [`crate::functions`], which calls back
//! into [`apply_function`] for the common case.
//!
//! Grounded on `datastore/sql_writer.rs`'s `write_literal_str`/`write_literal_f64`/`write_name`.

use anyhow::{bail, Result};

/// A table or field name: a lowercase ASCII letter, followed by lowercase letters, digits, or
/// underscores (spec invariant 2).
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

pub fn check_identifier(name: &str) -> Result<()> {
    if !is_valid_identifier(name) {
        bail!("'{name}' is not a valid identifier: must start with a lowercase letter and contain only lowercase letters, digits, or underscores");
    }
    Ok(())
}

/// Single-quotes `value`, doubling any embedded `'` (spec invariant 5). This is the only
/// place user-controllable text is allowed to reach the output SQL.
pub fn escape_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\'' {
            out.push_str("''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Emits a finite `f64` as an SQL numeric literal; rejects `NaN`/`±∞`.
pub fn format_number(value: f64) -> Result<String> {
    if !value.is_finite() {
        bail!("cannot use a non-finite number ({value}) as a SQL literal");
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        Ok(format!("{}", value as i64))
    } else {
        Ok(format!("{value}"))
    }
}

pub fn format_bool(value: bool) -> &'static str {
    if value {
        "TRUE"
    } else {
        "FALSE"
    }
}

pub const NULL: &str = "NULL";

/// Double-quotes an identifier for use as a projection alias, doubling any embedded `"`.
pub fn double_quote(identifier: &str) -> String {
    let mut out = String::with_capacity(identifier.len() + 2);
    out.push('"');
    for c in identifier.chars() {
        if c == '"' {
            out.push_str("\"\"");
        } else {
            out.push(c);
        }
    }
    out.push('"');
    out
}

/// The plain `NAME(arg1, arg2, ...)` call shape used by most SQL functions.
pub fn apply_function(name: &str, args: &[String]) -> String {
    format!("{name}({})", args.join(", "))
}
