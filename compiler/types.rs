//! The `ExpressionType` lattice (spec §4.B) and the cast rules the condition and expression
//! compilers consult to decide whether a comparison needs an explicit cast on one side.

use std::fmt;

use schema::Dialect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpressionType {
    Uuid,
    Date,
    Timestamp,
    Text,
    Number,
    Boolean,
    Json,
    /// Top of the lattice: unifies with anything.
    Any,
}

impl ExpressionType {
    /// The more specific of `self` and `other`. `ANY` unifies with anything; otherwise equal
    /// types unify with themselves, and anything else unifies to `ANY` (spec §4.B).
    pub fn unify(self, other: ExpressionType) -> ExpressionType {
        match (self, other) {
            (ExpressionType::Any, other) => other,
            (this, ExpressionType::Any) => this,
            (a, b) if a == b => a,
            _ => ExpressionType::Any,
        }
    }

    /// The type name used when casting a comparison-side expression to this type, or `None`
    /// for types that are never cast to directly (`ANY`, `JSON`). SQLite has no `::` cast
    /// operator, so [`cast`] wraps this name in `CAST(expr AS name)` there instead of the
    /// PostgreSQL `(expr)::name` suffix form.
    pub fn cast_type_name(self, dialect: Dialect) -> Option<&'static str> {
        match self {
            ExpressionType::Uuid => Some("UUID"),
            ExpressionType::Date => Some("DATE"),
            ExpressionType::Timestamp => Some("TIMESTAMP"),
            ExpressionType::Text => Some("TEXT"),
            ExpressionType::Number if dialect.is_sqlite() => Some("NUMBER"),
            ExpressionType::Number => Some("NUMERIC"),
            ExpressionType::Boolean => Some("BOOLEAN"),
            ExpressionType::Json | ExpressionType::Any => None,
        }
    }
}

impl fmt::Display for ExpressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExpressionType::Uuid => "UUID",
            ExpressionType::Date => "DATE",
            ExpressionType::Timestamp => "TIMESTAMP",
            ExpressionType::Text => "TEXT",
            ExpressionType::Number => "NUMBER",
            ExpressionType::Boolean => "BOOLEAN",
            ExpressionType::Json => "JSON",
            ExpressionType::Any => "ANY",
        };
        f.write_str(name)
    }
}

/// Wraps `expr` in a cast to `target`: `(expr)::NAME` on PostgreSQL, `CAST(expr AS NAME)` on
/// SQLite (which has no `::` cast operator), or `expr` unchanged when `target` has no cast
/// name (`JSON`, `ANY`).
pub fn cast(expr: &str, target: ExpressionType, dialect: Dialect) -> String {
    match target.cast_type_name(dialect) {
        Some(name) if dialect.is_sqlite() => format!("CAST({expr} AS {name})"),
        Some(name) => format!("({expr})::{name}"),
        None => expr.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unify_rules() {
        assert_eq!(ExpressionType::Any.unify(ExpressionType::Number), ExpressionType::Number);
        assert_eq!(ExpressionType::Number.unify(ExpressionType::Any), ExpressionType::Number);
        assert_eq!(ExpressionType::Number.unify(ExpressionType::Number), ExpressionType::Number);
        assert_eq!(ExpressionType::Number.unify(ExpressionType::Text), ExpressionType::Any);
        assert_eq!(ExpressionType::Boolean.unify(ExpressionType::Text), ExpressionType::Any);
    }

    #[test]
    fn cast_wraps_expression() {
        assert_eq!(cast("users.id", ExpressionType::Uuid, Dialect::Postgresql), "(users.id)::UUID");
        assert_eq!(cast("x", ExpressionType::Json, Dialect::Postgresql), "x");
    }

    #[test]
    fn cast_uses_cast_as_syntax_on_sqlite() {
        assert_eq!(
            cast("posts.user_id", ExpressionType::Text, Dialect::SqliteExtensions),
            "CAST(posts.user_id AS TEXT)"
        );
    }
}
