//! The scalar function registry consulted by `$func` expressions (spec §4.D) and the
//! aggregation registry consulted by the aggregate planner (spec §4.G). Both are closed,
//! validated tables keyed by name: unknown names are always a compile error, never an
//! opaque pass-through (spec §9 Design Notes).
//!
//! Grounded on `datastore/sql_writer.rs`'s dialect-keyed emission instinct and the
//! `lazy_static!` table-of-singletons idiom from `snapshot/schema.rs`.

use anyhow::{bail, Result};
use lazy_static::lazy_static;
use schema::Dialect;
use std::collections::HashMap;

use crate::lexical;
use crate::types::ExpressionType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Unary,
    Binary,
    /// At least one argument.
    Variadic,
    /// Exactly `n` arguments; `label` is the category name used in the arity error.
    Exact(usize, &'static str),
}

impl Arity {
    pub fn check(self, name: &str, arg_count: usize) -> Result<()> {
        let ok = match self {
            Arity::Unary => arg_count == 1,
            Arity::Binary => arg_count == 2,
            Arity::Variadic => arg_count >= 1,
            Arity::Exact(n, _) => arg_count == n,
        };
        if ok {
            return Ok(());
        }
        match self {
            Arity::Unary => bail!("Unary operator '{name}' requires exactly 1 argument"),
            Arity::Binary => bail!("Binary operator '{name}' requires exactly 2 arguments"),
            Arity::Variadic => bail!("Variable operator '{name}' requires at least 1 argument"),
            Arity::Exact(n, label) => bail!("{label} operator '{name}' requires exactly {n} argument(s)"),
        }
    }
}

/// An operand already compiled to `(sql, type)` by the expression compiler.
pub type CompiledArg = (String, ExpressionType);

pub struct ScalarFunction {
    pub name: &'static str,
    pub arity: Arity,
    pub result_type: ExpressionType,
    pub emit: fn(&[CompiledArg]) -> String,
}

macro_rules! binary_emitter {
    ($op:literal) => {
        |args: &[CompiledArg]| format!("({} {} {})", args[0].0, $op, args[1].0)
    };
}

fn emit_concat(args: &[CompiledArg]) -> String {
    let parts: Vec<&str> = args.iter().map(|(sql, _)| sql.as_str()).collect();
    format!("({})", parts.join(" || "))
}

fn emit_coalesce(args: &[CompiledArg]) -> String {
    let parts: Vec<&str> = args.iter().map(|(sql, _)| sql.as_str()).collect();
    lexical::apply_function("COALESCE", &parts.iter().map(|s| s.to_string()).collect::<Vec<_>>())
}

fn emit_substr(args: &[CompiledArg]) -> String {
    lexical::apply_function("SUBSTR", &args.iter().map(|(sql, _)| sql.clone()).collect::<Vec<_>>())
}

fn emit_greatest_number(args: &[CompiledArg]) -> String {
    lexical::apply_function("GREATEST", &args.iter().map(|(sql, _)| sql.clone()).collect::<Vec<_>>())
}

fn emit_extract_epoch(args: &[CompiledArg]) -> String {
    format!("EXTRACT(EPOCH FROM {})", args[0].0)
}

lazy_static! {
    static ref SCALAR_FUNCTIONS: HashMap<&'static str, ScalarFunction> = {
        let mut m = HashMap::new();
        m.insert("UPPER", ScalarFunction {
            name: "UPPER", arity: Arity::Unary, result_type: ExpressionType::Text,
            emit: |args| lexical::apply_function("UPPER", &[args[0].0.clone()]),
        });
        m.insert("LOWER", ScalarFunction {
            name: "LOWER", arity: Arity::Unary, result_type: ExpressionType::Text,
            emit: |args| lexical::apply_function("LOWER", &[args[0].0.clone()]),
        });
        m.insert("LENGTH", ScalarFunction {
            name: "LENGTH",
            arity: Arity::Unary,
            result_type: ExpressionType::Number,
            emit: |args| lexical::apply_function("LENGTH", &[args[0].0.clone()]),
        });
        m.insert("ADD", ScalarFunction {
            name: "ADD", arity: Arity::Binary, result_type: ExpressionType::Number,
            emit: binary_emitter!("+"),
        });
        m.insert("SUBTRACT", ScalarFunction {
            name: "SUBTRACT", arity: Arity::Binary, result_type: ExpressionType::Number,
            emit: binary_emitter!("-"),
        });
        m.insert("MULTIPLY", ScalarFunction {
            name: "MULTIPLY", arity: Arity::Binary, result_type: ExpressionType::Number,
            emit: binary_emitter!("*"),
        });
        m.insert("DIVIDE", ScalarFunction {
            name: "DIVIDE", arity: Arity::Binary, result_type: ExpressionType::Number,
            emit: binary_emitter!("/"),
        });
        m.insert("MOD", ScalarFunction {
            name: "MOD", arity: Arity::Binary, result_type: ExpressionType::Number,
            emit: binary_emitter!("%"),
        });
        m.insert("POW", ScalarFunction {
            name: "POW", arity: Arity::Binary, result_type: ExpressionType::Number,
            emit: binary_emitter!("^"),
        });
        m.insert("CONCAT", ScalarFunction {
            name: "CONCAT", arity: Arity::Variadic, result_type: ExpressionType::Text,
            emit: emit_concat,
        });
        m.insert("COALESCE_STRING", ScalarFunction {
            name: "COALESCE_STRING", arity: Arity::Variadic, result_type: ExpressionType::Text,
            emit: emit_coalesce,
        });
        m.insert("COALESCE_NUMBER", ScalarFunction {
            name: "COALESCE_NUMBER", arity: Arity::Variadic, result_type: ExpressionType::Number,
            emit: emit_coalesce,
        });
        m.insert("SUBSTR", ScalarFunction {
            name: "SUBSTR", arity: Arity::Exact(3, "N-ary"), result_type: ExpressionType::Text,
            emit: emit_substr,
        });
        m.insert("GREATEST_NUMBER", ScalarFunction {
            name: "GREATEST_NUMBER", arity: Arity::Variadic, result_type: ExpressionType::Number,
            emit: emit_greatest_number,
        });
        m.insert("EXTRACT_EPOCH", ScalarFunction {
            name: "EXTRACT_EPOCH", arity: Arity::Exact(1, "N-ary"), result_type: ExpressionType::Number,
            emit: emit_extract_epoch,
        });
        m
    };
}

pub fn lookup_scalar(name: &str) -> Result<&'static ScalarFunction> {
    if name == "SUBSTRING" {
        bail!("Unknown function or operator '{name}'");
    }
    SCALAR_FUNCTIONS
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("Unknown function or operator '{name}'"))
}

pub fn compile_scalar(name: &str, args: &[CompiledArg]) -> Result<(String, ExpressionType)> {
    let func = lookup_scalar(name)?;
    func.arity.check(name, args.len())?;
    Ok(((func.emit)(args), func.result_type))
}

/// Aggregation function registry (spec §4.G). `emit` takes the already-resolved group
/// expression SQL and any extra literal arguments (e.g. `STRING_AGG`'s separator).
pub struct AggregateFunction {
    pub name: &'static str,
    pub result_type: ExpressionType,
    pub emit: fn(expr: &str, extra_args: &[String], dialect: Dialect) -> String,
    /// Only `COUNT` admits the bare `*` wildcard in place of a field.
    pub allows_wildcard: bool,
}

lazy_static! {
    static ref AGGREGATE_FUNCTIONS: HashMap<&'static str, AggregateFunction> = {
        let mut m = HashMap::new();
        m.insert("COUNT", AggregateFunction {
            name: "COUNT", result_type: ExpressionType::Any, allows_wildcard: true,
            emit: |expr, _, _| format!("COUNT({expr})"),
        });
        m.insert("COUNT_DISTINCT", AggregateFunction {
            name: "COUNT_DISTINCT", result_type: ExpressionType::Any, allows_wildcard: false,
            emit: |expr, _, _| format!("COUNT(DISTINCT {expr})"),
        });
        for name in ["SUM", "AVG", "MIN", "MAX"] {
            m.insert(name, AggregateFunction {
                name, result_type: ExpressionType::Number, allows_wildcard: false,
                emit: match name {
                    "SUM" => |expr, _, _| format!("SUM({expr})"),
                    "AVG" => |expr, _, _| format!("AVG({expr})"),
                    "MIN" => |expr, _, _| format!("MIN({expr})"),
                    "MAX" => |expr, _, _| format!("MAX({expr})"),
                    _ => unreachable!(),
                },
            });
        }
        m.insert("STDDEV", AggregateFunction {
            name: "STDDEV", result_type: ExpressionType::Number, allows_wildcard: false,
            emit: |expr, _, dialect| {
                if dialect.is_sqlite() {
                    sqlite_variance_expansion(expr, true)
                } else {
                    format!("STDDEV({expr})")
                }
            },
        });
        m.insert("VARIANCE", AggregateFunction {
            name: "VARIANCE", result_type: ExpressionType::Number, allows_wildcard: false,
            emit: |expr, _, dialect| {
                if dialect.is_sqlite() {
                    sqlite_variance_expansion(expr, false)
                } else {
                    format!("VARIANCE({expr})")
                }
            },
        });
        m.insert("STRING_AGG", AggregateFunction {
            name: "STRING_AGG", result_type: ExpressionType::Text, allows_wildcard: false,
            emit: |expr, extra, dialect| {
                let sep = extra.first().map(String::as_str).unwrap_or("','");
                if dialect.is_sqlite() {
                    format!("GROUP_CONCAT({expr}, {sep})")
                } else {
                    format!("STRING_AGG({expr}, {sep})")
                }
            },
        });
        m
    };
}

/// SQLite has no native `STDDEV`/`VARIANCE`; expand the algebraic population-variance
/// formula `AVG(x*x) - AVG(x)*AVG(x)`, optionally wrapped in `SQRT` for `STDDEV`.
fn sqlite_variance_expansion(expr: &str, as_stddev: bool) -> String {
    let variance = format!("(AVG({expr} * {expr}) - AVG({expr}) * AVG({expr}))");
    if as_stddev {
        format!("SQRT({variance})")
    } else {
        variance
    }
}

pub fn lookup_aggregate(name: &str) -> Result<&'static AggregateFunction> {
    AGGREGATE_FUNCTIONS
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("Unknown function or operator '{name}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_scalar_function_fails() {
        let err = lookup_scalar("NOPE").unwrap_err();
        assert_eq!(err.to_string(), "Unknown function or operator 'NOPE'");
    }

    #[test]
    fn substring_is_rejected_in_favor_of_substr() {
        assert!(lookup_scalar("SUBSTRING").is_err());
        assert!(lookup_scalar("SUBSTR").is_ok());
    }

    #[test]
    fn unary_arity_violation() {
        let args: Vec<CompiledArg> = vec![];
        let err = compile_scalar("UPPER", &args).unwrap_err();
        assert_eq!(err.to_string(), "Unary operator 'UPPER' requires exactly 1 argument");
    }

    #[test]
    fn binary_numeric_emission() {
        let args: Vec<CompiledArg> = vec![("1".into(), ExpressionType::Number), ("2".into(), ExpressionType::Number)];
        let (sql, ty) = compile_scalar("ADD", &args).unwrap();
        assert_eq!(sql, "(1 + 2)");
        assert_eq!(ty, ExpressionType::Number);
    }

    #[test]
    fn sqlite_stddev_expansion() {
        let func = lookup_aggregate("STDDEV").unwrap();
        let sql = (func.emit)("users.age", &[], Dialect::SqliteExtensions);
        assert!(sql.starts_with("SQRT("));
    }
}
