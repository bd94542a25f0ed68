//! The mutation partial evaluator (spec §4.H): builds insert/update SQL, folding any
//! `NEW_ROW.f` condition reference against the literal values the mutation itself supplies,
//! and leaving references to untouched fields as a residual `WHERE` clause.
//!
//! Grounded on `datastore/query/mutation.rs`'s interpreter-mode condition walk, rebuilt
//! around the `Ctx` overlay (spec §9 Design Notes) instead of mutating `config.tables`.

use std::cmp::Ordering;
use std::collections::HashMap;

use anyhow::{bail, Result};
use regex::Regex;
use schema::{Config, Field, FieldType};
use serde_json::Value as JsonValue;

use crate::condition::{CmpOp, Condition, FieldRhs};
use crate::ctx::Ctx;
use crate::expr::Expression;
use crate::functions;
use crate::lexical;
use crate::literal::{self, Literal};

/// The literal bindings a mutation supplies for its own row, keyed by field name. Only
/// fields actually present in the update set are recorded here — fields left untouched by
/// an UPDATE are represented purely syntactically (rewritten `NEW_ROW.f` -> `table.f`), with
/// no entry required.
struct MutationEnv<'a> {
    table: &'a str,
    updated: HashMap<String, Expression>,
}

/// Either a condition fully reduced to a boolean, or a residual tree still needing a normal
/// SQL compile (spec §4.H step 4-7).
enum Folded {
    Bool(bool),
    Residual(Condition),
}

pub fn compile_insert(query: &JsonValue, config: &Config) -> Result<String> {
    let obj = query
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("insert query must be an object"))?;
    let table = obj
        .get("table")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| anyhow::anyhow!("insert query is missing 'table'"))?;
    let new_row = obj
        .get("newRow")
        .and_then(JsonValue::as_object)
        .ok_or_else(|| anyhow::anyhow!("insert query is missing 'newRow'"))?;

    let ctx = Ctx::with_default_table(config, table);
    let table_schema = ctx.require_table(table)?;

    for key in new_row.keys() {
        if table_schema.field(key).is_none() {
            bail!("Field '{key}' is not allowed or does not exist in '{table}'");
        }
    }

    let mut env = MutationEnv { table, updated: HashMap::new() };
    for (field_name, field) in &table_schema.fields {
        if let Some(value) = new_row.get(field_name) {
            env.updated.insert(field_name.clone(), parse_value_expression(value, field)?);
        } else if let Some(default) = &field.default {
            env.updated.insert(field_name.clone(), parse_value_expression(default, field)?);
        } else if !field.nullable {
            bail!("Field '{field_name}' is required and has no value or default in '{table}'");
        }
    }

    let mut columns = Vec::new();
    let mut values = Vec::new();
    for field_name in table_schema.fields.keys() {
        if let Some(expr) = env.updated.get(field_name) {
            let (sql, _ty) = expr.compile(&ctx)?;
            columns.push(lexical::double_quote(field_name));
            values.push(sql);
        }
    }
    if columns.is_empty() {
        bail!("insert must set at least one field");
    }

    if let Some(condition_value) = obj.get("condition") {
        let condition = Condition::parse(condition_value)?;
        match partial_eval(&condition, &env, config)? {
            Folded::Bool(true) => {}
            Folded::Bool(false) => bail!("Insert condition not met."),
            Folded::Residual(_) => {
                bail!("insert condition must reduce to a constant boolean before emission")
            }
        }
    }

    Ok(format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        values.join(", ")
    ))
}

pub fn compile_update(query: &JsonValue, config: &Config) -> Result<String> {
    let obj = query
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("update query must be an object"))?;
    let table = obj
        .get("table")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| anyhow::anyhow!("update query is missing 'table'"))?;
    let updates = obj
        .get("updates")
        .and_then(JsonValue::as_object)
        .ok_or_else(|| anyhow::anyhow!("update query is missing 'updates'"))?;

    let ctx = Ctx::with_default_table(config, table);
    let table_schema = ctx.require_table(table)?;

    let mut env = MutationEnv { table, updated: HashMap::new() };
    for (field_name, value) in updates {
        let field = table_schema
            .field(field_name)
            .ok_or_else(|| anyhow::anyhow!("Field '{field_name}' is not allowed or does not exist in '{table}'"))?;
        env.updated.insert(field_name.clone(), parse_value_expression(value, field)?);
    }

    let mut set_parts = Vec::new();
    for field_name in table_schema.fields.keys() {
        if let Some(expr) = env.updated.get(field_name) {
            let (sql, _ty) = expr.compile(&ctx)?;
            set_parts.push(format!("{} = {sql}", lexical::double_quote(field_name)));
        }
    }
    if set_parts.is_empty() {
        bail!("update must set at least one field");
    }

    let mut sql = format!("UPDATE {table} SET {}", set_parts.join(", "));

    if let Some(condition_value) = obj.get("condition") {
        let condition = Condition::parse(condition_value)?;
        match partial_eval(&condition, &env, config)? {
            Folded::Bool(true) => {}
            Folded::Bool(false) => bail!("Update condition not met."),
            Folded::Residual(residual) => {
                let where_sql = residual.compile(&ctx)?;
                sql.push_str(" WHERE ");
                sql.push_str(&where_sql);
            }
        }
    }

    Ok(sql)
}

pub fn compile_delete(query: &JsonValue, config: &Config) -> Result<String> {
    let obj = query
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("delete query must be an object"))?;
    let table = obj
        .get("table")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| anyhow::anyhow!("delete query is missing 'table'"))?;

    let ctx = Ctx::with_default_table(config, table);
    ctx.require_table(table)?;

    let mut sql = format!("DELETE FROM {table}");
    if let Some(condition_value) = obj.get("condition") {
        let condition = Condition::parse(condition_value)?;
        sql.push_str(" WHERE ");
        sql.push_str(&condition.compile(&ctx)?);
    }
    Ok(sql)
}

/// When a raw scalar is bound to a `uuid` field, wrap it as `$uuid` so validation and the
/// UUID cast apply (spec §4.H "Value auto-conversion").
fn parse_value_expression(value: &JsonValue, field: &Field) -> Result<Expression> {
    if field.type_ == FieldType::Uuid {
        if let JsonValue::String(s) = value {
            return Ok(Expression::Uuid(s.clone()));
        }
    }
    Expression::parse(value)
}

fn partial_eval(condition: &Condition, env: &MutationEnv, config: &Config) -> Result<Folded> {
    match condition {
        Condition::BoolLiteral(b) => Ok(Folded::Bool(*b)),
        Condition::And(parts) => fold_logical(parts, env, config, false, Condition::And),
        Condition::Conjunction(parts) => fold_logical(parts, env, config, false, Condition::Conjunction),
        Condition::Or(parts) => fold_logical(parts, env, config, true, Condition::Or),
        Condition::Not(inner) => match partial_eval(inner, env, config)? {
            Folded::Bool(b) => Ok(Folded::Bool(!b)),
            Folded::Residual(residual) => Ok(Folded::Residual(Condition::Not(Box::new(residual)))),
        },
        // A correlated `$exists` subquery reasons over a different table's rows; NEW_ROW
        // references inside it are out of scope for this mutation's row image.
        Condition::Exists { .. } => Ok(Folded::Residual(condition.clone())),
        Condition::FieldPredicate { path, comparisons } => {
            // A mutation condition may reference a field either as `NEW_ROW.f` (folded
            // against the row this mutation is producing) or bare/qualified (shorthand for
            // "the stored value of `table.f`", always left as a residual and resolved
            // against the compiling `Ctx`'s default table).
            let Some((table, field)) = path.split_once('.') else {
                return Ok(Folded::Residual(condition.clone()));
            };
            if table != "NEW_ROW" {
                return Ok(Folded::Residual(condition.clone()));
            }
            if let Some(new_value) = env.updated.get(field) {
                let lhs = eval_expr(new_value, env, config)?;
                let mut result = true;
                for (op, rhs) in comparisons {
                    result = result && eval_comparison(&lhs, *op, rhs, env, config)?;
                }
                Ok(Folded::Bool(result))
            } else {
                Ok(Folded::Residual(Condition::FieldPredicate {
                    path: format!("{}.{field}", env.table),
                    comparisons: comparisons.clone(),
                }))
            }
        }
    }
}

fn fold_logical(
    parts: &[Condition],
    env: &MutationEnv,
    config: &Config,
    is_or: bool,
    wrap: fn(Vec<Condition>) -> Condition,
) -> Result<Folded> {
    let short_circuit = is_or;
    let mut residuals = Vec::new();
    for part in parts {
        match partial_eval(part, env, config)? {
            Folded::Bool(b) if b == short_circuit => return Ok(Folded::Bool(short_circuit)),
            Folded::Bool(_) => {}
            Folded::Residual(r) => residuals.push(r),
        }
    }
    match residuals.len() {
        0 => Ok(Folded::Bool(!short_circuit)),
        1 => Ok(Folded::Residual(residuals.into_iter().next().unwrap())),
        _ => Ok(Folded::Residual(wrap(residuals))),
    }
}

fn eval_expr(expr: &Expression, env: &MutationEnv, config: &Config) -> Result<Literal> {
    match expr {
        Expression::Literal(lit) => Ok(lit.clone()),
        Expression::Field(path) => {
            let (table, field) = path
                .split_once('.')
                .ok_or_else(|| anyhow::anyhow!("'{path}' is not a valid field path: expected 'table.field'"))?;
            if table == "NEW_ROW" {
                if let Some(new_value) = env.updated.get(field) {
                    eval_expr(new_value, env, config)
                } else {
                    bail!("cannot constant-fold a reference to unmodified field '{field}' during condition evaluation")
                }
            } else {
                bail!("cannot constant-fold a reference to '{path}' during condition evaluation")
            }
        }
        Expression::Var(name) => {
            let value = config
                .variable(name)
                .ok_or_else(|| anyhow::anyhow!("Variable '{name}' is not allowed or does not exist"))?;
            Ok(Literal::from_schema_value(value))
        }
        Expression::Uuid(s) => {
            literal::validate_uuid(s)?;
            Ok(Literal::String(s.clone()))
        }
        Expression::Date(s) => {
            literal::validate_date(s)?;
            Ok(Literal::String(s.clone()))
        }
        Expression::Timestamp(s) => {
            let normalized = literal::validate_timestamp(s)?;
            Ok(Literal::String(normalized))
        }
        Expression::Jsonb(value) => Ok(Literal::String(serde_json::to_string(value)?)),
        Expression::Cond { if_, then, else_ } => {
            let branch = match partial_eval(if_, env, config)? {
                Folded::Bool(b) => b,
                Folded::Residual(_) => {
                    bail!("$cond condition could not be fully evaluated during partial evaluation")
                }
            };
            if branch {
                eval_expr(then, env, config)
            } else {
                eval_expr(else_, env, config)
            }
        }
        Expression::Func { name, args } => {
            let values = args
                .iter()
                .map(|a| eval_expr(a, env, config))
                .collect::<Result<Vec<_>>>()?;
            eval_function(name, &values)
        }
    }
}

fn eval_comparison(
    lhs: &Literal,
    op: CmpOp,
    rhs: &FieldRhs,
    env: &MutationEnv,
    config: &Config,
) -> Result<bool> {
    match (op, rhs) {
        (CmpOp::In | CmpOp::Nin, FieldRhs::Many(items)) => {
            if items.is_empty() {
                bail!("Operator 'IN' requires a non-empty array");
            }
            let values = items
                .iter()
                .map(|e| eval_expr(e, env, config))
                .collect::<Result<Vec<_>>>()?;
            let contains = values.iter().any(|v| literal_eq(lhs, v));
            Ok(if op == CmpOp::In { contains } else { !contains })
        }
        (CmpOp::In | CmpOp::Nin, FieldRhs::Single(_)) => bail!("Operator 'IN' requires a non-empty array"),
        (_, FieldRhs::Single(expr)) => {
            let rhs_lit = eval_expr(expr, env, config)?;
            Ok(match op {
                CmpOp::Eq => literal_eq(lhs, &rhs_lit),
                CmpOp::Ne => !literal_eq(lhs, &rhs_lit),
                CmpOp::Lt => literal_cmp(lhs, &rhs_lit)? == Ordering::Less,
                CmpOp::Le => literal_cmp(lhs, &rhs_lit)? != Ordering::Greater,
                CmpOp::Gt => literal_cmp(lhs, &rhs_lit)? == Ordering::Greater,
                CmpOp::Ge => literal_cmp(lhs, &rhs_lit)? != Ordering::Less,
                CmpOp::Like => glob_match(&literal_to_string(&rhs_lit)?, &literal_to_string(lhs)?),
                CmpOp::Regex => {
                    let pattern = literal_to_string(&rhs_lit)?;
                    let re = Regex::new(&pattern)
                        .map_err(|e| anyhow::anyhow!("'{pattern}' is not a valid regular expression: {e}"))?;
                    re.is_match(&literal_to_string(lhs)?)
                }
                CmpOp::In | CmpOp::Nin => unreachable!("handled above"),
            })
        }
        (_, FieldRhs::Many(_)) => bail!("operator does not accept an array right-hand side"),
    }
}

fn literal_eq(a: &Literal, b: &Literal) -> bool {
    match (a, b) {
        (Literal::Null, Literal::Null) => true,
        (Literal::Null, _) | (_, Literal::Null) => false,
        (Literal::Boolean(x), Literal::Boolean(y)) => x == y,
        (Literal::Number(x), Literal::Number(y)) => x == y,
        (Literal::String(x), Literal::String(y)) => x == y,
        _ => false,
    }
}

fn literal_cmp(a: &Literal, b: &Literal) -> Result<Ordering> {
    match (a, b) {
        (Literal::Number(x), Literal::Number(y)) => {
            x.partial_cmp(y).ok_or_else(|| anyhow::anyhow!("cannot compare non-finite numbers"))
        }
        (Literal::String(x), Literal::String(y)) => Ok(x.cmp(y)),
        _ => bail!("cannot order-compare values of different types"),
    }
}

fn literal_to_string(lit: &Literal) -> Result<String> {
    match lit {
        Literal::String(s) => Ok(s.clone()),
        _ => bail!("expected a string value"),
    }
}

/// SQL `LIKE` semantics: `%` matches any run of characters, `_` matches exactly one.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let mut dp = vec![vec![false; t.len() + 1]; p.len() + 1];
    dp[0][0] = true;
    for (i, &pc) in p.iter().enumerate() {
        if pc == '%' {
            dp[i + 1][0] = dp[i][0];
        }
    }
    for i in 0..p.len() {
        for j in 0..t.len() {
            dp[i + 1][j + 1] = match p[i] {
                '%' => dp[i][j + 1] || dp[i + 1][j],
                '_' => dp[i][j],
                c => dp[i][j] && c == t[j],
            };
        }
    }
    dp[p.len()][t.len()]
}

fn eval_function(name: &str, args: &[Literal]) -> Result<Literal> {
    let as_number = |lit: &Literal| -> Result<f64> {
        match lit {
            Literal::Number(n) => Ok(*n),
            _ => bail!("'{name}' expects a numeric argument"),
        }
    };
    let as_string = |lit: &Literal| -> Result<String> {
        match lit {
            Literal::String(s) => Ok(s.clone()),
            _ => bail!("'{name}' expects a string argument"),
        }
    };

    functions::lookup_scalar(name)?.arity.check(name, args.len())?;

    Ok(match name {
        "UPPER" => Literal::String(as_string(&args[0])?.to_uppercase()),
        "LOWER" => Literal::String(as_string(&args[0])?.to_lowercase()),
        "LENGTH" => Literal::Number(as_string(&args[0])?.chars().count() as f64),
        "ADD" => Literal::Number(as_number(&args[0])? + as_number(&args[1])?),
        "SUBTRACT" => Literal::Number(as_number(&args[0])? - as_number(&args[1])?),
        "MULTIPLY" => Literal::Number(as_number(&args[0])? * as_number(&args[1])?),
        "DIVIDE" => {
            let divisor = as_number(&args[1])?;
            if divisor == 0.0 {
                bail!("Division by zero is not allowed");
            }
            Literal::Number(as_number(&args[0])? / divisor)
        }
        "MOD" => Literal::Number(as_number(&args[0])? % as_number(&args[1])?),
        "POW" => Literal::Number(as_number(&args[0])?.powf(as_number(&args[1])?)),
        "CONCAT" => {
            let mut out = String::new();
            for a in args {
                out.push_str(&as_string(a)?);
            }
            Literal::String(out)
        }
        "COALESCE_STRING" | "COALESCE_NUMBER" => args
            .iter()
            .find(|lit| !lit.is_null())
            .cloned()
            .unwrap_or(Literal::Null),
        "SUBSTR" => {
            let s = as_string(&args[0])?;
            let start = as_number(&args[1])? as usize;
            let len = as_number(&args[2])? as usize;
            let chars: Vec<char> = s.chars().collect();
            let begin = start.saturating_sub(1).min(chars.len());
            let end = (begin + len).min(chars.len());
            Literal::String(chars[begin..end].iter().collect())
        }
        "GREATEST_NUMBER" => {
            let mut best = as_number(&args[0])?;
            for a in &args[1..] {
                best = best.max(as_number(a)?);
            }
            Literal::Number(best)
        }
        "EXTRACT_EPOCH" => Literal::Number(timestamp_to_epoch(&as_string(&args[0])?)?),
        _ => bail!("Unknown function or operator '{name}'"),
    })
}

/// Converts a normalized `YYYY-MM-DD HH:MM:SS[.fraction]` timestamp to Unix epoch seconds,
/// using the Howard Hinnant `days_from_civil` algorithm for the calendar component.
fn timestamp_to_epoch(normalized: &str) -> Result<f64> {
    let (date_part, time_part) = normalized
        .split_once(' ')
        .ok_or_else(|| anyhow::anyhow!("'{normalized}' is not a normalized timestamp"))?;
    let year: i64 = date_part[0..4].parse()?;
    let month: i64 = date_part[5..7].parse()?;
    let day: i64 = date_part[8..10].parse()?;
    let hour: i64 = time_part[0..2].parse()?;
    let minute: i64 = time_part[3..5].parse()?;
    let second: f64 = time_part[6..].parse()?;

    let days = days_from_civil(year, month, day);
    let seconds_of_day = (hour * 3600 + minute * 60) as f64 + second;
    Ok(days as f64 * 86400.0 + seconds_of_day)
}

fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as i64;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::{Dialect, FieldType, TableSchema};

    fn test_config() -> Config {
        Config {
            dialect: Dialect::Postgresql,
            tables: [(
                "users".to_string(),
                TableSchema::new([
                    Field { name: "id".into(), type_: FieldType::Uuid, nullable: false, default: None },
                    Field { name: "name".into(), type_: FieldType::String, nullable: false, default: None },
                    Field { name: "age".into(), type_: FieldType::Number, nullable: false, default: None },
                    Field { name: "active".into(), type_: FieldType::Boolean, nullable: false, default: None },
                ]),
            )]
            .into_iter()
            .collect(),
            variables: Default::default(),
            relationships: Vec::new(),
            data_table: None,
        }
    }

    #[test]
    fn update_gate_passes_with_residual() {
        let cfg = test_config();
        let query = serde_json::json!({
            "table": "users",
            "updates": {"name": "John", "age": 25},
            "condition": {
                "$and": [
                    {"NEW_ROW.age": {"$ge": 18}},
                    {"active": true}
                ]
            }
        });
        let sql = compile_update(&query, &cfg).unwrap();
        assert_eq!(sql, "UPDATE users SET \"name\" = 'John', \"age\" = 25 WHERE users.active = TRUE");
    }

    #[test]
    fn update_gate_fails() {
        let cfg = test_config();
        let query = serde_json::json!({
            "table": "users",
            "updates": {"name": "John", "age": 15},
            "condition": {
                "$and": [
                    {"NEW_ROW.age": {"$ge": 18}},
                    {"active": true}
                ]
            }
        });
        let err = compile_update(&query, &cfg).unwrap_err();
        assert_eq!(err.to_string(), "Update condition not met.");
    }

    #[test]
    fn insert_fills_defaults_and_auto_converts_uuid() {
        let mut cfg = test_config();
        cfg.tables.get_mut("users").unwrap().fields.get_mut("active").unwrap().default =
            Some(serde_json::json!(true));
        let query = serde_json::json!({
            "table": "users",
            "newRow": {
                "id": "6ba7b810-9dad-11d1-80b4-00c04fd430c8",
                "name": "Ada",
                "age": 30
            }
        });
        let sql = compile_insert(&query, &cfg).unwrap();
        assert!(sql.starts_with("INSERT INTO users ("));
        assert!(sql.contains("'6ba7b810-9dad-11d1-80b4-00c04fd430c8'::UUID"));
        assert!(sql.contains("\"active\""));
    }

    #[test]
    fn regex_gate_evaluates_during_partial_eval() {
        let cfg = test_config();
        let query = serde_json::json!({
            "table": "users",
            "updates": {"name": "Ada Lovelace", "age": 25},
            "condition": {"NEW_ROW.name": {"$regex": "^Ada"}}
        });
        let sql = compile_update(&query, &cfg).unwrap();
        assert_eq!(sql, "UPDATE users SET \"name\" = 'Ada Lovelace', \"age\" = 25");
    }

    #[test]
    fn regex_gate_fails_when_no_match() {
        let cfg = test_config();
        let query = serde_json::json!({
            "table": "users",
            "updates": {"name": "Bob", "age": 25},
            "condition": {"NEW_ROW.name": {"$regex": "^Ada"}}
        });
        let err = compile_update(&query, &cfg).unwrap_err();
        assert_eq!(err.to_string(), "Update condition not met.");
    }

    #[test]
    fn delete_with_in_predicate() {
        let mut cfg = test_config();
        cfg.dialect = Dialect::SqliteExtensions;
        cfg.tables.insert(
            "posts".to_string(),
            TableSchema::new([Field {
                name: "user_id".into(),
                type_: FieldType::Uuid,
                nullable: false,
                default: None,
            }]),
        );
        let query = serde_json::json!({
            "table": "posts",
            "condition": {
                "user_id": {"$in": ["6ba7b815-9dad-11d1-80b4-00c04fd430c8", "6ba7b816-9dad-11d1-80b4-00c04fd430c8"]}
            }
        });
        let sql = compile_delete(&query, &cfg).unwrap();
        assert_eq!(
            sql,
            "DELETE FROM posts WHERE CAST(posts.user_id AS TEXT) IN ('6ba7b815-9dad-11d1-80b4-00c04fd430c8', '6ba7b816-9dad-11d1-80b4-00c04fd430c8')"
        );
    }
}
