//! The expression compiler (spec §4.D): parses the tagged-object expression grammar out of
//! `serde_json::Value` and compiles it to `(sql, ExpressionType)`. Node identity never comes
//! up — every compile step returns its own type alongside its SQL, instead of consulting a
//! side table keyed by AST node (spec §9 Design Notes).
//!
//! Grounded on `datastore/query/expr.rs`'s tagged-object walk, generalized from a single
//! discriminant field to "whichever recognized key is present", since the wire shape here
//! has no shared tag field across variants.

use anyhow::{bail, Context, Result};
use serde_json::Value as JsonValue;

use crate::condition::Condition;
use crate::ctx::Ctx;
use crate::field_path::FieldPath;
use crate::functions;
use crate::lexical;
use crate::literal::{self, Literal};
use crate::types::ExpressionType;

#[derive(Debug, Clone)]
pub enum Expression {
    Literal(Literal),
    Field(String),
    Var(String),
    Uuid(String),
    Date(String),
    Timestamp(String),
    Jsonb(JsonValue),
    Cond {
        if_: Box<Condition>,
        then: Box<Expression>,
        else_: Box<Expression>,
    },
    Func {
        name: String,
        args: Vec<Expression>,
    },
}

impl Expression {
    pub fn parse(value: &JsonValue) -> Result<Expression> {
        match value {
            JsonValue::Null => Ok(Expression::Literal(Literal::Null)),
            JsonValue::Bool(b) => Ok(Expression::Literal(Literal::Boolean(*b))),
            JsonValue::Number(n) => {
                let f = n
                    .as_f64()
                    .ok_or_else(|| anyhow::anyhow!("number literal is out of range"))?;
                Ok(Expression::Literal(Literal::Number(f)))
            }
            JsonValue::String(s) => Ok(Expression::Literal(Literal::String(s.clone()))),
            JsonValue::Array(_) => bail!("an expression cannot be a bare array"),
            JsonValue::Object(map) => parse_object(map),
        }
    }

    /// Compiles this expression, returning its SQL fragment together with its inferred type.
    pub fn compile(&self, ctx: &Ctx) -> Result<(String, ExpressionType)> {
        match self {
            Expression::Literal(lit) => Ok((lit.to_sql()?, lit.inferred_type())),
            Expression::Field(path) => {
                let field_path = FieldPath::resolve(path, ctx)?;
                let sql = crate::data_table::rewrite_field_access(ctx, &field_path);
                Ok((sql, field_path.inferred_type()))
            }
            Expression::Var(name) => {
                let value = ctx
                    .config
                    .variable(name)
                    .ok_or_else(|| anyhow::anyhow!("Variable '{name}' is not allowed or does not exist"))?;
                let lit = Literal::from_schema_value(value);
                Ok((lit.to_sql()?, lit.inferred_type()))
            }
            Expression::Uuid(s) => {
                literal::validate_uuid(s)?;
                Ok((literal::uuid_literal_sql(s, ctx.config.dialect), ExpressionType::Uuid))
            }
            Expression::Date(s) => {
                literal::validate_date(s)?;
                Ok((literal::date_literal_sql(s, ctx.config.dialect), ExpressionType::Date))
            }
            Expression::Timestamp(s) => {
                let normalized = literal::validate_timestamp(s)?;
                Ok((
                    literal::timestamp_literal_sql(&normalized, ctx.config.dialect),
                    ExpressionType::Timestamp,
                ))
            }
            Expression::Jsonb(value) => {
                let encoded = serde_json::to_string(value).context("failed to encode $jsonb payload")?;
                Ok((format!("{}::JSONB", lexical::escape_string(&encoded)), ExpressionType::Json))
            }
            Expression::Cond { if_, then, else_ } => {
                let cond_sql = if_.compile(ctx)?;
                let (then_sql, then_ty) = then.compile(ctx)?;
                let (else_sql, else_ty) = else_.compile(ctx)?;
                let result_ty = then_ty.unify(else_ty);
                Ok((
                    format!("(CASE WHEN {cond_sql} THEN {then_sql} ELSE {else_sql} END)"),
                    result_ty,
                ))
            }
            Expression::Func { name, args } => {
                let compiled_args = args
                    .iter()
                    .map(|arg| arg.compile(ctx))
                    .collect::<Result<Vec<_>>>()?;
                if name == "DIVIDE" {
                    check_no_literal_zero_divisor(args)?;
                }
                functions::compile_scalar(name, &compiled_args)
            }
        }
    }
}

/// `DIVIDE(x, 0)` is rejected at compile time when the divisor is a literal zero; a
/// non-literal divisor (a field, a variable, a nested expression) is allowed through since
/// its value is unknown until execution.
fn check_no_literal_zero_divisor(args: &[Expression]) -> Result<()> {
    if let Some(Expression::Literal(Literal::Number(n))) = args.get(1) {
        if *n == 0.0 {
            bail!("Division by zero is not allowed");
        }
    }
    Ok(())
}

fn parse_object(map: &serde_json::Map<String, JsonValue>) -> Result<Expression> {
    if let Some(v) = map.get("$field") {
        return Ok(Expression::Field(expect_str(v, "$field")?));
    }
    if let Some(v) = map.get("$var") {
        return Ok(Expression::Var(expect_str(v, "$var")?));
    }
    if let Some(v) = map.get("$uuid") {
        return Ok(Expression::Uuid(expect_str(v, "$uuid")?));
    }
    if let Some(v) = map.get("$date") {
        return Ok(Expression::Date(expect_str(v, "$date")?));
    }
    if let Some(v) = map.get("$timestamp") {
        return Ok(Expression::Timestamp(expect_str(v, "$timestamp")?));
    }
    if let Some(v) = map.get("$jsonb") {
        return Ok(Expression::Jsonb(v.clone()));
    }
    if let Some(v) = map.get("$cond") {
        let obj = v
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("$cond requires an object with if/then/else"))?;
        let if_ = obj
            .get("if")
            .ok_or_else(|| anyhow::anyhow!("$cond is missing 'if'"))?;
        let then = obj
            .get("then")
            .ok_or_else(|| anyhow::anyhow!("$cond is missing 'then'"))?;
        let else_ = obj
            .get("else")
            .ok_or_else(|| anyhow::anyhow!("$cond is missing 'else'"))?;
        return Ok(Expression::Cond {
            if_: Box::new(Condition::parse(if_)?),
            then: Box::new(Expression::parse(then)?),
            else_: Box::new(Expression::parse(else_)?),
        });
    }
    if let Some(v) = map.get("$func") {
        let obj = v
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("$func requires an object with exactly one function name"))?;
        if obj.len() != 1 {
            bail!("$expr must contain exactly one function");
        }
        let (name, args_value) = obj.iter().next().unwrap();
        let args_array = args_value
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("$func arguments for '{name}' must be an array"))?;
        let args = args_array
            .iter()
            .map(Expression::parse)
            .collect::<Result<Vec<_>>>()?;
        return Ok(Expression::Func { name: name.clone(), args });
    }
    bail!("unrecognized expression object: expected one of $field, $var, $uuid, $date, $timestamp, $jsonb, $cond, $func")
}

fn expect_str(value: &JsonValue, tag: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("{tag} requires a string value"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::{Config, Dialect, Field, FieldType, TableSchema, Value};

    fn test_config() -> Config {
        Config {
            dialect: Dialect::Postgresql,
            tables: [(
                "users".to_string(),
                TableSchema::new([
                    Field { name: "id".into(), type_: FieldType::Uuid, nullable: false, default: None },
                    Field { name: "age".into(), type_: FieldType::Number, nullable: true, default: None },
                ]),
            )]
            .into_iter()
            .collect(),
            variables: [("current_year".to_string(), Value::Number(serde_json::Number::from(2024)))]
                .into_iter()
                .collect(),
            relationships: Vec::new(),
            data_table: None,
        }
    }

    #[test]
    fn compiles_string_literal() {
        let cfg = test_config();
        let ctx = Ctx::new(&cfg);
        let expr = Expression::parse(&serde_json::json!("hi")).unwrap();
        let (sql, ty) = expr.compile(&ctx).unwrap();
        assert_eq!(sql, "'hi'");
        assert_eq!(ty, ExpressionType::Text);
    }

    #[test]
    fn compiles_field_reference() {
        let cfg = test_config();
        let ctx = Ctx::new(&cfg);
        let expr = Expression::parse(&serde_json::json!({"$field": "users.age"})).unwrap();
        let (sql, ty) = expr.compile(&ctx).unwrap();
        assert_eq!(sql, "users.age");
        assert_eq!(ty, ExpressionType::Number);
    }

    #[test]
    fn compiles_var_reference() {
        let cfg = test_config();
        let ctx = Ctx::new(&cfg);
        let expr = Expression::parse(&serde_json::json!({"$var": "current_year"})).unwrap();
        let (sql, ty) = expr.compile(&ctx).unwrap();
        assert_eq!(sql, "2024");
        assert_eq!(ty, ExpressionType::Number);
    }

    #[test]
    fn unknown_var_fails() {
        let cfg = test_config();
        let ctx = Ctx::new(&cfg);
        let expr = Expression::parse(&serde_json::json!({"$var": "nope"})).unwrap();
        assert!(expr.compile(&ctx).is_err());
    }

    #[test]
    fn compiles_func_call() {
        let cfg = test_config();
        let ctx = Ctx::new(&cfg);
        let expr = Expression::parse(&serde_json::json!({"$func": {"ADD": [1, 2]}})).unwrap();
        let (sql, ty) = expr.compile(&ctx).unwrap();
        assert_eq!(sql, "(1 + 2)");
        assert_eq!(ty, ExpressionType::Number);
    }

    #[test]
    fn rejects_literal_zero_divisor() {
        let cfg = test_config();
        let ctx = Ctx::new(&cfg);
        let expr = Expression::parse(&serde_json::json!({"$func": {"DIVIDE": [1, 0]}})).unwrap();
        assert!(expr.compile(&ctx).is_err());
    }

    #[test]
    fn compiles_cond() {
        let cfg = test_config();
        let ctx = Ctx::new(&cfg);
        let expr = Expression::parse(&serde_json::json!({
            "$cond": {
                "if": {"users.age": {"$gt": 18}},
                "then": "adult",
                "else": "minor"
            }
        }))
        .unwrap();
        let (sql, ty) = expr.compile(&ctx).unwrap();
        assert!(sql.starts_with("(CASE WHEN"));
        assert_eq!(ty, ExpressionType::Text);
    }

    #[test]
    fn rejects_unknown_tag() {
        let err = Expression::parse(&serde_json::json!({"$bogus": "x"})).unwrap_err();
        assert!(err.to_string().contains("unrecognized expression object"));
    }
}
