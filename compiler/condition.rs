//! The condition compiler (spec §4.E): parses and compiles boolean condition trees to a
//! plain SQL boolean fragment (no type is recorded — a condition is always `BOOLEAN`).
//!
//! Grounded on `datastore/query/filter.rs`'s per-field predicate walk, generalized to the
//! explicit `$and`/`$or`/`$not`/`$exists` tags this grammar uses in place of the teacher's
//! flat operator list.

use anyhow::{bail, Result};
use serde_json::Value as JsonValue;

use crate::ctx::Ctx;
use crate::expr::Expression;
use crate::field_path::FieldPath;
use crate::lexical;
use crate::literal::Literal;
use crate::types::ExpressionType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Nin,
    Like,
    Regex,
}

#[derive(Debug, Clone)]
pub enum Condition {
    BoolLiteral(bool),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Exists {
        table: String,
        condition: Box<Condition>,
    },
    /// An implicit conjunction over an object's own keys: each is either a per-field
    /// predicate or a recursive logical key, already split apart at parse time.
    Conjunction(Vec<Condition>),
    FieldPredicate {
        path: String,
        comparisons: Vec<(CmpOp, FieldRhs)>,
    },
}

/// The right-hand side of a field predicate: either a single expression (`$eq`, `$lt`, ...)
/// or an array of expressions (`$in`/`$nin`).
#[derive(Debug, Clone)]
pub enum FieldRhs {
    Single(Expression),
    Many(Vec<Expression>),
}

impl Condition {
    pub fn parse(value: &JsonValue) -> Result<Condition> {
        match value {
            JsonValue::Bool(b) => Ok(Condition::BoolLiteral(*b)),
            JsonValue::Object(map) => parse_object(map),
            _ => bail!("a condition must be a boolean literal or an object"),
        }
    }

    pub fn compile(&self, ctx: &Ctx) -> Result<String> {
        match self {
            Condition::BoolLiteral(b) => Ok(lexical::format_bool(*b).to_string()),
            Condition::And(parts) => compile_logical(parts, ctx, "AND", "$and"),
            Condition::Or(parts) => compile_logical(parts, ctx, "OR", "$or"),
            Condition::Not(inner) => Ok(format!("NOT ({})", inner.compile(ctx)?)),
            Condition::Exists { table, condition } => {
                let nested = condition.compile(ctx)?;
                Ok(format!("EXISTS (SELECT 1 FROM {table} WHERE {nested})"))
            }
            Condition::Conjunction(parts) => {
                let compiled = parts
                    .iter()
                    .map(|p| p.compile(ctx))
                    .collect::<Result<Vec<_>>>()?;
                Ok(join_parenthesized(&compiled, "AND"))
            }
            Condition::FieldPredicate { path, comparisons } => {
                let field_path = FieldPath::resolve(path, ctx)?;
                let field_sql = crate::data_table::rewrite_field_access(ctx, &field_path);
                let field_type = field_path.inferred_type();
                let parts = comparisons
                    .iter()
                    .map(|(op, rhs)| compile_comparison(ctx, &field_sql, field_type, *op, rhs))
                    .collect::<Result<Vec<_>>>()?;
                Ok(join_parenthesized(&parts, "AND"))
            }
        }
    }
}

fn join_parenthesized(parts: &[String], joiner: &str) -> String {
    if parts.len() == 1 {
        parts[0].clone()
    } else {
        format!("({})", parts.join(&format!(" {joiner} ")))
    }
}

fn compile_logical(parts: &[Condition], ctx: &Ctx, joiner: &str, tag: &str) -> Result<String> {
    if parts.is_empty() {
        bail!("No conditions provided for {tag} condition");
    }
    let compiled = parts
        .iter()
        .map(|p| p.compile(ctx))
        .collect::<Result<Vec<_>>>()?;
    Ok(join_parenthesized(&compiled, joiner))
}

/// Decides whether the field side needs a cast before comparing against `rhs_type`, per the
/// two documented cast rules (spec §4.B, §4.D, §9 Open Question resolution):
/// JSON-extracted text compared against a typed literal casts to that literal's type;
/// a UUID field compared against a plain string literal casts to `::TEXT`.
fn cast_field_for_comparison(
    field_sql: &str,
    field_type: ExpressionType,
    rhs_type: ExpressionType,
    rhs_is_uuid_tagged: bool,
    dialect: schema::Dialect,
) -> String {
    if field_type == ExpressionType::Text
        && matches!(rhs_type, ExpressionType::Boolean | ExpressionType::Number)
    {
        return crate::types::cast(field_sql, rhs_type, dialect);
    }
    if field_type == ExpressionType::Uuid && rhs_type == ExpressionType::Text && !rhs_is_uuid_tagged {
        return crate::types::cast(field_sql, ExpressionType::Text, dialect);
    }
    field_sql.to_string()
}

fn compile_comparison(
    ctx: &Ctx,
    field_sql: &str,
    field_type: ExpressionType,
    op: CmpOp,
    rhs: &FieldRhs,
) -> Result<String> {
    match (op, rhs) {
        (CmpOp::In | CmpOp::Nin, FieldRhs::Many(items)) => {
            if items.is_empty() {
                bail!("Operator 'IN' requires a non-empty array");
            }
            let compiled = items
                .iter()
                .map(|e| e.compile(ctx))
                .collect::<Result<Vec<_>>>()?;
            check_homogeneous(&compiled)?;
            let list = compiled
                .iter()
                .map(|(sql, _)| sql.clone())
                .collect::<Vec<_>>()
                .join(", ");
            let casted_field = cast_field_for_comparison(
                field_sql,
                field_type,
                compiled[0].1,
                is_uuid_tagged(&items[0]),
                ctx.config.dialect,
            );
            let keyword = if op == CmpOp::In { "IN" } else { "NOT IN" };
            Ok(format!("{casted_field} {keyword} ({list})"))
        }
        (CmpOp::In | CmpOp::Nin, FieldRhs::Single(_)) => {
            bail!("Operator 'IN' requires a non-empty array")
        }
        (_, FieldRhs::Single(expr)) => {
            let (rhs_sql, rhs_type) = expr.compile(ctx)?;
            let casted_field =
                cast_field_for_comparison(field_sql, field_type, rhs_type, is_uuid_tagged(expr), ctx.config.dialect);
            let is_null_literal = matches!(expr, Expression::Literal(Literal::Null));
            Ok(match op {
                CmpOp::Eq if is_null_literal => format!("{casted_field} IS NULL"),
                CmpOp::Ne if is_null_literal => format!("{casted_field} IS NOT NULL"),
                CmpOp::Eq => format!("{casted_field} = {rhs_sql}"),
                CmpOp::Ne => format!("{casted_field} != {rhs_sql}"),
                CmpOp::Lt => format!("{casted_field} < {rhs_sql}"),
                CmpOp::Le => format!("{casted_field} <= {rhs_sql}"),
                CmpOp::Gt => format!("{casted_field} > {rhs_sql}"),
                CmpOp::Ge => format!("{casted_field} >= {rhs_sql}"),
                CmpOp::Like => format!("{casted_field} LIKE {rhs_sql}"),
                CmpOp::Regex => format!("{casted_field} ~ {rhs_sql}"),
                CmpOp::In | CmpOp::Nin => unreachable!("handled above"),
            })
        }
        (_, FieldRhs::Many(_)) => bail!("operator does not accept an array right-hand side"),
    }
}

fn is_uuid_tagged(expr: &Expression) -> bool {
    matches!(expr, Expression::Uuid(_))
}

fn check_homogeneous(compiled: &[(String, ExpressionType)]) -> Result<()> {
    let first_non_any = compiled
        .iter()
        .map(|(_, ty)| *ty)
        .find(|ty| *ty != ExpressionType::Any);
    if let Some(expected) = first_non_any {
        if compiled
            .iter()
            .any(|(_, ty)| *ty != ExpressionType::Any && *ty != expected)
        {
            bail!("'$in'/'$nin' array elements must be of a single, homogeneous type");
        }
    }
    Ok(())
}

fn parse_object(map: &serde_json::Map<String, JsonValue>) -> Result<Condition> {
    if let Some(v) = map.get("$and") {
        return Ok(Condition::And(parse_condition_array(v, "$and")?));
    }
    if let Some(v) = map.get("$or") {
        return Ok(Condition::Or(parse_condition_array(v, "$or")?));
    }
    if let Some(v) = map.get("$not") {
        return Ok(Condition::Not(Box::new(Condition::parse(v)?)));
    }
    if let Some(v) = map.get("$exists") {
        let obj = v
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("$exists requires an object with table/condition"))?;
        let table = obj
            .get("table")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| anyhow::anyhow!("$exists is missing 'table'"))?
            .to_string();
        let condition = obj
            .get("condition")
            .ok_or_else(|| anyhow::anyhow!("$exists is missing 'condition'"))?;
        return Ok(Condition::Exists {
            table,
            condition: Box::new(Condition::parse(condition)?),
        });
    }

    let mut parts = Vec::with_capacity(map.len());
    for (key, value) in map {
        if key == "$and" || key == "$or" || key == "$not" || key == "$exists" {
            parts.push(Condition::parse(&JsonValue::Object(
                [(key.clone(), value.clone())].into_iter().collect(),
            ))?);
            continue;
        }
        parts.push(parse_field_predicate(key, value)?);
    }
    Ok(Condition::Conjunction(parts))
}

fn parse_condition_array(value: &JsonValue, tag: &str) -> Result<Vec<Condition>> {
    let array = value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("{tag} requires an array of conditions"))?;
    array.iter().map(Condition::parse).collect()
}

fn parse_field_predicate(path: &str, value: &JsonValue) -> Result<Condition> {
    let comparisons = match value {
        JsonValue::Object(ops) if has_operator_keys(ops) => ops
            .iter()
            .map(|(op_name, rhs)| parse_operator(op_name, rhs))
            .collect::<Result<Vec<_>>>()?,
        other => vec![(CmpOp::Eq, FieldRhs::Single(Expression::parse(other)?))],
    };
    Ok(Condition::FieldPredicate { path: path.to_string(), comparisons })
}

/// An object counts as an operator map (`{$eq: ...}`) rather than a literal value site
/// (e.g. a `$field`/`$var`/`$jsonb` expression tag) only when every key is a recognized
/// comparison operator.
fn has_operator_keys(ops: &serde_json::Map<String, JsonValue>) -> bool {
    !ops.is_empty()
        && ops.keys().all(|k| {
            matches!(
                k.as_str(),
                "$eq" | "$ne" | "$lt" | "$le" | "$gt" | "$ge" | "$in" | "$nin" | "$like" | "$regex"
            )
        })
}

fn parse_operator(op_name: &str, rhs: &JsonValue) -> Result<(CmpOp, FieldRhs)> {
    let op = match op_name {
        "$eq" => CmpOp::Eq,
        "$ne" => CmpOp::Ne,
        "$lt" => CmpOp::Lt,
        "$le" => CmpOp::Le,
        "$gt" => CmpOp::Gt,
        "$ge" => CmpOp::Ge,
        "$in" => CmpOp::In,
        "$nin" => CmpOp::Nin,
        "$like" => CmpOp::Like,
        "$regex" => CmpOp::Regex,
        other => bail!("Unknown function or operator '{other}'"),
    };
    let rhs = if matches!(op, CmpOp::In | CmpOp::Nin) {
        let array = rhs
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Operator 'IN' requires a non-empty array"))?;
        FieldRhs::Many(array.iter().map(Expression::parse).collect::<Result<Vec<_>>>()?)
    } else {
        FieldRhs::Single(Expression::parse(rhs)?)
    };
    Ok((op, rhs))
}
