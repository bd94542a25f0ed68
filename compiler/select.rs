//! The select planner (spec §4.F): walks a nested selection object depth-first, discovering
//! joins through declared relationships, and assembles the final `SELECT` in the fixed
//! clause order (spec invariant 2).
//!
//! Grounded on `datastore/query/select.rs`'s recursive selection walk and its `LEFT JOIN`
//! deduplication by join-text.

use std::collections::HashSet;

use anyhow::{bail, Result};
use schema::Config;
use serde_json::Value as JsonValue;

use crate::condition::Condition;
use crate::ctx::Ctx;
use crate::data_table;
use crate::expr::Expression;
use crate::field_path::FieldPath;
use crate::lexical;

pub fn compile(query: &JsonValue, config: &Config) -> Result<String> {
    let obj = query
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("select query must be an object"))?;
    let root_table = obj
        .get("rootTable")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| anyhow::anyhow!("select query is missing 'rootTable'"))?;
    let selection = obj
        .get("selection")
        .and_then(JsonValue::as_object)
        .ok_or_else(|| anyhow::anyhow!("select query is missing 'selection'"))?;

    let ctx = Ctx::with_default_table(config, root_table);
    ctx.require_table(root_table)?;

    let mut projections = Vec::new();
    let mut joins = Vec::new();
    let mut join_set = HashSet::new();
    walk_selection(&ctx, root_table, "", selection, &mut projections, &mut joins, &mut join_set)?;
    if projections.is_empty() {
        bail!("Selection cannot be empty");
    }

    let mut where_parts = Vec::new();
    if let Some(condition_value) = obj.get("condition") {
        where_parts.push(Condition::parse(condition_value)?.compile(&ctx)?);
    }
    where_parts.extend(data_table::scoping_predicates(&ctx, root_table));

    let mut sql = format!(
        "SELECT {} FROM {}",
        projections.join(", "),
        data_table::table_source(&ctx, root_table)
    );
    for join in &joins {
        sql.push(' ');
        sql.push_str(join);
    }
    if !where_parts.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_parts.join(" AND "));
    }

    if let Some(order_by) = obj.get("orderBy") {
        let entries = render_order_by(&ctx, order_by)?;
        if !entries.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&entries.join(", "));
        }
    }

    if let Some(pagination) = obj.get("pagination") {
        sql.push_str(&render_pagination(&ctx, pagination)?);
    }

    Ok(sql)
}

fn walk_selection(
    ctx: &Ctx,
    current_table: &str,
    prefix: &str,
    selection: &serde_json::Map<String, JsonValue>,
    projections: &mut Vec<String>,
    joins: &mut Vec<String>,
    join_set: &mut HashSet<String>,
) -> Result<()> {
    for (key, value) in selection {
        let direct_path = format!("{current_table}.{key}");
        if let Ok(field_path) = FieldPath::resolve(&direct_path, ctx) {
            let sql = data_table::rewrite_field_access(ctx, &field_path);
            let alias = prefixed_alias(prefix, key);
            projections.push(format!("{sql} AS {}", lexical::double_quote(&alias)));
            continue;
        }
        if let Ok(expr) = Expression::parse(value) {
            let (sql, _ty) = expr.compile(ctx)?;
            let alias = prefixed_alias(prefix, key);
            projections.push(format!("{sql} AS {}", lexical::double_quote(&alias)));
            continue;
        }

        let (local_field, remote_field) = ctx
            .config
            .relationships_between(current_table, key)
            .next()
            .ok_or_else(|| anyhow::anyhow!("No relationship found"))?;

        let join_key = format!("{current_table}.{local_field}={key}.{remote_field}");
        if join_set.insert(join_key) {
            let mut on_parts = vec![format!("{current_table}.{local_field} = {key}.{remote_field}")];
            on_parts.extend(data_table::scoping_predicates(ctx, key));
            joins.push(format!(
                "LEFT JOIN {} ON {}",
                data_table::table_source(ctx, key),
                on_parts.join(" AND ")
            ));
        }

        let nested = value
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("selection entry for related table '{key}' must itself be a selection"))?;
        let new_prefix = prefixed_alias(prefix, key);
        walk_selection(ctx, key, &new_prefix, nested, projections, joins, join_set)?;
    }
    Ok(())
}

fn prefixed_alias(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn render_order_by(ctx: &Ctx, order_by: &JsonValue) -> Result<Vec<String>> {
    let array = match order_by.as_array() {
        Some(a) => a,
        None => bail!("'orderBy' must be an array"),
    };
    let mut entries = Vec::with_capacity(array.len());
    for entry in array {
        let entry_obj = entry
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("orderBy entry must be an object"))?;
        let field = entry_obj
            .get("field")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| anyhow::anyhow!("orderBy entry is missing 'field'"))?;
        let direction = entry_obj
            .get("direction")
            .and_then(JsonValue::as_str)
            .unwrap_or("ASC")
            .to_uppercase();
        if direction != "ASC" && direction != "DESC" {
            bail!("orderBy direction must be 'ASC' or 'DESC'");
        }
        let field_path = FieldPath::resolve(field, ctx)?;
        let sql = data_table::rewrite_field_access(ctx, &field_path);
        entries.push(format!("{sql} {direction}"));
    }
    Ok(entries)
}

fn render_pagination(ctx: &Ctx, pagination: &JsonValue) -> Result<String> {
    let obj = pagination
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("'pagination' must be an object"))?;
    let limit = obj.get("limit").and_then(JsonValue::as_i64);
    let offset = obj.get("offset").and_then(JsonValue::as_i64);
    Ok(match (limit, offset) {
        (Some(l), Some(o)) => format!(" LIMIT {l} OFFSET {o}"),
        (Some(l), None) => format!(" LIMIT {l}"),
        (None, Some(o)) if ctx.config.dialect.is_sqlite() => format!(" LIMIT -1 OFFSET {o}"),
        (None, Some(o)) => format!(" OFFSET {o}"),
        (None, None) => String::new(),
    })
}
