//! The aggregate planner (spec §4.G): groups and aggregated expressions over a single table,
//! dispatching each aggregated field through the aggregation registry in [`crate::functions`].
//!
//! Grounded on `datastore/query/aggregate.rs`'s group-by/aggregate split.

use anyhow::{bail, Result};
use schema::Config;
use serde_json::Value as JsonValue;

use crate::ctx::Ctx;
use crate::data_table;
use crate::field_path::FieldPath;
use crate::functions;
use crate::lexical;

pub fn compile(query: &JsonValue, config: &Config) -> Result<String> {
    let obj = query
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("aggregation query must be an object"))?;
    let table = obj
        .get("table")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| anyhow::anyhow!("aggregation query is missing 'table'"))?;
    let group_by = obj
        .get("groupBy")
        .and_then(JsonValue::as_array)
        .cloned()
        .unwrap_or_default();
    let aggregated_fields = obj
        .get("aggregatedFields")
        .and_then(JsonValue::as_object)
        .cloned()
        .unwrap_or_default();

    if group_by.is_empty() && aggregated_fields.is_empty() {
        bail!("Aggregation query must have at least one group by field or aggregated field");
    }

    let ctx = Ctx::new(config);
    ctx.require_table(table)?;

    let mut group_by_fields = Vec::with_capacity(group_by.len());
    for entry in &group_by {
        let path = entry
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("'groupBy' entries must be field-path strings"))?;
        let field_path = FieldPath::resolve(path, &ctx)?;
        group_by_fields.push(data_table::rewrite_field_access(&ctx, &field_path));
    }

    let mut projections: Vec<String> = group_by_fields
        .iter()
        .zip(&group_by)
        .map(|(sql, path)| format!("{sql} AS {}", lexical::double_quote(path.as_str().unwrap())))
        .collect();

    for (alias, spec) in &aggregated_fields {
        let spec_obj = spec
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("aggregated field '{alias}' must be an object"))?;
        let function_name = spec_obj
            .get("function")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| anyhow::anyhow!("aggregated field '{alias}' is missing 'function'"))?;
        let field = spec_obj.get("field").and_then(JsonValue::as_str);

        let aggregate = functions::lookup_aggregate(function_name)?;
        let expr_sql = match field {
            Some("*") if aggregate.allows_wildcard => "*".to_string(),
            Some("*") => bail!("'*' is only allowed as the argument to COUNT"),
            Some(path) => {
                let field_path = FieldPath::resolve(path, &ctx)?;
                data_table::rewrite_field_access(&ctx, &field_path)
            }
            None if aggregate.allows_wildcard => "*".to_string(),
            None => bail!("aggregated field '{alias}' is missing 'field'"),
        };

        let sql = (aggregate.emit)(&expr_sql, &[], config.dialect);
        projections.push(format!("{sql} AS {}", lexical::double_quote(alias)));
    }

    let mut sql = format!(
        "SELECT {} FROM {}",
        projections.join(", "),
        data_table::table_source(&ctx, table)
    );

    let where_parts = data_table::scoping_predicates(&ctx, table);
    if !where_parts.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_parts.join(" AND "));
    }

    if !group_by_fields.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&group_by_fields.join(", "));
    }

    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::{Dialect, Field, FieldType, TableSchema};

    fn test_config() -> Config {
        Config {
            dialect: Dialect::Postgresql,
            tables: [(
                "orders".to_string(),
                TableSchema::new([
                    Field { name: "customer_id".into(), type_: FieldType::Uuid, nullable: false, default: None },
                    Field { name: "total".into(), type_: FieldType::Number, nullable: false, default: None },
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
    fn group_by_with_sum() {
        let cfg = test_config();
        let query = serde_json::json!({
            "table": "orders",
            "groupBy": ["orders.customer_id"],
            "aggregatedFields": {"total_spent": {"function": "SUM", "field": "orders.total"}}
        });
        let sql = compile(&query, &cfg).unwrap();
        assert_eq!(
            sql,
            "SELECT orders.customer_id AS \"orders.customer_id\", SUM(orders.total) AS \"total_spent\" FROM orders GROUP BY orders.customer_id"
        );
    }

    #[test]
    fn count_wildcard_without_group_by() {
        let cfg = test_config();
        let query = serde_json::json!({
            "table": "orders",
            "aggregatedFields": {"count": {"function": "COUNT", "field": "*"}}
        });
        let sql = compile(&query, &cfg).unwrap();
        assert_eq!(sql, "SELECT COUNT(*) AS \"count\" FROM orders");
    }

    #[test]
    fn wildcard_rejected_for_non_count() {
        let cfg = test_config();
        let query = serde_json::json!({
            "table": "orders",
            "aggregatedFields": {"s": {"function": "SUM", "field": "*"}}
        });
        assert!(compile(&query, &cfg).is_err());
    }

    #[test]
    fn empty_aggregation_fails() {
        let cfg = test_config();
        let query = serde_json::json!({"table": "orders"});
        let err = compile(&query, &cfg).unwrap_err();
        assert_eq!(err.to_string(), "Aggregation query must have at least one group by field or aggregated field");
    }
}
