//! Field-path resolution (spec §4.C): parses `table.field`, `table.field->seg`, and
//! `table.field->'seg'` strings into a [`FieldPath`] bound to the schema, and renders the
//! resolved path back into a SQL fragment (plain column reference or JSON-arrow chain).

use anyhow::{bail, Result};
use schema::{Field, FieldType};

use crate::ctx::Ctx;
use crate::lexical;
use crate::types::ExpressionType;

#[derive(Debug, Clone)]
pub struct FieldPath {
    pub table: String,
    pub field: String,
    pub json_access: Vec<String>,
    pub field_config: Field,
}

impl FieldPath {
    /// Parses and resolves `path` (e.g. `"users.metadata->department"`) against `ctx`. A bare
    /// path with no `.` (e.g. `"name"`) is shorthand for a field on `ctx`'s default table
    /// (spec §4.C field-shorthand form); it is an error if `ctx` has no default table.
    pub fn resolve(path: &str, ctx: &Ctx) -> Result<FieldPath> {
        let (table, tail) = match path.split_once('.') {
            Some(parts) => parts,
            None => {
                let default = ctx.default_table().ok_or_else(|| {
                    anyhow::anyhow!("'{path}' is not a valid field path: expected 'table.field'")
                })?;
                (default, path)
            }
        };
        if table.is_empty() {
            bail!("'{path}' is not a valid field path: missing table name");
        }

        let mut segments = tail.split("->");
        let field = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("'{path}' is not a valid field path: missing field name"))?;
        let json_access: Vec<String> = segments
            .map(unwrap_quotes)
            .collect::<Result<Vec<_>>>()?;

        if table != "NEW_ROW" {
            lexical::check_identifier(table)?;
        }
        lexical::check_identifier(field)?;

        let table_schema = ctx.resolve_table(table)?;
        let field_config = table_schema
            .field(field)
            .ok_or_else(|| anyhow::anyhow!("Field '{field}' is not allowed or does not exist in '{table}'"))?
            .clone();

        if !json_access.is_empty() && field_config.type_ != FieldType::Object {
            let seg = &json_access[0];
            bail!("JSON path access '{seg}' is only allowed on JSON fields");
        }

        Ok(FieldPath {
            table: table.to_string(),
            field: field.to_string(),
            json_access,
            field_config,
        })
    }

    pub fn is_json_access(&self) -> bool {
        !self.json_access.is_empty()
    }

    /// The `ExpressionType` of this path when read as a value: `JSON` for an untouched
    /// object field, `TEXT` once JSON-path segments have been applied (the final arrow is
    /// always a text-extract, per spec §4.C), otherwise the field's own declared type.
    pub fn inferred_type(&self) -> ExpressionType {
        if self.is_json_access() {
            ExpressionType::Text
        } else {
            field_type_to_expression_type(self.field_config.type_)
        }
    }

    /// Renders `table.field` or, for JSON access, `table.field -> 'a' -> 'b' ->> 'c'`
    /// (last arrow is a text-extract). Used both at value sites and as the base of a
    /// projection.
    pub fn to_sql(&self) -> String {
        render_json_chain(&format!("{}.{}", self.table, self.field), &self.json_access)
    }
}

/// Renders `base -> 'seg1' -> ... ->> 'segN'` for a (possibly empty) list of JSON segments;
/// returns `base` unchanged when `segments` is empty. Shared with the data-table rewriter,
/// which synthesizes an extra leading segment (the logical field name) ahead of `base`.
pub fn render_json_chain(base: &str, segments: &[String]) -> String {
    if segments.is_empty() {
        return base.to_string();
    }
    let mut out = base.to_string();
    let last = segments.len() - 1;
    for (i, seg) in segments.iter().enumerate() {
        let arrow = if i == last { "->>" } else { "->" };
        out.push_str(&format!(" {arrow} {}", lexical::escape_string(seg)));
    }
    out
}

fn unwrap_quotes(segment: &str) -> Result<String> {
    let unwrapped = if segment.len() >= 2
        && segment.starts_with('\'')
        && segment.ends_with('\'')
    {
        &segment[1..segment.len() - 1]
    } else {
        segment
    };
    if unwrapped.is_empty() {
        bail!("JSON path segment must not be empty");
    }
    Ok(unwrapped.to_string())
}

pub fn field_type_to_expression_type(type_: FieldType) -> ExpressionType {
    match type_ {
        FieldType::Uuid => ExpressionType::Uuid,
        FieldType::String => ExpressionType::Text,
        FieldType::Number => ExpressionType::Number,
        FieldType::Boolean => ExpressionType::Boolean,
        FieldType::Datetime => ExpressionType::Timestamp,
        FieldType::Date => ExpressionType::Date,
        FieldType::Object => ExpressionType::Json,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::Ctx;
    use schema::{Config, Dialect, Field, FieldType, TableSchema};

    fn test_config() -> Config {
        Config {
            dialect: Dialect::Postgresql,
            tables: [(
                "users".to_string(),
                TableSchema::new([
                    Field { name: "id".into(), type_: FieldType::Uuid, nullable: false, default: None },
                    Field { name: "metadata".into(), type_: FieldType::Object, nullable: true, default: None },
                    Field { name: "name".into(), type_: FieldType::String, nullable: false, default: None },
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
    fn resolves_plain_field() {
        let cfg = test_config();
        let ctx = Ctx::new(&cfg);
        let fp = FieldPath::resolve("users.name", &ctx).unwrap();
        assert_eq!(fp.to_sql(), "users.name");
        assert_eq!(fp.inferred_type(), ExpressionType::Text);
    }

    #[test]
    fn resolves_json_access() {
        let cfg = test_config();
        let ctx = Ctx::new(&cfg);
        let fp = FieldPath::resolve("users.metadata->department", &ctx).unwrap();
        assert_eq!(fp.to_sql(), "users.metadata ->> 'department'");
        assert_eq!(fp.inferred_type(), ExpressionType::Text);
    }

    #[test]
    fn multi_segment_json_access_uses_arrow_then_text_extract() {
        let cfg = test_config();
        let ctx = Ctx::new(&cfg);
        let fp = FieldPath::resolve("users.metadata->a->b", &ctx).unwrap();
        assert_eq!(fp.to_sql(), "users.metadata -> 'a' ->> 'b'");
    }

    #[test]
    fn json_access_on_scalar_field_fails() {
        let cfg = test_config();
        let ctx = Ctx::new(&cfg);
        let err = FieldPath::resolve("users.name->x", &ctx).unwrap_err();
        assert!(err.to_string().contains("only allowed on JSON fields"));
    }

    #[test]
    fn bare_path_resolves_against_default_table() {
        let cfg = test_config();
        let ctx = Ctx::with_default_table(&cfg, "users");
        let fp = FieldPath::resolve("name", &ctx).unwrap();
        assert_eq!(fp.to_sql(), "users.name");
    }

    #[test]
    fn bare_path_without_default_table_fails() {
        let cfg = test_config();
        let ctx = Ctx::new(&cfg);
        let err = FieldPath::resolve("name", &ctx).unwrap_err();
        assert!(err.to_string().contains("expected 'table.field'"));
    }

    #[test]
    fn unknown_table_fails() {
        let cfg = test_config();
        let ctx = Ctx::new(&cfg);
        let err = FieldPath::resolve("orders.id", &ctx).unwrap_err();
        assert_eq!(err.to_string(), "Table 'orders' is not allowed or does not exist");
    }

    #[test]
    fn unknown_field_fails() {
        let cfg = test_config();
        let ctx = Ctx::new(&cfg);
        let err = FieldPath::resolve("users.nope", &ctx).unwrap_err();
        assert_eq!(err.to_string(), "Field 'nope' is not allowed or does not exist in 'users'");
    }
}
