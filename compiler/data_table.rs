//! The data-table rewriter (spec §4.I): when a `Config` carries a [`schema::DataTableConfig`],
//! every logical table is really a view over one physical table that stores each row as a
//! JSON document. This module is the single seam the rest of the compiler goes through to
//! stay unaware of that indirection — `select`/`aggregate`/`mutation` ask it for a `FROM`
//! clause and a field access, never touch `config.data_table` directly.
//!
//! Grounded on `datastore/query/select.rs`'s `FROM ... AS ...` aliasing and `layout.rs`'s
//! JSON-column addressing, applied here to a single shared physical table instead of one
//! physical table per entity.

use crate::ctx::Ctx;
use crate::field_path::{render_json_chain, FieldPath};
use crate::lexical;
use crate::types;

/// The `FROM`/`JOIN` source for `logical_table`: `physical AS logical` in data-table mode,
/// or the bare logical name otherwise (it is already a real table).
pub fn table_source(ctx: &Ctx, logical_table: &str) -> String {
    match &ctx.config.data_table {
        Some(dt) => format!("{} AS {}", dt.table, logical_table),
        None => logical_table.to_string(),
    }
}

/// Predicates that must be ANDed into `WHERE` to scope the physical table down to
/// `logical_table`'s rows: an equality on the discriminator column, plus any raw SQL the
/// config always injects. Empty when the config has no data table.
pub fn scoping_predicates(ctx: &Ctx, logical_table: &str) -> Vec<String> {
    let Some(dt) = &ctx.config.data_table else {
        return Vec::new();
    };
    let mut predicates = vec![format!(
        "{}.{} = {}",
        logical_table,
        dt.table_field,
        lexical::escape_string(logical_table)
    )];
    predicates.extend(dt.where_conditions.iter().cloned());
    predicates
}

/// Rewrites a resolved field access into its physical SQL fragment: a plain column
/// reference outside data-table mode, or a JSON-arrow chain into the shared `dataField`
/// column with the logical field name spliced in as the leading segment.
pub fn rewrite_field_access(ctx: &Ctx, field_path: &FieldPath) -> String {
    let Some(dt) = &ctx.config.data_table else {
        return field_path.to_sql();
    };

    let base = format!("{}.{}", field_path.table, dt.data_field);
    let is_untouched_object = field_path.field_config.type_ == schema::FieldType::Object
        && field_path.json_access.is_empty();

    if is_untouched_object {
        // Keep the nested document as JSON rather than text-extracting it, so further
        // JSON-path access (or re-aggregation as JSONB) downstream still works.
        return format!("{} -> {}", base, lexical::escape_string(&field_path.field));
    }

    let mut segments = vec![field_path.field.clone()];
    segments.extend(field_path.json_access.iter().cloned());
    let extracted = render_json_chain(&base, &segments);
    types::cast(&extracted, field_path.inferred_type(), ctx.config.dialect)
}

/// Whether the config designates the data-table indirection at all, for callers that branch
/// on it for logging or diagnostics rather than emission.
pub fn is_data_table_mode(ctx: &Ctx) -> bool {
    ctx.config.data_table.is_some()
}
