//! Compiles declarative query/mutation objects (`serde_json::Value`) into SQL text against a
//! closed-world [`schema::Config`]. Five entry points cover the external surface (spec §6);
//! everything else is implementation detail reached only through them.

pub mod aggregate;
pub mod condition;
pub mod ctx;
pub mod data_table;
pub mod expr;
pub mod field_path;
pub mod functions;
pub mod lexical;
pub mod literal;
pub mod mutation;
pub mod select;
pub mod types;

use anyhow::Result;
use schema::Config;
use serde_json::Value as JsonValue;

/// Compiles a `SelectQuery` to a `SELECT` statement.
pub fn build_select_query(query: &JsonValue, config: &Config) -> Result<String> {
    log::debug!("compiling select query against dialect {:?}", config.dialect);
    select::compile(query, config)
}

/// Compiles an `AggregationQuery` to a grouped `SELECT` statement.
pub fn build_aggregation_query(query: &JsonValue, config: &Config) -> Result<String> {
    log::debug!("compiling aggregation query against dialect {:?}", config.dialect);
    aggregate::compile(query, config)
}

/// Compiles an `InsertQuery` to an `INSERT` statement. Fails with `Insert condition not met.`
/// if a `condition` is present and folds to `false`.
pub fn build_insert_query(query: &JsonValue, config: &Config) -> Result<String> {
    log::debug!("compiling insert query against dialect {:?}", config.dialect);
    mutation::compile_insert(query, config)
}

/// Compiles an `UpdateQuery` to an `UPDATE` statement. Fails with `Update condition not met.`
/// if a `condition` is present and folds to `false`.
pub fn build_update_query(query: &JsonValue, config: &Config) -> Result<String> {
    log::debug!("compiling update query against dialect {:?}", config.dialect);
    mutation::compile_update(query, config)
}

/// Compiles a `DeleteQuery` to a `DELETE` statement.
pub fn build_delete_query(query: &JsonValue, config: &Config) -> Result<String> {
    log::debug!("compiling delete query against dialect {:?}", config.dialect);
    mutation::compile_delete(query, config)
}
