//! Per-compile context: the `Config` being compiled against, the query's root table, and —
//! for mutation compiles — the `NEW_ROW` schema overlay.
//!
//! This replaces the teacher's approach of mounting a `NEW_ROW` entry directly onto the
//! shared `Config` for the duration of a mutation compile (see SPEC_FULL.md §9): `Ctx` reads
//! `new_row` before falling through to `config.tables`, so a single `Config` can be compiled
//! concurrently by any number of mutation compiles without cloning or locking.

use anyhow::{bail, Result};
use schema::{Config, TableSchema};

#[derive(Debug, Clone, Copy)]
pub struct Ctx<'a> {
    pub config: &'a Config,
    /// Bound only while compiling an insert/update condition or value expression against the
    /// post-mutation row image.
    new_row: Option<&'a TableSchema>,
    /// The table a bare (unqualified) field name in a condition resolves against — the
    /// query's own root/target table. `None` only for contexts with no such table (e.g. the
    /// property tests' synthetic single-table conditions compiled via `Ctx::new`).
    default_table: Option<&'a str>,
}

impl<'a> Ctx<'a> {
    pub fn new(config: &'a Config) -> Self {
        Ctx { config, new_row: None, default_table: None }
    }

    pub fn with_default_table(config: &'a Config, default_table: &'a str) -> Self {
        Ctx { config, new_row: None, default_table: Some(default_table) }
    }

    pub fn with_new_row(config: &'a Config, new_row: &'a TableSchema) -> Self {
        Ctx { config, new_row: Some(new_row), default_table: None }
    }

    pub fn default_table(&self) -> Option<&'a str> {
        self.default_table
    }

    pub fn resolve_table(&self, name: &str) -> Result<&'a TableSchema> {
        if name == "NEW_ROW" {
            return self
                .new_row
                .ok_or_else(|| anyhow::anyhow!("Table 'NEW_ROW' is not allowed or does not exist"));
        }
        self.config
            .table(name)
            .ok_or_else(|| anyhow::anyhow!("Table '{name}' is not allowed or does not exist"))
    }

    pub fn require_table(&self, name: &str) -> Result<&'a TableSchema> {
        if name == "NEW_ROW" {
            bail!("Table 'NEW_ROW' is not allowed or does not exist");
        }
        self.resolve_table(name)
    }
}
