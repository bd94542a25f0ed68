pub mod config;
pub mod value;

pub use config::{
    Config, DataTableConfig, Dialect, Field, FieldType, Relationship, TableSchema,
};
pub use value::Value;
