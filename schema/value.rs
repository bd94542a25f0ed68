use serde::{Deserialize, Serialize};

/// A scalar value bound to a [`crate::config::Variable`][variable], as submitted in `Config`.
///
/// [variable]: crate::config::Config::variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Number(serde_json::Number),
    Boolean(bool),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Boolean(_) => "boolean",
        }
    }
}
