use std::collections::HashMap;

use serde_json::Value;

/// A single cell returned by the versioning-engine client. Replaces the
/// dynamic/strongly-typed row duality: every column comes back as one of
/// these, and call sites ask for the shape they expect via a typed
/// accessor on `Row`.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Null,
    Text(String),
    Integer(i64),
    Bool(bool),
    Json(Value),
}

impl RowValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RowValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RowValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RowValue::Bool(b) => Some(*b),
            RowValue::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<Value> {
        match self {
            RowValue::Json(v) => Some(v.clone()),
            RowValue::Text(s) => serde_json::from_str(s).ok(),
            _ => None,
        }
    }
}

impl From<String> for RowValue {
    fn from(s: String) -> Self {
        RowValue::Text(s)
    }
}

impl From<i64> for RowValue {
    fn from(i: i64) -> Self {
        RowValue::Integer(i)
    }
}

impl From<bool> for RowValue {
    fn from(b: bool) -> Self {
        RowValue::Bool(b)
    }
}

/// One row of a versioning-engine query result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(pub HashMap<String, RowValue>);

impl Row {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<RowValue>) -> &mut Self {
        self.0.insert(column.into(), value.into());
        self
    }

    pub fn get_string(&self, column: &str) -> Option<String> {
        self.0.get(column).and_then(RowValue::as_str).map(String::from)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.0.get(column).and_then(RowValue::as_i64)
    }

    pub fn get_bool(&self, column: &str) -> Option<bool> {
        self.0.get(column).and_then(RowValue::as_bool)
    }

    /// Schema-free pass-through for the `metadata` column: callers that
    /// just want to forward JSON without interpreting it use this instead
    /// of a typed accessor.
    pub fn metadata_json(&self) -> Option<Value> {
        self.0.get("metadata").and_then(RowValue::as_json)
    }
}

/// A parameterised statement. The Stager (C6) never concatenates user data
/// into `sql` itself; every value that varies per call goes in `params`.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<RowValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<RowValue>) -> Self {
        Self { sql: sql.into(), params }
    }
}
