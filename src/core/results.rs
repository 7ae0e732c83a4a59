use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single result value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl ResultValue {
    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ResultValue::Int(v) => Some(*v as f64),
            ResultValue::Float(v) => Some(*v),
            ResultValue::Bool(_) | ResultValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ResultValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResultValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultValue::Int(v) => write!(f, "{}", v),
            ResultValue::Float(v) => write!(f, "{}", v),
            ResultValue::Bool(v) => write!(f, "{}", v),
            ResultValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for ResultValue {
    fn from(v: i64) -> Self {
        ResultValue::Int(v)
    }
}

impl From<i32> for ResultValue {
    fn from(v: i32) -> Self {
        ResultValue::Int(v as i64)
    }
}

impl From<u64> for ResultValue {
    fn from(v: u64) -> Self {
        ResultValue::Int(v as i64)
    }
}

impl From<usize> for ResultValue {
    fn from(v: usize) -> Self {
        ResultValue::Int(v as i64)
    }
}

impl From<f64> for ResultValue {
    fn from(v: f64) -> Self {
        ResultValue::Float(v)
    }
}

impl From<bool> for ResultValue {
    fn from(v: bool) -> Self {
        ResultValue::Bool(v)
    }
}

impl From<String> for ResultValue {
    fn from(v: String) -> Self {
        ResultValue::Text(v)
    }
}

impl From<&str> for ResultValue {
    fn from(v: &str) -> Self {
        ResultValue::Text(v.to_string())
    }
}

/// Ordered `name → value` results of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultMap {
    values: BTreeMap<String, ResultValue>,
}

impl ResultMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result, replacing any previous value under the same name
    pub fn add_result(&mut self, name: impl Into<String>, value: impl Into<ResultValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ResultValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Copy all entries of `other` into this map
    pub fn merge(&mut self, other: &ResultMap) {
        for (name, value) in &other.values {
            self.values.insert(name.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResultValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
