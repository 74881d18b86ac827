//! Record trait and index filter types

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Current time as Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A type that can be persisted in a [`crate::Store`]
pub trait Record: Serialize + DeserializeOwned + Send + 'static {
    /// Unique identifier within the collection
    fn id(&self) -> &str;

    /// Last update timestamp (Unix milliseconds), used for compare-and-swap
    fn updated_at(&self) -> i64;

    /// Collection (table) name for this record type
    fn collection_name() -> &'static str;

    /// Fields that can be filtered on without decoding the record body
    fn indexed_fields(&self) -> HashMap<String, IndexValue>;
}

/// Value of an indexed field
///
/// Booleans are stored as integers (0/1); values read back from a backend are
/// always normalized, so a `Bool` written comes back as an `Int`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl IndexValue {
    /// Collapse `Bool` into `Int` so both backends compare the same way
    pub fn normalized(&self) -> IndexValue {
        match self {
            Self::Bool(b) => Self::Int(i64::from(*b)),
            other => other.clone(),
        }
    }

    /// Integer view of the value, if it has one
    pub fn as_int(&self) -> Option<i64> {
        match self.normalized() {
            Self::Int(i) => Some(i),
            _ => None,
        }
    }

    /// String view of the value, if it has one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Compare two values of the same kind; mixed kinds are unordered
    pub fn compare(&self, other: &IndexValue) -> Option<Ordering> {
        match (self.normalized(), other.normalized()) {
            (Self::String(a), Self::String(b)) => Some(a.cmp(&b)),
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(&b)),
            _ => None,
        }
    }
}

impl From<&str> for IndexValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for IndexValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for IndexValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Comparison operator for a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    /// SQL operator text
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    /// Whether an ordering satisfies this operator
    pub fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Gte => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Lte => ordering != Ordering::Greater,
        }
    }
}

/// A filter over one indexed field
///
/// A record matches only if it has the field and the comparison holds.
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: IndexValue,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<IndexValue>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        Self::new(field, FilterOp::Lte, value)
    }

    /// Evaluate against a record's indexed fields
    pub fn matches(&self, fields: &HashMap<String, IndexValue>) -> bool {
        fields
            .get(&self.field)
            .and_then(|v| v.compare(&self.value))
            .is_some_and(|ord| self.op.accepts(ord))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_normalizes_to_int() {
        assert_eq!(IndexValue::Bool(true).normalized(), IndexValue::Int(1));
        assert_eq!(IndexValue::Bool(false).as_int(), Some(0));
    }

    #[test]
    fn test_mixed_kinds_are_unordered() {
        assert!(IndexValue::from("1").compare(&IndexValue::Int(1)).is_none());
    }

    #[test]
    fn test_filter_matches() {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::from("pending"));
        fields.insert("next_run".to_string(), IndexValue::Int(100));

        assert!(Filter::eq("status", "pending").matches(&fields));
        assert!(!Filter::eq("status", "running").matches(&fields));
        assert!(Filter::lte("next_run", 100i64).matches(&fields));
        assert!(!Filter::lte("next_run", 99i64).matches(&fields));
        assert!(Filter::new("status", FilterOp::Ne, "failed").matches(&fields));
    }

    #[test]
    fn test_filter_requires_field() {
        let fields = HashMap::new();
        assert!(!Filter::new("owner", FilterOp::Ne, "x").matches(&fields));
    }
}
