//! Bound values and the named parameter mapping.
//!
//! Every scalar crossing the builder travels as a [`sea_query::Value`]. This
//! module holds the [`Params`] mapping shared by all clauses of a statement,
//! the coercions applied when a raw row is normalized against its entity,
//! and the conversions to and from the SQLite driver types.

use crate::schema::FieldKind;
use sea_query::Value;
use std::collections::BTreeMap;

/// Named placeholder values for one statement
///
/// Keys are stored with their leading `:` (`"id"` and `":id"` address the same
/// slot). Inserting an existing key overwrites it: the last write wins.
/// Iteration is ordered by key so rendering stays reproducible.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Normalize a placeholder name to its `:name` form
    pub fn placeholder(name: &str) -> String {
        if name.starts_with(':') {
            name.to_owned()
        } else {
            format!(":{name}")
        }
    }

    /// Bind a value, returning the one it replaced
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(Self::placeholder(name.as_ref()), value.into())
    }

    /// Chainable form of [`Params::insert`]
    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Merge another mapping into this one; keys from `other` overwrite
    pub fn merge(&mut self, other: Params) {
        self.0.extend(other.0);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        if name.starts_with(':') {
            self.0.get(name)
        } else {
            self.0.get(&Self::placeholder(name))
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: AsRef<str>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}

impl IntoIterator for Params {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// The untyped SQL NULL used for raw cells
pub fn null() -> Value {
    Value::String(None)
}

/// Check whether a value is a (typed or untyped) NULL
pub fn is_null(value: &Value) -> bool {
    matches!(
        value,
        Value::Bool(None)
            | Value::TinyInt(None)
            | Value::SmallInt(None)
            | Value::Int(None)
            | Value::BigInt(None)
            | Value::TinyUnsigned(None)
            | Value::SmallUnsigned(None)
            | Value::Unsigned(None)
            | Value::BigUnsigned(None)
            | Value::Float(None)
            | Value::Double(None)
            | Value::String(None)
            | Value::Char(None)
            | Value::Bytes(None)
            | Value::Json(None)
    )
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::TinyInt(Some(i)) => Some(i64::from(*i)),
        Value::SmallInt(Some(i)) => Some(i64::from(*i)),
        Value::Int(Some(i)) => Some(i64::from(*i)),
        Value::BigInt(Some(i)) => Some(*i),
        Value::TinyUnsigned(Some(u)) => Some(i64::from(*u)),
        Value::SmallUnsigned(Some(u)) => Some(i64::from(*u)),
        Value::Unsigned(Some(u)) => Some(i64::from(*u)),
        Value::BigUnsigned(Some(u)) => i64::try_from(*u).ok(),
        Value::Bool(Some(b)) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Key used to index a collection by entity id
///
/// Integers and their decimal text share a key, so `5` and `"5"` collide.
/// NULL ids have no key.
pub fn id_key(value: &Value) -> Option<String> {
    if is_null(value) {
        return None;
    }
    if let Some(i) = as_i64(value) {
        return Some(i.to_string());
    }
    match value {
        Value::String(Some(s)) => Some(s.clone()),
        other => Some(format!("{other:?}")),
    }
}

/// Coerce a raw cell to the representation declared by its field kind
///
/// # Errors
///
/// Returns a description of the mismatch when text cannot be parsed as the
/// declared kind.
pub fn normalize(kind: FieldKind, value: Value) -> Result<Value, String> {
    if is_null(&value) {
        return Ok(match kind {
            FieldKind::Integer => Value::BigInt(None),
            FieldKind::Real => Value::Double(None),
            FieldKind::Text => Value::String(None),
            FieldKind::Boolean => Value::Bool(None),
            FieldKind::Json => Value::Json(None),
            FieldKind::Blob => Value::Bytes(None),
            FieldKind::Any => value,
        });
    }

    match (kind, value) {
        (FieldKind::Any | FieldKind::Blob, value) => Ok(value),
        (FieldKind::Integer, Value::String(Some(s))) => s
            .trim()
            .parse::<i64>()
            .map(|i| Value::BigInt(Some(i)))
            .map_err(|e| format!("expected integer, got {s:?}: {e}")),
        (FieldKind::Integer, value) => Ok(as_i64(&value).map_or(value, |i| Value::BigInt(Some(i)))),
        (FieldKind::Real, Value::Float(Some(f))) => Ok(Value::Double(Some(f64::from(f)))),
        (FieldKind::Real, Value::String(Some(s))) => s
            .trim()
            .parse::<f64>()
            .map(|f| Value::Double(Some(f)))
            .map_err(|e| format!("expected real, got {s:?}: {e}")),
        #[allow(clippy::cast_precision_loss)]
        (FieldKind::Real, value) => Ok(as_i64(&value).map_or(value, |i| Value::Double(Some(i as f64)))),
        (FieldKind::Boolean, Value::String(Some(s))) => match s.trim() {
            "1" | "true" | "TRUE" => Ok(Value::Bool(Some(true))),
            "0" | "false" | "FALSE" | "" => Ok(Value::Bool(Some(false))),
            other => Err(format!("expected boolean, got {other:?}")),
        },
        (FieldKind::Boolean, value) => Ok(as_i64(&value).map_or(value, |i| Value::Bool(Some(i != 0)))),
        (FieldKind::Text, Value::Bool(b)) => Ok(Value::Bool(b)),
        (FieldKind::Text, value) => Ok(as_i64(&value).map_or(value, |i| Value::String(Some(i.to_string())))),
        (FieldKind::Json, Value::String(Some(s))) => serde_json::from_str::<serde_json::Value>(&s)
            .map(Value::from)
            .map_err(|e| format!("expected JSON document: {e}")),
        (FieldKind::Json, value) => Ok(value),
    }
}

/// Convert a value to its JSON counterpart for typed deserialization
pub fn to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;

    if is_null(value) {
        return Json::Null;
    }
    if let Value::Bool(Some(b)) = value {
        return Json::Bool(*b);
    }
    if let Some(i) = as_i64(value) {
        return Json::from(i);
    }
    match value {
        Value::BigUnsigned(Some(u)) => Json::from(*u),
        Value::Float(Some(f)) => serde_json::Number::from_f64(f64::from(*f)).map_or(Json::Null, Json::Number),
        Value::Double(Some(d)) => serde_json::Number::from_f64(*d).map_or(Json::Null, Json::Number),
        Value::String(Some(s)) => Json::String(s.clone()),
        Value::Char(Some(c)) => Json::String(c.to_string()),
        Value::Bytes(Some(b)) => Json::Array(b.iter().map(|byte| Json::from(*byte)).collect()),
        Value::Json(Some(j)) => (**j).clone(),
        other => Json::String(format!("{other:?}")),
    }
}

#[cfg(feature = "sqlite")]
pub(crate) mod sqlite {
    //! Conversions between bound values and `rusqlite` cells.

    use super::{as_i64, is_null, null};
    use crate::executor::DbError;
    use rusqlite::types::{Value as SqlValue, ValueRef};
    use sea_query::Value;

    /// Convert a bound value into an owned SQLite value
    ///
    /// # Errors
    ///
    /// Returns `DbError::Other` for unsigned values above `i64::MAX` and for
    /// value types SQLite has no storage class for.
    pub(crate) fn to_sqlite(value: &Value) -> Result<SqlValue, DbError> {
        if is_null(value) {
            return Ok(SqlValue::Null);
        }
        if let Value::BigUnsigned(Some(u)) = value {
            if *u > i64::MAX as u64 {
                return Err(DbError::Other(format!(
                    "BigUnsigned value {} exceeds i64::MAX ({}), cannot be stored as INTEGER",
                    u,
                    i64::MAX
                )));
            }
        }
        if let Some(i) = as_i64(value) {
            return Ok(SqlValue::Integer(i));
        }
        match value {
            Value::Float(Some(f)) => Ok(SqlValue::Real(f64::from(*f))),
            Value::Double(Some(d)) => Ok(SqlValue::Real(*d)),
            Value::String(Some(s)) => Ok(SqlValue::Text(s.clone())),
            Value::Char(Some(c)) => Ok(SqlValue::Text(c.to_string())),
            Value::Bytes(Some(b)) => Ok(SqlValue::Blob(b.clone())),
            Value::Json(Some(j)) => serde_json::to_string(&**j)
                .map(SqlValue::Text)
                .map_err(|e| DbError::Other(format!("Failed to serialize JSON: {e}"))),
            other => Err(DbError::Other(format!(
                "Unsupported value type in query: {other:?}"
            ))),
        }
    }

    /// Decode a borrowed SQLite cell
    pub(crate) fn from_sqlite(cell: ValueRef<'_>) -> Value {
        match cell {
            ValueRef::Null => null(),
            ValueRef::Integer(i) => Value::BigInt(Some(i)),
            ValueRef::Real(f) => Value::Double(Some(f)),
            ValueRef::Text(t) => Value::String(Some(String::from_utf8_lossy(t).into_owned())),
            ValueRef::Blob(b) => Value::Bytes(Some(b.to_vec())),
        }
    }
}
