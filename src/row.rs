//! Raw rows, materialized records and result collections.
//!
//! A [`Row`] is what a cursor hands back: column names paired with values in
//! the order the engine produced them. Materialization turns each row into a
//! model through [`FromRow`]; the default model is [`Record`], which keeps the
//! normalized row and can be deserialized into any serde type. Bulk fetches
//! gather models into a [`Collection`].

use crate::error::QueryError;
use crate::schema::Entity;
use crate::value;
use sea_query::Value;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// Column-name keyed values of one result row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut row = Row::new();
        for (column, value) in pairs {
            row.push(column, value);
        }
        row
    }

    /// Append a column; duplicate names are kept so positions stay aligned
    /// with the statement's select list
    pub fn push(&mut self, column: impl Into<String>, value: Value) {
        self.columns.push(column.into());
        self.values.push(value);
    }

    /// Replace the first column with this name, or append it
    pub fn set(&mut self, column: &str, value: Value) {
        match self.columns.iter().position(|c| c == column) {
            Some(idx) => self.values[idx] = value,
            None => self.push(column, value),
        }
    }

    /// First value stored under `column`
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }

    /// JSON object view; later duplicates overwrite earlier ones
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .iter()
            .map(|(column, value)| (column.to_string(), value::to_json(value)))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = std::iter::Zip<std::vec::IntoIter<String>, std::vec::IntoIter<Value>>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter().zip(self.values)
    }
}

/// A previously fetched row that further queries can be filtered by
pub trait RelatedRow {
    /// Name of the entity the row belongs to
    fn entity_name(&self) -> &str;

    /// Value of one of the row's fields
    fn get(&self, field: &str) -> Option<Value>;
}

/// Conversion from a normalized row into a model
pub trait FromRow: Sized {
    /// Build a model from a row already normalized by `entity`
    ///
    /// # Errors
    ///
    /// Returns `QueryError::Hydration` if the row does not fit the model.
    fn from_row(entity: &Entity, row: Row) -> Result<Self, QueryError>;
}

impl FromRow for Row {
    fn from_row(_entity: &Entity, row: Row) -> Result<Self, QueryError> {
        Ok(row)
    }
}

/// Default materialized entity: the entity name plus its normalized row
///
/// # Example
///
/// ```
/// use relquery::row::{Record, RelatedRow, Row};
/// use sea_query::Value;
///
/// let record = Record::new("customer", "id", Row::from_pairs([("id", Value::from(5i64))]));
/// assert_eq!(record.entity_name(), "customer");
/// assert_eq!(record.id(), Some(&Value::from(5i64)));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    entity: String,
    primary_key: String,
    row: Row,
}

impl Record {
    pub fn new(entity: impl Into<String>, primary_key: impl Into<String>, row: Row) -> Self {
        Self {
            entity: entity.into(),
            primary_key: primary_key.into(),
            row,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.row.get(field)
    }

    /// Value of the entity's primary key
    pub fn id(&self) -> Option<&Value> {
        self.row.get(&self.primary_key)
    }

    pub fn row(&self) -> &Row {
        &self.row
    }

    pub fn into_row(self) -> Row {
        self.row
    }

    /// Deserialize the record into a typed struct
    ///
    /// # Errors
    ///
    /// Returns `QueryError::Hydration` when the row's shape does not match `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, QueryError> {
        serde_json::from_value(self.row.to_json()).map_err(|e| QueryError::Hydration {
            entity: self.entity.clone(),
            message: e.to_string(),
        })
    }
}

impl FromRow for Record {
    fn from_row(entity: &Entity, row: Row) -> Result<Self, QueryError> {
        Ok(Record::new(entity.name(), entity.primary_key(), row))
    }
}

impl RelatedRow for Record {
    fn entity_name(&self) -> &str {
        &self.entity
    }

    fn get(&self, field: &str) -> Option<Value> {
        self.row.get(field).cloned()
    }
}

/// Models gathered by a bulk fetch
///
/// When keyed by id, a row whose id was already seen replaces the earlier
/// model in place, so the collection keeps first-arrival order. Rows without
/// an id are always appended.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection<M> {
    key_by_id: bool,
    items: Vec<M>,
    ids: HashMap<String, usize>,
}

impl<M> Collection<M> {
    pub fn new(key_by_id: bool) -> Self {
        Self {
            key_by_id,
            items: Vec::new(),
            ids: HashMap::new(),
        }
    }

    pub fn is_keyed_by_id(&self) -> bool {
        self.key_by_id
    }

    /// Append a model fetched with the given id
    pub fn insert(&mut self, id: Option<&Value>, item: M) {
        let key = if self.key_by_id { id.and_then(value::id_key) } else { None };
        match key {
            Some(key) => match self.ids.get(&key) {
                Some(&idx) => self.items[idx] = item,
                None => {
                    self.ids.insert(key, self.items.len());
                    self.items.push(item);
                }
            },
            None => self.items.push(item),
        }
    }

    /// Look up a model by id; always `None` for unkeyed collections
    pub fn get_by_id(&self, id: &Value) -> Option<&M> {
        let key = value::id_key(id)?;
        self.ids.get(&key).map(|&idx| &self.items[idx])
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn first(&self) -> Option<&M> {
        self.items.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, M> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<M> {
        self.items
    }
}

impl<M> IntoIterator for Collection<M> {
    type Item = M;
    type IntoIter = std::vec::IntoIter<M>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, M> IntoIterator for &'a Collection<M> {
    type Item = &'a M;
    type IntoIter = std::slice::Iter<'a, M>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
