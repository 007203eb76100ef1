//! Entity descriptors and the schema registry.
//!
//! An [`Entity`] describes one table: its name, its ordered fields with their
//! column kinds, its primary key and the foreign key other tables use to point
//! at it. The [`Schema`] owns every entity and answers the two relation
//! questions query builders ask:
//!
//! - [`Schema::relation`]: does `a` hold a key to `b` (has-one), does `b` hold
//!   a key to `a` (has-many), or neither?
//! - [`Schema::bridge`]: is there a junction table linking `a` and `b`?
//!
//! Relations are inferred from field names. `order` has one `customer` when it
//! carries a `customer_id` field, and `post` reaches `tag` through `post_tag`
//! when that table carries both `post_id` and `tag_id`.

use crate::error::QueryError;
use crate::row::Row;
use crate::value;
use serde::Deserialize;
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Column kind used to normalize raw cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Integer,
    Real,
    Text,
    Boolean,
    Json,
    Blob,
    /// Passed through untouched
    #[default]
    Any,
}

/// A single column of an entity
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "FieldSpec")]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
}

/// Fields may be declared as a bare name or as `{ name, kind }`
#[derive(Deserialize)]
#[serde(untagged)]
enum FieldSpec {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        kind: FieldKind,
    },
}

impl From<FieldSpec> for Field {
    fn from(spec: FieldSpec) -> Self {
        match spec {
            FieldSpec::Name(name) => Field {
                name,
                kind: FieldKind::Any,
            },
            FieldSpec::Full { name, kind } => Field { name, kind },
        }
    }
}

fn default_primary_key() -> String {
    "id".to_string()
}

/// Description of one table
///
/// # Example
///
/// ```
/// use relquery::schema::{Entity, FieldKind};
///
/// let order = Entity::new("order")
///     .field("id", FieldKind::Integer)
///     .field("customer_id", FieldKind::Integer)
///     .field("total", FieldKind::Real);
///
/// assert_eq!(order.foreign_key(), "order_id");
/// assert!(order.has_field("customer_id"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Entity {
    name: String,
    #[serde(default)]
    fields: Vec<Field>,
    #[serde(default = "default_primary_key")]
    primary_key: String,
    #[serde(default)]
    foreign_key: Option<String>,
}

impl Entity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            primary_key: default_primary_key(),
            foreign_key: None,
        }
    }

    /// Append a field; re-declaring a name replaces its kind in place
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(existing) => existing.kind = kind,
            None => self.fields.push(Field { name, kind }),
        }
        self
    }

    /// Append untyped fields
    pub fn fields<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names
            .into_iter()
            .fold(self, |entity, name| entity.field(name, FieldKind::Any))
    }

    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    /// Override the `<table>_id` foreign key convention
    pub fn with_foreign_key(mut self, foreign_key: impl Into<String>) -> Self {
        self.foreign_key = Some(foreign_key.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Name of the column other tables use to reference this one
    pub fn foreign_key(&self) -> Cow<'_, str> {
        match &self.foreign_key {
            Some(fk) => Cow::Borrowed(fk),
            None => Cow::Owned(format!("{}_id", self.name)),
        }
    }

    pub fn field_list(&self) -> &[Field] {
        &self.fields
    }

    /// Field names in declaration order
    pub fn field_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn field_kind(&self, name: &str) -> Option<FieldKind> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.kind)
    }

    /// Normalize a raw database row against this entity's field kinds
    ///
    /// Columns that are not fields of this entity (joined `other.field`
    /// aliases, extra selected expressions) pass through unchanged.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::Hydration` when a cell cannot be coerced to its
    /// declared kind.
    pub fn prepare_row(&self, raw: Row) -> Result<Row, QueryError> {
        let mut prepared = Row::new();
        for (column, cell) in raw {
            let cell = match self.field_kind(&column) {
                Some(kind) => value::normalize(kind, cell).map_err(|message| QueryError::Hydration {
                    entity: self.name.clone(),
                    message: format!("field `{column}`: {message}"),
                })?,
                None => cell,
            };
            prepared.push(column, cell);
        }
        Ok(prepared)
    }
}

/// Classification of the direct relation from one entity to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationType {
    /// The entity holds the other's foreign key (many-to-one / one-to-one)
    HasOne,
    /// The other entity holds this one's foreign key (one-to-many)
    HasMany,
    /// No direct foreign key either way
    Unrelated,
}

/// Registry of every entity known to a database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    entities: BTreeMap<String, Entity>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chainable form of [`Schema::insert`]
    pub fn with(mut self, entity: Entity) -> Self {
        self.insert(entity);
        self
    }

    /// Register an entity, replacing any previous entity with the same name
    pub fn insert(&mut self, entity: Entity) {
        self.entities.insert(entity.name.clone(), entity);
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.get(name)
    }

    /// Look up an entity, failing with `QueryError::UnknownEntity`
    pub fn try_entity(&self, name: &str) -> Result<&Entity, QueryError> {
        self.entity(name)
            .ok_or_else(|| QueryError::UnknownEntity(name.to_string()))
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Classify the direct relation from `entity` to `other`
    ///
    /// Has-one is checked first, so two tables holding each other's keys
    /// classify as has-one in both directions.
    pub fn relation(&self, entity: &Entity, other: &Entity) -> RelationType {
        if entity.has_field(&other.foreign_key()) {
            RelationType::HasOne
        } else if other.has_field(&entity.foreign_key()) {
            RelationType::HasMany
        } else {
            RelationType::Unrelated
        }
    }

    /// Conventional name of the junction table between two entities
    pub fn bridge_name(entity: &Entity, other: &Entity) -> String {
        let mut names = [entity.name(), other.name()];
        names.sort_unstable();
        names.join("_")
    }

    /// Find the junction table linking `entity` and `other`
    ///
    /// The bridge must be registered and carry both foreign keys.
    pub fn bridge(&self, entity: &Entity, other: &Entity) -> Option<&Entity> {
        let bridge = self.entity(&Self::bridge_name(entity, other))?;
        (bridge.has_field(&entity.foreign_key()) && bridge.has_field(&other.foreign_key()))
            .then_some(bridge)
    }
}

impl FromIterator<Entity> for Schema {
    fn from_iter<I: IntoIterator<Item = Entity>>(iter: I) -> Self {
        let mut schema = Schema::new();
        for entity in iter {
            schema.insert(entity);
        }
        schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_cfg::shop_schema;
    use sea_query::Value;

    #[test]
    fn test_foreign_key_convention_and_override() {
        let customer = Entity::new("customer");
        assert_eq!(customer.foreign_key(), "customer_id");

        let author = Entity::new("person").with_foreign_key("author_id");
        assert_eq!(author.foreign_key(), "author_id");
    }

    #[test]
    fn test_field_redeclaration_keeps_position() {
        let entity = Entity::new("post")
            .fields(["id", "title"])
            .field("id", FieldKind::Integer);

        let names: Vec<&str> = entity.field_names().collect();
        assert_eq!(names, vec!["id", "title"]);
        assert_eq!(entity.field_kind("id"), Some(FieldKind::Integer));
        assert_eq!(entity.field_kind("title"), Some(FieldKind::Any));
    }

    #[test]
    fn test_relation_inference() {
        let schema = shop_schema();
        let order = schema.entity("order").unwrap();
        let customer = schema.entity("customer").unwrap();
        let post = schema.entity("post").unwrap();
        let note = schema.entity("note").unwrap();

        assert_eq!(schema.relation(order, customer), RelationType::HasOne);
        assert_eq!(schema.relation(customer, order), RelationType::HasMany);
        assert_eq!(schema.relation(post, note), RelationType::Unrelated);
    }

    #[test]
    fn test_bridge_lookup_is_symmetric() {
        let schema = shop_schema();
        let post = schema.entity("post").unwrap();
        let tag = schema.entity("tag").unwrap();

        assert_eq!(Schema::bridge_name(tag, post), "post_tag");
        assert_eq!(schema.bridge(post, tag).map(Entity::name), Some("post_tag"));
        assert_eq!(schema.bridge(tag, post).map(Entity::name), Some("post_tag"));
    }

    #[test]
    fn test_bridge_requires_both_keys() {
        let schema = Schema::new()
            .with(Entity::new("post").fields(["id"]))
            .with(Entity::new("tag").fields(["id"]))
            .with(Entity::new("post_tag").fields(["id", "post_id"]));

        let post = schema.entity("post").unwrap();
        let tag = schema.entity("tag").unwrap();
        assert!(schema.bridge(post, tag).is_none());
    }

    #[test]
    fn test_try_entity_unknown() {
        let schema = shop_schema();
        let err = schema.try_entity("invoice").unwrap_err();
        assert!(matches!(err, QueryError::UnknownEntity(ref name) if name == "invoice"));
    }

    #[test]
    fn test_prepare_row_coerces_declared_fields_only() {
        let schema = shop_schema();
        let customer = schema.entity("customer").unwrap();

        let raw = Row::from_pairs([
            ("id", Value::from(3i64)),
            ("vip", Value::from(1i64)),
            ("order.total", Value::from(1i64)),
        ]);
        let prepared = customer.prepare_row(raw).unwrap();

        assert_eq!(prepared.get("vip"), Some(&Value::Bool(Some(true))));
        assert_eq!(prepared.get("order.total"), Some(&Value::from(1i64)));
    }

    #[test]
    fn test_prepare_row_reports_bad_cells() {
        let schema = shop_schema();
        let post = schema.entity("post").unwrap();

        let raw = Row::from_pairs([("id", Value::from(1i64)), ("meta", Value::from("{oops"))]);
        let err = post.prepare_row(raw).unwrap_err();
        assert!(matches!(err, QueryError::Hydration { ref entity, .. } if entity == "post"));
        assert!(err.to_string().contains("meta"));
    }
}
