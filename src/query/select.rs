//! Select query builder.
//!
//! This module provides [`Select`], the builder for parameterized SELECT
//! statements over one primary entity. Configuration methods (fields, joins,
//! filters, ordering, limits) are defined here, while execution methods are
//! in the execution module.

use crate::database::Database;
use crate::error::QueryError;
use crate::query::clause::{qualified, quote, LimitClause, WhereClause};
use crate::query::execution::CursorState;
use crate::relation::{resolve_relation, RelationPlan};
use crate::row::{Record, RelatedRow};
use crate::schema::{Entity, RelationType};
use crate::value::Params;
use sea_query::Value;
use std::fmt;
use std::marker::PhantomData;

/// A LEFT JOIN against a has-one entity
#[derive(Debug, Clone)]
pub(crate) struct LeftJoin<'db> {
    pub(crate) entity: &'db Entity,
    pub(crate) on: String,
}

/// Query builder for selecting rows of one entity
///
/// Returned by [`Database::select`]. Every configuration method consumes and
/// returns the builder; the ones that consult the schema return a `Result`.
/// Rows are materialized as `M`, [`Record`] unless chosen otherwise through
/// [`Database::select_as`].
///
/// # Example
///
/// ```no_run
/// use relquery::{Database, QueryError};
///
/// # fn example(db: &Database) -> Result<(), QueryError> {
/// let customer = db.select("customer")?.by_id(5i64).fetch_one()?;
///
/// if let Some(customer) = customer {
///     let orders = db
///         .select("order")?
///         .filter_by_related_row(&customer)?
///         .order_by("`order`.`total`", Some("DESC"))
///         .limit(10)
///         .fetch_all(true)?;
///     println!("{} orders", orders.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Select<'db, M = Record> {
    pub(crate) db: &'db Database,
    pub(crate) entity: &'db Entity,
    pub(crate) from: Vec<String>,
    pub(crate) fields: Vec<String>,
    pub(crate) joins: Vec<LeftJoin<'db>>,
    pub(crate) order: Vec<String>,
    pub(crate) wheres: WhereClause,
    pub(crate) limit: LimitClause,
    pub(crate) params: Params,
    pub(crate) state: CursorState,
    pub(crate) _model: PhantomData<fn() -> M>,
}

impl<'db, M> Select<'db, M> {
    pub(crate) fn new(db: &'db Database, entity: &'db Entity) -> Self {
        Self {
            db,
            entity,
            from: Vec::new(),
            fields: Vec::new(),
            joins: Vec::new(),
            order: Vec::new(),
            wheres: WhereClause::new(),
            limit: LimitClause::default(),
            params: Params::new(),
            state: CursorState::Configuring,
            _model: PhantomData,
        }
    }

    /// The primary entity of the statement
    pub fn entity(&self) -> &'db Entity {
        self.entity
    }

    /// Add an extra table to the FROM list
    ///
    /// The name is not checked against the schema.
    pub fn from(mut self, table: impl Into<String>) -> Self {
        self.from.push(table.into());
        self
    }

    /// Add a raw expression to the select list
    pub fn field(mut self, expression: impl Into<String>) -> Self {
        self.fields.push(expression.into());
        self
    }

    /// Add a raw WHERE condition with its parameters
    ///
    /// # Arguments
    ///
    /// * `condition` - SQL condition using `:name` placeholders
    /// * `params` - Values for those placeholders, overwriting existing keys
    pub fn filter(mut self, condition: impl Into<String>, params: Params) -> Self {
        self.wheres.push(condition);
        self.params.merge(params);
        self
    }

    /// Keep rows whose `field` equals `value`
    ///
    /// Binds the value to the placeholder `:<field>`.
    pub fn by(self, field: &str, value: impl Into<Value>) -> Self {
        let condition = format!("{} = :{field}", qualified(self.entity.name(), field));
        self.filter(condition, Params::new().with(field, value))
    }

    /// Keep rows whose `field` is one of `values`
    ///
    /// Binds `:<field>_0`, `:<field>_1`, ... An empty list matches nothing.
    pub fn by_any<I, V>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let params: Params = values
            .into_iter()
            .enumerate()
            .map(|(i, value)| (format!("{field}_{i}"), value))
            .collect();

        if params.is_empty() {
            return self.filter("1 = 0", params);
        }

        let placeholders = params.iter().map(|(name, _)| name).collect::<Vec<_>>().join(", ");
        let condition = format!("{} IN ({placeholders})", qualified(self.entity.name(), field));
        self.filter(condition, params)
    }

    /// Keep the row with this primary key
    pub fn by_id(self, id: impl Into<Value>) -> Self {
        let primary_key = self.entity.primary_key().to_string();
        self.by(&primary_key, id)
    }

    /// Keep only rows related to a previously fetched row
    ///
    /// # Arguments
    ///
    /// * `row` - Row of another entity, e.g. a [`Record`] from an earlier fetch
    ///
    /// # Errors
    ///
    /// Returns `QueryError::UnknownEntity` if the row's entity is not in the
    /// schema, `QueryError::RelationNotFound` if the two entities are not
    /// related, and `QueryError::MissingValue` if the row lacks the field the
    /// relation filters on.
    pub fn filter_by_related_row(self, row: &impl RelatedRow) -> Result<Self, QueryError> {
        let db = self.db;
        let schema = db.schema();
        let other = schema.try_entity(row.entity_name())?;

        let required = |field: &str| {
            row.get(field).ok_or_else(|| QueryError::MissingValue {
                entity: other.name().to_string(),
                field: field.to_string(),
            })
        };

        match resolve_relation(schema, self.entity, other)? {
            RelationPlan::HasOne { column } => {
                let id = required(other.primary_key())?;
                Ok(self.by(&column, id))
            }
            RelationPlan::HasMany { foreign_key } => {
                let id = required(&foreign_key)?;
                Ok(self.by_id(id))
            }
            RelationPlan::Bridge(plan) => {
                let id = required(other.primary_key())?;
                let mut select = self
                    .from(plan.bridge.clone())
                    .from(plan.other.clone())
                    .field(plan.extra_field());
                let [bridge_to_primary, bridge_to_other, other_in] = plan.filters();
                select.wheres.push(bridge_to_primary);
                select.wheres.push(bridge_to_other);
                Ok(select.filter(other_in, Params::new().with(plan.placeholder(), id)))
            }
        }
    }

    /// Add an ORDER BY expression
    ///
    /// # Arguments
    ///
    /// * `expression` - Column or expression, used verbatim
    /// * `direction` - Optional `ASC` / `DESC`, appended verbatim
    pub fn order_by(mut self, expression: &str, direction: Option<&str>) -> Self {
        let order = match direction {
            Some(direction) if !direction.is_empty() => format!("{expression} {direction}"),
            _ => expression.to_string(),
        };
        self.order.push(order);
        self
    }

    /// LEFT JOIN an entity the primary entity has one of
    ///
    /// The joined entity's fields are selected as `` `joined.field` ``.
    ///
    /// A LEFT JOIN segment always carries an `ON (...)` condition. When `on`
    /// is omitted the builder derives one linking the joined primary key to
    /// the primary entity's foreign key column, so the rendered text reads
    /// `` LEFT JOIN `customer` ON (`customer`.`id` = `order`.`customer_id`) ``
    /// rather than a bare `` LEFT JOIN `customer` ``.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidJoin` naming both entities unless the
    /// relation is exactly has-one, and `QueryError::UnknownEntity` if `name`
    /// is not in the schema.
    pub fn left_join(
        mut self,
        name: &str,
        on: Option<&str>,
        params: Option<Params>,
    ) -> Result<Self, QueryError> {
        let db = self.db;
        let schema = db.schema();
        let joined = schema.try_entity(name)?;

        if schema.relation(self.entity, joined) != RelationType::HasOne {
            return Err(QueryError::InvalidJoin {
                entity: self.entity.name().to_string(),
                other: joined.name().to_string(),
            });
        }

        let on = match on {
            Some(on) => on.to_string(),
            None => format!(
                "{} = {}",
                qualified(joined.name(), joined.primary_key()),
                qualified(self.entity.name(), &joined.foreign_key())
            ),
        };
        self.joins.push(LeftJoin { entity: joined, on });

        if let Some(params) = params {
            self.params.merge(params);
        }
        Ok(self)
    }

    /// Merge parameters, overwriting existing keys
    pub fn params(mut self, params: Params) -> Self {
        self.params.merge(params);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit.set_limit(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.limit.set_offset(offset);
        self
    }

    /// Select one page of `size` rows; pages start at 1
    pub fn page(self, page: u64, size: u64) -> Self {
        let offset = page.saturating_sub(1).saturating_mul(size);
        self.limit(size).offset(offset)
    }

    /// The bound parameters accumulated so far
    pub fn bound_params(&self) -> &Params {
        &self.params
    }

    /// Render the statement and its parameters
    ///
    /// Rendering is pure: calling it twice without reconfiguring yields the
    /// same text and mapping.
    pub fn render(&self) -> (String, Params) {
        (self.sql(), self.params.clone())
    }

    fn sql(&self) -> String {
        let table = self.entity.name();

        let mut select = self
            .entity
            .field_names()
            .map(|field| qualified(table, field))
            .collect::<Vec<_>>();
        if select.is_empty() {
            select.push(format!("{}.*", quote(table)));
        }
        for join in &self.joins {
            let joined = join.entity.name();
            select.extend(join.entity.field_names().map(|field| {
                format!("{} AS {}", qualified(joined, field), quote(&format!("{joined}.{field}")))
            }));
        }
        select.extend(self.fields.iter().cloned());

        let mut sql = format!("SELECT {}", select.join(", "));

        let from = std::iter::once(table)
            .chain(self.from.iter().map(String::as_str))
            .map(quote)
            .collect::<Vec<_>>();
        sql.push_str(" FROM ");
        sql.push_str(&from.join(", "));

        for join in &self.joins {
            sql.push_str(&format!(" LEFT JOIN {} ON ({})", quote(join.entity.name()), join.on));
        }

        sql.push_str(&self.wheres.to_sql());

        if !self.order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order.join(", "));
        }

        sql.push_str(&self.limit.to_sql());
        sql
    }
}

impl<M> fmt::Display for Select<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql())
    }
}

impl<M> fmt::Debug for Select<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Select")
            .field("entity", &self.entity.name())
            .field("sql", &self.sql())
            .field("params", &self.params)
            .field("lifecycle", &self.state.lifecycle())
            .finish()
    }
}
