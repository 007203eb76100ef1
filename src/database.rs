//! Entry point tying the schema, a database handle and query settings.

use crate::config::QuerySettings;
use crate::error::QueryError;
use crate::executor::Executor;
use crate::query::Select;
use crate::row::{FromRow, Record};
use crate::schema::Schema;

#[cfg(feature = "sqlite")]
use crate::config::Settings;
#[cfg(feature = "sqlite")]
use crate::sqlite::SqliteExecutor;

/// A schema bound to a database handle
///
/// # Examples
///
/// ```no_run
/// use relquery::{Database, Entity, FieldKind, Schema};
/// use relquery::sqlite::SqliteExecutor;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let schema = Schema::new()
///     .with(Entity::new("customer").field("id", FieldKind::Integer).field("name", FieldKind::Text))
///     .with(Entity::new("order").fields(["id", "customer_id", "total"]));
///
/// let db = Database::new(schema, SqliteExecutor::open("shop.db")?);
/// let orders = db.select("order")?.fetch_all(true)?;
/// # Ok(())
/// # }
/// ```
pub struct Database {
    schema: Schema,
    executor: Box<dyn Executor>,
    settings: QuerySettings,
}

impl Database {
    pub fn new(schema: Schema, executor: impl Executor + 'static) -> Self {
        Self {
            schema,
            executor: Box::new(executor),
            settings: QuerySettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: QuerySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Open the configured SQLite database with the configured schema
    ///
    /// # Errors
    ///
    /// Returns `QueryError::Database` if the database cannot be opened.
    #[cfg(feature = "sqlite")]
    pub fn open(settings: &Settings) -> Result<Self, QueryError> {
        let executor = SqliteExecutor::from_config(&settings.database)?;
        Ok(Self::new(settings.schema(), executor).with_settings(settings.query.clone()))
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn executor(&self) -> &dyn Executor {
        self.executor.as_ref()
    }

    pub fn settings(&self) -> &QuerySettings {
        &self.settings
    }

    /// Start a SELECT over the named entity, materializing [`Record`]s
    ///
    /// # Errors
    ///
    /// Returns `QueryError::UnknownEntity` if the schema has no such entity.
    pub fn select(&self, entity: &str) -> Result<Select<'_, Record>, QueryError> {
        self.select_as(entity)
    }

    /// Start a SELECT materializing rows as `M`
    ///
    /// # Errors
    ///
    /// Returns `QueryError::UnknownEntity` if the schema has no such entity.
    pub fn select_as<M: FromRow>(&self, entity: &str) -> Result<Select<'_, M>, QueryError> {
        let entity = self.schema.try_entity(entity)?;
        Ok(Select::new(self, entity))
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("schema", &self.schema)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
