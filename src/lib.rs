//! # relquery
//!
//! Relation-aware SELECT query builder for SQLite-style SQL.
//!
//! A [`Database`] binds a [`Schema`] of entity descriptors to a database
//! handle. [`Database::select`] starts a [`Select`] over one entity, which
//! renders a parameterized statement with backtick-quoted identifiers and
//! `:name` placeholders, resolves relations to previously fetched rows
//! (has-one, has-many, many-to-many through a bridge table) and materializes
//! result rows in bulk or one at a time.
//!
//! ```no_run
//! use relquery::{Database, Settings};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load()?;
//! let db = Database::open(&settings)?;
//!
//! let mut tags = db.select("tag")?;
//! while let Some(tag) = tags.fetch_next()? {
//!     let posts = db.select("post")?.filter_by_related_row(&tag)?.fetch_all(true)?;
//!     println!("{:?}: {} posts", tag.get("name"), posts.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - `sqlite` (default): worker-thread SQLite handle
//! - `tracing` (default): spans around execution and fetching
//! - `metrics`: Prometheus metrics through OpenTelemetry
//! - `mock`: scripted handle for downstream tests

pub mod config;
pub mod database;
pub mod error;
pub mod executor;
pub mod metrics;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod query;
pub mod relation;
pub mod row;
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod value;

#[cfg(test)]
mod tests_cfg;

pub use crate::config::{DatabaseConfig, QuerySettings, Settings};
pub use database::Database;
pub use error::QueryError;
pub use executor::{Cursor, DbError, Executor};
pub use query::{Consumption, Lifecycle, Select};
pub use relation::{resolve_relation, BridgePlan, RelationPlan};
pub use row::{Collection, FromRow, Record, RelatedRow, Row};
pub use schema::{Entity, Field, FieldKind, RelationType, Schema};
pub use value::Params;
