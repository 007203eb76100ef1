//! Query building and execution.
//!
//! # Architecture
//!
//! - **Clause**: WHERE and LIMIT/OFFSET fragments plus identifier quoting
//! - **Select**: the SELECT builder and its relation-aware filters (`Select`)
//! - **Execution**: bulk and lazy fetching, the builder lifecycle
//!
//! # Examples
//!
//! ```no_run
//! use relquery::{Database, QueryError};
//!
//! # fn example(db: &Database) -> Result<(), QueryError> {
//! let mut posts = db.select("post")?.order_by("`post`.`id`", None);
//! while let Some(post) = posts.fetch_next()? {
//!     println!("{:?}", post.get("title"));
//! }
//! # Ok(())
//! # }
//! ```

pub mod clause;
pub mod execution;
pub mod select;

pub use execution::{Consumption, Lifecycle};
pub use select::Select;
