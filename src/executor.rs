//! Database handle abstraction.
//!
//! Provides the [`Executor`] trait that submits a rendered statement together
//! with its named parameters, and the [`Cursor`] trait that hands rows back one
//! at a time in the order the engine produced them.
//!
//! Query builders only ever talk to these two traits, so any handle (the
//! bundled SQLite worker, the scripted mock, or an application's own adapter)
//! can be plugged into a [`crate::Database`].

use crate::row::Row;
use crate::value::Params;
use std::fmt;
use std::time::Instant;

/// Error raised by a database handle
#[derive(Debug)]
pub enum DbError {
    /// SQLite error from `rusqlite`
    #[cfg(feature = "sqlite")]
    Sqlite(rusqlite::Error),
    /// The statement was rejected (syntax, missing parameter, constraint)
    QueryError(String),
    /// A raw value could not be decoded
    ParseError(String),
    /// A deadline expired before the statement produced its next row
    Timeout,
    /// Other execution errors
    Other(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "sqlite")]
            DbError::Sqlite(e) => {
                write!(f, "SQLite error: {e}")
            }
            DbError::QueryError(s) => {
                write!(f, "Query error: {s}")
            }
            DbError::ParseError(s) => {
                write!(f, "Parse error: {s}")
            }
            DbError::Timeout => {
                write!(f, "Fetch deadline expired")
            }
            DbError::Other(s) => {
                write!(f, "Execution error: {s}")
            }
        }
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            #[cfg(feature = "sqlite")]
            DbError::Sqlite(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        DbError::Sqlite(err)
    }
}

/// Forward-only handle over the rows of one executed statement
pub trait Cursor {
    /// Pull the next row
    ///
    /// Returns `Ok(None)` once the result set is exhausted. When a `deadline`
    /// is given and passes before a row is available, the statement is
    /// aborted and [`DbError::Timeout`] returned; later calls return
    /// `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the engine fails while stepping the statement.
    fn next_row(&mut self, deadline: Option<Instant>) -> Result<Option<Row>, DbError>;
}

/// Trait for submitting statements to a database
///
/// # Examples
///
/// ```no_run
/// use relquery::executor::{DbError, Executor};
/// use relquery::value::Params;
///
/// # fn example(executor: &dyn Executor) -> Result<(), DbError> {
/// let params = Params::new().with("id", 42i64);
/// let mut cursor = executor.execute("SELECT `user`.`id` FROM `user` WHERE `user`.`id` = :id", &params)?;
/// while let Some(row) = cursor.next_row(None)? {
///     println!("{:?}", row.get("id"));
/// }
/// # Ok(())
/// # }
/// ```
pub trait Executor {
    /// Execute a SQL statement with named `:placeholder` parameters, giving
    /// up at `deadline`
    ///
    /// The deadline covers the statement's preparation and first step. When
    /// it passes, the handle aborts the statement and returns
    /// [`DbError::Timeout`].
    ///
    /// # Arguments
    ///
    /// * `sql` - SQL text using `:name` placeholders
    /// * `params` - Values keyed by placeholder name
    /// * `deadline` - Instant after which execution is abandoned
    ///
    /// # Returns
    ///
    /// A cursor decoding each row as a column-name keyed [`Row`].
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the handle rejects the statement.
    fn execute_until(
        &self,
        sql: &str,
        params: &Params,
        deadline: Option<Instant>,
    ) -> Result<Box<dyn Cursor>, DbError>;

    /// [`Executor::execute_until`] without a deadline
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the handle rejects the statement.
    fn execute(&self, sql: &str, params: &Params) -> Result<Box<dyn Cursor>, DbError> {
        self.execute_until(sql, params, None)
    }
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn execute_until(
        &self,
        sql: &str,
        params: &Params,
        deadline: Option<Instant>,
    ) -> Result<Box<dyn Cursor>, DbError> {
        (**self).execute_until(sql, params, deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_error_display() {
        let err = DbError::QueryError("test error".to_string());
        assert!(err.to_string().contains("Query error"));
    }

    #[test]
    fn test_db_error_all_variants() {
        let err = DbError::ParseError("test".to_string());
        assert!(err.to_string().contains("Parse error"));

        let err = DbError::Timeout;
        assert!(err.to_string().contains("deadline"));

        let err = DbError::Other("test".to_string());
        assert!(err.to_string().contains("Execution error"));
    }

    #[test]
    fn test_db_error_display_format() {
        let err = DbError::QueryError("near \"FROM\": syntax error".to_string());
        let display = err.to_string();
        assert!(display.contains("Query error"));
        assert!(display.contains("syntax error"));
    }
}
