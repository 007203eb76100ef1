//! Query builder error type.

use crate::executor::DbError;
use std::fmt;

/// Error raised while configuring, executing or materializing a query
#[derive(Debug)]
pub enum QueryError {
    /// The two entities are neither directly related nor linked by a bridge
    RelationNotFound { entity: String, other: String },
    /// A left join was requested for a relation that is not has-one
    InvalidJoin { entity: String, other: String },
    /// The schema has no entity with this name
    UnknownEntity(String),
    /// A related row lacks the field its relation filters on
    MissingValue { entity: String, field: String },
    /// Error raised by the database handle, propagated unchanged
    Database(DbError),
    /// A raw row could not be converted into an entity
    Hydration { entity: String, message: String },
    /// Lazy fetching was attempted after the rows were consumed in bulk
    CursorConsumed,
    /// A fetch deadline expired and the open cursor was aborted
    Cancelled,
}

impl QueryError {
    /// Whether the error stems from how the query was built
    ///
    /// Configuration errors are raised synchronously by the offending builder
    /// call and retrying the same call never succeeds.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            QueryError::RelationNotFound { .. }
                | QueryError::InvalidJoin { .. }
                | QueryError::UnknownEntity(_)
                | QueryError::MissingValue { .. }
        )
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::RelationNotFound { entity, other } => {
                write!(f, "the tables {entity} and {other} are not related")
            }
            QueryError::InvalidJoin { entity, other } => {
                write!(
                    f,
                    "the entities '{entity}' and '{other}' are not related or cannot be joined"
                )
            }
            QueryError::UnknownEntity(name) => {
                write!(f, "unknown entity '{name}'")
            }
            QueryError::MissingValue { entity, field } => {
                write!(f, "related {entity} row has no value for '{field}'")
            }
            QueryError::Database(e) => {
                write!(f, "Database error: {e}")
            }
            QueryError::Hydration { entity, message } => {
                write!(f, "failed to materialize {entity} row: {message}")
            }
            QueryError::CursorConsumed => {
                write!(f, "rows were already consumed by a bulk fetch")
            }
            QueryError::Cancelled => {
                write!(f, "fetch cancelled: deadline expired")
            }
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueryError::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DbError> for QueryError {
    fn from(err: DbError) -> Self {
        QueryError::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_relation_errors_name_both_entities() {
        let err = QueryError::RelationNotFound {
            entity: "post".to_string(),
            other: "note".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("post"));
        assert!(display.contains("note"));
        assert!(err.is_configuration());

        let err = QueryError::InvalidJoin {
            entity: "customer".to_string(),
            other: "order".to_string(),
        };
        assert!(err.to_string().contains("'customer' and 'order'"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_database_error_keeps_source() {
        let err: QueryError = DbError::QueryError("no such table: order".to_string()).into();
        assert!(!err.is_configuration());
        assert!(err.to_string().contains("no such table"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_lifecycle_errors() {
        assert!(!QueryError::CursorConsumed.is_configuration());
        assert!(QueryError::Cancelled.to_string().contains("deadline"));
    }
}
