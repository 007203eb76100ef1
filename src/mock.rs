//! Scripted in-memory database handle.
//!
//! [`MockExecutor`] answers each submitted statement with the next scripted
//! result and records every statement it receives, so tests can assert on the
//! rendered SQL, the bound parameters and how many times a builder executed.
//! Clones share the same script and log.

use crate::executor::{Cursor, DbError, Executor};
use crate::row::Row;
use crate::value::Params;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Answer to one statement
#[derive(Debug, Clone)]
enum MockResult {
    Rows(Vec<Row>),
    Error(String),
    /// A cursor that never produces a row
    Stall,
    /// A statement whose execution never finishes
    SlowStatement,
}

#[derive(Debug, Default)]
struct MockState {
    results: VecDeque<MockResult>,
    statements: Vec<(String, Params)>,
}

/// Database handle replaying scripted results
///
/// When the script runs out, statements succeed with no rows.
///
/// # Example
///
/// ```
/// use relquery::executor::Executor;
/// use relquery::mock::MockExecutor;
/// use relquery::row::Row;
/// use relquery::value::Params;
/// use sea_query::Value;
///
/// let mock = MockExecutor::new().with_rows(vec![Row::from_pairs([("id", Value::from(1i64))])]);
/// let mut cursor = mock.execute("SELECT 1", &Params::new()).unwrap();
/// assert!(cursor.next_row(None).unwrap().is_some());
/// assert_eq!(mock.execute_count(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockExecutor {
    state: Arc<Mutex<MockState>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A test that panicked while holding the lock has already failed
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Chainable form of [`MockExecutor::append_rows`]
    pub fn with_rows(self, rows: Vec<Row>) -> Self {
        self.append_rows(rows);
        self
    }

    /// Answer the next statement with these rows
    pub fn append_rows(&self, rows: Vec<Row>) {
        self.state().results.push_back(MockResult::Rows(rows));
    }

    /// Reject the next statement with `DbError::QueryError`
    pub fn append_error(&self, message: impl Into<String>) {
        self.state().results.push_back(MockResult::Error(message.into()));
    }

    /// Answer the next statement with a cursor that blocks until its deadline
    pub fn append_stall(&self) {
        self.state().results.push_back(MockResult::Stall);
    }

    /// Block the next statement's execution until its deadline
    ///
    /// Without a deadline the statement succeeds with no rows.
    pub fn append_slow_statement(&self) {
        self.state().results.push_back(MockResult::SlowStatement);
    }

    /// Number of statements submitted so far
    pub fn execute_count(&self) -> usize {
        self.state().statements.len()
    }

    /// Every submitted statement with its parameters, oldest first
    pub fn statements(&self) -> Vec<(String, Params)> {
        self.state().statements.clone()
    }

    pub fn last_statement(&self) -> Option<(String, Params)> {
        self.state().statements.last().cloned()
    }
}

impl Executor for MockExecutor {
    fn execute_until(
        &self,
        sql: &str,
        params: &Params,
        deadline: Option<Instant>,
    ) -> Result<Box<dyn Cursor>, DbError> {
        let result = {
            let mut state = self.state();
            state.statements.push((sql.to_string(), params.clone()));
            state.results.pop_front()
        };

        match result {
            Some(MockResult::Rows(rows)) => Ok(Box::new(MockCursor::Rows(rows.into()))),
            Some(MockResult::Error(message)) => Err(DbError::QueryError(message)),
            Some(MockResult::Stall) => Ok(Box::new(MockCursor::Stall)),
            Some(MockResult::SlowStatement) => match deadline {
                Some(deadline) => {
                    std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                    Err(DbError::Timeout)
                }
                None => Ok(Box::new(MockCursor::Rows(VecDeque::new()))),
            },
            None => Ok(Box::new(MockCursor::Rows(VecDeque::new()))),
        }
    }
}

enum MockCursor {
    Rows(VecDeque<Row>),
    Stall,
}

impl Cursor for MockCursor {
    fn next_row(&mut self, deadline: Option<Instant>) -> Result<Option<Row>, DbError> {
        match self {
            MockCursor::Rows(rows) => Ok(rows.pop_front()),
            MockCursor::Stall => match deadline {
                Some(deadline) => {
                    std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                    *self = MockCursor::Rows(VecDeque::new());
                    Err(DbError::Timeout)
                }
                None => Ok(None),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_query::Value;
    use std::time::Duration;

    #[test]
    fn test_script_is_replayed_in_order() {
        let mock = MockExecutor::new();
        mock.append_error("boom");
        mock.append_rows(vec![Row::from_pairs([("id", Value::from(1i64))])]);

        assert!(matches!(mock.execute("A", &Params::new()), Err(DbError::QueryError(ref m)) if m == "boom"));
        let mut cursor = mock.execute("B", &Params::new()).unwrap();
        assert!(cursor.next_row(None).unwrap().is_some());
        assert!(cursor.next_row(None).unwrap().is_none());

        let mut cursor = mock.execute("C", &Params::new()).unwrap();
        assert!(cursor.next_row(None).unwrap().is_none());

        let statements: Vec<String> = mock.statements().into_iter().map(|(sql, _)| sql).collect();
        assert_eq!(statements, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_clones_share_state() {
        let mock = MockExecutor::new();
        let clone = mock.clone();
        clone.execute("SELECT 1", &Params::new().with("x", 1i64)).unwrap();

        assert_eq!(mock.execute_count(), 1);
        let (_, params) = mock.last_statement().unwrap();
        assert_eq!(params.get(":x"), Some(&Value::from(1i64)));
    }

    #[test]
    fn test_stall_times_out_at_deadline() {
        let mock = MockExecutor::new();
        mock.append_stall();

        let mut cursor = mock.execute("SELECT 1", &Params::new()).unwrap();
        let deadline = Instant::now() + Duration::from_millis(10);
        assert!(matches!(cursor.next_row(Some(deadline)), Err(DbError::Timeout)));
        assert!(Instant::now() >= deadline);
        assert!(cursor.next_row(None).unwrap().is_none());
    }

    #[test]
    fn test_slow_statement_times_out_at_execute() {
        let mock = MockExecutor::new();
        mock.append_slow_statement();
        mock.append_slow_statement();

        let deadline = Instant::now() + Duration::from_millis(10);
        assert!(matches!(
            mock.execute_until("SELECT 1", &Params::new(), Some(deadline)),
            Err(DbError::Timeout)
        ));
        assert!(Instant::now() >= deadline);

        let mut cursor = mock.execute("SELECT 2", &Params::new()).unwrap();
        assert!(cursor.next_row(None).unwrap().is_none());
        assert_eq!(mock.execute_count(), 2);
    }
}
