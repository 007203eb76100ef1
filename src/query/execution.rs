//! Query execution methods for [`Select`].
//!
//! This module provides execution methods (`execute`, `fetch_all`,
//! `fetch_one`, `fetch_next`, and their deadline variants) for statements
//! built with [`Select`].
//!
//! A builder moves through an explicit lifecycle:
//!
//! ```text
//! Configuring --fetch_next--> Streaming(cursor) --exhausted--> Exhausted(Lazy)
//!      |    \                                             \--cancel/deadline--> Exhausted(Lazy)
//!      |     \--deadline during execution--> Exhausted(Lazy)
//!      \--fetch_all--> Exhausted(Bulk)
//! ```
//!
//! `fetch_all` always executes a fresh statement. `fetch_next` executes once
//! and then keeps pulling from the memoized cursor. A fetch deadline covers
//! the statement's execution as well as every row pulled afterwards.

use crate::error::QueryError;
use crate::executor::{Cursor, DbError};
use crate::query::select::Select;
use crate::row::{Collection, FromRow, Row};
use std::fmt;
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// How the rows of a statement were consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Consumption {
    /// Pulled one at a time through `fetch_next`, or cancelled
    Lazy,
    /// Gathered at once by `fetch_all`
    Bulk,
}

/// Observable lifecycle of a builder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Configuring,
    Streaming,
    Exhausted(Consumption),
}

/// Lifecycle state holding the memoized cursor while streaming
pub(crate) enum CursorState {
    Configuring,
    Streaming(Box<dyn Cursor>),
    Exhausted(Consumption),
}

impl CursorState {
    pub(crate) fn lifecycle(&self) -> Lifecycle {
        match self {
            CursorState::Configuring => Lifecycle::Configuring,
            CursorState::Streaming(_) => Lifecycle::Streaming,
            CursorState::Exhausted(consumption) => Lifecycle::Exhausted(*consumption),
        }
    }
}

impl fmt::Debug for CursorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.lifecycle(), f)
    }
}

#[cfg(any(feature = "tracing", feature = "metrics"))]
fn consumption_label(consumption: Consumption) -> &'static str {
    match consumption {
        Consumption::Lazy => "lazy",
        Consumption::Bulk => "bulk",
    }
}

impl<M> Select<'_, M> {
    /// Current lifecycle state
    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lifecycle()
    }

    /// Submit the rendered statement and return its cursor
    ///
    /// The builder's lifecycle is not touched; a failed submission leaves
    /// nothing memoized.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::Database` with the handle's error unchanged.
    pub fn execute(&self) -> Result<Box<dyn Cursor>, QueryError> {
        self.execute_until(None)
    }

    /// [`Select::execute`], abandoning the statement at `deadline`
    ///
    /// # Errors
    ///
    /// Returns `QueryError::Database` with the handle's error unchanged,
    /// `DbError::Timeout` included.
    pub fn execute_until(&self, deadline: Option<Instant>) -> Result<Box<dyn Cursor>, QueryError> {
        let (sql, params) = self.render();

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_query_span(&sql).entered();

        log::debug!("relquery: executing `{}` with {} parameter(s)", sql, params.len());

        let start = Instant::now();
        let result = self.db.executor().execute_until(&sql, &params, deadline).map_err(|e| {
            #[cfg(feature = "metrics")]
            METRICS.record_error();
            log::debug!("relquery: statement failed: {e}");
            QueryError::Database(e)
        });
        let elapsed = start.elapsed();

        #[cfg(feature = "metrics")]
        METRICS.record_query(elapsed);

        let slow = Duration::from_millis(self.db.settings().slow_query_ms);
        if elapsed >= slow {
            log::warn!(
                "relquery: slow statement on `{}` took {} ms: {}",
                self.entity.name(),
                elapsed.as_millis(),
                sql
            );
        }

        result
    }

    /// Abort any open cursor and stop lazy fetching
    ///
    /// Later `fetch_next` calls return `Ok(None)`. `fetch_all` still executes
    /// a fresh statement.
    pub fn cancel(&mut self) {
        if let CursorState::Streaming(_) = self.state {
            log::debug!("relquery: cancelling open cursor on `{}`", self.entity.name());
        }
        self.state = CursorState::Exhausted(Consumption::Lazy);
    }

    /// Execute for a fetch; an expired deadline cancels the builder
    fn open_cursor(&mut self, deadline: Option<Instant>) -> Result<Box<dyn Cursor>, QueryError> {
        match self.execute_until(deadline) {
            Err(QueryError::Database(DbError::Timeout)) => {
                self.cancel();
                Err(QueryError::Cancelled)
            }
            opened => opened,
        }
    }

    fn default_deadline(&self) -> Option<Instant> {
        self.db
            .settings()
            .fetch_timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms))
    }
}

impl<M: FromRow> Select<'_, M> {
    fn materialize(&self, raw: Row) -> Result<(Option<sea_query::Value>, M), QueryError> {
        let row = self.entity.prepare_row(raw)?;
        let id = row.get(self.entity.primary_key()).cloned();
        let model = M::from_row(self.entity, row)?;
        Ok((id, model))
    }

    /// Execute and gather every row
    ///
    /// # Arguments
    ///
    /// * `key_by_id` - Key the collection by primary key; a repeated id
    ///   replaces the earlier model in place
    ///
    /// # Errors
    ///
    /// Returns `QueryError::Database` if the statement fails,
    /// `QueryError::Hydration` if a row cannot be materialized and
    /// `QueryError::Cancelled` if the configured fetch timeout expires.
    pub fn fetch_all(&mut self, key_by_id: bool) -> Result<Collection<M>, QueryError> {
        let deadline = self.default_deadline();
        self.fetch_all_until(key_by_id, deadline)
    }

    /// [`Select::fetch_all`] using the configured `key_by_id` setting
    ///
    /// # Errors
    ///
    /// See [`Select::fetch_all`].
    pub fn fetch_all_default(&mut self) -> Result<Collection<M>, QueryError> {
        let key_by_id = self.db.settings().key_by_id;
        self.fetch_all(key_by_id)
    }

    /// Execute and gather every row, giving up at `deadline`
    ///
    /// The deadline covers execution and every row pulled. On expiry the
    /// statement is aborted and the builder moves to `Exhausted(Lazy)`.
    ///
    /// # Errors
    ///
    /// See [`Select::fetch_all`].
    pub fn fetch_all_until(
        &mut self,
        key_by_id: bool,
        deadline: Option<Instant>,
    ) -> Result<Collection<M>, QueryError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::fetch_span(self.entity.name(), consumption_label(Consumption::Bulk)).entered();

        let mut cursor = self.open_cursor(deadline)?;
        let mut collection = Collection::new(key_by_id);

        loop {
            match cursor.next_row(deadline) {
                Ok(Some(raw)) => {
                    let (id, model) = self.materialize(raw)?;
                    collection.insert(id.as_ref(), model);
                }
                Ok(None) => break,
                Err(DbError::Timeout) => {
                    drop(cursor);
                    self.cancel();
                    return Err(QueryError::Cancelled);
                }
                Err(e) => return Err(e.into()),
            }
        }

        #[cfg(feature = "metrics")]
        METRICS.record_rows(collection.len() as u64, consumption_label(Consumption::Bulk));

        log::debug!(
            "relquery: fetched {} `{}` row(s) in bulk",
            collection.len(),
            self.entity.name()
        );

        self.state = CursorState::Exhausted(Consumption::Bulk);
        Ok(collection)
    }

    /// Fetch the first row
    ///
    /// Applies `LIMIT 1` when no limit was set (the limit stays on the
    /// builder) and discards any open cursor, so every call executes anew.
    ///
    /// # Errors
    ///
    /// See [`Select::fetch_next`].
    pub fn fetch_one(&mut self) -> Result<Option<M>, QueryError> {
        if self.limit.limit().is_none() {
            self.limit.set_limit(1);
        }
        self.state = CursorState::Configuring;
        self.fetch_next()
    }

    /// Fetch the next row, executing the statement on first use
    ///
    /// Returns `Ok(None)` once the rows are exhausted and keeps doing so
    /// without executing again.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::CursorConsumed` after a bulk fetch,
    /// `QueryError::Database` if the statement fails and
    /// `QueryError::Cancelled` if the configured fetch timeout expires.
    pub fn fetch_next(&mut self) -> Result<Option<M>, QueryError> {
        let deadline = self.default_deadline();
        self.fetch_next_until(deadline)
    }

    /// Fetch the next row, giving up at `deadline`
    ///
    /// On the first call the deadline also covers executing the statement.
    /// On expiry the statement is aborted and the builder moves to
    /// `Exhausted(Lazy)`.
    ///
    /// # Errors
    ///
    /// See [`Select::fetch_next`].
    pub fn fetch_next_until(&mut self, deadline: Option<Instant>) -> Result<Option<M>, QueryError> {
        match self.state {
            CursorState::Exhausted(Consumption::Lazy) => return Ok(None),
            CursorState::Exhausted(Consumption::Bulk) => return Err(QueryError::CursorConsumed),
            CursorState::Configuring => {
                let cursor = self.open_cursor(deadline)?;
                self.state = CursorState::Streaming(cursor);
            }
            CursorState::Streaming(_) => {}
        }

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::fetch_span(self.entity.name(), consumption_label(Consumption::Lazy)).entered();

        let CursorState::Streaming(cursor) = &mut self.state else {
            return Ok(None);
        };

        match cursor.next_row(deadline) {
            Ok(Some(raw)) => {
                #[cfg(feature = "metrics")]
                METRICS.record_rows(1, consumption_label(Consumption::Lazy));
                let (_, model) = self.materialize(raw)?;
                Ok(Some(model))
            }
            Ok(None) => {
                self.state = CursorState::Exhausted(Consumption::Lazy);
                Ok(None)
            }
            Err(DbError::Timeout) => {
                self.cancel();
                Err(QueryError::Cancelled)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuerySettings;
    use crate::database::Database;
    use crate::mock::MockExecutor;
    use crate::row::Record;
    use crate::tests_cfg::{mock_db, shop_schema};
    use sea_query::Value;

    fn customer_row(id: i64, name: &str) -> Row {
        Row::from_pairs([
            ("id", Value::from(id)),
            ("name", Value::from(name)),
            ("vip", Value::from(0i64)),
        ])
    }

    #[test]
    fn test_fetch_next_exhausts_without_reexecuting() {
        let (db, mock) = mock_db();
        mock.append_rows(vec![customer_row(1, "Ada"), customer_row(2, "Grace")]);

        let mut select = db.select("customer").unwrap();
        assert_eq!(select.lifecycle(), Lifecycle::Configuring);

        let first = select.fetch_next().unwrap().unwrap();
        assert_eq!(first.get("name"), Some(&Value::from("Ada")));
        assert_eq!(select.lifecycle(), Lifecycle::Streaming);

        assert!(select.fetch_next().unwrap().is_some());
        assert!(select.fetch_next().unwrap().is_none());
        assert!(select.fetch_next().unwrap().is_none());

        assert_eq!(mock.execute_count(), 1);
        assert_eq!(select.lifecycle(), Lifecycle::Exhausted(Consumption::Lazy));
    }

    #[test]
    fn test_fetch_all_executes_fresh_each_time() {
        let (db, mock) = mock_db();
        mock.append_rows(vec![customer_row(1, "Ada")]);
        mock.append_rows(vec![customer_row(1, "Ada"), customer_row(2, "Grace")]);

        let mut select = db.select("customer").unwrap();
        assert_eq!(select.fetch_all(true).unwrap().len(), 1);
        assert_eq!(select.fetch_all(true).unwrap().len(), 2);
        assert_eq!(mock.execute_count(), 2);
        assert_eq!(select.lifecycle(), Lifecycle::Exhausted(Consumption::Bulk));
    }

    #[test]
    fn test_fetch_all_keys_by_id() {
        let (db, mock) = mock_db();
        mock.append_rows(vec![customer_row(1, "Ada"), customer_row(1, "Ada L."), customer_row(2, "Grace")]);
        mock.append_rows(vec![customer_row(1, "Ada"), customer_row(1, "Ada L.")]);

        let mut select = db.select("customer").unwrap();
        let keyed = select.fetch_all(true).unwrap();
        assert_eq!(keyed.len(), 2);
        let ada = keyed.get_by_id(&Value::from(1i64)).unwrap();
        assert_eq!(ada.get("name"), Some(&Value::from("Ada L.")));

        let unkeyed = select.fetch_all(false).unwrap();
        assert_eq!(unkeyed.len(), 2);
    }

    #[test]
    fn test_fetch_all_default_uses_settings() {
        let settings = QuerySettings {
            key_by_id: false,
            ..QuerySettings::default()
        };
        let mock = MockExecutor::new();
        mock.append_rows(vec![customer_row(1, "Ada"), customer_row(1, "Ada")]);
        let db = Database::new(shop_schema(), mock.clone()).with_settings(settings);

        let collection = db.select("customer").unwrap().fetch_all_default().unwrap();
        assert!(!collection.is_keyed_by_id());
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn test_fetch_next_after_fetch_all_is_checked() {
        let (db, _) = mock_db();
        let mut select = db.select("customer").unwrap();
        select.fetch_all(true).unwrap();

        assert!(matches!(select.fetch_next(), Err(QueryError::CursorConsumed)));
    }

    #[test]
    fn test_fetch_one_sets_limit_and_reexecutes() {
        let (db, mock) = mock_db();
        mock.append_rows(vec![customer_row(1, "Ada")]);
        mock.append_rows(vec![customer_row(2, "Grace")]);

        let mut select = db.select("customer").unwrap();
        let first = select.fetch_one().unwrap().unwrap();
        assert_eq!(first.id(), Some(&Value::from(1i64)));
        assert!(select.to_string().ends_with(" LIMIT 1"));
        assert!(mock.last_statement().unwrap().0.ends_with(" LIMIT 1"));

        let second = select.fetch_one().unwrap().unwrap();
        assert_eq!(second.id(), Some(&Value::from(2i64)));
        assert_eq!(mock.execute_count(), 2);
    }

    #[test]
    fn test_fetch_one_keeps_explicit_limit() {
        let (db, mock) = mock_db();
        let mut select = db.select("customer").unwrap().limit(5);
        assert!(select.fetch_one().unwrap().is_none());
        assert!(mock.last_statement().unwrap().0.ends_with(" LIMIT 5"));
    }

    #[test]
    fn test_failed_execute_leaves_state_unchanged() {
        let (db, mock) = mock_db();
        mock.append_error("no such table: customer");

        let mut select = db.select("customer").unwrap();
        let err = select.fetch_next().unwrap_err();
        assert!(matches!(err, QueryError::Database(DbError::QueryError(_))));
        assert_eq!(select.lifecycle(), Lifecycle::Configuring);

        mock.append_rows(vec![customer_row(1, "Ada")]);
        assert!(select.fetch_next().unwrap().is_some());
        assert_eq!(mock.execute_count(), 2);
    }

    #[test]
    fn test_hydration_normalizes_field_kinds() {
        let (db, mock) = mock_db();
        mock.append_rows(vec![Row::from_pairs([
            ("id", Value::from("7")),
            ("name", Value::from("Ada")),
            ("vip", Value::from(1i64)),
        ])]);

        let record: Record = db.select("customer").unwrap().fetch_one().unwrap().unwrap();
        assert_eq!(record.id(), Some(&Value::BigInt(Some(7))));
        assert_eq!(record.get("vip"), Some(&Value::Bool(Some(true))));
    }

    #[test]
    fn test_deadline_cancels_lazy_fetch() {
        let (db, mock) = mock_db();
        mock.append_stall();

        let mut select = db.select("customer").unwrap();
        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(matches!(select.fetch_next_until(Some(deadline)), Err(QueryError::Cancelled)));
        assert_eq!(select.lifecycle(), Lifecycle::Exhausted(Consumption::Lazy));
        assert!(select.fetch_next().unwrap().is_none());
        assert_eq!(mock.execute_count(), 1);
    }

    #[test]
    fn test_deadline_covers_statement_execution() {
        let (db, mock) = mock_db();
        mock.append_slow_statement();
        mock.append_slow_statement();

        let mut lazy = db.select("customer").unwrap();
        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(matches!(lazy.fetch_next_until(Some(deadline)), Err(QueryError::Cancelled)));
        assert_eq!(lazy.lifecycle(), Lifecycle::Exhausted(Consumption::Lazy));
        assert!(lazy.fetch_next().unwrap().is_none());

        let mut bulk = db.select("customer").unwrap();
        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(matches!(bulk.fetch_all_until(true, Some(deadline)), Err(QueryError::Cancelled)));
        assert_eq!(bulk.lifecycle(), Lifecycle::Exhausted(Consumption::Lazy));

        assert_eq!(mock.execute_count(), 2);
    }

    #[test]
    fn test_configured_timeout_applies_to_execution() {
        let settings = QuerySettings {
            fetch_timeout_ms: Some(20),
            ..QuerySettings::default()
        };
        let mock = MockExecutor::new();
        mock.append_slow_statement();
        let db = Database::new(shop_schema(), mock.clone()).with_settings(settings);

        let mut select = db.select("customer").unwrap();
        assert!(matches!(select.fetch_one(), Err(QueryError::Cancelled)));
        assert_eq!(select.lifecycle(), Lifecycle::Exhausted(Consumption::Lazy));
    }

    #[test]
    fn test_execute_reports_timeout_unchanged() {
        let (db, mock) = mock_db();
        mock.append_slow_statement();

        let select = db.select("customer").unwrap();
        let deadline = Instant::now() + Duration::from_millis(10);
        let err = select.execute_until(Some(deadline)).err().unwrap();
        assert!(matches!(err, QueryError::Database(DbError::Timeout)));
        assert_eq!(select.lifecycle(), Lifecycle::Configuring);
    }

    #[test]
    fn test_deadline_cancels_bulk_fetch() {
        let (db, mock) = mock_db();
        mock.append_stall();

        let mut select = db.select("customer").unwrap();
        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(matches!(select.fetch_all_until(true, Some(deadline)), Err(QueryError::Cancelled)));
        assert_eq!(select.lifecycle(), Lifecycle::Exhausted(Consumption::Lazy));
    }

    #[test]
    fn test_cancel_stops_streaming() {
        let (db, mock) = mock_db();
        mock.append_rows(vec![customer_row(1, "Ada"), customer_row(2, "Grace")]);

        let mut select = db.select("customer").unwrap();
        assert!(select.fetch_next().unwrap().is_some());
        select.cancel();
        assert!(select.fetch_next().unwrap().is_none());
        assert_eq!(mock.execute_count(), 1);
    }

    #[test]
    fn test_typed_rows() {
        let (db, mock) = mock_db();
        mock.append_rows(vec![customer_row(3, "Linus")]);

        let mut select = db.select_as::<Row>("customer").unwrap();
        let row = select.fetch_next().unwrap().unwrap();
        assert_eq!(row.get("name"), Some(&Value::from("Linus")));
    }
}
