//! SQLite database handle.
//!
//! [`SqliteExecutor`] owns a `rusqlite::Connection` on a dedicated worker
//! thread. Statements are submitted as jobs over a `crossbeam-channel` queue.
//! SQLite accepts the builder's backtick identifiers and `:name` placeholders
//! natively.
//!
//! Rows are pulled on demand: a [`SqliteCursor`] requests one row at a time
//! and the worker steps the statement only when asked. Between steps the
//! worker keeps serving the job queue, so a statement submitted while a cursor
//! is open runs nested inside it. The earlier cursor answers with an error
//! until every later cursor has been exhausted or dropped.
//!
//! Only `rusqlite` values cross the thread boundary. Bound parameters are
//! converted on the caller's thread before submission and cells are decoded
//! into [`Row`]s by the cursor.
//!
//! An expired deadline interrupts the running statement through the
//! connection's interrupt handle. SQLite interrupts every statement active on
//! the connection, so a deadline expiring in a nested statement also fails
//! the cursors it runs inside. Dropping a cursor finalizes its statement.

use crate::config::DatabaseConfig;
use crate::executor::{Cursor, DbError, Executor};
use crate::row::Row;
use crate::value::{sqlite as convert, Params};
use crossbeam_channel::{Receiver, RecvTimeoutError, Select, Sender};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, InterruptHandle, Rows, Statement};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Work handed to the SQLite worker thread
enum SqliteJob {
    Query {
        sql: String,
        params: Vec<(String, SqlValue)>,
        ack: Sender<Result<Vec<String>, DbError>>,
        /// Set when the caller gave up before the first step began
        abort: Arc<AtomicBool>,
        link: Link,
    },
    Batch {
        sql: String,
        reply: Sender<Result<(), DbError>>,
    },
}

/// Answer to one row request
enum Reply {
    Row(Vec<SqlValue>),
    Done,
    Failed(DbError),
    /// A statement opened after this one is still streaming
    Busy,
}

/// Worker side of one open cursor
struct Link {
    requests: Receiver<()>,
    replies: Sender<Reply>,
    closed: bool,
}

enum Wake {
    Request(usize),
    Dropped(usize),
    Job(SqliteJob),
    Shutdown,
}

/// The worker thread entrypoint
fn run_worker_loop(jobs: Receiver<SqliteJob>, conn: Connection) {
    let mut open = Vec::new();
    while let Ok(job) = jobs.recv() {
        run_job(&conn, &jobs, &mut open, job);
    }
    log::debug!("relquery: SQLite worker stopped");
}

fn run_job(conn: &Connection, jobs: &Receiver<SqliteJob>, open: &mut Vec<Link>, job: SqliteJob) {
    match job {
        SqliteJob::Query {
            sql,
            params,
            ack,
            abort,
            link,
        } => {
            let query = QueryJob {
                sql: &sql,
                params: &params,
                ack: &ack,
                abort: &abort,
            };
            stream_query(conn, jobs, open, &query, link);
        }

        SqliteJob::Batch { sql, reply } => {
            let res = conn.execute_batch(&sql).map_err(DbError::from);
            let _ = reply.send(res);
        }
    }
}

/// Borrowed parts of a query job
struct QueryJob<'j> {
    sql: &'j str,
    params: &'j [(String, SqlValue)],
    ack: &'j Sender<Result<Vec<String>, DbError>>,
    abort: &'j AtomicBool,
}

/// Block until a job arrives or a live cursor requests a row or goes away
fn wait(jobs: &Receiver<SqliteJob>, open: &[Link]) -> Wake {
    let mut sel = Select::new();
    let queued = sel.recv(jobs);
    let live: Vec<usize> = open
        .iter()
        .enumerate()
        .filter(|(_, link)| !link.closed)
        .map(|(depth, link)| {
            sel.recv(&link.requests);
            depth
        })
        .collect();

    let oper = sel.select();
    let index = oper.index();
    if index == queued {
        return match oper.recv(jobs) {
            Ok(job) => Wake::Job(job),
            Err(_) => Wake::Shutdown,
        };
    }

    // Cursor operations were registered right after the queue, in order
    let depth = live[index - queued - 1];
    match oper.recv(&open[depth].requests) {
        Ok(()) => Wake::Request(depth),
        Err(_) => Wake::Dropped(depth),
    }
}

/// Prepare a statement and bind every named placeholder it declares
fn prepare_bound<'c>(
    conn: &'c Connection,
    sql: &str,
    params: &[(String, SqlValue)],
) -> Result<Statement<'c>, DbError> {
    let mut stmt = conn.prepare(sql)?;
    for idx in 1..=stmt.parameter_count() {
        let name = stmt
            .parameter_name(idx)
            .ok_or_else(|| DbError::QueryError(format!("positional parameter ?{idx} is not supported")))?
            .to_string();
        let value = params
            .iter()
            .find_map(|(key, value)| (*key == name).then_some(value))
            .ok_or_else(|| DbError::QueryError(format!("no value bound for parameter {name}")))?;
        stmt.raw_bind_parameter(idx, value)?;
    }
    Ok(stmt)
}

/// Advance the statement by one row, copying its cells out
fn step(rows: &mut Rows<'_>, width: usize) -> Result<Option<Vec<SqlValue>>, DbError> {
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    (0..width)
        .map(|idx| Ok(SqlValue::from(row.get_ref(idx)?)))
        .collect::<Result<Vec<_>, DbError>>()
        .map(Some)
}

/// Run one statement for the lifetime of its cursor
///
/// The first step happens before acknowledging, so preparation and
/// first-row errors reach the caller of `execute`. Later steps happen one
/// per request. Jobs arriving in between run nested on the same connection.
fn stream_query(
    conn: &Connection,
    jobs: &Receiver<SqliteJob>,
    open: &mut Vec<Link>,
    query: &QueryJob<'_>,
    link: Link,
) {
    let ack = query.ack;
    let mut stmt = match prepare_bound(conn, query.sql, query.params) {
        Ok(stmt) => stmt,
        Err(e) => {
            let _ = ack.send(Err(e));
            return;
        }
    };

    // An interrupt only reaches statements already running
    if query.abort.load(Ordering::Acquire) {
        let _ = ack.send(Err(DbError::Timeout));
        return;
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();
    let mut rows = stmt.raw_query();

    let mut first = match step(&mut rows, width) {
        Ok(first) => Some(first),
        Err(e) => {
            let _ = ack.send(Err(e));
            return;
        }
    };
    if ack.send(Ok(columns)).is_err() {
        return;
    }

    open.push(link);
    let depth = open.len() - 1;

    while !open[depth].closed {
        match wait(jobs, open) {
            Wake::Request(d) if d == depth => {
                let next = match first.take() {
                    Some(row) => Ok(row),
                    None => step(&mut rows, width),
                };
                let reply = match next {
                    Ok(Some(values)) => Reply::Row(values),
                    Ok(None) => Reply::Done,
                    Err(e) => Reply::Failed(e),
                };
                let last = !matches!(reply, Reply::Row(_));
                if open[depth].replies.send(reply).is_err() || last {
                    break;
                }
            }
            Wake::Request(d) => {
                let _ = open[d].replies.send(Reply::Busy);
            }
            Wake::Dropped(d) => {
                if d == depth {
                    log::debug!("relquery: cursor dropped, finalizing statement");
                }
                open[d].closed = true;
            }
            Wake::Job(job) => run_job(conn, jobs, open, job),
            Wake::Shutdown => break,
        }
    }

    open.pop();
}

fn worker_gone() -> DbError {
    DbError::Other("SQLite worker has shut down".to_string())
}

/// SQLite handle backed by a worker thread
///
/// # Examples
///
/// ```no_run
/// use relquery::sqlite::SqliteExecutor;
/// use relquery::executor::{DbError, Executor};
/// use relquery::value::Params;
///
/// # fn example() -> Result<(), DbError> {
/// let sqlite = SqliteExecutor::open_in_memory()?;
/// sqlite.execute_batch("CREATE TABLE `tag` (`id` INTEGER PRIMARY KEY, `name` TEXT)")?;
///
/// let mut cursor = sqlite.execute("SELECT `tag`.`id` FROM `tag`", &Params::new())?;
/// while let Some(row) = cursor.next_row(None)? {
///     println!("{:?}", row.get("id"));
/// }
/// # Ok(())
/// # }
/// ```
pub struct SqliteExecutor {
    jobs: Option<Sender<SqliteJob>>,
    worker: Option<JoinHandle<()>>,
    interrupt: Arc<InterruptHandle>,
}

impl SqliteExecutor {
    /// Open (or create) a database file
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlite` if the file cannot be opened and
    /// `DbError::Other` if the worker thread cannot be spawned.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        Self::spawn(Connection::open(path)?)
    }

    /// Open a private in-memory database
    ///
    /// # Errors
    ///
    /// See [`SqliteExecutor::open`].
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::spawn(Connection::open_in_memory()?)
    }

    /// Open the database described by the `database` configuration section
    ///
    /// A path of `:memory:` opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// See [`SqliteExecutor::open`].
    pub fn from_config(config: &DatabaseConfig) -> Result<Self, DbError> {
        let conn = if config.path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(&config.path)?
        };
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        log::info!("relquery: opened SQLite database at {}", config.path);
        Self::spawn(conn)
    }

    fn spawn(conn: Connection) -> Result<Self, DbError> {
        let interrupt = Arc::new(conn.get_interrupt_handle());
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = std::thread::Builder::new()
            .name("relquery-sqlite".to_string())
            .spawn(move || run_worker_loop(rx, conn))
            .map_err(|e| DbError::Other(format!("failed to spawn SQLite worker: {e}")))?;

        Ok(Self {
            jobs: Some(tx),
            worker: Some(worker),
            interrupt,
        })
    }

    fn submit(&self, job: SqliteJob) -> Result<(), DbError> {
        self.jobs
            .as_ref()
            .ok_or_else(worker_gone)?
            .send(job)
            .map_err(|_| worker_gone())
    }

    /// Run one or more statements that return no rows (DDL, seeding)
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlite` if any statement fails.
    pub fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        let (reply, response) = crossbeam_channel::bounded(1);
        self.submit(SqliteJob::Batch {
            sql: sql.to_string(),
            reply,
        })?;
        response.recv().map_err(|_| worker_gone())?
    }
}

impl Executor for SqliteExecutor {
    fn execute_until(
        &self,
        sql: &str,
        params: &Params,
        deadline: Option<Instant>,
    ) -> Result<Box<dyn Cursor>, DbError> {
        let params = params
            .iter()
            .map(|(name, value)| Ok((name.to_string(), convert::to_sqlite(value)?)))
            .collect::<Result<Vec<_>, DbError>>()?;

        let abort = Arc::new(AtomicBool::new(false));
        let (ack, ack_rx) = crossbeam_channel::bounded(1);
        let (requests, requests_rx) = crossbeam_channel::bounded(1);
        let (replies, replies_rx) = crossbeam_channel::bounded(1);
        self.submit(SqliteJob::Query {
            sql: sql.to_string(),
            params,
            ack,
            abort: Arc::clone(&abort),
            link: Link {
                requests: requests_rx,
                replies,
                closed: false,
            },
        })?;

        let columns = match deadline {
            Some(deadline) => match ack_rx.recv_deadline(deadline) {
                Ok(acked) => acked?,
                Err(RecvTimeoutError::Timeout) => {
                    log::debug!("relquery: deadline expired during execution, interrupting");
                    abort.store(true, Ordering::Release);
                    self.interrupt.interrupt();
                    // Wait for the worker to let go of the statement
                    drop(requests);
                    while replies_rx.recv().is_ok() {}
                    return Err(DbError::Timeout);
                }
                Err(RecvTimeoutError::Disconnected) => return Err(worker_gone()),
            },
            None => ack_rx.recv().map_err(|_| worker_gone())??,
        };

        Ok(Box::new(SqliteCursor {
            columns,
            requests: Some(requests),
            replies: replies_rx,
            interrupt: Arc::clone(&self.interrupt),
        }))
    }
}

impl Drop for SqliteExecutor {
    fn drop(&mut self) {
        // Closing the queue ends the worker loop
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("relquery: SQLite worker panicked");
            }
        }
    }
}

/// Rows of one statement, pulled from the worker on demand
///
/// The request sender is released once the statement is exhausted, failed or
/// timed out. The worker sees the disconnect and finalizes the statement.
pub struct SqliteCursor {
    columns: Vec<String>,
    requests: Option<Sender<()>>,
    replies: Receiver<Reply>,
    interrupt: Arc<InterruptHandle>,
}

impl SqliteCursor {
    fn decode(&self, values: &[SqlValue]) -> Row {
        let mut row = Row::new();
        for (column, cell) in self.columns.iter().zip(values) {
            row.push(column.clone(), convert::from_sqlite(ValueRef::from(cell)));
        }
        row
    }

    fn close(&mut self) {
        self.requests = None;
    }

    /// Interrupt the statement and wait until the worker has finalized it
    fn abort(&mut self) -> DbError {
        self.interrupt.interrupt();
        self.close();
        while self.replies.recv().is_ok() {}
        DbError::Timeout
    }
}

impl Cursor for SqliteCursor {
    fn next_row(&mut self, deadline: Option<Instant>) -> Result<Option<Row>, DbError> {
        let Some(requests) = &self.requests else {
            return Ok(None);
        };
        if requests.send(()).is_err() {
            self.close();
            return Err(worker_gone());
        }

        let received = match deadline {
            Some(deadline) => match self.replies.recv_deadline(deadline) {
                Ok(reply) => Ok(reply),
                Err(RecvTimeoutError::Timeout) => {
                    log::debug!("relquery: fetch deadline expired, interrupting statement");
                    return Err(self.abort());
                }
                Err(RecvTimeoutError::Disconnected) => Err(worker_gone()),
            },
            None => self.replies.recv().map_err(|_| worker_gone()),
        };

        match received {
            Ok(Reply::Row(values)) => Ok(Some(self.decode(&values))),
            Ok(Reply::Done) => {
                self.close();
                Ok(None)
            }
            Ok(Reply::Failed(e)) | Err(e) => {
                self.close();
                Err(e)
            }
            Ok(Reply::Busy) => Err(DbError::QueryError(
                "a statement opened later is still streaming on this handle".to_string(),
            )),
        }
    }
}
