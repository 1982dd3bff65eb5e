//! SQLite connection implementation.
//!
//! Safe wrappers around SQLite's C API implementing the `Connection` and
//! `TransactionOps` traits from relmodel-core. Statements are executed
//! synchronously under the connection mutex; the returned futures are
//! already resolved.

// FFI code must match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::borrow_as_ptr)]

use crate::types;
use libsqlite3_sys as ffi;
use relmodel_core::{
    Connection, Cx, Error, IsolationLevel, Outcome, Row, TransactionOps, Value,
    error::{
        ConnectionError, ConnectionErrorKind, QueryError, QueryErrorKind, TransactionError,
        TransactionErrorKind,
    },
    row::ColumnInfo,
};
use std::ffi::{CStr, CString, c_int};
use std::future::Future;
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for an in-memory database.
    pub path: String,
    /// Open flags (read-only, read-write, create, etc.)
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds. Zero disables it.
    pub busy_timeout_ms: u32,
    /// Enforce foreign key constraints (`PRAGMA foreign_keys = ON`).
    pub foreign_keys: bool,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    /// Open for reading only.
    pub read_only: bool,
    /// Open for reading and writing.
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Read-write access; the database must exist.
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    /// Read-write access, creating the database if needed.
    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = 0;

        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }

        // Default to read-write if no mode specified
        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }

        flags
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
            foreign_keys: true,
        }
    }
}

impl SqliteConfig {
    /// Config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    #[must_use]
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }
}

struct SqliteInner {
    db: *mut ffi::sqlite3,
    in_transaction: bool,
}

// SAFETY: the handle is only ever used while holding the connection mutex.
unsafe impl Send for SqliteInner {}

/// A connection to a SQLite database.
///
/// All access to the handle goes through an internal mutex, so the
/// connection is `Send + Sync`. At most one transaction is open at a time.
pub struct SqliteConnection {
    inner: Mutex<SqliteInner>,
    path: String,
}

impl SqliteConnection {
    /// Open a connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self, Error> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: "Invalid path: contains null byte".to_string(),
                source: None,
            })
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: valid pointers; the return code is checked
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                error_string(rc)
            } else {
                // SAFETY: db is a handle sqlite3_open_v2 allocated; it is
                // closed right after reading the message.
                unsafe {
                    let msg = errmsg(db);
                    ffi::sqlite3_close(db);
                    msg
                }
            };

            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("Failed to open database: {}", msg),
                source: None,
            }));
        }

        if config.busy_timeout_ms > 0 {
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, config.busy_timeout_ms as c_int);
            }
        }

        let conn = Self {
            inner: Mutex::new(SqliteInner {
                db,
                in_transaction: false,
            }),
            path: config.path.clone(),
        };
        if config.foreign_keys {
            conn.execute_raw("PRAGMA foreign_keys = ON")?;
        }

        tracing::debug!(
            path = %conn.path,
            foreign_keys = config.foreign_keys,
            "Opened SQLite database"
        );
        Ok(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, Error> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self, Error> {
        Self::open(&SqliteConfig::file(path))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Is a transaction currently open on this connection?
    pub fn in_transaction(&self) -> bool {
        self.lock().in_transaction
    }

    /// Execute one or more statements without parameters (DDL, pragmas).
    pub fn execute_raw(&self, sql: &str) -> Result<(), Error> {
        let inner = self.lock();
        exec(inner.db, sql)
    }

    /// Rowid of the most recent successful INSERT.
    pub fn last_insert_rowid(&self) -> i64 {
        let inner = self.lock();
        // SAFETY: db is valid
        unsafe { ffi::sqlite3_last_insert_rowid(inner.db) }
    }

    /// Number of rows changed by the most recent statement.
    pub fn changes(&self) -> u64 {
        let inner = self.lock();
        // SAFETY: db is valid
        let changes = unsafe { ffi::sqlite3_changes(inner.db) };
        u64::try_from(changes).unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, SqliteInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn query_sync(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, Error> {
        let inner = self.lock();
        let stmt = Statement::prepare(inner.db, sql)?;
        stmt.bind_all(params)?;

        // SAFETY: stmt is valid
        let col_count = unsafe { ffi::sqlite3_column_count(stmt.raw) };
        let names = (0..col_count)
            .map(|i| {
                // SAFETY: stmt is valid and i is in range
                unsafe { types::column_name(stmt.raw, i) }.unwrap_or_else(|| format!("col{}", i))
            })
            .collect();
        let columns = Arc::new(ColumnInfo::new(names));

        let mut rows = Vec::new();
        loop {
            // SAFETY: stmt is valid
            match unsafe { ffi::sqlite3_step(stmt.raw) } {
                ffi::SQLITE_ROW => {
                    let values = (0..col_count)
                        // SAFETY: the statement is positioned on a row
                        .map(|i| unsafe { types::read_column(stmt.raw, i) })
                        .collect();
                    rows.push(Row::with_columns(Arc::clone(&columns), values));
                }
                ffi::SQLITE_DONE => break,
                _ => return Err(last_error(inner.db, sql)),
            }
        }

        tracing::trace!(sql = %sql, rows = rows.len(), "SQLite query");
        Ok(rows)
    }

    fn execute_sync(&self, sql: &str, params: &[Value]) -> Result<u64, Error> {
        self.run_statement(sql, params).map(|(changes, _)| changes)
    }

    fn insert_sync(&self, sql: &str, params: &[Value]) -> Result<i64, Error> {
        self.run_statement(sql, params).map(|(_, rowid)| rowid)
    }

    /// Step a statement to completion; returns (changes, last rowid).
    fn run_statement(&self, sql: &str, params: &[Value]) -> Result<(u64, i64), Error> {
        let inner = self.lock();
        let stmt = Statement::prepare(inner.db, sql)?;
        stmt.bind_all(params)?;

        // SAFETY: stmt is valid
        match unsafe { ffi::sqlite3_step(stmt.raw) } {
            ffi::SQLITE_DONE | ffi::SQLITE_ROW => {
                // SAFETY: db is valid
                let (changes, rowid) = unsafe {
                    (
                        ffi::sqlite3_changes(inner.db),
                        ffi::sqlite3_last_insert_rowid(inner.db),
                    )
                };
                tracing::trace!(sql = %sql, changes, "SQLite execute");
                Ok((u64::try_from(changes).unwrap_or(0), rowid))
            }
            _ => Err(last_error(inner.db, sql)),
        }
    }

    fn begin_sync(&self, isolation: IsolationLevel) -> Result<(), Error> {
        let mut inner = self.lock();
        if inner.in_transaction {
            return Err(transaction_error(
                TransactionErrorKind::Begin,
                "Already in a transaction".to_string(),
            ));
        }

        // SQLite has no isolation levels; approximate with locking modes
        let begin_sql = match isolation {
            IsolationLevel::Serializable => "BEGIN EXCLUSIVE",
            IsolationLevel::RepeatableRead | IsolationLevel::ReadCommitted => "BEGIN IMMEDIATE",
            IsolationLevel::ReadUncommitted => "BEGIN DEFERRED",
        };

        exec(inner.db, begin_sql)
            .map_err(|e| transaction_error(TransactionErrorKind::Begin, e.to_string()))?;
        inner.in_transaction = true;
        tracing::trace!(sql = begin_sql, "SQLite transaction started");
        Ok(())
    }

    /// Commit the open transaction. If COMMIT fails the transaction is rolled
    /// back so the connection is left usable.
    fn commit_sync(&self) -> Result<(), Error> {
        let mut inner = self.lock();
        if !inner.in_transaction {
            return Err(transaction_error(
                TransactionErrorKind::Finished,
                "Not in a transaction".to_string(),
            ));
        }
        inner.in_transaction = false;

        if let Err(e) = exec(inner.db, "COMMIT") {
            if let Err(rollback) = exec(inner.db, "ROLLBACK") {
                tracing::warn!(error = %rollback, "Rollback after failed commit failed");
            }
            return Err(transaction_error(TransactionErrorKind::Commit, e.to_string()));
        }
        Ok(())
    }

    fn rollback_sync(&self) -> Result<(), Error> {
        let mut inner = self.lock();
        if !inner.in_transaction {
            return Err(transaction_error(
                TransactionErrorKind::Finished,
                "Not in a transaction".to_string(),
            ));
        }
        inner.in_transaction = false;

        exec(inner.db, "ROLLBACK")
            .map_err(|e| transaction_error(TransactionErrorKind::Rollback, e.to_string()))
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        let inner = self.lock();
        if !inner.db.is_null() {
            // SAFETY: db is valid and never used after this point
            unsafe {
                ffi::sqlite3_close(inner.db);
            }
        }
    }
}

/// A SQLite transaction.
///
/// Rolls back when dropped without [`commit`](TransactionOps::commit) or
/// [`rollback`](TransactionOps::rollback).
pub struct SqliteTransaction<'conn> {
    conn: &'conn SqliteConnection,
    finished: bool,
}

impl<'conn> SqliteTransaction<'conn> {
    fn new(conn: &'conn SqliteConnection) -> Self {
        Self {
            conn,
            finished: false,
        }
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(path = %self.conn.path, "Rolling back unfinished transaction");
            if let Err(e) = self.conn.rollback_sync() {
                tracing::warn!(error = %e, "Rollback on drop failed");
            }
        }
    }
}

/// Resolve a synchronous driver call into an outcome, honouring cancellation
/// requested on `cx` before the call.
fn run<T, F>(cx: &Cx, op: F) -> impl Future<Output = Outcome<T, Error>> + Send
where
    T: Send,
    F: FnOnce() -> Result<T, Error>,
{
    let outcome = match cx.cancel_reason() {
        Some(reason) => Outcome::Cancelled(reason),
        None => op().map_or_else(Outcome::Err, Outcome::Ok),
    };
    async move { outcome }
}

impl Connection for SqliteConnection {
    type Tx<'conn>
        = SqliteTransaction<'conn>
    where
        Self: 'conn;

    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        run(cx, move || self.query_sync(sql, params))
    }

    fn query_one(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        run(cx, move || {
            self.query_sync(sql, params)
                .map(|rows| rows.into_iter().next())
        })
    }

    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        run(cx, move || self.execute_sync(sql, params))
    }

    fn insert(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        run(cx, move || self.insert_sync(sql, params))
    }

    fn begin_with(
        &self,
        cx: &Cx,
        isolation: IsolationLevel,
    ) -> impl Future<Output = Outcome<Self::Tx<'_>, Error>> + Send {
        run(cx, move || {
            self.begin_sync(isolation)
                .map(|()| SqliteTransaction::new(self))
        })
    }
}

impl TransactionOps for SqliteTransaction<'_> {
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        run(cx, move || self.conn.query_sync(sql, params))
    }

    fn query_one(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        run(cx, move || {
            self.conn
                .query_sync(sql, params)
                .map(|rows| rows.into_iter().next())
        })
    }

    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        run(cx, move || self.conn.execute_sync(sql, params))
    }

    fn insert(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        run(cx, move || self.conn.insert_sync(sql, params))
    }

    async fn commit(mut self, _cx: &Cx) -> Outcome<(), Error> {
        self.finished = true;
        self.conn
            .commit_sync()
            .map_or_else(Outcome::Err, Outcome::Ok)
    }

    async fn rollback(mut self, _cx: &Cx) -> Outcome<(), Error> {
        self.finished = true;
        self.conn
            .rollback_sync()
            .map_or_else(Outcome::Err, Outcome::Ok)
    }
}

/// Prepared statement, finalized on drop.
struct Statement {
    raw: *mut ffi::sqlite3_stmt,
    db: *mut ffi::sqlite3,
    sql: String,
}

impl Statement {
    fn prepare(db: *mut ffi::sqlite3, sql: &str) -> Result<Self, Error> {
        let c_sql = CString::new(sql).map_err(|_| {
            Error::Query(QueryError {
                kind: QueryErrorKind::Syntax,
                sql: Some(sql.to_string()),
                code: None,
                message: "SQL contains null byte".to_string(),
                source: None,
            })
        })?;

        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();

        // SAFETY: all pointers are valid
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                db,
                c_sql.as_ptr(),
                c_sql.as_bytes().len() as c_int,
                &mut raw,
                ptr::null_mut(),
            )
        };

        if rc != ffi::SQLITE_OK {
            let mut err = last_error(db, sql);
            if let Error::Query(q) = &mut err {
                if q.kind == QueryErrorKind::Database {
                    q.kind = QueryErrorKind::Syntax;
                }
            }
            return Err(err);
        }

        Ok(Self {
            raw,
            db,
            sql: sql.to_string(),
        })
    }

    fn bind_all(&self, params: &[Value]) -> Result<(), Error> {
        for (i, param) in params.iter().enumerate() {
            // SAFETY: raw is valid; index is 1-based
            let rc = unsafe { types::bind_value(self.raw, (i + 1) as c_int, param) };
            if rc != ffi::SQLITE_OK {
                return Err(Error::Query(QueryError {
                    kind: QueryErrorKind::Database,
                    sql: Some(self.sql.clone()),
                    code: Some(rc),
                    // SAFETY: db is valid
                    message: format!("Failed to bind parameter {}: {}", i + 1, unsafe {
                        errmsg(self.db)
                    }),
                    source: None,
                }));
            }
        }
        Ok(())
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        // SAFETY: raw came from sqlite3_prepare_v2 (null is a no-op)
        unsafe {
            ffi::sqlite3_finalize(self.raw);
        }
    }
}

fn exec(db: *mut ffi::sqlite3, sql: &str) -> Result<(), Error> {
    let c_sql = CString::new(sql).map_err(|_| {
        Error::Query(QueryError {
            kind: QueryErrorKind::Syntax,
            sql: Some(sql.to_string()),
            code: None,
            message: "SQL contains null byte".to_string(),
            source: None,
        })
    })?;

    let mut errmsg_ptr: *mut std::ffi::c_char = ptr::null_mut();

    // SAFETY: all pointers are valid
    let rc = unsafe {
        ffi::sqlite3_exec(db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg_ptr)
    };

    if rc == ffi::SQLITE_OK {
        return Ok(());
    }

    let message = if errmsg_ptr.is_null() {
        error_string(rc)
    } else {
        // SAFETY: errmsg_ptr was allocated by SQLite and is freed once copied
        unsafe {
            let msg = CStr::from_ptr(errmsg_ptr).to_string_lossy().into_owned();
            ffi::sqlite3_free(errmsg_ptr.cast());
            msg
        }
    };

    Err(Error::Query(QueryError {
        kind: error_code_to_kind(rc, &message),
        sql: Some(sql.to_string()),
        code: Some(rc),
        message,
        source: None,
    }))
}

/// # Safety
/// `db` must be a valid handle.
unsafe fn errmsg(db: *mut ffi::sqlite3) -> String {
    // SAFETY: caller guarantees db is valid; errmsg returns a valid C string
    unsafe { CStr::from_ptr(ffi::sqlite3_errmsg(db)) }
        .to_string_lossy()
        .into_owned()
}

fn error_string(rc: c_int) -> String {
    // SAFETY: sqlite3_errstr returns a static string for any code
    unsafe { CStr::from_ptr(ffi::sqlite3_errstr(rc)) }
        .to_string_lossy()
        .into_owned()
}

fn last_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let (message, code) = unsafe { (errmsg(db), ffi::sqlite3_extended_errcode(db)) };

    Error::Query(QueryError {
        kind: error_code_to_kind(code, &message),
        sql: Some(sql.to_string()),
        code: Some(code),
        message,
        source: None,
    })
}

fn error_code_to_kind(code: c_int, message: &str) -> QueryErrorKind {
    match code & 0xff {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Busy,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        ffi::SQLITE_ERROR if message.starts_with("no such") => QueryErrorKind::NotFound,
        _ => QueryErrorKind::Database,
    }
}

fn transaction_error(kind: TransactionErrorKind, message: String) -> Error {
    Error::Transaction(TransactionError { kind, message })
}
