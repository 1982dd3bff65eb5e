//! SQLite storage adapter for relmodel.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! Implements the `Connection` and `TransactionOps` traits from relmodel-core
//! over the bundled SQLite library from `libsqlite3-sys`.
//!
//! # Features
//!
//! - `$n` positional parameters
//! - Transactions that roll back when dropped unfinished
//! - Constraint failures reported as `QueryErrorKind::Constraint`
//! - In-memory and file-based databases, foreign keys on by default
//!
//! # Example
//!
//! ```rust,ignore
//! use relmodel_sqlite::SqliteConnection;
//! use relmodel_core::{Connection, Value, Cx, Outcome};
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute_raw("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
//!
//! let cx = Cx::for_testing();
//! match conn.insert(&cx, "INSERT INTO users (name) VALUES ($1)", &[Value::from("Alice")]).await {
//!     Outcome::Ok(id) => println!("Inserted user with id: {}", id),
//!     Outcome::Err(e) => eprintln!("Error: {}", e),
//!     _ => {}
//! }
//! ```

pub mod connection;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection, SqliteTransaction};

/// Version string of the linked SQLite library.
pub fn sqlite_version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a pointer to a static string
    unsafe { std::ffi::CStr::from_ptr(libsqlite3_sys::sqlite3_libversion()) }
        .to_str()
        .unwrap_or("unknown")
}
