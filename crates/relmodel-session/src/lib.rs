//! Transactional persistence for relmodel entity graphs.
//!
//! - [`PersistenceSession`] owns one transaction and inserts entity and join rows
//! - [`link`] holds the per-relation-kind linking strategies
//! - [`GraphPersister`] walks a graph depth-first inside one session and rolls
//!   the whole session back on any failure
//!
//! ```rust,ignore
//! let persister = GraphPersister::new(SessionConfig::default());
//! let user = persister.create(&cx, &conn, user).await?;
//! assert!(user.is_graph_persisted());
//! ```

use asupersync::Outcome;
use relmodel_core::{Error, Result};

/// Unwrap an `Outcome::Ok`, returning any other outcome from the enclosing
/// function or async block.
macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            Outcome::Ok(value) => value,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    };
}

pub mod link;
pub mod persister;
pub mod session;

#[cfg(test)]
mod testing;

pub use link::LinkPhase;
pub use persister::GraphPersister;
pub use session::{PersistenceSession, SessionConfig, SessionStats};

/// Lift a synchronous result into an outcome.
pub(crate) fn lift<T>(result: Result<T>) -> Outcome<T, Error> {
    result.map_or_else(Outcome::Err, Outcome::Ok)
}
