//! Error types for relmodel operations.

use std::fmt;

/// The primary error type for all relmodel operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (open, configure, disconnect)
    Connection(ConnectionError),
    /// Query execution errors
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Transaction errors
    Transaction(TransactionError),
    /// Invalid entity type declarations
    Schema(SchemaError),
    /// Relation resolution and factory configuration errors
    Relation(RelationError),
    /// Errors raised by user-supplied customizers
    Customizer(CustomizerError),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    /// Driver-specific result code, if any
    pub code: Option<i32>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (not null, unique, foreign key, check)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Database is locked or busy
    Busy,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// Could not start a transaction
    Begin,
    /// Commit failed
    Commit,
    /// Rollback failed
    Rollback,
    /// Session has already been finished
    Finished,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Table, column or relation name is not a valid identifier
    InvalidIdentifier,
    /// Primary key is not one of the declared columns
    MissingPrimaryKey,
    /// Column or relation declared twice
    Duplicate,
    /// Linkage could not be resolved
    InvalidLinkage,
}

/// Relation resolution and factory configuration error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationError {
    pub kind: RelationErrorKind,
    /// Entity type the lookup was made on
    pub entity: String,
    /// Relation, state or type name that failed to resolve
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationErrorKind {
    /// Relation name is not declared on the entity type
    UnknownRelation,
    /// Entity type is not registered
    UnknownEntity,
    /// Relation is declared but no related factory was supplied
    MissingFactory,
    /// Related factory builds a different entity type than the relation targets
    TypeMismatch,
    /// Named factory state was never registered
    UnknownState,
}

/// Error raised from a customizer or instantiation callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomizerError {
    pub message: String,
}

impl Error {
    /// Build a customizer error from user code.
    pub fn customizer(message: impl Into<String>) -> Self {
        Error::Customizer(CustomizerError {
            message: message.into(),
        })
    }

    /// Build an `UnknownRelation` error.
    pub fn unknown_relation(entity: &str, relation: &str) -> Self {
        Error::Relation(RelationError {
            kind: RelationErrorKind::UnknownRelation,
            entity: entity.to_string(),
            name: relation.to_string(),
            message: format!("entity '{entity}' has no relation named '{relation}'"),
        })
    }

    /// Build an `UnknownEntity` error.
    pub fn unknown_entity(entity: &str) -> Self {
        Error::Relation(RelationError {
            kind: RelationErrorKind::UnknownEntity,
            entity: entity.to_string(),
            name: entity.to_string(),
            message: format!("entity type '{entity}' is not registered"),
        })
    }

    /// Build a `MissingFactory` error.
    pub fn missing_factory(entity: &str, relation: &str) -> Self {
        Error::Relation(RelationError {
            kind: RelationErrorKind::MissingFactory,
            entity: entity.to_string(),
            name: relation.to_string(),
            message: format!("no related factory supplied for '{entity}.{relation}'"),
        })
    }

    /// Build a `TypeMismatch` error.
    pub fn type_mismatch(entity: &str, relation: &str, expected: &str, actual: &str) -> Self {
        Error::Relation(RelationError {
            kind: RelationErrorKind::TypeMismatch,
            entity: entity.to_string(),
            name: relation.to_string(),
            message: format!(
                "relation '{entity}.{relation}' targets '{expected}' but its factory builds '{actual}'"
            ),
        })
    }

    /// Build an `UnknownState` error.
    pub fn unknown_state(entity: &str, state: &str) -> Self {
        Error::Relation(RelationError {
            kind: RelationErrorKind::UnknownState,
            entity: entity.to_string(),
            name: state.to_string(),
            message: format!("factory for '{entity}' has no state named '{state}'"),
        })
    }

    /// Relation error kind, if this is a relation error.
    pub fn relation_kind(&self) -> Option<RelationErrorKind> {
        match self {
            Error::Relation(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Is this a constraint violation reported by storage?
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Error::Query(q) => q.kind == QueryErrorKind::Constraint,
            _ => false,
        }
    }

    /// Is this a connection error that likely requires reconnection?
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(code) = e.code {
                    write!(f, "Query error (code {}): {}", code, e.message)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Schema(e) => write!(f, "Schema error: {}", e.message),
            Error::Relation(e) => write!(f, "Relation error: {}", e.message),
            Error::Customizer(e) => write!(f, "Customizer error: {}", e.message),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for RelationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for CustomizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<RelationError> for Error {
    fn from(err: RelationError) -> Self {
        Error::Relation(err)
    }
}

impl From<CustomizerError> for Error {
    fn from(err: CustomizerError) -> Self {
        Error::Customizer(err)
    }
}

/// Result type alias for relmodel operations.
pub type Result<T> = std::result::Result<T, Error>;
