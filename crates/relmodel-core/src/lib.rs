//! Core types and traits for relmodel.
//!
//! - `EntityType` / `Entity` for table mapping and in-memory instances
//! - `RelationDescriptor` for relation kinds and their storage linkage
//! - `EntityRegistry` for validated, shared type metadata
//! - `Connection` / `TransactionOps` storage adapter traits
//! - `Outcome` and `Cx` re-exported from asupersync

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

/// Build an [`Attributes`] map from `key => value` pairs.
///
/// ```rust,ignore
/// let attrs = attrs! { "name" => "Dancing", "level" => 3i64 };
/// ```
#[macro_export]
macro_rules! attrs {
    () => {
        $crate::Attributes::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut attrs = $crate::Attributes::new();
        $(
            attrs.insert(::std::string::String::from($key), $crate::Value::from($value));
        )+
        attrs
    }};
}

pub mod connection;
pub mod entity;
pub mod error;
pub mod identifiers;
pub mod registry;
pub mod relation;
pub mod row;
pub mod value;

pub use connection::{Connection, IsolationLevel, TransactionOps};
pub use entity::{Attributes, ColumnDef, Entity, EntityType, RelatedSet};
pub use error::{
    ConnectionError, ConnectionErrorKind, CustomizerError, Error, QueryError,
    QueryErrorKind, RelationError, RelationErrorKind, Result, SchemaError, SchemaErrorKind,
    TransactionError, TransactionErrorKind, TypeError,
};
pub use identifiers::{quote_ident, to_snake_case, validate_identifier};
pub use registry::EntityRegistry;
pub use relation::{Linkage, PivotTable, RelationDescriptor, RelationKind, TypeResolver};
pub use row::{FromValue, Row};
pub use value::Value;
