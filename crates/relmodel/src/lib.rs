//! relmodel - relation-aware entity persistence for SQL databases.
//!
//! relmodel maps entity types onto tables, resolves their relations lazily,
//! and builds whole object graphs that are either kept in memory (`make`) or
//! written in a single all-or-nothing transaction (`create`):
//!
//! - Entity types and relation descriptors registered once, shared read-only
//! - One-to-one, one-to-many, belongs-to and many-to-many linkage with
//!   conventional default key and join table names
//! - Join table extras attached to many-to-many members
//! - Factories with per-relation counts, customizers, states and nesting
//!
//! # Quick Start
//!
//! ```ignore
//! use relmodel::prelude::*;
//!
//! let registry = EntityRegistry::global();
//! let skills = registry.resolver("Skill");
//! let user_type = registry.register(
//!     EntityType::new("User", "users")
//!         .column(ColumnDef::new("name"))
//!         .relation(RelationDescriptor::many_to_many("skills", move || skills()).pivot_columns(["level"])),
//! )?;
//! let skill_type = registry.register(EntityType::new("Skill", "skills").column(ColumnDef::new("name")))?;
//!
//! let skill_factory = EntityFactory::new(skill_type.clone(), move |_, _| Ok(Entity::new(skill_type.clone()))).build();
//! let users = EntityFactory::new(user_type.clone(), move |_, _| Ok(Entity::new(user_type.clone())))
//!     .related("skills", move || skill_factory.clone())?
//!     .build();
//!
//! let user = users
//!     .with("skills", 2, vec![
//!         attrs! { "name" => "Dancing", "level" => 1i64 },
//!         attrs! { "name" => "Programming", "level" => 3i64 },
//!     ])?
//!     .create(&cx, &conn)
//!     .await;
//! ```

// Re-export all public types from sub-crates
pub use relmodel_core::{
    Attributes, ColumnDef, Connection, Cx, Entity, EntityRegistry, EntityType, Error,
    IsolationLevel, Linkage, Outcome, PivotTable, RelatedSet, RelationDescriptor, RelationError,
    RelationErrorKind, RelationKind, Result, Row, SchemaError, SchemaErrorKind, TransactionOps,
    Value, attrs, quote_ident, to_snake_case,
};

pub use relmodel_session::{
    GraphPersister, LinkPhase, PersistenceSession, SessionConfig, SessionStats,
};

pub use relmodel_factory::{Customizer, EntityFactory, FactoryBuilder};

/// Commonly used types, traits and macros.
pub mod prelude {
    pub use crate::{
        Attributes, ColumnDef, Connection, Customizer, Cx, Entity, EntityFactory,
        EntityRegistry, EntityType, Error, FactoryBuilder, GraphPersister, IsolationLevel,
        Outcome, RelationDescriptor, RelationKind, Result, SessionConfig, Value, attrs,
    };
}
