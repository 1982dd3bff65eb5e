//! Entity graph factories for relmodel.
//!
//! An [`EntityFactory`] knows how to instantiate one entity type and which
//! builders supply its related types. Its [`FactoryBuilder`] marks relations
//! with a count and a [`Customizer`], then either makes an unsaved graph or
//! creates it inside a single persistence session.
//!
//! ```rust,ignore
//! let user = users
//!     .with("skills", 2, vec![attrs! { "name" => "Dancing" }, attrs! { "name" => "Programming" }])?
//!     .create(&cx, &conn)
//!     .await?;
//! assert_eq!(user.related("skills").map(<[_]>::len), Some(2));
//! ```

pub mod builder;
pub mod customizer;
pub mod factory;

pub use builder::FactoryBuilder;
pub use customizer::{ApplyFn, Customizer, NestedFn};
pub use factory::{EntityFactory, InstantiateFn, RelatedSupplier, StateFn};
