//! Per-attachment customization of related instances.

use std::fmt;
use std::sync::Arc;

use relmodel_core::{Attributes, Entity, Result};

use crate::builder::FactoryBuilder;

/// Callback run on each produced related instance with its index.
pub type ApplyFn = Arc<dyn Fn(&mut Entity, usize) -> Result<()> + Send + Sync>;

/// Callback reshaping the related builder before any instance is produced.
pub type NestedFn = Arc<dyn Fn(FactoryBuilder) -> Result<FactoryBuilder> + Send + Sync>;

/// How related instances of one attachment are customized.
#[derive(Clone, Default)]
pub enum Customizer {
    /// Instances are produced as the related factory makes them.
    #[default]
    None,
    /// The same attributes for every instance.
    Attrs(Attributes),
    /// Entry `i` for the `i`-th instance; instances past the end get none.
    Batch(Vec<Attributes>),
    /// A fallible callback per instance.
    Apply(ApplyFn),
    /// A fallible transformation of the related builder, e.g. to attach
    /// relations of the related instances.
    Nested(NestedFn),
}

impl Customizer {
    pub fn apply<F>(f: F) -> Self
    where
        F: Fn(&mut Entity, usize) -> Result<()> + Send + Sync + 'static,
    {
        Customizer::Apply(Arc::new(f))
    }

    pub fn nested<F>(f: F) -> Self
    where
        F: Fn(FactoryBuilder) -> Result<FactoryBuilder> + Send + Sync + 'static,
    {
        Customizer::Nested(Arc::new(f))
    }

    /// Attributes handed to the related instantiation for instance `index`.
    pub(crate) fn attributes_for(&self, index: usize) -> Option<&Attributes> {
        match self {
            Customizer::Attrs(attrs) => Some(attrs),
            Customizer::Batch(list) => list.get(index),
            Customizer::None | Customizer::Apply(_) | Customizer::Nested(_) => None,
        }
    }

    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Customizer::None => "none",
            Customizer::Attrs(_) => "attrs",
            Customizer::Batch(_) => "batch",
            Customizer::Apply(_) => "apply",
            Customizer::Nested(_) => "nested",
        }
    }
}

impl From<Attributes> for Customizer {
    fn from(attrs: Attributes) -> Self {
        Customizer::Attrs(attrs)
    }
}

impl From<Vec<Attributes>> for Customizer {
    fn from(list: Vec<Attributes>) -> Self {
        Customizer::Batch(list)
    }
}

impl fmt::Debug for Customizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Customizer::Attrs(attrs) => f.debug_tuple("Attrs").field(attrs).finish(),
            Customizer::Batch(list) => f.debug_tuple("Batch").field(list).finish(),
            other => f.write_str(other.name()),
        }
    }
}
