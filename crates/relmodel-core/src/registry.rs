//! Entity metadata registry.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::entity::EntityType;
use crate::error::{Error, Result};
use crate::relation::{RelationDescriptor, TypeResolver};

/// Registered entity types, keyed by type name.
///
/// Registration validates a declaration once; later lookups are read-only and
/// safe from any thread.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    types: RwLock<HashMap<String, Arc<EntityType>>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry.
    pub fn global() -> Arc<EntityRegistry> {
        static GLOBAL: OnceLock<Arc<EntityRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(EntityRegistry::new())))
    }

    /// Validate and cache `entity_type`.
    ///
    /// Re-registering a known name returns the cached type unchanged.
    pub fn register(&self, entity_type: EntityType) -> Result<Arc<EntityType>> {
        if let Some(existing) = self.get(entity_type.name()) {
            tracing::trace!(entity = %entity_type.name(), "Entity type already registered");
            return Ok(existing);
        }
        entity_type.validate()?;

        let mut types = self.types.write().unwrap_or_else(|e| e.into_inner());
        let registered = types
            .entry(entity_type.name().to_string())
            .or_insert_with(|| Arc::new(entity_type));
        tracing::debug!(
            entity = %registered.name(),
            table = %registered.table(),
            relations = registered.relations().len(),
            "Registered entity type"
        );
        Ok(Arc::clone(registered))
    }

    pub fn get(&self, name: &str) -> Option<Arc<EntityType>> {
        self.types
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Like [`get`](Self::get), failing with `UnknownEntity`.
    pub fn require(&self, name: &str) -> Result<Arc<EntityType>> {
        self.get(name).ok_or_else(|| Error::unknown_entity(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .types
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Look up relation `relation` of registered type `entity`.
    pub fn describe_relation(
        &self,
        entity: &str,
        relation: &str,
    ) -> Result<Arc<RelationDescriptor>> {
        self.require(entity)?.describe_relation(relation)
    }

    /// A relation target resolver that looks `name` up in this registry.
    pub fn resolver(self: &Arc<Self>, name: &str) -> TypeResolver {
        let registry = Arc::clone(self);
        let name = name.to_string();
        Arc::new(move || registry.require(&name))
    }
}
