//! Entity factory definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use relmodel_core::{Attributes, Entity, EntityType, Error, Result};

use crate::builder::FactoryBuilder;

/// Produces a fresh instance. Receives the owner when the instance is made
/// for a relation, and the attributes a customizer or merge supplied.
pub type InstantiateFn =
    Arc<dyn Fn(Option<&Entity>, Option<&Attributes>) -> Result<Entity> + Send + Sync>;

/// Lazily supplies the builder for a related entity type.
pub type RelatedSupplier = Arc<dyn Fn() -> FactoryBuilder + Send + Sync>;

/// Named modification applied to a fresh instance.
pub type StateFn = Arc<dyn Fn(&mut Entity) + Send + Sync>;

/// Factory definition for one entity type.
///
/// ```rust,ignore
/// let skills = EntityFactory::new(skill_type, |_, attrs| { ... }).build();
/// let users = EntityFactory::new(user_type, |_, _| Ok(Entity::new(user_type.clone())))
///     .related("skills", move || skills.clone())?
///     .build();
/// let user = users.with("skills", 2, Customizer::None)?.make()?;
/// ```
pub struct EntityFactory {
    entity_type: Arc<EntityType>,
    instantiate: InstantiateFn,
    relations: BTreeMap<String, RelatedSupplier>,
    states: BTreeMap<String, StateFn>,
}

impl EntityFactory {
    pub fn new<F>(entity_type: Arc<EntityType>, instantiate: F) -> Self
    where
        F: Fn(Option<&Entity>, Option<&Attributes>) -> Result<Entity> + Send + Sync + 'static,
    {
        Self {
            entity_type,
            instantiate: Arc::new(instantiate),
            relations: BTreeMap::new(),
            states: BTreeMap::new(),
        }
    }

    /// Register the builder supplier for relation `name`.
    ///
    /// Fails with `UnknownRelation` if the entity type does not declare it.
    pub fn related<F>(mut self, name: &str, supplier: F) -> Result<Self>
    where
        F: Fn() -> FactoryBuilder + Send + Sync + 'static,
    {
        self.entity_type.describe_relation(name)?;
        self.relations.insert(name.to_string(), Arc::new(supplier));
        Ok(self)
    }

    /// Register a named state.
    #[must_use]
    pub fn state<F>(mut self, name: &str, state: F) -> Self
    where
        F: Fn(&mut Entity) + Send + Sync + 'static,
    {
        self.states.insert(name.to_string(), Arc::new(state));
        self
    }

    pub fn build(self) -> FactoryBuilder {
        FactoryBuilder::new(Arc::new(self))
    }

    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    pub(crate) fn supplier(&self, relation: &str) -> Result<&RelatedSupplier> {
        self.relations
            .get(relation)
            .ok_or_else(|| Error::missing_factory(self.entity_type.name(), relation))
    }

    pub(crate) fn state_fn(&self, name: &str) -> Result<&StateFn> {
        self.states
            .get(name)
            .ok_or_else(|| Error::unknown_state(self.entity_type.name(), name))
    }

    /// Run the instantiation callback and check the instance's type.
    pub(crate) fn instantiate(
        &self,
        parent: Option<&Entity>,
        attributes: Option<&Attributes>,
    ) -> Result<Entity> {
        let entity = (self.instantiate)(parent, attributes)?;
        if entity.entity_type().name() != self.entity_type.name() {
            return Err(Error::type_mismatch(
                self.entity_type.name(),
                "instantiate",
                self.entity_type.name(),
                entity.entity_type().name(),
            ));
        }
        Ok(entity)
    }
}

impl fmt::Debug for EntityFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityFactory")
            .field("entity", &self.entity_type.name())
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
