//! Graph builder: produces unsaved graphs (`make`) and persists them (`create`).

use std::sync::Arc;

use asupersync::{Cx, Outcome};
use relmodel_core::{
    Attributes, Connection, Entity, EntityType, Error, RelationDescriptor, Result,
};
use relmodel_session::{GraphPersister, SessionConfig};

use crate::customizer::Customizer;
use crate::factory::EntityFactory;

/// A relation marked for the next build.
#[derive(Debug, Clone)]
struct Attachment {
    descriptor: Arc<RelationDescriptor>,
    count: usize,
    customizer: Customizer,
}

/// Builder for graphs rooted at one entity type.
///
/// Builders are values: every configuration method returns a new builder and
/// every `make` produces a fresh graph.
#[derive(Debug, Clone)]
pub struct FactoryBuilder {
    factory: Arc<EntityFactory>,
    attachments: Vec<Attachment>,
    merge: Attributes,
    states: Vec<String>,
    session: SessionConfig,
}

impl FactoryBuilder {
    pub(crate) fn new(factory: Arc<EntityFactory>) -> Self {
        Self {
            factory,
            attachments: Vec::new(),
            merge: Attributes::new(),
            states: Vec::new(),
            session: SessionConfig::default(),
        }
    }

    pub fn entity_type(&self) -> &Arc<EntityType> {
        self.factory.entity_type()
    }

    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    /// Attach `count` instances of `relation` to every graph this builder
    /// produces.
    ///
    /// A second call for the same relation replaces the first.
    pub fn with(
        mut self,
        relation: &str,
        count: usize,
        customizer: impl Into<Customizer>,
    ) -> Result<Self> {
        let descriptor = self.entity_type().describe_relation(relation)?;
        self.factory.supplier(relation)?;

        let attachment = Attachment {
            descriptor,
            count,
            customizer: customizer.into(),
        };
        match self
            .attachments
            .iter_mut()
            .find(|a| a.descriptor.name() == relation)
        {
            Some(existing) => *existing = attachment,
            None => self.attachments.push(attachment),
        }
        Ok(self)
    }

    /// Shorthand for `with(relation, 1, Customizer::None)`.
    pub fn with_one(self, relation: &str) -> Result<Self> {
        self.with(relation, 1, Customizer::None)
    }

    /// Attributes merged over every root instance.
    #[must_use]
    pub fn merge(mut self, attrs: Attributes) -> Self {
        self.merge.extend(attrs);
        self
    }

    /// Apply a state registered on the factory to every root instance.
    pub fn apply(mut self, state: &str) -> Result<Self> {
        self.factory.state_fn(state)?;
        self.states.push(state.to_string());
        Ok(self)
    }

    #[must_use]
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session = config;
        self
    }

    /// Produce an unsaved graph.
    pub fn make(&self) -> Result<Entity> {
        let entity = self.make_with(None, None)?;
        tracing::debug!(
            entity = %entity.entity_type().name(),
            size = entity.graph_size(),
            "Made entity graph"
        );
        Ok(entity)
    }

    /// Produce `n` independent unsaved graphs.
    pub fn make_many(&self, n: usize) -> Result<Vec<Entity>> {
        (0..n).map(|_| self.make()).collect()
    }

    /// Produce a graph and persist it in one session.
    pub async fn create<C: Connection>(&self, cx: &Cx, conn: &C) -> Outcome<Entity, Error> {
        let root = match self.make() {
            Ok(root) => root,
            Err(e) => return Outcome::Err(e),
        };
        GraphPersister::new(self.session.clone())
            .create(cx, conn, root)
            .await
    }

    /// Produce `n` graphs and persist all of them in one session.
    pub async fn create_many<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        n: usize,
    ) -> Outcome<Vec<Entity>, Error> {
        let roots = match self.make_many(n) {
            Ok(roots) => roots,
            Err(e) => return Outcome::Err(e),
        };
        GraphPersister::new(self.session.clone())
            .create_all(cx, conn, roots)
            .await
    }

    fn make_with(&self, parent: Option<&Entity>, attrs: Option<&Attributes>) -> Result<Entity> {
        let attrs = match (self.merge.is_empty(), attrs) {
            (true, None) => None,
            (true, Some(attrs)) => Some(attrs.clone()),
            (false, attrs) => {
                let mut merged = self.merge.clone();
                merged.extend(attrs.into_iter().flatten().map(|(k, v)| (k.clone(), v.clone())));
                Some(merged)
            }
        };

        let mut entity = self.factory.instantiate(parent, attrs.as_ref())?;
        if let Some(attrs) = &attrs {
            entity.fill(attrs);
        }
        for state in &self.states {
            (self.factory.state_fn(state)?)(&mut entity);
        }

        for attachment in &self.attachments {
            let members = self.produce(&entity, attachment)?;
            entity.attach(Arc::clone(&attachment.descriptor), members);
        }
        Ok(entity)
    }

    /// Produce the related instances of one attachment for `owner`.
    fn produce(&self, owner: &Entity, attachment: &Attachment) -> Result<Vec<Entity>> {
        let relation = attachment.descriptor.name();
        let mut related = (self.factory.supplier(relation)?)();
        if let Customizer::Nested(nest) = &attachment.customizer {
            related = nest(related)?;
        }

        let expected = attachment.descriptor.related_type()?;
        if related.entity_type().name() != expected.name() {
            return Err(Error::type_mismatch(
                self.entity_type().name(),
                relation,
                expected.name(),
                related.entity_type().name(),
            ));
        }
        attachment.descriptor.linkage()?;

        tracing::trace!(
            entity = %self.entity_type().name(),
            relation = %relation,
            count = attachment.count,
            customizer = attachment.customizer.name(),
            "Producing related instances"
        );

        let mut members = Vec::with_capacity(attachment.count);
        for index in 0..attachment.count {
            let mut member =
                related.make_with(Some(owner), attachment.customizer.attributes_for(index))?;
            if let Customizer::Apply(apply) = &attachment.customizer {
                apply(&mut member, index)?;
            }
            members.push(member);
        }
        Ok(members)
    }
}
