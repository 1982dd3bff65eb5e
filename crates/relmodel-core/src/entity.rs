//! Entity types and instances.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::error::{Error, Result, SchemaError, SchemaErrorKind};
use crate::identifiers::validate_identifier;
use crate::relation::RelationDescriptor;
use crate::value::Value;

/// Attribute map of an entity instance (column name → value).
pub type Attributes = BTreeMap<String, Value>;

/// A column of an entity's own table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub nullable: bool,
    /// Value a fresh instance starts with.
    pub default: Option<Value>,
}

impl ColumnDef {
    /// A nullable column with no default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nullable: true,
            default: None,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Mapping between an application-level entity and a table.
///
/// ```
/// use relmodel_core::{ColumnDef, EntityType};
///
/// let user = EntityType::new("User", "users")
///     .column(ColumnDef::new("name").not_null())
///     .column(ColumnDef::new("points").default_value(0i64));
/// assert_eq!(user.primary_key_column(), "id");
/// assert!(user.has_column("points"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    name: String,
    table: String,
    primary_key: String,
    columns: Vec<ColumnDef>,
    relations: Vec<Arc<RelationDescriptor>>,
}

impl EntityType {
    /// Declare a type with an `id` primary key.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: "id".to_string(),
            columns: vec![ColumnDef::new("id")],
            relations: Vec::new(),
        }
    }

    /// Replace the primary key column.
    ///
    /// Keys the database generates are read back as integer row ids; a
    /// non-integer key must be set on each instance before it is created.
    #[must_use]
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        self.columns.retain(|c| c.name != self.primary_key);
        if !self.columns.iter().any(|c| c.name == column) {
            self.columns.insert(0, ColumnDef::new(column.clone()));
        }
        self.primary_key = column;
        self.rebind_relations();
        self
    }

    #[must_use]
    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self.rebind_relations();
        self
    }

    /// Attach a relation owned by this type.
    #[must_use]
    pub fn relation(mut self, mut relation: RelationDescriptor) -> Self {
        relation.bind_owner(&self);
        self.relations.push(Arc::new(relation));
        self
    }

    /// Refresh the owner snapshot every relation resolves its linkage against.
    fn rebind_relations(&mut self) {
        let mut relations = std::mem::take(&mut self.relations);
        for relation in &mut relations {
            Arc::make_mut(relation).bind_owner(self);
        }
        self.relations = relations;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key_column(&self) -> &str {
        &self.primary_key
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column_def(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Is `name` a column of this type's own table?
    pub fn has_column(&self, name: &str) -> bool {
        self.column_def(name).is_some()
    }

    pub fn relations(&self) -> &[Arc<RelationDescriptor>] {
        &self.relations
    }

    /// Look up a declared relation by name.
    pub fn describe_relation(&self, name: &str) -> Result<Arc<RelationDescriptor>> {
        self.relations
            .iter()
            .find(|r| r.name() == name)
            .cloned()
            .ok_or_else(|| Error::unknown_relation(&self.name, name))
    }

    /// Validate the declaration: identifiers, primary key, and name clashes.
    pub fn validate(&self) -> Result<()> {
        validate_identifier("entity", &self.name)?;
        validate_identifier("table", &self.table)?;

        let mut seen = HashSet::new();
        for column in &self.columns {
            validate_identifier("column", &column.name)?;
            if !seen.insert(column.name.as_str()) {
                return Err(duplicate(format!(
                    "column '{}' declared twice on '{}'",
                    column.name, self.name
                )));
            }
        }
        if !seen.contains(self.primary_key.as_str()) {
            return Err(Error::Schema(SchemaError {
                kind: SchemaErrorKind::MissingPrimaryKey,
                message: format!(
                    "primary key '{}' is not a column of '{}'",
                    self.primary_key, self.name
                ),
            }));
        }
        for relation in &self.relations {
            relation.validate()?;
            if !seen.insert(relation.name()) {
                return Err(duplicate(format!(
                    "relation '{}' on '{}' clashes with another column or relation",
                    relation.name(),
                    self.name
                )));
            }
        }
        Ok(())
    }
}

fn duplicate(message: String) -> Error {
    Error::Schema(SchemaError {
        kind: SchemaErrorKind::Duplicate,
        message,
    })
}

/// Related instances attached to one relation of an owner.
#[derive(Debug, Clone)]
pub struct RelatedSet {
    pub descriptor: Arc<RelationDescriptor>,
    pub members: Vec<Entity>,
}

/// An instance of an [`EntityType`].
///
/// Instances start unpersisted with column defaults applied. The persisted
/// flag and primary key are only set by a successful insert (see
/// [`Entity::record_insert`]) or by a caller pre-assigning the key.
#[derive(Debug, Clone)]
pub struct Entity {
    entity_type: Arc<EntityType>,
    attributes: Attributes,
    extras: Attributes,
    persisted: bool,
    related: Vec<RelatedSet>,
}

impl Entity {
    pub fn new(entity_type: Arc<EntityType>) -> Self {
        let attributes = entity_type
            .columns()
            .iter()
            .filter_map(|c| c.default.clone().map(|v| (c.name.clone(), v)))
            .collect();
        Self {
            entity_type,
            attributes,
            extras: Attributes::new(),
            persisted: false,
            related: Vec::new(),
        }
    }

    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Merge `attrs` over the current attributes.
    pub fn fill(&mut self, attrs: &Attributes) {
        for (name, value) in attrs {
            self.attributes.insert(name.clone(), value.clone());
        }
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Primary key value, if assigned and not NULL.
    pub fn primary_key(&self) -> Option<&Value> {
        self.attributes
            .get(self.entity_type.primary_key_column())
            .filter(|v| !v.is_null())
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Values stored outside this entity's table (pivot columns after a
    /// many-to-many link).
    pub fn extras(&self) -> &Attributes {
        &self.extras
    }

    pub fn set_extras(&mut self, extras: Attributes) {
        self.extras = extras;
    }

    /// Attributes that map to columns of this entity's own table.
    pub fn native_attributes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entity_type.columns().iter().filter_map(|c| {
            self.attributes
                .get(&c.name)
                .map(|v| (c.name.as_str(), v))
        })
    }

    /// Attributes that do not map to a column of this entity's table.
    pub fn foreign_attributes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.attributes
            .iter()
            .filter(|(name, _)| !self.entity_type.has_column(name))
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Related instances attached under `relation`, if any were attached.
    pub fn related(&self, relation: &str) -> Option<&[Entity]> {
        self.related
            .iter()
            .find(|set| set.descriptor.name() == relation)
            .map(|set| set.members.as_slice())
    }

    /// All attached relations in attachment order.
    pub fn related_sets(&self) -> &[RelatedSet] {
        &self.related
    }

    /// Detach every related set, leaving none attached.
    pub fn take_related(&mut self) -> Vec<RelatedSet> {
        std::mem::take(&mut self.related)
    }

    /// Reattach sets previously taken with [`take_related`](Self::take_related).
    pub fn restore_related(&mut self, sets: Vec<RelatedSet>) {
        self.related = sets;
    }

    /// Attach `members` under `descriptor`, replacing any earlier list for the
    /// same relation.
    pub fn attach(&mut self, descriptor: Arc<RelationDescriptor>, members: Vec<Entity>) {
        if let Some(set) = self
            .related
            .iter_mut()
            .find(|set| set.descriptor.name() == descriptor.name())
        {
            set.members = members;
        } else {
            self.related.push(RelatedSet {
                descriptor,
                members,
            });
        }
    }

    /// Record a successful insert: store the key and mark the instance persisted.
    pub fn record_insert(&mut self, primary_key: Value) {
        let column = self.entity_type.primary_key_column().to_string();
        self.attributes.insert(column, primary_key);
        self.persisted = true;
    }

    /// Count this instance and every attached descendant.
    pub fn graph_size(&self) -> usize {
        1 + self
            .related
            .iter()
            .flat_map(|set| &set.members)
            .map(Entity::graph_size)
            .sum::<usize>()
    }

    /// Is every instance of this graph persisted?
    pub fn is_graph_persisted(&self) -> bool {
        self.persisted
            && self
                .related
                .iter()
                .flat_map(|set| &set.members)
                .all(Entity::is_graph_persisted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_type() -> Arc<EntityType> {
        Arc::new(
            EntityType::new("User", "users")
                .column(ColumnDef::new("name").not_null())
                .column(ColumnDef::new("points").default_value(0i64)),
        )
    }

    #[test]
    fn fill_merges_attribute_map() {
        let mut user = Entity::new(user_type());
        user.fill(&crate::attrs! { "name" => "ada", "points" => 7i64 });
        assert_eq!(user.get("name"), Some(&Value::from("ada")));
        assert_eq!(user.get("points"), Some(&Value::BigInt(7)));
        assert!(crate::attrs!().is_empty());
    }

    #[test]
    fn new_instance_applies_defaults() {
        let user = Entity::new(user_type());
        assert_eq!(user.get("points"), Some(&Value::BigInt(0)));
        assert!(user.get("name").is_none());
        assert!(user.primary_key().is_none());
        assert!(!user.is_persisted());
        assert!(user.extras().is_empty());
    }

    #[test]
    fn native_and_foreign_attributes() {
        let mut user = Entity::new(user_type());
        user.set("name", "ada");
        user.set("level", 3i64);

        let native: Vec<_> = user.native_attributes().map(|(k, _)| k).collect();
        assert_eq!(native, vec!["name", "points"]);
        let foreign: Vec<_> = user.foreign_attributes().map(|(k, _)| k).collect();
        assert_eq!(foreign, vec!["level"]);
    }

    #[test]
    fn record_insert_sets_key_and_flag() {
        let mut user = Entity::new(user_type());
        user.record_insert(Value::BigInt(7));
        assert_eq!(user.primary_key(), Some(&Value::BigInt(7)));
        assert!(user.is_persisted());
    }

    #[test]
    fn null_key_is_not_a_key() {
        let mut user = Entity::new(user_type());
        user.set("id", Value::Null);
        assert!(user.primary_key().is_none());
    }

    #[test]
    fn custom_primary_key_replaces_id() {
        let ty = EntityType::new("Tag", "tags").primary_key("slug");
        assert_eq!(ty.primary_key_column(), "slug");
        assert!(ty.has_column("slug"));
        assert!(!ty.has_column("id"));
        assert!(ty.validate().is_ok());
    }

    #[test]
    fn validate_rejects_clashes() {
        let ty = EntityType::new("User", "users")
            .column(ColumnDef::new("name"))
            .column(ColumnDef::new("name"));
        match ty.validate() {
            Err(Error::Schema(e)) => assert_eq!(e.kind, SchemaErrorKind::Duplicate),
            other => panic!("unexpected: {other:?}"),
        }

        let ty = EntityType::new("User", "users")
            .column(ColumnDef::new("skills"))
            .relation(RelationDescriptor::many_to_many("skills", || {
                Err(Error::unknown_entity("Skill"))
            }));
        assert!(ty.validate().is_err());

        let ty = EntityType::new("User", "bad table");
        match ty.validate() {
            Err(Error::Schema(e)) => assert_eq!(e.kind, SchemaErrorKind::InvalidIdentifier),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn describe_relation_on_type() {
        let ty = EntityType::new("User", "users").relation(RelationDescriptor::has_many(
            "posts",
            || Err(Error::unknown_entity("Post")),
        ));
        assert_eq!(ty.describe_relation("posts").unwrap().owner(), Some("User"));
        assert_eq!(
            ty.describe_relation("friends").unwrap_err().relation_kind(),
            Some(crate::error::RelationErrorKind::UnknownRelation)
        );
    }

    #[test]
    fn attach_replaces_and_keeps_order() {
        let ty = Arc::new(
            EntityType::new("User", "users")
                .relation(RelationDescriptor::has_many("a", user_type_ok))
                .relation(RelationDescriptor::has_many("b", user_type_ok)),
        );
        let mut root = Entity::new(Arc::clone(&ty));
        let a = ty.describe_relation("a").unwrap();
        let b = ty.describe_relation("b").unwrap();
        root.attach(Arc::clone(&b), vec![Entity::new(user_type())]);
        root.attach(Arc::clone(&a), vec![]);
        root.attach(b, vec![Entity::new(user_type()), Entity::new(user_type())]);

        let names: Vec<_> = root.related_sets().iter().map(|s| s.descriptor.name()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(root.related("b").map(<[Entity]>::len), Some(2));
        assert_eq!(root.related("a").map(<[Entity]>::len), Some(0));
        assert!(root.related("c").is_none());
        assert_eq!(root.graph_size(), 3);
        assert!(!root.is_graph_persisted());
    }

    fn user_type_ok() -> Result<Arc<EntityType>> {
        Ok(user_type())
    }
}
