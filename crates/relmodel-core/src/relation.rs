//! Relation descriptors.
//!
//! A [`RelationDescriptor`] names an association between an owner entity type
//! and a related type, and knows how the two are linked in storage. The related
//! type is given as a resolver so that mutually-referencing types can be
//! declared in any order; it is resolved on first use and cached.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::entity::EntityType;
use crate::error::{Error, Result, SchemaError, SchemaErrorKind};
use crate::identifiers::{to_snake_case, validate_identifier};

/// Cardinality of a relation, seen from its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// Owner has at most one related row carrying the owner's key.
    OneToOne,
    /// Owner carries the key of one parent row (belongs-to).
    ManyToOne,
    /// Owner has many related rows carrying the owner's key.
    OneToMany,
    /// Owner and related rows are joined through a pivot table.
    ManyToMany,
}

impl RelationKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            RelationKind::OneToOne => "one_to_one",
            RelationKind::ManyToOne => "many_to_one",
            RelationKind::OneToMany => "one_to_many",
            RelationKind::ManyToMany => "many_to_many",
        }
    }
}

/// Join table of a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotTable {
    /// Join table name (e.g. `"skill_user"`).
    pub table: String,
    /// Column referencing the owner (e.g. `"user_id"`).
    pub foreign_key: String,
    /// Column referencing the related row (e.g. `"skill_id"`).
    pub related_foreign_key: String,
    /// Extra columns written from the related instance's attributes.
    pub columns: Vec<String>,
}

/// Resolved storage linkage of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Linkage {
    /// `column` on the related table holds the owner's `local_key`.
    ForeignKey { column: String, local_key: String },
    /// `column` on the owner table holds the parent's `parent_key`.
    BelongsTo { column: String, parent_key: String },
    /// Rows are joined through a pivot table.
    Pivot(PivotTable),
}

/// Lazily-invoked resolver for the related entity type.
pub type TypeResolver = Arc<dyn Fn() -> Result<Arc<EntityType>> + Send + Sync>;

/// Metadata about a relation between two entity types.
///
/// Built with one of the kind constructors and the linkage builder methods,
/// then attached to its owner through [`EntityType::relation`].
#[derive(Clone)]
pub struct RelationDescriptor {
    name: String,
    kind: RelationKind,
    owner: Option<Owner>,
    resolver: TypeResolver,
    foreign_key: Option<String>,
    local_key: Option<String>,
    pivot_table: Option<String>,
    pivot_foreign_key: Option<String>,
    pivot_related_foreign_key: Option<String>,
    pivot_columns: Vec<String>,
    related: OnceLock<Arc<EntityType>>,
    linkage: OnceLock<Linkage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Owner {
    name: String,
    primary_key: String,
    columns: Vec<String>,
}

impl Owner {
    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }
}

impl RelationDescriptor {
    /// Create a relation of the given kind.
    pub fn new<F>(name: impl Into<String>, kind: RelationKind, related: F) -> Self
    where
        F: Fn() -> Result<Arc<EntityType>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind,
            owner: None,
            resolver: Arc::new(related),
            foreign_key: None,
            local_key: None,
            pivot_table: None,
            pivot_foreign_key: None,
            pivot_related_foreign_key: None,
            pivot_columns: Vec::new(),
            related: OnceLock::new(),
            linkage: OnceLock::new(),
        }
    }

    pub fn has_one<F>(name: impl Into<String>, related: F) -> Self
    where
        F: Fn() -> Result<Arc<EntityType>> + Send + Sync + 'static,
    {
        Self::new(name, RelationKind::OneToOne, related)
    }

    pub fn has_many<F>(name: impl Into<String>, related: F) -> Self
    where
        F: Fn() -> Result<Arc<EntityType>> + Send + Sync + 'static,
    {
        Self::new(name, RelationKind::OneToMany, related)
    }

    pub fn belongs_to<F>(name: impl Into<String>, related: F) -> Self
    where
        F: Fn() -> Result<Arc<EntityType>> + Send + Sync + 'static,
    {
        Self::new(name, RelationKind::ManyToOne, related)
    }

    pub fn many_to_many<F>(name: impl Into<String>, related: F) -> Self
    where
        F: Fn() -> Result<Arc<EntityType>> + Send + Sync + 'static,
    {
        Self::new(name, RelationKind::ManyToMany, related)
    }

    /// Set the foreign key column.
    ///
    /// On the related table for has-one/has-many, on the owner table for
    /// belongs-to.
    #[must_use]
    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    /// Set the owner column a has-one/has-many foreign key references.
    #[must_use]
    pub fn local_key(mut self, column: impl Into<String>) -> Self {
        self.local_key = Some(column.into());
        self
    }

    /// Set the join table name (many-to-many).
    #[must_use]
    pub fn pivot_table(mut self, table: impl Into<String>) -> Self {
        self.pivot_table = Some(table.into());
        self
    }

    /// Set the join table column referencing the owner (many-to-many).
    #[must_use]
    pub fn pivot_foreign_key(mut self, column: impl Into<String>) -> Self {
        self.pivot_foreign_key = Some(column.into());
        self
    }

    /// Set the join table column referencing the related row (many-to-many).
    #[must_use]
    pub fn pivot_related_foreign_key(mut self, column: impl Into<String>) -> Self {
        self.pivot_related_foreign_key = Some(column.into());
        self
    }

    /// Declare extra join table columns (many-to-many).
    #[must_use]
    pub fn pivot_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pivot_columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn kind(&self) -> RelationKind {
        self.kind
    }

    /// Name of the owning entity type, once attached.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_ref().map(|o| o.name.as_str())
    }

    /// Declared extra pivot columns.
    pub fn pivot_column_names(&self) -> &[String] {
        &self.pivot_columns
    }

    /// Is `column` a declared extra pivot column?
    pub fn is_pivot_column(&self, column: &str) -> bool {
        self.kind == RelationKind::ManyToMany && self.pivot_columns.iter().any(|c| c == column)
    }

    /// Resolve the related entity type.
    ///
    /// The resolver runs until it first succeeds; the result is cached for
    /// the lifetime of the descriptor.
    pub fn related_type(&self) -> Result<Arc<EntityType>> {
        if let Some(related) = self.related.get() {
            return Ok(Arc::clone(related));
        }
        let resolved = (self.resolver)()?;
        Ok(Arc::clone(self.related.get_or_init(|| resolved)))
    }

    /// Resolve the storage linkage, applying default naming where no
    /// explicit column or table was given.
    pub fn linkage(&self) -> Result<&Linkage> {
        if let Some(linkage) = self.linkage.get() {
            return Ok(linkage);
        }
        let resolved = self.resolve_linkage()?;
        tracing::trace!(
            relation = %self.name,
            kind = self.kind.as_str(),
            linkage = ?resolved,
            "Resolved relation linkage"
        );
        Ok(self.linkage.get_or_init(|| resolved))
    }

    fn resolve_linkage(&self) -> Result<Linkage> {
        let owner = self.owner.as_ref().ok_or_else(|| {
            invalid_linkage(format!(
                "relation '{}' is not attached to an entity type",
                self.name
            ))
        })?;
        let owner_fk = format!("{}_{}", to_snake_case(&owner.name), owner.primary_key);

        match self.kind {
            RelationKind::OneToOne | RelationKind::OneToMany => {
                let related = self.related_type()?;
                let column = self.foreign_key.clone().unwrap_or(owner_fk);
                let local_key = self
                    .local_key
                    .clone()
                    .unwrap_or_else(|| owner.primary_key.clone());
                if !related.has_column(&column) {
                    return Err(self.missing_column(related.name(), &column));
                }
                if !owner.has_column(&local_key) {
                    return Err(self.missing_column(&owner.name, &local_key));
                }
                Ok(Linkage::ForeignKey { column, local_key })
            }
            RelationKind::ManyToOne => {
                let parent = self.related_type()?;
                let column = self.foreign_key.clone().unwrap_or_else(|| {
                    format!(
                        "{}_{}",
                        to_snake_case(parent.name()),
                        parent.primary_key_column()
                    )
                });
                if !owner.has_column(&column) {
                    return Err(self.missing_column(&owner.name, &column));
                }
                Ok(Linkage::BelongsTo {
                    column,
                    parent_key: parent.primary_key_column().to_string(),
                })
            }
            RelationKind::ManyToMany => {
                let related = self.related_type()?;
                let owner_snake = to_snake_case(&owner.name);
                let related_snake = to_snake_case(related.name());
                let table = self.pivot_table.clone().unwrap_or_else(|| {
                    let mut names = [owner_snake.as_str(), related_snake.as_str()];
                    names.sort_unstable();
                    names.join("_")
                });
                let foreign_key = self.pivot_foreign_key.clone().unwrap_or(owner_fk);
                let related_foreign_key =
                    self.pivot_related_foreign_key.clone().unwrap_or_else(|| {
                        format!("{}_{}", related_snake, related.primary_key_column())
                    });
                if foreign_key == related_foreign_key {
                    return Err(invalid_linkage(format!(
                        "relation '{}' uses '{}' for both pivot keys",
                        self.name, foreign_key
                    )));
                }
                Ok(Linkage::Pivot(PivotTable {
                    table,
                    foreign_key,
                    related_foreign_key,
                    columns: self.pivot_columns.clone(),
                }))
            }
        }
    }

    fn missing_column(&self, entity: &str, column: &str) -> Error {
        invalid_linkage(format!(
            "relation '{}' links through '{}.{}', which is not a declared column",
            self.name, entity, column
        ))
    }

    /// Bind this descriptor to its owning type.
    pub(crate) fn bind_owner(&mut self, owner: &EntityType) {
        self.owner = Some(Owner {
            name: owner.name().to_string(),
            primary_key: owner.primary_key_column().to_string(),
            columns: owner.columns().iter().map(|c| c.name.clone()).collect(),
        });
        self.linkage = OnceLock::new();
    }

    /// Validate every explicitly given identifier.
    pub(crate) fn validate(&self) -> Result<()> {
        validate_identifier("relation", &self.name)?;
        let explicit = [
            &self.foreign_key,
            &self.local_key,
            &self.pivot_table,
            &self.pivot_foreign_key,
            &self.pivot_related_foreign_key,
        ];
        for name in explicit.into_iter().flatten() {
            validate_identifier("linkage", name)?;
        }
        for column in &self.pivot_columns {
            validate_identifier("pivot column", column)?;
        }
        if self.kind != RelationKind::ManyToMany
            && (self.pivot_table.is_some() || !self.pivot_columns.is_empty())
        {
            return Err(invalid_linkage(format!(
                "relation '{}' is {} but declares pivot settings",
                self.name,
                self.kind.as_str()
            )));
        }
        Ok(())
    }
}

fn invalid_linkage(message: String) -> Error {
    Error::Schema(SchemaError {
        kind: SchemaErrorKind::InvalidLinkage,
        message,
    })
}

impl PartialEq for RelationDescriptor {
    fn eq(&self, other: &Self) -> bool {
        // The resolver closure has no meaningful identity.
        self.name == other.name
            && self.kind == other.kind
            && self.owner == other.owner
            && self.foreign_key == other.foreign_key
            && self.local_key == other.local_key
            && self.pivot_table == other.pivot_table
            && self.pivot_foreign_key == other.pivot_foreign_key
            && self.pivot_related_foreign_key == other.pivot_related_foreign_key
            && self.pivot_columns == other.pivot_columns
    }
}

impl Eq for RelationDescriptor {}

impl fmt::Debug for RelationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("owner", &self.owner())
            .field("linkage", &self.linkage.get())
            .finish_non_exhaustive()
    }
}
