//! Per-kind link strategies.
//!
//! A strategy decides *when* a related instance is written relative to its
//! owner ([`LinkPhase`]) and *how* the two rows are connected:
//!
//! - has-one / has-many: the related row carries the owner's key, set before
//!   the related insert.
//! - belongs-to: the owner row carries the parent's key, so the parent is
//!   written first.
//! - many-to-many: both rows exist first, then one join row connects them and
//!   its two key columns become the related instance's extras.

use asupersync::{Cx, Outcome};
use relmodel_core::{
    Attributes, Connection, Entity, Error, Linkage, PivotTable, RelationKind, Result, Value,
};

use crate::session::PersistenceSession;

/// When a related instance is linked relative to the inserts involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    /// Parent is inserted, then its key is set on the owner before the owner
    /// insert.
    BeforeOwner,
    /// Foreign key is set on the related instance before its insert.
    BeforeInsert,
    /// Join row is written after the related insert.
    AfterInsert,
}

impl LinkPhase {
    pub const fn of(kind: RelationKind) -> Self {
        match kind {
            RelationKind::ManyToOne => LinkPhase::BeforeOwner,
            RelationKind::OneToOne | RelationKind::OneToMany => LinkPhase::BeforeInsert,
            RelationKind::ManyToMany => LinkPhase::AfterInsert,
        }
    }
}

fn key_of<'e>(entity: &'e Entity, column: &str, role: &str) -> Result<&'e Value> {
    entity
        .get(column)
        .filter(|v| !v.is_null())
        .ok_or_else(|| {
            Error::Custom(format!(
                "{role} '{}' has no value for key '{column}'; it must be inserted first",
                entity.entity_type().name()
            ))
        })
}

/// Set the related instance's foreign key to the owner's local key.
pub fn link_foreign_key(owner: &Entity, related: &mut Entity, linkage: &Linkage) -> Result<()> {
    let Linkage::ForeignKey { column, local_key } = linkage else {
        return Err(unexpected_linkage("foreign key", linkage));
    };
    let key = key_of(owner, local_key, "owner")?.clone();
    related.set(column.clone(), key);
    Ok(())
}

/// Set the owner's foreign key to the inserted parent's key.
pub fn attach_parent(owner: &mut Entity, parent: &Entity, linkage: &Linkage) -> Result<()> {
    let Linkage::BelongsTo { column, parent_key } = linkage else {
        return Err(unexpected_linkage("belongs-to", linkage));
    };
    let key = key_of(parent, parent_key, "parent")?.clone();
    owner.set(column.clone(), key);
    Ok(())
}

/// The two key columns of the join row connecting `owner` and `related`.
pub fn pivot_keys(owner: &Entity, related: &Entity, pivot: &PivotTable) -> Result<Attributes> {
    let owner_key = key_of(owner, owner.entity_type().primary_key_column(), "owner")?;
    let related_key = key_of(related, related.entity_type().primary_key_column(), "related")?;

    let mut keys = Attributes::new();
    keys.insert(pivot.foreign_key.clone(), owner_key.clone());
    keys.insert(pivot.related_foreign_key.clone(), related_key.clone());
    Ok(keys)
}

/// Values of the join row connecting `owner` and `related`.
///
/// Declared pivot columns are taken from the related instance's attributes
/// unless they are native columns of the related type. The two computed
/// foreign keys are written last and win over any colliding attribute.
pub fn pivot_values(owner: &Entity, related: &Entity, pivot: &PivotTable) -> Result<Attributes> {
    let keys = pivot_keys(owner, related, pivot)?;
    let related_type = related.entity_type();

    let mut values = Attributes::new();
    for column in pivot.columns.iter().filter(|c| !related_type.has_column(c)) {
        if let Some(value) = related.get(column) {
            values.insert(column.clone(), value.clone());
        }
    }
    values.extend(keys);
    Ok(values)
}

/// Write the join row for an inserted `related` and attach its two key
/// columns as the related instance's extras.
pub async fn link_pivot<C: Connection>(
    session: &mut PersistenceSession<'_, C>,
    cx: &Cx,
    owner: &Entity,
    related: &mut Entity,
    pivot: &PivotTable,
) -> Outcome<(), Error> {
    let (values, keys) = match pivot_values(owner, related, pivot)
        .and_then(|values| pivot_keys(owner, related, pivot).map(|keys| (values, keys)))
    {
        Ok(pair) => pair,
        Err(e) => return Outcome::Err(e),
    };
    match session.insert_link(cx, &pivot.table, &values).await {
        Outcome::Ok(()) => {}
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    }
    related.set_extras(keys);
    Outcome::Ok(())
}

fn unexpected_linkage(expected: &str, actual: &Linkage) -> Error {
    Error::Custom(format!("expected {expected} linkage, found {actual:?}"))
}
