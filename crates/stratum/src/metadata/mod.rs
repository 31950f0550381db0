//! Entity metadata model.
//!
//! Each persistent entity shape declares its property list once; the model
//! builds an immutable [`EntityType`] description (properties, keys, identity
//! column, table name) from it and caches the result for the process
//! lifetime. Statement generation reads property facts from here instead of
//! inspecting entity values at call sites.

mod entity;
mod model;

pub use entity::{Entity, EntityType, ForeignKey, ForeignKeyDef, Key, Property, PropertyDef};
pub use model::{escape_prefix, replace_prefix, Model, Table, PREFIX_TOKEN};

use std::collections::BTreeMap;
use std::ops::BitOr;

use crate::error::{Result, StratumError};

/// Per-property bit flags controlling inclusion in generated statements.
///
/// A property ignored for both insert and update but not list is read-only
/// from the mapper's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ignore(u8);

impl Ignore {
    /// Included everywhere.
    pub const NONE: Ignore = Ignore(0);
    /// Excluded from INSERT column lists.
    pub const INSERT: Ignore = Ignore(1);
    /// Excluded from UPDATE column lists.
    pub const UPDATE: Ignore = Ignore(2);
    /// Excluded from INSERT and UPDATE.
    pub const UPSERT: Ignore = Ignore(1 | 2);
    /// Excluded from SELECT column lists and row readback.
    pub const LIST: Ignore = Ignore(4);
    /// Excluded from every generated statement.
    pub const ALL: Ignore = Ignore(1 | 2 | 4);

    /// Whether all flags in `other` are set on `self`.
    pub fn contains(self, other: Ignore) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any flag in `other` is set on `self`.
    pub fn intersects(self, other: Ignore) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for Ignore {
    type Output = Ignore;

    fn bitor(self, rhs: Ignore) -> Ignore {
        Ignore(self.0 | rhs.0)
    }
}

/// Behavior applied to dependent rows when a principal row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteBehavior {
    /// Reject the delete while dependents exist.
    #[default]
    Restrict,
    /// Null out the dependent columns.
    SetNull,
    /// Delete dependents along with the principal.
    Cascade,
}

/// Free-form extension bag carried by metadata and migration operations.
///
/// Adding a value under a name already present fails; callers needing
/// replace semantics must remove the old value first.
#[derive(Debug, Clone, Default)]
pub struct Annotations {
    owner: String,
    entries: BTreeMap<String, serde_json::Value>,
}

impl Annotations {
    /// Create an empty bag labeled with its owner for error reporting.
    pub fn for_owner(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Attach a value under a new name.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Result<()> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(StratumError::duplicate_annotation(name, &self.owner));
        }
        self.entries.insert(name, value.into());
        Ok(())
    }

    /// Look up a value by name.
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.entries.get(name)
    }

    /// Remove a value, returning it if present.
    pub fn remove(&mut self, name: &str) -> Option<serde_json::Value> {
        self.entries.remove(name)
    }

    /// Iterate over (name, value) pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignore_flag_composition() {
        assert_eq!(Ignore::INSERT | Ignore::UPDATE, Ignore::UPSERT);
        assert_eq!(Ignore::UPSERT | Ignore::LIST, Ignore::ALL);
        assert!(Ignore::ALL.contains(Ignore::LIST));
        assert!(Ignore::UPSERT.contains(Ignore::INSERT));
        assert!(!Ignore::INSERT.contains(Ignore::UPDATE));
        assert!(Ignore::UPSERT.intersects(Ignore::UPDATE));
        assert!(!Ignore::NONE.intersects(Ignore::ALL));
    }

    #[test]
    fn test_annotations_duplicate_rejected() {
        let mut annotations = Annotations::for_owner("CreateIndex");
        annotations.add("SqlServer:Clustered", true).unwrap();
        let err = annotations.add("SqlServer:Clustered", false).unwrap_err();
        assert!(matches!(err, StratumError::DuplicateAnnotation { .. }));
        // the original value survives
        assert_eq!(
            annotations.get("SqlServer:Clustered"),
            Some(&serde_json::Value::Bool(true))
        );
    }

    #[test]
    fn test_annotations_remove_then_add() {
        let mut annotations = Annotations::for_owner("CreateTable");
        annotations.add("comment", "v1").unwrap();
        annotations.remove("comment");
        annotations.add("comment", "v2").unwrap();
        assert_eq!(
            annotations.get("comment").and_then(|v| v.as_str()),
            Some("v2")
        );
    }
}
