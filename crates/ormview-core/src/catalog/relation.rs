//! Relation definitions between entities.

/// Cardinality of a relation, seen from its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// At most one target per source.
    One,
    /// Any number of targets per source.
    Many,
}

/// How the targets of a to-many relation are held by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    /// Unordered; no marker column.
    Bag,
    /// Ordered; fetched with a list-index marker column.
    List,
    /// Keyed; fetched with a map-key marker column.
    Map,
}

/// A navigable relation between two entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationDef {
    /// Relation name, unique per source entity. Also the path segment that navigates it.
    pub name: String,
    /// Source entity name.
    pub from_entity: String,
    /// Target entity name.
    pub to_entity: String,
    /// Relation cardinality.
    pub cardinality: Cardinality,
    /// Collection kind (always `Bag` for to-one relations).
    pub kind: CollectionKind,
}

impl RelationDef {
    /// Create a to-one relation.
    pub fn one_to_one(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        to_entity: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            from_entity: from_entity.into(),
            to_entity: to_entity.into(),
            cardinality: Cardinality::One,
            kind: CollectionKind::Bag,
        }
    }

    /// Create an unordered to-many relation.
    pub fn one_to_many(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        to_entity: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            from_entity: from_entity.into(),
            to_entity: to_entity.into(),
            cardinality: Cardinality::Many,
            kind: CollectionKind::Bag,
        }
    }

    /// Create an ordered to-many relation.
    pub fn list(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        to_entity: impl Into<String>,
    ) -> Self {
        Self {
            kind: CollectionKind::List,
            ..Self::one_to_many(name, from_entity, to_entity)
        }
    }

    /// Create a keyed to-many relation.
    pub fn map(
        name: impl Into<String>,
        from_entity: impl Into<String>,
        to_entity: impl Into<String>,
    ) -> Self {
        Self {
            kind: CollectionKind::Map,
            ..Self::one_to_many(name, from_entity, to_entity)
        }
    }

    /// Check if this relation yields multiple targets per source.
    pub fn is_to_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }
}
