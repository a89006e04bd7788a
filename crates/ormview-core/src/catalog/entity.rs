//! Entity definitions and the type descriptors handed to the planner.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::field::FieldDef;

/// An entity definition (table schema).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDef {
    /// Entity name (unique within schema).
    pub name: String,
    /// Name of the primary identity field.
    pub identity_field: String,
    /// Field definitions, excluding inherited ones.
    pub fields: Vec<FieldDef>,
    /// Direct supertype, if this entity takes part in an inheritance hierarchy.
    pub supertype: Option<String>,
    /// Open/dynamic entities have no fixed field set; their fragments are never
    /// field-populated.
    pub open: bool,
}

impl EntityDef {
    /// Create a new entity definition.
    pub fn new(name: impl Into<String>, identity_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity_field: identity_field.into(),
            fields: Vec::new(),
            supertype: None,
            open: false,
        }
    }

    /// Add a field to the entity.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add multiple scalar fields.
    pub fn with_scalars<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.fields.extend(names.into_iter().map(FieldDef::scalar));
        self
    }

    /// Declare this entity a subtype of `supertype`.
    pub fn extends(mut self, supertype: impl Into<String>) -> Self {
        self.supertype = Some(supertype.into());
        self
    }

    /// Mark the entity as open (dynamic field set).
    pub fn open(mut self) -> Self {
        self.open = true;
        self
    }

    /// Get a field by name (own fields only).
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Descriptor of an entity type as seen by the planner.
#[derive(Debug)]
pub struct TypeInfo {
    /// Entity name.
    pub name: String,
    /// Identity field name (inherited from the hierarchy root).
    pub identity_field: String,
    /// Name of the root of the inheritance hierarchy (the entity itself if none).
    pub family: String,
    /// Whether any entity extends this one.
    pub has_subtypes: bool,
    /// Whether this entity is open/dynamic.
    pub open: bool,
}

/// Cheaply clonable, name-compared handle to a [`TypeInfo`].
#[derive(Debug, Clone)]
pub struct TypeRef(Arc<TypeInfo>);

impl TypeRef {
    /// Wrap a type descriptor.
    pub fn new(info: TypeInfo) -> Self {
        Self(Arc::new(info))
    }

    /// Entity name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Identity field name.
    pub fn identity_field(&self) -> &str {
        &self.0.identity_field
    }

    /// Hierarchy root name, used to key identities across subtypes.
    pub fn family(&self) -> &str {
        &self.0.family
    }

    /// Whether any entity extends this one.
    pub fn has_subtypes(&self) -> bool {
        self.0.has_subtypes
    }

    /// Whether this entity is open/dynamic.
    pub fn is_open(&self) -> bool {
        self.0.open
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.name == other.0.name
    }
}

impl Eq for TypeRef {}

impl Hash for TypeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.name.hash(state);
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}
