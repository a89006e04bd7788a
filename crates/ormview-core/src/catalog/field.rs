//! Field definitions for entities.

/// Shape of a field's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    /// A single scalar value.
    Scalar,
    /// A collection of primitive elements, fetched one element per row.
    Collection,
}

/// A field definition within an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Whether the field is a scalar or a primitive collection.
    pub shape: FieldShape,
}

impl FieldDef {
    /// Create a scalar field.
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shape: FieldShape::Scalar,
        }
    }

    /// Create a primitive-collection field.
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shape: FieldShape::Collection,
        }
    }

    /// Check if this is a primitive collection.
    pub fn is_collection(&self) -> bool {
        self.shape == FieldShape::Collection
    }
}
