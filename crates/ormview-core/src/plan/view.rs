//! Declarative view definitions.

use super::tree::CustomQuery;

/// Which fields of which entity graph to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct View {
    /// Root entity of the view.
    pub entity: String,
    /// Requested dotted attribute paths, relative to `entity`.
    pub paths: Vec<String>,
    /// Nested views fetched by separate queries.
    pub subviews: Vec<SubView>,
    /// Externally authored query replacing the generated one.
    pub custom: Option<CustomQuery>,
}

/// A nested view anchored at a path of its parent view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubView {
    /// Path in the parent view the sub-view hangs off.
    pub anchor: String,
    /// The nested view; its entity is the anchor's target type.
    pub view: View,
}

impl View {
    /// Create an empty view of `entity`.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            paths: Vec::new(),
            subviews: Vec::new(),
            custom: None,
        }
    }

    /// Request one attribute path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    /// Request several attribute paths.
    pub fn with_paths<'a>(mut self, paths: impl IntoIterator<Item = &'a str>) -> Self {
        self.paths.extend(paths.into_iter().map(str::to_string));
        self
    }

    /// Attach a nested view at `anchor`.
    pub fn with_subview(mut self, anchor: impl Into<String>, view: View) -> Self {
        self.subviews.push(SubView {
            anchor: anchor.into(),
            view,
        });
        self
    }

    /// Replace the generated query with a custom one.
    pub fn with_custom(mut self, query: CustomQuery) -> Self {
        self.custom = Some(query);
        self
    }

    /// Nesting depth (1 for a view without sub-views).
    pub fn depth(&self) -> usize {
        1 + self.subviews.iter().map(|s| s.view.depth()).max().unwrap_or(0)
    }
}
