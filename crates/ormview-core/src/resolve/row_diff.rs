//! Row diffing.
//!
//! Result rows of one query tree arrive sorted by every fragment's
//! identifier, so consecutive rows share a prefix of unchanged entities. The
//! differ finds the shallowest entity boundary that changed between two rows
//! and marks every column at or below it as changed, so an entity is always
//! re-materialized as a whole and untouched siblings are left alone.

use std::collections::HashMap;

use crate::plan::QueryField;
use crate::value::{Row, Value};

/// What changed between a row and its predecessor.
#[derive(Debug, Clone, PartialEq)]
pub struct RowDelta {
    /// Positions of every column under `prefix`, ascending.
    pub changed: Vec<usize>,
    /// Longest common path prefix of the columns that actually changed.
    pub prefix: String,
    /// The full row.
    pub values: Row,
}

impl RowDelta {
    /// Whether the column at `position` is part of the changed set.
    pub fn is_changed(&self, position: usize) -> bool {
        self.changed.binary_search(&position).is_ok()
    }

    /// Value of the column at `position` (null when the row is short).
    pub fn value(&self, position: usize) -> &Value {
        self.values.get(position).unwrap_or(&Value::Null)
    }
}

/// Trie over dotted path segments.
#[derive(Debug, Default)]
pub struct PathTrie {
    root: TrieNode,
}

#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<String, TrieNode>,
    terminal: bool,
}

impl PathTrie {
    /// Create an empty trie.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a dotted path. The empty path marks the root itself.
    pub fn insert(&mut self, path: &str) {
        let mut node = &mut self.root;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.terminal = true;
    }

    /// Longest path that is a prefix (segment-wise) of every inserted path.
    pub fn longest_common_prefix(&self) -> String {
        let mut segments: Vec<&str> = Vec::new();
        let mut node = &self.root;
        while !node.terminal && node.children.len() == 1 {
            let Some((segment, child)) = node.children.iter().next() else {
                break;
            };
            segments.push(segment);
            node = child;
        }
        segments.join(".")
    }
}

/// Whether `path` equals `prefix` or lies below it.
pub fn has_prefix(path: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || path == prefix
        || (path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'.')
}

/// Stateful differ holding the previous row of one query tree.
#[derive(Debug)]
pub struct RowDiffer {
    label: String,
    scopes: Vec<String>,
    previous: Option<Row>,
    previous_prefix: String,
}

impl RowDiffer {
    /// Create a differ for rows positioned per `fields`.
    pub fn new(label: impl Into<String>, fields: &[QueryField]) -> Self {
        Self {
            label: label.into(),
            scopes: fields.iter().map(|f| f.scope.clone()).collect(),
            previous: None,
            previous_prefix: String::new(),
        }
    }

    /// Diff `row` against the previous row and remember it.
    pub fn diff(&mut self, row: Row) -> RowDelta {
        let prefix = match &self.previous {
            None => String::new(),
            Some(previous) => {
                let mut trie = PathTrie::new();
                let mut any = false;
                for (position, scope) in self.scopes.iter().enumerate() {
                    let old = previous.get(position).unwrap_or(&Value::Null);
                    let new = row.get(position).unwrap_or(&Value::Null);
                    if column_changed(old, new) {
                        trie.insert(scope);
                        any = true;
                    }
                }
                if any {
                    trie.longest_common_prefix()
                } else {
                    tracing::warn!(
                        tree = %self.label,
                        prefix = %self.previous_prefix,
                        "duplicate row cannot be told apart from its predecessor"
                    );
                    self.previous_prefix.clone()
                }
            }
        };

        let changed = self
            .scopes
            .iter()
            .enumerate()
            .filter(|(_, scope)| has_prefix(scope, &prefix))
            .map(|(position, _)| position)
            .collect();

        self.previous = Some(row.clone());
        self.previous_prefix = prefix.clone();
        RowDelta {
            changed,
            prefix,
            values: row,
        }
    }
}

fn column_changed(old: &Value, new: &Value) -> bool {
    if old.is_null() != new.is_null() {
        return true;
    }
    old != new
}
