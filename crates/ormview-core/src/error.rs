//! Core error types.

use thiserror::Error;

/// Errors raised while planning, dispatching, or reconstituting a view fetch.
#[derive(Debug, Error)]
pub enum Error {
    /// The view references an entity the catalog does not know.
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    /// A requested path segment is neither a field, a collection, nor a relation.
    #[error("unknown path '{path}' on entity '{entity}'")]
    UnknownPath {
        /// Entity the path was resolved against.
        entity: String,
        /// The offending path.
        path: String,
    },

    /// A sub-view is anchored at a path whose identifier the parent does not fetch.
    #[error("sub-view anchored at '{anchor}' has no correlation identifier in its parent query")]
    MissingCorrelationId {
        /// Anchor path of the sub-view.
        anchor: String,
    },

    /// A custom child query needs a join side table that is not configured or missing.
    #[error("join side table '{0}' does not exist")]
    MissingJoinTable(String),

    /// Two plan rewrites that cannot be applied to the same tree.
    #[error("unsupported split combination: {0}")]
    UnsupportedSplit(String),

    /// A query tree populates a session-bound temp table and cannot run in parallel.
    #[error("query tree {tree} populates a session-bound temp table and cannot be dispatched in parallel")]
    SessionBoundParallel {
        /// Display form of the offending tree id.
        tree: String,
    },

    /// Structural problem with an aggregate tree.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// Error reported by a data-store session.
    #[error("session error: {0}")]
    Session(String),

    /// One or more branches failed during parallel dispatch.
    #[error("{count} query tree branch(es) failed, first: {first}")]
    BranchFailed {
        /// Number of failed branches.
        count: usize,
        /// Message of the first failure.
        first: String,
    },
}

impl Error {
    /// Whether this is a configuration error, raised before any query runs.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::UnknownEntity(_)
                | Error::UnknownPath { .. }
                | Error::MissingCorrelationId { .. }
                | Error::MissingJoinTable(_)
                | Error::UnsupportedSplit(_)
                | Error::SessionBoundParallel { .. }
                | Error::InvalidPlan(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(Error::MissingJoinTable("ids".into()).is_configuration());
        assert!(Error::UnsupportedSplit("x".into()).is_configuration());
        assert!(!Error::Session("boom".into()).is_configuration());
        assert!(!Error::BranchFailed {
            count: 1,
            first: "boom".into()
        }
        .is_configuration());
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::UnknownPath {
            entity: "User".into(),
            path: "posts.nope".into(),
        };
        assert_eq!(err.to_string(), "unknown path 'posts.nope' on entity 'User'");
    }
}
