//! Row processing and object resolution.
//!
//! Rows produced during dispatch are diffed per query tree and recorded in
//! the [`QueryTreeInvocation`]; once every tree has run, the
//! [`Reconstitutor`] turns the recorded deltas into objects through an
//! [`ObjectFactory`] and the identity map.

mod identity;
mod invocation;
mod object;
mod reconstitute;
mod row_diff;

pub use identity::{IdentityKey, IdentityMap, ResolutionMode};
pub use invocation::{QueryTreeInvocation, TreeState};
pub use object::{GraphFactory, Node, NodeRef, ObjectFactory};
pub use reconstitute::{visit_order, Reconstitutor};
pub use row_diff::{has_prefix, PathTrie, RowDelta, RowDiffer};
