//! Reference data store.
//!
//! [`MemoryStore`] implements the session contract over in-memory records.
//! It backs the tests and benchmarks and doubles as an executable model of
//! the rows a relational store returns for a query tree.

mod memory;

pub use memory::{MemorySession, MemoryStore, Record};
