//! ORMVIEW Benchmark Suite
//!
//! Criterion benchmarks for the view fetch pipeline.
//!
//! # Benchmark Categories
//!
//! - **Plan**: Planning with and without the plan cache, split strategies
//! - **Fetch**: Serial vs parallel dispatch, reconstitution over the memory store

pub mod fixtures;

pub use fixtures::{blog_schema, blog_store, nested_view, pets_view, wide_view, Scale};
