//! Graph Builder.
//!
//! Turns a [`ResourceSet`](crate::model::ResourceSet) into a validated,
//! acyclic [`DependencyGraph`]. Every embedded reference becomes an implicit
//! edge and every `depends_on` entry an explicit one.

mod builder;
mod dependency;

pub use builder::GraphBuilder;
pub use dependency::{DependencyGraph, EdgeKind};
