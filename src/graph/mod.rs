//! Derivation dependency graph over the fields of a schema.
pub mod dag;

pub use dag::{build_graph, GraphError, TopoOrder};
