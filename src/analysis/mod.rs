//! Graph analyses between the expression tree and the code generator
//!
//! - `graph` - Deduplicated tensor vertex array
//! - `valuenumbering` - Symbols per scalar component
//! - `scalar` - Scalar vertex array built from the symbols
//! - `dependencies` - Dependency, liveness and piecewise/varying passes
//! - `factorization` - Argument factorization of multilinear integrands
//! - `evaluate` - Numeric evaluation of scalar vertices

pub mod dependencies;
pub mod evaluate;
pub mod factorization;
pub mod graph;
pub mod scalar;
pub mod valuenumbering;

pub use dependencies::{
    Classification, classify, compute_dependencies, compute_dependency_count,
    invert_dependencies, mark_active, mark_image,
};
pub use evaluate::evaluate_vertices;
pub use factorization::{
    ArgumentFactorization, FactorMap, ModifiedArgument, compute_argument_factorization,
};
pub use graph::{Graph, GraphMode, Vertex, build_graph};
pub use scalar::{ScalarGraph, ScalarOp, build_scalar_graph};
pub use valuenumbering::{Symbol, SymbolTable, value_numbering};
