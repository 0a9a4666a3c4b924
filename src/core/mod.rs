//! Core types of the integrand language
//!
//! This module contains the fundamental types:
//! - `Expr` / `ExprKind` - Tensor expression tree
//! - `Cell`, `FiniteElement`, `FormContext` - Terminals and their registry
//! - `ModifiedTerminal` - A terminal with its derivative/restriction/averaging wrappers
//! - `CompileError` - Error type
//! - Visitor pattern for expression traversal

mod display; // Display implementations for Expr
pub mod error;
pub mod expr;
pub mod indexing;
pub mod modified;
pub mod terminal;
pub(crate) mod traits;
pub mod visitor;

pub use error::CompileError;
pub use expr::{
    Averaging, BoolOp, ComparisonOp, Expr, ExprKind, Index, IndexItem, MathFunction, Restriction,
};
pub use modified::ModifiedTerminal;
pub use terminal::{
    Cell, FiniteElement, FormArgument, FormArgumentId, FormArgumentKind, FormContext,
    GeometricQuantity, Literal, Terminal,
};
pub use traits::EvalScalar;
