//! Finite Element Integrand Compiler
//!
//! A middle-end that turns a symbolic integrand into straight-line code
//! computing an element tensor.
//!
//! # Features
//! - Tensor-valued integrand expressions with free indices, derivatives,
//!   restrictions and cell/facet averages
//! - Scalar relinearization with value numbering and common subexpression
//!   elimination
//! - Factorization of the integrand by its argument functions
//! - Piecewise/varying classification to hoist work out of the point loop
//! - **Builder pattern API** for configuring a compile
//! - Default C backend; custom backends through the `Language`,
//!   `AccessResolver` and `DefinitionsResolver` traits
//!
//! # Pipeline
//! 1. Graph building ([`analysis::build_graph`])
//! 2. Value numbering ([`analysis::value_numbering`])
//! 3. Scalar graph ([`analysis::build_scalar_graph`])
//! 4. Argument factorization ([`analysis::compute_argument_factorization`])
//! 5. Dependencies and classification ([`analysis::classify`])
//! 6. Table lookup ([`representation::compute_integral_ir`])
//! 7. Code generation ([`codegen::generate_integral`])
//!
//! # Usage
//! ```
//! use formgen::{
//!     Cell, ElementTables, EntityType, FiniteElement, FormCompiler, FormContext, IntegralData,
//!     IntegralType, QuadratureRule, Table,
//! };
//!
//! let cell = Cell::triangle();
//! let element = FiniteElement::discontinuous_lagrange(cell, 0);
//! let mut ctx = FormContext::new(cell);
//! let v = ctx.argument(0, element.clone());
//! let f = ctx.coefficient(element.clone());
//!
//! let mut tables = ElementTables::new();
//! tables.insert(&element, 0, &[0, 0], EntityType::Cell, Table::cell(vec![vec![1.0]]))?;
//!
//! let data = IntegralData::new(IntegralType::Cell)
//!     .with_integrand(QuadratureRule::single(vec![1.0 / 3.0, 1.0 / 3.0], 0.5), f * v);
//! let compiled = FormCompiler::new().compile(&ctx, &data, &tables)?;
//! assert!(compiled.code.contains("A[0] +="));
//! # Ok::<(), formgen::CompileError>(())
//! ```

pub mod analysis;
mod builder;
pub mod codegen;
pub mod core;
pub mod representation;
mod timing;

#[cfg(feature = "parallel")]
pub mod parallel;

#[cfg(test)]
mod tests;

// Re-export key types for easier usage
pub use builder::{CompiledIntegral, FormCompiler};
pub use codegen::{Backend, Node, Stmt};
pub use crate::core::{
    Averaging, Cell, ComparisonOp, CompileError, EvalScalar, Expr, ExprKind, FiniteElement,
    FormArgumentId, FormContext, GeometricQuantity, Index, IndexItem, MathFunction,
    ModifiedTerminal, Restriction,
};
pub use representation::tables::{ElementTables, EntityType, Table, TableProvider, TableRange};
pub use representation::{
    IntegralData, IntegralIr, IntegralType, IrOptions, QuadratureRule, compute_integral_ir,
};
pub use timing::TicToc;
