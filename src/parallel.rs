//! Parallel batch compilation using Rayon
//!
//! Enable with the `parallel` feature:
//! ```toml
//! formgen = { version = "0.1", features = ["parallel"] }
//! ```

use rayon::prelude::*;
use tracing::debug;

use crate::builder::{CompiledIntegral, FormCompiler};
use crate::core::error::CompileError;
use crate::core::terminal::FormContext;
use crate::representation::IntegralData;
use crate::representation::tables::TableProvider;

/// Compile many integrals of one form on the rayon pool.
///
/// Results come back in input order and failures stay scoped to the
/// integral that caused them. Compiles share no mutable state, so the
/// output matches [`FormCompiler::compile_integrals`] exactly.
///
/// # Example
/// ```
/// use formgen::parallel::compile_integrals_parallel;
/// use formgen::{
///     Cell, ElementTables, Expr, FormCompiler, FormContext, IntegralData, IntegralType,
///     QuadratureRule,
/// };
///
/// let ctx = FormContext::new(Cell::triangle());
/// let rule = QuadratureRule::single(vec![1.0 / 3.0, 1.0 / 3.0], 0.5);
/// let integrals: Vec<_> = (1..4)
///     .map(|k| {
///         IntegralData::new(IntegralType::Cell)
///             .with_integrand(rule.clone(), Expr::constant(f64::from(k)))
///     })
///     .collect();
/// let results =
///     compile_integrals_parallel(&FormCompiler::new(), &ctx, &integrals, &ElementTables::new());
/// assert_eq!(results.len(), 3);
/// assert!(results.iter().all(Result::is_ok));
/// ```
pub fn compile_integrals_parallel(
    compiler: &FormCompiler,
    ctx: &FormContext,
    integrals: &[IntegralData],
    tables: &(dyn TableProvider + Sync),
) -> Vec<Result<CompiledIntegral, CompileError>> {
    debug!(count = integrals.len(), "parallel compile");
    integrals
        .par_iter()
        .map(|data| compiler.compile(ctx, data, tables))
        .collect()
}
