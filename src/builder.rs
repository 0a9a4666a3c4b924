//! Builder pattern API for compiling integrals
//!
//! Provides a fluent interface for configuring and running the compiler.
//!
//! # Example
//! ```
//! use formgen::{
//!     Cell, ElementTables, EntityType, FiniteElement, FormCompiler, FormContext, IntegralData,
//!     IntegralType, QuadratureRule, Table,
//! };
//!
//! let element = FiniteElement::discontinuous_lagrange(Cell::triangle(), 0);
//! let mut ctx = FormContext::new(Cell::triangle());
//! let v = ctx.argument(0, element.clone());
//! let u = ctx.argument(1, element.clone());
//!
//! let mut tables = ElementTables::new();
//! tables.insert(&element, 0, &[0, 0], EntityType::Cell, Table::cell(vec![vec![1.0]]))?;
//!
//! let data = IntegralData::new(IntegralType::Cell)
//!     .with_integrand(QuadratureRule::single(vec![1.0 / 3.0, 1.0 / 3.0], 0.5), u * v);
//! let compiled = FormCompiler::new().compile(&ctx, &data, &tables)?;
//! assert!(compiled.code.contains("void tabulate_tensor("));
//! # Ok::<(), formgen::CompileError>(())
//! ```

use tracing::{debug, info};

use crate::codegen::{Backend, Stmt, generate_integral};
use crate::core::error::CompileError;
use crate::core::terminal::FormContext;
use crate::core::visitor::{FormArgumentCollector, NodeCounter, walk_expr};
use crate::representation::tables::TableProvider;
use crate::representation::{IntegralData, IntegralIr, IrOptions, compute_integral_ir};
use crate::timing::TicToc;

/// Output of one integral compilation
#[derive(Debug, Clone)]
pub struct CompiledIntegral {
    /// Formatted source of the entry point
    pub code: String,
    /// Statement tree the code was formatted from
    pub statements: Vec<Stmt>,
    pub ir: IntegralIr,
}

/// Builder for integral compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormCompiler {
    max_rank: usize,
    max_derivative_order: usize,
    enable_profiling: bool,
    function_name: String,
    float_precision: Option<usize>,
}

impl Default for FormCompiler {
    fn default() -> Self {
        Self {
            max_rank: 2,
            max_derivative_order: 2,
            enable_profiling: false,
            function_name: "tabulate_tensor".to_owned(),
            float_precision: None,
        }
    }
}

impl FormCompiler {
    /// Create a compiler with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest form rank accepted by the argument factorization
    #[must_use]
    pub fn max_rank(mut self, rank: usize) -> Self {
        self.max_rank = rank;
        self
    }

    /// Longest derivative chain on a single terminal
    #[must_use]
    pub fn max_derivative_order(mut self, order: usize) -> Self {
        self.max_derivative_order = order;
        self
    }

    /// Log a per-step timing profile at `info` level
    #[must_use]
    pub fn enable_profiling(mut self, enable: bool) -> Self {
        self.enable_profiling = enable;
        self
    }

    /// Name of the generated entry point
    #[must_use]
    pub fn function_name(mut self, name: impl Into<String>) -> Self {
        self.function_name = name.into();
        self
    }

    /// Decimals of float literals; `None` for the shortest round-trip form
    #[must_use]
    pub fn float_precision(mut self, precision: Option<usize>) -> Self {
        self.float_precision = precision;
        self
    }

    pub fn ir_options(&self) -> IrOptions {
        IrOptions {
            max_rank: self.max_rank,
            max_derivative_order: self.max_derivative_order,
            enable_profiling: self.enable_profiling,
        }
    }

    /// The default C backend with this compiler's float precision
    pub fn backend(&self) -> Backend {
        Backend::c(self.float_precision)
    }

    /// Build the intermediate representation only
    ///
    /// # Errors
    /// `InvalidInput` if an integrand refers to a form argument that is not
    /// registered in `ctx`, and every error of the analysis passes.
    pub fn compute_ir(
        &self,
        ctx: &FormContext,
        data: &IntegralData,
        tables: &dyn TableProvider,
    ) -> Result<IntegralIr, CompileError> {
        for (_, integrand) in &data.integrands {
            let mut collector = FormArgumentCollector::default();
            walk_expr(integrand, &mut collector);
            if collector.form_arguments.iter().any(|id| ctx.get(*id).is_none()) {
                return Err(CompileError::invalid_input(
                    "integrand refers to a form argument of another context",
                ));
            }
            let mut counter = NodeCounter::default();
            walk_expr(integrand, &mut counter);
            debug!(nodes = counter.count, "integrand");
        }
        compute_integral_ir(ctx, data, tables, &self.ir_options())
    }

    /// Compile an integral with the default C backend
    ///
    /// # Errors
    /// See [`FormCompiler::compile_with_backend`].
    pub fn compile(
        &self,
        ctx: &FormContext,
        data: &IntegralData,
        tables: &dyn TableProvider,
    ) -> Result<CompiledIntegral, CompileError> {
        self.compile_with_backend(ctx, data, tables, &self.backend())
    }

    /// Compile an integral with a custom backend
    ///
    /// # Errors
    /// Any [`CompileError`]; a failed compile produces no output.
    pub fn compile_with_backend(
        &self,
        ctx: &FormContext,
        data: &IntegralData,
        tables: &dyn TableProvider,
        backend: &Backend,
    ) -> Result<CompiledIntegral, CompileError> {
        let mut tt = TicToc::new("compile");
        let ir = self.compute_ir(ctx, data, tables)?;
        tt.step("representation");
        let statements = generate_integral(&ir, ctx, backend)?;
        tt.step("code generation");
        let code = backend
            .language
            .format_function(&self.function_name, ir.integral_type, &statements);
        tt.step("formatting");

        if self.enable_profiling {
            info!(
                integral_type = ir.integral_type.name(),
                bytes = code.len(),
                "compiled integral"
            );
        }
        tt.finish(self.enable_profiling);
        Ok(CompiledIntegral {
            code,
            statements,
            ir,
        })
    }

    /// Compile several integrals of one form in order
    ///
    /// Each integral succeeds or fails on its own.
    pub fn compile_integrals(
        &self,
        ctx: &FormContext,
        integrals: &[IntegralData],
        tables: &dyn TableProvider,
    ) -> Vec<Result<CompiledIntegral, CompileError>> {
        integrals
            .iter()
            .map(|data| self.compile(ctx, data, tables))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expr::Expr;
    use crate::core::terminal::{Cell, FiniteElement};
    use crate::representation::tables::ElementTables;
    use crate::representation::{IntegralType, QuadratureRule};

    #[test]
    fn test_defaults() {
        let c = FormCompiler::new();
        let options = c.ir_options();
        assert_eq!(options.max_rank, 2);
        assert_eq!(options.max_derivative_order, 2);
        assert!(!options.enable_profiling);
    }

    #[test]
    fn test_function_name() {
        let ctx = FormContext::new(Cell::triangle());
        let data = IntegralData::new(IntegralType::Vertex)
            .with_integrand(QuadratureRule::single(vec![0.0, 0.0], 1.0), Expr::constant(1.0));
        let compiled = FormCompiler::new()
            .function_name("my_kernel")
            .compile(&ctx, &data, &ElementTables::new())
            .unwrap();
        assert!(compiled.code.contains("void my_kernel("));
    }

    #[test]
    fn test_foreign_form_argument_is_rejected() {
        let mut other = FormContext::new(Cell::triangle());
        let f = other.coefficient(FiniteElement::lagrange(Cell::triangle(), 1));
        let ctx = FormContext::new(Cell::triangle());
        let data = IntegralData::new(IntegralType::Cell)
            .with_integrand(QuadratureRule::single(vec![0.0, 0.0], 1.0), f);
        let err = FormCompiler::new()
            .compile(&ctx, &data, &ElementTables::new())
            .unwrap_err();
        assert!(matches!(err, CompileError::InvalidInput(_)));
    }

    #[test]
    fn test_deeply_shared_integrand_compiles() {
        let mut ctx = FormContext::new(Cell::triangle());
        let mut e = ctx.constant();
        for _ in 0..48 {
            e = &e * &e;
        }
        let data = IntegralData::new(IntegralType::Cell)
            .with_integrand(QuadratureRule::single(vec![1.0 / 3.0, 1.0 / 3.0], 0.5), e);
        let ir = FormCompiler::new()
            .compute_ir(&ctx, &data, &ElementTables::new())
            .unwrap();
        assert!(ir.groups[&1].expr_ir.vertices.len() < 100);
    }
}
