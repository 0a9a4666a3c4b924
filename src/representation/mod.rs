//! Intermediate representation of an integral, ready for code generation
//!
//! - [`IntegralData`] - Integral type plus (quadrature rule, integrand) pairs
//! - [`ExprIr`] - Analysed scalar graph of one quadrature point group
//! - [`IntegralIr`] - All point groups of one integral
//! - [`tables`] - Basis table lookup

pub mod tables;

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::analysis::{
    ArgumentFactorization, Classification, GraphMode, ScalarOp, build_graph, build_scalar_graph,
    classify, compute_argument_factorization, compute_dependencies, compute_dependency_count,
    invert_dependencies, mark_active, value_numbering,
};
use crate::core::error::CompileError;
use crate::core::expr::{Expr, Restriction};
use crate::core::modified::ModifiedTerminal;
use crate::core::terminal::{Cell, FiniteElement, FormArgumentKind, FormContext, Terminal};
use crate::timing::TicToc;
use tables::{EntityType, Table, TableProvider, TableRange};

/// Domain an integral is taken over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntegralType {
    Cell,
    ExteriorFacet,
    InteriorFacet,
    Vertex,
}

impl IntegralType {
    pub const fn entity_type(self) -> EntityType {
        match self {
            Self::Cell => EntityType::Cell,
            Self::ExteriorFacet | Self::InteriorFacet => EntityType::Facet,
            Self::Vertex => EntityType::Vertex,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Cell => "cell",
            Self::ExteriorFacet => "exterior_facet",
            Self::InteriorFacet => "interior_facet",
            Self::Vertex => "vertex",
        }
    }

    /// Number of entities tables are tabulated on
    pub const fn num_entities(self, cell: &Cell) -> usize {
        match self {
            Self::Cell => 1,
            Self::ExteriorFacet | Self::InteriorFacet => cell.num_facets(),
            Self::Vertex => cell.num_vertices(),
        }
    }
}

/// Quadrature points (reference coordinates) and weights
#[derive(Debug, Clone, PartialEq)]
pub struct QuadratureRule {
    pub points: Vec<Vec<f64>>,
    pub weights: Vec<f64>,
}

impl QuadratureRule {
    pub fn new(points: Vec<Vec<f64>>, weights: Vec<f64>) -> Self {
        Self { points, weights }
    }

    /// One point with the given weight
    pub fn single(point: Vec<f64>, weight: f64) -> Self {
        Self::new(vec![point], vec![weight])
    }

    pub fn num_points(&self) -> usize {
        self.weights.len()
    }

    fn validate(&self) -> Result<(), CompileError> {
        if self.weights.is_empty() {
            return Err(CompileError::invalid_input("quadrature rule without points"));
        }
        if self.points.len() != self.weights.len() {
            return Err(CompileError::invalid_input(format!(
                "quadrature rule has {} points but {} weights",
                self.points.len(),
                self.weights.len()
            )));
        }
        Ok(())
    }
}

/// An integral to compile
#[derive(Debug, Clone)]
pub struct IntegralData {
    pub integral_type: IntegralType,
    pub integrands: Vec<(QuadratureRule, Expr)>,
}

impl IntegralData {
    pub fn new(integral_type: IntegralType) -> Self {
        Self {
            integral_type,
            integrands: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_integrand(mut self, rule: QuadratureRule, integrand: Expr) -> Self {
        self.integrands.push((rule, integrand));
        self
    }
}

/// Limits applied while building the representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrOptions {
    pub max_rank: usize,
    pub max_derivative_order: usize,
    pub enable_profiling: bool,
}

impl Default for IrOptions {
    fn default() -> Self {
        Self {
            max_rank: 2,
            max_derivative_order: 2,
            enable_profiling: false,
        }
    }
}

/// Analysed scalar graph of one integrand at one point count
#[derive(Debug, Clone)]
pub struct ExprIr {
    pub num_points: usize,
    pub vertices: Vec<ScalarOp>,
    /// Scalar integrand before factorization
    pub targets: Vec<usize>,
    pub argument_factorization: ArgumentFactorization,
    pub dependencies: Vec<Vec<usize>>,
    pub inverse_dependencies: Vec<Vec<usize>>,
    pub depcount: Vec<usize>,
    /// Liveness and piecewise/varying, seeded at the factor vertices
    pub classification: Classification,
    pub active_count: usize,
    /// Table of each active coefficient vertex; `None` for direct dof reads
    pub table_ranges: Vec<Option<TableRange>>,
    /// Table of each modified argument, aligned with the factorization
    pub modified_argument_table_ranges: Vec<TableRange>,
}

/// One quadrature point group of an integral
#[derive(Debug, Clone)]
pub struct QuadratureGroup {
    pub rule: QuadratureRule,
    pub expr_ir: ExprIr,
}

/// Representation of a whole integral
#[derive(Debug, Clone)]
pub struct IntegralIr {
    pub integral_type: IntegralType,
    pub cell: Cell,
    pub rank: usize,
    /// Output tensor dimension per argument slot
    pub argument_dims: Vec<usize>,
    /// Point count -> group, in increasing point count
    pub groups: BTreeMap<usize, QuadratureGroup>,
    pub unique_tables: BTreeMap<String, Table>,
}

impl IntegralIr {
    /// Number of entries of the output tensor
    pub fn output_size(&self) -> usize {
        self.argument_dims.iter().product()
    }
}

/// Element of a form argument terminal
pub fn form_argument_element<'a>(
    ctx: &'a FormContext,
    mt: &ModifiedTerminal,
) -> Option<&'a FiniteElement> {
    match mt.terminal {
        Terminal::FormArgument(id) => ctx.get(id).map(|fa| fa.element.as_ref()),
        _ => None,
    }
}

/// Dof offset of a form argument: '-' restricted dofs follow the '+' ones
pub fn dof_offset(ctx: &FormContext, mt: &ModifiedTerminal) -> usize {
    match (mt.restriction, form_argument_element(ctx, mt)) {
        (Some(Restriction::Negative), Some(element)) => element.space_dimension,
        _ => 0,
    }
}

fn check_restriction(integral_type: IntegralType, mt: &ModifiedTerminal) -> Result<(), CompileError> {
    match (integral_type, mt.restriction) {
        (IntegralType::InteriorFacet, None) => Err(CompileError::invalid_input(
            "form argument must be restricted in an interior facet integral",
        )),
        (IntegralType::InteriorFacet, Some(_)) | (_, None) => Ok(()),
        (_, Some(_)) => Err(CompileError::invalid_input(format!(
            "restricted form argument in a {} integral",
            integral_type.name()
        ))),
    }
}

fn lookup_table(
    ctx: &FormContext,
    integral_type: IntegralType,
    num_points: usize,
    tables: &dyn TableProvider,
    mt: &ModifiedTerminal,
    element: &FiniteElement,
) -> Option<TableRange> {
    let dim = if mt.reference_derivatives {
        ctx.cell().tdim
    } else {
        ctx.cell().gdim
    };
    let num_points = if mt.averaged.is_some() { 1 } else { num_points };
    tables.table_range(
        element,
        mt.flat_component,
        &mt.derivative_counts(dim),
        integral_type.entity_type(),
        num_points,
    )
}

/// Build the representation of one integrand evaluated at `num_points` points.
///
/// # Errors
/// Any error of the analysis passes, plus `MissingTable` when a form
/// argument needs a basis table the provider does not have.
pub fn compute_expr_ir(
    ctx: &FormContext,
    integral_type: IntegralType,
    integrand: &Expr,
    num_points: usize,
    tables: &dyn TableProvider,
    options: &IrOptions,
) -> Result<ExprIr, CompileError> {
    let mut tt = TicToc::new("compute_expr_ir");

    let graph = build_graph(std::slice::from_ref(integrand), GraphMode::ModifiedTerminalsAsUnits)?;
    tt.step("build graph");
    let symbols = value_numbering(&graph, ctx, options.max_derivative_order)?;
    tt.step("value numbering");
    let mut scalar = build_scalar_graph(&graph, &symbols)?;
    tt.step("scalar graph");
    let argument_factorization =
        compute_argument_factorization(&mut scalar, ctx, options.max_rank)?;
    tt.step("argument factorization");

    let dependencies = compute_dependencies(&scalar.vertices);
    let depcount = compute_dependency_count(&dependencies);
    let inverse_dependencies = invert_dependencies(&dependencies, &depcount);
    let factor_vertices: Vec<usize> = argument_factorization.factors.values().copied().collect();
    let (active, active_count) = mark_active(&dependencies, &factor_vertices);
    let classification = classify(&scalar.vertices, &active, &inverse_dependencies, |mt| {
        mt.averaged.is_some() || ctx.is_cellwise_constant(&mt.terminal)
    });
    tt.step("dependencies");

    let mut table_ranges: Vec<Option<TableRange>> = vec![None; scalar.len()];
    for (v, op) in scalar.vertices.iter().enumerate() {
        let Some(mt) = op.as_modified_terminal() else {
            continue;
        };
        let Some(element) = form_argument_element(ctx, mt) else {
            continue;
        };
        if !classification.active[v] {
            continue;
        }
        check_restriction(integral_type, mt)?;
        let range = lookup_table(ctx, integral_type, num_points, tables, mt, element);
        if range.is_none() {
            if element.cellwise_constant && mt.derivatives.is_empty() {
                warn!(
                    element = %element.label(),
                    component = mt.flat_component,
                    "no table for cellwise constant coefficient, reading dof directly"
                );
            } else {
                return Err(CompileError::MissingTable(format!(
                    "{} component {} derivatives {:?} at {num_points} points",
                    element.label(),
                    mt.flat_component,
                    mt.derivatives
                )));
            }
        }
        table_ranges[v] = range;
    }

    let modified_argument_table_ranges = argument_factorization
        .modified_arguments
        .iter()
        .map(|ma| {
            check_restriction(integral_type, &ma.terminal)?;
            form_argument_element(ctx, &ma.terminal)
                .and_then(|element| {
                    lookup_table(ctx, integral_type, num_points, tables, &ma.terminal, element)
                })
                .ok_or_else(|| {
                    CompileError::MissingTable(format!(
                        "argument {} component {} derivatives {:?} at {num_points} points",
                        ma.number, ma.terminal.flat_component, ma.terminal.derivatives
                    ))
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    tt.step("table ranges");

    debug!(
        vertices = scalar.len(),
        active = active_count,
        terms = argument_factorization.factors.len(),
        num_points,
        "expression representation"
    );
    tt.finish(options.enable_profiling);

    Ok(ExprIr {
        num_points,
        vertices: scalar.vertices,
        targets: scalar.targets,
        argument_factorization,
        dependencies,
        inverse_dependencies,
        depcount,
        classification,
        active_count,
        table_ranges,
        modified_argument_table_ranges,
    })
}

/// Merge integrands by point count: identical rules are summed, differing
/// rules with the same point count are rejected
fn group_integrands(
    data: &IntegralData,
) -> Result<BTreeMap<usize, (QuadratureRule, Expr)>, CompileError> {
    let mut groups: BTreeMap<usize, (QuadratureRule, Expr)> = BTreeMap::new();
    for (rule, integrand) in &data.integrands {
        rule.validate()?;
        let num_points = rule.num_points();
        match groups.remove(&num_points) {
            None => {
                groups.insert(num_points, (rule.clone(), integrand.clone()));
            }
            Some((existing, sum)) if existing == *rule => {
                groups.insert(num_points, (existing, sum + integrand.clone()));
            }
            Some(_) => {
                return Err(CompileError::unsupported(format!(
                    "multiple quadrature rules with {num_points} points in one integral"
                )));
            }
        }
    }
    Ok(groups)
}

/// Output tensor dimension per argument slot
fn argument_dimensions(
    ctx: &FormContext,
    integral_type: IntegralType,
) -> Result<Vec<usize>, CompileError> {
    (0..ctx.rank())
        .map(|slot| {
            let element = ctx.argument_element(slot).ok_or_else(|| {
                CompileError::invalid_input(format!("no argument registered for slot {slot}"))
            })?;
            Ok(match integral_type {
                IntegralType::InteriorFacet => 2 * element.space_dimension,
                _ => element.space_dimension,
            })
        })
        .collect()
}

/// Build the representation of every point group of an integral.
///
/// # Errors
/// `InvalidInput` for an integral without integrands or a malformed
/// quadrature rule, `Unsupported` for two rules sharing a point count, and
/// every error of [`compute_expr_ir`].
pub fn compute_integral_ir(
    ctx: &FormContext,
    data: &IntegralData,
    tables: &dyn TableProvider,
    options: &IrOptions,
) -> Result<IntegralIr, CompileError> {
    if data.integrands.is_empty() {
        return Err(CompileError::invalid_input("integral without integrands"));
    }
    let argument_dims = argument_dimensions(ctx, data.integral_type)?;

    let mut groups = BTreeMap::new();
    let mut unique_tables = BTreeMap::new();
    for (num_points, (rule, integrand)) in group_integrands(data)? {
        let expr_ir = compute_expr_ir(
            ctx,
            data.integral_type,
            &integrand,
            num_points,
            tables,
            options,
        )?;
        let names = expr_ir
            .table_ranges
            .iter()
            .flatten()
            .chain(&expr_ir.modified_argument_table_ranges)
            .map(|range| range.name.clone());
        for name in names {
            if unique_tables.contains_key(&name) {
                continue;
            }
            let table = tables
                .unique_table(&name)
                .ok_or_else(|| CompileError::MissingTable(name.clone()))?;
            unique_tables.insert(name, table.clone());
        }
        groups.insert(num_points, QuadratureGroup { rule, expr_ir });
    }

    let coefficients = ctx
        .form_arguments()
        .filter(|fa| matches!(fa.kind, FormArgumentKind::Coefficient { .. }))
        .count();
    debug!(
        integral_type = data.integral_type.name(),
        groups = groups.len(),
        tables = unique_tables.len(),
        coefficients,
        "integral representation"
    );

    Ok(IntegralIr {
        integral_type: data.integral_type,
        cell: *ctx.cell(),
        rank: argument_dims.len(),
        argument_dims,
        groups,
        unique_tables,
    })
}
