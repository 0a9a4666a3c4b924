//! Terminals and the per-form argument registry.
//!
//! Terminals are the leaves of an integrand expression: literal constants,
//! form arguments (test/trial functions and coefficients) and geometric
//! quantities of the cell. Form arguments are registered in a [`FormContext`]
//! that is owned by the caller and passed explicitly to the compiler, so two
//! forms compiled concurrently never share registry state.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use slotmap::{SlotMap, new_key_type};

use super::expr::{Expr, ExprKind, Index};
use super::indexing::product;

new_key_type! {
    /// Key of a form argument inside a [`FormContext`]
    pub struct FormArgumentId;
}

// =============================================================================
// CELL AND ELEMENT DESCRIPTORS
// =============================================================================

/// Reference cell the form is defined on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cell {
    pub name: &'static str,
    /// Geometric dimension
    pub gdim: usize,
    /// Topological dimension
    pub tdim: usize,
    /// Whether the reference-to-physical map is affine (constant Jacobian)
    pub affine: bool,
}

impl Cell {
    pub const fn interval() -> Self {
        Self {
            name: "interval",
            gdim: 1,
            tdim: 1,
            affine: true,
        }
    }

    pub const fn triangle() -> Self {
        Self {
            name: "triangle",
            gdim: 2,
            tdim: 2,
            affine: true,
        }
    }

    pub const fn tetrahedron() -> Self {
        Self {
            name: "tetrahedron",
            gdim: 3,
            tdim: 3,
            affine: true,
        }
    }

    pub const fn quadrilateral() -> Self {
        Self {
            name: "quadrilateral",
            gdim: 2,
            tdim: 2,
            affine: false,
        }
    }

    pub const fn num_vertices(&self) -> usize {
        match self.tdim {
            1 => 2,
            2 if self.affine => 3,
            _ => 4,
        }
    }

    pub const fn num_facets(&self) -> usize {
        self.num_vertices()
    }

    /// Volume of the reference cell
    pub fn reference_volume(&self) -> f64 {
        if !self.affine {
            return 1.0;
        }
        match self.tdim {
            1 => 1.0,
            2 => 0.5,
            _ => 1.0 / 6.0,
        }
    }

    /// Volume of a reference facet
    pub fn reference_facet_volume(&self) -> f64 {
        if self.affine && self.tdim == 3 { 0.5 } else { 1.0 }
    }
}

/// Descriptor of a finite element space, as far as the compiler needs it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FiniteElement {
    pub family: String,
    pub degree: u32,
    pub cell: Cell,
    /// Shape of the physical value of a function in this space
    pub value_shape: Vec<usize>,
    /// Shape of the value on the reference cell (differs for Piola mapped elements)
    pub reference_value_shape: Vec<usize>,
    /// Number of local degrees of freedom
    pub space_dimension: usize,
    /// Component symmetries: component -> canonical component
    pub symmetry: BTreeMap<Vec<usize>, Vec<usize>>,
    /// Functions in this space are constant on each cell
    pub cellwise_constant: bool,
}

/// Dimension of the degree `degree` polynomial space on a simplex of dimension `tdim`
fn simplex_dimension(degree: u32, tdim: usize) -> usize {
    // binomial(degree + tdim, tdim)
    let mut num = 1usize;
    let mut den = 1usize;
    for k in 1..=tdim {
        num *= degree as usize + k;
        den *= k;
    }
    num / den
}

impl FiniteElement {
    /// Continuous Lagrange element of the given degree
    #[must_use]
    pub fn lagrange(cell: Cell, degree: u32) -> Self {
        let space_dimension = if cell.affine {
            simplex_dimension(degree, cell.tdim)
        } else {
            (degree as usize + 1).pow(cell.tdim as u32)
        };
        Self {
            family: "Lagrange".to_owned(),
            degree,
            cell,
            value_shape: Vec::new(),
            reference_value_shape: Vec::new(),
            space_dimension,
            symmetry: BTreeMap::new(),
            cellwise_constant: false,
        }
    }

    /// Discontinuous Lagrange element; degree 0 is cellwise constant
    #[must_use]
    pub fn discontinuous_lagrange(cell: Cell, degree: u32) -> Self {
        let mut element = Self::lagrange(cell, degree);
        element.family = "Discontinuous Lagrange".to_owned();
        element.cellwise_constant = degree == 0;
        element
    }

    /// Global constant (one value per cell, no basis variation)
    #[must_use]
    pub fn real(cell: Cell) -> Self {
        let mut element = Self::discontinuous_lagrange(cell, 0);
        element.family = "Real".to_owned();
        element
    }

    /// Vector valued element with `dim` copies of `self`
    #[must_use]
    pub fn vector(self, dim: usize) -> Self {
        self.tensor(vec![dim], false)
    }

    /// Tensor valued element with copies of `self`, optionally symmetric
    ///
    /// A symmetric element must have a square 2-tensor shape; the component
    /// `(i, j)` with `i > j` is mapped to `(j, i)`.
    #[must_use]
    pub fn tensor(self, shape: Vec<usize>, symmetric: bool) -> Self {
        let mut symmetry = BTreeMap::new();
        let mut unique_components = product(&shape);
        if symmetric && shape.len() == 2 && shape[0] == shape[1] {
            let n = shape[0];
            for i in 0..n {
                for j in 0..i {
                    symmetry.insert(vec![i, j], vec![j, i]);
                }
            }
            unique_components = n * (n + 1) / 2;
        }
        Self {
            family: self.family,
            degree: self.degree,
            cell: self.cell,
            value_shape: shape.clone(),
            reference_value_shape: shape,
            space_dimension: self.space_dimension * unique_components,
            symmetry,
            cellwise_constant: self.cellwise_constant,
        }
    }

    /// Override the reference value shape (Piola mapped elements)
    #[must_use]
    pub fn with_reference_value_shape(mut self, shape: Vec<usize>) -> Self {
        self.reference_value_shape = shape;
        self
    }

    /// Short label used in generated names and diagnostics
    pub fn label(&self) -> String {
        let shape: Vec<String> = self.value_shape.iter().map(ToString::to_string).collect();
        format!(
            "{} {} on {} [{}]",
            self.family,
            self.degree,
            self.cell.name,
            shape.join(",")
        )
    }
}

// =============================================================================
// TERMINALS
// =============================================================================

/// A literal scalar compared and hashed by bit pattern
#[derive(Debug, Clone, Copy)]
pub struct ScalarValue(pub f64);

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

/// Literal constant tensors
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Scalar(ScalarValue),
    /// Zero tensor of the given shape
    Zero(Vec<usize>),
    /// Identity matrix of the given dimension
    Identity(usize),
}

impl Literal {
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Self::Scalar(_) => Vec::new(),
            Self::Zero(shape) => shape.clone(),
            Self::Identity(n) => vec![*n, *n],
        }
    }

    /// Value of a component given as a multi-index
    pub fn component_value(&self, component: &[usize]) -> f64 {
        match self {
            Self::Scalar(v) => v.0,
            Self::Zero(_) => 0.0,
            Self::Identity(_) => {
                if component.len() == 2 && component[0] == component[1] {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Geometric quantities of the integration cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GeometricQuantity {
    SpatialCoordinate,
    Jacobian,
    JacobianInverse,
    JacobianDeterminant,
    FacetNormal,
    CellVolume,
    Circumradius,
    FacetArea,
}

impl GeometricQuantity {
    pub fn shape(self, cell: &Cell) -> Vec<usize> {
        match self {
            Self::SpatialCoordinate | Self::FacetNormal => vec![cell.gdim],
            Self::Jacobian => vec![cell.gdim, cell.tdim],
            Self::JacobianInverse => vec![cell.tdim, cell.gdim],
            Self::JacobianDeterminant | Self::CellVolume | Self::Circumradius | Self::FacetArea => {
                Vec::new()
            }
        }
    }

    /// Whether the quantity is constant over each cell
    pub fn is_cellwise_constant(self, cell: &Cell) -> bool {
        match self {
            Self::SpatialCoordinate => false,
            Self::Jacobian
            | Self::JacobianInverse
            | Self::JacobianDeterminant
            | Self::FacetNormal => cell.affine,
            Self::CellVolume | Self::Circumradius | Self::FacetArea => true,
        }
    }

    /// Variable name used by generated code
    pub fn name(self) -> &'static str {
        match self {
            Self::SpatialCoordinate => "x",
            Self::Jacobian => "J",
            Self::JacobianInverse => "K",
            Self::JacobianDeterminant => "detJ",
            Self::FacetNormal => "n",
            Self::CellVolume => "volume",
            Self::Circumradius => "circumradius",
            Self::FacetArea => "facet_area",
        }
    }
}

/// The leaf of an expression tree
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Terminal {
    Literal(Literal),
    FormArgument(FormArgumentId),
    Geometry(GeometricQuantity),
}

impl Terminal {
    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Self::Literal(l) => Some(l),
            _ => None,
        }
    }
}

/// Role of a form argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormArgumentKind {
    /// Test/trial function occupying argument slot `number`
    Argument { number: usize },
    /// Known function whose dofs are an input to the generated code
    Coefficient { count: usize },
}

/// A registered form argument
#[derive(Debug, Clone, PartialEq)]
pub struct FormArgument {
    pub kind: FormArgumentKind,
    pub element: Arc<FiniteElement>,
}

impl FormArgument {
    pub fn is_argument(&self) -> bool {
        matches!(self.kind, FormArgumentKind::Argument { .. })
    }

    pub fn argument_number(&self) -> Option<usize> {
        match self.kind {
            FormArgumentKind::Argument { number } => Some(number),
            FormArgumentKind::Coefficient { .. } => None,
        }
    }
}

// =============================================================================
// FORM CONTEXT
// =============================================================================

/// Registry of the form arguments and free indices of one form.
///
/// # Example
/// ```
/// use formgen::{Cell, FiniteElement, FormContext};
///
/// let mut ctx = FormContext::new(Cell::triangle());
/// let element = FiniteElement::lagrange(Cell::triangle(), 1);
/// let v = ctx.argument(0, element.clone());
/// let u = ctx.argument(1, element);
/// let integrand = u * v;
/// assert!(integrand.shape().is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct FormContext {
    cell: Cell,
    form_arguments: SlotMap<FormArgumentId, FormArgument>,
    coefficient_count: usize,
    index_count: u32,
}

impl FormContext {
    pub fn new(cell: Cell) -> Self {
        Self {
            cell,
            form_arguments: SlotMap::with_key(),
            coefficient_count: 0,
            index_count: 0,
        }
    }

    pub fn cell(&self) -> &Cell {
        &self.cell
    }

    /// Register the argument for slot `number` and return its terminal expression
    pub fn argument(&mut self, number: usize, element: FiniteElement) -> Expr {
        self.register(FormArgumentKind::Argument { number }, element)
    }

    /// Register a new coefficient and return its terminal expression
    pub fn coefficient(&mut self, element: FiniteElement) -> Expr {
        let count = self.coefficient_count;
        self.coefficient_count += 1;
        self.register(FormArgumentKind::Coefficient { count }, element)
    }

    /// Register a cellwise constant scalar coefficient
    pub fn constant(&mut self) -> Expr {
        let element = FiniteElement::real(self.cell);
        self.coefficient(element)
    }

    fn register(&mut self, kind: FormArgumentKind, element: FiniteElement) -> Expr {
        let shape = element.value_shape.clone();
        let id = self.form_arguments.insert(FormArgument {
            kind,
            element: Arc::new(element),
        });
        Expr::terminal(Terminal::FormArgument(id), shape)
    }

    /// Terminal expression for a geometric quantity of this form's cell
    pub fn geometry(&self, quantity: GeometricQuantity) -> Expr {
        Expr::terminal(Terminal::Geometry(quantity), quantity.shape(&self.cell))
    }

    pub fn spatial_coordinate(&self) -> Expr {
        self.geometry(GeometricQuantity::SpatialCoordinate)
    }

    /// Create `n` fresh free indices
    pub fn indices(&mut self, n: usize) -> Vec<Index> {
        (0..n)
            .map(|_| {
                let i = Index(self.index_count);
                self.index_count += 1;
                i
            })
            .collect()
    }

    /// Create one fresh free index
    pub fn index(&mut self) -> Index {
        let i = Index(self.index_count);
        self.index_count += 1;
        i
    }

    pub fn get(&self, id: FormArgumentId) -> Option<&FormArgument> {
        self.form_arguments.get(id)
    }

    pub fn form_arguments(&self) -> impl Iterator<Item = &FormArgument> {
        self.form_arguments.values()
    }

    /// Element of the argument in slot `number`
    pub fn argument_element(&self, number: usize) -> Option<&FiniteElement> {
        self.form_arguments
            .values()
            .find(|fa| fa.argument_number() == Some(number))
            .map(|fa| fa.element.as_ref())
    }

    /// Number of argument slots (0 = functional, 1 = linear, 2 = bilinear)
    pub fn rank(&self) -> usize {
        self.form_arguments
            .values()
            .filter_map(FormArgument::argument_number)
            .map(|n| n + 1)
            .max()
            .unwrap_or(0)
    }

    /// Global gradient, appending an axis of size `gdim`
    pub fn grad(&self, f: &Expr) -> Expr {
        Expr::derivative(f.clone(), false, self.cell.gdim)
    }

    /// Gradient in reference coordinates, appending an axis of size `tdim`
    pub fn reference_grad(&self, f: &Expr) -> Expr {
        Expr::derivative(f.clone(), true, self.cell.tdim)
    }

    /// Partial derivative of a scalar expression in global direction `direction`
    pub fn dx(&self, f: &Expr, direction: usize) -> Expr {
        self.grad(f).index_fixed(&[direction])
    }

    /// Full contraction `a : b` of two tensors of equal shape
    pub fn inner(&mut self, a: &Expr, b: &Expr) -> Expr {
        if a.shape().is_empty() {
            return a * b;
        }
        let items: Vec<_> = self
            .indices(a.shape().len())
            .into_iter()
            .map(Into::into)
            .collect();
        a.clone().index(&items) * b.clone().index(&items)
    }

    /// Value of a form argument in reference coordinates
    ///
    /// Returns the expression unchanged if it is not a form argument terminal.
    pub fn reference_value(&self, f: &Expr) -> Expr {
        let shape = match f.kind() {
            ExprKind::Terminal(Terminal::FormArgument(id)) => self
                .get(*id)
                .map(|fa| fa.element.reference_value_shape.clone()),
            _ => None,
        };
        match shape {
            Some(shape) => Expr::reference_value(f.clone(), shape),
            None => f.clone(),
        }
    }

    /// Capability query used by the piecewise/varying classification
    pub fn is_cellwise_constant(&self, terminal: &Terminal) -> bool {
        match terminal {
            Terminal::Literal(_) => true,
            Terminal::Geometry(q) => q.is_cellwise_constant(&self.cell),
            Terminal::FormArgument(id) => self
                .get(*id)
                .is_some_and(|fa| fa.element.cellwise_constant),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lagrange_dimensions() {
        assert_eq!(FiniteElement::lagrange(Cell::triangle(), 1).space_dimension, 3);
        assert_eq!(FiniteElement::lagrange(Cell::triangle(), 2).space_dimension, 6);
        assert_eq!(FiniteElement::lagrange(Cell::tetrahedron(), 1).space_dimension, 4);
        assert_eq!(FiniteElement::lagrange(Cell::quadrilateral(), 1).space_dimension, 4);
    }

    #[test]
    fn test_symmetric_tensor_element() {
        let element = FiniteElement::lagrange(Cell::triangle(), 1).tensor(vec![2, 2], true);
        assert_eq!(element.symmetry.len(), 1);
        assert_eq!(element.symmetry.get(&vec![1, 0]), Some(&vec![0, 1]));
        assert_eq!(element.space_dimension, 9);
    }

    #[test]
    fn test_rank_counts_argument_slots() {
        let mut ctx = FormContext::new(Cell::triangle());
        assert_eq!(ctx.rank(), 0);
        let element = FiniteElement::lagrange(Cell::triangle(), 1);
        ctx.coefficient(element.clone());
        ctx.argument(0, element.clone());
        assert_eq!(ctx.rank(), 1);
        ctx.argument(1, element);
        assert_eq!(ctx.rank(), 2);
    }

    #[test]
    fn test_cellwise_constant_queries() {
        let mut ctx = FormContext::new(Cell::triangle());
        let f = ctx.constant();
        let g = ctx.coefficient(FiniteElement::lagrange(Cell::triangle(), 1));
        let id_of = |e: &Expr| match e.kind() {
            ExprKind::Terminal(t) => t.clone(),
            _ => unreachable!(),
        };
        assert!(ctx.is_cellwise_constant(&id_of(&f)));
        assert!(!ctx.is_cellwise_constant(&id_of(&g)));
        assert!(ctx.is_cellwise_constant(&Terminal::Geometry(GeometricQuantity::Jacobian)));
        assert!(!ctx.is_cellwise_constant(&Terminal::Geometry(
            GeometricQuantity::SpatialCoordinate
        )));
    }
}
