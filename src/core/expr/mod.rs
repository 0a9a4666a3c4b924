//! Tensor-valued integrand expressions.
//!
//! This module defines:
//! - `Expr` - an immutable, `Arc`-shared expression node
//! - `ExprKind` - the closed set of operator kinds
//! - `Index`, `IndexItem` - free indices and index slots of `Indexed`
//!
//! # Architecture
//!
//! ## Shape and free indices
//! Every node carries its tensor shape and its free indices (with their
//! dimensions, sorted by index id). Both are computed once by the
//! constructors, so graph building and value numbering never recompute them.
//!
//! ## Structural Hashing
//! Each `Expr` has a pre-computed `hash` field for O(1) equality rejection.
//! Children contribute their cached hash, so hashing a node is O(arity).
//!
//! # Usage
//!
//! ```
//! use formgen::{Cell, Expr, FiniteElement, FormContext};
//!
//! let mut ctx = FormContext::new(Cell::triangle());
//! let element = FiniteElement::lagrange(Cell::triangle(), 1);
//! let v = ctx.argument(0, element.clone());
//! let f = ctx.coefficient(element);
//! let integrand = Expr::constant(2.0) * f * v;
//! assert!(integrand.free_indices().is_empty());
//! ```

mod constructors;
mod operators;

use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use super::terminal::Terminal;

/// A free index, created by [`FormContext::indices`](crate::FormContext::indices)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Index(pub u32);

/// One slot of an `Indexed` node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexItem {
    Fixed(usize),
    Free(Index),
}

impl From<usize> for IndexItem {
    fn from(value: usize) -> Self {
        Self::Fixed(value)
    }
}

impl From<Index> for IndexItem {
    fn from(value: Index) -> Self {
        Self::Free(value)
    }
}

/// Elementary scalar functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MathFunction {
    Sqrt,
    Exp,
    Ln,
    Sin,
    Cos,
    Tan,
    Abs,
    Atan,
}

impl MathFunction {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sqrt => "sqrt",
            Self::Exp => "exp",
            Self::Ln => "ln",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Abs => "abs",
            Self::Atan => "atan",
        }
    }
}

/// Binary comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Boolean connectives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BoolOp {
    And,
    Or,
    Not,
}

/// Side of an interior facet a quantity is evaluated on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Restriction {
    /// The '+' side
    Positive,
    /// The '-' side
    Negative,
}

impl Restriction {
    /// Suffix used in generated names ('+' -> 0, '-' -> 1)
    pub const fn postfix(self) -> &'static str {
        match self {
            Self::Positive => "_0",
            Self::Negative => "_1",
        }
    }
}

/// Averaging domain of a quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Averaging {
    Cell,
    Facet,
}

// =============================================================================
// EXPR - The main expression type
// =============================================================================

/// An integrand expression node.
///
/// Nodes are immutable; children are shared through `Arc`. Equality is
/// structural (with a hash fast-reject), which is what graph interning keys
/// on: two structurally identical subtrees are the same value, while
/// numerically equal but syntactically different ones are not.
#[derive(Debug, Clone)]
pub struct Expr {
    /// Structural hash for O(1) equality rejection
    pub(crate) hash: u64,
    pub(crate) kind: ExprKind,
    pub(crate) shape: Vec<usize>,
    /// Free indices with their dimensions, sorted by index
    pub(crate) free_indices: Vec<(Index, usize)>,
}

impl Deref for Expr {
    type Target = ExprKind;
    fn deref(&self) -> &Self::Target {
        &self.kind
    }
}

impl PartialEq for Expr {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        if self.hash != other.hash {
            return false;
        }
        self.kind == other.kind
    }
}

impl Eq for Expr {}

impl Hash for Expr {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

// =============================================================================
// EXPRKIND
// =============================================================================

/// The kind (operator) of an expression node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExprKind {
    Terminal(Terminal),

    /// Elementwise sum of two operands of equal shape
    Sum(Arc<Expr>, Arc<Expr>),

    /// Product where at least one operand has scalar shape; a free index
    /// shared by both operands is matched elementwise
    Product(Arc<Expr>, Arc<Expr>),

    /// Division by a scalar-shaped denominator
    Division(Arc<Expr>, Arc<Expr>),

    Power(Arc<Expr>, Arc<Expr>),

    MathFunction(MathFunction, Arc<Expr>),

    Comparison(ComparisonOp, Arc<Expr>, Arc<Expr>),

    /// `And`/`Or` take two or more operands, `Not` exactly one
    BooleanOp(BoolOp, Vec<Arc<Expr>>),

    /// `condition ? true_value : false_value`
    Conditional(Arc<Expr>, Arc<Expr>, Arc<Expr>),

    /// Component selection `A[i, 0, j]`, one item per axis of `A`
    Indexed(Arc<Expr>, Vec<IndexItem>),

    /// Turns free indices of a scalar operand back into tensor axes
    ComponentTensor(Arc<Expr>, Vec<Index>),

    /// Tensor built from rows of equal shape
    ListTensor(Vec<Arc<Expr>>),

    Transposed(Arc<Expr>),

    /// Labelled subexpression; transparent to evaluation
    Variable(Arc<Expr>, u32),

    /// Sum of a scalar operand over all values of one of its free indices
    IndexSum(Arc<Expr>, Index),

    /// Gradient, appending one axis of size `dim`
    Derivative {
        operand: Arc<Expr>,
        /// Derivative in reference (rather than physical) coordinates
        reference: bool,
        dim: usize,
    },

    Restricted(Arc<Expr>, Restriction),

    Averaged(Arc<Expr>, Averaging),

    /// Value of a form argument before the reference-to-physical mapping
    ReferenceValue(Arc<Expr>),
}

impl ExprKind {
    /// Short name of the operator, used in diagnostics
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Terminal(_) => "terminal",
            Self::Sum(..) => "sum",
            Self::Product(..) => "product",
            Self::Division(..) => "division",
            Self::Power(..) => "power",
            Self::MathFunction(..) => "math_function",
            Self::Comparison(..) => "comparison",
            Self::BooleanOp(..) => "boolean_op",
            Self::Conditional(..) => "conditional",
            Self::Indexed(..) => "indexed",
            Self::ComponentTensor(..) => "component_tensor",
            Self::ListTensor(..) => "list_tensor",
            Self::Transposed(..) => "transposed",
            Self::Variable(..) => "variable",
            Self::IndexSum(..) => "index_sum",
            Self::Derivative { .. } => "derivative",
            Self::Restricted(..) => "restricted",
            Self::Averaged(..) => "averaged",
            Self::ReferenceValue(..) => "reference_value",
        }
    }

    /// Operands in a fixed order
    pub fn operands(&self) -> Vec<&Arc<Expr>> {
        match self {
            Self::Terminal(_) => Vec::new(),
            Self::Sum(a, b)
            | Self::Product(a, b)
            | Self::Division(a, b)
            | Self::Power(a, b)
            | Self::Comparison(_, a, b) => vec![a, b],
            Self::MathFunction(_, a)
            | Self::Indexed(a, _)
            | Self::ComponentTensor(a, _)
            | Self::Transposed(a)
            | Self::Variable(a, _)
            | Self::IndexSum(a, _)
            | Self::Derivative { operand: a, .. }
            | Self::Restricted(a, _)
            | Self::Averaged(a, _)
            | Self::ReferenceValue(a) => vec![a],
            Self::BooleanOp(_, ops) | Self::ListTensor(ops) => ops.iter().collect(),
            Self::Conditional(c, t, f) => vec![c, t, f],
        }
    }

    /// Whether this node only wraps a terminal-modifier around its operand
    pub const fn is_terminal_modifier(&self) -> bool {
        matches!(
            self,
            Self::Derivative { .. } | Self::Restricted(..) | Self::Averaged(..) | Self::ReferenceValue(_)
        )
    }
}

/// Structural hash of a node kind; children contribute their cached hash
pub fn compute_expr_hash(kind: &ExprKind) -> u64 {
    let mut hasher = FxHasher::default();
    kind.hash(&mut hasher);
    hasher.finish()
}

impl Expr {
    #[inline]
    pub fn kind(&self) -> &ExprKind {
        &self.kind
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn free_indices(&self) -> &[(Index, usize)] {
        &self.free_indices
    }

    #[inline]
    #[must_use]
    pub const fn structural_hash(&self) -> u64 {
        self.hash
    }

    /// Dimension of a free index of this node
    pub fn index_dim(&self, index: Index) -> Option<usize> {
        self.free_indices
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, d)| *d)
    }

    /// Number of scalar components: product of shape times product of index dimensions
    pub fn num_components(&self) -> usize {
        self.shape.iter().product::<usize>()
            * self.free_indices.iter().map(|(_, d)| d).product::<usize>()
    }

    /// Value of a scalar literal terminal
    pub fn as_scalar(&self) -> Option<f64> {
        match &self.kind {
            ExprKind::Terminal(Terminal::Literal(super::terminal::Literal::Scalar(v))) => {
                Some(v.0)
            }
            _ => None,
        }
    }

    pub fn as_terminal(&self) -> Option<&Terminal> {
        match &self.kind {
            ExprKind::Terminal(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, ExprKind::Terminal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::terminal::{Cell, FiniteElement, FormContext};

    #[test]
    fn test_structural_equality() {
        let a = Expr::constant(2.0) + Expr::constant(3.0);
        let b = Expr::constant(2.0) + Expr::constant(3.0);
        let c = Expr::constant(3.0) + Expr::constant(2.0);
        assert_eq!(a, b);
        assert_eq!(a.structural_hash(), b.structural_hash());
        assert_ne!(a, c);
    }

    #[test]
    fn test_indexed_and_component_tensor_shapes() {
        let mut ctx = FormContext::new(Cell::triangle());
        let element = FiniteElement::lagrange(Cell::triangle(), 1).vector(2);
        let u = ctx.coefficient(element);
        let grad_u = ctx.grad(&u);
        assert_eq!(grad_u.shape(), &[2, 2]);

        let ij = ctx.indices(2);
        let entry = grad_u.index(&[ij[0].into(), ij[1].into()]);
        assert!(entry.shape().is_empty());
        assert_eq!(entry.free_indices(), &[(ij[0], 2), (ij[1], 2)]);

        let transposed = entry.as_tensor(&[ij[1], ij[0]]);
        assert_eq!(transposed.shape(), &[2, 2]);
        assert!(transposed.free_indices().is_empty());
    }

    #[test]
    fn test_repeated_index_product_sums() {
        let mut ctx = FormContext::new(Cell::triangle());
        let element = FiniteElement::lagrange(Cell::triangle(), 1);
        let u = ctx.coefficient(element.clone());
        let v = ctx.argument(0, element);
        let i = ctx.index();
        let dot = ctx.grad(&u).index(&[i.into()]) * ctx.grad(&v).index(&[i.into()]);
        assert!(matches!(dot.kind(), ExprKind::IndexSum(_, idx) if *idx == i));
        assert!(dot.free_indices().is_empty());
        assert_eq!(dot.num_components(), 1);
    }
}
