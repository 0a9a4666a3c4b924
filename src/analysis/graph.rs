//! Expression graph construction with structural interning.
//!
//! Vertices are listed operands-first. Two subtrees with the same operator,
//! payload and operand vertices are interned to one vertex, which is how
//! sharing is detected without relying on object identity.

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::core::error::CompileError;
use crate::core::expr::{
    Averaging, BoolOp, ComparisonOp, Expr, ExprKind, Index, IndexItem, MathFunction, Restriction,
};
use crate::core::modified::{TerminalModifiers, analyse_modified_terminal};
use crate::core::terminal::Terminal;
use crate::core::visitor::post_order;

/// How terminal modifiers are placed in the vertex array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraphMode {
    /// Every node becomes a vertex, modifiers included
    Expanded,
    /// A terminal together with its modifier chain is one leaf vertex
    #[default]
    ModifiedTerminalsAsUnits,
}

/// One vertex of the tensor graph
#[derive(Debug, Clone)]
pub struct Vertex {
    pub expr: Expr,
    pub operands: Vec<usize>,
    /// Set for terminals, and for whole modifier chains in
    /// [`GraphMode::ModifiedTerminalsAsUnits`]
    pub modifiers: Option<TerminalModifiers>,
}

/// Topologically ordered, deduplicated vertex array
#[derive(Debug, Clone)]
pub struct Graph {
    pub vertices: Vec<Vertex>,
    /// Vertex of each input expression, in input order
    pub roots: Vec<usize>,
}

impl Graph {
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// Operator and payload of a node, without its operands
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum NodeTag {
    Terminal(Terminal),
    Sum,
    Product,
    Division,
    Power,
    MathFunction(MathFunction),
    Comparison(ComparisonOp),
    BooleanOp(BoolOp),
    Conditional,
    Indexed(Vec<IndexItem>),
    ComponentTensor(Vec<Index>),
    ListTensor,
    Transposed,
    Variable(u32),
    IndexSum(Index),
    Derivative(bool, usize),
    Restricted(Restriction),
    Averaged(Averaging),
    ReferenceValue(Vec<usize>),
}

impl NodeTag {
    fn of(expr: &Expr) -> Self {
        match expr.kind() {
            ExprKind::Terminal(t) => Self::Terminal(t.clone()),
            ExprKind::Sum(..) => Self::Sum,
            ExprKind::Product(..) => Self::Product,
            ExprKind::Division(..) => Self::Division,
            ExprKind::Power(..) => Self::Power,
            ExprKind::MathFunction(f, _) => Self::MathFunction(*f),
            ExprKind::Comparison(op, ..) => Self::Comparison(*op),
            ExprKind::BooleanOp(op, _) => Self::BooleanOp(*op),
            ExprKind::Conditional(..) => Self::Conditional,
            ExprKind::Indexed(_, items) => Self::Indexed(items.clone()),
            ExprKind::ComponentTensor(_, indices) => Self::ComponentTensor(indices.clone()),
            ExprKind::ListTensor(_) => Self::ListTensor,
            ExprKind::Transposed(_) => Self::Transposed,
            ExprKind::Variable(_, label) => Self::Variable(*label),
            ExprKind::IndexSum(_, i) => Self::IndexSum(*i),
            ExprKind::Derivative { reference, dim, .. } => Self::Derivative(*reference, *dim),
            ExprKind::Restricted(_, r) => Self::Restricted(*r),
            ExprKind::Averaged(_, a) => Self::Averaged(*a),
            ExprKind::ReferenceValue(_) => Self::ReferenceValue(expr.shape().to_vec()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum VertexKey {
    Node { tag: NodeTag, operands: Vec<usize> },
    /// A modified terminal kept whole; keyed by its structure
    Unit(Expr),
}

fn require(condition: bool, expr: &Expr, reason: impl FnOnce() -> String) -> Result<(), CompileError> {
    if condition {
        Ok(())
    } else {
        Err(CompileError::graph(expr.name(), reason()))
    }
}

/// Shape consistency of one node against its operands
fn check_node(expr: &Expr) -> Result<(), CompileError> {
    let scalar = |e: &Expr| e.shape().is_empty();
    match expr.kind() {
        ExprKind::Sum(a, b) => {
            require(a.shape() == b.shape(), expr, || {
                format!("operand shapes {:?} and {:?} differ", a.shape(), b.shape())
            })?;
            require(a.free_indices() == b.free_indices(), expr, || {
                "operands have different free indices".to_owned()
            })
        }
        ExprKind::Product(a, b) => require(scalar(a) || scalar(b), expr, || {
            format!(
                "both operands are tensors ({:?} and {:?}); contract them with indices",
                a.shape(),
                b.shape()
            )
        }),
        ExprKind::Division(_, b) => {
            require(scalar(b), expr, || "denominator is not scalar".to_owned())
        }
        ExprKind::Power(a, b) | ExprKind::Comparison(_, a, b) => {
            require(scalar(a) && scalar(b), expr, || "operands must be scalar".to_owned())
        }
        ExprKind::MathFunction(_, a) => {
            require(scalar(a), expr, || "operand must be scalar".to_owned())
        }
        ExprKind::BooleanOp(op, ops) => {
            let arity_ok = match op {
                BoolOp::Not => ops.len() == 1,
                BoolOp::And | BoolOp::Or => ops.len() >= 2,
            };
            require(arity_ok, expr, || format!("{} operands for {op:?}", ops.len()))?;
            require(ops.iter().all(|o| scalar(o)), expr, || {
                "operands must be scalar".to_owned()
            })
        }
        ExprKind::Conditional(c, t, f) => {
            require(scalar(c), expr, || "condition must be scalar".to_owned())?;
            require(t.shape() == f.shape(), expr, || {
                format!("branch shapes {:?} and {:?} differ", t.shape(), f.shape())
            })
        }
        ExprKind::Indexed(a, items) => require(items.len() == a.shape().len(), expr, || {
            format!("{} indices for a tensor of rank {}", items.len(), a.shape().len())
        }),
        ExprKind::ComponentTensor(a, indices) => {
            require(scalar(a), expr, || "operand must be scalar".to_owned())?;
            require(indices.iter().all(|i| a.index_dim(*i).is_some()), expr, || {
                "index is not free in the operand".to_owned()
            })
        }
        ExprKind::ListTensor(rows) => {
            require(!rows.is_empty(), expr, || "no rows".to_owned())?;
            require(
                rows.iter().all(|r| r.shape() == rows[0].shape()),
                expr,
                || "rows have different shapes".to_owned(),
            )
        }
        ExprKind::Transposed(a) => require(a.shape().len() == 2, expr, || {
            format!("operand has rank {}, expected 2", a.shape().len())
        }),
        ExprKind::IndexSum(a, i) => {
            require(scalar(a), expr, || "summand must be scalar".to_owned())?;
            require(a.index_dim(*i).is_some(), expr, || {
                format!("index {} is not free in the summand", i.0)
            })
        }
        ExprKind::Terminal(_)
        | ExprKind::Variable(..)
        | ExprKind::Derivative { .. }
        | ExprKind::Restricted(..)
        | ExprKind::Averaged(..)
        | ExprKind::ReferenceValue(_) => Ok(()),
    }
}

/// Build the interned vertex array of `exprs`.
///
/// # Errors
/// `CompileError::Graph` for shape inconsistencies and for modifiers in an
/// invalid position (e.g. the derivative of a non-terminal).
pub fn build_graph(exprs: &[Expr], mode: GraphMode) -> Result<Graph, CompileError> {
    let units = mode == GraphMode::ModifiedTerminalsAsUnits;
    let order = post_order(exprs, units);

    let mut vertices: Vec<Vertex> = Vec::with_capacity(order.len());
    let mut interner: FxHashMap<VertexKey, usize> = FxHashMap::default();
    let mut vertex_of: FxHashMap<*const Expr, usize> = FxHashMap::default();

    for node in order {
        let (key, operands, modifiers) = if units && (node.is_terminal() || node.is_terminal_modifier())
        {
            let modifiers = analyse_modified_terminal(node)?
                .ok_or_else(|| CompileError::graph(node.name(), "not a modified terminal"))?;
            (VertexKey::Unit(node.clone()), Vec::new(), Some(modifiers))
        } else {
            check_node(node)?;
            let operands = node
                .operands()
                .into_iter()
                .map(|op| {
                    let op: &Expr = op;
                    vertex_of
                        .get(&std::ptr::from_ref(op))
                        .copied()
                        .ok_or_else(|| CompileError::graph(node.name(), "operand not yet visited"))
                })
                .collect::<Result<Vec<_>, _>>()?;
            let modifiers = match node.kind() {
                ExprKind::Terminal(_) => analyse_modified_terminal(node)?,
                _ => None,
            };
            let key = VertexKey::Node {
                tag: NodeTag::of(node),
                operands: operands.clone(),
            };
            (key, operands, modifiers)
        };

        let id = *interner.entry(key).or_insert_with(|| {
            vertices.push(Vertex {
                expr: node.clone(),
                operands,
                modifiers,
            });
            vertices.len() - 1
        });
        vertex_of.insert(std::ptr::from_ref(node), id);
    }

    let roots = exprs
        .iter()
        .map(|e| {
            vertex_of
                .get(&std::ptr::from_ref(e))
                .copied()
                .ok_or_else(|| CompileError::graph(e.name(), "root not visited"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    trace!(vertices = vertices.len(), roots = roots.len(), "built tensor graph");
    Ok(Graph { vertices, roots })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::terminal::{Cell, FiniteElement, FormContext};

    #[test]
    fn test_structural_sharing() {
        // Two separately built copies of the same subtree share a vertex
        let a = Expr::constant(2.0) * Expr::constant(3.0);
        let b = Expr::constant(2.0) * Expr::constant(3.0);
        let e = a + b;
        let graph = build_graph(&[e], GraphMode::Expanded).unwrap();
        // 2.0, 3.0, product, sum
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.vertices[3].operands, vec![2, 2]);
    }

    #[test]
    fn test_numerically_equal_stays_distinct() {
        let e = Expr::constant(2.0) * Expr::constant(3.0) + Expr::constant(6.0);
        let graph = build_graph(&[e], GraphMode::Expanded).unwrap();
        assert_eq!(graph.len(), 5);
    }

    #[test]
    fn test_operands_precede_users() {
        let mut ctx = FormContext::new(Cell::triangle());
        let f = ctx.coefficient(FiniteElement::lagrange(Cell::triangle(), 1));
        let e = (f.clone() * 2.0 + f.clone().sin()) / (f + 1.0);
        let graph = build_graph(&[e], GraphMode::Expanded).unwrap();
        for (i, v) in graph.vertices.iter().enumerate() {
            assert!(v.operands.iter().all(|&o| o < i));
        }
        assert_eq!(graph.roots, vec![graph.len() - 1]);
    }

    #[test]
    fn test_modified_terminal_units() {
        let mut ctx = FormContext::new(Cell::triangle());
        let f = ctx.coefficient(FiniteElement::lagrange(Cell::triangle(), 2));
        let e = ctx.dx(&f, 0) * ctx.dx(&f, 1);
        let expanded = build_graph(std::slice::from_ref(&e), GraphMode::Expanded).unwrap();
        let units = build_graph(&[e], GraphMode::ModifiedTerminalsAsUnits).unwrap();
        // f, grad f, two indexed, product
        assert_eq!(expanded.len(), 5);
        // grad f as one unit, two indexed, product
        assert_eq!(units.len(), 4);
        let unit = &units.vertices[0];
        assert_eq!(unit.modifiers.as_ref().map(|m| m.derivative_count), Some(1));
    }

    #[test]
    fn test_derivative_of_non_terminal_is_rejected() {
        let mut ctx = FormContext::new(Cell::triangle());
        let f = ctx.coefficient(FiniteElement::lagrange(Cell::triangle(), 2));
        let e = ctx.dx(&(f.clone() * f), 0);
        let err = build_graph(&[e], GraphMode::ModifiedTerminalsAsUnits).unwrap_err();
        assert!(matches!(err, CompileError::Graph { kind: "derivative", .. }));
    }

    #[test]
    fn test_tensor_product_is_rejected() {
        let mut ctx = FormContext::new(Cell::triangle());
        let element = FiniteElement::lagrange(Cell::triangle(), 1).vector(2);
        let u = ctx.coefficient(element.clone());
        let v = ctx.coefficient(element);
        let err = build_graph(&[u * v], GraphMode::Expanded).unwrap_err();
        assert!(matches!(err, CompileError::Graph { kind: "product", .. }));
    }
}
