//! Scalar decomposition of a value-numbered tensor graph.
//!
//! Each symbol becomes one interned scalar vertex. Index sums expand into
//! chains of binary sums. The result is relinearized from the scalar roots so
//! that only reachable vertices remain, in deterministic post-order.

use rustc_hash::FxHashMap;
use tracing::trace;

use super::graph::{Graph, Vertex};
use super::valuenumbering::{SymbolTable, is_fallthrough};
use crate::core::error::CompileError;
use crate::core::expr::{BoolOp, ComparisonOp, Expr, ExprKind, MathFunction};
use crate::core::indexing::{Component, ComponentSpace};
use crate::core::modified::ModifiedTerminal;
use crate::core::terminal::{ScalarValue, Terminal};

/// Operator of a scalar vertex; operands are vertex indices
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScalarOp {
    Literal(ScalarValue),
    ModifiedTerminal(ModifiedTerminal),
    Sum(usize, usize),
    Product(usize, usize),
    Division(usize, usize),
    Power(usize, usize),
    MathFunction(MathFunction, usize),
    Comparison(ComparisonOp, usize, usize),
    Not(usize),
    And(usize, usize),
    Or(usize, usize),
    Conditional(usize, usize, usize),
}

impl ScalarOp {
    pub fn operands(&self) -> Vec<usize> {
        match self {
            Self::Literal(_) | Self::ModifiedTerminal(_) => Vec::new(),
            Self::MathFunction(_, a) | Self::Not(a) => vec![*a],
            Self::Sum(a, b)
            | Self::Product(a, b)
            | Self::Division(a, b)
            | Self::Power(a, b)
            | Self::Comparison(_, a, b)
            | Self::And(a, b)
            | Self::Or(a, b) => vec![*a, *b],
            Self::Conditional(c, t, f) => vec![*c, *t, *f],
        }
    }

    /// The same operator with every operand renumbered through `f`
    #[must_use]
    pub fn map_operands(&self, f: impl Fn(usize) -> usize) -> Self {
        match self {
            Self::Literal(_) | Self::ModifiedTerminal(_) => self.clone(),
            Self::Sum(a, b) => Self::Sum(f(*a), f(*b)),
            Self::Product(a, b) => Self::Product(f(*a), f(*b)),
            Self::Division(a, b) => Self::Division(f(*a), f(*b)),
            Self::Power(a, b) => Self::Power(f(*a), f(*b)),
            Self::MathFunction(func, a) => Self::MathFunction(*func, f(*a)),
            Self::Comparison(op, a, b) => Self::Comparison(*op, f(*a), f(*b)),
            Self::Not(a) => Self::Not(f(*a)),
            Self::And(a, b) => Self::And(f(*a), f(*b)),
            Self::Or(a, b) => Self::Or(f(*a), f(*b)),
            Self::Conditional(c, t, e) => Self::Conditional(f(*c), f(*t), f(*e)),
        }
    }

    pub fn as_literal(&self) -> Option<f64> {
        match self {
            Self::Literal(v) => Some(v.0),
            _ => None,
        }
    }

    pub fn as_modified_terminal(&self) -> Option<&ModifiedTerminal> {
        match self {
            Self::ModifiedTerminal(mt) => Some(mt),
            _ => None,
        }
    }

    /// Literals and modified terminals
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Literal(_) | Self::ModifiedTerminal(_))
    }
}

/// Interned scalar vertex array
#[derive(Debug, Clone, Default)]
pub struct ScalarGraph {
    pub vertices: Vec<ScalarOp>,
    pub targets: Vec<usize>,
    index: FxHashMap<ScalarOp, usize>,
}

impl ScalarGraph {
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Index of `op`, appending it if no equal vertex exists
    pub fn intern(&mut self, op: ScalarOp) -> usize {
        if let Some(&i) = self.index.get(&op) {
            return i;
        }
        self.vertices.push(op.clone());
        self.index.insert(op, self.vertices.len() - 1);
        self.vertices.len() - 1
    }

    pub fn literal(&mut self, value: f64) -> usize {
        self.intern(ScalarOp::Literal(ScalarValue(value)))
    }

    pub fn is_literal(&self, vertex: usize, value: f64) -> bool {
        self.vertices
            .get(vertex)
            .and_then(ScalarOp::as_literal)
            .is_some_and(|v| v == value)
    }

    /// Keep only the vertices reachable from the targets, in post-order
    #[must_use]
    pub fn relinearize(&self) -> Self {
        let mut new_index: Vec<Option<usize>> = vec![None; self.vertices.len()];
        let mut order = Vec::new();
        let mut stack: Vec<(usize, bool)> = self.targets.iter().rev().map(|&t| (t, false)).collect();

        while let Some((v, expanded)) = stack.pop() {
            if expanded {
                if new_index[v].is_none() {
                    new_index[v] = Some(order.len());
                    order.push(v);
                }
                continue;
            }
            if new_index[v].is_some() {
                continue;
            }
            stack.push((v, true));
            for op in self.vertices[v].operands().into_iter().rev() {
                if new_index[op].is_none() {
                    stack.push((op, false));
                }
            }
        }

        let mut out = Self::default();
        for &v in &order {
            let op = self.vertices[v].map_operands(|o| new_index[o].unwrap_or(o));
            out.intern(op);
        }
        out.targets = self
            .targets
            .iter()
            .map(|&t| new_index[t].unwrap_or(t))
            .collect();
        out
    }
}

fn space(expr: &Expr) -> ComponentSpace {
    ComponentSpace::new(expr.shape(), expr.free_indices())
}

/// Maps symbols to the scalar vertex holding their value
struct SymbolValues<'a> {
    graph: &'a Graph,
    table: &'a SymbolTable,
    value_of: Vec<Option<usize>>,
}

impl SymbolValues<'_> {
    /// Scalar vertex of an operand component
    fn operand(
        &self,
        operand: usize,
        multiindex: &[usize],
        component: &Component,
    ) -> Result<usize, CompileError> {
        let expr = &self.graph.vertices[operand].expr;
        let flat = space(expr).join(multiindex, component).ok_or_else(|| {
            CompileError::graph(expr.name(), "operand component out of range")
        })?;
        let symbol = self.table.vertex_symbols[operand][flat];
        self.value_of[symbol]
            .ok_or_else(|| CompileError::graph(expr.name(), "operand symbol has no value"))
    }
}

/// Scalar vertex for one modified terminal symbol
fn terminal_op(mt: &ModifiedTerminal) -> ScalarOp {
    match &mt.terminal {
        Terminal::Literal(literal) => {
            let value = if mt.derivatives.is_empty() {
                literal.component_value(&mt.component)
            } else {
                0.0
            };
            ScalarOp::Literal(ScalarValue(value))
        }
        _ => ScalarOp::ModifiedTerminal(mt.clone()),
    }
}

/// Build the scalar graph of a value-numbered tensor graph, relinearized from its roots.
///
/// Each tensor root contributes `product(shape) * product(index dims)`
/// scalar targets, in row-major order.
pub fn build_scalar_graph(graph: &Graph, table: &SymbolTable) -> Result<ScalarGraph, CompileError> {
    let mut scalar = ScalarGraph::default();
    let mut values = SymbolValues {
        graph,
        table,
        value_of: vec![None; table.symbol_count()],
    };

    for (v, vertex) in graph.vertices.iter().enumerate() {
        let symbols = &table.vertex_symbols[v];
        if vertex.modifiers.is_some() {
            for &symbol in symbols {
                if values.value_of[symbol].is_some() {
                    continue;
                }
                let mt = table.terminal_of[symbol].as_ref().ok_or_else(|| {
                    CompileError::graph(vertex.expr.name(), "terminal symbol without terminal")
                })?;
                values.value_of[symbol] = Some(scalar.intern(terminal_op(mt)));
            }
            continue;
        }
        if is_fallthrough(vertex) {
            continue;
        }

        let result = space(&vertex.expr);
        for (k, &symbol) in symbols.iter().enumerate() {
            let component = result.split(k);
            let id = scalar_component(&mut scalar, &values, vertex, &component)?;
            values.value_of[symbol] = Some(id);
        }
    }

    for &root in &graph.roots {
        for &symbol in &table.vertex_symbols[root] {
            let id = values.value_of[symbol].ok_or_else(|| {
                CompileError::graph(graph.vertices[root].expr.name(), "root symbol has no value")
            })?;
            scalar.targets.push(id);
        }
    }

    let before = scalar.len();
    let scalar = scalar.relinearize();
    trace!(
        built = before,
        reachable = scalar.len(),
        targets = scalar.targets.len(),
        "built scalar graph"
    );
    Ok(scalar)
}

/// Scalar-shaped operands of a tensor product are read at the empty multi-index
fn broadcast<'m>(graph: &Graph, operand: usize, multi: &'m [usize]) -> &'m [usize] {
    if graph.vertices[operand].expr.shape().is_empty() {
        &[]
    } else {
        multi
    }
}

fn scalar_component(
    scalar: &mut ScalarGraph,
    values: &SymbolValues<'_>,
    vertex: &Vertex,
    component: &Component,
) -> Result<usize, CompileError> {
    let expr = &vertex.expr;
    let ops = &vertex.operands;
    let multi = component.multiindex.as_slice();

    let op = match expr.kind() {
        ExprKind::Sum(..) => ScalarOp::Sum(
            values.operand(ops[0], multi, component)?,
            values.operand(ops[1], multi, component)?,
        ),
        ExprKind::Product(..) => ScalarOp::Product(
            values.operand(ops[0], broadcast(values.graph, ops[0], multi), component)?,
            values.operand(ops[1], broadcast(values.graph, ops[1], multi), component)?,
        ),
        ExprKind::Division(..) => ScalarOp::Division(
            values.operand(ops[0], multi, component)?,
            values.operand(ops[1], &[], component)?,
        ),
        ExprKind::Power(..) => ScalarOp::Power(
            values.operand(ops[0], &[], component)?,
            values.operand(ops[1], &[], component)?,
        ),
        ExprKind::MathFunction(f, _) => {
            ScalarOp::MathFunction(*f, values.operand(ops[0], &[], component)?)
        }
        ExprKind::Comparison(op, ..) => ScalarOp::Comparison(
            *op,
            values.operand(ops[0], &[], component)?,
            values.operand(ops[1], &[], component)?,
        ),
        ExprKind::BooleanOp(BoolOp::Not, _) => {
            ScalarOp::Not(values.operand(ops[0], &[], component)?)
        }
        ExprKind::BooleanOp(op, _) => {
            let mut acc = values.operand(ops[0], &[], component)?;
            for &o in &ops[1..] {
                let next = values.operand(o, &[], component)?;
                acc = scalar.intern(match op {
                    BoolOp::And => ScalarOp::And(acc, next),
                    _ => ScalarOp::Or(acc, next),
                });
            }
            return Ok(acc);
        }
        ExprKind::Conditional(..) => ScalarOp::Conditional(
            values.operand(ops[0], &[], component)?,
            values.operand(ops[1], multi, component)?,
            values.operand(ops[2], multi, component)?,
        ),
        ExprKind::IndexSum(summand, index) => {
            let dim = summand.index_dim(*index).ok_or_else(|| {
                CompileError::graph(expr.name(), "index is not free in the summand")
            })?;
            let mut acc = None;
            for value in 0..dim {
                let mut assignment = component.clone();
                assignment.assignment.push((*index, value));
                let term = values.operand(ops[0], &[], &assignment)?;
                acc = Some(match acc {
                    None => term,
                    Some(prev) => scalar.intern(ScalarOp::Sum(prev, term)),
                });
            }
            return acc.ok_or_else(|| CompileError::graph(expr.name(), "sum over an empty index"));
        }
        other => {
            return Err(CompileError::graph(
                other.name(),
                "cannot be expanded into scalar operations",
            ));
        }
    };
    Ok(scalar.intern(op))
}
