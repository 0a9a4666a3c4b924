//! Value numbering: one symbol per distinct scalar value of the tensor graph.
//!
//! Every vertex gets one symbol per scalar component. Operators that only
//! rearrange components (indexing, component tensors, list tensors,
//! transposition, variables) reuse their operand's symbols instead of
//! creating new ones, and modified terminals fold components that an
//! element symmetry or commuting derivatives make identical.

use rustc_hash::FxHashMap;
use tracing::trace;

use super::graph::{Graph, Vertex};
use crate::core::error::CompileError;
use crate::core::expr::{Expr, ExprKind};
use crate::core::indexing::{
    ComponentSpace, flatten, map_component_tensor_components, map_indexed_components, product,
    unflatten,
};
use crate::core::modified::{ModifiedTerminal, TerminalModifiers};
use crate::core::terminal::{FormContext, Terminal};

/// A value number
pub type Symbol = usize;

/// Symbols of every vertex of a tensor graph
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    /// Per vertex, one symbol per scalar component (row-major over shape ++ free indices)
    pub vertex_symbols: Vec<Vec<Symbol>>,
    /// The modified terminal component each terminal symbol stands for
    pub terminal_of: Vec<Option<ModifiedTerminal>>,
}

impl SymbolTable {
    pub fn symbol_count(&self) -> usize {
        self.terminal_of.len()
    }

    fn fresh(&mut self, terminal: Option<ModifiedTerminal>) -> Symbol {
        self.terminal_of.push(terminal);
        self.terminal_of.len() - 1
    }
}

fn space(expr: &Expr) -> ComponentSpace {
    ComponentSpace::new(expr.shape(), expr.free_indices())
}

/// Whether a vertex reuses the symbols of its operands
pub fn is_fallthrough(vertex: &Vertex) -> bool {
    vertex.modifiers.is_none()
        && matches!(
            vertex.expr.kind(),
            ExprKind::Indexed(..)
                | ExprKind::ComponentTensor(..)
                | ExprKind::ListTensor(_)
                | ExprKind::Transposed(_)
                | ExprKind::Variable(..)
        )
}

/// Assign symbols to every vertex of `graph`.
///
/// # Errors
/// - `Unsupported` when a derivative chain is longer than `max_derivative_order`
/// - `SymmetryMapping` when a component map is not total and one-to-one, or
///   when an element symmetry meets a differing reference value shape
pub fn value_numbering(
    graph: &Graph,
    ctx: &FormContext,
    max_derivative_order: usize,
) -> Result<SymbolTable, CompileError> {
    let mut table = SymbolTable::default();

    for vertex in &graph.vertices {
        let symbols = if let Some(modifiers) = &vertex.modifiers {
            number_modified_terminal(&mut table, ctx, vertex, modifiers, max_derivative_order)?
        } else if is_fallthrough(vertex) {
            fallthrough_symbols(&table, graph, vertex)?
        } else {
            if vertex.expr.is_terminal_modifier() {
                return Err(CompileError::graph(
                    vertex.expr.name(),
                    "modifier outside a modified terminal",
                ));
            }
            (0..vertex.expr.num_components())
                .map(|_| table.fresh(None))
                .collect()
        };
        table.vertex_symbols.push(symbols);
    }

    trace!(
        vertices = graph.len(),
        symbols = table.symbol_count(),
        "value numbering done"
    );
    Ok(table)
}

fn number_modified_terminal(
    table: &mut SymbolTable,
    ctx: &FormContext,
    vertex: &Vertex,
    modifiers: &TerminalModifiers,
    max_derivative_order: usize,
) -> Result<Vec<Symbol>, CompileError> {
    if modifiers.derivative_count > max_derivative_order {
        return Err(CompileError::unsupported(format!(
            "derivative order {} exceeds the limit {max_derivative_order}",
            modifiers.derivative_count
        )));
    }

    let symmetry = match &modifiers.terminal {
        Terminal::FormArgument(id) => {
            let element = &ctx
                .get(*id)
                .ok_or_else(|| CompileError::invalid_input("form argument not in this context"))?
                .element;
            if !element.symmetry.is_empty()
                && modifiers.reference_value
                && element.reference_value_shape != element.value_shape
            {
                return Err(CompileError::symmetry(
                    "reference_value",
                    "element symmetry combined with a reference value shape that differs from the value shape",
                ));
            }
            Some(&element.symmetry)
        }
        _ => None,
    };

    let shape = vertex.expr.shape();
    let base_rank = modifiers.base_shape.len();
    let mut seen: FxHashMap<(Vec<usize>, Vec<usize>), Symbol> = FxHashMap::default();
    let mut symbols = Vec::with_capacity(product(shape));

    for k in 0..product(shape) {
        let multiindex = unflatten(k, shape);
        let (base, derivatives) = multiindex.split_at(base_rank.min(multiindex.len()));
        let component = symmetry
            .and_then(|s| s.get(base))
            .cloned()
            .unwrap_or_else(|| base.to_vec());
        let mut derivatives = derivatives.to_vec();
        derivatives.sort_unstable();

        let key = (component, derivatives);
        if let Some(&symbol) = seen.get(&key) {
            symbols.push(symbol);
            continue;
        }
        let (component, derivatives) = key.clone();
        let flat_component = flatten(&component, &modifiers.base_shape);
        let symbol = table.fresh(Some(ModifiedTerminal {
            terminal: modifiers.terminal.clone(),
            derivatives,
            reference_derivatives: modifiers.reference_derivatives,
            restriction: modifiers.restriction,
            averaged: modifiers.averaged,
            reference_value: modifiers.reference_value,
            component,
            flat_component,
        }));
        seen.insert(key, symbol);
        symbols.push(symbol);
    }
    Ok(symbols)
}

fn fallthrough_symbols(
    table: &SymbolTable,
    graph: &Graph,
    vertex: &Vertex,
) -> Result<Vec<Symbol>, CompileError> {
    let expr = &vertex.expr;
    let result = space(expr);
    let operand_symbols: Vec<&[Symbol]> = vertex
        .operands
        .iter()
        .map(|&o| table.vertex_symbols[o].as_slice())
        .collect();
    let operand_exprs: Vec<&Expr> = vertex
        .operands
        .iter()
        .map(|&o| &graph.vertices[o].expr)
        .collect();

    match expr.kind() {
        ExprKind::Variable(..) => Ok(operand_symbols[0].to_vec()),
        ExprKind::Indexed(_, items) => {
            let map = map_indexed_components(&space(operand_exprs[0]), items, &result)?;
            Ok(map.into_iter().map(|c| operand_symbols[0][c]).collect())
        }
        ExprKind::ComponentTensor(_, indices) => {
            let map = map_component_tensor_components(&space(operand_exprs[0]), indices, &result)?;
            Ok(map.into_iter().map(|c| operand_symbols[0][c]).collect())
        }
        ExprKind::Transposed(_) => {
            let operand = space(operand_exprs[0]);
            (0..result.size())
                .map(|k| {
                    let component = result.split(k);
                    let [i, j] = component.multiindex[..] else {
                        return Err(CompileError::symmetry("transposed", "operand is not a matrix"));
                    };
                    operand
                        .join(&[j, i], &component)
                        .map(|c| operand_symbols[0][c])
                        .ok_or_else(|| CompileError::symmetry("transposed", "component out of range"))
                })
                .collect()
        }
        ExprKind::ListTensor(_) => (0..result.size())
            .map(|k| {
                let component = result.split(k);
                let (row, rest) = component
                    .multiindex
                    .split_first()
                    .ok_or_else(|| CompileError::symmetry("list_tensor", "scalar list tensor"))?;
                let row_space = space(operand_exprs[*row]);
                row_space
                    .join(rest, &component)
                    .map(|c| operand_symbols[*row][c])
                    .ok_or_else(|| CompileError::symmetry("list_tensor", "row component out of range"))
            })
            .collect(),
        _ => Err(CompileError::graph(expr.name(), "not a fallthrough operator")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::graph::{GraphMode, build_graph};
    use crate::core::expr::Expr;
    use crate::core::terminal::{Cell, FiniteElement};

    fn number(ctx: &FormContext, e: Expr) -> (Graph, SymbolTable) {
        let graph = build_graph(&[e], GraphMode::ModifiedTerminalsAsUnits).unwrap();
        let table = value_numbering(&graph, ctx, 2).unwrap();
        (graph, table)
    }

    #[test]
    fn test_symmetric_components_share_a_symbol() {
        let mut ctx = FormContext::new(Cell::triangle());
        let element = FiniteElement::lagrange(Cell::triangle(), 1).tensor(vec![2, 2], true);
        let s = ctx.coefficient(element);
        let (graph, table) = number(&ctx, s);
        let symbols = &table.vertex_symbols[graph.roots[0]];
        assert_eq!(symbols.len(), 4);
        assert_eq!(symbols[1], symbols[2]);
        assert_eq!(table.symbol_count(), 3);
    }

    #[test]
    fn test_second_derivatives_commute() {
        let mut ctx = FormContext::new(Cell::triangle());
        let f = ctx.coefficient(FiniteElement::lagrange(Cell::triangle(), 2));
        let hessian = ctx.grad(&ctx.grad(&f));
        let (graph, table) = number(&ctx, hessian);
        let symbols = &table.vertex_symbols[graph.roots[0]];
        assert_eq!(symbols[1], symbols[2]);
        assert_eq!(table.symbol_count(), 3);
    }

    #[test]
    fn test_fallthrough_reuses_symbols() {
        let mut ctx = FormContext::new(Cell::triangle());
        let element = FiniteElement::lagrange(Cell::triangle(), 1).vector(2);
        let u = ctx.coefficient(element);
        let i = ctx.index();
        let e = u.index(&[i.into()]).as_tensor(&[i]);
        let (graph, table) = number(&ctx, e);
        // u, u[i], as_tensor: all share u's two symbols
        assert_eq!(table.symbol_count(), 2);
        assert_eq!(table.vertex_symbols[graph.roots[0]], table.vertex_symbols[0]);
    }

    #[test]
    fn test_transpose_permutes() {
        let m = Expr::list_tensor(vec![
            Expr::list_tensor(vec![Expr::constant(1.0), Expr::constant(2.0)]),
            Expr::list_tensor(vec![Expr::constant(3.0), Expr::constant(4.0)]),
        ]);
        let ctx = FormContext::new(Cell::triangle());
        let (graph, table) = number(&ctx, m.transpose());
        let root = &table.vertex_symbols[graph.roots[0]];
        let original = &table.vertex_symbols[graph.roots[0] - 1];
        assert_eq!(root, &vec![original[0], original[2], original[1], original[3]]);
    }

    #[test]
    fn test_derivative_order_limit() {
        let mut ctx = FormContext::new(Cell::triangle());
        let f = ctx.coefficient(FiniteElement::lagrange(Cell::triangle(), 3));
        let third = ctx.grad(&ctx.grad(&ctx.grad(&f)));
        let graph = build_graph(&[third], GraphMode::ModifiedTerminalsAsUnits).unwrap();
        let err = value_numbering(&graph, &ctx, 2).unwrap_err();
        assert!(matches!(err, CompileError::Unsupported(_)));
    }

    #[test]
    fn test_symmetry_with_reference_shape_is_rejected() {
        let mut ctx = FormContext::new(Cell::triangle());
        let element = FiniteElement::lagrange(Cell::triangle(), 1)
            .tensor(vec![2, 2], true)
            .with_reference_value_shape(vec![3]);
        let s = ctx.coefficient(element);
        let rv = ctx.reference_value(&s);
        let graph = build_graph(&[rv], GraphMode::ModifiedTerminalsAsUnits).unwrap();
        let err = value_numbering(&graph, &ctx, 2).unwrap_err();
        assert!(matches!(err, CompileError::SymmetryMapping { .. }));
    }
}
