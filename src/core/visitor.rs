//! Expression visitor pattern and iterative traversals.
//!
//! Integrands can be deep (long sums of products), so every traversal here
//! uses an explicit work stack instead of recursion.

use rustc_hash::FxHashSet;

use super::expr::Expr;
use super::terminal::{FormArgumentId, Terminal};

/// Trait for visiting expression nodes
///
/// `visit` returns true to continue into the node's operands.
pub trait ExprVisitor {
    fn visit(&mut self, expr: &Expr) -> bool;
}

/// Walk an expression with a visitor, parents before operands.
///
/// Each distinct node (by address) is visited once, so a shared subtree
/// costs one visit however often it is referenced.
pub fn walk_expr<V: ExprVisitor>(expr: &Expr, visitor: &mut V) {
    let mut visited: FxHashSet<*const Expr> = FxHashSet::default();
    let mut stack = vec![expr];
    while let Some(node) = stack.pop() {
        if !visited.insert(std::ptr::from_ref(node)) {
            continue;
        }
        if visitor.visit(node) {
            stack.extend(node.operands().into_iter().rev().map(|op| &**op));
        }
    }
}

/// Nodes reachable from `roots`, each exactly once, operands before users.
///
/// Identity is by address, so structurally equal copies at different
/// addresses are all listed; deduplication by structure is the job of the
/// graph interner. With `skip_terminal_modifiers`, derivative, restriction,
/// averaging and reference-value nodes are listed without their operands.
pub fn post_order(roots: &[Expr], skip_terminal_modifiers: bool) -> Vec<&Expr> {
    let mut visited: FxHashSet<*const Expr> = FxHashSet::default();
    let mut out = Vec::new();
    let mut stack: Vec<(&Expr, bool)> = roots.iter().rev().map(|r| (r, false)).collect();

    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            out.push(node);
            continue;
        }
        if !visited.insert(std::ptr::from_ref(node)) {
            continue;
        }
        stack.push((node, true));
        if skip_terminal_modifiers && node.is_terminal_modifier() {
            continue;
        }
        for operand in node.operands().into_iter().rev() {
            let operand: &Expr = operand;
            if !visited.contains(&std::ptr::from_ref(operand)) {
                stack.push((operand, false));
            }
        }
    }
    out
}

/// Counts distinct nodes
#[derive(Default)]
pub struct NodeCounter {
    pub count: usize,
}

impl ExprVisitor for NodeCounter {
    fn visit(&mut self, _expr: &Expr) -> bool {
        self.count += 1;
        true
    }
}

/// Collects the form arguments an expression refers to
#[derive(Default)]
pub struct FormArgumentCollector {
    pub form_arguments: FxHashSet<FormArgumentId>,
}

impl ExprVisitor for FormArgumentCollector {
    fn visit(&mut self, expr: &Expr) -> bool {
        if let Some(Terminal::FormArgument(id)) = expr.as_terminal() {
            self.form_arguments.insert(*id);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::terminal::{Cell, FiniteElement, FormContext};

    #[test]
    fn test_node_counter() {
        let e = Expr::constant(1.0) + Expr::constant(2.0) * Expr::constant(3.0);
        let mut counter = NodeCounter::default();
        walk_expr(&e, &mut counter);
        assert_eq!(counter.count, 5);
    }

    #[test]
    fn test_shared_subtrees_are_visited_once() {
        let mut ctx = FormContext::new(Cell::triangle());
        let mut e = ctx.constant();
        for _ in 0..64 {
            e = &e * &e;
        }
        let mut counter = NodeCounter::default();
        walk_expr(&e, &mut counter);
        // Each product holds two copies of the level below, which share
        // their own operands
        assert_eq!(counter.count, 1 + 2 * 64);
    }

    #[test]
    fn test_form_argument_collector() {
        let mut ctx = FormContext::new(Cell::triangle());
        let element = FiniteElement::lagrange(Cell::triangle(), 1);
        let u = ctx.argument(1, element.clone());
        let v = ctx.argument(0, element);
        let e = &u * &v + &u * 2.0;
        let mut collector = FormArgumentCollector::default();
        walk_expr(&e, &mut collector);
        assert_eq!(collector.form_arguments.len(), 2);
    }

    #[test]
    fn test_post_order_operands_first() {
        let a = Expr::constant(1.0);
        let e = a.clone() + a;
        let order = post_order(std::slice::from_ref(&e), false);
        // The two operands are separate allocations
        assert_eq!(order.len(), 3);
        assert!(std::ptr::eq(*order.last().unwrap(), &e));
    }

    #[test]
    fn test_post_order_skips_modifier_operands() {
        let mut ctx = FormContext::new(Cell::triangle());
        let f = ctx.coefficient(FiniteElement::lagrange(Cell::triangle(), 1));
        let g = ctx.grad(&f);
        let e = g.index_fixed(&[0]);
        assert_eq!(post_order(std::slice::from_ref(&e), true).len(), 2);
        assert_eq!(post_order(std::slice::from_ref(&e), false).len(), 3);
    }
}
