//! Expression constructors.
//!
//! Constructors compute shape and free indices eagerly. They never fail:
//! shape consistency is checked when the expression is compiled, so a
//! malformed tree is reported as a `CompileError` instead of a panic.

use std::sync::Arc;

use super::{
    Averaging, BoolOp, ComparisonOp, Expr, ExprKind, Index, IndexItem, MathFunction,
    Restriction, compute_expr_hash,
};
use crate::core::terminal::{Literal, ScalarValue, Terminal};

/// Sorted union of two free index lists
fn merge_free_indices(a: &[(Index, usize)], b: &[(Index, usize)]) -> Vec<(Index, usize)> {
    let mut out = a.to_vec();
    for entry in b {
        if !out.iter().any(|(i, _)| *i == entry.0) {
            out.push(*entry);
        }
    }
    out.sort_unstable();
    out
}

/// Indices present in both lists
fn repeated_indices(a: &[(Index, usize)], b: &[(Index, usize)]) -> Vec<Index> {
    a.iter()
        .filter(|(i, _)| b.iter().any(|(j, _)| i == j))
        .map(|(i, _)| *i)
        .collect()
}

fn without_index(free: &[(Index, usize)], index: Index) -> Vec<(Index, usize)> {
    free.iter().copied().filter(|(i, _)| *i != index).collect()
}

impl Expr {
    /// Create a node from its kind, shape and free indices
    #[must_use]
    pub(crate) fn new(kind: ExprKind, shape: Vec<usize>, free_indices: Vec<(Index, usize)>) -> Self {
        let hash = compute_expr_hash(&kind);
        Self {
            hash,
            kind,
            shape,
            free_indices,
        }
    }

    // -------------------------------------------------------------------------
    // Terminals
    // -------------------------------------------------------------------------

    #[must_use]
    pub(crate) fn terminal(terminal: Terminal, shape: Vec<usize>) -> Self {
        Self::new(ExprKind::Terminal(terminal), shape, Vec::new())
    }

    /// Scalar literal
    #[must_use]
    pub fn constant(value: f64) -> Self {
        Self::terminal(
            Terminal::Literal(Literal::Scalar(ScalarValue(value))),
            Vec::new(),
        )
    }

    /// Zero tensor of the given shape
    #[must_use]
    pub fn zero(shape: Vec<usize>) -> Self {
        Self::terminal(Terminal::Literal(Literal::Zero(shape.clone())), shape)
    }

    /// `n` by `n` identity matrix
    #[must_use]
    pub fn identity(n: usize) -> Self {
        Self::terminal(Terminal::Literal(Literal::Identity(n)), vec![n, n])
    }

    // -------------------------------------------------------------------------
    // Arithmetic
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn add_expr(self, other: Self) -> Self {
        let shape = self.shape.clone();
        let free = merge_free_indices(&self.free_indices, &other.free_indices);
        Self::new(ExprKind::Sum(Arc::new(self), Arc::new(other)), shape, free)
    }

    #[must_use]
    pub fn sub_expr(self, other: Self) -> Self {
        self.add_expr(other.negate())
    }

    /// Product; an index free in both operands is summed over (implicit summation)
    #[must_use]
    pub fn mul_expr(self, other: Self) -> Self {
        let repeated = repeated_indices(&self.free_indices, &other.free_indices);
        let mut product = self.mul_elementwise(other);
        for index in repeated {
            product = product.index_sum(index);
        }
        product
    }

    /// Product without implicit summation over shared free indices
    #[must_use]
    pub fn mul_elementwise(self, other: Self) -> Self {
        let shape = if self.shape.is_empty() {
            other.shape.clone()
        } else {
            self.shape.clone()
        };
        let free = merge_free_indices(&self.free_indices, &other.free_indices);
        Self::new(
            ExprKind::Product(Arc::new(self), Arc::new(other)),
            shape,
            free,
        )
    }

    #[must_use]
    pub fn div_expr(self, other: Self) -> Self {
        let shape = self.shape.clone();
        let free = merge_free_indices(&self.free_indices, &other.free_indices);
        Self::new(ExprKind::Division(Arc::new(self), Arc::new(other)), shape, free)
    }

    #[must_use]
    pub fn pow(self, exponent: impl Into<Self>) -> Self {
        let exponent = exponent.into();
        let free = merge_free_indices(&self.free_indices, &exponent.free_indices);
        Self::new(
            ExprKind::Power(Arc::new(self), Arc::new(exponent)),
            Vec::new(),
            free,
        )
    }

    #[must_use]
    pub fn negate(self) -> Self {
        Self::constant(-1.0).mul_expr(self)
    }

    #[must_use]
    pub fn math_function(self, function: MathFunction) -> Self {
        let free = self.free_indices.clone();
        Self::new(
            ExprKind::MathFunction(function, Arc::new(self)),
            Vec::new(),
            free,
        )
    }

    // -------------------------------------------------------------------------
    // Conditions
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn compare(self, op: ComparisonOp, other: impl Into<Self>) -> Self {
        let other = other.into();
        let free = merge_free_indices(&self.free_indices, &other.free_indices);
        Self::new(
            ExprKind::Comparison(op, Arc::new(self), Arc::new(other)),
            Vec::new(),
            free,
        )
    }

    #[must_use]
    pub fn lt(self, other: impl Into<Self>) -> Self {
        self.compare(ComparisonOp::Lt, other)
    }

    #[must_use]
    pub fn gt(self, other: impl Into<Self>) -> Self {
        self.compare(ComparisonOp::Gt, other)
    }

    #[must_use]
    pub fn le(self, other: impl Into<Self>) -> Self {
        self.compare(ComparisonOp::Le, other)
    }

    #[must_use]
    pub fn ge(self, other: impl Into<Self>) -> Self {
        self.compare(ComparisonOp::Ge, other)
    }

    #[must_use]
    pub fn eq_expr(self, other: impl Into<Self>) -> Self {
        self.compare(ComparisonOp::Eq, other)
    }

    #[must_use]
    pub fn ne_expr(self, other: impl Into<Self>) -> Self {
        self.compare(ComparisonOp::Ne, other)
    }

    fn boolean(op: BoolOp, operands: Vec<Self>) -> Self {
        let free = operands
            .iter()
            .fold(Vec::new(), |acc, e| merge_free_indices(&acc, &e.free_indices));
        let operands = operands.into_iter().map(Arc::new).collect();
        Self::new(ExprKind::BooleanOp(op, operands), Vec::new(), free)
    }

    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::boolean(BoolOp::And, vec![self, other])
    }

    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self::boolean(BoolOp::Or, vec![self, other])
    }

    #[must_use]
    pub fn not(self) -> Self {
        Self::boolean(BoolOp::Not, vec![self])
    }

    /// `condition ? true_value : false_value`
    #[must_use]
    pub fn conditional(condition: Self, true_value: Self, false_value: Self) -> Self {
        let shape = true_value.shape.clone();
        let free = merge_free_indices(
            &merge_free_indices(&condition.free_indices, &true_value.free_indices),
            &false_value.free_indices,
        );
        Self::new(
            ExprKind::Conditional(
                Arc::new(condition),
                Arc::new(true_value),
                Arc::new(false_value),
            ),
            shape,
            free,
        )
    }

    // -------------------------------------------------------------------------
    // Indexing and tensor algebra
    // -------------------------------------------------------------------------

    /// Select components; a free index appearing twice is summed over
    #[must_use]
    pub fn index(self, items: &[IndexItem]) -> Self {
        let mut item_free: Vec<(Index, usize)> = Vec::new();
        let mut repeated = Vec::new();
        for (axis, item) in items.iter().enumerate() {
            if let IndexItem::Free(i) = item {
                let dim = self.shape.get(axis).copied().unwrap_or(0);
                if item_free.iter().any(|(j, _)| j == i) {
                    repeated.push(*i);
                } else {
                    item_free.push((*i, dim));
                }
            }
        }
        item_free.sort_unstable();
        let free = merge_free_indices(&self.free_indices, &item_free);
        let mut indexed = Self::new(
            ExprKind::Indexed(Arc::new(self), items.to_vec()),
            Vec::new(),
            free,
        );
        for index in repeated {
            indexed = indexed.index_sum(index);
        }
        indexed
    }

    /// Select a fixed component
    #[must_use]
    pub fn index_fixed(self, component: &[usize]) -> Self {
        let items: Vec<IndexItem> = component.iter().map(|&c| IndexItem::Fixed(c)).collect();
        self.index(&items)
    }

    /// Bind free indices of a scalar expression to tensor axes
    #[must_use]
    pub fn as_tensor(self, indices: &[Index]) -> Self {
        let shape = indices
            .iter()
            .map(|&i| self.index_dim(i).unwrap_or(0))
            .collect();
        let free = self
            .free_indices
            .iter()
            .copied()
            .filter(|(i, _)| !indices.contains(i))
            .collect();
        Self::new(
            ExprKind::ComponentTensor(Arc::new(self), indices.to_vec()),
            shape,
            free,
        )
    }

    /// Stack rows of equal shape into a tensor with one more axis
    #[must_use]
    pub fn list_tensor(rows: Vec<Self>) -> Self {
        let mut shape = vec![rows.len()];
        let mut free = Vec::new();
        if let Some(first) = rows.first() {
            shape.extend_from_slice(&first.shape);
            free = first.free_indices.clone();
        }
        let rows = rows.into_iter().map(Arc::new).collect();
        Self::new(ExprKind::ListTensor(rows), shape, free)
    }

    #[must_use]
    pub fn transpose(self) -> Self {
        let mut shape = self.shape.clone();
        shape.reverse();
        let free = self.free_indices.clone();
        Self::new(ExprKind::Transposed(Arc::new(self)), shape, free)
    }

    /// Attach a label to a subexpression
    #[must_use]
    pub fn variable(self, label: u32) -> Self {
        let shape = self.shape.clone();
        let free = self.free_indices.clone();
        Self::new(ExprKind::Variable(Arc::new(self), label), shape, free)
    }

    /// Sum over all values of a free index
    #[must_use]
    pub fn index_sum(self, index: Index) -> Self {
        let shape = self.shape.clone();
        let free = without_index(&self.free_indices, index);
        Self::new(ExprKind::IndexSum(Arc::new(self), index), shape, free)
    }

    // -------------------------------------------------------------------------
    // Terminal modifiers
    // -------------------------------------------------------------------------

    #[must_use]
    pub(crate) fn derivative(operand: Self, reference: bool, dim: usize) -> Self {
        let mut shape = operand.shape.clone();
        shape.push(dim);
        let free = operand.free_indices.clone();
        Self::new(
            ExprKind::Derivative {
                operand: Arc::new(operand),
                reference,
                dim,
            },
            shape,
            free,
        )
    }

    #[must_use]
    pub(crate) fn reference_value(operand: Self, shape: Vec<usize>) -> Self {
        let free = operand.free_indices.clone();
        Self::new(ExprKind::ReferenceValue(Arc::new(operand)), shape, free)
    }

    #[must_use]
    pub fn restricted(self, restriction: Restriction) -> Self {
        let shape = self.shape.clone();
        let free = self.free_indices.clone();
        Self::new(ExprKind::Restricted(Arc::new(self), restriction), shape, free)
    }

    /// Restriction to the '+' side of an interior facet
    #[must_use]
    pub fn plus(self) -> Self {
        self.restricted(Restriction::Positive)
    }

    /// Restriction to the '-' side of an interior facet
    #[must_use]
    pub fn minus(self) -> Self {
        self.restricted(Restriction::Negative)
    }

    #[must_use]
    pub fn averaged(self, averaging: Averaging) -> Self {
        let shape = self.shape.clone();
        let free = self.free_indices.clone();
        Self::new(ExprKind::Averaged(Arc::new(self), averaging), shape, free)
    }

    #[must_use]
    pub fn cell_avg(self) -> Self {
        self.averaged(Averaging::Cell)
    }

    #[must_use]
    pub fn facet_avg(self) -> Self {
        self.averaged(Averaging::Facet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_is_sum_with_negation() {
        let e = Expr::constant(1.0) - Expr::constant(2.0);
        match e.kind() {
            ExprKind::Sum(_, b) => assert!(matches!(b.kind(), ExprKind::Product(..))),
            other => panic!("expected sum, got {}", other.name()),
        }
    }

    #[test]
    fn test_identity_shape() {
        let e = Expr::identity(3);
        assert_eq!(e.shape(), &[3, 3]);
        assert_eq!(e.num_components(), 9);
    }

    #[test]
    fn test_list_tensor_shape() {
        let row = Expr::list_tensor(vec![Expr::constant(1.0), Expr::constant(2.0)]);
        let m = Expr::list_tensor(vec![row.clone(), row]);
        assert_eq!(m.shape(), &[2, 2]);
        assert_eq!(m.clone().transpose().shape(), &[2, 2]);
    }

    #[test]
    fn test_conditional_takes_branch_shape() {
        let c = Expr::constant(1.0).lt(2.0);
        let e = Expr::conditional(c, Expr::zero(vec![3]), Expr::zero(vec![3]));
        assert_eq!(e.shape(), &[3]);
    }
}
