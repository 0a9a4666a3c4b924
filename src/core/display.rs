//! Display formatting for integrand expressions.
//!
//! Produces a compact, human readable rendering used in diagnostics and
//! debug logging, with parentheses only where operator precedence needs them.

use std::fmt;

use super::expr::{Averaging, BoolOp, Expr, ExprKind, IndexItem, Restriction};
use super::terminal::{Literal, Terminal};

/// Binding strength of an operator kind (higher binds tighter)
fn precedence(kind: &ExprKind) -> u8 {
    match kind {
        ExprKind::Conditional(..) => 1,
        ExprKind::BooleanOp(BoolOp::Or, _) => 2,
        ExprKind::BooleanOp(BoolOp::And, _) => 3,
        ExprKind::Comparison(..) => 4,
        ExprKind::BooleanOp(BoolOp::Not, _) => 5,
        ExprKind::Sum(..) => 6,
        ExprKind::Product(..) | ExprKind::Division(..) => 7,
        ExprKind::Power(..) => 8,
        _ => 9,
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, operand: &Expr, parent: u8) -> fmt::Result {
    if precedence(operand.kind()) < parent {
        write!(f, "({operand})")
    } else {
        write!(f, "{operand}")
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(Literal::Scalar(v)) => write!(f, "{}", format_number(v.0)),
            Self::Literal(Literal::Zero(shape)) => write!(f, "0{shape:?}"),
            Self::Literal(Literal::Identity(n)) => write!(f, "I{n}"),
            Self::FormArgument(id) => write!(f, "f{id:?}"),
            Self::Geometry(q) => write!(f, "{}", q.name()),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = precedence(self.kind());
        match self.kind() {
            ExprKind::Terminal(t) => write!(f, "{t}"),
            ExprKind::Sum(a, b) => {
                write_operand(f, a, p)?;
                write!(f, " + ")?;
                write_operand(f, b, p + 1)
            }
            ExprKind::Product(a, b) => {
                write_operand(f, a, p)?;
                write!(f, "*")?;
                write_operand(f, b, p + 1)
            }
            ExprKind::Division(a, b) => {
                write_operand(f, a, p)?;
                write!(f, "/")?;
                write_operand(f, b, p + 1)
            }
            ExprKind::Power(a, b) => {
                write_operand(f, a, p + 1)?;
                write!(f, "^")?;
                write_operand(f, b, p)
            }
            ExprKind::MathFunction(func, a) => write!(f, "{}({a})", func.name()),
            ExprKind::Comparison(op, a, b) => {
                write_operand(f, a, p + 1)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, b, p + 1)
            }
            ExprKind::BooleanOp(BoolOp::Not, ops) => {
                write!(f, "!")?;
                for op in ops {
                    write_operand(f, op, p + 1)?;
                }
                Ok(())
            }
            ExprKind::BooleanOp(op, ops) => {
                let sep = if *op == BoolOp::And { " && " } else { " || " };
                for (k, operand) in ops.iter().enumerate() {
                    if k > 0 {
                        write!(f, "{sep}")?;
                    }
                    write_operand(f, operand, p + 1)?;
                }
                Ok(())
            }
            ExprKind::Conditional(c, t, e) => {
                write_operand(f, c, p + 1)?;
                write!(f, " ? ")?;
                write_operand(f, t, p + 1)?;
                write!(f, " : ")?;
                write_operand(f, e, p)
            }
            ExprKind::Indexed(a, items) => {
                write_operand(f, a, 9)?;
                let items: Vec<String> = items
                    .iter()
                    .map(|item| match item {
                        IndexItem::Fixed(v) => v.to_string(),
                        IndexItem::Free(i) => format!("i{}", i.0),
                    })
                    .collect();
                write!(f, "[{}]", items.join(", "))
            }
            ExprKind::ComponentTensor(a, indices) => {
                let indices: Vec<String> = indices.iter().map(|i| format!("i{}", i.0)).collect();
                write!(f, "as_tensor({a}, ({}))", indices.join(", "))
            }
            ExprKind::ListTensor(rows) => {
                let rows: Vec<String> = rows.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", rows.join(", "))
            }
            ExprKind::Transposed(a) => write!(f, "{a}^T"),
            ExprKind::Variable(a, label) => write!(f, "var{label}({a})"),
            ExprKind::IndexSum(a, i) => write!(f, "sum_i{}({a})", i.0),
            ExprKind::Derivative {
                operand, reference, ..
            } => {
                let name = if *reference { "reference_grad" } else { "grad" };
                write!(f, "{name}({operand})")
            }
            ExprKind::Restricted(a, r) => {
                let side = match r {
                    Restriction::Positive => "+",
                    Restriction::Negative => "-",
                };
                write!(f, "({a})('{side}')")
            }
            ExprKind::Averaged(a, Averaging::Cell) => write!(f, "cell_avg({a})"),
            ExprKind::Averaged(a, Averaging::Facet) => write!(f, "facet_avg({a})"),
            ExprKind::ReferenceValue(a) => write!(f, "reference_value({a})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_parenthesizes_lower_precedence() {
        let e = (Expr::constant(1.0) + Expr::constant(2.0)) * Expr::constant(3.0);
        assert_eq!(e.to_string(), "(1 + 2)*3");
    }

    #[test]
    fn test_display_fractional_literal() {
        assert_eq!(Expr::constant(0.5).to_string(), "0.5");
    }

    #[test]
    fn test_display_conditional() {
        let c = Expr::constant(1.0).lt(2.0);
        let e = Expr::conditional(c, Expr::constant(3.0), Expr::constant(4.0));
        assert_eq!(e.to_string(), "1 < 2 ? 3 : 4");
    }
}
