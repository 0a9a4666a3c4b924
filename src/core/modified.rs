//! Modified terminals: a terminal wrapped in derivative, restriction,
//! averaging and reference-value modifiers.

use super::error::CompileError;
use super::expr::{Averaging, Expr, ExprKind, Restriction};
use super::terminal::Terminal;

/// The modifier chain of a tensor-valued modified terminal
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TerminalModifiers {
    pub terminal: Terminal,
    /// Number of derivative axes appended to the base shape
    pub derivative_count: usize,
    /// Derivatives are taken in reference coordinates
    pub reference_derivatives: bool,
    pub restriction: Option<Restriction>,
    pub averaged: Option<Averaging>,
    pub reference_value: bool,
    /// Shape of the terminal value before derivatives are applied
    pub base_shape: Vec<usize>,
}

/// Peel the modifier chain of `expr`.
///
/// Returns `Ok(None)` if `expr` is neither a terminal nor a modifier, and
/// a `Graph` error if modifiers are combined in an invalid order or wrap a
/// non-terminal.
pub fn analyse_modified_terminal(expr: &Expr) -> Result<Option<TerminalModifiers>, CompileError> {
    let mut derivative_count = 0;
    let mut reference_derivatives = None;
    let mut restriction = None;
    let mut averaged = None;
    let mut reference_value = false;
    let mut base_shape = None;
    let mut innermost_modifier = None;

    let mut current = expr;
    loop {
        match current.kind() {
            ExprKind::Terminal(terminal) => {
                let base_shape = base_shape.unwrap_or_else(|| current.shape().to_vec());
                return Ok(Some(TerminalModifiers {
                    terminal: terminal.clone(),
                    derivative_count,
                    reference_derivatives: reference_derivatives.unwrap_or(false),
                    restriction,
                    averaged,
                    reference_value,
                    base_shape,
                }));
            }
            ExprKind::Derivative {
                operand, reference, ..
            } => {
                if reference_value {
                    return Err(CompileError::graph(
                        "derivative",
                        "applied inside a reference value",
                    ));
                }
                if reference_derivatives.is_some_and(|r| r != *reference) {
                    return Err(CompileError::graph(
                        "derivative",
                        "global and reference derivatives are mixed",
                    ));
                }
                reference_derivatives = Some(*reference);
                derivative_count += 1;
                innermost_modifier = Some(current.name());
                current = operand;
            }
            ExprKind::Restricted(operand, r) => {
                if restriction.is_some() {
                    return Err(CompileError::graph("restricted", "restricted twice"));
                }
                restriction = Some(*r);
                innermost_modifier = Some(current.name());
                current = operand;
            }
            ExprKind::Averaged(operand, a) => {
                if averaged.is_some() {
                    return Err(CompileError::graph("averaged", "averaged twice"));
                }
                if derivative_count > 0 {
                    return Err(CompileError::graph(
                        "derivative",
                        "derivative of an averaged quantity",
                    ));
                }
                averaged = Some(*a);
                innermost_modifier = Some(current.name());
                current = operand;
            }
            ExprKind::ReferenceValue(operand) => {
                if !matches!(operand.kind(), ExprKind::Terminal(Terminal::FormArgument(_))) {
                    return Err(CompileError::graph(
                        "reference_value",
                        format!("applied to {}, expected a form argument", operand.name()),
                    ));
                }
                reference_value = true;
                base_shape = Some(current.shape().to_vec());
                innermost_modifier = Some(current.name());
                current = operand;
            }
            other => {
                return match innermost_modifier {
                    None => Ok(None),
                    Some(modifier) => Err(CompileError::graph(
                        modifier,
                        format!("applied to a non-terminal {}", other.name()),
                    )),
                };
            }
        }
    }
}

/// A scalar component of a modified terminal.
///
/// Derivative directions are sorted, since partial derivatives commute;
/// `component` is the value component after symmetry folding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModifiedTerminal {
    pub terminal: Terminal,
    pub derivatives: Vec<usize>,
    pub reference_derivatives: bool,
    pub restriction: Option<Restriction>,
    pub averaged: Option<Averaging>,
    pub reference_value: bool,
    pub component: Vec<usize>,
    pub flat_component: usize,
}

impl ModifiedTerminal {
    /// Number of derivatives per direction, `dim` directions
    pub fn derivative_counts(&self, dim: usize) -> Vec<usize> {
        let mut counts = vec![0; dim];
        for &d in &self.derivatives {
            if let Some(c) = counts.get_mut(d) {
                *c += 1;
            }
        }
        counts
    }

    pub fn is_form_argument(&self) -> bool {
        matches!(self.terminal, Terminal::FormArgument(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::terminal::{Cell, FiniteElement, FormContext};

    fn setup() -> (FormContext, Expr) {
        let mut ctx = FormContext::new(Cell::triangle());
        let f = ctx.coefficient(FiniteElement::lagrange(Cell::triangle(), 2));
        (ctx, f)
    }

    #[test]
    fn test_plain_terminal() {
        let (_, f) = setup();
        let mods = analyse_modified_terminal(&f).unwrap().unwrap();
        assert_eq!(mods.derivative_count, 0);
        assert!(mods.base_shape.is_empty());
    }

    #[test]
    fn test_restricted_gradient() {
        let (ctx, f) = setup();
        let e = ctx.grad(&ctx.grad(&f)).minus();
        let mods = analyse_modified_terminal(&e).unwrap().unwrap();
        assert_eq!(mods.derivative_count, 2);
        assert_eq!(mods.restriction, Some(Restriction::Negative));
        assert!(!mods.reference_derivatives);
    }

    #[test]
    fn test_non_terminal_is_not_modified_terminal() {
        let (_, f) = setup();
        let e = f.clone() + f;
        assert_eq!(analyse_modified_terminal(&e).unwrap(), None);
    }

    #[test]
    fn test_derivative_of_sum_is_rejected() {
        let (ctx, f) = setup();
        let e = ctx.grad(&(f.clone() + f));
        let err = analyse_modified_terminal(&e).unwrap_err();
        assert!(matches!(err, CompileError::Graph { kind: "derivative", .. }));
    }

    #[test]
    fn test_mixed_derivatives_are_rejected() {
        let (ctx, f) = setup();
        let e = ctx.grad(&ctx.reference_grad(&f));
        assert!(analyse_modified_terminal(&e).is_err());
    }

    #[test]
    fn test_derivative_counts() {
        let (_, f) = setup();
        let ExprKind::Terminal(terminal) = f.kind().clone() else {
            unreachable!()
        };
        let mt = ModifiedTerminal {
            terminal,
            derivatives: vec![0, 1, 1],
            reference_derivatives: false,
            restriction: None,
            averaged: None,
            reference_value: false,
            component: Vec::new(),
            flat_component: 0,
        };
        assert_eq!(mt.derivative_counts(2), vec![1, 2]);
    }
}
