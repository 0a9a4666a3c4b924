//! Operator overloading and math function methods for `Expr`.

use std::ops::{Add, Div, Mul, Neg, Sub};

use super::{Expr, MathFunction};

macro_rules! impl_math_functions {
    ($($fn_name:ident => $function:expr),* $(,)?) => {
        impl Expr {
            $(
                #[must_use]
                pub fn $fn_name(self) -> Expr {
                    self.math_function($function)
                }
            )*
        }
    };
}

impl_math_functions!(
    sqrt => MathFunction::Sqrt,
    exp => MathFunction::Exp,
    ln => MathFunction::Ln,
    sin => MathFunction::Sin,
    cos => MathFunction::Cos,
    tan => MathFunction::Tan,
    abs => MathFunction::Abs,
    atan => MathFunction::Atan,
);

impl From<f64> for Expr {
    fn from(n: f64) -> Self {
        Self::constant(n)
    }
}

impl From<i32> for Expr {
    fn from(n: i32) -> Self {
        Self::constant(f64::from(n))
    }
}

// ============================================================================
// Operator Overloading
// ============================================================================

macro_rules! impl_binary_ops {
    ($lhs:ty, $rhs:ty, $to_lhs:expr, $to_rhs:expr) => {
        impl Add<$rhs> for $lhs {
            type Output = Expr;
            fn add(self, rhs: $rhs) -> Expr {
                Expr::add_expr($to_lhs(self), $to_rhs(rhs))
            }
        }
        impl Sub<$rhs> for $lhs {
            type Output = Expr;
            fn sub(self, rhs: $rhs) -> Expr {
                Expr::sub_expr($to_lhs(self), $to_rhs(rhs))
            }
        }
        impl Mul<$rhs> for $lhs {
            type Output = Expr;
            fn mul(self, rhs: $rhs) -> Expr {
                Expr::mul_expr($to_lhs(self), $to_rhs(rhs))
            }
        }
        impl Div<$rhs> for $lhs {
            type Output = Expr;
            fn div(self, rhs: $rhs) -> Expr {
                Expr::div_expr($to_lhs(self), $to_rhs(rhs))
            }
        }
    };
}

impl_binary_ops!(Expr, Expr, |e: Expr| e, |r: Expr| r);
impl_binary_ops!(Expr, &Expr, |e: Expr| e, |r: &Expr| r.clone());
impl_binary_ops!(Expr, f64, |e: Expr| e, |r: f64| Expr::constant(r));
impl_binary_ops!(&Expr, &Expr, |e: &Expr| e.clone(), |r: &Expr| r.clone());
impl_binary_ops!(&Expr, Expr, |e: &Expr| e.clone(), |r: Expr| r);
impl_binary_ops!(&Expr, f64, |e: &Expr| e.clone(), |r: f64| Expr::constant(r));

// f64 on left side
impl_binary_ops!(f64, Expr, |n: f64| Expr::constant(n), |r: Expr| r);
impl_binary_ops!(f64, &Expr, |n: f64| Expr::constant(n), |r: &Expr| r.clone());

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        self.negate()
    }
}

impl Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        self.clone().negate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expr::ExprKind;

    #[test]
    fn test_scalar_on_left() {
        let e = 2.0 * Expr::constant(3.0);
        assert!(matches!(e.kind(), ExprKind::Product(a, _) if a.as_scalar() == Some(2.0)));
    }

    #[test]
    fn test_math_function_method() {
        let e = Expr::constant(4.0).sqrt();
        assert!(matches!(e.kind(), ExprKind::MathFunction(MathFunction::Sqrt, _)));
    }
}
