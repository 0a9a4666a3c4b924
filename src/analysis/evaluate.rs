//! Numeric evaluation of a scalar vertex array.
//!
//! Used to check that rewrites preserve the integrand value. Booleans are
//! represented as 1 and 0.

use super::scalar::ScalarOp;
use crate::core::expr::{ComparisonOp, MathFunction};
use crate::core::modified::ModifiedTerminal;
use crate::core::traits::EvalScalar;

fn truth<T: EvalScalar>(b: bool) -> T {
    if b { T::one() } else { T::zero() }
}

fn apply_function<T: EvalScalar>(function: MathFunction, x: T) -> T {
    match function {
        MathFunction::Sqrt => x.sqrt(),
        MathFunction::Exp => x.exp(),
        MathFunction::Ln => x.ln(),
        MathFunction::Sin => x.sin(),
        MathFunction::Cos => x.cos(),
        MathFunction::Tan => x.tan(),
        MathFunction::Abs => x.abs(),
        MathFunction::Atan => x.atan(),
    }
}

fn compare<T: EvalScalar>(op: ComparisonOp, a: T, b: T) -> bool {
    match op {
        ComparisonOp::Lt => a < b,
        ComparisonOp::Gt => a > b,
        ComparisonOp::Le => a <= b,
        ComparisonOp::Ge => a >= b,
        ComparisonOp::Eq => a == b,
        ComparisonOp::Ne => a != b,
    }
}

/// Value of every vertex, with terminals supplied by `terminal_value`
pub fn evaluate_vertices<T: EvalScalar>(
    vertices: &[ScalarOp],
    terminal_value: impl Fn(&ModifiedTerminal) -> T,
) -> Vec<T> {
    let mut values: Vec<T> = Vec::with_capacity(vertices.len());
    for op in vertices {
        let value = match op {
            ScalarOp::Literal(v) => T::from_f64(v.0).unwrap_or_else(T::nan),
            ScalarOp::ModifiedTerminal(mt) => terminal_value(mt),
            ScalarOp::Sum(a, b) => values[*a] + values[*b],
            ScalarOp::Product(a, b) => values[*a] * values[*b],
            ScalarOp::Division(a, b) => values[*a] / values[*b],
            ScalarOp::Power(a, b) => values[*a].powf(values[*b]),
            ScalarOp::MathFunction(f, a) => apply_function(*f, values[*a]),
            ScalarOp::Comparison(op, a, b) => truth(compare(*op, values[*a], values[*b])),
            ScalarOp::Not(a) => truth(values[*a] == T::zero()),
            ScalarOp::And(a, b) => truth(values[*a] != T::zero() && values[*b] != T::zero()),
            ScalarOp::Or(a, b) => truth(values[*a] != T::zero() || values[*b] != T::zero()),
            ScalarOp::Conditional(c, t, f) => {
                if values[*c] != T::zero() {
                    values[*t]
                } else {
                    values[*f]
                }
            }
        };
        values.push(value);
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::terminal::ScalarValue;

    fn lit(v: f64) -> ScalarOp {
        ScalarOp::Literal(ScalarValue(v))
    }

    #[test]
    fn test_arithmetic() {
        let vertices = vec![
            lit(3.0),
            lit(4.0),
            ScalarOp::Product(0, 0),
            ScalarOp::Product(1, 1),
            ScalarOp::Sum(2, 3),
            ScalarOp::MathFunction(MathFunction::Sqrt, 4),
            ScalarOp::Division(5, 1),
        ];
        let values = evaluate_vertices::<f64>(&vertices, |_| 0.0);
        assert_eq!(values[5], 5.0);
        assert_eq!(values[6], 1.25);
    }

    #[test]
    fn test_conditional_selects_branch() {
        let vertices = vec![
            lit(1.0),
            lit(2.0),
            ScalarOp::Comparison(ComparisonOp::Lt, 0, 1),
            ScalarOp::Conditional(2, 0, 1),
            ScalarOp::Not(2),
            ScalarOp::Conditional(4, 0, 1),
        ];
        let values = evaluate_vertices::<f64>(&vertices, |_| 0.0);
        assert_eq!(values[3], 1.0);
        assert_eq!(values[5], 2.0);
    }
}
