use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// Default relative tolerance for comparing evaluated values
pub(crate) const FLOAT_TOLERANCE: f64 = 1e-10;

/// Scalar types the vertex evaluator can compute with.
///
/// This aggregates `num_traits::Float` (sqrt, exp, sin, ...) with
/// conversion from `f64` literals.
pub trait EvalScalar: Float + FromPrimitive + Debug + 'static {}

// Blanket implementation for any type that satisfies the bounds
impl<T> EvalScalar for T where T: Float + FromPrimitive + Debug + 'static {}

/// Check if two floats agree up to a relative tolerance
#[inline]
pub(crate) fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= FLOAT_TOLERANCE * (1.0 + a.abs().max(b.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approx_eq() {
        assert!(approx_eq(1.0, 1.0 + 1e-12));
        assert!(approx_eq(1e6, 1e6 + 1e-5));
        assert!(!approx_eq(1.0, 1.1));
        assert!(approx_eq(0.0, -1e-11));
    }
}
