//! Dependency, liveness and piecewise/varying analysis over a scalar vertex array.
//!
//! All passes are single sweeps in index order (or reverse index order),
//! relying on operands having lower indices than their users.

use super::scalar::ScalarOp;
use crate::core::modified::ModifiedTerminal;

/// Operand lists of each vertex, sorted and deduplicated
pub fn compute_dependencies(vertices: &[ScalarOp]) -> Vec<Vec<usize>> {
    vertices
        .iter()
        .map(|op| {
            let mut deps = op.operands();
            deps.sort_unstable();
            deps.dedup();
            deps
        })
        .collect()
}

/// Number of users of each vertex
pub fn compute_dependency_count(dependencies: &[Vec<usize>]) -> Vec<usize> {
    let mut depcount = vec![0; dependencies.len()];
    for deps in dependencies {
        for &d in deps {
            depcount[d] += 1;
        }
    }
    depcount
}

/// Users of each vertex, in increasing order
pub fn invert_dependencies(dependencies: &[Vec<usize>], depcount: &[usize]) -> Vec<Vec<usize>> {
    let mut inverse: Vec<Vec<usize>> = depcount.iter().map(|&c| Vec::with_capacity(c)).collect();
    for (user, deps) in dependencies.iter().enumerate() {
        for &d in deps {
            inverse[d].push(user);
        }
    }
    inverse
}

/// Mark every vertex the targets depend on; returns the marks and their count
pub fn mark_active(dependencies: &[Vec<usize>], targets: &[usize]) -> (Vec<bool>, usize) {
    let mut active = vec![false; dependencies.len()];
    let mut count = 0;
    let mut stack: Vec<usize> = targets.to_vec();
    while let Some(v) = stack.pop() {
        if active[v] {
            continue;
        }
        active[v] = true;
        count += 1;
        stack.extend(dependencies[v].iter().copied().filter(|&d| !active[d]));
    }
    (active, count)
}

/// Forward closure of `seeds` along user edges
pub fn mark_image(inverse_dependencies: &[Vec<usize>], seeds: &[bool]) -> Vec<bool> {
    let mut image = seeds.to_vec();
    for v in 0..image.len() {
        if image[v] {
            for &user in &inverse_dependencies[v] {
                image[user] = true;
            }
        }
    }
    image
}

/// Active vertices split into piecewise (constant per cell) and varying
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub active: Vec<bool>,
    pub piecewise: Vec<bool>,
    pub varying: Vec<bool>,
}

/// Classify active vertices.
///
/// Varying is seeded at active modified terminals for which
/// `is_cellwise_constant` is false; everything reachable from a seed is
/// varying and every other active vertex is piecewise.
pub fn classify(
    vertices: &[ScalarOp],
    active: &[bool],
    inverse_dependencies: &[Vec<usize>],
    is_cellwise_constant: impl Fn(&ModifiedTerminal) -> bool,
) -> Classification {
    let seeds: Vec<bool> = vertices
        .iter()
        .zip(active)
        .map(|(op, &a)| a && op.as_modified_terminal().is_some_and(|mt| !is_cellwise_constant(mt)))
        .collect();
    let image = mark_image(inverse_dependencies, &seeds);
    let varying: Vec<bool> = image.iter().zip(active).map(|(&v, &a)| v && a).collect();
    let piecewise = varying.iter().zip(active).map(|(&v, &a)| a && !v).collect();
    Classification {
        active: active.to_vec(),
        piecewise,
        varying,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::terminal::ScalarValue;

    fn lit(v: f64) -> ScalarOp {
        ScalarOp::Literal(ScalarValue(v))
    }

    #[test]
    fn test_dependencies_sorted_and_deduplicated() {
        let vertices = vec![lit(1.0), lit(2.0), ScalarOp::Product(1, 1), ScalarOp::Sum(2, 0)];
        let deps = compute_dependencies(&vertices);
        assert_eq!(deps[2], vec![1]);
        assert_eq!(deps[3], vec![0, 2]);
        let depcount = compute_dependency_count(&deps);
        assert_eq!(depcount, vec![1, 1, 1, 0]);
        let inverse = invert_dependencies(&deps, &depcount);
        assert_eq!(inverse[1], vec![2]);
        assert_eq!(inverse[0], vec![3]);
    }

    #[test]
    fn test_mark_active_from_targets() {
        let vertices = vec![lit(1.0), lit(2.0), ScalarOp::Product(0, 1), ScalarOp::Sum(0, 0)];
        let deps = compute_dependencies(&vertices);
        let (active, count) = mark_active(&deps, &[3]);
        assert_eq!(active, vec![true, false, false, true]);
        assert_eq!(count, 2);
    }

    #[test]
    fn test_mark_image_propagates_forward() {
        let vertices = vec![
            lit(1.0),
            lit(2.0),
            ScalarOp::Product(0, 1),
            ScalarOp::Sum(1, 1),
            ScalarOp::Sum(2, 3),
        ];
        let deps = compute_dependencies(&vertices);
        let depcount = compute_dependency_count(&deps);
        let inverse = invert_dependencies(&deps, &depcount);
        let image = mark_image(&inverse, &[true, false, false, false, false]);
        assert_eq!(image, vec![true, false, true, false, true]);
    }
}
