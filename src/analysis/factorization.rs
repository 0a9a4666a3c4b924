//! Argument factorization of a multilinear integrand.
//!
//! Rewrites the scalar integrand as `sum over tuples of factor * prod(args)`,
//! where each tuple holds one modified argument per argument slot and each
//! factor is an argument-free vertex spliced into the scalar graph.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use super::scalar::{ScalarGraph, ScalarOp};
use crate::core::error::CompileError;
use crate::core::modified::ModifiedTerminal;
use crate::core::terminal::{FormContext, Terminal};

/// A modified terminal whose terminal is an argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifiedArgument {
    /// Vertex of the modified argument in the scalar graph
    pub vertex: usize,
    /// Argument slot
    pub number: usize,
    pub terminal: ModifiedTerminal,
}

/// Modified-argument ids ordered by slot, mapped to their factor vertex
pub type FactorMap = BTreeMap<Vec<usize>, usize>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentFactorization {
    /// Sorted by slot, then by vertex; tuple entries index into this list
    pub modified_arguments: Vec<ModifiedArgument>,
    pub factors: FactorMap,
}

/// Modified arguments of the graph, ordered by (slot, vertex)
fn collect_modified_arguments(graph: &ScalarGraph, ctx: &FormContext) -> Vec<ModifiedArgument> {
    let mut found: Vec<ModifiedArgument> = graph
        .vertices
        .iter()
        .enumerate()
        .filter_map(|(vertex, op)| {
            let mt = op.as_modified_terminal()?;
            let Terminal::FormArgument(id) = mt.terminal else {
                return None;
            };
            let number = ctx.get(id)?.argument_number()?;
            Some(ModifiedArgument {
                vertex,
                number,
                terminal: mt.clone(),
            })
        })
        .collect();
    found.sort_by_key(|ma| (ma.number, ma.vertex));
    found
}

struct Factorizer<'a> {
    graph: &'a mut ScalarGraph,
    slots: Vec<usize>,
}

impl Factorizer<'_> {
    fn mul(&mut self, a: usize, b: usize) -> usize {
        if self.graph.is_literal(a, 1.0) {
            b
        } else if self.graph.is_literal(b, 1.0) {
            a
        } else {
            self.graph.intern(ScalarOp::Product(a, b))
        }
    }

    fn add(&mut self, a: usize, b: usize) -> usize {
        if self.graph.is_literal(a, 0.0) {
            b
        } else if self.graph.is_literal(b, 0.0) {
            a
        } else {
            self.graph.intern(ScalarOp::Sum(a, b))
        }
    }

    /// Insert a term, summing factors of equal tuples
    fn accumulate(&mut self, map: &mut FactorMap, key: Vec<usize>, factor: usize) {
        let factor = match map.get(&key) {
            Some(&existing) => self.add(existing, factor),
            None => factor,
        };
        map.insert(key, factor);
    }

    /// Operand map for sums and conditionals, where a literal zero is an empty sum
    fn additive_operand(&self, maps: &[Option<FactorMap>], v: usize) -> Option<FactorMap> {
        match &maps[v] {
            Some(map) => Some(map.clone()),
            None if self.graph.is_literal(v, 0.0) => Some(FactorMap::new()),
            None => None,
        }
    }

    fn sum(
        &mut self,
        maps: &[Option<FactorMap>],
        a: usize,
        b: usize,
    ) -> Result<Option<FactorMap>, CompileError> {
        if maps[a].is_none() && maps[b].is_none() {
            return Ok(None);
        }
        let (Some(mut merged), Some(other)) =
            (self.additive_operand(maps, a), self.additive_operand(maps, b))
        else {
            return Err(CompileError::factorization(
                "sum of argument-dependent and argument-free terms is not multilinear",
            ));
        };
        for (key, factor) in other {
            self.accumulate(&mut merged, key, factor);
        }
        Ok(Some(merged))
    }

    fn product(
        &mut self,
        maps: &[Option<FactorMap>],
        a: usize,
        b: usize,
    ) -> Result<Option<FactorMap>, CompileError> {
        match (&maps[a], &maps[b]) {
            (None, None) => Ok(None),
            (Some(left), None) => {
                let mut out = FactorMap::new();
                for (key, &factor) in left {
                    let f = self.mul(factor, b);
                    self.accumulate(&mut out, key.clone(), f);
                }
                Ok(Some(out))
            }
            (None, Some(right)) => {
                let mut out = FactorMap::new();
                for (key, &factor) in right {
                    let f = self.mul(a, factor);
                    self.accumulate(&mut out, key.clone(), f);
                }
                Ok(Some(out))
            }
            (Some(left), Some(right)) => {
                let mut out = FactorMap::new();
                for (ka, &fa) in left {
                    for (kb, &fb) in right {
                        if let Some(slot) = ka
                            .iter()
                            .find(|&&x| kb.iter().any(|&y| self.slots[x] == self.slots[y]))
                            .map(|&x| self.slots[x])
                        {
                            return Err(CompileError::factorization(format!(
                                "ambiguous binding: product uses argument slot {slot} twice"
                            )));
                        }
                        let mut key: Vec<usize> = ka.iter().chain(kb).copied().collect();
                        key.sort_unstable();
                        let f = self.mul(fa, fb);
                        self.accumulate(&mut out, key, f);
                    }
                }
                Ok(Some(out))
            }
        }
    }

    fn division(
        &mut self,
        maps: &[Option<FactorMap>],
        a: usize,
        b: usize,
    ) -> Result<Option<FactorMap>, CompileError> {
        if maps[b].is_some() {
            return Err(CompileError::factorization(
                "division by an argument-dependent denominator",
            ));
        }
        let Some(numerator) = &maps[a] else {
            return Ok(None);
        };
        let mut out = FactorMap::new();
        for (key, &factor) in numerator {
            let f = self.graph.intern(ScalarOp::Division(factor, b));
            out.insert(key.clone(), f);
        }
        Ok(Some(out))
    }

    fn conditional(
        &mut self,
        maps: &[Option<FactorMap>],
        c: usize,
        t: usize,
        f: usize,
    ) -> Result<Option<FactorMap>, CompileError> {
        if maps[c].is_some() {
            return Err(CompileError::factorization(
                "conditional with an argument-dependent condition",
            ));
        }
        if maps[t].is_none() && maps[f].is_none() {
            return Ok(None);
        }
        let (Some(true_map), Some(false_map)) =
            (self.additive_operand(maps, t), self.additive_operand(maps, f))
        else {
            return Err(CompileError::factorization(
                "conditional mixes argument-dependent and argument-free branches",
            ));
        };
        let keys: Vec<Vec<usize>> = true_map
            .keys()
            .chain(false_map.keys())
            .cloned()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut out = FactorMap::new();
        for key in keys {
            let zero = self.graph.literal(0.0);
            let ft = true_map.get(&key).copied().unwrap_or(zero);
            let ff = false_map.get(&key).copied().unwrap_or(zero);
            let factor = self.graph.intern(ScalarOp::Conditional(c, ft, ff));
            out.insert(key, factor);
        }
        Ok(Some(out))
    }
}

/// Factorize the single target of `graph` over the argument slots of `ctx`.
///
/// Factor vertices are appended to `graph` through its interner, so operand
/// order stays topological.
///
/// # Errors
/// - `Unsupported` if the form rank exceeds `max_rank`
/// - `InvalidInput` if the graph does not have exactly one scalar target
/// - `Factorization` if the integrand is not multilinear in the arguments
pub fn compute_argument_factorization(
    graph: &mut ScalarGraph,
    ctx: &FormContext,
    max_rank: usize,
) -> Result<ArgumentFactorization, CompileError> {
    let rank = ctx.rank();
    if rank > max_rank {
        return Err(CompileError::unsupported(format!(
            "rank {rank} exceeds the factorization ceiling {max_rank}"
        )));
    }
    let [target] = graph.targets[..] else {
        return Err(CompileError::invalid_input(format!(
            "integrand must be a single scalar, got {} components",
            graph.targets.len()
        )));
    };

    let modified_arguments = collect_modified_arguments(graph, ctx);
    let ma_of_vertex: FxHashMap<usize, usize> = modified_arguments
        .iter()
        .enumerate()
        .map(|(i, ma)| (ma.vertex, i))
        .collect();
    let slots: Vec<usize> = modified_arguments.iter().map(|ma| ma.number).collect();

    let original_len = graph.len();
    let mut factorizer = Factorizer { graph, slots };
    let mut maps: Vec<Option<FactorMap>> = Vec::with_capacity(original_len);

    for v in 0..original_len {
        let op = factorizer.graph.vertices[v].clone();
        let map = if let Some(&ma) = ma_of_vertex.get(&v) {
            let one = factorizer.graph.literal(1.0);
            Some(FactorMap::from([(vec![ma], one)]))
        } else {
            match op {
                ScalarOp::Literal(_) | ScalarOp::ModifiedTerminal(_) => None,
                ScalarOp::Sum(a, b) => factorizer.sum(&maps, a, b)?,
                ScalarOp::Product(a, b) => factorizer.product(&maps, a, b)?,
                ScalarOp::Division(a, b) => factorizer.division(&maps, a, b)?,
                ScalarOp::Conditional(c, t, f) => factorizer.conditional(&maps, c, t, f)?,
                other => {
                    if other.operands().iter().any(|&o| maps[o].is_some()) {
                        return Err(CompileError::factorization(format!(
                            "{} of an argument-dependent operand is not multilinear",
                            op_name(&other)
                        )));
                    }
                    None
                }
            }
        };
        maps.push(map);
    }

    let factors = match maps[target].take() {
        None if rank == 0 => FactorMap::from([(Vec::new(), target)]),
        None => {
            return Err(CompileError::factorization(format!(
                "integrand does not depend on the {rank} argument slot(s)"
            )));
        }
        Some(map) => map,
    };

    let expected: Vec<usize> = (0..rank).collect();
    for key in factors.keys() {
        let slots: Vec<usize> = key.iter().map(|&ma| factorizer.slots[ma]).collect();
        if slots != expected {
            return Err(CompileError::factorization(format!(
                "term binds argument slots {slots:?}, expected {expected:?}"
            )));
        }
    }

    trace!(spliced = factorizer.graph.len() - original_len, "spliced factor vertices");
    debug!(
        modified_arguments = modified_arguments.len(),
        terms = factors.len(),
        "argument factorization"
    );
    Ok(ArgumentFactorization {
        modified_arguments,
        factors,
    })
}

fn op_name(op: &ScalarOp) -> &'static str {
    match op {
        ScalarOp::Power(..) => "power",
        ScalarOp::MathFunction(..) => "math function",
        ScalarOp::Comparison(..) => "comparison",
        ScalarOp::Not(_) | ScalarOp::And(..) | ScalarOp::Or(..) => "boolean operator",
        _ => "operator",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::graph::{GraphMode, build_graph};
    use crate::analysis::scalar::build_scalar_graph;
    use crate::analysis::valuenumbering::value_numbering;
    use crate::core::expr::Expr;
    use crate::core::terminal::{Cell, FiniteElement};

    fn factorize(ctx: &FormContext, e: Expr) -> Result<(ScalarGraph, ArgumentFactorization), CompileError> {
        let graph = build_graph(&[e], GraphMode::ModifiedTerminalsAsUnits)?;
        let table = value_numbering(&graph, ctx, 2)?;
        let mut scalar = build_scalar_graph(&graph, &table)?;
        let af = compute_argument_factorization(&mut scalar, ctx, 2)?;
        Ok((scalar, af))
    }

    fn p1() -> FiniteElement {
        FiniteElement::lagrange(Cell::triangle(), 1)
    }

    #[test]
    fn test_mass_matrix_has_unit_factor() {
        let mut ctx = FormContext::new(Cell::triangle());
        let v = ctx.argument(0, p1());
        let u = ctx.argument(1, p1());
        let (scalar, af) = factorize(&ctx, u * v).unwrap();
        assert_eq!(af.factors.len(), 1);
        let (key, &factor) = af.factors.iter().next().unwrap();
        assert_eq!(key, &vec![0, 1]);
        assert!(scalar.is_literal(factor, 1.0));
    }

    #[test]
    fn test_equal_tuples_are_summed() {
        let mut ctx = FormContext::new(Cell::triangle());
        let f = ctx.coefficient(p1());
        let g = ctx.coefficient(p1());
        let v = ctx.argument(0, p1());
        let (scalar, af) = factorize(&ctx, &f * &v + &g * &v).unwrap();
        assert_eq!(af.factors.len(), 1);
        let factor = af.factors[&vec![0]];
        assert!(matches!(scalar.vertices[factor], ScalarOp::Sum(..)));
    }

    #[test]
    fn test_division_by_constant_is_factored() {
        let mut ctx = FormContext::new(Cell::triangle());
        let c = ctx.constant();
        let v = ctx.argument(0, p1());
        let (scalar, af) = factorize(&ctx, v / c).unwrap();
        let factor = af.factors[&vec![0]];
        assert!(matches!(scalar.vertices[factor], ScalarOp::Division(..)));
    }

    #[test]
    fn test_conditional_branches() {
        let mut ctx = FormContext::new(Cell::triangle());
        let f = ctx.coefficient(p1());
        let v = ctx.argument(0, p1());
        let e = Expr::conditional(f.lt(0.5), v, Expr::constant(0.0));
        let (scalar, af) = factorize(&ctx, e).unwrap();
        let factor = af.factors[&vec![0]];
        let ScalarOp::Conditional(_, t, e) = scalar.vertices[factor] else {
            panic!("expected conditional factor");
        };
        assert!(scalar.is_literal(t, 1.0));
        assert!(scalar.is_literal(e, 0.0));
    }

    #[test]
    fn test_nonlinear_use_is_rejected() {
        let mut ctx = FormContext::new(Cell::triangle());
        let v = ctx.argument(0, p1());
        let err = factorize(&ctx, v.sin()).unwrap_err();
        assert!(matches!(err, CompileError::Factorization(_)));
    }

    #[test]
    fn test_affine_sum_is_rejected() {
        let mut ctx = FormContext::new(Cell::triangle());
        let v = ctx.argument(0, p1());
        let err = factorize(&ctx, v + 1.0).unwrap_err();
        assert!(matches!(err, CompileError::Factorization(_)));
    }

    #[test]
    fn test_repeated_slot_is_rejected() {
        let mut ctx = FormContext::new(Cell::triangle());
        let v = ctx.argument(0, p1());
        let err = factorize(&ctx, &v * &v).unwrap_err();
        assert!(err.to_string().contains("slot 0 twice"), "{err}");
    }

    #[test]
    fn test_missing_slot_is_rejected() {
        let mut ctx = FormContext::new(Cell::triangle());
        let v = ctx.argument(0, p1());
        let u = ctx.argument(1, p1());
        let err = factorize(&ctx, &u * &v + v).unwrap_err();
        assert!(matches!(err, CompileError::Factorization(_)));
    }

    #[test]
    fn test_rank_ceiling() {
        let mut ctx = FormContext::new(Cell::triangle());
        let a = ctx.argument(0, p1());
        let b = ctx.argument(1, p1());
        let c = ctx.argument(2, p1());
        let err = factorize(&ctx, a * b * c).unwrap_err();
        assert!(matches!(err, CompileError::Unsupported(_)));
    }

    #[test]
    fn test_functional_factor_is_target() {
        let mut ctx = FormContext::new(Cell::triangle());
        let f = ctx.coefficient(p1());
        let (scalar, af) = factorize(&ctx, &f * &f).unwrap();
        assert!(af.modified_arguments.is_empty());
        assert_eq!(af.factors.get(&Vec::new()), Some(&scalar.targets[0]));
    }
}
