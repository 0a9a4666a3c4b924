//! Scheduling of computed vertices and dof blocks.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::terminal::FormContext;
use crate::representation::{ExprIr, dof_offset};

/// Scratch slot of a computed vertex
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub varying: bool,
    pub index: usize,
}

/// Computed vertices of one point group, split into the piecewise block
/// (before the point loop) and the varying block (inside it)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionPlan {
    pub piecewise: Vec<usize>,
    pub varying: Vec<usize>,
    slots: Vec<Option<Slot>>,
}

impl PartitionPlan {
    pub fn slot(&self, vertex: usize) -> Option<Slot> {
        self.slots.get(vertex).copied().flatten()
    }
}

/// Assign every active computed vertex a slot, in vertex order.
///
/// Literals and modified terminals are read directly and get no slot.
pub fn plan_partitions(expr_ir: &ExprIr) -> PartitionPlan {
    let mut plan = PartitionPlan {
        slots: vec![None; expr_ir.vertices.len()],
        ..PartitionPlan::default()
    };
    let class = &expr_ir.classification;
    for (v, op) in expr_ir.vertices.iter().enumerate() {
        if !class.active[v] || op.is_terminal() {
            continue;
        }
        let varying = class.varying[v];
        let block = if varying {
            &mut plan.varying
        } else {
            &mut plan.piecewise
        };
        plan.slots[v] = Some(Slot {
            varying,
            index: block.len(),
        });
        block.push(v);
    }
    plan
}

/// Contiguous interval of output tensor dofs for one argument slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DofRange {
    pub begin: usize,
    pub end: usize,
}

impl DofRange {
    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }
}

/// Factorization terms grouped by the dof block they write to.
///
/// Each key holds one range per argument slot; each term is the
/// modified-argument tuple and its factor vertex. Terms with an empty range
/// in any slot contribute nothing and are dropped.
pub type DofBlocks = BTreeMap<Vec<DofRange>, Vec<(Vec<usize>, usize)>>;

pub fn plan_dofblocks(ctx: &FormContext, expr_ir: &ExprIr) -> DofBlocks {
    let af = &expr_ir.argument_factorization;
    let mut blocks = DofBlocks::new();
    for (tuple, &factor) in &af.factors {
        let block: Vec<DofRange> = tuple
            .iter()
            .map(|&ma| {
                let range = &expr_ir.modified_argument_table_ranges[ma];
                let offset = dof_offset(ctx, &af.modified_arguments[ma].terminal);
                DofRange {
                    begin: range.begin + offset,
                    end: range.end + offset,
                }
            })
            .collect();
        if block.iter().any(DofRange::is_empty) {
            continue;
        }
        blocks.entry(block).or_default().push((tuple.clone(), factor));
    }
    blocks
}

/// Distinct ranges at nesting `level` among the blocks starting with `prefix`
pub fn ranges_at_level(blocks: &DofBlocks, prefix: &[DofRange]) -> Vec<DofRange> {
    let level = prefix.len();
    let ranges: BTreeSet<DofRange> = blocks
        .keys()
        .filter(|block| block.starts_with(prefix) && block.len() > level)
        .map(|block| block[level])
        .collect();
    ranges.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(begin: usize, end: usize) -> DofRange {
        DofRange { begin, end }
    }

    #[test]
    fn test_ranges_at_level_are_distinct_and_sorted() {
        let mut blocks = DofBlocks::new();
        for key in [
            vec![range(0, 3), range(0, 2)],
            vec![range(0, 2), range(0, 3)],
            vec![range(0, 3), range(1, 3)],
            vec![range(0, 2), range(0, 2)],
        ] {
            blocks.insert(key, Vec::new());
        }
        assert_eq!(ranges_at_level(&blocks, &[]), vec![range(0, 2), range(0, 3)]);
        assert_eq!(
            ranges_at_level(&blocks, &[range(0, 3)]),
            vec![range(0, 2), range(1, 3)]
        );
        assert!(ranges_at_level(&blocks, &[range(0, 3), range(0, 2)]).is_empty());
    }
}
