//! Row-major component arithmetic for tensor shapes and free indices.
//!
//! A node with shape `S` and free indices with dimensions `D` has
//! `product(S) * product(D)` scalar components, enumerated row-major over
//! `S ++ D`.

use super::error::CompileError;
use super::expr::{Index, IndexItem};

/// Product of all dimensions (1 for a scalar shape)
pub fn product(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Row-major strides of a shape
pub fn strides(shape: &[usize]) -> Vec<usize> {
    let mut out = vec![1; shape.len()];
    for k in (0..shape.len().saturating_sub(1)).rev() {
        out[k] = out[k + 1] * shape[k + 1];
    }
    out
}

/// Flat component of a multi-index
pub fn flatten(multiindex: &[usize], shape: &[usize]) -> usize {
    multiindex
        .iter()
        .zip(strides(shape))
        .map(|(i, s)| i * s)
        .sum()
}

/// Multi-index of a flat component
pub fn unflatten(mut flat: usize, shape: &[usize]) -> Vec<usize> {
    let mut out = vec![0; shape.len()];
    for (k, s) in strides(shape).into_iter().enumerate() {
        if s > 0 {
            out[k] = flat / s;
            flat %= s;
        }
    }
    out
}

/// All multi-indices of a shape in row-major order
pub fn compute_indices(shape: &[usize]) -> Vec<Vec<usize>> {
    (0..product(shape)).map(|k| unflatten(k, shape)).collect()
}

/// The component space of one node: its shape followed by its free indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentSpace {
    pub shape: Vec<usize>,
    pub free: Vec<(Index, usize)>,
}

/// A component split into its shape part and free index assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub multiindex: Vec<usize>,
    pub assignment: Vec<(Index, usize)>,
}

impl Component {
    /// Value assigned to a free index
    pub fn value_of(&self, index: Index) -> Option<usize> {
        self.assignment
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, v)| *v)
    }
}

impl ComponentSpace {
    pub fn new(shape: &[usize], free: &[(Index, usize)]) -> Self {
        Self {
            shape: shape.to_vec(),
            free: free.to_vec(),
        }
    }

    fn full_shape(&self) -> Vec<usize> {
        self.shape
            .iter()
            .copied()
            .chain(self.free.iter().map(|(_, d)| *d))
            .collect()
    }

    pub fn size(&self) -> usize {
        product(&self.full_shape())
    }

    /// Split a flat component into multi-index and index assignment
    pub fn split(&self, flat: usize) -> Component {
        let full = unflatten(flat, &self.full_shape());
        let (shape_part, index_part) = full.split_at(self.shape.len());
        Component {
            multiindex: shape_part.to_vec(),
            assignment: self
                .free
                .iter()
                .zip(index_part)
                .map(|((i, _), v)| (*i, *v))
                .collect(),
        }
    }

    /// Flat component for a multi-index, reading free index values from `assignment`
    ///
    /// Returns `None` if a coordinate is out of range or an index has no value.
    pub fn join(&self, multiindex: &[usize], assignment: &Component) -> Option<usize> {
        if multiindex.len() != self.shape.len() {
            return None;
        }
        let mut full = multiindex.to_vec();
        for (index, _) in &self.free {
            full.push(assignment.value_of(*index)?);
        }
        let full_shape = self.full_shape();
        if full.iter().zip(&full_shape).any(|(v, d)| v >= d) {
            return None;
        }
        Some(flatten(&full, &full_shape))
    }
}

/// Reject maps that are not total or not one-to-one
fn check_injective(
    kind: &'static str,
    map: &[usize],
    target_size: usize,
) -> Result<(), CompileError> {
    let mut seen = vec![false; target_size];
    for &c in map {
        let Some(slot) = seen.get_mut(c) else {
            return Err(CompileError::symmetry(
                kind,
                format!("component {c} out of range {target_size}"),
            ));
        };
        if *slot {
            return Err(CompileError::symmetry(
                kind,
                format!("component {c} is reached twice"),
            ));
        }
        *slot = true;
    }
    Ok(())
}

/// For each component of `A[items]`, the component of `A` it reads
pub fn map_indexed_components(
    operand: &ComponentSpace,
    items: &[IndexItem],
    result: &ComponentSpace,
) -> Result<Vec<usize>, CompileError> {
    if items.len() != operand.shape.len() {
        return Err(CompileError::symmetry(
            "indexed",
            format!(
                "{} index items for an operand of rank {}",
                items.len(),
                operand.shape.len()
            ),
        ));
    }
    let mut map = Vec::with_capacity(result.size());
    for k in 0..result.size() {
        let component = result.split(k);
        let multiindex = items
            .iter()
            .map(|item| match item {
                IndexItem::Fixed(v) => Some(*v),
                IndexItem::Free(i) => component.value_of(*i),
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| CompileError::symmetry("indexed", "index item is not free"))?;
        let c = operand.join(&multiindex, &component).ok_or_else(|| {
            CompileError::symmetry(
                "indexed",
                format!("component {multiindex:?} outside shape {:?}", operand.shape),
            )
        })?;
        map.push(c);
    }
    // A[i, i] reads the diagonal; distinct components still map to distinct entries
    check_injective("indexed", &map, operand.size())?;
    Ok(map)
}

/// For each component of `as_tensor(A, indices)`, the component of `A` it reads
pub fn map_component_tensor_components(
    operand: &ComponentSpace,
    indices: &[Index],
    result: &ComponentSpace,
) -> Result<Vec<usize>, CompileError> {
    if !operand.shape.is_empty() {
        return Err(CompileError::symmetry(
            "component_tensor",
            "operand must have scalar shape",
        ));
    }
    for (pos, index) in indices.iter().enumerate() {
        if indices[..pos].contains(index) {
            return Err(CompileError::symmetry(
                "component_tensor",
                format!("index {} bound twice", index.0),
            ));
        }
        if !operand.free.iter().any(|(i, _)| i == index) {
            return Err(CompileError::symmetry(
                "component_tensor",
                format!("index {} is not free in the operand", index.0),
            ));
        }
    }
    let mut map = Vec::with_capacity(result.size());
    for k in 0..result.size() {
        let mut component = result.split(k);
        for (index, value) in indices.iter().zip(&component.multiindex) {
            component.assignment.push((*index, *value));
        }
        let c = operand.join(&[], &component).ok_or_else(|| {
            CompileError::symmetry("component_tensor", "index value out of range")
        })?;
        map.push(c);
    }
    check_injective("component_tensor", &map, operand.size())?;
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strides_and_flatten() {
        assert_eq!(strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(flatten(&[1, 2, 3], &[2, 3, 4]), 23);
        assert_eq!(unflatten(23, &[2, 3, 4]), vec![1, 2, 3]);
        assert_eq!(strides(&[]), Vec::<usize>::new());
        assert_eq!(flatten(&[], &[]), 0);
    }

    #[test]
    fn test_compute_indices_row_major() {
        assert_eq!(
            compute_indices(&[2, 2]),
            vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]
        );
        assert_eq!(compute_indices(&[]), vec![Vec::<usize>::new()]);
    }

    #[test]
    fn test_indexed_fixed_and_free() {
        let i = Index(0);
        let operand = ComponentSpace::new(&[2, 3], &[]);
        let result = ComponentSpace::new(&[], &[(i, 3)]);
        let map =
            map_indexed_components(&operand, &[IndexItem::Fixed(1), IndexItem::Free(i)], &result)
                .unwrap();
        assert_eq!(map, vec![3, 4, 5]);
    }

    #[test]
    fn test_indexed_out_of_range_is_rejected() {
        let operand = ComponentSpace::new(&[2], &[]);
        let result = ComponentSpace::new(&[], &[]);
        let err = map_indexed_components(&operand, &[IndexItem::Fixed(5)], &result).unwrap_err();
        assert!(matches!(err, CompileError::SymmetryMapping { kind: "indexed", .. }));
    }

    #[test]
    fn test_component_tensor_transposes() {
        let (i, j) = (Index(0), Index(1));
        let operand = ComponentSpace::new(&[], &[(i, 2), (j, 3)]);
        let result = ComponentSpace::new(&[3, 2], &[]);
        let map = map_component_tensor_components(&operand, &[j, i], &result).unwrap();
        // result[b, a] = operand[i = a, j = b]
        assert_eq!(map, vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn test_component_tensor_repeated_index_is_rejected() {
        let i = Index(0);
        let operand = ComponentSpace::new(&[], &[(i, 2)]);
        let result = ComponentSpace::new(&[2, 2], &[]);
        assert!(map_component_tensor_components(&operand, &[i, i], &result).is_err());
    }
}
