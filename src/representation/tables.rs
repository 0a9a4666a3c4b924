//! Basis function tables.
//!
//! Tables are supplied by the caller, one `[entity][point][dof]` array per
//! (element, component, derivative counts, entity type, point count).
//! Columns that are zero at every entity and point are stripped from both
//! ends, so each lookup yields the contiguous dof range the table actually
//! covers. Identical stripped tables share one name.

use std::collections::BTreeMap;

use crate::core::error::CompileError;
use crate::core::terminal::FiniteElement;
use crate::core::traits::approx_eq;

/// Kind of mesh entity a table is evaluated on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    Cell,
    Facet,
    Vertex,
}

impl EntityType {
    fn suffix(self) -> &'static str {
        match self {
            EntityType::Cell => "cell",
            EntityType::Facet => "facet",
            EntityType::Vertex => "vertex",
        }
    }
}

/// Basis values as `values[entity][point][dof]`
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub values: Vec<Vec<Vec<f64>>>,
}

impl Table {
    pub fn new(values: Vec<Vec<Vec<f64>>>) -> Self {
        Self { values }
    }

    /// Table with a single entity
    pub fn cell(values: Vec<Vec<f64>>) -> Self {
        Self {
            values: vec![values],
        }
    }

    pub fn num_entities(&self) -> usize {
        self.values.len()
    }

    pub fn num_points(&self) -> usize {
        self.values.first().map_or(0, Vec::len)
    }

    pub fn num_dofs(&self) -> usize {
        self.values
            .first()
            .and_then(|e| e.first())
            .map_or(0, Vec::len)
    }

    /// Every entity has the same number of points, every row the same
    /// number of dofs
    fn check_rectangular(&self) -> Result<(), CompileError> {
        let (num_points, num_dofs) = (self.num_points(), self.num_dofs());
        if let Some(e) = self.values.iter().position(|entity| entity.len() != num_points) {
            return Err(CompileError::invalid_input(format!(
                "table entity {e} has {} points, expected {num_points}",
                self.values[e].len()
            )));
        }
        let ragged = self.values.iter().enumerate().find_map(|(e, entity)| {
            entity
                .iter()
                .position(|row| row.len() != num_dofs)
                .map(|p| (e, p, entity[p].len()))
        });
        if let Some((e, p, len)) = ragged {
            return Err(CompileError::invalid_input(format!(
                "table row [{e}][{p}] has {len} dofs, expected {num_dofs}"
            )));
        }
        Ok(())
    }

    fn is_zero_column(&self, dof: usize) -> bool {
        self.values
            .iter()
            .flatten()
            .all(|row| approx_eq(row[dof], 0.0))
    }

    /// Columns `begin..end`
    fn columns(&self, begin: usize, end: usize) -> Self {
        Self {
            values: self
                .values
                .iter()
                .map(|entity| entity.iter().map(|row| row[begin..end].to_vec()).collect())
                .collect(),
        }
    }
}

/// A named table covering the element dofs `begin..end`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableRange {
    pub name: String,
    pub begin: usize,
    pub end: usize,
}

impl TableRange {
    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.begin
    }
}

/// Source of basis tables for the compiler
pub trait TableProvider {
    /// Range of the table for one scalar component of an element, if any
    fn table_range(
        &self,
        element: &FiniteElement,
        flat_component: usize,
        derivative_counts: &[usize],
        entity: EntityType,
        num_points: usize,
    ) -> Option<TableRange>;

    /// Stripped values of a table returned by [`TableProvider::table_range`]
    fn unique_table(&self, name: &str) -> Option<&Table>;
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct TableKey {
    element: String,
    flat_component: usize,
    derivative_counts: Vec<usize>,
    entity: EntityType,
    num_points: usize,
}

/// In-memory [`TableProvider`].
///
/// # Example
/// ```
/// use formgen::{Cell, ElementTables, EntityType, FiniteElement, Table, TableProvider};
///
/// let element = FiniteElement::discontinuous_lagrange(Cell::triangle(), 0);
/// let mut tables = ElementTables::new();
/// tables.insert(&element, 0, &[0, 0], EntityType::Cell, Table::cell(vec![vec![1.0]]))?;
/// let range = tables.table_range(&element, 0, &[0, 0], EntityType::Cell, 1).unwrap();
/// assert_eq!((range.begin, range.end), (0, 1));
/// # Ok::<(), formgen::CompileError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct ElementTables {
    elements: Vec<String>,
    ranges: BTreeMap<TableKey, TableRange>,
    unique: BTreeMap<String, Table>,
}

impl ElementTables {
    pub fn new() -> Self {
        Self::default()
    }

    fn element_number(&mut self, label: String) -> usize {
        if let Some(n) = self.elements.iter().position(|e| *e == label) {
            return n;
        }
        self.elements.push(label);
        self.elements.len() - 1
    }

    /// Register a table; derivative counts are per reference direction
    ///
    /// # Errors
    /// `InvalidInput` if the table is ragged.
    pub fn insert(
        &mut self,
        element: &FiniteElement,
        flat_component: usize,
        derivative_counts: &[usize],
        entity: EntityType,
        table: Table,
    ) -> Result<TableRange, CompileError> {
        table.check_rectangular()?;
        let number = self.element_number(element.label());
        let num_points = table.num_points();
        let num_dofs = table.num_dofs();

        let begin = (0..num_dofs)
            .find(|&d| !table.is_zero_column(d))
            .unwrap_or(0);
        let end = (begin..num_dofs)
            .rev()
            .find(|&d| !table.is_zero_column(d))
            .map_or(begin, |d| d + 1);
        let stripped = table.columns(begin, end);

        let name = match self.unique.iter().find(|(_, t)| **t == stripped) {
            Some((name, _)) => name.clone(),
            None => {
                let derivs: String = derivative_counts.iter().map(ToString::to_string).collect();
                let base = format!(
                    "FE{number}_C{flat_component}_D{derivs}_Q{num_points}_{}",
                    entity.suffix()
                );
                let mut name = base.clone();
                // Same key registered again with other values
                for k in 1.. {
                    if !self.unique.contains_key(&name) {
                        break;
                    }
                    name = format!("{base}_{k}");
                }
                self.unique.insert(name.clone(), stripped);
                name
            }
        };

        let range = TableRange { name, begin, end };
        let key = TableKey {
            element: element.label(),
            flat_component,
            derivative_counts: derivative_counts.to_vec(),
            entity,
            num_points,
        };
        self.ranges.insert(key, range.clone());
        Ok(range)
    }
}

impl TableProvider for ElementTables {
    fn table_range(
        &self,
        element: &FiniteElement,
        flat_component: usize,
        derivative_counts: &[usize],
        entity: EntityType,
        num_points: usize,
    ) -> Option<TableRange> {
        let key = TableKey {
            element: element.label(),
            flat_component,
            derivative_counts: derivative_counts.to_vec(),
            entity,
            num_points,
        };
        self.ranges.get(&key).cloned()
    }

    fn unique_table(&self, name: &str) -> Option<&Table> {
        self.unique.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::terminal::Cell;

    fn p1() -> FiniteElement {
        FiniteElement::lagrange(Cell::triangle(), 1)
    }

    #[test]
    fn test_zero_columns_are_stripped() {
        let mut tables = ElementTables::new();
        let range = tables
            .insert(&p1(), 0, &[1, 0], EntityType::Cell, Table::cell(vec![vec![-1.0, 1.0, 0.0]]))
            .unwrap();
        assert_eq!((range.begin, range.end), (0, 2));
        let table = tables.unique_table(&range.name).unwrap();
        assert_eq!(table.values, vec![vec![vec![-1.0, 1.0]]]);
    }

    #[test]
    fn test_all_zero_table_is_empty() {
        let mut tables = ElementTables::new();
        let range = tables
            .insert(&p1(), 0, &[2, 0], EntityType::Cell, Table::cell(vec![vec![0.0, 0.0, 0.0]]))
            .unwrap();
        assert!(range.is_empty());
    }

    #[test]
    fn test_identical_tables_share_a_name() {
        let mut tables = ElementTables::new();
        let p2 = FiniteElement::lagrange(Cell::triangle(), 2);
        let one = || Table::cell(vec![vec![1.0]]);
        let a = tables.insert(&p1(), 0, &[0, 0], EntityType::Cell, one()).unwrap();
        let b = tables.insert(&p2, 0, &[0, 0], EntityType::Cell, one()).unwrap();
        assert_eq!(a.name, b.name);
        assert_eq!(a.name, "FE0_C0_D00_Q1_cell");
    }

    #[test]
    fn test_lookup_is_keyed_by_point_count() {
        let mut tables = ElementTables::new();
        let table = Table::cell(vec![vec![0.5, 0.5, 0.0]]);
        tables.insert(&p1(), 0, &[0, 0], EntityType::Cell, table).unwrap();
        assert!(tables.table_range(&p1(), 0, &[0, 0], EntityType::Cell, 1).is_some());
        assert!(tables.table_range(&p1(), 0, &[0, 0], EntityType::Cell, 3).is_none());
        assert!(tables.table_range(&p1(), 0, &[0, 0], EntityType::Facet, 1).is_none());
    }

    #[test]
    fn test_cell_and_facet_tables_get_distinct_names() {
        let mut tables = ElementTables::new();
        let third = 1.0 / 3.0;
        let cell = Table::cell(vec![vec![third; 3]]);
        let facet = Table::new(vec![
            vec![vec![0.0, 0.5, 0.5]],
            vec![vec![0.5, 0.0, 0.5]],
            vec![vec![0.5, 0.5, 0.0]],
        ]);
        let c = tables.insert(&p1(), 0, &[0, 0], EntityType::Cell, cell).unwrap();
        let f = tables.insert(&p1(), 0, &[0, 0], EntityType::Facet, facet).unwrap();
        assert_eq!(c.name, "FE0_C0_D00_Q1_cell");
        assert_eq!(f.name, "FE0_C0_D00_Q1_facet");
        assert_eq!(tables.unique_table(&c.name).unwrap().num_entities(), 1);
        assert_eq!(tables.unique_table(&f.name).unwrap().num_entities(), 3);
    }

    #[test]
    fn test_reinserted_key_with_new_values_is_renamed() {
        let mut tables = ElementTables::new();
        let a = Table::cell(vec![vec![1.0, 2.0, 3.0]]);
        let b = Table::cell(vec![vec![3.0, 2.0, 1.0]]);
        let first = tables.insert(&p1(), 0, &[0, 0], EntityType::Cell, a.clone()).unwrap();
        let second = tables.insert(&p1(), 0, &[0, 0], EntityType::Cell, b.clone()).unwrap();
        assert_eq!(first.name, "FE0_C0_D00_Q1_cell");
        assert_eq!(second.name, "FE0_C0_D00_Q1_cell_1");
        assert_eq!(tables.unique_table(&first.name), Some(&a));
        assert_eq!(tables.unique_table(&second.name), Some(&b));
        let looked_up = tables.table_range(&p1(), 0, &[0, 0], EntityType::Cell, 1).unwrap();
        assert_eq!(looked_up, second);
    }

    #[test]
    fn test_ragged_rows_are_rejected() {
        let mut tables = ElementTables::new();
        let ragged = Table::cell(vec![vec![1.0, 2.0, 3.0], vec![1.0]]);
        let err = tables.insert(&p1(), 0, &[0, 0], EntityType::Cell, ragged).unwrap_err();
        assert!(matches!(err, CompileError::InvalidInput(_)));
        assert!(tables.table_range(&p1(), 0, &[0, 0], EntityType::Cell, 2).is_none());
    }

    #[test]
    fn test_entities_with_different_point_counts_are_rejected() {
        let mut tables = ElementTables::new();
        let table = Table::new(vec![vec![vec![0.5, 0.5, 0.0]], vec![]]);
        let err = tables.insert(&p1(), 0, &[0, 0], EntityType::Facet, table).unwrap_err();
        assert!(matches!(err, CompileError::InvalidInput(_)));
    }
}
