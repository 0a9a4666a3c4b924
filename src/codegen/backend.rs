//! Pluggable backend interface of the code generator.
//!
//! The generator decides what to compute and in which loop; a backend only
//! decides how it is spelled. Swapping the backend changes surface syntax,
//! never the generated algorithm.

use super::ast::{Node, Stmt};
use super::c::{CAccess, CDefinitions, CLanguage};
use crate::core::error::CompileError;
use crate::core::modified::ModifiedTerminal;
use crate::core::terminal::FormContext;
use crate::representation::IntegralType;
use crate::representation::tables::TableRange;

/// What a resolver needs to know about the code being generated
#[derive(Debug, Clone, Copy)]
pub struct TerminalContext<'a> {
    pub form: &'a FormContext,
    pub integral_type: IntegralType,
    /// Point count of the current group; 0 outside any group
    pub num_points: usize,
}

/// Setup statements that define one name
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub name: String,
    pub statements: Vec<Stmt>,
}

impl Definition {
    pub fn new(name: impl Into<String>, statements: Vec<Stmt>) -> Self {
        Self {
            name: name.into(),
            statements,
        }
    }
}

/// Serialization of the statement tree
pub trait Language {
    fn format_node(&self, node: &Node) -> String;

    /// Format statements, one per line, at the given indentation depth
    fn format_statements(&self, statements: &[Stmt], depth: usize) -> String;

    /// Format the complete entry point; `Using` statements are hoisted
    fn format_function(&self, name: &str, integral_type: IntegralType, body: &[Stmt]) -> String;
}

/// Read expressions and generated names
pub trait AccessResolver {
    /// Value of an active modified terminal that is not an argument
    fn modified_terminal(
        &self,
        cx: &TerminalContext<'_>,
        mt: &ModifiedTerminal,
        range: Option<&TableRange>,
    ) -> Result<Node, CompileError>;

    /// Basis table entry of a form argument at a point and a table column
    fn table(
        &self,
        cx: &TerminalContext<'_>,
        mt: &ModifiedTerminal,
        range: &TableRange,
        point: Node,
        column: Node,
    ) -> Node;

    /// Output tensor entry at a flat index
    fn output(&self, flat: Node) -> Node;

    fn output_name(&self) -> &'static str;
    fn weights_name(&self, num_points: usize) -> String;
    fn points_name(&self, num_points: usize) -> String;
    fn point_index(&self) -> &'static str;
    fn dof_index(&self, level: usize) -> String;
    fn weight_name(&self) -> &'static str;
    fn scratch_name(&self, varying: bool, num_points: usize) -> String;
}

/// Setup statements required by terminal accesses
pub trait DefinitionsResolver {
    /// Definitions a modified terminal's access needs, in dependency order.
    ///
    /// `varying` tells whether the definition is emitted inside the point loop.
    fn modified_terminal(
        &self,
        cx: &TerminalContext<'_>,
        mt: &ModifiedTerminal,
        range: Option<&TableRange>,
        varying: bool,
    ) -> Result<Vec<Definition>, CompileError>;

    /// Scale factor of the integration measure and the definitions it needs
    fn scale_factor(
        &self,
        cx: &TerminalContext<'_>,
    ) -> Result<(Vec<Definition>, Option<Node>), CompileError>;

    fn using_declarations(&self) -> Vec<Stmt>;
}

/// A complete backend
pub struct Backend {
    pub language: Box<dyn Language + Send + Sync>,
    pub access: Box<dyn AccessResolver + Send + Sync>,
    pub definitions: Box<dyn DefinitionsResolver + Send + Sync>,
}

impl Backend {
    /// The C backend; `float_precision` is the number of decimals, `None`
    /// for the shortest round-trip representation
    pub fn c(float_precision: Option<usize>) -> Self {
        Self {
            language: Box::new(CLanguage::new(float_precision)),
            access: Box::new(CAccess),
            definitions: Box::new(CDefinitions),
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Self::c(None)
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").finish_non_exhaustive()
    }
}
