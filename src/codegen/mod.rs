//! Code generation
//!
//! - `ast` - Language neutral statement tree
//! - `precedence` - Static operator precedence table
//! - `backend` - Language, access and definitions interfaces
//! - `c` - Default C backend
//! - `partition` - Piecewise/varying scheduling and dof blocks
//! - `generator` - Statement tree of a whole integral

pub mod ast;
pub mod backend;
pub mod c;
pub mod generator;
pub mod partition;
pub mod precedence;

pub use ast::{Node, Stmt};
pub use backend::{
    AccessResolver, Backend, Definition, DefinitionsResolver, Language, TerminalContext,
};
pub use generator::generate_integral;
pub use partition::{DofBlocks, DofRange, PartitionPlan, Slot, plan_dofblocks, plan_partitions};
