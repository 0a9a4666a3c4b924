//! Error types for integrand compilation.
//!
//! Every failure is scoped to the integral being compiled: a failed compile
//! produces no partial output, and other integrals in the same batch are
//! unaffected.

use thiserror::Error;

/// Errors that can occur while compiling an integrand
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// A node kind that the graph builder cannot place in the vertex array
    #[error("unsupported node kind '{kind}': {reason}")]
    Graph { kind: &'static str, reason: String },

    /// Argument factorization hit a form that is not multilinear, or an
    /// ambiguous factor binding
    #[error("argument factorization failed: {0}")]
    Factorization(String),

    /// An index-to-component map derived during value numbering is not
    /// total and one-to-one
    #[error("component mapping for '{kind}' is not a bijection: {reason}")]
    SymmetryMapping { kind: &'static str, reason: String },

    /// A feature outside the supported bounds (derivative order, rank,
    /// multiple quadrature rules, ...)
    #[error("unsupported feature: {0}")]
    Unsupported(String),

    /// The table provider has no basis table for a modified terminal
    #[error("no basis table for {0}")]
    MissingTable(String),

    /// Malformed compiler input
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl CompileError {
    /// Create a graph error for the given node kind
    pub fn graph(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::Graph {
            kind,
            reason: reason.into(),
        }
    }

    /// Create a symmetry mapping error for the given node kind
    pub fn symmetry(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::SymmetryMapping {
            kind,
            reason: reason.into(),
        }
    }

    /// Create a factorization error
    pub fn factorization(msg: impl Into<String>) -> Self {
        Self::Factorization(msg.into())
    }

    /// Create an unsupported-feature error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create an invalid-input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_error_names_kind() {
        let err = CompileError::graph("derivative", "operand is not a terminal");
        let msg = err.to_string();
        assert!(msg.contains("'derivative'"), "got: {msg}");
        assert!(msg.contains("operand is not a terminal"));
    }

    #[test]
    fn test_unsupported_message() {
        let err = CompileError::unsupported("rank 3 exceeds the factorization ceiling 2");
        assert_eq!(
            err.to_string(),
            "unsupported feature: rank 3 exceeds the factorization ceiling 2"
        );
    }
}
