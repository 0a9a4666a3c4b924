//! Language neutral statement tree produced by the code generator.

use crate::core::expr::{ComparisonOp, MathFunction};

/// Expression node
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    LiteralFloat(f64),
    LiteralInt(i64),
    Symbol(String),
    /// `array[i][j]...`
    ArrayAccess(Box<Node>, Vec<Node>),
    Sum(Box<Node>, Box<Node>),
    Sub(Box<Node>, Box<Node>),
    Product(Box<Node>, Box<Node>),
    Division(Box<Node>, Box<Node>),
    Power(Box<Node>, Box<Node>),
    MathFunction(MathFunction, Box<Node>),
    Comparison(ComparisonOp, Box<Node>, Box<Node>),
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Conditional(Box<Node>, Box<Node>, Box<Node>),
    /// Value returning call, e.g. a geometry helper
    Call(String, Vec<Node>),
}

impl Node {
    pub fn symbol(name: impl Into<String>) -> Self {
        Self::Symbol(name.into())
    }

    pub fn int(value: usize) -> Self {
        Self::LiteralInt(value as i64)
    }

    /// `self[indices...]`
    #[must_use]
    pub fn at(self, indices: Vec<Node>) -> Self {
        Self::ArrayAccess(Box::new(self), indices)
    }

    /// `self + offset`, folding a zero offset
    #[must_use]
    pub fn offset(self, offset: usize) -> Self {
        match (self, offset) {
            (node, 0) => node,
            (Self::LiteralInt(v), o) => Self::LiteralInt(v + o as i64),
            (node, o) => Self::Sum(Box::new(node), Box::new(Self::int(o))),
        }
    }

    /// `self - offset`, folding a zero offset
    #[must_use]
    pub fn minus_offset(self, offset: usize) -> Self {
        match offset {
            0 => self,
            o => Self::Sub(Box::new(self), Box::new(Self::int(o))),
        }
    }

    /// Left-folded product of `factors`; `None` when empty
    pub fn product(factors: impl IntoIterator<Item = Node>) -> Option<Self> {
        factors
            .into_iter()
            .reduce(|acc, f| Self::Product(Box::new(acc), Box::new(f)))
    }

    pub fn is_literal_one(&self) -> bool {
        matches!(self, Self::LiteralFloat(v) if *v == 1.0)
    }
}

/// Statement node
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Comment(String),
    /// Include or using declaration, hoisted out of the function body
    Using(String),
    /// Array declaration; `values` is row-major over `sizes` when present
    ArrayDecl {
        typename: &'static str,
        name: String,
        sizes: Vec<usize>,
        values: Option<Vec<f64>>,
        is_static: bool,
    },
    VariableDecl {
        typename: &'static str,
        name: String,
        value: Option<Node>,
        is_const: bool,
    },
    Assign(Node, Node),
    AssignAdd(Node, Node),
    /// Call of a statement-like function, e.g. a geometry helper
    Call(String, Vec<Node>),
    ForRange {
        index: String,
        begin: Node,
        end: Node,
        body: Vec<Stmt>,
    },
    Scope(Vec<Stmt>),
    /// Set the first `size` entries of an array to zero
    Zero { name: String, size: usize },
}

impl Stmt {
    pub fn comment(text: impl Into<String>) -> Self {
        Self::Comment(text.into())
    }

    /// `const double name = value;`
    pub fn const_double(name: impl Into<String>, value: Node) -> Self {
        Self::VariableDecl {
            typename: "double",
            name: name.into(),
            value: Some(value),
            is_const: true,
        }
    }

    pub fn double(name: impl Into<String>, value: Option<Node>) -> Self {
        Self::VariableDecl {
            typename: "double",
            name: name.into(),
            value,
            is_const: false,
        }
    }

    /// Uninitialized `double name[size...]`
    pub fn double_array(name: impl Into<String>, sizes: Vec<usize>) -> Self {
        Self::ArrayDecl {
            typename: "double",
            name: name.into(),
            sizes,
            values: None,
            is_static: false,
        }
    }

    /// `static const double name[..] = {...}`
    pub fn static_table(name: impl Into<String>, sizes: Vec<usize>, values: Vec<f64>) -> Self {
        Self::ArrayDecl {
            typename: "double",
            name: name.into(),
            sizes,
            values: Some(values),
            is_static: true,
        }
    }

    pub fn for_range(index: impl Into<String>, begin: Node, end: Node, body: Vec<Stmt>) -> Self {
        Self::ForRange {
            index: index.into(),
            begin,
            end,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_folds_literals() {
        assert_eq!(Node::int(2).offset(3), Node::LiteralInt(5));
        assert_eq!(Node::symbol("i0").offset(0), Node::symbol("i0"));
        assert!(matches!(Node::symbol("i0").offset(1), Node::Sum(..)));
    }

    #[test]
    fn test_product_of_empty_list() {
        assert_eq!(Node::product(Vec::new()), None);
        let p = Node::product(vec![Node::symbol("a"), Node::symbol("b")]).unwrap();
        assert!(matches!(p, Node::Product(..)));
    }
}
