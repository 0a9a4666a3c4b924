//! Operator precedence of expression nodes (higher binds tighter).
//!
//! This is the only static table shared between compiles; it is read-only.

use super::ast::Node;
use crate::core::expr::ComparisonOp;

pub const CONDITIONAL: u8 = 1;
pub const OR: u8 = 2;
pub const AND: u8 = 3;
pub const EQUALITY: u8 = 4;
pub const RELATIONAL: u8 = 5;
pub const SUM: u8 = 6;
pub const PRODUCT: u8 = 7;
pub const UNARY: u8 = 8;
pub const POSTFIX: u8 = 9;
pub const ATOM: u8 = 10;

pub fn precedence(node: &Node) -> u8 {
    match node {
        Node::Conditional(..) => CONDITIONAL,
        Node::Or(..) => OR,
        Node::And(..) => AND,
        Node::Comparison(ComparisonOp::Eq | ComparisonOp::Ne, ..) => EQUALITY,
        Node::Comparison(..) => RELATIONAL,
        Node::Sum(..) | Node::Sub(..) => SUM,
        Node::Product(..) | Node::Division(..) => PRODUCT,
        Node::Not(_) => UNARY,
        Node::LiteralFloat(v) if *v < 0.0 => UNARY,
        Node::LiteralInt(v) if *v < 0 => UNARY,
        Node::ArrayAccess(..) | Node::Power(..) | Node::MathFunction(..) | Node::Call(..) => {
            POSTFIX
        }
        Node::LiteralFloat(_) | Node::LiteralInt(_) | Node::Symbol(_) => ATOM,
    }
}
