//! Render expressions back to source-like text.
//!
//! Binary and unary operators are fully parenthesized, so the output
//! does not depend on precedence rules.

use crate::ast::{
    ArrayLiteral, ArraySubscript, Ast, BinaryOperator, BooleanLiteral, Call, ExprId, Identifier,
    IntegerLiteral, StringLiteral, UnaryOperator,
};
use crate::visitor::ExprVisitor;

pub fn render(ast: &Ast, root: ExprId) -> String {
    ast.accept(root, &mut Printer)
}

pub struct Printer;

impl Printer {
    fn list(&mut self, ast: &Ast, items: &[ExprId]) -> String {
        items
            .iter()
            .map(|&item| ast.accept(item, self))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl ExprVisitor for Printer {
    type Output = String;

    fn visit_integer_literal(&mut self, _: &Ast, _: ExprId, node: &IntegerLiteral) -> String {
        node.literal.to_string()
    }

    fn visit_boolean_literal(&mut self, _: &Ast, _: ExprId, node: &BooleanLiteral) -> String {
        node.literal.to_string()
    }

    fn visit_string_literal(&mut self, _: &Ast, _: ExprId, node: &StringLiteral) -> String {
        format!("{:?}", node.literal)
    }

    fn visit_array_literal(&mut self, ast: &Ast, _: ExprId, node: &ArrayLiteral) -> String {
        format!("[{}]", self.list(ast, &node.elements))
    }

    fn visit_identifier(&mut self, _: &Ast, _: ExprId, node: &Identifier) -> String {
        node.name.clone()
    }

    fn visit_call(&mut self, ast: &Ast, _: ExprId, node: &Call) -> String {
        format!("{}({})", node.callee_name, self.list(ast, &node.args))
    }

    fn visit_unary_operator(&mut self, ast: &Ast, _: ExprId, node: &UnaryOperator) -> String {
        format!("({}{})", node.op.symbol(), ast.accept(node.sub_expr, self))
    }

    fn visit_binary_operator(&mut self, ast: &Ast, _: ExprId, node: &BinaryOperator) -> String {
        let lhs = ast.accept(node.lhs, self);
        let rhs = ast.accept(node.rhs, self);
        format!("({lhs} {} {rhs})", node.op.symbol())
    }

    fn visit_array_subscript(&mut self, ast: &Ast, _: ExprId, node: &ArraySubscript) -> String {
        let mut out = ast.accept(node.base_expr, self);
        for &index in &node.index_exprs {
            out.push('[');
            out.push_str(&ast.accept(index, self));
            out.push(']');
        }
        out
    }
}
