//! Visitor dispatch over the closed set of expression variants.
//!
//! A pass implements [`ExprVisitor`], which has one required method per
//! variant and no defaults: forgetting a variant is a compile error.
//! [`Ast::accept`] looks at the node's variant and calls the matching
//! method with the concrete payload.

use crate::ast::{
    ArrayLiteral, ArraySubscript, Ast, BinaryOperator, BooleanLiteral, Call, ExprId, ExprKind,
    Identifier, IntegerLiteral, StringLiteral, UnaryOperator,
};

pub trait ExprVisitor {
    type Output;

    fn visit_integer_literal(
        &mut self,
        ast: &Ast,
        id: ExprId,
        node: &IntegerLiteral,
    ) -> Self::Output;

    fn visit_boolean_literal(
        &mut self,
        ast: &Ast,
        id: ExprId,
        node: &BooleanLiteral,
    ) -> Self::Output;

    fn visit_string_literal(&mut self, ast: &Ast, id: ExprId, node: &StringLiteral)
    -> Self::Output;

    fn visit_array_literal(&mut self, ast: &Ast, id: ExprId, node: &ArrayLiteral) -> Self::Output;

    fn visit_identifier(&mut self, ast: &Ast, id: ExprId, node: &Identifier) -> Self::Output;

    fn visit_call(&mut self, ast: &Ast, id: ExprId, node: &Call) -> Self::Output;

    fn visit_unary_operator(
        &mut self,
        ast: &Ast,
        id: ExprId,
        node: &UnaryOperator,
    ) -> Self::Output;

    fn visit_binary_operator(
        &mut self,
        ast: &Ast,
        id: ExprId,
        node: &BinaryOperator,
    ) -> Self::Output;

    fn visit_array_subscript(
        &mut self,
        ast: &Ast,
        id: ExprId,
        node: &ArraySubscript,
    ) -> Self::Output;
}

impl Ast {
    /// Dispatch `id` to the visitor method for its variant.
    pub fn accept<V: ExprVisitor + ?Sized>(&self, id: ExprId, visitor: &mut V) -> V::Output {
        match self.kind(id) {
            ExprKind::IntegerLiteral(node) => visitor.visit_integer_literal(self, id, node),
            ExprKind::BooleanLiteral(node) => visitor.visit_boolean_literal(self, id, node),
            ExprKind::StringLiteral(node) => visitor.visit_string_literal(self, id, node),
            ExprKind::ArrayLiteral(node) => visitor.visit_array_literal(self, id, node),
            ExprKind::Identifier(node) => visitor.visit_identifier(self, id, node),
            ExprKind::Call(node) => visitor.visit_call(self, id, node),
            ExprKind::UnaryOperator(node) => visitor.visit_unary_operator(self, id, node),
            ExprKind::BinaryOperator(node) => visitor.visit_binary_operator(self, id, node),
            ExprKind::ArraySubscript(node) => visitor.visit_array_subscript(self, id, node),
        }
    }
}

/// Visit the direct children of `id` in source order, collecting outputs.
pub fn walk_children<V: ExprVisitor + ?Sized>(
    ast: &Ast,
    id: ExprId,
    visitor: &mut V,
) -> Vec<V::Output> {
    ast.children(id)
        .into_iter()
        .map(|child| ast.accept(child, visitor))
        .collect()
}
