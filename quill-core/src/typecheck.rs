//! Type inference for Quill expressions.
//!
//! [`TypeChecker`] is an [`ExprVisitor`] that computes the type of every
//! node bottom-up and records it in the tree. Literals already carry
//! their type; everything else starts as `unknown` and is written
//! exactly once here. The first error stops the pass.

use crate::ast::{
    ArrayLiteral, ArraySubscript, Ast, BinaryOp, BinaryOperator, BooleanLiteral, Call, ExprId,
    ExprKind, Identifier, IntegerLiteral, StringLiteral, UnaryOp, UnaryOperator,
};
use crate::builtins::resolve_builtin;
use crate::error::CoreError;
use crate::types::Type;
use crate::visitor::ExprVisitor;

/// Parameter and result types of a user function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    pub params: Vec<Type>,
    pub result: Type,
}

/// Names visible to an expression: variables and user functions.
///
/// Later entries shadow earlier ones with the same name.
#[derive(Debug, Clone, Default)]
pub struct TypeEnv {
    variables: Vec<(String, Type)>,
    functions: Vec<(String, FunctionSignature)>,
}

impl TypeEnv {
    pub fn new() -> Self {
        TypeEnv::default()
    }

    pub fn declare_variable(&mut self, name: impl Into<String>, ty: Type) {
        self.variables.push((name.into(), ty));
    }

    pub fn declare_function(&mut self, name: impl Into<String>, signature: FunctionSignature) {
        self.functions.push((name.into(), signature));
    }

    pub fn lookup_variable(&self, name: &str) -> Option<Type> {
        self.variables
            .iter()
            .rev()
            .find_map(|(n, ty)| (n == name).then_some(*ty))
    }

    pub fn lookup_function(&self, name: &str) -> Option<&FunctionSignature> {
        self.functions
            .iter()
            .rev()
            .find_map(|(n, signature)| (n == name).then_some(signature))
    }

    /// Visible variables in declaration order, shadowed ones excluded.
    pub fn variables(&self) -> Vec<(&str, Type)> {
        let mut visible: Vec<(&str, Type)> = Vec::new();
        for (name, ty) in &self.variables {
            match visible
                .iter()
                .position(|(existing, _)| *existing == name.as_str())
            {
                Some(position) => visible[position].1 = *ty,
                None => visible.push((name.as_str(), *ty)),
            }
        }
        visible
    }

    /// Visible user functions in declaration order.
    pub fn functions(&self) -> Vec<(&str, &FunctionSignature)> {
        let mut visible: Vec<(&str, &FunctionSignature)> = Vec::new();
        for (name, signature) in &self.functions {
            match visible
                .iter()
                .position(|(existing, _)| *existing == name.as_str())
            {
                Some(position) => visible[position].1 = signature,
                None => visible.push((name.as_str(), signature)),
            }
        }
        visible
    }
}

/// Infer and record the types of every node under `root`.
pub fn infer_types(ast: &Ast, root: ExprId, env: &TypeEnv) -> Result<Type, CoreError> {
    ast.accept(root, &mut TypeChecker::new(env))
}

pub struct TypeChecker<'env> {
    env: &'env TypeEnv,
}

impl<'env> TypeChecker<'env> {
    pub fn new(env: &'env TypeEnv) -> Self {
        TypeChecker { env }
    }

    fn record(&self, ast: &Ast, id: ExprId, ty: Type) -> Result<Type, CoreError> {
        ast.set_ty(id, ty);
        Ok(ty)
    }
}

/// Give `ty` to an array literal that inference left `unknown`, and to
/// the equally unresolved literals nested in it.
fn refine_empty_literal(ast: &Ast, id: ExprId, ty: Type) -> Result<(), CoreError> {
    let mismatch = || CoreError::TypeMismatch {
        context: "array literal element".to_string(),
        expected: ty.to_string(),
        found: ast.ty(id),
    };
    let ExprKind::ArrayLiteral(literal) = ast.kind(id) else {
        return Err(mismatch());
    };
    if !ty.is_array() {
        return Err(mismatch());
    }
    let element = ty.subscripted(1).ok_or_else(mismatch)?;
    for &child in &literal.elements {
        if ast.ty(child).is_unknown() {
            refine_empty_literal(ast, child, element)?;
        }
    }
    ast.set_ty(id, ty);
    Ok(())
}

fn expect_type(found: Type, expected: Type, context: &str) -> Result<(), CoreError> {
    if found == expected {
        Ok(())
    } else {
        Err(CoreError::TypeMismatch {
            context: context.to_string(),
            expected: expected.to_string(),
            found,
        })
    }
}

impl ExprVisitor for TypeChecker<'_> {
    type Output = Result<Type, CoreError>;

    fn visit_integer_literal(&mut self, ast: &Ast, id: ExprId, _: &IntegerLiteral) -> Self::Output {
        Ok(ast.ty(id))
    }

    fn visit_boolean_literal(&mut self, ast: &Ast, id: ExprId, _: &BooleanLiteral) -> Self::Output {
        Ok(ast.ty(id))
    }

    fn visit_string_literal(&mut self, ast: &Ast, id: ExprId, _: &StringLiteral) -> Self::Output {
        Ok(ast.ty(id))
    }

    fn visit_array_literal(&mut self, ast: &Ast, id: ExprId, node: &ArrayLiteral) -> Self::Output {
        let declared = ast.ty(id);
        let types = node
            .elements
            .iter()
            .map(|&element| ast.accept(element, self))
            .collect::<Result<Vec<_>, _>>()?;

        // Empty nested literals report `unknown`; their siblings or the
        // declared type decide what they are.
        let known = types.iter().copied().find(|ty| !ty.is_unknown());
        let Some(element) = known.or_else(|| declared.subscripted(1)) else {
            return Ok(declared);
        };
        if element.is_void() {
            return Err(CoreError::TypeMismatch {
                context: "array literal element".to_string(),
                expected: "a value".to_string(),
                found: element,
            });
        }
        for (&child, &ty) in node.elements.iter().zip(&types) {
            if ty.is_unknown() {
                refine_empty_literal(ast, child, element)?;
            } else {
                expect_type(ty, element, "array literal element")?;
            }
        }

        let ty = element.wrapped_in_array();
        if !declared.is_unknown() {
            expect_type(ty, declared, "array literal")?;
        }
        self.record(ast, id, ty)
    }

    fn visit_identifier(&mut self, ast: &Ast, id: ExprId, node: &Identifier) -> Self::Output {
        let ty = self
            .env
            .lookup_variable(&node.name)
            .ok_or_else(|| CoreError::UnresolvedIdentifier(node.name.clone()))?;
        self.record(ast, id, ty)
    }

    fn visit_call(&mut self, ast: &Ast, id: ExprId, node: &Call) -> Self::Output {
        let args = node
            .args
            .iter()
            .map(|&arg| ast.accept(arg, self))
            .collect::<Result<Vec<_>, _>>()?;

        let ty = match self.env.lookup_function(&node.callee_name) {
            Some(signature) => {
                if signature.params.len() != args.len() {
                    return Err(CoreError::ArityMismatch {
                        name: node.callee_name.clone(),
                        expected: signature.params.len(),
                        given: args.len(),
                    });
                }
                let context = format!("argument of '{}'", node.callee_name);
                for (&arg, &param) in args.iter().zip(&signature.params) {
                    expect_type(arg, param, &context)?;
                }
                signature.result
            }
            None => resolve_builtin(&node.callee_name, &args)?.1,
        };
        self.record(ast, id, ty)
    }

    fn visit_unary_operator(&mut self, ast: &Ast, id: ExprId, node: &UnaryOperator) -> Self::Output {
        let operand = ast.accept(node.sub_expr, self)?;
        let ty = match node.op {
            UnaryOp::Neg => Type::INTEGER,
            UnaryOp::Not => Type::BOOLEAN,
        };
        expect_type(operand, ty, "operand of unary operator")?;
        self.record(ast, id, ty)
    }

    fn visit_binary_operator(
        &mut self,
        ast: &Ast,
        id: ExprId,
        node: &BinaryOperator,
    ) -> Self::Output {
        let lhs = ast.accept(node.lhs, self)?;
        let rhs = ast.accept(node.rhs, self)?;
        let context = format!("operands of '{}'", node.op.symbol());

        let ty = match node.op {
            BinaryOp::Add if lhs == Type::STRING => {
                expect_type(rhs, Type::STRING, &context)?;
                Type::STRING
            }
            op if op.is_arithmetic() => {
                expect_type(lhs, Type::INTEGER, &context)?;
                expect_type(rhs, Type::INTEGER, &context)?;
                Type::INTEGER
            }
            op if op.is_ordering() => {
                expect_type(lhs, Type::INTEGER, &context)?;
                expect_type(rhs, Type::INTEGER, &context)?;
                Type::BOOLEAN
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                if lhs != Type::INTEGER && lhs != Type::BOOLEAN && lhs != Type::STRING {
                    return Err(CoreError::TypeMismatch {
                        context,
                        expected: "int, bool or string".to_string(),
                        found: lhs,
                    });
                }
                expect_type(rhs, lhs, &context)?;
                Type::BOOLEAN
            }
            _ => {
                expect_type(lhs, Type::BOOLEAN, &context)?;
                expect_type(rhs, Type::BOOLEAN, &context)?;
                Type::BOOLEAN
            }
        };
        self.record(ast, id, ty)
    }

    fn visit_array_subscript(
        &mut self,
        ast: &Ast,
        id: ExprId,
        node: &ArraySubscript,
    ) -> Self::Output {
        let base = ast.accept(node.base_expr, self)?;
        if !base.is_array() {
            return Err(CoreError::TypeMismatch {
                context: "subscripted expression".to_string(),
                expected: "array".to_string(),
                found: base,
            });
        }
        for &index in &node.index_exprs {
            let ty = ast.accept(index, self)?;
            expect_type(ty, Type::INTEGER, "array index")?;
        }
        let ty = base
            .subscripted(node.index_exprs.len())
            .ok_or(CoreError::TooManySubscripts {
                ty: base,
                given: node.index_exprs.len(),
            })?;
        self.record(ast, id, ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_keep_their_types() {
        let mut ast = Ast::new();
        let int = ast.integer_literal(42);
        assert_eq!(infer_types(&ast, int, &TypeEnv::new()), Ok(Type::INTEGER));
        let text = ast.empty_string_literal();
        assert_eq!(infer_types(&ast, text, &TypeEnv::new()), Ok(Type::STRING));
    }

    #[test]
    fn infers_arithmetic_and_comparison() {
        let mut ast = Ast::new();
        let two = ast.integer_literal(2);
        let three = ast.integer_literal(3);
        let add = ast.binary(BinaryOp::Add, two, three);
        let four = ast.integer_literal(4);
        let lt = ast.binary(BinaryOp::Lt, add, four);
        ast.bind_tree(lt);

        assert_eq!(infer_types(&ast, lt, &TypeEnv::new()), Ok(Type::BOOLEAN));
        assert_eq!(ast.ty(add), Type::INTEGER);
    }

    #[test]
    fn string_addition_is_concatenation() {
        let mut ast = Ast::new();
        let a = ast.string_literal("a");
        let b = ast.string_literal("b");
        let add = ast.binary(BinaryOp::Add, a, b);
        assert_eq!(infer_types(&ast, add, &TypeEnv::new()), Ok(Type::STRING));
    }

    #[test]
    fn rejects_mixed_operands() {
        let mut ast = Ast::new();
        let a = ast.integer_literal(1);
        let b = ast.boolean_literal(true);
        let add = ast.binary(BinaryOp::Add, a, b);
        assert!(matches!(
            infer_types(&ast, add, &TypeEnv::new()),
            Err(CoreError::TypeMismatch { found, .. }) if found == Type::BOOLEAN
        ));
    }

    #[test]
    fn identifiers_come_from_the_environment() {
        let mut ast = Ast::new();
        let x = ast.identifier("x");
        let mut env = TypeEnv::new();
        assert_eq!(
            infer_types(&ast, x, &env),
            Err(CoreError::UnresolvedIdentifier("x".to_string()))
        );
        env.declare_variable("x", Type::STRING);
        env.declare_variable("x", Type::INTEGER);
        assert_eq!(infer_types(&ast, x, &env), Ok(Type::INTEGER));
        assert_eq!(env.variables(), vec![("x", Type::INTEGER)]);
    }

    #[test]
    fn array_literals_and_subscripts() {
        let mut ast = Ast::new();
        let a = ast.integer_literal(1);
        let b = ast.integer_literal(2);
        let row = ast.array_literal(vec![a, b]);
        let c = ast.integer_literal(3);
        let other = ast.array_literal(vec![c]);
        let matrix = ast.array_literal(vec![row, other]);
        let i = ast.integer_literal(0);
        let j = ast.integer_literal(1);
        let subscript = ast.array_subscript(matrix, vec![i, j]);

        assert_eq!(infer_types(&ast, subscript, &TypeEnv::new()), Ok(Type::INTEGER));
        assert_eq!(ast.ty(matrix), Type::array(Type::INTEGER, 2));
        assert_eq!(ast.ty(row), Type::array(Type::INTEGER, 1));
    }

    #[test]
    fn empty_array_literal_keeps_declared_type() {
        let mut ast = Ast::new();
        let untyped = ast.array_literal(Vec::new());
        assert_eq!(infer_types(&ast, untyped, &TypeEnv::new()), Ok(Type::UNKNOWN));

        let int_array = Type::array(Type::INTEGER, 1);
        let typed = ast.typed_array_literal(Vec::new(), int_array);
        assert_eq!(infer_types(&ast, typed, &TypeEnv::new()), Ok(int_array));
    }

    #[test]
    fn empty_literal_takes_its_type_from_a_later_sibling() {
        let mut ast = Ast::new();
        let one = ast.integer_literal(1);
        let filled = ast.array_literal(vec![one]);
        let empty = ast.array_literal(Vec::new());
        let outer = ast.array_literal(vec![filled, empty]);
        assert_eq!(
            infer_types(&ast, outer, &TypeEnv::new()),
            Ok(Type::array(Type::INTEGER, 2))
        );
        assert_eq!(ast.ty(empty), Type::array(Type::INTEGER, 1));
    }

    #[test]
    fn empty_literal_takes_its_type_from_an_earlier_sibling() {
        let mut ast = Ast::new();
        let empty = ast.array_literal(Vec::new());
        let one = ast.integer_literal(1);
        let filled = ast.array_literal(vec![one]);
        let outer = ast.array_literal(vec![empty, filled]);
        assert_eq!(
            infer_types(&ast, outer, &TypeEnv::new()),
            Ok(Type::array(Type::INTEGER, 2))
        );
        assert_eq!(ast.ty(empty), Type::array(Type::INTEGER, 1));
    }

    #[test]
    fn deeply_nested_empty_literals_are_refined() {
        let mut ast = Ast::new();
        let innermost = ast.array_literal(Vec::new());
        let hollow = ast.array_literal(vec![innermost]);
        let t = ast.boolean_literal(true);
        let cell = ast.array_literal(vec![t]);
        let full = ast.array_literal(vec![cell]);
        let outer = ast.array_literal(vec![hollow, full]);
        assert_eq!(
            infer_types(&ast, outer, &TypeEnv::new()),
            Ok(Type::array(Type::BOOLEAN, 3))
        );
        assert_eq!(ast.ty(hollow), Type::array(Type::BOOLEAN, 2));
        assert_eq!(ast.ty(innermost), Type::array(Type::BOOLEAN, 1));
    }

    #[test]
    fn declared_type_flows_into_empty_elements() {
        let mut ast = Ast::new();
        let a = ast.array_literal(Vec::new());
        let b = ast.array_literal(Vec::new());
        let grid = Type::array(Type::STRING, 2);
        let outer = ast.typed_array_literal(vec![a, b], grid);
        assert_eq!(infer_types(&ast, outer, &TypeEnv::new()), Ok(grid));
        assert_eq!(ast.ty(a), Type::array(Type::STRING, 1));

        let c = ast.array_literal(Vec::new());
        let d = ast.array_literal(Vec::new());
        let untyped = ast.array_literal(vec![c, d]);
        assert_eq!(infer_types(&ast, untyped, &TypeEnv::new()), Ok(Type::UNKNOWN));
        assert_eq!(ast.ty(c), Type::UNKNOWN);
    }

    #[test]
    fn empty_literal_next_to_a_scalar_is_rejected() {
        let mut ast = Ast::new();
        let one = ast.integer_literal(1);
        let empty = ast.array_literal(Vec::new());
        let outer = ast.array_literal(vec![one, empty]);
        assert_eq!(
            infer_types(&ast, outer, &TypeEnv::new()),
            Err(CoreError::TypeMismatch {
                context: "array literal element".to_string(),
                expected: "int".to_string(),
                found: Type::UNKNOWN,
            })
        );
    }

    #[test]
    fn too_many_subscripts_are_rejected() {
        let mut ast = Ast::new();
        let arr = ast.identifier("arr");
        let i = ast.integer_literal(0);
        let j = ast.integer_literal(0);
        let subscript = ast.array_subscript(arr, vec![i, j]);
        let mut env = TypeEnv::new();
        env.declare_variable("arr", Type::array(Type::BOOLEAN, 1));
        assert_eq!(
            infer_types(&ast, subscript, &env),
            Err(CoreError::TooManySubscripts {
                ty: Type::array(Type::BOOLEAN, 1),
                given: 2,
            })
        );
    }

    #[test]
    fn user_functions_take_precedence_over_builtins() {
        let mut ast = Ast::new();
        let arg = ast.boolean_literal(true);
        let call = ast.call("len", vec![arg]);
        let mut env = TypeEnv::new();
        env.declare_function(
            "len",
            FunctionSignature {
                params: vec![Type::BOOLEAN],
                result: Type::STRING,
            },
        );
        assert_eq!(infer_types(&ast, call, &env), Ok(Type::STRING));
    }

    #[test]
    fn builtin_calls_are_typed() {
        let mut ast = Ast::new();
        let text = ast.string_literal("12");
        let parsed = ast.call("int", vec![text]);
        let print = ast.call("println", vec![parsed]);
        assert_eq!(infer_types(&ast, print, &TypeEnv::new()), Ok(Type::VOID));
        assert_eq!(ast.ty(parsed), Type::INTEGER);
    }
}
