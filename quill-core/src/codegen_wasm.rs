//! WASM backend for Quill expressions.
//!
//! [`CodeGen`] is an [`ExprVisitor`] that lowers a typed expression tree
//! into the instruction sequence of one function body. Anything that
//! needs the runtime library (strings, arrays, printing, conversions)
//! becomes a call through the handles cached in [`Builtin`], which must
//! have been linked into the same code unit.

use rustc_hash::FxHashMap;
use tracing::trace;
use wasm_encoder::{Function, Instruction, ValType};

use crate::ast::{
    ArrayLiteral, ArraySubscript, Ast, BinaryOp, BinaryOperator, BooleanLiteral, Call, ExprId,
    ExprKind, Identifier, IntegerLiteral, StringLiteral, UnaryOp, UnaryOperator,
};
use crate::builtins::{ResolvedBuiltin, resolve_builtin};
use crate::context::TargetContext;
use crate::error::CoreError;
use crate::runtime::{ArrayApi, Builtin, ElementKind, ErrorApi, IoApi, StringApi};
use crate::types::Type;
use crate::unit::{CodeUnit, FuncRef};
use crate::visitor::ExprVisitor;

pub struct CodeGen<'a> {
    unit: &'a mut CodeUnit,
    runtime: &'a Builtin,
    context: &'a TargetContext,
    variables: FxHashMap<String, u32>,
    functions: FxHashMap<String, FuncRef>,
    param_count: u32,
    locals: Vec<ValType>,
    body: Vec<Instruction<'static>>,
}

impl<'a> CodeGen<'a> {
    /// Start a function body whose parameters are `params`, in order.
    pub fn new(
        unit: &'a mut CodeUnit,
        runtime: &'a Builtin,
        context: &'a TargetContext,
        params: &[(&str, Type)],
    ) -> Result<Self, CoreError> {
        if !runtime.is_linked_to(unit.id()) {
            return Err(CoreError::RuntimeNotLinked(unit.name().to_string()));
        }
        let variables = params
            .iter()
            .enumerate()
            .map(|(index, (name, _))| (name.to_string(), index as u32))
            .collect();
        Ok(CodeGen {
            unit,
            runtime,
            context,
            variables,
            functions: FxHashMap::default(),
            param_count: params.len() as u32,
            locals: Vec::new(),
            body: Vec::new(),
        })
    }

    /// Make a user function callable by name. User functions take
    /// precedence over language builtins of the same name.
    pub fn bind_function(&mut self, name: impl Into<String>, func: FuncRef) {
        self.functions.insert(name.into(), func);
    }

    /// Emit code leaving the value of `id` (if any) on the stack.
    pub fn emit(&mut self, ast: &Ast, id: ExprId) -> Result<(), CoreError> {
        ast.accept(id, self)
    }

    /// Close the body and build the wasm function.
    pub fn finish(self) -> Function {
        let mut function = Function::new(self.locals.iter().map(|&ty| (1, ty)));
        for instruction in &self.body {
            function.instruction(instruction);
        }
        function.instruction(&Instruction::End);
        function
    }

    fn push(&mut self, instruction: Instruction<'static>) {
        self.body.push(instruction);
    }

    fn call(&mut self, func: FuncRef) {
        self.push(Instruction::Call(func.index()));
    }

    fn call_error(&mut self, op: ErrorApi) -> Result<(), CoreError> {
        let func = self.runtime.error.require(op, self.unit.id())?;
        trace!(?op, "runtime call");
        self.call(func);
        Ok(())
    }

    fn call_string(&mut self, op: StringApi) -> Result<(), CoreError> {
        let func = self.runtime.string.require(op, self.unit.id())?;
        trace!(?op, "runtime call");
        self.call(func);
        Ok(())
    }

    fn call_array(&mut self, op: ArrayApi) -> Result<(), CoreError> {
        let func = self.runtime.array.require(op, self.unit.id())?;
        trace!(?op, "runtime call");
        self.call(func);
        Ok(())
    }

    fn call_io(&mut self, op: IoApi) -> Result<(), CoreError> {
        let func = self.runtime.io.require(op, self.unit.id())?;
        trace!(?op, "runtime call");
        self.call(func);
        Ok(())
    }

    fn new_local(&mut self, ty: ValType) -> u32 {
        self.locals.push(ty);
        self.param_count + self.locals.len() as u32 - 1
    }

    fn pointer(address: u32) -> Instruction<'static> {
        Instruction::I32Const(address as i32)
    }

    /// Bytes of a literal-only integer or boolean array, laid out the way
    /// `*_with_literal` expects them.
    fn literal_buffer(ast: &Ast, elements: &[ExprId]) -> Option<Vec<u8>> {
        let mut buffer = Vec::new();
        for &element in elements {
            match ast.kind(element) {
                ExprKind::IntegerLiteral(int) => buffer.extend_from_slice(&int.literal.to_le_bytes()),
                ExprKind::BooleanLiteral(boolean) => {
                    buffer.extend_from_slice(&i32::from(boolean.literal).to_le_bytes())
                }
                _ => return None,
            }
        }
        Some(buffer)
    }

    fn emit_builtin(&mut self, builtin: ResolvedBuiltin) -> Result<(), CoreError> {
        match builtin {
            ResolvedBuiltin::PrintInteger { newline: false } => self.call_io(IoApi::PrintInteger),
            ResolvedBuiltin::PrintInteger { newline: true } => self.call_io(IoApi::PrintlnInteger),
            ResolvedBuiltin::PrintString { newline: false } => self.call_io(IoApi::PrintString),
            ResolvedBuiltin::PrintString { newline: true } => self.call_io(IoApi::PrintlnString),
            ResolvedBuiltin::StringSize => self.call_string(StringApi::GetSize),
            ResolvedBuiltin::ArraySize => self.call_array(ArrayApi::GetSize),
            ResolvedBuiltin::IntegerToString => self.call_io(IoApi::Integer2String),
            ResolvedBuiltin::StringToInteger => {
                // Stack after the call: [value, error]; the check consumes the error.
                self.call_io(IoApi::String2Integer)?;
                self.call_error(ErrorApi::ExitIfError)
            }
            ResolvedBuiltin::Trim => self.call_string(StringApi::Trim),
            ResolvedBuiltin::TrimLeft => self.call_string(StringApi::TrimLeft),
            ResolvedBuiltin::TrimRight => self.call_string(StringApi::TrimRight),
            ResolvedBuiltin::IndexOf => self.call_string(StringApi::IndexOf),
            ResolvedBuiltin::Append => self.call_string(StringApi::Append),
            ResolvedBuiltin::Prepend => self.call_string(StringApi::Prepend),
            ResolvedBuiltin::StringSlice => self.call_string(StringApi::Slice),
            ResolvedBuiltin::ArraySlice => self.call_array(ArrayApi::Slice),
            ResolvedBuiltin::Push(kind) => self.call_array(ArrayApi::push(kind)),
            ResolvedBuiltin::Pop(kind) => self.call_array(ArrayApi::pop(kind)),
            ResolvedBuiltin::IsNdArray => self.call_array(ArrayApi::IsNdArray),
            ResolvedBuiltin::DeleteString => self.call_string(StringApi::Delete),
            ResolvedBuiltin::DeleteArray => self.call_array(ArrayApi::Delete),
        }
    }
}

/// Type of `id`, which must have been resolved by inference.
fn resolved(ast: &Ast, id: ExprId) -> Result<Type, CoreError> {
    let ty = ast.ty(id);
    if ty.is_unknown() {
        Err(CoreError::UnresolvedType)
    } else {
        Ok(ty)
    }
}

impl ExprVisitor for CodeGen<'_> {
    type Output = Result<(), CoreError>;

    fn visit_integer_literal(
        &mut self,
        _: &Ast,
        _: ExprId,
        node: &IntegerLiteral,
    ) -> Self::Output {
        self.push(Instruction::I64Const(node.literal));
        Ok(())
    }

    fn visit_boolean_literal(
        &mut self,
        _: &Ast,
        _: ExprId,
        node: &BooleanLiteral,
    ) -> Self::Output {
        self.push(Instruction::I32Const(i32::from(node.literal)));
        Ok(())
    }

    fn visit_string_literal(&mut self, _: &Ast, _: ExprId, node: &StringLiteral) -> Self::Output {
        let bytes = node.literal.as_bytes();
        let address = self.unit.intern_data(bytes);
        let pointer = Self::pointer(address);
        self.push(pointer);
        self.push(Instruction::I64Const(bytes.len() as i64));
        self.call_string(StringApi::Create)
    }

    fn visit_array_literal(&mut self, ast: &Ast, id: ExprId, node: &ArrayLiteral) -> Self::Output {
        let ty = resolved(ast, id)?;
        let kind = ElementKind::of_array(ty).ok_or(CoreError::UnresolvedType)?;
        let count = node.elements.len() as i64;

        if !node.elements.is_empty()
            && let Some(buffer) = Self::literal_buffer(ast, &node.elements)
        {
            // Each literal gets its own buffer; arrays are mutable.
            let pointer = Self::pointer(self.unit.append_data(&buffer));
            self.push(Instruction::I64Const(count));
            self.push(pointer);
            return self.call_array(ArrayApi::create_with_literal(kind));
        }

        self.push(Instruction::I64Const(count));
        self.call_array(ArrayApi::create(kind))?;
        if node.elements.is_empty() {
            return Ok(());
        }

        let pointer = self.context.pointer();
        let array = self.new_local(pointer);
        self.push(Instruction::LocalSet(array));
        for &element in &node.elements {
            self.push(Instruction::LocalGet(array));
            ast.accept(element, self)?;
            self.call_array(ArrayApi::push(kind))?;
        }
        self.push(Instruction::LocalGet(array));
        Ok(())
    }

    fn visit_identifier(&mut self, ast: &Ast, id: ExprId, node: &Identifier) -> Self::Output {
        resolved(ast, id)?;
        let local = *self
            .variables
            .get(&node.name)
            .ok_or_else(|| CoreError::UnresolvedIdentifier(node.name.clone()))?;
        self.push(Instruction::LocalGet(local));
        Ok(())
    }

    fn visit_call(&mut self, ast: &Ast, id: ExprId, node: &Call) -> Self::Output {
        resolved(ast, id)?;
        for &arg in &node.args {
            ast.accept(arg, self)?;
        }

        if let Some(&func) = self.functions.get(&node.callee_name) {
            self.call(func);
            return Ok(());
        }

        let arg_types = node
            .args
            .iter()
            .map(|&arg| resolved(ast, arg))
            .collect::<Result<Vec<_>, _>>()?;
        let (builtin, _) = resolve_builtin(&node.callee_name, &arg_types)?;
        self.emit_builtin(builtin)
    }

    fn visit_unary_operator(
        &mut self,
        ast: &Ast,
        id: ExprId,
        node: &UnaryOperator,
    ) -> Self::Output {
        resolved(ast, id)?;
        match node.op {
            UnaryOp::Neg => {
                self.push(Instruction::I64Const(0));
                ast.accept(node.sub_expr, self)?;
                self.push(Instruction::I64Sub);
            }
            UnaryOp::Not => {
                ast.accept(node.sub_expr, self)?;
                self.push(Instruction::I32Eqz);
            }
        }
        Ok(())
    }

    fn visit_binary_operator(
        &mut self,
        ast: &Ast,
        id: ExprId,
        node: &BinaryOperator,
    ) -> Self::Output {
        resolved(ast, id)?;
        let operand = resolved(ast, node.lhs)?;
        ast.accept(node.lhs, self)?;
        ast.accept(node.rhs, self)?;

        let string = operand == Type::STRING;
        let boolean = operand == Type::BOOLEAN;
        match node.op {
            BinaryOp::Add if string => return self.call_string(StringApi::Concat),
            BinaryOp::Eq if string => return self.call_string(StringApi::Equals),
            BinaryOp::Ne if string => {
                self.call_string(StringApi::Equals)?;
                self.push(Instruction::I32Eqz);
                return Ok(());
            }
            _ => {}
        }

        let instruction = match node.op {
            BinaryOp::Add => Instruction::I64Add,
            BinaryOp::Sub => Instruction::I64Sub,
            BinaryOp::Mul => Instruction::I64Mul,
            BinaryOp::Div => Instruction::I64DivS,
            BinaryOp::Mod => Instruction::I64RemS,
            BinaryOp::Lt => Instruction::I64LtS,
            BinaryOp::Le => Instruction::I64LeS,
            BinaryOp::Gt => Instruction::I64GtS,
            BinaryOp::Ge => Instruction::I64GeS,
            BinaryOp::Eq if boolean => Instruction::I32Eq,
            BinaryOp::Ne if boolean => Instruction::I32Ne,
            BinaryOp::Eq => Instruction::I64Eq,
            BinaryOp::Ne => Instruction::I64Ne,
            // Both sides are evaluated; there is no short-circuit.
            BinaryOp::And => Instruction::I32And,
            BinaryOp::Or => Instruction::I32Or,
        };
        self.push(instruction);
        Ok(())
    }

    fn visit_array_subscript(
        &mut self,
        ast: &Ast,
        id: ExprId,
        node: &ArraySubscript,
    ) -> Self::Output {
        resolved(ast, id)?;
        let base = resolved(ast, node.base_expr)?;
        let mut current = base;
        ast.accept(node.base_expr, self)?;
        for &index in &node.index_exprs {
            let kind = ElementKind::of_array(current).ok_or(CoreError::TooManySubscripts {
                ty: base,
                given: node.index_exprs.len(),
            })?;
            ast.accept(index, self)?;
            self.call_array(ArrayApi::get(kind))?;
            current = current.subscripted(1).ok_or(CoreError::UnresolvedType)?;
        }
        Ok(())
    }
}
