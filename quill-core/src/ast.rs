//! Expression tree for Quill.
//!
//! Nodes live in an [`Ast`] arena and are addressed by [`ExprId`].
//! A composite node owns its children by id; every child is claimed
//! by exactly one parent when the parent is constructed. The upward
//! link is a plain index installed by [`Ast::bind_children_inversely`]
//! and never keeps anything alive.
//!
//! Only two things change after construction: the inferred type
//! (written by type inference) and the parent index (written by
//! binding). Both sit in `Cell`s so passes can share `&Ast`.

use std::cell::Cell;
use std::fmt;

use crate::types::Type;

/// Index of a node inside an [`Ast`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExprId({})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }

    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegerLiteral {
    pub literal: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BooleanLiteral {
    pub literal: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringLiteral {
    pub literal: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayLiteral {
    pub elements: Vec<ExprId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub callee_name: String,
    pub args: Vec<ExprId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnaryOperator {
    pub op: UnaryOp,
    pub sub_expr: ExprId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryOperator {
    pub op: BinaryOp,
    pub lhs: ExprId,
    pub rhs: ExprId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArraySubscript {
    pub base_expr: ExprId,
    pub index_exprs: Vec<ExprId>,
}

/// The closed set of expression variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    IntegerLiteral(IntegerLiteral),
    BooleanLiteral(BooleanLiteral),
    StringLiteral(StringLiteral),
    ArrayLiteral(ArrayLiteral),
    Identifier(Identifier),
    Call(Call),
    UnaryOperator(UnaryOperator),
    BinaryOperator(BinaryOperator),
    ArraySubscript(ArraySubscript),
}

impl ExprKind {
    /// Direct children in source order.
    pub fn children(&self) -> Vec<ExprId> {
        match self {
            ExprKind::IntegerLiteral(_)
            | ExprKind::BooleanLiteral(_)
            | ExprKind::StringLiteral(_)
            | ExprKind::Identifier(_) => Vec::new(),
            ExprKind::ArrayLiteral(array) => array.elements.clone(),
            ExprKind::Call(call) => call.args.clone(),
            ExprKind::UnaryOperator(unary) => vec![unary.sub_expr],
            ExprKind::BinaryOperator(binary) => vec![binary.lhs, binary.rhs],
            ExprKind::ArraySubscript(subscript) => {
                let mut children = Vec::with_capacity(subscript.index_exprs.len() + 1);
                children.push(subscript.base_expr);
                children.extend_from_slice(&subscript.index_exprs);
                children
            }
        }
    }
}

#[derive(Debug)]
pub struct ExprNode {
    kind: ExprKind,
    ty: Cell<Type>,
    parent: Cell<Option<ExprId>>,
    claimed: bool,
}

impl ExprNode {
    pub fn kind(&self) -> &ExprKind {
        &self.kind
    }

    pub fn ty(&self) -> Type {
        self.ty.get()
    }

    pub fn parent(&self) -> Option<ExprId> {
        self.parent.get()
    }
}

/// Arena holding every expression node of one compilation.
#[derive(Debug, Default)]
pub struct Ast {
    nodes: Vec<ExprNode>,
}

impl Ast {
    pub fn new() -> Self {
        Ast { nodes: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn integer_literal(&mut self, literal: i64) -> ExprId {
        self.push(
            ExprKind::IntegerLiteral(IntegerLiteral { literal }),
            Type::INTEGER,
        )
    }

    pub fn boolean_literal(&mut self, literal: bool) -> ExprId {
        self.push(
            ExprKind::BooleanLiteral(BooleanLiteral { literal }),
            Type::BOOLEAN,
        )
    }

    pub fn string_literal(&mut self, literal: impl Into<String>) -> ExprId {
        self.push(
            ExprKind::StringLiteral(StringLiteral {
                literal: literal.into(),
            }),
            Type::STRING,
        )
    }

    /// A string literal without text, read as the empty string.
    pub fn empty_string_literal(&mut self) -> ExprId {
        self.push(
            ExprKind::StringLiteral(StringLiteral::default()),
            Type::STRING,
        )
    }

    /// Array literal whose type is left to inference.
    pub fn array_literal(&mut self, elements: Vec<ExprId>) -> ExprId {
        self.typed_array_literal(elements, Type::UNKNOWN)
    }

    /// Array literal with a type known up front, e.g. an empty `int[]`.
    ///
    /// # Panics
    ///
    /// Panics if `ty` is neither an array type nor `unknown`.
    pub fn typed_array_literal(&mut self, elements: Vec<ExprId>, ty: Type) -> ExprId {
        assert!(
            ty.is_array() || ty.is_unknown(),
            "array literal declared with non-array type {ty}"
        );
        self.claim_all(&elements);
        self.push(ExprKind::ArrayLiteral(ArrayLiteral { elements }), ty)
    }

    pub fn identifier(&mut self, name: impl Into<String>) -> ExprId {
        self.push(
            ExprKind::Identifier(Identifier { name: name.into() }),
            Type::UNKNOWN,
        )
    }

    pub fn call(&mut self, callee_name: impl Into<String>, args: Vec<ExprId>) -> ExprId {
        self.claim_all(&args);
        self.push(
            ExprKind::Call(Call {
                callee_name: callee_name.into(),
                args,
            }),
            Type::UNKNOWN,
        )
    }

    pub fn unary(&mut self, op: UnaryOp, sub_expr: ExprId) -> ExprId {
        self.claim(sub_expr);
        self.push(
            ExprKind::UnaryOperator(UnaryOperator { op, sub_expr }),
            Type::UNKNOWN,
        )
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.claim(lhs);
        self.claim(rhs);
        self.push(
            ExprKind::BinaryOperator(BinaryOperator { op, lhs, rhs }),
            Type::UNKNOWN,
        )
    }

    pub fn array_subscript(&mut self, base_expr: ExprId, index_exprs: Vec<ExprId>) -> ExprId {
        self.claim(base_expr);
        self.claim_all(&index_exprs);
        self.push(
            ExprKind::ArraySubscript(ArraySubscript {
                base_expr,
                index_exprs,
            }),
            Type::UNKNOWN,
        )
    }

    /// # Panics
    ///
    /// Panics if `id` does not belong to this arena.
    pub fn node(&self, id: ExprId) -> &ExprNode {
        &self.nodes[id.index()]
    }

    pub fn kind(&self, id: ExprId) -> &ExprKind {
        &self.node(id).kind
    }

    pub fn ty(&self, id: ExprId) -> Type {
        self.node(id).ty.get()
    }

    /// Record the inferred type of a node.
    pub fn set_ty(&self, id: ExprId, ty: Type) {
        self.node(id).ty.set(ty);
    }

    /// Parent installed by binding, `None` for roots and unbound nodes.
    pub fn parent(&self, id: ExprId) -> Option<ExprId> {
        self.node(id).parent.get()
    }

    pub fn children(&self, id: ExprId) -> Vec<ExprId> {
        self.kind(id).children()
    }

    /// Walk the parent chain upwards, nearest ancestor first.
    pub fn ancestors(&self, id: ExprId) -> impl Iterator<Item = ExprId> + '_ {
        std::iter::successors(self.parent(id), |&current| self.parent(current))
    }

    /// Point every direct child of `id` back at `id`.
    ///
    /// Rebinding writes the same index again. Leaves have no children and
    /// are left untouched.
    pub fn bind_children_inversely(&self, id: ExprId) {
        for child in self.children(id) {
            self.node(child).parent.set(Some(id));
        }
    }

    /// Bind every node reachable from `root`.
    pub fn bind_tree(&self, root: ExprId) {
        let mut pending = vec![root];
        while let Some(id) = pending.pop() {
            self.bind_children_inversely(id);
            pending.extend(self.children(id));
        }
    }

    fn push(&mut self, kind: ExprKind, ty: Type) -> ExprId {
        let id = u32::try_from(self.nodes.len()).expect("expression arena overflow");
        self.nodes.push(ExprNode {
            kind,
            ty: Cell::new(ty),
            parent: Cell::new(None),
            claimed: false,
        });
        ExprId(id)
    }

    fn claim(&mut self, child: ExprId) {
        let node = &mut self.nodes[child.index()];
        assert!(
            !node.claimed,
            "{child:?} is already owned by another expression"
        );
        node.claimed = true;
    }

    fn claim_all(&mut self, children: &[ExprId]) {
        for &child in children {
            self.claim(child);
        }
    }
}
