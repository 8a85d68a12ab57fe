//! Core of the Quill expression compiler.
//!
//! The pipeline is roughly:
//!
//!   AST (arena, built bottom-up by a parser)
//!     -> bind_tree  (child -> parent back references)
//!     -> typecheck  (visitor, types written into nodes)
//!     -> codegen_wasm (visitor, calls into the runtime linker)
//!     -> CodeUnit::finish (wasm-encoder)
//!
//! Runtime services (strings, arrays, errors, I/O) live outside the
//! generated module and are reached through imports declared by the
//! linker in [`runtime`].

// ---------------------------------------------------------------------
// Error handling and configuration
// ---------------------------------------------------------------------

pub mod context;
pub mod error;

// ---------------------------------------------------------------------
// Tree model: types, nodes and traversal
// ---------------------------------------------------------------------

pub mod ast;
pub mod types;
pub mod visitor;

// ---------------------------------------------------------------------
// Code units and the runtime linker
// ---------------------------------------------------------------------

pub mod builtins;
pub mod runtime;
pub mod unit;

// ---------------------------------------------------------------------
// Passes and compiler orchestration
// ---------------------------------------------------------------------

pub mod codegen_wasm;
pub mod compiler;
pub mod printer;
pub mod typecheck;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use ast::{Ast, ExprId};
pub use compiler::{CompilationArtifact, compile_expression};
pub use context::TargetContext;
pub use error::CoreError;
pub use runtime::Builtin;
pub use types::Type;
pub use unit::CodeUnit;
pub use visitor::ExprVisitor;
