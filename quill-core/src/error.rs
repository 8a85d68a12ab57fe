use thiserror::Error;

use crate::types::Type;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("unresolved identifier '{0}'")]
    UnresolvedIdentifier(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("function '{name}' expects {expected} arguments but received {given}")]
    ArityMismatch {
        name: String,
        expected: usize,
        given: usize,
    },
    #[error("type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: String,
        found: Type,
    },
    #[error("too many subscripts: {given} indices applied to {ty}")]
    TooManySubscripts { ty: Type, given: usize },
    #[error("expression type was not resolved before code generation")]
    UnresolvedType,
    #[error("runtime symbol '{0}' is not declared in the code unit")]
    MissingRuntimeSymbol(String),
    #[error("runtime symbol '{0}' is not linked into the current code unit")]
    RuntimeNotLinked(String),
    #[error("symbol '{0}' is already declared with a different signature")]
    SignatureMismatch(String),
    #[error("cannot import '{0}' after functions have been defined in the code unit")]
    ImportAfterDefinition(String),
    #[error("user function '{0}' clashes with a name the compiled module reserves")]
    NameClash(String),
    #[error("function '{0}' has no body")]
    MissingBody(String),
}
