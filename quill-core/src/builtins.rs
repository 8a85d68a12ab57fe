//! Built-in functions visible at the Quill language level.
//!
//! A call whose callee is not a user function is looked up here by
//! name and then resolved against its argument types. The result says
//! which runtime operation implements the call and what type it
//! produces; code generation maps it onto the runtime linker.

use crate::error::CoreError;
use crate::runtime::ElementKind;
use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    Print,
    Println,
    Len,
    Str,
    Int,
    Trim,
    TrimLeft,
    TrimRight,
    IndexOf,
    Append,
    Prepend,
    Slice,
    Push,
    Pop,
    IsNdArray,
    Delete,
}

/// Metadata about a single builtin name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinDescriptor {
    pub name: &'static str,
    pub arity: usize,
    pub kind: BuiltinKind,
}

/// The complete list of language builtins.
pub const BUILTINS: &[BuiltinDescriptor] = &[
    BuiltinDescriptor {
        name: "print",
        arity: 1,
        kind: BuiltinKind::Print,
    },
    BuiltinDescriptor {
        name: "println",
        arity: 1,
        kind: BuiltinKind::Println,
    },
    BuiltinDescriptor {
        name: "len",
        arity: 1,
        kind: BuiltinKind::Len,
    },
    BuiltinDescriptor {
        name: "str",
        arity: 1,
        kind: BuiltinKind::Str,
    },
    BuiltinDescriptor {
        name: "int",
        arity: 1,
        kind: BuiltinKind::Int,
    },
    BuiltinDescriptor {
        name: "trim",
        arity: 1,
        kind: BuiltinKind::Trim,
    },
    BuiltinDescriptor {
        name: "trim_left",
        arity: 1,
        kind: BuiltinKind::TrimLeft,
    },
    BuiltinDescriptor {
        name: "trim_right",
        arity: 1,
        kind: BuiltinKind::TrimRight,
    },
    BuiltinDescriptor {
        name: "index_of",
        arity: 2,
        kind: BuiltinKind::IndexOf,
    },
    BuiltinDescriptor {
        name: "append",
        arity: 2,
        kind: BuiltinKind::Append,
    },
    BuiltinDescriptor {
        name: "prepend",
        arity: 2,
        kind: BuiltinKind::Prepend,
    },
    BuiltinDescriptor {
        name: "slice",
        arity: 3,
        kind: BuiltinKind::Slice,
    },
    BuiltinDescriptor {
        name: "push",
        arity: 2,
        kind: BuiltinKind::Push,
    },
    BuiltinDescriptor {
        name: "pop",
        arity: 1,
        kind: BuiltinKind::Pop,
    },
    BuiltinDescriptor {
        name: "is_nd_array",
        arity: 1,
        kind: BuiltinKind::IsNdArray,
    },
    BuiltinDescriptor {
        name: "delete",
        arity: 1,
        kind: BuiltinKind::Delete,
    },
];

/// Look up a builtin by its language-level name.
///
/// The table is small, so a linear scan is enough.
pub fn find_builtin(name: &str) -> Option<&'static BuiltinDescriptor> {
    BUILTINS.iter().find(|builtin| builtin.name == name)
}

/// A builtin call after overload resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedBuiltin {
    PrintInteger { newline: bool },
    PrintString { newline: bool },
    StringSize,
    ArraySize,
    IntegerToString,
    StringToInteger,
    Trim,
    TrimLeft,
    TrimRight,
    IndexOf,
    Append,
    Prepend,
    StringSlice,
    ArraySlice,
    Push(ElementKind),
    Pop(ElementKind),
    IsNdArray,
    DeleteString,
    DeleteArray,
}

/// Resolve a builtin call by name and argument types, returning the
/// operation and the call's result type.
pub fn resolve_builtin(name: &str, args: &[Type]) -> Result<(ResolvedBuiltin, Type), CoreError> {
    let builtin =
        find_builtin(name).ok_or_else(|| CoreError::UnknownFunction(name.to_string()))?;
    if args.len() != builtin.arity {
        return Err(CoreError::ArityMismatch {
            name: name.to_string(),
            expected: builtin.arity,
            given: args.len(),
        });
    }

    let mismatch = |expected: &str, found: Type| CoreError::TypeMismatch {
        context: format!("argument of '{name}'"),
        expected: expected.to_string(),
        found,
    };
    let expect = |found: Type, expected: Type| {
        if found == expected {
            Ok(())
        } else {
            Err(mismatch(&expected.to_string(), found))
        }
    };

    match builtin.kind {
        BuiltinKind::Print | BuiltinKind::Println => {
            let newline = builtin.kind == BuiltinKind::Println;
            if args[0] == Type::INTEGER {
                Ok((ResolvedBuiltin::PrintInteger { newline }, Type::VOID))
            } else if args[0] == Type::STRING {
                Ok((ResolvedBuiltin::PrintString { newline }, Type::VOID))
            } else {
                Err(mismatch("int or string", args[0]))
            }
        }
        BuiltinKind::Len => {
            if args[0] == Type::STRING {
                Ok((ResolvedBuiltin::StringSize, Type::INTEGER))
            } else if args[0].is_array() {
                Ok((ResolvedBuiltin::ArraySize, Type::INTEGER))
            } else {
                Err(mismatch("string or array", args[0]))
            }
        }
        BuiltinKind::Str => {
            expect(args[0], Type::INTEGER)?;
            Ok((ResolvedBuiltin::IntegerToString, Type::STRING))
        }
        BuiltinKind::Int => {
            expect(args[0], Type::STRING)?;
            Ok((ResolvedBuiltin::StringToInteger, Type::INTEGER))
        }
        BuiltinKind::Trim | BuiltinKind::TrimLeft | BuiltinKind::TrimRight => {
            expect(args[0], Type::STRING)?;
            let resolved = match builtin.kind {
                BuiltinKind::TrimLeft => ResolvedBuiltin::TrimLeft,
                BuiltinKind::TrimRight => ResolvedBuiltin::TrimRight,
                _ => ResolvedBuiltin::Trim,
            };
            Ok((resolved, Type::STRING))
        }
        BuiltinKind::IndexOf => {
            expect(args[0], Type::STRING)?;
            expect(args[1], Type::STRING)?;
            Ok((ResolvedBuiltin::IndexOf, Type::INTEGER))
        }
        BuiltinKind::Append | BuiltinKind::Prepend => {
            expect(args[0], Type::STRING)?;
            expect(args[1], Type::STRING)?;
            let resolved = if builtin.kind == BuiltinKind::Append {
                ResolvedBuiltin::Append
            } else {
                ResolvedBuiltin::Prepend
            };
            Ok((resolved, Type::VOID))
        }
        BuiltinKind::Slice => {
            expect(args[1], Type::INTEGER)?;
            expect(args[2], Type::INTEGER)?;
            if args[0] == Type::STRING {
                Ok((ResolvedBuiltin::StringSlice, Type::STRING))
            } else if args[0].is_array() {
                Ok((ResolvedBuiltin::ArraySlice, args[0]))
            } else {
                Err(mismatch("string or array", args[0]))
            }
        }
        BuiltinKind::Push => {
            let (kind, element) = array_element(args[0]).ok_or_else(|| mismatch("array", args[0]))?;
            expect(args[1], element)?;
            Ok((ResolvedBuiltin::Push(kind), Type::VOID))
        }
        BuiltinKind::Pop => {
            let (kind, element) = array_element(args[0]).ok_or_else(|| mismatch("array", args[0]))?;
            Ok((ResolvedBuiltin::Pop(kind), element))
        }
        BuiltinKind::IsNdArray => {
            if !args[0].is_array() {
                return Err(mismatch("array", args[0]));
            }
            Ok((ResolvedBuiltin::IsNdArray, Type::BOOLEAN))
        }
        BuiltinKind::Delete => {
            if args[0] == Type::STRING {
                Ok((ResolvedBuiltin::DeleteString, Type::VOID))
            } else if args[0].is_array() {
                Ok((ResolvedBuiltin::DeleteArray, Type::VOID))
            } else {
                Err(mismatch("string or array", args[0]))
            }
        }
    }
}

fn array_element(array: Type) -> Option<(ElementKind, Type)> {
    let kind = ElementKind::of_array(array)?;
    let element = array.subscripted(1)?;
    Some((kind, element))
}
