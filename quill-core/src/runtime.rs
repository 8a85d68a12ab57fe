//! Runtime linker.
//!
//! Generated code reaches the Quill runtime library through function
//! imports. The runtime surface is split into four capability groups
//! (error, string, array, I/O). Each group declares its opaque handle
//! type and its functions into a [`CodeUnit`] and caches the handles it
//! got back, so code generation can emit calls without rebuilding
//! signatures.
//!
//! Handles are scoped to one unit. A [`Builtin`] value belongs to the
//! unit it was linked into and is passed explicitly to code generation;
//! there is no global linker state.
//!
//! The symbol names and signatures below are the runtime ABI: `int` is
//! `i64`, `bool` is `i32`, pointers and opaque handles are `i32`.

use std::fmt;
use std::marker::PhantomData;

use tracing::debug;
use wasm_encoder::ValType;

use crate::context::TargetContext;
use crate::error::CoreError;
use crate::types::{Type, TypeKind};
use crate::unit::{CodeUnit, FuncRef, OpaqueType, Signature, UnitId};

pub const ERROR_TYPE: &str = "Error";
pub const STRING_TYPE: &str = "String";
pub const ARRAY_TYPE: &str = "Array";

/// Value shapes appearing in runtime signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abi {
    Int,
    Bool,
    /// Linear-memory address or a handle owned by another group.
    Ptr,
    /// The declaring group's own opaque type.
    Own,
    /// The error group's opaque type.
    Error,
}

/// Name and signature of one runtime function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSymbol {
    pub name: &'static str,
    pub params: &'static [Abi],
    pub results: &'static [Abi],
}

/// Operation set of one capability group.
pub trait RuntimeApi: Copy + Eq + fmt::Debug + 'static {
    const GROUP: &'static str;
    /// Opaque type owned by the group, if any.
    const TYPE_NAME: Option<&'static str>;
    /// Every operation, in slot order.
    const ALL: &'static [Self];

    fn symbol(self) -> RuntimeSymbol;

    /// Position of the operation in [`RuntimeApi::ALL`].
    fn slot(self) -> usize;
}

/// Cached handles of one capability group.
///
/// `None` means "not linked for the current unit".
pub struct RuntimeGroup<A: RuntimeApi> {
    unit: Option<UnitId>,
    ty: Option<OpaqueType>,
    functions: Vec<Option<FuncRef>>,
    api: PhantomData<A>,
}

impl<A: RuntimeApi> Default for RuntimeGroup<A> {
    fn default() -> Self {
        RuntimeGroup {
            unit: None,
            ty: None,
            functions: vec![None; A::ALL.len()],
            api: PhantomData,
        }
    }
}

impl<A: RuntimeApi> fmt::Debug for RuntimeGroup<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeGroup")
            .field("group", &A::GROUP)
            .field("unit", &self.unit)
            .field("ty", &self.ty)
            .field("functions", &self.functions)
            .finish()
    }
}

impl<A: RuntimeApi> RuntimeGroup<A> {
    /// Declare the group's type and functions in `unit` and cache the
    /// handles. Symbols the unit already has are reused, so linking the
    /// same unit twice declares nothing new.
    pub fn link_module(
        &mut self,
        unit: &mut CodeUnit,
        context: &TargetContext,
    ) -> Result<(), CoreError> {
        let ty = match A::TYPE_NAME {
            Some(name) => Some(unit.declare_opaque_type(name, context.pointer())?),
            None => None,
        };

        let mut functions = Vec::with_capacity(A::ALL.len());
        for &op in A::ALL {
            let symbol = op.symbol();
            let signature = runtime_signature::<A>(&symbol, ty, unit, context)?;
            let func = unit.declare_function(&context.runtime_module, symbol.name, signature)?;
            functions.push(Some(func));
        }

        self.unit = Some(unit.id());
        self.ty = ty;
        self.functions = functions;
        debug!(
            group = A::GROUP,
            unit = unit.name(),
            functions = A::ALL.len(),
            "linked runtime group"
        );
        Ok(())
    }

    /// Populate the cached handles from symbols some earlier stage already
    /// declared in `unit` under `context.runtime_module`.
    pub fn get_type_and_function(
        &mut self,
        unit: &CodeUnit,
        context: &TargetContext,
    ) -> Result<(), CoreError> {
        let ty = match A::TYPE_NAME {
            Some(name) => Some(
                unit.get_opaque_type(name)
                    .ok_or_else(|| CoreError::MissingRuntimeSymbol(name.to_string()))?,
            ),
            None => None,
        };

        let functions = A::ALL
            .iter()
            .map(|op| {
                let name = op.symbol().name;
                unit.get_import(&context.runtime_module, name)
                    .map(Some)
                    .ok_or_else(|| CoreError::MissingRuntimeSymbol(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.unit = Some(unit.id());
        self.ty = ty;
        self.functions = functions;
        debug!(group = A::GROUP, unit = unit.name(), "resolved runtime group");
        Ok(())
    }

    pub fn ty(&self) -> Option<OpaqueType> {
        self.ty
    }

    pub fn function(&self, op: A) -> Option<FuncRef> {
        self.functions[op.slot()]
    }

    pub fn is_linked_to(&self, unit: UnitId) -> bool {
        self.unit == Some(unit)
    }

    /// Handle of `op` for emission into `unit`.
    pub fn require(&self, op: A, unit: UnitId) -> Result<FuncRef, CoreError> {
        match self.function(op) {
            Some(func) if func.unit() == unit => Ok(func),
            _ => Err(CoreError::RuntimeNotLinked(op.symbol().name.to_string())),
        }
    }
}

fn runtime_signature<A: RuntimeApi>(
    symbol: &RuntimeSymbol,
    own: Option<OpaqueType>,
    unit: &CodeUnit,
    context: &TargetContext,
) -> Result<Signature, CoreError> {
    let lower = |abi: Abi| -> Result<ValType, CoreError> {
        match abi {
            Abi::Int => Ok(context.integer()),
            Abi::Bool => Ok(context.boolean()),
            Abi::Ptr => Ok(context.pointer()),
            Abi::Own => own.map(OpaqueType::repr).ok_or_else(|| {
                CoreError::MissingRuntimeSymbol(format!("{} type", A::GROUP))
            }),
            Abi::Error => unit
                .get_opaque_type(ERROR_TYPE)
                .map(OpaqueType::repr)
                .ok_or_else(|| CoreError::MissingRuntimeSymbol(ERROR_TYPE.to_string())),
        }
    };
    Ok(Signature {
        params: symbol
            .params
            .iter()
            .map(|&abi| lower(abi))
            .collect::<Result<_, _>>()?,
        results: symbol
            .results
            .iter()
            .map(|&abi| lower(abi))
            .collect::<Result<_, _>>()?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorApi {
    /// Terminate the program if the error value denotes a failure.
    ExitIfError,
}

impl RuntimeApi for ErrorApi {
    const GROUP: &'static str = "error";
    const TYPE_NAME: Option<&'static str> = Some(ERROR_TYPE);
    const ALL: &'static [Self] = &[ErrorApi::ExitIfError];

    fn symbol(self) -> RuntimeSymbol {
        match self {
            ErrorApi::ExitIfError => RuntimeSymbol {
                name: "exit_if_error",
                params: &[Abi::Own],
                results: &[],
            },
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringApi {
    Create,
    Delete,
    GetSize,
    Concat,
    Append,
    Prepend,
    /// Half-open `[start, end)`; the runtime checks the bounds.
    Slice,
    Equals,
    IndexOf,
    TrimLeft,
    TrimRight,
    Trim,
}

impl RuntimeApi for StringApi {
    const GROUP: &'static str = "string";
    const TYPE_NAME: Option<&'static str> = Some(STRING_TYPE);
    const ALL: &'static [Self] = &[
        StringApi::Create,
        StringApi::Delete,
        StringApi::GetSize,
        StringApi::Concat,
        StringApi::Append,
        StringApi::Prepend,
        StringApi::Slice,
        StringApi::Equals,
        StringApi::IndexOf,
        StringApi::TrimLeft,
        StringApi::TrimRight,
        StringApi::Trim,
    ];

    fn symbol(self) -> RuntimeSymbol {
        use Abi::{Bool, Int, Own, Ptr};

        let (name, params, results): (&'static str, &'static [Abi], &'static [Abi]) = match self {
            StringApi::Create => ("string_create", &[Ptr, Int], &[Own]),
            StringApi::Delete => ("string_delete", &[Own], &[]),
            StringApi::GetSize => ("string_get_size", &[Own], &[Int]),
            StringApi::Concat => ("string_concat", &[Own, Own], &[Own]),
            StringApi::Append => ("string_append", &[Own, Own], &[]),
            StringApi::Prepend => ("string_prepend", &[Own, Own], &[]),
            StringApi::Slice => ("string_slice", &[Own, Int, Int], &[Own]),
            StringApi::Equals => ("string_equals", &[Own, Own], &[Bool]),
            StringApi::IndexOf => ("string_index_of", &[Own, Own], &[Int]),
            StringApi::TrimLeft => ("string_trim_left", &[Own], &[Own]),
            StringApi::TrimRight => ("string_trim_right", &[Own], &[Own]),
            StringApi::Trim => ("string_trim", &[Own], &[Own]),
        };
        RuntimeSymbol {
            name,
            params,
            results,
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// Element representation of a one-level array access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Integer,
    Boolean,
    String,
    Array,
}

impl ElementKind {
    /// Kind of the elements stored directly in a value of `array_type`.
    pub fn of_array(array_type: Type) -> Option<ElementKind> {
        match array_type.kind() {
            TypeKind::Array { dimension, .. } if *dimension > 1 => Some(ElementKind::Array),
            TypeKind::Array { element, .. } => ElementKind::of_value(*element),
            _ => None,
        }
    }

    /// Kind used to store a value of type `ty` inside an array.
    pub fn of_value(ty: Type) -> Option<ElementKind> {
        match ty.kind() {
            TypeKind::Integer => Some(ElementKind::Integer),
            TypeKind::Boolean => Some(ElementKind::Boolean),
            TypeKind::String => Some(ElementKind::String),
            TypeKind::Array { .. } => Some(ElementKind::Array),
            TypeKind::Void | TypeKind::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayApi {
    CreateIntegerArray,
    CreateBooleanArray,
    CreateStringArray,
    CreateArrayArray,
    /// `(count, buffer)`; the runtime copies the elements out of `buffer`.
    CreateIntegerArrayWithLiteral,
    CreateBooleanArrayWithLiteral,
    CreateStringArrayWithLiteral,
    CreateArrayArrayWithLiteral,
    Delete,
    GetSize,
    IsNdArray,
    PushInteger,
    PushBoolean,
    PushString,
    PushArray,
    PopInteger,
    PopBoolean,
    PopString,
    PopArray,
    GetInteger,
    GetBoolean,
    GetString,
    GetArray,
    SetInteger,
    SetBoolean,
    SetString,
    SetArray,
    /// Half-open `[start, end)`; the runtime checks the bounds.
    Slice,
}

impl ArrayApi {
    pub fn create(kind: ElementKind) -> ArrayApi {
        match kind {
            ElementKind::Integer => ArrayApi::CreateIntegerArray,
            ElementKind::Boolean => ArrayApi::CreateBooleanArray,
            ElementKind::String => ArrayApi::CreateStringArray,
            ElementKind::Array => ArrayApi::CreateArrayArray,
        }
    }

    pub fn create_with_literal(kind: ElementKind) -> ArrayApi {
        match kind {
            ElementKind::Integer => ArrayApi::CreateIntegerArrayWithLiteral,
            ElementKind::Boolean => ArrayApi::CreateBooleanArrayWithLiteral,
            ElementKind::String => ArrayApi::CreateStringArrayWithLiteral,
            ElementKind::Array => ArrayApi::CreateArrayArrayWithLiteral,
        }
    }

    pub fn push(kind: ElementKind) -> ArrayApi {
        match kind {
            ElementKind::Integer => ArrayApi::PushInteger,
            ElementKind::Boolean => ArrayApi::PushBoolean,
            ElementKind::String => ArrayApi::PushString,
            ElementKind::Array => ArrayApi::PushArray,
        }
    }

    pub fn pop(kind: ElementKind) -> ArrayApi {
        match kind {
            ElementKind::Integer => ArrayApi::PopInteger,
            ElementKind::Boolean => ArrayApi::PopBoolean,
            ElementKind::String => ArrayApi::PopString,
            ElementKind::Array => ArrayApi::PopArray,
        }
    }

    pub fn get(kind: ElementKind) -> ArrayApi {
        match kind {
            ElementKind::Integer => ArrayApi::GetInteger,
            ElementKind::Boolean => ArrayApi::GetBoolean,
            ElementKind::String => ArrayApi::GetString,
            ElementKind::Array => ArrayApi::GetArray,
        }
    }

    pub fn set(kind: ElementKind) -> ArrayApi {
        match kind {
            ElementKind::Integer => ArrayApi::SetInteger,
            ElementKind::Boolean => ArrayApi::SetBoolean,
            ElementKind::String => ArrayApi::SetString,
            ElementKind::Array => ArrayApi::SetArray,
        }
    }
}

impl RuntimeApi for ArrayApi {
    const GROUP: &'static str = "array";
    const TYPE_NAME: Option<&'static str> = Some(ARRAY_TYPE);
    const ALL: &'static [Self] = &[
        ArrayApi::CreateIntegerArray,
        ArrayApi::CreateBooleanArray,
        ArrayApi::CreateStringArray,
        ArrayApi::CreateArrayArray,
        ArrayApi::CreateIntegerArrayWithLiteral,
        ArrayApi::CreateBooleanArrayWithLiteral,
        ArrayApi::CreateStringArrayWithLiteral,
        ArrayApi::CreateArrayArrayWithLiteral,
        ArrayApi::Delete,
        ArrayApi::GetSize,
        ArrayApi::IsNdArray,
        ArrayApi::PushInteger,
        ArrayApi::PushBoolean,
        ArrayApi::PushString,
        ArrayApi::PushArray,
        ArrayApi::PopInteger,
        ArrayApi::PopBoolean,
        ArrayApi::PopString,
        ArrayApi::PopArray,
        ArrayApi::GetInteger,
        ArrayApi::GetBoolean,
        ArrayApi::GetString,
        ArrayApi::GetArray,
        ArrayApi::SetInteger,
        ArrayApi::SetBoolean,
        ArrayApi::SetString,
        ArrayApi::SetArray,
        ArrayApi::Slice,
    ];

    fn symbol(self) -> RuntimeSymbol {
        use Abi::{Bool, Int, Own, Ptr};

        let (name, params, results): (&'static str, &'static [Abi], &'static [Abi]) = match self {
            ArrayApi::CreateIntegerArray => ("array_create_integer", &[Int], &[Own]),
            ArrayApi::CreateBooleanArray => ("array_create_boolean", &[Int], &[Own]),
            ArrayApi::CreateStringArray => ("array_create_string", &[Int], &[Own]),
            ArrayApi::CreateArrayArray => ("array_create_array", &[Int], &[Own]),
            ArrayApi::CreateIntegerArrayWithLiteral => {
                ("array_create_integer_with_literal", &[Int, Ptr], &[Own])
            }
            ArrayApi::CreateBooleanArrayWithLiteral => {
                ("array_create_boolean_with_literal", &[Int, Ptr], &[Own])
            }
            ArrayApi::CreateStringArrayWithLiteral => {
                ("array_create_string_with_literal", &[Int, Ptr], &[Own])
            }
            ArrayApi::CreateArrayArrayWithLiteral => {
                ("array_create_array_with_literal", &[Int, Ptr], &[Own])
            }
            ArrayApi::Delete => ("array_delete", &[Own], &[]),
            ArrayApi::GetSize => ("array_get_size", &[Own], &[Int]),
            ArrayApi::IsNdArray => ("array_is_nd_array", &[Own], &[Bool]),
            ArrayApi::PushInteger => ("array_push_integer", &[Own, Int], &[]),
            ArrayApi::PushBoolean => ("array_push_boolean", &[Own, Bool], &[]),
            ArrayApi::PushString => ("array_push_string", &[Own, Ptr], &[]),
            ArrayApi::PushArray => ("array_push_array", &[Own, Own], &[]),
            ArrayApi::PopInteger => ("array_pop_integer", &[Own], &[Int]),
            ArrayApi::PopBoolean => ("array_pop_boolean", &[Own], &[Bool]),
            ArrayApi::PopString => ("array_pop_string", &[Own], &[Ptr]),
            ArrayApi::PopArray => ("array_pop_array", &[Own], &[Own]),
            ArrayApi::GetInteger => ("array_get_integer", &[Own, Int], &[Int]),
            ArrayApi::GetBoolean => ("array_get_boolean", &[Own, Int], &[Bool]),
            ArrayApi::GetString => ("array_get_string", &[Own, Int], &[Ptr]),
            ArrayApi::GetArray => ("array_get_array", &[Own, Int], &[Own]),
            ArrayApi::SetInteger => ("array_set_integer", &[Own, Int, Int], &[]),
            ArrayApi::SetBoolean => ("array_set_boolean", &[Own, Int, Bool], &[]),
            ArrayApi::SetString => ("array_set_string", &[Own, Int, Ptr], &[]),
            ArrayApi::SetArray => ("array_set_array", &[Own, Int, Own], &[]),
            ArrayApi::Slice => ("array_slice", &[Own, Int, Int], &[Own]),
        };
        RuntimeSymbol {
            name,
            params,
            results,
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoApi {
    Integer2String,
    /// Returns the parsed value and an error handle for malformed input.
    String2Integer,
    PrintInteger,
    PrintlnInteger,
    PrintString,
    PrintlnString,
}

impl RuntimeApi for IoApi {
    const GROUP: &'static str = "io";
    const TYPE_NAME: Option<&'static str> = None;
    const ALL: &'static [Self] = &[
        IoApi::Integer2String,
        IoApi::String2Integer,
        IoApi::PrintInteger,
        IoApi::PrintlnInteger,
        IoApi::PrintString,
        IoApi::PrintlnString,
    ];

    fn symbol(self) -> RuntimeSymbol {
        use Abi::{Error, Int, Ptr};

        let (name, params, results): (&'static str, &'static [Abi], &'static [Abi]) = match self {
            IoApi::Integer2String => ("integer2string", &[Int], &[Ptr]),
            IoApi::String2Integer => ("string2integer", &[Ptr], &[Int, Error]),
            IoApi::PrintInteger => ("print_integer", &[Int], &[]),
            IoApi::PrintlnInteger => ("println_integer", &[Int], &[]),
            IoApi::PrintString => ("print_string", &[Ptr], &[]),
            IoApi::PrintlnString => ("println_string", &[Ptr], &[]),
        };
        RuntimeSymbol {
            name,
            params,
            results,
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

pub type BuiltinError = RuntimeGroup<ErrorApi>;
pub type BuiltinString = RuntimeGroup<StringApi>;
pub type BuiltinArray = RuntimeGroup<ArrayApi>;
pub type BuiltinIo = RuntimeGroup<IoApi>;

/// Linker state for one code unit.
#[derive(Debug, Default)]
pub struct Builtin {
    pub error: BuiltinError,
    pub string: BuiltinString,
    pub array: BuiltinArray,
    pub io: BuiltinIo,
}

impl Builtin {
    /// Declare the whole runtime surface into `unit`.
    pub fn initialize(unit: &mut CodeUnit, context: &TargetContext) -> Result<Builtin, CoreError> {
        let mut builtin = Builtin::default();
        builtin.link_module(unit, context)?;
        Ok(builtin)
    }

    /// Link every group. The error group goes first because
    /// `string2integer` returns an error handle.
    pub fn link_module(
        &mut self,
        unit: &mut CodeUnit,
        context: &TargetContext,
    ) -> Result<(), CoreError> {
        self.error.link_module(unit, context)?;
        self.string.link_module(unit, context)?;
        self.array.link_module(unit, context)?;
        self.io.link_module(unit, context)?;
        Ok(())
    }

    /// Build linker state from declarations already present in `unit`.
    pub fn resolve(unit: &CodeUnit, context: &TargetContext) -> Result<Builtin, CoreError> {
        let mut builtin = Builtin::default();
        builtin.error.get_type_and_function(unit, context)?;
        builtin.string.get_type_and_function(unit, context)?;
        builtin.array.get_type_and_function(unit, context)?;
        builtin.io.get_type_and_function(unit, context)?;
        Ok(builtin)
    }

    pub fn is_linked_to(&self, unit: UnitId) -> bool {
        self.error.is_linked_to(unit)
            && self.string.is_linked_to(unit)
            && self.array.is_linked_to(unit)
            && self.io.is_linked_to(unit)
    }
}
