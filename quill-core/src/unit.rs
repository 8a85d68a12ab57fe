//! Code unit: the wasm module being generated for one compilation.
//!
//! The unit keeps symbols by name so that declarations can be looked up
//! and reused, and only turns them into wasm sections in
//! [`CodeUnit::finish`]. Imports are keyed by module and name, defined
//! functions by name alone. Function indices follow the wasm index space:
//! imports first, then defined functions. Imports are therefore closed
//! as soon as the first function is defined.

use std::sync::atomic::{AtomicU32, Ordering};

use rustc_hash::FxHashMap;
use tracing::trace;
use wasm_encoder::{
    CodeSection, ConstExpr, DataSection, EntityType, ExportKind, ExportSection, Function,
    FunctionSection, ImportSection, MemorySection, MemoryType, Module, TypeSection, ValType,
};

use crate::context::TargetContext;
use crate::error::CoreError;

const PAGE_SIZE: u64 = 65536;
const DATA_ALIGN: usize = 8;

static NEXT_UNIT_ID: AtomicU32 = AtomicU32::new(0);

/// Process-unique identity of a code unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitId(u32);

/// Function type descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

/// Handle to a function declared or defined in a code unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncRef {
    unit: UnitId,
    index: u32,
}

impl FuncRef {
    pub fn unit(self) -> UnitId {
        self.unit
    }

    /// Index in the module's function index space.
    pub fn index(self) -> u32 {
        self.index
    }
}

/// Handle to a named opaque runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpaqueType {
    unit: UnitId,
    id: u32,
    repr: ValType,
}

impl OpaqueType {
    pub fn unit(self) -> UnitId {
        self.unit
    }

    /// Value type used to pass the handle around.
    pub fn repr(self) -> ValType {
        self.repr
    }
}

#[derive(Debug)]
struct Import {
    module: String,
    name: String,
    type_index: u32,
}

#[derive(Debug)]
struct Definition {
    name: String,
    type_index: u32,
    export: bool,
    body: Option<Function>,
}

#[derive(Debug)]
pub struct CodeUnit {
    id: UnitId,
    name: String,
    opaque_types: Vec<(String, OpaqueType)>,
    signatures: Vec<Signature>,
    signature_indices: FxHashMap<Signature, u32>,
    imports: Vec<Import>,
    definitions: Vec<Definition>,
    imports_by_name: FxHashMap<(String, String), FuncRef>,
    functions: FxHashMap<String, FuncRef>,
    data: Vec<u8>,
    data_base: u32,
    data_offsets: FxHashMap<Vec<u8>, u32>,
}

impl CodeUnit {
    pub fn new(name: impl Into<String>, context: &TargetContext) -> Self {
        CodeUnit {
            id: UnitId(NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            opaque_types: Vec::new(),
            signatures: Vec::new(),
            signature_indices: FxHashMap::default(),
            imports: Vec::new(),
            definitions: Vec::new(),
            imports_by_name: FxHashMap::default(),
            functions: FxHashMap::default(),
            data: Vec::new(),
            data_base: context.data_base,
            data_offsets: FxHashMap::default(),
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a named opaque type, or return the existing declaration.
    pub fn declare_opaque_type(
        &mut self,
        name: &str,
        repr: ValType,
    ) -> Result<OpaqueType, CoreError> {
        if let Some(existing) = self.get_opaque_type(name) {
            if existing.repr != repr {
                return Err(CoreError::SignatureMismatch(name.to_string()));
            }
            return Ok(existing);
        }
        let ty = OpaqueType {
            unit: self.id,
            id: self.opaque_types.len() as u32,
            repr,
        };
        trace!(unit = %self.name, name, "declared opaque type");
        self.opaque_types.push((name.to_string(), ty));
        Ok(ty)
    }

    pub fn get_opaque_type(&self, name: &str) -> Option<OpaqueType> {
        self.opaque_types
            .iter()
            .find_map(|(existing, ty)| (existing == name).then_some(*ty))
    }

    /// Declare an imported function, or return the existing symbol when
    /// `module` already provides `name` with the same signature.
    pub fn declare_function(
        &mut self,
        module: &str,
        name: &str,
        signature: Signature,
    ) -> Result<FuncRef, CoreError> {
        if let Some(existing) = self.get_import(module, name) {
            return self.reuse(existing, name, &signature);
        }
        if !self.definitions.is_empty() {
            return Err(CoreError::ImportAfterDefinition(name.to_string()));
        }
        let type_index = self.intern_signature(signature);
        let func = FuncRef {
            unit: self.id,
            index: self.imports.len() as u32,
        };
        self.imports.push(Import {
            module: module.to_string(),
            name: name.to_string(),
            type_index,
        });
        self.imports_by_name
            .insert((module.to_string(), name.to_string()), func);
        trace!(unit = %self.name, module, name, index = func.index, "declared import");
        Ok(func)
    }

    /// Reserve a function defined in this unit. Its body is supplied later
    /// with [`CodeUnit::set_body`].
    pub fn define_function(
        &mut self,
        name: &str,
        signature: Signature,
        export: bool,
    ) -> Result<FuncRef, CoreError> {
        if let Some(existing) = self.get_function(name) {
            return self.reuse(existing, name, &signature);
        }
        let type_index = self.intern_signature(signature);
        let func = FuncRef {
            unit: self.id,
            index: (self.imports.len() + self.definitions.len()) as u32,
        };
        self.definitions.push(Definition {
            name: name.to_string(),
            type_index,
            export,
            body: None,
        });
        self.functions.insert(name.to_string(), func);
        Ok(func)
    }

    /// # Panics
    ///
    /// Panics if `func` is an import or belongs to another unit.
    pub fn set_body(&mut self, func: FuncRef, body: Function) {
        assert_eq!(func.unit, self.id, "function handle from another code unit");
        let position = (func.index as usize)
            .checked_sub(self.imports.len())
            .expect("imported functions have no body");
        self.definitions[position].body = Some(body);
    }

    pub fn get_import(&self, module: &str, name: &str) -> Option<FuncRef> {
        self.imports_by_name
            .get(&(module.to_string(), name.to_string()))
            .copied()
    }

    /// A function defined in this unit.
    pub fn get_function(&self, name: &str) -> Option<FuncRef> {
        self.functions.get(name).copied()
    }

    pub fn is_import(&self, func: FuncRef) -> bool {
        func.unit == self.id && (func.index as usize) < self.imports.len()
    }

    /// # Panics
    ///
    /// Panics if `func` belongs to another unit.
    pub fn signature(&self, func: FuncRef) -> &Signature {
        assert_eq!(func.unit, self.id, "function handle from another code unit");
        let index = func.index as usize;
        let type_index = match self.imports.get(index) {
            Some(import) => import.type_index,
            None => self.definitions[index - self.imports.len()].type_index,
        };
        &self.signatures[type_index as usize]
    }

    /// Names of all functions, imports first, in index order.
    pub fn function_names(&self) -> Vec<&str> {
        self.imports
            .iter()
            .map(|import| import.name.as_str())
            .chain(self.definitions.iter().map(|def| def.name.as_str()))
            .collect()
    }

    /// Names imported from `module`, in index order.
    pub fn import_names(&self, module: &str) -> Vec<&str> {
        self.imports
            .iter()
            .filter(|import| import.module == module)
            .map(|import| import.name.as_str())
            .collect()
    }

    pub fn opaque_type_names(&self) -> Vec<&str> {
        self.opaque_types
            .iter()
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Place `bytes` in the data segment and return their memory address.
    /// Identical byte strings share one copy.
    pub fn intern_data(&mut self, bytes: &[u8]) -> u32 {
        if let Some(&offset) = self.data_offsets.get(bytes) {
            return offset;
        }
        let offset = self.append_data(bytes);
        self.data_offsets.insert(bytes.to_vec(), offset);
        offset
    }

    /// Place `bytes` at a fresh address that no other literal shares.
    pub fn append_data(&mut self, bytes: &[u8]) -> u32 {
        let padding = (DATA_ALIGN - self.data.len() % DATA_ALIGN) % DATA_ALIGN;
        self.data.resize(self.data.len() + padding, 0);
        let offset = self.data_base + self.data.len() as u32;
        self.data.extend_from_slice(bytes);
        offset
    }

    /// Encode the unit as a wasm binary.
    pub fn finish(self) -> Result<Vec<u8>, CoreError> {
        let mut module = Module::new();

        let mut types = TypeSection::new();
        for signature in &self.signatures {
            types.ty().function(
                signature.params.iter().copied(),
                signature.results.iter().copied(),
            );
        }
        module.section(&types);

        if !self.imports.is_empty() {
            let mut imports = ImportSection::new();
            for import in &self.imports {
                imports.import(
                    &import.module,
                    &import.name,
                    EntityType::Function(import.type_index),
                );
            }
            module.section(&imports);
        }

        let mut functions = FunctionSection::new();
        for definition in &self.definitions {
            functions.function(definition.type_index);
        }
        module.section(&functions);

        let has_memory = !self.data.is_empty();
        if has_memory {
            let used = u64::from(self.data_base) + self.data.len() as u64;
            let mut memories = MemorySection::new();
            memories.memory(MemoryType {
                minimum: used.div_ceil(PAGE_SIZE).max(1),
                maximum: None,
                memory64: false,
                shared: false,
                page_size_log2: None,
            });
            module.section(&memories);
        }

        let mut exports = ExportSection::new();
        let first_defined = self.imports.len() as u32;
        for (position, definition) in self.definitions.iter().enumerate() {
            if definition.export {
                exports.export(
                    &definition.name,
                    ExportKind::Func,
                    first_defined + position as u32,
                );
            }
        }
        if has_memory {
            exports.export("memory", ExportKind::Memory, 0);
        }
        module.section(&exports);

        let mut code = CodeSection::new();
        for definition in &self.definitions {
            let body = definition
                .body
                .as_ref()
                .ok_or_else(|| CoreError::MissingBody(definition.name.clone()))?;
            code.function(body);
        }
        module.section(&code);

        if has_memory {
            let mut data = DataSection::new();
            data.active(
                0,
                &ConstExpr::i32_const(self.data_base as i32),
                self.data.iter().copied(),
            );
            module.section(&data);
        }

        Ok(module.finish())
    }

    fn reuse(
        &self,
        existing: FuncRef,
        name: &str,
        signature: &Signature,
    ) -> Result<FuncRef, CoreError> {
        if self.signature(existing) == signature {
            Ok(existing)
        } else {
            Err(CoreError::SignatureMismatch(name.to_string()))
        }
    }

    fn intern_signature(&mut self, signature: Signature) -> u32 {
        if let Some(&index) = self.signature_indices.get(&signature) {
            return index;
        }
        let index = self.signatures.len() as u32;
        self.signatures.push(signature.clone());
        self.signature_indices.insert(signature, index);
        index
    }
}
