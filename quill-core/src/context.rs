//! Target configuration and type descriptors for wasm code generation.

use wasm_encoder::ValType;

use crate::types::{Type, TypeKind};
use crate::unit::Signature;

/// Settings shared by every stage that emits into a code unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetContext {
    /// Import module name under which runtime functions are declared.
    pub runtime_module: String,
    /// Import module name for user functions supplied by the embedder.
    pub host_module: String,
    /// Linear-memory offset of the first data segment byte.
    pub data_base: u32,
    /// Export name of the compiled entry function.
    pub entry_name: String,
}

impl Default for TargetContext {
    fn default() -> Self {
        TargetContext {
            runtime_module: "quill_rt".to_string(),
            host_module: "env".to_string(),
            data_base: 16,
            entry_name: "main".to_string(),
        }
    }
}

impl TargetContext {
    pub fn with_runtime_module(mut self, module: impl Into<String>) -> Self {
        self.runtime_module = module.into();
        self
    }

    pub fn with_host_module(mut self, module: impl Into<String>) -> Self {
        self.host_module = module.into();
        self
    }

    pub fn with_data_base(mut self, data_base: u32) -> Self {
        self.data_base = data_base;
        self
    }

    pub fn with_entry_name(mut self, name: impl Into<String>) -> Self {
        self.entry_name = name.into();
        self
    }

    pub fn integer(&self) -> ValType {
        ValType::I64
    }

    pub fn boolean(&self) -> ValType {
        ValType::I32
    }

    /// Linear-memory addresses and runtime handles.
    pub fn pointer(&self) -> ValType {
        ValType::I32
    }

    /// Value representation of a language type; `None` for types that
    /// have no runtime value.
    pub fn value_type(&self, ty: Type) -> Option<ValType> {
        match ty.kind() {
            TypeKind::Integer => Some(self.integer()),
            TypeKind::Boolean => Some(self.boolean()),
            TypeKind::String | TypeKind::Array { .. } => Some(self.pointer()),
            TypeKind::Void | TypeKind::Unknown => None,
        }
    }

    pub fn signature(
        &self,
        params: impl IntoIterator<Item = ValType>,
        results: impl IntoIterator<Item = ValType>,
    ) -> Signature {
        Signature {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }
}
