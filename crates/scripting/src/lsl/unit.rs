//! Compiled script units

use crate::api::ApiSurface;
use crate::lsl::ast::Type;
use crate::lsl::bytecode::Chunk;
use crate::lsl::directives::FeatureFlags;
use crate::lsl::value::Value;
use lslvm_core::CompatMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Field layout of a declared structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructLayout {
    pub name: String,
    pub fields: Vec<(String, Type)>,
}

impl StructLayout {
    pub fn field(&self, name: &str) -> Option<(usize, Type)> {
        self.fields
            .iter()
            .position(|(field, _)| field == name)
            .map(|i| (i, self.fields[i].1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Function,
    Event,
    /// Global and state-variable initialization
    Initializer,
}

/// One compiled routine
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionProto {
    pub name: String,
    pub kind: FunctionKind,
    pub params: Vec<Type>,
    pub ret: Type,
    /// Local slots including parameters and temporaries
    pub locals: u16,
    pub chunk: Chunk,
}

/// Global or state variable slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Globals by name, state variables as `state.name`
    pub name: String,
    pub ty: Type,
    pub state: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateInfo {
    pub name: String,
    /// Event key to function index
    pub handlers: HashMap<String, u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExternInfo {
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
    pub rpc: bool,
}

/// Compilation metadata kept with the unit
#[derive(Debug, Clone, PartialEq)]
pub struct UnitMetadata {
    pub mode: CompatMode,
    pub flags: FeatureFlags,
    pub single_precision: bool,
    /// Recorded for hosts; execution does not depend on it
    pub locale: String,
}

/// Executable unit produced by the compiler. Immutable once built; every
/// instance of the script shares it.
#[derive(Debug, Clone)]
pub struct ExecutableUnit {
    pub api: Arc<ApiSurface>,
    pub functions: Vec<FunctionProto>,
    pub fields: Vec<FieldInfo>,
    /// `states[0]` is `default`
    pub states: Vec<StateInfo>,
    pub structs: Vec<StructLayout>,
    pub externs: Vec<ExternInfo>,
    /// Initializer run when an instance is created
    pub live_init: u32,
    /// Initializer run on script reset
    pub reset_init: u32,
    pub metadata: UnitMetadata,
}

impl ExecutableUnit {
    /// Every field at its type default, before initializers run
    pub fn default_globals(&self) -> Vec<Value> {
        self.fields
            .iter()
            .map(|f| Value::default_for(f.ty, &self.structs))
            .collect()
    }

    pub fn function(&self, index: u32) -> Option<&FunctionProto> {
        self.functions.get(index as usize)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn state_index(&self, name: &str) -> Option<u16> {
        self.states.iter().position(|s| s.name == name).map(|i| i as u16)
    }

    pub fn state_name(&self, index: u16) -> &str {
        self.states.get(index as usize).map_or("<unknown>", |s| s.name.as_str())
    }

    /// Handler for `event` in `state`
    pub fn handler(&self, state: u16, event: &str) -> Option<u32> {
        self.states.get(state as usize)?.handlers.get(event).copied()
    }

    /// Disassemble every routine
    pub fn disassemble(&self) -> String {
        self.functions
            .iter()
            .map(|f| f.chunk.disassemble(&f.name))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
