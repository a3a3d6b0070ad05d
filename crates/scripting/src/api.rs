//! API surface
//!
//! Registration data describing what a script may reference: library
//! functions, constants, events, value types, implicit casts, indexer
//! operators and extension bundles. The compiler only ever reads it, so a
//! single `Arc<ApiSurface>` is shared by every compilation and instance.

use crate::lsl::ast::Type;
use crate::lsl::directives::FeatureFlags;
use crate::lsl::value::Value;
use lslvm_core::CompatMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Grammar features an extension bundle can switch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Feature {
    Switch,
    BreakContinue,
    ForEach,
    Structs,
    StateVariables,
    NamedTimers,
    ExternRpc,
}

/// Library function signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSig {
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
    #[serde(default)]
    pub compat: CompatMode,
    /// Extension bundle the function belongs to
    #[serde(default)]
    pub extension: Option<String>,
    /// Seconds the calling script sleeps after the call
    #[serde(default)]
    pub forced_delay: f64,
    #[serde(default)]
    pub energy: f64,
    #[serde(default)]
    pub deprecated: bool,
}

impl FunctionSig {
    pub fn new(name: &str, params: &[Type], ret: Type) -> Self {
        Self {
            name: name.into(),
            params: params.to_vec(),
            ret,
            compat: CompatMode::Lsl,
            extension: None,
            forced_delay: 0.0,
            energy: 10.0,
            deprecated: false,
        }
    }

    pub fn compat(mut self, compat: CompatMode) -> Self {
        self.compat = compat;
        self
    }

    pub fn extension(mut self, name: &str) -> Self {
        self.extension = Some(name.into());
        self
    }

    pub fn delay(mut self, seconds: f64) -> Self {
        self.forced_delay = seconds;
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantDef {
    pub name: String,
    pub value: Value,
    #[serde(default)]
    pub compat: CompatMode,
    #[serde(default)]
    pub extension: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSig {
    pub name: String,
    pub params: Vec<Type>,
    #[serde(default)]
    pub compat: CompatMode,
}

/// A value type scripts may name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: String,
    pub ty: Type,
    /// Assignment copies the value instead of sharing it
    #[serde(default)]
    pub copy_on_assign: bool,
    #[serde(default)]
    pub compat: CompatMode,
}

/// Conversion applied without an explicit cast
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CastRule {
    pub from: Type,
    pub to: Type,
}

/// `container[index]` read operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThisOperator {
    pub container: Type,
    pub index: Type,
    pub ret: Type,
    #[serde(default)]
    pub compat: CompatMode,
}

/// Named opt-in bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionDef {
    pub name: String,
    pub features: Vec<Feature>,
    /// Mode from which the bundle is on without `#!Enable:`
    #[serde(default)]
    pub default_in: Option<CompatMode>,
}

/// Raw registration tables, loadable from JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    #[serde(default)]
    pub functions: Vec<FunctionSig>,
    #[serde(default)]
    pub constants: Vec<ConstantDef>,
    #[serde(default)]
    pub events: Vec<EventSig>,
    #[serde(default)]
    pub types: Vec<TypeDef>,
    #[serde(default)]
    pub implicit_casts: Vec<CastRule>,
    #[serde(default)]
    pub this_operators: Vec<ThisOperator>,
    #[serde(default)]
    pub extensions: Vec<ExtensionDef>,
}

impl Registration {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Append another registration's tables
    pub fn merge(&mut self, other: Registration) {
        self.functions.extend(other.functions);
        self.constants.extend(other.constants);
        self.events.extend(other.events);
        self.types.extend(other.types);
        self.implicit_casts.extend(other.implicit_casts);
        self.this_operators.extend(other.this_operators);
        self.extensions.extend(other.extensions);
    }
}

/// Indexed, immutable view over a [`Registration`]
#[derive(Debug, Clone)]
pub struct ApiSurface {
    registration: Registration,
    functions_by_name: HashMap<String, Vec<usize>>,
    constants_by_name: HashMap<String, usize>,
    events_by_name: HashMap<String, usize>,
    types_by_name: HashMap<String, usize>,
}

impl ApiSurface {
    pub fn new(registration: Registration) -> Self {
        let mut functions_by_name: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, f) in registration.functions.iter().enumerate() {
            functions_by_name.entry(f.name.clone()).or_default().push(i);
        }
        let constants_by_name = index_by_name(registration.constants.iter().map(|c| &c.name));
        let events_by_name = index_by_name(registration.events.iter().map(|e| &e.name));
        let types_by_name = index_by_name(registration.types.iter().map(|t| &t.name));

        tracing::debug!(
            "API surface: {} functions, {} constants, {} events, {} types",
            registration.functions.len(),
            registration.constants.len(),
            registration.events.len(),
            registration.types.len()
        );

        Self {
            registration,
            functions_by_name,
            constants_by_name,
            events_by_name,
            types_by_name,
        }
    }

    /// The built-in library
    pub fn standard() -> Self {
        Self::new(crate::builtins::standard_registration())
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    pub fn functions(&self) -> &[FunctionSig] {
        &self.registration.functions
    }

    pub fn function(&self, index: usize) -> Option<&FunctionSig> {
        self.registration.functions.get(index)
    }

    /// Visible overloads of `name`, with their table indices
    pub fn function_overloads(&self, name: &str, flags: &FeatureFlags) -> Vec<(usize, &FunctionSig)> {
        self.functions_by_name
            .get(name)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&i| (i, &self.registration.functions[i]))
                    .filter(|(_, f)| flags.admits(f.compat, f.extension.as_deref()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn constant(&self, name: &str, flags: &FeatureFlags) -> Option<&ConstantDef> {
        self.constants_by_name
            .get(name)
            .map(|&i| &self.registration.constants[i])
            .filter(|c| flags.admits(c.compat, c.extension.as_deref()))
    }

    pub fn event(&self, name: &str, flags: &FeatureFlags) -> Option<&EventSig> {
        self.events_by_name
            .get(name)
            .map(|&i| &self.registration.events[i])
            .filter(|e| flags.mode.admits(e.compat))
    }

    /// Event signature regardless of mode, for runtime dispatch checks
    pub fn event_signature(&self, name: &str) -> Option<&EventSig> {
        self.events_by_name.get(name).map(|&i| &self.registration.events[i])
    }

    pub fn type_named(&self, name: &str, flags: &FeatureFlags) -> Option<&TypeDef> {
        self.types_by_name
            .get(name)
            .map(|&i| &self.registration.types[i])
            .filter(|t| flags.mode.admits(t.compat))
    }

    /// Whether `ty` belongs to the valid type set in this mode
    pub fn type_admitted(&self, ty: Type, flags: &FeatureFlags) -> bool {
        self.registration
            .types
            .iter()
            .any(|t| t.ty == ty && flags.mode.admits(t.compat))
    }

    pub fn copy_on_assign(&self, ty: Type) -> bool {
        matches!(ty, Type::List | Type::Struct(_))
            || self.registration.types.iter().any(|t| t.ty == ty && t.copy_on_assign)
    }

    /// Whether a name is taken by any API member in any mode
    pub fn is_reserved(&self, name: &str) -> bool {
        self.functions_by_name.contains_key(name)
            || self.constants_by_name.contains_key(name)
            || self.events_by_name.contains_key(name)
            || self.types_by_name.contains_key(name)
    }

    pub fn can_implicitly_cast(&self, from: Type, to: Type) -> bool {
        from == to
            || self
                .registration
                .implicit_casts
                .iter()
                .any(|c| c.from == from && c.to == to)
    }

    pub fn this_operators(&self, flags: &FeatureFlags) -> Vec<&ThisOperator> {
        self.registration
            .this_operators
            .iter()
            .filter(|op| flags.mode.admits(op.compat))
            .collect()
    }

    pub fn extensions(&self) -> &[ExtensionDef] {
        &self.registration.extensions
    }

    /// Extension by name, ignoring case
    pub fn extension(&self, name: &str) -> Option<&ExtensionDef> {
        self.registration
            .extensions
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
    }
}

impl Default for ApiSurface {
    fn default() -> Self {
        Self::standard()
    }
}

fn index_by_name<'a>(names: impl Iterator<Item = &'a String>) -> HashMap<String, usize> {
    let mut map = HashMap::new();
    for (i, name) in names.enumerate() {
        map.entry(name.clone()).or_insert(i);
    }
    map
}
