//! Built-in library
//!
//! The registration tables scripts compile against and the native
//! implementations behind them.

use crate::api::{CastRule, ConstantDef, EventSig, ExtensionDef, Feature, FunctionSig, Registration, ThisOperator, TypeDef};
use crate::api::ApiSurface;
use crate::context::CallContext;
use crate::error::Fault;
use crate::lsl::ast::Type;
use crate::lsl::value::{Value, NULL_KEY};
use crate::lsl::vm::{BuiltinFn, Interrupt};
use lslvm_core::{CompatMode, Rotation, Vector};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Longest message a chat function passes on, in bytes
pub const MAX_CHAT_BYTES: usize = 1024;

/// Built-in function registry
pub struct Builtins {
    functions: HashMap<String, BuiltinFn>,
}

impl Builtins {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Registry with every standard implementation
    pub fn standard() -> Self {
        let mut builtins = Self::new();
        register_chat_functions(&mut builtins);
        register_math_functions(&mut builtins);
        register_string_functions(&mut builtins);
        register_list_functions(&mut builtins);
        register_vector_functions(&mut builtins);
        register_time_functions(&mut builtins);
        register_extension_functions(&mut builtins);
        builtins
    }

    pub fn register(&mut self, name: &str, function: BuiltinFn) {
        self.functions.insert(name.to_string(), function);
    }

    pub fn get(&self, name: &str) -> Option<BuiltinFn> {
        self.functions.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Implementations aligned with the API function table; `None` where
    /// a signature has no implementation
    pub fn bind(&self, api: &ApiSurface) -> Vec<Option<BuiltinFn>> {
        api.functions().iter().map(|sig| self.get(&sig.name)).collect()
    }
}

impl Default for Builtins {
    fn default() -> Self {
        Self::standard()
    }
}

// ========== Registration tables ==========

/// Tables of the standard library
pub fn standard_registration() -> Registration {
    let int = Type::Integer;
    let float = Type::Float;
    let string = Type::String;
    let key = Type::Key;
    let vector = Type::Vector;
    let rotation = Type::Rotation;
    let list = Type::List;
    let void = Type::Void;

    let functions = vec![
        // Chat
        FunctionSig::new("llSay", &[int, string], void),
        FunctionSig::new("llWhisper", &[int, string], void),
        FunctionSig::new("llShout", &[int, string], void),
        FunctionSig::new("llOwnerSay", &[string], void),
        FunctionSig::new("llInstantMessage", &[key, string], void).delay(2.0),
        // Math
        FunctionSig::new("llAbs", &[int], int),
        FunctionSig::new("llFabs", &[float], float),
        FunctionSig::new("llSqrt", &[float], float),
        FunctionSig::new("llPow", &[float, float], float),
        FunctionSig::new("llSin", &[float], float),
        FunctionSig::new("llCos", &[float], float),
        FunctionSig::new("llAtan2", &[float, float], float),
        FunctionSig::new("llFloor", &[float], int),
        FunctionSig::new("llCeil", &[float], int),
        FunctionSig::new("llRound", &[float], int),
        FunctionSig::new("llFrand", &[float], float),
        // Strings
        FunctionSig::new("llStringLength", &[string], int),
        FunctionSig::new("llGetSubString", &[string, int, int], string),
        FunctionSig::new("llDeleteSubString", &[string, int, int], string),
        FunctionSig::new("llInsertString", &[string, int, string], string),
        FunctionSig::new("llSubStringIndex", &[string, string], int),
        FunctionSig::new("llToUpper", &[string], string),
        FunctionSig::new("llToLower", &[string], string),
        FunctionSig::new("llStringTrim", &[string, int], string),
        // Lists
        FunctionSig::new("llGetListLength", &[list], int),
        FunctionSig::new("llList2String", &[list, int], string),
        FunctionSig::new("llList2Integer", &[list, int], int),
        FunctionSig::new("llList2Float", &[list, int], float),
        FunctionSig::new("llList2Key", &[list, int], key),
        FunctionSig::new("llList2List", &[list, int, int], list),
        FunctionSig::new("llDumpList2String", &[list, string], string),
        FunctionSig::new("llCSV2List", &[string], list),
        FunctionSig::new("llList2CSV", &[list], string),
        FunctionSig::new("llGetListEntryType", &[list, int], int),
        // Vectors and rotations
        FunctionSig::new("llVecMag", &[vector], float),
        FunctionSig::new("llVecNorm", &[vector], vector),
        FunctionSig::new("llVecDist", &[vector, vector], float),
        FunctionSig::new("llEuler2Rot", &[vector], rotation),
        // Timing and control
        FunctionSig::new("llSetTimerEvent", &[float], void),
        FunctionSig::new("llSleep", &[float], void),
        FunctionSig::new("llGetTime", &[], float),
        FunctionSig::new("llResetTime", &[], void),
        FunctionSig::new("llGetAndResetTime", &[], float),
        FunctionSig::new("llGetUnixTime", &[], int),
        FunctionSig::new("llResetScript", &[], void),
        // Retired and unsupported
        FunctionSig::new("llSetPrimURL", &[string], void).delay(20.0).deprecated(),
        FunctionSig::new("llRefreshPrimURL", &[], void).delay(20.0).deprecated(),
        FunctionSig::new("llGodLikeRezObject", &[key, vector], void),
        // OpenSim
        FunctionSig::new("osGetScriptEngineName", &[], string).compat(CompatMode::Ossl),
        FunctionSig::new("osFormatString", &[string, list], string).compat(CompatMode::Ossl),
        FunctionSig::new("osIsNpc", &[key], int).compat(CompatMode::Ossl),
        // Aurora library
        FunctionSig::new("aaMax", &[int, int], int).compat(CompatMode::Assl),
        FunctionSig::new("aaMax", &[float, float], float).compat(CompatMode::Assl),
        FunctionSig::new("llSetNamedTimer", &[string, float], void).extension("NamedTimers"),
    ];

    let constant = |name: &str, value: Value| ConstantDef {
        name: name.to_string(),
        value,
        compat: CompatMode::Lsl,
        extension: None,
    };
    let constants = vec![
        constant("TRUE", Value::Integer(1)),
        constant("FALSE", Value::Integer(0)),
        constant("PI", Value::Float(std::f64::consts::PI)),
        constant("TWO_PI", Value::Float(std::f64::consts::TAU)),
        constant("PI_BY_TWO", Value::Float(std::f64::consts::FRAC_PI_2)),
        constant("DEG_TO_RAD", Value::Float(std::f64::consts::PI / 180.0)),
        constant("RAD_TO_DEG", Value::Float(180.0 / std::f64::consts::PI)),
        constant("SQRT2", Value::Float(std::f64::consts::SQRT_2)),
        constant("NULL_KEY", Value::key(NULL_KEY)),
        constant("EOF", Value::string("\n\n\n")),
        constant("ZERO_VECTOR", Value::Vector(Vector::ZERO)),
        constant("ZERO_ROTATION", Value::Rotation(Rotation::IDENTITY)),
        constant("PUBLIC_CHANNEL", Value::Integer(0)),
        constant("DEBUG_CHANNEL", Value::Integer(i32::MAX)),
        constant("TYPE_INVALID", Value::Integer(0)),
        constant("TYPE_INTEGER", Value::Integer(1)),
        constant("TYPE_FLOAT", Value::Integer(2)),
        constant("TYPE_STRING", Value::Integer(3)),
        constant("TYPE_KEY", Value::Integer(4)),
        constant("TYPE_VECTOR", Value::Integer(5)),
        constant("TYPE_ROTATION", Value::Integer(6)),
        constant("STRING_TRIM_HEAD", Value::Integer(1)),
        constant("STRING_TRIM_TAIL", Value::Integer(2)),
        constant("STRING_TRIM", Value::Integer(3)),
    ];

    let event = |name: &str, params: &[Type]| EventSig {
        name: name.to_string(),
        params: params.to_vec(),
        compat: CompatMode::Lsl,
    };
    let events = vec![
        event("state_entry", &[]),
        event("state_exit", &[]),
        event("touch_start", &[int]),
        event("touch", &[int]),
        event("touch_end", &[int]),
        event("timer", &[]),
        event("listen", &[int, string, key, string]),
        event("on_rez", &[int]),
        event("changed", &[int]),
        event("link_message", &[int, int, string, key]),
        event("collision_start", &[int]),
        event("collision", &[int]),
        event("collision_end", &[int]),
        event("dataserver", &[key, string]),
        event("sensor", &[int]),
        event("no_sensor", &[]),
        event("attach", &[key]),
        event("money", &[key, int]),
        event("http_response", &[key, int, list, string]),
        event("run_time_permissions", &[int]),
        event("object_rez", &[key]),
        event("at_target", &[int, vector, vector]),
        event("not_at_target", &[]),
    ];

    let value_type = |name: &str, ty: Type, copy_on_assign: bool, compat: CompatMode| TypeDef {
        name: name.to_string(),
        ty,
        copy_on_assign,
        compat,
    };
    let types = vec![
        value_type("integer", int, false, CompatMode::Lsl),
        value_type("float", float, false, CompatMode::Lsl),
        value_type("string", string, false, CompatMode::Lsl),
        value_type("key", key, false, CompatMode::Lsl),
        value_type("vector", vector, false, CompatMode::Lsl),
        value_type("rotation", rotation, false, CompatMode::Lsl),
        value_type("quaternion", rotation, false, CompatMode::Lsl),
        value_type("list", list, true, CompatMode::Lsl),
        value_type("long", Type::Long, false, CompatMode::Aurora),
    ];

    let cast = |from: Type, to: Type| CastRule { from, to };
    let implicit_casts = vec![
        cast(int, float),
        cast(int, Type::Long),
        cast(string, key),
        cast(key, string),
    ];

    let indexer = |container: Type, ret: Type| ThisOperator {
        container,
        index: int,
        ret,
        compat: CompatMode::Assl,
    };
    let this_operators = vec![
        indexer(list, string),
        indexer(string, string),
        indexer(vector, float),
        indexer(rotation, float),
    ];

    let extension = |name: &str, features: &[Feature], default_in: CompatMode| ExtensionDef {
        name: name.to_string(),
        features: features.to_vec(),
        default_in: Some(default_in),
    };
    let extensions = vec![
        extension("Switch", &[Feature::Switch], CompatMode::Assl),
        extension("BreakContinue", &[Feature::BreakContinue], CompatMode::Assl),
        extension("ForEach", &[Feature::ForEach], CompatMode::Assl),
        extension("Structs", &[Feature::Structs], CompatMode::Aurora),
        extension("StateVariables", &[Feature::StateVariables], CompatMode::Aurora),
        extension("NamedTimers", &[Feature::NamedTimers], CompatMode::Aurora),
        extension("Extern", &[Feature::ExternRpc], CompatMode::Aurora),
    ];

    Registration {
        functions,
        constants,
        events,
        types,
        implicit_casts,
        this_operators,
        extensions,
    }
}

// ========== Argument helpers ==========

fn arg<'v>(args: &'v [Value], index: usize) -> Result<&'v Value, Interrupt> {
    args.get(index)
        .ok_or_else(|| Fault::NullArgument(format!("argument {} is missing", index + 1)).into())
}

fn wrong_type(index: usize, expected: &str, found: &Value) -> Interrupt {
    Fault::Type(format!("argument {} should be {}, found {}", index + 1, expected, found.type_of())).into()
}

fn int_arg(args: &[Value], index: usize) -> Result<i32, Interrupt> {
    match arg(args, index)? {
        Value::Integer(i) => Ok(*i),
        Value::Long(l) => Ok(*l as i32),
        other => Err(wrong_type(index, "an integer", other)),
    }
}

fn float_arg(args: &[Value], index: usize) -> Result<f64, Interrupt> {
    let value = arg(args, index)?;
    value.as_float().ok_or_else(|| wrong_type(index, "a float", value))
}

fn str_arg(args: &[Value], index: usize) -> Result<&str, Interrupt> {
    let value = arg(args, index)?;
    value.as_str().ok_or_else(|| wrong_type(index, "a string", value))
}

fn list_arg(args: &[Value], index: usize) -> Result<&Arc<Vec<Value>>, Interrupt> {
    let value = arg(args, index)?;
    value.as_list().ok_or_else(|| wrong_type(index, "a list", value))
}

fn vector_arg(args: &[Value], index: usize) -> Result<Vector, Interrupt> {
    match arg(args, index)? {
        Value::Vector(v) => Ok(*v),
        other => Err(wrong_type(index, "a vector", other)),
    }
}

/// Mask of the positions `start..=end` selects, LSL style: negative
/// indices count from the end and `start > end` selects both ends
fn range_mask(len: usize, start: i32, end: i32) -> Vec<bool> {
    let n = len as i64;
    let mut s = start as i64;
    let mut e = end as i64;
    if s < 0 {
        s += n;
    }
    if e < 0 {
        e += n;
    }

    let mut mask = vec![false; len];
    if s <= e {
        for i in s.max(0)..=e.min(n - 1) {
            mask[i as usize] = true;
        }
    } else {
        for i in 0..=e.min(n - 1) {
            mask[i as usize] = true;
        }
        for i in s.max(0)..n {
            mask[i as usize] = true;
        }
    }
    mask
}

fn list_entry(items: &[Value], index: i32) -> Option<&Value> {
    let at = if index < 0 { items.len() as i64 + index as i64 } else { index as i64 };
    usize::try_from(at).ok().and_then(|i| items.get(i))
}

fn entry_string(value: &Value) -> String {
    value.to_lsl_string().unwrap_or_default()
}

// ========== Chat ==========

fn register_chat_functions(builtins: &mut Builtins) {
    builtins.register("llSay", builtin_say);
    builtins.register("llWhisper", builtin_say);
    builtins.register("llShout", builtin_say);
    builtins.register("llOwnerSay", builtin_owner_say);
    builtins.register("llInstantMessage", builtin_instant_message);
}

fn clip_chat(message: &str) -> &str {
    if message.len() <= MAX_CHAT_BYTES {
        return message;
    }
    let mut end = MAX_CHAT_BYTES;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

fn builtin_say(ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let channel = int_arg(args, 0)?;
    let message = str_arg(args, 1)?;
    ctx.host.chat(ctx.script, channel, clip_chat(message));
    Ok(Value::Void)
}

fn builtin_owner_say(ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let message = str_arg(args, 0)?;
    ctx.host.chat(ctx.script, 0, clip_chat(message));
    Ok(Value::Void)
}

fn builtin_instant_message(ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let target = str_arg(args, 0)?;
    let message = str_arg(args, 1)?;
    tracing::debug!("{} messages {}", ctx.script, target);
    ctx.host.chat(ctx.script, 0, clip_chat(message));
    Ok(Value::Void)
}

// ========== Math ==========

fn register_math_functions(builtins: &mut Builtins) {
    builtins.register("llAbs", builtin_abs);
    builtins.register("llFabs", |_, args| Ok(Value::Float(float_arg(args, 0)?.abs())));
    builtins.register("llSqrt", builtin_sqrt);
    builtins.register("llPow", |_, args| Ok(Value::Float(float_arg(args, 0)?.powf(float_arg(args, 1)?))));
    builtins.register("llSin", |_, args| Ok(Value::Float(float_arg(args, 0)?.sin())));
    builtins.register("llCos", |_, args| Ok(Value::Float(float_arg(args, 0)?.cos())));
    builtins.register("llAtan2", |_, args| Ok(Value::Float(float_arg(args, 0)?.atan2(float_arg(args, 1)?))));
    builtins.register("llFloor", |_, args| Ok(Value::Integer(float_arg(args, 0)?.floor() as i32)));
    builtins.register("llCeil", |_, args| Ok(Value::Integer(float_arg(args, 0)?.ceil() as i32)));
    builtins.register("llRound", |_, args| Ok(Value::Integer((float_arg(args, 0)? + 0.5).floor() as i32)));
    builtins.register("llFrand", builtin_frand);
}

fn builtin_abs(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    Ok(Value::Integer(int_arg(args, 0)?.wrapping_abs()))
}

fn builtin_sqrt(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let value = float_arg(args, 0)?;
    if value < 0.0 {
        return Err(Fault::Math(format!("llSqrt of negative value {}", value)).into());
    }
    Ok(Value::Float(value.sqrt()))
}

fn builtin_frand(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let max = float_arg(args, 0)?;
    let unit: f64 = rand::thread_rng().gen();
    Ok(Value::Float(unit * max))
}

// ========== Strings ==========

fn register_string_functions(builtins: &mut Builtins) {
    builtins.register("llStringLength", |_, args| {
        Ok(Value::Integer(str_arg(args, 0)?.chars().count() as i32))
    });
    builtins.register("llGetSubString", builtin_get_sub_string);
    builtins.register("llDeleteSubString", builtin_delete_sub_string);
    builtins.register("llInsertString", builtin_insert_string);
    builtins.register("llSubStringIndex", builtin_sub_string_index);
    builtins.register("llToUpper", |_, args| Ok(Value::string(str_arg(args, 0)?.to_uppercase())));
    builtins.register("llToLower", |_, args| Ok(Value::string(str_arg(args, 0)?.to_lowercase())));
    builtins.register("llStringTrim", builtin_string_trim);
}

fn builtin_get_sub_string(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let chars: Vec<char> = str_arg(args, 0)?.chars().collect();
    let mask = range_mask(chars.len(), int_arg(args, 1)?, int_arg(args, 2)?);
    Ok(Value::string(
        chars.iter().zip(mask).filter(|(_, keep)| *keep).map(|(c, _)| c).collect::<String>(),
    ))
}

fn builtin_delete_sub_string(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let chars: Vec<char> = str_arg(args, 0)?.chars().collect();
    let mask = range_mask(chars.len(), int_arg(args, 1)?, int_arg(args, 2)?);
    Ok(Value::string(
        chars.iter().zip(mask).filter(|(_, drop)| !*drop).map(|(c, _)| c).collect::<String>(),
    ))
}

fn builtin_insert_string(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let chars: Vec<char> = str_arg(args, 0)?.chars().collect();
    let at = int_arg(args, 1)?.clamp(0, chars.len() as i32) as usize;
    let insert = str_arg(args, 2)?;
    let mut out: String = chars[..at].iter().collect();
    out.push_str(insert);
    out.extend(&chars[at..]);
    Ok(Value::String(out))
}

fn builtin_sub_string_index(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let haystack = str_arg(args, 0)?;
    let needle = str_arg(args, 1)?;
    let index = haystack
        .find(needle)
        .map(|byte| haystack[..byte].chars().count() as i32)
        .unwrap_or(-1);
    Ok(Value::Integer(index))
}

fn builtin_string_trim(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let text = str_arg(args, 0)?;
    let trimmed = match int_arg(args, 1)? {
        1 => text.trim_start(),
        2 => text.trim_end(),
        3 => text.trim(),
        _ => text,
    };
    Ok(Value::string(trimmed))
}

// ========== Lists ==========

fn register_list_functions(builtins: &mut Builtins) {
    builtins.register("llGetListLength", |_, args| Ok(Value::Integer(list_arg(args, 0)?.len() as i32)));
    builtins.register("llList2String", builtin_list2string);
    builtins.register("llList2Integer", builtin_list2integer);
    builtins.register("llList2Float", builtin_list2float);
    builtins.register("llList2Key", builtin_list2key);
    builtins.register("llList2List", builtin_list2list);
    builtins.register("llDumpList2String", builtin_dump_list2string);
    builtins.register("llCSV2List", builtin_csv2list);
    builtins.register("llList2CSV", builtin_list2csv);
    builtins.register("llGetListEntryType", builtin_list_entry_type);
}

fn builtin_list2string(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let items = list_arg(args, 0)?;
    let entry = list_entry(items, int_arg(args, 1)?);
    Ok(Value::String(entry.map(entry_string).unwrap_or_default()))
}

fn builtin_list2integer(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let items = list_arg(args, 0)?;
    let entry = list_entry(items, int_arg(args, 1)?).and_then(|v| v.cast(Type::Integer));
    Ok(entry.unwrap_or(Value::Integer(0)))
}

fn builtin_list2float(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let items = list_arg(args, 0)?;
    let entry = list_entry(items, int_arg(args, 1)?).and_then(|v| v.cast(Type::Float));
    Ok(entry.unwrap_or(Value::Float(0.0)))
}

fn builtin_list2key(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let items = list_arg(args, 0)?;
    let entry = list_entry(items, int_arg(args, 1)?);
    Ok(Value::Key(entry.map(entry_string).unwrap_or_default()))
}

fn builtin_list2list(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let items = list_arg(args, 0)?;
    let mask = range_mask(items.len(), int_arg(args, 1)?, int_arg(args, 2)?);
    Ok(Value::list(
        items.iter().zip(mask).filter(|(_, keep)| *keep).map(|(v, _)| v.clone()).collect(),
    ))
}

fn builtin_dump_list2string(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let items = list_arg(args, 0)?;
    let separator = str_arg(args, 1)?;
    Ok(Value::String(items.iter().map(entry_string).collect::<Vec<_>>().join(separator)))
}

fn builtin_list2csv(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let items = list_arg(args, 0)?;
    Ok(Value::String(items.iter().map(entry_string).collect::<Vec<_>>().join(", ")))
}

/// Commas inside `<...>` do not split
fn builtin_csv2list(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let text = str_arg(args, 0)?;
    if text.is_empty() {
        return Ok(Value::list(Vec::new()));
    }
    let mut items = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '<' => {
                depth += 1;
                current.push(c);
            }
            '>' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                items.push(Value::string(current.trim()));
                current.clear();
            }
            _ => current.push(c),
        }
    }
    items.push(Value::string(current.trim()));
    Ok(Value::list(items))
}

fn builtin_list_entry_type(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let items = list_arg(args, 0)?;
    let code = list_entry(items, int_arg(args, 1)?).map_or(0, Value::type_code);
    Ok(Value::Integer(code))
}

// ========== Vectors and rotations ==========

fn register_vector_functions(builtins: &mut Builtins) {
    builtins.register("llVecMag", |_, args| Ok(Value::Float(vector_arg(args, 0)?.magnitude())));
    builtins.register("llVecNorm", builtin_vec_norm);
    builtins.register("llVecDist", |_, args| {
        Ok(Value::Float(vector_arg(args, 0)?.sub(vector_arg(args, 1)?).magnitude()))
    });
    builtins.register("llEuler2Rot", builtin_euler2rot);
}

fn builtin_vec_norm(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let v = vector_arg(args, 0)?;
    let mag = v.magnitude();
    if mag == 0.0 {
        return Ok(Value::Vector(Vector::ZERO));
    }
    Ok(Value::Vector(v.scale(1.0 / mag)))
}

fn builtin_euler2rot(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let v = vector_arg(args, 0)?;
    let (sx, cx) = (v.x / 2.0).sin_cos();
    let (sy, cy) = (v.y / 2.0).sin_cos();
    let (sz, cz) = (v.z / 2.0).sin_cos();
    Ok(Value::Rotation(Rotation::new(
        sx * cy * cz + cx * sy * sz,
        cx * sy * cz - sx * cy * sz,
        cx * cy * sz + sx * sy * cz,
        cx * cy * cz - sx * sy * sz,
    )))
}

// ========== Timing and control ==========

fn register_time_functions(builtins: &mut Builtins) {
    builtins.register("llSetTimerEvent", builtin_set_timer_event);
    builtins.register("llSleep", builtin_sleep);
    builtins.register("llGetTime", |ctx, _| Ok(Value::Float(elapsed(ctx))));
    builtins.register("llResetTime", |ctx, _| {
        *ctx.clock = ctx.now;
        Ok(Value::Void)
    });
    builtins.register("llGetAndResetTime", |ctx, _| {
        let seconds = elapsed(ctx);
        *ctx.clock = ctx.now;
        Ok(Value::Float(seconds))
    });
    builtins.register("llGetUnixTime", builtin_unix_time);
    builtins.register("llResetScript", |_, _| Err(Interrupt::Reset));
}

fn elapsed(ctx: &CallContext<'_>) -> f64 {
    ctx.now.saturating_duration_since(*ctx.clock).as_secs_f64()
}

fn builtin_set_timer_event(ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let interval = ctx.timer_interval(float_arg(args, 0)?);
    let now = ctx.now;
    ctx.timers.set_default(interval, now);
    Ok(Value::Void)
}

fn builtin_sleep(ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let seconds = float_arg(args, 0)?;
    if seconds.is_finite() && seconds > 0.0 {
        ctx.sleep = Some(seconds);
    }
    Ok(Value::Void)
}

fn builtin_unix_time(_ctx: &mut CallContext<'_>, _args: &[Value]) -> Result<Value, Interrupt> {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    Ok(Value::Integer(seconds as i32))
}

// ========== OpenSim and Aurora ==========

fn register_extension_functions(builtins: &mut Builtins) {
    builtins.register("osGetScriptEngineName", |_, _| Ok(Value::string("LSLVM")));
    builtins.register("osFormatString", builtin_format_string);
    builtins.register("osIsNpc", |_, _| Ok(Value::Integer(0)));
    builtins.register("aaMax", builtin_max);
    builtins.register("llSetNamedTimer", builtin_set_named_timer);
}

/// `{0}`, `{1}`... replaced by list entries
fn builtin_format_string(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let mut text = str_arg(args, 0)?.to_string();
    for (i, item) in list_arg(args, 1)?.iter().enumerate() {
        text = text.replace(&format!("{{{}}}", i), &entry_string(item));
    }
    Ok(Value::String(text))
}

fn builtin_max(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    match (arg(args, 0)?, arg(args, 1)?) {
        (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(*a.max(b))),
        _ => Ok(Value::Float(float_arg(args, 0)?.max(float_arg(args, 1)?))),
    }
}

fn builtin_set_named_timer(ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value, Interrupt> {
    let name = str_arg(args, 0)?.to_string();
    let interval = ctx.timer_interval(float_arg(args, 1)?);
    let now = ctx.now;
    ctx.timers.set_named(&name, interval, now);
    Ok(Value::Void)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RecordingHost, TimerSet};
    use lslvm_core::ScriptId;
    use std::time::Instant;

    fn call(name: &str, args: &[Value]) -> Result<Value, Interrupt> {
        let host = RecordingHost::new();
        let mut timers = TimerSet::new();
        let mut clock = Instant::now();
        let mut ctx = CallContext {
            script: ScriptId::new(1),
            host: &host,
            timers: &mut timers,
            now: Instant::now(),
            clock: &mut clock,
            min_timer_interval: Duration::from_millis(10),
            sleep: None,
        };
        let function = Builtins::standard().get(name).unwrap();
        function(&mut ctx, args)
    }

    fn s(text: &str) -> Value {
        Value::string(text)
    }

    #[test]
    fn test_every_signature_has_an_implementation() {
        let api = ApiSurface::standard();
        let bound = Builtins::standard().bind(&api);
        let missing: Vec<&str> = api
            .functions()
            .iter()
            .zip(&bound)
            .filter(|(sig, f)| f.is_none() && !sig.deprecated)
            .map(|(sig, _)| sig.name.as_str())
            .collect();
        assert_eq!(missing, vec!["llGodLikeRezObject"]);
    }

    #[test]
    fn test_get_sub_string_ranges() {
        let abc = s("abcdef");
        assert_eq!(call("llGetSubString", &[abc.clone(), Value::Integer(1), Value::Integer(3)]), Ok(s("bcd")));
        assert_eq!(call("llGetSubString", &[abc.clone(), Value::Integer(-2), Value::Integer(-1)]), Ok(s("ef")));
        assert_eq!(call("llGetSubString", &[abc.clone(), Value::Integer(4), Value::Integer(1)]), Ok(s("abef")));
        assert_eq!(call("llDeleteSubString", &[abc, Value::Integer(1), Value::Integer(3)]), Ok(s("aef")));
    }

    #[test]
    fn test_list_accessors() {
        let list = Value::list(vec![Value::Integer(7), Value::Float(1.5), s("12abc")]);
        assert_eq!(call("llList2String", &[list.clone(), Value::Integer(1)]), Ok(s("1.500000")));
        assert_eq!(call("llList2Integer", &[list.clone(), Value::Integer(-1)]), Ok(Value::Integer(12)));
        assert_eq!(call("llList2Float", &[list.clone(), Value::Integer(9)]), Ok(Value::Float(0.0)));
        assert_eq!(call("llGetListEntryType", &[list.clone(), Value::Integer(2)]), Ok(Value::Integer(3)));
        assert_eq!(call("llDumpList2String", &[list, s("|")]), Ok(s("7|1.500000|12abc")));
    }

    #[test]
    fn test_csv_round_trip_keeps_vectors() {
        let parsed = call("llCSV2List", &[s("a, <1, 2, 3>, b")]).unwrap();
        assert_eq!(parsed.as_list().unwrap().len(), 3);
        assert_eq!(call("llList2CSV", &[parsed]), Ok(s("a, <1, 2, 3>, b")));
    }

    #[test]
    fn test_sleep_and_reset() {
        assert_eq!(call("llResetScript", &[]), Err(Interrupt::Reset));
        assert!(matches!(
            call("llSqrt", &[Value::Float(-1.0)]),
            Err(Interrupt::Fault(Fault::Math(_)))
        ));
        assert!(matches!(
            call("llSay", &[Value::Integer(0)]),
            Err(Interrupt::Fault(Fault::NullArgument(_)))
        ));
    }

    #[test]
    fn test_aurora_helpers() {
        assert_eq!(call("aaMax", &[Value::Integer(3), Value::Integer(9)]), Ok(Value::Integer(9)));
        assert_eq!(call("aaMax", &[Value::Float(3.5), Value::Float(-1.0)]), Ok(Value::Float(3.5)));
        assert_eq!(
            call("osFormatString", &[s("{0} and {1}"), Value::list(vec![s("x"), Value::Integer(2)])]),
            Ok(s("x and 2"))
        );
    }

    #[test]
    fn test_chat_is_clipped() {
        let long = "é".repeat(MAX_CHAT_BYTES);
        assert!(clip_chat(&long).len() <= MAX_CHAT_BYTES);
        assert_eq!(clip_chat("short"), "short");
    }
}
