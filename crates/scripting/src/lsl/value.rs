//! Runtime values
//!
//! Lists and structures share their storage through `Arc` and copy on
//! write, so handing a value to another variable is cheap and never
//! aliases a later mutation.

use crate::lsl::ast::Type;
use crate::lsl::unit::StructLayout;
use lslvm_core::{Rotation, Vector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The all-zero key
pub const NULL_KEY: &str = "00000000-0000-0000-0000-000000000000";

/// Runtime value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Void,
    Integer(i32),
    Long(i64),
    Float(f64),
    String(String),
    Key(String),
    Vector(Vector),
    Rotation(Rotation),
    List(Arc<Vec<Value>>),
    Struct(u16, Arc<Vec<Value>>),
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Arc::new(items))
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::String(s.into())
    }

    pub fn key(s: impl Into<String>) -> Value {
        Value::Key(s.into())
    }

    pub fn type_of(&self) -> Type {
        match self {
            Value::Void => Type::Void,
            Value::Integer(_) => Type::Integer,
            Value::Long(_) => Type::Long,
            Value::Float(_) => Type::Float,
            Value::String(_) => Type::String,
            Value::Key(_) => Type::Key,
            Value::Vector(_) => Type::Vector,
            Value::Rotation(_) => Type::Rotation,
            Value::List(_) => Type::List,
            Value::Struct(id, _) => Type::Struct(*id),
        }
    }

    /// Default value a declaration without initializer receives
    pub fn default_for(ty: Type, structs: &[StructLayout]) -> Value {
        match ty {
            Type::Void => Value::Void,
            Type::Integer => Value::Integer(0),
            Type::Long => Value::Long(0),
            Type::Float => Value::Float(0.0),
            Type::String => Value::String(String::new()),
            Type::Key => Value::Key(String::new()),
            Type::Vector => Value::Vector(Vector::ZERO),
            Type::Rotation => Value::Rotation(Rotation::IDENTITY),
            Type::List => Value::list(Vec::new()),
            Type::Struct(id) => {
                let fields = structs
                    .get(id as usize)
                    .map(|layout| {
                        layout
                            .fields
                            .iter()
                            .map(|(_, field_ty)| Value::default_for(*field_ty, structs))
                            .collect()
                    })
                    .unwrap_or_default();
                Value::Struct(id, Arc::new(fields))
            }
        }
    }

    /// Condition truthiness
    pub fn is_true(&self) -> bool {
        match self {
            Value::Void => false,
            Value::Integer(i) => *i != 0,
            Value::Long(l) => *l != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Key(k) => is_valid_key(k),
            Value::Vector(v) => *v != Vector::ZERO,
            Value::Rotation(r) => *r != Rotation::IDENTITY,
            Value::List(items) => !items.is_empty(),
            Value::Struct(_, _) => true,
        }
    }

    /// Independent copy of aggregate storage
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::List(items) => Value::List(Arc::new(items.iter().map(Value::deep_copy).collect())),
            Value::Struct(id, fields) => {
                Value::Struct(*id, Arc::new(fields.iter().map(Value::deep_copy).collect()))
            }
            other => other.clone(),
        }
    }

    pub fn as_integer(&self) -> Option<i32> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Key(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Arc<Vec<Value>>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Conversion for an explicit `(type)` cast or an implicit widening.
    /// Returns `None` when the conversion does not exist.
    pub fn cast(&self, to: Type) -> Option<Value> {
        if self.type_of() == to {
            return Some(self.clone());
        }

        let converted = match (self, to) {
            (_, Type::String) => Value::String(self.to_lsl_string()?),
            (Value::List(_), _) => return None,
            (_, Type::List) => Value::list(vec![self.clone()]),

            (Value::Integer(i), Type::Float) => Value::Float(*i as f64),
            (Value::Integer(i), Type::Long) => Value::Long(*i as i64),
            (Value::Long(l), Type::Integer) => Value::Integer(*l as i32),
            (Value::Long(l), Type::Float) => Value::Float(*l as f64),
            (Value::Float(f), Type::Integer) => Value::Integer(float_to_integer(*f)),
            (Value::Float(f), Type::Long) => Value::Long(*f as i64),

            (Value::String(s), Type::Integer) => Value::Integer(parse_integer_prefix(s)),
            (Value::String(s), Type::Long) => Value::Long(parse_long_prefix(s)),
            (Value::String(s), Type::Float) => Value::Float(parse_float_prefix(s)),
            (Value::String(s), Type::Key) => Value::Key(s.clone()),
            (Value::String(s), Type::Vector) => Value::Vector(Vector::parse(s).unwrap_or(Vector::ZERO)),
            (Value::String(s), Type::Rotation) => {
                Value::Rotation(Rotation::parse(s).unwrap_or(Rotation::IDENTITY))
            }

            _ => return None,
        };
        Some(converted)
    }

    /// String form used by `(string)` casts and list concatenation
    pub fn to_lsl_string(&self) -> Option<String> {
        let s = match self {
            Value::Void | Value::Struct(_, _) => return None,
            Value::Integer(i) => i.to_string(),
            Value::Long(l) => l.to_string(),
            Value::Float(f) => format!("{:.6}", f),
            Value::String(s) | Value::Key(s) => s.clone(),
            Value::Vector(v) => v.to_string(),
            Value::Rotation(r) => r.to_string(),
            Value::List(items) => {
                let mut out = String::new();
                for item in items.iter() {
                    out.push_str(&item.to_lsl_string()?);
                }
                out
            }
        };
        Some(s)
    }

    /// Entry type code reported by `llGetListEntryType`
    pub fn type_code(&self) -> i32 {
        match self {
            Value::Integer(_) | Value::Long(_) => 1,
            Value::Float(_) => 2,
            Value::String(_) => 3,
            Value::Key(_) => 4,
            Value::Vector(_) => 5,
            Value::Rotation(_) => 6,
            _ => 0,
        }
    }

    /// Round float payloads through single precision
    pub fn to_single_precision(self) -> Value {
        match self {
            Value::Float(f) => Value::Float(round_single(f)),
            Value::Vector(v) => Value::Vector(Vector::new(round_single(v.x), round_single(v.y), round_single(v.z))),
            Value::Rotation(r) => Value::Rotation(Rotation::new(
                round_single(r.x),
                round_single(r.y),
                round_single(r.z),
                round_single(r.s),
            )),
            other => other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => f.write_str("<void>"),
            Value::Struct(id, fields) => {
                write!(f, "struct#{} {{", id)?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                f.write_str("}")
            }
            other => f.write_str(&other.to_lsl_string().unwrap_or_default()),
        }
    }
}

pub fn round_single(f: f64) -> f64 {
    f as f32 as f64
}

/// Keys are true when they are well formed and not the null key
pub fn is_valid_key(key: &str) -> bool {
    key.len() == 36 && key != NULL_KEY && key.chars().all(|c| c == '-' || c.is_ascii_hexdigit())
}

fn float_to_integer(f: f64) -> i32 {
    if f.is_nan() || f >= 2147483648.0 || f < -2147483648.0 {
        i32::MIN
    } else {
        f.trunc() as i32
    }
}

/// Leading integer of a string: optional sign, decimal or `0x` hex digits
pub fn parse_integer_prefix(text: &str) -> i32 {
    parse_long_prefix(text) as i32
}

pub fn parse_long_prefix(text: &str) -> i64 {
    let s = text.trim_start();
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let (radix, digits) = match rest.get(..2) {
        Some("0x") | Some("0X") => (16, &rest[2..]),
        _ => (10, rest),
    };

    let end = digits
        .char_indices()
        .find(|(_, c)| !c.is_digit(radix))
        .map(|(i, _)| i)
        .unwrap_or(digits.len());

    let magnitude = digits[..end]
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0i64, |acc, d| acc.wrapping_mul(radix as i64).wrapping_add(d as i64));

    if negative {
        magnitude.wrapping_neg()
    } else {
        magnitude
    }
}

/// Leading float of a string, `0.0` when there is none
pub fn parse_float_prefix(text: &str) -> f64 {
    let s = text.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'-') | Some(b'+')) {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end == digits_start {
        return 0.0;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'-') | Some(b'+')) {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }

    s[..end].parse().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_casts() {
        let v = Value::string("  42abc");
        assert_eq!(v.cast(Type::Integer), Some(Value::Integer(42)));
        assert_eq!(Value::string("0x1F").cast(Type::Integer), Some(Value::Integer(31)));
        assert_eq!(Value::string("-2.5e1x").cast(Type::Float), Some(Value::Float(-25.0)));
        assert_eq!(Value::string("pear").cast(Type::Float), Some(Value::Float(0.0)));
    }

    #[test]
    fn test_to_string_forms() {
        assert_eq!(Value::Float(1.5).to_lsl_string().unwrap(), "1.500000");
        let list = Value::list(vec![Value::Integer(1), Value::string("a"), Value::Float(2.0)]);
        assert_eq!(list.cast(Type::String), Some(Value::string("1a2.000000")));
    }

    #[test]
    fn test_list_cannot_cast_to_scalar() {
        assert_eq!(Value::list(vec![]).cast(Type::Integer), None);
        assert_eq!(Value::Integer(3).cast(Type::List), Some(Value::list(vec![Value::Integer(3)])));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::key(NULL_KEY).is_true());
        assert!(Value::key("a2e76fcd-9360-4f6d-a924-000000000003").is_true());
        assert!(!Value::Rotation(Rotation::IDENTITY).is_true());
        assert!(Value::string("x").is_true());
    }

    #[test]
    fn test_float_to_integer_truncates() {
        assert_eq!(Value::Float(-2.7).cast(Type::Integer), Some(Value::Integer(-2)));
        assert_eq!(Value::Float(1e20).cast(Type::Integer), Some(Value::Integer(i32::MIN)));
    }

    #[test]
    fn test_deep_copy_detaches_storage() {
        let original = Value::list(vec![Value::Integer(1)]);
        let copy = original.deep_copy();
        if let (Value::List(a), Value::List(b)) = (&original, &copy) {
            assert!(!Arc::ptr_eq(a, b));
        }
        assert_eq!(original, copy);
    }
}
