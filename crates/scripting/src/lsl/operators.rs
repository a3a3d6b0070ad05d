//! Operator signatures, cast rules and their runtime semantics

use crate::error::Fault;
use crate::lsl::ast::{BinaryOp, Type, UnaryOp};
use crate::lsl::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Longest list a script may build
pub const MAX_LIST_LENGTH: usize = 65_536;

/// Longest string a script may build, in bytes
pub const MAX_STRING_BYTES: usize = 1 << 20;

/// One operand-type combination of a binary operator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinarySig {
    pub left: Type,
    pub right: Type,
    pub result: Type,
}

/// Operator signature tables
#[derive(Debug, Clone)]
pub struct OperatorTable {
    binary: HashMap<BinaryOp, Vec<BinarySig>>,
    unary: HashMap<UnaryOp, Vec<(Type, Type)>>,
}

impl OperatorTable {
    pub fn standard() -> Self {
        use BinaryOp::*;
        use Type::*;

        let mut table = Self {
            binary: HashMap::new(),
            unary: HashMap::new(),
        };

        for t in [Integer, Long, Float] {
            for op in [Add, Sub, Mul, Div] {
                table.add(op, t, t, t);
            }
            for op in [Equal, NotEqual, Less, Greater, LessEqual, GreaterEqual] {
                table.add(op, t, t, Integer);
            }
        }
        for t in [Integer, Long] {
            for op in [Mod, BitAnd, BitOr, BitXor, LeftShift, RightShift] {
                table.add(op, t, t, t);
            }
        }
        table.add(And, Integer, Integer, Integer);
        table.add(Or, Integer, Integer, Integer);

        table.add(Add, String, String, String);
        for t in [String, Key] {
            table.add(Equal, t, t, Integer);
            table.add(NotEqual, t, t, Integer);
        }

        table.add(Add, Vector, Vector, Vector);
        table.add(Sub, Vector, Vector, Vector);
        table.add(Mul, Vector, Vector, Float);
        table.add(Mod, Vector, Vector, Vector);
        table.add(Mul, Vector, Float, Vector);
        table.add(Mul, Float, Vector, Vector);
        table.add(Div, Vector, Float, Vector);
        table.add(Mul, Vector, Rotation, Vector);
        table.add(Div, Vector, Rotation, Vector);
        for op in [Add, Sub, Mul, Div] {
            table.add(op, Rotation, Rotation, Rotation);
        }
        for t in [Vector, Rotation] {
            table.add(Equal, t, t, Integer);
            table.add(NotEqual, t, t, Integer);
        }

        table.add(Add, List, List, List);
        for t in [Integer, Long, Float, String, Key, Vector, Rotation] {
            table.add(Add, List, t, List);
            table.add(Add, t, List, List);
        }
        table.add(Equal, List, List, Integer);
        table.add(NotEqual, List, List, Integer);

        for t in [Integer, Long, Float, Vector, Rotation] {
            table.add_unary(UnaryOp::Neg, t, t);
        }
        table.add_unary(UnaryOp::Not, Integer, Integer);
        table.add_unary(UnaryOp::BitNot, Integer, Integer);
        table.add_unary(UnaryOp::BitNot, Long, Long);

        table
    }

    fn add(&mut self, op: BinaryOp, left: Type, right: Type, result: Type) {
        self.binary.entry(op).or_default().push(BinarySig { left, right, result });
    }

    fn add_unary(&mut self, op: UnaryOp, operand: Type, result: Type) {
        self.unary.entry(op).or_default().push((operand, result));
    }

    pub fn binary(&self, op: BinaryOp) -> &[BinarySig] {
        self.binary.get(&op).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn unary(&self, op: UnaryOp) -> &[(Type, Type)] {
        self.unary.get(&op).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Default for OperatorTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Overload choice: an exact match wins outright; otherwise the viable
/// candidate with the most exact parameters, first one on ties. A tie
/// with no exact parameters at all is ambiguous. `Err` carries how many
/// candidates take this many arguments.
pub fn select_overload(
    args: &[Type],
    candidates: &[Vec<Type>],
    can_cast: impl Fn(Type, Type) -> bool,
) -> Result<usize, usize> {
    let same_arity: Vec<usize> = (0..candidates.len())
        .filter(|&i| candidates[i].len() == args.len())
        .collect();

    if let Some(&exact) = same_arity.iter().find(|&&i| candidates[i] == args) {
        return Ok(exact);
    }

    let mut best: Option<(usize, usize)> = None;
    let mut zero_exact = 0;
    for &i in &same_arity {
        let params = &candidates[i];
        if !params.iter().zip(args).all(|(p, a)| can_cast(*a, *p)) {
            continue;
        }
        let exact = params.iter().zip(args).filter(|(p, a)| p == a).count();
        if exact == 0 {
            zero_exact += 1;
        }
        if best.map_or(true, |(_, count)| exact > count) {
            best = Some((i, exact));
        }
    }

    match best {
        Some((_, 0)) if zero_exact > 1 => Err(same_arity.len()),
        Some((i, _)) => Ok(i),
        None => Err(same_arity.len()),
    }
}

/// Whether `(to) value_of_from` is a legal explicit cast
pub fn explicit_cast_allowed(from: Type, to: Type) -> bool {
    use Type::*;
    if from == to {
        return true;
    }
    match (from, to) {
        (Void, _) | (_, Void) | (Struct(_), _) | (_, Struct(_)) => false,
        (_, String) | (_, List) => true,
        (List, _) => false,
        (String, _) => true,
        (Integer | Long | Float, Integer | Long | Float) => true,
        _ => false,
    }
}

fn truth(b: bool) -> Value {
    Value::Integer(b as i32)
}

fn type_mismatch(op: &str, l: &Value, r: &Value) -> Fault {
    Fault::Type(format!("operator '{}' is not defined for {} and {}", op, l.type_of(), r.type_of()))
}

fn check_string(s: String) -> Result<Value, Fault> {
    if s.len() > MAX_STRING_BYTES {
        return Err(Fault::Sandbox(format!("string longer than {} bytes", MAX_STRING_BYTES)));
    }
    Ok(Value::String(s))
}

fn check_list(items: Vec<Value>) -> Result<Value, Fault> {
    if items.len() > MAX_LIST_LENGTH {
        return Err(Fault::Sandbox(format!("list longer than {} entries", MAX_LIST_LENGTH)));
    }
    Ok(Value::List(Arc::new(items)))
}

/// Evaluate a binary operator on operands already cast to a signature
pub fn apply_binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, Fault> {
    use BinaryOp::*;

    let value = match (&left, &right) {
        (Value::Integer(a), Value::Integer(b)) => {
            let (a, b) = (*a, *b);
            match op {
                Add => Value::Integer(a.wrapping_add(b)),
                Sub => Value::Integer(a.wrapping_sub(b)),
                Mul => Value::Integer(a.wrapping_mul(b)),
                Div if b == 0 => return Err(Fault::Math("division by zero".into())),
                Div => Value::Integer(a.wrapping_div(b)),
                Mod if b == 0 => return Err(Fault::Math("modulo by zero".into())),
                Mod => Value::Integer(a.wrapping_rem(b)),
                Equal => truth(a == b),
                NotEqual => truth(a != b),
                Less => truth(a < b),
                Greater => truth(a > b),
                LessEqual => truth(a <= b),
                GreaterEqual => truth(a >= b),
                And => truth(a != 0 && b != 0),
                Or => truth(a != 0 || b != 0),
                BitAnd => Value::Integer(a & b),
                BitOr => Value::Integer(a | b),
                BitXor => Value::Integer(a ^ b),
                LeftShift => Value::Integer(a.wrapping_shl(b as u32)),
                RightShift => Value::Integer(a.wrapping_shr(b as u32)),
            }
        }

        (Value::Long(a), Value::Long(b)) => {
            let (a, b) = (*a, *b);
            match op {
                Add => Value::Long(a.wrapping_add(b)),
                Sub => Value::Long(a.wrapping_sub(b)),
                Mul => Value::Long(a.wrapping_mul(b)),
                Div if b == 0 => return Err(Fault::Math("division by zero".into())),
                Div => Value::Long(a.wrapping_div(b)),
                Mod if b == 0 => return Err(Fault::Math("modulo by zero".into())),
                Mod => Value::Long(a.wrapping_rem(b)),
                Equal => truth(a == b),
                NotEqual => truth(a != b),
                Less => truth(a < b),
                Greater => truth(a > b),
                LessEqual => truth(a <= b),
                GreaterEqual => truth(a >= b),
                BitAnd => Value::Long(a & b),
                BitOr => Value::Long(a | b),
                BitXor => Value::Long(a ^ b),
                LeftShift => Value::Long(a.wrapping_shl(b as u32)),
                RightShift => Value::Long(a.wrapping_shr(b as u32)),
                And | Or => return Err(type_mismatch(op.symbol(), &left, &right)),
            }
        }

        (Value::Float(a), Value::Float(b)) => {
            let (a, b) = (*a, *b);
            match op {
                Add => Value::Float(a + b),
                Sub => Value::Float(a - b),
                Mul => Value::Float(a * b),
                Div if b == 0.0 => return Err(Fault::Math("division by zero".into())),
                Div => Value::Float(a / b),
                Equal => truth(a == b),
                NotEqual => truth(a != b),
                Less => truth(a < b),
                Greater => truth(a > b),
                LessEqual => truth(a <= b),
                GreaterEqual => truth(a >= b),
                _ => return Err(type_mismatch(op.symbol(), &left, &right)),
            }
        }

        (Value::String(a), Value::String(b)) | (Value::Key(a), Value::Key(b)) => match op {
            Add if matches!(left, Value::String(_)) => check_string(format!("{}{}", a, b))?,
            Equal => truth(a == b),
            NotEqual => truth(a != b),
            _ => return Err(type_mismatch(op.symbol(), &left, &right)),
        },

        (Value::Vector(a), Value::Vector(b)) => match op {
            Add => Value::Vector(a.add(*b)),
            Sub => Value::Vector(a.sub(*b)),
            Mul => Value::Float(a.dot(*b)),
            Mod => Value::Vector(a.cross(*b)),
            Equal => truth(a == b),
            NotEqual => truth(a != b),
            _ => return Err(type_mismatch(op.symbol(), &left, &right)),
        },
        (Value::Vector(v), Value::Float(f)) => match op {
            Mul => Value::Vector(v.scale(*f)),
            Div if *f == 0.0 => return Err(Fault::Math("division by zero".into())),
            Div => Value::Vector(v.scale(1.0 / f)),
            _ => return Err(type_mismatch(op.symbol(), &left, &right)),
        },
        (Value::Float(f), Value::Vector(v)) if op == Mul => Value::Vector(v.scale(*f)),
        (Value::Vector(v), Value::Rotation(r)) => match op {
            Mul => Value::Vector(v.rotate(*r)),
            Div => Value::Vector(v.rotate(r.conjugate())),
            _ => return Err(type_mismatch(op.symbol(), &left, &right)),
        },

        (Value::Rotation(a), Value::Rotation(b)) => match op {
            Add => Value::Rotation(a.add(*b)),
            Sub => Value::Rotation(a.sub(*b)),
            Mul => Value::Rotation(a.compose(*b)),
            Div => Value::Rotation(a.compose_inverse(*b)),
            Equal => truth(a == b),
            NotEqual => truth(a != b),
            _ => return Err(type_mismatch(op.symbol(), &left, &right)),
        },

        // List equality compares lengths; `!=` yields the length difference
        (Value::List(a), Value::List(b)) => match op {
            Add => {
                let mut items = Vec::with_capacity(a.len() + b.len());
                items.extend(a.iter().cloned());
                items.extend(b.iter().cloned());
                check_list(items)?
            }
            Equal => truth(a.len() == b.len()),
            NotEqual => Value::Integer(a.len() as i32 - b.len() as i32),
            _ => return Err(type_mismatch(op.symbol(), &left, &right)),
        },
        (Value::List(items), item) if op == Add => {
            let mut joined = Vec::with_capacity(items.len() + 1);
            joined.extend(items.iter().cloned());
            joined.push(item.clone());
            check_list(joined)?
        }
        (item, Value::List(items)) if op == Add => {
            let mut joined = Vec::with_capacity(items.len() + 1);
            joined.push(item.clone());
            joined.extend(items.iter().cloned());
            check_list(joined)?
        }

        _ => return Err(type_mismatch(op.symbol(), &left, &right)),
    };

    Ok(value)
}

pub fn apply_unary(op: UnaryOp, operand: Value) -> Result<Value, Fault> {
    let value = match (op, &operand) {
        (UnaryOp::Neg, Value::Integer(i)) => Value::Integer(i.wrapping_neg()),
        (UnaryOp::Neg, Value::Long(l)) => Value::Long(l.wrapping_neg()),
        (UnaryOp::Neg, Value::Float(f)) => Value::Float(-f),
        (UnaryOp::Neg, Value::Vector(v)) => Value::Vector(v.neg()),
        (UnaryOp::Neg, Value::Rotation(r)) => Value::Rotation(r.neg()),
        (UnaryOp::Not, Value::Integer(i)) => truth(*i == 0),
        (UnaryOp::BitNot, Value::Integer(i)) => Value::Integer(!i),
        (UnaryOp::BitNot, Value::Long(l)) => Value::Long(!l),
        _ => {
            return Err(Fault::Type(format!(
                "operator '{}' is not defined for {}",
                op.symbol(),
                operand.type_of()
            )))
        }
    };
    Ok(value)
}

/// Build a list value, enforcing the sandbox length limit
pub fn make_list(items: Vec<Value>) -> Result<Value, Fault> {
    check_list(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lslvm_core::Vector;

    fn sig(types: &[Type]) -> Vec<Type> {
        types.to_vec()
    }

    fn widen(from: Type, to: Type) -> bool {
        from == to || (from == Type::Integer && to == Type::Float)
    }

    #[test]
    fn test_exact_overload_wins() {
        let candidates = vec![sig(&[Type::Float, Type::Float]), sig(&[Type::Integer, Type::Integer])];
        assert_eq!(select_overload(&[Type::Integer, Type::Integer], &candidates, widen), Ok(1));
    }

    #[test]
    fn test_castable_overload_prefers_more_exact() {
        let candidates = vec![sig(&[Type::Float, Type::Float]), sig(&[Type::Integer, Type::Float])];
        assert_eq!(select_overload(&[Type::Integer, Type::Integer], &candidates, widen), Ok(1));
    }

    #[test]
    fn test_zero_exact_tie_is_ambiguous() {
        let candidates = vec![sig(&[Type::Float]), sig(&[Type::Float])];
        assert_eq!(select_overload(&[Type::Integer], &candidates, widen), Err(2));
        assert_eq!(select_overload(&[Type::String], &candidates, widen), Err(2));
        assert_eq!(select_overload(&[Type::Integer, Type::Integer], &candidates, widen), Err(0));
    }

    #[test]
    fn test_explicit_casts() {
        assert!(explicit_cast_allowed(Type::String, Type::Vector));
        assert!(explicit_cast_allowed(Type::Float, Type::Integer));
        assert!(explicit_cast_allowed(Type::Rotation, Type::List));
        assert!(!explicit_cast_allowed(Type::List, Type::Integer));
        assert!(!explicit_cast_allowed(Type::Vector, Type::Key));
    }

    #[test]
    fn test_integer_semantics() {
        assert_eq!(
            apply_binary(BinaryOp::Add, Value::Integer(i32::MAX), Value::Integer(1)).unwrap(),
            Value::Integer(i32::MIN)
        );
        assert_eq!(apply_binary(BinaryOp::Div, Value::Integer(7), Value::Integer(-2)).unwrap(), Value::Integer(-3));
        assert!(matches!(
            apply_binary(BinaryOp::Div, Value::Integer(1), Value::Integer(0)),
            Err(Fault::Math(_))
        ));
    }

    #[test]
    fn test_list_semantics() {
        let a = Value::list(vec![Value::Integer(1), Value::Integer(2)]);
        let b = Value::list(vec![Value::Integer(3)]);
        assert_eq!(apply_binary(BinaryOp::NotEqual, a.clone(), b.clone()).unwrap(), Value::Integer(1));
        let joined = apply_binary(BinaryOp::Add, a, Value::string("x")).unwrap();
        assert_eq!(joined.as_list().unwrap().len(), 3);
    }

    #[test]
    fn test_vector_semantics() {
        let x = Value::Vector(Vector::new(1.0, 0.0, 0.0));
        let y = Value::Vector(Vector::new(0.0, 1.0, 0.0));
        assert_eq!(apply_binary(BinaryOp::Mul, x.clone(), y.clone()).unwrap(), Value::Float(0.0));
        assert_eq!(
            apply_binary(BinaryOp::Mod, x, y).unwrap(),
            Value::Vector(Vector::new(0.0, 0.0, 1.0))
        );
    }

    #[test]
    fn test_table_covers_mixed_vector_scaling() {
        let table = OperatorTable::standard();
        assert!(table
            .binary(BinaryOp::Mul)
            .iter()
            .any(|s| s.left == Type::Float && s.right == Type::Vector));
        assert_eq!(table.unary(UnaryOp::Not).len(), 1);
    }
}
