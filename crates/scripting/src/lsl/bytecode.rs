//! LSL Bytecode
//!
//! Instruction set and code chunks executed by the VM.

use crate::lsl::ast::{BinaryOp, Type, UnaryOp};
use crate::lsl::value::Value;

/// VM instructions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction {
    // Constants and stack
    Const(u32), // Push constant from the chunk pool
    Pop,
    Dup,

    // Variables
    LoadLocal(u16),
    StoreLocal(u16), // Pops
    LoadGlobal(u32),
    StoreGlobal(u32), // Pops

    // Conversions
    Cast(Type),
    DeepCopy,

    // Operators
    Binary(BinaryOp),
    Unary(UnaryOp),

    // Aggregates
    MakeList(u16),
    MakeVector,
    MakeRotation,
    GetComponent(u8),
    SetComponent(u8), // aggregate, value -> aggregate'
    Index(Type),      // container, index -> element as type
    ListLength,
    ListElement(Type), // list, index -> element cast to type

    // Calls
    Call { function: u32, argc: u16 },
    CallBuiltin { builtin: u32, argc: u16 },
    CallExtern { index: u32, argc: u16 },

    // Control flow
    Jump(u32),
    JumpIfFalse(u32), // Pops condition
    JumpIfTrue(u32),  // Pops condition
    Return,
    ReturnValue,
    ChangeState(u16),
}

impl Instruction {
    /// Jump target, if this instruction has one
    pub fn target(&self) -> Option<u32> {
        match self {
            Instruction::Jump(t) | Instruction::JumpIfFalse(t) | Instruction::JumpIfTrue(t) => Some(*t),
            _ => None,
        }
    }

    fn with_target(self, target: u32) -> Instruction {
        match self {
            Instruction::Jump(_) => Instruction::Jump(target),
            Instruction::JumpIfFalse(_) => Instruction::JumpIfFalse(target),
            Instruction::JumpIfTrue(_) => Instruction::JumpIfTrue(target),
            other => other,
        }
    }
}

/// Bytecode chunk of one function
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    /// Instructions
    pub code: Vec<Instruction>,

    /// Constant pool
    pub constants: Vec<Value>,

    /// Source line per instruction
    pub lines: Vec<usize>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an instruction, returning its position
    pub fn write(&mut self, instruction: Instruction, line: usize) -> usize {
        self.code.push(instruction);
        self.lines.push(line);
        self.code.len() - 1
    }

    /// Append a resolved fragment, all attributed to one line
    pub fn extend(&mut self, fragment: &[Instruction], line: usize) {
        for instruction in fragment {
            self.write(*instruction, line);
        }
    }

    /// Add a constant to the pool, reusing an identical entry
    pub fn add_constant(&mut self, value: Value) -> u32 {
        if let Some(existing) = self.constants.iter().position(|c| same_constant(c, &value)) {
            return existing as u32;
        }
        self.constants.push(value);
        (self.constants.len() - 1) as u32
    }

    /// Position the next instruction will occupy
    pub fn position(&self) -> u32 {
        self.code.len() as u32
    }

    /// Point the jump at `at` to `target`
    pub fn patch(&mut self, at: usize, target: u32) {
        if let Some(slot) = self.code.get_mut(at) {
            *slot = slot.with_target(target);
        }
    }

    /// Disassemble the chunk for debugging
    pub fn disassemble(&self, name: &str) -> String {
        let mut output = format!("== {} ==\n", name);
        for (offset, instruction) in self.code.iter().enumerate() {
            let line = self.lines.get(offset).copied().unwrap_or(0);
            let detail = match instruction {
                Instruction::Const(idx) => self
                    .constants
                    .get(*idx as usize)
                    .map(|c| format!("Const({}) ; {:?}", idx, c))
                    .unwrap_or_else(|| format!("Const({}) ; <missing>", idx)),
                other => format!("{:?}", other),
            };
            output.push_str(&format!("{:04} {:>4} {}\n", offset, line, detail));
        }
        output
    }
}

/// `-0.0` and `0.0` compare equal but must stay separate pool entries
fn same_constant(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_are_pooled() {
        let mut chunk = Chunk::new();
        let a = chunk.add_constant(Value::Integer(7));
        let b = chunk.add_constant(Value::Integer(7));
        let c = chunk.add_constant(Value::Float(0.0));
        let d = chunk.add_constant(Value::Float(-0.0));
        assert_eq!(a, b);
        assert_ne!(c, d);
    }

    #[test]
    fn test_patch_jump() {
        let mut chunk = Chunk::new();
        let jump = chunk.write(Instruction::JumpIfFalse(0), 1);
        chunk.write(Instruction::Pop, 1);
        chunk.patch(jump, chunk.position());
        assert_eq!(chunk.code[jump], Instruction::JumpIfFalse(2));
        assert!(chunk.disassemble("test").contains("JumpIfFalse(2)"));
    }
}
