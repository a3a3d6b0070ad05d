//! LSL Abstract Syntax Tree
//!
//! Declaration set, statement and expression nodes produced by the parser.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Script value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Type {
    Void,
    Integer,
    Long,
    Float,
    String,
    Key,
    Vector,
    Rotation,
    List,
    /// User structure, by declaration index
    Struct(u16),
}

impl Type {
    /// Built-in type for a keyword (`quaternion` is an alias of `rotation`)
    pub fn from_keyword(word: &str) -> Option<Type> {
        match word {
            "integer" => Some(Type::Integer),
            "long" => Some(Type::Long),
            "float" => Some(Type::Float),
            "string" => Some(Type::String),
            "key" => Some(Type::Key),
            "vector" => Some(Type::Vector),
            "rotation" | "quaternion" => Some(Type::Rotation),
            "list" => Some(Type::List),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Type::Void => "void",
            Type::Integer => "integer",
            Type::Long => "long",
            Type::Float => "float",
            Type::String => "string",
            Type::Key => "key",
            Type::Vector => "vector",
            Type::Rotation => "rotation",
            Type::List => "list",
            Type::Struct(_) => "struct",
        }
    }

    /// Types that support `++`, `--` and arithmetic on components
    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Integer | Type::Long | Type::Float)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Struct(id) => write!(f, "struct#{}", id),
            other => f.write_str(other.name()),
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Comparison
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,

    // Logical (both operands always evaluated)
    And,
    Or,

    // Bitwise
    BitAnd,
    BitOr,
    BitXor,
    LeftShift,
    RightShift,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::Greater => ">",
            BinaryOp::LessEqual => "<=",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::LeftShift => "<<",
            BinaryOp::RightShift => ">>",
        }
    }

    /// Operator for a compound assignment token such as `+=`
    pub fn from_compound(token: &str) -> Option<BinaryOp> {
        match token {
            "+=" => Some(BinaryOp::Add),
            "-=" => Some(BinaryOp::Sub),
            "*=" => Some(BinaryOp::Mul),
            "/=" => Some(BinaryOp::Div),
            "%=" => Some(BinaryOp::Mod),
            "&=" => Some(BinaryOp::BitAnd),
            "|=" => Some(BinaryOp::BitOr),
            "^=" => Some(BinaryOp::BitXor),
            "<<=" => Some(BinaryOp::LeftShift),
            ">>=" => Some(BinaryOp::RightShift),
            _ => None,
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,    // -
    Not,    // !
    BitNot, // ~
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
        }
    }
}

/// Expression node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    // Literals
    Integer(i32),
    Long(i64),
    Float(f64),
    String(String),

    /// `<x, y, z>`
    Vector(Vec<Expr>),

    /// `<x, y, z, s>`
    Rotation(Vec<Expr>),

    /// `[a, b, c]`
    List(Vec<Expr>),

    /// Variable or constant reference
    Variable(String),

    /// Function call
    Call { name: String, args: Vec<Expr> },

    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    Unary { op: UnaryOp, operand: Box<Expr> },

    /// `(type) expr`
    Cast { ty: Type, operand: Box<Expr> },

    /// `++x`, `x++`, `--x`, `x--`
    IncDec {
        target: Box<Expr>,
        increment: bool,
        prefix: bool,
    },

    /// `target = value` or `target op= value`
    Assign {
        target: Box<Expr>,
        op: Option<BinaryOp>,
        value: Box<Expr>,
    },

    /// Component or field access (`v.x`, `s.name`)
    Member { object: Box<Expr>, name: String },

    /// `object[index]`
    Index { object: Box<Expr>, index: Box<Expr> },
}

/// A statement with its source line
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

impl Stmt {
    pub fn new(kind: StmtKind, line: usize) -> Self {
        Self { kind, line }
    }
}

/// Statement kinds
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Expression statement
    Expr(Expr),

    /// Local variable declaration
    Local {
        ty: Type,
        name: String,
        init: Option<Expr>,
    },

    If {
        condition: Expr,
        then_branch: Block,
        else_branch: Option<Block>,
    },

    While { condition: Expr, body: Block },

    DoWhile { body: Block, condition: Expr },

    For {
        init: Vec<Expr>,
        condition: Option<Expr>,
        step: Vec<Expr>,
        body: Block,
    },

    /// `foreach ([type] name in expr)`
    ForEach {
        declared: Option<Type>,
        variable: String,
        iterable: Expr,
        body: Block,
    },

    Switch { subject: Expr, body: Block },

    /// `case expr:`
    Case(Expr),

    /// `default:`
    DefaultCase,

    /// `break [depth];`
    Break(u32),

    /// `continue [depth];`
    Continue(u32),

    Return(Option<Expr>),

    /// `jump label;`
    Jump(String),

    /// `@label;`
    Label(String),

    /// `state name;`
    StateChange(String),

    Block(Block),

    Empty,
}

/// Statement block; `implicit` marks a single statement that followed a
/// control header without braces
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub implicit: bool,
}

/// Function or event parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

/// Global or state variable
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDecl {
    pub name: String,
    pub ty: Type,
    pub init: Option<Expr>,
    pub line: usize,
}

/// User function
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub ret: Type,
    pub params: Vec<Param>,
    pub body: Block,
    pub line: usize,
}

/// Event handler inside a state
#[derive(Debug, Clone, PartialEq)]
pub struct EventDecl {
    /// Dispatch key; named timers use [`named_timer_event`]
    pub name: String,
    pub params: Vec<Param>,
    pub body: Block,
    pub line: usize,
}

/// Event dispatch key for the named timer `name`
pub fn named_timer_event(name: &str) -> String {
    format!("timer:{}", name)
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateDecl {
    pub name: String,
    pub variables: Vec<VariableDecl>,
    pub events: Vec<EventDecl>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<(String, Type)>,
    pub line: usize,
}

/// External function routed through the host
#[derive(Debug, Clone, PartialEq)]
pub struct ExternDecl {
    pub name: String,
    pub ret: Type,
    pub params: Vec<Type>,
    /// Declared with `rpc` instead of `extern`
    pub rpc: bool,
    pub line: usize,
}

/// Everything the parser found at top level. The default state is always
/// `states[0]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Declarations {
    pub globals: Vec<VariableDecl>,
    pub functions: Vec<FunctionDecl>,
    pub states: Vec<StateDecl>,
    pub structs: Vec<StructDecl>,
    pub externs: Vec<ExternDecl>,
}

impl Declarations {
    pub fn state(&self, name: &str) -> Option<usize> {
        self.states.iter().position(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_keywords() {
        assert_eq!(Type::from_keyword("quaternion"), Some(Type::Rotation));
        assert_eq!(Type::from_keyword("list"), Some(Type::List));
        assert_eq!(Type::from_keyword("int"), None);
        assert_eq!(Type::Struct(2).to_string(), "struct#2");
    }

    #[test]
    fn test_compound_operators() {
        assert_eq!(BinaryOp::from_compound("<<="), Some(BinaryOp::LeftShift));
        assert_eq!(BinaryOp::from_compound("=="), None);
    }
}
