//! LSL Scripting Language
//!
//! Source text to executable unit: lexer, parser, resolver and code
//! generator, plus the stack VM that runs the result.

pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod directives;
pub mod expr;
pub mod lexer;
pub mod operators;
pub mod parser;
pub mod resolver;
pub mod unit;
pub mod value;
pub mod vm;

pub use ast::Type;
pub use bytecode::{Chunk, Instruction};
pub use compiler::{check, compile, CompileOptions, Compiler};
pub use directives::{Directives, FeatureFlags};
pub use lexer::IncludeResolver;
pub use unit::ExecutableUnit;
pub use value::Value;
pub use vm::{BuiltinFn, Completion, Execution, Interrupt, Limits, Machine};
