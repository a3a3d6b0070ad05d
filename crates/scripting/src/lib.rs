//! # LSLVM Scripting System
//!
//! This crate compiles and runs LSL scripts, including the OpenSim and
//! Aurora library extensions and the extended Aurora grammar.
//!
//! ## Features
//! - Lexer, parser and resolver with overload selection
//! - Stack bytecode and a budgeted VM
//! - Per-instance state machine with event queue, timers and forced sleeps
//! - Extension bundles switched on by `#!Mode:` and `#!Enable:`
//!
//! ## Pipeline
//!
//! ```text
//! source -> lexer -> parser -> resolver/codegen -> ExecutableUnit
//!        -> ScriptInstance (one per running copy) -> ScriptEngine
//! ```

pub mod api;
pub mod builtins;
pub mod context;
pub mod error;
pub mod instance;
pub mod lsl;
pub mod scheduler;

pub use api::{ApiSurface, Registration};
pub use builtins::Builtins;
pub use context::{LogHost, RecordingHost, ScriptHost};
pub use error::{CompileError, CompileErrorKind, Fault, Result, ScriptError};
pub use instance::{InstanceSnapshot, PassOutcome, ScriptEvent, ScriptInstance};
pub use lsl::{check, compile, CompileOptions, ExecutableUnit, Value};
pub use scheduler::ScriptEngine;
