//! LSLVM Core - Fundamental types and utilities shared by the engine crates

mod error;
mod types;
mod idgen;
mod math;

pub use error::*;
pub use types::*;
pub use idgen::*;
pub use math::*;
