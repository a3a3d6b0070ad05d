//! Core type definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Script instance ID (32-bit unsigned)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScriptId(pub u32);

impl ScriptId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl From<u32> for ScriptId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<u64> for ScriptId {
    fn from(id: u64) -> Self {
        Self(id as u32)
    }
}

impl From<ScriptId> for u64 {
    fn from(id: ScriptId) -> Self {
        id.0 as u64
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "script#{}", self.0)
    }
}

/// API compatibility mode selected by `#!Mode:`
///
/// Modes are ordered: each mode accepts everything the previous one does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompatMode {
    /// Baseline language
    Lsl = 0,
    /// OpenSim extensions
    Ossl = 1,
    /// Aurora script library
    Assl = 2,
    /// Everything, including the extended grammar
    Aurora = 3,
}

impl CompatMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Lsl),
            1 => Some(Self::Ossl),
            2 => Some(Self::Assl),
            3 => Some(Self::Aurora),
            _ => None,
        }
    }

    /// Parse a mode name, ignoring case
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "lsl" => Some(Self::Lsl),
            "ossl" => Some(Self::Ossl),
            "assl" => Some(Self::Assl),
            "aurora" => Some(Self::Aurora),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lsl => "lsl",
            Self::Ossl => "ossl",
            Self::Assl => "assl",
            Self::Aurora => "aurora",
        }
    }

    /// Whether an API member registered for `required` is visible in this mode
    pub fn admits(&self, required: CompatMode) -> bool {
        required <= *self
    }
}

impl Default for CompatMode {
    fn default() -> Self {
        Self::Lsl
    }
}

impl fmt::Display for CompatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!(CompatMode::parse("LSL"), Some(CompatMode::Lsl));
        assert_eq!(CompatMode::parse(" aurora "), Some(CompatMode::Aurora));
        assert_eq!(CompatMode::parse("python"), None);
    }

    #[test]
    fn test_mode_admits() {
        assert!(CompatMode::Aurora.admits(CompatMode::Ossl));
        assert!(CompatMode::Ossl.admits(CompatMode::Lsl));
        assert!(!CompatMode::Lsl.admits(CompatMode::Ossl));
    }

    #[test]
    fn test_serialized_forms() {
        assert_eq!(serde_json::to_string(&CompatMode::Assl).unwrap(), "\"assl\"");
        assert_eq!(serde_json::to_string(&ScriptId::new(7)).unwrap(), "7");
        let mode: CompatMode = serde_json::from_str("\"aurora\"").unwrap();
        assert_eq!(mode, CompatMode::Aurora);
    }
}
