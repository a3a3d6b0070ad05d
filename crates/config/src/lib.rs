//! LSLVM Configuration Management
//!
//! Loads engine configuration from a `key = value` options file.
//!
//! ```text
//! # engine.txt
//! maxcalldepth = 64
//! inheritevents = false
//! defaultmode = aurora
//! extensions = switch, breakcontinue
//! ```

use lslvm_core::{CompatMode, EngineError};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),

    /// A value that cannot be used at all
    #[error("Invalid value for '{key}': {value}")]
    InvalidValue { key: String, value: String },
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Engine configuration shared by the compiler and the scheduler
///
/// Built once at startup and passed by reference (or `Arc`) to every
/// component that needs it; never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    // ========== Runtime limits ==========
    /// Maximum nested user-function calls per event (from "maxcalldepth")
    pub max_call_depth: usize,
    /// Maximum events waiting in one instance's queue (from "maxqueuedevents")
    pub max_queued_events: usize,
    /// Instruction budget for a single event (from "maxinstructions")
    pub max_instructions_per_event: u64,
    /// Wall-clock budget for a single event (from "maxeventtimems")
    pub max_event_time: Duration,

    // ========== State machine ==========
    /// Keep queued events across state changes (from "inheritevents")
    pub inherit_events_on_state_change: bool,

    // ========== Scheduling ==========
    /// Delay between scheduler passes in the host loop (from "passintervalms")
    pub pass_interval: Duration,
    /// Smallest timer period a script may request (from "mintimerinterval")
    pub min_timer_interval: Duration,

    // ========== Compiler ==========
    /// Mode used when a script has no `#!Mode:` line (from "defaultmode")
    pub default_mode: CompatMode,
    /// Extensions enabled for every script (from "extensions")
    pub extensions: Vec<String>,
    /// Locale recorded in compiled units (from "locale")
    pub locale: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 64,
            max_queued_events: 64,
            max_instructions_per_event: 1_000_000,
            max_event_time: Duration::from_millis(500),
            inherit_events_on_state_change: false,
            pass_interval: Duration::from_millis(10),
            min_timer_interval: Duration::from_millis(10),
            default_mode: CompatMode::Lsl,
            extensions: vec![],
            locale: "en-US".into(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from an options file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse options file content
    pub fn parse(content: &str) -> Result<Self> {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(eq_pos) = line.find('=') {
                let key = line[..eq_pos].trim();
                let value = line[eq_pos + 1..].trim();

                config.parse_option(key, value)?;
            }
        }

        Ok(config)
    }

    fn parse_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key.to_ascii_lowercase().as_str() {
            "maxcalldepth" => {
                self.max_call_depth = parse_or(key, value, 64);
            }
            "maxqueuedevents" => {
                self.max_queued_events = parse_or(key, value, 64);
            }
            "maxinstructions" => {
                self.max_instructions_per_event = parse_or(key, value, 1_000_000);
            }
            "maxeventtimems" => {
                self.max_event_time = Duration::from_millis(parse_or(key, value, 500));
            }
            "inheritevents" => {
                self.inherit_events_on_state_change = parse_bool(value);
            }
            "passintervalms" => {
                self.pass_interval = Duration::from_millis(parse_or(key, value, 10));
            }
            "mintimerinterval" => {
                let secs: f64 = parse_or(key, value, 0.01);
                if !secs.is_finite() || secs < 0.0 {
                    return Err(ConfigError::InvalidValue {
                        key: key.into(),
                        value: value.into(),
                    });
                }
                self.min_timer_interval = Duration::from_secs_f64(secs);
            }
            "defaultmode" => {
                self.default_mode = CompatMode::parse(value).ok_or_else(|| ConfigError::InvalidValue {
                    key: key.into(),
                    value: value.into(),
                })?;
            }
            "extensions" => {
                self.extensions = value
                    .split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
            }
            "locale" => self.locale = value.into(),
            _ => {
                tracing::debug!("Unknown config option: {} = {}", key, value);
            }
        }

        Ok(())
    }

    /// Log the effective configuration
    pub fn display(&self) {
        tracing::info!("Engine configuration:");
        tracing::info!("  Max call depth: {}", self.max_call_depth);
        tracing::info!("  Max queued events: {}", self.max_queued_events);
        tracing::info!("  Instruction budget: {}", self.max_instructions_per_event);
        tracing::info!("  Event time budget: {:?}", self.max_event_time);
        tracing::info!("  Inherit events on state change: {}", self.inherit_events_on_state_change);
        tracing::info!("  Pass interval: {:?}", self.pass_interval);
        tracing::info!("  Min timer interval: {:?}", self.min_timer_interval);
        tracing::info!("  Default mode: {}", self.default_mode);
        tracing::info!("  Extensions: {}", self.extensions.join(", "));
        tracing::info!("  Locale: {}", self.locale);
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, value: &str, fallback: T) -> T {
    match value.parse() {
        Ok(parsed) => parsed,
        Err(_) => {
            tracing::warn!("Malformed value for '{}': {}", key, value);
            fallback
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "yes" | "1" | "on")
}
