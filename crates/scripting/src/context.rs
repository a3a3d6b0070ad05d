//! Script execution context
//!
//! What a library function sees while it runs: the calling script, the
//! host it reports to, its timers and the clocks `llGetTime` reads.

use crate::lsl::ast::named_timer_event;
use crate::lsl::value::Value;
use lslvm_core::ScriptId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Embedding environment of the engine
pub trait ScriptHost: Send + Sync {
    /// `llSay` and friends
    fn chat(&self, script: ScriptId, channel: i32, message: &str);

    /// Runtime errors surfaced to the script's owner
    fn diagnostic(&self, script: ScriptId, message: &str) {
        tracing::warn!("{}: {}", script, message);
    }

    /// Dispatch an `extern`/`rpc` declared function
    fn call_extern(&self, _script: ScriptId, name: &str, _args: &[Value]) -> std::result::Result<Value, String> {
        Err(format!("no handler registered for '{}'", name))
    }
}

/// Host writing script output to the log
#[derive(Debug, Default)]
pub struct LogHost;

impl ScriptHost for LogHost {
    fn chat(&self, script: ScriptId, channel: i32, message: &str) {
        tracing::info!("[{} ch{}] {}", script, channel, message);
    }
}

/// Chat line captured by [`RecordingHost`]
#[derive(Debug, Clone, PartialEq)]
pub struct ChatLine {
    pub script: ScriptId,
    pub channel: i32,
    pub message: String,
}

type ExternHandler = fn(&[Value]) -> std::result::Result<Value, String>;

/// Host that keeps everything scripts send it
#[derive(Default)]
pub struct RecordingHost {
    chat: Mutex<Vec<ChatLine>>,
    diagnostics: Mutex<Vec<(ScriptId, String)>>,
    externs: HashMap<String, ExternHandler>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extern(mut self, name: &str, handler: ExternHandler) -> Self {
        self.externs.insert(name.to_string(), handler);
        self
    }

    pub fn chat_lines(&self) -> Vec<ChatLine> {
        self.chat.lock().clone()
    }

    /// Messages in the order they were said
    pub fn messages(&self) -> Vec<String> {
        self.chat.lock().iter().map(|c| c.message.clone()).collect()
    }

    pub fn diagnostics(&self) -> Vec<String> {
        self.diagnostics.lock().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn clear(&self) {
        self.chat.lock().clear();
        self.diagnostics.lock().clear();
    }
}

impl ScriptHost for RecordingHost {
    fn chat(&self, script: ScriptId, channel: i32, message: &str) {
        self.chat.lock().push(ChatLine {
            script,
            channel,
            message: message.to_string(),
        });
    }

    fn diagnostic(&self, script: ScriptId, message: &str) {
        self.diagnostics.lock().push((script, message.to_string()));
    }

    fn call_extern(&self, _script: ScriptId, name: &str, args: &[Value]) -> std::result::Result<Value, String> {
        match self.externs.get(name) {
            Some(handler) => handler(args),
            None => Err(format!("no handler registered for '{}'", name)),
        }
    }
}

/// A repeating timer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timer {
    pub interval: Duration,
    pub next_due: Instant,
}

/// Default timer plus named timers of one instance
#[derive(Debug, Clone, Default)]
pub struct TimerSet {
    default: Option<Timer>,
    named: BTreeMap<String, Timer>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm or (with a zero interval) disarm the `timer` event
    pub fn set_default(&mut self, interval: Duration, now: Instant) {
        self.default = (!interval.is_zero()).then(|| Timer {
            interval,
            next_due: now + interval,
        });
    }

    pub fn set_named(&mut self, name: &str, interval: Duration, now: Instant) {
        if interval.is_zero() {
            self.named.remove(name);
        } else {
            self.named.insert(
                name.to_string(),
                Timer {
                    interval,
                    next_due: now + interval,
                },
            );
        }
    }

    pub fn clear(&mut self) {
        self.default = None;
        self.named.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.named.is_empty()
    }

    /// Event keys of every timer due at `now`, rescheduling them
    pub fn due(&mut self, now: Instant) -> Vec<String> {
        let mut fired = Vec::new();
        if let Some(timer) = self.default.as_mut() {
            if timer.next_due <= now {
                timer.next_due = now + timer.interval;
                fired.push("timer".to_string());
            }
        }
        for (name, timer) in self.named.iter_mut() {
            if timer.next_due <= now {
                timer.next_due = now + timer.interval;
                fired.push(named_timer_event(name));
            }
        }
        fired
    }

    /// Earliest pending deadline
    pub fn next_due(&self) -> Option<Instant> {
        self.default
            .iter()
            .chain(self.named.values())
            .map(|t| t.next_due)
            .min()
    }
}

/// State a library function may read or change
pub struct CallContext<'a> {
    pub script: ScriptId,
    pub host: &'a dyn ScriptHost,
    pub timers: &'a mut TimerSet,
    pub now: Instant,
    /// Origin of `llGetTime`
    pub clock: &'a mut Instant,
    pub min_timer_interval: Duration,
    /// Seconds the script asked to sleep during this call
    pub sleep: Option<f64>,
}

impl<'a> CallContext<'a> {
    /// Clamp a requested timer period to the configured minimum
    pub fn timer_interval(&self, seconds: f64) -> Duration {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(seconds).max(self.min_timer_interval)
    }
}
