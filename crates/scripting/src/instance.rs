//! Script instances
//!
//! One running copy of a compiled unit: its state machine, event queue,
//! timers, and the execution suspended by a forced sleep.
//!
//! Two locks guard an instance. The execution lock is taken with
//! `try_lock` for the length of a pass, so two passes never overlap. The
//! snapshot lock guards the published [`InstanceSnapshot`] and is only
//! held for the copy in and out, never while script code runs.

use crate::builtins::Builtins;
use crate::context::{CallContext, ScriptHost, TimerSet};
use crate::error::{Fault, Result, ScriptError};
use crate::lsl::unit::ExecutableUnit;
use crate::lsl::value::Value;
use crate::lsl::vm::{BuiltinFn, Completion, Execution, Interrupt, Limits, Machine};
use lslvm_config::EngineConfig;
use lslvm_core::ScriptId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Entry in an instance's event queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScriptEvent {
    Event { name: String, args: Vec<Value> },
    Reset,
}

impl ScriptEvent {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        ScriptEvent::Event {
            name: name.into(),
            args,
        }
    }
}

/// Shared handle to an instance's FIFO event queue
#[derive(Debug, Clone)]
pub struct EventQueue {
    events: Arc<Mutex<VecDeque<ScriptEvent>>>,
    capacity: usize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            capacity,
        }
    }

    /// Append an event. A full queue drops everything but resets.
    pub fn push(&self, event: ScriptEvent) -> bool {
        let mut events = self.events.lock();
        if events.len() >= self.capacity && event != ScriptEvent::Reset {
            tracing::debug!("Event queue full ({}), dropping {:?}", self.capacity, event);
            return false;
        }
        events.push_back(event);
        true
    }

    pub fn pop(&self) -> Option<ScriptEvent> {
        self.events.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Drop every pending event except resets
    pub fn retain_resets(&self) {
        self.events.lock().retain(|e| *e == ScriptEvent::Reset);
    }

    pub fn to_vec(&self) -> Vec<ScriptEvent> {
        self.events.lock().iter().cloned().collect()
    }

    fn replace(&self, events: &[ScriptEvent]) {
        let mut queue = self.events.lock();
        queue.clear();
        queue.extend(events.iter().cloned());
    }
}

/// Where the state machine is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Before the first pass and during a reset
    NoState,
    Active(u16),
}

/// Result of one scheduler pass over an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Events dispatched this pass
    Ran(usize),
    /// Waiting out a forced delay
    Sleeping,
    /// Another pass holds the execution lock
    Busy,
    /// Halted by a fatal fault
    Stopped,
}

/// Serializable view of an instance, refreshed after every pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub script: ScriptId,
    pub state: Option<String>,
    pub fields: Vec<(String, Value)>,
    pub queued: Vec<ScriptEvent>,
    pub running: bool,
    pub sleeping: bool,
    pub timers_armed: bool,
    pub execution_time: Duration,
}

impl InstanceSnapshot {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// What to do once the running routine finishes
#[derive(Debug, Clone, Copy)]
enum Continuation {
    Event,
    /// `state_exit` of a transition to `target`
    Exit { target: u16 },
    Entry,
    /// Variable initialization, followed by entering `default`
    Init,
}

enum Step {
    Call { function: u32, args: Vec<Value>, then: Continuation },
    Run { exec: Execution, then: Continuation },
    Continue(Continuation),
    Signal { interrupt: Interrupt, during: Continuation },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Done,
    Sleeping,
    Stopped,
}

struct Suspended {
    exec: Execution,
    then: Continuation,
    resume_at: Instant,
}

/// Everything guarded by the execution lock
struct InstanceCore {
    state: RunState,
    globals: Vec<Value>,
    timers: TimerSet,
    clock: Instant,
    /// Start of the execution time charged by the current pass
    charged_from: Instant,
    suspended: Option<Suspended>,
    started: bool,
    running: bool,
}

/// A running script
pub struct ScriptInstance {
    id: ScriptId,
    unit: Arc<ExecutableUnit>,
    builtins: Vec<Option<BuiltinFn>>,
    config: Arc<EngineConfig>,
    limits: Limits,
    queue: EventQueue,
    core: Mutex<InstanceCore>,
    published: Mutex<InstanceSnapshot>,
    abort: Arc<AtomicBool>,
}

impl ScriptInstance {
    pub fn new(id: ScriptId, unit: Arc<ExecutableUnit>, builtins: &Builtins, config: Arc<EngineConfig>) -> Self {
        let globals = unit.default_globals();
        let published = InstanceSnapshot {
            script: id,
            state: None,
            fields: unit
                .fields
                .iter()
                .zip(&globals)
                .map(|(f, v)| (f.name.clone(), v.clone()))
                .collect(),
            queued: Vec::new(),
            running: true,
            sleeping: false,
            timers_armed: false,
            execution_time: Duration::ZERO,
        };

        Self {
            id,
            builtins: builtins.bind(&unit.api),
            limits: Limits::from_config(&config),
            queue: EventQueue::new(config.max_queued_events),
            core: Mutex::new(InstanceCore {
                state: RunState::NoState,
                globals,
                timers: TimerSet::new(),
                clock: Instant::now(),
                charged_from: Instant::now(),
                suspended: None,
                started: false,
                running: true,
            }),
            published: Mutex::new(published),
            abort: Arc::new(AtomicBool::new(false)),
            unit,
            config,
        }
    }

    pub fn id(&self) -> ScriptId {
        self.id
    }

    pub fn unit(&self) -> &Arc<ExecutableUnit> {
        &self.unit
    }

    /// Producer handle for the event queue
    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn post_event(&self, name: &str, args: Vec<Value>) -> bool {
        self.queue.push(ScriptEvent::new(name, args))
    }

    pub fn post_reset(&self) {
        self.queue.push(ScriptEvent::Reset);
    }

    /// Fail the running or sleeping event at its next budget check. An
    /// abort requested while idle is dropped by the next pass.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.published.lock().running
    }

    /// Started, with nothing queued, sleeping or armed
    pub fn is_idle(&self) -> bool {
        let published = self.published.lock();
        if !published.running {
            return true;
        }
        published.state.is_some() && !published.sleeping && !published.timers_armed && self.queue.is_empty()
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        let mut snapshot = self.published.lock().clone();
        snapshot.queued = self.queue.to_vec();
        snapshot
    }

    /// Field value as of the last pass
    pub fn field(&self, name: &str) -> Option<Value> {
        self.published.lock().field(name).cloned()
    }

    /// Overwrite a global or state variable (`state.name`)
    pub fn set_field(&self, name: &str, value: Value) -> Result<()> {
        let mut core = self.core.lock();
        self.store_field(&mut core, name, value)?;
        self.publish(&core, Duration::ZERO);
        Ok(())
    }

    /// Load fields, state and queue from a snapshot. A sleeping
    /// execution is not part of a snapshot and is discarded.
    pub fn restore(&self, snapshot: &InstanceSnapshot) -> Result<()> {
        let mut core = self.core.lock();
        for (name, value) in &snapshot.fields {
            self.store_field(&mut core, name, value.clone())?;
        }
        core.state = match &snapshot.state {
            Some(name) => RunState::Active(
                self.unit
                    .state_index(name)
                    .ok_or_else(|| ScriptError::Field(format!("no state named '{}'", name)))?,
            ),
            None => RunState::NoState,
        };
        core.started = snapshot.state.is_some();
        core.running = snapshot.running;
        core.suspended = None;
        self.queue.replace(&snapshot.queued);
        self.published.lock().execution_time = snapshot.execution_time;
        self.publish(&core, Duration::ZERO);
        tracing::debug!("{} restored in state {:?}", self.id, snapshot.state);
        Ok(())
    }

    fn store_field(&self, core: &mut InstanceCore, name: &str, value: Value) -> Result<()> {
        let index = self
            .unit
            .field_index(name)
            .ok_or_else(|| ScriptError::Field(format!("no field named '{}'", name)))?;
        let ty = self.unit.fields[index].ty;
        let value = if value.type_of() == ty {
            value
        } else if self.unit.api.can_implicitly_cast(value.type_of(), ty) {
            value
                .cast(ty)
                .ok_or_else(|| ScriptError::Field(format!("cannot convert {} to {}", value.type_of(), ty)))?
        } else {
            return Err(ScriptError::Field(format!(
                "'{}' is {}, not {}",
                name,
                ty,
                value.type_of()
            )));
        };
        core.globals[index] = value;
        Ok(())
    }

    /// Drain the queue once. The first pass initializes variables and
    /// enters `default`; later passes resume a finished sleep, fire due
    /// timers, then handle at most the events queued at that point.
    pub fn run_pass(&self, host: &dyn ScriptHost, now: Instant) -> PassOutcome {
        let Some(mut guard) = self.core.try_lock() else {
            return PassOutcome::Busy;
        };
        let core = &mut *guard;
        if !core.running {
            return PassOutcome::Stopped;
        }

        if core.suspended.is_none() {
            self.abort.store(false, Ordering::Relaxed);
        }

        core.charged_from = Instant::now();
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.pass(core, host, now))) {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!("{} panicked and was stopped", self.id);
                host.diagnostic(self.id, "script stopped after an internal error");
                core.running = false;
                PassOutcome::Stopped
            }
        };
        self.publish(core);
        outcome
    }

    fn pass(&self, core: &mut InstanceCore, host: &dyn ScriptHost, now: Instant) -> PassOutcome {
        if !core.started {
            core.started = true;
            tracing::debug!("{} starting", self.id);
            let step = Step::Call {
                function: self.unit.live_init,
                args: Vec::new(),
                then: Continuation::Init,
            };
            return outcome(self.drive(core, host, now, step), 0);
        }

        if let Some(suspended) = core.suspended.take() {
            if suspended.resume_at > now {
                core.suspended = Some(suspended);
                return PassOutcome::Sleeping;
            }
            let step = Step::Run {
                exec: suspended.exec,
                then: suspended.then,
            };
            let flow = self.drive(core, host, now, step);
            if flow != Flow::Done {
                return outcome(flow, 0);
            }
        }

        self.fire_timers(core, now);

        let budget = self.queue.len();
        let mut handled = 0;
        for _ in 0..budget {
            let Some(event) = self.queue.pop() else {
                break;
            };
            let step = match event {
                ScriptEvent::Reset => Step::Signal {
                    interrupt: Interrupt::Reset,
                    during: Continuation::Event,
                },
                ScriptEvent::Event { name, args } => {
                    let RunState::Active(state) = core.state else {
                        continue;
                    };
                    match self.unit.handler(state, &name) {
                        Some(function) => Step::Call {
                            function,
                            args,
                            then: Continuation::Event,
                        },
                        None => {
                            tracing::debug!("{} ignores '{}' in state {}", self.id, name, self.unit.state_name(state));
                            continue;
                        }
                    }
                }
            };
            handled += 1;
            let flow = self.drive(core, host, now, step);
            if flow != Flow::Done {
                return outcome(flow, handled);
            }
        }
        PassOutcome::Ran(handled)
    }

    /// Queue the events of every timer due at `now`. Returns how many
    /// were queued; a busy instance fires its timers on its own pass.
    pub fn tick(&self, now: Instant) -> usize {
        match self.core.try_lock() {
            Some(mut core) => self.fire_timers(&mut core, now),
            None => 0,
        }
    }

    fn fire_timers(&self, core: &mut InstanceCore, now: Instant) -> usize {
        core.timers
            .due(now)
            .into_iter()
            .filter(|key| self.queue.push(ScriptEvent::new(key.as_str(), Vec::new())))
            .count()
    }

    /// Run routines and transitions until the triggering event settles
    fn drive(&self, core: &mut InstanceCore, host: &dyn ScriptHost, now: Instant, mut step: Step) -> Flow {
        let unit = &*self.unit;
        loop {
            step = match step {
                Step::Call { function, args, then } => match Execution::new(unit, function, args) {
                    Ok(exec) => Step::Run { exec, then },
                    Err(fault) => Step::Signal {
                        interrupt: fault.into(),
                        during: then,
                    },
                },

                Step::Run { mut exec, then } => {
                    let result = {
                        let mut machine = Machine {
                            unit,
                            globals: &mut core.globals,
                            builtins: &self.builtins,
                            context: CallContext {
                                script: self.id,
                                host,
                                timers: &mut core.timers,
                                now,
                                clock: &mut core.clock,
                                min_timer_interval: self.config.min_timer_interval,
                                sleep: None,
                            },
                            limits: self.limits,
                            abort: &self.abort,
                        };
                        machine.run(&mut exec)
                    };
                    match result {
                        Ok(Completion::Finished(_)) => Step::Continue(then),
                        Ok(Completion::Sleeping(delay)) => {
                            tracing::debug!("{} sleeps for {:?}", self.id, delay);
                            core.suspended = Some(Suspended {
                                exec,
                                then,
                                resume_at: now + delay,
                            });
                            return Flow::Sleeping;
                        }
                        Err(interrupt) => Step::Signal {
                            interrupt,
                            during: then,
                        },
                    }
                }

                Step::Continue(Continuation::Event) | Step::Continue(Continuation::Entry) => return Flow::Done,
                Step::Continue(Continuation::Exit { target }) => {
                    if !self.config.inherit_events_on_state_change {
                        self.queue.retain_resets();
                    }
                    tracing::debug!("{} enters state {}", self.id, unit.state_name(target));
                    core.state = RunState::Active(target);
                    self.entry(target)
                }
                Step::Continue(Continuation::Init) => {
                    core.state = RunState::Active(0);
                    self.entry(0)
                }

                Step::Signal {
                    interrupt: Interrupt::StateChange(target),
                    during,
                } => match (during, core.state) {
                    // a state change inside state_exit retargets the transition
                    (Continuation::Exit { .. }, _) => Step::Continue(Continuation::Exit { target }),
                    (_, RunState::Active(current)) if current == target => return Flow::Done,
                    (_, RunState::Active(current)) => match unit.handler(current, "state_exit") {
                        Some(function) => Step::Call {
                            function,
                            args: Vec::new(),
                            then: Continuation::Exit { target },
                        },
                        None => Step::Continue(Continuation::Exit { target }),
                    },
                    (_, RunState::NoState) => Step::Continue(Continuation::Exit { target }),
                },
                Step::Signal {
                    interrupt: Interrupt::Reset,
                    during: Continuation::Init,
                } => Step::Continue(Continuation::Init),
                Step::Signal {
                    interrupt: Interrupt::Reset,
                    ..
                } => self.reset(core, now),

                Step::Signal {
                    interrupt: Interrupt::Fault(fault),
                    during,
                } => {
                    if !fault.is_recoverable() {
                        tracing::error!("{} stopped: {}", self.id, fault);
                        host.diagnostic(self.id, &fault.to_string());
                        core.running = false;
                        core.suspended = None;
                        return Flow::Stopped;
                    }
                    if matches!(fault, Fault::Aborted(_)) {
                        self.abort.store(false, Ordering::Relaxed);
                    }
                    tracing::warn!("{}: {}", self.id, fault);
                    host.diagnostic(self.id, &fault.to_string());
                    match during {
                        Continuation::Exit { .. } | Continuation::Init => Step::Continue(during),
                        Continuation::Event | Continuation::Entry => return Flow::Done,
                    }
                }
            };
        }
    }

    fn entry(&self, state: u16) -> Step {
        match self.unit.handler(state, "state_entry") {
            Some(function) => Step::Call {
                function,
                args: Vec::new(),
                then: Continuation::Entry,
            },
            None => Step::Continue(Continuation::Entry),
        }
    }

    fn reset(&self, core: &mut InstanceCore, now: Instant) -> Step {
        tracing::debug!("{} resetting", self.id);
        self.queue.clear();
        core.timers.clear();
        core.suspended = None;
        core.clock = now;
        core.state = RunState::NoState;
        core.globals = self.unit.default_globals();
        core.charged_from = Instant::now();
        self.published.lock().execution_time = Duration::ZERO;
        Step::Call {
            function: self.unit.reset_init,
            args: Vec::new(),
            then: Continuation::Init,
        }
    }

    fn publish(&self, core: &InstanceCore) {
        let mut published = self.published.lock();
        published.state = match core.state {
            RunState::Active(state) => Some(self.unit.state_name(state).to_string()),
            RunState::NoState => None,
        };
        published.fields = self
            .unit
            .fields
            .iter()
            .zip(&core.globals)
            .map(|(f, v)| (f.name.clone(), v.clone()))
            .collect();
        published.queued = self.queue.to_vec();
        published.running = core.running;
        published.sleeping = core.suspended.is_some();
        published.timers_armed = !core.timers.is_empty();
        published.execution_time += core.charged_from.elapsed();
    }
}

fn outcome(flow: Flow, handled: usize) -> PassOutcome {
    match flow {
        Flow::Done => PassOutcome::Ran(handled),
        Flow::Sleeping => PassOutcome::Sleeping,
        Flow::Stopped => PassOutcome::Stopped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RecordingHost;
    use crate::lsl::compiler::{compile, CompileOptions};

    fn instance(source: &str) -> ScriptInstance {
        instance_with(source, EngineConfig::default())
    }

    fn instance_with(source: &str, config: EngineConfig) -> ScriptInstance {
        let unit = compile(source, &CompileOptions::from_config(&config)).unwrap();
        ScriptInstance::new(ScriptId::new(1), Arc::new(unit), &Builtins::standard(), Arc::new(config))
    }

    #[test]
    fn test_first_pass_only_enters_default() {
        let script = instance(
            r#"
            default {
                state_entry() { llSay(0, "entry"); }
                touch_start(integer n) { llSay(0, "touch"); }
            }
            "#,
        );
        let host = RecordingHost::new();
        script.post_event("touch_start", vec![Value::Integer(1)]);

        let now = Instant::now();
        assert_eq!(script.run_pass(&host, now), PassOutcome::Ran(0));
        assert_eq!(host.messages(), vec!["entry"]);
        assert_eq!(script.run_pass(&host, now), PassOutcome::Ran(1));
        assert_eq!(host.messages(), vec!["entry", "touch"]);
    }

    #[test]
    fn test_state_change_runs_exit_then_entry_and_flushes_queue() {
        let script = instance(
            r#"
            default {
                touch_start(integer n) { state other; }
                state_exit() { llSay(0, "exit"); }
            }
            state other {
                state_entry() { llSay(0, "entry"); }
                touch_start(integer n) { llSay(0, "late touch"); }
            }
            "#,
        );
        let host = RecordingHost::new();
        let now = Instant::now();
        script.run_pass(&host, now);
        script.post_event("touch_start", vec![Value::Integer(1)]);
        script.post_event("touch_start", vec![Value::Integer(1)]);

        assert_eq!(script.run_pass(&host, now), PassOutcome::Ran(1));
        assert_eq!(host.messages(), vec!["exit", "entry"]);
        assert_eq!(script.snapshot().state.as_deref(), Some("other"));
        assert!(script.queue().is_empty());
    }

    #[test]
    fn test_inherited_events_survive_state_change() {
        let config = EngineConfig {
            inherit_events_on_state_change: true,
            ..EngineConfig::default()
        };
        let script = instance_with(
            r#"
            default { touch_start(integer n) { state other; } }
            state other { touch_start(integer n) { llSay(0, "kept"); } }
            "#,
            config,
        );
        let host = RecordingHost::new();
        let now = Instant::now();
        script.run_pass(&host, now);
        script.post_event("touch_start", vec![Value::Integer(1)]);
        script.post_event("touch_start", vec![Value::Integer(2)]);

        assert_eq!(script.run_pass(&host, now), PassOutcome::Ran(2));
        assert_eq!(host.messages(), vec!["kept"]);
    }

    #[test]
    fn test_recoverable_fault_keeps_draining() {
        let script = instance(
            r#"
            default {
                touch_start(integer n) { llSetPrimURL("http://example.com"); llSay(0, "unreachable"); }
                on_rez(integer p) { llSay(0, "rezzed"); }
            }
            "#,
        );
        let host = RecordingHost::new();
        let now = Instant::now();
        script.run_pass(&host, now);
        script.post_event("touch_start", vec![Value::Integer(1)]);
        script.post_event("on_rez", vec![Value::Integer(0)]);

        assert_eq!(script.run_pass(&host, now), PassOutcome::Ran(2));
        assert_eq!(host.messages(), vec!["rezzed"]);
        assert_eq!(host.diagnostics().len(), 1);
        assert!(script.is_running());
    }

    #[test]
    fn test_fatal_fault_stops_instance() {
        let script = instance(
            r#"
            integer zero;
            default { touch_start(integer n) { integer x = n / zero; } }
            "#,
        );
        let host = RecordingHost::new();
        let now = Instant::now();
        script.run_pass(&host, now);
        script.post_event("touch_start", vec![Value::Integer(1)]);

        assert_eq!(script.run_pass(&host, now), PassOutcome::Stopped);
        assert!(!script.is_running());
        assert_eq!(script.run_pass(&host, now), PassOutcome::Stopped);
    }

    #[test]
    fn test_forced_delay_suspends_event() {
        let script = instance(
            r#"
            default {
                touch_start(integer n) {
                    llInstantMessage(NULL_KEY, "hello");
                    llSay(0, "after");
                }
            }
            "#,
        );
        let host = RecordingHost::new();
        let now = Instant::now();
        script.run_pass(&host, now);
        script.post_event("touch_start", vec![Value::Integer(1)]);

        assert_eq!(script.run_pass(&host, now), PassOutcome::Sleeping);
        assert_eq!(host.messages(), vec!["hello"]);
        assert_eq!(script.run_pass(&host, now + Duration::from_secs(1)), PassOutcome::Sleeping);
        assert_eq!(script.run_pass(&host, now + Duration::from_secs(3)), PassOutcome::Ran(0));
        assert_eq!(host.messages(), vec!["hello", "after"]);
    }

    #[test]
    fn test_reset_reinitializes_and_reenters_default() {
        let script = instance(
            r#"
            integer count = 10;
            default {
                state_entry() { llSay(0, (string)count); }
                touch_start(integer n) { count += n; llSay(0, (string)count); }
                on_rez(integer p) { llResetScript(); }
            }
            "#,
        );
        let host = RecordingHost::new();
        let now = Instant::now();
        script.run_pass(&host, now);
        script.post_event("touch_start", vec![Value::Integer(5)]);
        script.post_event("on_rez", vec![Value::Integer(0)]);
        script.post_event("touch_start", vec![Value::Integer(1)]);

        script.run_pass(&host, now);
        assert_eq!(host.messages(), vec!["10", "15", "10"]);
        assert_eq!(script.field("count"), Some(Value::Integer(10)));
        assert!(script.queue().is_empty());
    }

    #[test]
    fn test_timer_event_fires() {
        let script = instance(
            r#"
            default {
                state_entry() { llSetTimerEvent(1.0); }
                timer() { llSay(0, "tick"); llSetTimerEvent(0.0); }
            }
            "#,
        );
        let host = RecordingHost::new();
        let now = Instant::now();
        script.run_pass(&host, now);
        assert!(!script.is_idle());

        assert_eq!(script.tick(now + Duration::from_millis(500)), 0);
        assert_eq!(script.run_pass(&host, now + Duration::from_millis(500)), PassOutcome::Ran(0));
        assert_eq!(script.run_pass(&host, now + Duration::from_secs(2)), PassOutcome::Ran(1));
        assert_eq!(host.messages(), vec!["tick"]);
        assert!(script.is_idle());
    }

    #[test]
    fn test_queue_capacity_keeps_resets() {
        let queue = EventQueue::new(1);
        assert!(queue.push(ScriptEvent::new("touch_start", vec![Value::Integer(1)])));
        assert!(!queue.push(ScriptEvent::new("touch_start", vec![Value::Integer(2)])));
        assert!(queue.push(ScriptEvent::Reset));
        queue.retain_resets();
        assert_eq!(queue.to_vec(), vec![ScriptEvent::Reset]);
    }

    #[test]
    fn test_field_inspection_and_restore() {
        let source = r#"
            integer hits;
            string label = "start";
            default {
                touch_start(integer n) { hits += 1; label = "touched"; state busy; }
            }
            state busy { touch_start(integer n) { hits += 100; } }
        "#;
        let script = instance(source);
        let host = RecordingHost::new();
        let now = Instant::now();
        script.run_pass(&host, now);
        script.post_event("touch_start", vec![Value::Integer(1)]);
        script.run_pass(&host, now);

        let json = serde_json::to_string(&script.snapshot()).unwrap();
        let snapshot: InstanceSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot.field("hits"), Some(&Value::Integer(1)));

        let copy = instance(source);
        copy.restore(&snapshot).unwrap();
        assert_eq!(copy.field("label"), Some(Value::string("touched")));
        copy.post_event("touch_start", vec![Value::Integer(1)]);
        copy.run_pass(&host, now);
        assert_eq!(copy.field("hits"), Some(Value::Integer(101)));

        assert!(copy.set_field("hits", Value::string("many")).is_err());
        assert!(copy.set_field("missing", Value::Integer(1)).is_err());
        copy.set_field("hits", Value::Integer(7)).unwrap();
        assert_eq!(copy.field("hits"), Some(Value::Integer(7)));
    }

    /// Host that feeds every chat line back into the script as a new event
    struct EchoHost {
        queue: EventQueue,
        inner: RecordingHost,
    }

    impl ScriptHost for EchoHost {
        fn chat(&self, script: ScriptId, channel: i32, message: &str) {
            self.queue.push(ScriptEvent::new("touch_start", vec![Value::Integer(2)]));
            self.inner.chat(script, channel, message);
        }
    }

    #[test]
    fn test_events_queued_mid_pass_wait_for_next_pass() {
        let script = instance(r#"default { touch_start(integer n) { llSay(0, (string)n); } }"#);
        let host = EchoHost {
            queue: script.queue().clone(),
            inner: RecordingHost::new(),
        };
        let now = Instant::now();
        script.run_pass(&host, now);
        script.post_event("touch_start", vec![Value::Integer(1)]);

        assert_eq!(script.run_pass(&host, now), PassOutcome::Ran(1));
        assert_eq!(host.inner.messages(), vec!["1"]);
        assert_eq!(script.queue().len(), 1);
    }

    struct SlowHost;

    impl ScriptHost for SlowHost {
        fn chat(&self, _script: ScriptId, _channel: i32, _message: &str) {
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    #[test]
    fn test_reset_restarts_execution_time() {
        let script = instance(r#"default { touch_start(integer n) { llSay(0, "slow"); llResetScript(); } }"#);
        let now = Instant::now();
        script.run_pass(&SlowHost, now);
        script.post_event("touch_start", vec![Value::Integer(1)]);
        script.run_pass(&SlowHost, now);

        assert!(script.snapshot().execution_time < Duration::from_millis(50));
    }

    #[test]
    fn test_abort_while_idle_does_not_kill_later_events() {
        let script = instance(r#"default { touch_start(integer n) { llSay(0, "touched"); } }"#);
        let host = RecordingHost::new();
        let now = Instant::now();
        script.run_pass(&host, now);

        script.abort();
        script.post_event("touch_start", vec![Value::Integer(1)]);
        assert_eq!(script.run_pass(&host, now), PassOutcome::Ran(1));
        assert_eq!(host.messages(), vec!["touched"]);
        assert!(host.diagnostics().is_empty());
    }
}
