//! LSL Virtual Machine
//!
//! Stack-based interpreter for compiled units. An [`Execution`] is the
//! suspended state of one event handler: it survives forced sleeps and is
//! resumed on a later scheduler pass. A [`Machine`] borrows everything the
//! handler may touch for the duration of one slice.

use crate::context::CallContext;
use crate::error::Fault;
use crate::lsl::ast::Type;
use crate::lsl::bytecode::Instruction;
use crate::lsl::operators::{apply_binary, apply_unary, make_list};
use crate::lsl::unit::ExecutableUnit;
use crate::lsl::value::Value;
use lslvm_config::EngineConfig;
use lslvm_core::{Rotation, Vector};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Library function implementation
pub type BuiltinFn = fn(&mut CallContext<'_>, &[Value]) -> Result<Value, Interrupt>;

/// Why a handler stopped before finishing
#[derive(Debug, Clone, PartialEq)]
pub enum Interrupt {
    /// `state name;`
    StateChange(u16),
    /// `llResetScript()`
    Reset,
    Fault(Fault),
}

impl From<Fault> for Interrupt {
    fn from(fault: Fault) -> Self {
        Interrupt::Fault(fault)
    }
}

/// How a slice of execution ended
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Finished(Value),
    /// Suspended by a forced delay; resume after the duration
    Sleeping(Duration),
}

/// Per-event execution budget
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub max_call_depth: usize,
    pub max_instructions: u64,
    pub max_time: Duration,
}

impl Limits {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_call_depth: config.max_call_depth,
            max_instructions: config.max_instructions_per_event,
            max_time: config.max_event_time,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    function: u32,
    ip: usize,
    base: usize,
}

/// Suspended handler state
#[derive(Debug, Clone)]
pub struct Execution {
    frames: Vec<Frame>,
    stack: Vec<Value>,
    locals: Vec<Value>,
    instructions: u64,
    active: Duration,
    slice_start: Option<Instant>,
}

impl Execution {
    /// Start `function` with its arguments
    pub fn new(unit: &ExecutableUnit, function: u32, args: Vec<Value>) -> Result<Self, Fault> {
        let proto = unit
            .function(function)
            .ok_or_else(|| Fault::Internal(format!("no routine #{}", function)))?;
        if args.len() != proto.params.len() {
            return Err(Fault::Type(format!(
                "'{}' takes {} argument(s), got {}",
                proto.name,
                proto.params.len(),
                args.len()
            )));
        }

        let mut locals = Vec::with_capacity(proto.locals as usize);
        for (arg, ty) in args.into_iter().zip(&proto.params) {
            let arg = if arg.type_of() == *ty {
                arg
            } else {
                arg.cast(*ty).ok_or_else(|| {
                    Fault::Type(format!("cannot pass {} as {} to '{}'", arg.type_of(), ty, proto.name))
                })?
            };
            locals.push(arg);
        }
        locals.resize(proto.locals as usize, Value::Void);

        Ok(Self {
            frames: vec![Frame {
                function,
                ip: 0,
                base: 0,
            }],
            stack: Vec::new(),
            locals,
            instructions: 0,
            active: Duration::ZERO,
            slice_start: None,
        })
    }

    /// Instructions executed so far
    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    /// Time spent running, excluding sleeps
    pub fn active_time(&self) -> Duration {
        self.active + self.slice_start.map_or(Duration::ZERO, |s| s.elapsed())
    }

    pub fn call_depth(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }

    fn pop(&mut self) -> Result<Value, Fault> {
        self.stack
            .pop()
            .ok_or_else(|| Fault::Internal("value stack underflow".into()))
    }

    fn pop_args(&mut self, argc: u16) -> Result<Vec<Value>, Fault> {
        let argc = argc as usize;
        if self.stack.len() < argc {
            return Err(Fault::Internal("value stack underflow".into()));
        }
        Ok(self.stack.split_off(self.stack.len() - argc))
    }

    fn pop_float(&mut self) -> Result<f64, Fault> {
        let value = self.pop()?;
        value
            .as_float()
            .ok_or_else(|| Fault::Type(format!("expected a float component, found {}", value.type_of())))
    }
}

/// Interpreter bound to one instance for one slice
pub struct Machine<'a> {
    pub unit: &'a ExecutableUnit,
    pub globals: &'a mut Vec<Value>,
    /// Implementations indexed like the API function table
    pub builtins: &'a [Option<BuiltinFn>],
    pub context: CallContext<'a>,
    pub limits: Limits,
    pub abort: &'a Arc<AtomicBool>,
}

impl<'a> Machine<'a> {
    /// Run until the handler finishes, sleeps or is interrupted
    pub fn run(&mut self, exec: &mut Execution) -> Result<Completion, Interrupt> {
        exec.slice_start = Some(Instant::now());
        let result = self.execute(exec);
        if let Some(start) = exec.slice_start.take() {
            exec.active += start.elapsed();
        }
        result
    }

    fn check_budget(&self, exec: &Execution) -> Result<(), Fault> {
        if self.abort.load(Ordering::Relaxed) {
            return Err(Fault::Aborted("stopped by the host".into()));
        }
        if exec.instructions > self.limits.max_instructions {
            return Err(Fault::Aborted(format!(
                "exceeded {} instructions",
                self.limits.max_instructions
            )));
        }
        if exec.active_time() > self.limits.max_time {
            return Err(Fault::Aborted(format!("exceeded {:?} of run time", self.limits.max_time)));
        }
        Ok(())
    }

    fn finish_value(&self, value: Value) -> Value {
        if self.unit.metadata.single_precision {
            value.to_single_precision()
        } else {
            value
        }
    }

    fn execute(&mut self, exec: &mut Execution) -> Result<Completion, Interrupt> {
        let unit = self.unit;

        loop {
            let Some(frame) = exec.frames.last().copied() else {
                return Ok(Completion::Finished(Value::Void));
            };
            let proto = unit
                .function(frame.function)
                .ok_or_else(|| Fault::Internal(format!("no routine #{}", frame.function)))?;
            let chunk = &proto.chunk;
            let instruction = *chunk
                .code
                .get(frame.ip)
                .ok_or_else(|| Fault::Internal(format!("ran off the end of '{}'", proto.name)))?;
            if let Some(top) = exec.frames.last_mut() {
                top.ip += 1;
            }
            exec.instructions += 1;

            match instruction {
                Instruction::Const(index) => {
                    let value = chunk
                        .constants
                        .get(index as usize)
                        .cloned()
                        .ok_or_else(|| Fault::Internal(format!("no constant #{}", index)))?;
                    exec.stack.push(value);
                }
                Instruction::Pop => {
                    exec.pop()?;
                }
                Instruction::Dup => {
                    let top = exec
                        .stack
                        .last()
                        .cloned()
                        .ok_or_else(|| Fault::Internal("value stack underflow".into()))?;
                    exec.stack.push(top);
                }

                Instruction::LoadLocal(slot) => {
                    let value = exec
                        .locals
                        .get(frame.base + slot as usize)
                        .cloned()
                        .ok_or_else(|| Fault::Internal(format!("no local #{}", slot)))?;
                    exec.stack.push(value);
                }
                Instruction::StoreLocal(slot) => {
                    let value = exec.pop()?;
                    let target = exec
                        .locals
                        .get_mut(frame.base + slot as usize)
                        .ok_or_else(|| Fault::Internal(format!("no local #{}", slot)))?;
                    *target = value;
                }
                Instruction::LoadGlobal(slot) => {
                    let value = self
                        .globals
                        .get(slot as usize)
                        .cloned()
                        .ok_or_else(|| Fault::Internal(format!("no global #{}", slot)))?;
                    exec.stack.push(value);
                }
                Instruction::StoreGlobal(slot) => {
                    let value = exec.pop()?;
                    let target = self
                        .globals
                        .get_mut(slot as usize)
                        .ok_or_else(|| Fault::Internal(format!("no global #{}", slot)))?;
                    *target = value;
                }

                Instruction::Cast(ty) => {
                    let value = exec.pop()?;
                    let cast = value
                        .cast(ty)
                        .ok_or_else(|| Fault::Type(format!("cannot convert {} to {}", value.type_of(), ty)))?;
                    if let Value::String(s) = &cast {
                        if s.len() > crate::lsl::operators::MAX_STRING_BYTES {
                            return Err(Fault::Sandbox("string too long".into()).into());
                        }
                    }
                    exec.stack.push(self.finish_value(cast));
                }
                Instruction::DeepCopy => {
                    let value = exec.pop()?;
                    exec.stack.push(value.deep_copy());
                }

                Instruction::Binary(op) => {
                    let right = exec.pop()?;
                    let left = exec.pop()?;
                    let result = apply_binary(op, left, right)?;
                    exec.stack.push(self.finish_value(result));
                }
                Instruction::Unary(op) => {
                    let operand = exec.pop()?;
                    let result = apply_unary(op, operand)?;
                    exec.stack.push(self.finish_value(result));
                }

                Instruction::MakeList(count) => {
                    let items = exec.pop_args(count)?;
                    exec.stack.push(make_list(items)?);
                }
                Instruction::MakeVector => {
                    let z = exec.pop_float()?;
                    let y = exec.pop_float()?;
                    let x = exec.pop_float()?;
                    exec.stack.push(self.finish_value(Value::Vector(Vector::new(x, y, z))));
                }
                Instruction::MakeRotation => {
                    let s = exec.pop_float()?;
                    let z = exec.pop_float()?;
                    let y = exec.pop_float()?;
                    let x = exec.pop_float()?;
                    exec.stack.push(self.finish_value(Value::Rotation(Rotation::new(x, y, z, s))));
                }
                Instruction::GetComponent(index) => {
                    let value = exec.pop()?;
                    exec.stack.push(get_component(&value, index)?);
                }
                Instruction::SetComponent(index) => {
                    let component = exec.pop()?;
                    let aggregate = exec.pop()?;
                    exec.stack.push(set_component(aggregate, index, component)?);
                }
                Instruction::Index(ty) => {
                    let index = exec.pop()?;
                    let container = exec.pop()?;
                    exec.stack.push(index_value(&container, &index, ty)?);
                }
                Instruction::ListLength => {
                    let list = exec.pop()?;
                    let items = list
                        .as_list()
                        .ok_or_else(|| Fault::Type(format!("expected a list, found {}", list.type_of())))?;
                    exec.stack.push(Value::Integer(items.len() as i32));
                }
                Instruction::ListElement(ty) => {
                    let index = exec.pop()?;
                    let list = exec.pop()?;
                    let element = match (&list, &index) {
                        (Value::List(items), Value::Integer(i)) => usize::try_from(*i).ok().and_then(|i| items.get(i)),
                        _ => None,
                    }
                    .ok_or_else(|| Fault::Internal("foreach index out of range".into()))?;
                    let value = element.cast(ty).ok_or_else(|| {
                        Fault::Type(format!("cannot iterate a {} entry as {}", element.type_of(), ty))
                    })?;
                    exec.stack.push(value);
                }

                Instruction::Call { function, argc } => {
                    if exec.call_depth() + 1 > self.limits.max_call_depth {
                        return Err(Fault::CallDepthLimitExceeded {
                            limit: self.limits.max_call_depth,
                        }
                        .into());
                    }
                    self.check_budget(exec)?;
                    let callee = unit
                        .function(function)
                        .ok_or_else(|| Fault::Internal(format!("no routine #{}", function)))?;
                    let args = exec.pop_args(argc)?;
                    let base = exec.locals.len();
                    exec.locals.extend(args);
                    exec.locals.resize(base + callee.locals as usize, Value::Void);
                    exec.frames.push(Frame {
                        function,
                        ip: 0,
                        base,
                    });
                }
                Instruction::CallBuiltin { builtin, argc } => {
                    self.check_budget(exec)?;
                    let args = exec.pop_args(argc)?;
                    if let Some(delay) = self.call_builtin(exec, builtin, &args)? {
                        return Ok(Completion::Sleeping(delay));
                    }
                }
                Instruction::CallExtern { index, argc } => {
                    self.check_budget(exec)?;
                    let args = exec.pop_args(argc)?;
                    let info = unit
                        .externs
                        .get(index as usize)
                        .ok_or_else(|| Fault::Internal(format!("no extern #{}", index)))?;
                    let result = self
                        .context
                        .host
                        .call_extern(self.context.script, &info.name, &args)
                        .map_err(|e| Fault::NotImplemented(format!("{} ({})", info.name, e)))?;
                    if info.ret != Type::Void {
                        let result = result.cast(info.ret).ok_or_else(|| {
                            Fault::Type(format!("'{}' returned {} instead of {}", info.name, result.type_of(), info.ret))
                        })?;
                        exec.stack.push(result);
                    }
                }

                Instruction::Jump(target) => {
                    self.jump(exec, frame.ip, target)?;
                }
                Instruction::JumpIfFalse(target) => {
                    if !exec.pop()?.is_true() {
                        self.jump(exec, frame.ip, target)?;
                    }
                }
                Instruction::JumpIfTrue(target) => {
                    if exec.pop()?.is_true() {
                        self.jump(exec, frame.ip, target)?;
                    }
                }

                Instruction::Return | Instruction::ReturnValue => {
                    let value = match instruction {
                        Instruction::ReturnValue => exec.pop()?,
                        _ => Value::Void,
                    };
                    exec.frames.pop();
                    exec.locals.truncate(frame.base);
                    if exec.frames.is_empty() {
                        return Ok(Completion::Finished(value));
                    }
                    if value != Value::Void {
                        exec.stack.push(value);
                    }
                }

                Instruction::ChangeState(state) => return Err(Interrupt::StateChange(state)),
            }
        }
    }

    /// Backward jumps are loop edges and count against the budget
    fn jump(&self, exec: &mut Execution, at: usize, target: u32) -> Result<(), Fault> {
        if (target as usize) <= at {
            self.check_budget(exec)?;
        }
        if let Some(top) = exec.frames.last_mut() {
            top.ip = target as usize;
        }
        Ok(())
    }

    /// Returns the forced delay the call imposes, if any
    fn call_builtin(&mut self, exec: &mut Execution, builtin: u32, args: &[Value]) -> Result<Option<Duration>, Interrupt> {
        let unit = self.unit;
        let sig = unit
            .api
            .function(builtin as usize)
            .ok_or_else(|| Fault::Internal(format!("no library function #{}", builtin)))?;
        if sig.deprecated {
            return Err(Fault::NotImplemented(sig.name.clone()).into());
        }
        let function = self
            .builtins
            .get(builtin as usize)
            .copied()
            .flatten()
            .ok_or_else(|| Fault::NotImplemented(sig.name.clone()))?;

        self.context.sleep = None;
        let result = function(&mut self.context, args)?;
        if sig.ret != Type::Void {
            exec.stack.push(self.finish_value(result));
        }

        let delay = sig.forced_delay.max(self.context.sleep.take().unwrap_or(0.0));
        if delay > 0.0 && delay.is_finite() {
            tracing::debug!("{} sleeps {:.3}s after {}", self.context.script, delay, sig.name);
            return Ok(Some(Duration::from_secs_f64(delay)));
        }
        Ok(None)
    }
}

fn get_component(value: &Value, index: u8) -> Result<Value, Fault> {
    let component = match value {
        Value::Vector(v) => v.component(index as usize).map(Value::Float),
        Value::Rotation(r) => r.component(index as usize).map(Value::Float),
        Value::Struct(_, fields) => fields.get(index as usize).cloned(),
        _ => None,
    };
    component.ok_or_else(|| Fault::Type(format!("{} has no component #{}", value.type_of(), index)))
}

fn set_component(aggregate: Value, index: u8, component: Value) -> Result<Value, Fault> {
    let missing = || Fault::Type(format!("no component #{} to assign", index));
    match aggregate {
        Value::Vector(v) => {
            let f = component.as_float().ok_or_else(missing)?;
            v.with_component(index as usize, f).map(Value::Vector).ok_or_else(missing)
        }
        Value::Rotation(r) => {
            let f = component.as_float().ok_or_else(missing)?;
            r.with_component(index as usize, f).map(Value::Rotation).ok_or_else(missing)
        }
        Value::Struct(id, mut fields) => {
            let slot = Arc::make_mut(&mut fields).get_mut(index as usize).ok_or_else(missing)?;
            *slot = component;
            Ok(Value::Struct(id, fields))
        }
        _ => Err(missing()),
    }
}

/// `container[index]`; out-of-range reads yield the type default
fn index_value(container: &Value, index: &Value, ty: Type) -> Result<Value, Fault> {
    let i = index
        .as_integer()
        .ok_or_else(|| Fault::Type(format!("cannot index with {}", index.type_of())))?;

    let element = match container {
        Value::List(items) => {
            let len = items.len() as i64;
            let at = if i < 0 { len + i as i64 } else { i as i64 };
            (0..len).contains(&at).then(|| items[at as usize].clone())
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len() as i64;
            let at = if i < 0 { len + i as i64 } else { i as i64 };
            (0..len).contains(&at).then(|| Value::String(chars[at as usize].to_string()))
        }
        Value::Vector(v) => v.component(i.max(0) as usize).map(Value::Float),
        Value::Rotation(r) => r.component(i.max(0) as usize).map(Value::Float),
        other => return Err(Fault::Type(format!("{} cannot be indexed", other.type_of()))),
    };

    match element {
        Some(value) => value
            .cast(ty)
            .ok_or_else(|| Fault::Type(format!("cannot read a {} entry as {}", value.type_of(), ty))),
        None => Ok(Value::default_for(ty, &[])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::Builtins;
    use crate::context::{RecordingHost, TimerSet};
    use crate::lsl::compiler::{compile, CompileOptions};
    use lslvm_core::ScriptId;

    struct Harness {
        unit: ExecutableUnit,
        globals: Vec<Value>,
        builtins: Vec<Option<BuiltinFn>>,
        host: RecordingHost,
        timers: TimerSet,
        clock: Instant,
        abort: Arc<AtomicBool>,
        limits: Limits,
    }

    impl Harness {
        fn new(source: &str) -> Self {
            let unit = compile(source, &CompileOptions::default().with_directive("#!Mode:aurora")).unwrap();
            let builtins = Builtins::standard().bind(&unit.api);
            let globals = unit.default_globals();
            Self {
                unit,
                globals,
                builtins,
                host: RecordingHost::new(),
                timers: TimerSet::new(),
                clock: Instant::now(),
                abort: Arc::new(AtomicBool::new(false)),
                limits: Limits::default(),
            }
        }

        fn call(&mut self, function: u32, args: Vec<Value>) -> Result<Completion, Interrupt> {
            let mut exec = Execution::new(&self.unit, function, args)?;
            let mut machine = Machine {
                unit: &self.unit,
                globals: &mut self.globals,
                builtins: &self.builtins,
                context: CallContext {
                    script: ScriptId::new(1),
                    host: &self.host,
                    timers: &mut self.timers,
                    now: Instant::now(),
                    clock: &mut self.clock,
                    min_timer_interval: Duration::from_millis(10),
                    sleep: None,
                },
                limits: self.limits,
                abort: &self.abort,
            };
            machine.run(&mut exec)
        }

        fn function(&self, name: &str) -> u32 {
            self.unit.functions.iter().position(|f| f.name == name).unwrap() as u32
        }
    }

    const DEFAULT: &str = "\ndefault { state_entry() { } }";

    #[test]
    fn test_arithmetic_and_calls() {
        let mut h = Harness::new(&format!(
            "integer sq(integer x) {{ return x * x; }}\nfloat avg(float a, float b) {{ return (a + b) / 2; }}{}",
            DEFAULT
        ));
        let sq = h.function("sq");
        assert_eq!(h.call(sq, vec![Value::Integer(7)]), Ok(Completion::Finished(Value::Integer(49))));
        let avg = h.function("avg");
        assert_eq!(
            h.call(avg, vec![Value::Integer(1), Value::Float(2.0)]),
            Ok(Completion::Finished(Value::Float(1.5)))
        );
    }

    #[test]
    fn test_recursion_limit() {
        let mut h = Harness::new(&format!("integer down(integer n) {{ return down(n + 1); }}{}", DEFAULT));
        h.limits.max_call_depth = 16;
        let down = h.function("down");
        assert_eq!(
            h.call(down, vec![Value::Integer(0)]),
            Err(Interrupt::Fault(Fault::CallDepthLimitExceeded { limit: 16 }))
        );
    }

    #[test]
    fn test_instruction_budget() {
        let mut h = Harness::new(&format!("spin() {{ while (TRUE) {{ }} }}{}", DEFAULT));
        h.limits.max_instructions = 1_000;
        let spin = h.function("spin");
        assert!(matches!(h.call(spin, vec![]), Err(Interrupt::Fault(Fault::Aborted(_)))));
    }

    #[test]
    fn test_abort_flag() {
        let mut h = Harness::new(&format!("spin() {{ while (TRUE) {{ }} }}{}", DEFAULT));
        h.abort.store(true, Ordering::Relaxed);
        let spin = h.function("spin");
        assert!(matches!(h.call(spin, vec![]), Err(Interrupt::Fault(Fault::Aborted(_)))));
    }

    #[test]
    fn test_division_by_zero_is_fatal() {
        let mut h = Harness::new(&format!("integer div(integer a) {{ return 10 / a; }}{}", DEFAULT));
        let div = h.function("div");
        match h.call(div, vec![Value::Integer(0)]) {
            Err(Interrupt::Fault(fault)) => assert!(!fault.is_recoverable()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_component_assignment() {
        let mut h = Harness::new(&format!(
            "vector bump(vector v) {{ v.z += 2; v.x++; return v; }}{}",
            DEFAULT
        ));
        let bump = h.function("bump");
        assert_eq!(
            h.call(bump, vec![Value::Vector(Vector::new(1.0, 2.0, 3.0))]),
            Ok(Completion::Finished(Value::Vector(Vector::new(2.0, 2.0, 5.0))))
        );
    }

    #[test]
    fn test_struct_fields() {
        let mut h = Harness::new(&format!(
            "struct Pair\n{{\n integer a;\n vector v;\n}}\nfloat f() {{ Pair p; p.a = 4; p.v.y = 1.5; return p.a + p.v.y; }}{}",
            DEFAULT
        ));
        let f = h.function("f");
        assert_eq!(h.call(f, vec![]), Ok(Completion::Finished(Value::Float(5.5))));
    }

    #[test]
    fn test_list_copy_on_assign() {
        let mut h = Harness::new(&format!(
            "integer f() {{ list a = [1, 2]; list b = a; b += 3; return llGetListLength(a) * 10 + llGetListLength(b); }}{}",
            DEFAULT
        ));
        let f = h.function("f");
        assert_eq!(h.call(f, vec![]), Ok(Completion::Finished(Value::Integer(23))));
    }

    #[test]
    fn test_forced_delay_suspends() {
        let mut h = Harness::new(&format!("f() {{ llInstantMessage(NULL_KEY, \"hi\"); }}{}", DEFAULT));
        let f = h.function("f");
        assert_eq!(h.call(f, vec![]), Ok(Completion::Sleeping(Duration::from_secs(2))));
    }

    #[test]
    fn test_deprecated_function_faults() {
        let mut h = Harness::new(&format!("f() {{ llSetPrimURL(\"x\"); }}{}", DEFAULT));
        let f = h.function("f");
        assert!(matches!(h.call(f, vec![]), Err(Interrupt::Fault(Fault::NotImplemented(_)))));
    }

    #[test]
    fn test_indexing() {
        let mut h = Harness::new(&format!(
            "string f() {{ list l = [\"a\", \"b\", \"c\"]; string s = \"xyz\"; return l[-1] + s[1] + l[7]; }}{}",
            DEFAULT
        ));
        let f = h.function("f");
        assert_eq!(h.call(f, vec![]), Ok(Completion::Finished(Value::string("cy"))));
    }

    #[test]
    fn test_extern_call() {
        let mut h = Harness::new(&format!("extern integer twice(integer);\ninteger f() {{ return twice(21); }}{}", DEFAULT));
        h.host = RecordingHost::new().with_extern("twice", |args| {
            Ok(Value::Integer(args[0].as_integer().unwrap_or(0) * 2))
        });
        let f = h.function("f");
        assert_eq!(h.call(f, vec![]), Ok(Completion::Finished(Value::Integer(42))));
    }
}
