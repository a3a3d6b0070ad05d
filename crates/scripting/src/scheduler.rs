//! Script engine
//!
//! Registry of running instances. Compiles sources against one shared API
//! surface and drives every instance through scheduler passes.

use crate::api::ApiSurface;
use crate::builtins::Builtins;
use crate::context::ScriptHost;
use crate::error::{Result, ScriptError};
use crate::instance::{InstanceSnapshot, PassOutcome, ScriptInstance};
use crate::lsl::compiler::{CompileOptions, Compiler};
use crate::lsl::unit::ExecutableUnit;
use crate::lsl::value::Value;
use dashmap::DashMap;
use lslvm_config::EngineConfig;
use lslvm_core::{IdGenerator, ScriptId};
use std::sync::Arc;
use std::time::Instant;

/// Owns every script instance of a host
pub struct ScriptEngine {
    config: Arc<EngineConfig>,
    compiler: Compiler,
    options: CompileOptions,
    builtins: Builtins,
    host: Arc<dyn ScriptHost>,
    instances: DashMap<ScriptId, Arc<ScriptInstance>>,
    ids: IdGenerator<ScriptId>,
}

impl ScriptEngine {
    /// Engine over the standard library
    pub fn new(config: EngineConfig, host: Arc<dyn ScriptHost>) -> Self {
        Self::with_library(config, Arc::new(ApiSurface::standard()), Builtins::standard(), host)
    }

    /// Engine over a custom API surface and its implementations
    pub fn with_library(config: EngineConfig, api: Arc<ApiSurface>, builtins: Builtins, host: Arc<dyn ScriptHost>) -> Self {
        let options = CompileOptions::from_config(&config);
        Self {
            config: Arc::new(config),
            compiler: Compiler::new(api),
            options,
            builtins,
            host,
            instances: DashMap::new(),
            ids: IdGenerator::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compile options applied to every script; set an include resolver here
    pub fn options_mut(&mut self) -> &mut CompileOptions {
        &mut self.options
    }

    pub fn compile(&self, source: &str) -> Result<Arc<ExecutableUnit>> {
        let unit = self.compiler.compile(source, &self.options)?;
        Ok(Arc::new(unit))
    }

    /// Compile and register a new instance
    pub fn load(&self, source: &str) -> Result<ScriptId> {
        let unit = self.compile(source)?;
        Ok(self.spawn(unit))
    }

    /// Register another instance of an already compiled unit
    pub fn spawn(&self, unit: Arc<ExecutableUnit>) -> ScriptId {
        let id = self.ids.get_available_id();
        let instance = ScriptInstance::new(id, unit, &self.builtins, self.config.clone());
        self.instances.insert(id, Arc::new(instance));
        tracing::debug!("Loaded {}", id);
        id
    }

    pub fn instance(&self, id: ScriptId) -> Option<Arc<ScriptInstance>> {
        self.instances.get(&id).map(|entry| entry.value().clone())
    }

    fn get(&self, id: ScriptId) -> Result<Arc<ScriptInstance>> {
        self.instance(id).ok_or(ScriptError::NotFound(id))
    }

    pub fn remove(&self, id: ScriptId) -> Option<Arc<ScriptInstance>> {
        let (_, instance) = self.instances.remove(&id)?;
        instance.abort();
        self.ids.release(id);
        tracing::debug!("Removed {}", id);
        Some(instance)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn ids(&self) -> Vec<ScriptId> {
        let mut ids: Vec<ScriptId> = self.instances.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    /// Queue an event; `false` when the queue was full
    pub fn post_event(&self, id: ScriptId, name: &str, args: Vec<Value>) -> Result<bool> {
        Ok(self.get(id)?.post_event(name, args))
    }

    /// Queue an event on every instance, returning how many accepted it
    pub fn broadcast(&self, name: &str, args: Vec<Value>) -> usize {
        self.snapshot_instances()
            .iter()
            .filter(|instance| instance.post_event(name, args.clone()))
            .count()
    }

    pub fn reset(&self, id: ScriptId) -> Result<()> {
        self.get(id)?.post_reset();
        Ok(())
    }

    pub fn abort(&self, id: ScriptId) -> Result<()> {
        self.get(id)?.abort();
        Ok(())
    }

    pub fn run_pass(&self, id: ScriptId, now: Instant) -> Result<PassOutcome> {
        Ok(self.get(id)?.run_pass(self.host.as_ref(), now))
    }

    /// Queue due timer events on every idle instance
    pub fn tick(&self, now: Instant) -> usize {
        self.snapshot_instances().iter().map(|instance| instance.tick(now)).sum()
    }

    /// One pass over every instance; returns how many dispatched events
    pub fn run_pass_all(&self, now: Instant) -> usize {
        self.snapshot_instances()
            .iter()
            .map(|instance| instance.run_pass(self.host.as_ref(), now))
            .filter(|outcome| matches!(outcome, PassOutcome::Ran(n) if *n > 0))
            .count()
    }

    pub fn snapshot(&self, id: ScriptId) -> Result<InstanceSnapshot> {
        Ok(self.get(id)?.snapshot())
    }

    pub fn restore(&self, id: ScriptId, snapshot: &InstanceSnapshot) -> Result<()> {
        self.get(id)?.restore(snapshot)
    }

    /// Every instance has nothing left to do
    pub fn is_idle(&self) -> bool {
        self.instances.iter().all(|entry| entry.value().is_idle())
    }

    // Passes run without holding map shards
    fn snapshot_instances(&self) -> Vec<Arc<ScriptInstance>> {
        self.instances.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RecordingHost;
    use crate::error::CompileErrorKind;

    const GREETER: &str = r#"
        default {
            state_entry() { llSay(0, "ready"); }
            touch_start(integer n) { llSay(0, "touched " + (string)n); }
        }
    "#;

    fn engine() -> (ScriptEngine, Arc<RecordingHost>) {
        let host = Arc::new(RecordingHost::new());
        (ScriptEngine::new(EngineConfig::default(), host.clone()), host)
    }

    #[test]
    fn test_load_and_drive() {
        let (engine, host) = engine();
        let id = engine.load(GREETER).unwrap();
        let now = Instant::now();

        engine.run_pass_all(now);
        engine.post_event(id, "touch_start", vec![Value::Integer(3)]).unwrap();
        assert_eq!(engine.run_pass_all(now), 1);
        assert_eq!(host.messages(), vec!["ready", "touched 3"]);
        assert!(engine.is_idle());
    }

    #[test]
    fn test_compile_error_is_reported() {
        let (engine, _) = engine();
        match engine.load("default { state_entry() { undefined(); } }") {
            Err(ScriptError::Compile(err)) => assert_eq!(err.kind, CompileErrorKind::Name),
            other => panic!("expected a compile error, got {:?}", other.map(|_| ())),
        }
        assert!(engine.is_empty());
    }

    #[test]
    fn test_unknown_script() {
        let (engine, _) = engine();
        let missing = ScriptId::new(99);
        assert!(matches!(engine.reset(missing), Err(ScriptError::NotFound(_))));
        assert!(engine.snapshot(missing).is_err());
    }

    #[test]
    fn test_instances_are_isolated() {
        let (engine, host) = engine();
        let unit = engine.compile(GREETER).unwrap();
        let first = engine.spawn(unit.clone());
        let second = engine.spawn(unit);
        assert_ne!(first, second);

        let now = Instant::now();
        engine.run_pass_all(now);
        host.clear();
        assert_eq!(engine.broadcast("touch_start", vec![Value::Integer(1)]), 2);
        engine.run_pass(first, now).unwrap();
        assert_eq!(host.messages(), vec!["touched 1"]);
        assert_eq!(engine.snapshot(second).unwrap().queued.len(), 1);

        engine.remove(first);
        assert_eq!(engine.ids(), vec![second]);
    }
}
