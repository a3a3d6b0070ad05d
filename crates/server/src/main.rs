//! LSLVM - LSL script runner
//!
//! Compiles one script, loads it into a script engine and drives scheduler
//! passes until the script goes idle.
//!
//! ```text
//! lslvm <script.lsl> [--config file] [--event name]...
//! ```

use anyhow::{bail, Context, Result};
use lslvm_config::EngineConfig;
use lslvm_scripting::{LogHost, ScriptEngine, ScriptError, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Command line options
#[derive(Debug, PartialEq)]
struct Args {
    script: PathBuf,
    config: Option<PathBuf>,
    /// Events posted after the script enters `default`
    events: Vec<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let mut script = None;
    let mut config = None;
    let mut events = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config = Some(PathBuf::from(args.next().context("--config needs a file")?));
            }
            "--event" => {
                events.push(args.next().context("--event needs an event name")?);
            }
            flag if flag.starts_with("--") => bail!("unknown option '{}'", flag),
            path => {
                if script.replace(PathBuf::from(path)).is_some() {
                    bail!("only one script can be run at a time");
                }
            }
        }
    }

    Ok(Args {
        script: script.context("usage: lslvm <script.lsl> [--config file] [--event name]...")?,
        config,
        events,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = parse_args(std::env::args().skip(1))?;

    let config = match &args.config {
        Some(path) => {
            info!("📂 Loading configuration from {}...", path.display());
            EngineConfig::load_from_file(path).with_context(|| format!("reading {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    config.display();

    let source = tokio::fs::read_to_string(&args.script)
        .await
        .with_context(|| format!("reading {}", args.script.display()))?;

    let engine = ScriptEngine::new(config.clone(), Arc::new(LogHost));
    let id = match engine.load(&source) {
        Ok(id) => id,
        Err(ScriptError::Compile(err)) => {
            error!("💥 {}: {}", args.script.display(), err);
            bail!("{} did not compile", args.script.display());
        }
        Err(err) => return Err(err.into()),
    };
    info!("✓ Compiled {} as {}", args.script.display(), id);

    // The first pass enters `default`; requested events follow it
    engine.run_pass_all(Instant::now());
    if let Some(instance) = engine.instance(id) {
        for name in &args.events {
            let Some(sig) = instance.unit().api.event_signature(name) else {
                warn!("⚠️  Unknown event '{}'", name);
                continue;
            };
            let params: Vec<Value> = sig.params.iter().map(|ty| Value::default_for(*ty, &[])).collect();
            instance.post_event(name, params);
        }
    }

    let mut interval = tokio::time::interval(config.pass_interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                engine.run_pass_all(Instant::now());
                if engine.is_idle() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted");
                engine.abort(id)?;
                break;
            }
        }
    }

    let snapshot = engine.snapshot(id)?;
    info!(
        "🏁 {} finished in state {} after {:?} of execution",
        id,
        snapshot.state.as_deref().unwrap_or("<none>"),
        snapshot.execution_time
    );
    if !snapshot.running {
        bail!("{} stopped on a fatal error", id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_args() {
        let parsed = args(&["hello.lsl", "--event", "touch_start", "--config", "engine.txt"]).unwrap();
        assert_eq!(
            parsed,
            Args {
                script: PathBuf::from("hello.lsl"),
                config: Some(PathBuf::from("engine.txt")),
                events: vec!["touch_start".to_string()],
            }
        );
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(args(&[]).is_err());
        assert!(args(&["a.lsl", "b.lsl"]).is_err());
        assert!(args(&["a.lsl", "--verbose"]).is_err());
        assert!(args(&["a.lsl", "--event"]).is_err());
    }
}
