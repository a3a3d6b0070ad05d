//! End-to-end runs of compiled scripts through the engine

use lslvm_config::EngineConfig;
use lslvm_core::{CompatMode, ScriptId};
use lslvm_scripting::{check, CompileErrorKind, CompileOptions, PassOutcome, RecordingHost, ScriptEngine, Value};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Rig {
    engine: ScriptEngine,
    host: Arc<RecordingHost>,
    id: ScriptId,
    now: Instant,
}

impl Rig {
    fn new(source: &str) -> Self {
        Self::with_config(source, EngineConfig::default())
    }

    fn with_config(source: &str, config: EngineConfig) -> Self {
        let host = Arc::new(RecordingHost::new());
        let engine = ScriptEngine::new(config, host.clone());
        let id = engine.load(source).unwrap();
        let now = Instant::now();
        engine.run_pass(id, now).unwrap();
        Self { engine, host, id, now }
    }

    fn post(&self, event: &str, args: Vec<Value>) {
        assert!(self.engine.post_event(self.id, event, args).unwrap());
    }

    fn pass(&self) -> PassOutcome {
        self.engine.run_pass(self.id, self.now).unwrap()
    }

    fn pass_at(&self, offset: Duration) -> PassOutcome {
        self.engine.run_pass(self.id, self.now + offset).unwrap()
    }

    fn messages(&self) -> Vec<String> {
        self.host.messages()
    }
}

#[test]
fn test_if_else_takes_true_branch() {
    let rig = Rig::new(
        r#"
        integer x = 5;
        default {
            state_entry() {
                if (x > 3) x = x + 1;
                else x = 0;
                llSay(0, (string)x);
            }
        }
        "#,
    );
    assert_eq!(rig.messages(), vec!["6"]);
}

#[test]
fn test_switch_dispatch_falls_through() {
    let rig = Rig::new(
        r#"
        #!Mode:assl
        default {
            state_entry() {
                integer x = 2;
                string out;
                switch (x) {
                    case 1: out += "one";
                    case 2: out += "two";
                    case 3: out += "three"; break;
                    default: out += "other";
                }
                llSay(0, out);
            }
        }
        "#,
    );
    assert_eq!(rig.messages(), vec!["twothree"]);
}

#[test]
fn test_globals_initialize_in_dependency_order() {
    let rig = Rig::new(
        r#"
        integer a = b + 1;
        integer b = 2;
        default { state_entry() { llSay(0, (string)a); } }
        "#,
    );
    assert_eq!(rig.messages(), vec!["3"]);

    let err = check(
        "integer a = b;\ninteger b = a;\ndefault { state_entry() { } }",
        &CompileOptions::default(),
    )
    .unwrap();
    assert_eq!(err.kind, CompileErrorKind::Internal);
}

#[test]
fn test_recursion_limit_aborts_only_the_event() {
    let config = EngineConfig {
        max_call_depth: 16,
        ..EngineConfig::default()
    };
    let rig = Rig::with_config(
        r#"
        integer depth(integer n) { return depth(n + 1); }
        default {
            touch_start(integer n) { depth(0); llSay(0, "unreachable"); }
            on_rez(integer p) { llSay(0, "alive"); }
        }
        "#,
        config,
    );
    rig.post("touch_start", vec![Value::Integer(1)]);
    rig.post("on_rez", vec![Value::Integer(0)]);

    assert_eq!(rig.pass(), PassOutcome::Ran(2));
    assert_eq!(rig.messages(), vec!["alive"]);
    assert!(rig.host.diagnostics()[0].contains("Call depth limit of 16"));
    assert!(rig.engine.snapshot(rig.id).unwrap().running);
}

#[test]
fn test_state_change_order_and_queue_discard() {
    let rig = Rig::new(
        r#"
        default {
            state_entry() { llSay(0, "default entry"); }
            state_exit() { llSay(0, "default exit"); }
            touch_start(integer n) { state two; }
        }
        state two {
            state_entry() { llSay(0, "two entry"); }
            touch_start(integer n) { llSay(0, "two touch"); }
        }
        "#,
    );
    rig.post("touch_start", vec![Value::Integer(1)]);
    rig.post("touch_start", vec![Value::Integer(1)]);
    rig.pass();

    assert_eq!(rig.messages(), vec!["default entry", "default exit", "two entry"]);
    assert_eq!(rig.engine.snapshot(rig.id).unwrap().state.as_deref(), Some("two"));
}

#[test]
fn test_queued_reset_survives_state_change() {
    let rig = Rig::new(
        r#"
        default {
            state_entry() { llSay(0, "entry"); }
            touch_start(integer n) { state two; }
        }
        state two { touch_start(integer n) { llSay(0, "two"); } }
        "#,
    );
    rig.post("touch_start", vec![Value::Integer(1)]);
    rig.post("touch_start", vec![Value::Integer(1)]);
    rig.engine.reset(rig.id).unwrap();
    rig.pass();

    assert_eq!(rig.messages(), vec!["entry", "entry"]);
    assert_eq!(rig.engine.snapshot(rig.id).unwrap().state.as_deref(), Some("default"));
}

#[test]
fn test_reset_restores_initial_values() {
    let rig = Rig::new(
        r#"
        list items = ["a", 1];
        vector v = <1, 2, 3>;
        integer n = 7;
        default {
            touch_start(integer t) { n = 0; items += [3]; v.x = 9; }
            on_rez(integer p) { llResetScript(); }
        }
        "#,
    );
    let initial = rig.engine.snapshot(rig.id).unwrap().fields;

    rig.post("touch_start", vec![Value::Integer(1)]);
    rig.pass();
    let touched = rig.engine.snapshot(rig.id).unwrap();
    assert_eq!(touched.field("n"), Some(&Value::Integer(0)));
    assert_ne!(touched.fields, initial);

    rig.post("on_rez", vec![Value::Integer(0)]);
    rig.pass();
    assert_eq!(rig.engine.snapshot(rig.id).unwrap().fields, initial);
}

#[test]
fn test_undefined_labels_reported_together() {
    let source = "default {\n state_entry() {\n  jump one;\n  jump two;\n }\n}";
    let err = check(source, &CompileOptions::default()).unwrap();
    assert_eq!(err.kind, CompileErrorKind::Label);
    assert_eq!(err.line, 3);
    assert!(err.message.contains("one"));
    assert!(err.message.contains("two"));
}

#[test]
fn test_aurora_grammar_end_to_end() {
    let rig = Rig::new(
        r#"
        #!Mode:aurora
        struct Counter
        {
            integer hits;
            string last;
        }
        Counter counter;
        default {
            integer entries;
            state_entry() { entries++; llSetNamedTimer("pulse", 1.0); }
            timer pulse() {
                foreach (string word in ["x", "y"]) {
                    counter.hits++;
                    counter.last = word;
                }
                llSay(0, counter.last + (string)counter.hits + (string)entries);
                llSetNamedTimer("pulse", 0);
            }
        }
        "#,
    );
    assert_eq!(rig.pass_at(Duration::from_secs(2)), PassOutcome::Ran(1));
    assert_eq!(rig.messages(), vec!["y21"]);
    assert!(rig.engine.is_idle());
}

#[test]
fn test_sleep_resumes_on_later_pass() {
    let rig = Rig::new(
        r#"
        default {
            touch_start(integer n) {
                llSay(0, "before");
                llSleep(0.5);
                llSay(0, "after");
            }
        }
        "#,
    );
    rig.post("touch_start", vec![Value::Integer(1)]);
    assert_eq!(rig.pass(), PassOutcome::Sleeping);
    assert_eq!(rig.messages(), vec!["before"]);
    assert!(!rig.engine.is_idle());

    assert_eq!(rig.pass_at(Duration::from_secs(1)), PassOutcome::Ran(0));
    assert_eq!(rig.messages(), vec!["before", "after"]);
}

#[test]
fn test_config_file_sets_default_mode() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# engine options").unwrap();
    writeln!(file, "maxcalldepth = 4").unwrap();
    writeln!(file, "defaultmode = assl").unwrap();
    let config = EngineConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.default_mode, CompatMode::Assl);

    let rig = Rig::with_config(
        "default { state_entry() { switch (1) { case 1: llSay(0, (string)aaMax(3, 4)); } } }",
        config,
    );
    assert_eq!(rig.messages(), vec!["4"]);
}

#[test]
fn test_each_loop_kind_runs() {
    let rig = Rig::new(
        r#"
        #!Mode:assl
        default {
            state_entry() {
                integer i;
                string out;
                for (i = 0; i < 3; i++) out += (string)i;
                llSay(0, out);

                out = "";
                i = 0;
                while (i < 3) { out += (string)i; i++; }
                llSay(0, out);

                out = "";
                i = 0;
                do {
                    i++;
                    if (i == 2) continue;
                    out += (string)i;
                } while (i < 4);
                llSay(0, out);
            }
        }
        "#,
    );
    assert_eq!(rig.messages(), vec!["012", "012", "134"]);
}

#[test]
fn test_break_and_continue_leave_outer_loop() {
    let rig = Rig::new(
        r#"
        #!Mode:assl
        default {
            state_entry() {
                integer i;
                integer j;
                string out;
                for (i = 0; i < 3; i++) {
                    for (j = 0; j < 3; j++) {
                        if (j == 1) continue 2;
                        if (i == 2) break 2;
                        out += (string)i + (string)j;
                    }
                }
                llSay(0, out);
            }
        }
        "#,
    );
    assert_eq!(rig.messages(), vec!["0010"]);
}

#[test]
fn test_continue_inside_switch_targets_loop() {
    let rig = Rig::new(
        r#"
        #!Mode:assl
        default {
            state_entry() {
                integer i;
                string out;
                while (i < 4) {
                    i++;
                    switch (i) {
                        case 2: continue;
                        case 4: continue;
                        default: out += (string)i;
                    }
                }
                llSay(0, out);
            }
        }
        "#,
    );
    assert_eq!(rig.messages(), vec!["13"]);
}

#[test]
fn test_switch_break_and_default() {
    let rig = Rig::new(
        r#"
        #!Mode:assl
        integer pick(integer x) {
            integer a = -1;
            switch (x) {
                case 1: a = 1; break;
                case 2: a = 2; break;
                default: a = 0;
            }
            return a;
        }
        default {
            state_entry() { llSay(0, (string)pick(2) + (string)pick(7) + (string)pick(1)); }
        }
        "#,
    );
    assert_eq!(rig.messages(), vec!["201"]);
}

#[test]
fn test_state_change_inside_state_exit_retargets() {
    let rig = Rig::new(
        r#"
        default {
            touch_start(integer n) { state a; }
            state_exit() { llSay(0, "d exit"); state b; }
        }
        state a { state_entry() { llSay(0, "a entry"); } }
        state b { state_entry() { llSay(0, "b entry"); } }
        "#,
    );
    rig.post("touch_start", vec![Value::Integer(1)]);
    rig.pass();

    assert_eq!(rig.messages(), vec!["d exit", "b entry"]);
    assert_eq!(rig.engine.snapshot(rig.id).unwrap().state.as_deref(), Some("b"));
}

#[test]
fn test_reset_inside_state_exit_reenters_default() {
    let rig = Rig::new(
        r#"
        integer count = 1;
        default {
            state_entry() { llSay(0, "d entry " + (string)count); }
            touch_start(integer n) { count = 5; state a; }
            state_exit() { llSay(0, "d exit"); llResetScript(); }
        }
        state a { state_entry() { llSay(0, "a entry"); } }
        "#,
    );
    rig.post("touch_start", vec![Value::Integer(1)]);
    rig.pass();

    assert_eq!(rig.messages(), vec!["d entry 1", "d exit", "d entry 1"]);
    let snapshot = rig.engine.snapshot(rig.id).unwrap();
    assert_eq!(snapshot.state.as_deref(), Some("default"));
    assert_eq!(snapshot.field("count"), Some(&Value::Integer(1)));
}
