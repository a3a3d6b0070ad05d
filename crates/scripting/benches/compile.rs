use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lslvm_scripting::{compile, CompileOptions};

const SCRIPT: &str = r#"
integer total = base * 2;
integer base = 21;
list names = ["alpha", "beta", "gamma"];

integer sum(integer n) {
    integer acc;
    integer i;
    for (i = 0; i < n; i++) {
        if (i % 2 == 0) acc += i;
        else acc -= 1;
    }
    return acc;
}

default {
    state_entry() {
        llSetTimerEvent(1.0);
        llSay(0, llDumpList2String(names, ", ") + " " + (string)sum(total));
    }

    touch_start(integer n) {
        vector v = <1, 2, 3>;
        v.x += n;
        llSay(0, (string)v);
        state busy;
    }
}

state busy {
    timer() { state default; }
}
"#;

fn bench_compile(c: &mut Criterion) {
    let options = CompileOptions::default();
    c.bench_function("compile_lsl", |b| b.iter(|| compile(black_box(SCRIPT), &options).unwrap()));
}

criterion_group!(benches, bench_compile);
criterion_main!(benches);
