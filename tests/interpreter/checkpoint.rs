//! Checkpoint tests: snapshot between steps, JSON round trip, rehydration
//! into a fresh engine and continuing where the old one stopped

use std::cell::Cell;
use std::rc::Rc;

use super::{create_test_runtime, run_to_idle};
use spindle::{
    Completion, EngineError, Interpreter, ManualTimeProvider, NativeCall, NativeOutcome,
    NativeRegistry, ResolverId, Snapshot, StepResult, ThreadId, ThreadStatus, Value, SNAPSHOT_VERSION,
};

const PROGRAM: &str = r#"
    var log = [];
    function counter(name) {
        var n = 0;
        return function () { n++; log.push(name + n); return n; };
    }
    var a = counter('a');
    setTimeout(function () { a(); suspend(5); a(); }, 3);
    var total = 0;
    for (var i = 0; i < 4; i++) {
        try {
            if (i === 2) throw new Error('skip');
            total += a();
        } catch (e) {
            log.push(e.message);
        } finally {
            suspend(2);
        }
    }
    log.join(' ') + ' total=' + total
"#;

fn load(interp: &mut Interpreter, source: &str) -> ThreadId {
    interp
        .load(source)
        .unwrap_or_else(|e| panic!("load failed: {}", e))
}

fn finish(interp: &mut Interpreter, clock: &ManualTimeProvider) {
    run_to_idle(interp, clock).unwrap_or_else(|e| panic!("run failed: {}", e));
}

/// Serialize, parse back and rehydrate on a clock that reads `clock_start`.
fn round_trip(
    interp: &Interpreter,
    natives: NativeRegistry,
    clock_start: u64,
) -> (Interpreter, ManualTimeProvider) {
    let json = interp
        .snapshot()
        .and_then(|s| s.to_json())
        .unwrap_or_else(|e| panic!("snapshot failed: {}", e));
    let clock = ManualTimeProvider::starting_at(clock_start);
    let restored = Snapshot::from_json(&json)
        .and_then(|s| Interpreter::rehydrate(s, natives, Rc::new(clock.clone())))
        .unwrap_or_else(|e| panic!("rehydrate failed: {}", e));
    (restored, clock)
}

fn reference_result() -> Completion {
    let (mut interp, clock) = create_test_runtime();
    let main = load(&mut interp, PROGRAM);
    finish(&mut interp, &clock);
    interp
        .completion(main)
        .cloned()
        .unwrap_or_else(|| panic!("program did not finish"))
}

#[test]
fn test_reference_program_result() {
    assert_eq!(
        reference_result(),
        Completion::Returned(Value::from("a1 a2 a3 skip a4 a5 total=7"))
    );
}

#[test]
fn test_snapshot_at_any_step_resumes_identically() {
    let expected = reference_result();
    for cut in (0..400).step_by(13) {
        let (mut interp, clock) = create_test_runtime();
        let main = load(&mut interp, PROGRAM);
        for _ in 0..cut {
            match interp.step() {
                Ok(StepResult::Idle { next_wake: Some(at) }) => {
                    clock.advance(at.saturating_sub(interp.now()));
                }
                Ok(_) => {}
                Err(e) => panic!("step failed: {}", e),
            }
        }

        let (mut restored, new_clock) = round_trip(&interp, NativeRegistry::new(), 10_000);
        assert_eq!(restored.now(), interp.now(), "clock jumped at cut {}", cut);
        finish(&mut restored, &new_clock);
        assert_eq!(
            restored.completion(main),
            Some(&expected),
            "different result after a cut at step {}",
            cut
        );
    }
}

#[test]
fn test_engine_time_continues_across_restart() {
    let (mut interp, clock) = create_test_runtime();
    let main = load(&mut interp, "suspend(50); 'woke'");
    interp.run().unwrap_or_else(|e| panic!("run failed: {}", e));
    clock.advance(20);
    assert_eq!(interp.now(), 20);

    let (mut restored, new_clock) = round_trip(&interp, NativeRegistry::new(), 987_654);
    assert_eq!(restored.now(), 20);
    assert!(matches!(
        restored.thread_status(main),
        Some(ThreadStatus::Sleeping { until: 50 })
    ));

    // Not due yet.
    assert_eq!(
        restored.run().unwrap_or_else(|e| panic!("run failed: {}", e)),
        Some(50)
    );
    new_clock.advance(30);
    assert_eq!(
        restored.run().unwrap_or_else(|e| panic!("run failed: {}", e)),
        None
    );
    assert_eq!(
        restored.completion(main),
        Some(&Completion::Returned(Value::from("woke")))
    );
}

#[test]
fn test_long_expressions_survive_round_trip() {
    let terms = vec!["1"; 300].join(" + ");
    let source = format!("function f() {{ suspend(1); return {}; }} f()", terms);
    let (mut interp, clock) = create_test_runtime();
    let main = load(&mut interp, &source);
    interp.run().unwrap_or_else(|e| panic!("run failed: {}", e));

    let (mut restored, new_clock) = round_trip(&interp, NativeRegistry::new(), clock.get());
    new_clock.advance(1);
    finish(&mut restored, &new_clock);
    assert_eq!(
        restored.completion(main),
        Some(&Completion::Returned(Value::Number(300.0)))
    );
}

/// A blocking `fetch` that leaves its resolver in `slot`.
fn fetch_native(slot: Rc<Cell<Option<ResolverId>>>) -> impl Fn(&mut NativeCall<'_>) -> NativeOutcome {
    move |call: &mut NativeCall<'_>| {
        slot.set(Some(call.resolver()));
        NativeOutcome::Block
    }
}

#[test]
fn test_blocked_call_survives_restart() {
    let slot = Rc::new(Cell::new(None));
    let (mut interp, clock) = create_test_runtime();
    interp.register_native("host.fetch", fetch_native(Rc::clone(&slot)));
    interp
        .define_global_native("fetch", "host.fetch")
        .unwrap_or_else(|e| panic!("define failed: {}", e));
    let main = load(&mut interp, "var got = fetch(); 'got ' + got");
    finish(&mut interp, &clock);
    let resolver = slot.get().unwrap_or_else(|| panic!("fetch never ran"));

    let mut natives = NativeRegistry::new();
    natives.register("host.fetch", fetch_native(Rc::clone(&slot)));
    let (mut restored, new_clock) = round_trip(&interp, natives, 0);
    assert_eq!(restored.thread_status(main), Some(ThreadStatus::Blocked));
    restored
        .resolve(resolver, Value::from("data"))
        .unwrap_or_else(|e| panic!("resolve failed: {}", e));
    finish(&mut restored, &new_clock);
    assert_eq!(
        restored.completion(main),
        Some(&Completion::Returned(Value::from("got data")))
    );
}

#[test]
fn test_missing_native_fails_rehydration() {
    let (mut interp, _) = create_test_runtime();
    interp.register_native("host.log", |_: &mut NativeCall<'_>| {
        NativeOutcome::Return(Value::Undefined)
    });
    interp
        .define_global_native("log", "host.log")
        .unwrap_or_else(|e| panic!("define failed: {}", e));
    let snapshot = interp
        .snapshot()
        .unwrap_or_else(|e| panic!("snapshot failed: {}", e));
    let result = Interpreter::rehydrate(
        snapshot,
        NativeRegistry::new(),
        Rc::new(ManualTimeProvider::new()),
    );
    match result {
        Err(EngineError::Rehydrate(message)) => assert!(message.contains("host.log")),
        Err(other) => panic!("unexpected error {}", other),
        Ok(_) => panic!("rehydration should have failed"),
    }
}

#[test]
fn test_unsupported_version_is_rejected() {
    let (interp, _) = create_test_runtime();
    let mut snapshot = interp
        .snapshot()
        .unwrap_or_else(|e| panic!("snapshot failed: {}", e));
    snapshot.version = SNAPSHOT_VERSION + 1;
    assert!(matches!(
        Interpreter::rehydrate(snapshot, NativeRegistry::new(), Rc::new(ManualTimeProvider::new())),
        Err(EngineError::Rehydrate(_))
    ));
}

#[test]
fn test_malformed_json_is_rejected() {
    assert!(matches!(
        Snapshot::from_json("{\"version\": 1}"),
        Err(EngineError::Rehydrate(_))
    ));
}

#[test]
fn test_round_trip_is_stable() {
    let (mut interp, clock) = create_test_runtime();
    load(
        &mut interp,
        "var o = { nan: NaN, neg: -0, inf: -Infinity, s: 'x' }; setTimeout(function () {}, 30); suspend(10);",
    );
    interp.run().unwrap_or_else(|e| panic!("run failed: {}", e));

    let first = interp
        .snapshot()
        .and_then(|s| s.to_json())
        .unwrap_or_else(|e| panic!("snapshot failed: {}", e));
    let (restored, _) = round_trip(&interp, NativeRegistry::new(), clock.get());
    let second = restored
        .snapshot()
        .and_then(|s| s.to_json())
        .unwrap_or_else(|e| panic!("snapshot failed: {}", e));
    assert_eq!(first, second);
}

#[test]
fn test_special_numbers_survive() {
    let (mut interp, clock) = create_test_runtime();
    let main = load(&mut interp, "var o = { nan: NaN, neg: -0, inf: -Infinity }; suspend(1); o");
    interp.run().unwrap_or_else(|e| panic!("run failed: {}", e));

    let (mut restored, new_clock) = round_trip(&interp, NativeRegistry::new(), clock.get());
    new_clock.advance(1);
    finish(&mut restored, &new_clock);
    let Some(Completion::Returned(Value::Object(o))) = restored.completion(main).cloned() else {
        panic!("expected an object result");
    };
    assert_eq!(restored.get_property(o, "nan"), Value::Number(f64::NAN));
    assert_eq!(restored.get_property(o, "neg"), Value::Number(-0.0));
    assert_eq!(restored.get_property(o, "inf"), Value::Number(f64::NEG_INFINITY));
}
