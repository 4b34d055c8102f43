//! Blocking bridge tests: natives that park their caller, one-shot
//! resolvers, deferred settlement and reentrancy

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::{create_test_runtime, run_to_idle};
use spindle::{
    Completion, EngineError, Interpreter, ManualTimeProvider, NativeCall, NativeOutcome,
    ResolverId, StepResult, ThreadId, ThreadStatus, Value,
};

type Slot = Rc<Cell<Option<ResolverId>>>;

/// An engine with a global `fetch()` that blocks and leaves its resolver
/// in the returned slot.
fn runtime_with_fetch() -> (Interpreter, ManualTimeProvider, Slot) {
    let (mut interp, clock) = create_test_runtime();
    let slot: Slot = Rc::new(Cell::new(None));
    let handle = Rc::clone(&slot);
    interp.register_native("host.fetch", move |call: &mut NativeCall<'_>| {
        handle.set(Some(call.resolver()));
        NativeOutcome::Block
    });
    interp
        .define_global_native("fetch", "host.fetch")
        .unwrap_or_else(|e| panic!("define failed: {}", e));
    (interp, clock, slot)
}

fn load(interp: &mut Interpreter, source: &str) -> ThreadId {
    interp
        .load(source)
        .unwrap_or_else(|e| panic!("load failed: {}", e))
}

fn run(interp: &mut Interpreter, clock: &ManualTimeProvider) {
    run_to_idle(interp, clock).unwrap_or_else(|e| panic!("run failed: {}", e));
}

fn taken(slot: &Slot) -> ResolverId {
    slot.get().unwrap_or_else(|| panic!("native never took a resolver"))
}

#[test]
fn test_resolve_resumes_blocked_thread() {
    let (mut interp, clock, slot) = runtime_with_fetch();
    let main = load(&mut interp, "var v = fetch(); v + 1");
    run(&mut interp, &clock);

    assert_eq!(interp.thread_status(main), Some(ThreadStatus::Blocked));
    let resolver = taken(&slot);
    interp
        .resolve(resolver, Value::from(41))
        .unwrap_or_else(|e| panic!("resolve failed: {}", e));
    assert_eq!(interp.ready_threads(), vec![main]);

    run(&mut interp, &clock);
    assert_eq!(
        interp.completion(main),
        Some(&Completion::Returned(Value::Number(42.0)))
    );
}

#[test]
fn test_block_step_reports_resolver() {
    let (mut interp, _, slot) = runtime_with_fetch();
    load(&mut interp, "fetch()");
    let blocked = loop {
        match interp.step().unwrap_or_else(|e| panic!("step failed: {}", e)) {
            StepResult::Continue => {}
            StepResult::Block(resolver) => break resolver,
            other => panic!("unexpected step result {:?}", other),
        }
    };
    assert_eq!(blocked, Some(taken(&slot)));
}

#[test]
fn test_reject_throws_in_blocked_thread() {
    let (mut interp, clock, slot) = runtime_with_fetch();
    let main = load(
        &mut interp,
        "var r; try { fetch(); r = 'no'; } catch (e) { r = 'caught ' + e; } r",
    );
    run(&mut interp, &clock);
    interp
        .reject(taken(&slot), Value::from("nope"))
        .unwrap_or_else(|e| panic!("reject failed: {}", e));
    run(&mut interp, &clock);
    assert_eq!(
        interp.completion(main),
        Some(&Completion::Returned(Value::from("caught nope")))
    );
}

#[test]
fn test_resolver_settles_once() {
    let (mut interp, clock, slot) = runtime_with_fetch();
    load(&mut interp, "fetch()");
    run(&mut interp, &clock);
    let resolver = taken(&slot);

    assert!(interp.resolve(resolver, Value::from(1)).is_ok());
    assert!(matches!(
        interp.resolve(resolver, Value::from(2)),
        Err(EngineError::ResolverSettled(r)) if r == resolver
    ));
    assert!(matches!(
        interp.reject(resolver, Value::Null),
        Err(EngineError::ResolverSettled(_))
    ));
    assert!(matches!(
        interp.resolve(ResolverId(999), Value::Null),
        Err(EngineError::UnknownResolver(ResolverId(999)))
    ));
}

#[test]
fn test_settlement_is_attributed_to_the_blocked_thread() {
    let (mut interp, clock, slot) = runtime_with_fetch();
    load(
        &mut interp,
        r#"
        var log = [];
        setTimeout(function () {
            log.push('sleeper start');
            suspend(50);
            log.push('sleeper end');
        }, 0);
        fetch();
        log.push('main resumed');
        "#,
    );
    // Main blocks, the sleeper starts and goes to sleep.
    assert_eq!(
        interp.run().unwrap_or_else(|e| panic!("run failed: {}", e)),
        Some(50)
    );
    let main = ThreadId(1);
    let sleeper = ThreadId(2);
    interp
        .reject(taken(&slot), Value::from("host failure"))
        .unwrap_or_else(|e| panic!("reject failed: {}", e));
    run(&mut interp, &clock);

    match interp.completion(main) {
        Some(Completion::Threw { value, .. }) => {
            assert_eq!(value, &Value::from("host failure"));
        }
        other => panic!("main should have thrown, got {:?}", other),
    }
    assert!(matches!(
        interp.completion(sleeper),
        Some(Completion::Returned(_))
    ));
    let log = interp.global("log").map(|v| interp.display(&v));
    assert_eq!(log.as_deref(), Some("sleeper start,sleeper end"));
}

#[test]
fn test_settling_inside_a_native_is_deferred_until_the_step_ends() {
    let (mut interp, clock) = create_test_runtime();
    interp.register_native("host.instant", |call: &mut NativeCall<'_>| {
        let value = call.arg(0);
        let resolver = call.resolver();
        match call.engine().resolve(resolver, value) {
            Ok(()) => NativeOutcome::Block,
            Err(error) => call.type_error(error.to_string()),
        }
    });
    interp
        .define_global_native("instant", "host.instant")
        .unwrap_or_else(|e| panic!("define failed: {}", e));
    let main = load(&mut interp, "instant(5) * 2");
    run(&mut interp, &clock);
    assert_eq!(
        interp.completion(main),
        Some(&Completion::Returned(Value::Number(10.0)))
    );
}

#[test]
fn test_block_without_resolver_waits_for_wake() {
    let (mut interp, clock) = create_test_runtime();
    interp.register_native("host.park", |_: &mut NativeCall<'_>| NativeOutcome::Block);
    interp
        .define_global_native("park", "host.park")
        .unwrap_or_else(|e| panic!("define failed: {}", e));
    let main = load(&mut interp, "park(); 'woken'");
    run(&mut interp, &clock);
    assert_eq!(interp.thread(main).and_then(|t| t.blocked_on), None);
    assert!(matches!(interp.wake(main), Ok(true)));
    run(&mut interp, &clock);
    assert_eq!(
        interp.completion(main),
        Some(&Completion::Returned(Value::from("woken")))
    );
}

#[test]
fn test_killing_blocked_thread_cancels_resolver() {
    let (mut interp, clock, slot) = runtime_with_fetch();
    let main = load(&mut interp, "fetch()");
    run(&mut interp, &clock);
    let resolver = taken(&slot);
    assert!(matches!(interp.kill_thread(main), Ok(true)));
    assert!(matches!(
        interp.resolve(resolver, Value::Null),
        Err(EngineError::ResolverSettled(_))
    ));
    assert_eq!(interp.completion(main), Some(&Completion::Killed));
}

/// `call_back(fn)` runs `fn` on its own thread and blocks the caller until
/// that thread finishes.
fn runtime_with_call_back() -> (Interpreter, ManualTimeProvider) {
    let (mut interp, clock) = create_test_runtime();
    interp.register_native("host.callBack", |call: &mut NativeCall<'_>| {
        let Some(function) = call.arg(0).as_object() else {
            return call.type_error("callBack expects a function");
        };
        let resolver = call.resolver();
        match call
            .engine()
            .spawn_call(function, Value::Undefined, vec![], 0, Some(resolver))
        {
            Ok(_) => NativeOutcome::Block,
            Err(error) => call.type_error(error.to_string()),
        }
    });
    interp
        .define_global_native("callBack", "host.callBack")
        .unwrap_or_else(|e| panic!("define failed: {}", e));
    (interp, clock)
}

#[test]
fn test_spawned_call_resolves_the_waiting_caller() {
    let (mut interp, clock) = runtime_with_call_back();
    let main = load(
        &mut interp,
        "var v = callBack(function () { suspend(5); return 7; }); v * 6",
    );
    run(&mut interp, &clock);
    assert_eq!(
        interp.completion(main),
        Some(&Completion::Returned(Value::Number(42.0)))
    );
    assert_eq!(clock.get(), 5);
}

#[test]
fn test_spawned_call_throw_rejects_the_waiting_caller() {
    let (mut interp, clock) = runtime_with_call_back();
    let main = load(
        &mut interp,
        "var r; try { callBack(function () { throw 'inner'; }); } catch (e) { r = 'got ' + e; } r",
    );
    run(&mut interp, &clock);
    assert_eq!(
        interp.completion(main),
        Some(&Completion::Returned(Value::from("got inner")))
    );
    assert!(matches!(
        interp.completion(ThreadId(2)),
        Some(Completion::Threw { .. })
    ));
}

#[test]
fn test_engine_cannot_be_reentered_from_a_native() {
    let (mut interp, clock) = create_test_runtime();
    let errors: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&errors);
    interp.register_native("host.reenter", move |call: &mut NativeCall<'_>| {
        let engine = call.engine();
        if let Err(error) = engine.snapshot() {
            sink.borrow_mut().push(error.to_string());
        }
        if let Err(error) = engine.run() {
            sink.borrow_mut().push(error.to_string());
        }
        if let Err(error) = engine.step() {
            sink.borrow_mut().push(error.to_string());
        }
        if let Err(error) = engine.collect_garbage() {
            sink.borrow_mut().push(error.to_string());
        }
        NativeOutcome::Return(Value::Undefined)
    });
    interp
        .define_global_native("reenter", "host.reenter")
        .unwrap_or_else(|e| panic!("define failed: {}", e));
    let main = load(&mut interp, "reenter(); 'survived'");
    run(&mut interp, &clock);

    let errors = errors.borrow();
    assert_eq!(errors.len(), 4);
    assert!(errors.iter().all(|e| e.starts_with("engine re-entered while")));
    assert_eq!(
        interp.completion(main),
        Some(&Completion::Returned(Value::from("survived")))
    );
}

#[test]
fn test_unknown_native_id_is_rejected() {
    let (mut interp, _) = create_test_runtime();
    assert!(matches!(
        interp.define_global_native("nothing", "host.nothing"),
        Err(EngineError::UnknownNative(id)) if id == "host.nothing"
    ));
}
