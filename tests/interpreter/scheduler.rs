//! Scheduler tests: ready order, timeslices, yielding, killing threads

use super::{create_runtime_with, create_test_runtime, run_to_idle};
use spindle::{
    Completion, EngineConfig, EngineError, Interpreter, ManualTimeProvider, StepResult, ThreadId,
    ThreadStatus, Value,
};

/// Load `source` and run every thread as far as it can go.
fn run_all(source: &str) -> (Interpreter, ManualTimeProvider, ThreadId) {
    run_all_with(EngineConfig::default(), source)
}

fn run_all_with(config: EngineConfig, source: &str) -> (Interpreter, ManualTimeProvider, ThreadId) {
    let (mut interp, clock) = create_runtime_with(config);
    let main = interp
        .load(source)
        .unwrap_or_else(|e| panic!("load failed: {}", e));
    run_to_idle(&mut interp, &clock).unwrap_or_else(|e| panic!("run failed: {}", e));
    (interp, clock, main)
}

fn global_string(interp: &Interpreter, name: &str) -> String {
    match interp.global(name) {
        Some(value) => interp.display(&value),
        None => panic!("no global named {}", name),
    }
}

#[test]
fn test_threads_run_in_creation_order() {
    let (interp, _, _) = run_all(
        r#"
        var log = [];
        setTimeout(function () { log.push('a'); }, 0);
        setTimeout(function () { log.push('b'); }, 0);
        setTimeout(function () { log.push('c'); }, 0);
        log.push('main');
        "#,
    );
    assert_eq!(global_string(&interp, "log"), "main,a,b,c");
}

#[test]
fn test_yield_goes_to_back_of_queue() {
    let (interp, _, _) = run_all(
        r#"
        var log = [];
        function worker(name) {
            log.push(name + '1');
            suspend(0);
            log.push(name + '2');
        }
        setTimeout(worker, 0, 'a');
        setTimeout(worker, 0, 'b');
        "#,
    );
    assert_eq!(global_string(&interp, "log"), "a1,b1,a2,b2");
}

#[test]
fn test_without_timeslice_a_thread_runs_to_completion() {
    let source = r#"
        var log = '';
        function spin(mark) { for (var i = 0; i < 20; i++) log += mark; }
        setTimeout(spin, 0, 'a');
        setTimeout(spin, 0, 'b');
    "#;
    let (interp, _, _) = run_all(source);
    let log = global_string(&interp, "log");
    assert_eq!(log, format!("{}{}", "a".repeat(20), "b".repeat(20)));
}

#[test]
fn test_timeslice_interleaves_threads() {
    let source = r#"
        var log = '';
        function spin(mark) { for (var i = 0; i < 20; i++) log += mark; }
        setTimeout(spin, 0, 'a');
        setTimeout(spin, 0, 'b');
    "#;
    let (interp, _, _) = run_all_with(EngineConfig::default().with_timeslice(10), source);
    let log = global_string(&interp, "log");
    assert_eq!(log.len(), 40);
    assert_eq!(log.matches('a').count(), 20);
    assert!(log.contains("ab") && log.contains("ba"), "not interleaved: {}", log);
}

#[test]
fn test_timeslice_suspends_the_running_thread() {
    let (mut interp, _) = create_runtime_with(EngineConfig::default().with_timeslice(1));
    let main = interp
        .load("var x = 1; x + 1")
        .unwrap_or_else(|e| panic!("load failed: {}", e));
    let first = interp.step().unwrap_or_else(|e| panic!("step failed: {}", e));
    assert_eq!(first, StepResult::Suspend);
    assert_eq!(interp.ready_threads(), vec![main]);
}

#[test]
fn test_each_step_is_one_increment() {
    let (mut interp, _) = create_test_runtime();
    let main = interp
        .load("1 + 2")
        .unwrap_or_else(|e| panic!("load failed: {}", e));
    let mut steps = 0;
    loop {
        steps += 1;
        match interp.step().unwrap_or_else(|e| panic!("step failed: {}", e)) {
            StepResult::Continue => {}
            StepResult::Done(value) => {
                assert_eq!(value, Value::Number(3.0));
                break;
            }
            other => panic!("unexpected step result {:?}", other),
        }
    }
    assert!(steps > 3, "took only {} steps", steps);
    assert_eq!(interp.thread_status(main), Some(ThreadStatus::Zombie));
    assert_eq!(
        interp.step().unwrap_or_else(|e| panic!("step failed: {}", e)),
        StepResult::Idle { next_wake: None }
    );
}

#[test]
fn test_thread_ids_follow_creation_order() {
    let (interp, _, main) = run_all(
        r#"
        var mine = Thread.current().id;
        var t1 = setTimeout(function () {}, 0);
        var t2 = new Thread(function () {}, 0);
        var ids = [mine, t1.id, t2.id].join();
        "#,
    );
    assert_eq!(main, ThreadId(1));
    assert_eq!(global_string(&interp, "ids"), "1,2,3");
}

#[test]
fn test_thread_object_is_stable_and_read_only() {
    let (interp, _, _) = run_all(
        r#"
        var same = Thread.current() === Thread.current();
        var err = '';
        try { Thread.current().id = 7; } catch (e) { err = e.name; }
        var tag = '' + Thread.current();
        "#,
    );
    assert_eq!(global_string(&interp, "same"), "true");
    assert_eq!(global_string(&interp, "err"), "TypeError");
    assert_eq!(global_string(&interp, "tag"), "[object Thread]");
}

#[test]
fn test_thread_constructor_passes_arguments() {
    let (interp, _, _) = run_all(
        r#"
        var got;
        new Thread(function (a, b) { got = a + b; }, 0, 20, 22);
        "#,
    );
    assert_eq!(interp.global("got"), Some(Value::Number(42.0)));
}

#[test]
fn test_thread_kill_from_guest() {
    let (interp, _, _) = run_all(
        r#"
        var ran = false;
        var t = setTimeout(function () { ran = true; }, 50);
        var first = Thread.kill(t);
        var second = Thread.kill(t);
        "#,
    );
    assert_eq!(interp.global("ran"), Some(Value::Boolean(false)));
    assert_eq!(interp.global("first"), Some(Value::Boolean(true)));
    assert_eq!(interp.global("second"), Some(Value::Boolean(false)));
}

#[test]
fn test_thread_kills_itself() {
    let (interp, _, _) = run_all(
        r#"
        var after = false;
        var t = setTimeout(function () {
            Thread.kill(Thread.current());
            after = true;
        }, 0);
        "#,
    );
    assert_eq!(interp.global("after"), Some(Value::Boolean(false)));
    assert_eq!(interp.completion(ThreadId(2)), Some(&Completion::Killed));
}

#[test]
fn test_thread_kill_rejects_non_threads() {
    let (interp, _, main) = run_all("Thread.kill({})");
    match interp.completion(main) {
        Some(Completion::Threw { value, .. }) => {
            assert_eq!(interp.display(value), "TypeError: Thread.kill expects a Thread");
        }
        other => panic!("expected a TypeError, got {:?}", other),
    }
}

#[test]
fn test_host_kill() {
    let (mut interp, clock) = create_test_runtime();
    let main = interp
        .load("var t = setTimeout(function () {}, 100); suspend(1000);")
        .unwrap_or_else(|e| panic!("load failed: {}", e));
    interp.run().unwrap_or_else(|e| panic!("run failed: {}", e));
    let timer = ThreadId(2);
    assert!(matches!(
        interp.thread_status(timer),
        Some(ThreadStatus::Sleeping { until: 100 })
    ));

    assert!(matches!(interp.kill_thread(timer), Ok(true)));
    assert!(matches!(interp.kill_thread(timer), Ok(false)));
    assert_eq!(interp.completion(timer), Some(&Completion::Killed));
    assert!(matches!(
        interp.kill_thread(ThreadId(99)),
        Err(EngineError::UnknownThread(ThreadId(99)))
    ));

    assert!(matches!(interp.kill_thread(main), Ok(true)));
    assert_eq!(
        interp.run().unwrap_or_else(|e| panic!("run failed: {}", e)),
        None
    );
    assert_eq!(clock.get(), 0);
}

#[test]
fn test_spawn_call_from_host() {
    let (mut interp, clock) = create_test_runtime();
    interp
        .load("function add(a, b) { return a + b; }")
        .unwrap_or_else(|e| panic!("load failed: {}", e));
    run_to_idle(&mut interp, &clock).unwrap_or_else(|e| panic!("run failed: {}", e));

    let Some(Value::Object(add)) = interp.global("add") else {
        panic!("add is not an object");
    };
    let call = interp
        .spawn_call(add, Value::Undefined, vec![Value::from(40), Value::from(2)], 25, None)
        .unwrap_or_else(|e| panic!("spawn failed: {}", e));
    assert!(matches!(
        interp.thread_status(call),
        Some(ThreadStatus::Sleeping { until: 25 })
    ));
    run_to_idle(&mut interp, &clock).unwrap_or_else(|e| panic!("run failed: {}", e));
    assert_eq!(
        interp.completion(call),
        Some(&Completion::Returned(Value::Number(42.0)))
    );
    assert_eq!(clock.get(), 25);

    let not_callable = interp.create_object();
    assert!(matches!(
        interp.spawn_call(not_callable, Value::Undefined, vec![], 0, None),
        Err(EngineError::NotCallable(_))
    ));
}
