//! Garbage collection: unreachable objects and scopes are freed, roots and
//! captured scopes survive, finished threads are forgotten

use super::{create_test_runtime, eval, run_to_idle};
use spindle::{Completion, GcStats, Interpreter, ManualTimeProvider, ThreadId, Value};

fn run_source(source: &str) -> (Interpreter, ManualTimeProvider, ThreadId) {
    let (mut interp, clock) = create_test_runtime();
    let main = interp
        .load(source)
        .unwrap_or_else(|e| panic!("load failed: {}", e));
    run_to_idle(&mut interp, &clock).unwrap_or_else(|e| panic!("run failed: {}", e));
    (interp, clock, main)
}

fn collect(interp: &mut Interpreter) -> GcStats {
    interp
        .collect_garbage()
        .unwrap_or_else(|e| panic!("gc failed: {}", e))
}

fn global_object(interp: &Interpreter, name: &str) -> spindle::ObjectId {
    match interp.global(name) {
        Some(Value::Object(id)) => id,
        other => panic!("{} is not an object: {:?}", name, other),
    }
}

#[test]
fn test_unreachable_objects_are_freed() {
    let (mut interp, _, _) = run_source(
        r#"
        var keep = { a: 1 };
        (function () {
            for (var i = 0; i < 20; i++) {
                var temp = { v: i, next: { w: i } };
            }
        })();
        "#,
    );
    let keep = global_object(&interp, "keep");
    let stats = collect(&mut interp);
    assert!(stats.objects_freed >= 40, "freed only {}", stats.objects_freed);
    assert!(stats.scopes_freed > 0);
    assert!(interp.object(keep).is_some());
    assert_eq!(interp.get_property(keep, "a"), Value::Number(1.0));
}

#[test]
fn test_second_collection_frees_nothing() {
    let (mut interp, _, _) = run_source("var list = []; for (var i = 0; i < 5; i++) list.push({});");
    collect(&mut interp);
    assert_eq!(collect(&mut interp), GcStats::default());
}

#[test]
fn test_cycles_are_collected() {
    let (mut interp, _, _) = run_source(
        r#"
        var survivor = {};
        (function () {
            var a = {}; var b = {};
            a.other = b; b.other = a;
        })();
        "#,
    );
    let stats = collect(&mut interp);
    assert!(stats.objects_freed >= 2, "freed only {}", stats.objects_freed);
}

#[test]
fn test_closures_keep_captured_scopes() {
    let (mut interp, clock, _) = run_source(
        r#"
        var get = (function () {
            var secret = { v: 7 };
            return function () { return secret.v; };
        })();
        "#,
    );
    collect(&mut interp);

    let get = global_object(&interp, "get");
    let call = interp
        .spawn_call(get, Value::Undefined, vec![], 0, None)
        .unwrap_or_else(|e| panic!("spawn failed: {}", e));
    run_to_idle(&mut interp, &clock).unwrap_or_else(|e| panic!("run failed: {}", e));
    assert_eq!(
        interp.completion(call),
        Some(&Completion::Returned(Value::Number(7.0)))
    );
}

#[test]
fn test_pinned_host_objects_survive() {
    let (mut interp, _) = create_test_runtime();
    let loose = interp.create_object();
    let pinned = interp.create_object();
    interp.set_property(pinned, "label", Value::from("kept"));
    interp.pin(pinned);

    collect(&mut interp);
    assert!(interp.object(loose).is_none());
    assert!(interp.object(pinned).is_some());
    assert_eq!(interp.get_property(pinned, "label"), Value::from("kept"));

    interp.unpin(pinned);
    collect(&mut interp);
    assert!(interp.object(pinned).is_none());
}

#[test]
fn test_finished_threads_without_handles_are_pruned() {
    let (mut interp, _, main) = run_source("var t = setTimeout(function () {}, 0);");
    let timer = ThreadId(2);
    assert!(interp.completion(main).is_some());
    assert!(interp.completion(timer).is_some());

    // The timer's Thread object is still reachable through `t`.
    let stats = collect(&mut interp);
    assert_eq!(stats.threads_pruned, 1);
    assert_eq!(interp.completion(main), None);
    assert_eq!(interp.completion(timer), Some(&Completion::Returned(Value::Undefined)));

    let handle = global_object(&interp, "t");
    interp.set_global("t", Value::Null);
    let stats = collect(&mut interp);
    assert_eq!(stats.threads_pruned, 1);
    assert_eq!(interp.completion(timer), None);
    assert!(interp.object(handle).is_none());
}

#[test]
fn test_live_threads_are_never_pruned() {
    let (mut interp, _, main) = run_source("var o = { v: 1 }; suspend(100); o.v");
    let stats = collect(&mut interp);
    assert_eq!(stats.threads_pruned, 0);
    assert!(interp.thread(main).is_some());
}

#[test]
fn test_reachable_reports_roots() {
    let (interp, _, main) = run_source("var holder = { inner: {} }; suspend(5);");
    let holder = global_object(&interp, "holder");
    let inner = match interp.get_property(holder, "inner") {
        Value::Object(id) => id,
        other => panic!("inner is not an object: {:?}", other),
    };

    let reachable = interp.reachable();
    assert!(reachable.contains_object(holder));
    assert!(reachable.contains_object(inner));
    assert!(reachable.contains_scope(interp.global_scope()));
    assert!(reachable.threads.contains(&main));
}

#[test]
fn test_values_on_a_sleeping_stack_survive_collection() {
    // `eval` collects before every step.
    assert_eq!(
        eval(
            r#"
            function build(n) {
                var node = { v: n, next: null };
                suspend(1);
                if (n > 0) node.next = build(n - 1);
                return node;
            }
            var sum = 0;
            for (var node = build(5); node; node = node.next) sum += node.v;
            sum
            "#
        ),
        Value::Number(15.0)
    );
}
