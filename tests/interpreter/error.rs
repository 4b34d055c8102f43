//! Error-related tests

use super::{create_test_runtime, eval, run_to_idle, s, throws_error};
use spindle::{Completion, Value};

#[test]
fn test_error_constructor() {
    assert_eq!(eval("new Error('oops').message"), s("oops"));
    assert_eq!(eval("new Error('oops').name"), s("Error"));
    assert_eq!(eval("new Error().message"), s(""));
}

#[test]
fn test_error_without_new() {
    assert_eq!(eval("Error('plain').message"), s("plain"));
    assert_eq!(eval("TypeError('t') instanceof TypeError"), Value::Boolean(true));
}

#[test]
fn test_derived_error_constructors() {
    for name in ["TypeError", "RangeError", "ReferenceError", "SyntaxError"] {
        let source = format!(
            "var e = new {}('m'); e.name + '|' + e.message + '|' + (e instanceof Error)",
            name
        );
        assert_eq!(eval(&source), s(&format!("{}|m|true", name)));
    }
}

#[test]
fn test_error_tostring() {
    assert_eq!(
        eval("new Error('something went wrong').toString()"),
        s("Error: something went wrong")
    );
    assert_eq!(eval("new Error().toString()"), s("Error"));
    assert_eq!(
        eval("new RangeError('out of range') + ''"),
        s("RangeError: out of range")
    );
}

#[test]
fn test_error_tostring_custom_name() {
    assert_eq!(
        eval(
            r#"
            var e = new Error('oops');
            e.name = 'CustomError';
            e.toString()
        "#
        ),
        s("CustomError: oops")
    );
}

#[test]
fn test_error_stack_lists_calls() {
    assert_eq!(
        eval(
            r#"
            function inner() { return new Error('deep'); }
            function outer() { return inner(); }
            outer().stack
        "#
        ),
        s("Error: deep\n    at inner\n    at outer\n    at <thread>")
    );
    assert_eq!(eval("new TypeError('top').stack"), s("TypeError: top\n    at <thread>"));
}

#[test]
fn test_engine_raised_errors_are_catchable() {
    assert_eq!(
        eval(
            r#"
            var caught;
            try { var n = null; n.x; } catch (e) { caught = e; }
            (caught instanceof TypeError) + ' ' + caught.message
        "#
        ),
        s("true Cannot read property 'x' of null")
    );
    assert_eq!(
        eval("var k; try { missing; } catch (e) { k = e.name; } k"),
        s("ReferenceError")
    );
    assert_eq!(
        eval("var k; try { [].length = -1; } catch (e) { k = e.name + ': ' + e.message; } k"),
        s("RangeError: Invalid array length")
    );
}

#[test]
fn test_member_access_on_nullish() {
    assert!(throws_error("var u; u.x", "TypeError: Cannot read property 'x' of undefined"));
    assert!(throws_error("var n = null; n.y = 1", "TypeError: Cannot set property 'y' of null"));
}

#[test]
fn test_uncaught_error_completion_carries_stack() {
    let (mut interp, clock) = create_test_runtime();
    let main = interp
        .load("function boom() { throw new TypeError('bad'); } boom()")
        .unwrap_or_else(|e| panic!("load failed: {}", e));
    run_to_idle(&mut interp, &clock).unwrap_or_else(|e| panic!("run failed: {}", e));
    match interp.completion(main) {
        Some(Completion::Threw { value, stack }) => {
            assert_eq!(interp.display(value), "TypeError: bad");
            assert_eq!(stack, "TypeError: bad\n    at boom\n    at <thread>");
        }
        other => panic!("expected a throw, got {:?}", other),
    }
}

#[test]
fn test_thrown_primitive_completion() {
    let (mut interp, clock) = create_test_runtime();
    let main = interp
        .load("throw 'plain'")
        .unwrap_or_else(|e| panic!("load failed: {}", e));
    run_to_idle(&mut interp, &clock).unwrap_or_else(|e| panic!("run failed: {}", e));
    match interp.completion(main) {
        Some(Completion::Threw { value, stack }) => {
            assert_eq!(value, &s("plain"));
            assert_eq!(stack, "plain\n    at <thread>");
        }
        other => panic!("expected a throw, got {:?}", other),
    }
}
