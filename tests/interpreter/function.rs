//! Function tests: declarations, closures, recursion, arguments, this, new

use super::{eval, eval_display, s, throws_error};
use spindle::Value;

// -----------------------------------------------------------------------------
// Declarations and calls
// -----------------------------------------------------------------------------

#[test]
fn test_function_declaration_and_call() {
    assert_eq!(
        eval("function add(a, b) { return a + b; } add(2, 3)"),
        Value::Number(5.0)
    );
    assert_eq!(eval("function f() {} f()"), Value::Undefined);
    assert_eq!(eval("function f() { return; } f()"), Value::Undefined);
}

#[test]
fn test_declarations_are_hoisted() {
    assert_eq!(eval("var r = twice(4); function twice(n) { return n * 2; } r"), Value::Number(8.0));
}

#[test]
fn test_missing_and_extra_arguments() {
    assert_eq!(eval("function f(a, b) { return b; } f(1)"), Value::Undefined);
    assert_eq!(eval("function f(a) { return a; } f(1, 2, 3)"), Value::Number(1.0));
}

#[test]
fn test_function_properties() {
    assert_eq!(eval("function foo(a, b, c) {} foo.length"), Value::Number(3.0));
    assert_eq!(eval("function foo() {} foo.name"), s("foo"));
    assert_eq!(eval("var f = function () {}; f.name"), s(""));
    assert_eq!(
        eval("function P() {} P.prototype.constructor === P"),
        Value::Boolean(true)
    );
}

// -----------------------------------------------------------------------------
// Closures
// -----------------------------------------------------------------------------

#[test]
fn test_closure_captures_variable() {
    assert_eq!(
        eval(
            r#"
            function counter() {
                var n = 0;
                return function () { n++; return n; };
            }
            var c = counter();
            c(); c();
            c()
        "#
        ),
        Value::Number(3.0)
    );
}

#[test]
fn test_closures_are_independent() {
    assert_eq!(
        eval(
            r#"
            function make(start) { return function () { return start++; }; }
            var a = make(10), b = make(20);
            a(); a(); b();
            a() + b()
        "#
        ),
        Value::Number(33.0)
    );
}

#[test]
fn test_closure_sees_later_assignment() {
    assert_eq!(
        eval("var x = 1; function get() { return x; } x = 2; get()"),
        Value::Number(2.0)
    );
}

#[test]
fn test_inner_var_shadows_outer() {
    assert_eq!(
        eval("var x = 'outer'; function f() { var x = 'inner'; return x; } f() + x"),
        s("innerouter")
    );
}

// -----------------------------------------------------------------------------
// Recursion and call depth
// -----------------------------------------------------------------------------

#[test]
fn test_recursion() {
    assert_eq!(
        eval("function fact(n) { return n <= 1 ? 1 : n * fact(n - 1); } fact(10)"),
        Value::Number(3628800.0)
    );
    assert_eq!(
        eval(
            r#"
            function isEven(n) { return n === 0 ? true : isOdd(n - 1); }
            function isOdd(n) { return n === 0 ? false : isEven(n - 1); }
            isEven(20)
        "#
        ),
        Value::Boolean(true)
    );
}

#[test]
fn test_runaway_recursion_is_a_range_error() {
    assert!(throws_error(
        "function down(n) { return down(n + 1); } down(0)",
        "RangeError: Maximum call stack size exceeded"
    ));
}

#[test]
fn test_call_depth_error_is_catchable() {
    assert_eq!(
        eval(
            r#"
            var depth = 0;
            function down() { depth++; down(); }
            var kind;
            try { down(); } catch (e) { kind = e instanceof RangeError; }
            kind && depth > 100
        "#
        ),
        Value::Boolean(true)
    );
}

// -----------------------------------------------------------------------------
// arguments
// -----------------------------------------------------------------------------

#[test]
fn test_arguments_object() {
    assert_eq!(
        eval("function f() { return arguments.length; } f(1, 2, 3)"),
        Value::Number(3.0)
    );
    assert_eq!(
        eval("function f() { return arguments[1]; } f('a', 'b')"),
        s("b")
    );
    assert_eq!(
        eval(
            r#"
            function sum() {
                var total = 0;
                for (var i = 0; i < arguments.length; i++) total += arguments[i];
                return total;
            }
            sum(1, 2, 3, 4)
        "#
        ),
        Value::Number(10.0)
    );
    assert_eq!(
        eval_display("function f() { return arguments; } f()"),
        "[object Arguments]"
    );
}

#[test]
fn test_parameter_named_arguments_wins() {
    assert_eq!(
        eval("function f(arguments) { return arguments; } f(7)"),
        Value::Number(7.0)
    );
}

// -----------------------------------------------------------------------------
// Function expressions
// -----------------------------------------------------------------------------

#[test]
fn test_named_function_expression_sees_itself() {
    assert_eq!(
        eval(
            r#"
            var fib = function inner(n) { return n < 2 ? n : inner(n - 1) + inner(n - 2); };
            fib(10)
        "#
        ),
        Value::Number(55.0)
    );
    assert!(throws_error(
        "var f = function inner() {}; inner",
        "ReferenceError: inner is not defined"
    ));
}

#[test]
fn test_immediately_invoked_function() {
    assert_eq!(eval("(function (x) { return x * x; })(9)"), Value::Number(81.0));
}

// -----------------------------------------------------------------------------
// this and new
// -----------------------------------------------------------------------------

#[test]
fn test_method_call_binds_this() {
    assert_eq!(
        eval("var o = { n: 4, get: function () { return this.n; } }; o.get()"),
        Value::Number(4.0)
    );
    assert_eq!(
        eval("var o = { n: 4, get: function () { return this.n; } }; o['get']()"),
        Value::Number(4.0)
    );
}

#[test]
fn test_plain_call_has_undefined_this() {
    assert_eq!(
        eval("function f() { return this; } f()"),
        Value::Undefined
    );
    assert_eq!(
        eval("var o = { f: function () { return this; } }; var g = o.f; g()"),
        Value::Undefined
    );
}

#[test]
fn test_constructor_and_prototype() {
    assert_eq!(
        eval(
            r#"
            function Point(x, y) { this.x = x; this.y = y; }
            Point.prototype.sum = function () { return this.x + this.y; };
            var p = new Point(3, 4);
            p.sum()
        "#
        ),
        Value::Number(7.0)
    );
    assert_eq!(
        eval("function P() {} var p = new P; Object.getPrototypeOf(p) === P.prototype"),
        Value::Boolean(true)
    );
}

#[test]
fn test_constructor_returning_object_replaces_this() {
    assert_eq!(
        eval("function F() { this.a = 1; return { b: 2 }; } var o = new F(); o.a === undefined && o.b"),
        Value::Number(2.0)
    );
    assert_eq!(
        eval("function F() { this.a = 1; return 5; } new F().a"),
        Value::Number(1.0)
    );
}

#[test]
fn test_calling_non_functions() {
    assert!(throws_error("var x = 1; x()", "TypeError: x is not a function"));
    assert!(throws_error("var o = {}; o.missing()", "TypeError: o.missing is not a function"));
    assert!(throws_error("var n = 3; new n()", "TypeError: n is not a constructor"));
    assert!(throws_error("(1)()", "is not a function"));
}
