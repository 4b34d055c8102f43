//! Object-related tests: literals, Object and Array builtins, boxed primitives, Owner

use super::{eval, eval_display, s, throws_error};
use spindle::Value;

#[test]
fn test_object_literal() {
    assert_eq!(eval("var obj = { a: 1 }; obj.a"), Value::Number(1.0));
    assert_eq!(eval("var obj = { 'two words': 2 }; obj['two words']"), Value::Number(2.0));
    assert_eq!(eval("var obj = { 3: 'x' }; obj[3]"), s("x"));
    assert_eq!(eval("var obj = { a: { b: { c: 9 } } }; obj.a.b.c"), Value::Number(9.0));
    assert_eq!(eval("({}).missing"), Value::Undefined);
}

#[test]
fn test_property_assignment_and_computed_keys() {
    assert_eq!(
        eval("var o = {}; var k = 'dyn'; o[k + 1] = 5; o.dyn1"),
        Value::Number(5.0)
    );
    assert_eq!(eval("var o = {}; o[1.5] = 'f'; o['1.5']"), s("f"));
    assert_eq!(eval("var o = {}; o[null] = 1; o['null']"), Value::Number(1.0));
}

#[test]
fn test_object_hasownproperty() {
    assert_eq!(eval("({ a: 1 }).hasOwnProperty('a')"), Value::Boolean(true));
    assert_eq!(eval("({ a: 1 }).hasOwnProperty('b')"), Value::Boolean(false));
    assert_eq!(eval("({ a: 1 }).hasOwnProperty('toString')"), Value::Boolean(false));
    assert_eq!(eval("[1].hasOwnProperty('length')"), Value::Boolean(true));
}

#[test]
fn test_object_tostring() {
    assert_eq!(eval("({}).toString()"), s("[object Object]"));
    assert_eq!(eval_display("({})"), "[object Object]");
}

#[test]
fn test_object_keys() {
    assert_eq!(eval("Object.keys({ a: 1, b: 2, c: 3 }).join()"), s("a,b,c"));
    assert_eq!(eval("Object.keys(['x', 'y']).join('|')"), s("0|1"));
    assert_eq!(eval("Object.keys('hi').length"), Value::Number(2.0));
    assert!(throws_error("Object.keys(null)", "TypeError"));
}

#[test]
fn test_object_create_and_get_prototype_of() {
    assert_eq!(
        eval("var base = { greet: 'hi' }; var o = Object.create(base); o.greet"),
        s("hi")
    );
    assert_eq!(
        eval("var base = {}; Object.getPrototypeOf(Object.create(base)) === base"),
        Value::Boolean(true)
    );
    assert_eq!(
        eval("Object.getPrototypeOf(Object.create(null))"),
        Value::Null
    );
    assert_eq!(
        eval("var bare = Object.create(null); 'toString' in bare"),
        Value::Boolean(false)
    );
    assert!(throws_error("Object.create(1)", "TypeError"));
}

#[test]
fn test_object_called_as_function() {
    assert_eq!(eval("typeof Object()"), s("object"));
    assert_eq!(eval("var o = {}; Object(o) === o"), Value::Boolean(true));
    assert_eq!(eval("typeof Object('s')"), s("object"));
}

// -----------------------------------------------------------------------------
// Arrays
// -----------------------------------------------------------------------------

#[test]
fn test_array_literal_and_length() {
    assert_eq!(eval("[1, 2, 3].length"), Value::Number(3.0));
    assert_eq!(eval("[].length"), Value::Number(0.0));
    assert_eq!(eval("[1, , 3].length"), Value::Number(3.0));
    assert_eq!(eval("var a = [1, , 3]; 1 in a"), Value::Boolean(false));
}

#[test]
fn test_array_length_follows_writes() {
    assert_eq!(eval("var a = []; a[4] = 'x'; a.length"), Value::Number(5.0));
    assert_eq!(eval("var a = [1, 2]; a.extra = 1; a.length"), Value::Number(2.0));
    assert_eq!(
        eval("var a = [1, 2, 3, 4]; a.length = 2; a.join()"),
        s("1,2")
    );
    assert_eq!(eval("var a = [1, 2, 3]; a.length = 1; a[2]"), Value::Undefined);
    assert!(throws_error("var a = []; a.length = 1.5", "RangeError: Invalid array length"));
}

#[test]
fn test_array_push_pop() {
    assert_eq!(eval("var a = [1]; a.push(2, 3)"), Value::Number(3.0));
    assert_eq!(eval("var a = [1]; a.push(2, 3); a.join('-')"), s("1-2-3"));
    assert_eq!(eval("var a = [1, 2]; a.pop()"), Value::Number(2.0));
    assert_eq!(eval("var a = [1, 2]; a.pop(); a.length"), Value::Number(1.0));
    assert_eq!(eval("[].pop()"), Value::Undefined);
}

#[test]
fn test_array_join() {
    assert_eq!(eval("[1, 2, 3].join()"), s("1,2,3"));
    assert_eq!(eval("[1, 2, 3].join(' + ')"), s("1 + 2 + 3"));
    assert_eq!(eval("[null, undefined, 0].join()"), s(",,0"));
    assert_eq!(eval("[[1, 2], [3]].join(';')"), s("1,2;3"));
    assert_eq!(eval_display("[1, [2, [3]]]"), "1,2,3");
}

#[test]
fn test_array_constructor() {
    assert_eq!(eval("new Array(3).length"), Value::Number(3.0));
    assert_eq!(eval("Array(1, 2).join()"), s("1,2"));
    assert_eq!(eval("new Array('3').length"), Value::Number(1.0));
    assert!(throws_error("new Array(-1)", "RangeError: Invalid array length"));
    assert_eq!(eval("Array.isArray([])"), Value::Boolean(true));
    assert_eq!(eval("Array.isArray({ length: 0 })"), Value::Boolean(false));
}

#[test]
fn test_self_referencing_array_displays() {
    assert_eq!(eval_display("var a = [1]; a.push(a); a"), "1,");
}

// -----------------------------------------------------------------------------
// Primitive wrappers
// -----------------------------------------------------------------------------

#[test]
fn test_boxed_strings() {
    assert_eq!(eval("var b = new String('abc'); b.length"), Value::Number(3.0));
    assert_eq!(eval("var b = new String('abc'); b[1]"), s("b"));
    assert_eq!(eval("new String('abc') + 'd'"), s("abcd"));
    assert_eq!(eval("new String('x') == 'x'"), Value::Boolean(true));
    assert_eq!(eval("new String('x') === 'x'"), Value::Boolean(false));
    assert_eq!(eval("new String('abc').valueOf()"), s("abc"));
    assert!(throws_error("var b = new String('ab'); b.length = 9", "TypeError"));
}

#[test]
fn test_boxed_string_index_properties() {
    assert_eq!(
        eval("var b = new String('ab'); b.extra = 1; Object.keys(b).join()"),
        s("0,1,extra")
    );
    assert_eq!(eval("var b = new String('ab'); delete b.extra"), Value::Boolean(true));
    assert!(throws_error("var b = new String('ab'); delete b[0]", "TypeError"));
}

#[test]
fn test_conversion_functions() {
    assert_eq!(eval("String(12)"), s("12"));
    assert_eq!(eval("String()"), s(""));
    assert_eq!(eval("Number('  42 ')"), Value::Number(42.0));
    assert_eq!(eval("Number()"), Value::Number(0.0));
    assert_eq!(eval("Boolean('')"), Value::Boolean(false));
    assert_eq!(eval("typeof new Number(1)"), s("object"));
    assert_eq!(eval("new Number(4) * 2"), Value::Number(8.0));
    assert_eq!(eval("new Boolean(false).valueOf()"), Value::Boolean(false));
    assert_eq!(eval("!!new Boolean(false)"), Value::Boolean(true));
}

#[test]
fn test_writes_to_primitives_are_ignored() {
    assert_eq!(eval("var p = 'abc'; p.extra = 1; p.extra"), Value::Undefined);
    assert_eq!(eval("var n = 5; n.x = 1; n.x"), Value::Undefined);
}

#[test]
fn test_primitive_methods_come_from_prototypes() {
    assert_eq!(eval("'abc'.valueOf()"), s("abc"));
    assert_eq!(eval("(5).valueOf()"), Value::Number(5.0));
    assert_eq!(eval("true.valueOf()"), Value::Boolean(true));
    assert!(throws_error(
        "var o = { f: 'x'.valueOf }; o.f()",
        "TypeError"
    ));
}

// -----------------------------------------------------------------------------
// Owner
// -----------------------------------------------------------------------------

#[test]
fn test_owner_objects() {
    assert_eq!(eval_display("new Owner()"), "[object Owner]");
    assert_eq!(
        eval("var o = new Owner(); o.slot = 1; o.slot + 1"),
        Value::Number(2.0)
    );
    assert_eq!(eval("new Owner() instanceof Owner"), Value::Boolean(true));
    assert_eq!(eval("typeof new Owner()"), s("object"));
}

// -----------------------------------------------------------------------------
// Functions as values
// -----------------------------------------------------------------------------

#[test]
fn test_function_to_string() {
    assert_eq!(
        eval("function f(a) { return a; } f.toString()"),
        s("function f(a) { return a; }")
    );
    assert_eq!(eval_display("Object"), "function Object() { [native code] }");
}
