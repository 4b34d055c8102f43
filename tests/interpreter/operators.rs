//! Operator tests: equality, typeof, bitwise and shift operators, in, instanceof, delete

use super::{create_test_runtime, eval, run_to_idle, s, throws_error};
use spindle::{Completion, Value};

#[test]
fn test_loose_equality() {
    assert_eq!(eval("null == undefined"), Value::Boolean(true));
    assert_eq!(eval("null == 0"), Value::Boolean(false));
    assert_eq!(eval("'1' == 1"), Value::Boolean(true));
    assert_eq!(eval("true == 1"), Value::Boolean(true));
    assert_eq!(eval("'' == 0"), Value::Boolean(true));
    assert_eq!(eval("' \\n 42 \\t' == 42"), Value::Boolean(true));
    assert_eq!(eval("[1] == 1"), Value::Boolean(true));
    assert_eq!(eval("[1, 2] == '1,2'"), Value::Boolean(true));
    assert_eq!(eval("var o = {}; o == o"), Value::Boolean(true));
    assert_eq!(eval("({}) == ({})"), Value::Boolean(false));
}

#[test]
fn test_strict_equality() {
    assert_eq!(eval("'1' === 1"), Value::Boolean(false));
    assert_eq!(eval("null === undefined"), Value::Boolean(false));
    assert_eq!(eval("var a = []; var b = a; a === b"), Value::Boolean(true));
    assert_eq!(eval("[] === []"), Value::Boolean(false));
}

#[test]
fn test_typeof() {
    assert_eq!(eval("typeof 1"), s("number"));
    assert_eq!(eval("typeof 'x'"), s("string"));
    assert_eq!(eval("typeof true"), s("boolean"));
    assert_eq!(eval("typeof undefined"), s("undefined"));
    assert_eq!(eval("typeof null"), s("object"));
    assert_eq!(eval("typeof {}"), s("object"));
    assert_eq!(eval("typeof []"), s("object"));
    assert_eq!(eval("typeof function () {}"), s("function"));
    assert_eq!(eval("typeof Object"), s("function"));
    assert_eq!(eval("typeof new String('a')"), s("object"));
}

#[test]
fn test_bitwise_operators() {
    assert_eq!(eval("5 & 3"), Value::Number(1.0));
    assert_eq!(eval("5 | 3"), Value::Number(7.0));
    assert_eq!(eval("5 ^ 3"), Value::Number(6.0));
    assert_eq!(eval("~5"), Value::Number(-6.0));
    assert_eq!(eval("~~3.7"), Value::Number(3.0));
    assert_eq!(eval("4294967296 | 0"), Value::Number(0.0));
    assert_eq!(eval("2147483648 | 0"), Value::Number(-2147483648.0));
    assert_eq!(eval("NaN | 0"), Value::Number(0.0));
}

#[test]
fn test_shifts_mask_the_count() {
    assert_eq!(eval("1 << 3"), Value::Number(8.0));
    assert_eq!(eval("1 << 33"), Value::Number(2.0));
    assert_eq!(eval("-16 >> 2"), Value::Number(-4.0));
    assert_eq!(eval("-1 >>> 0"), Value::Number(4294967295.0));
    assert_eq!(eval("-16 >>> 28"), Value::Number(15.0));
    assert_eq!(eval("1 << -1"), Value::Number(-2147483648.0));
}

#[test]
fn test_string_comparison_uses_code_units() {
    assert_eq!(eval("'a' < 'b'"), Value::Boolean(true));
    assert_eq!(eval("'B' < 'a'"), Value::Boolean(true));
    assert_eq!(eval("'abc' < 'abd'"), Value::Boolean(true));
    assert_eq!(eval("'ab' < 'abc'"), Value::Boolean(true));
    // 0xFF61 sorts after the lead surrogate 0xD83D
    assert_eq!(eval("'\\uff61' < '\\ud83d\\ude00'"), Value::Boolean(false));
}

#[test]
fn test_comparisons_with_nan() {
    assert_eq!(eval("NaN < 1"), Value::Boolean(false));
    assert_eq!(eval("NaN >= 1"), Value::Boolean(false));
    assert_eq!(eval("undefined < 1"), Value::Boolean(false));
    assert_eq!(eval("null < 1"), Value::Boolean(true));
}

#[test]
fn test_addition_rules() {
    assert_eq!(eval("1 + '2'"), s("12"));
    assert_eq!(eval("'1' + 2 + 3"), s("123"));
    assert_eq!(eval("1 + 2 + '3'"), s("33"));
    assert_eq!(eval("true + 1"), Value::Number(2.0));
    assert_eq!(eval("null + 1"), Value::Number(1.0));
    assert_eq!(eval("undefined + 1"), Value::Number(f64::NAN));
    assert_eq!(eval("[1, 2] + [3]"), s("1,23"));
    assert_eq!(eval("({}) + ''"), s("[object Object]"));
    assert_eq!(eval("'5' * '2'"), Value::Number(10.0));
    assert_eq!(eval("'0x10' - 0"), Value::Number(16.0));
    assert_eq!(eval("'1e2' - 0"), Value::Number(100.0));
    assert_eq!(eval("'12px' - 0"), Value::Number(f64::NAN));
}

#[test]
fn test_unary_operators() {
    assert_eq!(eval("+'3'"), Value::Number(3.0));
    assert_eq!(eval("-'3'"), Value::Number(-3.0));
    assert_eq!(eval("+''"), Value::Number(0.0));
    assert_eq!(eval("!''"), Value::Boolean(true));
    assert_eq!(eval("!!{}"), Value::Boolean(true));
    assert_eq!(eval("void 1"), Value::Undefined);
}

#[test]
fn test_in_operator() {
    assert_eq!(eval("'a' in { a: 1 }"), Value::Boolean(true));
    assert_eq!(eval("'b' in { a: 1 }"), Value::Boolean(false));
    assert_eq!(eval("'toString' in {}"), Value::Boolean(true));
    assert_eq!(eval("0 in [5]"), Value::Boolean(true));
    assert!(throws_error("'a' in 'abc'", "TypeError: Cannot use 'in' operator"));
}

#[test]
fn test_instanceof() {
    assert_eq!(eval("[] instanceof Array"), Value::Boolean(true));
    assert_eq!(eval("[] instanceof Object"), Value::Boolean(true));
    assert_eq!(eval("({}) instanceof Array"), Value::Boolean(false));
    assert_eq!(eval("1 instanceof Number"), Value::Boolean(false));
    assert_eq!(
        eval("function P() {} var p = new P(); p instanceof P"),
        Value::Boolean(true)
    );
    assert!(throws_error("({}) instanceof 1", "TypeError"));
    assert!(throws_error("({}) instanceof {}", "not callable"));
}

#[test]
fn test_delete() {
    assert_eq!(eval("var o = { a: 1 }; delete o.a; 'a' in o"), Value::Boolean(false));
    assert_eq!(eval("var o = { a: 1 }; delete o['a']"), Value::Boolean(true));
    assert_eq!(eval("var o = {}; delete o.missing"), Value::Boolean(true));
    assert_eq!(eval("var x = 1; delete x"), Value::Boolean(false));
    assert_eq!(eval("delete 5"), Value::Boolean(true));
    assert!(throws_error("var a = []; delete a.length", "TypeError: Cannot delete property 'length'"));
    assert!(throws_error("var u; delete u.x", "TypeError"));
}

#[test]
fn test_compound_assignment() {
    assert_eq!(eval("var x = 10; x -= 3; x *= 2; x /= 7; x"), Value::Number(2.0));
    assert_eq!(eval("var x = 7; x %= 4; x <<= 2; x >>= 1; x"), Value::Number(6.0));
    assert_eq!(eval("var x = 6; x &= 3; x |= 8; x ^= 1; x"), Value::Number(11.0));
    assert_eq!(eval("var x = -1; x >>>= 28; x"), Value::Number(15.0));
    assert_eq!(eval("var s = 'a'; s += 1; s"), s("a1"));
    assert_eq!(eval("var o = { n: 1 }; o.n += 41; o.n"), Value::Number(42.0));
    assert_eq!(eval("var a = [1]; a[0] *= 5; a[0]"), Value::Number(5.0));
}

#[test]
fn test_deeply_nested_array_converts_to_string() {
    // Runs without per-step collection: the loop allocates one array per turn.
    let (mut interp, clock) = create_test_runtime();
    let main = interp
        .load(
            r#"
            var a = [1];
            for (var i = 0; i < 20000; i++) a = [a];
            var text = '' + a;
            var b = [2, [3, [4]]];
            b[1][1].push(b);
            text + '|' + b
            "#,
        )
        .unwrap_or_else(|e| panic!("load failed: {}", e));
    run_to_idle(&mut interp, &clock).unwrap_or_else(|e| panic!("run failed: {}", e));
    assert_eq!(
        interp.completion(main),
        Some(&Completion::Returned(s("1|2,3,4,")))
    );
}

#[test]
fn test_errors_inside_arrays() {
    assert_eq!(eval("'' + [new TypeError('bad'), 1]"), s("TypeError: bad,1"));
    assert_eq!(
        eval("var e = new Error('x'); e.name = [new RangeError('r'), 'N']; '' + e"),
        s("[object Error],N: x")
    );
}
