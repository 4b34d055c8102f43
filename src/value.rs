//! Guest value representation
//!
//! Primitives are held inline; heap objects are reached only through an
//! [`ObjectId`] handle, so a `Value` is plain data that can be copied onto a
//! state stack, serialized, and rebuilt after a restart.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::heap::ObjectId;

/// Trait for types that have cheap (O(1), reference-counted) clones.
///
/// This makes it explicit when a clone is just a reference-count increment
/// (`JsString`, `Rc<Expression>`) as opposed to a deep copy.
pub trait CheapClone: Clone {
    fn cheap_clone(&self) -> Self {
        self.clone()
    }
}

impl<T: ?Sized> CheapClone for Rc<T> {}

/// Immutable guest string.
///
/// Stored as UTF-8; lengths and indices visible to guest code are measured in
/// UTF-16 code units, as the guest language expects.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsString(Rc<str>);

impl CheapClone for JsString {}

impl JsString {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Length in UTF-16 code units.
    pub fn utf16_len(&self) -> usize {
        self.0.encode_utf16().count()
    }

    /// The UTF-16 code unit at `index`, as a one-unit string.
    ///
    /// Lone surrogates cannot be represented in UTF-8, so halves of a
    /// surrogate pair come back as U+FFFD.
    pub fn code_unit_at(&self, index: usize) -> Option<JsString> {
        let unit = self.0.encode_utf16().nth(index)?;
        let s: String = char::decode_utf16(std::iter::once(unit))
            .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect();
        Some(JsString::from(s))
    }

    /// Compare by UTF-16 code units (the guest ordering for `<` on strings).
    pub fn cmp_code_units(&self, other: &JsString) -> std::cmp::Ordering {
        self.0.encode_utf16().cmp(other.0.encode_utf16())
    }
}

impl AsRef<str> for JsString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for JsString {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::ops::Deref for JsString {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JsString {
    fn from(s: &str) -> Self {
        JsString(Rc::from(s))
    }
}

impl From<String> for JsString {
    fn from(s: String) -> Self {
        JsString(Rc::from(s))
    }
}

impl PartialEq<str> for JsString {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for JsString {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl fmt::Display for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl std::ops::Add<&str> for JsString {
    type Output = JsString;

    fn add(self, rhs: &str) -> JsString {
        let mut s = String::with_capacity(self.0.len() + rhs.len());
        s.push_str(&self.0);
        s.push_str(rhs);
        JsString::from(s)
    }
}

/// A guest value
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Number(#[serde(with = "number_repr")] f64),
    String(JsString),
    Object(ObjectId),
}

/// Serde representation for guest numbers.
///
/// JSON has no NaN, infinities or negative zero, so those travel as strings;
/// every other number stays a plain JSON number.
pub mod number_repr {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Finite(f64),
        Special(String),
    }

    pub fn serialize<S: Serializer>(n: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        let repr = if n.is_nan() {
            Repr::Special("NaN".to_string())
        } else if n.is_infinite() {
            Repr::Special(if *n > 0.0 { "Infinity" } else { "-Infinity" }.to_string())
        } else if *n == 0.0 && n.is_sign_negative() {
            Repr::Special("-0".to_string())
        } else {
            Repr::Finite(*n)
        };
        repr.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Finite(n) => Ok(n),
            Repr::Special(s) => match s.as_str() {
                "NaN" => Ok(f64::NAN),
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                "-0" => Ok(-0.0),
                other => Err(serde::de::Error::custom(format!(
                    "invalid number literal '{}'",
                    other
                ))),
            },
        }
    }
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Check if this value is null or undefined
    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// ToBoolean
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }

    /// Strict equality (===)
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            // IEEE comparison already gives NaN !== NaN and 0 === -0
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }

    /// SameValue: like `===` but NaN equals NaN and +0 differs from -0.
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => {
                if a.is_nan() && b.is_nan() {
                    true
                } else {
                    a == b && a.is_sign_negative() == b.is_sign_negative()
                }
            }
            _ => self.strict_equals(other),
        }
    }
}

impl PartialEq for Value {
    /// Structural equality for host-side assertions: numbers compare with
    /// SameValue so `NaN == NaN` and `-0 != 0` in tests.
    fn eq(&self, other: &Value) -> bool {
        self.same_value(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", crate::conversions::number_to_string(*n)),
            Value::String(s) => write!(f, "{:?}", s.as_str()),
            Value::Object(id) => write!(f, "[object {}]", id),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(JsString::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(JsString::from(s))
    }
}

impl From<JsString> for Value {
    fn from(s: JsString) -> Self {
        Value::String(s)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::Object(id)
    }
}
