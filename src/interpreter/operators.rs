//! ES5 abstract operations on values that may be objects
//!
//! The primitive conversions live in [`crate::conversions`]; this module
//! adds the object cases (ToPrimitive and everything built on it) and the
//! binary operators. Everything here is a pure function of the heap, so it
//! is tested without running a thread.
//!
//! ToPrimitive never calls guest code: objects convert through their
//! built-in behaviour (boxed primitives unwrap, arrays join, errors format
//! as `name: message`, functions show their source).

use std::cmp::Ordering;

use rustc_hash::FxHashSet;

use crate::ast::BinaryOp;
use crate::conversions::{
    number_to_string, primitive_to_number, primitive_to_string, to_int32, to_uint32,
};
use crate::heap::{Class, FunctionData, Heap, ObjectData, ObjectId};
use crate::value::{JsString, Value};

/// A guest error an operator raises
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpError {
    Type(String),
}

/// Conversion context: the heap plus the prototype walk limit
#[derive(Clone, Copy)]
pub struct Ops<'a> {
    pub heap: &'a Heap,
    pub max_depth: usize,
}

impl<'a> Ops<'a> {
    pub fn new(heap: &'a Heap, max_depth: usize) -> Self {
        Self { heap, max_depth }
    }

    /// ToPrimitive. The hint only matters for dates, which this engine does
    /// not have, so there is none.
    pub fn to_primitive(&self, value: &Value) -> Value {
        match value {
            Value::Object(id) => self.object_to_primitive(*id),
            other => other.clone(),
        }
    }

    fn object_to_primitive(&self, id: ObjectId) -> Value {
        let Some(obj) = self.heap.get(id) else {
            return Value::Undefined;
        };
        match &obj.data {
            ObjectData::Boolean(b) => return Value::Boolean(*b),
            ObjectData::Number(n) => return Value::Number(*n),
            ObjectData::String(s) => return Value::String(s.clone()),
            ObjectData::Function(FunctionData::Guest { node, .. }) => {
                return Value::String(node.source.clone());
            }
            ObjectData::Function(FunctionData::Native { id: native }) => {
                let name = match self.heap.get_value(id, "name", self.max_depth) {
                    Value::String(s) => s,
                    _ => native.clone(),
                };
                return Value::String(JsString::from(format!(
                    "function {}() {{ [native code] }}",
                    name
                )));
            }
            ObjectData::Ordinary | ObjectData::Thread(_) => {}
        }
        match obj.class {
            Class::Array => Value::String(self.join_array(id, true)),
            Class::Error => Value::String(self.error_to_string(id)),
            class => Value::String(JsString::from(format!("[object {}]", class.name()))),
        }
    }

    fn is_array(&self, id: ObjectId) -> bool {
        self.heap.get(id).is_some_and(|obj| {
            obj.class == Class::Array
                && matches!(obj.data, ObjectData::Ordinary | ObjectData::Thread(_))
        })
    }

    /// Join an array with `,`. Nested arrays are walked with an explicit
    /// stack, so nesting depth never reaches the host stack; an array that
    /// is already being joined contributes "". Errors nested inside format
    /// as `name: message` only when `full_errors` is set, otherwise as
    /// `[object Error]`.
    fn join_array(&self, root: ObjectId, full_errors: bool) -> JsString {
        struct Pending {
            id: ObjectId,
            length: u32,
            next: u32,
            out: String,
        }

        let mut visiting = FxHashSet::default();
        visiting.insert(root);
        let mut stack = vec![Pending {
            id: root,
            length: self.heap.array_length(root),
            next: 0,
            out: String::new(),
        }];

        while let Some(top) = stack.last_mut() {
            if top.next >= top.length {
                let Some(done) = stack.pop() else { break };
                visiting.remove(&done.id);
                match stack.last_mut() {
                    Some(parent) => parent.out.push_str(&done.out),
                    None => return JsString::from(done.out),
                }
                continue;
            }

            let index = top.next;
            top.next += 1;
            if index > 0 {
                top.out.push(',');
            }
            let item = self.heap.get_value(top.id, &index.to_string(), self.max_depth);
            match item {
                Value::Undefined | Value::Null => {}
                Value::Object(inner) if self.is_array(inner) => {
                    if visiting.insert(inner) {
                        stack.push(Pending {
                            id: inner,
                            length: self.heap.array_length(inner),
                            next: 0,
                            out: String::new(),
                        });
                    }
                }
                Value::Object(inner) if !full_errors && self.is_error(inner) => {
                    top.out.push_str("[object Error]");
                }
                Value::Object(inner) => {
                    let p = self.object_to_primitive(inner);
                    top.out.push_str(&primitive_to_string(&p));
                }
                other => top.out.push_str(&primitive_to_string(&other)),
            }
        }
        JsString::from("")
    }

    fn is_error(&self, id: ObjectId) -> bool {
        self.heap.get(id).is_some_and(|obj| obj.class == Class::Error)
    }

    /// `Error.prototype.toString` applied to `id`
    pub fn error_to_string(&self, id: ObjectId) -> JsString {
        let name = match self.heap.get_value(id, "name", self.max_depth) {
            Value::Undefined => JsString::from("Error"),
            v => self.to_string_primitive_only(&v),
        };
        let message = match self.heap.get_value(id, "message", self.max_depth) {
            Value::Undefined => JsString::from(""),
            v => self.to_string_primitive_only(&v),
        };
        if name.is_empty() {
            message
        } else if message.is_empty() {
            name
        } else {
            JsString::from(format!("{}: {}", name, message))
        }
    }

    fn to_string_primitive_only(&self, value: &Value) -> JsString {
        match value {
            Value::Object(id) if self.is_error(*id) => JsString::from("[object Error]"),
            Value::Object(id) if self.is_array(*id) => self.join_array(*id, false),
            Value::Object(_) => self.to_string(value),
            other => primitive_to_string(other),
        }
    }

    /// ToNumber
    pub fn to_number(&self, value: &Value) -> f64 {
        primitive_to_number(&self.to_primitive(value))
    }

    /// ToString
    pub fn to_string(&self, value: &Value) -> JsString {
        primitive_to_string(&self.to_primitive(value))
    }

    /// ToPropertyKey (ToString for this language level)
    pub fn to_key(&self, value: &Value) -> JsString {
        match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => JsString::from(number_to_string(*n)),
            other => self.to_string(other),
        }
    }

    pub fn type_of(&self, value: &Value) -> &'static str {
        match value {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(id) if self.heap.is_callable(*id) => "function",
            Value::Object(_) => "object",
        }
    }

    /// Abstract Equality Comparison (`==`)
    pub fn loose_equals(&self, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
            (Value::Number(a), Value::String(_)) => *a == primitive_to_number(right),
            (Value::String(_), Value::Number(b)) => primitive_to_number(left) == *b,
            (Value::Boolean(_), _) => {
                self.loose_equals(&Value::Number(primitive_to_number(left)), right)
            }
            (_, Value::Boolean(_)) => {
                self.loose_equals(left, &Value::Number(primitive_to_number(right)))
            }
            (Value::Number(_) | Value::String(_), Value::Object(_)) => {
                let prim = self.to_primitive(right);
                self.loose_equals(left, &prim)
            }
            (Value::Object(_), Value::Number(_) | Value::String(_)) => {
                let prim = self.to_primitive(left);
                self.loose_equals(&prim, right)
            }
            _ => left.strict_equals(right),
        }
    }

    /// Abstract Relational Comparison. `None` when either side is NaN.
    pub fn compare(&self, left: &Value, right: &Value) -> Option<Ordering> {
        let px = self.to_primitive(left);
        let py = self.to_primitive(right);
        match (&px, &py) {
            (Value::String(a), Value::String(b)) => Some(a.cmp_code_units(b)),
            _ => primitive_to_number(&px).partial_cmp(&primitive_to_number(&py)),
        }
    }

    /// The `+` operator
    pub fn add(&self, left: &Value, right: &Value) -> Value {
        let lp = self.to_primitive(left);
        let rp = self.to_primitive(right);
        match (&lp, &rp) {
            (Value::String(a), _) => Value::String(a.clone() + primitive_to_string(&rp).as_str()),
            (_, Value::String(b)) => {
                let mut s = primitive_to_string(&lp).to_string();
                s.push_str(b);
                Value::String(JsString::from(s))
            }
            _ => Value::Number(primitive_to_number(&lp) + primitive_to_number(&rp)),
        }
    }

    /// Apply a binary operator.
    pub fn binary(&self, op: BinaryOp, left: &Value, right: &Value) -> Result<Value, OpError> {
        let num = |v: &Value| self.to_number(v);
        let result = match op {
            BinaryOp::Add => self.add(left, right),
            BinaryOp::Sub => Value::Number(num(left) - num(right)),
            BinaryOp::Mul => Value::Number(num(left) * num(right)),
            BinaryOp::Div => Value::Number(num(left) / num(right)),
            BinaryOp::Mod => Value::Number(num(left) % num(right)),

            BinaryOp::Eq => Value::Boolean(self.loose_equals(left, right)),
            BinaryOp::NotEq => Value::Boolean(!self.loose_equals(left, right)),
            BinaryOp::StrictEq => Value::Boolean(left.strict_equals(right)),
            BinaryOp::StrictNotEq => Value::Boolean(!left.strict_equals(right)),
            BinaryOp::Lt => Value::Boolean(self.compare(left, right) == Some(Ordering::Less)),
            BinaryOp::Gt => Value::Boolean(self.compare(left, right) == Some(Ordering::Greater)),
            BinaryOp::LtEq => Value::Boolean(matches!(
                self.compare(left, right),
                Some(Ordering::Less | Ordering::Equal)
            )),
            BinaryOp::GtEq => Value::Boolean(matches!(
                self.compare(left, right),
                Some(Ordering::Greater | Ordering::Equal)
            )),

            BinaryOp::BitAnd => Value::from(to_int32(num(left)) & to_int32(num(right))),
            BinaryOp::BitOr => Value::from(to_int32(num(left)) | to_int32(num(right))),
            BinaryOp::BitXor => Value::from(to_int32(num(left)) ^ to_int32(num(right))),
            BinaryOp::LShift => {
                let shift = to_uint32(num(right)) & 31;
                Value::from(to_int32(num(left)).wrapping_shl(shift))
            }
            BinaryOp::RShift => {
                let shift = to_uint32(num(right)) & 31;
                Value::from(to_int32(num(left)).wrapping_shr(shift))
            }
            BinaryOp::URShift => {
                let shift = to_uint32(num(right)) & 31;
                Value::from(to_uint32(num(left)).wrapping_shr(shift))
            }

            BinaryOp::In => {
                let Value::Object(target) = right else {
                    return Err(OpError::Type(format!(
                        "Cannot use 'in' operator to search for '{}' in {}",
                        self.to_key(left),
                        self.to_string(right)
                    )));
                };
                let key = self.to_key(left);
                Value::Boolean(self.heap.has_property(*target, &key, self.max_depth))
            }
            BinaryOp::Instanceof => {
                let Value::Object(ctor) = right else {
                    return Err(OpError::Type(
                        "Right-hand side of 'instanceof' is not callable".to_string(),
                    ));
                };
                if !self.heap.is_callable(*ctor) {
                    return Err(OpError::Type(
                        "Right-hand side of 'instanceof' is not callable".to_string(),
                    ));
                }
                let Value::Object(instance) = left else {
                    return Ok(Value::Boolean(false));
                };
                let Value::Object(proto) = self.heap.get_value(*ctor, "prototype", self.max_depth)
                else {
                    return Err(OpError::Type(
                        "Function has non-object prototype in instanceof check".to_string(),
                    ));
                };
                Value::Boolean(self.heap.inherits_from(*instance, proto, self.max_depth))
            }
        };
        Ok(result)
    }
}
