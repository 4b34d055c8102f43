//! Object, Function, Array, the primitive wrappers and Owner

use crate::conversions::to_uint32;
use crate::heap::{Class, ObjectData, ObjectId, SetOutcome};
use crate::interpreter::natives::{NativeCall, NativeOutcome, NativeRegistry};
use crate::interpreter::Interpreter;
use crate::value::{JsString, Value};

use super::{constructor, method};

pub fn register(natives: &mut NativeRegistry) {
    natives.register("Function.prototype", |_: &mut NativeCall<'_>| {
        NativeOutcome::Return(Value::Undefined)
    });
    natives.register("Function.prototype.toString", function_to_string);

    natives.register("Object", object_constructor);
    natives.register("Object.create", object_create);
    natives.register("Object.getPrototypeOf", object_get_prototype_of);
    natives.register("Object.keys", object_keys);
    natives.register("Object.prototype.hasOwnProperty", object_has_own_property);
    natives.register("Object.prototype.toString", object_to_string);

    natives.register("Array", array_constructor);
    natives.register("Array.isArray", array_is_array);
    natives.register("Array.prototype.push", array_push);
    natives.register("Array.prototype.pop", array_pop);
    natives.register("Array.prototype.join", array_join);

    natives.register("String", string_constructor);
    natives.register("String.prototype.toString", string_value_of);
    natives.register("String.prototype.valueOf", string_value_of);
    natives.register("Number", number_constructor);
    natives.register("Number.prototype.valueOf", number_value_of);
    natives.register("Boolean", boolean_constructor);
    natives.register("Boolean.prototype.valueOf", boolean_value_of);

    natives.register("Owner", owner_constructor);
}

pub fn init_object(interp: &mut Interpreter) {
    let object_proto = interp.intrinsics.object_prototype;
    let function_proto = interp.intrinsics.function_prototype;

    let object_ctor = constructor(interp, "Object", "Object", 1, object_proto);
    method(interp, object_ctor, "create", "Object.create", 1);
    method(interp, object_ctor, "getPrototypeOf", "Object.getPrototypeOf", 1);
    method(interp, object_ctor, "keys", "Object.keys", 1);
    method(
        interp,
        object_proto,
        "hasOwnProperty",
        "Object.prototype.hasOwnProperty",
        1,
    );
    method(interp, object_proto, "toString", "Object.prototype.toString", 0);

    method(interp, function_proto, "toString", "Function.prototype.toString", 0);
}

pub fn init_array(interp: &mut Interpreter) {
    let array_proto = interp.intrinsics.array_prototype;
    let array_ctor = constructor(interp, "Array", "Array", 1, array_proto);
    method(interp, array_ctor, "isArray", "Array.isArray", 1);
    method(interp, array_proto, "push", "Array.prototype.push", 1);
    method(interp, array_proto, "pop", "Array.prototype.pop", 0);
    method(interp, array_proto, "join", "Array.prototype.join", 1);
}

pub fn init_primitive_wrappers(interp: &mut Interpreter) {
    let string_proto = interp.intrinsics.string_prototype;
    constructor(interp, "String", "String", 1, string_proto);
    method(interp, string_proto, "toString", "String.prototype.toString", 0);
    method(interp, string_proto, "valueOf", "String.prototype.valueOf", 0);

    let number_proto = interp.intrinsics.number_prototype;
    constructor(interp, "Number", "Number", 1, number_proto);
    method(interp, number_proto, "valueOf", "Number.prototype.valueOf", 0);

    let boolean_proto = interp.intrinsics.boolean_prototype;
    constructor(interp, "Boolean", "Boolean", 1, boolean_proto);
    method(interp, boolean_proto, "valueOf", "Boolean.prototype.valueOf", 0);
}

/// `Owner` objects are ordinary objects tagged with their own class, so
/// hosts can tell world-owned objects apart.
pub fn init_owner(interp: &mut Interpreter) {
    let owner_proto = interp.create_object();
    constructor(interp, "Owner", "Owner", 0, owner_proto);
}

// ═══════════════════════════════════════════════════════════════════════════
// Function
// ═══════════════════════════════════════════════════════════════════════════

fn function_to_string(call: &mut NativeCall<'_>) -> NativeOutcome {
    let this = call.this().clone();
    let is_function = this
        .as_object()
        .is_some_and(|id| call.heap().is_callable(id));
    if !is_function {
        return call.type_error("Function.prototype.toString requires that 'this' be a Function");
    }
    NativeOutcome::Return(Value::String(call.to_string(&this)))
}

// ═══════════════════════════════════════════════════════════════════════════
// Object
// ═══════════════════════════════════════════════════════════════════════════

fn object_constructor(call: &mut NativeCall<'_>) -> NativeOutcome {
    let value = call.arg(0);
    let engine = call.engine();
    let object = match engine.to_object(&value) {
        Some(id) => id,
        None => engine.create_object(),
    };
    NativeOutcome::Return(Value::Object(object))
}

fn object_create(call: &mut NativeCall<'_>) -> NativeOutcome {
    let proto = match call.arg(0) {
        Value::Object(id) => Some(id),
        Value::Null => None,
        other => {
            let shown = call.to_string(&other);
            return call.type_error(format!(
                "Object prototype may only be an Object or null: {}",
                shown
            ));
        }
    };
    let object = call
        .engine()
        .heap
        .alloc(Class::Object, proto, ObjectData::Ordinary);
    NativeOutcome::Return(Value::Object(object))
}

/// ToObject for natives that reject null and undefined.
fn require_object(call: &mut NativeCall<'_>, value: &Value) -> Result<ObjectId, NativeOutcome> {
    match call.engine().to_object(value) {
        Some(id) => Ok(id),
        None => Err(call.type_error("Cannot convert undefined or null to object")),
    }
}

fn object_get_prototype_of(call: &mut NativeCall<'_>) -> NativeOutcome {
    let value = call.arg(0);
    let id = match require_object(call, &value) {
        Ok(id) => id,
        Err(outcome) => return outcome,
    };
    let proto = call.heap().get(id).and_then(|o| o.proto);
    NativeOutcome::Return(proto.map(Value::Object).unwrap_or(Value::Null))
}

fn object_keys(call: &mut NativeCall<'_>) -> NativeOutcome {
    let value = call.arg(0);
    let id = match require_object(call, &value) {
        Ok(id) => id,
        Err(outcome) => return outcome,
    };
    let keys: Vec<Value> = call
        .heap()
        .get(id)
        .map(|o| o.own_keys(true))
        .unwrap_or_default()
        .into_iter()
        .map(Value::String)
        .collect();
    let array = call.engine().create_array(keys);
    NativeOutcome::Return(Value::Object(array))
}

fn object_has_own_property(call: &mut NativeCall<'_>) -> NativeOutcome {
    let key = call.to_string(&call.arg(0));
    let this = call.this().clone();
    let id = match require_object(call, &this) {
        Ok(id) => id,
        Err(outcome) => return outcome,
    };
    NativeOutcome::Return(Value::Boolean(call.heap().has_own_property(id, &key)))
}

fn object_to_string(call: &mut NativeCall<'_>) -> NativeOutcome {
    let this = call.this().clone();
    let tag = match &this {
        Value::Undefined => "Undefined",
        Value::Null => "Null",
        Value::Boolean(_) => "Boolean",
        Value::Number(_) => "Number",
        Value::String(_) => "String",
        Value::Object(id) => call
            .heap()
            .class_of(*id)
            .map(Class::name)
            .unwrap_or("Object"),
    };
    NativeOutcome::Return(Value::from(format!("[object {}]", tag)))
}

// ═══════════════════════════════════════════════════════════════════════════
// Array
// ═══════════════════════════════════════════════════════════════════════════

fn array_constructor(call: &mut NativeCall<'_>) -> NativeOutcome {
    if let [Value::Number(n)] = call.args() {
        let n = *n;
        if to_uint32(n) as f64 != n {
            return call.range_error("Invalid array length");
        }
        let depth = call.engine().config.max_proto_depth;
        let array = call.engine().create_array(Vec::new());
        call.engine()
            .heap
            .set(array, "length", Value::Number(n), depth);
        return NativeOutcome::Return(Value::Object(array));
    }
    let items = call.args().to_vec();
    let array = call.engine().create_array(items);
    NativeOutcome::Return(Value::Object(array))
}

fn array_is_array(call: &mut NativeCall<'_>) -> NativeOutcome {
    let is_array = call
        .arg(0)
        .as_object()
        .and_then(|id| call.heap().class_of(id))
        == Some(Class::Array);
    NativeOutcome::Return(Value::Boolean(is_array))
}

/// `this` as an object plus its current `length`.
fn this_with_length(call: &mut NativeCall<'_>) -> Result<(ObjectId, u32), NativeOutcome> {
    let this = call.this().clone();
    let id = require_object(call, &this)?;
    let length = call.engine().get_property(id, "length");
    Ok((id, to_uint32(call.to_number(&length))))
}

fn write(call: &mut NativeCall<'_>, id: ObjectId, key: &str, value: Value) -> Result<(), NativeOutcome> {
    match call.engine().set_property(id, key, value) {
        SetOutcome::Done | SetOutcome::NoSuchObject => Ok(()),
        SetOutcome::InvalidLength => Err(call.range_error("Invalid array length")),
        SetOutcome::ReadOnly | SetOutcome::NotExtensible => Err(call.type_error(format!(
            "Cannot assign to read only property '{}' of object",
            key
        ))),
    }
}

fn array_push(call: &mut NativeCall<'_>) -> NativeOutcome {
    let (id, mut length) = match this_with_length(call) {
        Ok(found) => found,
        Err(outcome) => return outcome,
    };
    for item in call.args().to_vec() {
        if let Err(outcome) = write(call, id, &length.to_string(), item) {
            return outcome;
        }
        length = length.saturating_add(1);
    }
    let length = Value::from(length);
    if let Err(outcome) = write(call, id, "length", length.clone()) {
        return outcome;
    }
    NativeOutcome::Return(length)
}

fn array_pop(call: &mut NativeCall<'_>) -> NativeOutcome {
    let (id, length) = match this_with_length(call) {
        Ok(found) => found,
        Err(outcome) => return outcome,
    };
    let Some(last) = length.checked_sub(1) else {
        return match write(call, id, "length", Value::from(0)) {
            Ok(()) => NativeOutcome::Return(Value::Undefined),
            Err(outcome) => outcome,
        };
    };
    let key = last.to_string();
    let value = call.engine().get_property(id, &key);
    call.engine().heap.delete(id, &key);
    match write(call, id, "length", Value::from(last)) {
        Ok(()) => NativeOutcome::Return(value),
        Err(outcome) => outcome,
    }
}

fn array_join(call: &mut NativeCall<'_>) -> NativeOutcome {
    let (id, length) = match this_with_length(call) {
        Ok(found) => found,
        Err(outcome) => return outcome,
    };
    let separator = match call.arg(0) {
        Value::Undefined => JsString::from(","),
        other => call.to_string(&other),
    };
    let mut out = String::new();
    for i in 0..length {
        if i > 0 {
            out.push_str(&separator);
        }
        match call.engine().get_property(id, &i.to_string()) {
            Value::Undefined | Value::Null => {}
            item => out.push_str(&call.to_string(&item)),
        }
    }
    NativeOutcome::Return(Value::from(out))
}

// ═══════════════════════════════════════════════════════════════════════════
// Primitive wrappers
// ═══════════════════════════════════════════════════════════════════════════

/// Called as a function: convert. Called with `new`: box.
fn wrap(call: &mut NativeCall<'_>, primitive: Value) -> NativeOutcome {
    if !call.is_construct() {
        return NativeOutcome::Return(primitive);
    }
    match call.engine().to_object(&primitive) {
        Some(boxed) => NativeOutcome::Return(Value::Object(boxed)),
        None => NativeOutcome::Return(primitive),
    }
}

fn string_constructor(call: &mut NativeCall<'_>) -> NativeOutcome {
    let value = match call.args().first() {
        None => JsString::from(""),
        Some(v) => {
            let v = v.clone();
            call.to_string(&v)
        }
    };
    wrap(call, Value::String(value))
}

fn number_constructor(call: &mut NativeCall<'_>) -> NativeOutcome {
    let value = match call.args().first() {
        None => 0.0,
        Some(v) => {
            let v = v.clone();
            call.to_number(&v)
        }
    };
    wrap(call, Value::Number(value))
}

fn boolean_constructor(call: &mut NativeCall<'_>) -> NativeOutcome {
    let value = call.arg(0).to_boolean();
    wrap(call, Value::Boolean(value))
}

/// The primitive behind `this`, if `this` is that primitive or a box of it.
fn this_primitive(call: &NativeCall<'_>, class: Class) -> Option<Value> {
    match (call.this(), class) {
        (Value::String(_), Class::String)
        | (Value::Number(_), Class::Number)
        | (Value::Boolean(_), Class::Boolean) => Some(call.this().clone()),
        (Value::Object(id), _) => match &call.heap().get(*id)?.data {
            ObjectData::String(s) if class == Class::String => Some(Value::String(s.clone())),
            ObjectData::Number(n) if class == Class::Number => Some(Value::Number(*n)),
            ObjectData::Boolean(b) if class == Class::Boolean => Some(Value::Boolean(*b)),
            _ => None,
        },
        _ => None,
    }
}

fn string_value_of(call: &mut NativeCall<'_>) -> NativeOutcome {
    match this_primitive(call, Class::String) {
        Some(value) => NativeOutcome::Return(value),
        None => call.type_error("String.prototype.valueOf requires that 'this' be a String"),
    }
}

fn number_value_of(call: &mut NativeCall<'_>) -> NativeOutcome {
    match this_primitive(call, Class::Number) {
        Some(value) => NativeOutcome::Return(value),
        None => call.type_error("Number.prototype.valueOf requires that 'this' be a Number"),
    }
}

fn boolean_value_of(call: &mut NativeCall<'_>) -> NativeOutcome {
    match this_primitive(call, Class::Boolean) {
        Some(value) => NativeOutcome::Return(value),
        None => call.type_error("Boolean.prototype.valueOf requires that 'this' be a Boolean"),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Owner
// ═══════════════════════════════════════════════════════════════════════════

fn owner_constructor(call: &mut NativeCall<'_>) -> NativeOutcome {
    let callee = call.callee();
    let engine = call.engine();
    let proto = engine
        .get_property(callee, "prototype")
        .as_object()
        .unwrap_or(engine.intrinsics.object_prototype);
    let owner = engine.heap.alloc(Class::Owner, Some(proto), ObjectData::Ordinary);
    NativeOutcome::Return(Value::Object(owner))
}
