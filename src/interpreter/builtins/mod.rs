//! Built-in globals
//!
//! Native behaviour is registered by id in [`register_all`]; [`install`]
//! builds the matching function objects and global bindings in a fresh
//! engine. A rehydrated engine already has the objects in its heap, so only
//! `register_all` runs for it.

pub mod errors;
pub mod object;
pub mod threads;
pub mod timers;

use crate::heap::{ObjectId, Property};
use crate::interpreter::natives::NativeRegistry;
use crate::interpreter::Interpreter;
use crate::value::{JsString, Value};

/// Register every built-in native.
pub fn register_all(natives: &mut NativeRegistry) {
    object::register(natives);
    errors::register(natives);
    threads::register(natives);
    timers::register(natives);
}

/// Create the global object graph for a new engine.
pub fn install(interp: &mut Interpreter) {
    init_constants(interp);
    object::init_object(interp);
    object::init_array(interp);
    object::init_primitive_wrappers(interp);
    object::init_owner(interp);
    errors::init_error(interp);
    threads::init_thread(interp);
    timers::init_timers(interp);
}

fn init_constants(interp: &mut Interpreter) {
    let global = interp.global_scope;
    for (name, value) in [
        ("undefined", Value::Undefined),
        ("NaN", Value::Number(f64::NAN)),
        ("Infinity", Value::Number(f64::INFINITY)),
    ] {
        interp
            .scopes
            .declare(global, JsString::from(name), value, false);
    }
}

/// Attach native `id` to `target` as a non-enumerable method.
pub(crate) fn method(interp: &mut Interpreter, target: ObjectId, name: &str, id: &str, length: u32) {
    let function = interp.create_native_function(id, name, length);
    interp
        .heap
        .define_hidden(target, name, Value::Object(function));
}

/// Bind global constructor `name` and link it with `prototype`.
pub(crate) fn constructor(
    interp: &mut Interpreter,
    name: &str,
    id: &str,
    length: u32,
    prototype: ObjectId,
) -> ObjectId {
    let function = interp.create_native_function(id, name, length);
    interp.heap.define(
        function,
        "prototype",
        Property::read_only(Value::Object(prototype)),
    );
    interp
        .heap
        .define_hidden(prototype, "constructor", Value::Object(function));
    interp.set_global(name, Value::Object(function));
    function
}

/// A global function that is not a constructor.
pub(crate) fn global_function(interp: &mut Interpreter, name: &str, id: &str, length: u32) -> ObjectId {
    let function = interp.create_native_function(id, name, length);
    interp.set_global(name, Value::Object(function));
    function
}
