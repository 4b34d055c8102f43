//! Error and the native error constructors

use crate::interpreter::natives::{NativeCall, NativeOutcome, NativeRegistry};
use crate::interpreter::{ErrorKind, Interpreter};
use crate::value::{JsString, Value};

use super::{constructor, method};

pub fn register(natives: &mut NativeRegistry) {
    for kind in ErrorKind::ALL {
        natives.register(kind.name(), move |call: &mut NativeCall<'_>| {
            error_constructor(call, kind)
        });
    }
    natives.register("Error.prototype.toString", error_to_string);
}

/// Initialize Error and the derived constructors and add them to globals
pub fn init_error(interp: &mut Interpreter) {
    for kind in ErrorKind::ALL {
        let proto = interp.intrinsics.error_prototype(kind);
        interp
            .heap
            .define_hidden(proto, "name", Value::from(kind.name()));
        interp
            .heap
            .define_hidden(proto, "message", Value::String(JsString::from("")));
        constructor(interp, kind.name(), kind.name(), 1, proto);
    }
    let error_proto = interp.intrinsics.error_prototype;
    method(interp, error_proto, "toString", "Error.prototype.toString", 0);
}

/// `Error(message)` and `new Error(message)` behave the same: the new
/// object's `stack` is the calling thread's.
fn error_constructor(call: &mut NativeCall<'_>, kind: ErrorKind) -> NativeOutcome {
    let message = match call.arg(0) {
        Value::Undefined => String::new(),
        other => call.to_string(&other).to_string(),
    };
    NativeOutcome::Return(call.error(kind, message))
}

fn error_to_string(call: &mut NativeCall<'_>) -> NativeOutcome {
    match call.this().as_object() {
        Some(id) => {
            let text = call.engine().ops().error_to_string(id);
            NativeOutcome::Return(Value::String(text))
        }
        None => call.type_error("Error.prototype.toString called on non-object"),
    }
}
