//! The guest Thread API

use crate::heap::ObjectData;
use crate::interpreter::natives::{NativeCall, NativeOutcome, NativeRegistry};
use crate::interpreter::Interpreter;
use crate::scheduler::ThreadId;
use crate::value::Value;

use super::{constructor, method};

pub fn register(natives: &mut NativeRegistry) {
    natives.register("Thread", spawn_timer);
    natives.register("Thread.current", thread_current);
    natives.register("Thread.kill", thread_kill);
}

pub fn init_thread(interp: &mut Interpreter) {
    let thread_proto = interp.intrinsics.thread_prototype;
    let thread_ctor = constructor(interp, "Thread", "Thread", 1, thread_proto);
    method(interp, thread_ctor, "current", "Thread.current", 0);
    method(interp, thread_ctor, "kill", "Thread.kill", 1);
}

/// Milliseconds from a guest delay argument. Missing, negative and NaN
/// delays mean "as soon as possible".
pub(crate) fn delay_millis(call: &NativeCall<'_>, value: &Value) -> u64 {
    if value.is_undefined() {
        return 0;
    }
    let ms = call.to_number(value);
    if ms.is_nan() || ms <= 0.0 {
        0
    } else {
        ms.ceil() as u64
    }
}

/// `new Thread(fn, delay, ...args)` and `setTimeout(fn, delay, ...args)`:
/// start `fn(...args)` on a thread of its own and return its Thread object.
pub(crate) fn spawn_timer(call: &mut NativeCall<'_>) -> NativeOutcome {
    let target = call
        .arg(0)
        .as_object()
        .filter(|id| call.heap().is_callable(*id));
    let Some(function) = target else {
        let shown = call.to_string(&call.arg(0));
        return call.type_error(format!("{} is not a function", shown));
    };
    let delay = delay_millis(call, &call.arg(1));
    let args = call.args().get(2..).map(<[Value]>::to_vec).unwrap_or_default();

    let engine = call.engine();
    let spawned = engine
        .spawn_call(function, Value::Undefined, args, delay, None)
        .and_then(|id| engine.thread_object(id));
    match spawned {
        Ok(object) => NativeOutcome::Return(Value::Object(object)),
        Err(error) => call.type_error(error.to_string()),
    }
}

/// The thread behind a guest Thread object
pub(crate) fn thread_id_of(call: &NativeCall<'_>, value: &Value) -> Option<ThreadId> {
    let object = call.heap().get(value.as_object()?)?;
    match object.data {
        ObjectData::Thread(id) => Some(id),
        _ => None,
    }
}

fn thread_current(call: &mut NativeCall<'_>) -> NativeOutcome {
    let id = call.thread();
    match call.engine().thread_object(id) {
        Ok(object) => NativeOutcome::Return(Value::Object(object)),
        Err(error) => call.type_error(error.to_string()),
    }
}

/// Kill a thread. Killing the calling thread stops it before this call
/// returns.
fn thread_kill(call: &mut NativeCall<'_>) -> NativeOutcome {
    let Some(id) = thread_id_of(call, &call.arg(0)) else {
        return call.type_error("Thread.kill expects a Thread");
    };
    match call.engine().kill_thread(id) {
        Ok(killed) => NativeOutcome::Return(Value::Boolean(killed)),
        Err(error) => call.type_error(error.to_string()),
    }
}
