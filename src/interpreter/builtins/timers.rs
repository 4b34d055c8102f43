//! suspend, setTimeout and clearTimeout

use crate::interpreter::natives::{NativeCall, NativeOutcome, NativeRegistry};
use crate::interpreter::Interpreter;
use crate::value::Value;

use super::global_function;
use super::threads::{spawn_timer, thread_id_of};

pub fn register(natives: &mut NativeRegistry) {
    natives.register("suspend", suspend);
    natives.register("setTimeout", spawn_timer);
    natives.register("clearTimeout", clear_timeout);
}

pub fn init_timers(interp: &mut Interpreter) {
    global_function(interp, "suspend", "suspend", 1);
    global_function(interp, "setTimeout", "setTimeout", 2);
    global_function(interp, "clearTimeout", "clearTimeout", 1);
}

/// `suspend()` parks the thread until the host wakes it, `suspend(ms)`
/// sleeps, and `suspend(0)` (or any non-positive delay) yields.
fn suspend(call: &mut NativeCall<'_>) -> NativeOutcome {
    let arg = call.arg(0);
    if arg.is_undefined() {
        return NativeOutcome::Block;
    }
    let ms = call.to_number(&arg);
    if ms.is_nan() || ms <= 0.0 {
        NativeOutcome::Yield
    } else {
        NativeOutcome::Sleep(ms.ceil() as u64)
    }
}

/// Cancel a timer that has not fired. Anything else is ignored.
fn clear_timeout(call: &mut NativeCall<'_>) -> NativeOutcome {
    let Some(id) = thread_id_of(call, &call.arg(0)) else {
        return NativeOutcome::Return(Value::Undefined);
    };
    let pending = call
        .engine()
        .thread(id)
        .is_some_and(|t| t.is_alive() && !t.started);
    if pending {
        if let Err(error) = call.engine().kill_thread(id) {
            tracing::debug!(target: "spindle::timers", thread = %id, %error, "clearTimeout failed");
        }
    }
    NativeOutcome::Return(Value::Undefined)
}
