//! Native functions
//!
//! A native is a host closure registered under a stable string id. Function
//! objects store only that id, so a checkpoint never contains a host
//! pointer and a restarted host re-registers the same ids before
//! rehydrating.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::bridge::ResolverId;
use crate::heap::{Heap, ObjectId};
use crate::interpreter::state::Continuation;
use crate::interpreter::{ErrorKind, Interpreter};
use crate::scheduler::ThreadId;
use crate::value::{JsString, Value};

/// What a native call asks the calling thread to do next
#[derive(Debug, Clone)]
pub enum NativeOutcome {
    /// Return a value to the caller
    Return(Value),
    /// Throw a guest exception in the caller
    Throw(Value),
    /// Block the caller until the call's resolver is settled (or, when no
    /// resolver was taken, until the host calls `wake`)
    Block,
    /// Sleep for this many milliseconds, then return undefined
    Sleep(u64),
    /// Go to the back of the ready queue, then return undefined
    Yield,
}

/// Signature of a native function
pub type NativeFn = Rc<dyn Fn(&mut NativeCall<'_>) -> NativeOutcome>;

/// Native functions by id
#[derive(Clone, Default)]
pub struct NativeRegistry {
    natives: FxHashMap<JsString, NativeFn>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the native behind `id`.
    pub fn register<F>(&mut self, id: impl Into<JsString>, f: F)
    where
        F: Fn(&mut NativeCall<'_>) -> NativeOutcome + 'static,
    {
        self.natives.insert(id.into(), Rc::new(f));
    }

    pub fn get(&self, id: &str) -> Option<NativeFn> {
        self.natives.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.natives.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.natives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.natives.is_empty()
    }

    /// Copy every entry of `other` that this registry lacks.
    pub(crate) fn merge_missing(&mut self, other: &NativeRegistry) {
        for (id, f) in &other.natives {
            self.natives.entry(id.clone()).or_insert_with(|| Rc::clone(f));
        }
    }
}

impl std::fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&str> = self.natives.keys().map(|k| k.as_str()).collect();
        ids.sort_unstable();
        f.debug_struct("NativeRegistry").field("ids", &ids).finish()
    }
}

/// Context handed to a native function
pub struct NativeCall<'a> {
    interp: &'a mut Interpreter,
    continuation: &'a Continuation,
    thread: ThreadId,
    callee: ObjectId,
    this: Value,
    args: Vec<Value>,
    construct: bool,
    resolver: Option<ResolverId>,
}

impl<'a> NativeCall<'a> {
    pub(crate) fn new(
        interp: &'a mut Interpreter,
        continuation: &'a Continuation,
        thread: ThreadId,
        callee: ObjectId,
        this: Value,
        args: Vec<Value>,
        construct: bool,
    ) -> Self {
        Self {
            interp,
            continuation,
            thread,
            callee,
            this,
            args,
            construct,
            resolver: None,
        }
    }

    /// The engine, for allocation and property access
    pub fn engine(&mut self) -> &mut Interpreter {
        &mut *self.interp
    }

    pub fn heap(&self) -> &Heap {
        &self.interp.heap
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Argument `index`, or undefined
    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or_default()
    }

    pub fn this(&self) -> &Value {
        &self.this
    }

    /// The function object being called
    pub fn callee(&self) -> ObjectId {
        self.callee
    }

    /// Called with `new`?
    pub fn is_construct(&self) -> bool {
        self.construct
    }

    /// The calling thread
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// The one-shot resolver for this call, bound to the calling thread.
    ///
    /// Taking it and then returning [`NativeOutcome::Block`] parks the
    /// caller until [`Interpreter::resolve`] or [`Interpreter::reject`] is
    /// called with it.
    pub fn resolver(&mut self) -> ResolverId {
        if let Some(r) = self.resolver {
            return r;
        }
        let r = self.interp.bridge.issue(self.thread);
        self.resolver = Some(r);
        r
    }

    pub(crate) fn issued_resolver(&self) -> Option<ResolverId> {
        self.resolver
    }

    /// Stack trace of the calling thread
    pub fn stack_trace(&self) -> String {
        self.continuation.stack_trace()
    }

    /// ToString
    pub fn to_string(&self, value: &Value) -> JsString {
        self.interp.ops().to_string(value)
    }

    /// ToNumber
    pub fn to_number(&self, value: &Value) -> f64 {
        self.interp.ops().to_number(value)
    }

    /// Build an Error object carrying the caller's stack.
    pub fn error(&mut self, kind: ErrorKind, message: impl Into<String>) -> Value {
        let trace = self.continuation.stack_trace();
        Value::Object(self.interp.make_error(kind, &message.into(), &trace))
    }

    pub fn throw(&mut self, kind: ErrorKind, message: impl Into<String>) -> NativeOutcome {
        NativeOutcome::Throw(self.error(kind, message))
    }

    pub fn type_error(&mut self, message: impl Into<String>) -> NativeOutcome {
        self.throw(ErrorKind::Type, message)
    }

    pub fn range_error(&mut self, message: impl Into<String>) -> NativeOutcome {
        self.throw(ErrorKind::Range, message)
    }
}
