//! The engine context: object and scope tables, the scheduler, the blocking
//! bridge and the host API that drives them.
//!
//! Evaluation itself lives in `eval`; this module owns the state and the
//! transitions a step causes (thread completion, settlement delivery,
//! real-time pacing).

pub(crate) mod builtins;
mod eval;
pub mod natives;
pub mod operators;
pub mod state;

use std::collections::BTreeSet;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::ast::{FunctionNode, Hoisted};
use crate::bridge::{Bridge, Deferred, ResolverId, Settlement};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::heap::{Class, FunctionData, Heap, HeapObject, ObjectData, ObjectId, Property, SetOutcome};
use crate::parser::parse;
use crate::platform::{StdTimeProvider, TimeProvider};
use crate::scheduler::{Completion, Resume, Scheduler, Thread, ThreadId, ThreadStatus};
use crate::scope::{Scope, ScopeArena, ScopeId, ScopeKind};
use crate::trace::{self, Edge, Reachable};
use crate::value::{JsString, Value};

use eval::Signal;
use natives::{NativeCall, NativeOutcome, NativeRegistry};
use operators::Ops;
use state::{Continuation, Frame};

/// Engine-raised error classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Error,
    Type,
    Range,
    Reference,
    Syntax,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::Type => "TypeError",
            ErrorKind::Range => "RangeError",
            ErrorKind::Reference => "ReferenceError",
            ErrorKind::Syntax => "SyntaxError",
        }
    }

    pub(crate) const ALL: [ErrorKind; 5] = [
        ErrorKind::Error,
        ErrorKind::Type,
        ErrorKind::Range,
        ErrorKind::Reference,
        ErrorKind::Syntax,
    ];
}

/// Prototype objects the evaluator needs by identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intrinsics {
    pub object_prototype: ObjectId,
    pub function_prototype: ObjectId,
    pub array_prototype: ObjectId,
    pub error_prototype: ObjectId,
    pub type_error_prototype: ObjectId,
    pub range_error_prototype: ObjectId,
    pub reference_error_prototype: ObjectId,
    pub syntax_error_prototype: ObjectId,
    pub thread_prototype: ObjectId,
    pub string_prototype: ObjectId,
    pub number_prototype: ObjectId,
    pub boolean_prototype: ObjectId,
}

impl Intrinsics {
    fn create(heap: &mut Heap) -> Self {
        let object_prototype = heap.alloc(Class::Object, None, ObjectData::Ordinary);
        let function_prototype = heap.alloc(
            Class::Function,
            Some(object_prototype),
            ObjectData::Function(FunctionData::Native {
                id: JsString::from("Function.prototype"),
            }),
        );
        let array_prototype = heap.alloc_array(Some(object_prototype), Vec::new());
        let error_prototype = heap.alloc(Class::Object, Some(object_prototype), ObjectData::Ordinary);
        let mut derived = || heap.alloc(Class::Object, Some(error_prototype), ObjectData::Ordinary);
        let type_error_prototype = derived();
        let range_error_prototype = derived();
        let reference_error_prototype = derived();
        let syntax_error_prototype = derived();
        let thread_prototype = heap.alloc(Class::Object, Some(object_prototype), ObjectData::Ordinary);
        let string_prototype = heap.alloc(
            Class::String,
            Some(object_prototype),
            ObjectData::String(JsString::from("")),
        );
        let number_prototype = heap.alloc(
            Class::Number,
            Some(object_prototype),
            ObjectData::Number(0.0),
        );
        let boolean_prototype = heap.alloc(
            Class::Boolean,
            Some(object_prototype),
            ObjectData::Boolean(false),
        );
        Self {
            object_prototype,
            function_prototype,
            array_prototype,
            error_prototype,
            type_error_prototype,
            range_error_prototype,
            reference_error_prototype,
            syntax_error_prototype,
            thread_prototype,
            string_prototype,
            number_prototype,
            boolean_prototype,
        }
    }

    pub fn error_prototype(&self, kind: ErrorKind) -> ObjectId {
        match kind {
            ErrorKind::Error => self.error_prototype,
            ErrorKind::Type => self.type_error_prototype,
            ErrorKind::Range => self.range_error_prototype,
            ErrorKind::Reference => self.reference_error_prototype,
            ErrorKind::Syntax => self.syntax_error_prototype,
        }
    }

    pub fn ids(&self) -> [ObjectId; 12] {
        [
            self.object_prototype,
            self.function_prototype,
            self.array_prototype,
            self.error_prototype,
            self.type_error_prototype,
            self.range_error_prototype,
            self.reference_error_prototype,
            self.syntax_error_prototype,
            self.thread_prototype,
            self.string_prototype,
            self.number_prototype,
            self.boolean_prototype,
        ]
    }
}

/// Real-time pacing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineStatus {
    Running,
    Paused,
    Stopped,
}

/// What one call to [`Interpreter::step`] did
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    /// The thread made progress and keeps running
    Continue,
    /// The thread gave up its turn (timeslice or yield) and is ready again
    Suspend,
    /// The thread is blocked on a native call. `None` means it waits for
    /// [`Interpreter::wake`].
    Block(Option<ResolverId>),
    /// The thread sleeps until this engine time
    Sleep(u64),
    Done(Value),
    Threw(Value),
    /// The thread was killed while it ran
    Killed,
    /// No thread could run
    Idle { next_wake: Option<u64> },
}

/// Counts from one [`Interpreter::collect_garbage`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub objects_freed: usize,
    pub scopes_freed: usize,
    pub threads_pruned: usize,
}

/// A resumable guest-script engine.
///
/// One `Interpreter` owns every object, scope and thread. Nothing is global,
/// so independent engines can live side by side.
pub struct Interpreter {
    pub(crate) config: EngineConfig,
    pub(crate) heap: Heap,
    pub(crate) scopes: ScopeArena,
    pub(crate) scheduler: Scheduler,
    pub(crate) bridge: Bridge,
    pub(crate) natives: NativeRegistry,
    pub(crate) intrinsics: Intrinsics,
    pub(crate) global_scope: ScopeId,
    pub(crate) time: Rc<dyn TimeProvider>,
    /// Provider reading that corresponds to engine time `clock_offset`
    pub(crate) clock_origin: u64,
    pub(crate) clock_offset: u64,
    pub(crate) status: EngineStatus,
    /// A step is in progress
    pub(crate) stepping: bool,
    /// `pause`/`stop` was called; `run` returns before its next step
    pub(crate) interrupted: bool,
    /// Objects the host keeps alive across garbage collection
    pub(crate) pinned: BTreeSet<ObjectId>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("status", &self.status)
            .field("objects", &self.heap.len())
            .field("scopes", &self.scopes.len())
            .field("threads", &self.scheduler.len())
            .finish()
    }
}

impl Interpreter {
    /// An engine on the system monotonic clock with default limits.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default(), Rc::new(StdTimeProvider::new()))
    }

    pub fn with_config(config: EngineConfig, time: Rc<dyn TimeProvider>) -> Self {
        let mut heap = Heap::new();
        let intrinsics = Intrinsics::create(&mut heap);
        let mut scopes = ScopeArena::new();
        let global_scope = scopes.create(ScopeKind::Global, None, Value::Undefined);
        let mut natives = NativeRegistry::new();
        builtins::register_all(&mut natives);
        let clock_origin = time.monotonic_millis();

        let mut interp = Self {
            config,
            heap,
            scopes,
            scheduler: Scheduler::new(),
            bridge: Bridge::new(),
            natives,
            intrinsics,
            global_scope,
            time,
            clock_origin,
            clock_offset: 0,
            status: EngineStatus::Paused,
            stepping: false,
            interrupted: false,
            pinned: BTreeSet::new(),
        };
        builtins::install(&mut interp);
        interp
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Loading and stepping
    // ═══════════════════════════════════════════════════════════════════════

    /// Parse `source` and create a thread that runs it in the global scope.
    pub fn load(&mut self, source: &str) -> Result<ThreadId, EngineError> {
        let program = parse(source)?;
        self.instantiate_hoisted(self.global_scope, &program.hoisted)?;
        let mut continuation = Continuation::new(self.global_scope);
        continuation.frames.push(Frame::Statements {
            body: program.body,
            next: 0,
        });
        let id = self.scheduler.spawn(continuation, None);
        tracing::debug!(target: "spindle::thread", thread = %id, "thread.spawn");
        Ok(id)
    }

    /// Advance the current thread (or the next ready one) by one state.
    pub fn step(&mut self) -> Result<StepResult, EngineError> {
        if self.stepping {
            return Err(EngineError::Reentrant("step"));
        }
        self.apply_deferred();
        let now = self.now();
        self.scheduler.wake_due(now);

        let Some(id) = self.scheduler.current().or_else(|| self.scheduler.select()) else {
            return Ok(StepResult::Idle {
                next_wake: self.scheduler.next_wake(),
            });
        };

        self.stepping = true;
        let result = self.step_thread(id);
        self.stepping = false;
        self.apply_deferred();
        result
    }

    fn step_thread(&mut self, id: ThreadId) -> Result<StepResult, EngineError> {
        let (mut continuation, resume) = {
            let thread = self
                .scheduler
                .get_mut(id)
                .ok_or(EngineError::UnknownThread(id))?;
            thread.started = true;
            let placeholder = Continuation::new(thread.continuation.scope);
            (
                std::mem::replace(&mut thread.continuation, placeholder),
                thread.resume.take(),
            )
        };

        let outcome = eval::advance(self, id, &mut continuation, resume);

        // A native may have killed this very thread.
        match self.scheduler.get_mut(id) {
            Some(thread) if thread.is_alive() => thread.continuation = continuation,
            _ => return Ok(StepResult::Killed),
        }

        let signal = match outcome {
            Ok(signal) => signal,
            Err(error) => {
                let stack = self
                    .scheduler
                    .get(id)
                    .map(|t| t.continuation.stack_trace())
                    .unwrap_or_default();
                tracing::error!(target: "spindle::thread", thread = %id, %error, "host error while stepping");
                self.complete_thread(
                    id,
                    Completion::Threw {
                        value: Value::String(JsString::from(error.to_string())),
                        stack,
                    },
                );
                return Err(error);
            }
        };

        Ok(match signal {
            Signal::Continue => {
                if self.scheduler.charge_step(self.config.timeslice) {
                    self.scheduler.make_ready(id);
                    StepResult::Suspend
                } else {
                    StepResult::Continue
                }
            }
            Signal::Yield => {
                self.scheduler.make_ready(id);
                StepResult::Suspend
            }
            Signal::Sleep(until) => {
                self.scheduler.sleep(id, until);
                StepResult::Sleep(until)
            }
            Signal::Block(resolver) => {
                self.scheduler.block(id, resolver);
                StepResult::Block(resolver)
            }
            Signal::Done(value) => {
                self.complete_thread(id, Completion::Returned(value.clone()));
                StepResult::Done(value)
            }
            Signal::Threw { value, stack } => {
                self.complete_thread(
                    id,
                    Completion::Threw {
                        value: value.clone(),
                        stack,
                    },
                );
                StepResult::Threw(value)
            }
        })
    }

    /// Step until no thread is ready or `pause`/`stop` is called.
    ///
    /// Returns when the host should call again: `Some(now)` if work is
    /// still ready, the next wake time if only sleepers remain, `None` if
    /// every live thread waits on the host.
    pub fn run(&mut self) -> Result<Option<u64>, EngineError> {
        if self.stepping {
            return Err(EngineError::Reentrant("run"));
        }
        self.interrupted = false;
        while !self.interrupted {
            if let StepResult::Idle { next_wake } = self.step()? {
                return Ok(next_wake);
            }
        }
        Ok(self.next_wake_hint())
    }

    fn next_wake_hint(&self) -> Option<u64> {
        if self.scheduler.has_ready() || self.scheduler.current().is_some() {
            Some(self.now())
        } else {
            self.scheduler.next_wake()
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Real-time pacing
    // ═══════════════════════════════════════════════════════════════════════

    /// Enter RUNNING so that [`tick`](Self::tick) makes progress. A stopped
    /// engine stays stopped; returns whether the engine is now running.
    pub fn start(&mut self) -> bool {
        match self.status {
            EngineStatus::Running => true,
            EngineStatus::Stopped => false,
            EngineStatus::Paused => {
                self.status = EngineStatus::Running;
                tracing::info!(target: "spindle::scheduler", "scheduler.start");
                true
            }
        }
    }

    /// Stop making progress after the step in flight, if any.
    pub fn pause(&mut self) {
        self.interrupted = true;
        if self.status == EngineStatus::Running {
            self.status = EngineStatus::Paused;
            tracing::info!(target: "spindle::scheduler", "scheduler.pause");
        }
    }

    /// Like [`pause`](Self::pause), but final: `start` has no effect
    /// afterwards. Stepping by hand still works.
    pub fn stop(&mut self) {
        self.interrupted = true;
        if self.status != EngineStatus::Stopped {
            self.status = EngineStatus::Stopped;
            tracing::info!(target: "spindle::scheduler", "scheduler.stop");
        }
    }

    /// Host timer callback: runs the scheduler only while RUNNING.
    pub fn tick(&mut self) -> Result<Option<u64>, EngineError> {
        if self.status != EngineStatus::Running {
            return Ok(None);
        }
        self.run()
    }

    /// Block the host, ticking and sleeping until nothing can make progress
    /// without outside help or the engine is paused.
    pub fn run_realtime(&mut self) -> Result<(), EngineError> {
        self.start();
        while self.status == EngineStatus::Running {
            let Some(at) = self.tick()? else {
                break;
            };
            let now = self.now();
            if at > now {
                self.time.sleep(at - now);
            }
        }
        Ok(())
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Threads
    // ═══════════════════════════════════════════════════════════════════════

    /// Kill a thread immediately. Its `finally` blocks do not run. Returns
    /// false for a thread that had already ended.
    pub fn kill_thread(&mut self, id: ThreadId) -> Result<bool, EngineError> {
        let thread = self.scheduler.get(id).ok_or(EngineError::UnknownThread(id))?;
        if !thread.is_alive() {
            return Ok(false);
        }
        if let Some(resolver) = thread.blocked_on {
            self.bridge.cancel(resolver);
        }
        self.complete_thread(id, Completion::Killed);
        Ok(true)
    }

    /// Create a thread that calls `function` with `this` and `args`.
    ///
    /// With a delay the thread starts asleep. With `on_complete` the
    /// thread's return value resolves that resolver and an uncaught throw
    /// rejects it.
    pub fn spawn_call(
        &mut self,
        function: ObjectId,
        this: Value,
        args: Vec<Value>,
        delay_ms: u64,
        on_complete: Option<ResolverId>,
    ) -> Result<ThreadId, EngineError> {
        if !self.heap.is_callable(function) {
            return Err(EngineError::NotCallable(format!("{}", function)));
        }
        let argc = args.len();
        let mut continuation = Continuation::new(self.global_scope);
        continuation.values.push(this);
        continuation.values.push(Value::Object(function));
        continuation.values.extend(args);
        continuation.frames.push(Frame::Invoke { argc, name: None });

        let wake_at = (delay_ms > 0).then(|| self.now().saturating_add(delay_ms));
        let id = self.scheduler.spawn(continuation, wake_at);
        if let Some(thread) = self.scheduler.get_mut(id) {
            thread.on_complete = on_complete;
        }
        tracing::debug!(target: "spindle::thread", thread = %id, delay_ms, "thread.spawn");
        Ok(id)
    }

    /// The guest-visible Thread object for `id`, created on first use.
    pub fn thread_object(&mut self, id: ThreadId) -> Result<ObjectId, EngineError> {
        let thread = self.scheduler.get(id).ok_or(EngineError::UnknownThread(id))?;
        if let Some(object) = thread.object {
            return Ok(object);
        }
        let object = self.heap.alloc(
            Class::Thread,
            Some(self.intrinsics.thread_prototype),
            ObjectData::Thread(id),
        );
        self.heap
            .define(object, "id", Property::read_only(Value::from(id.0 as f64)));
        if let Some(thread) = self.scheduler.get_mut(id) {
            thread.object = Some(object);
        }
        Ok(object)
    }

    /// Move a thread to ZOMBIE and settle whoever waits for it.
    pub(crate) fn complete_thread(&mut self, id: ThreadId, completion: Completion) {
        match &completion {
            Completion::Returned(_) => {
                tracing::debug!(target: "spindle::thread", thread = %id, "thread.exit");
            }
            Completion::Threw { value, stack } => {
                tracing::warn!(
                    target: "spindle::thread",
                    thread = %id,
                    error = %self.display(value),
                    %stack,
                    "uncaught guest error"
                );
            }
            Completion::Killed => {
                tracing::debug!(target: "spindle::thread", thread = %id, "thread.kill");
            }
        }

        let on_complete = self.scheduler.get(id).and_then(|t| t.on_complete);
        let settlement = on_complete.map(|_| match &completion {
            Completion::Returned(value) => Settlement::Resolve(value.clone()),
            Completion::Threw { value, .. } => Settlement::Reject(value.clone()),
            Completion::Killed => Settlement::Reject(Value::Object(self.make_error(
                ErrorKind::Error,
                "thread was killed",
                "",
            ))),
        });
        self.scheduler.finish(id, completion);

        if let (Some(resolver), Some(settlement)) = (on_complete, settlement) {
            match self.bridge.take(resolver) {
                Ok(waiting) => self.deliver(Deferred {
                    resolver: Some(resolver),
                    thread: waiting,
                    settlement,
                }),
                Err(error) => {
                    tracing::warn!(target: "spindle::bridge", thread = %id, %error, "completion resolver already used");
                }
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Blocking bridge
    // ═══════════════════════════════════════════════════════════════════════

    /// Resume the thread blocked on `resolver` with `value`.
    ///
    /// Each resolver settles once; a second `resolve` or `reject` is an
    /// error for the host and changes nothing.
    pub fn resolve(&mut self, resolver: ResolverId, value: Value) -> Result<(), EngineError> {
        let thread = self.bridge.take(resolver)?;
        tracing::debug!(target: "spindle::bridge", %resolver, %thread, "bridge.resolve");
        self.deliver(Deferred {
            resolver: Some(resolver),
            thread,
            settlement: Settlement::Resolve(value),
        });
        Ok(())
    }

    /// Resume the thread blocked on `resolver` by throwing `error` in it.
    /// Any value may be thrown.
    pub fn reject(&mut self, resolver: ResolverId, error: Value) -> Result<(), EngineError> {
        let thread = self.bridge.take(resolver)?;
        tracing::debug!(target: "spindle::bridge", %resolver, %thread, "bridge.reject");
        self.deliver(Deferred {
            resolver: Some(resolver),
            thread,
            settlement: Settlement::Reject(error),
        });
        Ok(())
    }

    /// Wake a thread parked by `suspend()` with no duration. Returns false
    /// if the thread is not waiting for a wake.
    pub fn wake(&mut self, id: ThreadId) -> Result<bool, EngineError> {
        let thread = self.scheduler.get(id).ok_or(EngineError::UnknownThread(id))?;
        if thread.status != ThreadStatus::Blocked || thread.blocked_on.is_some() {
            return Ok(false);
        }
        self.deliver(Deferred {
            resolver: None,
            thread: id,
            settlement: Settlement::Resolve(Value::Undefined),
        });
        Ok(true)
    }

    fn deliver(&mut self, deferred: Deferred) {
        if self.stepping {
            self.bridge.defer(deferred);
        } else {
            self.apply_settlement(deferred);
        }
    }

    fn apply_deferred(&mut self) {
        for deferred in self.bridge.drain_deferred() {
            self.apply_settlement(deferred);
        }
    }

    fn apply_settlement(&mut self, deferred: Deferred) {
        let Some(thread) = self.scheduler.get_mut(deferred.thread) else {
            return;
        };
        if thread.status != ThreadStatus::Blocked || thread.blocked_on != deferred.resolver {
            tracing::debug!(
                target: "spindle::bridge",
                thread = %deferred.thread,
                "settlement for a thread that is no longer waiting"
            );
            return;
        }
        thread.resume = Some(match deferred.settlement {
            Settlement::Resolve(value) => Resume::Value(value),
            Settlement::Reject(error) => Resume::Error(error),
        });
        thread.blocked_on = None;
        self.scheduler.make_ready(deferred.thread);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Natives and globals
    // ═══════════════════════════════════════════════════════════════════════

    /// Register (or replace) the native behind `id`.
    pub fn register_native<F>(&mut self, id: impl Into<JsString>, f: F)
    where
        F: Fn(&mut NativeCall<'_>) -> NativeOutcome + 'static,
    {
        self.natives.register(id, f);
    }

    /// Bind a global `name` to a function object calling native `id`.
    pub fn define_global_native(&mut self, name: &str, id: &str) -> Result<ObjectId, EngineError> {
        if !self.natives.contains(id) {
            return Err(EngineError::UnknownNative(id.to_string()));
        }
        let function = self.create_native_function(id, name, 0);
        self.set_global(name, Value::Object(function));
        Ok(function)
    }

    pub(crate) fn create_native_function(&mut self, id: &str, name: &str, length: u32) -> ObjectId {
        let function = self.heap.alloc(
            Class::Function,
            Some(self.intrinsics.function_prototype),
            ObjectData::Function(FunctionData::Native {
                id: JsString::from(id),
            }),
        );
        self.heap
            .define(function, "length", Property::read_only(Value::from(length)));
        self.heap
            .define(function, "name", Property::read_only(Value::from(name)));
        function
    }

    /// Create a guest function closing over `scope`.
    pub(crate) fn create_closure(
        &mut self,
        node: Rc<FunctionNode>,
        scope: ScopeId,
    ) -> Result<ObjectId, EngineError> {
        // A named function expression sees its own name, immutably.
        let self_binding = match (&node.name, node.is_expression) {
            (Some(name), true) => {
                let inner = self.scopes.create(ScopeKind::Block, Some(scope), Value::Undefined);
                self.scopes.declare(inner, name.clone(), Value::Undefined, false);
                Some((inner, name.clone()))
            }
            _ => None,
        };
        let closure_scope = self_binding.as_ref().map(|(s, _)| *s).unwrap_or(scope);

        let name = node.name.clone().unwrap_or_else(|| JsString::from(""));
        let length = node.params.len() as f64;
        let function = self.heap.alloc(
            Class::Function,
            Some(self.intrinsics.function_prototype),
            ObjectData::Function(FunctionData::Guest {
                node,
                scope: closure_scope,
            }),
        );
        if let Some((inner, self_name)) = self_binding {
            self.scopes
                .initialize(inner, &self_name, Value::Object(function))?;
        }

        self.heap
            .define(function, "length", Property::read_only(Value::from(length)));
        self.heap
            .define(function, "name", Property::read_only(Value::String(name)));
        let prototype = self.heap.alloc(
            Class::Object,
            Some(self.intrinsics.object_prototype),
            ObjectData::Ordinary,
        );
        self.heap
            .define_hidden(prototype, "constructor", Value::Object(function));
        self.heap.define(
            function,
            "prototype",
            Property {
                value: Value::Object(prototype),
                writable: true,
                enumerable: false,
                configurable: false,
            },
        );
        Ok(function)
    }

    /// Declare a body's `var`, `let`/`const` and function names in `scope`.
    pub(crate) fn instantiate_hoisted(
        &mut self,
        scope: ScopeId,
        hoisted: &Hoisted,
    ) -> Result<(), EngineError> {
        for name in &hoisted.vars {
            self.scopes.declare_var(scope, name);
        }
        for lexical in &hoisted.lexical {
            self.scopes
                .declare(scope, lexical.name.clone(), Value::Undefined, !lexical.constant);
        }
        for node in &hoisted.functions {
            let function = self.create_closure(Rc::clone(node), scope)?;
            if let Some(name) = &node.name {
                self.scopes
                    .declare(scope, name.clone(), Value::Object(function), true);
            }
        }
        Ok(())
    }

    /// Build an Error-class object whose `stack` ends with `trace`.
    pub fn make_error(&mut self, kind: ErrorKind, message: &str, trace: &str) -> ObjectId {
        let error = self.heap.alloc(
            Class::Error,
            Some(self.intrinsics.error_prototype(kind)),
            ObjectData::Ordinary,
        );
        self.heap.define_hidden(error, "message", Value::from(message));
        let head = if message.is_empty() {
            kind.name().to_string()
        } else {
            format!("{}: {}", kind.name(), message)
        };
        self.heap
            .define_hidden(error, "stack", Value::from(format!("{}{}", head, trace)));
        error
    }

    /// ToObject: primitives are boxed, null and undefined have no object.
    pub fn to_object(&mut self, value: &Value) -> Option<ObjectId> {
        let (class, proto, data) = match value {
            Value::Object(id) => return Some(*id),
            Value::Undefined | Value::Null => return None,
            Value::Boolean(b) => (
                Class::Boolean,
                self.intrinsics.boolean_prototype,
                ObjectData::Boolean(*b),
            ),
            Value::Number(n) => (
                Class::Number,
                self.intrinsics.number_prototype,
                ObjectData::Number(*n),
            ),
            Value::String(s) => (
                Class::String,
                self.intrinsics.string_prototype,
                ObjectData::String(s.clone()),
            ),
        };
        Some(self.heap.alloc(class, Some(proto), data))
    }

    /// Read a global binding.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.scopes
            .get(self.global_scope)
            .and_then(|s| s.bindings.get(name))
            .map(|b| b.value.clone())
    }

    /// Create or overwrite a mutable global binding.
    pub fn set_global(&mut self, name: &str, value: Value) {
        self.scopes
            .declare(self.global_scope, JsString::from(name), value, true);
    }

    pub fn create_object(&mut self) -> ObjectId {
        self.heap.alloc(
            Class::Object,
            Some(self.intrinsics.object_prototype),
            ObjectData::Ordinary,
        )
    }

    pub fn create_array(&mut self, items: Vec<Value>) -> ObjectId {
        self.heap
            .alloc_array(Some(self.intrinsics.array_prototype), items)
    }

    pub fn get_property(&self, object: ObjectId, key: &str) -> Value {
        self.heap
            .get_value(object, key, self.config.max_proto_depth)
    }

    pub fn set_property(&mut self, object: ObjectId, key: &str, value: Value) -> SetOutcome {
        self.heap
            .set(object, key, value, self.config.max_proto_depth)
    }

    /// ToString, for printing results.
    pub fn display(&self, value: &Value) -> String {
        self.ops().to_string(value).to_string()
    }

    pub(crate) fn ops(&self) -> Ops<'_> {
        Ops::new(&self.heap, self.config.max_proto_depth)
    }

    /// Engine time in milliseconds. Continues across checkpoints.
    pub fn now(&self) -> u64 {
        self.time
            .monotonic_millis()
            .saturating_sub(self.clock_origin)
            .saturating_add(self.clock_offset)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Read interface
    // ═══════════════════════════════════════════════════════════════════════

    /// Every thread in id order, zombies included.
    pub fn threads(&self) -> impl Iterator<Item = &Thread> {
        self.scheduler.iter()
    }

    pub fn thread(&self, id: ThreadId) -> Option<&Thread> {
        self.scheduler.get(id)
    }

    pub fn thread_status(&self, id: ThreadId) -> Option<ThreadStatus> {
        self.scheduler.get(id).map(|t| t.status)
    }

    pub fn completion(&self, id: ThreadId) -> Option<&Completion> {
        self.scheduler.get(id).and_then(|t| t.completion.as_ref())
    }

    /// Threads in the ready queue, front first.
    pub fn ready_threads(&self) -> Vec<ThreadId> {
        self.scheduler.ready_ids().collect()
    }

    pub fn object(&self, id: ObjectId) -> Option<&HeapObject> {
        self.heap.get(id)
    }

    pub fn scope(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(id)
    }

    pub fn global_scope(&self) -> ScopeId {
        self.global_scope
    }

    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    /// Objects, scopes and threads reachable from the global scope, the
    /// intrinsics, pinned objects and every thread.
    pub fn reachable(&self) -> Reachable {
        let roots = self.roots(self.scheduler.iter().map(|t| t.id));
        trace::mark(&self.heap, &self.scopes, &self.scheduler, roots)
    }

    fn roots(&self, threads: impl Iterator<Item = ThreadId>) -> Vec<Edge> {
        let mut roots = vec![Edge::Scope(self.global_scope)];
        roots.extend(self.intrinsics.ids().into_iter().map(Edge::Object));
        roots.extend(self.pinned.iter().copied().map(Edge::Object));
        roots.extend(threads.map(Edge::Thread));
        roots
    }

    /// Keep `id` alive across garbage collection until `unpin`.
    pub fn pin(&mut self, id: ObjectId) {
        self.pinned.insert(id);
    }

    pub fn unpin(&mut self, id: ObjectId) {
        self.pinned.remove(&id);
    }

    /// Free unreachable objects and scopes, and forget zombie threads that
    /// no Thread object refers to.
    pub fn collect_garbage(&mut self) -> Result<GcStats, EngineError> {
        if self.stepping {
            return Err(EngineError::Reentrant("collect_garbage"));
        }
        let live_threads: Vec<ThreadId> = self
            .scheduler
            .iter()
            .filter(|t| t.is_alive())
            .map(|t| t.id)
            .collect();
        let roots = self.roots(live_threads.into_iter());
        let reachable = trace::mark(&self.heap, &self.scopes, &self.scheduler, roots);

        let stats = GcStats {
            threads_pruned: self.scheduler.prune(&reachable.threads),
            objects_freed: self.heap.retain(&reachable.objects),
            scopes_freed: self.scopes.retain(&reachable.scopes),
        };
        let scheduler = &self.scheduler;
        self.bridge.retain_threads(|thread| scheduler.contains(thread));
        tracing::debug!(
            target: "spindle::gc",
            objects = stats.objects_freed,
            scopes = stats.scopes_freed,
            threads = stats.threads_pruned,
            "collect_garbage"
        );
        Ok(stats)
    }
}
