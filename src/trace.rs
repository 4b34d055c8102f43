//! Reference tracing over the object, scope and thread tables
//!
//! Everything in the engine refers to everything else by id, so a single
//! [`Traceable`] trait that reports outgoing ids is enough for reachability
//! (serialization consumers), garbage collection and checkpoint validation.
//! The mark walk uses an explicit worklist and visited sets, so cyclic
//! object graphs and long chains cost neither recursion nor extra passes.

use std::collections::BTreeSet;

use crate::heap::{FunctionData, Heap, HeapObject, ObjectData, ObjectId, Property};
use crate::interpreter::state::{Abrupt, Continuation, Frame};
use crate::scheduler::{Completion, Resume, Scheduler, Thread, ThreadId};
use crate::scope::{Scope, ScopeArena, ScopeId};
use crate::value::Value;

/// An outgoing reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Edge {
    Object(ObjectId),
    Scope(ScopeId),
    Thread(ThreadId),
}

/// Types that hold references into the engine tables.
pub trait Traceable {
    /// Call `visitor` once for every id stored in this value.
    fn trace<F: FnMut(Edge)>(&self, visitor: &mut F);
}

impl Traceable for Value {
    fn trace<F: FnMut(Edge)>(&self, visitor: &mut F) {
        if let Value::Object(id) = self {
            visitor(Edge::Object(*id));
        }
    }
}

impl Traceable for Property {
    fn trace<F: FnMut(Edge)>(&self, visitor: &mut F) {
        self.value.trace(visitor);
    }
}

impl Traceable for HeapObject {
    fn trace<F: FnMut(Edge)>(&self, visitor: &mut F) {
        if let Some(proto) = self.proto {
            visitor(Edge::Object(proto));
        }
        for prop in self.properties.values() {
            prop.trace(visitor);
        }
        match &self.data {
            ObjectData::Function(FunctionData::Guest { scope, .. }) => visitor(Edge::Scope(*scope)),
            ObjectData::Thread(thread) => visitor(Edge::Thread(*thread)),
            ObjectData::Function(FunctionData::Native { .. })
            | ObjectData::Ordinary
            | ObjectData::Boolean(_)
            | ObjectData::Number(_)
            | ObjectData::String(_) => {}
        }
    }
}

impl Traceable for Scope {
    fn trace<F: FnMut(Edge)>(&self, visitor: &mut F) {
        if let Some(outer) = self.outer {
            visitor(Edge::Scope(outer));
        }
        self.this_value.trace(visitor);
        for binding in self.bindings.values() {
            binding.value.trace(visitor);
        }
    }
}

impl Traceable for Abrupt {
    fn trace<F: FnMut(Edge)>(&self, visitor: &mut F) {
        match self {
            Abrupt::Return(v) | Abrupt::Throw(v) => v.trace(visitor),
            Abrupt::Break(_) | Abrupt::Continue(_) => {}
        }
    }
}

impl Traceable for Frame {
    fn trace<F: FnMut(Edge)>(&self, visitor: &mut F) {
        match self {
            Frame::Push(value) => value.trace(visitor),
            Frame::ArrayLiteral { done, .. } => {
                for v in done.iter().flatten() {
                    v.trace(visitor);
                }
            }
            Frame::ObjectLiteral { object, .. } => visitor(Edge::Object(*object)),
            Frame::BlockExit { scope } | Frame::Try { scope, .. } => visitor(Edge::Scope(*scope)),
            Frame::ForInNext { object, .. } => visitor(Edge::Object(*object)),
            Frame::SwitchMatch { discriminant, .. } | Frame::SwitchTest { discriminant, .. } => {
                discriminant.trace(visitor)
            }
            Frame::Finally { saved } => {
                if let Some(abrupt) = saved {
                    abrupt.trace(visitor);
                }
            }
            Frame::CallBoundary {
                function,
                saved_scope,
                saved_last,
                construct,
                ..
            } => {
                visitor(Edge::Object(*function));
                visitor(Edge::Scope(*saved_scope));
                saved_last.trace(visitor);
                if let Some(target) = construct {
                    visitor(Edge::Object(*target));
                }
            }
            _ => {}
        }
    }
}

impl Traceable for Continuation {
    fn trace<F: FnMut(Edge)>(&self, visitor: &mut F) {
        visitor(Edge::Scope(self.scope));
        self.last_value.trace(visitor);
        for value in &self.values {
            value.trace(visitor);
        }
        for frame in &self.frames {
            frame.trace(visitor);
        }
    }
}

impl Traceable for Thread {
    fn trace<F: FnMut(Edge)>(&self, visitor: &mut F) {
        if self.is_alive() {
            self.continuation.trace(visitor);
        }
        if let Some(object) = self.object {
            visitor(Edge::Object(object));
        }
        match &self.completion {
            Some(Completion::Returned(v)) | Some(Completion::Threw { value: v, .. }) => {
                v.trace(visitor)
            }
            Some(Completion::Killed) | None => {}
        }
        match &self.resume {
            Some(Resume::Value(v)) | Some(Resume::Error(v)) => v.trace(visitor),
            None => {}
        }
    }
}

/// Result of a mark walk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reachable {
    pub objects: BTreeSet<ObjectId>,
    pub scopes: BTreeSet<ScopeId>,
    pub threads: BTreeSet<ThreadId>,
}

impl Reachable {
    pub fn contains_object(&self, id: ObjectId) -> bool {
        self.objects.contains(&id)
    }

    pub fn contains_scope(&self, id: ScopeId) -> bool {
        self.scopes.contains(&id)
    }
}

/// Mark everything reachable from `roots`.
///
/// Ids that no table knows about are skipped; they are reported by
/// [`dangling_edges`] instead.
pub fn mark(
    heap: &Heap,
    scopes: &ScopeArena,
    scheduler: &Scheduler,
    roots: impl IntoIterator<Item = Edge>,
) -> Reachable {
    let mut reachable = Reachable::default();
    let mut stack: Vec<Edge> = roots.into_iter().collect();

    while let Some(edge) = stack.pop() {
        let mut push = |e: Edge| stack.push(e);
        match edge {
            Edge::Object(id) => {
                if reachable.objects.contains(&id) {
                    continue;
                }
                if let Some(obj) = heap.get(id) {
                    reachable.objects.insert(id);
                    obj.trace(&mut push);
                }
            }
            Edge::Scope(id) => {
                if reachable.scopes.contains(&id) {
                    continue;
                }
                if let Some(scope) = scopes.get(id) {
                    reachable.scopes.insert(id);
                    scope.trace(&mut push);
                }
            }
            Edge::Thread(id) => {
                if reachable.threads.contains(&id) {
                    continue;
                }
                if let Some(thread) = scheduler.get(id) {
                    reachable.threads.insert(id);
                    thread.trace(&mut push);
                }
            }
        }
    }
    reachable
}

/// Every reference held by any table entry that points at nothing.
pub fn dangling_edges(heap: &Heap, scopes: &ScopeArena, scheduler: &Scheduler) -> Vec<(String, Edge)> {
    let mut dangling = Vec::new();
    let exists = |edge: Edge| match edge {
        Edge::Object(id) => heap.contains(id),
        Edge::Scope(id) => scopes.contains(id),
        Edge::Thread(id) => scheduler.contains(id),
    };

    for obj in heap.iter() {
        obj.trace(&mut |e| {
            if !exists(e) {
                dangling.push((format!("object {}", obj.id), e));
            }
        });
    }
    for scope in scopes.iter() {
        scope.trace(&mut |e| {
            if !exists(e) {
                dangling.push((format!("scope {}", scope.id), e));
            }
        });
    }
    for thread in scheduler.iter() {
        thread.trace(&mut |e| {
            if !exists(e) {
                dangling.push((format!("thread {}", thread.id), e));
            }
        });
    }
    dangling
}
