//! Checkpoints
//!
//! A [`Snapshot`] is a plain-data copy of an engine between two steps: the
//! object, scope and thread tables, the run queues, outstanding resolvers
//! and the engine clock. Native functions appear only by id, so the host
//! that rehydrates must register the same ids first.

use std::collections::BTreeSet;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::bridge::{Bridge, ResolverId};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::heap::{FunctionData, Heap, HeapObject, ObjectData, ObjectId};
use crate::interpreter::natives::NativeRegistry;
use crate::interpreter::{builtins, EngineStatus, Interpreter, Intrinsics};
use crate::platform::TimeProvider;
use crate::scheduler::{Scheduler, Thread, ThreadId, ThreadStatus};
use crate::scope::{Scope, ScopeArena, ScopeId};
use crate::trace;

/// Format version written into every snapshot
pub const SNAPSHOT_VERSION: u32 = 1;

/// A serializable engine state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub config: EngineConfig,
    /// Engine time when the snapshot was taken
    pub time: u64,
    pub global_scope: ScopeId,
    pub intrinsics: Intrinsics,
    pub objects: Vec<HeapObject>,
    pub next_object_id: u64,
    pub scopes: Vec<Scope>,
    pub next_scope_id: u64,
    pub threads: Vec<Thread>,
    /// Ready queue, front first
    pub ready: Vec<ThreadId>,
    /// Wake queue as `(until, sequence, thread)`
    pub sleepers: Vec<(u64, u64, ThreadId)>,
    pub next_thread_id: u64,
    pub resolvers: Vec<(ResolverId, ThreadId)>,
    pub next_resolver_id: u64,
    #[serde(default)]
    pub pinned: Vec<ObjectId>,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String, EngineError> {
        serde_json::to_string(self).map_err(|e| EngineError::rehydrate(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String, EngineError> {
        serde_json::to_string_pretty(self).map_err(|e| EngineError::rehydrate(e.to_string()))
    }

    /// Parse a snapshot. Function code nests as deeply as the expressions
    /// it was parsed from, so the JSON recursion limit is lifted and the
    /// stack grows on demand instead.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let mut json_de = serde_json::Deserializer::from_str(json);
        json_de.disable_recursion_limit();
        let snapshot = Snapshot::deserialize(serde_stacker::Deserializer::new(&mut json_de))
            .map_err(|e| EngineError::rehydrate(e.to_string()))?;
        json_de
            .end()
            .map_err(|e| EngineError::rehydrate(e.to_string()))?;
        Ok(snapshot)
    }
}

impl Interpreter {
    /// Copy the engine state. Only possible between steps.
    ///
    /// A thread that was in the middle of its turn is recorded as ready at
    /// the front of the queue, so it runs first after rehydration.
    pub fn snapshot(&self) -> Result<Snapshot, EngineError> {
        if self.stepping {
            return Err(EngineError::Reentrant("snapshot"));
        }

        let current = self.scheduler.current();
        let threads: Vec<Thread> = self
            .scheduler
            .iter()
            .cloned()
            .map(|mut thread| {
                if thread.status == ThreadStatus::Running {
                    thread.status = ThreadStatus::Ready;
                }
                thread
            })
            .collect();
        let mut ready: Vec<ThreadId> = current.into_iter().collect();
        ready.extend(self.scheduler.ready_ids().filter(|id| Some(*id) != current));

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            config: self.config.clone(),
            time: self.now(),
            global_scope: self.global_scope,
            intrinsics: self.intrinsics.clone(),
            objects: self.heap.iter().cloned().collect(),
            next_object_id: self.heap.next_id(),
            scopes: self.scopes.iter().cloned().collect(),
            next_scope_id: self.scopes.next_id(),
            threads,
            ready,
            sleepers: self.scheduler.sleepers().collect(),
            next_thread_id: self.scheduler.next_id(),
            resolvers: self.bridge.outstanding().collect(),
            next_resolver_id: self.bridge.next_id(),
            pinned: self.pinned.iter().copied().collect(),
        };
        tracing::info!(
            target: "spindle::checkpoint",
            objects = snapshot.objects.len(),
            scopes = snapshot.scopes.len(),
            threads = snapshot.threads.len(),
            time = snapshot.time,
            "checkpoint.snapshot"
        );
        Ok(snapshot)
    }

    /// Rebuild an engine from `snapshot`.
    ///
    /// `natives` supplies the host's native functions; built-in ids are
    /// added for any it leaves out. Every id the snapshot mentions is
    /// checked before the engine is returned. The engine starts PAUSED with
    /// its clock continuing from the snapshot's time.
    pub fn rehydrate(
        snapshot: Snapshot,
        natives: NativeRegistry,
        time: Rc<dyn TimeProvider>,
    ) -> Result<Interpreter, EngineError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(EngineError::rehydrate(format!(
                "unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }

        let mut natives = natives;
        let mut builtin = NativeRegistry::new();
        builtins::register_all(&mut builtin);
        natives.merge_missing(&builtin);

        check_ids(
            "object",
            snapshot.objects.iter().map(|o| o.id.0),
            snapshot.next_object_id,
        )?;
        check_ids(
            "scope",
            snapshot.scopes.iter().map(|s| s.id.0),
            snapshot.next_scope_id,
        )?;
        check_ids(
            "thread",
            snapshot.threads.iter().map(|t| t.id.0),
            snapshot.next_thread_id,
        )?;
        check_ids(
            "resolver",
            snapshot.resolvers.iter().map(|(r, _)| r.0),
            snapshot.next_resolver_id,
        )?;

        for object in &snapshot.objects {
            if let ObjectData::Function(FunctionData::Native { id }) = &object.data {
                if !natives.contains(id) {
                    return Err(EngineError::rehydrate(format!(
                        "object {} calls native '{}', which is not registered",
                        object.id, id
                    )));
                }
            }
        }

        let heap = Heap::from_parts(snapshot.objects, snapshot.next_object_id);
        let scopes = ScopeArena::from_parts(snapshot.scopes, snapshot.next_scope_id);
        let scheduler = Scheduler::from_parts(
            snapshot.threads,
            snapshot.ready,
            snapshot.sleepers,
            snapshot.next_thread_id,
        );

        if let Some((holder, edge)) = trace::dangling_edges(&heap, &scopes, &scheduler).first() {
            return Err(EngineError::rehydrate(format!(
                "{} refers to missing {:?}",
                holder, edge
            )));
        }
        if !scopes.contains(snapshot.global_scope) {
            return Err(EngineError::rehydrate(format!(
                "global scope {} is missing",
                snapshot.global_scope
            )));
        }
        if let Some(missing) = snapshot
            .intrinsics
            .ids()
            .into_iter()
            .chain(snapshot.pinned.iter().copied())
            .find(|id| !heap.contains(*id))
        {
            return Err(EngineError::rehydrate(format!(
                "root object {} is missing",
                missing
            )));
        }
        check_threads(&scheduler, &snapshot.resolvers)?;

        let bridge = Bridge::from_parts(snapshot.resolvers, snapshot.next_resolver_id);
        let clock_origin = time.monotonic_millis();
        let interp = Interpreter {
            config: snapshot.config,
            heap,
            scopes,
            scheduler,
            bridge,
            natives,
            intrinsics: snapshot.intrinsics,
            global_scope: snapshot.global_scope,
            time,
            clock_origin,
            clock_offset: snapshot.time,
            status: EngineStatus::Paused,
            stepping: false,
            interrupted: false,
            pinned: snapshot.pinned.into_iter().collect(),
        };
        tracing::info!(
            target: "spindle::checkpoint",
            objects = interp.heap.len(),
            scopes = interp.scopes.len(),
            threads = interp.scheduler.len(),
            time = snapshot.time,
            "checkpoint.rehydrate"
        );
        Ok(interp)
    }
}

/// Ids must be unique and never above the table's allocation counter, or
/// the next allocation would collide with a restored entry.
fn check_ids(table: &str, ids: impl Iterator<Item = u64>, next_id: u64) -> Result<(), EngineError> {
    let mut seen = BTreeSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(EngineError::rehydrate(format!("duplicate {} id {}", table, id)));
        }
        if id == 0 || id > next_id {
            return Err(EngineError::rehydrate(format!(
                "{} id {} is outside the allocated range 1..={}",
                table, id, next_id
            )));
        }
    }
    Ok(())
}

/// Queue entries and resolvers must agree with the thread table.
fn check_threads(
    scheduler: &Scheduler,
    resolvers: &[(ResolverId, ThreadId)],
) -> Result<(), EngineError> {
    let status_of = |id: ThreadId| {
        scheduler
            .get(id)
            .map(|t| t.status)
            .ok_or_else(|| EngineError::rehydrate(format!("queue refers to missing {}", id)))
    };

    for thread in scheduler.iter() {
        if thread.status == ThreadStatus::Running {
            return Err(EngineError::rehydrate(format!(
                "{} is recorded as running",
                thread.id
            )));
        }
    }
    for id in scheduler.ready_ids() {
        if status_of(id)? != ThreadStatus::Ready {
            return Err(EngineError::rehydrate(format!(
                "{} is queued as ready but is not",
                id
            )));
        }
    }
    for (until, _, id) in scheduler.sleepers() {
        if status_of(id)? != (ThreadStatus::Sleeping { until }) {
            return Err(EngineError::rehydrate(format!(
                "{} is queued to wake at {} but is not sleeping until then",
                id, until
            )));
        }
    }
    // A resolver can outlive a thread that took it without blocking, so
    // only the thread's existence is required.
    for (_, id) in resolvers {
        status_of(*id)?;
    }
    Ok(())
}
