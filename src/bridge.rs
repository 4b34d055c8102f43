//! Blocking bridge between native functions and guest threads
//!
//! A native that cannot answer immediately blocks its calling thread and
//! hands out a one-shot [`ResolverId`]. The host later settles the resolver
//! with a value or an error. Each resolver is bound to the thread that was
//! blocked, so the settlement (and any error it causes) is attributed to
//! that thread and never to whichever thread happens to be running.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::scheduler::ThreadId;
use crate::value::Value;

/// Handle for settling one blocked call
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolverId(pub u64);

impl fmt::Display for ResolverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resolver#{}", self.0)
    }
}

impl fmt::Debug for ResolverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResolverId({})", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Settlement {
    Resolve(Value),
    Reject(Value),
}

/// A settlement accepted during a step, applied once the step is over.
/// `resolver` is `None` for a plain `wake`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deferred {
    pub resolver: Option<ResolverId>,
    pub thread: ThreadId,
    pub settlement: Settlement,
}

/// Outstanding resolvers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bridge {
    outstanding: BTreeMap<ResolverId, ThreadId>,
    next_id: u64,
    #[serde(default)]
    deferred: Vec<Deferred>,
}

impl Bridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a resolver bound to `thread`.
    pub fn issue(&mut self, thread: ThreadId) -> ResolverId {
        self.next_id += 1;
        let id = ResolverId(self.next_id);
        self.outstanding.insert(id, thread);
        id
    }

    /// Consume a resolver, returning the thread it was bound to.
    ///
    /// Settling twice is a host error: [`EngineError::ResolverSettled`] for
    /// an id that was issued and used, [`EngineError::UnknownResolver`] for
    /// one that never existed.
    pub fn take(&mut self, id: ResolverId) -> Result<ThreadId, EngineError> {
        match self.outstanding.remove(&id) {
            Some(thread) => Ok(thread),
            None if id.0 >= 1 && id.0 <= self.next_id => Err(EngineError::ResolverSettled(id)),
            None => Err(EngineError::UnknownResolver(id)),
        }
    }

    /// Forget a resolver without settling it (its thread was killed).
    pub fn cancel(&mut self, id: ResolverId) {
        self.outstanding.remove(&id);
    }

    /// Drop resolvers bound to threads that no longer exist. Returns how
    /// many were dropped.
    pub fn retain_threads(&mut self, mut exists: impl FnMut(ThreadId) -> bool) -> usize {
        let before = self.outstanding.len();
        self.outstanding.retain(|_, thread| exists(*thread));
        before - self.outstanding.len()
    }

    pub fn is_outstanding(&self, id: ResolverId) -> bool {
        self.outstanding.contains_key(&id)
    }

    pub fn thread_of(&self, id: ResolverId) -> Option<ThreadId> {
        self.outstanding.get(&id).copied()
    }

    pub fn outstanding(&self) -> impl Iterator<Item = (ResolverId, ThreadId)> + '_ {
        self.outstanding.iter().map(|(r, t)| (*r, *t))
    }

    pub fn defer(&mut self, deferred: Deferred) {
        self.deferred.push(deferred);
    }

    pub fn drain_deferred(&mut self) -> Vec<Deferred> {
        std::mem::take(&mut self.deferred)
    }

    pub fn has_deferred(&self) -> bool {
        !self.deferred.is_empty()
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id
    }

    pub(crate) fn from_parts(outstanding: Vec<(ResolverId, ThreadId)>, next_id: u64) -> Self {
        Self {
            outstanding: outstanding.into_iter().collect(),
            next_id,
            deferred: Vec::new(),
        }
    }
}
