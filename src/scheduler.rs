//! Threads and the cooperative scheduler
//!
//! The scheduler owns every thread and the two queues that decide who runs
//! next: a FIFO ready queue and a wake queue ordered by `(time, sequence)`,
//! so sleepers due at the same instant wake in the order they went to
//! sleep. It knows nothing about evaluation; the interpreter drives it.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bridge::ResolverId;
use crate::heap::ObjectId;
use crate::interpreter::state::Continuation;
use crate::value::Value;

/// Stable identity of a thread; ids follow creation order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread#{}", self.0)
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadStatus {
    Ready,
    Running,
    /// Waiting for the engine clock to reach `until`
    Sleeping { until: u64 },
    /// Waiting for a resolver or an explicit `wake`
    Blocked,
    /// Finished, threw, or was killed. Terminal.
    Zombie,
}

impl ThreadStatus {
    pub fn is_alive(self) -> bool {
        self != ThreadStatus::Zombie
    }
}

/// How a thread ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Completion {
    Returned(Value),
    Threw { value: Value, stack: String },
    Killed,
}

/// Value or error injected into a blocked thread when it resumes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Resume {
    Value(Value),
    Error(Value),
}

/// A guest thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub status: ThreadStatus,
    pub continuation: Continuation,
    pub completion: Option<Completion>,
    /// Has taken at least one step (a started timer can no longer be
    /// cleared)
    pub started: bool,
    /// The guest-visible Thread object, once one has been handed out
    pub object: Option<ObjectId>,
    /// Resolver settled with this thread's completion
    pub on_complete: Option<ResolverId>,
    /// Resolver this thread is blocked on
    pub blocked_on: Option<ResolverId>,
    /// Settlement waiting to be delivered on the next step
    pub resume: Option<Resume>,
}

impl Thread {
    pub fn is_alive(&self) -> bool {
        self.status.is_alive()
    }

    pub fn wake_time(&self) -> Option<u64> {
        match self.status {
            ThreadStatus::Sleeping { until } => Some(until),
            _ => None,
        }
    }
}

/// Thread table plus run queues
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scheduler {
    threads: BTreeMap<ThreadId, Thread>,
    ready: VecDeque<ThreadId>,
    sleepers: BTreeMap<(u64, u64), ThreadId>,
    next_id: u64,
    next_seq: u64,
    current: Option<ThreadId>,
    /// Steps the current thread has taken in this turn
    slice_used: u32,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a thread. With `wake_at` it starts asleep, otherwise it joins the
    /// back of the ready queue.
    pub fn spawn(&mut self, continuation: Continuation, wake_at: Option<u64>) -> ThreadId {
        self.next_id += 1;
        let id = ThreadId(self.next_id);
        self.threads.insert(
            id,
            Thread {
                id,
                status: ThreadStatus::Ready,
                continuation,
                completion: None,
                started: false,
                object: None,
                on_complete: None,
                blocked_on: None,
                resume: None,
            },
        );
        match wake_at {
            Some(until) => self.sleep(id, until),
            None => self.make_ready(id),
        }
        id
    }

    pub fn get(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.get(&id)
    }

    pub fn get_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        self.threads.get_mut(&id)
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.threads.contains_key(&id)
    }

    /// All threads in creation order
    pub fn iter(&self) -> impl Iterator<Item = &Thread> {
        self.threads.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Thread> {
        self.threads.values_mut()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn current(&self) -> Option<ThreadId> {
        self.current
    }

    pub fn ready_ids(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.ready.iter().copied()
    }

    /// Any thread still able to make progress (ready, running or sleeping)?
    pub fn has_pending_work(&self) -> bool {
        !self.ready.is_empty() || !self.sleepers.is_empty() || self.current.is_some()
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Append to the ready queue.
    pub fn make_ready(&mut self, id: ThreadId) {
        if let Some(thread) = self.threads.get_mut(&id) {
            if !thread.is_alive() {
                return;
            }
            if let Some(until) = thread.wake_time() {
                self.sleepers.retain(|(t, _), sid| !(*t == until && *sid == id));
            }
            thread.status = ThreadStatus::Ready;
            if !self.ready.contains(&id) {
                self.ready.push_back(id);
            }
            if self.current == Some(id) {
                self.current = None;
            }
        }
    }

    pub fn sleep(&mut self, id: ThreadId, until: u64) {
        if let Some(thread) = self.threads.get_mut(&id) {
            thread.status = ThreadStatus::Sleeping { until };
            self.next_seq += 1;
            self.sleepers.insert((until, self.next_seq), id);
            self.ready.retain(|r| *r != id);
            if self.current == Some(id) {
                self.current = None;
            }
        }
    }

    pub fn block(&mut self, id: ThreadId, on: Option<ResolverId>) {
        if let Some(thread) = self.threads.get_mut(&id) {
            thread.status = ThreadStatus::Blocked;
            thread.blocked_on = on;
            if self.current == Some(id) {
                self.current = None;
            }
        }
    }

    /// Move a thread to ZOMBIE and out of every queue.
    pub fn finish(&mut self, id: ThreadId, completion: Completion) {
        self.ready.retain(|r| *r != id);
        self.sleepers.retain(|_, sid| *sid != id);
        if self.current == Some(id) {
            self.current = None;
            self.slice_used = 0;
        }
        if let Some(thread) = self.threads.get_mut(&id) {
            thread.status = ThreadStatus::Zombie;
            thread.completion = Some(completion);
            thread.blocked_on = None;
            thread.resume = None;
            thread.continuation.frames.clear();
            thread.continuation.values.clear();
        }
    }

    /// Move every sleeper due at `now` to the ready queue, earliest first.
    pub fn wake_due(&mut self, now: u64) -> usize {
        let mut woken = 0;
        while let Some(entry) = self.sleepers.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let id = entry.remove();
            if let Some(thread) = self.threads.get_mut(&id) {
                if matches!(thread.status, ThreadStatus::Sleeping { .. }) {
                    thread.status = ThreadStatus::Ready;
                    self.ready.push_back(id);
                    woken += 1;
                }
            }
        }
        woken
    }

    /// Earliest pending wake time
    pub fn next_wake(&self) -> Option<u64> {
        self.sleepers.keys().next().map(|(t, _)| *t)
    }

    /// Take the next ready thread and mark it running.
    pub fn select(&mut self) -> Option<ThreadId> {
        while let Some(id) = self.ready.pop_front() {
            if let Some(thread) = self.threads.get_mut(&id) {
                if thread.status == ThreadStatus::Ready {
                    thread.status = ThreadStatus::Running;
                    self.current = Some(id);
                    self.slice_used = 0;
                    return Some(id);
                }
            }
        }
        None
    }

    /// Count one step against the current thread's slice. True when the
    /// slice is used up.
    pub fn charge_step(&mut self, timeslice: Option<u32>) -> bool {
        self.slice_used = self.slice_used.saturating_add(1);
        timeslice.is_some_and(|limit| self.slice_used >= limit)
    }

    /// Drop zombies nobody refers to any more.
    pub(crate) fn prune(&mut self, keep: &std::collections::BTreeSet<ThreadId>) -> usize {
        let before = self.threads.len();
        self.threads
            .retain(|id, t| t.is_alive() || keep.contains(id));
        before - self.threads.len()
    }

    pub(crate) fn from_parts(
        threads: Vec<Thread>,
        ready: Vec<ThreadId>,
        sleepers: Vec<(u64, u64, ThreadId)>,
        next_id: u64,
    ) -> Self {
        let next_seq = sleepers.iter().map(|(_, seq, _)| *seq).max().unwrap_or(0);
        Self {
            threads: threads.into_iter().map(|t| (t.id, t)).collect(),
            ready: ready.into_iter().collect(),
            sleepers: sleepers
                .into_iter()
                .map(|(until, seq, id)| ((until, seq), id))
                .collect(),
            next_id,
            next_seq,
            current: None,
            slice_used: 0,
        }
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Wake queue entries in wake order
    pub(crate) fn sleepers(&self) -> impl Iterator<Item = (u64, u64, ThreadId)> + '_ {
        self.sleepers.iter().map(|((t, s), id)| (*t, *s, *id))
    }
}
