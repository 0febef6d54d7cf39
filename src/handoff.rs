//! Publishing processor lists to the audio thread.
//!
//! Three lists exist per client: the authoritative one in the client state,
//! the published one the audio thread should pick up, and the one the audio
//! thread confirmed it is using. Control threads publish under the client
//! mutex and, while the client is active, wait on the condition variable
//! until the audio thread confirms. The audio thread never waits: it only
//! `try_lock`s the mutex and keeps the previous list for another cycle when
//! that fails.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::client::{ClientFlags, ClientState};
use crate::registry::{ProcessorEntry, ProcessorList};

/// Hand-off bookkeeping kept inside the client state.
pub(crate) struct HandoffState {
    pub(crate) confirmed: u64,
    /// List the audio thread moved off, waiting to be dropped by a control
    /// thread so the audio thread never frees memory.
    pub(crate) retired: Option<Arc<ProcessorList>>,
}

impl HandoffState {
    pub(crate) fn new(confirmed: u64) -> Self {
        Self {
            confirmed,
            retired: None,
        }
    }
}

/// The hand-off was cut short by a shutdown request.
#[derive(Debug)]
pub(crate) struct Interrupted;

pub(crate) struct Handoff {
    published: ArcSwap<ProcessorList>,
    published_generation: AtomicU64,
    cond: Condvar,
}

impl Handoff {
    pub(crate) fn new(initial: Arc<ProcessorList>) -> Self {
        let generation = initial.generation();
        Self {
            published: ArcSwap::new(initial),
            published_generation: AtomicU64::new(generation),
            cond: Condvar::new(),
        }
    }

    /// Latest published list, without taking the client mutex.
    pub(crate) fn snapshot(&self) -> Arc<ProcessorList> {
        self.published.load_full()
    }

    /// Make `list` the authoritative and published list, then wait until the
    /// audio thread confirms it. Returns immediately when the client is not
    /// active.
    pub(crate) fn publish(
        &self,
        state: &mut MutexGuard<'_, ClientState>,
        list: Arc<ProcessorList>,
        flags: &ClientFlags,
        poll: Duration,
    ) -> Result<(), Interrupted> {
        let generation = list.generation();
        drop(state.handoff.retired.take());
        state.processors = list.clone();
        self.published.store(list);
        self.published_generation
            .store(generation, Ordering::Release);

        while state.handoff.confirmed < generation {
            if flags.shutdown_requested() {
                return Err(Interrupted);
            }
            if !flags.is_active() {
                state.handoff.confirmed = generation;
                break;
            }
            self.cond.wait_for(state, poll);
            drop(state.handoff.retired.take());
        }
        drop(state.handoff.retired.take());
        Ok(())
    }

    /// Publish without waiting for confirmation. Used on teardown, when the
    /// audio thread has stopped consuming lists.
    pub(crate) fn publish_detached(&self, state: &mut ClientState, list: Arc<ProcessorList>) {
        let generation = list.generation();
        state.processors = list.clone();
        self.published.store(list);
        self.published_generation
            .store(generation, Ordering::Release);
    }

    /// Audio-thread side: move `current` onto the published list if the
    /// client mutex can be taken without blocking. `departed` sees every
    /// entry of the old list that the new one no longer carries. The list
    /// moved off is parked in the client state for a control thread to drop.
    pub(crate) fn try_confirm(
        &self,
        state: &Mutex<ClientState>,
        current: &mut Arc<ProcessorList>,
        mut departed: impl FnMut(&ProcessorEntry),
    ) {
        if self.published_generation.load(Ordering::Acquire) == current.generation() {
            return;
        }
        let Some(mut state) = state.try_lock() else {
            return;
        };
        if state.handoff.retired.is_some() {
            return;
        }
        let next = self.published.load_full();
        for entry in current.entries() {
            if !next.entries().iter().any(|kept| Arc::ptr_eq(kept, entry)) {
                departed(entry);
            }
        }
        state.handoff.confirmed = next.generation();
        state.handoff.retired = Some(std::mem::replace(current, next));
        drop(state);
        self.cond.notify_all();
    }

    /// Touch the published slot from the calling thread. The first load on a
    /// thread registers arc-swap's per-thread debt node, which may allocate.
    pub(crate) fn prime(&self) {
        let _ = self.published.load();
    }

    /// Wake every control thread waiting in [`publish`](Self::publish).
    pub(crate) fn wake(&self) {
        self.cond.notify_all();
    }
}
