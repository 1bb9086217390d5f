use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::assemble::AssemblyBuffer;
use crate::error::Result;
use crate::progress::ProgressReporter;
use crate::queue::HandoffQueue;
use crate::store::StripStore;

/// Created once by the orchestrator and handed to workers behind an `Arc`.
pub struct SharedState {
    pub store: StripStore,
    pub queue: HandoffQueue,
    pub progress: ProgressReporter,
    next_id: Mutex<usize>,
    assembly: Mutex<AssemblyBuffer>,
}

impl SharedState {
    pub fn new(
        strips: usize,
        strip_capacity: usize,
        queue_capacity: usize,
        consumers: usize,
        progress: ProgressReporter,
    ) -> Result<Self> {
        Ok(Self {
            store: StripStore::new(strips, strip_capacity),
            queue: HandoffQueue::new(queue_capacity, consumers)?,
            progress,
            next_id: Mutex::new(0),
            assembly: Mutex::new(AssemblyBuffer::default()),
        })
    }

    /// Hands out strip ids in increasing order, each exactly once.
    pub fn claim_next(&self) -> Option<usize> {
        let mut next = lock(&self.next_id);
        if *next >= self.store.strips() {
            return None;
        }
        let id = *next;
        *next += 1;
        Some(id)
    }

    /// Ids handed out so far.
    pub fn claimed(&self) -> usize {
        *lock(&self.next_id)
    }

    pub fn assembly(&self) -> MutexGuard<'_, AssemblyBuffer> {
        lock(&self.assembly)
    }

    /// Moves the accumulated strips out, leaving an empty buffer behind.
    pub fn take_assembly(&self) -> AssemblyBuffer {
        std::mem::take(&mut *lock(&self.assembly))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
