use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use crate::error::{PasteError, Result};

/// Outcome of depositing a fetched strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deposit {
    /// First arrival for this id; the caller must enqueue it.
    Stored,
    /// The slot was already filled; the bytes were dropped.
    Duplicate,
}

pub struct StripStore {
    slots: Vec<OnceLock<Vec<u8>>>,
    slot_capacity: usize,
    received: AtomicUsize,
}

impl StripStore {
    pub fn new(strips: usize, slot_capacity: usize) -> Self {
        Self {
            slots: (0..strips).map(|_| OnceLock::new()).collect(),
            slot_capacity,
            received: AtomicUsize::new(0),
        }
    }

    pub fn strips(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_capacity(&self) -> usize {
        self.slot_capacity
    }

    /// Stores `bytes` for `id` unless another writer got there first.
    pub fn deposit(&self, id: usize, bytes: Vec<u8>) -> Result<Deposit> {
        if bytes.len() > self.slot_capacity {
            return Err(PasteError::CapacityExceeded {
                size: bytes.len(),
                capacity: self.slot_capacity,
            });
        }

        let slot = self.slot(id)?;
        match slot.set(bytes) {
            Ok(()) => {
                self.received.fetch_add(1, Ordering::SeqCst);
                Ok(Deposit::Stored)
            }
            Err(_) => Ok(Deposit::Duplicate),
        }
    }

    pub fn is_received(&self, id: usize) -> bool {
        self.slots.get(id).is_some_and(|slot| slot.get().is_some())
    }

    pub fn get(&self, id: usize) -> Option<&[u8]> {
        self.slots.get(id)?.get().map(Vec::as_slice)
    }

    /// Number of slots filled so far.
    pub fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }

    /// Ids that never received any bytes.
    pub fn missing(&self) -> Vec<usize> {
        (0..self.slots.len())
            .filter(|&id| !self.is_received(id))
            .collect()
    }

    fn slot(&self, id: usize) -> Result<&OnceLock<Vec<u8>>> {
        self.slots.get(id).ok_or(PasteError::StripOutOfRange {
            id,
            strips: self.slots.len(),
        })
    }
}
