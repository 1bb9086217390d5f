use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use crossbeam_channel::{Receiver, Sender};
use log::debug;

use crate::error::{PasteError, Result};

/// One queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    Strip(usize),
    /// Sentinel: the consumer that pops it has no more work.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Producers are still pushing strip ids.
    Open,
    /// Producers are done; only sentinels are pushed from here on.
    Draining,
    /// Every consumer has popped its sentinel.
    Closed,
}

/// Fixed-capacity hand-off of strip ids from fetchers to assemblers.
///
/// A full channel blocks senders and an empty one blocks receivers, which
/// covers the empty/filled slot counting of a bounded buffer. Once every
/// fetcher has returned, [`HandoffQueue::close`] pushes one
/// [`Handoff::Shutdown`] per consumer; each consumer exits on the first
/// sentinel it pops.
pub struct HandoffQueue {
    tx: Sender<Handoff>,
    rx: Receiver<Handoff>,
    capacity: usize,
    consumers: usize,
    state: RwLock<QueueState>,
    retired: AtomicUsize,
    delivered: AtomicUsize,
}

impl HandoffQueue {
    /// `capacity` is B, `consumers` is the number of sentinels `close` pushes.
    pub fn new(capacity: usize, consumers: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(PasteError::ResourceAllocation(
                "hand-off queue with zero capacity".to_string(),
            ));
        }

        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Ok(Self {
            tx,
            rx,
            capacity,
            consumers,
            state: RwLock::new(QueueState::Open),
            retired: AtomicUsize::new(0),
            delivered: AtomicUsize::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries currently waiting to be popped.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn state(&self) -> QueueState {
        *self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Strip ids popped so far, sentinels excluded.
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }

    /// Blocks until a slot is free, then appends `id`.
    pub fn push(&self, id: usize) -> Result<()> {
        // Held until the send lands so `close` cannot slip its sentinels in first.
        let state = self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *state != QueueState::Open {
            return Err(PasteError::HandoffClosed);
        }
        self.tx
            .send(Handoff::Strip(id))
            .map_err(|_| PasteError::HandoffClosed)
    }

    /// Blocks until an entry is available and returns it.
    pub fn pop(&self) -> Handoff {
        // `self` owns a sender, so the channel can never disconnect under us.
        let item = self.rx.recv().unwrap_or(Handoff::Shutdown);
        match item {
            Handoff::Strip(_) => {
                self.delivered.fetch_add(1, Ordering::SeqCst);
            }
            Handoff::Shutdown => {
                let retired = self.retired.fetch_add(1, Ordering::SeqCst) + 1;
                if retired >= self.consumers {
                    self.set_state(QueueState::Closed);
                }
                debug!("consumer retired ({retired}/{})", self.consumers);
            }
        }
        item
    }

    /// Stops accepting strip ids and pushes one sentinel per consumer.
    /// Waits for pushes already in flight, then blocks while the queue is
    /// full like any other push.
    pub fn close(&self) {
        {
            let mut state = self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            if *state != QueueState::Open {
                return;
            }
            *state = QueueState::Draining;
        }

        for _ in 0..self.consumers {
            // The receiver lives in `self`, so sending cannot fail.
            let _ = self.tx.send(Handoff::Shutdown);
        }
        if self.consumers == 0 {
            self.set_state(QueueState::Closed);
        }
    }

    fn set_state(&self, next: QueueState) {
        let mut state = self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_order_is_preserved() {
        let queue = HandoffQueue::new(4, 1).unwrap();
        for id in [3, 1, 2] {
            queue.push(id).unwrap();
        }
        assert_eq!(queue.pop(), Handoff::Strip(3));
        assert_eq!(queue.pop(), Handoff::Strip(1));
        assert_eq!(queue.pop(), Handoff::Strip(2));
    }

    #[test]
    fn zero_capacity_is_refused() {
        assert!(matches!(
            HandoffQueue::new(0, 1),
            Err(PasteError::ResourceAllocation(_))
        ));
    }

    #[test]
    fn push_blocks_while_full() {
        let queue = Arc::new(HandoffQueue::new(2, 1).unwrap());
        queue.push(0).unwrap();
        queue.push(1).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(2))
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop(), Handoff::Strip(0));
        producer.join().unwrap().unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn occupancy_stays_within_capacity() {
        let queue = Arc::new(HandoffQueue::new(3, 2).unwrap());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..50 {
                        queue.push(p * 50 + i).unwrap();
                        assert!(queue.len() <= queue.capacity());
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut seen = 0;
                    while let Handoff::Strip(_) = queue.pop() {
                        assert!(queue.len() <= queue.capacity());
                        seen += 1;
                    }
                    seen
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }
        queue.close();

        let total: usize = consumers.into_iter().map(|c| c.join().unwrap()).sum();
        assert_eq!(total, 200);
        assert_eq!(queue.delivered(), 200);
        assert_eq!(queue.state(), QueueState::Closed);
    }

    #[test]
    fn every_consumer_gets_exactly_one_sentinel() {
        for consumers in 1..=5 {
            let queue = Arc::new(HandoffQueue::new(1, consumers).unwrap());
            let handles: Vec<_> = (0..consumers)
                .map(|_| {
                    let queue = Arc::clone(&queue);
                    thread::spawn(move || while queue.pop() != Handoff::Shutdown {})
                })
                .collect();

            queue.close();
            for handle in handles {
                handle.join().unwrap();
            }
            assert!(queue.is_empty());
            assert_eq!(queue.state(), QueueState::Closed);
        }
    }

    #[test]
    fn close_lands_behind_a_blocked_push() {
        let queue = Arc::new(HandoffQueue::new(1, 1).unwrap());
        queue.push(0).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(1))
        };
        thread::sleep(Duration::from_millis(50));
        let closer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.close())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!closer.is_finished());

        assert_eq!(queue.pop(), Handoff::Strip(0));
        producer.join().unwrap().unwrap();
        assert_eq!(queue.pop(), Handoff::Strip(1));
        assert_eq!(queue.pop(), Handoff::Shutdown);
        closer.join().unwrap();
        assert_eq!(queue.delivered(), 2);
        assert_eq!(queue.state(), QueueState::Closed);
    }

    #[test]
    fn push_after_close_is_refused() {
        let queue = HandoffQueue::new(2, 1).unwrap();
        queue.close();
        assert_eq!(queue.state(), QueueState::Draining);
        assert!(matches!(queue.push(1), Err(PasteError::HandoffClosed)));
        assert_eq!(queue.pop(), Handoff::Shutdown);
        assert_eq!(queue.state(), QueueState::Closed);
    }
}
