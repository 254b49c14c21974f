//! Local event buffer
//!
//! A bounded FIFO shared by the application's producer threads and the
//! single draining worker. A full queue rejects new events (the caller
//! drops them with a warning) and never overwrites buffered ones.
//! Re-enqueueing a failed batch goes back to the front so delivery order
//! is preserved; that path may briefly exceed capacity rather than lose
//! events that were already accepted.

use parking_lot::Mutex;
use std::collections::VecDeque;

use meterd_core::NewEvent;

use crate::errors::{ClientError, ClientResult};

/// Thread-safe bounded FIFO of pending events.
pub struct EventQueue {
    inner: Mutex<VecDeque<NewEvent>>,
    capacity: usize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Append an event. Fails with [`ClientError::QueueFull`] at capacity.
    pub fn push(&self, event: NewEvent) -> ClientResult<()> {
        let mut queue = self.inner.lock();
        if queue.len() >= self.capacity {
            return Err(ClientError::QueueFull {
                capacity: self.capacity,
            });
        }
        queue.push_back(event);
        Ok(())
    }

    /// Remove and return up to `size` events from the front.
    pub fn drain_batch(&self, size: usize) -> Vec<NewEvent> {
        let mut queue = self.inner.lock();
        let take = size.min(queue.len());
        queue.drain(..take).collect()
    }

    /// Put a failed batch back at the front, preserving its order.
    pub fn requeue_front(&self, events: Vec<NewEvent>) {
        let mut queue = self.inner.lock();
        for event in events.into_iter().rev() {
            queue.push_front(event);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn event(feature: &str) -> NewEvent {
        NewEvent {
            tenant_id: "t1".to_string(),
            resource: "r".to_string(),
            feature: feature.to_string(),
            quantity: 1,
            timestamp: None,
            metadata: None,
        }
    }

    #[test]
    fn push_and_drain_preserve_fifo_order() {
        let queue = EventQueue::new(10);
        for name in ["a", "b", "c"] {
            queue.push(event(name)).unwrap();
        }
        let batch = queue.drain_batch(2);
        assert_eq!(batch[0].feature, "a");
        assert_eq!(batch[1].feature, "b");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn full_queue_rejects_without_overwriting() {
        let queue = EventQueue::new(2);
        queue.push(event("a")).unwrap();
        queue.push(event("b")).unwrap();
        assert!(matches!(
            queue.push(event("c")),
            Err(ClientError::QueueFull { capacity: 2 })
        ));
        // The buffered events are intact.
        let batch = queue.drain_batch(10);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].feature, "a");
        assert_eq!(batch[1].feature, "b");
    }

    #[test]
    fn requeue_front_restores_delivery_order() {
        let queue = EventQueue::new(10);
        queue.push(event("c")).unwrap();
        let failed = vec![event("a"), event("b")];
        queue.requeue_front(failed);
        let batch = queue.drain_batch(10);
        let order: Vec<_> = batch.iter().map(|e| e.feature.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn concurrent_producers_never_exceed_capacity() {
        let queue = Arc::new(EventQueue::new(100));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(std::thread::spawn(move || {
                let mut accepted = 0;
                for i in 0..50 {
                    if queue.push(event(&format!("f{i}"))).is_ok() {
                        accepted += 1;
                    }
                }
                accepted
            }));
        }
        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(accepted, 100);
        assert_eq!(queue.len(), 100);
    }
}
