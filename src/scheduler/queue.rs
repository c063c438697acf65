//! Bounded FIFO queue shared between submitters and workers.
//!
//! Admission is non-blocking: [`BoundedQueue::offer`] either appends or hands
//! the item straight back, which is the only backpressure mechanism in the
//! system. Workers wait for items with [`BoundedQueue::poll`], bounded by a
//! short timeout so they can re-check the manager's running flag.
//!
//! Once [`BoundedQueue::close`] is called, every further offer is rejected,
//! but items already queued can still be polled or drained.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// Why an offer was rejected. The rejected item is handed back.
pub enum OfferError<T> {
    /// The queue is at capacity.
    Full(T),
    /// The queue no longer accepts items.
    Closed(T),
}

impl<T> OfferError<T> {
    /// Returns the rejected item.
    pub fn into_inner(self) -> T {
        match self {
            OfferError::Full(item) | OfferError::Closed(item) => item,
        }
    }

    /// Returns true if the rejection was due to capacity.
    pub fn is_full(&self) -> bool {
        matches!(self, OfferError::Full(_))
    }
}

impl<T> fmt::Debug for OfferError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfferError::Full(_) => f.write_str("Full(..)"),
            OfferError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> fmt::Display for OfferError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfferError::Full(_) => f.write_str("queue is full"),
            OfferError::Closed(_) => f.write_str("queue is closed"),
        }
    }
}

impl<T> std::error::Error for OfferError<T> {}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Thread-safe FIFO with a fixed capacity.
pub struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Notify,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            available: Notify::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().expect("queue lock not poisoned")
    }

    /// Appends `item` without blocking.
    ///
    /// Returns the queue depth after the append.
    ///
    /// # Errors
    ///
    /// Returns `OfferError::Full` at capacity and `OfferError::Closed` after
    /// [`close`](Self::close); both carry the item back.
    pub fn offer(&self, item: T) -> Result<usize, OfferError<T>> {
        let depth = {
            let mut state = self.lock();
            if state.closed {
                return Err(OfferError::Closed(item));
            }
            if state.items.len() >= self.capacity {
                return Err(OfferError::Full(item));
            }
            state.items.push_back(item);
            state.items.len()
        };

        self.available.notify_one();
        Ok(depth)
    }

    /// Removes the oldest item, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` if the timeout elapses with the queue still empty.
    pub async fn poll(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;

        loop {
            let next = self.lock().items.pop_front();
            if next.is_some() {
                return next;
            }

            // notify_one stores a permit when nobody is waiting, so an offer
            // racing with this check still wakes us.
            if tokio::time::timeout_at(deadline, self.available.notified())
                .await
                .is_err()
            {
                return self.lock().items.pop_front();
            }
        }
    }

    /// Removes and returns every queued item, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.lock().items.drain(..).collect()
    }

    /// Rejects all further offers and wakes idle pollers.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_waiters();
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Maximum number of queued items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_offer_until_full() {
        let queue = BoundedQueue::new(2);

        assert_eq!(queue.offer("a").expect("room"), 1);
        assert_eq!(queue.offer("b").expect("room"), 2);

        let rejected = queue.offer("c").unwrap_err();
        assert!(rejected.is_full());
        assert_eq!(rejected.into_inner(), "c");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_closed_queue_rejects_offers() {
        let queue = BoundedQueue::new(4);
        queue.offer(1).expect("room");
        queue.close();

        let rejected = queue.offer(2).unwrap_err();
        assert!(!rejected.is_full());
        assert!(rejected.to_string().contains("closed"));
        assert!(queue.is_closed());
        // Items admitted before the close stay available.
        assert_eq!(queue.drain(), vec![1]);
    }

    #[tokio::test]
    async fn test_poll_is_fifo() {
        let queue = BoundedQueue::new(8);
        for i in 0..5 {
            queue.offer(i).expect("room");
        }

        for expected in 0..5 {
            assert_eq!(queue.poll(Duration::from_millis(10)).await, Some(expected));
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_poll_times_out_on_empty_queue() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(1);
        let started = std::time::Instant::now();

        assert_eq!(queue.poll(Duration::from_millis(50)).await, None);
        assert!(started.elapsed() >= Duration::from_millis(45));
    }

    #[tokio::test]
    async fn test_poll_wakes_on_offer() {
        let queue = Arc::new(BoundedQueue::new(1));

        let poller = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.poll(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.offer("late").expect("room");

        let polled = poller.await.expect("poller task");
        assert_eq!(polled, Some("late"));
    }

    #[tokio::test]
    async fn test_concurrent_pollers_receive_each_item_once() {
        let queue = Arc::new(BoundedQueue::new(100));
        let mut pollers = Vec::new();

        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            pollers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(item) = queue.poll(Duration::from_millis(100)).await {
                    seen.push(item);
                }
                seen
            }));
        }

        for i in 0..100 {
            queue.offer(i).expect("room");
        }

        let mut all = Vec::new();
        for poller in pollers {
            all.extend(poller.await.expect("poller task"));
        }
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_drain_empties_queue() {
        let queue = BoundedQueue::new(3);
        queue.offer('x').expect("room");
        queue.offer('y').expect("room");

        assert_eq!(queue.drain(), vec!['x', 'y']);
        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), 3);
    }
}
