use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// What a bounded queue does with a push that would exceed its depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the head to make room for the new item.
    DropOldest,
    /// Reject the new item.
    DropNewest,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Blocking FIFO handing items from one pipeline stage to the next.
///
/// Each item is delivered exactly once. `push` never blocks; a bounded queue
/// applies its [`OverflowPolicy`] instead. `pop` suspends on a condition
/// variable until an item arrives or the queue is closed.
pub struct SyncQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
    capacity: Option<(usize, OverflowPolicy)>,
    // Mirrors `items.len()`, read without taking the lock.
    count: AtomicUsize,
    dropped: AtomicU64,
}

impl<T> SyncQueue<T> {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Bounded queue; a `capacity` of zero is treated as one.
    pub fn bounded(capacity: usize, policy: OverflowPolicy) -> Self {
        Self::build(Some((capacity.max(1), policy)))
    }

    fn build(capacity: Option<(usize, OverflowPolicy)>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
            count: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Appends to the tail and wakes one waiting consumer.
    ///
    /// Returns the item that did not make it into the queue: the evicted head
    /// under `DropOldest`, or `item` itself under `DropNewest` or after `close`.
    pub fn push(&self, item: T) -> Option<T> {
        let mut state = self.state.lock();
        if state.closed {
            return Some(item);
        }
        let mut displaced = None;
        if let Some((capacity, policy)) = self.capacity {
            if state.items.len() >= capacity {
                match policy {
                    OverflowPolicy::DropOldest => displaced = state.items.pop_front(),
                    OverflowPolicy::DropNewest => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        return Some(item);
                    }
                }
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        state.items.push_back(item);
        self.count.store(state.items.len(), Ordering::Relaxed);
        drop(state);
        self.available.notify_one();
        displaced
    }

    /// Removes the head, waiting as long as necessary.
    ///
    /// Returns `None` only once the queue has been closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.count.store(state.items.len(), Ordering::Relaxed);
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.count.store(state.items.len(), Ordering::Relaxed);
                return Some(item);
            }
            if state.closed {
                return None;
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                let item = state.items.pop_front();
                self.count.store(state.items.len(), Ordering::Relaxed);
                return item;
            }
        }
    }

    /// Advisory item count; may be stale by the time the caller looks at it.
    pub fn size(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Discards everything currently queued.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.items.clear();
        self.count.store(0, Ordering::Relaxed);
    }

    /// Rejects further pushes and wakes every waiter. Queued items can still be popped.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Items lost to the overflow policy since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T> Default for SyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn pop_waits_for_push_from_another_thread() {
        let queue = Arc::new(SyncQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                queue.push(42u32);
            })
        };
        assert_eq!(queue.pop(), Some(42));
        producer.join().unwrap();
    }

    #[test]
    fn pop_timeout_gives_up_on_empty_queue() {
        let queue: SyncQueue<u8> = SyncQueue::new();
        let started = Instant::now();
        assert_eq!(queue.pop_timeout(Duration::from_millis(30)), None);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn close_unblocks_waiting_consumer_after_drain() {
        let queue = Arc::new(SyncQueue::new());
        queue.push(1u8);
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some(v) = queue.pop() {
                    seen.push(v);
                }
                seen
            })
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(consumer.join().unwrap(), vec![1]);
        assert_eq!(queue.push(2), Some(2));
    }

    #[test]
    fn clear_discards_everything() {
        let queue = SyncQueue::new();
        for i in 0..5 {
            queue.push(i);
        }
        assert_eq!(queue.size(), 5);
        queue.clear();
        assert_eq!(queue.size(), 0);
        assert_eq!(queue.pop_timeout(Duration::from_millis(1)), None);
    }

    #[test]
    fn bounded_drop_oldest_keeps_newest_items() {
        let queue = SyncQueue::bounded(2, OverflowPolicy::DropOldest);
        assert_eq!(queue.push(1), None);
        assert_eq!(queue.push(2), None);
        assert_eq!(queue.push(3), Some(1));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
    }

    #[test]
    fn bounded_drop_newest_rejects_push() {
        let queue = SyncQueue::bounded(1, OverflowPolicy::DropNewest);
        assert_eq!(queue.push('a'), None);
        assert_eq!(queue.push('b'), Some('b'));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop(), Some('a'));
    }

    #[test]
    fn cross_thread_delivery_is_fifo() {
        let queue = Arc::new(SyncQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..10_000u32 {
                    queue.push(i);
                }
            })
        };
        for expected in 0..10_000u32 {
            assert_eq!(queue.pop(), Some(expected));
        }
        producer.join().unwrap();
    }

    proptest! {
        #[test]
        fn pops_return_items_in_push_order(items in proptest::collection::vec(any::<i32>(), 0..200)) {
            let queue = SyncQueue::new();
            for &item in &items {
                queue.push(item);
            }
            let popped: Vec<i32> = (0..items.len()).filter_map(|_| queue.pop()).collect();
            prop_assert_eq!(popped, items);
        }
    }
}
