//! Bounded blocking queue.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A fixed-capacity FIFO with blocking and non-blocking ends.
///
/// Producers wait on `not_full`, consumers on `not_empty`. Closing the
/// queue wakes every waiter; a closed queue refuses new items but keeps
/// handing out the ones already buffered.
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

struct Inner<T> {
    items: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Non-blocking enqueue. Hands the item back when the queue is full
    /// or closed.
    pub fn try_offer(&self, item: T) -> std::result::Result<(), T> {
        let mut inner = self.lock();
        if inner.closed || inner.items.len() == inner.capacity {
            return Err(item);
        }
        inner.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocking enqueue. Waits for space; hands the item back only if
    /// the queue is closed while waiting.
    pub fn put(&self, item: T) -> std::result::Result<(), T> {
        let mut inner = self.lock();
        while !inner.closed && inner.items.len() == inner.capacity {
            inner = self.not_full.wait(inner).expect("queue poisoned");
        }
        if inner.closed {
            return Err(item);
        }
        inner.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocking dequeue. Returns `None` once the queue is closed and
    /// drained.
    pub fn take(&self) -> Option<T> {
        let mut inner = self.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            inner = self.not_empty.wait(inner).expect("queue poisoned");
        }
    }

    /// Dequeue with a bounded wait. Returns `None` on timeout, or once
    /// the queue is closed and drained.
    pub fn poll(&self, timeout: Duration) -> Option<T> {
        let mut inner = self.lock();
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(item) = inner.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            let remaining = deadline.checked_duration_since(std::time::Instant::now())?;
            let (guard, result) = self
                .not_empty
                .wait_timeout(inner, remaining)
                .expect("queue poisoned");
            inner = guard;
            if result.timed_out() && inner.items.is_empty() {
                return None;
            }
        }
    }

    /// Closes the queue and wakes every blocked producer and consumer.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<T>> {
        self.inner.lock().expect("queue poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_order() {
        let q = BoundedQueue::new(4);
        for i in 0..4 {
            q.try_offer(i).unwrap();
        }
        assert_eq!(q.try_offer(9), Err(9));
        for i in 0..4 {
            assert_eq!(q.take(), Some(i));
        }
    }

    #[test]
    fn poll_times_out_when_empty() {
        let q: BoundedQueue<u32> = BoundedQueue::new(1);
        assert_eq!(q.poll(Duration::from_millis(10)), None);
    }

    #[test]
    fn put_blocks_until_space_frees() {
        let q = Arc::new(BoundedQueue::new(1));
        q.try_offer(1).unwrap();
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.put(2).is_ok())
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(q.take(), Some(1));
        assert!(producer.join().unwrap());
        assert_eq!(q.take(), Some(2));
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let q: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::new(1));
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.take())
        };
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert_eq!(consumer.join().unwrap(), None);
        assert_eq!(q.try_offer(5), Err(5));
    }

    #[test]
    fn closed_queue_still_drains() {
        let q = BoundedQueue::new(2);
        q.try_offer(1).unwrap();
        q.close();
        assert_eq!(q.take(), Some(1));
        assert_eq!(q.take(), None);
    }
}
