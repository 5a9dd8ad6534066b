//! Bounded outbound queue with drop-oldest backpressure.
//!
//! Multi-producer (any handler holding a connection handle), single
//! consumer (the connection's send loop). Once the queue is full the
//! oldest unsent buffer is discarded to make room for the newest: a
//! deliberately lossy policy for a real-time feed where a stale state
//! update is worth less than the one replacing it.

use crate::error::{GateError, Result};
use crate::utils::buffer_pool::PooledBuffer;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

pub struct SendQueue {
    inner: Mutex<VecDeque<PooledBuffer>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
}

impl SendQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue one outbound buffer.
    ///
    /// Returns whether an older buffer was discarded to make room.
    pub fn push(&self, buf: PooledBuffer) -> Result<bool> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GateError::QueueClosed);
        }

        let dropped = {
            let mut queue = match self.inner.lock() {
                Ok(queue) => queue,
                // A panicked producer cannot corrupt a deque of owned
                // buffers; keep going with the inner value
                Err(poisoned) => poisoned.into_inner(),
            };
            let dropped = if queue.len() == self.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(buf);
            dropped
        };

        self.notify.notify_one();
        Ok(dropped)
    }

    /// Dequeue the next buffer, waiting if the queue is empty.
    ///
    /// Returns `None` once the queue is closed.
    pub async fn pop(&self) -> Option<PooledBuffer> {
        loop {
            // Arm the waiter before checking, so a push between the check
            // and the await cannot be missed
            let notified = self.notify.notified();

            {
                let mut queue = match self.inner.lock() {
                    Ok(queue) => queue,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if let Some(buf) = queue.pop_front() {
                    return Some(buf);
                }
            }

            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            notified.await;
        }
    }

    /// Close the queue and discard anything still buffered.
    ///
    /// Idempotent; wakes the consumer so teardown is prompt.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut queue) = self.inner.lock() {
            queue.clear();
        }
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::buffer_pool::BufferPool;

    fn buf_with(pool: &BufferPool, byte: u8) -> PooledBuffer {
        let mut buf = pool.acquire();
        buf.push(byte);
        buf
    }

    #[tokio::test]
    async fn fifo_order() {
        let pool = BufferPool::new(64, 64);
        let queue = SendQueue::new(4);
        queue.push(buf_with(&pool, 1)).unwrap();
        queue.push(buf_with(&pool, 2)).unwrap();
        assert_eq!(queue.pop().await.unwrap()[0], 1);
        assert_eq!(queue.pop().await.unwrap()[0], 2);
    }

    #[tokio::test]
    async fn drop_oldest_when_full() {
        let pool = BufferPool::new(64, 64);
        let queue = SendQueue::new(2);
        assert!(!queue.push(buf_with(&pool, 1)).unwrap());
        assert!(!queue.push(buf_with(&pool, 2)).unwrap());
        // Full: pushing 3 discards 1
        assert!(queue.push(buf_with(&pool, 3)).unwrap());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().await.unwrap()[0], 2);
        assert_eq!(queue.pop().await.unwrap()[0], 3);
    }

    #[tokio::test]
    async fn close_wakes_and_drains() {
        let pool = BufferPool::new(64, 64);
        let queue = std::sync::Arc::new(SendQueue::new(2));
        queue.push(buf_with(&pool, 1)).unwrap();

        queue.close();
        assert!(queue.pop().await.is_none());
        assert!(matches!(
            queue.push(buf_with(&pool, 2)),
            Err(GateError::QueueClosed)
        ));

        // A parked consumer is woken by close
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        queue.close();
        assert!(waiter.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn push_wakes_parked_consumer() {
        let pool = BufferPool::new(64, 64);
        let queue = std::sync::Arc::new(SendQueue::new(2));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.push(buf_with(&pool, 9)).unwrap();
        assert_eq!(waiter.await.unwrap().unwrap()[0], 9);
    }
}
