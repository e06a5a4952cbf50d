//! Bounded-concurrency admission for outbound backend calls
//!
//! A single chart may need one baseline fit per (age-group, country) entry.
//! The queue caps how many of those reach the shared backend at once; the
//! rest wait in FIFO order for a slot.

use crate::error::{BaselineError, Result};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::trace;

/// Queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of concurrently running tasks
    pub max_concurrent: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

impl QueueConfig {
    /// Create a new config
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concurrency limit (at least 1)
    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }
}

/// FIFO request queue with a fixed number of execution slots.
///
/// `tokio::sync::Semaphore` hands out permits in request order, so waiters
/// are admitted first-come first-served.
#[derive(Debug)]
pub struct RequestQueue {
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    in_flight: AtomicUsize,
    waiting: AtomicUsize,
}

impl RequestQueue {
    /// Create a new queue
    pub fn new(config: QueueConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            in_flight: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Create with default config
    pub fn with_defaults() -> Self {
        Self::new(QueueConfig::default())
    }

    /// Wait for a slot, run `task`, then release the slot
    pub async fn run<F, T>(&self, task: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let waiter = CounterGuard::enter(&self.waiting);
        let permit = self.slots.acquire().await;
        drop(waiter);
        let _permit = permit.map_err(|_| BaselineError::QueueClosed)?;

        let _slot = CounterGuard::enter(&self.in_flight);
        trace!(
            in_flight = self.in_flight(),
            waiting = self.waiting(),
            "Request admitted"
        );
        task.await
    }

    /// Number of tasks currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Number of tasks waiting for a slot
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Configured concurrency limit
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Reject all current and future waiters
    pub fn close(&self) {
        self.slots.close();
    }
}

/// Keeps a counter accurate even when the future holding it is dropped
struct CounterGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> CounterGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let queue = Arc::new(RequestQueue::new(QueueConfig::new().max_concurrent(3)));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let queue = Arc::clone(&queue);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                queue
                    .run(async {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(queue.in_flight(), 0);
        assert_eq!(queue.waiting(), 0);
    }

    #[tokio::test]
    async fn test_next_task_starts_after_a_slot_frees() {
        let queue = Arc::new(RequestQueue::new(QueueConfig::new().max_concurrent(2)));
        let events = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for id in 0..3usize {
            let queue = Arc::clone(&queue);
            let events = Arc::clone(&events);
            handles.push(tokio::spawn(async move {
                queue
                    .run(async {
                        events.lock().push(format!("start-{}", id));
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        events.lock().push(format!("end-{}", id));
                        Ok(())
                    })
                    .await
            }));
            // Enqueue in a known order
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let events = events.lock().clone();
        let third_start = events.iter().position(|e| e == "start-2").unwrap();
        let first_end = events
            .iter()
            .position(|e| e == "end-0" || e == "end-1")
            .unwrap();
        assert!(first_end < third_start, "events: {:?}", events);
    }

    #[tokio::test]
    async fn test_fifo_admission() {
        let queue = Arc::new(RequestQueue::new(QueueConfig::new().max_concurrent(1)));
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for id in 0..5usize {
            let queue = Arc::clone(&queue);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                queue
                    .run(async {
                        order.lock().push(id);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        Ok(())
                    })
                    .await
            }));
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_is_not_counted() {
        let queue = Arc::new(RequestQueue::new(QueueConfig::new().max_concurrent(1)));

        let holder = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .run(async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(queue.in_flight(), 1);

        let cancelled =
            tokio::time::timeout(Duration::from_millis(5), queue.run(async { Ok(()) })).await;
        assert!(cancelled.is_err());
        assert_eq!(queue.waiting(), 0);

        holder.await.unwrap().unwrap();
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects() {
        let queue = RequestQueue::with_defaults();
        queue.close();
        let result = queue.run(async { Ok(1) }).await;
        assert!(matches!(result, Err(BaselineError::QueueClosed)));
    }
}
