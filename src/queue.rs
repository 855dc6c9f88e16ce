//! Idle-object queues
//!
//! A pool keeps its idle objects in an [`IdleQueue`]. Which backend is used
//! depends on where the pool's callers run, and the caller says so up front
//! through [`ExecutionContext`]:
//!
//! - [`CooperativeQueue`] for pools shared by tokio tasks. A waiting `pop`
//!   suspends only the calling task.
//! - [`SequentialQueue`] for a single plain caller. `pop` never waits, so a
//!   caller can never deadlock against itself.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

/// FIFO of idle objects with a timeout-bounded removal
#[async_trait]
pub trait IdleQueue<T: Send>: Send + Sync {
    /// Append at the tail without waiting; hands the item back when full
    fn push(&self, item: T) -> Result<(), T>;

    /// Remove from the head if something is there
    fn try_pop(&self) -> Option<T>;

    /// Remove from the head, waiting up to `timeout` where the backend can
    /// wait. `None` means nothing was available, which is not an error.
    async fn pop(&self, timeout: Duration) -> Option<T>;

    /// Current idle count
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize;
}

/// Where the callers of a pool run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Tokio tasks; waiting yields to sibling tasks
    #[default]
    Cooperative,

    /// One plain caller outside any scheduler; waiting degenerates to a
    /// single attempt
    Sequential,
}

impl ExecutionContext {
    /// Build the idle queue backend for this context
    pub fn idle_queue<T: Send + 'static>(self, capacity: usize) -> Box<dyn IdleQueue<T>> {
        match self {
            Self::Cooperative => Box::new(CooperativeQueue::new(capacity)),
            Self::Sequential => Box::new(SequentialQueue::new(capacity)),
        }
    }
}

/// Bounded lock-free queue whose `pop` parks the calling task until an item
/// is pushed or the timeout passes
pub struct CooperativeQueue<T> {
    items: ArrayQueue<T>,
    pushed: Notify,
}

impl<T> CooperativeQueue<T> {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: ArrayQueue::new(capacity),
            pushed: Notify::new(),
        }
    }
}

#[async_trait]
impl<T: Send> IdleQueue<T> for CooperativeQueue<T> {
    fn push(&self, item: T) -> Result<(), T> {
        self.items.push(item)?;
        self.pushed.notify_one();
        Ok(())
    }

    fn try_pop(&self) -> Option<T> {
        self.items.pop()
    }

    async fn pop(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking, so a push in between is not missed.
            let pushed = self.pushed.notified();
            tokio::pin!(pushed);
            pushed.as_mut().enable();

            if let Some(item) = self.items.pop() {
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, pushed).await.is_err() {
                return self.items.pop();
            }
        }
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn capacity(&self) -> usize {
        self.items.capacity()
    }
}

/// Plain deque for callers outside any scheduler
pub struct SequentialQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> SequentialQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }
}

#[async_trait]
impl<T: Send> IdleQueue<T> for SequentialQueue<T> {
    fn push(&self, item: T) -> Result<(), T> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(item);
        }
        items.push_back(item);
        Ok(())
    }

    fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    // Nobody else could push while the only caller waits.
    async fn pop(&self, _timeout: Duration) -> Option<T> {
        self.try_pop()
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
