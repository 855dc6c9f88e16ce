//! Periodic driver that lets every registered pool shrink itself

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::errors::{PoolError, PoolResult};
use crate::registry::PoolRegistry;

/// Periodic recycler over a [`PoolRegistry`]
///
/// Once started, every `interval` it asks each registered pool's strategy
/// whether a pass is due and, if so, runs it. One recycler per process is
/// enough; it is independent of any single pool.
///
/// # Examples
///
/// ```
/// use recycling_objectpool::{PoolRegistry, Recycler};
/// use std::sync::Arc;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let recycler = Recycler::new(Arc::new(PoolRegistry::new()));
/// recycler.start().unwrap();
/// assert!(recycler.is_running());
///
/// recycler.stop();
/// assert!(!recycler.is_running());
/// # });
/// ```
pub struct Recycler {
    registry: Arc<PoolRegistry>,
    interval: RwLock<Duration>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Recycler {
    /// Recycler ticking at the registry's recycle interval
    pub fn new(registry: Arc<PoolRegistry>) -> Self {
        let interval = registry.recycle_interval();
        Self {
            registry,
            interval: RwLock::new(interval),
            task: Mutex::new(None),
        }
    }

    /// # Errors
    ///
    /// [`PoolError::InvalidConfiguration`] for a zero interval.
    pub fn with_interval(registry: Arc<PoolRegistry>, interval: Duration) -> PoolResult<Self> {
        let recycler = Self::new(registry);
        recycler.set_interval(interval)?;
        Ok(recycler)
    }

    pub fn interval(&self) -> Duration {
        *self.interval.read()
    }

    /// Change the tick interval; a running recycler picks it up on its next
    /// `start()` after a `stop()`
    ///
    /// # Errors
    ///
    /// [`PoolError::InvalidConfiguration`] for a zero interval.
    pub fn set_interval(&self, interval: Duration) -> PoolResult<()> {
        if interval.is_zero() {
            return Err(PoolError::invalid("recycle interval must be greater than 0"));
        }
        *self.interval.write() = interval;
        Ok(())
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    /// Start ticking on the current tokio runtime; no-op when already running
    ///
    /// # Errors
    ///
    /// [`PoolError::RuntimeUnavailable`] when called outside a tokio runtime.
    pub fn start(&self) -> PoolResult<()> {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        let runtime = Handle::try_current().map_err(|_| PoolError::RuntimeUnavailable)?;
        let registry = Arc::clone(&self.registry);
        let interval = self.interval();

        *task = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let recycled = recycle_pools(&registry).await;
                tracing::trace!(recycled, "recycler tick");
            }
        }));

        tracing::debug!(?interval, "recycler started");
        Ok(())
    }

    /// Stop ticking; no-op when not running
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
            tracing::debug!("recycler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Run one pass over every registered pool right now; returns how many
    /// pools were recycled
    pub async fn recycle_pools(&self) -> usize {
        recycle_pools(&self.registry).await
    }

    /// When the pool named `name` was last recycled
    pub fn last_recycled_at(&self, name: &str) -> PoolResult<Option<Instant>> {
        Ok(self.registry.get_managed(name)?.last_recycled_at())
    }
}

impl Drop for Recycler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn recycle_pools(registry: &PoolRegistry) -> usize {
    let mut recycled = 0;
    for pool in registry.pools() {
        let strategy = pool.recycle_strategy();
        if strategy.should_recycle(&*pool) {
            strategy.recycle(&*pool).await;
            recycled += 1;
        }
    }
    recycled
}
