//! Core object pool implementation

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::PoolOption;
use crate::errors::{BoxError, PoolError, PoolResult};
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::queue::{ExecutionContext, IdleQueue};
use crate::strategy::RecycleStrategy;

#[cfg(feature = "metrics")]
use crate::metrics::MetricsExporter;

/// How long flushing waits for an idle object before giving up
const FLUSH_POP_TIMEOUT: Duration = Duration::from_millis(1);

const DEFAULT_POOL_NAME: &str = "default";

type Factory<T> = Box<dyn Fn() -> Result<T, BoxError> + Send + Sync>;
type DestroyHook<T> = Box<dyn Fn(T) -> Result<(), BoxError> + Send + Sync>;

/// A live object together with the instant it was created
pub(crate) struct Entry<T> {
    value: T,
    created_at: Instant,
}

impl<T> Entry<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            created_at: Instant::now(),
        }
    }
}

/// Snapshot of a pool's population
///
/// Fields are read one after another, so under concurrent use they may not
/// describe a single instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Objects alive, idle or checked out
    pub objects_count: usize,

    /// Objects waiting in the idle queue
    pub objects_in_pool: usize,

    /// When a recycle pass last ran over this pool
    pub last_recycled_at: Option<Instant>,
}

/// Type-erased view of a pool, as seen by recycle strategies, the recycler
/// and the registry
#[async_trait]
pub trait ManagedPool: Send + Sync {
    fn name(&self) -> &str;

    fn option(&self) -> &PoolOption;

    /// Live objects, idle or checked out
    fn current_object_number(&self) -> usize;

    /// Objects waiting in the idle queue
    fn idle_count(&self) -> usize;

    fn last_recycled_at(&self) -> Option<Instant>;

    fn set_last_recycled_at(&self, at: Option<Instant>);

    /// The strategy governing this pool, resolved on first use
    fn recycle_strategy(&self) -> Arc<dyn RecycleStrategy>;

    fn stats(&self) -> PoolStats;

    /// Evict at most one idle object; returns whether one was destroyed
    async fn flush_one(&self, force: bool) -> bool;

    /// Evict idle objects down to `min_objects`; returns how many were destroyed
    async fn flush(&self) -> usize;

    /// Upcast for typed lookups
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Builder for [`Pool`]
pub struct PoolBuilder<T: Send + 'static> {
    name: String,
    factory: Factory<T>,
    option: PoolOption,
    context: ExecutionContext,
    destroy_hook: Option<DestroyHook<T>>,
}

impl<T: Send + 'static> PoolBuilder<T> {
    /// Name used in log fields and metric labels
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn option(mut self, option: PoolOption) -> Self {
        self.option = option;
        self
    }

    /// Where the pool's callers run; cooperative (tokio) by default
    pub fn context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    /// Hook run on every object the pool evicts. Its errors and panics are
    /// logged and swallowed.
    pub fn destroy_hook<F, E>(mut self, hook: F) -> Self
    where
        F: Fn(T) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.destroy_hook = Some(Box::new(move |value| hook(value).map_err(Into::into)));
        self
    }

    /// Validate the option and build the pool. No object is created yet.
    pub fn build(self) -> PoolResult<Pool<T>> {
        self.option.validate()?;

        let idle = self.context.idle_queue(self.option.max_objects);
        Ok(Pool {
            inner: Arc::new(PoolInner {
                name: self.name,
                idle,
                option: self.option,
                context: self.context,
                population: Population::default(),
                factory: self.factory,
                destroy_hook: self.destroy_hook,
                strategy: RwLock::new(None),
                last_recycled_at: Mutex::new(None),
                metrics: MetricsTracker::default(),
            }),
        })
    }
}

struct PoolInner<T: Send + 'static> {
    name: String,
    idle: Box<dyn IdleQueue<Entry<T>>>,
    option: PoolOption,
    context: ExecutionContext,
    population: Population,
    factory: Factory<T>,
    destroy_hook: Option<DestroyHook<T>>,
    strategy: RwLock<Option<Arc<dyn RecycleStrategy>>>,
    last_recycled_at: Mutex<Option<Instant>>,
    metrics: MetricsTracker,
}

/// Object counts shared by acquirers and evictors
#[derive(Default)]
struct Population {
    /// Objects alive anywhere; bounded by `max_objects`
    live: AtomicUsize,
    /// `live` minus objects already taken out for eviction; evictors claim
    /// from it so that together they never go below `min_objects`
    retained: AtomicUsize,
    /// Fired whenever `live` drops, so waiting acquirers retry creation
    freed: Notify,
}

impl Population {
    fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    fn reserve(&self, max: usize) -> Option<SlotReservation<'_>> {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()?;
        self.retained.fetch_add(1, Ordering::AcqRel);
        Some(SlotReservation {
            population: self,
            committed: false,
        })
    }

    /// Claim the eviction of an object the caller holds, unless that would
    /// leave fewer than `min` objects
    fn claim_eviction(&self, min: usize) -> bool {
        self.retained
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n > min).then(|| n - 1))
            .is_ok()
    }

    /// Forget an object destroyed without an eviction claim
    fn release(&self) {
        let retained = self
            .retained
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        debug_assert!(retained.is_ok(), "retained object count underflow");
        self.drop_live();
    }

    fn drop_live(&self) {
        let live = self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        debug_assert!(live.is_ok(), "live object count underflow");
        self.freed.notify_waiters();
    }
}

/// A claimed slot under `max_objects`, given back unless committed
struct SlotReservation<'a> {
    population: &'a Population,
    committed: bool,
}

impl SlotReservation<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.population.release();
        }
    }
}

impl<T: Send + 'static> PoolInner<T> {
    fn live(&self) -> usize {
        self.population.live()
    }

    fn exceeds_max_lifetime(&self, entry: &Entry<T>) -> bool {
        self.option
            .lifetime_limit()
            .is_some_and(|limit| entry.created_at.elapsed() >= limit)
    }

    /// An idle object if any, else a new one if under the cap, else whatever
    /// becomes idle or creatable within the wait timeout. The flag tells if
    /// it is new.
    async fn obtain(&self) -> PoolResult<(Entry<T>, bool)> {
        let deadline = Instant::now() + self.option.wait_timeout;
        loop {
            // Register before checking, so a slot freed in between is not missed.
            let freed = self.population.freed.notified();
            tokio::pin!(freed);
            freed.as_mut().enable();

            if let Some(entry) = self.idle.try_pop() {
                return Ok((entry, false));
            }

            if let Some(slot) = self.population.reserve(self.option.max_objects) {
                let value = (self.factory)().map_err(|err| {
                    MetricsTracker::increment(&self.metrics.creation_failures);
                    let err = PoolError::creation(err);
                    tracing::warn!(pool = %self.name, error = %err, "object factory failed");
                    err
                })?;
                slot.commit();
                MetricsTracker::increment(&self.metrics.created);
                return Ok((Entry::new(value), true));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::select! {
                biased;
                entry = self.idle.pop(remaining) => {
                    return match entry {
                        Some(entry) => Ok((entry, false)),
                        None => {
                            MetricsTracker::increment(&self.metrics.exhausted_events);
                            Err(PoolError::Exhausted(self.option.wait_timeout))
                        }
                    };
                }
                _ = freed.as_mut() => {}
            }
        }
    }

    /// Put an object back into the idle queue, destroying it if the queue
    /// refuses it
    fn requeue(&self, entry: Entry<T>) {
        if let Err(entry) = self.idle.push(entry) {
            tracing::warn!(pool = %self.name, "idle queue full, destroying surplus object");
            self.destroy(entry);
        }
    }

    fn destroy(&self, entry: Entry<T>) {
        self.run_destroy_hook(entry.value);
        self.population.release();
    }

    /// Destroy an object whose eviction was claimed
    fn evict(&self, entry: Entry<T>) {
        self.run_destroy_hook(entry.value);
        self.population.drop_live();
    }

    fn run_destroy_hook(&self, value: T) {
        let outcome = match &self.destroy_hook {
            Some(hook) => panic::catch_unwind(AssertUnwindSafe(|| hook(value)))
                .unwrap_or_else(|payload| Err(panic_message(payload))),
            None => Ok(()),
        };

        if let Err(err) = outcome {
            MetricsTracker::increment(&self.metrics.destroy_failures);
            let err = PoolError::destruction(err);
            tracing::error!(pool = %self.name, error = %err, "destroy hook failed, object removed anyway");
        }
        MetricsTracker::increment(&self.metrics.destroyed);
    }

    fn drain(&self) -> usize {
        let mut destroyed = 0;
        while let Some(entry) = self.idle.try_pop() {
            self.destroy(entry);
            destroyed += 1;
        }
        destroyed
    }
}

impl<T: Send + 'static> Drop for PoolInner<T> {
    fn drop(&mut self) {
        let destroyed = self.drain();
        if destroyed > 0 {
            tracing::debug!(pool = %self.name, destroyed, "pool dropped, idle objects destroyed");
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> BoxError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("destroy hook panicked: {message}").into()
}

/// Bounded pool of lazily created objects
///
/// Cloning is cheap and every clone drives the same pool. Objects are
/// created on demand up to `max_objects`; once there, `get()` waits up to
/// `wait_timeout` for one to be released.
///
/// # Examples
///
/// ```
/// use recycling_objectpool::{Pool, PoolOption};
/// use std::time::Duration;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let option = PoolOption::new()
///     .with_max_objects(2)
///     .with_wait_timeout(Duration::from_millis(50));
/// let pool = Pool::new(|| Ok::<_, std::convert::Infallible>(vec![0u8; 1024]), option).unwrap();
///
/// let first = pool.get().await.unwrap();
/// let second = pool.get().await.unwrap();
/// assert!(pool.get().await.is_err());
///
/// pool.release(first);
/// drop(second); // dropping releases too
/// assert_eq!(pool.idle_count(), 2);
/// # });
/// ```
pub struct Pool<T: Send + 'static> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Send + 'static> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.name)
            .field("context", &self.inner.context)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<T: Send + 'static> Pool<T> {
    /// Create a cooperative pool with the given factory and option
    pub fn new<F, E>(factory: F, option: PoolOption) -> PoolResult<Self>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::builder(factory).option(option).build()
    }

    /// Start building a pool around `factory`
    pub fn builder<F, E>(factory: F) -> PoolBuilder<T>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        PoolBuilder {
            name: DEFAULT_POOL_NAME.to_string(),
            factory: Box::new(move || factory().map_err(Into::into)),
            option: PoolOption::default(),
            context: ExecutionContext::default(),
            destroy_hook: None,
        }
    }

    /// Check out an object
    ///
    /// Reuses an idle object when there is one, creates one while under
    /// `max_objects`, and otherwise waits up to `wait_timeout`. A reused
    /// object older than `max_lifetime` is destroyed and the acquisition
    /// starts over.
    ///
    /// # Errors
    ///
    /// [`PoolError::Exhausted`] when nothing became available in time,
    /// [`PoolError::Creation`] when the factory failed.
    pub async fn get(&self) -> PoolResult<Pooled<T>> {
        let inner = &self.inner;
        loop {
            let (entry, fresh) = inner.obtain().await?;
            if !fresh && inner.exceeds_max_lifetime(&entry) {
                tracing::debug!(
                    pool = %inner.name,
                    age = ?entry.created_at.elapsed(),
                    "retiring object past max lifetime"
                );
                inner.destroy(entry);
                continue;
            }

            MetricsTracker::increment(&inner.metrics.acquired);
            return Ok(Pooled {
                entry: Some(entry),
                pool: Arc::clone(inner),
            });
        }
    }

    /// Hand an object back; same as dropping it
    pub fn release(&self, object: Pooled<T>) {
        drop(object);
    }

    /// Destroy a checked-out object instead of returning it
    pub fn discard(&self, mut object: Pooled<T>) {
        if let Some(entry) = object.entry.take() {
            object.pool.destroy(entry);
        }
    }

    /// Evict at most one idle object
    ///
    /// Does nothing at or below `min_objects`. Otherwise takes one idle
    /// object and destroys it if `force` is set or it outlived
    /// `max_lifetime`; a kept object goes back to the queue. Returns whether
    /// an object was destroyed.
    pub async fn flush_one(&self, force: bool) -> bool {
        let inner = &self.inner;
        let min = inner.option.min_objects;
        if inner.live() <= min || inner.idle.is_empty() {
            return false;
        }

        let Some(entry) = inner.idle.pop(FLUSH_POP_TIMEOUT).await else {
            return false;
        };

        if (force || inner.exceeds_max_lifetime(&entry)) && inner.population.claim_eviction(min) {
            inner.evict(entry);
            true
        } else {
            inner.requeue(entry);
            false
        }
    }

    /// Destroy idle objects until `min_objects` is reached
    ///
    /// Only objects idle when the call starts are considered; objects
    /// released meanwhile are left alone. Returns how many were destroyed.
    pub async fn flush(&self) -> usize {
        let inner = &self.inner;
        let min = inner.option.min_objects;
        let mut remaining = inner.idle.len();
        let mut destroyed = 0;

        while remaining > 0 && inner.live() > min {
            let Some(entry) = inner.idle.pop(FLUSH_POP_TIMEOUT).await else {
                break;
            };
            if !inner.population.claim_eviction(min) {
                inner.requeue(entry);
                break;
            }
            inner.evict(entry);
            destroyed += 1;
            remaining -= 1;
        }

        if destroyed > 0 {
            tracing::debug!(pool = %inner.name, destroyed, "flushed idle objects");
        }
        destroyed
    }

    /// Destroy every idle object, ignoring `min_objects`
    pub fn drain(&self) -> usize {
        self.inner.drain()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn option(&self) -> &PoolOption {
        &self.inner.option
    }

    pub fn context(&self) -> ExecutionContext {
        self.inner.context
    }

    /// Live objects, idle or checked out
    pub fn current_object_number(&self) -> usize {
        self.inner.live()
    }

    /// Objects waiting in the idle queue
    pub fn idle_count(&self) -> usize {
        self.inner.idle.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            objects_count: self.current_object_number(),
            objects_in_pool: self.idle_count(),
            last_recycled_at: self.last_recycled_at(),
        }
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics.snapshot(
            self.current_object_number(),
            self.idle_count(),
            self.inner.option.max_objects,
        )
    }

    /// Export metrics as a HashMap
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.metrics().export()
    }

    /// Export metrics in Prometheus format, labelled with the pool name
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(&self, tags: Option<&HashMap<String, String>>) -> String {
        MetricsExporter::export_prometheus(&self.metrics(), &self.inner.name, tags)
    }

    pub fn last_recycled_at(&self) -> Option<Instant> {
        *self.inner.last_recycled_at.lock()
    }

    pub fn set_last_recycled_at(&self, at: Option<Instant>) {
        *self.inner.last_recycled_at.lock() = at;
    }

    /// The strategy governing this pool, resolved from the option on first use
    pub fn recycle_strategy(&self) -> Arc<dyn RecycleStrategy> {
        if let Some(strategy) = self.inner.strategy.read().as_ref() {
            return Arc::clone(strategy);
        }

        let mut slot = self.inner.strategy.write();
        let strategy = slot.get_or_insert_with(|| {
            self.inner.option.recycle_strategy.resolve(&self.inner.option)
        });
        Arc::clone(strategy)
    }

    /// Replace the strategy governing this pool
    pub fn set_recycle_strategy(&self, strategy: Arc<dyn RecycleStrategy>) {
        *self.inner.strategy.write() = Some(strategy);
    }
}

#[async_trait]
impl<T: Send + 'static> ManagedPool for Pool<T> {
    fn name(&self) -> &str {
        Pool::name(self)
    }

    fn option(&self) -> &PoolOption {
        Pool::option(self)
    }

    fn current_object_number(&self) -> usize {
        Pool::current_object_number(self)
    }

    fn idle_count(&self) -> usize {
        Pool::idle_count(self)
    }

    fn last_recycled_at(&self) -> Option<Instant> {
        Pool::last_recycled_at(self)
    }

    fn set_last_recycled_at(&self, at: Option<Instant>) {
        Pool::set_last_recycled_at(self, at)
    }

    fn recycle_strategy(&self) -> Arc<dyn RecycleStrategy> {
        Pool::recycle_strategy(self)
    }

    fn stats(&self) -> PoolStats {
        Pool::stats(self)
    }

    async fn flush_one(&self, force: bool) -> bool {
        Pool::flush_one(self, force).await
    }

    async fn flush(&self) -> usize {
        Pool::flush(self).await
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A checked-out object that goes back to its pool when dropped
pub struct Pooled<T: Send + 'static> {
    entry: Option<Entry<T>>,
    pool: Arc<PoolInner<T>>,
}

impl<T: Send + 'static> Pooled<T> {
    /// When the pool created this object
    pub fn created_at(&self) -> Instant {
        self.entry().created_at
    }

    pub fn age(&self) -> Duration {
        self.created_at().elapsed()
    }

    fn entry(&self) -> &Entry<T> {
        self.entry.as_ref().expect("Value already taken")
    }
}

impl<T: Send + 'static> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.entry().value
    }
}

impl<T: Send + 'static> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entry.as_mut().expect("Value already taken").value
    }
}

impl<T: Send + fmt::Debug + 'static> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("value", &self.entry.as_ref().map(|entry| &entry.value))
            .field("pool", &self.pool.name)
            .finish()
    }
}

impl<T: Send + 'static> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            MetricsTracker::increment(&self.pool.metrics.released);
            self.pool.requeue(entry);
        }
    }
}
