//! Named pools with create-once semantics

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::config::PoolOption;
use crate::errors::{BoxError, PoolError, PoolResult};
use crate::pool::{ManagedPool, Pool, PoolBuilder};
use crate::strategy::RecycleStrategyKind;

/// Default pause between two recycler ticks
pub const DEFAULT_RECYCLE_INTERVAL: Duration = Duration::from_secs(10);

/// Registry of named pools, the set a [`Recycler`](crate::Recycler) visits
///
/// # Examples
///
/// ```
/// use recycling_objectpool::{PoolError, PoolOption, PoolRegistry};
///
/// let registry = PoolRegistry::new();
/// registry
///     .create("buffers", || Ok::<_, std::convert::Infallible>(Vec::<u8>::new()), PoolOption::default())
///     .unwrap();
///
/// assert!(registry.has("buffers"));
/// assert!(registry.get::<Vec<u8>>("buffers").is_ok());
/// assert!(matches!(registry.get::<String>("buffers"), Err(PoolError::PoolTypeMismatch(_))));
/// assert!(matches!(registry.get::<Vec<u8>>("sockets"), Err(PoolError::UnknownPool(_))));
/// ```
pub struct PoolRegistry {
    pools: DashMap<String, Arc<dyn ManagedPool>>,
    recycle_interval: Duration,
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self {
            pools: DashMap::new(),
            recycle_interval: DEFAULT_RECYCLE_INTERVAL,
        }
    }

    /// Registry whose recycler ticks every `interval`
    ///
    /// # Errors
    ///
    /// [`PoolError::InvalidConfiguration`] for a zero interval.
    pub fn with_recycle_interval(interval: Duration) -> PoolResult<Self> {
        if interval.is_zero() {
            return Err(PoolError::invalid("recycle interval must be greater than 0"));
        }
        Ok(Self {
            pools: DashMap::new(),
            recycle_interval: interval,
        })
    }

    pub fn recycle_interval(&self) -> Duration {
        self.recycle_interval
    }

    /// Create and register a cooperative pool named `name`
    ///
    /// # Errors
    ///
    /// [`PoolError::DuplicatePool`] if the name is taken (the existing pool
    /// is left untouched), [`PoolError::InvalidConfiguration`] for a bad
    /// option.
    pub fn create<T, F, E>(
        &self,
        name: impl Into<String>,
        factory: F,
        option: PoolOption,
    ) -> PoolResult<Pool<T>>
    where
        T: Send + 'static,
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.create_with(name, Pool::builder(factory).option(option))
    }

    /// Create and register a pool from a builder; the builder's name is
    /// replaced by `name`
    pub fn create_with<T: Send + 'static>(
        &self,
        name: impl Into<String>,
        builder: PoolBuilder<T>,
    ) -> PoolResult<Pool<T>> {
        let name = name.into();
        match self.pools.entry(name.clone()) {
            Entry::Occupied(_) => Err(PoolError::DuplicatePool(name)),
            Entry::Vacant(slot) => {
                let pool = builder.name(name.clone()).build()?;
                self.check_recycle_time(&pool)?;
                slot.insert(Arc::new(pool.clone()));
                tracing::debug!(pool = %name, "pool registered");
                Ok(pool)
            }
        }
    }

    /// Register an existing pool, replacing any pool of the same name
    pub fn register<T: Send + 'static>(&self, name: impl Into<String>, pool: Pool<T>) {
        self.pools.insert(name.into(), Arc::new(pool));
    }

    /// Typed handle to the pool named `name`
    ///
    /// # Errors
    ///
    /// [`PoolError::UnknownPool`] if nothing is registered under `name`,
    /// [`PoolError::PoolTypeMismatch`] if the pool holds another type.
    pub fn get<T: Send + 'static>(&self, name: &str) -> PoolResult<Pool<T>> {
        let pool = self
            .pools
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PoolError::UnknownPool(name.to_string()))?;

        pool.as_any()
            .downcast::<Pool<T>>()
            .map(|pool| Pool::clone(&pool))
            .map_err(|_| PoolError::PoolTypeMismatch(name.to_string()))
    }

    /// Type-erased handle to the pool named `name`
    pub fn get_managed(&self, name: &str) -> PoolResult<Arc<dyn ManagedPool>> {
        self.pools
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PoolError::UnknownPool(name.to_string()))
    }

    pub fn has(&self, name: &str) -> bool {
        self.pools.contains_key(name)
    }

    /// Unregister a pool; its objects go away once the last handle drops
    pub fn remove(&self, name: &str) -> Option<Arc<dyn ManagedPool>> {
        self.pools.remove(name).map(|(_, pool)| pool)
    }

    /// Every registered pool
    pub fn pools(&self) -> Vec<Arc<dyn ManagedPool>> {
        self.pools.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.pools.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Unregister every pool
    pub fn clear(&self) {
        self.pools.clear();
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    // A time strategy checked less often than the recycler ticks would
    // skip ticks without saying so.
    fn check_recycle_time<T: Send + 'static>(&self, pool: &Pool<T>) -> PoolResult<()> {
        if let RecycleStrategyKind::Time { recycle_time } = pool.option().recycle_strategy
            && recycle_time < self.recycle_interval
        {
            return Err(PoolError::invalid(format!(
                "recycle_time ({recycle_time:?}) must not be shorter than the recycle interval ({:?})",
                self.recycle_interval
            )));
        }
        Ok(())
    }
}
