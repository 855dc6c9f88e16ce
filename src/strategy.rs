//! Recycle strategies deciding when, and how far, a pool's idle population shrinks

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::config::PoolOption;
use crate::pool::ManagedPool;

/// Default pause between two recycle passes of the time strategy
pub const DEFAULT_RECYCLE_TIME: Duration = Duration::from_secs(10);

/// Pluggable shrink policy for a pool
///
/// `should_recycle` must not touch the pool; `recycle` does the shrinking
/// and records on the pool that it ran.
#[async_trait]
pub trait RecycleStrategy: Send + Sync + fmt::Debug {
    /// Whether now is a good time to shrink `pool`
    fn should_recycle(&self, pool: &dyn ManagedPool) -> bool;

    /// Shrink `pool` and stamp its last recycle time
    async fn recycle(&self, pool: &dyn ManagedPool);
}

/// Selects the strategy a pool resolves on first use
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Deserialize),
    serde(tag = "type", rename_all = "snake_case")
)]
pub enum RecycleStrategyKind {
    /// [`TimeStrategy`] with the pool's `recycle_ratio`
    Time {
        #[cfg_attr(
            feature = "serde",
            serde(
                default = "default_recycle_time",
                deserialize_with = "crate::config::seconds::deserialize"
            )
        )]
        recycle_time: Duration,
    },

    /// A caller-supplied strategy instance
    #[cfg_attr(feature = "serde", serde(skip))]
    Custom(Arc<dyn RecycleStrategy>),
}

#[cfg(feature = "serde")]
fn default_recycle_time() -> Duration {
    DEFAULT_RECYCLE_TIME
}

impl Default for RecycleStrategyKind {
    fn default() -> Self {
        Self::Time {
            recycle_time: DEFAULT_RECYCLE_TIME,
        }
    }
}

impl RecycleStrategyKind {
    /// Build the strategy instance for a pool configured with `option`
    pub fn resolve(&self, option: &PoolOption) -> Arc<dyn RecycleStrategy> {
        match self {
            Self::Time { recycle_time } => {
                Arc::new(TimeStrategy::new(*recycle_time, option.recycle_ratio))
            }
            Self::Custom(strategy) => Arc::clone(strategy),
        }
    }
}

/// Time-based recycling
///
/// A pass is due once `recycle_time` has elapsed since the pool was last
/// recycled (or if it never was). A pass makes `floor(ratio * idle) + 1`
/// non-forced `flush_one` attempts, so it retires expired idle objects and
/// rotates the rest, never going below the pool's `min_objects`.
///
/// # Examples
///
/// ```
/// use recycling_objectpool::TimeStrategy;
/// use std::time::Duration;
///
/// let strategy = TimeStrategy::new(Duration::from_secs(10), 0.5);
/// assert_eq!(strategy.eviction_attempts(4), 3);
/// assert_eq!(strategy.eviction_attempts(0), 1);
/// ```
#[derive(Debug, Clone)]
pub struct TimeStrategy {
    recycle_time: Duration,
    recycle_ratio: f64,
}

impl TimeStrategy {
    /// Create a strategy; the ratio is clamped into `[0, 1]`
    pub fn new(recycle_time: Duration, recycle_ratio: f64) -> Self {
        Self {
            recycle_time,
            recycle_ratio: clamp_ratio(recycle_ratio),
        }
    }

    pub fn recycle_time(&self) -> Duration {
        self.recycle_time
    }

    pub fn recycle_ratio(&self) -> f64 {
        self.recycle_ratio
    }

    pub fn with_recycle_time(mut self, recycle_time: Duration) -> Self {
        self.recycle_time = recycle_time;
        self
    }

    pub fn with_recycle_ratio(mut self, recycle_ratio: f64) -> Self {
        self.recycle_ratio = clamp_ratio(recycle_ratio);
        self
    }

    /// Number of `flush_one` calls a pass makes for `idle` idle objects
    pub fn eviction_attempts(&self, idle: usize) -> usize {
        (self.recycle_ratio * idle as f64).floor() as usize + 1
    }
}

impl Default for TimeStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_RECYCLE_TIME, 0.2)
    }
}

fn clamp_ratio(ratio: f64) -> f64 {
    if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) }
}

#[async_trait]
impl RecycleStrategy for TimeStrategy {
    fn should_recycle(&self, pool: &dyn ManagedPool) -> bool {
        match pool.last_recycled_at() {
            Some(at) => at.elapsed() >= self.recycle_time,
            None => true,
        }
    }

    async fn recycle(&self, pool: &dyn ManagedPool) {
        let idle = pool.idle_count();
        let attempts = self.eviction_attempts(idle);

        let mut evicted = 0;
        for _ in 0..attempts {
            if pool.flush_one(false).await {
                evicted += 1;
            }
        }

        pool.set_last_recycled_at(Some(Instant::now()));
        tracing::debug!(pool = %pool.name(), idle, attempts, evicted, "recycle pass finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolStats;
    use parking_lot::Mutex;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records the calls a strategy makes instead of owning real objects
    #[derive(Debug)]
    struct RecordingPool {
        option: PoolOption,
        idle: usize,
        flush_calls: AtomicUsize,
        last_recycled_at: Mutex<Option<Instant>>,
    }

    impl RecordingPool {
        fn new(idle: usize, last_recycled_at: Option<Instant>) -> Self {
            Self {
                option: PoolOption::default(),
                idle,
                flush_calls: AtomicUsize::new(0),
                last_recycled_at: Mutex::new(last_recycled_at),
            }
        }
    }

    #[async_trait]
    impl ManagedPool for RecordingPool {
        fn name(&self) -> &str {
            "recording"
        }

        fn option(&self) -> &PoolOption {
            &self.option
        }

        fn current_object_number(&self) -> usize {
            self.idle
        }

        fn idle_count(&self) -> usize {
            self.idle
        }

        fn last_recycled_at(&self) -> Option<Instant> {
            *self.last_recycled_at.lock()
        }

        fn set_last_recycled_at(&self, at: Option<Instant>) {
            *self.last_recycled_at.lock() = at;
        }

        fn recycle_strategy(&self) -> Arc<dyn RecycleStrategy> {
            Arc::new(TimeStrategy::default())
        }

        fn stats(&self) -> PoolStats {
            PoolStats {
                objects_count: self.idle,
                objects_in_pool: self.idle,
                last_recycled_at: self.last_recycled_at(),
            }
        }

        async fn flush_one(&self, _force: bool) -> bool {
            self.flush_calls.fetch_add(1, Ordering::SeqCst);
            false
        }

        async fn flush(&self) -> usize {
            0
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_after_recycle_time() {
        let strategy = TimeStrategy::new(Duration::from_secs(10), 0.5);

        let never = RecordingPool::new(4, None);
        assert!(strategy.should_recycle(&never));

        let recent = RecordingPool::new(4, Some(Instant::now()));
        assert!(!strategy.should_recycle(&recent));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(strategy.should_recycle(&recent));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recycle_flushes_ratio_plus_one_and_stamps() {
        let strategy = TimeStrategy::new(Duration::from_secs(10), 0.5);
        let pool = RecordingPool::new(4, Some(Instant::now()));
        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(strategy.should_recycle(&pool));
        strategy.recycle(&pool).await;

        assert_eq!(pool.flush_calls.load(Ordering::SeqCst), 3);
        assert_eq!(pool.last_recycled_at(), Some(Instant::now()));
        assert!(!strategy.should_recycle(&pool));
    }

    #[tokio::test]
    async fn test_zero_ratio_still_attempts_once() {
        let strategy = TimeStrategy::new(Duration::from_secs(10), 0.0);
        let pool = RecordingPool::new(7, None);

        strategy.recycle(&pool).await;

        assert_eq!(pool.flush_calls.load(Ordering::SeqCst), 1);
        assert!(pool.last_recycled_at().is_some());
    }

    #[test]
    fn test_ratio_is_clamped() {
        assert_eq!(TimeStrategy::new(DEFAULT_RECYCLE_TIME, 3.0).recycle_ratio(), 1.0);
        assert_eq!(TimeStrategy::new(DEFAULT_RECYCLE_TIME, -1.0).recycle_ratio(), 0.0);
        assert_eq!(TimeStrategy::new(DEFAULT_RECYCLE_TIME, f64::NAN).recycle_ratio(), 0.0);
    }

    #[test]
    fn test_time_kind_resolves_with_pool_ratio() {
        let option = PoolOption::new().with_recycle_ratio(0.75);
        let strategy = RecycleStrategyKind::default().resolve(&option);

        assert!(format!("{strategy:?}").contains("recycle_ratio: 0.75"));
    }
}
