//! Pool configuration options

use std::time::Duration;

use crate::errors::{PoolError, PoolResult};
use crate::strategy::RecycleStrategyKind;

/// Configuration for a single pool
///
/// Field names match the recognized option keys, so a config file can be
/// deserialized straight into it (with the `serde` feature). Durations are
/// written there as float seconds.
///
/// # Examples
///
/// ```
/// use recycling_objectpool::PoolOption;
/// use std::time::Duration;
///
/// let option = PoolOption::new()
///     .with_min_objects(2)
///     .with_max_objects(8)
///     .with_wait_timeout(Duration::from_millis(500))
///     .with_max_lifetime(Duration::ZERO);
///
/// assert!(option.validate().is_ok());
/// assert_eq!(option.lifetime_limit(), None);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct PoolOption {
    /// Floor below which flushing and recycling stop shrinking the pool
    pub min_objects: usize,

    /// Hard cap on live objects, idle or checked out
    pub max_objects: usize,

    /// How long `get()` waits for an idle object once the pool is at capacity
    #[cfg_attr(feature = "serde", serde(deserialize_with = "seconds::deserialize"))]
    pub wait_timeout: Duration,

    /// Age after which an object is retired at its next acquire or flush.
    /// Zero disables expiry.
    #[cfg_attr(feature = "serde", serde(deserialize_with = "seconds::deserialize"))]
    pub max_lifetime: Duration,

    /// Fraction of the idle population considered per recycle pass
    pub recycle_ratio: f64,

    /// Strategy governing when and how the pool is shrunk
    pub recycle_strategy: RecycleStrategyKind,
}

impl Default for PoolOption {
    fn default() -> Self {
        Self {
            min_objects: 1,
            max_objects: 10,
            wait_timeout: Duration::from_secs(3),
            max_lifetime: Duration::from_secs(60),
            recycle_ratio: 0.2,
            recycle_strategy: RecycleStrategyKind::default(),
        }
    }
}

impl PoolOption {
    /// Create options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the floor below which flushing and recycling stop
    pub fn with_min_objects(mut self, count: usize) -> Self {
        self.min_objects = count;
        self
    }

    /// Set the cap on live objects
    pub fn with_max_objects(mut self, count: usize) -> Self {
        self.max_objects = count;
        self
    }

    /// Set how long `get()` waits once the pool is at capacity
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Set the maximum object lifetime; `Duration::ZERO` disables expiry
    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set the fraction of idle objects a recycle pass considers
    pub fn with_recycle_ratio(mut self, ratio: f64) -> Self {
        self.recycle_ratio = ratio;
        self
    }

    /// Set the strategy that decides when the pool shrinks
    pub fn with_recycle_strategy(mut self, strategy: RecycleStrategyKind) -> Self {
        self.recycle_strategy = strategy;
        self
    }

    /// Maximum lifetime, or `None` when expiry is disabled
    pub fn lifetime_limit(&self) -> Option<Duration> {
        (!self.max_lifetime.is_zero()).then_some(self.max_lifetime)
    }

    /// Check the bounds a pool relies on
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_objects == 0 {
            return Err(PoolError::invalid("max_objects must be greater than 0"));
        }
        if self.min_objects > self.max_objects {
            return Err(PoolError::invalid(format!(
                "min_objects ({}) must not exceed max_objects ({})",
                self.min_objects, self.max_objects
            )));
        }
        if !(0.0..=1.0).contains(&self.recycle_ratio) {
            return Err(PoolError::invalid(format!(
                "recycle_ratio ({}) must be within [0, 1]",
                self.recycle_ratio
            )));
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
pub(crate) mod seconds {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            D::Error::custom(format!("expected a non-negative number of seconds, got {secs}"))
        })
    }
}
