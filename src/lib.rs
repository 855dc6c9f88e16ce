//! # recycling_objectpool
//!
//! Bounded, in-process object pool for expensive objects (clients, handles,
//! buffers) shared by many concurrent callers.
//!
//! ## Features
//!
//! - Lazy creation between `min_objects` and `max_objects`, with a
//!   lock-free slot reservation so concurrent callers never overshoot
//! - Timeout-bounded waiting once the pool is at capacity
//! - Max-lifetime expiry of idle objects
//! - Flushing down to `min_objects`, forced or expiry-only
//! - Pluggable recycle strategies driven by one periodic [`Recycler`]
//! - Named pools in a [`PoolRegistry`]
//! - Works from tokio tasks and from plain sequential code
//! - Lifecycle counters with Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use recycling_objectpool::{Pool, PoolOption};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let pool = Pool::new(
//!     || Ok::<_, std::convert::Infallible>(String::with_capacity(256)),
//!     PoolOption::default(),
//! )
//! .unwrap();
//!
//! {
//!     let mut buffer = pool.get().await.unwrap();
//!     buffer.push_str("hello");
//!     // returned to the pool when `buffer` goes out of scope
//! }
//!
//! assert_eq!(pool.current_object_number(), 1);
//! assert_eq!(pool.idle_count(), 1);
//! # });
//! ```

mod config;
mod errors;
mod metrics;
mod pool;
mod queue;
mod recycler;
mod registry;
mod strategy;

pub use config::PoolOption;
pub use errors::{BoxError, PoolError, PoolResult, SharedError};
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use metrics::PoolMetrics;
pub use pool::{ManagedPool, Pool, PoolBuilder, PoolStats, Pooled};
pub use queue::{CooperativeQueue, ExecutionContext, IdleQueue, SequentialQueue};
pub use recycler::Recycler;
pub use registry::{DEFAULT_RECYCLE_INTERVAL, PoolRegistry};
pub use strategy::{DEFAULT_RECYCLE_TIME, RecycleStrategy, RecycleStrategyKind, TimeStrategy};
