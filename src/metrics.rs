//! Lifecycle counters and their export

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a pool's counters and population
///
/// # Examples
///
/// ```
/// use recycling_objectpool::{ExecutionContext, Pool, PoolOption};
///
/// let pool = Pool::builder(|| Ok::<_, std::convert::Infallible>(String::new()))
///     .option(PoolOption::default())
///     .context(ExecutionContext::Sequential)
///     .build()
///     .unwrap();
///
/// let object = futures::executor::block_on(pool.get()).unwrap();
/// let metrics = pool.metrics();
/// assert_eq!(metrics.created, 1);
/// assert_eq!(metrics.live_objects, 1);
/// assert_eq!(metrics.idle_objects, 0);
/// drop(object);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// Objects produced by the factory
    pub created: u64,

    /// Objects evicted through the destroy path
    pub destroyed: u64,

    /// Factory calls that failed
    pub creation_failures: u64,

    /// Destroy hook calls that failed or panicked
    pub destroy_failures: u64,

    /// Successful acquisitions
    pub acquired: u64,

    /// Objects handed back by callers
    pub released: u64,

    /// Acquisitions that gave up after the wait timeout
    pub exhausted_events: u64,

    /// Objects alive, idle or checked out
    pub live_objects: usize,

    /// Objects waiting in the idle queue
    pub idle_objects: usize,

    /// Configured cap on live objects
    pub max_objects: usize,

    /// Live objects relative to the cap (0.0 to 1.0)
    pub utilization: f64,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("created".to_string(), self.created.to_string());
        metrics.insert("destroyed".to_string(), self.destroyed.to_string());
        metrics.insert("creation_failures".to_string(), self.creation_failures.to_string());
        metrics.insert("destroy_failures".to_string(), self.destroy_failures.to_string());
        metrics.insert("acquired".to_string(), self.acquired.to_string());
        metrics.insert("released".to_string(), self.released.to_string());
        metrics.insert("exhausted_events".to_string(), self.exhausted_events.to_string());
        metrics.insert("live_objects".to_string(), self.live_objects.to_string());
        metrics.insert("idle_objects".to_string(), self.idle_objects.to_string());
        metrics.insert("max_objects".to_string(), self.max_objects.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let labels = Self::format_labels(pool_name, tags);
        let mut output = String::new();

        let gauges = [
            ("objectpool_objects_live", "Live objects, idle or checked out", metrics.live_objects.to_string()),
            ("objectpool_objects_idle", "Objects waiting in the idle queue", metrics.idle_objects.to_string()),
            ("objectpool_utilization", "Live objects relative to max_objects", format!("{:.2}", metrics.utilization)),
        ];
        for (name, help, value) in gauges {
            Self::push_sample(&mut output, name, help, "gauge", &labels, &value);
        }

        let counters = [
            ("objectpool_objects_created_total", "Objects created by the factory", metrics.created),
            ("objectpool_objects_destroyed_total", "Objects destroyed", metrics.destroyed),
            ("objectpool_creation_failures_total", "Failed factory calls", metrics.creation_failures),
            ("objectpool_destroy_failures_total", "Failed destroy hook calls", metrics.destroy_failures),
            ("objectpool_objects_acquired_total", "Successful acquisitions", metrics.acquired),
            ("objectpool_objects_released_total", "Objects released back", metrics.released),
            ("objectpool_exhausted_total", "Acquisitions that timed out", metrics.exhausted_events),
        ];
        for (name, help, value) in counters {
            Self::push_sample(&mut output, name, help, "counter", &labels, &value.to_string());
        }

        output
    }

    fn push_sample(output: &mut String, name: &str, help: &str, kind: &str, labels: &str, value: &str) {
        output.push_str(&format!("# HELP {name} {help}\n"));
        output.push_str(&format!("# TYPE {name} {kind}\n"));
        output.push_str(&format!("{name}{{{labels}}} {value}\n"));
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            let mut tags: Vec<_> = tags.iter().collect();
            tags.sort();
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal metrics tracker
#[derive(Debug, Default)]
pub(crate) struct MetricsTracker {
    pub created: AtomicU64,
    pub destroyed: AtomicU64,
    pub creation_failures: AtomicU64,
    pub destroy_failures: AtomicU64,
    pub acquired: AtomicU64,
    pub released: AtomicU64,
    pub exhausted_events: AtomicU64,
}

impl MetricsTracker {
    pub fn increment(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, live: usize, idle: usize, max_objects: usize) -> PoolMetrics {
        let utilization = if max_objects > 0 {
            live as f64 / max_objects as f64
        } else {
            0.0
        };

        PoolMetrics {
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            destroy_failures: self.destroy_failures.load(Ordering::Relaxed),
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            exhausted_events: self.exhausted_events.load(Ordering::Relaxed),
            live_objects: live,
            idle_objects: idle,
            max_objects,
            utilization,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_utilization() {
        let tracker = MetricsTracker::default();
        MetricsTracker::increment(&tracker.created);
        MetricsTracker::increment(&tracker.created);

        let metrics = tracker.snapshot(2, 1, 4);
        assert_eq!(metrics.created, 2);
        assert_eq!(metrics.utilization, 0.5);
        assert_eq!(metrics.export()["utilization"], "0.50");
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_prometheus_labels_sorted() {
        let metrics = MetricsTracker::default().snapshot(1, 1, 2);
        let mut tags = HashMap::new();
        tags.insert("zone".to_string(), "eu".to_string());
        tags.insert("app".to_string(), "api".to_string());

        let output = MetricsExporter::export_prometheus(&metrics, "db", Some(&tags));

        assert!(output.contains("# TYPE objectpool_objects_live gauge"));
        assert!(output.contains("objectpool_objects_live{pool=\"db\",app=\"api\",zone=\"eu\"} 1"));
        assert!(output.contains("objectpool_destroy_failures_total{pool=\"db\",app=\"api\",zone=\"eu\"} 0"));
    }
}
