// SPDX-License-Identifier: Apache-2.0

//! Process-wide registry of metric sets.

use crate::METRIC_PREFIX;
use parking_lot::Mutex;
use std::sync::Arc;

/// A sampled instrument value.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    /// Monotonic counter value.
    Counter(u64),
    /// Gauge value.
    Gauge(f64),
    /// Histogram state: per-bucket `(upper_bound, count)`, total sum and
    /// count.
    Histogram {
        /// Per-bucket upper bound and count.
        buckets: Vec<(f64, u64)>,
        /// Sum of observations.
        sum: f64,
        /// Number of observations.
        count: u64,
    },
}

/// One collected sample.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    /// Full metric name, including the `phoenix_` prefix.
    pub name: String,
    /// Sampled value.
    pub value: SampleValue,
}

impl MetricSample {
    /// Creates a sample, prefixing `name` with the catalog prefix.
    #[must_use]
    pub fn new(name: &str, value: SampleValue) -> Self {
        Self {
            name: format!("{METRIC_PREFIX}{name}"),
            value,
        }
    }
}

/// A component-owned group of instruments that can be sampled together.
pub trait MetricSet: Send + Sync {
    /// Stable name of this set (diagnostic only, not part of sample names).
    fn name(&self) -> &str;

    /// Produces a point-in-time sample of every instrument in the set.
    fn snapshot(&self) -> Vec<MetricSample>;
}

/// Process-wide registry of metric sets.
///
/// Cloning the registry clones a handle; all clones share the same set list.
#[derive(Clone, Default)]
pub struct TelemetryRegistry {
    sets: Arc<Mutex<Vec<Arc<dyn MetricSet>>>>,
}

impl TelemetryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a metric set. Registration is append-only; sets live as long
    /// as the registry.
    pub fn register(&self, set: Arc<dyn MetricSet>) {
        self.sets.lock().push(set);
    }

    /// Collects a snapshot of every registered set.
    #[must_use]
    pub fn collect(&self) -> Vec<MetricSample> {
        self.sets
            .lock()
            .iter()
            .flat_map(|set| set.snapshot())
            .collect()
    }

    /// Returns the sampled value for a full metric name, if present.
    #[must_use]
    pub fn find(&self, full_name: &str) -> Option<SampleValue> {
        self.collect()
            .into_iter()
            .find(|s| s.name == full_name)
            .map(|s| s.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::Counter;

    struct TestSet {
        processed: Counter,
    }

    impl MetricSet for TestSet {
        fn name(&self) -> &str {
            "test"
        }

        fn snapshot(&self) -> Vec<MetricSample> {
            vec![MetricSample::new(
                "test_processed_total",
                SampleValue::Counter(self.processed.get()),
            )]
        }
    }

    #[test]
    fn register_and_collect() {
        let registry = TelemetryRegistry::new();
        let set = Arc::new(TestSet {
            processed: Counter::default(),
        });
        registry.register(set.clone());

        set.processed.add(3);
        assert_eq!(
            registry.find("phoenix_test_processed_total"),
            Some(SampleValue::Counter(3))
        );
    }
}
