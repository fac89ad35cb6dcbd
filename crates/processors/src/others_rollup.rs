// SPDX-License-Identifier: Apache-2.0

//! Others rollup.
//!
//! Folds the still-residual low-priority points into one synthetic aggregate
//! point per `(priority, metric_name, preserved-key values)` tuple. The
//! synthetic point carries `count`, `sum`, `min`, and `max` attributes, its
//! value is the sum, and its timestamp is the latest folded timestamp.
//!
//! Points the reservoir sampler selected (`phoenix.sampled`) pass through:
//! they were chosen to survive individually. Points the guardian marked with
//! `phoenix.cardinality_overflow` are folded regardless.
//!
//! Output cardinality is bounded by
//! `|priorities| x |metric names| x |preserved value product|`.

use crate::{OVERFLOW_ATTRIBUTE, SAMPLED_ATTRIBUTE};
use phoenix_config::{ConfigPatch, PatchValue, ProcessorId};
use phoenix_engine::base::{ParamSchema, UpdateableCore};
use phoenix_engine::error::{EngineError, PatchError};
use phoenix_engine::params::ParamSpec;
use phoenix_engine::processor::{ConfigStatus, MetricsProcessor, UpdateableProcessor};
use phoenix_pdata::{
    AttributeSet, InstrumentationScope, MetricBatch, MetricKind, MetricPoint, MetricValue,
    PriorityClass,
};
use phoenix_telemetry::{Counter, Gauge, MetricSample, MetricSet, SampleValue, TelemetryRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Processor type name.
pub const OTHERS_ROLLUP_KIND: &str = "others_rollup";

/// Scope name attached to synthetic aggregate points.
const ROLLUP_SCOPE: &str = "phoenix.others_rollup";

/// Static configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Attribute keys preserved on aggregates; all other attributes collapse.
    #[serde(default)]
    pub keys_to_preserve: Vec<String>,
}

struct Params {
    enabled: bool,
    keys_to_preserve: Vec<String>,
}

impl ParamSchema for Params {
    fn specs() -> &'static [(&'static str, ParamSpec)] {
        &[("keys_to_preserve", ParamSpec::LIST)]
    }

    fn apply(&mut self, path: &str, value: &PatchValue) -> Result<(), PatchError> {
        match path {
            "keys_to_preserve" => {
                let items = value.as_list().ok_or_else(|| PatchError::InvalidValue {
                    path: path.to_owned(),
                    details: "expected a list of attribute keys".to_owned(),
                })?;
                let keys = items
                    .iter()
                    .map(|v| {
                        v.as_str().map(str::to_owned).ok_or_else(|| {
                            PatchError::InvalidValue {
                                path: path.to_owned(),
                                details: "keys must be strings".to_owned(),
                            }
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                self.keys_to_preserve = keys;
                Ok(())
            }
            other => Err(PatchError::UnknownParameter {
                path: other.to_owned(),
            }),
        }
    }

    fn snapshot(&self) -> BTreeMap<String, PatchValue> {
        BTreeMap::from([(
            "keys_to_preserve".to_owned(),
            PatchValue::List(
                self.keys_to_preserve
                    .iter()
                    .map(|k| PatchValue::Str(k.clone()))
                    .collect(),
            ),
        )])
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

#[derive(Debug)]
struct Aggregate {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    latest_ts: u64,
    kind: MetricKind,
}

/// Metrics for the rollup stage.
#[derive(Default)]
pub struct RollupMetrics {
    /// Points folded into aggregates.
    pub folded_total: Counter,
    /// Synthetic aggregate points emitted.
    pub emitted_total: Counter,
    /// Points passed through unfolded.
    pub passthrough_total: Counter,
    /// Batches passed through while disabled.
    pub disabled_passthrough_total: Counter,
    /// 1 when the data path is enabled.
    pub enabled: Gauge,
}

impl MetricSet for RollupMetrics {
    fn name(&self) -> &str {
        OTHERS_ROLLUP_KIND
    }

    fn snapshot(&self) -> Vec<MetricSample> {
        vec![
            MetricSample::new(
                "rollup_folded_total",
                SampleValue::Counter(self.folded_total.get()),
            ),
            MetricSample::new(
                "rollup_emitted_total",
                SampleValue::Counter(self.emitted_total.get()),
            ),
            MetricSample::new(
                "rollup_passthrough_total",
                SampleValue::Counter(self.passthrough_total.get()),
            ),
            MetricSample::new(
                "rollup_disabled_passthrough_total",
                SampleValue::Counter(self.disabled_passthrough_total.get()),
            ),
            MetricSample::new("rollup_enabled", SampleValue::Gauge(self.enabled.get())),
        ]
    }
}

/// Folds low-priority residue into per-priority aggregates. See the module
/// docs.
pub struct OthersRollup {
    core: UpdateableCore<Params>,
    metrics: Arc<RollupMetrics>,
}

impl OthersRollup {
    /// Creates the rollup stage and registers its metric set.
    #[must_use]
    pub fn new(config: Config, registry: &TelemetryRegistry) -> Self {
        let metrics = Arc::new(RollupMetrics::default());
        metrics.enabled.set(1.0);
        registry.register(metrics.clone());
        Self {
            core: UpdateableCore::new(
                ProcessorId::named(OTHERS_ROLLUP_KIND),
                Params {
                    enabled: true,
                    keys_to_preserve: config.keys_to_preserve,
                },
            ),
            metrics,
        }
    }
}

impl MetricsProcessor for OthersRollup {
    fn id(&self) -> &ProcessorId {
        self.core.id()
    }

    fn consume_batch(&self, batch: MetricBatch) -> Result<MetricBatch, EngineError> {
        let params = self.core.read();
        if !params.enabled() {
            self.metrics.disabled_passthrough_total.inc();
            return Ok(batch);
        }

        let mut out = MetricBatch::new();
        // Key: (priority label, metric name, preserved key/value renderings).
        let mut aggregates: BTreeMap<(String, String, Vec<(String, String)>), Aggregate> =
            BTreeMap::new();

        for resource_group in batch.resources {
            let resource = resource_group.resource;
            let priority = PriorityClass::from_resource(&resource);
            for scope_group in resource_group.scopes {
                let scope = scope_group.scope;
                for point in scope_group.points {
                    let sampled = point.attributes.get(SAMPLED_ATTRIBUTE).is_some();
                    let forced = point.attributes.get(OVERFLOW_ATTRIBUTE).is_some();
                    let foldable = priority == Some(PriorityClass::Low) && (!sampled || forced);

                    if !foldable {
                        self.metrics.passthrough_total.inc();
                        out.push_point(resource.clone(), scope.clone(), point);
                        continue;
                    }

                    let preserved: Vec<(String, String)> = params
                        .keys_to_preserve
                        .iter()
                        .filter_map(|key| {
                            point
                                .attributes
                                .get(key)
                                .or_else(|| resource.get(key))
                                .map(|v| (key.clone(), v.to_string()))
                        })
                        .collect();
                    let key = (
                        PriorityClass::Low.as_str().to_owned(),
                        point.name.clone(),
                        preserved,
                    );

                    let value = point.value.as_f64();
                    let entry = aggregates.entry(key).or_insert(Aggregate {
                        count: 0,
                        sum: 0.0,
                        min: f64::INFINITY,
                        max: f64::NEG_INFINITY,
                        latest_ts: 0,
                        kind: point.kind,
                    });
                    entry.count += 1;
                    entry.sum += value;
                    entry.min = entry.min.min(value);
                    entry.max = entry.max.max(value);
                    entry.latest_ts = entry.latest_ts.max(point.timestamp_unix_nanos);
                    self.metrics.folded_total.inc();
                }
            }
        }

        for ((priority, metric_name, preserved), agg) in aggregates {
            let mut resource = AttributeSet::new();
            resource.upsert(phoenix_pdata::priority::PRIORITY_ATTRIBUTE, priority.as_str());

            let mut point = MetricPoint {
                name: metric_name,
                attributes: AttributeSet::new(),
                timestamp_unix_nanos: agg.latest_ts,
                value: MetricValue::Double(agg.sum),
                kind: agg.kind,
            };
            for (key, value) in preserved {
                point.attributes.upsert(&key, value);
            }
            point.attributes.upsert("count", agg.count as i64);
            point.attributes.upsert("sum", agg.sum);
            point.attributes.upsert("min", agg.min);
            point.attributes.upsert("max", agg.max);

            out.push_point(resource, InstrumentationScope::named(ROLLUP_SCOPE), point);
            self.metrics.emitted_total.inc();
        }

        Ok(out)
    }
}

impl UpdateableProcessor for OthersRollup {
    fn on_config_patch(&self, patch: &ConfigPatch) -> Result<(), PatchError> {
        let result = self.core.apply_patch(patch);
        if result.is_ok() {
            self.metrics
                .enabled
                .set(if self.core.read().enabled() { 1.0 } else { 0.0 });
        }
        result
    }

    fn get_config_status(&self) -> ConfigStatus {
        self.core.config_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_pdata::KeyValue;

    fn rollup(keys: &[&str]) -> OthersRollup {
        OthersRollup::new(
            Config {
                keys_to_preserve: keys.iter().map(|s| (*s).to_owned()).collect(),
            },
            &TelemetryRegistry::new(),
        )
    }

    fn low_point(name: &str, value: f64, ts: u64, user: &str) -> MetricBatch {
        let mut resource: AttributeSet = vec![KeyValue::new("pid", ts.to_string())].into();
        PriorityClass::Low.tag_resource(&mut resource);
        let mut batch = MetricBatch::new();
        batch.push_point(
            resource,
            InstrumentationScope::named("hostmetrics"),
            MetricPoint::gauge(name, value, ts).with_attr("user", user),
        );
        batch
    }

    #[test]
    fn folds_low_priority_into_one_aggregate() {
        let rollup = rollup(&[]);
        let mut batch = low_point("process.rss", 10.0, 1, "a");
        batch.merge(low_point("process.rss", 30.0, 2, "b"));

        let out = rollup.consume_batch(batch).expect("data path");
        assert_eq!(out.point_count(), 1);

        let (resource, _, point) = out.iter_points().next().expect("aggregate point");
        assert_eq!(point.name, "process.rss");
        assert_eq!(point.value.as_f64(), 40.0);
        assert_eq!(point.timestamp_unix_nanos, 2);
        assert_eq!(
            PriorityClass::from_resource(resource),
            Some(PriorityClass::Low)
        );
    }

    #[test]
    fn preserved_keys_split_aggregates() {
        let rollup = rollup(&["user"]);
        let mut batch = low_point("process.rss", 10.0, 1, "a");
        batch.merge(low_point("process.rss", 30.0, 2, "a"));
        batch.merge(low_point("process.rss", 5.0, 3, "b"));

        let out = rollup.consume_batch(batch).expect("data path");
        assert_eq!(out.point_count(), 2);
        assert_eq!(rollup.metrics.folded_total.get(), 3);
        assert_eq!(rollup.metrics.emitted_total.get(), 2);
    }

    #[test]
    fn sampled_points_pass_through() {
        let rollup = rollup(&[]);
        let mut batch = low_point("process.rss", 10.0, 1, "a");
        batch.resources[0].scopes[0].points[0]
            .attributes
            .upsert(SAMPLED_ATTRIBUTE, true);

        let out = rollup.consume_batch(batch).expect("data path");
        assert_eq!(out.point_count(), 1);
        assert_eq!(rollup.metrics.passthrough_total.get(), 1);
        assert_eq!(rollup.metrics.emitted_total.get(), 0);
    }

    #[test]
    fn normal_priority_passes_through() {
        let rollup = rollup(&[]);
        let mut resource: AttributeSet = vec![KeyValue::new("pid", "9")].into();
        PriorityClass::Normal.tag_resource(&mut resource);
        let mut batch = MetricBatch::new();
        batch.push_point(
            resource,
            InstrumentationScope::named("hostmetrics"),
            MetricPoint::gauge("process.rss", 1.0, 1),
        );

        let out = rollup.consume_batch(batch).expect("data path");
        assert_eq!(out.point_count(), 1);
        assert_eq!(rollup.metrics.emitted_total.get(), 0);
    }

    #[test]
    fn aggregate_attributes_carry_min_and_max() {
        let rollup = rollup(&[]);
        let mut batch = low_point("process.rss", 10.0, 1, "a");
        batch.merge(low_point("process.rss", 30.0, 2, "b"));

        let out = rollup.consume_batch(batch).expect("data path");
        let (_, _, point) = out.iter_points().next().expect("aggregate point");
        assert_eq!(
            point.attributes.get("min"),
            Some(&phoenix_pdata::AttributeValue::Double(10.0))
        );
        assert_eq!(
            point.attributes.get("max"),
            Some(&phoenix_pdata::AttributeValue::Double(30.0))
        );
        assert_eq!(
            point.attributes.get("count"),
            Some(&phoenix_pdata::AttributeValue::Int(2))
        );
    }
}
