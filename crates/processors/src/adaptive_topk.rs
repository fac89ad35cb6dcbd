// SPDX-License-Identifier: Apache-2.0

//! Adaptive Top-K processor.
//!
//! Keeps the K series with the largest aggregated weight, approximately,
//! using a Space-Saving sketch keyed by series fingerprint with weight equal
//! to the metric value. Points of retained series pass unchanged; everything
//! else is forwarded to the residue stream tagged `topk_retained=false` for
//! the sampler and rollup stages.
//!
//! The retained set is refreshed from the sketch at rolling-window
//! boundaries rather than per point, which is what makes K changes safe:
//! when K grows, the next highest sketch counters are admitted immediately;
//! when K shrinks, eviction waits for the next window boundary so the gate
//! does not oscillate.
//!
//! KPIs emitted per window: `topk_coverage` (retained weight over observed
//! weight) and `topk_error_bound` (max sketch counter error over total
//! weight).

use crate::TOPK_RETAINED_ATTRIBUTE;
use crate::space_saving::SpaceSaving;
use parking_lot::Mutex;
use phoenix_config::{ConfigPatch, PatchValue, ProcessorId};
use phoenix_engine::base::{ParamSchema, UpdateableCore};
use phoenix_engine::error::{EngineError, PatchError};
use phoenix_engine::params::ParamSpec;
use phoenix_engine::processor::{ConfigStatus, MetricsProcessor, UpdateableProcessor};
use phoenix_pdata::{MetricBatch, series_fingerprint2};
use phoenix_telemetry::{Counter, Gauge, MetricSample, MetricSet, SampleValue, TelemetryRegistry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Processor type name.
pub const ADAPTIVE_TOPK_KIND: &str = "adaptive_topk";

/// Length of the KPI / eviction window in nanoseconds.
const WINDOW_NANOS: u64 = 60 * 1_000_000_000;

/// Static configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of series to retain.
    pub k_value: usize,
    /// Lower clamp for `k_value`.
    pub k_min: usize,
    /// Upper clamp for `k_value`.
    pub k_max: usize,
    /// Sketch capacity; must be at least `k_value`.
    pub sketch_capacity: usize,
    /// Attribute keys forming the series identity; empty means all.
    #[serde(default)]
    pub fingerprint_keys: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            k_value: 20,
            k_min: 5,
            k_max: 500,
            sketch_capacity: 1000,
            fingerprint_keys: Vec::new(),
        }
    }
}

struct Params {
    enabled: bool,
    k_value: usize,
    k_min: usize,
    k_max: usize,
    sketch_capacity: usize,
    fingerprint_keys: Vec<String>,
}

impl Params {
    fn from_config(config: Config) -> Self {
        Self {
            enabled: true,
            k_value: config.k_value.clamp(config.k_min, config.k_max),
            k_min: config.k_min,
            k_max: config.k_max,
            sketch_capacity: config.sketch_capacity.max(config.k_value),
            fingerprint_keys: config.fingerprint_keys,
        }
    }

    fn keys(&self) -> Option<&[String]> {
        if self.fingerprint_keys.is_empty() {
            None
        } else {
            Some(&self.fingerprint_keys)
        }
    }
}

impl ParamSchema for Params {
    fn specs() -> &'static [(&'static str, ParamSpec)] {
        const {
            &[
            ("k_value", ParamSpec::int_range(1, i64::MAX)),
            ("k_min", ParamSpec::int_range(1, i64::MAX)),
            ("k_max", ParamSpec::int_range(1, i64::MAX)),
            ("sketch_capacity", ParamSpec::int_range(1, 1_000_000)),
            ("fingerprint_keys", ParamSpec::LIST),
            ]
        }
    }

    fn apply(&mut self, path: &str, value: &PatchValue) -> Result<(), PatchError> {
        let as_usize = |v: &PatchValue| -> Result<usize, PatchError> {
            v.as_i64()
                .and_then(|i| usize::try_from(i).ok())
                .ok_or_else(|| PatchError::InvalidValue {
                    path: path.to_owned(),
                    details: "expected a non-negative integer".to_owned(),
                })
        };
        match path {
            "k_value" => {
                let k = as_usize(value)?;
                if k == 0 || k > self.k_max {
                    return Err(PatchError::InvalidValue {
                        path: path.to_owned(),
                        details: format!("k {k} outside (0, {}]", self.k_max),
                    });
                }
                self.k_value = k.max(self.k_min);
                Ok(())
            }
            "k_min" => {
                let k = as_usize(value)?;
                if k == 0 || k > self.k_max {
                    return Err(PatchError::InvalidValue {
                        path: path.to_owned(),
                        details: format!("k_min {k} outside (0, k_max]"),
                    });
                }
                self.k_min = k;
                self.k_value = self.k_value.max(k);
                Ok(())
            }
            "k_max" => {
                let k = as_usize(value)?;
                if k < self.k_min {
                    return Err(PatchError::InvalidValue {
                        path: path.to_owned(),
                        details: format!("k_max {k} below k_min {}", self.k_min),
                    });
                }
                self.k_max = k;
                self.k_value = self.k_value.min(k);
                Ok(())
            }
            "sketch_capacity" => {
                let capacity = as_usize(value)?;
                if capacity < self.k_value {
                    return Err(PatchError::InvalidValue {
                        path: path.to_owned(),
                        details: format!("capacity {capacity} below k_value {}", self.k_value),
                    });
                }
                self.sketch_capacity = capacity;
                Ok(())
            }
            "fingerprint_keys" => {
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
                self.fingerprint_keys = keys;
                Ok(())
            }
            other => Err(PatchError::UnknownParameter {
                path: other.to_owned(),
            }),
        }
    }

    fn snapshot(&self) -> BTreeMap<String, PatchValue> {
        BTreeMap::from([
            ("k_value".to_owned(), PatchValue::Int(self.k_value as i64)),
            ("k_min".to_owned(), PatchValue::Int(self.k_min as i64)),
            ("k_max".to_owned(), PatchValue::Int(self.k_max as i64)),
            (
                "sketch_capacity".to_owned(),
                PatchValue::Int(self.sketch_capacity as i64),
            ),
            (
                "fingerprint_keys".to_owned(),
                PatchValue::List(
                    self.fingerprint_keys
                        .iter()
                        .map(|k| PatchValue::Str(k.clone()))
                        .collect(),
                ),
            ),
        ])
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

struct State {
    sketch: SpaceSaving,
    retained: HashSet<u64>,
    last_k: usize,
    window_start_nanos: Option<u64>,
    window_observed: f64,
    window_retained: f64,
}

impl State {
    fn new(capacity: usize, k: usize) -> Self {
        Self {
            sketch: SpaceSaving::new(capacity),
            retained: HashSet::with_capacity(k),
            last_k: k,
            window_start_nanos: None,
            window_observed: 0.0,
            window_retained: 0.0,
        }
    }

    /// Reconciles sketch capacity and K against the parameter block at a
    /// batch boundary.
    fn reconcile(&mut self, params: &Params) {
        if self.sketch.capacity() != params.sketch_capacity {
            self.sketch.resize(params.sketch_capacity);
            self.retained = self
                .sketch
                .top(params.k_value)
                .into_iter()
                .map(|(key, _)| key)
                .collect();
        }
        if params.k_value > self.last_k {
            // Admit the next highest counters immediately.
            for (key, _) in self.sketch.top(params.k_value) {
                let _ = self.retained.insert(key);
            }
        }
        // A K decrease is deliberately left to the window boundary.
        self.last_k = params.k_value;
    }

    fn roll_window(&mut self, now_nanos: u64, k: usize) -> bool {
        match self.window_start_nanos {
            None => {
                self.window_start_nanos = Some(now_nanos);
                false
            }
            Some(start) if now_nanos.saturating_sub(start) >= WINDOW_NANOS => {
                self.retained = self
                    .sketch
                    .top(k)
                    .into_iter()
                    .map(|(key, _)| key)
                    .collect();
                self.window_start_nanos = Some(now_nanos);
                self.window_observed = 0.0;
                self.window_retained = 0.0;
                true
            }
            Some(_) => false,
        }
    }
}

/// Metrics for the Top-K processor.
#[derive(Default)]
pub struct TopKMetrics {
    /// Points seen.
    pub processed_total: Counter,
    /// Points retained by the gate.
    pub retained_total: Counter,
    /// Points forwarded to the residue stream.
    pub residue_total: Counter,
    /// Batches passed through while disabled.
    pub disabled_passthrough_total: Counter,
    /// Rolling-window coverage ratio.
    pub coverage: Gauge,
    /// Max sketch counter error over observed weight.
    pub error_bound: Gauge,
    /// Current K.
    pub current_k: Gauge,
    /// 1 when the data path is enabled.
    pub enabled: Gauge,
}

impl MetricSet for TopKMetrics {
    fn name(&self) -> &str {
        ADAPTIVE_TOPK_KIND
    }

    fn snapshot(&self) -> Vec<MetricSample> {
        vec![
            MetricSample::new(
                "topk_processed_total",
                SampleValue::Counter(self.processed_total.get()),
            ),
            MetricSample::new(
                "topk_retained_total",
                SampleValue::Counter(self.retained_total.get()),
            ),
            MetricSample::new(
                "topk_residue_total",
                SampleValue::Counter(self.residue_total.get()),
            ),
            MetricSample::new(
                "topk_disabled_passthrough_total",
                SampleValue::Counter(self.disabled_passthrough_total.get()),
            ),
            MetricSample::new("topk_coverage", SampleValue::Gauge(self.coverage.get())),
            MetricSample::new(
                "topk_error_bound",
                SampleValue::Gauge(self.error_bound.get()),
            ),
            MetricSample::new("topk_current_k", SampleValue::Gauge(self.current_k.get())),
            MetricSample::new("topk_enabled", SampleValue::Gauge(self.enabled.get())),
        ]
    }
}

/// Retains the K highest-weight series. See the module docs.
pub struct AdaptiveTopK {
    core: UpdateableCore<Params>,
    state: Mutex<State>,
    metrics: Arc<TopKMetrics>,
}

impl AdaptiveTopK {
    /// Creates the processor and registers its metric set.
    #[must_use]
    pub fn new(config: Config, registry: &TelemetryRegistry) -> Self {
        let params = Params::from_config(config);
        let state = State::new(params.sketch_capacity, params.k_value);
        let metrics = Arc::new(TopKMetrics::default());
        metrics.enabled.set(1.0);
        metrics.current_k.set(params.k_value as f64);
        registry.register(metrics.clone());
        Self {
            core: UpdateableCore::new(ProcessorId::named(ADAPTIVE_TOPK_KIND), params),
            state: Mutex::new(state),
            metrics,
        }
    }
}

impl MetricsProcessor for AdaptiveTopK {
    fn id(&self) -> &ProcessorId {
        self.core.id()
    }

    fn consume_batch(&self, batch: MetricBatch) -> Result<MetricBatch, EngineError> {
        let params = self.core.read();
        if !params.enabled() {
            self.metrics.disabled_passthrough_total.inc();
            return Ok(batch);
        }

        let k = params.k_value;
        let keys = params.keys();
        let mut state = self.state.lock();
        state.reconcile(&params);

        let mut out = MetricBatch::new();
        let mut max_ts = 0u64;
        for resource_group in batch.resources {
            let resource = resource_group.resource;
            for scope_group in resource_group.scopes {
                let scope = scope_group.scope;
                for mut point in scope_group.points {
                    self.metrics.processed_total.inc();
                    max_ts = max_ts.max(point.timestamp_unix_nanos);

                    let fp =
                        series_fingerprint2(&point.name, &resource, &point.attributes, keys);
                    let weight = {
                        let w = point.value.as_f64().abs();
                        if w.is_finite() { w } else { 0.0 }
                    };
                    let _ = state.sketch.update(fp, weight);
                    state.window_observed += weight;

                    let retained = if state.retained.contains(&fp) {
                        true
                    } else if state.retained.len() < k {
                        let _ = state.retained.insert(fp);
                        true
                    } else {
                        false
                    };

                    if retained {
                        state.window_retained += weight;
                        self.metrics.retained_total.inc();
                    } else {
                        point.attributes.upsert(TOPK_RETAINED_ATTRIBUTE, false);
                        self.metrics.residue_total.inc();
                    }
                    out.push_point(resource.clone(), scope.clone(), point);
                }
            }
        }

        if state.window_observed > 0.0 {
            self.metrics
                .coverage
                .set(state.window_retained / state.window_observed);
        }
        if state.sketch.observed_weight() > 0.0 {
            self.metrics
                .error_bound
                .set(state.sketch.max_error() / state.sketch.observed_weight());
        }
        let _ = state.roll_window(max_ts, k);
        self.metrics.current_k.set(k as f64);

        Ok(out)
    }
}

impl UpdateableProcessor for AdaptiveTopK {
    fn on_config_patch(&self, patch: &ConfigPatch) -> Result<(), PatchError> {
        let result = self.core.apply_patch(patch);
        if result.is_ok() {
            let params = self.core.read();
            self.metrics
                .enabled
                .set(if params.enabled() { 1.0 } else { 0.0 });
            self.metrics.current_k.set(params.k_value as f64);
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
    use phoenix_config::PatchSource;
    use phoenix_pdata::{AttributeSet, InstrumentationScope, KeyValue, MetricPoint};

    fn processor(k: usize) -> AdaptiveTopK {
        AdaptiveTopK::new(
            Config {
                k_value: k,
                k_min: 1,
                k_max: 100,
                sketch_capacity: 100,
                fingerprint_keys: Vec::new(),
            },
            &TelemetryRegistry::new(),
        )
    }

    fn batch_of(series: &[(&str, f64)]) -> MetricBatch {
        let mut batch = MetricBatch::new();
        for (pid, weight) in series {
            let resource: AttributeSet = vec![KeyValue::new("pid", *pid)].into();
            batch.push_point(
                resource,
                InstrumentationScope::named("hostmetrics"),
                MetricPoint::sum("process.cpu.time", *weight, 1),
            );
        }
        batch
    }

    fn residue_count(batch: &MetricBatch) -> usize {
        batch
            .iter_points()
            .filter(|(_, _, p)| p.attributes.get(TOPK_RETAINED_ATTRIBUTE).is_some())
            .count()
    }

    #[test]
    fn light_series_go_to_residue_once_k_is_full() {
        let topk = processor(2);
        let out = topk
            .consume_batch(batch_of(&[("1", 100.0), ("2", 50.0), ("3", 1.0)]))
            .expect("data path");

        assert_eq!(out.point_count(), 3);
        assert_eq!(residue_count(&out), 1);
    }

    #[test]
    fn patch_k_value_and_read_back() {
        let topk = processor(2);
        let patch = ConfigPatch::new(
            "p-1",
            ProcessorId::named(ADAPTIVE_TOPK_KIND),
            "k_value",
            40i64,
            PatchSource::PidDecider,
        );
        topk.on_config_patch(&patch).expect("accepted");
        assert_eq!(
            topk.get_config_status().get("k_value"),
            Some(PatchValue::Int(40))
        );
    }

    #[test]
    fn k_outside_bounds_is_rejected() {
        let topk = processor(2);
        for bad in [0i64, 101] {
            let patch = ConfigPatch::new(
                "p-1",
                ProcessorId::named(ADAPTIVE_TOPK_KIND),
                "k_value",
                bad,
                PatchSource::PidDecider,
            );
            assert!(topk.on_config_patch(&patch).is_err(), "k={bad}");
        }
        assert_eq!(
            topk.get_config_status().get("k_value"),
            Some(PatchValue::Int(2))
        );
    }

    #[test]
    fn k_below_min_clamps_up() {
        let topk = AdaptiveTopK::new(
            Config {
                k_value: 20,
                k_min: 10,
                k_max: 100,
                sketch_capacity: 100,
                fingerprint_keys: Vec::new(),
            },
            &TelemetryRegistry::new(),
        );
        let patch = ConfigPatch::new(
            "p-1",
            ProcessorId::named(ADAPTIVE_TOPK_KIND),
            "k_value",
            3i64,
            PatchSource::PidDecider,
        );
        topk.on_config_patch(&patch).expect("clamped, not rejected");
        assert_eq!(
            topk.get_config_status().get("k_value"),
            Some(PatchValue::Int(10))
        );
    }

    #[test]
    fn k_increase_admits_next_counters_immediately() {
        let topk = processor(1);
        let _ = topk
            .consume_batch(batch_of(&[("1", 100.0), ("2", 50.0)]))
            .expect("data path");

        let patch = ConfigPatch::new(
            "p-1",
            ProcessorId::named(ADAPTIVE_TOPK_KIND),
            "k_value",
            2i64,
            PatchSource::PidDecider,
        );
        topk.on_config_patch(&patch).expect("accepted");

        let out = topk
            .consume_batch(batch_of(&[("2", 1.0)]))
            .expect("data path");
        assert_eq!(residue_count(&out), 0, "series 2 admitted after K grew");
    }

    #[test]
    fn coverage_tracks_heavy_hitters() {
        let topk = processor(2);
        for _ in 0..10 {
            let _ = topk
                .consume_batch(batch_of(&[("1", 100.0), ("2", 50.0), ("3", 1.0)]))
                .expect("data path");
        }
        let coverage = topk.metrics.coverage.get();
        assert!(coverage > 0.9, "coverage {coverage}");
    }

    #[test]
    fn disabled_is_passthrough() {
        let topk = processor(1);
        let off = ConfigPatch::new(
            "p-1",
            ProcessorId::named(ADAPTIVE_TOPK_KIND),
            "enabled",
            false,
            PatchSource::Manual,
        );
        topk.on_config_patch(&off).expect("accepted");
        let out = topk
            .consume_batch(batch_of(&[("1", 1.0), ("2", 1.0)]))
            .expect("data path");
        assert_eq!(residue_count(&out), 0);
        assert_eq!(topk.metrics.disabled_passthrough_total.get(), 1);
    }
}
