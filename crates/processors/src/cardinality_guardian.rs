// SPDX-License-Identifier: Apache-2.0

//! Cardinality guardian.
//!
//! Bounds the number of unique series admitted per rolling window. The
//! guardian keeps a fingerprint-to-first-seen map of at most `max_unique`
//! entries; series beyond the cap are handled by the configured overflow
//! policy:
//!
//! - `drop`: the point is removed from the stream.
//! - `demote_to_low` (default): the point's resource is re-tagged
//!   `process.priority=low`, which routes it into the sampler/rollup residue
//!   path downstream.
//! - `rollup`: like `demote_to_low`, plus the point is marked so the rollup
//!   stage folds it even if it was sampled.
//!
//! The window is keyed on point timestamps. On a window boundary the map is
//! cleared. Raising `max_unique` mid-window takes effect immediately; the
//! current window's count is not reset.

use crate::OVERFLOW_ATTRIBUTE;
use parking_lot::Mutex;
use phoenix_config::{ConfigPatch, PatchValue, ProcessorId};
use phoenix_engine::base::{ParamSchema, UpdateableCore};
use phoenix_engine::error::{EngineError, PatchError};
use phoenix_engine::params::ParamSpec;
use phoenix_engine::processor::{ConfigStatus, MetricsProcessor, UpdateableProcessor};
use phoenix_pdata::{MetricBatch, PriorityClass, series_fingerprint2};
use phoenix_telemetry::{Counter, Gauge, MetricSample, MetricSet, SampleValue, TelemetryRegistry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Processor type name.
pub const CARDINALITY_GUARDIAN_KIND: &str = "cardinality_guardian";

/// What happens to series beyond `max_unique`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Remove the point.
    Drop,
    /// Re-tag the point's resource to low priority.
    #[default]
    DemoteToLow,
    /// Demote and force the rollup stage to fold the point.
    Rollup,
}

impl OverflowPolicy {
    const fn as_str(&self) -> &'static str {
        match self {
            OverflowPolicy::Drop => "drop",
            OverflowPolicy::DemoteToLow => "demote_to_low",
            OverflowPolicy::Rollup => "rollup",
        }
    }

    fn parse(label: &str) -> Option<Self> {
        match label {
            "drop" => Some(OverflowPolicy::Drop),
            "demote_to_low" => Some(OverflowPolicy::DemoteToLow),
            "rollup" => Some(OverflowPolicy::Rollup),
            _ => None,
        }
    }
}

/// Static configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Maximum unique series admitted per window.
    pub max_unique: usize,
    /// Window length in seconds.
    pub window_seconds: u64,
    /// Overflow handling.
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_unique: 1000,
            window_seconds: 60,
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

struct Params {
    enabled: bool,
    max_unique: usize,
    window_seconds: u64,
    overflow_policy: OverflowPolicy,
}

impl ParamSchema for Params {
    fn specs() -> &'static [(&'static str, ParamSpec)] {
        const {
            &[
                ("max_unique", ParamSpec::int_range(1, 10_000_000)),
                ("window_seconds", ParamSpec::int_range(1, 86_400)),
                (
                    "overflow_policy",
                    ParamSpec::one_of(&["drop", "demote_to_low", "rollup"]),
                ),
            ]
        }
    }

    fn apply(&mut self, path: &str, value: &PatchValue) -> Result<(), PatchError> {
        match path {
            "max_unique" => {
                self.max_unique = value
                    .as_i64()
                    .and_then(|i| usize::try_from(i).ok())
                    .ok_or_else(|| PatchError::InvalidValue {
                        path: path.to_owned(),
                        details: "expected a positive integer".to_owned(),
                    })?;
                Ok(())
            }
            "window_seconds" => {
                self.window_seconds = value
                    .as_i64()
                    .and_then(|i| u64::try_from(i).ok())
                    .ok_or_else(|| PatchError::InvalidValue {
                        path: path.to_owned(),
                        details: "expected a positive integer".to_owned(),
                    })?;
                Ok(())
            }
            "overflow_policy" => {
                let label = value.as_str().ok_or_else(|| PatchError::InvalidValue {
                    path: path.to_owned(),
                    details: "expected a policy label".to_owned(),
                })?;
                self.overflow_policy =
                    OverflowPolicy::parse(label).ok_or_else(|| PatchError::InvalidValue {
                        path: path.to_owned(),
                        details: format!("unknown overflow policy {label:?}"),
                    })?;
                Ok(())
            }
            other => Err(PatchError::UnknownParameter {
                path: other.to_owned(),
            }),
        }
    }

    fn snapshot(&self) -> BTreeMap<String, PatchValue> {
        BTreeMap::from([
            (
                "max_unique".to_owned(),
                PatchValue::Int(self.max_unique as i64),
            ),
            (
                "window_seconds".to_owned(),
                PatchValue::Int(self.window_seconds as i64),
            ),
            (
                "overflow_policy".to_owned(),
                PatchValue::Str(self.overflow_policy.as_str().to_owned()),
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
    /// Fingerprint to first-seen timestamp, cleared each window.
    seen: HashMap<u64, u64>,
    window_start_nanos: Option<u64>,
}

/// Metrics for the guardian.
#[derive(Default)]
pub struct GuardianMetrics {
    /// Points seen.
    pub seen_total: Counter,
    /// Points admitted inside the cap.
    pub admitted_total: Counter,
    /// Points beyond the cap.
    pub overflowed_total: Counter,
    /// Points dropped by the `drop` policy.
    pub dropped_total: Counter,
    /// Batches passed through while disabled.
    pub disabled_passthrough_total: Counter,
    /// Unique series in the current window.
    pub unique_current: Gauge,
    /// 1 when the data path is enabled.
    pub enabled: Gauge,
}

impl MetricSet for GuardianMetrics {
    fn name(&self) -> &str {
        CARDINALITY_GUARDIAN_KIND
    }

    fn snapshot(&self) -> Vec<MetricSample> {
        vec![
            MetricSample::new(
                "guardian_seen_total",
                SampleValue::Counter(self.seen_total.get()),
            ),
            MetricSample::new(
                "guardian_admitted_total",
                SampleValue::Counter(self.admitted_total.get()),
            ),
            MetricSample::new(
                "guardian_overflowed_total",
                SampleValue::Counter(self.overflowed_total.get()),
            ),
            MetricSample::new(
                "guardian_dropped_total",
                SampleValue::Counter(self.dropped_total.get()),
            ),
            MetricSample::new(
                "guardian_disabled_passthrough_total",
                SampleValue::Counter(self.disabled_passthrough_total.get()),
            ),
            MetricSample::new(
                "guardian_unique_current",
                SampleValue::Gauge(self.unique_current.get()),
            ),
            MetricSample::new("guardian_enabled", SampleValue::Gauge(self.enabled.get())),
        ]
    }
}

/// Caps unique series per rolling window. See the module docs.
pub struct CardinalityGuardian {
    core: UpdateableCore<Params>,
    state: Mutex<State>,
    metrics: Arc<GuardianMetrics>,
}

impl CardinalityGuardian {
    /// Creates the guardian and registers its metric set.
    #[must_use]
    pub fn new(config: Config, registry: &TelemetryRegistry) -> Self {
        let metrics = Arc::new(GuardianMetrics::default());
        metrics.enabled.set(1.0);
        registry.register(metrics.clone());
        Self {
            core: UpdateableCore::new(
                ProcessorId::named(CARDINALITY_GUARDIAN_KIND),
                Params {
                    enabled: true,
                    max_unique: config.max_unique.max(1),
                    window_seconds: config.window_seconds.max(1),
                    overflow_policy: config.overflow_policy,
                },
            ),
            state: Mutex::new(State {
                seen: HashMap::new(),
                window_start_nanos: None,
            }),
            metrics,
        }
    }
}

impl MetricsProcessor for CardinalityGuardian {
    fn id(&self) -> &ProcessorId {
        self.core.id()
    }

    fn consume_batch(&self, batch: MetricBatch) -> Result<MetricBatch, EngineError> {
        let params = self.core.read();
        if !params.enabled() {
            self.metrics.disabled_passthrough_total.inc();
            return Ok(batch);
        }

        let window_nanos = params.window_seconds * 1_000_000_000;
        let mut state = self.state.lock();

        let mut out = MetricBatch::new();
        for resource_group in batch.resources {
            let resource = resource_group.resource;
            for scope_group in resource_group.scopes {
                let scope = scope_group.scope;
                for mut point in scope_group.points {
                    self.metrics.seen_total.inc();
                    let ts = point.timestamp_unix_nanos;

                    // Window boundary: clear the map.
                    match state.window_start_nanos {
                        None => state.window_start_nanos = Some(ts),
                        Some(start) if ts.saturating_sub(start) >= window_nanos => {
                            state.seen.clear();
                            state.window_start_nanos = Some(ts);
                        }
                        Some(_) => {}
                    }

                    let fp = series_fingerprint2(&point.name, &resource, &point.attributes, None);
                    let admitted = if state.seen.contains_key(&fp) {
                        true
                    } else if state.seen.len() < params.max_unique {
                        let _ = state.seen.insert(fp, ts);
                        true
                    } else {
                        false
                    };

                    if admitted {
                        self.metrics.admitted_total.inc();
                        out.push_point(resource.clone(), scope.clone(), point);
                    } else {
                        self.metrics.overflowed_total.inc();
                        match params.overflow_policy {
                            OverflowPolicy::Drop => {
                                self.metrics.dropped_total.inc();
                            }
                            OverflowPolicy::DemoteToLow => {
                                let mut demoted = resource.clone();
                                PriorityClass::Low.tag_resource(&mut demoted);
                                out.push_point(demoted, scope.clone(), point);
                            }
                            OverflowPolicy::Rollup => {
                                let mut demoted = resource.clone();
                                PriorityClass::Low.tag_resource(&mut demoted);
                                point.attributes.upsert(OVERFLOW_ATTRIBUTE, true);
                                out.push_point(demoted, scope.clone(), point);
                            }
                        }
                    }
                }
            }
        }

        self.metrics.unique_current.set(state.seen.len() as f64);
        Ok(out)
    }
}

impl UpdateableProcessor for CardinalityGuardian {
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
