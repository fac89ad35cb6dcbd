// SPDX-License-Identifier: Apache-2.0

//! Reservoir sampler.
//!
//! Uniform sampling (algorithm R) over the low-priority residue: every
//! eligible point has probability `reservoir_size / n` of surviving its
//! window, where `n` is the number of eligible points seen in that window.
//! Points of other priorities pass through untouched.
//!
//! Sampled points are held until the window expires (point-timestamp based),
//! then emitted with the `phoenix.sampled` marker so the rollup stage leaves
//! them alone. Shrinking `reservoir_size` truncates the held sample;
//! growing it keeps everything already held.

use crate::SAMPLED_ATTRIBUTE;
use parking_lot::Mutex;
use phoenix_config::{ConfigPatch, PatchValue, ProcessorId};
use phoenix_engine::base::{ParamSchema, UpdateableCore};
use phoenix_engine::error::{EngineError, PatchError};
use phoenix_engine::params::ParamSpec;
use phoenix_engine::processor::{ConfigStatus, MetricsProcessor, UpdateableProcessor};
use phoenix_pdata::{
    AttributeSet, InstrumentationScope, MetricBatch, MetricPoint, PriorityClass,
};
use phoenix_telemetry::{Counter, Gauge, MetricSample, MetricSet, SampleValue, TelemetryRegistry};
use rand::rngs::SmallRng;
use rand::{RngExt, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Processor type name.
pub const RESERVOIR_SAMPLER_KIND: &str = "reservoir_sampler";

/// Static configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Reservoir capacity.
    pub reservoir_size: usize,
    /// Window length in seconds.
    pub window_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reservoir_size: 100,
            window_seconds: 60,
        }
    }
}

struct Params {
    enabled: bool,
    reservoir_size: usize,
    window_seconds: u64,
}

impl ParamSchema for Params {
    fn specs() -> &'static [(&'static str, ParamSpec)] {
        const {
            &[
                ("reservoir_size", ParamSpec::int_range(1, 1_000_000)),
                ("window_seconds", ParamSpec::int_range(1, 86_400)),
            ]
        }
    }

    fn apply(&mut self, path: &str, value: &PatchValue) -> Result<(), PatchError> {
        let as_u64 = |v: &PatchValue| -> Result<u64, PatchError> {
            v.as_i64()
                .and_then(|i| u64::try_from(i).ok())
                .ok_or_else(|| PatchError::InvalidValue {
                    path: path.to_owned(),
                    details: "expected a positive integer".to_owned(),
                })
        };
        match path {
            "reservoir_size" => {
                self.reservoir_size = as_u64(value)? as usize;
                Ok(())
            }
            "window_seconds" => {
                self.window_seconds = as_u64(value)?;
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
                "reservoir_size".to_owned(),
                PatchValue::Int(self.reservoir_size as i64),
            ),
            (
                "window_seconds".to_owned(),
                PatchValue::Int(self.window_seconds as i64),
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

type HeldPoint = (AttributeSet, InstrumentationScope, MetricPoint);

struct State {
    reservoir: Vec<HeldPoint>,
    /// Eligible points seen in the current window.
    n_seen: u64,
    window_start_nanos: Option<u64>,
    rng: SmallRng,
}

/// Metrics for the sampler.
#[derive(Default)]
pub struct SamplerMetrics {
    /// Low-priority points considered for sampling.
    pub eligible_total: Counter,
    /// Points of other priorities passed through.
    pub passthrough_total: Counter,
    /// Points emitted from flushed reservoirs.
    pub sampled_out_total: Counter,
    /// Eligible points that did not survive sampling.
    pub discarded_total: Counter,
    /// Batches passed through while disabled.
    pub disabled_passthrough_total: Counter,
    /// Current reservoir occupancy.
    pub reservoir_fill: Gauge,
    /// 1 when the data path is enabled.
    pub enabled: Gauge,
}

impl MetricSet for SamplerMetrics {
    fn name(&self) -> &str {
        RESERVOIR_SAMPLER_KIND
    }

    fn snapshot(&self) -> Vec<MetricSample> {
        vec![
            MetricSample::new(
                "sampler_eligible_total",
                SampleValue::Counter(self.eligible_total.get()),
            ),
            MetricSample::new(
                "sampler_passthrough_total",
                SampleValue::Counter(self.passthrough_total.get()),
            ),
            MetricSample::new(
                "sampler_sampled_out_total",
                SampleValue::Counter(self.sampled_out_total.get()),
            ),
            MetricSample::new(
                "sampler_discarded_total",
                SampleValue::Counter(self.discarded_total.get()),
            ),
            MetricSample::new(
                "sampler_disabled_passthrough_total",
                SampleValue::Counter(self.disabled_passthrough_total.get()),
            ),
            MetricSample::new(
                "sampler_reservoir_fill",
                SampleValue::Gauge(self.reservoir_fill.get()),
            ),
            MetricSample::new("sampler_enabled", SampleValue::Gauge(self.enabled.get())),
        ]
    }
}

/// Uniform-samples the low-priority residue. See the module docs.
pub struct ReservoirSampler {
    core: UpdateableCore<Params>,
    state: Mutex<State>,
    metrics: Arc<SamplerMetrics>,
}

impl ReservoirSampler {
    /// Creates the sampler and registers its metric set.
    #[must_use]
    pub fn new(config: Config, registry: &TelemetryRegistry) -> Self {
        let metrics = Arc::new(SamplerMetrics::default());
        metrics.enabled.set(1.0);
        registry.register(metrics.clone());
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self {
            core: UpdateableCore::new(
                ProcessorId::named(RESERVOIR_SAMPLER_KIND),
                Params {
                    enabled: true,
                    reservoir_size: config.reservoir_size.max(1),
                    window_seconds: config.window_seconds.max(1),
                },
            ),
            state: Mutex::new(State {
                reservoir: Vec::new(),
                n_seen: 0,
                window_start_nanos: None,
                rng: SmallRng::seed_from_u64(seed),
            }),
            metrics,
        }
    }

    fn flush_into(&self, state: &mut State, out: &mut MetricBatch) {
        for (resource, scope, mut point) in state.reservoir.drain(..) {
            point.attributes.upsert(SAMPLED_ATTRIBUTE, true);
            out.push_point(resource, scope, point);
            self.metrics.sampled_out_total.inc();
        }
        state.n_seen = 0;
    }
}

impl MetricsProcessor for ReservoirSampler {
    fn id(&self) -> &ProcessorId {
        self.core.id()
    }

    fn consume_batch(&self, batch: MetricBatch) -> Result<MetricBatch, EngineError> {
        let params = self.core.read();
        if !params.enabled() {
            self.metrics.disabled_passthrough_total.inc();
            return Ok(batch);
        }

        let size = params.reservoir_size;
        let window_nanos = params.window_seconds * 1_000_000_000;
        let mut state = self.state.lock();

        // Patched size takes effect at the batch boundary; shrink by
        // truncation, grow by keeping everything already held.
        if state.reservoir.len() > size {
            let dropped = state.reservoir.len() - size;
            state.reservoir.truncate(size);
            self.metrics.discarded_total.add(dropped as u64);
        }

        let mut out = MetricBatch::new();
        for resource_group in batch.resources {
            let resource = resource_group.resource;
            let eligible =
                PriorityClass::from_resource(&resource) == Some(PriorityClass::Low);
            for scope_group in resource_group.scopes {
                let scope = scope_group.scope;
                for point in scope_group.points {
                    let ts = point.timestamp_unix_nanos;

                    match state.window_start_nanos {
                        None => state.window_start_nanos = Some(ts),
                        Some(start) if ts.saturating_sub(start) >= window_nanos => {
                            self.flush_into(&mut state, &mut out);
                            state.window_start_nanos = Some(ts);
                        }
                        Some(_) => {}
                    }

                    if !eligible {
                        self.metrics.passthrough_total.inc();
                        out.push_point(resource.clone(), scope.clone(), point);
                        continue;
                    }

                    self.metrics.eligible_total.inc();
                    state.n_seen += 1;
                    if state.reservoir.len() < size {
                        state
                            .reservoir
                            .push((resource.clone(), scope.clone(), point));
                    } else {
                        let n_seen = state.n_seen;
                        let j = state.rng.random_range(0..n_seen) as usize;
                        if j < size {
                            state.reservoir[j] = (resource.clone(), scope.clone(), point);
                        }
                        self.metrics.discarded_total.inc();
                    }
                }
            }
        }

        self.metrics.reservoir_fill.set(state.reservoir.len() as f64);
        Ok(out)
    }

    fn shutdown(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        let held = state.reservoir.len();
        if held > 0 {
            // The downstream stages are already stopping; the held sample
            // cannot be delivered and is accounted as discarded.
            tracing::info!(held, "reservoir drained on shutdown");
            self.metrics.discarded_total.add(held as u64);
            state.reservoir.clear();
        }
        Ok(())
    }
}

impl UpdateableProcessor for ReservoirSampler {
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
