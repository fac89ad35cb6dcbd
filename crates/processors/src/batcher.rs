// SPDX-License-Identifier: Apache-2.0

//! Batcher.
//!
//! Accumulates outgoing points and releases them once `send_batch_size`
//! points are buffered or `timeout_ms` has elapsed since the first buffered
//! point, whichever comes first. Sits last in the chain so the exporter sees
//! fewer, larger batches.

use parking_lot::Mutex;
use phoenix_config::{ConfigPatch, PatchValue, ProcessorId};
use phoenix_engine::base::{ParamSchema, UpdateableCore};
use phoenix_engine::error::{EngineError, PatchError};
use phoenix_engine::params::ParamSpec;
use phoenix_engine::processor::{ConfigStatus, MetricsProcessor, UpdateableProcessor};
use phoenix_pdata::MetricBatch;
use phoenix_telemetry::{Counter, Gauge, MetricSample, MetricSet, SampleValue, TelemetryRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Processor type name.
pub const BATCHER_KIND: &str = "batcher";

/// Static configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Point count that releases the buffer.
    pub send_batch_size: usize,
    /// Maximum buffering delay in milliseconds.
    pub timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            send_batch_size: 512,
            timeout_ms: 5000,
        }
    }
}

struct Params {
    enabled: bool,
    send_batch_size: usize,
    timeout_ms: u64,
}

impl ParamSchema for Params {
    fn specs() -> &'static [(&'static str, ParamSpec)] {
        const {
            &[
                ("send_batch_size", ParamSpec::int_range(1, 1_000_000)),
                ("timeout_ms", ParamSpec::int_range(1, 600_000)),
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
            "send_batch_size" => {
                self.send_batch_size = as_u64(value)? as usize;
                Ok(())
            }
            "timeout_ms" => {
                self.timeout_ms = as_u64(value)?;
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
                "send_batch_size".to_owned(),
                PatchValue::Int(self.send_batch_size as i64),
            ),
            (
                "timeout_ms".to_owned(),
                PatchValue::Int(self.timeout_ms as i64),
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

struct Buffer {
    pending: MetricBatch,
    first_buffered_at: Option<Instant>,
}

/// Metrics for the batcher.
#[derive(Default)]
pub struct BatcherMetrics {
    /// Batches released downstream.
    pub flushed_total: Counter,
    /// Batches passed through while disabled.
    pub disabled_passthrough_total: Counter,
    /// Points currently buffered.
    pub pending_points: Gauge,
    /// 1 when the data path is enabled.
    pub enabled: Gauge,
}

impl MetricSet for BatcherMetrics {
    fn name(&self) -> &str {
        BATCHER_KIND
    }

    fn snapshot(&self) -> Vec<MetricSample> {
        vec![
            MetricSample::new(
                "batcher_flushed_total",
                SampleValue::Counter(self.flushed_total.get()),
            ),
            MetricSample::new(
                "batcher_disabled_passthrough_total",
                SampleValue::Counter(self.disabled_passthrough_total.get()),
            ),
            MetricSample::new(
                "batcher_pending_points",
                SampleValue::Gauge(self.pending_points.get()),
            ),
            MetricSample::new("batcher_enabled", SampleValue::Gauge(self.enabled.get())),
        ]
    }
}

/// Size/time-based output batching. See the module docs.
pub struct Batcher {
    core: UpdateableCore<Params>,
    buffer: Mutex<Buffer>,
    metrics: Arc<BatcherMetrics>,
}

impl Batcher {
    /// Creates the batcher and registers its metric set.
    #[must_use]
    pub fn new(config: Config, registry: &TelemetryRegistry) -> Self {
        let metrics = Arc::new(BatcherMetrics::default());
        metrics.enabled.set(1.0);
        registry.register(metrics.clone());
        Self {
            core: UpdateableCore::new(
                ProcessorId::named(BATCHER_KIND),
                Params {
                    enabled: true,
                    send_batch_size: config.send_batch_size.max(1),
                    timeout_ms: config.timeout_ms.max(1),
                },
            ),
            buffer: Mutex::new(Buffer {
                pending: MetricBatch::new(),
                first_buffered_at: None,
            }),
            metrics,
        }
    }
}

impl MetricsProcessor for Batcher {
    fn id(&self) -> &ProcessorId {
        self.core.id()
    }

    fn consume_batch(&self, batch: MetricBatch) -> Result<MetricBatch, EngineError> {
        let params = self.core.read();
        if !params.enabled() {
            self.metrics.disabled_passthrough_total.inc();
            return Ok(batch);
        }

        let mut buffer = self.buffer.lock();
        if !batch.is_empty() && buffer.first_buffered_at.is_none() {
            buffer.first_buffered_at = Some(Instant::now());
        }
        buffer.pending.merge(batch);

        let size_reached = buffer.pending.point_count() >= params.send_batch_size;
        let timed_out = buffer
            .first_buffered_at
            .is_some_and(|at| at.elapsed() >= Duration::from_millis(params.timeout_ms));

        if size_reached || timed_out {
            let released = std::mem::take(&mut buffer.pending);
            buffer.first_buffered_at = None;
            self.metrics.flushed_total.inc();
            self.metrics.pending_points.set(0.0);
            return Ok(released);
        }

        self.metrics
            .pending_points
            .set(buffer.pending.point_count() as f64);
        Ok(MetricBatch::new())
    }

    fn shutdown(&self) -> Result<(), EngineError> {
        let mut buffer = self.buffer.lock();
        let held = buffer.pending.point_count();
        if held > 0 {
            tracing::info!(held, "batcher buffer dropped on shutdown");
            buffer.pending = MetricBatch::new();
            buffer.first_buffered_at = None;
        }
        Ok(())
    }
}

impl UpdateableProcessor for Batcher {
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
    use phoenix_pdata::{AttributeSet, InstrumentationScope, MetricPoint};

    fn batch_of(count: usize) -> MetricBatch {
        let mut batch = MetricBatch::new();
        for i in 0..count {
            batch.push_point(
                AttributeSet::new(),
                InstrumentationScope::named("hostmetrics"),
                MetricPoint::gauge("m", i as f64, i as u64),
            );
        }
        batch
    }

    #[test]
    fn buffers_until_size_reached() {
        let batcher = Batcher::new(
            Config {
                send_batch_size: 3,
                timeout_ms: 60_000,
            },
            &TelemetryRegistry::new(),
        );

        let out = batcher.consume_batch(batch_of(2)).expect("data path");
        assert!(out.is_empty());
        assert_eq!(batcher.metrics.pending_points.get(), 2.0);

        let out = batcher.consume_batch(batch_of(2)).expect("data path");
        assert_eq!(out.point_count(), 4);
        assert_eq!(batcher.metrics.flushed_total.get(), 1);
    }

    #[test]
    fn timeout_releases_partial_buffer() {
        let batcher = Batcher::new(
            Config {
                send_batch_size: 1000,
                timeout_ms: 1,
            },
            &TelemetryRegistry::new(),
        );
        let out = batcher.consume_batch(batch_of(1)).expect("data path");
        assert!(out.is_empty());

        std::thread::sleep(Duration::from_millis(5));
        let out = batcher.consume_batch(MetricBatch::new()).expect("data path");
        assert_eq!(out.point_count(), 1);
    }
}
