// SPDX-License-Identifier: Apache-2.0

//! Memory limiter.
//!
//! Drop-on-overflow guard at the head of the pipeline: while the process
//! resident set exceeds `limit_mib`, incoming batches are refused (dropped
//! whole). The RSS probe is cached for `check_interval_ms` so the data path
//! never pays a per-batch sysinfo refresh.

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
use sysinfo::{ProcessesToUpdate, System};

/// Processor type name.
pub const MEMORY_LIMITER_KIND: &str = "memory_limiter";

/// Static configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Resident-set limit in MiB.
    pub limit_mib: u64,
    /// Probe cache lifetime in milliseconds.
    pub check_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limit_mib: 512,
            check_interval_ms: 1000,
        }
    }
}

struct Params {
    enabled: bool,
    limit_mib: u64,
    check_interval_ms: u64,
}

impl ParamSchema for Params {
    fn specs() -> &'static [(&'static str, ParamSpec)] {
        const {
            &[
                ("limit_mib", ParamSpec::int_range(1, 1_048_576)),
                ("check_interval_ms", ParamSpec::int_range(10, 60_000)),
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
            "limit_mib" => {
                self.limit_mib = as_u64(value)?;
                Ok(())
            }
            "check_interval_ms" => {
                self.check_interval_ms = as_u64(value)?;
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
                "limit_mib".to_owned(),
                PatchValue::Int(self.limit_mib as i64),
            ),
            (
                "check_interval_ms".to_owned(),
                PatchValue::Int(self.check_interval_ms as i64),
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

struct Probe {
    system: System,
    pid: Option<sysinfo::Pid>,
    last_check: Option<Instant>,
    last_rss_mib: u64,
}

impl Probe {
    fn rss_mib(&mut self, cache_for: Duration) -> u64 {
        let fresh = self
            .last_check
            .is_some_and(|at| at.elapsed() < cache_for);
        if fresh {
            return self.last_rss_mib;
        }
        if let Some(pid) = self.pid {
            let _ = self
                .system
                .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            if let Some(process) = self.system.process(pid) {
                self.last_rss_mib = process.memory() / (1024 * 1024);
            }
        }
        self.last_check = Some(Instant::now());
        self.last_rss_mib
    }
}

/// Metrics for the memory limiter.
#[derive(Default)]
pub struct LimiterMetrics {
    /// Batches refused while over the limit.
    pub refused_total: Counter,
    /// Points dropped with refused batches.
    pub refused_points_total: Counter,
    /// Batches passed through while disabled.
    pub disabled_passthrough_total: Counter,
    /// Last probed resident set, MiB.
    pub rss_mib: Gauge,
    /// 1 when the data path is enabled.
    pub enabled: Gauge,
}

impl MetricSet for LimiterMetrics {
    fn name(&self) -> &str {
        MEMORY_LIMITER_KIND
    }

    fn snapshot(&self) -> Vec<MetricSample> {
        vec![
            MetricSample::new(
                "limiter_refused_total",
                SampleValue::Counter(self.refused_total.get()),
            ),
            MetricSample::new(
                "limiter_refused_points_total",
                SampleValue::Counter(self.refused_points_total.get()),
            ),
            MetricSample::new(
                "limiter_disabled_passthrough_total",
                SampleValue::Counter(self.disabled_passthrough_total.get()),
            ),
            MetricSample::new("limiter_rss_mib", SampleValue::Gauge(self.rss_mib.get())),
            MetricSample::new("limiter_enabled", SampleValue::Gauge(self.enabled.get())),
        ]
    }
}

/// Refuses batches while the process is over its memory budget. See the
/// module docs.
pub struct MemoryLimiter {
    core: UpdateableCore<Params>,
    probe: Mutex<Probe>,
    metrics: Arc<LimiterMetrics>,
}

impl MemoryLimiter {
    /// Creates the limiter and registers its metric set.
    #[must_use]
    pub fn new(config: Config, registry: &TelemetryRegistry) -> Self {
        let metrics = Arc::new(LimiterMetrics::default());
        metrics.enabled.set(1.0);
        registry.register(metrics.clone());
        Self {
            core: UpdateableCore::new(
                ProcessorId::named(MEMORY_LIMITER_KIND),
                Params {
                    enabled: true,
                    limit_mib: config.limit_mib.max(1),
                    check_interval_ms: config.check_interval_ms.max(10),
                },
            ),
            probe: Mutex::new(Probe {
                system: System::new(),
                pid: sysinfo::get_current_pid().ok(),
                last_check: None,
                last_rss_mib: 0,
            }),
            metrics,
        }
    }
}

impl MetricsProcessor for MemoryLimiter {
    fn id(&self) -> &ProcessorId {
        self.core.id()
    }

    fn consume_batch(&self, batch: MetricBatch) -> Result<MetricBatch, EngineError> {
        let params = self.core.read();
        if !params.enabled() {
            self.metrics.disabled_passthrough_total.inc();
            return Ok(batch);
        }

        let rss = self
            .probe
            .lock()
            .rss_mib(Duration::from_millis(params.check_interval_ms));
        self.metrics.rss_mib.set(rss as f64);

        if rss > params.limit_mib {
            self.metrics.refused_total.inc();
            self.metrics
                .refused_points_total
                .add(batch.point_count() as u64);
            return Ok(MetricBatch::new());
        }
        Ok(batch)
    }
}

impl UpdateableProcessor for MemoryLimiter {
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
