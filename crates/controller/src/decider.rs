// SPDX-License-Identifier: Apache-2.0

//! PID decider.
//!
//! Runs in the control pipeline. On each batch carrying a declared KPI
//! metric, every enabled controller performs one evaluation:
//!
//! 1. extract the KPI (last point of the metric in the batch),
//! 2. compute the PID output (windup-clamped, dt-clamped),
//! 3. for each declared output, form a candidate value, clamp it to the
//!    output's bounds, suppress it inside the hysteresis dead-band, and
//!    otherwise propose a configuration patch,
//! 4. track oscillation (sign flips) and stalls; a stalled loop with
//!    `use_bayesian` enabled probes the search space instead of re-emitting
//!    its frozen output.
//!
//! Proposals travel through the configured [`ProposalRoute`]: directly into
//! a [`PatchSink`], or encoded as `ctrl_proposed_patch` metrics appended to
//! the output batch for the downstream connector stage. Both preserve
//! proposal order within an evaluation.
//!
//! A missing KPI metric skips the controller (counted, not an error). All
//! arithmetic guards non-finite values: they are replaced with zero and
//! counted.

use crate::bayesian::StallExplorer;
use crate::connector::{PatchSink, encode_patch};
use crate::metrics::DeciderMetrics;
use crate::pid::PidController;
use parking_lot::Mutex;
use phoenix_config::policy::{OutputPatch, PidControllerConfig, Policy};
use phoenix_config::{ConfigPatch, PatchSource, PatchValue, ProcessorId, ValueKind};
use phoenix_engine::error::{EngineError, PatchError};
use phoenix_engine::processor::{ConfigStatus, MetricsProcessor, UpdateableProcessor};
use phoenix_pdata::{AttributeSet, InstrumentationScope, MetricBatch};
use phoenix_telemetry::TelemetryRegistry;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Processor type name.
pub const PID_DECIDER_KIND: &str = "pid_decider";

/// Minimum output delta that counts as movement for stall detection.
const STALL_EPSILON: f64 = 1e-3;

/// Output magnitude below which sign flips are not oscillation.
const OSCILLATION_FLOOR: f64 = 0.1;

/// How decider proposals reach the governance extension.
pub enum ProposalRoute {
    /// Submit through a sink immediately.
    Direct(Arc<dyn PatchSink>),
    /// Encode as `ctrl_proposed_patch` metrics on the output batch.
    MetricEncoded,
}

struct OutputState {
    spec: OutputPatch,
    last_output: f64,
}

struct ControllerRuntime {
    config: PidControllerConfig,
    pid: PidController,
    outputs: Vec<OutputState>,
    prev_pid_output: Option<f64>,
    stall_count: u32,
    explorer: StallExplorer,
}

/// The control-pipeline decider. See the module docs.
pub struct PidDecider {
    id: ProcessorId,
    route: ProposalRoute,
    controllers: Mutex<Vec<ControllerRuntime>>,
    enabled: AtomicBool,
    started: Instant,
    metrics: Arc<DeciderMetrics>,
}

impl PidDecider {
    /// Builds the decider from the policy's controller declarations.
    ///
    /// Each output's `last_output` starts from the policy's configured value
    /// for that parameter when present, otherwise from the midpoint of the
    /// output bounds.
    #[must_use]
    pub fn from_policy(
        policy: &Policy,
        route: ProposalRoute,
        telemetry: &TelemetryRegistry,
    ) -> Self {
        let metrics = Arc::new(DeciderMetrics::default());
        telemetry.register(metrics.clone());

        let controllers = policy
            .pid_controllers
            .iter()
            .map(|config| {
                let outputs = config
                    .output_patches
                    .iter()
                    .map(|spec| {
                        let configured = policy
                            .processors_config
                            .get(&spec.target.to_string())
                            .and_then(|settings| settings.params.get(&spec.parameter_path))
                            .and_then(PatchValue::as_f64);
                        OutputState {
                            last_output: configured
                                .unwrap_or((spec.min + spec.max) / 2.0),
                            spec: spec.clone(),
                        }
                    })
                    .collect();
                ControllerRuntime {
                    pid: PidController::new(
                        config.kp,
                        config.ki,
                        config.kd,
                        config.kpi_target,
                        config.integral_windup_limit,
                    ),
                    outputs,
                    prev_pid_output: None,
                    stall_count: 0,
                    explorer: StallExplorer::new(SmallRng::seed_from_u64(
                        config.name.len() as u64 ^ 0x5eed,
                    )),
                    config: config.clone(),
                }
            })
            .collect();

        Self {
            id: ProcessorId::named(PID_DECIDER_KIND),
            route,
            controllers: Mutex::new(controllers),
            enabled: AtomicBool::new(true),
            started: Instant::now(),
            metrics,
        }
    }

    /// Returns the decider's metric set.
    #[must_use]
    pub fn metrics(&self) -> Arc<DeciderMetrics> {
        self.metrics.clone()
    }

    fn emit(&self, patch: ConfigPatch, out: &mut MetricBatch) {
        self.metrics.patches_emitted_total.inc();
        match &self.route {
            ProposalRoute::Direct(sink) => sink.submit_proposal(patch),
            ProposalRoute::MetricEncoded => {
                if let Some(point) = encode_patch(&patch) {
                    out.push_point(
                        AttributeSet::new(),
                        InstrumentationScope::named(PID_DECIDER_KIND),
                        point,
                    );
                }
            }
        }
    }

    fn proposal(
        controller: &PidControllerConfig,
        spec: &OutputPatch,
        value: i64,
        kpi: f64,
        reason: &str,
    ) -> ConfigPatch {
        ConfigPatch::new(
            uuid::Uuid::new_v4().to_string(),
            spec.target.clone(),
            spec.parameter_path.clone(),
            value,
            PatchSource::PidDecider,
        )
        .with_ttl(300)
        .with_reason(format!(
            "{}: {reason} (kpi {kpi:.4}, target {:.4})",
            controller.name, controller.kpi_target
        ))
    }

    fn evaluate(&self, ctrl: &mut ControllerRuntime, kpi: f64, out: &mut MetricBatch) {
        self.metrics.evaluations_total.inc();

        let kpi = if kpi.is_finite() {
            kpi
        } else {
            self.metrics.non_finite_total.inc();
            0.0
        };

        let now = self.started.elapsed().as_secs_f64();
        let output = ctrl.pid.step(kpi, now);

        // Oscillation: sign flip between consecutive outputs, both beyond
        // the noise floor.
        if let Some(prev) = ctrl.prev_pid_output {
            let oscillating = prev * output < 0.0
                && prev.abs() > OSCILLATION_FLOOR
                && output.abs() > OSCILLATION_FLOOR;
            self.metrics
                .oscillation
                .set(if oscillating { 1.0 } else { 0.0 });
        }

        // Stall: consecutive near-identical outputs while the KPI is still
        // off target. Only meaningful with multiple outputs or when the
        // Bayesian fallback is armed.
        let stall_eligible = ctrl.outputs.len() > 1 || ctrl.config.use_bayesian;
        let mut stalled = false;
        if stall_eligible {
            match ctrl.prev_pid_output {
                Some(prev) if (output - prev).abs() < STALL_EPSILON => {
                    ctrl.stall_count = ctrl.stall_count.saturating_add(1);
                }
                Some(_) => {
                    ctrl.stall_count = 0;
                    ctrl.explorer.reset();
                }
                None => {}
            }
            stalled = ctrl.stall_count >= ctrl.config.stall_threshold;
            self.metrics
                .stall_detected
                .set(if stalled { 1.0 } else { 0.0 });
        }
        ctrl.prev_pid_output = Some(output);

        if stalled && ctrl.config.use_bayesian {
            // Probe instead of re-emitting the frozen output.
            for out_state in &mut ctrl.outputs {
                let spec = &out_state.spec;
                let probe = ctrl.explorer.next_probe(
                    spec.min,
                    spec.max,
                    out_state.last_output,
                );
                let value = probe.round() as i64;
                self.metrics.stall_probes_total.inc();
                self.emit(
                    Self::proposal(&ctrl.config, spec, value, kpi, "stall probe"),
                    out,
                );
                out_state.last_output = probe.round();
            }
            ctrl.stall_count = 0;
            return;
        }

        for out_state in &mut ctrl.outputs {
            let spec = &out_state.spec;
            let last = out_state.last_output;

            let mut candidate = last + spec.scale * output;
            if !candidate.is_finite() {
                self.metrics.non_finite_total.inc();
                candidate = 0.0;
            }
            let clamped = candidate.clamp(spec.min, spec.max);
            if clamped != candidate {
                self.metrics.clamped_total.inc();
            }

            // Hysteresis dead-band around the last emitted value.
            let suppressed = if last != 0.0 {
                ((clamped - last).abs() / last.abs()) * 100.0 < ctrl.config.hysteresis_percent
            } else {
                clamped == 0.0
            };
            if suppressed {
                self.metrics.suppressed_total.inc();
                continue;
            }

            let value = clamped.round() as i64;
            self.emit(
                Self::proposal(&ctrl.config, spec, value, kpi, "pid output"),
                out,
            );
            out_state.last_output = clamped.round();
        }
    }
}

impl MetricsProcessor for PidDecider {
    fn id(&self) -> &ProcessorId {
        &self.id
    }

    fn consume_batch(&self, batch: MetricBatch) -> Result<MetricBatch, EngineError> {
        if !self.enabled.load(Ordering::Acquire) {
            return Ok(batch);
        }

        let mut out = batch;
        let mut controllers = self.controllers.lock();
        for ctrl in controllers.iter_mut() {
            if !ctrl.config.enabled {
                continue;
            }
            match out.last_value_of(&ctrl.config.kpi_metric_name) {
                Some(kpi) => self.evaluate(ctrl, kpi, &mut out),
                None => self.metrics.kpi_missing_total.inc(),
            }
        }
        Ok(out)
    }
}

impl UpdateableProcessor for PidDecider {
    /// Patches address controllers as `<controller_name>.<parameter>` with
    /// parameters `enabled`, `kpi_target_value`, `kp`, `ki`, `kd`. The
    /// reserved `enabled` path toggles the whole decider. Tuning changes
    /// reset the integral; they never retroactively re-emit patches.
    fn on_config_patch(&self, patch: &ConfigPatch) -> Result<(), PatchError> {
        let path = patch.parameter_path.as_str();
        if path == "enabled" {
            let enabled =
                patch
                    .new_value
                    .as_bool()
                    .ok_or_else(|| PatchError::InvalidValueType {
                        path: path.to_owned(),
                        expected: ValueKind::Bool,
                        actual: patch.new_value.kind(),
                    })?;
            self.enabled.store(enabled, Ordering::Release);
            return Ok(());
        }

        let (name, param) = path
            .split_once('.')
            .ok_or_else(|| PatchError::UnknownParameter {
                path: path.to_owned(),
            })?;

        let mut controllers = self.controllers.lock();
        let ctrl = controllers
            .iter_mut()
            .find(|c| c.config.name == name)
            .ok_or_else(|| PatchError::UnknownParameter {
                path: path.to_owned(),
            })?;

        if param == "enabled" {
            let enabled =
                patch
                    .new_value
                    .as_bool()
                    .ok_or_else(|| PatchError::InvalidValueType {
                        path: path.to_owned(),
                        expected: ValueKind::Bool,
                        actual: patch.new_value.kind(),
                    })?;
            ctrl.config.enabled = enabled;
            return Ok(());
        }

        let value = patch
            .new_value
            .as_f64()
            .ok_or_else(|| PatchError::InvalidValueType {
                path: path.to_owned(),
                expected: ValueKind::Double,
                actual: patch.new_value.kind(),
            })?;
        if !value.is_finite() {
            return Err(PatchError::InvalidValue {
                path: path.to_owned(),
                details: "value must be finite".to_owned(),
            });
        }

        let (kp, ki, kd) = ctrl.pid.gains();
        match param {
            "kpi_target_value" => {
                ctrl.config.kpi_target = value;
                ctrl.pid.set_setpoint(value);
            }
            "kp" => {
                ctrl.config.kp = value;
                ctrl.pid.set_gains(value, ki, kd);
            }
            "ki" => {
                ctrl.config.ki = value;
                ctrl.pid.set_gains(kp, value, kd);
            }
            "kd" => {
                ctrl.config.kd = value;
                ctrl.pid.set_gains(kp, ki, value);
            }
            other => {
                return Err(PatchError::UnknownParameter {
                    path: format!("{name}.{other}"),
                });
            }
        }
        Ok(())
    }

    fn get_config_status(&self) -> ConfigStatus {
        let controllers = self.controllers.lock();
        let mut parameters = BTreeMap::new();
        for ctrl in controllers.iter() {
            let name = &ctrl.config.name;
            let _ = parameters.insert(
                format!("{name}.enabled"),
                PatchValue::Bool(ctrl.config.enabled),
            );
            let _ = parameters.insert(
                format!("{name}.kpi_target_value"),
                PatchValue::Double(ctrl.config.kpi_target),
            );
            let _ = parameters.insert(format!("{name}.kp"), PatchValue::Double(ctrl.config.kp));
            let _ = parameters.insert(format!("{name}.ki"), PatchValue::Double(ctrl.config.ki));
            let _ = parameters.insert(format!("{name}.kd"), PatchValue::Double(ctrl.config.kd));
        }
        ConfigStatus {
            parameters,
            enabled: self.enabled.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use phoenix_pdata::MetricPoint;

    /// Sink that records proposals for assertions.
    #[derive(Default)]
    struct RecordingSink {
        proposals: PlMutex<Vec<ConfigPatch>>,
    }

    impl PatchSink for RecordingSink {
        fn submit_proposal(&self, patch: ConfigPatch) {
            self.proposals.lock().push(patch);
        }
    }

    fn controller_config(hysteresis: f64) -> PidControllerConfig {
        PidControllerConfig {
            name: "coverage".to_owned(),
            enabled: true,
            kpi_metric_name: "phoenix_topk_coverage".to_owned(),
            kpi_target: 0.9,
            kp: 100.0,
            ki: 0.0,
            kd: 0.0,
            integral_windup_limit: 0.0,
            hysteresis_percent: hysteresis,
            use_bayesian: false,
            stall_threshold: 10,
            output_patches: vec![OutputPatch {
                target: ProcessorId::named("adaptive_topk"),
                parameter_path: "k_value".to_owned(),
                scale: 1.0,
                min: 10.0,
                max: 60.0,
            }],
        }
    }

    fn policy_with(config: PidControllerConfig) -> Policy {
        let mut policy = Policy::default();
        policy.pid_controllers.push(config);
        let _ = policy.processors_config.insert(
            "adaptive_topk".to_owned(),
            phoenix_config::policy::ProcessorSettings {
                enabled: true,
                params: BTreeMap::from([("k_value".to_owned(), PatchValue::Int(20))]),
            },
        );
        policy
    }

    fn decider_with_sink(config: PidControllerConfig) -> (PidDecider, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let decider = PidDecider::from_policy(
            &policy_with(config),
            ProposalRoute::Direct(sink.clone()),
            &TelemetryRegistry::new(),
        );
        (decider, sink)
    }

    fn kpi_batch(value: f64) -> MetricBatch {
        let mut batch = MetricBatch::new();
        batch.push_point(
            AttributeSet::new(),
            InstrumentationScope::named("self_metrics"),
            MetricPoint::gauge("phoenix_topk_coverage", value, 1),
        );
        batch
    }

    #[test]
    fn low_kpi_raises_the_parameter() {
        let (decider, sink) = decider_with_sink(controller_config(5.0));
        // coverage 0.5, target 0.9: error 0.4, kp 100 -> output 40;
        // candidate 20 + 40 = 60.
        let _ = decider.consume_batch(kpi_batch(0.5)).expect("evaluate");

        let proposals = sink.proposals.lock();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].new_value, PatchValue::Int(60));
        assert_eq!(
            proposals[0].target_processor,
            ProcessorId::named("adaptive_topk")
        );
    }

    #[test]
    fn candidate_outside_bounds_is_clamped_and_counted() {
        let (decider, sink) = decider_with_sink(controller_config(5.0));
        // error 0.9 -> output 90 -> candidate 110 clamps to 60.
        let _ = decider.consume_batch(kpi_batch(0.0)).expect("evaluate");

        assert_eq!(sink.proposals.lock()[0].new_value, PatchValue::Int(60));
        assert_eq!(decider.metrics.clamped_total.get(), 1);
    }

    #[test]
    fn hysteresis_suppresses_small_changes() {
        let (decider, sink) = decider_with_sink(controller_config(10.0));
        // error 0.009 -> output 0.9 -> candidate 20.9: |0.9|/20 = 4.5% < 10%.
        let _ = decider.consume_batch(kpi_batch(0.891)).expect("evaluate");

        assert!(sink.proposals.lock().is_empty());
        assert_eq!(decider.metrics.suppressed_total.get(), 1);
    }

    #[test]
    fn missing_kpi_skips_and_counts() {
        let (decider, sink) = decider_with_sink(controller_config(5.0));
        let mut batch = MetricBatch::new();
        batch.push_point(
            AttributeSet::new(),
            InstrumentationScope::named("self_metrics"),
            MetricPoint::gauge("unrelated_metric", 1.0, 1),
        );
        let _ = decider.consume_batch(batch).expect("evaluate");

        assert!(sink.proposals.lock().is_empty());
        assert_eq!(decider.metrics.kpi_missing_total.get(), 1);
        assert_eq!(decider.metrics.evaluations_total.get(), 0);
    }

    #[test]
    fn non_finite_kpi_is_neutralized_and_counted() {
        let (decider, _sink) = decider_with_sink(controller_config(5.0));
        let _ = decider.consume_batch(kpi_batch(f64::NAN)).expect("evaluate");
        assert_eq!(decider.metrics.non_finite_total.get(), 1);
    }

    #[test]
    fn emitted_values_respect_bounds_over_random_sequences() {
        let (decider, sink) = decider_with_sink(controller_config(0.0));
        let kpis = [0.0, 1.0, 0.2, 0.95, 0.5, 0.9, 0.1, 2.0, -1.0];
        for kpi in kpis {
            let _ = decider.consume_batch(kpi_batch(kpi)).expect("evaluate");
        }
        for patch in sink.proposals.lock().iter() {
            let value = patch.new_value.as_i64().expect("int proposal");
            assert!((10..=60).contains(&value), "value {value}");
        }
    }

    #[test]
    fn stall_triggers_bayesian_probe() {
        let mut config = controller_config(5.0);
        config.use_bayesian = true;
        config.stall_threshold = 3;
        // Zero gains: output is constantly 0, a stalled loop.
        config.kp = 0.0;
        let (decider, sink) = decider_with_sink(config);

        for _ in 0..6 {
            let _ = decider.consume_batch(kpi_batch(0.5)).expect("evaluate");
        }
        assert!(decider.metrics.stall_probes_total.get() > 0);
        let proposals = sink.proposals.lock();
        assert!(
            proposals
                .iter()
                .any(|p| p.reason.contains("stall probe")),
            "probe proposals present"
        );
    }

    #[test]
    fn tuning_patch_resets_integral_and_reads_back() {
        let (decider, _sink) = decider_with_sink(controller_config(5.0));
        let patch = ConfigPatch::new(
            "p-1",
            ProcessorId::named(PID_DECIDER_KIND),
            "coverage.kp",
            50.0,
            PatchSource::Manual,
        );
        decider.on_config_patch(&patch).expect("accepted");
        assert_eq!(
            decider.get_config_status().get("coverage.kp"),
            Some(PatchValue::Double(50.0))
        );

        let unknown = ConfigPatch::new(
            "p-2",
            ProcessorId::named(PID_DECIDER_KIND),
            "nonexistent.kp",
            50.0,
            PatchSource::Manual,
        );
        assert!(decider.on_config_patch(&unknown).is_err());
    }

    #[test]
    fn metric_encoded_route_appends_proposal_points() {
        let decider = PidDecider::from_policy(
            &policy_with(controller_config(5.0)),
            ProposalRoute::MetricEncoded,
            &TelemetryRegistry::new(),
        );
        let out = decider.consume_batch(kpi_batch(0.5)).expect("evaluate");
        let encoded: Vec<_> = out
            .iter_points()
            .filter(|(_, _, p)| p.name == crate::connector::CTRL_PROPOSED_PATCH)
            .collect();
        assert_eq!(encoded.len(), 1);
    }
}
