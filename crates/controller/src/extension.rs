// SPDX-License-Identifier: Apache-2.0

//! The PIC control extension: governance core of the control plane.
//!
//! One instance exists per process. It owns the atomically replaceable
//! policy, the processor registry, the patch admission pipeline, safe-mode
//! orchestration, and the bounded patch history.
//!
//! # Admission pipeline
//!
//! A submitted patch passes these gates in order; the first failure is
//! returned as its [`PatchRejection`] kind:
//!
//! 1. safe mode (severity `safety`, or `urgent` with `safety_override`,
//!    passes; the override also raises the safety monitor's thresholds),
//! 2. TTL expiry,
//! 3. per-target rate limit (urgent/safety bypass),
//! 4. global cooldown (urgent/safety bypass),
//! 5. target resolution against the registry,
//! 6. prev-value capture from the target's config status,
//! 7. dispatch (skipped under `shadow` autonomy, except safety patches),
//! 8. history append.
//!
//! Internal patches (policy application, safe-mode presets) skip gates 3–4
//! and do not consume rate-limit budget; they are governance, not tuning
//! traffic.

use crate::error::{ControllerError, PatchRejection};
use crate::history::{HistoryRing, PatchRecord};
use crate::metrics::ControlMetrics;
use crate::rate_limit::RateLimiter;
use crate::safety::SafetyMonitor;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use phoenix_config::patch::unix_now;
use phoenix_config::policy::AutonomyLevel;
use phoenix_config::{ConfigPatch, PatchSeverity, PatchSource, Policy, ProcessorId};
use phoenix_engine::processor::UpdateableProcessor;
use phoenix_engine::registry::ProcessorRegistry;
use phoenix_telemetry::TelemetryRegistry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Consecutive policy reload failures that force safe mode.
const RELOAD_FAILURES_TO_SAFE_MODE: u32 = 3;

/// Seconds the safety monitor's thresholds are raised when an urgent
/// override passes through safe mode.
const OVERRIDE_GRACE_SECONDS: u64 = 60;

/// Acknowledgement returned for every accepted patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchAck {
    /// Identifier of the acknowledged patch.
    pub patch_id: String,
    /// False when shadow autonomy recorded the patch without dispatching.
    pub dispatched: bool,
    /// True when the extension ran under advisory autonomy.
    pub advisory: bool,
}

#[derive(Default)]
struct SafeModeState {
    active: bool,
    sticky_until: Option<Instant>,
    /// Parameters captured on entry, for the audit trail.
    snapshot: Vec<(ProcessorId, phoenix_engine::processor::ConfigStatus)>,
}

/// The governance extension. See the module docs.
pub struct PicControl {
    policy: ArcSwap<Policy>,
    registry: ProcessorRegistry,
    rate_limiter: Mutex<RateLimiter>,
    history: Mutex<HistoryRing>,
    safe_mode: Mutex<SafeModeState>,
    safety_monitor: Mutex<Option<Arc<SafetyMonitor>>>,
    reload_failures: AtomicU32,
    accepting: AtomicBool,
    metrics: Arc<ControlMetrics>,
}

impl PicControl {
    /// Creates the extension with an initial policy.
    #[must_use]
    pub fn new(policy: Policy, telemetry: &TelemetryRegistry) -> Arc<Self> {
        let metrics = Arc::new(ControlMetrics::default());
        telemetry.register(metrics.clone());
        let history_size = policy.pic_control_config.history_size;
        Arc::new(Self {
            policy: ArcSwap::new(Arc::new(policy)),
            registry: ProcessorRegistry::new(),
            rate_limiter: Mutex::new(RateLimiter::new()),
            history: Mutex::new(HistoryRing::new(history_size)),
            safe_mode: Mutex::new(SafeModeState::default()),
            safety_monitor: Mutex::new(None),
            reload_failures: AtomicU32::new(0),
            accepting: AtomicBool::new(true),
            metrics,
        })
    }

    /// Returns the currently installed policy.
    #[must_use]
    pub fn policy(&self) -> Arc<Policy> {
        self.policy.load_full()
    }

    /// Returns the extension's metric set.
    #[must_use]
    pub fn metrics(&self) -> Arc<ControlMetrics> {
        self.metrics.clone()
    }

    /// Registers an updateable processor. Idempotent.
    pub fn register_updateable(&self, processor: &Arc<dyn UpdateableProcessor>) {
        self.registry.register(processor);
    }

    /// Attaches the safety monitor so override hooks and limit updates reach
    /// it.
    pub fn register_safety_monitor(&self, monitor: Arc<SafetyMonitor>) {
        let policy = self.policy.load();
        monitor.set_limits(
            policy.global_settings.cpu_safety_limit_mcores,
            policy.global_settings.rss_safety_limit_mib,
        );
        *self.safety_monitor.lock() = Some(monitor);
    }

    /// Returns up to `limit` history records, most recent first.
    #[must_use]
    pub fn get_patch_history(&self, limit: usize) -> Vec<PatchRecord> {
        self.history.lock().recent(limit)
    }

    /// Whether the extension is in safe mode.
    #[must_use]
    pub fn is_in_safe_mode(&self) -> bool {
        self.safe_mode.lock().active
    }

    /// Explicit operator API: force safe mode on or off. An explicit exit
    /// ignores the sticky cooldown.
    pub fn set_safe_mode(&self, on: bool) {
        if on {
            self.enter_safe_mode("operator request");
        } else {
            let _ = self.exit_safe_mode(true);
        }
    }

    /// Automatic exit path used when a trigger clears; honors the sticky
    /// cooldown and returns whether the exit happened.
    pub fn maybe_auto_exit_safe_mode(&self) -> bool {
        self.exit_safe_mode(false)
    }

    /// Submits a patch through the full admission pipeline.
    ///
    /// # Errors
    ///
    /// Returns the first gate's [`PatchRejection`].
    pub fn submit_patch(&self, patch: ConfigPatch) -> Result<PatchAck, PatchRejection> {
        let started = Instant::now();
        self.metrics.submitted_total.inc();

        // Shutdown closes the intake; the extension is headed for a terminal
        // safe state.
        if !self.accepting.load(Ordering::Acquire) {
            self.metrics.rejected_safe_mode_total.inc();
            return Err(PatchRejection::SafeModeActive);
        }

        let bypass_rate_gates = matches!(
            patch.severity,
            PatchSeverity::Urgent | PatchSeverity::Safety
        );

        // Gate 1: safe mode.
        if self.is_in_safe_mode() {
            let authorized = patch.severity == PatchSeverity::Safety
                || (patch.severity == PatchSeverity::Urgent && patch.safety_override);
            if !authorized {
                self.metrics.rejected_safe_mode_total.inc();
                return Err(PatchRejection::SafeModeActive);
            }
            if patch.severity == PatchSeverity::Urgent && patch.safety_override {
                if let Some(monitor) = self.safety_monitor.lock().as_ref() {
                    monitor.temporarily_override_thresholds(OVERRIDE_GRACE_SECONDS);
                }
            }
        }

        // Gate 2: TTL.
        if patch.is_expired(unix_now()) {
            self.metrics.rejected_expired_total.inc();
            return Err(PatchRejection::PatchExpired);
        }

        // Gates 3 and 4: rate limit, then cooldown.
        if !bypass_rate_gates {
            let policy = self.policy.load();
            let pic = &policy.pic_control_config;
            let window = Duration::from_secs(pic.rate_limit_window_seconds);
            let cooldown = Duration::from_secs(pic.patch_cooldown_seconds);
            let max_in_window = pic.max_patches_per_minute;

            let now = Instant::now();
            let mut limiter = self.rate_limiter.lock();
            if !limiter.target_has_headroom(&patch.target_processor, now, window, max_in_window)
            {
                self.metrics.rejected_rate_limited_total.inc();
                return Err(PatchRejection::RateLimited);
            }
            if !limiter.cooldown_elapsed(now, cooldown) {
                self.metrics.rejected_cooldown_total.inc();
                return Err(PatchRejection::CooldownActive);
            }
        }

        self.admit(patch, started, true)
    }

    /// Gates 5–8: resolution, prev-value capture, dispatch, history.
    fn admit(
        &self,
        mut patch: ConfigPatch,
        started: Instant,
        consume_rate_budget: bool,
    ) -> Result<PatchAck, PatchRejection> {
        // Gate 5: target resolution.
        let Some(target) = self.registry.resolve(&patch.target_processor) else {
            self.metrics.rejected_not_found_total.inc();
            return Err(PatchRejection::ProcessorNotFound {
                target: patch.target_processor.to_string(),
            });
        };

        // Gate 6: prev-value capture. An accepted submission consumes rate
        // budget even when the new value equals the previous one.
        patch.prev_value = target.get_config_status().get(&patch.parameter_path);
        if consume_rate_budget {
            self.rate_limiter
                .lock()
                .record_accepted(&patch.target_processor, Instant::now());
        }

        // Autonomy gate: shadow records without dispatching; safety patches
        // are never shadowed.
        let autonomy = self.policy.load().global_settings.autonomy_level;
        let shadowed =
            autonomy == AutonomyLevel::Shadow && patch.severity != PatchSeverity::Safety;
        let advisory = autonomy == AutonomyLevel::Advisory;

        // Gate 7: dispatch.
        let dispatch_error = if shadowed {
            self.metrics.shadowed_total.inc();
            None
        } else {
            target.on_config_patch(&patch).err()
        };

        // Gate 8: history.
        let success = dispatch_error.is_none();
        self.history.lock().push(PatchRecord {
            patch: patch.clone(),
            applied_at: unix_now(),
            success,
            error: dispatch_error.as_ref().map(ToString::to_string),
            advisory,
        });

        match dispatch_error {
            None => {
                self.metrics.accepted_total.inc();
                self.metrics
                    .dispatch_latency_seconds
                    .observe(started.elapsed().as_secs_f64());
                tracing::debug!(
                    patch_id = %patch.patch_id,
                    target = %patch.target_processor,
                    path = %patch.parameter_path,
                    value = %patch.new_value,
                    shadowed,
                    "patch applied"
                );
                Ok(PatchAck {
                    patch_id: patch.patch_id,
                    dispatched: !shadowed,
                    advisory,
                })
            }
            Some(source) => {
                self.metrics.rejected_validation_total.inc();
                tracing::warn!(
                    patch_id = %patch.patch_id,
                    target = %patch.target_processor,
                    path = %patch.parameter_path,
                    error = %source,
                    "patch rejected by target"
                );
                Err(PatchRejection::ValidationFailed { source })
            }
        }
    }

    /// Internal submission path for policy application and safe-mode
    /// presets: skips the rate gates and does not consume rate budget.
    fn dispatch_internal(&self, patch: ConfigPatch) -> Result<PatchAck, PatchRejection> {
        self.metrics.submitted_total.inc();
        self.admit(patch, Instant::now(), false)
    }

    /// Installs a new policy: atomic swap, governance knob propagation, and
    /// reapplication of `processors_config`.
    pub fn install_policy(&self, policy: Policy) {
        let history_size = policy.pic_control_config.history_size;
        let cpu = policy.global_settings.cpu_safety_limit_mcores;
        let rss = policy.global_settings.rss_safety_limit_mib;

        self.policy.store(Arc::new(policy));
        self.history.lock().set_capacity(history_size);
        if let Some(monitor) = self.safety_monitor.lock().as_ref() {
            monitor.set_limits(cpu, rss);
        }

        self.apply_processors_config();
        self.reload_failures.store(0, Ordering::Release);
        self.metrics.policy_reload_ok_total.inc();
    }

    /// Parses and installs a policy document.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::PolicyLoadFailed`]; the previous policy
    /// stays installed.
    pub fn install_policy_yaml(&self, yaml: &str) -> Result<(), ControllerError> {
        match Policy::from_yaml(yaml) {
            Ok(policy) => {
                self.install_policy(policy);
                Ok(())
            }
            Err(error) => {
                self.note_reload_failure();
                Err(ControllerError::PolicyLoadFailed(error))
            }
        }
    }

    /// Reloads the policy from the configured file path.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::PolicyLoadFailed`] on read, parse, or
    /// validation failure; the previous policy stays installed.
    pub fn reload_policy_from_file(&self) -> Result<(), ControllerError> {
        let Some(path) = self
            .policy
            .load()
            .pic_control_config
            .policy_file_path
            .clone()
        else {
            return Ok(());
        };
        let yaml = std::fs::read_to_string(&path).map_err(|e| {
            self.note_reload_failure();
            ControllerError::PolicyLoadFailed(phoenix_config::Error::FileReadError {
                path,
                details: e.to_string(),
            })
        })?;
        self.install_policy_yaml(&yaml)
    }

    fn note_reload_failure(&self) {
        self.metrics.policy_reload_failed_total.inc();
        let failures = self.reload_failures.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::warn!(failures, "policy reload failed; previous policy retained");
        if failures >= RELOAD_FAILURES_TO_SAFE_MODE {
            self.enter_safe_mode("repeated policy reload failures");
        }
    }

    /// Applies the installed policy's `processors_config` as internal
    /// patches. Parameters already at their target value are skipped, which
    /// makes repeated application idempotent. The `enabled` key is applied
    /// last.
    pub fn apply_processors_config(&self) {
        let policy = self.policy.load_full();
        for (name, settings) in &policy.processors_config {
            let target_id = ProcessorId::parse(name);
            let Some(target) = self.registry.resolve(&target_id) else {
                tracing::warn!(target = %name, "policy names an unregistered processor");
                continue;
            };
            let status = target.get_config_status();

            for (param, value) in &settings.params {
                if status.get(param).as_ref() == Some(value) {
                    continue;
                }
                let patch = ConfigPatch::new(
                    uuid::Uuid::new_v4().to_string(),
                    target_id.clone(),
                    param.clone(),
                    value.clone(),
                    PatchSource::PolicyFile,
                )
                .with_reason("policy apply");
                if let Err(rejection) = self.dispatch_internal(patch) {
                    tracing::warn!(
                        target = %name, param = %param, error = %rejection,
                        "policy parameter not applied"
                    );
                }
            }

            if status.enabled != settings.enabled {
                let patch = ConfigPatch::new(
                    uuid::Uuid::new_v4().to_string(),
                    target_id.clone(),
                    "enabled",
                    settings.enabled,
                    PatchSource::PolicyFile,
                )
                .with_reason("policy apply");
                if let Err(rejection) = self.dispatch_internal(patch) {
                    tracing::warn!(
                        target = %name, error = %rejection,
                        "policy enabled flag not applied"
                    );
                }
            }
        }
    }

    /// Enters safe mode: snapshot current parameters, then force the
    /// degraded presets with safety severity, bypassing rate gates.
    pub fn enter_safe_mode(&self, reason: &str) {
        {
            let mut state = self.safe_mode.lock();
            if state.active {
                return;
            }
            state.active = true;
            let cooldown = self
                .policy
                .load()
                .pic_control_config
                .safe_mode_cooldown_seconds;
            state.sticky_until = Some(Instant::now() + Duration::from_secs(cooldown));
            state.snapshot = self
                .registry
                .ids()
                .into_iter()
                .filter_map(|id| {
                    self.registry
                        .resolve(&id)
                        .map(|p| (id, p.get_config_status()))
                })
                .collect();
        }
        self.metrics.safe_mode.set(1.0);
        self.metrics.safe_mode_entered_total.inc();
        tracing::warn!(reason, "entering safe mode");

        let policy = self.policy.load_full();
        for (name, params) in &policy.pic_control_config.safe_mode_processor_configs {
            let target_id = ProcessorId::parse(name);
            for (param, value) in params {
                let patch = ConfigPatch::new(
                    uuid::Uuid::new_v4().to_string(),
                    target_id.clone(),
                    param.clone(),
                    value.clone(),
                    PatchSource::PicControl,
                )
                .with_reason(format!("safe mode: {reason}"))
                .with_severity(PatchSeverity::Safety);
                if let Err(rejection) = self.dispatch_internal(patch) {
                    tracing::error!(
                        target = %name, param = %param, error = %rejection,
                        "safe-mode preset not applied"
                    );
                }
            }
        }
    }

    /// Leaves safe mode and reapplies the installed policy. Returns false
    /// when safe mode stays active (not active, or sticky and not forced).
    fn exit_safe_mode(&self, force: bool) -> bool {
        {
            let mut state = self.safe_mode.lock();
            if !state.active {
                return false;
            }
            if !force
                && state
                    .sticky_until
                    .is_some_and(|until| Instant::now() < until)
            {
                return false;
            }
            state.active = false;
            state.sticky_until = None;
            state.snapshot.clear();
        }
        self.metrics.safe_mode.set(0.0);
        tracing::info!("leaving safe mode");
        self.apply_processors_config();
        true
    }

    /// Shutdown step one: refuse new patches.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    /// Writes the retained history to the log; called before process exit.
    pub fn flush_history_to_log(&self) {
        let records = self.history.lock().recent(usize::MAX);
        tracing::info!(records = records.len(), "flushing patch history");
        for record in records {
            tracing::info!(
                patch_id = %record.patch.patch_id,
                target = %record.patch.target_processor,
                path = %record.patch.parameter_path,
                value = %record.patch.new_value,
                success = record.success,
                "history record"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Knob;
    use phoenix_config::PatchValue;
    use phoenix_config::policy::ProcessorSettings;
    use std::collections::BTreeMap;

    fn test_policy(max_per_minute: u32, cooldown: u64) -> Policy {
        let mut policy = Policy::default();
        policy.pic_control_config.max_patches_per_minute = max_per_minute;
        policy.pic_control_config.patch_cooldown_seconds = cooldown;
        policy
    }

    fn control_with_knob(policy: Policy) -> (Arc<PicControl>, Arc<Knob>) {
        let control = PicControl::new(policy, &TelemetryRegistry::new());
        let knob = Knob::new("adaptive_topk", 20);
        let updateable: Arc<dyn UpdateableProcessor> = knob.clone();
        control.register_updateable(&updateable);
        (control, knob)
    }

    fn k_patch(value: i64) -> ConfigPatch {
        ConfigPatch::new(
            uuid::Uuid::new_v4().to_string(),
            ProcessorId::named("adaptive_topk"),
            "k_value",
            value,
            PatchSource::Manual,
        )
    }

    #[test]
    fn basic_patch_updates_and_records() {
        let (control, knob) = control_with_knob(test_policy(10, 0));
        let ack = control.submit_patch(k_patch(40)).expect("accepted");
        assert!(ack.dispatched);

        assert_eq!(
            knob.get_config_status().get("k_value"),
            Some(PatchValue::Int(40))
        );
        let history = control.get_patch_history(10);
        assert_eq!(history.len(), 1);
        assert!(history[0].success);
        assert_eq!(history[0].patch.prev_value, Some(PatchValue::Int(20)));
    }

    #[test]
    fn rate_limit_rejects_second_patch() {
        let (control, _knob) = control_with_knob(test_policy(1, 0));
        let _ = control.submit_patch(k_patch(40)).expect("first accepted");
        let rejection = control.submit_patch(k_patch(41)).expect_err("limited");
        assert_eq!(rejection, PatchRejection::RateLimited);
        assert_eq!(control.get_patch_history(10).len(), 1);
    }

    #[test]
    fn cooldown_rejects_back_to_back_patches() {
        let (control, _knob) = control_with_knob(test_policy(10, 30));
        let _ = control.submit_patch(k_patch(40)).expect("first accepted");
        let rejection = control.submit_patch(k_patch(41)).expect_err("cooling");
        assert_eq!(rejection, PatchRejection::CooldownActive);
    }

    #[test]
    fn unknown_target_is_not_found() {
        let (control, _knob) = control_with_knob(test_policy(10, 0));
        let patch = ConfigPatch::new(
            "p-1",
            ProcessorId::named("nonexistent"),
            "k_value",
            40i64,
            PatchSource::Manual,
        );
        assert!(matches!(
            control.submit_patch(patch),
            Err(PatchRejection::ProcessorNotFound { .. })
        ));
    }

    #[test]
    fn expired_patch_is_rejected() {
        let (control, _knob) = control_with_knob(test_policy(10, 0));
        let mut patch = k_patch(40);
        patch.timestamp = 1000;
        patch.ttl_seconds = 1;
        assert_eq!(
            control.submit_patch(patch).expect_err("expired"),
            PatchRejection::PatchExpired
        );
    }

    #[test]
    fn validation_failure_keeps_state_and_appends_history() {
        let (control, knob) = control_with_knob(test_policy(10, 0));
        let rejection = control.submit_patch(k_patch(0)).expect_err("invalid");
        assert!(matches!(rejection, PatchRejection::ValidationFailed { .. }));
        assert_eq!(
            knob.get_config_status().get("k_value"),
            Some(PatchValue::Int(20))
        );

        let history = control.get_patch_history(10);
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
        assert!(history[0].error.is_some());
    }

    #[test]
    fn safe_mode_rejects_normal_and_admits_override() {
        let (control, knob) = control_with_knob(test_policy(10, 0));
        control.set_safe_mode(true);
        assert!(control.is_in_safe_mode());

        assert_eq!(
            control.submit_patch(k_patch(40)).expect_err("blocked"),
            PatchRejection::SafeModeActive
        );

        let override_patch = k_patch(50)
            .with_severity(PatchSeverity::Urgent)
            .with_safety_override();
        let _ = control
            .submit_patch(override_patch)
            .expect("override admitted");
        assert_eq!(
            knob.get_config_status().get("k_value"),
            Some(PatchValue::Int(50))
        );
    }

    #[test]
    fn safe_mode_is_sticky_for_auto_exit() {
        let mut policy = test_policy(10, 0);
        policy.pic_control_config.safe_mode_cooldown_seconds = 3600;
        let (control, _knob) = control_with_knob(policy);

        control.enter_safe_mode("test");
        assert!(!control.maybe_auto_exit_safe_mode());
        assert!(control.is_in_safe_mode());

        // Explicit operator exit bypasses stickiness.
        control.set_safe_mode(false);
        assert!(!control.is_in_safe_mode());
    }

    #[test]
    fn safe_mode_entry_applies_presets() {
        let mut policy = test_policy(10, 0);
        let _ = policy.processors_config.insert(
            "adaptive_topk".to_owned(),
            ProcessorSettings {
                enabled: true,
                params: BTreeMap::from([("k_value".to_owned(), PatchValue::Int(20))]),
            },
        );
        let _ = policy.pic_control_config.safe_mode_processor_configs.insert(
            "adaptive_topk".to_owned(),
            BTreeMap::from([("k_value".to_owned(), PatchValue::Int(5))]),
        );
        let (control, knob) = control_with_knob(policy);

        control.enter_safe_mode("resource pressure");
        assert_eq!(
            knob.get_config_status().get("k_value"),
            Some(PatchValue::Int(5))
        );

        // Exit restores the policy's configuration.
        control.set_safe_mode(false);
        assert_eq!(
            knob.get_config_status().get("k_value"),
            Some(PatchValue::Int(20))
        );
    }

    #[test]
    fn policy_apply_is_idempotent() {
        let mut policy = test_policy(10, 0);
        let _ = policy.processors_config.insert(
            "adaptive_topk".to_owned(),
            ProcessorSettings {
                enabled: true,
                params: BTreeMap::from([("k_value".to_owned(), PatchValue::Int(35))]),
            },
        );
        let (control, knob) = control_with_knob(policy);

        control.apply_processors_config();
        assert_eq!(
            knob.get_config_status().get("k_value"),
            Some(PatchValue::Int(35))
        );
        let after_first = control.get_patch_history(100).len();

        control.apply_processors_config();
        assert_eq!(
            control.get_patch_history(100).len(),
            after_first,
            "second apply emits nothing new"
        );
    }

    #[test]
    fn shadow_autonomy_records_without_dispatching() {
        let mut policy = test_policy(10, 0);
        policy.global_settings.autonomy_level = AutonomyLevel::Shadow;
        let (control, knob) = control_with_knob(policy);

        let ack = control.submit_patch(k_patch(40)).expect("admitted");
        assert!(!ack.dispatched);
        assert_eq!(
            knob.get_config_status().get("k_value"),
            Some(PatchValue::Int(20)),
            "shadow must not touch the processor"
        );
        assert_eq!(control.get_patch_history(10).len(), 1);
    }

    #[test]
    fn repeated_reload_failures_force_safe_mode() {
        let (control, _knob) = control_with_knob(test_policy(10, 0));
        for _ in 0..3 {
            let _ = control.install_policy_yaml("not: [valid").err();
        }
        assert!(control.is_in_safe_mode());
    }

    #[test]
    fn stop_accepting_closes_the_intake() {
        let (control, _knob) = control_with_knob(test_policy(10, 0));
        control.stop_accepting();
        assert!(control.submit_patch(k_patch(40)).is_err());
    }
}
