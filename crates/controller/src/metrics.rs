// SPDX-License-Identifier: Apache-2.0

//! Metric sets for the control plane.

use phoenix_telemetry::{Counter, Gauge, Histogram, MetricSample, MetricSet, SampleValue};

/// Metrics for the governance extension.
#[derive(Default)]
pub struct ControlMetrics {
    /// Patches submitted, before any gate.
    pub submitted_total: Counter,
    /// Patches accepted and dispatched (or shadowed).
    pub accepted_total: Counter,
    /// Rejections, per admission gate.
    pub rejected_safe_mode_total: Counter,
    /// Rejections by TTL expiry.
    pub rejected_expired_total: Counter,
    /// Rejections by the per-target rate window.
    pub rejected_rate_limited_total: Counter,
    /// Rejections by the global cooldown.
    pub rejected_cooldown_total: Counter,
    /// Rejections because the target is unregistered.
    pub rejected_not_found_total: Counter,
    /// Dispatches the target refused.
    pub rejected_validation_total: Counter,
    /// Patches admitted but not dispatched under shadow autonomy.
    pub shadowed_total: Counter,
    /// End-to-end submit-to-dispatch latency, seconds.
    pub dispatch_latency_seconds: Histogram,
    /// Policy reloads that installed a new policy.
    pub policy_reload_ok_total: Counter,
    /// Policy reloads that kept the previous policy.
    pub policy_reload_failed_total: Counter,
    /// 1 while safe mode is active.
    pub safe_mode: Gauge,
    /// Safe-mode entries.
    pub safe_mode_entered_total: Counter,
}

impl MetricSet for ControlMetrics {
    fn name(&self) -> &str {
        "pic_control"
    }

    fn snapshot(&self) -> Vec<MetricSample> {
        vec![
            MetricSample::new(
                "patches_submitted_total",
                SampleValue::Counter(self.submitted_total.get()),
            ),
            MetricSample::new(
                "patches_accepted_total",
                SampleValue::Counter(self.accepted_total.get()),
            ),
            MetricSample::new(
                "patches_rejected_safe_mode_total",
                SampleValue::Counter(self.rejected_safe_mode_total.get()),
            ),
            MetricSample::new(
                "patches_rejected_expired_total",
                SampleValue::Counter(self.rejected_expired_total.get()),
            ),
            MetricSample::new(
                "patches_rejected_rate_limited_total",
                SampleValue::Counter(self.rejected_rate_limited_total.get()),
            ),
            MetricSample::new(
                "patches_rejected_cooldown_total",
                SampleValue::Counter(self.rejected_cooldown_total.get()),
            ),
            MetricSample::new(
                "patches_rejected_not_found_total",
                SampleValue::Counter(self.rejected_not_found_total.get()),
            ),
            MetricSample::new(
                "patches_rejected_validation_total",
                SampleValue::Counter(self.rejected_validation_total.get()),
            ),
            MetricSample::new(
                "patches_shadowed_total",
                SampleValue::Counter(self.shadowed_total.get()),
            ),
            MetricSample::new(
                "patches_latency_seconds",
                SampleValue::Histogram {
                    buckets: self.dispatch_latency_seconds.buckets(),
                    sum: self.dispatch_latency_seconds.sum(),
                    count: self.dispatch_latency_seconds.count(),
                },
            ),
            MetricSample::new(
                "policy_reload_ok_total",
                SampleValue::Counter(self.policy_reload_ok_total.get()),
            ),
            MetricSample::new(
                "policy_reload_failed_total",
                SampleValue::Counter(self.policy_reload_failed_total.get()),
            ),
            MetricSample::new("safe_mode", SampleValue::Gauge(self.safe_mode.get())),
            MetricSample::new(
                "safe_mode_entered_total",
                SampleValue::Counter(self.safe_mode_entered_total.get()),
            ),
        ]
    }
}

/// Metrics for the PID decider.
#[derive(Default)]
pub struct DeciderMetrics {
    /// Controller evaluations performed.
    pub evaluations_total: Counter,
    /// Evaluations skipped because the KPI was absent from the batch.
    pub kpi_missing_total: Counter,
    /// Candidate values clamped to their output bounds.
    pub clamped_total: Counter,
    /// Candidates suppressed by hysteresis.
    pub suppressed_total: Counter,
    /// Non-finite KPI or arithmetic results replaced with zero.
    pub non_finite_total: Counter,
    /// Patches proposed to the connector.
    pub patches_emitted_total: Counter,
    /// Stall probes proposed by the fallback explorer.
    pub stall_probes_total: Counter,
    /// 1 while the most recent evaluations flipped sign.
    pub oscillation: Gauge,
    /// 1 while a stall is detected.
    pub stall_detected: Gauge,
}

impl MetricSet for DeciderMetrics {
    fn name(&self) -> &str {
        "pid_decider"
    }

    fn snapshot(&self) -> Vec<MetricSample> {
        vec![
            MetricSample::new(
                "decider_evaluations_total",
                SampleValue::Counter(self.evaluations_total.get()),
            ),
            MetricSample::new(
                "decider_kpi_missing_total",
                SampleValue::Counter(self.kpi_missing_total.get()),
            ),
            MetricSample::new(
                "decider_clamped_total",
                SampleValue::Counter(self.clamped_total.get()),
            ),
            MetricSample::new(
                "decider_suppressed_total",
                SampleValue::Counter(self.suppressed_total.get()),
            ),
            MetricSample::new(
                "decider_non_finite_total",
                SampleValue::Counter(self.non_finite_total.get()),
            ),
            MetricSample::new(
                "decider_patches_emitted_total",
                SampleValue::Counter(self.patches_emitted_total.get()),
            ),
            MetricSample::new(
                "decider_stall_probes_total",
                SampleValue::Counter(self.stall_probes_total.get()),
            ),
            MetricSample::new(
                "decider_oscillation",
                SampleValue::Gauge(self.oscillation.get()),
            ),
            MetricSample::new(
                "decider_stall_detected",
                SampleValue::Gauge(self.stall_detected.get()),
            ),
        ]
    }
}

/// Metrics for the safety monitor.
#[derive(Default)]
pub struct SafetyMetrics {
    /// Samples taken.
    pub samples_total: Counter,
    /// Samples that exceeded a limit.
    pub over_limit_total: Counter,
    /// Safe-mode triggers raised by the monitor.
    pub triggers_total: Counter,
    /// Last sampled CPU, millicores.
    pub cpu_mcores: Gauge,
    /// Last sampled resident set, MiB.
    pub rss_mib: Gauge,
    /// 1 while thresholds are temporarily raised.
    pub thresholds_overridden: Gauge,
}

impl MetricSet for SafetyMetrics {
    fn name(&self) -> &str {
        "safety_monitor"
    }

    fn snapshot(&self) -> Vec<MetricSample> {
        vec![
            MetricSample::new(
                "safety_samples_total",
                SampleValue::Counter(self.samples_total.get()),
            ),
            MetricSample::new(
                "safety_over_limit_total",
                SampleValue::Counter(self.over_limit_total.get()),
            ),
            MetricSample::new(
                "safety_triggers_total",
                SampleValue::Counter(self.triggers_total.get()),
            ),
            MetricSample::new("safety_cpu_mcores", SampleValue::Gauge(self.cpu_mcores.get())),
            MetricSample::new("safety_rss_mib", SampleValue::Gauge(self.rss_mib.get())),
            MetricSample::new(
                "safety_thresholds_overridden",
                SampleValue::Gauge(self.thresholds_overridden.get()),
            ),
        ]
    }
}

/// Metrics for the remote control-plane client.
#[derive(Default)]
pub struct RemoteMetrics {
    /// Poll cycles attempted.
    pub polls_total: Counter,
    /// Poll cycles that failed to reach the remote endpoint.
    pub unreachable_total: Counter,
    /// Policy documents fetched and installed.
    pub policies_fetched_total: Counter,
    /// Patches fetched and submitted.
    pub patches_fetched_total: Counter,
}

impl MetricSet for RemoteMetrics {
    fn name(&self) -> &str {
        "remote_client"
    }

    fn snapshot(&self) -> Vec<MetricSample> {
        vec![
            MetricSample::new(
                "remote_polls_total",
                SampleValue::Counter(self.polls_total.get()),
            ),
            MetricSample::new(
                "remote_unreachable_total",
                SampleValue::Counter(self.unreachable_total.get()),
            ),
            MetricSample::new(
                "remote_policies_fetched_total",
                SampleValue::Counter(self.policies_fetched_total.get()),
            ),
            MetricSample::new(
                "remote_patches_fetched_total",
                SampleValue::Counter(self.patches_fetched_total.get()),
            ),
        ]
    }
}

/// Metrics for the connectors.
#[derive(Default)]
pub struct ConnectorMetrics {
    /// Patches forwarded to the extension.
    pub forwarded_total: Counter,
    /// Proposals the extension rejected.
    pub rejected_total: Counter,
    /// Metric-encoded proposals missing required attributes.
    pub malformed_total: Counter,
}

impl MetricSet for ConnectorMetrics {
    fn name(&self) -> &str {
        "pic_connector"
    }

    fn snapshot(&self) -> Vec<MetricSample> {
        vec![
            MetricSample::new(
                "connector_forwarded_total",
                SampleValue::Counter(self.forwarded_total.get()),
            ),
            MetricSample::new(
                "connector_rejected_total",
                SampleValue::Counter(self.rejected_total.get()),
            ),
            MetricSample::new(
                "connector_malformed_total",
                SampleValue::Counter(self.malformed_total.get()),
            ),
        ]
    }
}
