// SPDX-License-Identifier: Apache-2.0

//! End-to-end control-plane scenarios: real processors governed by the
//! extension, steered by the decider through a connector.

use phoenix_config::policy::{OutputPatch, PidControllerConfig, ProcessorSettings};
use phoenix_config::{
    ConfigPatch, PatchSeverity, PatchSource, PatchValue, Policy, ProcessorId,
};
use phoenix_controller::connector::{DirectConnector, MetricsConnector};
use phoenix_controller::decider::{PidDecider, ProposalRoute};
use phoenix_controller::error::PatchRejection;
use phoenix_controller::extension::PicControl;
use phoenix_controller::safety::{SafetyMonitor, Transition};
use phoenix_engine::processor::{MetricsProcessor, UpdateableProcessor};
use phoenix_pdata::{AttributeSet, InstrumentationScope, MetricBatch, MetricPoint};
use phoenix_processors::adaptive_topk::{ADAPTIVE_TOPK_KIND, AdaptiveTopK, Config as TopKConfig};
use phoenix_telemetry::TelemetryRegistry;
use std::collections::BTreeMap;
use std::sync::Arc;

fn topk_config() -> TopKConfig {
    TopKConfig {
        k_value: 20,
        k_min: 5,
        k_max: 200,
        sketch_capacity: 400,
        fingerprint_keys: Vec::new(),
    }
}

fn base_policy() -> Policy {
    let mut policy = Policy::default();
    policy.pic_control_config.patch_cooldown_seconds = 0;
    policy.pic_control_config.max_patches_per_minute = 100;
    let _ = policy.processors_config.insert(
        "adaptive_topk".to_owned(),
        ProcessorSettings {
            enabled: true,
            params: BTreeMap::from([("k_value".to_owned(), PatchValue::Int(20))]),
        },
    );
    policy
}

fn governed_topk(policy: Policy) -> (Arc<PicControl>, Arc<AdaptiveTopK>, TelemetryRegistry) {
    let telemetry = TelemetryRegistry::new();
    let control = PicControl::new(policy, &telemetry);
    let topk = Arc::new(AdaptiveTopK::new(topk_config(), &telemetry));
    let updateable: Arc<dyn UpdateableProcessor> = topk.clone();
    control.register_updateable(&updateable);
    (control, topk, telemetry)
}

fn kpi_batch(coverage: f64) -> MetricBatch {
    let mut batch = MetricBatch::new();
    batch.push_point(
        AttributeSet::new(),
        InstrumentationScope::named("self_metrics"),
        MetricPoint::gauge("phoenix_topk_coverage", coverage, 1),
    );
    batch
}

fn coverage_controller() -> PidControllerConfig {
    PidControllerConfig {
        name: "coverage".to_owned(),
        enabled: true,
        kpi_metric_name: "phoenix_topk_coverage".to_owned(),
        kpi_target: 0.9,
        kp: 100.0,
        ki: 0.0,
        kd: 0.0,
        integral_windup_limit: 0.0,
        hysteresis_percent: 5.0,
        use_bayesian: false,
        stall_threshold: 10,
        output_patches: vec![OutputPatch {
            target: ProcessorId::named("adaptive_topk"),
            parameter_path: "k_value".to_owned(),
            scale: 1.0,
            min: 5.0,
            max: 200.0,
        }],
    }
}

#[test]
fn basic_patch_reaches_the_processor() {
    let (control, topk, _telemetry) = governed_topk(base_policy());

    let ack = control
        .submit_patch(ConfigPatch::new(
            "p-1",
            ProcessorId::named(ADAPTIVE_TOPK_KIND),
            "k_value",
            40i64,
            PatchSource::Manual,
        ))
        .expect("accepted");
    assert!(ack.dispatched);

    assert_eq!(
        topk.get_config_status().get("k_value"),
        Some(PatchValue::Int(40))
    );
    let history = control.get_patch_history(10);
    assert_eq!(history.len(), 1);
    assert!(history[0].success);
}

#[test]
fn rate_limit_allows_one_per_minute() {
    let mut policy = base_policy();
    policy.pic_control_config.max_patches_per_minute = 1;
    let (control, _topk, _telemetry) = governed_topk(policy);

    let patch = |id: &str, k: i64| {
        ConfigPatch::new(
            id,
            ProcessorId::named(ADAPTIVE_TOPK_KIND),
            "k_value",
            k,
            PatchSource::Manual,
        )
    };
    let _ = control.submit_patch(patch("p-1", 40)).expect("first ok");
    assert_eq!(
        control.submit_patch(patch("p-2", 41)).expect_err("limited"),
        PatchRejection::RateLimited
    );
    assert_eq!(control.get_patch_history(10).len(), 1);
}

#[test]
fn urgent_override_passes_safe_mode_and_raises_thresholds() {
    let (control, topk, telemetry) = governed_topk(base_policy());
    let monitor = SafetyMonitor::new(1000, 512, &telemetry);
    control.register_safety_monitor(monitor.clone());

    control.set_safe_mode(true);

    let override_patch = ConfigPatch::new(
        "p-urgent",
        ProcessorId::named(ADAPTIVE_TOPK_KIND),
        "k_value",
        50i64,
        PatchSource::Manual,
    )
    .with_severity(PatchSeverity::Urgent)
    .with_safety_override();
    let _ = control.submit_patch(override_patch).expect("admitted");

    assert_eq!(
        topk.get_config_status().get("k_value"),
        Some(PatchValue::Int(50))
    );
    // The override hook raised the monitor's limits: a sample over the base
    // CPU limit no longer counts toward the trigger.
    for _ in 0..5 {
        assert_eq!(monitor.observe_sample(1400.0, 100.0), None);
    }
    assert!(!monitor.is_in_safe_mode());
}

#[test]
fn safety_trigger_applies_safe_mode_presets() {
    let mut policy = base_policy();
    let _ = policy.pic_control_config.safe_mode_processor_configs.insert(
        "adaptive_topk".to_owned(),
        BTreeMap::from([("k_value".to_owned(), PatchValue::Int(5))]),
    );
    let (control, topk, telemetry) = governed_topk(policy);
    let monitor = SafetyMonitor::new(1000, 512, &telemetry);
    control.register_safety_monitor(monitor.clone());

    // CPU over limit three samples in a row.
    assert_eq!(monitor.observe_sample(1500.0, 100.0), None);
    assert_eq!(monitor.observe_sample(1500.0, 100.0), None);
    assert_eq!(
        monitor.observe_sample(1500.0, 100.0),
        Some(Transition::EnterSafeMode)
    );
    control.enter_safe_mode("resource limits exceeded");

    assert!(control.is_in_safe_mode());
    assert_eq!(
        topk.get_config_status().get("k_value"),
        Some(PatchValue::Int(5))
    );
}

#[test]
fn decider_steers_k_through_direct_connector() {
    let mut policy = base_policy();
    policy.pid_controllers.push(coverage_controller());
    let (control, topk, telemetry) = governed_topk(policy.clone());

    let connector = DirectConnector::new(control.clone(), &telemetry);
    let decider = PidDecider::from_policy(&policy, ProposalRoute::Direct(connector), &telemetry);

    // Coverage at 0.5 against a 0.9 target: error 0.4 times kp 100 gives
    // +40; candidate 20 + 40 = 60.
    let _ = decider.consume_batch(kpi_batch(0.5)).expect("evaluate");

    assert_eq!(
        topk.get_config_status().get("k_value"),
        Some(PatchValue::Int(60))
    );
    let history = control.get_patch_history(10);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].patch.source, PatchSource::PidDecider);
}

#[test]
fn decider_steers_k_through_metric_encoded_connector() {
    let mut policy = base_policy();
    policy.pid_controllers.push(coverage_controller());
    let (control, topk, telemetry) = governed_topk(policy.clone());

    let decider = PidDecider::from_policy(&policy, ProposalRoute::MetricEncoded, &telemetry);
    let connector = MetricsConnector::new(control.clone(), &telemetry);

    let proposals = decider.consume_batch(kpi_batch(0.5)).expect("evaluate");
    let rest = connector.consume_batch(proposals).expect("parse");

    assert_eq!(
        topk.get_config_status().get("k_value"),
        Some(PatchValue::Int(60))
    );
    // Proposal points were consumed by the connector stage.
    assert!(
        rest.iter_points()
            .all(|(_, _, p)| p.name != "ctrl_proposed_patch")
    );
}

#[test]
fn shadow_autonomy_observes_but_does_not_steer() {
    let mut policy = base_policy();
    policy.global_settings.autonomy_level = phoenix_config::policy::AutonomyLevel::Shadow;
    policy.pid_controllers.push(coverage_controller());
    let (control, topk, telemetry) = governed_topk(policy.clone());

    let connector = DirectConnector::new(control.clone(), &telemetry);
    let decider = PidDecider::from_policy(&policy, ProposalRoute::Direct(connector), &telemetry);
    let _ = decider.consume_batch(kpi_batch(0.5)).expect("evaluate");

    assert_eq!(
        topk.get_config_status().get("k_value"),
        Some(PatchValue::Int(20)),
        "shadow never touches the data plane"
    );
    assert_eq!(control.get_patch_history(10).len(), 1, "but records intent");
}

#[test]
fn patch_ordering_per_target_is_submission_order() {
    let (control, topk, _telemetry) = governed_topk(base_policy());
    for (id, k) in [("p-1", 30i64), ("p-2", 40), ("p-3", 50)] {
        let _ = control
            .submit_patch(ConfigPatch::new(
                id,
                ProcessorId::named(ADAPTIVE_TOPK_KIND),
                "k_value",
                k,
                PatchSource::Manual,
            ))
            .expect("accepted");
    }

    assert_eq!(
        topk.get_config_status().get("k_value"),
        Some(PatchValue::Int(50))
    );
    let history = control.get_patch_history(10);
    let ids: Vec<&str> = history.iter().map(|r| r.patch.patch_id.as_str()).collect();
    assert_eq!(ids, vec!["p-3", "p-2", "p-1"], "most recent first");
    // Each record captured the value the previous patch installed.
    assert_eq!(history[0].patch.prev_value, Some(PatchValue::Int(40)));
    assert_eq!(history[1].patch.prev_value, Some(PatchValue::Int(30)));
    assert_eq!(history[2].patch.prev_value, Some(PatchValue::Int(20)));
}

#[test]
fn full_loop_converges_toward_the_coverage_target() {
    let mut policy = base_policy();
    let mut controller = coverage_controller();
    controller.kp = 20.0;
    policy.pid_controllers.push(controller);
    let (control, topk, telemetry) = governed_topk(policy.clone());

    let connector = DirectConnector::new(control.clone(), &telemetry);
    let decider = PidDecider::from_policy(&policy, ProposalRoute::Direct(connector), &telemetry);

    // Simulated KPI rising as K grows; the decider keeps nudging K upward.
    for coverage in [0.5, 0.6, 0.7, 0.8] {
        let _ = decider.consume_batch(kpi_batch(coverage)).expect("evaluate");
    }
    let k = topk
        .get_config_status()
        .get("k_value")
        .and_then(|v| v.as_i64())
        .expect("k present");
    assert!(k > 20, "k grew from its initial value, got {k}");

    // Near-target coverage inside the hysteresis band stops the motion.
    let history_len = control.get_patch_history(100).len();
    let _ = decider.consume_batch(kpi_batch(0.899)).expect("evaluate");
    assert_eq!(control.get_patch_history(100).len(), history_len);
}
