// SPDX-License-Identifier: Apache-2.0

//! The declarative policy document.
//!
//! A policy describes desired processor parameters, PID controller
//! declarations, and governance settings. It lives on disk as YAML (or is
//! fetched from the remote control plane), is parsed into a [`Policy`], and is
//! swapped in atomically by the governance extension. A swap triggers
//! reapplication of `processors_config` as internal patches.

use crate::error::Error;
use crate::patch::PatchValue;
use crate::ProcessorId;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// How intrusively the control plane is allowed to act.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
    Default,
)]
#[serde(rename_all = "lowercase")]
pub enum AutonomyLevel {
    /// Admitted patches are recorded but never dispatched.
    Shadow,
    /// Patches dispatch, flagged as advisory in history.
    Advisory,
    /// Full autonomy.
    #[default]
    Active,
}

/// Process-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Control-plane autonomy level.
    #[serde(default)]
    pub autonomy_level: AutonomyLevel,
    /// CPU limit in millicores that triggers safe mode.
    #[serde(default = "default_cpu_safety_limit_mcores")]
    pub cpu_safety_limit_mcores: u64,
    /// Resident-set limit in MiB that triggers safe mode.
    #[serde(default = "default_rss_safety_limit_mib")]
    pub rss_safety_limit_mib: u64,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            autonomy_level: AutonomyLevel::default(),
            cpu_safety_limit_mcores: default_cpu_safety_limit_mcores(),
            rss_safety_limit_mib: default_rss_safety_limit_mib(),
        }
    }
}

const fn default_cpu_safety_limit_mcores() -> u64 {
    2000
}

const fn default_rss_safety_limit_mib() -> u64 {
    1024
}

/// Desired configuration of one processor instance.
///
/// `enabled` is pulled out of the parameter map because the applier must emit
/// it last: enabling a processor before its parameters are in place would
/// briefly run it misconfigured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessorSettings {
    /// Whether the processor's data path is active.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Remaining parameters, applied in declaration order.
    #[serde(flatten)]
    pub params: BTreeMap<String, PatchValue>,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            params: BTreeMap::new(),
        }
    }
}

const fn default_true() -> bool {
    true
}

/// One declared output of a PID controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct OutputPatch {
    /// The processor the controller steers.
    pub target: ProcessorId,
    /// The parameter the controller rewrites.
    pub parameter_path: String,
    /// Multiplier from PID output to parameter delta.
    pub scale: f64,
    /// Lower clamp for the emitted value.
    pub min: f64,
    /// Upper clamp for the emitted value.
    pub max: f64,
}

/// Declaration of one PID controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PidControllerConfig {
    /// Controller name, unique within the policy.
    pub name: String,
    /// Whether the controller evaluates at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// The KPI metric this controller observes.
    pub kpi_metric_name: String,
    /// The setpoint for the KPI.
    pub kpi_target: f64,
    /// Proportional gain.
    pub kp: f64,
    /// Integral gain.
    #[serde(default)]
    pub ki: f64,
    /// Derivative gain.
    #[serde(default)]
    pub kd: f64,
    /// Clamp for the integral term magnitude; 0 disables the clamp.
    #[serde(default)]
    pub integral_windup_limit: f64,
    /// Dead-band, in percent of the last output, below which a candidate
    /// change is suppressed as noise.
    #[serde(default = "default_hysteresis_percent")]
    pub hysteresis_percent: f64,
    /// Enables the Bayesian fallback explorer on stall.
    #[serde(default)]
    pub use_bayesian: bool,
    /// Number of near-identical consecutive outputs that counts as a stall.
    #[serde(default = "default_stall_threshold")]
    pub stall_threshold: u32,
    /// Parameters this controller rewrites.
    #[serde(default)]
    pub output_patches: Vec<OutputPatch>,
}

const fn default_hysteresis_percent() -> f64 {
    5.0
}

const fn default_stall_threshold() -> u32 {
    10
}

/// TLS material for the remote control-plane client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(deny_unknown_fields)]
pub struct RemoteTlsConfig {
    /// Path to a PEM bundle of additional trusted roots.
    #[serde(default)]
    pub ca_file: Option<String>,
    /// Path to the client certificate (PEM), enabling mutual TLS.
    #[serde(default)]
    pub cert_file: Option<String>,
    /// Path to the client private key (PEM).
    #[serde(default)]
    pub key_file: Option<String>,
}

/// Remote control-plane client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct OpampClientConfig {
    /// Base URL of the remote endpoint (e.g. `https://cp.example.com/v1`).
    pub endpoint: String,
    /// Poll interval in seconds.
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    /// TLS material; system roots only when absent.
    #[serde(default)]
    pub tls: RemoteTlsConfig,
}

const fn default_poll_interval_seconds() -> u64 {
    30
}

const fn default_request_timeout_seconds() -> u64 {
    10
}

/// Governance settings for the PIC control extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PicControlConfig {
    /// Maximum accepted non-urgent patches per target within the trailing
    /// rate-limit window.
    #[serde(default = "default_max_patches_per_minute")]
    pub max_patches_per_minute: u32,
    /// Length of the trailing rate-limit window in seconds.
    #[serde(default = "default_rate_limit_window_seconds")]
    pub rate_limit_window_seconds: u64,
    /// Minimum seconds between accepted patches, globally.
    #[serde(default = "default_patch_cooldown_seconds")]
    pub patch_cooldown_seconds: u64,
    /// Seconds safe mode stays sticky after its trigger clears.
    #[serde(default = "default_safe_mode_cooldown_seconds")]
    pub safe_mode_cooldown_seconds: u64,
    /// Bounded size of the patch-history ring.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    /// Degraded-but-safe parameter presets applied on safe-mode entry,
    /// keyed by processor identity.
    #[serde(default)]
    pub safe_mode_processor_configs: BTreeMap<String, BTreeMap<String, PatchValue>>,
    /// Absolute path of the policy file to watch for hot reload.
    #[serde(default)]
    pub policy_file_path: Option<String>,
    /// Remote control-plane client; disabled when absent.
    #[serde(default)]
    pub opamp_client_config: Option<OpampClientConfig>,
}

impl Default for PicControlConfig {
    fn default() -> Self {
        Self {
            max_patches_per_minute: default_max_patches_per_minute(),
            rate_limit_window_seconds: default_rate_limit_window_seconds(),
            patch_cooldown_seconds: default_patch_cooldown_seconds(),
            safe_mode_cooldown_seconds: default_safe_mode_cooldown_seconds(),
            history_size: default_history_size(),
            safe_mode_processor_configs: BTreeMap::new(),
            policy_file_path: None,
            opamp_client_config: None,
        }
    }
}

const fn default_max_patches_per_minute() -> u32 {
    6
}

const fn default_rate_limit_window_seconds() -> u64 {
    60
}

const fn default_patch_cooldown_seconds() -> u64 {
    5
}

const fn default_safe_mode_cooldown_seconds() -> u64 {
    120
}

const fn default_history_size() -> usize {
    256
}

/// The top-level policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    /// Process-wide settings.
    #[serde(default)]
    pub global_settings: GlobalSettings,
    /// Desired processor configurations, keyed by processor identity.
    #[serde(default)]
    pub processors_config: BTreeMap<String, ProcessorSettings>,
    /// PID controller declarations.
    #[serde(default)]
    pub pid_controllers: Vec<PidControllerConfig>,
    /// Governance settings.
    #[serde(default)]
    pub pic_control_config: PicControlConfig,
}

impl Policy {
    /// Parses a policy from YAML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeserializationError`] on malformed YAML and
    /// [`Error::InvalidPolicy`] when semantic validation fails.
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let policy: Policy =
            serde_yaml::from_str(yaml).map_err(|e| Error::DeserializationError {
                format: "YAML".to_owned(),
                details: e.to_string(),
            })?;
        let errors = policy.validation_errors();
        if errors.is_empty() {
            Ok(policy)
        } else {
            Err(Error::InvalidPolicy { errors })
        }
    }

    /// Reads and parses a policy file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileReadError`] when the file cannot be read, plus
    /// everything [`Policy::from_yaml`] returns.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let yaml = std::fs::read_to_string(path).map_err(|e| Error::FileReadError {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;
        Self::from_yaml(&yaml)
    }

    /// Serializes the policy to YAML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SerializationError`] when serialization fails.
    pub fn to_yaml(&self) -> Result<String, Error> {
        serde_yaml::to_string(self).map_err(|e| Error::SerializationError {
            format: "YAML".to_owned(),
            details: e.to_string(),
        })
    }

    /// Returns semantic validation errors for this document.
    ///
    /// Cross-references: every controller output target must appear in
    /// `processors_config`; controller names must be unique; gains and
    /// bounds must be finite and ordered.
    #[must_use]
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let mut seen_names = std::collections::BTreeSet::new();
        for controller in &self.pid_controllers {
            let name = controller.name.as_str();
            if !seen_names.insert(name) {
                errors.push(format!("pid_controllers: duplicate controller name {name}"));
            }
            if controller.kpi_metric_name.is_empty() {
                errors.push(format!("pid_controllers.{name}: kpi_metric_name is empty"));
            }
            for value in [
                controller.kpi_target,
                controller.kp,
                controller.ki,
                controller.kd,
                controller.integral_windup_limit,
                controller.hysteresis_percent,
            ] {
                if !value.is_finite() {
                    errors.push(format!("pid_controllers.{name}: non-finite tuning value"));
                    break;
                }
            }
            if controller.hysteresis_percent < 0.0 {
                errors.push(format!(
                    "pid_controllers.{name}: hysteresis_percent must be >= 0"
                ));
            }
            if controller.integral_windup_limit < 0.0 {
                errors.push(format!(
                    "pid_controllers.{name}: integral_windup_limit must be >= 0"
                ));
            }
            for patch in &controller.output_patches {
                if patch.min > patch.max {
                    errors.push(format!(
                        "pid_controllers.{name}: output patch {} has min > max",
                        patch.parameter_path
                    ));
                }
                if !patch.scale.is_finite() || patch.scale == 0.0 {
                    errors.push(format!(
                        "pid_controllers.{name}: output patch {} has invalid scale",
                        patch.parameter_path
                    ));
                }
                let target = patch.target.to_string();
                if !self.processors_config.contains_key(&target) {
                    errors.push(format!(
                        "pid_controllers.{name}: output patch targets unknown processor {target}"
                    ));
                }
            }
        }

        let pic = &self.pic_control_config;
        if pic.max_patches_per_minute == 0 {
            errors.push("pic_control_config.max_patches_per_minute must be greater than 0".into());
        }
        if pic.rate_limit_window_seconds == 0 {
            errors
                .push("pic_control_config.rate_limit_window_seconds must be greater than 0".into());
        }
        if pic.history_size == 0 {
            errors.push("pic_control_config.history_size must be greater than 0".into());
        }
        for target in pic.safe_mode_processor_configs.keys() {
            if !self.processors_config.contains_key(target) {
                errors.push(format!(
                    "pic_control_config.safe_mode_processor_configs: unknown processor {target}"
                ));
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
global_settings:
  autonomy_level: active
  cpu_safety_limit_mcores: 1500
  rss_safety_limit_mib: 768
processors_config:
  priority_tagger:
    enabled: true
    default_priority: normal
  adaptive_topk:
    enabled: true
    k_value: 20
    k_min: 5
    k_max: 200
pid_controllers:
  - name: coverage
    kpi_metric_name: phoenix_topk_coverage
    kpi_target: 0.9
    kp: 50.0
    ki: 5.0
    kd: 0.0
    integral_windup_limit: 10.0
    hysteresis_percent: 10.0
    output_patches:
      - target: adaptive_topk
        parameter_path: k_value
        scale: 1.0
        min: 5
        max: 200
pic_control_config:
  max_patches_per_minute: 4
  patch_cooldown_seconds: 2
  safe_mode_processor_configs:
    adaptive_topk:
      k_value: 5
"#;

    #[test]
    fn parses_and_validates_example() {
        let policy = Policy::from_yaml(EXAMPLE).expect("valid policy");
        assert_eq!(policy.global_settings.cpu_safety_limit_mcores, 1500);
        assert_eq!(policy.pid_controllers.len(), 1);
        assert_eq!(policy.pid_controllers[0].output_patches.len(), 1);
        assert_eq!(
            policy.processors_config["adaptive_topk"].params["k_value"],
            PatchValue::Int(20)
        );
        // Defaults fill unlisted governance knobs.
        assert_eq!(policy.pic_control_config.rate_limit_window_seconds, 60);
        assert_eq!(policy.pic_control_config.history_size, 256);
    }

    #[test]
    fn yaml_round_trip_preserves_document() {
        let policy = Policy::from_yaml(EXAMPLE).expect("valid policy");
        let yaml = policy.to_yaml().expect("serialize");
        let back = Policy::from_yaml(&yaml).expect("reparse");
        assert_eq!(policy, back);
    }

    #[test]
    fn unknown_output_target_is_rejected() {
        let yaml = EXAMPLE.replace("target: adaptive_topk", "target: nonexistent");
        let err = Policy::from_yaml(&yaml).expect_err("must fail validation");
        match err {
            Error::InvalidPolicy { errors } => {
                assert!(errors.iter().any(|e| e.contains("nonexistent")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_controller_names_rejected() {
        let policy = Policy::from_yaml(EXAMPLE).expect("valid policy");
        let mut doubled = policy.clone();
        doubled.pid_controllers.push(policy.pid_controllers[0].clone());
        assert!(
            doubled
                .validation_errors()
                .iter()
                .any(|e| e.contains("duplicate"))
        );
    }

    #[test]
    fn malformed_yaml_is_a_deserialization_error() {
        let err = Policy::from_yaml("processors_config: [not, a, map]").expect_err("must fail");
        assert!(matches!(err, Error::DeserializationError { .. }));
    }
}
