// SPDX-License-Identifier: Apache-2.0

#![allow(missing_docs)]

use phoenix_config::policy::{AutonomyLevel, OpampClientConfig};
use phoenix_config::Policy;

#[test]
fn test_minimal_policy_gets_defaults() {
    let policy = Policy::from_yaml("{}").expect("empty document is a valid policy");

    assert_eq!(policy.global_settings.autonomy_level, AutonomyLevel::Active);
    assert_eq!(policy.global_settings.cpu_safety_limit_mcores, 2000);
    assert_eq!(policy.global_settings.rss_safety_limit_mib, 1024);
    assert_eq!(policy.pic_control_config.max_patches_per_minute, 6);
    assert_eq!(policy.pic_control_config.rate_limit_window_seconds, 60);
    assert_eq!(policy.pic_control_config.patch_cooldown_seconds, 5);
    assert_eq!(policy.pic_control_config.safe_mode_cooldown_seconds, 120);
    assert_eq!(policy.pic_control_config.history_size, 256);
    assert!(policy.pic_control_config.opamp_client_config.is_none());
}

#[test]
fn test_remote_client_defaults() {
    let yaml = r#"
    endpoint: https://control-plane.example.com/phoenix
    "#;

    let config: OpampClientConfig = serde_yaml::from_str(yaml).expect("Failed to parse YAML");

    assert_eq!(config.poll_interval_seconds, 30);
    assert_eq!(config.request_timeout_seconds, 10);
    assert_eq!(config.tls.ca_file, None);
    assert_eq!(config.tls.cert_file, None);
    assert_eq!(config.tls.key_file, None);
}

#[test]
fn test_remote_client_explicit_tls_paths() {
    let yaml = r#"
    endpoint: https://control-plane.example.com/phoenix
    poll_interval_seconds: 10
    tls:
      ca_file: /tmp/ca.pem
      cert_file: /tmp/cert.pem
      key_file: /tmp/key.pem
    "#;

    let config: OpampClientConfig = serde_yaml::from_str(yaml).expect("Failed to parse YAML");

    assert_eq!(config.poll_interval_seconds, 10);
    assert_eq!(config.tls.ca_file.as_deref(), Some("/tmp/ca.pem"));
    assert_eq!(config.tls.cert_file.as_deref(), Some("/tmp/cert.pem"));
    assert_eq!(config.tls.key_file.as_deref(), Some("/tmp/key.pem"));
}
