// SPDX-License-Identifier: Apache-2.0

//! Remote control-plane client.
//!
//! A periodic poll against a configured base URL, three requests per tick:
//!
//! - `GET {base}/policy`: a 200 with changed bytes is treated exactly like a
//!   policy-file reload (validate, swap, reapply). Unchanged bytes are
//!   detected by content hash and skipped.
//! - `GET {base}/patch`: a 200 carries one JSON [`ConfigPatch`], submitted
//!   with source forced to `remote`.
//! - `POST {base}/status`: reports `{"safe_mode": bool}`.
//!
//! Transport is HTTPS via rustls; a CA bundle and a client identity (for
//! mutual TLS) are optional. Transport failures are logged and counted, the
//! task retries on the next tick, and nothing mutates runtime state.

use crate::error::ControllerError;
use crate::extension::PicControl;
use crate::metrics::RemoteMetrics;
use phoenix_config::policy::OpampClientConfig;
use phoenix_config::{ConfigPatch, PatchSource};
use parking_lot::Mutex;
use phoenix_telemetry::TelemetryRegistry;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The polling client. See the module docs.
pub struct RemoteClient {
    config: OpampClientConfig,
    http: reqwest::Client,
    control: Arc<PicControl>,
    last_policy_hash: Mutex<Option<u64>>,
    metrics: Arc<RemoteMetrics>,
}

impl RemoteClient {
    /// Builds the client, loading TLS material from the configured paths.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::RemoteUnreachable`] when TLS material
    /// cannot be read or the HTTP client cannot be constructed.
    pub fn new(
        config: OpampClientConfig,
        control: Arc<PicControl>,
        telemetry: &TelemetryRegistry,
    ) -> Result<Self, ControllerError> {
        let metrics = Arc::new(RemoteMetrics::default());
        telemetry.register(metrics.clone());

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .use_rustls_tls();

        if let Some(ca_file) = &config.tls.ca_file {
            let pem = std::fs::read(ca_file).map_err(|e| setup_error(ca_file, &e))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| setup_error(ca_file, &e))?;
            builder = builder.add_root_certificate(cert);
        }
        if let (Some(cert_file), Some(key_file)) =
            (&config.tls.cert_file, &config.tls.key_file)
        {
            let mut pem = std::fs::read(cert_file).map_err(|e| setup_error(cert_file, &e))?;
            pem.extend(std::fs::read(key_file).map_err(|e| setup_error(key_file, &e))?);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| setup_error(cert_file, &e))?;
            builder = builder.identity(identity);
        }

        let http = builder.build().map_err(|e| ControllerError::RemoteUnreachable {
            details: e.to_string(),
        })?;

        Ok(Self {
            config,
            http,
            control,
            last_policy_hash: Mutex::new(None),
            metrics,
        })
    }

    /// One poll cycle: policy, patch, status.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::RemoteUnreachable`] on any transport
    /// failure; partial progress within the cycle is kept.
    pub async fn poll_once(&self) -> Result<(), ControllerError> {
        self.metrics.polls_total.inc();
        let base = self.config.endpoint.trim_end_matches('/');

        let response = self
            .http
            .get(format!("{base}/policy"))
            .send()
            .await
            .map_err(transport_error)?;
        if response.status() == reqwest::StatusCode::OK {
            let body = response.text().await.map_err(transport_error)?;
            let hash = content_hash(&body);
            let changed = *self.last_policy_hash.lock() != Some(hash);
            if changed {
                match self.control.install_policy_yaml(&body) {
                    Ok(()) => {
                        *self.last_policy_hash.lock() = Some(hash);
                        self.metrics.policies_fetched_total.inc();
                        tracing::info!("policy installed from remote control plane");
                    }
                    Err(error) => {
                        tracing::warn!(%error, "remote policy rejected; previous retained");
                    }
                }
            }
        }

        let response = self
            .http
            .get(format!("{base}/patch"))
            .send()
            .await
            .map_err(transport_error)?;
        if response.status() == reqwest::StatusCode::OK {
            match response.json::<ConfigPatch>().await {
                Ok(mut patch) => {
                    patch.source = PatchSource::Remote;
                    self.metrics.patches_fetched_total.inc();
                    if let Err(rejection) = self.control.submit_patch(patch) {
                        tracing::debug!(error = %rejection, "remote patch rejected");
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "malformed remote patch body");
                }
            }
        }

        let status = serde_json::json!({ "safe_mode": self.control.is_in_safe_mode() });
        let _ = self
            .http
            .post(format!("{base}/status"))
            .json(&status)
            .send()
            .await
            .map_err(transport_error)?;

        Ok(())
    }

    /// Background poll loop; exits promptly on cancellation.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_seconds.max(1)));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("remote client stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }
            if let Err(error) = self.poll_once().await {
                self.metrics.unreachable_total.inc();
                tracing::warn!(%error, "remote poll failed; retrying next tick");
            }
        }
    }
}

fn content_hash(body: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    hasher.finish()
}

fn transport_error(error: reqwest::Error) -> ControllerError {
    ControllerError::RemoteUnreachable {
        details: error.to_string(),
    }
}

fn setup_error(path: &str, error: &dyn std::fmt::Display) -> ControllerError {
    ControllerError::RemoteUnreachable {
        details: format!("{path}: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Knob;
    use phoenix_config::policy::OpampClientConfig;
    use phoenix_config::{PatchValue, Policy, ProcessorId};
    use phoenix_engine::processor::UpdateableProcessor;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_config(endpoint: String) -> OpampClientConfig {
        OpampClientConfig {
            endpoint,
            poll_interval_seconds: 1,
            request_timeout_seconds: 2,
            tls: Default::default(),
        }
    }

    fn control_with_knob() -> (Arc<PicControl>, Arc<Knob>) {
        let mut policy = Policy::default();
        policy.pic_control_config.patch_cooldown_seconds = 0;
        let control = PicControl::new(policy, &TelemetryRegistry::new());
        let knob = Knob::new("adaptive_topk", 20);
        let updateable: Arc<dyn UpdateableProcessor> = knob.clone();
        control.register_updateable(&updateable);
        (control, knob)
    }

    #[tokio::test]
    async fn poll_applies_remote_policy_and_patch() {
        let server = MockServer::start().await;
        let policy_yaml = r"
processors_config:
  adaptive_topk:
    enabled: true
    k_value: 44
";
        Mock::given(method("GET"))
            .and(path("/policy"))
            .respond_with(ResponseTemplate::new(200).set_body_string(policy_yaml))
            .mount(&server)
            .await;

        let patch = ConfigPatch::new(
            "remote-1",
            ProcessorId::named("adaptive_topk"),
            "k_value",
            55i64,
            PatchSource::Manual,
        );
        Mock::given(method("GET"))
            .and(path("/patch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&patch))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/status"))
            .and(body_json(serde_json::json!({ "safe_mode": false })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (control, knob) = control_with_knob();
        let client = RemoteClient::new(
            client_config(server.uri()),
            control.clone(),
            &TelemetryRegistry::new(),
        )
        .expect("client");

        client.poll_once().await.expect("poll");

        // The remote patch lands after the policy apply.
        assert_eq!(
            knob.get_config_status().get("k_value"),
            Some(PatchValue::Int(55))
        );
        let history = control.get_patch_history(10);
        assert!(
            history
                .iter()
                .any(|r| r.patch.source == PatchSource::Remote)
        );
    }

    #[tokio::test]
    async fn missing_remote_endpoints_are_not_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/policy"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/patch"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let (control, _knob) = control_with_knob();
        let client = RemoteClient::new(
            client_config(server.uri()),
            control,
            &TelemetryRegistry::new(),
        )
        .expect("client");
        client.poll_once().await.expect("poll");
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_transport_error() {
        let (control, _knob) = control_with_knob();
        let client = RemoteClient::new(
            client_config("http://127.0.0.1:1".to_owned()),
            control,
            &TelemetryRegistry::new(),
        )
        .expect("client");
        assert!(matches!(
            client.poll_once().await,
            Err(ControllerError::RemoteUnreachable { .. })
        ));
    }
}
