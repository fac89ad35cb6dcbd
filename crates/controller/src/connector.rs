// SPDX-License-Identifier: Apache-2.0

//! PIC connector: transports patch proposals from the decider to the
//! governance extension.
//!
//! Two implementations, both preserving proposal order within a single
//! decider evaluation:
//!
//! - [`DirectConnector`]: holds the extension and submits immediately.
//! - Metric-encoded: the decider appends a synthetic `ctrl_proposed_patch`
//!   metric per proposal ([`encode_patch`]); a [`MetricsConnector`] stage in
//!   the control pipeline parses those points ([`decode_patch`]) and
//!   submits them. An attribute set missing any required field, or carrying
//!   more than one value attribute, is dropped and counted as malformed.

use crate::extension::PicControl;
use crate::metrics::ConnectorMetrics;
use phoenix_config::{ConfigPatch, PatchSource, ProcessorId};
use phoenix_engine::error::{EngineError, PatchError};
use phoenix_engine::processor::{ConfigStatus, MetricsProcessor, UpdateableProcessor};
use phoenix_pdata::{AttributeValue, MetricBatch, MetricPoint};
use phoenix_telemetry::TelemetryRegistry;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Metric name carrying an encoded patch proposal.
pub const CTRL_PROPOSED_PATCH: &str = "ctrl_proposed_patch";

/// Processor type name of the metric-parsing connector stage.
pub const PIC_CONNECTOR_KIND: &str = "pic_connector";

/// Consumer of patch proposals emitted by the decider.
pub trait PatchSink: Send + Sync {
    /// Accepts one proposal. Outcomes are the sink's concern; the decider
    /// does not retry.
    fn submit_proposal(&self, patch: ConfigPatch);
}

/// Connector that submits proposals straight into the extension.
pub struct DirectConnector {
    control: Arc<PicControl>,
    metrics: Arc<ConnectorMetrics>,
}

impl DirectConnector {
    /// Creates the connector and registers its metric set.
    #[must_use]
    pub fn new(control: Arc<PicControl>, telemetry: &TelemetryRegistry) -> Arc<Self> {
        let metrics = Arc::new(ConnectorMetrics::default());
        telemetry.register(metrics.clone());
        Arc::new(Self { control, metrics })
    }
}

impl PatchSink for DirectConnector {
    fn submit_proposal(&self, patch: ConfigPatch) {
        self.metrics.forwarded_total.inc();
        if let Err(rejection) = self.control.submit_patch(patch) {
            self.metrics.rejected_total.inc();
            tracing::debug!(error = %rejection, "proposal rejected");
        }
    }
}

/// Encodes a patch proposal as a synthetic metric point.
///
/// The attribute schema is `patch_id`, `target_processor`,
/// `parameter_path`, and exactly one of `new_value_int`,
/// `new_value_double`, `new_value_string`, `new_value_bool`. Proposals with
/// list values cannot be encoded and return `None`.
#[must_use]
pub fn encode_patch(patch: &ConfigPatch) -> Option<MetricPoint> {
    use phoenix_config::PatchValue;

    let mut point = MetricPoint::gauge(
        CTRL_PROPOSED_PATCH,
        1.0,
        patch.timestamp * 1_000_000_000,
    );
    point
        .attributes
        .upsert("patch_id", patch.patch_id.as_str());
    point
        .attributes
        .upsert("target_processor", patch.target_processor.to_string());
    point
        .attributes
        .upsert("parameter_path", patch.parameter_path.as_str());
    match &patch.new_value {
        PatchValue::Int(i) => point.attributes.upsert("new_value_int", *i),
        PatchValue::Double(d) => point.attributes.upsert("new_value_double", *d),
        PatchValue::Str(s) => point.attributes.upsert("new_value_string", s.as_str()),
        PatchValue::Bool(b) => point.attributes.upsert("new_value_bool", *b),
        PatchValue::List(_) => return None,
    }
    Some(point)
}

/// Decodes a `ctrl_proposed_patch` point back into a patch.
///
/// Returns `None` when a required attribute is missing or the value
/// encoding is ambiguous.
#[must_use]
pub fn decode_patch(point: &MetricPoint) -> Option<ConfigPatch> {
    use phoenix_config::PatchValue;

    if point.name != CTRL_PROPOSED_PATCH {
        return None;
    }
    let patch_id = point.attributes.get("patch_id")?.as_str()?.to_owned();
    let target = point.attributes.get("target_processor")?.as_str()?.to_owned();
    let parameter_path = point.attributes.get("parameter_path")?.as_str()?.to_owned();

    let mut value: Option<PatchValue> = None;
    for key in [
        "new_value_int",
        "new_value_double",
        "new_value_string",
        "new_value_bool",
    ] {
        if let Some(attr) = point.attributes.get(key) {
            let decoded = match (key, attr) {
                ("new_value_int", AttributeValue::Int(i)) => PatchValue::Int(*i),
                ("new_value_double", AttributeValue::Double(d)) => PatchValue::Double(*d),
                ("new_value_string", AttributeValue::Str(s)) => PatchValue::Str(s.clone()),
                ("new_value_bool", AttributeValue::Bool(b)) => PatchValue::Bool(*b),
                _ => return None,
            };
            if value.is_some() {
                // More than one value attribute: ambiguous, drop.
                return None;
            }
            value = Some(decoded);
        }
    }

    Some(
        ConfigPatch::new(
            patch_id,
            ProcessorId::parse(&target),
            parameter_path,
            value?,
            PatchSource::PidDecider,
        )
        .with_ttl(300),
    )
}

/// Control-pipeline stage that parses encoded proposals and submits them.
///
/// Proposal points are removed from the stream; everything else passes
/// through unchanged.
pub struct MetricsConnector {
    id: ProcessorId,
    control: Arc<PicControl>,
    metrics: Arc<ConnectorMetrics>,
}

impl MetricsConnector {
    /// Creates the connector stage and registers its metric set.
    #[must_use]
    pub fn new(control: Arc<PicControl>, telemetry: &TelemetryRegistry) -> Self {
        let metrics = Arc::new(ConnectorMetrics::default());
        telemetry.register(metrics.clone());
        Self {
            id: ProcessorId::named(PIC_CONNECTOR_KIND),
            control,
            metrics,
        }
    }
}

impl MetricsProcessor for MetricsConnector {
    fn id(&self) -> &ProcessorId {
        &self.id
    }

    fn consume_batch(&self, batch: MetricBatch) -> Result<MetricBatch, EngineError> {
        let (proposals, rest) = batch.partition(|_, point| point.name == CTRL_PROPOSED_PATCH);
        for (_, _, point) in proposals.iter_points() {
            match decode_patch(point) {
                Some(patch) => {
                    self.metrics.forwarded_total.inc();
                    if let Err(rejection) = self.control.submit_patch(patch) {
                        self.metrics.rejected_total.inc();
                        tracing::debug!(error = %rejection, "proposal rejected");
                    }
                }
                None => {
                    self.metrics.malformed_total.inc();
                }
            }
        }
        Ok(rest)
    }
}

impl UpdateableProcessor for MetricsConnector {
    fn on_config_patch(&self, patch: &ConfigPatch) -> Result<(), PatchError> {
        Err(PatchError::UnknownParameter {
            path: patch.parameter_path.clone(),
        })
    }

    fn get_config_status(&self) -> ConfigStatus {
        ConfigStatus {
            parameters: BTreeMap::new(),
            enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_config::PatchValue;

    fn proposal(value: PatchValue) -> ConfigPatch {
        ConfigPatch::new(
            "p-1",
            ProcessorId::named("adaptive_topk"),
            "k_value",
            value,
            PatchSource::PidDecider,
        )
    }

    #[test]
    fn encode_decode_round_trip() {
        for value in [
            PatchValue::Int(40),
            PatchValue::Double(0.5),
            PatchValue::Str("drop".to_owned()),
            PatchValue::Bool(true),
        ] {
            let patch = proposal(value.clone());
            let point = encode_patch(&patch).expect("encodable");
            let decoded = decode_patch(&point).expect("decodable");
            assert_eq!(decoded.patch_id, patch.patch_id);
            assert_eq!(decoded.target_processor, patch.target_processor);
            assert_eq!(decoded.parameter_path, patch.parameter_path);
            assert_eq!(decoded.new_value, value);
        }
    }

    #[test]
    fn list_values_are_not_encodable() {
        let patch = proposal(PatchValue::List(vec![PatchValue::Int(1)]));
        assert!(encode_patch(&patch).is_none());
    }

    #[test]
    fn missing_fields_decode_to_none() {
        let patch = proposal(PatchValue::Int(40));
        let mut point = encode_patch(&patch).expect("encodable");
        let _ = point.attributes.remove("parameter_path");
        assert!(decode_patch(&point).is_none());
    }

    #[test]
    fn two_value_attributes_are_ambiguous() {
        let patch = proposal(PatchValue::Int(40));
        let mut point = encode_patch(&patch).expect("encodable");
        point.attributes.upsert("new_value_double", 40.0);
        assert!(decode_patch(&point).is_none());
    }

    #[test]
    fn foreign_metrics_do_not_decode() {
        let point = MetricPoint::gauge("some.metric", 1.0, 0);
        assert!(decode_patch(&point).is_none());
    }
}
