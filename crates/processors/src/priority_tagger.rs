// SPDX-License-Identifier: Apache-2.0

//! Priority tagger.
//!
//! Annotates each resource with a `process.priority` class by evaluating an
//! ordered list of match rules against the resource attributes. Evaluation is
//! first-match-wins; unmatched resources receive the configurable default.
//!
//! Rules arrive as JSON strings when patched at runtime (the patch value
//! model has no map variant), e.g.:
//!
//! ```json
//! {"match": "regex", "attribute": "process.executable.name",
//!  "pattern": "^kube.*", "priority": "critical"}
//! ```
//!
//! An invalid rule (unknown match kind, regex that does not compile) rejects
//! the patch; a data point is never rejected.

use phoenix_config::{ConfigPatch, PatchValue, ProcessorId};
use phoenix_engine::base::{ParamSchema, UpdateableCore};
use phoenix_engine::error::{EngineError, PatchError};
use phoenix_engine::params::ParamSpec;
use phoenix_engine::processor::{ConfigStatus, MetricsProcessor, UpdateableProcessor};
use phoenix_pdata::{AttributeSet, MetricBatch, PriorityClass};
use phoenix_telemetry::{Counter, Gauge, MetricSample, MetricSet, SampleValue, TelemetryRegistry};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Processor type name.
pub const PRIORITY_TAGGER_KIND: &str = "priority_tagger";

/// How a rule matches a resource attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Attribute value contains the pattern.
    Substring,
    /// Attribute value matches the regular expression.
    Regex,
    /// Attribute value equals the pattern exactly.
    Equals,
}

/// One declarative match rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRule {
    /// Match kind.
    #[serde(rename = "match")]
    pub kind: MatchKind,
    /// The resource attribute to inspect.
    pub attribute: String,
    /// Substring, regex, or exact value depending on `kind`.
    pub pattern: String,
    /// Priority assigned on match.
    pub priority: PriorityClass,
}

/// A rule compiled for the data path.
#[derive(Debug, Clone)]
struct CompiledRule {
    rule: MatchRule,
    regex: Option<Regex>,
}

impl CompiledRule {
    fn compile(rule: MatchRule) -> Result<Self, PatchError> {
        let regex = match rule.kind {
            MatchKind::Regex => Some(Regex::new(&rule.pattern).map_err(|e| {
                PatchError::InvalidValue {
                    path: "rules".to_owned(),
                    details: format!("invalid regex {:?}: {e}", rule.pattern),
                }
            })?),
            _ => None,
        };
        Ok(Self { rule, regex })
    }

    fn matches(&self, resource: &AttributeSet) -> bool {
        let Some(value) = resource.get(&self.rule.attribute) else {
            return false;
        };
        let text = value.to_string();
        match self.kind() {
            MatchKind::Substring => text.contains(&self.rule.pattern),
            MatchKind::Equals => text == self.rule.pattern,
            MatchKind::Regex => self
                .regex
                .as_ref()
                .is_some_and(|re| re.is_match(&text)),
        }
    }

    const fn kind(&self) -> MatchKind {
        self.rule.kind
    }
}

/// Static configuration of the tagger.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Ordered rule list.
    #[serde(default)]
    pub rules: Vec<MatchRule>,
    /// Priority for unmatched resources.
    #[serde(default)]
    pub default_priority: PriorityClass,
}

struct Params {
    enabled: bool,
    rules: Vec<CompiledRule>,
    default_priority: PriorityClass,
}

impl Params {
    fn from_config(config: Config) -> Result<Self, PatchError> {
        let rules = config
            .rules
            .into_iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            enabled: true,
            rules,
            default_priority: config.default_priority,
        })
    }

    fn rules_as_values(&self) -> PatchValue {
        PatchValue::List(
            self.rules
                .iter()
                .map(|r| {
                    PatchValue::Str(
                        serde_json::to_string(&r.rule).unwrap_or_else(|_| "{}".to_owned()),
                    )
                })
                .collect(),
        )
    }
}

impl ParamSchema for Params {
    fn specs() -> &'static [(&'static str, ParamSpec)] {
        const {
            &[
                ("rules", ParamSpec::LIST),
                (
                    "default_priority",
                    ParamSpec::one_of(&["low", "normal", "high", "critical"]),
                ),
            ]
        }
    }

    fn apply(&mut self, path: &str, value: &PatchValue) -> Result<(), PatchError> {
        match path {
            "rules" => {
                let items = value.as_list().ok_or_else(|| PatchError::InvalidValue {
                    path: path.to_owned(),
                    details: "expected a list of rule strings".to_owned(),
                })?;
                let mut compiled = Vec::with_capacity(items.len());
                for item in items {
                    let text = item.as_str().ok_or_else(|| PatchError::InvalidValue {
                        path: path.to_owned(),
                        details: "rule entries must be JSON strings".to_owned(),
                    })?;
                    let rule: MatchRule =
                        serde_json::from_str(text).map_err(|e| PatchError::InvalidValue {
                            path: path.to_owned(),
                            details: format!("malformed rule {text:?}: {e}"),
                        })?;
                    compiled.push(CompiledRule::compile(rule)?);
                }
                // All rules compiled; only now touch state.
                self.rules = compiled;
                Ok(())
            }
            "default_priority" => {
                let label = value.as_str().ok_or_else(|| PatchError::InvalidValue {
                    path: path.to_owned(),
                    details: "expected a priority label".to_owned(),
                })?;
                self.default_priority =
                    label.parse().map_err(|_| PatchError::InvalidValue {
                        path: path.to_owned(),
                        details: format!("unknown priority {label:?}"),
                    })?;
                Ok(())
            }
            other => Err(PatchError::UnknownParameter {
                path: other.to_owned(),
            }),
        }
    }

    fn snapshot(&self) -> BTreeMap<String, PatchValue> {
        BTreeMap::from([
            ("rules".to_owned(), self.rules_as_values()),
            (
                "default_priority".to_owned(),
                PatchValue::Str(self.default_priority.as_str().to_owned()),
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

/// Metrics for the priority tagger.
#[derive(Default)]
pub struct TaggerMetrics {
    /// Points seen by the tagger.
    pub processed_total: Counter,
    /// Resources tagged by an explicit rule (not the default).
    pub matched_total: Counter,
    /// Batches passed through while disabled.
    pub disabled_passthrough_total: Counter,
    /// 1 when the data path is enabled.
    pub enabled: Gauge,
}

impl MetricSet for TaggerMetrics {
    fn name(&self) -> &str {
        PRIORITY_TAGGER_KIND
    }

    fn snapshot(&self) -> Vec<MetricSample> {
        vec![
            MetricSample::new(
                "tagger_processed_total",
                SampleValue::Counter(self.processed_total.get()),
            ),
            MetricSample::new(
                "tagger_matched_total",
                SampleValue::Counter(self.matched_total.get()),
            ),
            MetricSample::new(
                "tagger_disabled_passthrough_total",
                SampleValue::Counter(self.disabled_passthrough_total.get()),
            ),
            MetricSample::new("tagger_enabled", SampleValue::Gauge(self.enabled.get())),
        ]
    }
}

/// Annotates resources with a priority class. See the module docs.
pub struct PriorityTagger {
    core: UpdateableCore<Params>,
    metrics: Arc<TaggerMetrics>,
}

impl PriorityTagger {
    /// Creates a tagger and registers its metric set.
    ///
    /// # Errors
    ///
    /// Returns a [`PatchError`] when a configured regex does not compile.
    pub fn new(config: Config, registry: &TelemetryRegistry) -> Result<Self, PatchError> {
        let metrics = Arc::new(TaggerMetrics::default());
        metrics.enabled.set(1.0);
        registry.register(metrics.clone());
        Ok(Self {
            core: UpdateableCore::new(
                ProcessorId::named(PRIORITY_TAGGER_KIND),
                Params::from_config(config)?,
            ),
            metrics,
        })
    }
}

impl MetricsProcessor for PriorityTagger {
    fn id(&self) -> &ProcessorId {
        self.core.id()
    }

    fn consume_batch(&self, mut batch: MetricBatch) -> Result<MetricBatch, EngineError> {
        let params = self.core.read();
        if !params.enabled() {
            self.metrics.disabled_passthrough_total.inc();
            return Ok(batch);
        }

        self.metrics.processed_total.add(batch.point_count() as u64);
        batch.for_each_resource_mut(|group| {
            let matched = params
                .rules
                .iter()
                .find(|rule| rule.matches(&group.resource));
            match matched {
                Some(rule) => {
                    rule.rule.priority.tag_resource(&mut group.resource);
                    self.metrics.matched_total.inc();
                }
                None => {
                    // Do not overwrite an upstream tag with the default.
                    if PriorityClass::from_resource(&group.resource).is_none() {
                        params.default_priority.tag_resource(&mut group.resource);
                    }
                }
            }
        });
        Ok(batch)
    }
}

impl UpdateableProcessor for PriorityTagger {
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
