// SPDX-License-Identifier: Apache-2.0

//! Shared test fixtures for the control plane.

use phoenix_config::{ConfigPatch, PatchValue, ProcessorId};
use phoenix_engine::base::{ParamSchema, UpdateableCore};
use phoenix_engine::error::{EngineError, PatchError};
use phoenix_engine::params::ParamSpec;
use phoenix_engine::processor::{ConfigStatus, MetricsProcessor, UpdateableProcessor};
use phoenix_pdata::MetricBatch;
use std::collections::BTreeMap;
use std::sync::Arc;

pub(crate) struct KnobParams {
    enabled: bool,
    k_value: i64,
}

impl ParamSchema for KnobParams {
    fn specs() -> &'static [(&'static str, ParamSpec)] {
        const { &[("k_value", ParamSpec::int_range(1, 1000))] }
    }

    fn apply(&mut self, path: &str, value: &PatchValue) -> Result<(), PatchError> {
        match path {
            "k_value" => {
                self.k_value = value.as_i64().ok_or_else(|| PatchError::InvalidValue {
                    path: path.to_owned(),
                    details: "not an int".to_owned(),
                })?;
                Ok(())
            }
            other => Err(PatchError::UnknownParameter {
                path: other.to_owned(),
            }),
        }
    }

    fn snapshot(&self) -> BTreeMap<String, PatchValue> {
        BTreeMap::from([("k_value".to_owned(), PatchValue::Int(self.k_value))])
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

/// Minimal updateable processor with a single bounded `k_value` parameter.
pub(crate) struct Knob {
    core: UpdateableCore<KnobParams>,
}

impl Knob {
    pub(crate) fn new(kind: &str, k_value: i64) -> Arc<Self> {
        Arc::new(Self {
            core: UpdateableCore::new(
                ProcessorId::named(kind.to_owned()),
                KnobParams {
                    enabled: true,
                    k_value,
                },
            ),
        })
    }
}

impl MetricsProcessor for Knob {
    fn id(&self) -> &ProcessorId {
        self.core.id()
    }

    fn consume_batch(&self, batch: MetricBatch) -> Result<MetricBatch, EngineError> {
        Ok(batch)
    }
}

impl UpdateableProcessor for Knob {
    fn on_config_patch(&self, patch: &ConfigPatch) -> Result<(), PatchError> {
        self.core.apply_patch(patch)
    }

    fn get_config_status(&self) -> ConfigStatus {
        self.core.config_status()
    }
}
