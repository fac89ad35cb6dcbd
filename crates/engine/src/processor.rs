// SPDX-License-Identifier: Apache-2.0

//! Processor contracts.
//!
//! A processor has a data path (`consume_batch`) and a control path
//! (`on_config_patch`, `get_config_status`). The data path runs under a
//! shared read lock on the parameter block and must not suspend or perform
//! external I/O while holding it; the control path takes the exclusive
//! write lock. A patch applied mid-batch takes effect at the next batch
//! boundary.

use crate::error::{EngineError, PatchError};
use phoenix_config::{ConfigPatch, PatchValue, ProcessorId};
use phoenix_pdata::MetricBatch;
use std::collections::BTreeMap;

/// A snapshot of a processor's live configuration.
///
/// Produced under the processor's read lock; a snapshot, not a live view.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigStatus {
    /// Current parameter values, keyed by parameter path.
    pub parameters: BTreeMap<String, PatchValue>,
    /// Whether the data path is active.
    pub enabled: bool,
}

impl ConfigStatus {
    /// Returns the current value of `parameter_path`. The reserved `enabled`
    /// path resolves to the enabled flag.
    #[must_use]
    pub fn get(&self, parameter_path: &str) -> Option<PatchValue> {
        if parameter_path == "enabled" {
            return Some(PatchValue::Bool(self.enabled));
        }
        self.parameters.get(parameter_path).cloned()
    }
}

/// The data-path and lifecycle surface of a pipeline processor.
pub trait MetricsProcessor: Send + Sync {
    /// Returns the processor's identity (type plus instance name).
    fn id(&self) -> &ProcessorId;

    /// Transforms one batch.
    ///
    /// Points within the batch are seen and forwarded in upstream order.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] only for unrecoverable data-path failures;
    /// a malformed point is never one.
    fn consume_batch(&self, batch: MetricBatch) -> Result<MetricBatch, EngineError>;

    /// Lifecycle hook invoked before the first batch.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the processor cannot start.
    fn start(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Lifecycle hook invoked during shutdown; flushes residue windows.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the flush fails.
    fn shutdown(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// The control-path surface: processors whose parameters can be rewritten at
/// runtime through configuration patches.
pub trait UpdateableProcessor: MetricsProcessor {
    /// Atomically applies one parameter change.
    ///
    /// Validation (type, then domain) happens before any state is touched;
    /// on failure the processor's configuration is unchanged.
    ///
    /// # Errors
    ///
    /// Returns the [`PatchError`] kind describing the first failed check.
    fn on_config_patch(&self, patch: &ConfigPatch) -> Result<(), PatchError>;

    /// Returns a snapshot of the live configuration.
    fn get_config_status(&self) -> ConfigStatus;
}
