// SPDX-License-Identifier: Apache-2.0

//! The data pipeline: an ordered chain of processors.
//!
//! Batches flow through the chain synchronously; within a batch, downstream
//! processors see points in upstream order. Batches may be processed on
//! several worker tasks in parallel (processors are `Sync`), so ordering
//! across batches is not preserved; window-based processors key on point
//! timestamps, not arrival order.

use crate::error::EngineError;
use crate::processor::UpdateableProcessor;
use crate::registry::ProcessorRegistry;
use phoenix_pdata::MetricBatch;
use std::sync::Arc;

/// An ordered chain of updateable processors.
pub struct Pipeline {
    stages: Vec<Arc<dyn UpdateableProcessor>>,
}

impl Pipeline {
    /// Creates a pipeline from stages in flow order.
    #[must_use]
    pub fn new(stages: Vec<Arc<dyn UpdateableProcessor>>) -> Self {
        Self { stages }
    }

    /// Returns the stages in flow order.
    #[must_use]
    pub fn stages(&self) -> &[Arc<dyn UpdateableProcessor>] {
        &self.stages
    }

    /// Registers every stage with the given registry.
    pub fn register_all(&self, registry: &ProcessorRegistry) {
        for stage in &self.stages {
            registry.register(stage);
        }
    }

    /// Starts every stage in flow order.
    ///
    /// # Errors
    ///
    /// Returns the first stage's [`EngineError`].
    pub fn start(&self) -> Result<(), EngineError> {
        for stage in &self.stages {
            stage.start()?;
        }
        Ok(())
    }

    /// Runs one batch through the chain.
    ///
    /// # Errors
    ///
    /// Returns the first failing stage's [`EngineError`].
    pub fn process_batch(&self, batch: MetricBatch) -> Result<MetricBatch, EngineError> {
        let mut batch = batch;
        for stage in &self.stages {
            batch = stage.consume_batch(batch)?;
        }
        Ok(batch)
    }

    /// Shuts stages down in reverse flow order, flushing residue windows.
    /// The first error is returned after every stage was attempted.
    ///
    /// # Errors
    ///
    /// Returns the first [`EngineError`] any stage raised.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        let mut first_error = None;
        for stage in self.stages.iter().rev() {
            if let Err(e) = stage.shutdown() {
                tracing::warn!(processor = %stage.id(), error = %e, "shutdown failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
