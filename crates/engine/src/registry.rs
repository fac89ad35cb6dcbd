// SPDX-License-Identifier: Apache-2.0

//! Registry of updateable processors.
//!
//! The registry stores weak references keyed by processor identity so patch
//! dispatch can resolve targets without creating ownership cycles: the
//! governance extension looks processors up by identity, processors hold no
//! reference back.

use crate::processor::UpdateableProcessor;
use parking_lot::RwLock;
use phoenix_config::ProcessorId;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Identity-keyed registry of updateable processors.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    inner: Arc<RwLock<HashMap<ProcessorId, Weak<dyn UpdateableProcessor>>>>,
}

impl ProcessorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a processor under its own identity. Registration is
    /// idempotent; re-registering replaces the stored reference.
    pub fn register(&self, processor: &Arc<dyn UpdateableProcessor>) {
        let id = processor.id().clone();
        let _ = self.inner.write().insert(id, Arc::downgrade(processor));
    }

    /// Resolves an identity to a live processor, if registered and alive.
    #[must_use]
    pub fn resolve(&self, id: &ProcessorId) -> Option<Arc<dyn UpdateableProcessor>> {
        self.inner.read().get(id).and_then(Weak::upgrade)
    }

    /// Returns the identities of all live registered processors.
    #[must_use]
    pub fn ids(&self) -> Vec<ProcessorId> {
        self.inner
            .read()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(id, _)| id.clone())
            .collect()
    }
}
