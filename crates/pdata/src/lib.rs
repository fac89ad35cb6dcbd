// SPDX-License-Identifier: Apache-2.0

//! Metric data model for the Phoenix pipeline.
//!
//! Data Model:
//! - metric batch
//!   - resource metrics
//!     - scope metrics
//!       - metric points
//!
//! A batch is a collection of points grouped by the resource that produced them
//! and the instrumentation scope that recorded them. Processors preserve this
//! grouping: operations that move points between batches (partitioning into
//! retained/residue streams, demotion, rollup) clone the enclosing resource and
//! scope shells rather than flattening the batch.
//!
//! Attribute sets round-trip the upstream ordering. For cardinality purposes
//! (series fingerprints) they are treated as unordered semantic sets: keys are
//! sorted before hashing, see [`fingerprint`].

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

pub mod batch;
pub mod fingerprint;
pub mod point;
pub mod priority;

pub use batch::{MetricBatch, ResourceMetrics, ScopeMetrics};
pub use fingerprint::{series_fingerprint, series_fingerprint2};
pub use point::{AttributeSet, AttributeValue, KeyValue, MetricKind, MetricPoint, MetricValue};
pub use priority::PriorityClass;

/// The name of a metric (e.g. `process.cpu.time`).
pub type MetricName = Cow<'static, str>;

/// A 64-bit series identity derived from a metric name and an attribute set.
pub type Fingerprint = u64;

/// Name and version of the instrumentation scope that recorded a point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentationScope {
    /// Scope name, typically the instrumentation library name.
    pub name: String,
    /// Scope version, empty when unknown.
    #[serde(default)]
    pub version: String,
}

impl InstrumentationScope {
    /// Creates a scope with the given name and no version.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: String::new(),
        }
    }
}
