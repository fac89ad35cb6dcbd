// SPDX-License-Identifier: Apache-2.0

//! Internal telemetry for the Phoenix pipeline.
//!
//! Every component owns a *metric set*: a plain struct of instruments
//! ([`instrument::Counter`], [`instrument::Gauge`], [`instrument::Histogram`])
//! registered once with the process-wide [`registry::TelemetryRegistry`].
//! Instruments are lock-free; collection produces point-in-time samples under
//! the common `phoenix_` prefix.
//!
//! Export wiring (Prometheus endpoints, OTLP readers) is deliberately absent:
//! the catalog is the contract, destinations are a collaborator concern.

pub mod instrument;
pub mod registry;

pub use instrument::{Counter, Gauge, Histogram};
pub use registry::{MetricSample, MetricSet, SampleValue, TelemetryRegistry};

/// Common prefix for every Phoenix metric name.
pub const METRIC_PREFIX: &str = "phoenix_";
