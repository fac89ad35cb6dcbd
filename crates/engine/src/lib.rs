// SPDX-License-Identifier: Apache-2.0

//! Phoenix pipeline engine.
//!
//! Defines the contracts every data-plane processor implements:
//!
//! 1. The data path: [`processor::MetricsProcessor::consume_batch`], called
//!    per batch under a shared read lock on the processor's parameters.
//! 2. The control path: [`processor::UpdateableProcessor::on_config_patch`]
//!    and [`processor::UpdateableProcessor::get_config_status`], serialized
//!    per processor through an exclusive write lock.
//!
//! The [`base::UpdateableCore`] carries the concurrency contract so
//! individual processors only declare their parameter schema and the
//! mutation itself. The [`registry::ProcessorRegistry`] stores weak
//! references by identity; patch flow is strictly one-directional
//! (decider to connector to extension to processor) and processors hold no
//! reference back.

pub mod base;
pub mod error;
pub mod params;
pub mod pipeline;
pub mod processor;
pub mod registry;

pub use base::{ParamSchema, UpdateableCore};
pub use error::{EngineError, PatchError};
pub use params::{ParamDomain, ParamSpec};
pub use pipeline::Pipeline;
pub use processor::{ConfigStatus, MetricsProcessor, UpdateableProcessor};
pub use registry::ProcessorRegistry;
