// SPDX-License-Identifier: Apache-2.0

//! Data-plane processors for the Phoenix pipeline.
//!
//! Flow order:
//!
//! ```text
//! memory_limiter -> priority_tagger -> adaptive_topk ->
//! cardinality_guardian -> reservoir_sampler -> others_rollup -> batcher
//! ```
//!
//! Every processor implements the engine's updateable contract: parameters
//! live behind a read/write lock, patches validate before they mutate, and a
//! disabled processor passes batches through unchanged while counting the
//! short-circuit.
//!
//! Aggregation state (the Top-K sketch, the guardian's window map, the
//! reservoir, the batcher's buffer) is keyed on point timestamps, never on
//! arrival order, because batches may be processed on parallel workers.

pub mod adaptive_topk;
pub mod batcher;
pub mod cardinality_guardian;
pub mod memory_limiter;
pub mod others_rollup;
pub mod priority_tagger;
pub mod reservoir_sampler;
pub mod space_saving;

pub use adaptive_topk::AdaptiveTopK;
pub use batcher::Batcher;
pub use cardinality_guardian::CardinalityGuardian;
pub use memory_limiter::MemoryLimiter;
pub use others_rollup::OthersRollup;
pub use priority_tagger::PriorityTagger;
pub use reservoir_sampler::ReservoirSampler;

/// Point attribute marking residue forwarded past the Top-K gate.
pub const TOPK_RETAINED_ATTRIBUTE: &str = "topk_retained";

/// Point attribute marking points selected by the reservoir sampler;
/// the rollup stage leaves them alone.
pub const SAMPLED_ATTRIBUTE: &str = "phoenix.sampled";

/// Point attribute marking series the guardian demoted under the `rollup`
/// overflow policy.
pub const OVERFLOW_ATTRIBUTE: &str = "phoenix.cardinality_overflow";
