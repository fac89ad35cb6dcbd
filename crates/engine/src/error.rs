// SPDX-License-Identifier: Apache-2.0

//! Errors for the pipeline engine.
//!
//! [`PatchError`] is the processor-side failure surface of
//! `on_config_patch`: whatever a processor rejects, its state stays
//! untouched. The governance extension maps these into its own admission
//! taxonomy.

use phoenix_config::ValueKind;

/// Errors a processor can raise while applying a configuration patch.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// The parameter path does not exist on this processor.
    #[error("unknown parameter: {path}")]
    UnknownParameter {
        /// The unresolved parameter path.
        path: String,
    },

    /// The value's type does not match the parameter's declared type.
    #[error("invalid value type for {path}: expected {expected}, got {actual}")]
    InvalidValueType {
        /// The parameter path.
        path: String,
        /// The declared type.
        expected: ValueKind,
        /// The submitted type.
        actual: ValueKind,
    },

    /// The value's type is right but the value is outside the parameter's
    /// domain (range, enum set) or otherwise unusable (e.g. a regex that
    /// does not compile).
    #[error("invalid value for {path}: {details}")]
    InvalidValue {
        /// The parameter path.
        path: String,
        /// What the domain check rejected.
        details: String,
    },
}

/// Errors raised on the data path or during lifecycle transitions.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// A processor failed while consuming a batch.
    #[error("processor {processor} failed: {details}")]
    ProcessorError {
        /// Identity of the failing processor.
        processor: String,
        /// A description of the failure.
        details: String,
    },

    /// A processor failed to start or shut down.
    #[error("lifecycle error in {processor}: {details}")]
    LifecycleError {
        /// Identity of the failing processor.
        processor: String,
        /// A description of the failure.
        details: String,
    },
}
