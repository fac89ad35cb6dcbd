// SPDX-License-Identifier: Apache-2.0

//! Errors for the config crate.

use miette::Diagnostic;

/// Errors that can occur while reading, parsing, or validating a policy
/// document or a configuration patch.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// An error that occurred while reading a policy file.
    #[error("File read error for {path}: {details}")]
    #[diagnostic(code(phoenix::config::file_read_error))]
    FileReadError {
        /// The path that could not be read.
        path: String,
        /// A description of the error that occurred.
        details: String,
    },

    /// An error that occurred while deserializing a document.
    #[error("{format} deserialization error: {details}")]
    #[diagnostic(code(phoenix::config::deserialization_error))]
    DeserializationError {
        /// The format of the document (e.g. "YAML").
        format: String,
        /// A description of the error that occurred.
        details: String,
    },

    /// An error that occurred while serializing a document.
    #[error("{format} serialization error: {details}")]
    #[diagnostic(code(phoenix::config::serialization_error))]
    SerializationError {
        /// The format of the document (e.g. "YAML").
        format: String,
        /// A description of the error that occurred.
        details: String,
    },

    /// The policy parsed but failed semantic validation.
    #[error("Invalid policy: {}", errors.join("; "))]
    #[diagnostic(code(phoenix::config::invalid_policy))]
    InvalidPolicy {
        /// All validation failures found in the document.
        errors: Vec<String>,
    },

    /// A controller output patch names a processor the policy does not
    /// configure.
    #[error("Unknown patch target: {target}")]
    #[diagnostic(code(phoenix::config::unknown_patch_target))]
    UnknownPatchTarget {
        /// The unresolved target identity.
        target: String,
    },
}
