// SPDX-License-Identifier: Apache-2.0

//! Control-plane error taxonomy.
//!
//! A patch submission fails with exactly one [`PatchRejection`]; every kind
//! is recoverable at the caller and never terminates the process.

use phoenix_engine::error::PatchError;

/// Why a submitted patch was not applied.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchRejection {
    /// The extension is in safe mode and the patch is not an authorized
    /// override.
    #[error("safe mode active")]
    SafeModeActive,

    /// The patch's TTL elapsed before admission.
    #[error("patch expired")]
    PatchExpired,

    /// The per-target rate-limit window is full.
    #[error("rate limited")]
    RateLimited,

    /// The global cooldown since the last accepted patch has not elapsed.
    #[error("cooldown active")]
    CooldownActive,

    /// The target is not a registered updateable processor.
    #[error("processor not found: {target}")]
    ProcessorNotFound {
        /// The unresolved target identity.
        target: String,
    },

    /// The target processor rejected the value; processor state is intact.
    #[error("validation failed: {source}")]
    ValidationFailed {
        /// The processor-side failure.
        #[from]
        source: PatchError,
    },
}

impl PatchRejection {
    /// Stable label used in the `patches_total{result}` catalog.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            PatchRejection::SafeModeActive => "safe_mode_active",
            PatchRejection::PatchExpired => "patch_expired",
            PatchRejection::RateLimited => "rate_limited",
            PatchRejection::CooldownActive => "cooldown_active",
            PatchRejection::ProcessorNotFound { .. } => "processor_not_found",
            PatchRejection::ValidationFailed { .. } => "validation_failed",
        }
    }
}

/// Failures of control-plane background machinery.
#[derive(thiserror::Error, Debug)]
pub enum ControllerError {
    /// The policy file or document could not be loaded; the previous policy
    /// is retained.
    #[error("policy load failed: {0}")]
    PolicyLoadFailed(#[from] phoenix_config::Error),

    /// The remote control plane could not be reached; the background task
    /// retries on the next tick.
    #[error("remote endpoint unreachable: {details}")]
    RemoteUnreachable {
        /// A description of the transport failure.
        details: String,
    },

    /// The policy watcher could not be installed.
    #[error("policy watcher setup failed: {details}")]
    WatcherSetup {
        /// A description of the failure.
        details: String,
    },
}
