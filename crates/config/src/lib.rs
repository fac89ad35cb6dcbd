// SPDX-License-Identifier: Apache-2.0

//! Phoenix configuration model.
//!
//! Data Model:
//! - policy document (declarative, hot-reloadable)
//!   - global settings (autonomy level, safety limits)
//!   - per-processor configuration
//!   - PID controller declarations
//!   - governance settings (rate limits, safe-mode presets, remote client)
//! - configuration patches (imperative, immutable once emitted)
//!
//! A policy is parsed from YAML, validated, and swapped in atomically by the
//! governance extension. Patches are the unit of runtime change: every
//! parameter mutation, whether it originates from the policy file, the PID
//! decider, the remote control plane, or an operator, travels as a
//! [`patch::ConfigPatch`].

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

pub mod error;
pub mod patch;
pub mod policy;

pub use error::Error;
pub use patch::{ConfigPatch, PatchSeverity, PatchSource, PatchValue, ValueKind};
pub use policy::Policy;

/// The type name of a processor (e.g. `adaptive_topk`).
pub type ProcessorKind = Cow<'static, str>;

/// Identity of a processor instance: type plus instance name.
///
/// Rendered as `kind` for the default instance and `kind/instance` otherwise,
/// which is also the accepted wire form in patches and policy targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessorId {
    /// Processor type name.
    pub kind: String,
    /// Instance name; `default` unless a pipeline runs several instances of
    /// the same type.
    pub instance: String,
}

impl ProcessorId {
    /// Default instance name.
    pub const DEFAULT_INSTANCE: &'static str = "default";

    /// Creates an identity for the default instance of `kind`.
    #[must_use]
    pub fn named(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            instance: Self::DEFAULT_INSTANCE.to_owned(),
        }
    }

    /// Creates an identity with an explicit instance name.
    #[must_use]
    pub fn with_instance(kind: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            instance: instance.into(),
        }
    }

    /// Parses the `kind` or `kind/instance` wire form.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.split_once('/') {
            Some((kind, instance)) => Self::with_instance(kind, instance),
            None => Self::named(s),
        }
    }
}

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.instance == Self::DEFAULT_INSTANCE {
            f.write_str(&self.kind)
        } else {
            write!(f, "{}/{}", self.kind, self.instance)
        }
    }
}

impl Serialize for ProcessorId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProcessorId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(ProcessorId::parse(&s))
    }
}

impl From<&str> for ProcessorId {
    fn from(value: &str) -> Self {
        ProcessorId::parse(value)
    }
}

impl schemars::JsonSchema for ProcessorId {
    fn schema_name() -> Cow<'static, str> {
        Cow::Borrowed("ProcessorId")
    }

    fn json_schema(_generator: &mut schemars::SchemaGenerator) -> schemars::Schema {
        schemars::json_schema!({
            "type": "string",
            "description": "Processor identity: `kind` or `kind/instance`"
        })
    }
}
