// SPDX-License-Identifier: Apache-2.0

//! Configuration patches: immutable, typed parameter changes directed at a
//! named processor.
//!
//! Patches are the only way runtime parameters change. They are created by the
//! policy applier, the PID decider, the remote control plane, or an operator,
//! and submitted to the governance extension, which validates, rate-limits,
//! and dispatches them. A patch is never mutated after emission; the single
//! exception is `prev_value`, which the dispatcher fills in on its own copy
//! while capturing the pre-dispatch state for the history record.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::ProcessorId;

/// The dynamic type of a [`PatchValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Boolean.
    Bool,
    /// 64-bit signed integer.
    Int,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// Homogeneous or heterogeneous list.
    List,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Double => "double",
            ValueKind::String => "string",
            ValueKind::List => "list",
        };
        f.write_str(label)
    }
}

/// A tagged parameter value.
///
/// The untagged serde representation makes YAML/JSON literals parse to the
/// natural variant: `true` to `Bool`, `40` to `Int`, `0.9` to `Double`,
/// quoted text to `Str`, sequences to `List`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum PatchValue {
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Double(f64),
    /// String value.
    Str(String),
    /// List value.
    List(Vec<PatchValue>),
}

impl PatchValue {
    /// Returns the dynamic type of this value.
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            PatchValue::Bool(_) => ValueKind::Bool,
            PatchValue::Int(_) => ValueKind::Int,
            PatchValue::Double(_) => ValueKind::Double,
            PatchValue::Str(_) => ValueKind::String,
            PatchValue::List(_) => ValueKind::List,
        }
    }

    /// Returns the boolean content, if this is a `Bool`.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            PatchValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer content, if this is an `Int`.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            PatchValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the numeric content widened to `f64`, for `Int` and `Double`.
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            PatchValue::Int(i) => Some(*i as f64),
            PatchValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns the string content, if this is a `Str`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PatchValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the list content, if this is a `List`.
    #[must_use]
    pub fn as_list(&self) -> Option<&[PatchValue]> {
        match self {
            PatchValue::List(l) => Some(l),
            _ => None,
        }
    }
}

impl fmt::Display for PatchValue {
    /// Renders as JSON, which is unambiguous for every variant including
    /// lists.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("<unrenderable>"),
        }
    }
}

impl From<bool> for PatchValue {
    fn from(value: bool) -> Self {
        PatchValue::Bool(value)
    }
}

impl From<i64> for PatchValue {
    fn from(value: i64) -> Self {
        PatchValue::Int(value)
    }
}

impl From<f64> for PatchValue {
    fn from(value: f64) -> Self {
        PatchValue::Double(value)
    }
}

impl From<&str> for PatchValue {
    fn from(value: &str) -> Self {
        PatchValue::Str(value.to_owned())
    }
}

impl From<String> for PatchValue {
    fn from(value: String) -> Self {
        PatchValue::Str(value)
    }
}

/// How intrusive a patch is allowed to be.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum PatchSeverity {
    /// Regular tuning traffic; subject to every admission gate.
    #[default]
    Normal,
    /// Bypasses rate limiting and cooldown; combined with `safety_override`
    /// it is admitted even in safe mode.
    Urgent,
    /// Emitted by the safe-mode orchestration itself; bypasses rate limiting
    /// and cooldown and is never shadowed.
    Safety,
}

/// Where a patch originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchSource {
    /// Applying the declarative policy document.
    PolicyFile,
    /// The PID decider's control loop.
    PidDecider,
    /// The governance extension itself (safe-mode transitions).
    PicControl,
    /// The remote control plane.
    Remote,
    /// A human operator via the intra-process API.
    Manual,
}

impl fmt::Display for PatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PatchSource::PolicyFile => "policy_file",
            PatchSource::PidDecider => "pid_decider",
            PatchSource::PicControl => "pic_control",
            PatchSource::Remote => "remote",
            PatchSource::Manual => "manual",
        };
        f.write_str(label)
    }
}

/// An atomic, typed parameter change directed at a named processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigPatch {
    /// Unique identifier of this patch.
    pub patch_id: String,
    /// The processor instance this patch targets.
    pub target_processor: ProcessorId,
    /// Dotted path of the parameter to change (e.g. `k_value`).
    pub parameter_path: String,
    /// The value to apply.
    pub new_value: PatchValue,
    /// The value in effect before dispatch; filled by the dispatcher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_value: Option<PatchValue>,
    /// Human-readable motivation.
    #[serde(default)]
    pub reason: String,
    /// Admission severity.
    #[serde(default)]
    pub severity: PatchSeverity,
    /// Origin of the patch.
    pub source: PatchSource,
    /// Creation time, seconds since the Unix epoch.
    pub timestamp: u64,
    /// Lifetime in seconds; 0 means no expiry.
    #[serde(default)]
    pub ttl_seconds: u64,
    /// Allows an `Urgent` patch through safe mode.
    #[serde(default)]
    pub safety_override: bool,
}

impl ConfigPatch {
    /// Creates a patch with the given identity, freshly timestamped.
    #[must_use]
    pub fn new(
        patch_id: impl Into<String>,
        target: ProcessorId,
        parameter_path: impl Into<String>,
        new_value: impl Into<PatchValue>,
        source: PatchSource,
    ) -> Self {
        Self {
            patch_id: patch_id.into(),
            target_processor: target,
            parameter_path: parameter_path.into(),
            new_value: new_value.into(),
            prev_value: None,
            reason: String::new(),
            severity: PatchSeverity::Normal,
            source,
            timestamp: unix_now(),
            ttl_seconds: 0,
            safety_override: false,
        }
    }

    /// Sets the reason and returns the patch, for fluent construction.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Sets the severity and returns the patch.
    #[must_use]
    pub const fn with_severity(mut self, severity: PatchSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets the TTL and returns the patch.
    #[must_use]
    pub const fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    /// Marks the patch as a safe-mode override and returns it.
    #[must_use]
    pub const fn with_safety_override(mut self) -> Self {
        self.safety_override = true;
        self
    }

    /// Returns true when the patch's TTL has elapsed at `now` (seconds since
    /// the Unix epoch). A TTL of 0 never expires.
    #[must_use]
    pub const fn is_expired(&self, now: u64) -> bool {
        self.ttl_seconds > 0 && self.timestamp.saturating_add(self.ttl_seconds) < now
    }
}

/// Current time in whole seconds since the Unix epoch.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
