// SPDX-License-Identifier: Apache-2.0

//! Priority classes attached to resources.
//!
//! The priority of a point is the priority of its enclosing resource, carried
//! as the `process.priority` resource attribute. The total order is
//! `Critical > High > Normal > Low`.

use crate::point::AttributeSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Resource attribute key holding the priority class.
pub const PRIORITY_ATTRIBUTE: &str = "process.priority";

/// Priority class of a resource and the points it produced.
///
/// Variants are declared lowest-first so the derived `Ord` yields
/// `Critical > High > Normal > Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum PriorityClass {
    /// Residue traffic, first to be sampled or rolled up.
    Low,
    /// Default class for unmatched resources.
    #[default]
    Normal,
    /// Elevated retention.
    High,
    /// Never dropped, demoted, or sampled.
    Critical,
}

impl PriorityClass {
    /// Returns the canonical lowercase label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            PriorityClass::Low => "low",
            PriorityClass::Normal => "normal",
            PriorityClass::High => "high",
            PriorityClass::Critical => "critical",
        }
    }

    /// Reads the priority class from a resource attribute set.
    ///
    /// Returns `None` when the attribute is absent or not a recognized label.
    #[must_use]
    pub fn from_resource(resource: &AttributeSet) -> Option<Self> {
        resource
            .get(PRIORITY_ATTRIBUTE)
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }

    /// Writes this priority class onto a resource attribute set.
    pub fn tag_resource(&self, resource: &mut AttributeSet) {
        resource.upsert(PRIORITY_ATTRIBUTE, self.as_str());
    }
}

impl fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriorityClass {
    type Err = UnknownPriority;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(PriorityClass::Low),
            "normal" => Ok(PriorityClass::Normal),
            "high" => Ok(PriorityClass::High),
            "critical" => Ok(PriorityClass::Critical),
            other => Err(UnknownPriority(other.to_owned())),
        }
    }
}

/// Error returned when parsing an unrecognized priority label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPriority(pub String);

impl fmt::Display for UnknownPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown priority class: {}", self.0)
    }
}

impl std::error::Error for UnknownPriority {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_order() {
        assert!(PriorityClass::Critical > PriorityClass::High);
        assert!(PriorityClass::High > PriorityClass::Normal);
        assert!(PriorityClass::Normal > PriorityClass::Low);
    }

    #[test]
    fn tag_and_read_back() {
        let mut resource = AttributeSet::new();
        assert_eq!(PriorityClass::from_resource(&resource), None);

        PriorityClass::High.tag_resource(&mut resource);
        assert_eq!(
            PriorityClass::from_resource(&resource),
            Some(PriorityClass::High)
        );

        // Re-tagging replaces in place.
        PriorityClass::Low.tag_resource(&mut resource);
        assert_eq!(resource.len(), 1);
        assert_eq!(
            PriorityClass::from_resource(&resource),
            Some(PriorityClass::Low)
        );
    }

    #[test]
    fn labels_round_trip() {
        for class in [
            PriorityClass::Low,
            PriorityClass::Normal,
            PriorityClass::High,
            PriorityClass::Critical,
        ] {
            assert_eq!(class.as_str().parse::<PriorityClass>(), Ok(class));
        }
        assert!("urgent".parse::<PriorityClass>().is_err());
    }
}
