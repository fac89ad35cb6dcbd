// SPDX-License-Identifier: Apache-2.0

//! Parameter schemas: per-parameter type and domain validation.
//!
//! Every updateable processor declares a static table of
//! `(parameter_path, ParamSpec)` entries. Validation runs before the
//! processor's write lock is taken, so a rejected patch never touches
//! processor state.

use crate::error::PatchError;
use phoenix_config::{PatchValue, ValueKind};

/// The admissible domain of a parameter value.
#[derive(Debug, Clone, Copy)]
pub enum ParamDomain {
    /// Any value of the declared type.
    Any,
    /// Integers within `[min, max]`, inclusive.
    IntRange {
        /// Inclusive lower bound.
        min: i64,
        /// Inclusive upper bound.
        max: i64,
    },
    /// Doubles within `[min, max]`, inclusive.
    DoubleRange {
        /// Inclusive lower bound.
        min: f64,
        /// Inclusive upper bound.
        max: f64,
    },
    /// One of a fixed set of string labels.
    OneOf(&'static [&'static str]),
}

/// Declared type and domain of one parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    /// Expected value type. `Double` parameters also accept `Int` values
    /// (widened); the reverse is rejected.
    pub kind: ValueKind,
    /// Admissible domain.
    pub domain: ParamDomain,
}

impl ParamSpec {
    /// A boolean parameter.
    pub const BOOL: Self = Self {
        kind: ValueKind::Bool,
        domain: ParamDomain::Any,
    };

    /// An unconstrained string parameter.
    pub const STRING: Self = Self {
        kind: ValueKind::String,
        domain: ParamDomain::Any,
    };

    /// An unconstrained list parameter.
    pub const LIST: Self = Self {
        kind: ValueKind::List,
        domain: ParamDomain::Any,
    };

    /// An integer parameter bounded to `[min, max]`.
    #[must_use]
    pub const fn int_range(min: i64, max: i64) -> Self {
        Self {
            kind: ValueKind::Int,
            domain: ParamDomain::IntRange { min, max },
        }
    }

    /// A double parameter bounded to `[min, max]`.
    #[must_use]
    pub const fn double_range(min: f64, max: f64) -> Self {
        Self {
            kind: ValueKind::Double,
            domain: ParamDomain::DoubleRange { min, max },
        }
    }

    /// A string parameter restricted to a label set.
    #[must_use]
    pub const fn one_of(labels: &'static [&'static str]) -> Self {
        Self {
            kind: ValueKind::String,
            domain: ParamDomain::OneOf(labels),
        }
    }

    /// Validates `value` against this spec.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::InvalidValueType`] on a type mismatch and
    /// [`PatchError::InvalidValue`] when the value is outside the domain.
    pub fn validate(&self, path: &str, value: &PatchValue) -> Result<(), PatchError> {
        let actual = value.kind();
        let type_ok = actual == self.kind
            || (self.kind == ValueKind::Double && actual == ValueKind::Int);
        if !type_ok {
            return Err(PatchError::InvalidValueType {
                path: path.to_owned(),
                expected: self.kind,
                actual,
            });
        }

        match self.domain {
            ParamDomain::Any => Ok(()),
            ParamDomain::IntRange { min, max } => {
                let v = value.as_i64().ok_or_else(|| PatchError::InvalidValueType {
                    path: path.to_owned(),
                    expected: ValueKind::Int,
                    actual,
                })?;
                if v < min || v > max {
                    Err(PatchError::InvalidValue {
                        path: path.to_owned(),
                        details: format!("{v} outside [{min}, {max}]"),
                    })
                } else {
                    Ok(())
                }
            }
            ParamDomain::DoubleRange { min, max } => {
                let v = value.as_f64().ok_or_else(|| PatchError::InvalidValueType {
                    path: path.to_owned(),
                    expected: ValueKind::Double,
                    actual,
                })?;
                if !v.is_finite() || v < min || v > max {
                    Err(PatchError::InvalidValue {
                        path: path.to_owned(),
                        details: format!("{v} outside [{min}, {max}]"),
                    })
                } else {
                    Ok(())
                }
            }
            ParamDomain::OneOf(labels) => {
                let v = value.as_str().ok_or_else(|| PatchError::InvalidValueType {
                    path: path.to_owned(),
                    expected: ValueKind::String,
                    actual,
                })?;
                if labels.contains(&v) {
                    Ok(())
                } else {
                    Err(PatchError::InvalidValue {
                        path: path.to_owned(),
                        details: format!("{v} not one of {labels:?}"),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_range_bounds() {
        let spec = ParamSpec::int_range(1, 100);
        assert!(spec.validate("k_value", &PatchValue::Int(50)).is_ok());
        assert!(spec.validate("k_value", &PatchValue::Int(0)).is_err());
        assert!(spec.validate("k_value", &PatchValue::Int(101)).is_err());
        assert!(matches!(
            spec.validate("k_value", &PatchValue::Double(50.0)),
            Err(PatchError::InvalidValueType { .. })
        ));
    }

    #[test]
    fn double_accepts_int_widening() {
        let spec = ParamSpec::double_range(0.0, 1.0);
        assert!(spec.validate("ratio", &PatchValue::Int(1)).is_ok());
        assert!(spec.validate("ratio", &PatchValue::Double(0.5)).is_ok());
        assert!(spec.validate("ratio", &PatchValue::Double(f64::NAN)).is_err());
        assert!(spec.validate("ratio", &PatchValue::Double(1.5)).is_err());
    }

    #[test]
    fn one_of_labels() {
        let spec = ParamSpec::one_of(&["drop", "demote_to_low", "rollup"]);
        assert!(spec.validate("overflow_policy", &"drop".into()).is_ok());
        assert!(spec.validate("overflow_policy", &"explode".into()).is_err());
        assert!(spec.validate("overflow_policy", &PatchValue::Int(1)).is_err());
    }
}
