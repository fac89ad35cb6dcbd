// SPDX-License-Identifier: Apache-2.0

//! Shared base for updateable processors.
//!
//! [`UpdateableCore`] owns the parameter block behind a `parking_lot`
//! read/write lock and implements the patch dispatch sequence once:
//! schema lookup, type check, domain check, exclusive-lock mutation.
//! Processors keep their aggregation state (sketches, windows, reservoirs)
//! separately; the core only guards configuration.

use crate::error::PatchError;
use crate::params::ParamSpec;
use crate::processor::ConfigStatus;
use parking_lot::{RwLock, RwLockReadGuard};
use phoenix_config::{ConfigPatch, PatchValue, ProcessorId, ValueKind};
use std::collections::BTreeMap;

/// Reserved parameter path toggling the data-path short-circuit.
pub const ENABLED_PATH: &str = "enabled";

/// A parameter block with a declared schema.
///
/// `apply` is called only with values that already passed the schema's type
/// and domain checks; it may still reject (e.g. a regex that fails to
/// compile) and must leave the block untouched when it does.
pub trait ParamSchema: Send + Sync {
    /// Static table of `(parameter_path, spec)` entries, excluding the
    /// reserved `enabled` path.
    fn specs() -> &'static [(&'static str, ParamSpec)]
    where
        Self: Sized;

    /// Applies a validated value to the named parameter.
    ///
    /// # Errors
    ///
    /// Returns a [`PatchError`] when the value is unusable despite passing
    /// the declared schema; the block must be unchanged in that case.
    fn apply(&mut self, path: &str, value: &PatchValue) -> Result<(), PatchError>;

    /// Snapshots the current parameter values, excluding `enabled`.
    fn snapshot(&self) -> BTreeMap<String, PatchValue>;

    /// Whether the data path is active.
    fn enabled(&self) -> bool;

    /// Toggles the data path.
    fn set_enabled(&mut self, enabled: bool);
}

/// Concurrency-safe parameter holder shared by every processor.
pub struct UpdateableCore<P: ParamSchema> {
    id: ProcessorId,
    params: RwLock<P>,
}

impl<P: ParamSchema> UpdateableCore<P> {
    /// Creates a core with the given identity and initial parameters.
    pub fn new(id: ProcessorId, params: P) -> Self {
        Self {
            id,
            params: RwLock::new(params),
        }
    }

    /// Returns the processor identity.
    #[must_use]
    pub const fn id(&self) -> &ProcessorId {
        &self.id
    }

    /// Acquires the shared read lock for the data path.
    pub fn read(&self) -> RwLockReadGuard<'_, P> {
        self.params.read()
    }

    /// Applies one patch: validate against the schema, then mutate under the
    /// exclusive lock. State is untouched on any failure.
    ///
    /// # Errors
    ///
    /// Returns the first failed check as a [`PatchError`].
    pub fn apply_patch(&self, patch: &ConfigPatch) -> Result<(), PatchError> {
        let path = patch.parameter_path.as_str();

        if path == ENABLED_PATH {
            let enabled = patch.new_value.as_bool().ok_or_else(|| {
                PatchError::InvalidValueType {
                    path: path.to_owned(),
                    expected: ValueKind::Bool,
                    actual: patch.new_value.kind(),
                }
            })?;
            self.params.write().set_enabled(enabled);
            return Ok(());
        }

        let (_, spec) = P::specs()
            .iter()
            .find(|(name, _)| *name == path)
            .ok_or_else(|| PatchError::UnknownParameter {
                path: path.to_owned(),
            })?;
        spec.validate(path, &patch.new_value)?;

        self.params.write().apply(path, &patch.new_value)
    }

    /// Produces a [`ConfigStatus`] snapshot under the read lock.
    #[must_use]
    pub fn config_status(&self) -> ConfigStatus {
        let guard = self.params.read();
        ConfigStatus {
            parameters: guard.snapshot(),
            enabled: guard.enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_config::PatchSource;

    struct TestParams {
        enabled: bool,
        k_value: i64,
    }

    impl ParamSchema for TestParams {
        fn specs() -> &'static [(&'static str, ParamSpec)] {
            const { &[("k_value", ParamSpec::int_range(1, 100))] }
        }

        fn apply(&mut self, path: &str, value: &PatchValue) -> Result<(), PatchError> {
            match path {
                "k_value" => {
                    self.k_value = value.as_i64().ok_or_else(|| PatchError::InvalidValue {
                        path: path.to_owned(),
                        details: "not an int".to_owned(),
                    })?;
                    Ok(())
                }
                other => Err(PatchError::UnknownParameter {
                    path: other.to_owned(),
                }),
            }
        }

        fn snapshot(&self) -> BTreeMap<String, PatchValue> {
            BTreeMap::from([("k_value".to_owned(), PatchValue::Int(self.k_value))])
        }

        fn enabled(&self) -> bool {
            self.enabled
        }

        fn set_enabled(&mut self, enabled: bool) {
            self.enabled = enabled;
        }
    }

    fn core() -> UpdateableCore<TestParams> {
        UpdateableCore::new(
            ProcessorId::named("test"),
            TestParams {
                enabled: true,
                k_value: 20,
            },
        )
    }

    fn patch(path: &str, value: impl Into<PatchValue>) -> ConfigPatch {
        ConfigPatch::new(
            "p-1",
            ProcessorId::named("test"),
            path,
            value,
            PatchSource::Manual,
        )
    }

    #[test]
    fn valid_patch_mutates() {
        let core = core();
        core.apply_patch(&patch("k_value", 40i64)).expect("accepted");
        assert_eq!(
            core.config_status().get("k_value"),
            Some(PatchValue::Int(40))
        );
    }

    #[test]
    fn rejected_patch_leaves_state_untouched() {
        let core = core();
        assert!(core.apply_patch(&patch("k_value", 0i64)).is_err());
        assert!(core.apply_patch(&patch("k_value", "forty")).is_err());
        assert!(core.apply_patch(&patch("unknown", 1i64)).is_err());
        assert_eq!(
            core.config_status().get("k_value"),
            Some(PatchValue::Int(20))
        );
    }

    #[test]
    fn enabled_path_toggles_short_circuit() {
        let core = core();
        assert!(core.config_status().enabled);
        core.apply_patch(&patch(ENABLED_PATH, false)).expect("toggle");
        assert!(!core.config_status().enabled);
        assert!(core.apply_patch(&patch(ENABLED_PATH, 1i64)).is_err());
    }
}
