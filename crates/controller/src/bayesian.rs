// SPDX-License-Identifier: Apache-2.0

//! Stall-recovery explorer.
//!
//! When a PID loop stalls (its output stops moving while the KPI is still
//! off target), gradient information is gone and the loop needs a probe
//! somewhere else in the search space. The explorer proposes a deterministic
//! opening book over the bounded interval (midpoint, then the corners),
//! followed by uniform random probes. Probe variance is bounded by the
//! interval itself, so repeated probing cannot diverge.

use rand::RngExt;
use rand::rngs::SmallRng;

/// Proposes probe values over a bounded interval after a stall.
#[derive(Debug)]
pub struct StallExplorer {
    probes_issued: u32,
    rng: SmallRng,
}

impl StallExplorer {
    /// Creates an explorer with the given random source.
    #[must_use]
    pub const fn new(rng: SmallRng) -> Self {
        Self {
            probes_issued: 0,
            rng,
        }
    }

    /// Returns the number of probes issued so far.
    #[must_use]
    pub const fn probes_issued(&self) -> u32 {
        self.probes_issued
    }

    /// Proposes the next probe within `[min, max]`.
    ///
    /// The first three probes are the midpoint and the two corners; after
    /// that, probes are uniform over the interval. A probe equal to
    /// `current` is nudged to the opposite half so every probe moves the
    /// parameter.
    pub fn next_probe(&mut self, min: f64, max: f64, current: f64) -> f64 {
        let probe = match self.probes_issued {
            0 => (min + max) / 2.0,
            1 => min,
            2 => max,
            _ => self.rng.random_range(min..=max),
        };
        self.probes_issued += 1;

        if (probe - current).abs() < f64::EPSILON {
            // Reflect around the midpoint to force movement.
            let mid = (min + max) / 2.0;
            if current <= mid { max } else { min }
        } else {
            probe
        }
    }

    /// Resets the opening book after the loop recovers.
    pub const fn reset(&mut self) {
        self.probes_issued = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn explorer() -> StallExplorer {
        StallExplorer::new(SmallRng::seed_from_u64(7))
    }

    #[test]
    fn opening_book_covers_midpoint_and_corners() {
        let mut ex = explorer();
        assert_eq!(ex.next_probe(10.0, 60.0, 20.0), 35.0);
        assert_eq!(ex.next_probe(10.0, 60.0, 20.0), 10.0);
        assert_eq!(ex.next_probe(10.0, 60.0, 20.0), 60.0);
    }

    #[test]
    fn random_probes_stay_in_bounds() {
        let mut ex = explorer();
        for _ in 0..100 {
            let probe = ex.next_probe(10.0, 60.0, 20.0);
            assert!((10.0..=60.0).contains(&probe));
        }
    }

    #[test]
    fn probe_never_equals_current() {
        let mut ex = explorer();
        let current = 35.0; // equals the midpoint opener
        let probe = ex.next_probe(10.0, 60.0, current);
        assert!((probe - current).abs() > f64::EPSILON);
    }
}
