// SPDX-License-Identifier: Apache-2.0

//! Discrete PID controller.
//!
//! Invariants:
//! - the integral magnitude never exceeds `integral_limit` when the limit is
//!   set (> 0);
//! - time deltas are clamped to `[1 ms, 60 s]` so a stalled clock cannot
//!   produce a derivative kick;
//! - a setpoint or gain change resets the integral.

/// Lower clamp for the evaluation time delta, seconds.
const DT_MIN_SECONDS: f64 = 0.001;
/// Upper clamp for the evaluation time delta, seconds.
const DT_MAX_SECONDS: f64 = 60.0;

/// State of one PID control loop.
#[derive(Debug, Clone)]
pub struct PidController {
    /// Proportional gain.
    kp: f64,
    /// Integral gain.
    ki: f64,
    /// Derivative gain.
    kd: f64,
    /// Target KPI value.
    setpoint: f64,
    /// Accumulated integral term.
    integral: f64,
    /// Error at the previous evaluation.
    prev_error: Option<f64>,
    /// Time of the previous evaluation, seconds.
    prev_time: Option<f64>,
    /// Integral clamp magnitude; 0 disables the clamp.
    integral_limit: f64,
    /// Output of the previous evaluation.
    last_output: f64,
}

impl PidController {
    /// Creates a controller with the given gains and setpoint.
    #[must_use]
    pub const fn new(kp: f64, ki: f64, kd: f64, setpoint: f64, integral_limit: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            setpoint,
            integral: 0.0,
            prev_error: None,
            prev_time: None,
            integral_limit,
            last_output: 0.0,
        }
    }

    /// Returns the current setpoint.
    #[must_use]
    pub const fn setpoint(&self) -> f64 {
        self.setpoint
    }

    /// Returns the output of the previous evaluation.
    #[must_use]
    pub const fn last_output(&self) -> f64 {
        self.last_output
    }

    /// Returns the current integral term.
    #[must_use]
    pub const fn integral(&self) -> f64 {
        self.integral
    }

    /// Returns the current gains `(kp, ki, kd)`.
    #[must_use]
    pub const fn gains(&self) -> (f64, f64, f64) {
        (self.kp, self.ki, self.kd)
    }

    /// Changes the setpoint and resets the integral.
    pub const fn set_setpoint(&mut self, setpoint: f64) {
        self.setpoint = setpoint;
        self.integral = 0.0;
    }

    /// Changes the gains and resets the integral.
    pub const fn set_gains(&mut self, kp: f64, ki: f64, kd: f64) {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
        self.integral = 0.0;
    }

    /// Evaluates one step against the measured KPI value at `now` (seconds).
    ///
    /// Non-finite inputs are treated as zero error contribution; the output
    /// is always finite.
    pub fn step(&mut self, current: f64, now_seconds: f64) -> f64 {
        let current = if current.is_finite() { current } else { self.setpoint };
        let error = self.setpoint - current;

        let dt = match self.prev_time {
            Some(prev) => (now_seconds - prev).clamp(DT_MIN_SECONDS, DT_MAX_SECONDS),
            None => 1.0,
        };

        self.integral += error * dt;
        if self.integral_limit > 0.0 {
            self.integral = self
                .integral
                .clamp(-self.integral_limit, self.integral_limit);
        }

        let derivative = match self.prev_error {
            Some(prev) => (error - prev) / dt,
            None => 0.0,
        };

        let mut output = self.kp * error + self.ki * self.integral + self.kd * derivative;
        if !output.is_finite() {
            output = 0.0;
        }

        self.prev_error = Some(error);
        self.prev_time = Some(now_seconds);
        self.last_output = output;
        output
    }
}
