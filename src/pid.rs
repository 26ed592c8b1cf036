// src/pid.rs - PID control law driving the heater duty cycle
use crate::config::PidConfig;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PidError {
    #[error("Invalid output limits: min {min} is greater than max {max}")]
    InvalidLimits { min: f64, max: f64 },
}

/// Stateful PID evaluator with a clamped output.
///
/// The integral accumulator is stored pre-multiplied by `ki` and clamped to
/// the output limits, so it can never wind up past what the output clamp
/// would cut off. The derivative acts on the measurement rather than the
/// error, so a setpoint change does not produce a derivative kick.
#[derive(Debug, Clone)]
pub struct PidController {
    /// PID parameters
    kp: f64,
    ki: f64,
    kd: f64,

    /// PID state
    integral: f64,
    previous_measurement: f64,
    previous_time: Option<Instant>,

    target: f64,
    out_min: f64,
    out_max: f64,
}

impl PidController {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            integral: 0.0,
            previous_measurement: 0.0,
            previous_time: None,
            target: 0.0,
            out_min: f64::NEG_INFINITY,
            out_max: f64::INFINITY,
        }
    }

    pub fn with_output_limits(mut self, min: f64, max: f64) -> Result<Self, PidError> {
        self.set_output_limits(min, max)?;
        Ok(self)
    }

    /// Set the output clamp. The integral accumulator is clamped immediately.
    pub fn set_output_limits(&mut self, min: f64, max: f64) -> Result<(), PidError> {
        if min.is_nan() || max.is_nan() || min > max {
            return Err(PidError::InvalidLimits { min, max });
        }
        self.out_min = min;
        self.out_max = max;
        self.integral = self.integral.clamp(min, max);
        Ok(())
    }

    /// Set target; takes effect on the next update.
    pub fn set_target(&mut self, target: f64) {
        self.target = target;
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn gains(&self) -> (f64, f64, f64) {
        (self.kp, self.ki, self.kd)
    }

    /// Feed a measurement, using wall-clock time since the previous call.
    pub fn update(&mut self, measurement: f64) -> f64 {
        let now = Instant::now();
        let elapsed = self
            .previous_time
            .map(|prev| now.duration_since(prev))
            .unwrap_or(Duration::ZERO);
        self.previous_time = Some(now);
        self.update_elapsed(measurement, elapsed)
    }

    /// Feed a measurement taken `elapsed` after the previous one.
    ///
    /// A zero `elapsed` contributes neither integral nor derivative action.
    pub fn update_elapsed(&mut self, measurement: f64, elapsed: Duration) -> f64 {
        if !measurement.is_finite() || !self.target.is_finite() {
            return self.idle_output();
        }
        let dt = elapsed.as_secs_f64();
        let error = self.target - measurement;

        self.integral = (self.integral + error * dt * self.ki).clamp(self.out_min, self.out_max);

        let derivative = if dt > 0.0 {
            -(measurement - self.previous_measurement) / dt
        } else {
            0.0
        };
        self.previous_measurement = measurement;

        let output = self.kp * error + self.integral + self.kd * derivative;
        output.clamp(self.out_min, self.out_max)
    }

    // Zero, or the closest limit to it.
    fn idle_output(&self) -> f64 {
        0.0_f64.clamp(self.out_min, self.out_max)
    }

    /// Reset PID controller
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_measurement = 0.0;
        self.previous_time = None;
    }
}

impl From<&PidConfig> for PidController {
    fn from(config: &PidConfig) -> Self {
        Self::new(config.p, config.i, config.d)
    }
}
