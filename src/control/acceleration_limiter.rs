//! Per-robot acceleration (rate) limiter
//!
//! Clamps the change of a command between consecutive ticks to
//! `max_acceleration * dt`. Works over scalars (e.g. angular velocity) and
//! 2-D velocity vectors.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::common::{PlanningError, PlanningResult, RobotId, RobotSlots};

/// A command value whose per-tick change can be bounded
pub trait Limitable: Copy {
    /// Value assumed for a robot seen for the first time
    fn zero() -> Self;

    /// Move from `last` toward `requested` by at most `allowed_delta`
    fn step_toward(last: Self, requested: Self, allowed_delta: f64) -> Self;
}

impl Limitable for f64 {
    fn zero() -> Self {
        0.0
    }

    fn step_toward(last: Self, requested: Self, allowed_delta: f64) -> Self {
        last + (requested - last).clamp(-allowed_delta, allowed_delta)
    }
}

impl Limitable for Vector2<f64> {
    fn zero() -> Self {
        Vector2::zeros()
    }

    fn step_toward(last: Self, requested: Self, allowed_delta: f64) -> Self {
        let delta = requested - last;
        let norm = delta.norm();
        if norm <= allowed_delta || norm == 0.0 {
            return requested;
        }
        last + delta * (allowed_delta / norm)
    }
}

/// Limiter parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Maximum rate of change [unit/s]
    pub max_acceleration: f64,
    /// Tick period [s]
    pub dt: f64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_acceleration: 3.0,
            dt: 1.0 / 60.0,
        }
    }
}

impl LimiterConfig {
    pub fn validate(&self) -> PlanningResult<()> {
        if self.dt <= 0.0 || !self.dt.is_finite() {
            return Err(PlanningError::InvalidConfig(format!(
                "limiter dt must be greater than zero, got {}",
                self.dt
            )));
        }
        if self.max_acceleration < 0.0 || !self.max_acceleration.is_finite() {
            return Err(PlanningError::InvalidConfig(format!(
                "limiter max_acceleration must be non-negative, got {}",
                self.max_acceleration
            )));
        }
        Ok(())
    }
}

/// Remembers the last output per robot and bounds the next one
#[derive(Debug, Clone)]
pub struct AccelerationLimiter<T: Limitable> {
    config: LimiterConfig,
    last_values: RobotSlots<T>,
}

impl<T: Limitable> AccelerationLimiter<T> {
    pub fn new(max_acceleration: f64, dt: f64) -> PlanningResult<Self> {
        Self::from_config(LimiterConfig { max_acceleration, dt })
    }

    pub fn from_config(config: LimiterConfig) -> PlanningResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            last_values: RobotSlots::new(),
        })
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Replace the limits while keeping each robot's last value
    pub fn set_config(&mut self, config: LimiterConfig) -> PlanningResult<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Largest change allowed in one tick
    pub fn allowed_delta(&self) -> f64 {
        self.config.max_acceleration * self.config.dt
    }

    /// Limit `requested` for `robot_id` and remember the result
    pub fn limit(&mut self, robot_id: RobotId, requested: T) -> T {
        let allowed = self.allowed_delta();
        let last = self.last_values.get_or_insert_with(robot_id, T::zero);
        *last = T::step_toward(*last, requested, allowed);
        *last
    }

    /// Limit `requested` against an explicit previous value, without touching state
    pub fn limit_from(&self, last: T, requested: T) -> T {
        T::step_toward(last, requested, self.allowed_delta())
    }

    /// Last limited value for `robot_id`, if any
    pub fn last_value(&self, robot_id: RobotId) -> Option<T> {
        self.last_values.get(robot_id).copied()
    }

    /// Forget the stored value so the next call starts from zero
    pub fn reset(&mut self, robot_id: RobotId) {
        self.last_values.remove(robot_id);
    }

    pub fn reset_all(&mut self) {
        self.last_values.clear();
    }
}
