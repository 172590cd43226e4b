//! Commands substituted when a planner produces nothing usable

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::common::{PlanningError, PlanningResult, RobotKinematicState};

/// What to command when planning fails and no external fallback is supplied
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Zero velocity; the limiter turns this into a bounded deceleration
    Hold,
    /// Reactive `gain * (target - position)` capped at the robot's max speed
    Proportional { gain: f64 },
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        FallbackPolicy::Hold
    }
}

impl FallbackPolicy {
    pub fn validate(&self) -> PlanningResult<()> {
        match *self {
            FallbackPolicy::Hold => Ok(()),
            FallbackPolicy::Proportional { gain } if gain.is_finite() && gain >= 0.0 => Ok(()),
            FallbackPolicy::Proportional { gain } => Err(PlanningError::InvalidConfig(format!(
                "fallback gain must be non-negative, got {}",
                gain
            ))),
        }
    }

    pub fn velocity(&self, state: &RobotKinematicState, target: Vector2<f64>) -> Vector2<f64> {
        match *self {
            FallbackPolicy::Hold => Vector2::zeros(),
            FallbackPolicy::Proportional { gain } => {
                cap_speed((target - state.position) * gain, state.max_velocity)
            }
        }
    }
}

/// Scale `velocity` down to `max_speed` if it is faster
pub fn cap_speed(velocity: Vector2<f64>, max_speed: f64) -> Vector2<f64> {
    let speed = velocity.norm();
    let max_speed = max_speed.max(0.0);
    if speed > max_speed {
        velocity * (max_speed / speed)
    } else {
        velocity
    }
}
