//! Common traits defining the planner contract

use nalgebra::Vector2;

use crate::common::error::PlanningError;
use crate::common::types::*;

/// Short-horizon position predictor for an obstacle
///
/// Attached to an [`Obstacle`] when perception supplies something richer than
/// constant-velocity extrapolation.
pub trait ObstaclePredictor: Send + Sync {
    /// Predicted position of `obstacle` after `t` seconds
    fn position_at(&self, obstacle: &Obstacle, t: f64) -> Vector2<f64>;
}

/// Raw velocity produced by a local planner, before rate limiting
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedVelocity {
    pub velocity: Vector2<f64>,
    pub solve_time_s: f64,
}

/// A planning tick that produced no acceptable command
#[derive(Debug)]
pub struct PlanFailure {
    pub error: PlanningError,
    pub solve_time_s: f64,
    /// Suboptimal velocity the planner could still offer, if any
    pub best_effort: Option<Vector2<f64>>,
}

impl PlanFailure {
    pub fn new(error: PlanningError, solve_time_s: f64) -> Self {
        Self {
            error,
            solve_time_s,
            best_effort: None,
        }
    }

    pub fn with_best_effort(mut self, velocity: Vector2<f64>) -> Self {
        self.best_effort = Some(velocity);
        self
    }
}

/// Trait for local planners (DWA, MPC)
///
/// One instance is owned per robot. Failures are returned as values and are
/// never raised past the planning boundary.
pub trait LocalPlanner: Send {
    /// Compute the next velocity toward `target` while avoiding `obstacles`
    fn plan(
        &mut self,
        state: &RobotKinematicState,
        target: Vector2<f64>,
        obstacles: &[Obstacle],
    ) -> Result<PlannedVelocity, PlanFailure>;

    /// Drop any per-robot state carried between ticks
    fn reset(&mut self);

    /// Short algorithm name for logs
    fn name(&self) -> &'static str;

    /// Instrumentation counters
    fn stats(&self) -> PlannerStats;
}
