//! Common types used throughout ssl_local_planner

use std::fmt;
use std::sync::Arc;

use nalgebra::Vector2;

use crate::common::traits::ObstaclePredictor;

/// Stable identifier of a robot; its index addresses a per-robot slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RobotId(pub u8);

impl RobotId {
    pub fn new(id: u8) -> Self {
        Self(id)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RobotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "robot#{}", self.0)
    }
}

/// Kinematic snapshot of a robot, supplied by state estimation every tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobotKinematicState {
    pub id: RobotId,
    pub position: Vector2<f64>,
    pub velocity: Vector2<f64>,
    /// Heading in radians
    pub heading: f64,
    pub max_velocity: f64,
    pub max_acceleration: f64,
}

impl RobotKinematicState {
    pub fn new(
        id: RobotId,
        position: impl Into<Vector2<f64>>,
        velocity: impl Into<Vector2<f64>>,
        heading: f64,
        max_velocity: f64,
        max_acceleration: f64,
    ) -> Self {
        Self {
            id,
            position: position.into(),
            velocity: velocity.into(),
            heading,
            max_velocity,
            max_acceleration,
        }
    }

    /// Robot at rest at `position`
    pub fn stationary(
        id: RobotId,
        position: impl Into<Vector2<f64>>,
        max_velocity: f64,
        max_acceleration: f64,
    ) -> Self {
        Self::new(id, position, Vector2::zeros(), 0.0, max_velocity, max_acceleration)
    }

    pub fn speed(&self) -> f64 {
        self.velocity.norm()
    }

    pub fn distance_to(&self, point: &Vector2<f64>) -> f64 {
        (point - self.position).norm()
    }
}

/// Moving circular obstacle, rebuilt every tick from the other robots
#[derive(Clone)]
pub struct Obstacle {
    pub position: Vector2<f64>,
    pub velocity: Vector2<f64>,
    pub radius: f64,
    predictor: Option<Arc<dyn ObstaclePredictor>>,
}

impl Obstacle {
    pub fn new(
        position: impl Into<Vector2<f64>>,
        velocity: impl Into<Vector2<f64>>,
        radius: f64,
    ) -> Self {
        Self {
            position: position.into(),
            velocity: velocity.into(),
            radius,
            predictor: None,
        }
    }

    pub fn stationary(position: impl Into<Vector2<f64>>, radius: f64) -> Self {
        Self::new(position, Vector2::zeros(), radius)
    }

    /// Obstacle standing in for another robot
    pub fn from_robot(state: &RobotKinematicState, radius: f64) -> Self {
        Self::new(state.position, state.velocity, radius)
    }

    /// Replace constant-velocity extrapolation with an external predictor
    pub fn with_predictor(mut self, predictor: Arc<dyn ObstaclePredictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    /// Position `t` seconds into the future
    pub fn predicted_position(&self, t: f64) -> Vector2<f64> {
        match &self.predictor {
            Some(predictor) => predictor.position_at(self, t),
            None => self.position + self.velocity * t,
        }
    }
}

impl fmt::Debug for Obstacle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Obstacle")
            .field("position", &self.position)
            .field("velocity", &self.velocity)
            .field("radius", &self.radius)
            .field("predictor", &self.predictor.is_some())
            .finish()
    }
}

/// Build the obstacle list for one robot from the current frame
pub fn obstacles_from_frame(
    frame: &[RobotKinematicState],
    exclude: RobotId,
    radius: f64,
) -> Vec<Obstacle> {
    frame
        .iter()
        .filter(|robot| robot.id != exclude)
        .map(|robot| Obstacle::from_robot(robot, radius))
        .collect()
}

/// Telemetry attached to every command; never affects control
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlanDiagnostics {
    pub success: bool,
    pub solve_time_s: f64,
    pub fallback_used: bool,
}

/// Global-frame linear velocity command for the actuation layer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityCommand {
    pub vx: f64,
    pub vy: f64,
    pub diagnostics: PlanDiagnostics,
}

impl VelocityCommand {
    pub fn new(velocity: Vector2<f64>, diagnostics: PlanDiagnostics) -> Self {
        Self {
            vx: velocity.x,
            vy: velocity.y,
            diagnostics,
        }
    }

    pub fn zero() -> Self {
        Self::new(Vector2::zeros(), PlanDiagnostics::default())
    }

    pub fn velocity(&self) -> Vector2<f64> {
        Vector2::new(self.vx, self.vy)
    }

    pub fn speed(&self) -> f64 {
        self.vx.hypot(self.vy)
    }

    pub fn is_finite(&self) -> bool {
        self.vx.is_finite() && self.vy.is_finite()
    }
}

/// Instrumentation counters kept on each planner instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlannerStats {
    pub ticks: u64,
    pub failures: u64,
    /// DWA: candidates scored; MPC: QP solves attempted
    pub evaluations: u64,
}
