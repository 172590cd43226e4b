//! ssl_local_planner - local motion planning for multi-robot soccer
//!
//! Turns a robot's kinematic state, a target position and the surrounding
//! robots into a safe, bounded velocity command every control tick. Two
//! planners are provided: a sampling dynamic-window planner and a
//! receding-horizon optimizer solved as a conic QP.

// Core modules
pub mod common;
pub mod geometry;
pub mod utils;

// Algorithm modules
pub mod path_planning;
pub mod control;
pub mod motion_planning;

// Re-export common types for convenience
pub use common::{Obstacle, RobotId, RobotKinematicState, VelocityCommand, PlanDiagnostics};
pub use common::{LocalPlanner, ObstaclePredictor};
pub use common::{PlanningError, PlanningResult, SolverFailure};
pub use motion_planning::{MotionPlanningConfig, MotionPlanningFacade, PlanRequest, PlannerKind};
