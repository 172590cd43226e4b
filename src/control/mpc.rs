//! Receding-horizon optimizer for omnidirectional robots
//!
//! Every tick a small convex QP is posed over `T` steps of a discrete double
//! integrator (state `[px, py, vx, vy]`, control `[ax, ay]`):
//!
//! - position tracking toward the goal plus a terminal position term,
//! - velocity tracking toward a braking-profile reference,
//! - control effort, raised sharply inside the arrival radius,
//! - soft half-planes keeping each predicted position clear of each obstacle,
//! - hard norm bounds on velocity and acceleration (second-order cones).
//!
//! Obstacle half-planes are linearized once around the current robot
//! position. The command is the velocity read at a lookahead index of the
//! solved trajectory.

use std::sync::Arc;
use std::time::Instant;

use nalgebra::{DMatrix, DVector, Matrix4, Matrix4x2, Vector2, Vector4};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::common::{
    LocalPlanner, Obstacle, PlanFailure, PlannedVelocity, PlannerStats, PlanningError,
    PlanningResult, RobotKinematicState, SolverFailure,
};
use crate::control::qp::{ClarabelBackend, ConeSpec, QpBackend, QpProblem, QpSettings, QpStatus};

const STATE_DIM: usize = 4;
const CONTROL_DIM: usize = 2;
/// Obstacles closer than this to the robot give no usable normal [m]
const MIN_NORMAL_DISTANCE: f64 = 1e-3;

/// Configuration for the horizon optimizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpcConfig {
    /// Horizon length in steps
    #[serde(alias = "T")]
    pub horizon: usize,
    /// Step length [s]
    pub dt: f64,
    pub q_pos: f64,
    pub q_vel: f64,
    pub r_accel: f64,
    /// Linear penalty on each slack variable
    pub q_slack: f64,
    /// Weight of the final position term
    pub q_terminal: f64,
    pub max_vel: f64,
    pub max_accel: f64,
    pub robot_radius: f64,
    /// Multiplier on the robot radius in the safety distance
    pub obstacle_buffer_ratio: f64,
    /// Extra safety distance per unit of current speed [s]
    pub safety_vel_coeff: f64,
    /// Solver deadline [s]
    pub max_solve_time: f64,
    pub max_iter: u32,
    /// Goal distance below which the reference velocity is zero [m]
    pub arrival_radius: f64,
    /// Control weight used while arriving
    pub arrival_damping: f64,
    /// Goal distance below which the command is read at index 1 [m]
    pub precision_radius: f64,
    /// Lookahead index used away from the goal
    pub turbo_index: usize,
    /// Cap on soft half-plane rows
    pub max_obstacle_constraints: usize,
}

impl Default for MpcConfig {
    fn default() -> Self {
        Self {
            horizon: 5,
            dt: 0.05,
            q_pos: 80.0,
            q_vel: 200.0,
            r_accel: 0.01,
            q_slack: 5.0e6,
            q_terminal: 80.0,
            max_vel: 2.0,
            max_accel: 3.0,
            robot_radius: 0.09,
            obstacle_buffer_ratio: 1.25,
            safety_vel_coeff: 0.15,
            max_solve_time: 0.010,
            max_iter: 100,
            arrival_radius: 0.15,
            arrival_damping: 1.0,
            precision_radius: 0.20,
            turbo_index: 3,
            max_obstacle_constraints: 50,
        }
    }
}

impl MpcConfig {
    pub fn validate(&self) -> PlanningResult<()> {
        let invalid = |msg: String| Err(PlanningError::InvalidConfig(msg));
        if self.horizon == 0 {
            return invalid("mpc horizon must be at least 1 step".to_string());
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return invalid(format!("mpc dt must be positive, got {}", self.dt));
        }
        if !(self.max_solve_time.is_finite() && self.max_solve_time > 0.0) {
            return invalid(format!("mpc max_solve_time must be positive, got {}", self.max_solve_time));
        }
        if self.max_iter == 0 {
            return invalid("mpc max_iter must be at least 1".to_string());
        }
        let non_negative = [
            ("q_pos", self.q_pos),
            ("q_vel", self.q_vel),
            ("r_accel", self.r_accel),
            ("q_slack", self.q_slack),
            ("q_terminal", self.q_terminal),
            ("max_vel", self.max_vel),
            ("max_accel", self.max_accel),
            ("robot_radius", self.robot_radius),
            ("obstacle_buffer_ratio", self.obstacle_buffer_ratio),
            ("safety_vel_coeff", self.safety_vel_coeff),
            ("arrival_radius", self.arrival_radius),
            ("arrival_damping", self.arrival_damping),
            ("precision_radius", self.precision_radius),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return invalid(format!("mpc {} must be non-negative, got {}", name, value));
            }
        }
        Ok(())
    }

    /// Clearance kept between robot and obstacle centers
    pub fn safety_distance(&self, current_speed: f64, obstacle_radius: f64) -> f64 {
        self.robot_radius * self.obstacle_buffer_ratio
            + current_speed * self.safety_vel_coeff
            + obstacle_radius
    }

    /// Trajectory index the command velocity is read from
    pub fn lookahead_index(&self, distance_to_goal: f64) -> usize {
        if distance_to_goal < self.precision_radius {
            1.min(self.horizon)
        } else {
            self.turbo_index.clamp(1, self.horizon)
        }
    }
}

/// Predicted states `x_0..x_T` and controls `u_0..u_{T-1}`
#[derive(Debug, Clone, PartialEq)]
pub struct HorizonTrajectory {
    pub states: Vec<Vector4<f64>>,
    pub controls: Vec<Vector2<f64>>,
}

impl HorizonTrajectory {
    pub fn horizon(&self) -> usize {
        self.controls.len()
    }

    /// Position of `x_k`, clamped to the last state; zero for an empty trajectory
    pub fn position_at(&self, k: usize) -> Vector2<f64> {
        self.state_at(k).map_or_else(Vector2::zeros, |x| Vector2::new(x[0], x[1]))
    }

    /// Velocity of `x_k`, clamped to the last state; zero for an empty trajectory
    pub fn velocity_at(&self, k: usize) -> Vector2<f64> {
        self.state_at(k).map_or_else(Vector2::zeros, |x| Vector2::new(x[2], x[3]))
    }

    fn state_at(&self, k: usize) -> Option<&Vector4<f64>> {
        self.states.get(k).or_else(|| self.states.last())
    }

    /// Drop the first step and repeat the last one
    pub fn shifted(&self) -> Self {
        let mut states: Vec<Vector4<f64>> = self.states.iter().skip(1).copied().collect();
        if let Some(&last) = self.states.last() {
            states.push(last);
        }
        let mut controls: Vec<Vector2<f64>> = self.controls.iter().skip(1).copied().collect();
        if let Some(&last) = self.controls.last() {
            controls.push(last);
        }
        Self { states, controls }
    }

    fn is_finite(&self) -> bool {
        self.states.iter().all(|x| x.iter().all(|v| v.is_finite()))
            && self.controls.iter().all(|u| u.iter().all(|v| v.is_finite()))
    }
}

/// Soft half-plane `n . (p_step - boundary) >= -slack`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalfPlane {
    /// Index of the constrained state, 1..=T
    pub step: usize,
    pub normal: Vector2<f64>,
    pub boundary: Vector2<f64>,
}

/// A posed horizon QP plus the terms it was built from
#[derive(Debug, Clone)]
pub struct HorizonProblem {
    pub qp: QpProblem,
    /// Reference velocity for states `x_1..x_T`
    pub reference_velocities: Vec<Vector2<f64>>,
    pub control_weight: f64,
    pub arriving: bool,
    pub half_planes: Vec<HalfPlane>,
    pub initial_state: Vector4<f64>,
    pub distance_to_goal: f64,
}

/// Successful solve
#[derive(Debug, Clone)]
pub struct HorizonSolution {
    pub trajectory: HorizonTrajectory,
    pub status: QpStatus,
    pub solve_time_s: f64,
}

/// Rejected solve, with whatever trajectory is still usable
#[derive(Debug, Clone)]
pub struct HorizonFailure {
    pub failure: SolverFailure,
    pub best_effort: Option<HorizonTrajectory>,
    pub solve_time_s: f64,
}

/// MPC local planner for one robot, owning its warm-start cache
pub struct HorizonOptimizer {
    config: MpcConfig,
    a: Matrix4<f64>,
    b: Matrix4x2<f64>,
    backend: Arc<dyn QpBackend>,
    warm_start: Option<HorizonTrajectory>,
    stats: PlannerStats,
}

impl HorizonOptimizer {
    pub fn new(config: MpcConfig) -> PlanningResult<Self> {
        Self::with_backend(config, Arc::new(ClarabelBackend))
    }

    pub fn with_defaults() -> PlanningResult<Self> {
        Self::new(MpcConfig::default())
    }

    pub fn with_backend(config: MpcConfig, backend: Arc<dyn QpBackend>) -> PlanningResult<Self> {
        config.validate()?;
        let (a, b) = double_integrator(config.dt);
        Ok(Self {
            config,
            a,
            b,
            backend,
            warm_start: None,
            stats: PlannerStats::default(),
        })
    }

    pub fn config(&self) -> &MpcConfig {
        &self.config
    }

    pub fn set_backend(&mut self, backend: Arc<dyn QpBackend>) {
        self.backend = backend;
    }

    pub fn warm_start(&self) -> Option<&HorizonTrajectory> {
        self.warm_start.as_ref()
    }

    /// Swap the configuration; a cache of the wrong horizon is dropped on the next solve
    pub fn reconfigure(&mut self, config: MpcConfig) -> PlanningResult<()> {
        config.validate()?;
        let (a, b) = double_integrator(config.dt);
        self.a = a;
        self.b = b;
        self.config = config;
        Ok(())
    }

    /// Pose the QP for one tick without solving it
    pub fn build_problem(
        &self,
        state: &RobotKinematicState,
        goal: Vector2<f64>,
        obstacles: &[Obstacle],
    ) -> HorizonProblem {
        let cfg = &self.config;
        let t = cfg.horizon;
        let x0 = Vector4::new(state.position.x, state.position.y, state.velocity.x, state.velocity.y);
        let to_goal = goal - state.position;
        let distance = to_goal.norm();
        let arriving = distance < cfg.arrival_radius;

        let reference_velocities = if arriving {
            vec![Vector2::zeros(); t]
        } else {
            braking_profile(to_goal, cfg)
        };
        let control_weight = if arriving { cfg.arrival_damping } else { cfg.r_accel };

        let half_planes = self.half_planes(state, obstacles);
        let n_slack = half_planes.len();
        let n = (STATE_DIM + CONTROL_DIM) * t + n_slack;

        // Cost
        let mut p = DMatrix::zeros(n, n);
        let mut q = DVector::zeros(n);
        for k in 1..=t {
            let base = state_index(k);
            let w = if k == t { cfg.q_terminal } else { cfg.q_pos };
            for d in 0..2 {
                p[(base + d, base + d)] += 2.0 * w;
                q[base + d] -= 2.0 * w * goal[d];
            }
            if k < t {
                let v_ref = reference_velocities[k - 1];
                for d in 0..2 {
                    p[(base + 2 + d, base + 2 + d)] += 2.0 * cfg.q_vel;
                    q[base + 2 + d] -= 2.0 * cfg.q_vel * v_ref[d];
                }
            }
        }
        for k in 0..t {
            let base = control_index(t, k);
            for d in 0..CONTROL_DIM {
                p[(base + d, base + d)] += 2.0 * control_weight;
            }
        }
        let slack_base = (STATE_DIM + CONTROL_DIM) * t;
        for i in 0..n_slack {
            q[slack_base + i] = cfg.q_slack;
        }

        // Constraints
        let n_dynamics = STATE_DIM * t;
        let n_rows = n_dynamics + 2 * n_slack + 3 * t + 3 * t;
        let mut a = DMatrix::zeros(n_rows, n);
        let mut b = DVector::zeros(n_rows);
        let mut cones = Vec::with_capacity(2 + 2 * t);

        // x_{k+1} - A x_k - B u_k = 0, with x_0 folded into b
        let free_response = self.a * x0;
        for k in 0..t {
            let row = STATE_DIM * k;
            let next = state_index(k + 1);
            let control = control_index(t, k);
            for i in 0..STATE_DIM {
                a[(row + i, next + i)] = 1.0;
                for j in 0..CONTROL_DIM {
                    a[(row + i, control + j)] = -self.b[(i, j)];
                }
                if k == 0 {
                    b[row + i] = free_response[i];
                } else {
                    let prev = state_index(k);
                    for j in 0..STATE_DIM {
                        a[(row + i, prev + j)] -= self.a[(i, j)];
                    }
                }
            }
        }
        cones.push(ConeSpec::Zero(n_dynamics));

        // -n . p - s <= -n . boundary, and -s <= 0
        let mut row = n_dynamics;
        for (i, plane) in half_planes.iter().enumerate() {
            let base = state_index(plane.step);
            a[(row, base)] = -plane.normal.x;
            a[(row, base + 1)] = -plane.normal.y;
            a[(row, slack_base + i)] = -1.0;
            b[row] = -plane.normal.dot(&plane.boundary);
            row += 1;
        }
        for i in 0..n_slack {
            a[(row, slack_base + i)] = -1.0;
            row += 1;
        }
        if n_slack > 0 {
            cones.push(ConeSpec::Nonnegative(2 * n_slack));
        }

        // |v_k| <= max_vel for k = 1..T
        for k in 1..=t {
            let base = state_index(k);
            b[row] = cfg.max_vel;
            a[(row + 1, base + 2)] = -1.0;
            a[(row + 2, base + 3)] = -1.0;
            cones.push(ConeSpec::SecondOrder(3));
            row += 3;
        }
        // |u_k| <= max_accel for k = 0..T-1
        for k in 0..t {
            let base = control_index(t, k);
            b[row] = cfg.max_accel;
            a[(row + 1, base)] = -1.0;
            a[(row + 2, base + 1)] = -1.0;
            cones.push(ConeSpec::SecondOrder(3));
            row += 3;
        }
        debug_assert_eq!(row, n_rows);

        HorizonProblem {
            qp: QpProblem { p, q, a, b, cones },
            reference_velocities,
            control_weight,
            arriving,
            half_planes,
            initial_state: x0,
            distance_to_goal: distance,
        }
    }

    /// Half-planes for the nearest obstacles first, capped at `max_obstacle_constraints`
    fn half_planes(&self, state: &RobotKinematicState, obstacles: &[Obstacle]) -> Vec<HalfPlane> {
        let cfg = &self.config;
        let speed = state.speed();
        let mut nearest: Vec<&Obstacle> = obstacles.iter().collect();
        nearest.sort_by_key(|o| OrderedFloat((o.position - state.position).norm()));

        let mut planes = Vec::new();
        for obstacle in nearest {
            let safety = cfg.safety_distance(speed, obstacle.radius);
            for k in 0..cfg.horizon {
                if planes.len() >= cfg.max_obstacle_constraints {
                    return planes;
                }
                let center = obstacle.predicted_position(k as f64 * cfg.dt);
                let offset = state.position - center;
                let distance = offset.norm();
                if distance <= MIN_NORMAL_DISTANCE {
                    continue;
                }
                let normal = offset / distance;
                planes.push(HalfPlane {
                    step: k + 1,
                    normal,
                    boundary: center + normal * safety,
                });
            }
        }
        planes
    }

    /// Solve one tick; the warm-start cache is replaced only on success
    pub fn solve(
        &mut self,
        state: &RobotKinematicState,
        goal: Vector2<f64>,
        obstacles: &[Obstacle],
    ) -> Result<HorizonSolution, HorizonFailure> {
        let started = Instant::now();
        self.stats.evaluations += 1;
        self.discard_stale_warm_start();

        let problem = self.build_problem(state, goal, obstacles);
        let settings = QpSettings {
            max_iter: self.config.max_iter,
            time_limit: self.config.max_solve_time,
        };
        let outcome = self.backend.solve(&problem.qp, &settings);
        let solve_time_s = started.elapsed().as_secs_f64();

        let (failure, best_effort) = match outcome {
            Ok(solution) if solution.status.is_success() => {
                match self.decode(&problem, &solution.x) {
                    Some(trajectory) => {
                        debug!(
                            robot = %state.id,
                            status = ?solution.status,
                            iterations = solution.iterations,
                            solve_time_s,
                            "horizon QP solved"
                        );
                        self.warm_start = Some(trajectory.clone());
                        return Ok(HorizonSolution {
                            trajectory,
                            status: solution.status,
                            solve_time_s,
                        });
                    }
                    None => (
                        SolverFailure::Infeasible {
                            status: "non-finite solution".to_string(),
                        },
                        self.shifted_warm_start(),
                    ),
                }
            }
            Ok(solution) => {
                let iterate = self.decode(&problem, &solution.x);
                match solution.status {
                    QpStatus::MaxTime => (
                        SolverFailure::Timeout {
                            limit_s: self.config.max_solve_time,
                        },
                        iterate.or_else(|| self.shifted_warm_start()),
                    ),
                    QpStatus::MaxIterations => (
                        SolverFailure::Infeasible {
                            status: "MaxIterations".to_string(),
                        },
                        iterate.or_else(|| self.shifted_warm_start()),
                    ),
                    other => (
                        SolverFailure::Infeasible {
                            status: match other {
                                QpStatus::Failed(status) => status,
                                status => format!("{:?}", status),
                            },
                        },
                        self.shifted_warm_start(),
                    ),
                }
            }
            Err(failure) => (failure, self.shifted_warm_start()),
        };

        warn!(
            robot = %state.id,
            backend = self.backend.name(),
            %failure,
            best_effort = best_effort.is_some(),
            "horizon QP rejected"
        );
        Err(HorizonFailure {
            failure,
            best_effort,
            solve_time_s,
        })
    }

    /// Velocity command read from a solved trajectory
    pub fn command_velocity(&self, trajectory: &HorizonTrajectory, distance_to_goal: f64) -> Vector2<f64> {
        trajectory.velocity_at(self.config.lookahead_index(distance_to_goal))
    }

    fn decode(&self, problem: &HorizonProblem, x: &[f64]) -> Option<HorizonTrajectory> {
        let t = self.config.horizon;
        if x.len() < problem.qp.num_variables() {
            return None;
        }
        let mut states = Vec::with_capacity(t + 1);
        states.push(problem.initial_state);
        for k in 1..=t {
            let base = state_index(k);
            states.push(Vector4::new(x[base], x[base + 1], x[base + 2], x[base + 3]));
        }
        let controls = (0..t)
            .map(|k| {
                let base = control_index(t, k);
                Vector2::new(x[base], x[base + 1])
            })
            .collect();
        let trajectory = HorizonTrajectory { states, controls };
        trajectory.is_finite().then_some(trajectory)
    }

    fn discard_stale_warm_start(&mut self) {
        let horizon = self.config.horizon;
        let cached = self.warm_start.as_ref().map(HorizonTrajectory::horizon);
        if let Some(cached) = cached.filter(|&h| h != horizon) {
            debug!(cached, horizon, "discarding stale warm start");
            self.warm_start = None;
        }
    }

    fn shifted_warm_start(&self) -> Option<HorizonTrajectory> {
        self.warm_start.as_ref().map(HorizonTrajectory::shifted)
    }
}

impl LocalPlanner for HorizonOptimizer {
    fn plan(
        &mut self,
        state: &RobotKinematicState,
        target: Vector2<f64>,
        obstacles: &[Obstacle],
    ) -> Result<PlannedVelocity, PlanFailure> {
        self.stats.ticks += 1;
        let distance = state.distance_to(&target);
        match self.solve(state, target, obstacles) {
            Ok(solution) => Ok(PlannedVelocity {
                velocity: self.command_velocity(&solution.trajectory, distance),
                solve_time_s: solution.solve_time_s,
            }),
            Err(failed) => {
                self.stats.failures += 1;
                let mut failure = PlanFailure::new(PlanningError::Solver(failed.failure), failed.solve_time_s);
                if let Some(trajectory) = &failed.best_effort {
                    failure = failure.with_best_effort(self.command_velocity(trajectory, distance));
                }
                Err(failure)
            }
        }
    }

    fn reset(&mut self) {
        self.warm_start = None;
    }

    fn name(&self) -> &'static str {
        "mpc"
    }

    fn stats(&self) -> PlannerStats {
        self.stats
    }
}

#[rustfmt::skip]
fn double_integrator(dt: f64) -> (Matrix4<f64>, Matrix4x2<f64>) {
    let a = Matrix4::new(
        1.0, 0.0, dt, 0.0,
        0.0, 1.0, 0.0, dt,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    );
    let b = Matrix4x2::new(
        0.0, 0.0,
        0.0, 0.0,
        dt, 0.0,
        0.0, dt,
    );
    (a, b)
}

/// Reference velocity per step that decelerates along the remaining distance
fn braking_profile(to_goal: Vector2<f64>, cfg: &MpcConfig) -> Vec<Vector2<f64>> {
    let distance = to_goal.norm();
    let direction = if distance > 1e-9 { to_goal / distance } else { Vector2::zeros() };
    let mut remaining = distance;
    (0..cfg.horizon)
        .map(|_| {
            let speed = (2.0 * cfg.max_accel * remaining).sqrt().min(cfg.max_vel);
            remaining = (remaining - speed * cfg.dt).max(0.0);
            direction * speed
        })
        .collect()
}

/// Offset of `x_k` (k >= 1) in the decision vector
fn state_index(k: usize) -> usize {
    STATE_DIM * (k - 1)
}

/// Offset of `u_k` in the decision vector
fn control_index(horizon: usize, k: usize) -> usize {
    STATE_DIM * horizon + CONTROL_DIM * k
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::RobotId;
    use crate::control::qp::QpSolution;
    use approx::assert_relative_eq;

    /// Backend that returns a fixed status and an all-zero iterate
    struct ScriptedBackend {
        status: QpStatus,
        with_iterate: bool,
    }

    impl QpBackend for ScriptedBackend {
        fn solve(&self, problem: &QpProblem, _settings: &QpSettings) -> Result<QpSolution, SolverFailure> {
            Ok(QpSolution {
                status: self.status.clone(),
                x: if self.with_iterate {
                    vec![0.0; problem.num_variables()]
                } else {
                    Vec::new()
                },
                iterations: 0,
            })
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn test_config() -> MpcConfig {
        MpcConfig {
            max_solve_time: 1.0,
            ..Default::default()
        }
    }

    fn robot(position: [f64; 2], velocity: [f64; 2]) -> RobotKinematicState {
        RobotKinematicState::new(RobotId(1), position, velocity, 0.0, 2.0, 3.0)
    }

    fn failing() -> Arc<dyn QpBackend> {
        Arc::new(ScriptedBackend {
            status: QpStatus::Failed("NumericalError".to_string()),
            with_iterate: false,
        })
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = MpcConfig {
            dt: 0.0,
            ..Default::default()
        };
        assert!(HorizonOptimizer::new(config).is_err());
        let config = MpcConfig {
            max_accel: -1.0,
            ..Default::default()
        };
        assert!(HorizonOptimizer::new(config).is_err());
    }

    #[test]
    fn test_problem_dimensions() {
        let optimizer = HorizonOptimizer::new(test_config()).unwrap();
        let problem = optimizer.build_problem(&robot([0.0, 0.0], [0.0, 0.0]), Vector2::new(3.0, 0.0), &[]);
        assert_eq!(problem.qp.num_variables(), 30);
        assert_eq!(problem.qp.num_constraints(), 20 + 30);
        assert_eq!(problem.qp.cones.len(), 1 + 10);
        assert!(problem.qp.check_dimensions().is_ok());

        let obstacles = [
            Obstacle::stationary([2.0, 0.0], 0.09),
            Obstacle::stationary([0.0, 2.0], 0.09),
        ];
        let problem = optimizer.build_problem(&robot([0.0, 0.0], [0.0, 0.0]), Vector2::new(3.0, 0.0), &obstacles);
        assert_eq!(problem.half_planes.len(), 10);
        assert_eq!(problem.qp.num_variables(), 40);
        assert!(problem.qp.check_dimensions().is_ok());
    }

    #[test]
    fn test_half_planes_capped_nearest_first() {
        let config = MpcConfig {
            max_obstacle_constraints: 6,
            ..test_config()
        };
        let optimizer = HorizonOptimizer::new(config).unwrap();
        let obstacles = [
            Obstacle::stationary([3.0, 0.0], 0.09),
            Obstacle::stationary([1.0, 0.0], 0.09),
        ];
        let problem = optimizer.build_problem(&robot([0.0, 0.0], [0.0, 0.0]), Vector2::new(0.0, 3.0), &obstacles);
        assert_eq!(problem.half_planes.len(), 6);
        assert!(problem.half_planes[..5].iter().all(|h| h.boundary.x < 1.0));
        assert!(problem.qp.check_dimensions().is_ok());
    }

    #[test]
    fn test_arrival_zeroes_reference_velocity() {
        let optimizer = HorizonOptimizer::new(test_config()).unwrap();
        let problem = optimizer.build_problem(&robot([0.0, 0.0], [0.3, 0.0]), Vector2::new(0.1, 0.0), &[]);
        assert!(problem.arriving);
        assert_relative_eq!(problem.control_weight, 1.0);
        assert!(problem.reference_velocities.iter().all(|v| *v == Vector2::zeros()));
        // Linear velocity terms of the cost vanish with a zero reference
        for k in 1..5 {
            let base = state_index(k);
            assert_eq!(problem.qp.q[base + 2], 0.0);
            assert_eq!(problem.qp.q[base + 3], 0.0);
        }
    }

    #[test]
    fn test_traveling_reference_brakes_toward_goal() {
        let optimizer = HorizonOptimizer::new(test_config()).unwrap();
        let problem = optimizer.build_problem(&robot([0.0, 0.0], [0.0, 0.0]), Vector2::new(0.4, 0.0), &[]);
        assert!(!problem.arriving);
        assert_relative_eq!(problem.control_weight, 0.01);
        let speeds: Vec<f64> = problem.reference_velocities.iter().map(|v| v.x).collect();
        assert!(speeds.iter().all(|&s| s > 0.0 && s <= 2.0));
        assert!(speeds.windows(2).all(|w| w[1] <= w[0]));
        assert_relative_eq!(speeds[0], (2.0 * 3.0 * 0.4_f64).sqrt().min(2.0), epsilon = 1e-12);
    }

    #[test]
    fn test_lookahead_index() {
        let config = test_config();
        assert_eq!(config.lookahead_index(0.1), 1);
        assert_eq!(config.lookahead_index(1.0), 3);
        let short = MpcConfig {
            horizon: 2,
            ..test_config()
        };
        assert_eq!(short.lookahead_index(1.0), 2);
    }

    #[test]
    fn test_solve_keeps_static_obstacle_clear() {
        let mut optimizer = HorizonOptimizer::new(test_config()).unwrap();
        let state = robot([0.0, 0.0], [0.0, 0.0]);
        let obstacles = [Obstacle::stationary([2.0, 0.0], 0.2)];
        let solution = optimizer.solve(&state, Vector2::new(4.0, 0.0), &obstacles).unwrap();
        let safety = optimizer.config().safety_distance(0.0, 0.2);
        for k in 1..=5 {
            let p = solution.trajectory.position_at(k);
            assert!((p - Vector2::new(2.0, 0.0)).norm() >= safety - 1e-3);
            assert!(solution.trajectory.velocity_at(k).norm() <= 2.0 + 1e-4);
        }
        for u in &solution.trajectory.controls {
            assert!(u.norm() <= 3.0 + 1e-4);
        }
        assert!(optimizer.warm_start().is_some());
    }

    #[test]
    fn test_solve_respects_half_plane_when_moving() {
        let mut optimizer = HorizonOptimizer::new(test_config()).unwrap();
        let state = robot([1.2, 0.0], [1.0, 0.0]);
        let obstacles = [Obstacle::stationary([2.0, 0.0], 0.2)];
        let solution = optimizer.solve(&state, Vector2::new(4.0, 0.0), &obstacles).unwrap();
        let limit = 2.0 - optimizer.config().safety_distance(1.0, 0.2);
        for k in 1..=5 {
            assert!(solution.trajectory.position_at(k).x <= limit + 1e-3);
        }
    }

    #[test]
    fn test_plan_moves_toward_goal() {
        let mut optimizer = HorizonOptimizer::new(test_config()).unwrap();
        let state = robot([0.0, 0.0], [0.0, 0.0]);
        let planned = optimizer.plan(&state, Vector2::new(3.0, 0.0), &[]).unwrap();
        assert!(planned.velocity.x > 0.0);
        assert!(planned.velocity.norm() <= 2.0 + 1e-4);
        assert_eq!(optimizer.stats().ticks, 1);
    }

    #[test]
    fn test_failure_without_cache_has_no_best_effort() {
        let mut optimizer = HorizonOptimizer::with_backend(test_config(), failing()).unwrap();
        let failed = optimizer
            .solve(&robot([0.0, 0.0], [0.0, 0.0]), Vector2::new(1.0, 0.0), &[])
            .unwrap_err();
        assert!(matches!(failed.failure, SolverFailure::Infeasible { .. }));
        assert!(failed.best_effort.is_none());
    }

    #[test]
    fn test_failure_falls_back_to_shifted_cache() {
        let mut optimizer = HorizonOptimizer::new(test_config()).unwrap();
        let state = robot([0.0, 0.0], [0.0, 0.0]);
        optimizer.solve(&state, Vector2::new(1.0, 0.0), &[]).unwrap();
        let cached = optimizer.warm_start().cloned().unwrap();

        optimizer.set_backend(failing());
        let failed = optimizer.solve(&state, Vector2::new(1.0, 0.0), &[]).unwrap_err();
        let best_effort = failed.best_effort.unwrap();
        assert_eq!(best_effort, cached.shifted());
        assert_eq!(optimizer.warm_start(), Some(&cached));
    }

    #[test]
    fn test_timeout_returns_last_iterate() {
        let backend = Arc::new(ScriptedBackend {
            status: QpStatus::MaxTime,
            with_iterate: true,
        });
        let mut optimizer = HorizonOptimizer::with_backend(test_config(), backend).unwrap();
        let failed = optimizer
            .solve(&robot([0.0, 0.0], [0.0, 0.0]), Vector2::new(1.0, 0.0), &[])
            .unwrap_err();
        assert!(matches!(failed.failure, SolverFailure::Timeout { .. }));
        assert_eq!(failed.best_effort.map(|t| t.horizon()), Some(5));
        assert!(optimizer.warm_start().is_none());
    }

    #[test]
    fn test_stale_warm_start_discarded_after_reconfigure() {
        let mut optimizer = HorizonOptimizer::new(test_config()).unwrap();
        let state = robot([0.0, 0.0], [0.0, 0.0]);
        optimizer.solve(&state, Vector2::new(1.0, 0.0), &[]).unwrap();

        let longer = MpcConfig {
            horizon: 8,
            ..test_config()
        };
        optimizer.reconfigure(longer).unwrap();
        assert_eq!(optimizer.warm_start().map(|t| t.horizon()), Some(5));

        optimizer.set_backend(failing());
        let failed = optimizer.solve(&state, Vector2::new(1.0, 0.0), &[]).unwrap_err();
        assert!(failed.best_effort.is_none());
        assert!(optimizer.warm_start().is_none());

        optimizer.set_backend(Arc::new(ClarabelBackend));
        optimizer.solve(&state, Vector2::new(1.0, 0.0), &[]).unwrap();
        assert_eq!(optimizer.warm_start().map(|t| t.horizon()), Some(8));
    }

    #[test]
    fn test_reset_clears_warm_start() {
        let mut optimizer = HorizonOptimizer::new(test_config()).unwrap();
        optimizer
            .plan(&robot([0.0, 0.0], [0.0, 0.0]), Vector2::new(1.0, 0.0), &[])
            .unwrap();
        assert!(optimizer.warm_start().is_some());
        optimizer.reset();
        assert!(optimizer.warm_start().is_none());
    }

    #[test]
    fn test_empty_trajectory_reads_zero() {
        let empty = HorizonTrajectory {
            states: Vec::new(),
            controls: Vec::new(),
        };
        assert_eq!(empty.position_at(0), Vector2::zeros());
        assert_eq!(empty.velocity_at(3), Vector2::zeros());
        assert_eq!(empty.shifted().horizon(), 0);

        let short = HorizonTrajectory {
            states: vec![Vector4::new(1.0, 2.0, 3.0, 4.0)],
            controls: Vec::new(),
        };
        assert_eq!(short.velocity_at(5), Vector2::new(3.0, 4.0));
    }

    #[test]
    fn test_shifted_trajectory_keeps_length() {
        let trajectory = HorizonTrajectory {
            states: (0..4).map(|i| Vector4::repeat(i as f64)).collect(),
            controls: (0..3).map(|i| Vector2::repeat(i as f64)).collect(),
        };
        let shifted = trajectory.shifted();
        assert_eq!(shifted.states.len(), 4);
        assert_eq!(shifted.horizon(), 3);
        assert_eq!(shifted.states[0], Vector4::repeat(1.0));
        assert_eq!(shifted.states[3], Vector4::repeat(3.0));
        assert_eq!(shifted.controls[2], Vector2::repeat(2.0));
    }
}
