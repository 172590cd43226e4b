//! Motion planning facade
//!
//! Owns one local planner per robot plus the shared acceleration limiter.
//! Every tick yields a finite, speed-capped and rate-limited
//! [`VelocityCommand`]; planner failures are absorbed here and only surface
//! through [`PlanDiagnostics`].

use std::sync::Arc;

use nalgebra::Vector2;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::common::{
    LocalPlanner, Obstacle, PlanDiagnostics, PlanFailure, PlannedVelocity, PlanningError, PlanningResult,
    RobotId, RobotKinematicState, RobotSlots, VelocityCommand,
};
use crate::control::{AccelerationLimiter, ClarabelBackend, HorizonOptimizer, QpBackend};
use crate::motion_planning::{cap_speed, MotionPlanningConfig, PlannerKind};
use crate::path_planning::DynamicWindowPlanner;

type PlanOutcome = Result<PlannedVelocity, PlanFailure>;

/// One robot's inputs for a batched tick
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub state: RobotKinematicState,
    pub target: Vector2<f64>,
    pub obstacles: Vec<Obstacle>,
    /// Overrides the configured fallback policy for this tick
    pub fallback: Option<Vector2<f64>>,
}

impl PlanRequest {
    pub fn new(state: RobotKinematicState, target: impl Into<Vector2<f64>>, obstacles: Vec<Obstacle>) -> Self {
        Self {
            state,
            target: target.into(),
            obstacles,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, velocity: impl Into<Vector2<f64>>) -> Self {
        self.fallback = Some(velocity.into());
        self
    }
}

pub struct MotionPlanningFacade {
    config: MotionPlanningConfig,
    backend: Arc<dyn QpBackend>,
    planners: RobotSlots<Box<dyn LocalPlanner>>,
    limiter: AccelerationLimiter<Vector2<f64>>,
}

impl MotionPlanningFacade {
    pub fn new(config: MotionPlanningConfig) -> PlanningResult<Self> {
        Self::with_backend(config, Arc::new(ClarabelBackend))
    }

    /// Build with a custom QP backend for the MPC planners
    pub fn with_backend(config: MotionPlanningConfig, backend: Arc<dyn QpBackend>) -> PlanningResult<Self> {
        config.validate()?;
        let limiter = AccelerationLimiter::from_config(config.limiter)?;
        info!(
            planner = ?config.planner,
            backend = backend.name(),
            fallback = ?config.fallback,
            "motion planning facade ready"
        );
        Ok(Self {
            config,
            backend,
            planners: RobotSlots::new(),
            limiter,
        })
    }

    pub fn with_defaults() -> PlanningResult<Self> {
        Self::new(MotionPlanningConfig::default())
    }

    pub fn config(&self) -> &MotionPlanningConfig {
        &self.config
    }

    /// Number of robots with a live planner
    pub fn planner_count(&self) -> usize {
        self.planners.len()
    }

    pub fn planner(&self, robot_id: RobotId) -> Option<&dyn LocalPlanner> {
        self.planners.get(robot_id).map(|planner| planner.as_ref())
    }

    /// Install a planner for one robot in place of the configured kind
    pub fn insert_planner(&mut self, robot_id: RobotId, planner: Box<dyn LocalPlanner>) {
        self.planners.insert(robot_id, planner);
    }

    pub fn plan(
        &mut self,
        robot_id: RobotId,
        state: &RobotKinematicState,
        target: Vector2<f64>,
        obstacles: &[Obstacle],
    ) -> VelocityCommand {
        self.plan_with_fallback(robot_id, state, target, obstacles, None)
    }

    /// Like [`plan`](Self::plan), substituting `fallback` when planning fails
    pub fn plan_with_fallback(
        &mut self,
        robot_id: RobotId,
        state: &RobotKinematicState,
        target: Vector2<f64>,
        obstacles: &[Obstacle],
        fallback: Option<Vector2<f64>>,
    ) -> VelocityCommand {
        let outcome = match self.ensure_planner(robot_id) {
            Ok(planner) => planner.plan(state, target, obstacles),
            Err(error) => Err(PlanFailure::new(error, 0.0)),
        };
        self.finish(robot_id, state, target, outcome, fallback)
    }

    /// Plan a batch of robots, distinct robots in parallel
    ///
    /// Requests for the same robot run in request order on one task. The
    /// limiter is applied afterwards in request order, so the result matches
    /// calling [`plan_with_fallback`](Self::plan_with_fallback) per request.
    pub fn plan_all(&mut self, requests: &[PlanRequest]) -> Vec<VelocityCommand> {
        let mut outcomes: Vec<Option<PlanOutcome>> = (0..requests.len()).map(|_| None).collect();
        let mut by_robot: Vec<Vec<usize>> = Vec::new();

        for (i, request) in requests.iter().enumerate() {
            let id = request.state.id;
            if let Err(error) = self.ensure_planner(id) {
                outcomes[i] = Some(Err(PlanFailure::new(error, 0.0)));
                continue;
            }
            if by_robot.len() <= id.index() {
                by_robot.resize_with(id.index() + 1, Vec::new);
            }
            by_robot[id.index()].push(i);
        }

        let slots = self.planners.entries_mut();
        by_robot.resize_with(slots.len(), Vec::new);
        let planned: Vec<(usize, PlanOutcome)> = slots
            .par_iter_mut()
            .zip(by_robot.par_iter())
            .filter(|(_, indices)| !indices.is_empty())
            .flat_map_iter(|(slot, indices)| {
                let mut results = Vec::with_capacity(indices.len());
                if let Some(planner) = slot.as_mut() {
                    for &i in indices {
                        let request = &requests[i];
                        results.push((i, planner.plan(&request.state, request.target, &request.obstacles)));
                    }
                }
                results
            })
            .collect();
        for (i, outcome) in planned {
            outcomes[i] = Some(outcome);
        }

        requests
            .iter()
            .zip(outcomes)
            .map(|(request, outcome)| {
                let outcome = outcome
                    .unwrap_or_else(|| Err(PlanFailure::new(PlanningError::NoViableCandidate, 0.0)));
                self.finish(request.state.id, &request.state, request.target, outcome, request.fallback)
            })
            .collect()
    }

    /// Forget planner and limiter state so the robot behaves like a new one
    pub fn reset(&mut self, robot_id: RobotId) {
        if let Some(planner) = self.planners.get_mut(robot_id) {
            planner.reset();
        }
        self.limiter.reset(robot_id);
        info!(robot = %robot_id, "reset planner state");
    }

    /// Drop the robot's planner entirely
    pub fn remove(&mut self, robot_id: RobotId) {
        self.planners.remove(robot_id);
        self.limiter.reset(robot_id);
        debug!(robot = %robot_id, "removed planner");
    }

    /// Swap in a new configuration
    ///
    /// Planners are rebuilt lazily on their next tick. Limiter history is kept
    /// so commands stay continuous across the swap.
    pub fn reconfigure(&mut self, config: MotionPlanningConfig) -> PlanningResult<()> {
        config.validate()?;
        self.limiter.set_config(config.limiter)?;
        if config.planner != self.config.planner || config.dwa != self.config.dwa || config.mpc != self.config.mpc {
            self.planners.clear();
        }
        info!(planner = ?config.planner, "reconfigured motion planning");
        self.config = config;
        Ok(())
    }

    fn ensure_planner(&mut self, robot_id: RobotId) -> PlanningResult<&mut Box<dyn LocalPlanner>> {
        if !self.planners.contains(robot_id) {
            let planner = self.build_planner()?;
            debug!(robot = %robot_id, planner = planner.name(), "created planner");
            self.planners.insert(robot_id, planner);
        }
        self.planners
            .get_mut(robot_id)
            .ok_or_else(|| PlanningError::InvalidConfig(format!("no planner slot for {}", robot_id)))
    }

    fn build_planner(&self) -> PlanningResult<Box<dyn LocalPlanner>> {
        Ok(match self.config.planner {
            PlannerKind::Dwa => Box::new(DynamicWindowPlanner::new(self.config.dwa.clone())?),
            PlannerKind::Mpc => Box::new(HorizonOptimizer::with_backend(
                self.config.mpc.clone(),
                Arc::clone(&self.backend),
            )?),
        })
    }

    /// Turn a planner outcome into the command sent to the robot
    fn finish(
        &mut self,
        robot_id: RobotId,
        state: &RobotKinematicState,
        target: Vector2<f64>,
        outcome: PlanOutcome,
        fallback: Option<Vector2<f64>>,
    ) -> VelocityCommand {
        let (requested, diagnostics) = self.resolve(robot_id, state, target, outcome, fallback);
        let capped = cap_speed(requested, state.max_velocity);
        let limited = self.limiter.limit(robot_id, capped);
        debug!(
            robot = %robot_id,
            vx = limited.x,
            vy = limited.y,
            success = diagnostics.success,
            fallback = diagnostics.fallback_used,
            "planned command"
        );
        VelocityCommand::new(limited, diagnostics)
    }

    fn resolve(
        &self,
        robot_id: RobotId,
        state: &RobotKinematicState,
        target: Vector2<f64>,
        outcome: PlanOutcome,
        fallback: Option<Vector2<f64>>,
    ) -> (Vector2<f64>, PlanDiagnostics) {
        let failure = match outcome {
            Ok(planned) if is_finite(&planned.velocity) => {
                let diagnostics = PlanDiagnostics {
                    success: true,
                    solve_time_s: planned.solve_time_s,
                    fallback_used: false,
                };
                return (planned.velocity, diagnostics);
            }
            Ok(planned) => PlanFailure::new(PlanningError::NoViableCandidate, planned.solve_time_s),
            Err(failure) => failure,
        };

        let best_effort = failure
            .best_effort
            .filter(|v| self.config.use_best_effort && is_finite(v));
        let velocity = best_effort
            .or_else(|| fallback.filter(is_finite))
            .unwrap_or_else(|| self.config.fallback.velocity(state, target));
        let velocity = if is_finite(&velocity) { velocity } else { Vector2::zeros() };
        warn!(
            robot = %robot_id,
            error = %failure.error,
            best_effort = best_effort.is_some(),
            "planning failed, using fallback"
        );
        let diagnostics = PlanDiagnostics {
            success: false,
            solve_time_s: failure.solve_time_s,
            fallback_used: true,
        };
        (velocity, diagnostics)
    }
}

fn is_finite(v: &Vector2<f64>) -> bool {
    v.x.is_finite() && v.y.is_finite()
}
