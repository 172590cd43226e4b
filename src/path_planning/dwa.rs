//! Dynamic Window Approach local planner
//!
//! Samples velocities reachable within one control tick, projects each over a
//! short simulation horizon, wraps the resulting motion in a velocity-oriented
//! safety envelope and scores it against goal progress, speed and obstacle
//! proximity. The first pass only looks along the bearing to the target; a
//! second pass spreads candidates around the full circle when the best
//! bearing candidate collides.

use std::time::Instant;

use itertools::iproduct;
use nalgebra::Vector2;
use ordered_float::OrderedFloat;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::common::{
    LocalPlanner, Obstacle, PlanFailure, PlannedVelocity, PlannerStats, PlanningError,
    PlanningResult, RobotKinematicState,
};
use crate::geometry::{point_segment_distance, EnvelopeConfig, OrientedRectangle, SafetyEnvelope};

/// Penalty multiplier for an intersecting envelope pair
const INTERSECTION_PENALTY: f64 = 10.0;
/// Decay rate of the near-miss penalty [1/m]
const NEAR_MISS_DECAY: f64 = 4.0;
/// Arrival short-circuit radius, in robot radii
const ARRIVAL_RADII: f64 = 1.5;

/// Configuration for the Dynamic Window planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DwaConfig {
    /// Control tick period [s]
    pub control_period: f64,
    /// Ticks simulated per candidate
    pub simulate_frames: u32,
    /// Acceleration bounding the dynamic window [m/s^2]
    pub max_acceleration: f64,
    pub weight_goal: f64,
    pub weight_obstacle: f64,
    pub weight_speed: f64,
    /// Physical robot radius [m]
    pub robot_radius: f64,
    pub side_clearance: f64,
    pub back_clearance: f64,
    pub base_front_clearance: f64,
    /// Seconds of travel added to the front clearance [s]
    pub forward_lookahead_time: f64,
    /// Segment-to-target distance below which the waypoint snaps to the target [m]
    pub overshoot_tolerance: f64,
    /// Distance at which the robot is considered arrived [m]
    pub target_tolerance: f64,
    /// Direction bins around the full circle
    pub n_directions: usize,
    /// Scale factors tried per direction
    pub n_scales: usize,
    /// Lower bound of the scale factors (exclusive)
    pub min_scale: f64,
    /// Distance to target below which the largest scale shrinks [m]
    pub scale_slowdown_distance: f64,
    /// Envelope clearance below which a near-miss penalty applies [m]
    pub near_miss_distance: f64,
    /// Standard deviation of the per-bin angle jitter [rad]
    pub angle_jitter_std: f64,
    /// Seed of the jitter random source
    pub seed: u64,
}

impl Default for DwaConfig {
    fn default() -> Self {
        Self {
            control_period: 1.0 / 60.0,
            simulate_frames: 3,
            max_acceleration: 3.0,
            weight_goal: 5.0,
            weight_obstacle: 1.0,
            weight_speed: 0.1,
            robot_radius: 0.09,
            side_clearance: 0.05,
            back_clearance: 0.05,
            base_front_clearance: 0.1,
            forward_lookahead_time: 0.5,
            overshoot_tolerance: 0.01,
            target_tolerance: 0.01,
            n_directions: 16,
            n_scales: 4,
            min_scale: 0.05,
            scale_slowdown_distance: 1.0,
            near_miss_distance: 0.5,
            angle_jitter_std: 0.05,
            seed: 0,
        }
    }
}

impl DwaConfig {
    /// Horizon each candidate is projected over [s]
    pub fn simulate_timestep(&self) -> f64 {
        self.simulate_frames as f64 * self.control_period
    }

    pub fn envelope_config(&self) -> EnvelopeConfig {
        EnvelopeConfig {
            robot_radius: self.robot_radius,
            side_clearance: self.side_clearance,
            back_clearance: self.back_clearance,
            base_front_clearance: self.base_front_clearance,
            forward_lookahead_time: self.forward_lookahead_time,
        }
    }

    pub fn validate(&self) -> PlanningResult<()> {
        let invalid = |msg: String| Err(PlanningError::InvalidConfig(msg));
        if !(self.control_period.is_finite() && self.control_period > 0.0) {
            return invalid(format!("dwa control_period must be positive, got {}", self.control_period));
        }
        if self.simulate_frames == 0 {
            return invalid("dwa simulate_frames must be at least 1".to_string());
        }
        let non_negative = [
            ("max_acceleration", self.max_acceleration),
            ("weight_goal", self.weight_goal),
            ("weight_obstacle", self.weight_obstacle),
            ("weight_speed", self.weight_speed),
            ("overshoot_tolerance", self.overshoot_tolerance),
            ("target_tolerance", self.target_tolerance),
            ("near_miss_distance", self.near_miss_distance),
            ("angle_jitter_std", self.angle_jitter_std),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return invalid(format!("dwa {} must be non-negative, got {}", name, value));
            }
        }
        if self.n_directions < 2 || self.n_scales == 0 {
            return invalid(format!(
                "dwa needs at least 2 directions and 1 scale, got {} and {}",
                self.n_directions, self.n_scales
            ));
        }
        if !(self.min_scale > 0.0 && self.min_scale < 1.0) {
            return invalid(format!("dwa min_scale must lie in (0, 1), got {}", self.min_scale));
        }
        if !(self.scale_slowdown_distance.is_finite() && self.scale_slowdown_distance > 0.0) {
            return invalid(format!(
                "dwa scale_slowdown_distance must be positive, got {}",
                self.scale_slowdown_distance
            ));
        }
        self.envelope_config().validate()
    }
}

/// A scored candidate motion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub start: Vector2<f64>,
    pub end: Vector2<f64>,
    /// Velocity held over the simulation horizon
    pub velocity: Vector2<f64>,
    pub envelope: OrientedRectangle,
    pub score: f64,
    /// Whether the envelope overlaps any obstacle envelope
    pub collides: bool,
}

impl Candidate {
    /// Collision-free candidates always outrank colliding ones; ties keep the incumbent
    fn beats(&self, incumbent: &Candidate) -> bool {
        match (self.collides, incumbent.collides) {
            (false, true) => true,
            (true, false) => false,
            _ => self.score > incumbent.score,
        }
    }
}

/// Waypoint chosen for one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    pub position: Vector2<f64>,
    pub score: f64,
    pub candidate: Candidate,
}

/// Dynamic Window planner for one robot
///
/// Scoring has no braking term. A robot arriving at speed overshoots and
/// swings back until the arrival short-circuit takes over, which then asks for
/// the whole remaining offset within one simulation horizon. In closed loop a
/// fast approach can take several seconds to settle; the acceleration limiter
/// bounds the resulting commands but does not remove the overshoot.
pub struct DynamicWindowPlanner {
    config: DwaConfig,
    envelope: SafetyEnvelope,
    jitter: Option<Normal<f64>>,
    rng: ChaCha8Rng,
    stats: PlannerStats,
}

impl DynamicWindowPlanner {
    pub fn new(config: DwaConfig) -> PlanningResult<Self> {
        config.validate()?;
        let envelope = SafetyEnvelope::new(config.envelope_config())?;
        let jitter = if config.angle_jitter_std > 0.0 {
            Some(
                Normal::new(0.0, config.angle_jitter_std)
                    .map_err(|e| PlanningError::InvalidConfig(format!("dwa angle jitter: {}", e)))?,
            )
        } else {
            None
        };
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            envelope,
            jitter,
            rng,
            stats: PlannerStats::default(),
        })
    }

    pub fn with_defaults() -> PlanningResult<Self> {
        Self::new(DwaConfig::default())
    }

    pub fn config(&self) -> &DwaConfig {
        &self.config
    }

    pub fn envelope(&self) -> &SafetyEnvelope {
        &self.envelope
    }

    /// Best waypoint toward `target`, or `None` when no candidate is scorable
    pub fn plan_waypoint(
        &mut self,
        state: &RobotKinematicState,
        target: Vector2<f64>,
        obstacles: &[Obstacle],
    ) -> Option<Waypoint> {
        let start = state.position;
        let to_target = target - start;
        let distance = to_target.norm();
        let sim_dt = self.config.simulate_timestep();

        if distance < ARRIVAL_RADII * self.config.robot_radius {
            let velocity = to_target / sim_dt;
            let candidate = Candidate {
                start,
                end: target,
                velocity,
                envelope: self.envelope.envelope_for(target, velocity),
                score: f64::INFINITY,
                collides: false,
            };
            return Some(Waypoint {
                position: target,
                score: f64::INFINITY,
                candidate,
            });
        }

        let obstacle_envelopes: Vec<OrientedRectangle> = obstacles
            .iter()
            .map(|o| {
                self.envelope
                    .envelope_for_radius(o.predicted_position(sim_dt), o.velocity, o.radius)
            })
            .collect();

        let window = self.config.control_period * self.config.max_acceleration;
        let scales = self.candidate_scales(distance);
        let bearing = to_target.y.atan2(to_target.x);

        let mut best: Option<Candidate> = None;
        let mut evaluated = 0u64;

        for &scale in &scales {
            let direction = Vector2::new(bearing.cos(), bearing.sin());
            let candidate = self.evaluate(state, target, direction * (window * scale), &obstacle_envelopes);
            evaluated += 1;
            Self::keep_best(&mut best, candidate);
        }

        if best.map_or(true, |b| b.collides) {
            let directions = self.full_circle_directions(bearing, state.velocity);
            debug!(
                robot = %state.id,
                directions = directions.len(),
                "bearing candidates collide, searching full circle"
            );
            for (&scale, direction) in iproduct!(scales.iter(), directions.iter()) {
                let candidate = self.evaluate(state, target, direction * (window * scale), &obstacle_envelopes);
                evaluated += 1;
                Self::keep_best(&mut best, candidate);
            }
        }

        self.stats.evaluations += evaluated;
        trace!(robot = %state.id, evaluated, "dwa candidates scored");

        let best = best?;
        let position = if self.overshoots(&best.start, &best.end, &target) {
            target
        } else {
            best.end
        };
        Some(Waypoint {
            position,
            score: best.score,
            candidate: best,
        })
    }

    fn keep_best(best: &mut Option<Candidate>, candidate: Candidate) {
        // Anything that fails to beat the -inf sentinel (including NaN) is dropped
        if !(candidate.score > f64::NEG_INFINITY) {
            return;
        }
        let replace = match best.as_ref() {
            Some(incumbent) => candidate.beats(incumbent),
            None => true,
        };
        if replace {
            *best = Some(candidate);
        }
    }

    /// Scale factors from the largest allowed down to just above `min_scale`
    fn candidate_scales(&self, distance: f64) -> Vec<f64> {
        let min_scale = self.config.min_scale;
        let max_scale = (distance / self.config.scale_slowdown_distance).clamp(min_scale, 1.0);
        let n = self.config.n_scales;
        (0..n)
            .map(|i| max_scale - (max_scale - min_scale) * i as f64 / n as f64)
            .collect()
    }

    /// Unit directions for the full-circle pass, nearest bins to the bearing first
    fn full_circle_directions(&mut self, bearing: f64, velocity: Vector2<f64>) -> Vec<Vector2<f64>> {
        let n = self.config.n_directions;
        let step = std::f64::consts::TAU / n as f64;
        let half_bin = step / 2.0;

        let mut directions = Vec::with_capacity(n);
        for offset in bin_offsets(n) {
            let jitter = match &self.jitter {
                Some(normal) => normal.sample(&mut self.rng).clamp(-half_bin, half_bin),
                None => 0.0,
            };
            let angle = bearing + offset as f64 * step + jitter;
            directions.push(Vector2::new(angle.cos(), angle.sin()));
        }

        let speed = velocity.norm();
        if speed > 1e-6 {
            directions.push(-velocity / speed);
        }
        directions
    }

    fn evaluate(
        &self,
        state: &RobotKinematicState,
        target: Vector2<f64>,
        delta_velocity: Vector2<f64>,
        obstacle_envelopes: &[OrientedRectangle],
    ) -> Candidate {
        let start = state.position;
        let mut velocity = state.velocity + delta_velocity;
        let speed = velocity.norm();
        if speed > state.max_velocity {
            velocity *= state.max_velocity.max(0.0) / speed;
        }
        let end = start + velocity * self.config.simulate_timestep();
        let envelope = self.envelope.envelope_for(end, velocity);

        let mut collides = false;
        let penalty = obstacle_envelopes
            .iter()
            .map(|other| {
                if envelope.intersects(other) {
                    collides = true;
                    OrderedFloat(INTERSECTION_PENALTY * envelope.intersection_ratio(other).powi(2))
                } else {
                    let clearance = envelope.distance_to(other);
                    if clearance < self.config.near_miss_distance {
                        OrderedFloat((-NEAR_MISS_DECAY * clearance).exp())
                    } else {
                        OrderedFloat(0.0)
                    }
                }
            })
            .max()
            .map_or(0.0, OrderedFloat::into_inner);

        let progress = (target - start).norm() - (target - end).norm();
        let score = self.config.weight_goal * progress + self.config.weight_speed * velocity.norm()
            - self.config.weight_obstacle * penalty;

        Candidate {
            start,
            end,
            velocity,
            envelope,
            score,
            collides,
        }
    }

    /// Whether the segment passes the target closely enough to stop on it
    fn overshoots(&self, start: &Vector2<f64>, end: &Vector2<f64>, target: &Vector2<f64>) -> bool {
        let segment = end - start;
        let len_sq = segment.norm_squared();
        if len_sq <= 1e-9 {
            return false;
        }
        if point_segment_distance(target, start, end) <= self.config.overshoot_tolerance {
            return true;
        }
        let to_target = target - start;
        let projection = to_target.dot(&segment);
        if projection <= 0.0 || projection > len_sq {
            return false;
        }
        let lateral = (segment.x * to_target.y - segment.y * to_target.x).abs() / len_sq.sqrt();
        lateral <= self.config.robot_radius
    }
}

/// Bin offsets around the bearing in the order +1, -1, +2, -2, ...
fn bin_offsets(n_directions: usize) -> Vec<i64> {
    let n = n_directions as i64;
    let mut offsets = Vec::with_capacity(n_directions.saturating_sub(1));
    for k in 1..=n / 2 {
        offsets.push(k);
        if n - k != k {
            offsets.push(-k);
        }
    }
    offsets
}

impl LocalPlanner for DynamicWindowPlanner {
    fn plan(
        &mut self,
        state: &RobotKinematicState,
        target: Vector2<f64>,
        obstacles: &[Obstacle],
    ) -> Result<PlannedVelocity, PlanFailure> {
        let started = Instant::now();
        self.stats.ticks += 1;

        if state.distance_to(&target) <= self.config.target_tolerance {
            return Ok(PlannedVelocity {
                velocity: Vector2::zeros(),
                solve_time_s: started.elapsed().as_secs_f64(),
            });
        }

        match self.plan_waypoint(state, target, obstacles) {
            Some(waypoint) => Ok(PlannedVelocity {
                velocity: (waypoint.position - state.position) / self.config.simulate_timestep(),
                solve_time_s: started.elapsed().as_secs_f64(),
            }),
            None => {
                self.stats.failures += 1;
                Err(PlanFailure::new(
                    PlanningError::NoViableCandidate,
                    started.elapsed().as_secs_f64(),
                ))
            }
        }
    }

    fn reset(&mut self) {
        self.rng = ChaCha8Rng::seed_from_u64(self.config.seed);
    }

    fn name(&self) -> &'static str {
        "dwa"
    }

    fn stats(&self) -> PlannerStats {
        self.stats
    }
}
