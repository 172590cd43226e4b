//! Velocity-oriented safety envelopes
//!
//! A moving body is wrapped in a rectangle aligned with its velocity. The
//! rectangle reaches further ahead the faster the body moves, while the side
//! and back clearances stay fixed. Pairwise overlap is decided with the
//! Separating Axis Theorem.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::common::{PlanningError, PlanningResult};

/// Below this speed the heading falls back to 0 rad
const MIN_HEADING_SPEED: f64 = 0.01;

/// Exponent shaping overlap severity: mild for grazing contact, severe near full overlap
const OVERLAP_SEVERITY_EXPONENT: f64 = 1.5;

/// Rectangle with arbitrary orientation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedRectangle {
    pub center: Vector2<f64>,
    /// Half extent along `heading`
    pub half_length: f64,
    /// Half extent across `heading`
    pub half_width: f64,
    /// Orientation of the long axis [rad]
    pub heading: f64,
}

impl OrientedRectangle {
    pub fn new(center: Vector2<f64>, half_length: f64, half_width: f64, heading: f64) -> Self {
        Self {
            center,
            half_length: half_length.max(0.0),
            half_width: half_width.max(0.0),
            heading,
        }
    }

    /// Unit vectors along and across the heading
    pub fn axes(&self) -> [Vector2<f64>; 2] {
        let (sin, cos) = self.heading.sin_cos();
        [Vector2::new(cos, sin), Vector2::new(-sin, cos)]
    }

    /// Corners in counter-clockwise order starting front-left
    pub fn corners(&self) -> [Vector2<f64>; 4] {
        let [along, across] = self.axes();
        let l = along * self.half_length;
        let w = across * self.half_width;
        [
            self.center + l + w,
            self.center - l + w,
            self.center - l - w,
            self.center + l - w,
        ]
    }

    /// Half the extent of the rectangle projected on unit `axis`
    fn projected_radius(&self, axis: &Vector2<f64>) -> f64 {
        let [along, across] = self.axes();
        self.half_length * along.dot(axis).abs() + self.half_width * across.dot(axis).abs()
    }

    /// Exact SAT overlap test; touching edges count as overlapping
    pub fn intersects(&self, other: &OrientedRectangle) -> bool {
        let offset = other.center - self.center;
        let [a0, a1] = self.axes();
        let [b0, b1] = other.axes();
        [a0, a1, b0, b1].iter().all(|axis| {
            offset.dot(axis).abs() <= self.projected_radius(axis) + other.projected_radius(axis)
        })
    }

    /// Overlap severity in [0, 1]: 0 when apart, approaching 1 as centers coincide
    pub fn intersection_ratio(&self, other: &OrientedRectangle) -> f64 {
        if !self.intersects(other) {
            return 0.0;
        }
        let max_separation = (self.half_length + other.half_length)
            .hypot(self.half_width + other.half_width);
        if max_separation <= f64::EPSILON {
            return 1.0;
        }
        let center_distance = (other.center - self.center).norm();
        let closeness = 1.0 - (center_distance / max_separation).min(1.0);
        closeness.powf(OVERLAP_SEVERITY_EXPONENT)
    }

    /// Approximate clearance between two rectangles
    ///
    /// Zero when they intersect; otherwise the center distance minus half the
    /// summed half-lengths, clamped at zero. This is a cheap heuristic, not
    /// the true minimum distance between the shapes.
    pub fn distance_to(&self, other: &OrientedRectangle) -> f64 {
        if self.intersects(other) {
            return 0.0;
        }
        let center_distance = (other.center - self.center).norm();
        (center_distance - (self.half_length + other.half_length) / 2.0).max(0.0)
    }
}

/// Clearances used to build safety envelopes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Physical robot radius [m]
    pub robot_radius: f64,
    /// Clearance on each side [m]
    pub side_clearance: f64,
    /// Clearance behind the body [m]
    pub back_clearance: f64,
    /// Clearance ahead of the body at rest [m]
    pub base_front_clearance: f64,
    /// Seconds of travel added to the front clearance [s]
    pub forward_lookahead_time: f64,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            robot_radius: 0.09,
            side_clearance: 0.05,
            back_clearance: 0.05,
            base_front_clearance: 0.1,
            forward_lookahead_time: 0.5,
        }
    }
}

impl EnvelopeConfig {
    pub fn validate(&self) -> PlanningResult<()> {
        let fields = [
            ("robot_radius", self.robot_radius),
            ("side_clearance", self.side_clearance),
            ("back_clearance", self.back_clearance),
            ("base_front_clearance", self.base_front_clearance),
            ("forward_lookahead_time", self.forward_lookahead_time),
        ];
        for (name, value) in fields {
            if !(value.is_finite() && value >= 0.0) {
                return Err(PlanningError::InvalidConfig(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Builds velocity-oriented envelopes from position/velocity pairs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyEnvelope {
    config: EnvelopeConfig,
}

impl SafetyEnvelope {
    pub fn new(config: EnvelopeConfig) -> PlanningResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }

    /// Envelope of the planning robot
    pub fn envelope_for(&self, position: Vector2<f64>, velocity: Vector2<f64>) -> OrientedRectangle {
        self.envelope_for_radius(position, velocity, self.config.robot_radius)
    }

    /// Envelope of a body of arbitrary `radius`, e.g. an obstacle
    pub fn envelope_for_radius(
        &self,
        position: Vector2<f64>,
        velocity: Vector2<f64>,
        radius: f64,
    ) -> OrientedRectangle {
        let speed = velocity.norm();
        let heading = if speed > MIN_HEADING_SPEED {
            velocity.y.atan2(velocity.x)
        } else {
            0.0
        };
        let c = &self.config;
        let front_extent = c.base_front_clearance + speed * c.forward_lookahead_time;
        let length = c.back_clearance + radius + front_extent;
        let width = 2.0 * radius + 2.0 * c.side_clearance;

        let forward = Vector2::new(heading.cos(), heading.sin());
        let center = position + forward * ((front_extent - c.back_clearance) / 2.0);
        OrientedRectangle::new(center, length / 2.0, width / 2.0, heading)
    }
}

impl Default for SafetyEnvelope {
    fn default() -> Self {
        Self {
            config: EnvelopeConfig::default(),
        }
    }
}

/// Minimum distance from `point` to the segment `start`-`end`
pub fn point_segment_distance(point: &Vector2<f64>, start: &Vector2<f64>, end: &Vector2<f64>) -> f64 {
    let segment = end - start;
    let len_sq = segment.norm_squared();
    if len_sq < 1e-9 {
        return (point - start).norm();
    }
    let t = ((point - start).dot(&segment) / len_sq).clamp(0.0, 1.0);
    (point - (start + segment * t)).norm()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use std::f64::consts::PI;

    fn random_rectangle(rng: &mut ChaCha8Rng) -> OrientedRectangle {
        OrientedRectangle::new(
            Vector2::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)),
            rng.gen_range(0.0..0.6),
            rng.gen_range(0.0..0.4),
            rng.gen_range(-PI..PI),
        )
    }

    #[test]
    fn test_stationary_envelope_shape() {
        let envelope = SafetyEnvelope::default();
        let rect = envelope.envelope_for(Vector2::new(1.0, 2.0), Vector2::zeros());
        // length = back + r + base_front = 0.05 + 0.09 + 0.1
        assert_relative_eq!(rect.half_length, 0.12, epsilon = 1e-12);
        assert_relative_eq!(rect.half_width, 0.14, epsilon = 1e-12);
        assert_relative_eq!(rect.heading, 0.0);
        assert_relative_eq!(rect.center.x, 1.025, epsilon = 1e-12);
        assert_relative_eq!(rect.center.y, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_envelope_follows_velocity() {
        let envelope = SafetyEnvelope::default();
        let slow = envelope.envelope_for(Vector2::zeros(), Vector2::new(0.0, 0.5));
        let fast = envelope.envelope_for(Vector2::zeros(), Vector2::new(0.0, 2.0));
        assert_relative_eq!(fast.heading, PI / 2.0, epsilon = 1e-12);
        assert!(fast.half_length > slow.half_length);
        assert!(fast.center.y > slow.center.y);
        assert_relative_eq!(fast.half_width, slow.half_width);
    }

    #[test]
    fn test_crawling_body_uses_fallback_heading() {
        let envelope = SafetyEnvelope::default();
        let rect = envelope.envelope_for(Vector2::zeros(), Vector2::new(0.0, 0.005));
        assert_eq!(rect.heading, 0.0);
    }

    #[test]
    fn test_invalid_envelope_config() {
        let config = EnvelopeConfig {
            side_clearance: -0.1,
            ..Default::default()
        };
        assert!(matches!(
            SafetyEnvelope::new(config),
            Err(PlanningError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_sat_separates_rotated_rectangles() {
        // Bounding boxes overlap but the diamond sits clear of the square's corner
        let square = OrientedRectangle::new(Vector2::zeros(), 0.5, 0.5, 0.0);
        let diamond = OrientedRectangle::new(Vector2::new(1.2, 1.2), 0.5, 0.5, PI / 4.0);
        assert!(!square.intersects(&diamond));
        let overlapping = OrientedRectangle::new(Vector2::new(0.7, 0.7), 0.5, 0.5, PI / 4.0);
        assert!(square.intersects(&overlapping));
    }

    #[test]
    fn test_sat_symmetry() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..2000 {
            let a = random_rectangle(&mut rng);
            let b = random_rectangle(&mut rng);
            assert_eq!(a.intersects(&b), b.intersects(&a));
        }
    }

    #[test]
    fn test_intersection_ratio_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..2000 {
            let a = random_rectangle(&mut rng);
            let b = random_rectangle(&mut rng);
            let ratio = a.intersection_ratio(&b);
            assert!((0.0..=1.0).contains(&ratio), "ratio {} out of range", ratio);
            if !a.intersects(&b) {
                assert_eq!(ratio, 0.0);
            }
        }
    }

    #[test]
    fn test_intersection_ratio_grows_with_overlap() {
        let a = OrientedRectangle::new(Vector2::zeros(), 0.3, 0.2, 0.0);
        let coincident = a.intersection_ratio(&a);
        assert_relative_eq!(coincident, 1.0);
        let shallow = a.intersection_ratio(&OrientedRectangle::new(Vector2::new(0.55, 0.0), 0.3, 0.2, 0.0));
        let deep = a.intersection_ratio(&OrientedRectangle::new(Vector2::new(0.2, 0.0), 0.3, 0.2, 0.0));
        assert!(shallow > 0.0);
        assert!(deep > shallow);
        // max separation = hypot(0.6, 0.4)
        let expected = (1.0 - 0.2 / 0.6_f64.hypot(0.4)).powf(1.5);
        assert_relative_eq!(deep, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_distance_is_approximate_clearance() {
        let a = OrientedRectangle::new(Vector2::zeros(), 0.2, 0.1, 0.0);
        let b = OrientedRectangle::new(Vector2::new(1.0, 0.0), 0.2, 0.1, 0.0);
        assert_relative_eq!(a.distance_to(&b), 1.0 - 0.2, epsilon = 1e-12);
        assert_relative_eq!(a.distance_to(&b), b.distance_to(&a));
        let touching = OrientedRectangle::new(Vector2::new(0.3, 0.0), 0.2, 0.1, 0.0);
        assert_eq!(a.distance_to(&touching), 0.0);
    }

    #[test]
    fn test_point_segment_distance() {
        let a = Vector2::new(0.0, 0.0);
        let b = Vector2::new(2.0, 0.0);
        assert_relative_eq!(point_segment_distance(&Vector2::new(1.0, 0.5), &a, &b), 0.5);
        assert_relative_eq!(point_segment_distance(&Vector2::new(3.0, 0.0), &a, &b), 1.0);
        assert_relative_eq!(point_segment_distance(&Vector2::new(0.0, 1.0), &a, &a), 1.0);
    }

    #[test]
    fn test_corners_span_extents() {
        let rect = OrientedRectangle::new(Vector2::new(1.0, 1.0), 0.5, 0.25, PI / 2.0);
        let corners = rect.corners();
        let max_y = corners.iter().map(|c| c.y).fold(f64::NEG_INFINITY, f64::max);
        let max_x = corners.iter().map(|c| c.x).fold(f64::NEG_INFINITY, f64::max);
        assert_relative_eq!(max_y, 1.5, epsilon = 1e-12);
        assert_relative_eq!(max_x, 1.25, epsilon = 1e-12);
    }
}
