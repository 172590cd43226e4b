//! Facade configuration, loadable from TOML

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::PlanningResult;
use crate::control::{LimiterConfig, MpcConfig};
use crate::motion_planning::FallbackPolicy;
use crate::path_planning::DwaConfig;

/// Which local planner drives every robot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlannerKind {
    #[default]
    Dwa,
    Mpc,
}

/// Everything the facade needs to build planners and limit their output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionPlanningConfig {
    pub planner: PlannerKind,
    pub dwa: DwaConfig,
    pub mpc: MpcConfig,
    pub limiter: LimiterConfig,
    pub fallback: FallbackPolicy,
    /// Prefer a failed planner's best-effort velocity over the fallback
    pub use_best_effort: bool,
}

impl Default for MotionPlanningConfig {
    fn default() -> Self {
        Self {
            planner: PlannerKind::Dwa,
            dwa: DwaConfig::default(),
            mpc: MpcConfig::default(),
            limiter: LimiterConfig::default(),
            fallback: FallbackPolicy::Hold,
            use_best_effort: true,
        }
    }
}

impl MotionPlanningConfig {
    pub fn from_toml_str(text: &str) -> PlanningResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> PlanningResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks every section, including the planner that is not selected
    pub fn validate(&self) -> PlanningResult<()> {
        self.dwa.validate()?;
        self.mpc.validate()?;
        self.limiter.validate()?;
        self.fallback.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PlanningError;

    #[test]
    fn test_sample_config_parses() {
        let config = MotionPlanningConfig::from_toml_str(include_str!("../../config/planner.toml")).unwrap();
        assert_eq!(config.planner, PlannerKind::Mpc);
        assert_eq!(config.mpc.horizon, 5);
        assert_eq!(config.dwa.n_directions, 16);
        assert_eq!(config.fallback, FallbackPolicy::Proportional { gain: 3.0 });
        assert!(config.use_best_effort);
    }

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = MotionPlanningConfig::from_toml_str("").unwrap();
        assert_eq!(config, MotionPlanningConfig::default());
        assert_eq!(config.fallback, FallbackPolicy::Hold);
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let text = "planner = \"mpc\"\n[mpc]\nT = 8\n[limiter]\nmax_acceleration = 2.0\n";
        let config = MotionPlanningConfig::from_toml_str(text).unwrap();
        assert_eq!(config.mpc.horizon, 8);
        assert_eq!(config.mpc.dt, MpcConfig::default().dt);
        assert_eq!(config.limiter.max_acceleration, 2.0);
        assert_eq!(config.limiter.dt, LimiterConfig::default().dt);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = MotionPlanningConfig::from_toml_str("[limiter]\ndt = 0.0\n").unwrap_err();
        assert!(matches!(err, PlanningError::InvalidConfig(_)));
        let err = MotionPlanningConfig::from_toml_str("planner = \"rrt\"\n").unwrap_err();
        assert!(matches!(err, PlanningError::ConfigParse(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = MotionPlanningConfig::from_file("/nonexistent/planner.toml").unwrap_err();
        assert!(matches!(err, PlanningError::Io(_)));
    }
}
