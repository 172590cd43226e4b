//! Utility modules for ssl_local_planner

pub mod visualization;

pub use visualization::{colors, PathStyle, PointStyle, Visualizer};
