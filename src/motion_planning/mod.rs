//! Motion planning module
//!
//! Per-robot planner ownership, fallback handling and configuration loading.

pub mod config;
pub mod facade;
pub mod fallback;

pub use config::*;
pub use facade::*;
pub use fallback::*;
