//! Local path planning algorithms

pub mod dwa;

pub use dwa::*;
